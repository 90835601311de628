use std::io::{self, BufRead};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use log::{error, info};

use orphe_rs::prelude::*;

fn flag_value(args: &[String], flag: &str) -> Option<u16> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ───────────────────────────────────────────────────────────────
    // Set RUST_LOG=debug for verbose output, e.g.:
    //   RUST_LOG=orphe_rs=debug cargo run -- SENSOR_VALUES
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // ── Arguments ─────────────────────────────────────────────────────────────
    //   orphe-rs [MODE] [--json] [--raw] [--acc 2|4|8|16] [--gyro 250|500|1000|2000]
    let args: Vec<String> = std::env::args().skip(1).collect();
    let json = args.iter().any(|a| a == "--json");
    let raw = args.iter().any(|a| a == "--raw");
    let mode_name = args
        .first()
        .filter(|a| !a.starts_with("--"))
        .map(String::as_str)
        .unwrap_or("STEP_ANALYSIS");
    if BeginMode::from_name(mode_name).is_none() {
        return Err(anyhow!(
            "unknown mode `{mode_name}` (STEP_ANALYSIS, SENSOR_VALUES, STEP_ANALYSIS_AND_SENSOR_VALUES)"
        ));
    }

    let mut options = BeginOptions::default();
    if let Some(g) = flag_value(&args, "--acc") {
        let range = AccRange::from_g(g).ok_or_else(|| anyhow!("--acc: {g} g is not a range"))?;
        options = options.acc_range(range);
    }
    if let Some(dps) = flag_value(&args, "--gyro") {
        let range =
            GyroRange::from_dps(dps).ok_or_else(|| anyhow!("--gyro: {dps} dps is not a range"))?;
        options = options.gyro_range(range);
    }

    // ── Connect ───────────────────────────────────────────────────────────────
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<OrpheEvent>();
    let client = Arc::new(OrpheClient::btleplug(
        OrpheClientConfig::default(),
        Hooks::new().forward_to(tx),
    ));
    client.setup(
        &DEFAULT_CHANNELS,
        SetupOptions {
            raw_data_monitoring: raw,
        },
    );

    info!(
        "Connecting to ORPHE CORE (name prefix {:?}, scan {} s) …",
        client.config().name_prefix,
        client.config().scan_timeout_secs
    );
    client.begin_named(mode_name, options).await?;
    info!("Streaming started. Type 'q' + Enter to quit.\n");
    info!("Commands (type + Enter):");
    info!("  q          – quit");
    info!("  l <0|1> <pattern> – LED off/on with pattern 0–4");
    info!("  b <0-255>  – LED brightness");
    info!("  a          – reset motion-sensor attitude");
    info!("  r          – reset analysis logs");
    info!("  i          – read device information\n");

    // ── Stdin command loop ────────────────────────────────────────────────────
    // Lines are read on an OS thread so no StdinLock is held across awaits.
    let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if line_tx.send(l.trim().to_owned()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let client_cmd = Arc::clone(&client);
    tokio::spawn(async move {
        while let Some(line) = line_rx.recv().await {
            let mut parts = line.split_whitespace();
            let result = match (parts.next(), parts.next(), parts.next()) {
                (None, ..) => continue,
                (Some("q"), ..) => {
                    info!("Quit requested.");
                    client_cmd.stop().await.ok();
                    std::process::exit(0);
                }
                (Some("l"), on, pattern) => {
                    let on = on.map(|v| v != "0").unwrap_or(true);
                    let pattern = pattern.and_then(|p| p.parse().ok()).unwrap_or(0);
                    client_cmd.set_led(on, pattern).await
                }
                (Some("b"), Some(value), _) => match value.parse::<u8>() {
                    Ok(v) => client_cmd.set_led_brightness(v).await,
                    Err(_) => {
                        error!("brightness must be 0–255");
                        continue;
                    }
                },
                (Some("a"), ..) => client_cmd.reset_motion_sensor_attitude().await,
                (Some("r"), ..) => client_cmd.reset_analysis_logs().await,
                (Some("i"), ..) => client_cmd.get_device_information().await.map(|_| ()),
                (Some(cmd), ..) => {
                    error!("unknown command '{cmd}'");
                    continue;
                }
            };
            if let Err(e) = result {
                error!("{line}: {e}");
            }
        }
    });

    // ── Main event loop ───────────────────────────────────────────────────────
    while let Some(event) = rx.recv().await {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => error!("json: {e}"),
            }
            if matches!(event, OrpheEvent::Disconnect) {
                break;
            }
            continue;
        }

        match event {
            OrpheEvent::Connect(channel) => info!("✅  Connected ({channel})"),
            OrpheEvent::Disconnect => {
                info!("❌  Disconnected from device.");
                break;
            }

            // ── Sensor values ────────────────────────────────────────────────
            OrpheEvent::Quat(q) => println!(
                "[QUAT]  ts={:.0}  w={:+.4} x={:+.4} y={:+.4} z={:+.4}",
                q.timestamp, q.value.w, q.value.x, q.value.y, q.value.z
            ),
            OrpheEvent::ConvertedAcc(a) => println!(
                "[ACC]   ts={:.0}  x={:+.4}g  y={:+.4}g  z={:+.4}g",
                a.timestamp, a.value.x, a.value.y, a.value.z
            ),
            OrpheEvent::ConvertedGyro(g) => println!(
                "[GYRO]  ts={:.0}  x={:+.2}°/s  y={:+.2}°/s  z={:+.2}°/s",
                g.timestamp, g.value.x, g.value.y, g.value.z
            ),
            OrpheEvent::Euler(e) => println!(
                "[EULER] pitch={:+.3} roll={:+.3} yaw={:+.3} rad",
                e.value.pitch, e.value.roll, e.value.yaw
            ),

            // ── Step analysis ────────────────────────────────────────────────
            OrpheEvent::StepsNumber(n) => println!("[STEPS] {n}"),
            OrpheEvent::Gait(g) => println!(
                "[GAIT]  {:?} {:?}  distance={:.2}  calorie={:.2}  stand={:.3} swing={:.3}",
                g.kind,
                g.direction,
                g.distance,
                g.calorie,
                g.standing_phase_duration,
                g.swing_phase_duration
            ),
            OrpheEvent::Stride(s) => println!(
                "[STRIDE] foot_angle={:+.1}°  x={:+.3} y={:+.3} z={:+.3}",
                s.foot_angle, s.x, s.y, s.z
            ),
            OrpheEvent::Pronation(p) => println!(
                "[PRONATION] impact={:.2}  x={:+.1}° y={:+.1}° z={:+.1}°",
                p.landing_impact, p.x, p.y, p.z
            ),

            // ── Device / link ────────────────────────────────────────────────
            OrpheEvent::DeviceInfo(d) => println!(
                "[DEVICE INFO] battery={}  lr={}  led={}  acc={:?}  gyro={:?}",
                d.battery,
                d.lr,
                d.led_brightness,
                d.acc_range(),
                d.gyro_range()
            ),
            OrpheEvent::BleFrequency(hz) => log::debug!("BLE frequency {hz:.1} Hz"),
            OrpheEvent::Data { channel, bytes } => println!("[DATA] {channel} {bytes:02x?}"),
            OrpheEvent::Warning(w) => log::warn!("{w:?}"),
            OrpheEvent::Error(e) => error!("{e}"),
            _ => {}
        }
    }

    info!("Event loop finished – exiting.");
    Ok(())
}
