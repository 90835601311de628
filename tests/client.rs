mod common;

use std::sync::{Arc, OnceLock};

use common::{client, settle, step_frame, FakeTransport};
use orphe_rs::error::OrpheError;
use orphe_rs::prelude::*;
use orphe_rs::protocol::{
    DEVICE_INFORMATION_CHARACTERISTIC, OTHER_SERVICE, REALTIME_ANALYSIS_CHARACTERISTIC,
};

/// Burst frame whose four readings all carry acc x = 0.5 (normalised).
fn burst_with_acc_x_half() -> Vec<u8> {
    let mut f = common::burst_frame();
    for i in 0..4 {
        let off = 8 + 21 * i;
        f[off + 14..off + 16].copy_from_slice(&16384i16.to_be_bytes());
    }
    f
}

// ── begin ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn begin_programs_ranges_and_subscribes_in_order() {
    let (client, fake, log) = client();

    client
        .begin(
            BeginMode::StepAnalysisAndSensorValues,
            BeginOptions::default()
                .acc_range(AccRange::G4)
                .gyro_range(GyroRange::Dps500),
        )
        .await
        .unwrap();

    assert_eq!(
        fake.writes_to(DEVICE_INFORMATION_CHARACTERISTIC),
        vec![vec![0x01, 1, 128, 0, 1, 0x00, 0x3c, 1, 1]]
    );
    assert_eq!(FakeTransport::count(&fake.calls.subscribe), 2);

    let starts: Vec<_> = log
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            OrpheEvent::StartNotify(c) => Some(c.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(starts, vec![STEP_ANALYSIS, SENSOR_VALUES]);

    let info = client.state().device_info.unwrap();
    assert_eq!(info.acc_range(), Some(AccRange::G4));
    assert_eq!(info.gyro_range(), Some(GyroRange::Dps500));
}

#[tokio::test]
async fn begin_keeps_device_ranges_by_default() {
    let (client, fake, log) = client();

    client
        .begin(BeginMode::StepAnalysis, BeginOptions::default())
        .await
        .unwrap();

    assert_eq!(
        fake.writes_to(DEVICE_INFORMATION_CHARACTERISTIC),
        vec![vec![0x01, 1, 128, 0, 1, 0x00, 0x3c, 3, 3]]
    );
    assert!(log
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, OrpheEvent::DeviceInfo(d) if d.battery == 80)));
    assert!(!client.connection().is_subscribed(SENSOR_VALUES));
}

#[tokio::test]
async fn begin_named_accepts_deprecated_mode() {
    let (client, fake, log) = client();

    client
        .begin_named("ANALYSIS_AND_RAW", BeginOptions::default())
        .await
        .unwrap();

    assert_eq!(
        log.lock().unwrap()[0],
        OrpheEvent::Warning(Warning::Deprecated {
            alias: "ANALYSIS_AND_RAW".into(),
            canonical: "STEP_ANALYSIS_AND_SENSOR_VALUES".into()
        })
    );
    assert_eq!(FakeTransport::count(&fake.calls.subscribe), 2);
}

#[tokio::test]
async fn begin_named_rejects_unknown_mode() {
    let (client, fake, log) = client();

    let err = client
        .begin_named("BOTH", BeginOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err, OrpheError::UnknownChannel { name: "BOTH".into() });
    assert_eq!(fake.calls.total(), 0);
    assert_eq!(*log.lock().unwrap(), vec![OrpheEvent::Error(err)]);
}

// ── Decoding end to end ───────────────────────────────────────────────────────

#[tokio::test]
async fn sensor_values_are_converted_with_device_ranges() {
    let (client, fake, log) = client();
    client
        .begin(BeginMode::SensorValues, BeginOptions::default())
        .await
        .unwrap();
    log.lock().unwrap().clear();

    fake.notify_sensor_values(&burst_with_acc_x_half());
    settle().await;

    let log = log.lock().unwrap();
    let converted: Vec<f32> = log
        .iter()
        .filter_map(|e| match e {
            OrpheEvent::ConvertedAcc(a) => Some(a.value.x),
            _ => None,
        })
        .collect();
    assert_eq!(converted.len(), 4);
    assert!(converted.iter().all(|x| (x - 8.0).abs() < 1e-6));
    assert!(!log.iter().any(|e| matches!(e, OrpheEvent::Warning(_))));
}

#[tokio::test]
async fn step_analysis_flows_to_hooks_and_state() {
    let (client, fake, _log) = client();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let hooked = OrpheClient::new(
        fake.clone(),
        OrpheClientConfig::default(),
        Hooks::new().on_steps_number(move |n| {
            let _ = tx.send(*n);
        }),
    );
    hooked.setup_default();
    hooked.start_notify(STEP_ANALYSIS).await.unwrap();

    fake.notify_step_analysis(&step_frame(0, 7));
    settle().await;

    assert_eq!(rx.try_recv().ok(), Some(7));
    assert_eq!(hooked.state().steps_number, 7);
    assert_eq!(hooked.state().gait.step_count, 7);
    // The first client never subscribed and saw nothing.
    assert_eq!(client.state().steps_number, 0);
}

#[tokio::test]
async fn hooks_can_read_client_state() {
    let fake = Arc::new(FakeTransport::default());
    let slot: Arc<OnceLock<Arc<OrpheClient<FakeTransport>>>> = Arc::new(OnceLock::new());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let reader = slot.clone();
    let hooks = Hooks::new().on_steps_number(move |n| {
        let seen = reader.get().map(|c| c.state().steps_number);
        let _ = tx.send((*n, seen));
    });
    let client = Arc::new(OrpheClient::new(
        fake.clone(),
        OrpheClientConfig::default(),
        hooks,
    ));
    client.setup_default();
    assert!(slot.set(client.clone()).is_ok());
    client.start_notify(STEP_ANALYSIS).await.unwrap();

    fake.notify_step_analysis(&step_frame(0, 5));
    settle().await;

    // The hook sees the frame already committed.
    assert_eq!(rx.try_recv().ok(), Some((5, Some(5))));
    assert_eq!(client.state().steps_number, 5);
}

#[tokio::test]
async fn custom_channel_delivers_raw_data() {
    let (client, fake, log) = client();
    client.set_uuid("REALTIME", OTHER_SERVICE, REALTIME_ANALYSIS_CHARACTERISTIC);
    client.start_notify("REALTIME").await.unwrap();

    fake.notify(REALTIME_ANALYSIS_CHARACTERISTIC, &[1, 2, 3]);
    settle().await;

    assert!(log.lock().unwrap().contains(&OrpheEvent::Data {
        channel: "REALTIME".into(),
        bytes: vec![1, 2, 3]
    }));
    assert_eq!(client.state(), SessionState::default());
}

#[tokio::test]
async fn malformed_notification_does_not_stop_the_stream() {
    let (client, fake, log) = client();
    client.start_notify(STEP_ANALYSIS).await.unwrap();

    fake.notify_step_analysis(&[0u8; 12]);
    fake.notify_step_analysis(&step_frame(0, 1));
    settle().await;

    let log = log.lock().unwrap();
    assert!(log.contains(&OrpheEvent::Warning(Warning::MalformedFrame {
        channel: STEP_ANALYSIS.into(),
        expected_len: 20,
        actual_len: 12
    })));
    assert!(log.contains(&OrpheEvent::StepsNumber(1)));
    assert!(!log.iter().any(|e| matches!(e, OrpheEvent::Error(_))));
}

#[tokio::test]
async fn raw_monitoring_skips_decoding() {
    let (client, fake, log) = client();
    client.set_raw_data_monitoring(true);
    client.start_notify(STEP_ANALYSIS).await.unwrap();

    let frame = step_frame(0, 4);
    fake.notify_step_analysis(&frame);
    settle().await;

    assert!(log.lock().unwrap().contains(&OrpheEvent::Data {
        channel: STEP_ANALYSIS.into(),
        bytes: frame.to_vec()
    }));
    assert_eq!(client.state().steps_number, 0);
}

// ── Device control ────────────────────────────────────────────────────────────

#[tokio::test]
async fn commands_write_their_encodings() {
    let (client, fake, _log) = client();

    client.set_led(true, 2).await.unwrap();
    client.reset_motion_sensor_attitude().await.unwrap();
    client.reset_analysis_logs().await.unwrap();

    assert_eq!(
        fake.writes_to(DEVICE_INFORMATION_CHARACTERISTIC),
        vec![vec![0x02, 1, 2], vec![0x03], vec![0x04]]
    );
}

#[tokio::test]
async fn led_brightness_patches_the_cached_image() {
    let (client, fake, _log) = client();

    client.set_led_brightness(200).await.unwrap();
    client.set_led_brightness(10).await.unwrap();

    assert_eq!(FakeTransport::count(&fake.calls.read), 1);
    let writes = fake.writes_to(DEVICE_INFORMATION_CHARACTERISTIC);
    let mut expected = vec![0u8; 20];
    expected[..9].copy_from_slice(&[1, 1, 200, 3, 1, 0, 0x3c, 3, 3]);
    assert_eq!(writes[0], expected);
    assert_eq!(writes[1][2], 10);
    assert_eq!(client.state().device_info.unwrap().led_brightness, 10);
}

#[tokio::test]
async fn unparseable_device_information_is_reported() {
    let (client, fake, log) = client();
    fake.reads
        .lock()
        .unwrap()
        .insert(DEVICE_INFORMATION_CHARACTERISTIC, vec![80, 1, 0]);

    let err = client.get_device_information().await.unwrap_err();

    assert_eq!(
        err,
        OrpheError::MalformedFrame {
            expected_len: 10,
            actual_len: 3
        }
    );
    assert_eq!(log.lock().unwrap().last(), Some(&OrpheEvent::Error(err)));
    assert_eq!(client.state().device_info, None);
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn reset_emits_disconnect_clear_reset() {
    let (client, fake, log) = client();
    client
        .begin(BeginMode::StepAnalysis, BeginOptions::default())
        .await
        .unwrap();
    fake.notify_step_analysis(&step_frame(0, 3));
    settle().await;
    assert_eq!(client.state().steps_number, 3);

    client.reset().await.unwrap();

    let log = log.lock().unwrap();
    assert_eq!(
        log[log.len() - 3..],
        [OrpheEvent::Disconnect, OrpheEvent::Clear, OrpheEvent::Reset]
    );
    assert_eq!(client.state(), SessionState::default());
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn stop_without_a_link_still_resets() {
    let (client, _fake, log) = client();

    assert_eq!(client.stop().await, Err(OrpheError::NotConnected));
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            OrpheEvent::Error(OrpheError::NotConnected),
            OrpheEvent::Clear,
            OrpheEvent::Reset
        ]
    );
}

#[tokio::test]
async fn clients_do_not_share_hooks() {
    let (a, fake_a, log_a) = client();
    let (b, _fake_b, log_b) = client();
    a.start_notify(STEP_ANALYSIS).await.unwrap();
    b.start_notify(STEP_ANALYSIS).await.unwrap();
    let before_b = log_b.lock().unwrap().len();

    fake_a.notify_step_analysis(&step_frame(0, 2));
    settle().await;

    assert!(log_a.lock().unwrap().contains(&OrpheEvent::StepsNumber(2)));
    assert_eq!(log_b.lock().unwrap().len(), before_b);
    assert_eq!(b.state().steps_number, 0);
}
