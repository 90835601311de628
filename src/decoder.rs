//! Applies parsed frames to [`SessionState`] and yields events in hook order.
//!
//! [`crate::parse`] turns bytes into frames; this module decides what a frame
//! *means* given what the session has already seen: step-counter gating,
//! range conversion, Euler derivation.  It keeps no state of its own.

use chrono::{DateTime, Local};
use log::{debug, warn};

use crate::channel::ChannelKind;
use crate::error::Result;
use crate::parse::{
    parse_device_info, parse_sensor_values, parse_step_analysis, ImuReading, SensorValuesFrame,
    StepAnalysisFrame,
};
use crate::session::SessionState;
use crate::types::{OrpheEvent, Sample, Warning};

/// Decode one notification (or read result) received on `channel`.
///
/// On `Err` the state is untouched and no events are produced.
pub fn decode_frame(
    state: &mut SessionState,
    channel: &str,
    data: &[u8],
    received_at: &DateTime<Local>,
) -> Result<Vec<OrpheEvent>> {
    let mut events = Vec::new();

    match ChannelKind::of(channel) {
        ChannelKind::DeviceInformation => {
            let info = parse_device_info(data)?;
            state.set_device_info(info);
            events.push(OrpheEvent::DeviceInfo(info));
        }
        ChannelKind::StepAnalysis => {
            let frame = parse_step_analysis(data)?;
            apply_step_analysis(state, frame, received_at, &mut events);
        }
        ChannelKind::SensorValues => match parse_sensor_values(data, received_at)? {
            SensorValuesFrame::Burst { readings, .. } => {
                for reading in readings {
                    apply_imu_reading(state, reading, &mut events);
                }
            }
            SensorValuesFrame::Single(reading) => apply_imu_reading(state, reading, &mut events),
            SensorValuesFrame::Unknown(header) => {
                debug!("{channel}: ignoring frame with unknown header {header}");
            }
        },
        ChannelKind::Custom => events.push(OrpheEvent::Data {
            channel: channel.to_owned(),
            bytes: data.to_vec(),
        }),
    }

    Ok(events)
}

// ── Step analysis ─────────────────────────────────────────────────────────────

fn apply_step_analysis(
    state: &mut SessionState,
    frame: StepAnalysisFrame,
    received_at: &DateTime<Local>,
    events: &mut Vec<OrpheEvent>,
) {
    // The global counter is fed by gait, stride and pronation frames alike,
    // before (and independently of) each kind's own gate.
    if let Some(steps) = frame.counted_steps() {
        if steps > state.steps_number {
            state.steps_number = steps;
            events.push(OrpheEvent::StepsNumber(steps));
        }
    }

    match frame {
        StepAnalysisFrame::GaitOverview(gait) if gait.step_count > state.gait.step_count => {
            state.gait = gait;
            events.extend([
                OrpheEvent::Gait(gait),
                OrpheEvent::Type(gait.kind),
                OrpheEvent::Distance(gait.distance),
                OrpheEvent::Direction(gait.direction),
                OrpheEvent::Calorie(gait.calorie),
                OrpheEvent::StandingPhaseDuration(gait.standing_phase_duration),
                OrpheEvent::SwingPhaseDuration(gait.swing_phase_duration),
            ]);
        }
        StepAnalysisFrame::Stride(stride) if stride.step_count > state.stride.step_count => {
            state.stride = stride;
            events.extend([
                OrpheEvent::FootAngle(stride.foot_angle),
                OrpheEvent::Stride(stride),
            ]);
        }
        StepAnalysisFrame::Pronation(pronation)
            if pronation.step_count > state.pronation.step_count =>
        {
            state.pronation = pronation;
            events.extend([
                OrpheEvent::Pronation(pronation),
                OrpheEvent::LandingImpact(pronation.landing_impact),
            ]);
        }
        StepAnalysisFrame::Attitude { quat, delta, .. } => {
            let timestamp = received_at.timestamp_millis() as f64;
            let quat = Sample {
                value: quat,
                timestamp,
                burst: None,
            };
            let delta = Sample {
                value: delta,
                timestamp,
                burst: None,
            };
            let euler = Sample {
                value: quat.value.to_euler(),
                timestamp,
                burst: None,
            };
            state.quat = Some(quat);
            state.delta = Some(delta);
            state.euler = Some(euler);
            events.extend([
                OrpheEvent::Quat(quat),
                OrpheEvent::Delta(delta),
                OrpheEvent::Euler(euler),
            ]);
        }
        StepAnalysisFrame::Reserved { subtype, .. } => {
            debug!("step analysis: ignoring reserved subtype {subtype}");
        }
        // Gated: step count did not advance for this kind.
        _ => {}
    }
}

// ── Sensor values ─────────────────────────────────────────────────────────────

/// Emit one reading as `Quat, Gyro, Acc, ConvertedGyro, ConvertedAcc, Euler`.
///
/// Converted values need both range codes from device information; without
/// them the reading is emitted raw and a single `RangeUnknown` warning is
/// raised for the session.
fn apply_imu_reading(state: &mut SessionState, reading: ImuReading, events: &mut Vec<OrpheEvent>) {
    let sample = |value| Sample {
        value,
        timestamp: reading.timestamp,
        burst: reading.burst,
    };
    let quat = Sample {
        value: reading.quat,
        timestamp: reading.timestamp,
        burst: reading.burst,
    };
    let gyro = sample(reading.gyro);
    let acc = sample(reading.acc);

    events.extend([
        OrpheEvent::Quat(quat),
        OrpheEvent::Gyro(gyro),
        OrpheEvent::Acc(acc),
    ]);
    state.quat = Some(quat);
    state.gyro = Some(gyro);
    state.acc = Some(acc);

    match state.ranges() {
        Some((acc_range, gyro_range)) => {
            let converted_gyro = sample(reading.gyro.scaled(gyro_range.scale()));
            let converted_acc = sample(reading.acc.scaled(acc_range.scale()));
            events.extend([
                OrpheEvent::ConvertedGyro(converted_gyro),
                OrpheEvent::ConvertedAcc(converted_acc),
            ]);
            state.converted_gyro = Some(converted_gyro);
            state.converted_acc = Some(converted_acc);
        }
        None if !state.range_warned => {
            warn!("sensor ranges unknown (device information not read); emitting raw values only");
            state.range_warned = true;
            events.push(OrpheEvent::Warning(Warning::RangeUnknown));
        }
        None => {}
    }

    let euler = Sample {
        value: reading.quat.to_euler(),
        timestamp: reading.timestamp,
        burst: reading.burst,
    };
    state.euler = Some(euler);
    events.push(OrpheEvent::Euler(euler));
}
