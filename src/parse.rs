//! Binary decoders for ORPHE CORE notification payloads.
//!
//! Every function here is pure: bytes (plus, for burst frames, the local
//! receipt time) in, typed frame out.  Gating, range conversion, and event
//! ordering live in [`crate::session`], which owns the state these frames are
//! applied to.
//!
//! All multi-byte fields are big-endian.
//!
//! | Function | Characteristic | Format |
//! |---|---|---|
//! | [`parse_device_info`] | `DEVICE_INFORMATION` | ≥ 10 × u8 settings |
//! | [`parse_step_analysis`] | `STEP_ANALYSIS` | 20 B, subtype at 1, u16 steps at 2 |
//! | [`parse_sensor_values`] | `SENSOR_VALUES` | header 50 (92 B burst ×4) or 40 (compact) |

use chrono::{DateTime, Local, TimeZone, Timelike};
use half::f16;

use crate::error::{OrpheError, Result};
use crate::protocol::{
    BURST_FRAME_LEN, BURST_STRIDE, BURST_SUB_SAMPLES, DEVICE_INFO_MIN_LEN, SENSOR_HEADER_BURST,
    SENSOR_HEADER_SINGLE, SINGLE_FRAME_MIN_LEN, STEP_ANALYSIS_FRAME_LEN,
};
use crate::types::{
    BurstPosition, DeviceInfo, Direction, Gait, GaitKind, Pronation, Quaternion, Stride, Xyz,
};

// ── Field readers ─────────────────────────────────────────────────────────────
//
// Callers check the frame length up front, so the readers index directly.

fn read_u16_be(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

fn read_i16_be(data: &[u8], offset: usize) -> i16 {
    i16::from_be_bytes([data[offset], data[offset + 1]])
}

fn read_f32_be(data: &[u8], offset: usize) -> f32 {
    f32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Read an IEEE 754 binary16 value stored big-endian at `offset`.
///
/// ```
/// # use orphe_rs::parse::read_f16_be;
/// // 0x3C00 = 1.0, 0xC000 = -2.0
/// assert_eq!(read_f16_be(&[0x3C, 0x00, 0xC0, 0x00], 0), 1.0);
/// assert_eq!(read_f16_be(&[0x3C, 0x00, 0xC0, 0x00], 2), -2.0);
/// ```
pub fn read_f16_be(data: &[u8], offset: usize) -> f32 {
    f16::from_bits(read_u16_be(data, offset)).to_f32()
}

/// Q15 fixed point (`i16 / 32768`), used for quaternions and burst IMU values.
fn read_q15(data: &[u8], offset: usize) -> f32 {
    read_i16_be(data, offset) as f32 / 32768.0
}

/// Signed 8-bit fixed point (`i8 / 127`), used by the compact frame.
fn read_q7(data: &[u8], offset: usize) -> f32 {
    data[offset] as i8 as f32 / 127.0
}

fn ensure_len(data: &[u8], expected_len: usize) -> Result<()> {
    if data.len() < expected_len {
        return Err(OrpheError::MalformedFrame {
            expected_len,
            actual_len: data.len(),
        });
    }
    Ok(())
}

// ── Device information ────────────────────────────────────────────────────────

/// Decode a `DEVICE_INFORMATION` read.
///
/// | Byte | Field |
/// |---|---|
/// | 0 | battery |
/// | 1 | left/right side |
/// | 2 | recording mode |
/// | 3 | auto-run flag |
/// | 4 | LED brightness |
/// | 5 | motor strength |
/// | 6–7 | logging interval (high, low) |
/// | 8 | accelerometer range code |
/// | 9 | gyroscope range code |
pub fn parse_device_info(data: &[u8]) -> Result<DeviceInfo> {
    ensure_len(data, DEVICE_INFO_MIN_LEN)?;
    Ok(DeviceInfo {
        battery: data[0],
        lr: data[1],
        recording_mode: data[2],
        auto_run: data[3],
        led_brightness: data[4],
        motor_strength: data[5],
        time01: data[6],
        time02: data[7],
        acc_range_code: data[8],
        gyro_range_code: data[9],
    })
}

// ── Step analysis ─────────────────────────────────────────────────────────────

/// Step-analysis subtypes (byte 1 of the frame).
mod step_subtype {
    pub const GAIT_OVERVIEW: u8 = 0;
    pub const STRIDE: u8 = 1;
    pub const PRONATION: u8 = 2;
    // 3 = stride attitude (never implemented by the firmware)
    pub const ATTITUDE: u8 = 4;
    // 5 = sensor test, 6 = delta elapsed-time test
}

/// One decoded `STEP_ANALYSIS` notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepAnalysisFrame {
    GaitOverview(Gait),
    Stride(Stride),
    Pronation(Pronation),
    Attitude {
        step_count: u16,
        quat: Quaternion,
        delta: Xyz,
    },
    /// Subtypes 3, 5, 6 and anything newer.  Carried so the caller can log it.
    Reserved { subtype: u8, step_count: u16 },
}

impl StepAnalysisFrame {
    /// Step count of the frames that feed the global step counter
    /// (gait, stride, pronation).
    pub fn counted_steps(&self) -> Option<u16> {
        match self {
            Self::GaitOverview(g) => Some(g.step_count),
            Self::Stride(s) => Some(s.step_count),
            Self::Pronation(p) => Some(p.step_count),
            Self::Attitude { .. } | Self::Reserved { .. } => None,
        }
    }
}

/// Decode a 20-byte `STEP_ANALYSIS` notification.
///
/// ```text
/// [0]      unused
/// [1]      subtype
/// [2..4]   u16 step count
/// [4..20]  subtype payload
/// ```
///
/// | Subtype | Payload |
/// |---|---|
/// | 0 gait | `[4]` bits 0–1 kind, bits 2–4 direction; `[6]` f16 calorie; `[8]` f32 distance; `[12]`/`[16]` f32 standing/swing phase |
/// | 1 stride | `[4]`/`[8]`/`[12]`/`[16]` f32 foot angle, x, y, z |
/// | 2 pronation | `[4]`/`[8]`/`[12]`/`[16]` f32 landing impact, x, y, z |
/// | 4 attitude | `[6..14]` f16 quaternion w, x, y, z; `[14..20]` f16 delta x, y, z |
pub fn parse_step_analysis(data: &[u8]) -> Result<StepAnalysisFrame> {
    ensure_len(data, STEP_ANALYSIS_FRAME_LEN)?;

    let subtype = data[1];
    let step_count = read_u16_be(data, 2);

    let frame = match subtype {
        step_subtype::GAIT_OVERVIEW => {
            let packed = data[4];
            StepAnalysisFrame::GaitOverview(Gait {
                kind: GaitKind::from_bits(packed),
                direction: Direction::from_code((packed & 0b0001_1100) >> 2)
                    .unwrap_or_default(),
                calorie: read_f16_be(data, 6),
                distance: read_f32_be(data, 8),
                step_count,
                standing_phase_duration: read_f32_be(data, 12),
                swing_phase_duration: read_f32_be(data, 16),
            })
        }
        step_subtype::STRIDE => StepAnalysisFrame::Stride(Stride {
            foot_angle: read_f32_be(data, 4),
            x: read_f32_be(data, 8),
            y: read_f32_be(data, 12),
            z: read_f32_be(data, 16),
            step_count,
        }),
        step_subtype::PRONATION => StepAnalysisFrame::Pronation(Pronation {
            landing_impact: read_f32_be(data, 4),
            x: read_f32_be(data, 8),
            y: read_f32_be(data, 12),
            z: read_f32_be(data, 16),
            step_count,
        }),
        step_subtype::ATTITUDE => StepAnalysisFrame::Attitude {
            step_count,
            quat: Quaternion {
                w: read_f16_be(data, 6),
                x: read_f16_be(data, 8),
                y: read_f16_be(data, 10),
                z: read_f16_be(data, 12),
            },
            delta: Xyz {
                x: read_f16_be(data, 14),
                y: read_f16_be(data, 16),
                z: read_f16_be(data, 18),
            },
        },
        subtype => StepAnalysisFrame::Reserved {
            subtype,
            step_count,
        },
    };
    Ok(frame)
}

// ── Sensor values ─────────────────────────────────────────────────────────────

/// One IMU reading from a `SENSOR_VALUES` frame, before range conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuReading {
    pub quat: Quaternion,
    /// Normalised to −1…1; multiply by the gyro range for °/s.
    pub gyro: Xyz,
    /// Normalised to −1…1; multiply by the acc range for g.
    pub acc: Xyz,
    /// Milliseconds since the Unix epoch.
    pub timestamp: f64,
    pub burst: Option<BurstPosition>,
}

/// One decoded `SENSOR_VALUES` notification.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorValuesFrame {
    /// Header 50.  `readings` are in emission order: sub-sample 3 first,
    /// sub-sample 0 last.
    Burst {
        serial_number: u16,
        base_timestamp: f64,
        readings: Vec<ImuReading>,
    },
    /// Header 40.
    Single(ImuReading),
    /// Any other header byte; ignored for forward compatibility.
    Unknown(u8),
}

/// Milliseconds since the Unix epoch for a device wall-clock time on the
/// receipt day.
///
/// Fields are added arithmetically to local midnight, so out-of-range values
/// (a millisecond field above 999, say) roll forward instead of failing.
/// The receipt day is used even when a buffered frame was captured before
/// midnight.
pub fn device_time_to_timestamp(
    received_at: &DateTime<Local>,
    hours: u8,
    minutes: u8,
    seconds: u8,
    millis: u16,
) -> f64 {
    let midnight_ms = local_midnight_ms(received_at);

    let offset_ms = hours as i64 * 3_600_000
        + minutes as i64 * 60_000
        + seconds as i64 * 1000
        + millis as i64;
    (midnight_ms + offset_ms) as f64
}

/// Epoch milliseconds of the first instant of `at`'s local calendar day.
///
/// Resolved through the time zone rather than by subtracting the wall-clock
/// time, so days that start or end on a DST change still land on their real
/// midnight.  Where midnight itself is skipped, the day starts at the first
/// valid local time after it.
fn local_midnight_ms(at: &DateTime<Local>) -> i64 {
    let day = at.date_naive();
    (0..24)
        .filter_map(|hour| day.and_hms_opt(hour, 0, 0))
        .find_map(|start| Local.from_local_datetime(&start).earliest())
        .map(|start| start.timestamp_millis())
        .unwrap_or_else(|| {
            at.timestamp_millis()
                - (at.num_seconds_from_midnight() as i64 * 1000
                    + at.timestamp_subsec_millis() as i64)
        })
}

/// Decode a `SENSOR_VALUES` notification.
///
/// # Burst frame (header 50, exactly 92 bytes)
///
/// ```text
/// [0]       50
/// [1..3]    u16 serial number
/// [3..8]    hour, minute, second, u16 millisecond of sub-sample 0
/// [8 + 21·i ..]  sub-sample i (i = 0..4):
///             +0..8   i16 quat w, x, y, z   (÷ 32768)
///             +8..14  i16 gyro x, y, z      (÷ 32768)
///             +14..20 i16 acc x, y, z       (÷ 32768)
///             +20     u8 Δt of sub-sample i+1 relative to sub-sample 0, ms
/// ```
///
/// # Compact frame (header 40)
///
/// ```text
/// [1..9]    i16 quat w, x, y, z  (÷ 32768)
/// [9..12]   i8 gyro x, y, z      (÷ 127)
/// [14..17]  i8 acc x, y, z       (÷ 127)
/// ```
///
/// The compact frame carries no clock; it is stamped with `received_at`.
pub fn parse_sensor_values(data: &[u8], received_at: &DateTime<Local>) -> Result<SensorValuesFrame> {
    ensure_len(data, 1)?;

    match data[0] {
        SENSOR_HEADER_BURST => {
            if data.len() != BURST_FRAME_LEN {
                return Err(OrpheError::MalformedFrame {
                    expected_len: BURST_FRAME_LEN,
                    actual_len: data.len(),
                });
            }
            let serial_number = read_u16_be(data, 1);
            let base_timestamp = device_time_to_timestamp(
                received_at,
                data[3],
                data[4],
                data[5],
                read_u16_be(data, 6),
            );

            let readings = (0..BURST_SUB_SAMPLES)
                .rev()
                .map(|i| {
                    let off = 8 + BURST_STRIDE * i;
                    let timestamp = if i > 0 {
                        base_timestamp + data[28 + BURST_STRIDE * (i - 1)] as f64
                    } else {
                        base_timestamp
                    };
                    ImuReading {
                        quat: Quaternion {
                            w: read_q15(data, off),
                            x: read_q15(data, off + 2),
                            y: read_q15(data, off + 4),
                            z: read_q15(data, off + 6),
                        },
                        gyro: Xyz {
                            x: read_q15(data, off + 8),
                            y: read_q15(data, off + 10),
                            z: read_q15(data, off + 12),
                        },
                        acc: Xyz {
                            x: read_q15(data, off + 14),
                            y: read_q15(data, off + 16),
                            z: read_q15(data, off + 18),
                        },
                        timestamp,
                        burst: Some(BurstPosition {
                            serial_number,
                            index: i as u8,
                        }),
                    }
                })
                .collect();

            Ok(SensorValuesFrame::Burst {
                serial_number,
                base_timestamp,
                readings,
            })
        }

        SENSOR_HEADER_SINGLE => {
            ensure_len(data, SINGLE_FRAME_MIN_LEN)?;
            Ok(SensorValuesFrame::Single(ImuReading {
                quat: Quaternion {
                    w: read_q15(data, 1),
                    x: read_q15(data, 3),
                    y: read_q15(data, 5),
                    z: read_q15(data, 7),
                },
                gyro: Xyz {
                    x: read_q7(data, 9),
                    y: read_q7(data, 10),
                    z: read_q7(data, 11),
                },
                acc: Xyz {
                    x: read_q7(data, 14),
                    y: read_q7(data, 15),
                    z: read_q7(data, 16),
                },
                timestamp: received_at.timestamp_millis() as f64,
                burst: None,
            }))
        }

        header => Ok(SensorValuesFrame::Unknown(header)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 25, 12, 0, 0).single().unwrap()
    }

    fn f16_bytes(v: f32) -> [u8; 2] {
        f16::from_f32(v).to_bits().to_be_bytes()
    }

    pub(crate) fn step_frame(subtype: u8, steps: u16) -> [u8; 20] {
        let mut f = [0u8; 20];
        f[1] = subtype;
        f[2..4].copy_from_slice(&steps.to_be_bytes());
        f
    }

    /// Burst frame at 09:30:15.250 whose sub-sample `i` has quaternion w =
    /// `(i + 1) / 8` and Δt bytes 5, 10, 15.
    pub(crate) fn burst_frame() -> Vec<u8> {
        let mut f = vec![0u8; BURST_FRAME_LEN];
        f[0] = SENSOR_HEADER_BURST;
        f[1..3].copy_from_slice(&0x0102u16.to_be_bytes());
        f[3] = 9;
        f[4] = 30;
        f[5] = 15;
        f[6..8].copy_from_slice(&250u16.to_be_bytes());
        for i in 0..4 {
            let off = 8 + 21 * i;
            let w = ((i as i32 + 1) * 4096) as i16;
            f[off..off + 2].copy_from_slice(&w.to_be_bytes());
            // gyro x = 0.5, acc z = -0.25
            f[off + 8..off + 10].copy_from_slice(&16384i16.to_be_bytes());
            f[off + 18..off + 20].copy_from_slice(&(-8192i16).to_be_bytes());
        }
        f[28] = 5;
        f[49] = 10;
        f[70] = 15;
        f
    }

    #[test]
    fn device_info_fields() {
        let info = parse_device_info(&[80, 1, 2, 1, 128, 9, 0x01, 0x2C, 3, 2]).unwrap();
        assert_eq!(info.battery, 80);
        assert_eq!(info.lr, 1);
        assert_eq!(info.led_brightness, 128);
        assert_eq!(info.logging_interval(), 300);
        assert_eq!(info.acc_range_code, 3);
        assert_eq!(info.gyro_range_code, 2);
    }

    #[test]
    fn device_info_too_short() {
        assert_eq!(
            parse_device_info(&[0; 9]),
            Err(OrpheError::MalformedFrame {
                expected_len: 10,
                actual_len: 9
            })
        );
    }

    #[test]
    fn gait_overview_packed_fields() {
        let mut f = step_frame(0, 42);
        f[4] = 0b0000_1010; // kind = run (2), direction = backward (2)
        f[6..8].copy_from_slice(&f16_bytes(12.5));
        f[8..12].copy_from_slice(&1234.5f32.to_be_bytes());
        f[12..16].copy_from_slice(&0.4f32.to_be_bytes());
        f[16..20].copy_from_slice(&0.6f32.to_be_bytes());

        match parse_step_analysis(&f).unwrap() {
            StepAnalysisFrame::GaitOverview(g) => {
                assert_eq!(g.kind, GaitKind::Run);
                assert_eq!(g.direction, Direction::Backward);
                assert_eq!(g.calorie, 12.5);
                assert_eq!(g.distance, 1234.5);
                assert_eq!(g.step_count, 42);
                assert_eq!(g.standing_phase_duration, 0.4);
                assert_eq!(g.swing_phase_duration, 0.6);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn attitude_half_floats_survive_encoding() {
        let quat = [0.7071, 0.0, -0.7071, 0.001];
        let delta = [0.125, -3.5, 1000.0];
        let mut f = step_frame(4, 7);
        for (k, v) in quat.iter().chain(delta.iter()).enumerate() {
            let off = 6 + 2 * k;
            f[off..off + 2].copy_from_slice(&f16_bytes(*v));
        }

        let StepAnalysisFrame::Attitude { quat: q, delta: d, .. } = parse_step_analysis(&f).unwrap()
        else {
            panic!("expected attitude frame");
        };
        // binary16 carries 11 significant bits: relative error ≤ 2⁻¹¹.
        let close = |a: f32, b: f32| (a - b).abs() <= b.abs() * 4.9e-4 + 1e-7;
        assert!(close(q.w, quat[0]) && close(q.x, quat[1]) && close(q.y, quat[2]) && close(q.z, quat[3]));
        assert!(close(d.x, delta[0]) && close(d.y, delta[1]) && close(d.z, delta[2]));
    }

    #[test]
    fn reserved_subtypes_are_not_errors() {
        for subtype in [3, 5, 6, 9] {
            assert_eq!(
                parse_step_analysis(&step_frame(subtype, 1)).unwrap(),
                StepAnalysisFrame::Reserved {
                    subtype,
                    step_count: 1
                }
            );
        }
    }

    #[test]
    fn step_frame_must_be_twenty_bytes() {
        assert!(matches!(
            parse_step_analysis(&[0; 12]),
            Err(OrpheError::MalformedFrame {
                expected_len: 20,
                actual_len: 12
            })
        ));
    }

    #[test]
    fn burst_sub_samples_in_descending_order() {
        let SensorValuesFrame::Burst {
            serial_number,
            base_timestamp,
            readings,
        } = parse_sensor_values(&burst_frame(), &noon()).unwrap()
        else {
            panic!("expected burst frame");
        };

        let expected_base = Local
            .with_ymd_and_hms(2024, 5, 25, 9, 30, 15)
            .single()
            .unwrap()
            .timestamp_millis() as f64
            + 250.0;
        assert_eq!(serial_number, 0x0102);
        assert_eq!(base_timestamp, expected_base);

        let indices: Vec<u8> = readings.iter().map(|r| r.burst.unwrap().index).collect();
        assert_eq!(indices, vec![3, 2, 1, 0]);

        let offsets: Vec<f64> = readings.iter().map(|r| r.timestamp - expected_base).collect();
        assert_eq!(offsets, vec![15.0, 10.0, 5.0, 0.0]);

        assert_eq!(readings[0].quat.w, 0.5);
        assert_eq!(readings[3].quat.w, 0.125);
        assert!(readings.iter().all(|r| r.gyro.x == 0.5 && r.acc.z == -0.25));
    }

    #[test]
    fn burst_with_wrong_length_is_malformed() {
        let mut f = burst_frame();
        f.pop();
        assert_eq!(
            parse_sensor_values(&f, &noon()),
            Err(OrpheError::MalformedFrame {
                expected_len: 92,
                actual_len: 91
            })
        );
    }

    #[test]
    fn compact_frame_scaling() {
        let mut f = [0u8; 20];
        f[0] = SENSOR_HEADER_SINGLE;
        f[1..3].copy_from_slice(&32767i16.to_be_bytes());
        f[9] = 127;
        f[10] = (-127i8) as u8;
        f[16] = 0x40; // 64 / 127

        let SensorValuesFrame::Single(r) = parse_sensor_values(&f, &noon()).unwrap() else {
            panic!("expected compact frame");
        };
        assert!((r.quat.w - 32767.0 / 32768.0).abs() < 1e-7);
        assert_eq!(r.gyro.x, 1.0);
        assert_eq!(r.gyro.y, -1.0);
        assert!((r.acc.z - 64.0 / 127.0).abs() < 1e-7);
        assert_eq!(r.timestamp, noon().timestamp_millis() as f64);
        assert!(r.burst.is_none());
    }

    #[test]
    fn unknown_header_is_ignored() {
        assert_eq!(
            parse_sensor_values(&[7, 1, 2, 3], &noon()).unwrap(),
            SensorValuesFrame::Unknown(7)
        );
    }

    #[test]
    fn device_time_starts_at_local_midnight() {
        let midnight = Local.with_ymd_and_hms(2024, 5, 25, 0, 0, 0).single().unwrap();
        assert_eq!(
            device_time_to_timestamp(&noon(), 0, 0, 0, 0),
            midnight.timestamp_millis() as f64
        );

        // Receipt time of day does not shift the base.
        let late = Local.with_ymd_and_hms(2024, 5, 25, 23, 30, 15).single().unwrap();
        assert_eq!(
            device_time_to_timestamp(&late, 1, 2, 3, 4),
            midnight.timestamp_millis() as f64 + 3_723_004.0
        );
    }

    #[test]
    fn device_time_rolls_over_arithmetically() {
        let t = device_time_to_timestamp(&noon(), 23, 59, 59, 1500);
        let next_day = Local.with_ymd_and_hms(2024, 5, 26, 0, 0, 0).single().unwrap();
        assert_eq!(t, next_day.timestamp_millis() as f64 + 500.0);
    }
}
