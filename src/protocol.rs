//! GATT UUIDs, channel names, sensor range tables, and command encoders for
//! ORPHE CORE modules.
//!
//! The module exposes two primary services:
//!
//! | Service | Characteristic | Channel name |
//! |---|---|---|
//! | [`INFORMATION_SERVICE`] | [`DEVICE_INFORMATION_CHARACTERISTIC`] | `DEVICE_INFORMATION` |
//! | [`OTHER_SERVICE`] | [`SENSOR_VALUES_CHARACTERISTIC`] | `SENSOR_VALUES` |
//! | [`OTHER_SERVICE`] | [`STEP_ANALYSIS_CHARACTERISTIC`] | `STEP_ANALYSIS` |

use serde::Serialize;
use uuid::Uuid;

// ── Services ─────────────────────────────────────────────────────────────────

/// Service hosting the device-information (configuration) characteristic.
pub const INFORMATION_SERVICE: Uuid = Uuid::from_u128(0x01a9d6b5_ff6e_444a_b266_0be75e85c064);

/// Service hosting the sensor-stream and step-analysis characteristics.
///
/// Also advertised, so it doubles as a scan filter for CORE modules.
pub const OTHER_SERVICE: Uuid = Uuid::from_u128(0xdb1b7aca_cda5_4453_a49b_33a53d3f0833);

// ── Characteristics ───────────────────────────────────────────────────────────

/// Read/write configuration block (battery, side, LED, sensor ranges …).
pub const DEVICE_INFORMATION_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x24354f22_1c46_430e_a4ab_a1eeabbcdfc0);

/// Raw motion stream: header 40 (single sample) or 50 (4-sample burst).
pub const SENSOR_VALUES_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0xf3f9c7ce_46ee_4205_89ac_abe64e626c0f);

/// On-device gait analysis stream (20-byte tagged frames).
pub const STEP_ANALYSIS_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x4eb776dc_cf99_4af7_b2d3_ad0f791a79dd);

/// Realtime analysis characteristic exposed by older firmware.  Not decoded;
/// a host may still bind it with `set_uuid` and receive raw `Data` events.
pub const REALTIME_ANALYSIS_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0xadb7eb5a_ac8a_4f95_907b_45db4a71b45a);

// ── Channel names ─────────────────────────────────────────────────────────────

pub const DEVICE_INFORMATION: &str = "DEVICE_INFORMATION";
pub const SENSOR_VALUES: &str = "SENSOR_VALUES";
pub const STEP_ANALYSIS: &str = "STEP_ANALYSIS";

/// Names bound by [`crate::orphe_client::OrpheClient::setup`] when the host
/// does not pass its own list.
pub const DEFAULT_CHANNELS: [&str; 3] = [DEVICE_INFORMATION, SENSOR_VALUES, STEP_ANALYSIS];

/// Channel names accepted for compatibility with older library revisions,
/// mapped to their canonical replacement.
pub const DEPRECATED_CHANNEL_ALIASES: [(&str, &str); 2] =
    [("RAW", SENSOR_VALUES), ("ANALYSIS", STEP_ANALYSIS)];

/// Name prefix advertised by CORE modules (`CR-2`, `CR-3`, …).
pub const DEVICE_NAME_PREFIX: &str = "CR-";

// ── Frame layout ──────────────────────────────────────────────────────────────

/// Header byte of the 4-sample burst frame on `SENSOR_VALUES`.
pub const SENSOR_HEADER_BURST: u8 = 50;
/// Header byte of the single-sample compact frame on `SENSOR_VALUES`.
pub const SENSOR_HEADER_SINGLE: u8 = 40;
/// Exact length of a burst frame.
pub const BURST_FRAME_LEN: usize = 92;
/// Number of sub-samples packed into one burst frame.
pub const BURST_SUB_SAMPLES: usize = 4;
/// Byte distance between consecutive burst sub-samples.
pub const BURST_STRIDE: usize = 21;
/// Minimum length of a single-sample frame (last field is acc z at 16).
pub const SINGLE_FRAME_MIN_LEN: usize = 17;
/// Length of a step-analysis frame.
pub const STEP_ANALYSIS_FRAME_LEN: usize = 20;
/// Minimum length of a device-information read.
pub const DEVICE_INFO_MIN_LEN: usize = 10;
/// Length of the cached device-information write image.
pub const DEVICE_INFO_IMAGE_LEN: usize = 20;

/// Inter-arrival times at or below this many milliseconds are treated as a
/// measurement glitch by the frequency estimator.
pub const MIN_FREQUENCY_INTERVAL_MS: f64 = 15.0;

// ── Sensor ranges ─────────────────────────────────────────────────────────────

/// Accelerometer full-scale range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AccRange {
    G2,
    G4,
    G8,
    G16,
}

impl AccRange {
    /// Decode a 2-bit range code; codes above 3 are unknown.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::G2),
            1 => Some(Self::G4),
            2 => Some(Self::G8),
            3 => Some(Self::G16),
            _ => None,
        }
    }

    /// Look up a range by its full-scale value in g (2, 4, 8 or 16).
    pub fn from_g(g: u16) -> Option<Self> {
        match g {
            2 => Some(Self::G2),
            4 => Some(Self::G4),
            8 => Some(Self::G8),
            16 => Some(Self::G16),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::G2 => 0,
            Self::G4 => 1,
            Self::G8 => 2,
            Self::G16 => 3,
        }
    }

    /// Full-scale value in g; raw readings in [-1, 1] are multiplied by this.
    pub fn scale(self) -> f32 {
        match self {
            Self::G2 => 2.0,
            Self::G4 => 4.0,
            Self::G8 => 8.0,
            Self::G16 => 16.0,
        }
    }
}

/// Gyroscope full-scale range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GyroRange {
    Dps250,
    Dps500,
    Dps1000,
    Dps2000,
}

impl GyroRange {
    /// Decode a 2-bit range code; codes above 3 are unknown.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Dps250),
            1 => Some(Self::Dps500),
            2 => Some(Self::Dps1000),
            3 => Some(Self::Dps2000),
            _ => None,
        }
    }

    /// Look up a range by its full-scale value in °/s.
    pub fn from_dps(dps: u16) -> Option<Self> {
        match dps {
            250 => Some(Self::Dps250),
            500 => Some(Self::Dps500),
            1000 => Some(Self::Dps1000),
            2000 => Some(Self::Dps2000),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Dps250 => 0,
            Self::Dps500 => 1,
            Self::Dps1000 => 2,
            Self::Dps2000 => 3,
        }
    }

    /// Full-scale value in °/s.
    pub fn scale(self) -> f32 {
        match self {
            Self::Dps250 => 250.0,
            Self::Dps500 => 500.0,
            Self::Dps1000 => 1000.0,
            Self::Dps2000 => 2000.0,
        }
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────
//
// Every command is written to the DEVICE_INFORMATION characteristic; the
// first byte selects the operation.

const CMD_CONFIG: u8 = 0x01;
const CMD_LED: u8 = 0x02;
const CMD_RESET_ATTITUDE: u8 = 0x03;
const CMD_RESET_LOGS: u8 = 0x04;

/// Switch the LED on (`1`) or off (`0`) with one of the firmware patterns (0–4).
///
/// ```
/// # use orphe_rs::protocol::encode_led;
/// assert_eq!(encode_led(1, 3), [0x02, 1, 3]);
/// ```
pub fn encode_led(on_off: u8, pattern: u8) -> [u8; 3] {
    [CMD_LED, on_off, pattern]
}

/// Reset the on-device quaternion integration.
pub fn encode_reset_attitude() -> [u8; 1] {
    [CMD_RESET_ATTITUDE]
}

/// Erase the analysis logs stored on the module.
pub fn encode_reset_logs() -> [u8; 1] {
    [CMD_RESET_LOGS]
}

/// Full configuration write.
///
/// Layout: `[0x01, lr, led_brightness, 0, auto_run, time01, time02, acc_code, gyro_code]`.
/// Byte 3 (motor strength) is always written as zero.
pub fn encode_config(
    lr: u8,
    led_brightness: u8,
    auto_run: u8,
    time01: u8,
    time02: u8,
    acc_code: u8,
    gyro_code: u8,
) -> [u8; 9] {
    [
        CMD_CONFIG,
        lr,
        led_brightness,
        0,
        auto_run,
        time01,
        time02,
        acc_code,
        gyro_code,
    ]
}
