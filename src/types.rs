use serde::{Serialize, Serializer};

use crate::error::OrpheError;
use crate::protocol::{encode_config, AccRange, GyroRange, DEVICE_INFO_IMAGE_LEN};

// ── Vector payloads ───────────────────────────────────────────────────────────

/// Device attitude as a unit quaternion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quaternion {
    /// Convert to Tait–Bryan angles in radians.
    ///
    /// Pitch is taken from `asin`, so it saturates at ±π/2 and roll/yaw become
    /// ill-conditioned near that point.  Use the quaternion itself for any
    /// attitude math; the Euler form is informational.
    ///
    /// ```
    /// # use orphe_rs::types::Quaternion;
    /// let e = Quaternion { w: 1.0, x: 0.0, y: 0.0, z: 0.0 }.to_euler();
    /// assert_eq!((e.pitch, e.roll, e.yaw), (0.0, 0.0, 0.0));
    /// ```
    pub fn to_euler(&self) -> Euler {
        let Quaternion { w, x, y, z } = *self;

        let sinr_cosp = 2.0 * (w * x + y * z);
        let cosr_cosp = 1.0 - 2.0 * (x * x + y * y);
        let roll = sinr_cosp.atan2(cosr_cosp);

        let sinp = (2.0 * (w * y - z * x)).clamp(-1.0, 1.0);
        let pitch = sinp.asin();

        let siny_cosp = 2.0 * (w * z + x * y);
        let cosy_cosp = 1.0 - 2.0 * (y * y + z * z);
        let yaw = siny_cosp.atan2(cosy_cosp);

        Euler { pitch, roll, yaw }
    }
}

/// Attitude as Euler angles in radians, derived from a [`Quaternion`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Euler {
    pub pitch: f32,
    pub roll: f32,
    pub yaw: f32,
}

/// A 3-axis value.  Units depend on the event carrying it:
///
/// | Event | Unit |
/// |---|---|
/// | `Gyro`, `Acc` | normalised, −1…1 |
/// | `ConvertedGyro` | °/s |
/// | `ConvertedAcc` | g |
/// | `Delta` | device-computed displacement since the previous sample |
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Xyz {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Xyz {
    pub fn scaled(&self, factor: f32) -> Xyz {
        Xyz {
            x: self.x * factor,
            y: self.y * factor,
            z: self.z * factor,
        }
    }
}

/// Where a sample sat inside a 4-sample burst notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BurstPosition {
    /// Running 16-bit serial number of the burst frame.
    pub serial_number: u16,
    /// Sub-sample index, 3 (oldest) down to 0 (newest).
    pub index: u8,
}

/// A decoded value with its capture time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample<T> {
    pub value: T,
    /// Capture time in milliseconds since the Unix epoch.
    ///
    /// Burst sub-samples use the device clock; everything else uses the local
    /// receipt time.
    pub timestamp: f64,
    /// Present only for sub-samples of a burst frame.
    pub burst: Option<BurstPosition>,
}

// ── Step analysis ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum GaitKind {
    #[default]
    None,
    Walk,
    Run,
    Stand,
}

impl GaitKind {
    /// Decode the low two bits of the gait overview's packed byte.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            1 => Self::Walk,
            2 => Self::Run,
            3 => Self::Stand,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Direction {
    #[default]
    None,
    Forward,
    Backward,
    Inside,
    Outside,
}

impl Direction {
    /// Decode a 3-bit direction code; 5–7 are not assigned by the firmware.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::Forward),
            2 => Some(Self::Backward),
            3 => Some(Self::Inside),
            4 => Some(Self::Outside),
            _ => None,
        }
    }
}

/// Gait overview (step-analysis subtype 0).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Gait {
    pub kind: GaitKind,
    pub direction: Direction,
    /// Total calories burned, kcal.
    pub calorie: f32,
    /// Total distance, m.
    pub distance: f32,
    pub step_count: u16,
    /// Standing (stance) phase duration of the last step, s.
    pub standing_phase_duration: f32,
    /// Swing phase duration of the last step, s.
    pub swing_phase_duration: f32,
}

/// Stride (step-analysis subtype 1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Stride {
    /// Landing foot angle, degrees.
    pub foot_angle: f32,
    /// Stride vector, m.
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub step_count: u16,
}

/// Pronation (step-analysis subtype 2).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Pronation {
    /// Landing impact, kgf per body weight.
    pub landing_impact: f32,
    /// Pronation angles, degrees.
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub step_count: u16,
}

// ── Device information ────────────────────────────────────────────────────────

/// Configuration snapshot read from the `DEVICE_INFORMATION` characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Battery level as reported by the module.
    pub battery: u8,
    /// Which foot the module is mounted on.
    pub lr: u8,
    pub recording_mode: u8,
    pub auto_run: u8,
    pub led_brightness: u8,
    pub motor_strength: u8,
    /// Logging interval, high byte.
    pub time01: u8,
    /// Logging interval, low byte.
    pub time02: u8,
    pub acc_range_code: u8,
    pub gyro_range_code: u8,
}

impl DeviceInfo {
    pub fn acc_range(&self) -> Option<AccRange> {
        AccRange::from_code(self.acc_range_code)
    }

    pub fn gyro_range(&self) -> Option<GyroRange> {
        GyroRange::from_code(self.gyro_range_code)
    }

    /// Logging interval as a single big-endian value.
    pub fn logging_interval(&self) -> u16 {
        u16::from_be_bytes([self.time01, self.time02])
    }

    /// The 9-byte configuration command that writes these settings back.
    pub fn config_command(&self) -> [u8; 9] {
        encode_config(
            self.lr,
            self.led_brightness,
            self.auto_run,
            self.time01,
            self.time02,
            self.acc_range_code,
            self.gyro_range_code,
        )
    }

    /// The 20-byte write image that mirrors this configuration.
    ///
    /// ```text
    /// [0x01, lr, led_brightness, motor_strength, auto_run, time01, time02,
    ///  acc_code, gyro_code, 0 × 11]
    /// ```
    ///
    /// Brightness updates patch byte 2 of this image and write it whole.
    pub fn write_image(&self) -> [u8; DEVICE_INFO_IMAGE_LEN] {
        let mut image = [0u8; DEVICE_INFO_IMAGE_LEN];
        image[0] = 0x01;
        image[1] = self.lr;
        image[2] = self.led_brightness;
        image[3] = self.motor_strength;
        image[4] = self.auto_run;
        image[5] = self.time01;
        image[6] = self.time02;
        image[7] = self.acc_range_code;
        image[8] = self.gyro_range_code;
        image
    }
}

// ── Events ────────────────────────────────────────────────────────────────────

/// Non-fatal conditions surfaced to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Warning {
    /// A deprecated name was used; it behaves exactly like `canonical`.
    Deprecated {
        alias: String,
        canonical: String,
    },
    /// A telemetry frame had the wrong length and was dropped.
    MalformedFrame {
        channel: String,
        expected_len: usize,
        actual_len: usize,
    },
    /// Sensor frames arrived before the sensor ranges were known; only raw
    /// values are emitted until device information is read.
    RangeUnknown,
}

/// Everything a session can report, in the order it happens.
///
/// Each variant has a matching hook on [`crate::hooks::Hooks`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum OrpheEvent {
    // ── Motion ──
    Quat(Sample<Quaternion>),
    Gyro(Sample<Xyz>),
    Acc(Sample<Xyz>),
    ConvertedGyro(Sample<Xyz>),
    ConvertedAcc(Sample<Xyz>),
    Delta(Sample<Xyz>),
    Euler(Sample<Euler>),

    // ── Gait analysis ──
    Gait(Gait),
    Type(GaitKind),
    Direction(Direction),
    Calorie(f32),
    Distance(f32),
    StandingPhaseDuration(f32),
    SwingPhaseDuration(f32),
    Stride(Stride),
    FootAngle(f32),
    Pronation(Pronation),
    LandingImpact(f32),
    StepsNumber(u16),

    /// Measured notification rate, Hz.
    BleFrequency(f64),
    /// Undecoded notification (raw monitoring or a custom channel).
    Data { channel: String, bytes: Vec<u8> },
    /// Fresh device information was read.
    DeviceInfo(DeviceInfo),

    // ── Lifecycle ──
    /// A device was selected by the scan; carries its advertised name.
    Scan(String),
    Connect(String),
    Write(String),
    StartNotify(String),
    StopNotify(String),
    Disconnect,
    Clear,
    Reset,
    #[serde(serialize_with = "serialize_display")]
    Error(OrpheError),
    Warning(Warning),
}

fn serialize_display<S: Serializer>(err: &OrpheError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(err)
}
