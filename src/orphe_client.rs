use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use uuid::Uuid;

use crate::ble::{BleTimeouts, BtleplugTransport};
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::{OrpheError, Result};
use crate::hooks::Hooks;
use crate::parse::parse_device_info;
use crate::protocol::{
    encode_led, encode_reset_attitude, encode_reset_logs, AccRange, GyroRange,
    DEFAULT_CHANNELS, DEVICE_INFORMATION, DEVICE_NAME_PREFIX, INFORMATION_SERVICE, OTHER_SERVICE,
    SENSOR_VALUES, STEP_ANALYSIS,
};
use crate::session::{Session, SessionState, SharedSession};
use crate::transport::{ScanFilter, Transport};
use crate::types::{DeviceInfo, OrpheEvent, Warning};

// ── OrpheClientConfig ─────────────────────────────────────────────────────────

/// Configuration for [`OrpheClient`].
#[derive(Debug, Clone)]
pub struct OrpheClientConfig {
    /// Match devices whose advertised name starts with this string.
    /// Default: `"CR-"` (CR-2, CR-3 modules).
    pub name_prefix: String,
    /// Also match devices advertising any of these services, whatever their
    /// name.  Default: the ORPHE "other" and "information" services.
    pub service_filter: Vec<Uuid>,
    /// BLE scan duration in seconds before giving up. Default: `15`.
    pub scan_timeout_secs: u64,
    /// Default: `10`.
    pub connect_timeout_secs: u64,
    /// GATT service discovery limit. Default: `15`.
    pub discovery_timeout_secs: u64,
}

impl Default for OrpheClientConfig {
    fn default() -> Self {
        Self {
            name_prefix: DEVICE_NAME_PREFIX.into(),
            service_filter: vec![OTHER_SERVICE, INFORMATION_SERVICE],
            scan_timeout_secs: 15,
            connect_timeout_secs: 10,
            discovery_timeout_secs: 15,
        }
    }
}

impl OrpheClientConfig {
    pub fn scan_filter(&self) -> ScanFilter {
        ScanFilter {
            name_prefix: Some(self.name_prefix.clone()).filter(|p| !p.is_empty()),
            services: self.service_filter.clone(),
        }
    }

    pub fn ble_timeouts(&self) -> BleTimeouts {
        BleTimeouts {
            scan: Duration::from_secs(self.scan_timeout_secs),
            connect: Duration::from_secs(self.connect_timeout_secs),
            discovery: Duration::from_secs(self.discovery_timeout_secs),
        }
    }
}

// ── Options ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetupOptions {
    /// Forward every notification as `Data` instead of decoding it.
    pub raw_data_monitoring: bool,
}

/// What [`OrpheClient::begin`] streams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BeginMode {
    #[default]
    StepAnalysis,
    SensorValues,
    StepAnalysisAndSensorValues,
}

impl BeginMode {
    pub fn name(self) -> &'static str {
        match self {
            Self::StepAnalysis => "STEP_ANALYSIS",
            Self::SensorValues => "SENSOR_VALUES",
            Self::StepAnalysisAndSensorValues => "STEP_ANALYSIS_AND_SENSOR_VALUES",
        }
    }

    /// Channels subscribed, in order.
    pub fn channels(self) -> &'static [&'static str] {
        match self {
            Self::StepAnalysis => &[STEP_ANALYSIS],
            Self::SensorValues => &[SENSOR_VALUES],
            Self::StepAnalysisAndSensorValues => &[STEP_ANALYSIS, SENSOR_VALUES],
        }
    }

    /// Parse a mode name.  The second value is `true` for the deprecated
    /// names `RAW`, `ANALYSIS` and `ANALYSIS_AND_RAW`.
    pub fn from_name(name: &str) -> Option<(Self, bool)> {
        let parsed = match name {
            "STEP_ANALYSIS" => (Self::StepAnalysis, false),
            "SENSOR_VALUES" => (Self::SensorValues, false),
            "STEP_ANALYSIS_AND_SENSOR_VALUES" => (Self::StepAnalysisAndSensorValues, false),
            "ANALYSIS" => (Self::StepAnalysis, true),
            "RAW" => (Self::SensorValues, true),
            "ANALYSIS_AND_RAW" => (Self::StepAnalysisAndSensorValues, true),
            _ => return None,
        };
        Some(parsed)
    }
}

/// Sensor ranges to program in [`OrpheClient::begin`].  `None` keeps what
/// the device reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BeginOptions {
    pub acc_range: Option<AccRange>,
    pub gyro_range: Option<GyroRange>,
}

impl BeginOptions {
    pub fn acc_range(mut self, range: AccRange) -> Self {
        self.acc_range = Some(range);
        self
    }

    pub fn gyro_range(mut self, range: GyroRange) -> Self {
        self.gyro_range = Some(range);
        self
    }
}

// ── OrpheClient ───────────────────────────────────────────────────────────────

/// Host-facing client for one ORPHE CORE module.
///
/// ```no_run
/// use orphe_rs::prelude::*;
///
/// # async fn run() -> orphe_rs::error::Result<()> {
/// let hooks = Hooks::new().on_steps_number(|n| println!("steps: {n}"));
/// let client = OrpheClient::btleplug(OrpheClientConfig::default(), hooks);
/// client.setup(&DEFAULT_CHANNELS, SetupOptions::default());
/// client.begin(BeginMode::StepAnalysis, BeginOptions::default()).await?;
/// # Ok(())
/// # }
/// ```
///
/// Every async operation reports its failure to the `on_error` hook before
/// returning it.
pub struct OrpheClient<T> {
    config: OrpheClientConfig,
    connection: ConnectionManager<T>,
    session: SharedSession,
}

impl OrpheClient<BtleplugTransport> {
    /// A client on the host's first Bluetooth adapter.
    pub fn btleplug(config: OrpheClientConfig, hooks: Hooks) -> Self {
        let transport = Arc::new(BtleplugTransport::new(config.ble_timeouts()));
        Self::new(transport, config, hooks)
    }
}

impl<T: Transport> OrpheClient<T> {
    pub fn new(transport: Arc<T>, config: OrpheClientConfig, hooks: Hooks) -> Self {
        let session = Session::shared(hooks);
        let connection = ConnectionManager::new(transport, config.scan_filter(), session.clone());
        Self {
            config,
            connection,
            session,
        }
    }

    pub fn config(&self) -> &OrpheClientConfig {
        &self.config
    }

    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.connection
    }

    // ── Setup ─────────────────────────────────────────────────────────────────

    /// Register the built-in channels in `names` (see
    /// [`DEFAULT_CHANNELS`]) and choose decoded or raw delivery.
    pub fn setup<S: AsRef<str>>(&self, names: &[S], options: SetupOptions) {
        self.session.set_raw_data_monitoring(options.raw_data_monitoring);
        self.connection.register_defaults(names);
    }

    /// [`OrpheClient::setup`] with every built-in channel and decoded delivery.
    pub fn setup_default(&self) {
        self.setup(&DEFAULT_CHANNELS, SetupOptions::default());
    }

    /// Register (or re-point) a channel by hand.
    pub fn set_uuid(&self, name: impl Into<String>, service: Uuid, characteristic: Uuid) {
        self.connection.register(name, service, characteristic);
    }

    // ── Streaming ─────────────────────────────────────────────────────────────

    /// Read device information, program the requested ranges, and start
    /// notifications for `mode`.
    pub async fn begin(&self, mode: BeginMode, options: BeginOptions) -> Result<()> {
        let mut info = self.get_device_information().await?;
        if let Some(acc) = options.acc_range {
            info.acc_range_code = acc.code();
        }
        if let Some(gyro) = options.gyro_range {
            info.gyro_range_code = gyro.code();
        }
        self.set_device_information(&info).await?;

        for channel in mode.channels() {
            self.connection.subscribe(channel).await?;
        }
        info!("begin: streaming {}", mode.name());
        Ok(())
    }

    /// [`OrpheClient::begin`] by mode name, accepting the deprecated names.
    pub async fn begin_named(&self, name: &str, options: BeginOptions) -> Result<()> {
        let Some((mode, deprecated)) = BeginMode::from_name(name) else {
            let err = OrpheError::UnknownChannel {
                name: name.to_owned(),
            };
            return Err(self.session.report(err));
        };
        if deprecated {
            warn!("`{name}` is deprecated, use `{}`", mode.name());
            self.session.warn(Warning::Deprecated {
                alias: name.to_owned(),
                canonical: mode.name().to_owned(),
            });
        }
        self.begin(mode, options).await
    }

    /// Same as [`OrpheClient::reset`].
    pub async fn stop(&self) -> Result<()> {
        self.reset().await
    }

    // ── Device control ────────────────────────────────────────────────────────

    /// `pattern` is 0–4.
    pub async fn set_led(&self, on: bool, pattern: u8) -> Result<()> {
        self.connection
            .write(DEVICE_INFORMATION, &encode_led(on as u8, pattern))
            .await
    }

    /// 0 turns the LED off.  Reads device information first if it has not
    /// been read yet.
    pub async fn set_led_brightness(&self, value: u8) -> Result<()> {
        let cached = self.session.state().device_info;
        let mut info = match cached {
            Some(info) => info,
            None => self.get_device_information().await?,
        };
        info.led_brightness = value;
        self.connection
            .write(DEVICE_INFORMATION, &info.write_image())
            .await?;
        self.session.apply_device_info(info);
        Ok(())
    }

    /// Restart the module's quaternion integration.
    pub async fn reset_motion_sensor_attitude(&self) -> Result<()> {
        self.connection
            .write(DEVICE_INFORMATION, &encode_reset_attitude())
            .await
    }

    /// Clear the gait-analysis logs stored on the module.
    pub async fn reset_analysis_logs(&self) -> Result<()> {
        self.connection
            .write(DEVICE_INFORMATION, &encode_reset_logs())
            .await
    }

    /// Read and cache the module's configuration.
    pub async fn get_device_information(&self) -> Result<DeviceInfo> {
        let bytes = self.connection.read(DEVICE_INFORMATION).await?;
        let info = parse_device_info(&bytes).map_err(|e| self.session.report(e))?;
        self.session.apply_device_info(info);
        self.session.emit(OrpheEvent::DeviceInfo(info));
        Ok(info)
    }

    /// Write `info`'s configuration fields (side, LED, auto-run, logging
    /// interval, ranges).  Later sensor frames are converted with its ranges.
    pub async fn set_device_information(&self, info: &DeviceInfo) -> Result<()> {
        self.connection
            .write(DEVICE_INFORMATION, &info.config_command())
            .await?;
        self.session.apply_device_info(*info);
        Ok(())
    }

    // ── Channel I/O ───────────────────────────────────────────────────────────

    pub async fn read(&self, name: &str) -> Result<Vec<u8>> {
        self.connection.read(name).await
    }

    pub async fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        self.connection.write(name, data).await
    }

    pub async fn start_notify(&self, name: &str) -> Result<()> {
        self.connection.subscribe(name).await
    }

    pub async fn stop_notify(&self, name: &str) -> Result<()> {
        self.connection.unsubscribe(name).await
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    pub async fn disconnect(&self) -> Result<()> {
        self.connection.disconnect().await
    }

    /// Forget the device and its characteristics.  Decoded state is kept.
    pub fn clear(&self) {
        self.connection.clear();
    }

    /// Disconnect, clear, and start decoding from scratch.  `Reset` is
    /// emitted even when the disconnect fails (e.g. nothing was connected);
    /// that failure is still returned.
    pub async fn reset(&self) -> Result<()> {
        let result = self.connection.disconnect_and_clear().await;
        self.session.clear();
        self.session.emit(OrpheEvent::Reset);
        result
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }

    /// Snapshot of the decoded state.
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn set_raw_data_monitoring(&self, enabled: bool) {
        self.session.set_raw_data_monitoring(enabled);
    }
}
