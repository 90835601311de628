//! # orphe-rs
//!
//! Async Rust client for [ORPHE CORE](https://orphe.io/) motion-sensing shoe
//! modules over Bluetooth Low Energy.
//!
//! ## Data streams
//!
//! | Channel | Carries | Rate |
//! |---|---|---|
//! | `STEP_ANALYSIS` | per-step gait, stride and pronation analytics; attitude | one frame per step (+ attitude) |
//! | `SENSOR_VALUES` | quaternion, gyroscope, accelerometer | 4-sample bursts, up to 200 Hz |
//! | `DEVICE_INFORMATION` | battery, LED, logging interval, sensor ranges | read / write only |
//!
//! Sensor values arrive normalised to −1…1; once device information has been
//! read they are also reported in g and °/s according to the configured
//! ranges.
//!
//! ## Quick start
//!
//! ```no_run
//! use orphe_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!     let client = OrpheClient::btleplug(OrpheClientConfig::default(), Hooks::new().forward_to(tx));
//!     client.setup_default();
//!     client.begin(BeginMode::SensorValues, BeginOptions::default()).await?;
//!
//!     while let Some(event) = rx.recv().await {
//!         match event {
//!             OrpheEvent::ConvertedAcc(a) => println!("acc {:?} g", a.value),
//!             OrpheEvent::Disconnect => break,
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | One-line glob import of the most commonly needed types |
//! | [`orphe_client`] | Host API: setup, begin/stop, LED, resets, device information |
//! | [`hooks`] | Per-client callback table |
//! | [`connection`] | Link state machine, channel I/O, cancellation |
//! | [`channel`] | Logical channel names ↔ GATT UUIDs |
//! | [`transport`] | The BLE abstraction the connection manager drives |
//! | [`ble`] | `btleplug` implementation of [`transport::Transport`] |
//! | [`session`] | Decoded state, notification rate, raw monitoring |
//! | [`decoder`] | Frame → state + ordered events (gating, range conversion) |
//! | [`parse`] | Byte-level decoders for every frame layout |
//! | [`types`] | Event and sample types |
//! | [`protocol`] | GATT UUIDs, frame constants, ranges, command encoders |
//! | [`error`] | [`error::OrpheError`] |

pub mod ble;
pub mod channel;
pub mod connection;
pub mod decoder;
pub mod error;
pub mod hooks;
pub mod orphe_client;
pub mod parse;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;

// ── Prelude ───────────────────────────────────────────────────────────────────

/// Convenience re-exports for downstream crates.
pub mod prelude {
    // ── Client ────────────────────────────────────────────────────────────────
    pub use crate::connection::ConnectionState;
    pub use crate::hooks::Hooks;
    pub use crate::orphe_client::{
        BeginMode, BeginOptions, OrpheClient, OrpheClientConfig, SetupOptions,
    };
    pub use crate::session::SessionState;

    // ── Events and data types ─────────────────────────────────────────────────
    pub use crate::error::OrpheError;
    pub use crate::types::{
        DeviceInfo, Direction, Euler, Gait, GaitKind, OrpheEvent, Pronation, Quaternion, Sample,
        Stride, Warning, Xyz,
    };

    // ── Protocol constants ────────────────────────────────────────────────────
    pub use crate::protocol::{
        AccRange, GyroRange, DEFAULT_CHANNELS, DEVICE_INFORMATION, SENSOR_VALUES, STEP_ANALYSIS,
    };
}
