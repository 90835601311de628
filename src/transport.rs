//! The seam between the connection manager and a BLE stack.
//!
//! [`crate::ble::BtleplugTransport`] is the production implementation; tests
//! drive the connection manager through an in-memory one.  Errors are plain
//! [`anyhow::Error`]: the connection manager maps them onto
//! [`crate::error::OrpheError`] according to which operation failed.

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

/// A device picked up by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    /// Advertised local name (`"CR-…"` for ORPHE CORE modules).
    pub name: String,
    /// Platform identifier: a UUID string on macOS, a MAC address on Linux.
    pub id: String,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
}

/// What a scan is looking for.  A device matches when its name starts with
/// `name_prefix` **or** it advertises any of `services`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFilter {
    pub name_prefix: Option<String>,
    pub services: Vec<Uuid>,
}

impl ScanFilter {
    pub fn matches(&self, name: Option<&str>, services: &[Uuid]) -> bool {
        let by_name = match (&self.name_prefix, name) {
            (Some(prefix), Some(name)) => name.starts_with(prefix.as_str()),
            _ => false,
        };
        by_name || services.iter().any(|s| self.services.contains(s))
    }
}

/// A characteristic on the connected device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    pub service: Uuid,
    pub characteristic: Uuid,
}

/// Minimal GATT central: one device at a time.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Scan until at least one device matches `filter` (or the
    /// implementation's timeout) and return the matches, best first.
    async fn scan(&self, filter: &ScanFilter) -> Result<Vec<DeviceHandle>>;

    /// Connect to `device` and discover its services.
    async fn connect(&self, device: &DeviceHandle) -> Result<()>;

    /// Find `characteristic` under `service` on the connected device.
    async fn resolve_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<CharacteristicHandle>;

    async fn read_value(&self, chr: &CharacteristicHandle) -> Result<Vec<u8>>;

    /// Write with response.
    async fn write_value(&self, chr: &CharacteristicHandle, data: &[u8]) -> Result<()>;

    /// Enable notifications; the stream yields each notification's payload
    /// and ends when the link drops.
    async fn subscribe(&self, chr: &CharacteristicHandle) -> Result<BoxStream<'static, Vec<u8>>>;

    async fn unsubscribe(&self, chr: &CharacteristicHandle) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn is_connected(&self) -> bool;

    /// Yields once each time the connected device drops the link without
    /// being asked to.
    async fn disconnect_events(&self) -> Result<BoxStream<'static, ()>>;
}
