//! [`Transport`] over the host's Bluetooth adapter via `btleplug`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter as BtScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::BoxStream;
use futures::{future, StreamExt};
use log::{debug, info, warn};
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::transport::{CharacteristicHandle, DeviceHandle, ScanFilter, Transport};

/// Time limits for the slow BLE operations.
#[derive(Debug, Clone, Copy)]
pub struct BleTimeouts {
    pub scan: Duration,
    /// BlueZ's `Device1.Connect` can block forever when the module is out of
    /// range; this bounds it.
    pub connect: Duration,
    pub discovery: Duration,
}

impl Default for BleTimeouts {
    fn default() -> Self {
        Self {
            scan: Duration::from_secs(15),
            connect: Duration::from_secs(10),
            discovery: Duration::from_secs(15),
        }
    }
}

#[derive(Clone)]
struct Link {
    adapter: Adapter,
    peripheral: Peripheral,
}

/// Talks to one ORPHE CORE through the first Bluetooth adapter on the host.
pub struct BtleplugTransport {
    timeouts: BleTimeouts,
    adapter: OnceCell<Adapter>,
    /// Peripherals seen by the last scan, by id.
    discovered: Mutex<HashMap<String, Peripheral>>,
    link: Mutex<Option<Link>>,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BtleplugTransport {
    pub fn new(timeouts: BleTimeouts) -> Self {
        Self {
            timeouts,
            adapter: OnceCell::new(),
            discovered: Mutex::new(HashMap::new()),
            link: Mutex::new(None),
        }
    }

    async fn adapter(&self) -> Result<&Adapter> {
        self.adapter
            .get_or_try_init(|| async {
                let manager = Manager::new().await?;
                let adapter = manager
                    .adapters()
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
                wait_powered_on(&adapter).await;
                Ok(adapter)
            })
            .await
    }

    fn link(&self) -> Result<Link> {
        guard(&self.link)
            .clone()
            .ok_or_else(|| anyhow!("no device connected"))
    }

    fn characteristic(peripheral: &Peripheral, chr: &CharacteristicHandle) -> Result<Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == chr.service && c.uuid == chr.characteristic)
            .ok_or_else(|| {
                anyhow!(
                    "characteristic {} not found in service {}",
                    chr.characteristic,
                    chr.service
                )
            })
    }

    async fn matching_devices(&self, adapter: &Adapter, filter: &ScanFilter) -> Vec<DeviceHandle> {
        let mut found = Vec::new();
        let peripherals = adapter.peripherals().await.unwrap_or_default();
        for p in peripherals {
            let Ok(Some(props)) = p.properties().await else {
                continue;
            };
            if !filter.matches(props.local_name.as_deref(), &props.services) {
                continue;
            }
            let id = p.id().to_string();
            let name = props.local_name.unwrap_or_else(|| "Unknown".into());
            debug!("scan: candidate {name}  id={id}  rssi={:?}", props.rssi);
            guard(&self.discovered).insert(id.clone(), p);
            found.push(DeviceHandle {
                name,
                id,
                services: props.services,
            });
        }
        found
    }
}

impl Default for BtleplugTransport {
    fn default() -> Self {
        Self::new(BleTimeouts::default())
    }
}

/// CoreBluetooth starts in an "unknown" state after launch and silently
/// ignores scans until it reports PoweredOn.
#[cfg(target_os = "macos")]
async fn wait_powered_on(adapter: &Adapter) {
    use btleplug::api::CentralState;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        match adapter.adapter_state().await {
            Ok(CentralState::PoweredOn) => {
                info!("macOS: adapter is PoweredOn");
                break;
            }
            Ok(state) if tokio::time::Instant::now() >= deadline => {
                warn!("macOS: adapter still in state {state:?} after 3 s, proceeding anyway");
                break;
            }
            Ok(state) => debug!("macOS: adapter state = {state:?}, waiting…"),
            Err(e) => {
                warn!("macOS: adapter_state() error: {e}");
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
}

#[cfg(not(target_os = "macos"))]
async fn wait_powered_on(_adapter: &Adapter) {}

#[async_trait]
impl Transport for BtleplugTransport {
    async fn scan(&self, filter: &ScanFilter) -> Result<Vec<DeviceHandle>> {
        let adapter = self.adapter().await?;
        guard(&self.discovered).clear();

        info!("Scanning for ORPHE CORE (timeout: {} s) …", self.timeouts.scan.as_secs());
        // Name-prefix matches must not be excluded by a service filter, so
        // filtering happens here rather than in the adapter.
        adapter.start_scan(BtScanFilter::default()).await?;
        let found = tokio::time::timeout(self.timeouts.scan, async {
            loop {
                let found = self.matching_devices(adapter, filter).await;
                if !found.is_empty() {
                    return found;
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        })
        .await
        .unwrap_or_default();
        adapter.stop_scan().await.ok();

        if found.is_empty() {
            warn!("scan: nothing matched within {} s", self.timeouts.scan.as_secs());
        } else {
            info!("scan: {} device(s) found", found.len());
        }
        Ok(found)
    }

    async fn connect(&self, device: &DeviceHandle) -> Result<()> {
        let adapter = self.adapter().await?.clone();
        let peripheral = guard(&self.discovered)
            .get(&device.id)
            .cloned()
            .ok_or_else(|| anyhow!("device {} was not seen by the last scan", device.id))?;

        let secs = self.timeouts.connect.as_secs();
        tokio::time::timeout(self.timeouts.connect, peripheral.connect())
            .await
            .map_err(|_| anyhow!("BLE connect() timed out after {secs} s"))??;

        // BlueZ reports the link before its GATT cache is populated; an
        // immediate discover_services() can come back empty.
        #[cfg(target_os = "linux")]
        tokio::time::sleep(Duration::from_millis(600)).await;

        let secs = self.timeouts.discovery.as_secs();
        tokio::time::timeout(self.timeouts.discovery, peripheral.discover_services())
            .await
            .map_err(|_| anyhow!("discover_services() timed out after {secs} s"))??;
        info!("Connected and services discovered: {}", device.name);

        *guard(&self.link) = Some(Link {
            adapter,
            peripheral,
        });
        Ok(())
    }

    async fn resolve_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<CharacteristicHandle> {
        let link = self.link()?;
        let handle = CharacteristicHandle {
            service,
            characteristic,
        };
        Self::characteristic(&link.peripheral, &handle)?;
        Ok(handle)
    }

    async fn read_value(&self, chr: &CharacteristicHandle) -> Result<Vec<u8>> {
        let link = self.link()?;
        let c = Self::characteristic(&link.peripheral, chr)?;
        link.peripheral
            .read(&c)
            .await
            .with_context(|| format!("read {}", chr.characteristic))
    }

    async fn write_value(&self, chr: &CharacteristicHandle, data: &[u8]) -> Result<()> {
        let link = self.link()?;
        let c = Self::characteristic(&link.peripheral, chr)?;
        link.peripheral
            .write(&c, data, WriteType::WithResponse)
            .await
            .with_context(|| format!("write {}", chr.characteristic))
    }

    async fn subscribe(&self, chr: &CharacteristicHandle) -> Result<BoxStream<'static, Vec<u8>>> {
        let link = self.link()?;
        let c = Self::characteristic(&link.peripheral, chr)?;
        link.peripheral.subscribe(&c).await?;

        // btleplug multiplexes every subscribed characteristic onto one
        // stream; keep only this one.
        let uuid = chr.characteristic;
        let stream = link
            .peripheral
            .notifications()
            .await?
            .filter(move |n| future::ready(n.uuid == uuid))
            .map(|n| n.value)
            .boxed();
        Ok(stream)
    }

    async fn unsubscribe(&self, chr: &CharacteristicHandle) -> Result<()> {
        let link = self.link()?;
        let c = Self::characteristic(&link.peripheral, chr)?;
        link.peripheral.unsubscribe(&c).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let link = guard(&self.link).take();
        match link {
            Some(link) => {
                link.peripheral.disconnect().await?;
                Ok(())
            }
            None => Err(anyhow!("no device connected")),
        }
    }

    async fn is_connected(&self) -> bool {
        match self.link() {
            Ok(link) => link.peripheral.is_connected().await.unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn disconnect_events(&self) -> Result<BoxStream<'static, ()>> {
        let link = self.link()?;
        let id: PeripheralId = link.peripheral.id();
        let events = link.adapter.events().await?;
        Ok(events
            .filter_map(move |event| {
                future::ready(match event {
                    CentralEvent::DeviceDisconnected(gone) if gone == id => Some(()),
                    _ => None,
                })
            })
            .boxed())
    }
}
