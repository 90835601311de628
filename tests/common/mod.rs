//! In-memory [`Transport`] for driving the client without a radio.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::BoxStream;
use futures::StreamExt;
use uuid::Uuid;

use orphe_rs::hooks::Hooks;
use orphe_rs::orphe_client::{OrpheClient, OrpheClientConfig};
use orphe_rs::protocol::{
    DEVICE_INFORMATION_CHARACTERISTIC, INFORMATION_SERVICE, SENSOR_VALUES_CHARACTERISTIC,
    STEP_ANALYSIS_CHARACTERISTIC,
};
use orphe_rs::transport::{CharacteristicHandle, DeviceHandle, ScanFilter, Transport};
use orphe_rs::types::OrpheEvent;

#[derive(Default)]
pub struct Calls {
    pub scan: AtomicUsize,
    pub connect: AtomicUsize,
    pub resolve: AtomicUsize,
    pub read: AtomicUsize,
    pub write: AtomicUsize,
    pub subscribe: AtomicUsize,
    pub unsubscribe: AtomicUsize,
    pub disconnect: AtomicUsize,
}

impl Calls {
    pub fn total(&self) -> usize {
        [
            &self.scan,
            &self.connect,
            &self.resolve,
            &self.read,
            &self.write,
            &self.subscribe,
            &self.unsubscribe,
            &self.disconnect,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }
}

pub struct FakeTransport {
    pub calls: Calls,
    pub devices: Mutex<Vec<DeviceHandle>>,
    pub scan_delay: Mutex<Option<Duration>>,
    pub connect_delay: Mutex<Option<Duration>>,
    /// Runs once, inside `connect`, just before the link comes up.
    pub during_connect: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    pub fail_writes: AtomicBool,
    pub reads: Mutex<HashMap<Uuid, Vec<u8>>>,
    pub writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
    connected: AtomicBool,
    notifiers: Mutex<HashMap<Uuid, mpsc::UnboundedSender<Vec<u8>>>>,
    disconnect_notifier: Mutex<Option<mpsc::UnboundedSender<()>>>,
}

/// Device-information bytes: battery 80, right foot, LED 128, ranges 16 g /
/// 2000 dps.
pub const DEVICE_INFO_BYTES: [u8; 10] = [80, 1, 0, 1, 128, 3, 0x00, 0x3c, 3, 3];

impl Default for FakeTransport {
    fn default() -> Self {
        let mut reads = HashMap::new();
        reads.insert(DEVICE_INFORMATION_CHARACTERISTIC, DEVICE_INFO_BYTES.to_vec());
        Self {
            calls: Calls::default(),
            devices: Mutex::new(vec![orphe_device()]),
            scan_delay: Mutex::new(None),
            connect_delay: Mutex::new(None),
            during_connect: Mutex::new(None),
            fail_writes: AtomicBool::new(false),
            reads: Mutex::new(reads),
            writes: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            notifiers: Mutex::new(HashMap::new()),
            disconnect_notifier: Mutex::new(None),
        }
    }
}

pub fn orphe_device() -> DeviceHandle {
    DeviceHandle {
        name: "CR-3 TEST".into(),
        id: "AA:BB:CC:DD:EE:FF".into(),
        services: vec![INFORMATION_SERVICE],
    }
}

impl FakeTransport {
    /// Push one notification onto `characteristic`'s stream.
    pub fn notify(&self, characteristic: Uuid, data: &[u8]) {
        if let Some(tx) = self.notifiers.lock().unwrap().get(&characteristic) {
            let _ = tx.unbounded_send(data.to_vec());
        }
    }

    pub fn notify_step_analysis(&self, data: &[u8]) {
        self.notify(STEP_ANALYSIS_CHARACTERISTIC, data);
    }

    pub fn notify_sensor_values(&self, data: &[u8]) {
        self.notify(SENSOR_VALUES_CHARACTERISTIC, data);
    }

    /// Simulate the module dropping the link.
    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(tx) = self.disconnect_notifier.lock().unwrap().take() {
            let _ = tx.unbounded_send(());
        }
    }

    pub fn writes_to(&self, characteristic: Uuid) -> Vec<Vec<u8>> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == characteristic)
            .map(|(_, d)| d.clone())
            .collect()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn scan(&self, filter: &ScanFilter) -> Result<Vec<DeviceHandle>> {
        self.calls.scan.fetch_add(1, Ordering::SeqCst);
        let delay = *self.scan_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .devices
            .lock()
            .unwrap()
            .iter()
            .filter(|d| filter.matches(Some(&d.name), &d.services))
            .cloned()
            .collect())
    }

    async fn connect(&self, _device: &DeviceHandle) -> Result<()> {
        self.calls.connect.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let hook = self.during_connect.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resolve_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<CharacteristicHandle> {
        self.calls.resolve.fetch_add(1, Ordering::SeqCst);
        Ok(CharacteristicHandle {
            service,
            characteristic,
        })
    }

    async fn read_value(&self, chr: &CharacteristicHandle) -> Result<Vec<u8>> {
        self.calls.read.fetch_add(1, Ordering::SeqCst);
        self.reads
            .lock()
            .unwrap()
            .get(&chr.characteristic)
            .cloned()
            .ok_or_else(|| anyhow!("characteristic not readable"))
    }

    async fn write_value(&self, chr: &CharacteristicHandle, data: &[u8]) -> Result<()> {
        self.calls.write.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("GATT write rejected"));
        }
        self.writes
            .lock()
            .unwrap()
            .push((chr.characteristic, data.to_vec()));
        Ok(())
    }

    async fn subscribe(&self, chr: &CharacteristicHandle) -> Result<BoxStream<'static, Vec<u8>>> {
        self.calls.subscribe.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded();
        self.notifiers.lock().unwrap().insert(chr.characteristic, tx);
        Ok(rx.boxed())
    }

    async fn unsubscribe(&self, _chr: &CharacteristicHandle) -> Result<()> {
        // The sender is kept: a listener that outlives its unsubscribe would
        // still see traffic.
        self.calls.unsubscribe.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.calls.disconnect.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.notifiers.lock().unwrap().clear();
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect_events(&self) -> Result<BoxStream<'static, ()>> {
        let (tx, rx) = mpsc::unbounded();
        *self.disconnect_notifier.lock().unwrap() = Some(tx);
        Ok(rx.boxed())
    }
}

pub type EventLog = Arc<Mutex<Vec<OrpheEvent>>>;

/// A client over a fresh fake, with every event recorded.
pub fn client() -> (OrpheClient<FakeTransport>, Arc<FakeTransport>, EventLog) {
    let transport = Arc::new(FakeTransport::default());
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let hooks = Hooks::new().on_event(move |e| sink.lock().unwrap().push(e.clone()));
    let client = OrpheClient::new(transport.clone(), OrpheClientConfig::default(), hooks);
    client.setup_default();
    (client, transport, log)
}

/// Let spawned listener tasks drain their streams.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// A 92-byte burst at 12:00:00.000 with four zero readings.
pub fn burst_frame() -> Vec<u8> {
    let mut f = vec![0u8; 92];
    f[0] = 50;
    f[3] = 12;
    f
}

pub fn step_frame(subtype: u8, steps: u16) -> [u8; 20] {
    let mut f = [0u8; 20];
    f[1] = subtype;
    f[2..4].copy_from_slice(&steps.to_be_bytes());
    f
}
