//! Link lifecycle and logical-channel I/O over a [`Transport`].
//!
//! ```text
//! Disconnected ──scan──▶ Scanning ──match──▶ Connecting ──▶ Connected { active_channel }
//!       ▲                                                          │
//!       └──────────── disconnect / clear / link lost ──────────────┘
//! ```
//!
//! One physical link at a time.  Switching to another channel on a live link
//! only resolves that channel's characteristic (once; it is cached).  Each
//! first resolution on a link emits `Connect(channel)`.
//!
//! Connection attempts are serialised: a caller that arrives while another
//! attempt is in flight waits for it and then uses its result.  Every
//! transport await races a cancellation epoch; `disconnect`, `clear` and a
//! physical disconnect bump it, and anything still pending from before fails
//! with [`OrpheError::Cancelled`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Instant;

use chrono::Local;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::channel::{ChannelRegistry, ResolvedChannel};
use crate::error::{OrpheError, Result};
use crate::session::SharedSession;
use crate::transport::{CharacteristicHandle, DeviceHandle, ScanFilter, Transport};
use crate::types::{OrpheEvent, Warning};

/// Where the link is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Scanning,
    Connecting,
    /// Linked.  `active_channel` is the channel most recently resolved, or
    /// `None` if resolution has not succeeded yet on this link.
    Connected { active_channel: Option<String> },
}

#[derive(Default)]
struct Link {
    state: ConnectionState,
    /// Device picked by the last scan; kept across `disconnect` so a later
    /// operation reconnects without scanning.  `clear` forgets it.
    device: Option<DeviceHandle>,
    up: bool,
    characteristics: HashMap<String, CharacteristicHandle>,
    watcher: Option<JoinHandle<()>>,
}

/// How the last connection attempt ended.  Callers that queued behind an
/// attempt adopt its failure instead of repeating the scan.
#[derive(Default)]
struct AttemptOutcome {
    finished: u64,
    failure: Option<OrpheError>,
}

struct Inner<T> {
    transport: Arc<T>,
    filter: ScanFilter,
    registry: RwLock<ChannelRegistry>,
    link: Mutex<Link>,
    listeners: Mutex<HashMap<String, JoinHandle<()>>>,
    attempt: tokio::sync::Mutex<()>,
    outcome: Mutex<AttemptOutcome>,
    epoch: watch::Sender<u64>,
    session: SharedSession,
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        let listeners = self.listeners.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, handle) in listeners.drain() {
            handle.abort();
        }
        let link = self.link.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(watcher) = link.watcher.take() {
            watcher.abort();
        }
    }
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resolves once the epoch differs from `epoch`.
async fn epoch_moved(rx: &mut watch::Receiver<u64>, epoch: u64) {
    loop {
        if *rx.borrow_and_update() != epoch {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: nothing can cancel us any more.
            return std::future::pending().await;
        }
    }
}

/// Owns the link to one device.  Cheap to clone; clones share the link.
pub struct ConnectionManager<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ConnectionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: Arc<T>, filter: ScanFilter, session: SharedSession) -> Self {
        let (epoch, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                transport,
                filter,
                registry: RwLock::new(ChannelRegistry::new()),
                link: Mutex::new(Link::default()),
                listeners: Mutex::new(HashMap::new()),
                attempt: tokio::sync::Mutex::new(()),
                outcome: Mutex::new(AttemptOutcome::default()),
                epoch,
                session,
            }),
        }
    }

    // ── Registry ──────────────────────────────────────────────────────────────

    pub fn register(&self, name: impl Into<String>, service: Uuid, characteristic: Uuid) {
        self.inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(name, service, characteristic);
    }

    pub fn register_defaults<S: AsRef<str>>(&self, names: &[S]) {
        self.inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register_defaults(names);
    }

    fn resolve(&self, name: &str) -> Result<ResolvedChannel> {
        let resolved = self
            .inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .resolve(name)?;
        if let Some(alias) = &resolved.deprecated_alias {
            warn!("`{alias}` is deprecated, use `{}`", resolved.name);
            self.inner.session.warn(Warning::Deprecated {
                alias: alias.clone(),
                canonical: resolved.name.clone(),
            });
        }
        Ok(resolved)
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn epoch(&self) -> u64 {
        *self.inner.epoch.borrow()
    }

    fn cancel_pending(&self) {
        self.inner.epoch.send_modify(|e| *e += 1);
    }

    /// Run `op` unless the epoch moves away from `epoch` first.
    async fn guarded<R>(&self, epoch: u64, op: impl Future<Output = Result<R>>) -> Result<R> {
        let mut rx = self.inner.epoch.subscribe();
        tokio::select! {
            biased;
            _ = epoch_moved(&mut rx, epoch) => Err(OrpheError::Cancelled),
            result = op => result,
        }
    }

    fn emit(&self, event: OrpheEvent) {
        self.inner.session.emit(event);
    }

    /// Surface a failure on the `Error` hook without swallowing it.
    fn report<R>(&self, result: Result<R>) -> Result<R> {
        result.map_err(|e| self.inner.session.report(e))
    }

    fn set_state(&self, state: ConnectionState) {
        guard(&self.inner.link).state = state;
    }

    fn abort_listeners(&self) {
        for (channel, handle) in guard(&self.inner.listeners).drain() {
            debug!("{channel}: stopping listener");
            handle.abort();
        }
    }

    /// The cached characteristic for `channel`, if the link is up and it has
    /// been resolved before.  Makes it the active channel.
    fn activate_cached(&self, channel: &str) -> Option<CharacteristicHandle> {
        let mut link = guard(&self.inner.link);
        if !link.up {
            return None;
        }
        let chr = *link.characteristics.get(channel)?;
        link.state = ConnectionState::Connected {
            active_channel: Some(channel.to_owned()),
        };
        Some(chr)
    }

    // ── Connect ───────────────────────────────────────────────────────────────

    /// Make sure the link is up and `name` is resolved on it.
    ///
    /// A no-op (no transport calls at all) when the link is up and `name` was
    /// resolved on it before.
    pub async fn ensure_connected(&self, name: &str) -> Result<()> {
        let epoch = self.epoch();
        let result = async {
            let resolved = self.resolve(name)?;
            self.connect_channel(&resolved, epoch).await.map(|_| ())
        }
        .await;
        self.report(result)
    }

    async fn connect_channel(
        &self,
        resolved: &ResolvedChannel,
        epoch: u64,
    ) -> Result<CharacteristicHandle> {
        if let Some(chr) = self.activate_cached(&resolved.name) {
            return Ok(chr);
        }

        let queued_at = guard(&self.inner.outcome).finished;
        let _slot = self
            .guarded(epoch, async { Ok(self.inner.attempt.lock().await) })
            .await?;
        // The attempt we queued behind may already have done our work, or
        // failed in a way we would only repeat.
        if let Some(chr) = self.activate_cached(&resolved.name) {
            return Ok(chr);
        }
        let adopted = {
            let outcome = guard(&self.inner.outcome);
            (outcome.finished != queued_at)
                .then(|| outcome.failure.clone())
                .flatten()
        };
        if let Some(err) = adopted {
            debug!("{}: previous attempt failed ({err}), not retrying", resolved.name);
            return Err(err);
        }

        let result = self.establish(resolved, epoch).await;
        {
            let mut outcome = guard(&self.inner.outcome);
            outcome.finished += 1;
            outcome.failure = result.as_ref().err().cloned();
        }
        if result.is_err() {
            let mut link = guard(&self.inner.link);
            if !link.up {
                link.state = ConnectionState::Disconnected;
            }
        }
        result
    }

    async fn establish(
        &self,
        resolved: &ResolvedChannel,
        epoch: u64,
    ) -> Result<CharacteristicHandle> {
        let transport = &self.inner.transport;
        let (up, known) = {
            let link = guard(&self.inner.link);
            (link.up, link.device.clone())
        };

        if !up {
            let device = match known {
                Some(device) => {
                    debug!("reconnecting to {} ({})", device.name, device.id);
                    device
                }
                None => self.scan(epoch).await?,
            };

            self.set_state(ConnectionState::Connecting);
            self.guarded(epoch, async {
                transport.connect(&device).await.map_err(OrpheError::transport)
            })
            .await?;

            // A disconnect or clear may have landed while the connect was
            // completing; its epoch bump is ordered before it takes the link.
            let current = {
                let mut link = guard(&self.inner.link);
                let current = self.epoch() == epoch;
                if current {
                    link.device = Some(device.clone());
                    link.up = true;
                    link.characteristics.clear();
                    link.state = ConnectionState::Connected {
                        active_channel: None,
                    };
                }
                current
            };
            if !current {
                debug!("connect to {} completed after cancellation, dropping it", device.name);
                transport.disconnect().await.ok();
                return Err(OrpheError::Cancelled);
            }
            info!("connected to {} for {}", device.name, resolved.name);
            self.inner.session.restart_frequency();
            self.spawn_disconnect_watcher().await;
        }

        let channel = resolved.channel;
        let chr = self
            .guarded(epoch, async {
                transport
                    .resolve_characteristic(channel.service, channel.characteristic)
                    .await
                    .map_err(OrpheError::transport)
            })
            .await?;
        debug!("{}: resolved {}", resolved.name, chr.characteristic);

        let current = {
            let mut link = guard(&self.inner.link);
            let current = link.up && self.epoch() == epoch;
            if current {
                link.characteristics.insert(resolved.name.clone(), chr);
                link.state = ConnectionState::Connected {
                    active_channel: Some(resolved.name.clone()),
                };
            }
            current
        };
        if !current {
            return Err(OrpheError::Cancelled);
        }
        self.emit(OrpheEvent::Connect(resolved.name.clone()));
        Ok(chr)
    }

    async fn scan(&self, epoch: u64) -> Result<DeviceHandle> {
        let transport = &self.inner.transport;
        let filter = &self.inner.filter;

        self.set_state(ConnectionState::Scanning);
        let found = self
            .guarded(epoch, async {
                transport.scan(filter).await.map_err(OrpheError::transport)
            })
            .await?;
        let device = found
            .into_iter()
            .find(|d| filter.matches(Some(&d.name), &d.services))
            .ok_or(OrpheError::NoMatchingDevice)?;

        info!("scan: picked {}  id={}", device.name, device.id);
        self.emit(OrpheEvent::Scan(device.name.clone()));
        Ok(device)
    }

    async fn spawn_disconnect_watcher(&self) {
        let mut events = match self.inner.transport.disconnect_events().await {
            Ok(events) => events,
            Err(e) => {
                warn!("disconnect watcher: could not subscribe to adapter events: {e}");
                return;
            }
        };
        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            if events.next().await.is_some() {
                if let Some(inner) = weak.upgrade() {
                    ConnectionManager { inner }.link_lost();
                }
            }
        });
        if let Some(old) = guard(&self.inner.link).watcher.replace(handle) {
            old.abort();
        }
    }

    /// The device dropped the link on its own.
    fn link_lost(&self) {
        {
            let mut link = guard(&self.inner.link);
            if !link.up {
                return;
            }
            link.up = false;
            link.characteristics.clear();
            link.state = ConnectionState::Disconnected;
            // Detach rather than abort: this runs on the watcher task itself.
            link.watcher.take();
        }
        info!("device disconnected");
        self.cancel_pending();
        self.abort_listeners();
        self.emit(OrpheEvent::Disconnect);
    }

    // ── I/O ───────────────────────────────────────────────────────────────────

    pub async fn read(&self, name: &str) -> Result<Vec<u8>> {
        let epoch = self.epoch();
        let result = async {
            let resolved = self.resolve(name)?;
            let chr = self.connect_channel(&resolved, epoch).await?;
            let transport = &self.inner.transport;
            self.guarded(epoch, async {
                transport
                    .read_value(&chr)
                    .await
                    .map_err(|e| OrpheError::ReadError {
                        cause: e.to_string(),
                    })
            })
            .await
        }
        .await;
        self.report(result)
    }

    pub async fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        let epoch = self.epoch();
        let result = async {
            let resolved = self.resolve(name)?;
            let chr = self.connect_channel(&resolved, epoch).await?;
            let transport = &self.inner.transport;
            self.guarded(epoch, async {
                transport
                    .write_value(&chr, data)
                    .await
                    .map_err(|e| OrpheError::WriteError {
                        cause: e.to_string(),
                    })
            })
            .await?;
            debug!("{}: wrote {:02x?}", resolved.name, data);
            self.emit(OrpheEvent::Write(resolved.name));
            Ok(())
        }
        .await;
        self.report(result)
    }

    /// Start notifications on `name` and decode them into the session.
    /// Subscribing twice is a no-op.
    pub async fn subscribe(&self, name: &str) -> Result<()> {
        let epoch = self.epoch();
        let result = self.try_subscribe(name, epoch).await;
        self.report(result)
    }

    async fn try_subscribe(&self, name: &str, epoch: u64) -> Result<()> {
        let resolved = self.resolve(name)?;
        let chr = self.connect_channel(&resolved, epoch).await?;

        let _slot = self
            .guarded(epoch, async { Ok(self.inner.attempt.lock().await) })
            .await?;
        if guard(&self.inner.listeners).contains_key(&resolved.name) {
            debug!("{}: already subscribed", resolved.name);
            return Ok(());
        }

        let transport = &self.inner.transport;
        let mut stream = self
            .guarded(epoch, async {
                transport.subscribe(&chr).await.map_err(OrpheError::transport)
            })
            .await?;

        let session = self.inner.session.clone();
        let channel = resolved.name.clone();
        let handle = tokio::spawn(async move {
            while let Some(bytes) = stream.next().await {
                session.handle_notification(&channel, &bytes, Instant::now(), Local::now());
            }
            debug!("{channel}: notification stream ended");
        });

        if self.epoch() != epoch {
            handle.abort();
            return Err(OrpheError::Cancelled);
        }
        guard(&self.inner.listeners).insert(resolved.name.clone(), handle);
        info!("{}: notifications started", resolved.name);
        self.emit(OrpheEvent::StartNotify(resolved.name));
        Ok(())
    }

    /// Stop notifications on `name`.  A no-op if it is not subscribed.
    pub async fn unsubscribe(&self, name: &str) -> Result<()> {
        let epoch = self.epoch();
        let result = async {
            let resolved = self.resolve(name)?;
            let listener = guard(&self.inner.listeners).remove(&resolved.name);
            let Some(listener) = listener else {
                debug!("{}: not subscribed", resolved.name);
                return Ok(());
            };
            listener.abort();

            let chr = guard(&self.inner.link)
                .characteristics
                .get(&resolved.name)
                .copied();
            if let Some(chr) = chr {
                let transport = &self.inner.transport;
                self.guarded(epoch, async {
                    transport.unsubscribe(&chr).await.map_err(OrpheError::transport)
                })
                .await?;
            }
            info!("{}: notifications stopped", resolved.name);
            self.emit(OrpheEvent::StopNotify(resolved.name));
            Ok(())
        }
        .await;
        self.report(result)
    }

    pub fn is_subscribed(&self, name: &str) -> bool {
        match self.resolve(name) {
            Ok(resolved) => guard(&self.inner.listeners).contains_key(&resolved.name),
            Err(_) => false,
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    /// Drop the link.  Pending operations fail with `Cancelled`; listeners
    /// stop.  [`OrpheError::NotConnected`] if there was no link.
    pub async fn disconnect(&self) -> Result<()> {
        let result = self.try_disconnect().await;
        self.report(result)
    }

    async fn try_disconnect(&self) -> Result<()> {
        self.cancel_pending();
        self.abort_listeners();
        let was_up = {
            let mut link = guard(&self.inner.link);
            let was_up = link.up;
            link.up = false;
            link.characteristics.clear();
            link.state = ConnectionState::Disconnected;
            if let Some(watcher) = link.watcher.take() {
                watcher.abort();
            }
            was_up
        };
        if !was_up {
            return Err(OrpheError::NotConnected);
        }

        let result = self
            .inner
            .transport
            .disconnect()
            .await
            .map_err(OrpheError::transport);
        info!("disconnected");
        self.emit(OrpheEvent::Disconnect);
        result
    }

    /// Forget the device, its characteristics and all listeners.
    pub fn clear(&self) {
        self.cancel_pending();
        self.abort_listeners();
        let old = std::mem::take(&mut *guard(&self.inner.link));
        if old.up {
            warn!("clear: forgetting a live link without disconnecting");
        }
        if let Some(watcher) = old.watcher {
            watcher.abort();
        }
        self.emit(OrpheEvent::Clear);
    }

    /// `disconnect` then `clear`.  The clear happens either way; the
    /// disconnect's error (e.g. `NotConnected`) is still returned.
    pub async fn disconnect_and_clear(&self) -> Result<()> {
        let result = self.disconnect().await;
        self.clear();
        result
    }

    pub async fn is_connected(&self) -> bool {
        let up = guard(&self.inner.link).up;
        up && self.inner.transport.is_connected().await
    }

    pub fn state(&self) -> ConnectionState {
        guard(&self.inner.link).state.clone()
    }
}
