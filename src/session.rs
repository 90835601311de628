//! Per-connection decoded state and the notification entry point.
//!
//! A [`Session`] pairs the [`SessionState`] the decoder works on with the
//! host's [`Hooks`].  The connection layer hands it every notification via
//! [`Session::handle_notification`]; everything downstream of the transport
//! (frequency measurement, raw monitoring, decoding, dispatch) happens here.
//!
//! State and hooks sit behind separate locks.  A frame is decoded and
//! committed under the state lock, which is released before any hook runs,
//! so a hook may read [`Session::state`] or call back into the client.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Local};
use log::{debug, warn};

use crate::decoder::decode_frame;
use crate::error::OrpheError;
use crate::hooks::Hooks;
use crate::protocol::{AccRange, GyroRange, MIN_FREQUENCY_INTERVAL_MS};
use crate::types::{
    DeviceInfo, Euler, Gait, OrpheEvent, Pronation, Quaternion, Sample, Stride, Warning, Xyz,
};

// ── Frequency ─────────────────────────────────────────────────────────────────

/// Notification-rate estimator.
///
/// The first tick only records its instant.  Later ticks report
/// `1000 / Δms`, but only when Δ exceeds 15 ms; closer arrivals are
/// coalesced BLE packets and say nothing about the link rate.
#[derive(Debug, Clone, Default)]
pub struct FrequencyEstimator {
    last: Option<Instant>,
}

impl FrequencyEstimator {
    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        let previous = self.last.replace(now)?;
        let interval_ms = now.saturating_duration_since(previous).as_secs_f64() * 1000.0;
        (interval_ms > MIN_FREQUENCY_INTERVAL_MS).then(|| 1000.0 / interval_ms)
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

// ── State ─────────────────────────────────────────────────────────────────────

/// Latest decoded values.  Lives as long as the client; [`Session::clear`]
/// is the only thing that resets it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub device_info: Option<DeviceInfo>,
    /// Highest step count seen across gait, stride and pronation frames.
    pub steps_number: u16,
    pub gait: Gait,
    pub stride: Stride,
    pub pronation: Pronation,
    pub quat: Option<Sample<Quaternion>>,
    pub delta: Option<Sample<Xyz>>,
    pub euler: Option<Sample<Euler>>,
    pub gyro: Option<Sample<Xyz>>,
    pub acc: Option<Sample<Xyz>>,
    pub converted_gyro: Option<Sample<Xyz>>,
    pub converted_acc: Option<Sample<Xyz>>,
    pub ble_frequency: Option<f64>,
    pub(crate) range_warned: bool,
}

impl SessionState {
    pub fn set_device_info(&mut self, info: DeviceInfo) {
        self.device_info = Some(info);
        self.range_warned = false;
    }

    /// Both sensor ranges, once device information is known and both codes
    /// are valid.
    pub fn ranges(&self) -> Option<(AccRange, GyroRange)> {
        let info = self.device_info?;
        Some((info.acc_range()?, info.gyro_range()?))
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

struct Decoding {
    state: SessionState,
    frequency: FrequencyEstimator,
    raw_data_monitoring: bool,
}

/// Hooks plus the events waiting for them.  `hooks` is `None` while some
/// thread is dispatching; events emitted meanwhile (including from inside a
/// hook) queue up and are delivered by that thread, in order.
struct Dispatch {
    hooks: Option<Hooks>,
    pending: VecDeque<OrpheEvent>,
}

/// Puts the hooks back when dispatch ends, including by a panicking hook.
struct Lease<'a> {
    slot: &'a Mutex<Dispatch>,
    hooks: Option<Hooks>,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(hooks) = self.hooks.take() {
            guard(self.slot).hooks = Some(hooks);
        }
    }
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Decoded state plus the hooks that observe it.
pub struct Session {
    decoding: Mutex<Decoding>,
    dispatch: Mutex<Dispatch>,
}

/// Shared between the client and its notification listener tasks.
pub type SharedSession = Arc<Session>;

impl Session {
    pub fn new(hooks: Hooks) -> Self {
        Self {
            decoding: Mutex::new(Decoding {
                state: SessionState::default(),
                frequency: FrequencyEstimator::default(),
                raw_data_monitoring: false,
            }),
            dispatch: Mutex::new(Dispatch {
                hooks: Some(hooks),
                pending: VecDeque::new(),
            }),
        }
    }

    pub fn shared(hooks: Hooks) -> SharedSession {
        Arc::new(Self::new(hooks))
    }

    /// Snapshot of the decoded state.
    pub fn state(&self) -> SessionState {
        guard(&self.decoding).state.clone()
    }

    /// When on, notifications are forwarded as `Data` without decoding.
    pub fn set_raw_data_monitoring(&self, enabled: bool) {
        guard(&self.decoding).raw_data_monitoring = enabled;
    }

    /// Run `event` through the hook table.
    pub fn emit(&self, event: OrpheEvent) {
        self.emit_all([event]);
    }

    fn emit_all(&self, events: impl IntoIterator<Item = OrpheEvent>) {
        let mut lease = {
            let mut slot = guard(&self.dispatch);
            slot.pending.extend(events);
            let Some(hooks) = slot.hooks.take() else {
                // Another dispatch is running; it drains the queue.
                return;
            };
            Lease {
                slot: &self.dispatch,
                hooks: Some(hooks),
            }
        };

        loop {
            let next = {
                let mut slot = guard(&self.dispatch);
                let next = slot.pending.pop_front();
                if next.is_none() {
                    // Hand the hooks back under the same lock that saw the
                    // queue empty, so nothing is left stranded.
                    slot.hooks = lease.hooks.take();
                }
                next
            };
            let Some(event) = next else {
                return;
            };
            if let Some(hooks) = lease.hooks.as_mut() {
                hooks.dispatch(&event);
            }
        }
    }

    /// Report a failed operation to the `Error` hook and hand it back.
    pub fn report(&self, err: OrpheError) -> OrpheError {
        self.emit(OrpheEvent::Error(err.clone()));
        err
    }

    pub fn warn(&self, warning: Warning) {
        self.emit(OrpheEvent::Warning(warning));
    }

    /// One notification from `channel`.
    ///
    /// `now` drives the frequency estimate; `received_at` anchors device
    /// timestamps to a calendar day.
    pub fn handle_notification(
        &self,
        channel: &str,
        data: &[u8],
        now: Instant,
        received_at: DateTime<Local>,
    ) {
        let events = {
            let mut decoding = guard(&self.decoding);
            decoding.notification(channel, data, now, &received_at)
        };
        self.emit_all(events);
    }

    /// Record configuration the host just wrote to the device.
    pub fn apply_device_info(&self, info: DeviceInfo) {
        guard(&self.decoding).state.set_device_info(info);
    }

    /// Forget everything decoded so far.  Hooks and raw-monitoring stay.
    pub fn clear(&self) {
        debug!("session: clearing decoded state");
        let mut decoding = guard(&self.decoding);
        decoding.state = SessionState::default();
        decoding.frequency.reset();
    }

    /// A new link starts a new inter-arrival series.
    pub fn restart_frequency(&self) {
        guard(&self.decoding).frequency.reset();
    }
}

impl Decoding {
    fn notification(
        &mut self,
        channel: &str,
        data: &[u8],
        now: Instant,
        received_at: &DateTime<Local>,
    ) -> Vec<OrpheEvent> {
        let mut events = Vec::new();
        if let Some(hz) = self.frequency.tick(now) {
            self.state.ble_frequency = Some(hz);
            events.push(OrpheEvent::BleFrequency(hz));
        }

        if self.raw_data_monitoring {
            events.push(OrpheEvent::Data {
                channel: channel.to_owned(),
                bytes: data.to_vec(),
            });
            return events;
        }

        match decode_frame(&mut self.state, channel, data, received_at) {
            Ok(decoded) => events.extend(decoded),
            Err(OrpheError::MalformedFrame {
                expected_len,
                actual_len,
            }) => {
                warn!("{channel}: dropping malformed frame ({actual_len} bytes, expected {expected_len})");
                events.push(OrpheEvent::Warning(Warning::MalformedFrame {
                    channel: channel.to_owned(),
                    expected_len,
                    actual_len,
                }));
            }
            Err(e) => {
                warn!("{channel}: {e}");
                events.push(OrpheEvent::Error(e));
            }
        }
        events
    }
}
