//! Host-registered callbacks.
//!
//! Every [`crate::orphe_client::OrpheClient`] owns its own `Hooks` table, so
//! two clients in one process never share handlers.  Unset hooks are no-ops.
//!
//! ```
//! use orphe_rs::hooks::Hooks;
//!
//! let hooks = Hooks::new()
//!     .on_quat(|q| println!("w={:.3}", q.value.w))
//!     .on_steps_number(|n| println!("steps: {n}"))
//!     .on_error(|e| eprintln!("error: {e}"));
//! ```
//!
//! Hooks run synchronously on the task that decoded the notification, in the
//! order the decoder produces events, after the frame has been committed to
//! the session state.  A hook may read the client's state or call its
//! synchronous methods; events raised from inside a hook are delivered after
//! the current one.  Keep hooks short; hand heavy work to a channel (see
//! [`Hooks::forward_to`]).

use tokio::sync::mpsc;

use crate::error::OrpheError;
use crate::types::{
    DeviceInfo, Direction, Euler, Gait, GaitKind, OrpheEvent, Pronation, Quaternion, Sample,
    Stride, Warning, Xyz,
};

type Hook<T> = Box<dyn FnMut(&T) + Send>;
type UnitHook = Box<dyn FnMut() + Send>;

macro_rules! typed_hooks {
    ($( $(#[$doc:meta])* $setter:ident => $variant:ident($ty:ty), )*) => {
        /// Per-session callback table.  Build it with the `on_*` methods.
        #[derive(Default)]
        pub struct Hooks {
            $( $setter: Option<Hook<$ty>>, )*
            on_data: Option<Box<dyn FnMut(&str, &[u8]) + Send>>,
            on_disconnect: Option<UnitHook>,
            on_clear: Option<UnitHook>,
            on_reset: Option<UnitHook>,
            on_event: Vec<Hook<OrpheEvent>>,
        }

        impl Hooks {
            $(
                $(#[$doc])*
                pub fn $setter(mut self, f: impl FnMut(&$ty) + Send + 'static) -> Self {
                    self.$setter = Some(Box::new(f));
                    self
                }
            )*

            fn dispatch_typed(&mut self, event: &OrpheEvent) {
                match event {
                    $(
                        OrpheEvent::$variant(v) => {
                            if let Some(hook) = self.$setter.as_mut() {
                                hook(v);
                            }
                        }
                    )*
                    OrpheEvent::Data { channel, bytes } => {
                        if let Some(hook) = self.on_data.as_mut() {
                            hook(channel, bytes);
                        }
                    }
                    OrpheEvent::Disconnect => {
                        if let Some(hook) = self.on_disconnect.as_mut() {
                            hook();
                        }
                    }
                    OrpheEvent::Clear => {
                        if let Some(hook) = self.on_clear.as_mut() {
                            hook();
                        }
                    }
                    OrpheEvent::Reset => {
                        if let Some(hook) = self.on_reset.as_mut() {
                            hook();
                        }
                    }
                }
            }
        }
    };
}

typed_hooks! {
    /// Attitude quaternion (sensor stream and step-analysis attitude frames).
    on_quat => Quat(Sample<Quaternion>),
    /// Raw gyroscope, normalised to −1…1.
    on_gyro => Gyro(Sample<Xyz>),
    /// Raw accelerometer, normalised to −1…1.  For g use [`Hooks::on_converted_acc`].
    on_acc => Acc(Sample<Xyz>),
    /// Gyroscope in °/s, scaled by the configured range.
    on_converted_gyro => ConvertedGyro(Sample<Xyz>),
    /// Accelerometer in g, scaled by the configured range.
    on_converted_acc => ConvertedAcc(Sample<Xyz>),
    on_delta => Delta(Sample<Xyz>),
    /// Euler angles derived from the quaternion; unreliable near gimbal lock.
    on_euler => Euler(Sample<Euler>),
    on_gait => Gait(Gait),
    on_type => Type(GaitKind),
    on_direction => Direction(Direction),
    on_calorie => Calorie(f32),
    on_distance => Distance(f32),
    on_standing_phase_duration => StandingPhaseDuration(f32),
    on_swing_phase_duration => SwingPhaseDuration(f32),
    on_stride => Stride(Stride),
    on_foot_angle => FootAngle(f32),
    on_pronation => Pronation(Pronation),
    on_landing_impact => LandingImpact(f32),
    /// Global step counter; fires only when it increases.
    on_steps_number => StepsNumber(u16),
    /// Measured notification rate in Hz.
    on_ble_frequency => BleFrequency(f64),
    on_device_info => DeviceInfo(DeviceInfo),
    /// Advertised name of the device picked by the scan.
    on_scan => Scan(String),
    on_connect => Connect(String),
    on_write => Write(String),
    on_start_notify => StartNotify(String),
    on_stop_notify => StopNotify(String),
    on_error => Error(OrpheError),
    on_warning => Warning(Warning),
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Undecoded notification bytes: raw monitoring mode, or a custom channel.
    pub fn on_data(mut self, f: impl FnMut(&str, &[u8]) + Send + 'static) -> Self {
        self.on_data = Some(Box::new(f));
        self
    }

    /// The link went down, whether requested or not.
    pub fn on_disconnect(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.on_disconnect = Some(Box::new(f));
        self
    }

    pub fn on_clear(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.on_clear = Some(Box::new(f));
        self
    }

    pub fn on_reset(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.on_reset = Some(Box::new(f));
        self
    }

    /// Catch-all; runs after the typed hook for every event.  May be added
    /// more than once.
    pub fn on_event(mut self, f: impl FnMut(&OrpheEvent) + Send + 'static) -> Self {
        self.on_event.push(Box::new(f));
        self
    }

    /// Copy every event into an mpsc channel, for hosts that prefer a
    /// `while let Some(ev) = rx.recv().await` loop.  Events are dropped once
    /// the receiver is gone.
    pub fn forward_to(self, tx: mpsc::UnboundedSender<OrpheEvent>) -> Self {
        self.on_event(move |event| {
            let _ = tx.send(event.clone());
        })
    }

    pub(crate) fn dispatch(&mut self, event: &OrpheEvent) {
        self.dispatch_typed(event);
        for hook in &mut self.on_event {
            hook(event);
        }
    }
}
