//! Logical channel names ↔ GATT (service, characteristic) pairs.

use std::collections::HashMap;

use log::warn;
use uuid::Uuid;

use crate::error::{OrpheError, Result};
use crate::protocol::{
    DEPRECATED_CHANNEL_ALIASES, DEVICE_INFORMATION, DEVICE_INFORMATION_CHARACTERISTIC,
    INFORMATION_SERVICE, OTHER_SERVICE, SENSOR_VALUES, SENSOR_VALUES_CHARACTERISTIC,
    STEP_ANALYSIS, STEP_ANALYSIS_CHARACTERISTIC,
};

/// Transport-level address of a logical channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Channel {
    pub service: Uuid,
    pub characteristic: Uuid,
}

/// Which decoder a channel's notifications go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    DeviceInformation,
    SensorValues,
    StepAnalysis,
    /// Host-registered name with no built-in decoder.
    Custom,
}

impl ChannelKind {
    pub fn of(name: &str) -> Self {
        match name {
            DEVICE_INFORMATION => Self::DeviceInformation,
            SENSOR_VALUES => Self::SensorValues,
            STEP_ANALYSIS => Self::StepAnalysis,
            _ => Self::Custom,
        }
    }
}

/// Result of [`ChannelRegistry::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChannel {
    /// Canonical name; differs from the requested name for deprecated aliases.
    pub name: String,
    pub channel: Channel,
    /// The deprecated name the caller used, if any.
    pub deprecated_alias: Option<String>,
}

/// Built-in address of a canonical channel name.
pub fn builtin_channel(name: &str) -> Option<Channel> {
    let (service, characteristic) = match name {
        DEVICE_INFORMATION => (INFORMATION_SERVICE, DEVICE_INFORMATION_CHARACTERISTIC),
        SENSOR_VALUES => (OTHER_SERVICE, SENSOR_VALUES_CHARACTERISTIC),
        STEP_ANALYSIS => (OTHER_SERVICE, STEP_ANALYSIS_CHARACTERISTIC),
        _ => return None,
    };
    Some(Channel {
        service,
        characteristic,
    })
}

/// Canonical replacement of a deprecated channel name.
pub fn canonical_alias(name: &str) -> Option<&'static str> {
    DEPRECATED_CHANNEL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|&(_, canonical)| canonical)
}

/// Name → address table.  One per client; empty until
/// [`ChannelRegistry::register_defaults`] or [`ChannelRegistry::register`].
#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    entries: HashMap<String, Channel>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a mapping.
    pub fn register(&mut self, name: impl Into<String>, service: Uuid, characteristic: Uuid) {
        self.entries.insert(
            name.into(),
            Channel {
                service,
                characteristic,
            },
        );
    }

    /// Bind the built-in names in `names`.  Deprecated aliases are accepted
    /// and bound under their canonical name; anything else is skipped.
    pub fn register_defaults<S: AsRef<str>>(&mut self, names: &[S]) {
        for name in names {
            let name = name.as_ref();
            let canonical = canonical_alias(name).unwrap_or(name);
            match builtin_channel(canonical) {
                Some(ch) => self.register(canonical, ch.service, ch.characteristic),
                None => warn!("setup: `{name}` is not a built-in channel, skipping"),
            }
        }
    }

    /// Look up a channel.  Exact registrations win, so a host that registers
    /// `RAW` itself gets its own mapping rather than the alias.
    pub fn resolve(&self, name: &str) -> Result<ResolvedChannel> {
        if let Some(channel) = self.entries.get(name) {
            return Ok(ResolvedChannel {
                name: name.to_owned(),
                channel: *channel,
                deprecated_alias: None,
            });
        }
        if let Some(canonical) = canonical_alias(name) {
            if let Some(channel) = self.entries.get(canonical) {
                return Ok(ResolvedChannel {
                    name: canonical.to_owned(),
                    channel: *channel,
                    deprecated_alias: Some(name.to_owned()),
                });
            }
        }
        Err(OrpheError::UnknownChannel {
            name: name.to_owned(),
        })
    }
}
