//! Error taxonomy shared by the connection manager, decoder, and client.

use thiserror::Error;

/// Every failure the library reports to the host.
///
/// `Clone` so the same value can be handed to the `on_error` hook and
/// returned from the failing call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrpheError {
    #[error("channel `{name}` is not registered")]
    UnknownChannel { name: String },

    #[error("no matching ORPHE CORE module found")]
    NoMatchingDevice,

    #[error("not connected to a device")]
    NotConnected,

    #[error("read failed: {cause}")]
    ReadError { cause: String },

    #[error("write failed: {cause}")]
    WriteError { cause: String },

    #[error("malformed frame: expected {expected_len} bytes, got {actual_len}")]
    MalformedFrame {
        expected_len: usize,
        actual_len: usize,
    },

    #[error("operation cancelled by disconnect or reset")]
    Cancelled,

    #[error("transport error: {cause}")]
    TransportError { cause: String },
}

impl OrpheError {
    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        Self::TransportError {
            cause: err.to_string(),
        }
    }
}

pub type Result<T, E = OrpheError> = std::result::Result<T, E>;
