//! Error types for tether-core

use thiserror::Error;

use crate::key::CorrelationKey;
use crate::slot::SlotState;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for tether-core
#[derive(Error, Debug)]
pub enum Error {
    /// Registry errors (duplicate keys, failed lookups, destroyed sessions)
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Response slot errors
    #[error("Slot error: {0}")]
    Slot(#[from] SlotError),

    /// Correlation key errors
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// A request was rejected before any key was computed
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Whether the caller should treat this as "result unavailable" rather
    /// than a defect in the calling code.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Slot(SlotError::Closed) | Self::Registry(RegistryError::Destroyed)
        )
    }

    /// True when the request was abandoned because its slot was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Slot(SlotError::Closed))
    }
}

/// Errors raised by [`crate::registry::Registry`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A live registration already exists under this key
    #[error("registry already contains key [{key}]")]
    DuplicateKey { key: CorrelationKey },

    /// No registration exists under this key
    #[error("no pending slot registered under [{key}]")]
    NotFound { key: CorrelationKey },

    /// A registration exists but carries a different payload type
    #[error("slot registered under [{key}] carries a different payload type")]
    TypeMismatch { key: CorrelationKey },

    /// The owning session was destroyed
    #[error("registry was destroyed with its session")]
    Destroyed,
}

/// Errors raised by [`crate::slot::ResponseSlot`]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    /// The slot cannot accept this operation in its current state
    #[error("slot is {state}; operation not permitted")]
    InvalidState { state: SlotState },

    /// The slot was closed before a value arrived
    #[error("slot was closed before a value arrived")]
    Closed,
}

/// Errors raised when building correlation keys
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyError {
    /// Host supplied a request code outside `[0, 65535]`
    #[error("request code {code} is outside [0, 65535]")]
    OutOfRange { code: i64 },
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{RequestCode, RequestKind};

    fn key(code: u16) -> CorrelationKey {
        CorrelationKey::new(RequestKind::ActivityResult, RequestCode::new(code))
    }

    #[test]
    fn duplicate_key_display_names_key() {
        let err = RegistryError::DuplicateKey { key: key(42) };
        assert_eq!(err.to_string(), "registry already contains key [activity@42]");
    }

    #[test]
    fn not_found_wraps_into_top_level() {
        let err: Error = RegistryError::NotFound { key: key(7) }.into();
        assert!(err.to_string().starts_with("Registry error:"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn closed_is_recoverable() {
        let err: Error = SlotError::Closed.into();
        assert!(err.is_recoverable());
        assert!(err.is_closed());
    }

    #[test]
    fn destroyed_is_recoverable_but_not_closed() {
        let err: Error = RegistryError::Destroyed.into();
        assert!(err.is_recoverable());
        assert!(!err.is_closed());
    }

    #[test]
    fn invalid_state_is_fatal() {
        let err: Error = SlotError::InvalidState {
            state: SlotState::Fulfilled,
        }
        .into();
        assert!(!err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "Slot error: slot is fulfilled; operation not permitted"
        );
    }

    #[test]
    fn out_of_range_display() {
        let err = KeyError::OutOfRange { code: 70_000 };
        assert_eq!(err.to_string(), "request code 70000 is outside [0, 65535]");
    }
}
