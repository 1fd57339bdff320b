//! Custom error types for the link control plane.
//!
//! This module defines the primary error type, `AlfError`, for the whole crate.
//! Using the `thiserror` crate, it provides one place for every failure a caller
//! can observe, from range checks on link ids to SCA reply flags.
//!
//! ## Error Hierarchy
//!
//! `AlfError` is an enum that consolidates the failure kinds of the system:
//!
//! - **`Range`**: A link or channel id outside the range enumerated by the topology.
//!   Always raised before any register is touched.
//! - **`LinkBusy`**: A locked sequence was requested while another session holds the
//!   link lock. Acquisition never waits.
//! - **`NoData`** / **`Timeout`**: An SWT read found the read FIFO empty, either
//!   immediately (`timeout == 0`) or after the full timeout elapsed.
//! - **`Command`**: An SCA command that is unknown or malformed, rejected before it is sent.
//! - **`Sca`** / **`Ic`**: Protocol-level failures reported back by the front-end.
//! - **`Parse`**: An op list that cannot be decoded. Raised when the list is built,
//!   never as a per-step result.
//! - **`Config`**: Wraps configuration loading and validation errors.
//!
//! Errors raised by a standalone primitive propagate to the caller. Inside a
//! sequence they are turned into error-tagged step results by the engine.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Convenience alias for results using the crate error type.
pub type AlfResult<T> = std::result::Result<T, AlfError>;

/// Which identifier a [`AlfError::Range`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeKind {
    /// A link id given at construction.
    Link,
    /// A channel id given to `set_channel`.
    Channel,
}

impl fmt::Display for RangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeKind::Link => write!(f, "link"),
            RangeKind::Channel => write!(f, "channel"),
        }
    }
}

#[derive(Error, Debug)]
pub enum AlfError {
    #[error("{kind} {value} out of range (valid: 0..{limit})")]
    Range {
        kind: RangeKind,
        value: u32,
        limit: u32,
    },

    #[error("Link {link} of card {card} is locked by session {owner}")]
    LinkBusy {
        card: String,
        link: u32,
        owner: String,
    },

    #[error("Not enough words in SWT read FIFO")]
    NoData,

    #[error("No SWT word arrived within {timeout:?} (waited {elapsed:?})")]
    Timeout { elapsed: Duration, timeout: Duration },

    #[error("SCA command error: {0}")]
    Command(String),

    #[error("SCA error: {0}")]
    Sca(String),

    #[error("IC error: {0}")]
    Ic(String),

    #[error("Card {0} not found in topology")]
    CardNotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Sequence failed: {0}")]
    Sequence(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AlfError {
    pub(crate) fn link_range(value: u32, limit: u32) -> Self {
        AlfError::Range {
            kind: RangeKind::Link,
            value,
            limit,
        }
    }

    pub(crate) fn channel_range(value: u32, limit: u32) -> Self {
        AlfError::Range {
            kind: RangeKind::Channel,
            value,
            limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AlfError::channel_range(42, 12);
        assert_eq!(err.to_string(), "channel 42 out of range (valid: 0..12)");
    }

    #[test]
    fn test_link_busy_names_owner() {
        let err = AlfError::LinkBusy {
            card: "#1".into(),
            link: 3,
            owner: "abc".into(),
        };
        assert!(err.to_string().contains("locked by session abc"));
    }
}
