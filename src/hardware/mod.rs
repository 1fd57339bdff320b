//! Hardware boundary of the control plane.
//!
//! Two collaborators live outside this crate and are injected:
//!
//! - a [`Transport`] that reads and writes 32-bit registers of a link block,
//! - a [`Topology`] that says which link and channel ids a card exposes.
//!
//! [`MockBar`] implements `Transport` as a loopback emulator so that adapters can
//! be exercised without a card.

pub mod mock;
pub mod regs;
pub mod topology;

pub use mock::MockBar;
pub use topology::{StaticTopology, Topology};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AlfResult;

/// Opaque identifier of a physical card.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CardId(String);

impl CardId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CardId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for CardId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Link and channel a register access is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkAddress {
    pub link: u32,
    pub channel: u32,
}

impl fmt::Display for LinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link={} channel={}", self.link, self.channel)
    }
}

/// Raw register accessor for the slow-control block of a card.
///
/// Implementations must be callable from any thread. Calls are not
/// synchronized against each other by the control plane; exclusivity is the
/// business of the link lock.
pub trait Transport: Send + Sync {
    /// Read the register at offset `reg` of the link block at `addr`.
    fn read_register(&self, card: &CardId, addr: LinkAddress, reg: u32) -> AlfResult<u32>;

    /// Write `value` to the register at offset `reg` of the link block at `addr`.
    fn write_register(&self, card: &CardId, addr: LinkAddress, reg: u32, value: u32)
        -> AlfResult<()>;
}
