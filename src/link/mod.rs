//! Link channels: the shared physical resource behind every adapter.
//!
//! A [`LinkChannel`] is identified by `(CardId, LinkId)` and shared, through the
//! [`LinkRegistry`], by every adapter bound to that link whatever channel it
//! selects. It owns the selected channel, the sub-link state, the reset entry
//! point and the exclusive lock.

pub mod lock;
pub mod registry;

pub use lock::{LinkLockGuard, SessionId};
pub use registry::LinkRegistry;

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::TimingConfig;
use crate::error::{AlfError, AlfResult};
use crate::hardware::{regs, CardId, LinkAddress, Transport};
use lock::LinkLock;

/// Key of a link channel in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkKey {
    pub card: CardId,
    pub link: u32,
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.card, self.link)
    }
}

/// State of the SCA sub-link (SVL) of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[repr(u8)]
pub enum SvlState {
    #[default]
    Closed = 0,
    Reset = 1,
    Connected = 2,
}

impl SvlState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SvlState::Reset,
            2 => SvlState::Connected,
            _ => SvlState::Closed,
        }
    }
}

/// One physical `(card, link)` resource.
pub struct LinkChannel {
    key: LinkKey,
    channel: AtomicU32,
    svl: AtomicU8,
    channel_count: u32,
    transport: Arc<dyn Transport>,
    timing: TimingConfig,
    lock: LinkLock,
}

impl fmt::Debug for LinkChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkChannel")
            .field("key", &self.key)
            .field("channel", &self.channel())
            .field("channel_count", &self.channel_count)
            .field("svl", &self.svl_state())
            .field("lock_owner", &self.lock_owner())
            .finish()
    }
}

impl LinkChannel {
    pub(crate) fn new(
        key: LinkKey,
        channel_count: u32,
        transport: Arc<dyn Transport>,
        timing: TimingConfig,
    ) -> Self {
        debug!(link = %key, channel_count, "Creating link channel");
        Self {
            key,
            channel: AtomicU32::new(0),
            svl: AtomicU8::new(SvlState::Closed as u8),
            channel_count,
            transport,
            timing,
            lock: LinkLock::default(),
        }
    }

    pub fn key(&self) -> &LinkKey {
        &self.key
    }

    pub fn card(&self) -> &CardId {
        &self.key.card
    }

    pub fn link_id(&self) -> u32 {
        self.key.link
    }

    /// Currently selected channel.
    pub fn channel(&self) -> u32 {
        self.channel.load(Ordering::SeqCst)
    }

    pub fn channel_count(&self) -> u32 {
        self.channel_count
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    /// Address register accesses are currently routed to.
    pub fn address(&self) -> LinkAddress {
        LinkAddress {
            link: self.key.link,
            channel: self.channel(),
        }
    }

    /// Select the channel used by every later operation on this link.
    ///
    /// An out-of-range channel is rejected and the previous selection kept.
    pub fn set_channel(&self, channel: u32) -> AlfResult<()> {
        if channel >= self.channel_count {
            return Err(AlfError::channel_range(channel, self.channel_count));
        }
        let previous = self.channel.swap(channel, Ordering::SeqCst);
        if previous != channel {
            debug!(link = %self.key, from = previous, to = channel, "Channel selected");
        }
        Ok(())
    }

    /// Sub-link state as last driven by any adapter on this link.
    pub fn svl_state(&self) -> SvlState {
        SvlState::from_u8(self.svl.load(Ordering::SeqCst))
    }

    pub(crate) fn set_svl_state(&self, state: SvlState) {
        self.svl.store(state as u8, Ordering::SeqCst);
    }

    /// Pulse the global SC reset of the link.
    ///
    /// Clears pending read data on every channel of the link and leaves the
    /// sub-link in [`SvlState::Reset`]. Idempotent.
    pub fn sc_reset(&self) -> AlfResult<()> {
        self.write_register(regs::SC_RESET, 0x1)?;
        // second edge syncs the clocks
        self.write_register(regs::SC_RESET, 0x0)?;
        self.set_svl_state(SvlState::Reset);
        debug!(link = %self.key, "SC reset");
        Ok(())
    }

    /// Take the link lock for `session` without waiting.
    ///
    /// Fails with [`AlfError::LinkBusy`] if any session already holds it.
    pub fn try_lock(&self, session: SessionId) -> AlfResult<LinkLockGuard> {
        self.lock.try_acquire(session).map_err(|owner| {
            warn!(link = %self.key, %session, %owner, "Link lock refused");
            AlfError::LinkBusy {
                card: self.key.card.to_string(),
                link: self.key.link,
                owner: owner.to_string(),
            }
        })
    }

    pub fn is_locked(&self) -> bool {
        self.lock.owner().is_some()
    }

    pub fn lock_owner(&self) -> Option<SessionId> {
        self.lock.owner()
    }

    pub(crate) fn read_register(&self, reg: u32) -> AlfResult<u32> {
        self.transport.read_register(&self.key.card, self.address(), reg)
    }

    pub(crate) fn write_register(&self, reg: u32, value: u32) -> AlfResult<()> {
        self.transport
            .write_register(&self.key.card, self.address(), reg, value)
    }
}

impl Drop for LinkChannel {
    fn drop(&mut self) {
        debug!(link = %self.key, "Link channel released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MockBar;

    fn channel() -> (Arc<MockBar>, LinkChannel) {
        let bar = Arc::new(MockBar::new());
        let key = LinkKey {
            card: CardId::from("#1"),
            link: 2,
        };
        let link = LinkChannel::new(key, 4, bar.clone(), TimingConfig::default());
        (bar, link)
    }

    #[test]
    fn test_set_channel_in_range() {
        let (_bar, link) = channel();
        link.set_channel(3).unwrap();
        assert_eq!(link.channel(), 3);
        assert_eq!(link.address(), LinkAddress { link: 2, channel: 3 });
    }

    #[test]
    fn test_set_channel_out_of_range_keeps_selection() {
        let (bar, link) = channel();
        link.set_channel(1).unwrap();
        let result = link.set_channel(4);
        assert!(matches!(
            result,
            Err(AlfError::Range {
                kind: crate::error::RangeKind::Channel,
                value: 4,
                limit: 4
            })
        ));
        assert_eq!(link.channel(), 1);
        assert_eq!(bar.register_writes(), 0);
    }

    #[test]
    fn test_sc_reset_is_idempotent() {
        let (bar, link) = channel();
        link.sc_reset().unwrap();
        link.sc_reset().unwrap();
        assert_eq!(bar.reset_count(link.card(), 2), 2);
        assert_eq!(bar.swt_pending(link.card(), link.address()), 0);
        assert_eq!(link.svl_state(), SvlState::Reset);
    }

    #[test]
    fn test_try_lock_busy() {
        let (_bar, link) = channel();
        let holder = SessionId::new();
        let guard = link.try_lock(holder).unwrap();
        assert!(link.is_locked());

        let err = link.try_lock(SessionId::new()).unwrap_err();
        assert!(matches!(err, AlfError::LinkBusy { link: 2, .. }));

        drop(guard);
        assert!(!link.is_locked());
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_refusal_is_logged() {
        let (_bar, link) = channel();
        let _guard = link.try_lock(SessionId::new()).unwrap();
        assert!(link.try_lock(SessionId::new()).is_err());
        assert!(logs_contain("Link lock refused"));
    }
}
