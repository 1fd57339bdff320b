//! Registry of live link channels.
//!
//! Maps `(CardId, LinkId)` to a weak handle of the shared [`LinkChannel`]. The
//! first adapter bound to a link creates the channel; the last one to go away
//! drops it. Link ids are validated against the topology before any register
//! is touched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::debug;

use super::{LinkChannel, LinkKey};
use crate::config::{AlfConfig, TimingConfig};
use crate::error::{AlfError, AlfResult};
use crate::hardware::{CardId, StaticTopology, Topology, Transport};

/// Hands out shared link channels.
pub struct LinkRegistry {
    topology: Arc<dyn Topology>,
    transport: Arc<dyn Transport>,
    timing: TimingConfig,
    links: Mutex<HashMap<LinkKey, Weak<LinkChannel>>>,
}

impl LinkRegistry {
    pub fn new(
        topology: Arc<dyn Topology>,
        transport: Arc<dyn Transport>,
        timing: TimingConfig,
    ) -> Self {
        Self {
            topology,
            transport,
            timing,
            links: Mutex::new(HashMap::new()),
        }
    }

    /// Build a registry whose topology and timing come from `config`.
    pub fn from_config(config: &AlfConfig, transport: Arc<dyn Transport>) -> Self {
        Self::new(
            Arc::new(StaticTopology::from_config(config)),
            transport,
            config.timing.clone(),
        )
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    /// Get the link channel of `(card, link)`, creating it if none is alive.
    ///
    /// # Errors
    ///
    /// - [`AlfError::CardNotFound`] if the topology does not know `card`
    /// - [`AlfError::Range`] if `link` is not below the card's link count
    pub fn open(&self, card: &CardId, link: u32) -> AlfResult<Arc<LinkChannel>> {
        let link_count = self.topology.link_count(card)?;
        if link >= link_count {
            return Err(AlfError::link_range(link, link_count));
        }

        let key = LinkKey {
            card: card.clone(),
            link,
        };

        let mut links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
        links.retain(|_, weak| weak.strong_count() > 0);

        if let Some(existing) = links.get(&key).and_then(Weak::upgrade) {
            debug!(link = %key, "Reusing link channel");
            return Ok(existing);
        }

        let channel_count = self.topology.channel_count(card)?;
        let channel = Arc::new(LinkChannel::new(
            key.clone(),
            channel_count,
            Arc::clone(&self.transport),
            self.timing.clone(),
        ));
        links.insert(key, Arc::downgrade(&channel));
        Ok(channel)
    }

    /// Number of link channels currently referenced by at least one adapter.
    pub fn live_links(&self) -> usize {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}
