//! Card topology lookup.

use std::collections::HashMap;

use super::CardId;
use crate::config::{AlfConfig, CardDefinition};
use crate::error::{AlfError, AlfResult};

/// Enumerates the valid link and channel ranges of each card.
pub trait Topology: Send + Sync {
    /// Number of valid link ids of `card`; links are `0..link_count`.
    fn link_count(&self, card: &CardId) -> AlfResult<u32>;

    /// Number of valid channel ids of `card`; channels are `0..channel_count`.
    fn channel_count(&self, card: &CardId) -> AlfResult<u32>;
}

/// Topology fixed at construction, usually from the `cards` config section.
#[derive(Debug, Clone, Default)]
pub struct StaticTopology {
    cards: HashMap<CardId, (u32, u32)>,
}

impl StaticTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a card.
    pub fn with_card(mut self, card: impl Into<CardId>, links: u32, channels: u32) -> Self {
        self.cards.insert(card.into(), (links, channels));
        self
    }

    pub fn from_config(config: &AlfConfig) -> Self {
        Self::from_definitions(&config.cards)
    }

    pub fn from_definitions(cards: &[CardDefinition]) -> Self {
        cards.iter().fold(Self::new(), |topology, card| {
            topology.with_card(card.id.as_str(), card.links, card.channels)
        })
    }

    fn lookup(&self, card: &CardId) -> AlfResult<(u32, u32)> {
        self.cards
            .get(card)
            .copied()
            .ok_or_else(|| AlfError::CardNotFound(card.to_string()))
    }
}

impl Topology for StaticTopology {
    fn link_count(&self, card: &CardId) -> AlfResult<u32> {
        self.lookup(card).map(|(links, _)| links)
    }

    fn channel_count(&self, card: &CardId) -> AlfResult<u32> {
        self.lookup(card).map(|(_, channels)| channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_default_config() {
        let topology = StaticTopology::from_config(&AlfConfig::default());
        let card = CardId::from("#1");
        assert_eq!(topology.link_count(&card).unwrap(), 12);
        assert_eq!(topology.channel_count(&card).unwrap(), 12);
    }

    #[test]
    fn test_unknown_card() {
        let topology = StaticTopology::new().with_card("#1", 6, 6);
        let result = topology.link_count(&CardId::from("#2"));
        assert!(matches!(result, Err(AlfError::CardNotFound(id)) if id == "#2"));
    }
}
