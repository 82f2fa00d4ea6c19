//! Fixed card directory.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use tessera_core::{Card, CardDirectory, DirectoryError};
use tessera_proto::Identity;

/// Directory answering from cards registered up front. Clones share the
/// same cards.
#[derive(Clone, Default)]
pub struct StaticDirectory {
    cards: Arc<Mutex<HashMap<Identity, Card>>>,
}

impl StaticDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `card`, replacing any earlier card of the same identity.
    pub fn publish(&self, card: Card) {
        self.cards.lock().unwrap_or_else(PoisonError::into_inner).insert(card.identity.clone(), card);
    }
}

#[async_trait]
impl CardDirectory for StaticDirectory {
    async fn find_card(&self, identity: &Identity) -> Result<Card, DirectoryError> {
        self.cards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound { identity: identity.clone() })
    }
}
