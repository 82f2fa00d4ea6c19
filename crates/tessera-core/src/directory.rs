//! Lookup of peer cards by identity.

use async_trait::async_trait;
use tessera_proto::Identity;

use crate::{channel::Card, error::DirectoryError};

/// Source of public cards, typically a key server.
#[async_trait]
pub trait CardDirectory: Send + Sync {
    /// Card published by `identity`.
    async fn find_card(&self, identity: &Identity) -> Result<Card, DirectoryError>;
}
