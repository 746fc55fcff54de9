//! The signing capability consumed by authenticated backends.
//!
//! A signer may or may not be connected at any given time.  Absence must
//! degrade gated operations to cache-only behaviour, never panic; the
//! core checks [`medley_shared::Server::needs_signer`] before fetching.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// An unsigned event handed to the signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTemplate {
    pub kind: u16,
    pub content: String,
    pub tags: Vec<Vec<String>>,
    /// Unix timestamp (seconds).
    pub created_at: i64,
}

/// A signed event returned by the signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedEvent {
    pub id: String,
    pub pubkey: String,
    pub sig: String,
    pub kind: u16,
    pub content: String,
    pub tags: Vec<Vec<String>>,
    pub created_at: i64,
}

/// Capability to sign event templates for authenticated requests.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign an event template.  May suspend while the user approves the
    /// request in their signer application.
    async fn sign(&self, template: EventTemplate) -> Result<SignedEvent, BackendError>;

    /// The hex public key this signer signs as.
    fn pubkey(&self) -> String;
}
