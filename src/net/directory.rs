//! Session directory contract
//!
//! The directory is the only authority peers share. Matchmaking search and
//! persistence live behind this trait; the coordinator never trusts message
//! payloads for replicated state and re-reads `snapshot` instead.

use async_trait::async_trait;

use crate::lobby::player::{PeerAttribute, PeerId};
use crate::lobby::room::{SessionHandle, SessionSnapshot};

/// Directory-side session lookup and replicated attribute storage
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    /// Join any open, non-full session matching the bucket and capacity
    async fn join_random(
        &self,
        peer_id: PeerId,
        filter_bucket: u32,
        capacity: usize,
    ) -> Result<SessionHandle, DirectoryError>;

    /// Create a new open session containing only the creator
    async fn create(
        &self,
        peer_id: PeerId,
        capacity: usize,
        filter_bucket: u32,
    ) -> Result<SessionHandle, DirectoryError>;

    /// Current authoritative view of a session
    fn snapshot(&self, session: &SessionHandle) -> Result<SessionSnapshot, DirectoryError>;

    /// Write one attribute of the caller's own record. Fire-and-forget.
    fn set_self_attribute(&self, session: &SessionHandle, peer_id: PeerId, attribute: PeerAttribute);

    /// Remove the peer from the session
    fn leave(&self, session: &SessionHandle, peer_id: PeerId);

    /// Mark the session as no longer joinable
    fn close(&self, session: &SessionHandle);
}

/// Directory errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("No matching session found")]
    NotFound,
    #[error("Unknown session")]
    UnknownSession,
    #[error("Too many sessions")]
    TooManySessions,
    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}
