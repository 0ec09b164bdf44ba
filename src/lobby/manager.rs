use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::lobby::player::{PeerAttribute, PeerId, PeerRecord};
use crate::lobby::room::{SessionHandle, SessionSnapshot};
use crate::net::directory::{DirectoryError, SessionDirectory};

/// Session as stored by the directory
#[derive(Debug, Clone)]
struct DirectorySession {
    handle: SessionHandle,
    is_open: bool,
    peers: Vec<PeerRecord>,
}

impl DirectorySession {
    fn new(handle: SessionHandle) -> Self {
        Self {
            handle,
            is_open: true,
            peers: Vec::new(),
        }
    }

    fn is_full(&self) -> bool {
        self.peers.len() >= self.handle.capacity
    }

    fn matches(&self, filter_bucket: u32, capacity: usize) -> bool {
        self.is_open
            && !self.is_full()
            && self.handle.filter_bucket == filter_bucket
            && self.handle.capacity == capacity
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            capacity: self.handle.capacity,
            is_open: self.is_open,
            peers: self.peers.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct DirectoryState {
    sessions: HashMap<Uuid, DirectorySession>,
    /// Creation order, so random joins are deterministic in-process
    order: Vec<Uuid>,
}

/// In-process session directory shared by every local peer.
///
/// Cloning is cheap; all clones see the same sessions.
#[derive(Debug, Clone)]
pub struct InMemoryDirectory {
    state: Arc<RwLock<DirectoryState>>,
    max_sessions: usize,
}

impl InMemoryDirectory {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(DirectoryState::default())),
            max_sessions,
        }
    }

    /// Get session count
    pub fn session_count(&self) -> usize {
        self.state.read().sessions.len()
    }

    /// Get total peer count across all sessions
    pub fn total_peer_count(&self) -> usize {
        self.state
            .read()
            .sessions
            .values()
            .map(|s| s.peers.len())
            .sum()
    }

    /// List handles of sessions still accepting peers
    pub fn open_sessions(&self) -> Vec<SessionHandle> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|id| state.sessions.get(id))
            .filter(|s| s.is_open)
            .map(|s| s.handle)
            .collect()
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl SessionDirectory for InMemoryDirectory {
    async fn join_random(
        &self,
        peer_id: PeerId,
        filter_bucket: u32,
        capacity: usize,
    ) -> Result<SessionHandle, DirectoryError> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let session_id = state
            .order
            .iter()
            .copied()
            .find(|id| {
                state
                    .sessions
                    .get(id)
                    .is_some_and(|s| s.matches(filter_bucket, capacity))
            })
            .ok_or(DirectoryError::NotFound)?;

        let session = state
            .sessions
            .get_mut(&session_id)
            .ok_or(DirectoryError::UnknownSession)?;

        if session.peers.iter().any(|p| p.peer_id == peer_id) {
            return Ok(session.handle);
        }

        session.peers.push(PeerRecord::new(peer_id));
        debug!(
            "Peer {} joined session {} ({}/{})",
            peer_id,
            session_id,
            session.peers.len(),
            capacity
        );

        Ok(session.handle)
    }

    async fn create(
        &self,
        peer_id: PeerId,
        capacity: usize,
        filter_bucket: u32,
    ) -> Result<SessionHandle, DirectoryError> {
        let mut state = self.state.write();

        if state.sessions.len() >= self.max_sessions {
            return Err(DirectoryError::TooManySessions);
        }

        let handle = SessionHandle {
            id: Uuid::new_v4(),
            capacity,
            filter_bucket,
        };

        let mut session = DirectorySession::new(handle);
        session.peers.push(PeerRecord::new(peer_id));
        state.sessions.insert(handle.id, session);
        state.order.push(handle.id);

        debug!("Peer {} created session {}", peer_id, handle.id);
        Ok(handle)
    }

    fn snapshot(&self, session: &SessionHandle) -> Result<SessionSnapshot, DirectoryError> {
        self.state
            .read()
            .sessions
            .get(&session.id)
            .map(DirectorySession::snapshot)
            .ok_or(DirectoryError::UnknownSession)
    }

    fn set_self_attribute(&self, session: &SessionHandle, peer_id: PeerId, attribute: PeerAttribute) {
        let mut state = self.state.write();

        let record = state
            .sessions
            .get_mut(&session.id)
            .and_then(|s| s.peers.iter_mut().find(|p| p.peer_id == peer_id));

        match record {
            Some(record) => record.attributes.apply(attribute),
            None => warn!(
                "Dropping attribute write {:?} for {} in session {}: not a member",
                attribute, peer_id, session.id
            ),
        }
    }

    fn leave(&self, session: &SessionHandle, peer_id: PeerId) {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let Some(entry) = state.sessions.get_mut(&session.id) else {
            return;
        };

        entry.peers.retain(|p| p.peer_id != peer_id);

        // Clean up empty sessions
        if entry.peers.is_empty() {
            state.sessions.remove(&session.id);
            state.order.retain(|id| *id != session.id);
            debug!("Session {} removed (empty)", session.id);
        }
    }

    fn close(&self, session: &SessionHandle) {
        if let Some(entry) = self.state.write().sessions.get_mut(&session.id) {
            entry.is_open = false;
        }
    }
}
