//! Broadcast transport
//!
//! Contract: at-least-once delivery of broadcasts to every connected peer of a
//! session (sender included), FIFO per sender, no ordering across senders.
//! `LocalBus` is the in-process adapter used by the simulation binary and the
//! tests; it meets the contract with one unbounded channel per endpoint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::lobby::player::PeerId;
use crate::lobby::room::SessionHandle;
use crate::net::protocol::{decode, encode, EncodeError, EntityId, Envelope, LobbyMessage};

/// Something a peer's processing loop has to react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Message { sender: PeerId, message: LobbyMessage },
    PeerDeparted(PeerId),
}

/// Message delivery between the peers of one session
pub trait BroadcastTransport: Send {
    /// Identity of the local peer
    fn local_peer(&self) -> PeerId;

    /// Join the broadcast group of a session
    fn connect(&mut self, session: &SessionHandle) -> Result<(), TransportError>;

    /// Leave the broadcast group; remaining members observe a departure
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Fire-and-forget broadcast to every connected peer, including self
    fn broadcast(&self, message: &LobbyMessage) -> Result<(), TransportError>;

    /// Non-blocking receive
    fn try_recv(&mut self) -> Option<Incoming>;

    /// Allocate a fresh id for a spawned entity, unique across the transport
    fn allocate_entity_id(&self) -> EntityId;
}

/// Transport errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Not connected to a session")]
    NotConnected,
    #[error("Failed to encode message: {0}")]
    Encode(#[from] EncodeError),
}

#[derive(Debug)]
enum Frame {
    Data(Vec<u8>),
    Departed(PeerId),
}

#[derive(Debug, Default)]
struct BusState {
    /// Members per session, keyed by peer
    groups: HashMap<Uuid, HashMap<PeerId, UnboundedSender<Frame>>>,
}

/// In-process broadcast bus shared by all local endpoints
#[derive(Debug, Clone)]
pub struct LocalBus {
    state: Arc<RwLock<BusState>>,
    next_entity_id: Arc<AtomicU64>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(BusState::default())),
            next_entity_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Create an unconnected endpoint for a peer
    pub fn endpoint(&self, peer_id: PeerId) -> BusEndpoint {
        BusEndpoint {
            bus: self.clone(),
            peer_id,
            session: None,
            receiver: None,
        }
    }

    /// Number of endpoints connected to a session
    pub fn member_count(&self, session_id: Uuid) -> usize {
        self.state
            .read()
            .groups
            .get(&session_id)
            .map_or(0, HashMap::len)
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One peer's attachment to a `LocalBus`
#[derive(Debug)]
pub struct BusEndpoint {
    bus: LocalBus,
    peer_id: PeerId,
    session: Option<Uuid>,
    receiver: Option<UnboundedReceiver<Frame>>,
}

impl BroadcastTransport for BusEndpoint {
    fn local_peer(&self) -> PeerId {
        self.peer_id
    }

    fn connect(&mut self, session: &SessionHandle) -> Result<(), TransportError> {
        if self.session.is_some() {
            self.disconnect();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.bus
            .state
            .write()
            .groups
            .entry(session.id)
            .or_default()
            .insert(self.peer_id, tx);

        self.session = Some(session.id);
        self.receiver = Some(rx);
        debug!("Peer {} connected to bus for session {}", self.peer_id, session.id);
        Ok(())
    }

    fn disconnect(&mut self) {
        let Some(session_id) = self.session.take() else {
            return;
        };
        self.receiver = None;

        let mut state = self.bus.state.write();
        let Some(group) = state.groups.get_mut(&session_id) else {
            return;
        };

        group.remove(&self.peer_id);
        for (peer, tx) in group.iter() {
            if tx.send(Frame::Departed(self.peer_id)).is_err() {
                debug!("Departure notice to {} dropped: receiver gone", peer);
            }
        }

        if group.is_empty() {
            state.groups.remove(&session_id);
        }
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn broadcast(&self, message: &LobbyMessage) -> Result<(), TransportError> {
        let session_id = self.session.ok_or(TransportError::NotConnected)?;

        let bytes = encode(&Envelope {
            sender: self.peer_id,
            message: message.clone(),
        })?;

        let state = self.bus.state.read();
        let group = state
            .groups
            .get(&session_id)
            .ok_or(TransportError::NotConnected)?;

        for (peer, tx) in group.iter() {
            if tx.send(Frame::Data(bytes.clone())).is_err() {
                warn!("Broadcast to {}: receiver gone", peer);
            }
        }

        Ok(())
    }

    fn try_recv(&mut self) -> Option<Incoming> {
        let receiver = self.receiver.as_mut()?;

        loop {
            match receiver.try_recv() {
                Ok(Frame::Data(bytes)) => match decode::<Envelope>(&bytes) {
                    Ok(envelope) => {
                        return Some(Incoming::Message {
                            sender: envelope.sender,
                            message: envelope.message,
                        })
                    }
                    Err(e) => {
                        warn!("Peer {}: dropping undecodable frame: {}", self.peer_id, e);
                    }
                },
                Ok(Frame::Departed(peer)) => return Some(Incoming::PeerDeparted(peer)),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            }
        }
    }

    fn allocate_entity_id(&self) -> EntityId {
        self.bus.next_entity_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Drop for BusEndpoint {
    fn drop(&mut self) {
        self.disconnect();
    }
}
