use std::sync::Arc;

use tracing::debug;

use crate::lobby::player::{PeerAttribute, PeerAttributes, PeerId};
use crate::lobby::room::SessionHandle;
use crate::net::directory::SessionDirectory;

/// Writer for the local peer's own replicated record.
///
/// Keeps a local copy of what was last published so callers can read their
/// own attributes without waiting for the directory to reflect them.
pub struct PeerAttributeStore {
    directory: Arc<dyn SessionDirectory>,
    session: SessionHandle,
    peer_id: PeerId,
    local: PeerAttributes,
}

impl PeerAttributeStore {
    pub fn new(directory: Arc<dyn SessionDirectory>, session: SessionHandle, peer_id: PeerId) -> Self {
        Self {
            directory,
            session,
            peer_id,
            local: PeerAttributes::default(),
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Last values written by this peer
    pub fn local(&self) -> &PeerAttributes {
        &self.local
    }

    /// Apply locally and publish to the directory
    pub fn write(&mut self, attribute: PeerAttribute) {
        self.local.apply(attribute);
        self.directory
            .set_self_attribute(&self.session, self.peer_id, attribute);
        debug!("Peer {} wrote {:?}", self.peer_id, attribute);
    }

    /// Publish a whole record field by field
    pub fn write_all(&mut self, attributes: &PeerAttributes) {
        for entry in attributes.entries() {
            self.write(entry);
        }
    }
}
