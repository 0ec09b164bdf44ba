use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lobby::player::{PeerId, PeerRecord, Team};

/// Reference to a session held in the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle {
    pub id: Uuid,
    /// Even number of slots, split evenly between the two teams
    pub capacity: usize,
    /// Opaque ranking value, only interpreted by the directory's search
    pub filter_bucket: u32,
}

impl SessionHandle {
    /// Slots available to a single team
    pub fn team_capacity(&self) -> usize {
        self.capacity / 2
    }
}

/// Authoritative view of a session as returned by the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub capacity: usize,
    pub is_open: bool,
    /// Peers in join order
    pub peers: Vec<PeerRecord>,
}

impl SessionSnapshot {
    pub fn empty(capacity: usize) -> Self {
        Self {
            capacity,
            is_open: true,
            peers: Vec::new(),
        }
    }

    pub fn get(&self, peer_id: PeerId) -> Option<&PeerRecord> {
        self.peers.iter().find(|p| p.peer_id == peer_id)
    }

    pub fn contains(&self, peer_id: PeerId) -> bool {
        self.get(peer_id).is_some()
    }

    /// Drop a peer from this (local) view
    pub fn remove(&mut self, peer_id: PeerId) -> Option<PeerRecord> {
        let index = self.peers.iter().position(|p| p.peer_id == peer_id)?;
        Some(self.peers.remove(index))
    }

    pub fn connected_count(&self) -> usize {
        self.peers.len()
    }

    pub fn ready_count(&self) -> usize {
        self.peers.iter().filter(|p| p.attributes.ready).count()
    }

    pub fn team_counts(&self) -> TeamCounts {
        let mut counts = TeamCounts::default();
        for peer in &self.peers {
            if let Some(team) = peer.attributes.team {
                counts.increment(team);
            }
        }
        counts
    }

    /// Peers currently claiming leadership
    pub fn leaders(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.iter().filter(|p| p.attributes.is_leader)
    }

    pub fn has_leader(&self) -> bool {
        self.leaders().next().is_some()
    }

    /// Lowest connected peer id, used for optional re-election
    pub fn lowest_peer(&self) -> Option<PeerId> {
        self.peers.iter().map(|p| p.peer_id).min()
    }

    pub fn tally(&self) -> SessionTally {
        SessionTally {
            capacity: self.capacity,
            connected: self.connected_count(),
            ready: self.ready_count(),
            teams: self.team_counts(),
            leader_present: self.has_leader(),
        }
    }
}

/// Number of peers per team
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TeamCounts([usize; 2]);

impl TeamCounts {
    pub fn new(red: usize, blue: usize) -> Self {
        Self([red, blue])
    }

    pub fn get(&self, team: Team) -> usize {
        self.0[team.index()]
    }

    pub fn increment(&mut self, team: Team) {
        self.0[team.index()] += 1;
    }

    pub fn total(&self) -> usize {
        self.0.iter().sum()
    }
}

/// Counts recomputed from a snapshot on every property change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTally {
    pub capacity: usize,
    pub connected: usize,
    pub ready: usize,
    pub teams: TeamCounts,
    pub leader_present: bool,
}

impl SessionTally {
    pub fn is_full(&self) -> bool {
        self.connected >= self.capacity
    }

    /// Every connected peer has readied up
    pub fn all_ready(&self) -> bool {
        self.connected > 0 && self.ready == self.connected
    }
}
