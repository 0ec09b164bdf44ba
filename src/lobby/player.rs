use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity of a connected peer
pub type PeerId = Uuid;

/// One of the two sides in a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Team {
    Red,
    Blue,
}

impl Team {
    pub const ALL: [Team; 2] = [Team::Red, Team::Blue];

    /// Map an arbitrary index onto a team (even = Red, odd = Blue)
    pub fn from_index(index: usize) -> Self {
        if index % 2 == 0 {
            Team::Red
        } else {
            Team::Blue
        }
    }

    pub fn index(self) -> usize {
        match self {
            Team::Red => 0,
            Team::Blue => 1,
        }
    }

    pub fn other(self) -> Self {
        match self {
            Team::Red => Team::Blue,
            Team::Blue => Team::Red,
        }
    }
}

/// Playable avatar archetype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AvatarKind {
    Scout,
    #[default]
    Soldier,
    Heavy,
    Medic,
}

impl AvatarKind {
    pub const ALL: [AvatarKind; 4] = [
        AvatarKind::Scout,
        AvatarKind::Soldier,
        AvatarKind::Heavy,
        AvatarKind::Medic,
    ];
}

/// A single replicated attribute write.
///
/// Records travel through the directory one field at a time so that each
/// write is last-write-wins on its own key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerAttribute {
    Team(Team),
    Avatar(AvatarKind),
    Ready(bool),
    Leader(bool),
}

/// Replicated per-peer record. Only the owning peer writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeerAttributes {
    /// Unassigned until the owning peer publishes its join record
    pub team: Option<Team>,
    pub avatar: AvatarKind,
    pub ready: bool,
    pub is_leader: bool,
}

impl PeerAttributes {
    /// Serialize the record field by field
    pub fn entries(&self) -> Vec<PeerAttribute> {
        let mut entries = Vec::with_capacity(4);
        if let Some(team) = self.team {
            entries.push(PeerAttribute::Team(team));
        }
        entries.push(PeerAttribute::Avatar(self.avatar));
        entries.push(PeerAttribute::Ready(self.ready));
        entries.push(PeerAttribute::Leader(self.is_leader));
        entries
    }

    /// Fold one attribute write into the record
    pub fn apply(&mut self, attribute: PeerAttribute) {
        match attribute {
            PeerAttribute::Team(team) => self.team = Some(team),
            PeerAttribute::Avatar(avatar) => self.avatar = avatar,
            PeerAttribute::Ready(ready) => self.ready = ready,
            PeerAttribute::Leader(is_leader) => self.is_leader = is_leader,
        }
    }
}

/// A peer as it appears in a directory snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub peer_id: PeerId,
    pub attributes: PeerAttributes,
}

impl PeerRecord {
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            attributes: PeerAttributes::default(),
        }
    }

    pub fn is_on(&self, team: Team) -> bool {
        self.attributes.team == Some(team)
    }
}
