//! Filler bots for unoccupied team slots
//!
//! Only the leader runs the population pass, once per session. Every peer
//! instantiates the announced bots; the leader alone drives them.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::lobby::player::{AvatarKind, Team};
use crate::lobby::room::TeamCounts;
use crate::net::protocol::{BotSpawn, EntityId};
use crate::net::transport::BroadcastTransport;

/// Per-team slot deficits derived from final team counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BotFillPlan {
    team_capacity: usize,
    deficits: [usize; 2],
}

impl BotFillPlan {
    pub fn from_counts(capacity: usize, counts: TeamCounts) -> Self {
        let team_capacity = capacity / 2;
        let mut deficits = [0; 2];
        for team in Team::ALL {
            deficits[team.index()] = team_capacity.saturating_sub(counts.get(team));
        }
        Self {
            team_capacity,
            deficits,
        }
    }

    pub fn deficit(&self, team: Team) -> usize {
        self.deficits[team.index()]
    }

    pub fn total(&self) -> usize {
        self.deficits.iter().sum()
    }

    /// One entry per missing slot, Red first
    pub fn slots(&self) -> impl Iterator<Item = Team> + '_ {
        Team::ALL
            .into_iter()
            .flat_map(move |team| std::iter::repeat(team).take(self.deficit(team)))
    }
}

/// Leader-side bot population plus the per-peer dedup of announced bots
#[derive(Debug)]
pub struct BotPopulator {
    rng: StdRng,
    bots_instantiated: bool,
    seen: HashSet<EntityId>,
}

impl BotPopulator {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            bots_instantiated: false,
            seen: HashSet::new(),
        }
    }

    pub fn bots_instantiated(&self) -> bool {
        self.bots_instantiated
    }

    /// Allocate ids and announce one bot per deficit slot.
    ///
    /// Runs at most once; later calls return an empty list. Broadcast failures
    /// are left to the caller to log, the pass still counts as done.
    pub fn populate<F>(
        &mut self,
        plan: &BotFillPlan,
        transport: &dyn BroadcastTransport,
        mut announce: F,
    ) -> Vec<BotSpawn>
    where
        F: FnMut(&BotSpawn),
    {
        if self.bots_instantiated {
            debug!("Bot population already ran, skipping");
            return Vec::new();
        }
        self.bots_instantiated = true;

        let spawns: Vec<BotSpawn> = plan
            .slots()
            .map(|team| BotSpawn {
                id: transport.allocate_entity_id(),
                avatar: self.random_avatar(),
                team,
            })
            .collect();

        for spawn in &spawns {
            announce(spawn);
        }

        info!(
            "Populated {} bots (red {}, blue {}, {} per team)",
            spawns.len(),
            plan.deficit(Team::Red),
            plan.deficit(Team::Blue),
            plan.team_capacity
        );
        spawns
    }

    /// Record an announced bot. Returns false for a duplicate delivery.
    pub fn observe(&mut self, spawn: &BotSpawn) -> bool {
        self.seen.insert(spawn.id)
    }

    pub fn observed_count(&self) -> usize {
        self.seen.len()
    }

    fn random_avatar(&mut self) -> AvatarKind {
        AvatarKind::ALL
            .choose(&mut self.rng)
            .copied()
            .unwrap_or_default()
    }
}
