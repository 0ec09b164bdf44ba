//! Collaborator callbacks fired by the coordinator
//!
//! Gameplay spawns avatars and bots; chat connects on session entry and
//! disconnects on activation. Neither is otherwise coupled to the lobby.

use tracing::info;

use crate::lobby::coordinator::MatchStart;
use crate::lobby::room::SessionHandle;
use crate::net::protocol::BotSpawn;

pub trait LobbyHooks: Send + Sync {
    /// The local peer entered a session (chat connects here)
    fn on_session_entered(&self, session: &SessionHandle);

    /// Activation observed: spawn the local avatar, disconnect chat
    fn on_match_start(&self, start: &MatchStart);

    /// A filler bot was announced. Only the authoritative peer attaches
    /// the autonomous controller.
    fn on_bot_instantiated(&self, spawn: &BotSpawn, authoritative: bool);
}

/// Hooks that only log, used by the simulation binary
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHooks;

impl LobbyHooks for LoggingHooks {
    fn on_session_entered(&self, session: &SessionHandle) {
        info!("Chat connect for session {}", session.id);
    }

    fn on_match_start(&self, start: &MatchStart) {
        info!(
            "Spawning avatar {:?} for {} on {:?} (leader: {}), {} peers in roster",
            start.local.avatar,
            start.local_peer,
            start.local.team,
            start.is_leader(),
            start.roster.len()
        );
        info!("Chat disconnect for session {}", start.session.id);
    }

    fn on_bot_instantiated(&self, spawn: &BotSpawn, authoritative: bool) {
        info!(
            "Bot {} ({:?}) on {:?}{}",
            spawn.id,
            spawn.avatar,
            spawn.team,
            if authoritative { " with controller" } else { "" }
        );
    }
}

#[cfg(test)]
pub(crate) mod recording {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum HookEvent {
        SessionEntered,
        MatchStarted(MatchStart),
        BotInstantiated { spawn: BotSpawn, authoritative: bool },
    }

    /// Captures every callback for assertions
    #[derive(Debug, Clone, Default)]
    pub struct RecordingHooks {
        events: Arc<Mutex<Vec<HookEvent>>>,
    }

    impl RecordingHooks {
        pub fn events(&self) -> Vec<HookEvent> {
            self.events.lock().clone()
        }

        pub fn match_starts(&self) -> usize {
            self.events
                .lock()
                .iter()
                .filter(|e| matches!(e, HookEvent::MatchStarted(_)))
                .count()
        }

        pub fn bots(&self) -> Vec<(BotSpawn, bool)> {
            self.events
                .lock()
                .iter()
                .filter_map(|e| match e {
                    HookEvent::BotInstantiated {
                        spawn,
                        authoritative,
                    } => Some((*spawn, *authoritative)),
                    _ => None,
                })
                .collect()
        }
    }

    impl LobbyHooks for RecordingHooks {
        fn on_session_entered(&self, _session: &SessionHandle) {
            self.events.lock().push(HookEvent::SessionEntered);
        }

        fn on_match_start(&self, start: &MatchStart) {
            self.events.lock().push(HookEvent::MatchStarted(start.clone()));
        }

        fn on_bot_instantiated(&self, spawn: &BotSpawn, authoritative: bool) {
            self.events.lock().push(HookEvent::BotInstantiated {
                spawn: *spawn,
                authoritative,
            });
        }
    }
}
