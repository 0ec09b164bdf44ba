//! Match Lobby Library
//!
//! Peer-side coordination of a two-team match lobby over a best-effort
//! broadcast transport and a shared session directory.
//!
//! Each peer runs a `SessionCoordinator`. Peers agree on teams, readiness and
//! a single leader by re-reading the directory snapshot whenever anyone
//! writes, and convert "session full" or "everyone ready" into exactly one
//! activation, after which the leader fills empty slots with bots.

pub mod config;
pub mod lobby;
pub mod metrics;
pub mod net;

pub use config::LobbyConfig;
pub use lobby::coordinator::{LobbyContext, LobbyError, MatchStart, SessionCoordinator};
pub use lobby::manager::InMemoryDirectory;
pub use net::transport::LocalBus;
