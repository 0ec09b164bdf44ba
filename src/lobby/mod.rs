//! Lobby coordination
//!
//! Team assignment, leader election, readiness, the match-start countdown
//! and bot population for one session, as seen from a single peer.

pub mod bots;
pub mod coordinator;
pub mod countdown;
pub mod hooks;
pub mod manager;
pub mod player;
pub mod room;
pub mod store;
