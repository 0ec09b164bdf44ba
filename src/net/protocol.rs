use serde::{Deserialize, Serialize};

use crate::lobby::player::{AvatarKind, PeerId, Team};

/// Identifier allocated by the transport for spawned entities
pub type EntityId = u64;

/// Messages broadcast between peers of one session.
///
/// Payloads are minimal: receivers re-read the directory snapshot rather than
/// trust message contents, except for `InstantiateBot`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LobbyMessage {
    /// Some peer wrote to the directory; recompute from a fresh snapshot
    PropertiesChanged,
    /// Enter the match-start countdown
    StartTimer,
    /// Abort the countdown and return to idle
    StopTimer,
    /// One-shot match start; the session is closed
    Activate,
    /// Spawn a filler bot
    InstantiateBot(BotSpawn),
}

impl LobbyMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            LobbyMessage::PropertiesChanged => "PropertiesChanged",
            LobbyMessage::StartTimer => "StartTimer",
            LobbyMessage::StopTimer => "StopTimer",
            LobbyMessage::Activate => "Activate",
            LobbyMessage::InstantiateBot(_) => "InstantiateBot",
        }
    }
}

/// Bot instantiation payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotSpawn {
    pub id: EntityId,
    pub avatar: AvatarKind,
    pub team: Team,
}

/// A message tagged with the peer that broadcast it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: PeerId,
    pub message: LobbyMessage,
}

/// Encode a message using bincode
/// Uses legacy config for fixed-size integers
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message using bincode
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);
