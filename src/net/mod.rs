//! Boundaries to the outside world: the session directory, the broadcast
//! transport, and the message vocabulary carried over it.

pub mod directory;
pub mod protocol;
pub mod transport;
