// RLPx authentication handshake: wire messages, state machine and secret derivation.

pub mod messages;
pub mod protocol;
pub mod secrets;
pub mod state;
