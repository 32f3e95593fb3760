// Crypto module declarations

pub mod ecies;
pub mod hash;
pub mod keys;
