//! Services run in Docker on behalf of a network session.

pub mod anvil;
