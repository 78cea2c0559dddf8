//! TCP listener and attach handshake

pub mod handshake;
pub mod server;

pub use server::serve;
