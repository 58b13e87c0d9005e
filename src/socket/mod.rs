//! Socket pooling.
//!
//! Keeps established sockets around for reuse, mirroring the idle-socket
//! half of Chromium's `net/socket/`:
//! - [`pool`]: the pool task and its [`ClientSocketPool`](pool::ClientSocketPool) handle
//! - [`key`]: which destination a socket can be reused for
//! - [`transport`]: what the pool needs from a socket implementation
//! - [`timer`]: idle eviction timers
//! - [`handle`], [`tcp`]: TCP and TLS sockets as poolable handles
//! - [`registry`]: pools addressed by name

pub mod client;
pub mod config;
pub mod handle;
pub mod key;
pub mod pool;
pub mod registry;
pub mod tcp;
pub mod timer;
pub mod transport;

#[cfg(test)]
mod tests;
