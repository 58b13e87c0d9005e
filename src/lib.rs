//! # sockpool
//!
//! The idle-connection pool of a Chromium-inspired HTTP client.
//!
//! Callers open sockets themselves and hand them to the pool when a request
//! is done; the next request for the same destination (transport, host,
//! port) gets the most recently returned socket back. Idle sockets are
//! evicted after a timeout, or as soon as the peer closes them.
//!
//! All pool state lives in one tokio task. The [`ClientSocketPool`] handle
//! sends it requests and awaits replies, so no two operations ever touch the
//! pool at the same time.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sockpool::socket::config::PoolConfig;
//! use sockpool::socket::handle::{SocketHandle, SocketOwner};
//! use sockpool::socket::key::PoolKey;
//! use sockpool::socket::pool::Checkout;
//! use sockpool::socket::tcp::SocketPool;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = SocketPool::with_sockets(PoolConfig::default());
//!     let key = PoolKey::tcp("example.com", 80);
//!     let me = SocketOwner::new();
//!
//!     let socket = match pool.checkout(&key, me.downgrade()).await? {
//!         Checkout::Reused(handle) => handle.take(&me).await?,
//!         Checkout::NoSocket => tokio::net::TcpStream::connect("example.com:80").await?.into(),
//!     };
//!
//!     // ... use the socket, then give it back
//!     pool.release(&key, SocketHandle::new(socket, &me)).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error definitions
//! - [`socket`] - The pool, its collaborators, and TCP/TLS socket handles
//!
//! [`ClientSocketPool`]: socket::pool::ClientSocketPool

pub mod base;
pub mod socket;
