//! Transports for [`SocketHandle`]s: one for plain TCP, one for TLS.

use crate::base::neterror::NetError;
use crate::socket::config::PoolConfig;
use crate::socket::handle::{SocketHandle, WeakOwner};
use crate::socket::key::TransportKind;
use crate::socket::pool::ClientSocketPool;
use crate::socket::transport::{SocketOptions, TransferError, Transport, Transports};
use std::sync::Arc;

/// A pool of real sockets.
pub type SocketPool = ClientSocketPool<SocketHandle, WeakOwner>;

/// Plain TCP sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

/// TLS sockets. Closing sends close_notify before dropping the stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsTransport;

fn check_kind(conn: &SocketHandle, expected: TransportKind) -> Result<(), TransferError> {
    if conn.kind() == expected {
        Ok(())
    } else {
        tracing::warn!(
            socket = conn.id(),
            kind = %conn.kind(),
            %expected,
            "socket pooled under wrong transport"
        );
        Err(TransferError::Failed(NetError::SocketNotConnected))
    }
}

impl Transport<SocketHandle, WeakOwner> for TcpTransport {
    fn set_options(&self, conn: &SocketHandle, opts: SocketOptions<SocketHandle>) {
        conn.set_options(opts);
    }

    fn transfer_ownership(
        &self,
        conn: &SocketHandle,
        owner: &WeakOwner,
    ) -> Result<(), TransferError> {
        check_kind(conn, TransportKind::Tcp)?;
        conn.assign(owner)
    }

    fn close(&self, conn: SocketHandle) {
        conn.close();
    }
}

impl Transport<SocketHandle, WeakOwner> for TlsTransport {
    fn set_options(&self, conn: &SocketHandle, opts: SocketOptions<SocketHandle>) {
        conn.set_options(opts);
    }

    fn transfer_ownership(
        &self,
        conn: &SocketHandle,
        owner: &WeakOwner,
    ) -> Result<(), TransferError> {
        check_kind(conn, TransportKind::Tls)?;
        conn.assign(owner)
    }

    fn close(&self, conn: SocketHandle) {
        conn.close();
    }
}

/// The standard transport pair for [`SocketPool`].
pub fn socket_transports() -> Transports<SocketHandle, WeakOwner> {
    Transports::new(Arc::new(TcpTransport), Arc::new(TlsTransport))
}

impl SocketPool {
    /// Start a pool of real sockets with the standard transports.
    pub fn with_sockets(config: PoolConfig) -> Self {
        Self::start(config, socket_transports())
    }
}
