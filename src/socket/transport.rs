//! Transport capabilities the pool relies on.
//!
//! The pool never performs socket I/O itself. It asks a [`Transport`] to
//! start or stop reporting events on an idle socket, to hand a socket over to
//! a new owner, and to close it. One implementation exists per
//! [`TransportKind`]; [`Transports`] bundles them so the pool can dispatch on
//! a key's kind.

use crate::base::neterror::NetError;
use crate::socket::key::TransportKind;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Event delivery mode for a pooled socket.
pub enum SocketOptions<C> {
    /// Report close, error and unexpected data through the notifier.
    Active(Notifier<C>),
    /// Stop reporting events.
    Passive,
}

impl<C> fmt::Debug for SocketOptions<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketOptions::Active(_) => f.write_str("Active"),
            SocketOptions::Passive => f.write_str("Passive"),
        }
    }
}

/// Why an ownership transfer was refused.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum TransferError {
    /// The requesting owner no longer exists. The socket itself is fine.
    #[error("requesting owner is gone")]
    OwnerGone,
    /// The socket could not be handed over; treat it as broken.
    #[error("transfer failed: {0}")]
    Failed(NetError),
}

/// Something that happened to an idle socket while the pool held it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent<C> {
    /// Peer closed the connection.
    Closed(C),
    /// The socket reported an error.
    Error(C, NetError),
    /// Bytes arrived on a socket nobody is reading from.
    UnexpectedData(C),
}

impl<C> SocketEvent<C> {
    pub fn into_conn(self) -> C {
        match self {
            SocketEvent::Closed(c) | SocketEvent::Error(c, _) | SocketEvent::UnexpectedData(c) => c,
        }
    }
}

/// Delivers [`SocketEvent`]s back to the pool that owns an idle socket.
///
/// Sending never blocks. Events for a pool that has shut down are dropped.
pub struct Notifier<C> {
    sink: Arc<dyn Fn(SocketEvent<C>) -> bool + Send + Sync>,
}

impl<C> Clone for Notifier<C> {
    fn clone(&self) -> Self {
        Self { sink: Arc::clone(&self.sink) }
    }
}

impl<C> fmt::Debug for Notifier<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}

impl<C> Notifier<C> {
    pub(crate) fn new(sink: impl Fn(SocketEvent<C>) -> bool + Send + Sync + 'static) -> Self {
        Self { sink: Arc::new(sink) }
    }

    /// Deliver an event. Returns false if the pool is gone.
    pub fn notify(&self, event: SocketEvent<C>) -> bool {
        (self.sink)(event)
    }

    pub fn closed(&self, conn: C) -> bool {
        self.notify(SocketEvent::Closed(conn))
    }

    pub fn errored(&self, conn: C, err: NetError) -> bool {
        self.notify(SocketEvent::Error(conn, err))
    }

    pub fn unexpected_data(&self, conn: C) -> bool {
        self.notify(SocketEvent::UnexpectedData(conn))
    }
}

/// Per-kind socket capabilities, invoked synchronously from the pool task.
///
/// Implementations must not block on the network and must not call back into
/// the pool; events go through the [`Notifier`] handed over in
/// [`SocketOptions::Active`].
pub trait Transport<C, O>: Send + Sync {
    /// Enable or disable event delivery for `conn`.
    fn set_options(&self, conn: &C, opts: SocketOptions<C>);

    /// Make `owner` the consumer of `conn`. Must not close the socket.
    fn transfer_ownership(&self, conn: &C, owner: &O) -> Result<(), TransferError>;

    /// Best-effort close.
    fn close(&self, conn: C);
}

/// One [`Transport`] per [`TransportKind`].
pub struct Transports<C, O> {
    tcp: Arc<dyn Transport<C, O>>,
    tls: Arc<dyn Transport<C, O>>,
}

impl<C, O> Clone for Transports<C, O> {
    fn clone(&self) -> Self {
        Self { tcp: Arc::clone(&self.tcp), tls: Arc::clone(&self.tls) }
    }
}

impl<C, O> Transports<C, O> {
    pub fn new(tcp: Arc<dyn Transport<C, O>>, tls: Arc<dyn Transport<C, O>>) -> Self {
        Self { tcp, tls }
    }

    pub fn for_kind(&self, kind: TransportKind) -> &dyn Transport<C, O> {
        match kind {
            TransportKind::Tcp => self.tcp.as_ref(),
            TransportKind::Tls => self.tls.as_ref(),
        }
    }
}
