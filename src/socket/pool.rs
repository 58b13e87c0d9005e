use crate::base::neterror::NetError;
use crate::socket::config::PoolConfig;
use crate::socket::key::PoolKey;
use crate::socket::timer::{CancelOutcome, TimerHandle, TimerId, TimerService};
use crate::socket::transport::{
    Notifier, SocketEvent, SocketOptions, TransferError, Transport, Transports,
};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

/// Anything the pool can hold: a cheap, comparable handle to a socket.
pub trait PoolConn: Clone + Eq + Hash + fmt::Debug + Send + 'static {}

impl<T> PoolConn for T where T: Clone + Eq + Hash + fmt::Debug + Send + 'static {}

/// Result of [`ClientSocketPool::checkout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checkout<C> {
    /// An idle socket, now owned by the requester.
    Reused(C),
    /// Nothing reusable; the caller has to open a new connection.
    NoSocket,
}

impl<C> Checkout<C> {
    pub fn is_reused(&self) -> bool {
        matches!(self, Checkout::Reused(_))
    }

    pub fn into_socket(self) -> Option<C> {
        match self {
            Checkout::Reused(conn) => Some(conn),
            Checkout::NoSocket => None,
        }
    }
}

/// Point-in-time view of a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub name: Option<String>,
    pub pool_size: usize,
    pub idle_timeout: Duration,
    /// Idle sockets across all keys
    pub idle_count: usize,
    /// Keys with at least one idle socket
    pub key_count: usize,
}

enum Command<C, O> {
    Checkout { key: PoolKey, owner: O, reply: oneshot::Sender<Checkout<C>> },
    Release { key: PoolKey, conn: C, reply: oneshot::Sender<()> },
    TotalSize { reply: oneshot::Sender<usize> },
    SizeForKey { key: PoolKey, reply: oneshot::Sender<usize> },
    Stats { reply: oneshot::Sender<PoolStats> },
    Socket(SocketEvent<C>),
    TimerFired { conn: C, timer: TimerId },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Bookkeeping for one idle socket.
struct IdleEntry {
    key: PoolKey,
    timer: TimerHandle,
}

/// Idle sockets per key (most recently released first) plus a reverse index
/// from socket to key and eviction timer. A socket is in `index` iff it is in
/// its key's deque.
struct PoolState<C> {
    idle: HashMap<PoolKey, VecDeque<C>>,
    index: HashMap<C, IdleEntry>,
}

impl<C: PoolConn> PoolState<C> {
    fn new() -> Self {
        Self { idle: HashMap::new(), index: HashMap::new() }
    }

    fn insert(&mut self, key: PoolKey, conn: C, timer: TimerHandle) {
        self.idle.entry(key.clone()).or_default().push_front(conn.clone());
        self.index.insert(conn, IdleEntry { key, timer });
    }

    /// Pop the head of `key`'s deque. The index entry is left in place.
    fn pop_front(&mut self, key: &PoolKey) -> Option<C> {
        let sockets = self.idle.get_mut(key)?;
        let conn = sockets.pop_front();
        if sockets.is_empty() {
            self.idle.remove(key);
        }
        conn
    }

    fn push_front(&mut self, key: &PoolKey, conn: C) {
        self.idle.entry(key.clone()).or_default().push_front(conn);
    }

    fn remove_from_deque(&mut self, key: &PoolKey, conn: &C) {
        if let Some(sockets) = self.idle.get_mut(key) {
            sockets.retain(|c| c != conn);
            if sockets.is_empty() {
                self.idle.remove(key);
            }
        }
    }

    fn size_for_key(&self, key: &PoolKey) -> usize {
        self.idle.get(key).map_or(0, VecDeque::len)
    }
}

/// The task that owns all pool state. Every command is handled to completion
/// before the next one is received.
struct PoolManager<C, O> {
    config: PoolConfig,
    transports: Transports<C, O>,
    timers: TimerService<C>,
    notifier: Notifier<C>,
    state: PoolState<C>,
}

impl<C: PoolConn, O: Send + 'static> PoolManager<C, O> {
    fn new(
        config: PoolConfig,
        transports: Transports<C, O>,
        mailbox: mpsc::WeakUnboundedSender<Command<C, O>>,
    ) -> Self {
        let timer_mailbox = mailbox.clone();
        let timers = TimerService::new(move |timer, conn| {
            if let Some(tx) = timer_mailbox.upgrade() {
                let _ = tx.send(Command::TimerFired { conn, timer });
            }
        });
        let notifier = Notifier::new(move |event| match mailbox.upgrade() {
            Some(tx) => tx.send(Command::Socket(event)).is_ok(),
            None => false,
        });

        Self { config, transports, timers, notifier, state: PoolState::new() }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command<C, O>>) {
        debug!(
            name = ?self.config.name,
            idle_timeout = ?self.config.idle_timeout,
            "socket pool started"
        );

        while let Some(command) = rx.recv().await {
            match command {
                Command::Checkout { key, owner, reply } => self.checkout(key, owner, reply),
                Command::Release { key, conn, reply } => {
                    self.release(key, conn);
                    let _ = reply.send(());
                }
                Command::TotalSize { reply } => {
                    let _ = reply.send(self.state.index.len());
                }
                Command::SizeForKey { key, reply } => {
                    let _ = reply.send(self.state.size_for_key(&key));
                }
                Command::Stats { reply } => {
                    let _ = reply.send(self.stats());
                }
                Command::Socket(event) => {
                    trace!(?event, "socket event on idle socket");
                    self.remove_connection(&event.into_conn());
                }
                Command::TimerFired { conn, timer } => self.on_timer(conn, timer),
                Command::Shutdown { reply } => {
                    self.shutdown();
                    let _ = reply.send(());
                    return;
                }
            }
        }

        // Every handle is gone.
        self.shutdown();
    }

    fn transport(&self, key: &PoolKey) -> &dyn Transport<C, O> {
        self.transports.for_kind(key.kind())
    }

    fn checkout(&mut self, key: PoolKey, owner: O, reply: oneshot::Sender<Checkout<C>>) {
        loop {
            let Some(conn) = self.state.pop_front(&key) else {
                trace!(%key, "no idle socket");
                let _ = reply.send(Checkout::NoSocket);
                return;
            };

            let transport = self.transports.for_kind(key.kind());
            transport.set_options(&conn, SocketOptions::Passive);

            // A caller that stopped waiting for the reply is as gone as an
            // owner the transport rejects.
            let outcome = if reply.is_closed() {
                Err(TransferError::OwnerGone)
            } else {
                transport.transfer_ownership(&conn, &owner)
            };

            match outcome {
                Ok(()) => {
                    if let Some(entry) = self.state.index.remove(&conn) {
                        self.cancel_timer(&conn, entry.timer);
                    }
                    debug!(%key, ?conn, "reusing idle socket");
                    if let Err(Checkout::Reused(conn)) = reply.send(Checkout::Reused(conn)) {
                        debug!(%key, ?conn, "requester went away after transfer, closing socket");
                        transport.close(conn);
                    }
                    return;
                }
                Err(TransferError::OwnerGone) => {
                    debug!(%key, ?conn, "requesting owner is gone, keeping socket idle");
                    transport.set_options(&conn, SocketOptions::Active(self.notifier.clone()));
                    self.state.push_front(&key, conn);
                    let _ = reply.send(Checkout::NoSocket);
                    return;
                }
                Err(TransferError::Failed(err)) => {
                    warn!(
                        %key, ?conn, error = %err,
                        "idle socket failed ownership transfer, discarding"
                    );
                    if let Some(entry) = self.state.index.remove(&conn) {
                        self.cancel_timer(&conn, entry.timer);
                    }
                    transport.close(conn);
                }
            }
        }
    }

    fn release(&mut self, key: PoolKey, conn: C) {
        // Releasing a socket that is already idle moves it to the head of
        // the (possibly different) key.
        if let Some(entry) = self.state.index.remove(&conn) {
            self.cancel_timer(&conn, entry.timer);
            self.state.remove_from_deque(&entry.key, &conn);
        }

        let timer = self.timers.schedule_after(self.config.idle_timeout, conn.clone());
        self.transport(&key).set_options(&conn, SocketOptions::Active(self.notifier.clone()));
        debug!(%key, ?conn, "socket returned to pool");
        self.state.insert(key, conn, timer);
    }

    fn on_timer(&mut self, conn: C, timer: TimerId) {
        let current =
            self.state.index.get(&conn).map(|entry| (entry.timer.id(), entry.key.clone()));
        match current {
            Some((id, key)) if id == timer => {
                debug!(%key, ?conn, "evicting idle socket");
                self.remove_connection(&conn);
            }
            _ => trace!(?conn, "ignoring stale idle timer"),
        }
    }

    /// Drop `conn` from pool state and close it. Unknown sockets are ignored,
    /// so late or duplicate notifications are harmless.
    fn remove_connection(&mut self, conn: &C) {
        let Some(entry) = self.state.index.remove(conn) else {
            trace!(?conn, "socket already removed");
            return;
        };
        self.cancel_timer(conn, entry.timer);
        self.state.remove_from_deque(&entry.key, conn);

        let transport = self.transport(&entry.key);
        transport.set_options(conn, SocketOptions::Passive);
        transport.close(conn.clone());
    }

    fn cancel_timer(&self, conn: &C, timer: TimerHandle) {
        // A timer that already fired has a TimerFired in the mailbox; its id
        // no longer matches any index entry, so `on_timer` will skip it.
        if self.timers.cancel(timer) == CancelOutcome::AlreadyFired {
            trace!(?conn, "idle timer already fired");
        }
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            name: self.config.name.clone(),
            pool_size: self.config.pool_size,
            idle_timeout: self.config.idle_timeout,
            idle_count: self.state.index.len(),
            key_count: self.state.idle.len(),
        }
    }

    fn shutdown(&mut self) {
        let count = self.state.index.len();
        self.state.idle.clear();
        for (conn, entry) in std::mem::take(&mut self.state.index) {
            self.cancel_timer(&conn, entry.timer);
            self.transports.for_kind(entry.key.kind()).close(conn);
        }
        debug!(name = ?self.config.name, closed = count, "socket pool stopped");
    }
}

/// Handle to a running socket pool.
///
/// Cheap to clone; every clone talks to the same pool task. The pool shuts
/// down, closing all idle sockets, on [`shutdown`](Self::shutdown) or once
/// the last handle is dropped.
pub struct ClientSocketPool<C, O> {
    tx: mpsc::UnboundedSender<Command<C, O>>,
    name: Option<String>,
}

impl<C, O> Clone for ClientSocketPool<C, O> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone(), name: self.name.clone() }
    }
}

impl<C, O> fmt::Debug for ClientSocketPool<C, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSocketPool")
            .field("name", &self.name)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<C: PoolConn, O: Send + 'static> ClientSocketPool<C, O> {
    /// Spawn a pool task on the current tokio runtime.
    pub fn start(config: PoolConfig, transports: Transports<C, O>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let name = config.name.clone();
        let manager = PoolManager::new(config, transports, tx.downgrade());
        tokio::spawn(manager.run(rx));
        Self { tx, name }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// True once the pool task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn call<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> Command<C, O>,
    ) -> Result<R, NetError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(command(reply)).map_err(|_| NetError::PoolClosed)?;
        rx.await.map_err(|_| NetError::PoolClosed)
    }

    /// Take the most recently released idle socket for `key` and hand it to
    /// `owner`.
    pub async fn checkout(&self, key: &PoolKey, owner: O) -> Result<Checkout<C>, NetError> {
        let key = key.clone();
        self.call(|reply| Command::Checkout { key, owner, reply }).await
    }

    /// Return a socket the caller owns to the idle set for `key`.
    pub async fn release(&self, key: &PoolKey, conn: C) -> Result<(), NetError> {
        let key = key.clone();
        self.call(|reply| Command::Release { key, conn, reply }).await
    }

    /// Idle sockets across all keys.
    pub async fn total_size(&self) -> Result<usize, NetError> {
        self.call(|reply| Command::TotalSize { reply }).await
    }

    pub async fn size_for_key(&self, key: &PoolKey) -> Result<usize, NetError> {
        let key = key.clone();
        self.call(|reply| Command::SizeForKey { key, reply }).await
    }

    pub async fn stats(&self) -> Result<PoolStats, NetError> {
        self.call(|reply| Command::Stats { reply }).await
    }

    /// Close every idle socket and stop the pool task.
    pub async fn shutdown(&self) -> Result<(), NetError> {
        self.call(|reply| Command::Shutdown { reply }).await
    }
}
