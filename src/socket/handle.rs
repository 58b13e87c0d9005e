//! Poolable handles around live sockets.
//!
//! A [`SocketHandle`] parks its socket inside a watcher task. While the pool
//! has event delivery switched on, the watcher peeks the raw TCP stream and
//! reports EOF, errors, or stray bytes through the pool's [`Notifier`]. The
//! current [`SocketOwner`] gets the socket back with [`SocketHandle::take`].

use crate::base::neterror::NetError;
use crate::socket::client::SocketType;
use crate::socket::key::TransportKind;
use crate::socket::transport::{Notifier, SocketEvent, SocketOptions, TransferError};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

/// Upper bound on a graceful shutdown (TLS close_notify) when closing.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Identity of whoever may use a checked-out socket.
///
/// Keep it alive for as long as you want to receive sockets; the pool only
/// sees a [`WeakOwner`] and refuses to transfer to a dropped owner.
#[derive(Debug)]
pub struct SocketOwner {
    id: Arc<u64>,
}

impl Default for SocketOwner {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketOwner {
    pub fn new() -> Self {
        Self { id: Arc::new(NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed)) }
    }

    pub fn id(&self) -> u64 {
        *self.id
    }

    pub fn downgrade(&self) -> WeakOwner {
        WeakOwner { id: *self.id, alive: Arc::downgrade(&self.id) }
    }
}

/// Non-owning reference to a [`SocketOwner`].
#[derive(Debug, Clone)]
pub struct WeakOwner {
    id: u64,
    alive: Weak<u64>,
}

impl WeakOwner {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        self.alive.strong_count() > 0
    }
}

/// What the watcher task should be doing.
enum Watch {
    Passive,
    Active(Notifier<SocketHandle>),
    Release,
}

enum Slot {
    Running { ctl: watch::Sender<Watch>, task: JoinHandle<SocketType> },
    Gone,
}

struct HandleInner {
    id: u64,
    kind: TransportKind,
    /// Current owner id, 0 while nobody holds it.
    owner: AtomicU64,
    /// NetError code of the first event seen while idle, 0 if healthy.
    fault: AtomicI32,
    slot: Mutex<Slot>,
}

/// Cloneable reference to a socket; equality and hashing use the socket's
/// identity, not its state.
#[derive(Clone)]
pub struct SocketHandle {
    inner: Arc<HandleInner>,
}

impl PartialEq for SocketHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for SocketHandle {}

impl Hash for SocketHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketHandle")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .finish()
    }
}

impl SocketHandle {
    /// Wrap an established socket owned by `owner`. Must be called from
    /// within a tokio runtime.
    pub fn new(socket: SocketType, owner: &SocketOwner) -> Self {
        let kind = socket.kind();
        let (ctl, rx) = watch::channel(Watch::Passive);
        let inner = Arc::new_cyclic(|weak: &Weak<HandleInner>| {
            let task = tokio::spawn(watch_socket(socket, weak.clone(), rx));
            HandleInner {
                id: NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed),
                kind,
                owner: AtomicU64::new(owner.id()),
                fault: AtomicI32::new(0),
                slot: Mutex::new(Slot::Running { ctl, task }),
            }
        });
        Self { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn kind(&self) -> TransportKind {
        self.inner.kind
    }

    pub fn is_owned_by(&self, owner: &SocketOwner) -> bool {
        self.inner.owner.load(Ordering::Acquire) == owner.id()
    }

    /// The event that marked this socket unusable while it sat idle.
    pub fn fault(&self) -> Option<NetError> {
        match self.inner.fault.load(Ordering::Acquire) {
            0 => None,
            code => Some(NetError::from(code)),
        }
    }

    /// Get the socket back out of the handle. Only the current owner may do
    /// this, and only once.
    pub async fn take(&self, owner: &SocketOwner) -> Result<SocketType, NetError> {
        if !self.is_owned_by(owner) {
            return Err(NetError::NotOwner);
        }
        let task = self.stop().ok_or(NetError::SocketNotConnected)?;
        task.await.map_err(|_| NetError::ConnectionAborted)
    }

    pub(crate) fn set_options(&self, opts: SocketOptions<SocketHandle>) {
        let mode = match opts {
            // Delivery goes to the pool, so the pool is the owner now.
            SocketOptions::Active(notifier) => {
                self.inner.owner.store(0, Ordering::Release);
                Watch::Active(notifier)
            }
            SocketOptions::Passive => Watch::Passive,
        };
        let slot = self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Slot::Running { ctl, .. } = &*slot {
            ctl.send_replace(mode);
        }
    }

    pub(crate) fn assign(&self, owner: &WeakOwner) -> Result<(), TransferError> {
        if !owner.is_alive() {
            return Err(TransferError::OwnerGone);
        }
        if let Some(err) = self.fault() {
            return Err(TransferError::Failed(err));
        }
        let slot = self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match &*slot {
            Slot::Running { task, .. } if !task.is_finished() => {
                self.inner.owner.store(owner.id(), Ordering::Release);
                Ok(())
            }
            _ => Err(TransferError::Failed(NetError::SocketNotConnected)),
        }
    }

    /// Shut the socket down in the background and drop it.
    pub(crate) fn close(&self) {
        self.inner.owner.store(0, Ordering::Release);
        let Some(task) = self.stop() else {
            return;
        };
        tokio::spawn(async move {
            if let Ok(mut socket) = task.await {
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, socket.shutdown()).await;
            }
        });
    }

    fn stop(&self) -> Option<JoinHandle<SocketType>> {
        let mut slot = self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *slot, Slot::Gone) {
            Slot::Running { ctl, task } => {
                ctl.send_replace(Watch::Release);
                Some(task)
            }
            Slot::Gone => None,
        }
    }
}

enum Wakeup {
    Control(bool),
    Probe(io::Result<usize>),
}

/// Holds the socket while it is pooled. Probes peek the raw TCP stream, so
/// for TLS any unread record from the peer, including post-handshake session
/// tickets, is reported as [`SocketEvent::UnexpectedData`].
async fn watch_socket(
    socket: SocketType,
    handle: Weak<HandleInner>,
    mut ctl: watch::Receiver<Watch>,
) -> SocketType {
    let mut buf = [0u8; 1];
    loop {
        let notifier = match &*ctl.borrow_and_update() {
            Watch::Release => return socket,
            Watch::Passive => None,
            Watch::Active(notifier) => Some(notifier.clone()),
        };

        let Some(notifier) = notifier else {
            if ctl.changed().await.is_err() {
                return socket;
            }
            continue;
        };

        let wakeup = tokio::select! {
            changed = ctl.changed() => Wakeup::Control(changed.is_ok()),
            probe = socket.tcp().peek(&mut buf) => Wakeup::Probe(probe),
        };

        match wakeup {
            Wakeup::Control(true) => continue,
            Wakeup::Control(false) => return socket,
            Wakeup::Probe(probe) => {
                let Some(inner) = handle.upgrade() else {
                    return socket;
                };
                let conn = SocketHandle { inner };
                let event = match probe {
                    Ok(0) => SocketEvent::Closed(conn.clone()),
                    Ok(_) => SocketEvent::UnexpectedData(conn.clone()),
                    Err(e) => SocketEvent::Error(conn.clone(), NetError::from_io(&e)),
                };
                let fault = match &event {
                    SocketEvent::Closed(_) => NetError::SocketRemoteClosed,
                    SocketEvent::UnexpectedData(_) => NetError::DataReceivedUnexpectedly,
                    SocketEvent::Error(_, err) => *err,
                };
                tracing::debug!(socket = conn.id(), error = %fault, "idle socket unusable");
                conn.inner.fault.store(fault.as_i32(), Ordering::Release);
                notifier.notify(event);
                drop(conn);

                // Wait for the pool to react instead of probing again.
                if ctl.changed().await.is_err() {
                    return socket;
                }
            }
        }
    }
}
