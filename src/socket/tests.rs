use crate::base::neterror::NetError;
use crate::socket::config::PoolConfig;
use crate::socket::key::PoolKey;
use crate::socket::pool::{Checkout, ClientSocketPool};
use crate::socket::transport::{Notifier, SocketOptions, TransferError, Transport, Transports};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::task::Poll;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MockConn(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MockOwner(u32);

#[derive(Default)]
struct MockState {
    active: HashMap<MockConn, Notifier<MockConn>>,
    latest: Option<Notifier<MockConn>>,
    broken: HashSet<MockConn>,
    dead_owners: HashSet<MockOwner>,
    transfers: Vec<(MockConn, MockOwner)>,
    closed: Vec<MockConn>,
}

/// Parks the next ownership transfer until the test lets it continue.
struct TransferGate {
    entered: std_mpsc::Sender<()>,
    resume: std_mpsc::Receiver<()>,
}

#[derive(Default)]
struct MockTransport {
    state: Mutex<MockState>,
    gate: Mutex<Option<TransferGate>>,
}

impl MockTransport {
    fn break_conn(&self, conn: MockConn) {
        self.state.lock().unwrap().broken.insert(conn);
    }

    fn kill_owner(&self, owner: MockOwner) {
        self.state.lock().unwrap().dead_owners.insert(owner);
    }

    fn notifier(&self, conn: MockConn) -> Notifier<MockConn> {
        self.state.lock().unwrap().active.get(&conn).cloned().expect("delivery not enabled")
    }

    /// The pool's notifier, whichever socket it was last handed to.
    fn latest_notifier(&self) -> Notifier<MockConn> {
        self.state.lock().unwrap().latest.clone().expect("delivery never enabled")
    }

    /// Block the pool task inside the next transfer. Returns a receiver that
    /// fires once it is inside and a sender that lets it finish.
    fn hold_next_transfer(&self) -> (std_mpsc::Receiver<()>, std_mpsc::Sender<()>) {
        let (entered, entered_rx) = std_mpsc::channel();
        let (resume_tx, resume) = std_mpsc::channel();
        *self.gate.lock().unwrap() = Some(TransferGate { entered, resume });
        (entered_rx, resume_tx)
    }

    fn is_active(&self, conn: MockConn) -> bool {
        self.state.lock().unwrap().active.contains_key(&conn)
    }

    fn closed(&self) -> Vec<MockConn> {
        self.state.lock().unwrap().closed.clone()
    }

    fn transfers(&self) -> Vec<(MockConn, MockOwner)> {
        self.state.lock().unwrap().transfers.clone()
    }
}

impl Transport<MockConn, MockOwner> for MockTransport {
    fn set_options(&self, conn: &MockConn, opts: SocketOptions<MockConn>) {
        let mut state = self.state.lock().unwrap();
        match opts {
            SocketOptions::Active(notifier) => {
                state.latest = Some(notifier.clone());
                state.active.insert(*conn, notifier);
            }
            SocketOptions::Passive => {
                state.active.remove(conn);
            }
        }
    }

    fn transfer_ownership(&self, conn: &MockConn, owner: &MockOwner) -> Result<(), TransferError> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.entered.send(());
            let _ = gate.resume.recv();
        }
        let mut state = self.state.lock().unwrap();
        if state.dead_owners.contains(owner) {
            return Err(TransferError::OwnerGone);
        }
        if state.broken.contains(conn) {
            return Err(TransferError::Failed(NetError::ConnectionReset));
        }
        state.transfers.push((*conn, *owner));
        Ok(())
    }

    fn close(&self, conn: MockConn) {
        let mut state = self.state.lock().unwrap();
        state.active.remove(&conn);
        state.closed.push(conn);
    }
}

const IDLE: Duration = Duration::from_millis(5000);
const OWNER: MockOwner = MockOwner(1);

fn start_pool(config: PoolConfig) -> (ClientSocketPool<MockConn, MockOwner>, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::default());
    let transports: Transports<MockConn, MockOwner> =
        Transports::new(transport.clone(), transport.clone());
    (ClientSocketPool::start(config, transports), transport)
}

fn start() -> (ClientSocketPool<MockConn, MockOwner>, Arc<MockTransport>) {
    start_pool(PoolConfig::new().with_idle_timeout(IDLE))
}

fn key_a() -> PoolKey {
    PoolKey::tcp("a", 80)
}

#[tokio::test]
async fn test_release_then_checkout_returns_same_socket() {
    let (pool, transport) = start();
    let s1 = MockConn(1);

    pool.release(&key_a(), s1).await.unwrap();
    assert_eq!(pool.checkout(&key_a(), OWNER).await.unwrap(), Checkout::Reused(s1));

    assert_eq!(transport.transfers(), vec![(s1, OWNER)]);
    assert!(!transport.is_active(s1));
}

#[tokio::test]
async fn test_second_checkout_finds_nothing() {
    let (pool, _transport) = start();
    pool.release(&key_a(), MockConn(1)).await.unwrap();

    assert_eq!(pool.checkout(&key_a(), OWNER).await.unwrap(), Checkout::Reused(MockConn(1)));
    assert_eq!(pool.checkout(&key_a(), OWNER).await.unwrap(), Checkout::NoSocket);
}

#[tokio::test]
async fn test_sizes_track_release_and_checkout() {
    let (pool, transport) = start();
    let other = PoolKey::tls("b", 443);

    pool.release(&key_a(), MockConn(1)).await.unwrap();
    pool.release(&key_a(), MockConn(2)).await.unwrap();
    pool.release(&other, MockConn(3)).await.unwrap();

    assert_eq!(pool.total_size().await.unwrap(), 3);
    assert_eq!(pool.size_for_key(&key_a()).await.unwrap(), 2);
    assert_eq!(pool.size_for_key(&other).await.unwrap(), 1);
    assert!(transport.is_active(MockConn(1)));

    pool.checkout(&key_a(), OWNER).await.unwrap();
    assert_eq!(pool.total_size().await.unwrap(), 2);
    assert_eq!(pool.size_for_key(&key_a()).await.unwrap(), 1);
    assert_eq!(pool.size_for_key(&other).await.unwrap(), 1);
}

#[tokio::test]
async fn test_checkout_is_lifo() {
    let (pool, _transport) = start();
    pool.release(&key_a(), MockConn(1)).await.unwrap();
    pool.release(&key_a(), MockConn(2)).await.unwrap();

    assert_eq!(pool.checkout(&key_a(), OWNER).await.unwrap(), Checkout::Reused(MockConn(2)));
    assert_eq!(pool.checkout(&key_a(), OWNER).await.unwrap(), Checkout::Reused(MockConn(1)));
}

#[tokio::test]
async fn test_host_is_case_insensitive() {
    let (pool, _transport) = start();
    pool.release(&PoolKey::tcp("Example.COM", 80), MockConn(1)).await.unwrap();

    let result = pool.checkout(&PoolKey::tcp("example.com", 80), OWNER).await.unwrap();
    assert_eq!(result, Checkout::Reused(MockConn(1)));
}

#[tokio::test]
async fn test_checkout_unknown_key_leaves_state_alone() {
    let (pool, transport) = start();
    pool.release(&key_a(), MockConn(1)).await.unwrap();

    let result = pool.checkout(&PoolKey::tcp("b", 80), OWNER).await.unwrap();
    assert_eq!(result, Checkout::NoSocket);
    assert_eq!(pool.total_size().await.unwrap(), 1);
    assert_eq!(pool.size_for_key(&PoolKey::tcp("b", 80)).await.unwrap(), 0);
    assert!(transport.transfers().is_empty());
}

#[tokio::test]
async fn test_kind_separates_keys() {
    let (pool, _transport) = start();
    pool.release(&PoolKey::tcp("a", 443), MockConn(1)).await.unwrap();

    let result = pool.checkout(&PoolKey::tls("a", 443), OWNER).await.unwrap();
    assert_eq!(result, Checkout::NoSocket);
}

#[tokio::test(start_paused = true)]
async fn test_idle_timeout_evicts() {
    let (pool, transport) = start();
    pool.release(&key_a(), MockConn(1)).await.unwrap();

    tokio::time::sleep(IDLE - Duration::from_millis(1)).await;
    assert_eq!(pool.total_size().await.unwrap(), 1);

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(pool.total_size().await.unwrap(), 0);
    assert_eq!(pool.size_for_key(&key_a()).await.unwrap(), 0);
    assert_eq!(transport.closed(), vec![MockConn(1)]);
}

#[tokio::test(start_paused = true)]
async fn test_rerelease_restarts_idle_timer() {
    let (pool, transport) = start();
    let s1 = MockConn(1);
    pool.release(&key_a(), s1).await.unwrap();

    tokio::time::sleep(Duration::from_millis(3000)).await;
    assert_eq!(pool.checkout(&key_a(), OWNER).await.unwrap(), Checkout::Reused(s1));
    pool.release(&key_a(), s1).await.unwrap();

    // The first timer would have fired here.
    tokio::time::sleep(Duration::from_millis(3000)).await;
    assert_eq!(pool.total_size().await.unwrap(), 1);
    assert!(transport.closed().is_empty());

    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(pool.total_size().await.unwrap(), 0);
    assert_eq!(transport.closed(), vec![s1]);
}

#[tokio::test(start_paused = true)]
async fn test_checked_out_socket_is_never_evicted() {
    let (pool, transport) = start();
    pool.release(&key_a(), MockConn(1)).await.unwrap();
    pool.checkout(&key_a(), OWNER).await.unwrap();

    tokio::time::sleep(IDLE * 2).await;
    assert!(transport.closed().is_empty());
}

#[tokio::test]
async fn test_close_notification_removes_socket() {
    let (pool, transport) = start();
    let s1 = MockConn(1);
    pool.release(&key_a(), s1).await.unwrap();

    assert!(transport.notifier(s1).closed(s1));
    assert_eq!(pool.checkout(&key_a(), OWNER).await.unwrap(), Checkout::NoSocket);
    assert_eq!(pool.total_size().await.unwrap(), 0);
}

#[tokio::test]
async fn test_error_and_data_notifications_remove_socket() {
    let (pool, transport) = start();
    pool.release(&key_a(), MockConn(1)).await.unwrap();
    pool.release(&key_a(), MockConn(2)).await.unwrap();

    transport.notifier(MockConn(1)).errored(MockConn(1), NetError::ConnectionReset);
    transport.notifier(MockConn(2)).unexpected_data(MockConn(2));

    assert_eq!(pool.total_size().await.unwrap(), 0);
    assert_eq!(transport.closed(), vec![MockConn(1), MockConn(2)]);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_notifications_remove_once() {
    let (pool, transport) = start();
    let s1 = MockConn(1);
    pool.release(&key_a(), s1).await.unwrap();
    pool.release(&key_a(), MockConn(2)).await.unwrap();

    let notifier = transport.notifier(s1);
    notifier.closed(s1);
    notifier.errored(s1, NetError::ConnectionReset);
    assert_eq!(pool.total_size().await.unwrap(), 1);

    // Nothing left for s1's timer to do; MockConn(2)'s timer still fires.
    tokio::time::sleep(IDLE * 2).await;
    assert_eq!(pool.total_size().await.unwrap(), 0);
    assert_eq!(transport.closed(), vec![s1, MockConn(2)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_racing_idle_timer_removes_once() {
    let config = PoolConfig::new().with_idle_timeout(Duration::from_millis(2));
    let (pool, transport) = start_pool(config);
    let count = 200u32;

    let mut tasks = Vec::new();
    for id in 0..count {
        let (pool, transport) = (pool.clone(), transport.clone());
        tasks.push(tokio::spawn(async move {
            let conn = MockConn(id);
            pool.release(&key_a(), conn).await.unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
            transport.latest_notifier().closed(conn);
            pool.release(&key_a(), conn).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Each socket is closed once for the notification or first timer, and
    // once when its second stay times out.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while transport.closed().len() < 2 * count as usize && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let closed = transport.closed();
    assert_eq!(closed.len(), 2 * count as usize);
    for id in 0..count {
        assert_eq!(closed.iter().filter(|c| **c == MockConn(id)).count(), 2);
    }
    assert_eq!(pool.total_size().await.unwrap(), 0);
}

#[tokio::test]
async fn test_broken_socket_is_discarded_and_next_tried() {
    let (pool, transport) = start();
    pool.release(&key_a(), MockConn(1)).await.unwrap();
    pool.release(&key_a(), MockConn(2)).await.unwrap();
    transport.break_conn(MockConn(2));

    assert_eq!(pool.checkout(&key_a(), OWNER).await.unwrap(), Checkout::Reused(MockConn(1)));
    assert_eq!(transport.closed(), vec![MockConn(2)]);
    assert_eq!(pool.total_size().await.unwrap(), 0);
}

#[tokio::test]
async fn test_all_broken_yields_no_socket() {
    let (pool, transport) = start();
    for id in 1..=3 {
        pool.release(&key_a(), MockConn(id)).await.unwrap();
        transport.break_conn(MockConn(id));
    }

    assert_eq!(pool.checkout(&key_a(), OWNER).await.unwrap(), Checkout::NoSocket);
    assert_eq!(pool.total_size().await.unwrap(), 0);
    assert_eq!(transport.closed().len(), 3);
}

#[tokio::test]
async fn test_owner_gone_keeps_socket_idle() {
    let (pool, transport) = start();
    let gone = MockOwner(2);
    transport.kill_owner(gone);
    pool.release(&key_a(), MockConn(1)).await.unwrap();
    pool.release(&key_a(), MockConn(2)).await.unwrap();

    // No retry with the next candidate.
    assert_eq!(pool.checkout(&key_a(), gone).await.unwrap(), Checkout::NoSocket);
    assert_eq!(pool.total_size().await.unwrap(), 2);
    assert!(transport.is_active(MockConn(2)));
    assert!(transport.closed().is_empty());

    assert_eq!(pool.checkout(&key_a(), OWNER).await.unwrap(), Checkout::Reused(MockConn(2)));
}

#[tokio::test]
async fn test_checkout_abandoned_before_transfer_keeps_socket() {
    let (pool, transport) = start();
    let key = key_a();
    pool.release(&key, MockConn(1)).await.unwrap();

    // Send the request, then drop it before the pool task gets to run.
    let mut checkout = Box::pin(pool.checkout(&key, OWNER));
    std::future::poll_fn(|cx| {
        assert!(checkout.as_mut().poll(cx).is_pending());
        Poll::Ready(())
    })
    .await;
    drop(checkout);

    assert_eq!(pool.size_for_key(&key).await.unwrap(), 1);
    assert!(transport.transfers().is_empty());
    assert!(transport.is_active(MockConn(1)));
    assert!(transport.closed().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_checkout_abandoned_after_transfer_closes_socket() {
    let (pool, transport) = start();
    let s1 = MockConn(1);
    pool.release(&key_a(), s1).await.unwrap();
    let (entered, resume) = transport.hold_next_transfer();

    let requester = tokio::spawn({
        let pool = pool.clone();
        async move { pool.checkout(&key_a(), OWNER).await }
    });
    tokio::task::spawn_blocking(move || entered.recv()).await.unwrap().unwrap();
    requester.abort();
    assert!(requester.await.unwrap_err().is_cancelled());
    resume.send(()).unwrap();

    assert_eq!(pool.total_size().await.unwrap(), 0);
    assert_eq!(transport.transfers(), vec![(s1, OWNER)]);
    assert_eq!(transport.closed(), vec![s1]);
}

#[tokio::test]
async fn test_release_of_idle_socket_moves_it() {
    let (pool, _transport) = start();
    let other = PoolKey::tcp("b", 80);
    pool.release(&key_a(), MockConn(1)).await.unwrap();
    pool.release(&other, MockConn(1)).await.unwrap();

    assert_eq!(pool.total_size().await.unwrap(), 1);
    assert_eq!(pool.size_for_key(&key_a()).await.unwrap(), 0);
    assert_eq!(pool.size_for_key(&other).await.unwrap(), 1);
}

#[tokio::test]
async fn test_stats() {
    let (pool, _transport) = start_pool(
        PoolConfig::new().with_name("api").with_pool_size(8).with_idle_timeout(IDLE),
    );
    pool.release(&key_a(), MockConn(1)).await.unwrap();
    pool.release(&key_a(), MockConn(2)).await.unwrap();
    pool.release(&PoolKey::tls("b", 443), MockConn(3)).await.unwrap();

    let stats = pool.stats().await.unwrap();
    assert_eq!(stats.name.as_deref(), Some("api"));
    assert_eq!(stats.pool_size, 8);
    assert_eq!(stats.idle_timeout, IDLE);
    assert_eq!(stats.idle_count, 3);
    assert_eq!(stats.key_count, 2);
}

#[tokio::test]
async fn test_pool_size_is_not_a_cap() {
    let (pool, _transport) = start_pool(PoolConfig::new().with_pool_size(1));
    for id in 0..5 {
        pool.release(&key_a(), MockConn(id)).await.unwrap();
    }
    assert_eq!(pool.total_size().await.unwrap(), 5);
}

#[tokio::test]
async fn test_shutdown_closes_idle_sockets() {
    let (pool, transport) = start();
    pool.release(&key_a(), MockConn(1)).await.unwrap();
    pool.release(&PoolKey::tls("b", 443), MockConn(2)).await.unwrap();

    pool.shutdown().await.unwrap();

    let mut closed = transport.closed();
    closed.sort_by_key(|c| c.0);
    assert_eq!(closed, vec![MockConn(1), MockConn(2)]);
    assert_eq!(pool.total_size().await, Err(NetError::PoolClosed));
    assert_eq!(pool.checkout(&key_a(), OWNER).await, Err(NetError::PoolClosed));
    assert!(pool.is_closed());
}

#[tokio::test]
async fn test_dropping_last_handle_shuts_down() {
    let (pool, transport) = start();
    let clone = pool.clone();
    pool.release(&key_a(), MockConn(1)).await.unwrap();
    drop(pool);
    assert_eq!(clone.total_size().await.unwrap(), 1);
    drop(clone);

    for _ in 0..100 {
        if !transport.closed().is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(transport.closed(), vec![MockConn(1)]);
}

#[tokio::test]
async fn test_notifier_after_shutdown_reports_gone() {
    let (pool, transport) = start();
    let s1 = MockConn(1);
    pool.release(&key_a(), s1).await.unwrap();
    let notifier = transport.notifier(s1);

    pool.shutdown().await.unwrap();
    drop(pool);
    assert!(!notifier.closed(s1));
}
