use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bson::oid::ObjectId;
use bson::{Bson, doc};
use docscan::driver::{Checkout, ConnectionPool, PoolKey, PoolToken, SharedConnection};
use docscan::filter::FilterExpr as F;
use docscan::memory::{CheckoutMode, MemoryPool, MemoryStore};
use docscan::{CursorState, DriverError, PartitionDescriptor, ReadConfig, ScanError, ScanSession};

fn store_with_people() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let names = ["alice", "bob", "carol", "dave", "erin", "frank", "grace", "heidi"];
    store.insert_many(
        "hr",
        "people",
        names.iter().enumerate().map(|(i, n)| {
            let i = i32::try_from(i).unwrap();
            let team = if i % 2 == 0 { "red" } else { "blue" };
            doc! { "_id": i, "name": *n, "age": 20 + i * 5, "team": team }
        }),
    );
    store
}

fn session(mode: CheckoutMode) -> (Arc<MemoryPool>, ScanSession) {
    let pool = Arc::new(MemoryPool::new(store_with_people(), mode));
    let mut cfg = ReadConfig::new("hr", "people");
    cfg.batch_size = 2;
    let session = ScanSession::new(cfg, pool.clone()).unwrap();
    (pool, session)
}

fn ranges() -> Vec<PartitionDescriptor> {
    vec![
        PartitionDescriptor::new("p-0", &["db-1:27017"]).with_max(doc! { "_id": 3 }),
        PartitionDescriptor::new("p-1", &["db-2:27017"])
            .with_min(doc! { "_id": 3 })
            .with_max(doc! { "_id": 6 }),
        PartitionDescriptor::new("p-2", &["db-1:27017"]).with_min(doc! { "_id": 6 }),
    ]
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let pool = Arc::new(MemoryPool::new(Arc::new(MemoryStore::new()), CheckoutMode::Keyed));
    let mut cfg = ReadConfig::new("hr", "people");
    cfg.batch_size = 0;
    assert!(matches!(ScanSession::new(cfg, pool), Err(ScanError::Config(_))));
}

#[test]
fn open_partition_pushes_down_filters_and_projection() {
    let (pool, session) = session(CheckoutMode::Keyed);
    let p = PartitionDescriptor::new("all", &["db-1:27017"]);
    let mut cursor = session
        .open_partition(&p, &[F::gte("age", 35), F::eq("team", "blue")], &["name"])
        .unwrap();
    let names: Vec<String> = cursor
        .documents()
        .map(|d| d.unwrap().get_str("name").unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["dave", "frank", "heidi"]);
    cursor.close();
    let req = &pool.requests()[0];
    assert_eq!(req.filter, doc! { "age": { "$gte": 35 }, "team": { "$eq": "blue" } });
    assert_eq!(req.projection, doc! { "name": 1, "_id": 0 });
    assert_eq!(req.batch_size, 2);
    assert_eq!(session.metrics().snapshot().clauses_degraded, 0);
}

#[test]
fn degraded_filters_over_fetch_and_are_counted() {
    let (_pool, session) = session(CheckoutMode::Keyed);
    let p = PartitionDescriptor::new("all", &["db-1:27017"]);
    let filters = [F::eq("team", "red"), F::not(F::starts_with("name", "a"))];
    let docs = session.read_partition(&p, &filters, &["name", "_id"]).unwrap();
    // Pattern under NOT is left to the caller, so "alice" still comes back.
    assert_eq!(docs.len(), 4);
    assert!(docs.iter().any(|d| d.get_str("name").ok() == Some("alice")));
    assert!(docs.iter().all(|d| d.contains_key("_id")));
    assert_eq!(session.metrics().snapshot().clauses_degraded, 1);
}

#[test]
fn negated_leaf_is_pushed_down_exactly() {
    let (_pool, session) = session(CheckoutMode::Bare);
    let p = PartitionDescriptor::new("all", &["db-1:27017"]);
    let docs = session.read_partition(&p, &[F::not(F::eq("team", "red"))], &["team"]).unwrap();
    assert_eq!(docs.len(), 4);
    assert!(docs.iter().all(|d| d.get_str("team").ok() == Some("blue")));
}

#[test]
fn coercion_failure_carries_partition_and_opens_nothing() {
    let pool = Arc::new(MemoryPool::new(store_with_people(), CheckoutMode::Keyed));
    let mut cfg = ReadConfig::new("hr", "people");
    cfg.id_as_object_id = true;
    let session = ScanSession::new(cfg, pool.clone()).unwrap();
    let p = PartitionDescriptor::new("p-x", &["db-1:27017"]);
    let err = session.open_partition(&p, &[F::eq("_id", "zzz")], &["name"]).unwrap_err();
    assert_eq!(err.partition(), Some("p-x"));
    assert!(matches!(err.root(), ScanError::IdentifierCoercion { .. }));
    assert_eq!(pool.stats().acquired, 0);
}

#[test]
fn coerced_identifier_matches_object_ids() {
    let oid = ObjectId::parse_str("507f191e810c19729de860ea").unwrap();
    let store = Arc::new(MemoryStore::new());
    store.insert_many(
        "hr",
        "people",
        [doc! { "_id": oid, "name": "olga" }, doc! { "_id": ObjectId::new(), "name": "petra" }],
    );
    let pool = Arc::new(MemoryPool::new(store, CheckoutMode::Keyed));
    let mut cfg = ReadConfig::new("hr", "people");
    cfg.id_as_object_id = true;
    let session = ScanSession::new(cfg, pool).unwrap();
    let p = PartitionDescriptor::new("p-0", &["db-1:27017"]);
    let docs = session
        .read_partition(&p, &[F::eq("_id", "507f191e810c19729de860ea")], &["name"])
        .unwrap();
    assert_eq!(docs, vec![doc! { "name": "olga" }]);
}

#[test]
fn partitions_read_concurrently_cover_the_collection_once() {
    let (pool, session) = session(CheckoutMode::Keyed);
    let results = session.read_partitions(&ranges(), &[], &["_id"]);
    assert_eq!(results.len(), 3);
    let mut ids: Vec<i32> = results
        .into_iter()
        .flat_map(Result::unwrap)
        .map(|d| d.get_i32("_id").unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..8).collect::<Vec<_>>());
    assert_eq!(pool.in_use(), 0);
    let m = session.metrics().snapshot();
    assert_eq!(m.cursors_opened, 3);
    assert_eq!(m.cursors_closed, 3);
    assert_eq!(m.leases_outstanding(), 0);
    assert_eq!(m.documents_read, 8);
}

#[test]
fn one_failing_partition_does_not_stop_the_others() {
    let (pool, session) = session(CheckoutMode::Keyed);
    let mut parts = ranges();
    parts[1].id = "p-bad".to_string();
    // Only the first find fails; which partition gets it depends on scheduling.
    pool.fail_next_find(DriverError::Network("reset".into()));
    let results = session.read_partitions(&parts, &[], &Vec::<String>::new());
    let failures: Vec<&ScanError> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].partition().is_some());
    let read: usize = results.iter().filter_map(|r| r.as_ref().ok()).map(Vec::len).sum();
    assert!(read > 0 && read < 8);
    assert_eq!(pool.in_use(), 0);
    assert_eq!(session.metrics().snapshot().leases_outstanding(), 0);
}

#[test]
fn cursor_from_session_starts_unopened() {
    let (_pool, session) = session(CheckoutMode::Keyed);
    let mut cursor = session.cursor();
    assert_eq!(cursor.state(), CursorState::Unopened);
    assert!(matches!(cursor.next(), Err(ScanError::InvalidState(_))));
}

#[test]
fn metrics_text_reflects_the_scan() {
    let (_pool, session) = session(CheckoutMode::Keyed);
    let p = PartitionDescriptor::new("all", &["db-1:27017"]);
    let docs = session.read_partition(&p, &[F::is_in("name", ["bob", "erin"])], &["name"]).unwrap();
    assert_eq!(docs.len(), 2);
    let text = session.metrics().metrics_text();
    assert!(text.contains("docscan_documents_read_total 2\n"));
    assert!(text.contains("docscan_leases_acquired_total 1\n"));
    assert!(text.contains("docscan_leases_released_total 1\n"));
    assert_eq!(docs[0].get("_id"), None::<&Bson>);
}

// Counts leases held at the same time on top of the memory pool.
struct PeakPool {
    inner: MemoryPool,
    held: AtomicUsize,
    peak: AtomicUsize,
}

impl PeakPool {
    fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            inner: MemoryPool::new(store, CheckoutMode::Keyed),
            held: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

impl ConnectionPool for PeakPool {
    fn acquire(&self, key: &PoolKey) -> Result<Checkout, DriverError> {
        let checkout = self.inner.acquire(key)?;
        let held = self.held.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(held, Ordering::SeqCst);
        // Keep leases open long enough for workers to overlap.
        std::thread::sleep(Duration::from_millis(1));
        Ok(checkout)
    }

    fn release_key(&self, token: &PoolToken, idle_hint: Duration) {
        self.held.fetch_sub(1, Ordering::SeqCst);
        self.inner.release_key(token, idle_hint);
    }

    fn release_connection(&self, connection: &SharedConnection, idle_hint: Duration) {
        self.held.fetch_sub(1, Ordering::SeqCst);
        self.inner.release_connection(connection, idle_hint);
    }
}

fn single_key_ranges(n: i32) -> Vec<PartitionDescriptor> {
    (0..n)
        .map(|i| {
            PartitionDescriptor::new(&format!("p-{i}"), &["db-1:27017"])
                .with_min(doc! { "_id": i })
                .with_max(doc! { "_id": i + 1 })
        })
        .collect()
}

#[test]
fn concurrent_leases_never_exceed_the_worker_bound() {
    for max_workers in [1, 3] {
        let pool = Arc::new(PeakPool::new(store_with_people()));
        let mut cfg = ReadConfig::new("hr", "people");
        cfg.max_workers = max_workers;
        let session = ScanSession::new(cfg, pool.clone()).unwrap();
        let results = session.read_partitions(&single_key_ranges(40), &[], &["_id"]);
        assert_eq!(results.len(), 40);
        assert!(pool.peak.load(Ordering::SeqCst) <= max_workers);
        assert_eq!(pool.held.load(Ordering::SeqCst), 0);
        for (i, r) in results.into_iter().enumerate() {
            let ids: Vec<i32> = r.unwrap().iter().map(|d| d.get_i32("_id").unwrap()).collect();
            let expected = if i < 8 { vec![i32::try_from(i).unwrap()] } else { Vec::new() };
            assert_eq!(ids, expected, "partition {i}");
        }
        assert_eq!(session.metrics().snapshot().leases_outstanding(), 0);
    }
}

#[test]
fn single_worker_reads_partitions_one_at_a_time() {
    let pool = Arc::new(PeakPool::new(store_with_people()));
    let mut cfg = ReadConfig::new("hr", "people");
    cfg.max_workers = 1;
    let session = ScanSession::new(cfg, pool.clone()).unwrap();
    let results = session.read_partitions(&ranges(), &[], &["_id"]);
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);
    assert_eq!(pool.peak.load(Ordering::SeqCst), 1);
}
