use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use docscan::memory::{CheckoutMode, MemoryPool, MemoryStore};
use docscan::{Credential, DriverError, LeaseManager, LeaseProtocol, ScanError, ScanMetrics};

fn setup(mode: CheckoutMode) -> (Arc<MemoryPool>, LeaseManager) {
    let pool = Arc::new(MemoryPool::new(Arc::new(MemoryStore::new()), mode));
    let leases =
        LeaseManager::new(pool.clone(), Arc::new(ScanMetrics::default()), Duration::from_secs(120));
    (pool, leases)
}

fn hosts(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| (*s).to_string()).collect()
}

#[test]
fn keyed_lease_releases_by_key_exactly_once() {
    let (pool, leases) = setup(CheckoutMode::Keyed);
    let mut lease = leases.acquire(&hosts(&["db-1:27017"]), &[], None, &BTreeMap::new()).unwrap();
    assert_eq!(lease.protocol(), LeaseProtocol::Keyed);
    assert!(!lease.is_released());
    assert!(leases.release(&mut lease, Duration::from_secs(5)));
    assert!(!leases.release(&mut lease, Duration::from_secs(5)));
    assert!(lease.is_released());
    let stats = pool.stats();
    assert_eq!(stats.released_by_key, 1);
    assert_eq!(stats.released_by_handle, 0);
    assert_eq!(stats.protocol_violations, 0);
    assert_eq!(leases.outstanding(), 0);
}

#[test]
fn bare_lease_releases_by_handle() {
    let (pool, leases) = setup(CheckoutMode::Bare);
    let mut lease = leases.acquire(&hosts(&["db-1:27017"]), &[], None, &BTreeMap::new()).unwrap();
    assert_eq!(lease.protocol(), LeaseProtocol::Handle);
    lease.release();
    lease.release();
    let stats = pool.stats();
    assert_eq!(stats.released_by_handle, 1);
    assert_eq!(stats.released_by_key, 0);
    assert_eq!(stats.protocol_violations, 0);
}

#[test]
fn same_key_reuses_cached_connection() {
    let (pool, leases) = setup(CheckoutMode::Keyed);
    let h = hosts(&["db-1:27017", "db-2:27017"]);
    let mut a = leases.acquire(&h, &[], None, &BTreeMap::new()).unwrap();
    let mut b = leases.acquire(&h, &[], None, &BTreeMap::new()).unwrap();
    assert_eq!(a.pool_key(), b.pool_key());
    assert_ne!(a.id(), b.id());
    assert_eq!(pool.stats().connections_created, 1);
    assert_eq!(pool.in_use(), 2);
    a.release();
    assert_eq!(pool.in_use(), 1);
    b.release();
    assert_eq!(pool.in_use(), 0);
}

#[test]
fn different_options_get_different_entries() {
    let (pool, leases) = setup(CheckoutMode::Keyed);
    let h = hosts(&["db-1:27017"]);
    let mut opts = BTreeMap::new();
    opts.insert("readPreference".to_string(), "secondary".to_string());
    let a = leases.acquire(&h, &[], None, &BTreeMap::new()).unwrap();
    let b = leases.acquire(&h, &[], None, &opts).unwrap();
    assert_ne!(a.pool_key(), b.pool_key());
    assert_eq!(pool.entry_count(), 2);
}

#[test]
fn acquire_failure_is_a_connectivity_error() {
    let (pool, leases) = setup(CheckoutMode::Keyed);
    pool.fail_next_acquire(DriverError::Network("connection refused".into()));
    let err = leases.acquire(&hosts(&["db-9:27017"]), &[], None, &BTreeMap::new()).unwrap_err();
    assert!(matches!(err, ScanError::Connectivity { source: DriverError::Network(_), .. }));
    assert!(err.is_retryable());
    assert_eq!(leases.outstanding(), 0);
    assert_eq!(leases.metrics().snapshot().leases_acquired, 0);
}

#[test]
fn bad_credentials_fail_with_auth_cause() {
    let store = Arc::new(MemoryStore::new());
    store.add_user(Credential::new("reader", "admin", "right"));
    let pool = Arc::new(MemoryPool::new(store, CheckoutMode::Keyed));
    let leases = LeaseManager::new(pool, Arc::new(ScanMetrics::default()), Duration::ZERO);
    let h = hosts(&["db-1:27017"]);
    let wrong = [Credential::new("reader", "admin", "wrong")];
    let err = leases.acquire(&h, &wrong, None, &BTreeMap::new()).unwrap_err();
    assert!(matches!(err, ScanError::Connectivity { source: DriverError::Auth(_), .. }));
    assert!(!err.is_retryable());
    assert!(!format!("{err}").contains("wrong"));
    let right = [Credential::new("reader", "admin", "right")];
    assert!(leases.acquire(&h, &right, None, &BTreeMap::new()).is_ok());
}

#[test]
fn idle_hint_controls_eviction() {
    let (pool, leases) = setup(CheckoutMode::Keyed);
    let mut lease = leases.acquire(&hosts(&["db-1:27017"]), &[], None, &BTreeMap::new()).unwrap();
    assert_eq!(pool.evict_idle(Instant::now()), 0);
    leases.release(&mut lease, Duration::ZERO);
    assert_eq!(pool.evict_idle(Instant::now() + Duration::from_millis(5)), 1);
    assert_eq!(pool.entry_count(), 0);
}

#[test]
fn leases_move_across_threads() {
    let (pool, leases) = setup(CheckoutMode::Keyed);
    let leases = Arc::new(leases);
    let workers: Vec<_> = (0..4)
        .map(|i| {
            let leases = Arc::clone(&leases);
            std::thread::spawn(move || {
                let h = vec![format!("db-{i}:27017")];
                let mut lease = leases.acquire(&h, &[], None, &BTreeMap::new()).unwrap();
                lease.release()
            })
        })
        .collect();
    for w in workers {
        assert!(w.join().unwrap());
    }
    assert_eq!(pool.in_use(), 0);
    assert_eq!(pool.entry_count(), 4);
    assert_eq!(leases.outstanding(), 0);
}
