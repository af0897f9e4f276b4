//! Bounded backend pool shared by one set of routing rules.
//!
//! A `BackendGroup` owns the backends bound to a single upstream host:port.
//! Backends are created lazily on first demand, handed out exclusively, and
//! reclaimed when the lease covering a request is dropped. One mutex per
//! group guards the whole scan-then-create-or-fail sequence, so unrelated
//! groups never contend.
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use thiserror::Error;

use crate::{
    core::backend::{Backend, BackendResult, TargetUrl},
    ports::forwarder::ForwardingEngine,
};

/// Errors related to pool checkout
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PoolError {
    /// Error when every backend is in use and the pool is at capacity
    #[error("backend pool for {target} is exhausted ({capacity} backends in use)")]
    Exhausted {
        /// The upstream the pool is bound to
        target: TargetUrl,
        /// The configured pool ceiling
        capacity: usize,
    },
}

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

struct Slot {
    backend: Arc<Backend>,
    in_use: bool,
}

type SharedSlots = Arc<Mutex<Vec<Slot>>>;

fn lock_slots(slots: &SharedSlots) -> MutexGuard<'_, Vec<Slot>> {
    // a poisoning panic cannot leave the slot vector inconsistent:
    // every critical section completes its writes before returning
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn release_slot(slots: &SharedSlots, backend: &Arc<Backend>) {
    let mut slots = lock_slots(slots);
    for slot in slots.iter_mut() {
        if Arc::ptr_eq(&slot.backend, backend) {
            slot.in_use = false;
            return;
        }
    }
}

/// A capacity-bounded pool of [`Backend`]s sharing one set of accepted path
/// prefixes and header matches.
///
/// Accepted prefixes and header names are stored lower-cased; header values
/// keep their exact case. The group validates its upstream target once at
/// construction, so the lazy backend creation inside [`acquire`] cannot
/// fail.
///
/// [`acquire`]: BackendGroup::acquire
pub struct BackendGroup {
    target: TargetUrl,
    max_backends: usize,
    path_prefixes: Vec<String>,
    header_rules: HashMap<String, String>,
    engine: Arc<dyn ForwardingEngine>,
    slots: SharedSlots,
}

impl BackendGroup {
    /// Create a group bound to `host:port`.
    ///
    /// Fails with [`BackendError::InvalidTarget`] when the address does not
    /// parse; registration of the group must then be aborted.
    ///
    /// [`BackendError::InvalidTarget`]: crate::core::backend::BackendError::InvalidTarget
    pub fn new(
        host: &str,
        port: u16,
        path_prefixes: Vec<String>,
        header_rules: HashMap<String, String>,
        max_backends: usize,
        engine: Arc<dyn ForwardingEngine>,
    ) -> BackendResult<Arc<Self>> {
        let target = TargetUrl::from_host_port(host, port)?;

        let mut path_prefixes: Vec<String> = path_prefixes
            .into_iter()
            .map(|p| p.to_ascii_lowercase())
            .collect();
        path_prefixes.sort();
        path_prefixes.dedup();

        let header_rules = header_rules
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();

        Ok(Arc::new(Self {
            target,
            max_backends,
            path_prefixes,
            header_rules,
            engine,
            slots: Arc::new(Mutex::new(Vec::new())),
        }))
    }

    /// The upstream address all of this group's backends are bound to
    pub fn target(&self) -> &TargetUrl {
        &self.target
    }

    /// The configured pool ceiling (inclusive)
    pub fn max_backends(&self) -> usize {
        self.max_backends
    }

    /// Accepted path prefixes, lower-cased
    pub fn path_prefixes(&self) -> &[String] {
        &self.path_prefixes
    }

    /// Accepted header rules, names lower-cased, values exact
    pub fn header_rules(&self) -> &HashMap<String, String> {
        &self.header_rules
    }

    /// Check out a backend for exclusive use by one in-flight request.
    ///
    /// The first free backend in creation order is handed out. If none is
    /// free and the pool is below `max_backends`, a new backend is created
    /// against the group's target and handed out. Otherwise the pool is
    /// exhausted; the caller may retry after an outstanding lease drops.
    pub fn acquire(&self) -> PoolResult<BackendLease> {
        let mut slots = lock_slots(&self.slots);

        for slot in slots.iter_mut() {
            if !slot.in_use {
                slot.in_use = true;
                return Ok(BackendLease::new(self.slots.clone(), slot.backend.clone()));
            }
        }

        // capacity is a hard ceiling: strict `<` so the pool never exceeds it
        if slots.len() < self.max_backends {
            let backend = Arc::new(Backend::from_target(
                self.target.clone(),
                self.engine.clone(),
            ));
            slots.push(Slot {
                backend: backend.clone(),
                in_use: true,
            });
            tracing::debug!(
                target_url = %self.target,
                pool_size = slots.len(),
                "created backend on demand"
            );
            return Ok(BackendLease::new(self.slots.clone(), backend));
        }

        Err(PoolError::Exhausted {
            target: self.target.clone(),
            capacity: self.max_backends,
        })
    }

    /// Return a backend to the pool.
    ///
    /// Releasing a backend that does not belong to this group, or releasing
    /// one twice, is a no-op; callers never need to guard their cleanup
    /// paths.
    pub fn release(&self, backend: &Arc<Backend>) {
        release_slot(&self.slots, backend);
    }

    /// Number of backends created so far (never shrinks)
    pub fn backend_count(&self) -> usize {
        lock_slots(&self.slots).len()
    }

    /// Number of backends currently handed out
    pub fn in_use_count(&self) -> usize {
        lock_slots(&self.slots).iter().filter(|s| s.in_use).count()
    }
}

impl fmt::Debug for BackendGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendGroup")
            .field("target", &self.target)
            .field("max_backends", &self.max_backends)
            .field("path_prefixes", &self.path_prefixes)
            .field("header_rules", &self.header_rules)
            .finish_non_exhaustive()
    }
}

/// Exclusive hold on one backend for the lifetime of one exchange.
///
/// Dropping the lease releases the backend, so release fires on every exit
/// path of a request handler: normal completion, a forwarding error, or the
/// handler future being dropped on client cancellation.
pub struct BackendLease {
    slots: SharedSlots,
    backend: Arc<Backend>,
}

impl BackendLease {
    fn new(slots: SharedSlots, backend: Arc<Backend>) -> Self {
        Self { slots, backend }
    }

    /// The leased backend
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

impl Drop for BackendLease {
    fn drop(&mut self) {
        release_slot(&self.slots, &self.backend);
    }
}

impl fmt::Debug for BackendLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendLease")
            .field("target", self.backend.target())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::Body as AxumBody;
    use hyper::{Request, Response};

    use super::*;
    use crate::ports::forwarder::ForwardResult;

    struct NullEngine;

    #[async_trait]
    impl ForwardingEngine for NullEngine {
        async fn forward(
            &self,
            _target: &TargetUrl,
            _req: Request<AxumBody>,
        ) -> ForwardResult<Response<AxumBody>> {
            Ok(Response::new(AxumBody::empty()))
        }
    }

    fn test_group(max_backends: usize) -> Arc<BackendGroup> {
        BackendGroup::new(
            "127.0.0.1",
            9000,
            vec!["/api".to_string()],
            HashMap::new(),
            max_backends,
            Arc::new(NullEngine),
        )
        .expect("valid group")
    }

    #[test]
    fn test_acquire_creates_lazily() {
        let group = test_group(2);
        assert_eq!(group.backend_count(), 0);

        let lease = group.acquire().unwrap();
        assert_eq!(group.backend_count(), 1);
        assert_eq!(group.in_use_count(), 1);
        drop(lease);
        assert_eq!(group.in_use_count(), 0);
        // the backend survives release
        assert_eq!(group.backend_count(), 1);
    }

    #[test]
    fn test_first_free_policy_reuses_earliest() {
        let group = test_group(3);
        let a = group.acquire().unwrap();
        let b = group.acquire().unwrap();
        let first = a.backend().clone();
        drop(a);

        // the freed slot is preferred over creating a third backend
        let c = group.acquire().unwrap();
        assert!(Arc::ptr_eq(c.backend(), &first));
        assert_eq!(group.backend_count(), 2);
        drop((b, c));
    }

    #[test]
    fn test_capacity_is_inclusive_ceiling() {
        let group = test_group(2);
        let a = group.acquire().unwrap();
        let b = group.acquire().unwrap();

        let err = group.acquire().expect_err("pool should be exhausted");
        assert!(matches!(err, PoolError::Exhausted { capacity: 2, .. }));
        assert_eq!(group.backend_count(), 2);
        drop((a, b));
    }

    #[test]
    fn test_reuse_after_release_returns_same_instance() {
        let group = test_group(1);
        let lease = group.acquire().unwrap();
        let first = lease.backend().clone();
        drop(lease);

        let lease = group.acquire().unwrap();
        assert!(Arc::ptr_eq(lease.backend(), &first));
    }

    #[test]
    fn test_release_is_idempotent() {
        let group = test_group(1);
        let lease = group.acquire().unwrap();
        let backend = lease.backend().clone();

        group.release(&backend);
        group.release(&backend);
        drop(lease);

        assert_eq!(group.in_use_count(), 0);
        let relocked = group.acquire().unwrap();
        assert!(Arc::ptr_eq(relocked.backend(), &backend));
    }

    #[test]
    fn test_release_of_foreign_backend_is_noop() {
        let group = test_group(1);
        let other = test_group(1);
        let lease = other.acquire().unwrap();

        group.release(lease.backend());
        assert_eq!(group.in_use_count(), 0);
        assert_eq!(other.in_use_count(), 1);
    }

    #[test]
    fn test_concurrent_acquire_never_shares_a_backend() {
        let group = test_group(4);
        let mut handles = Vec::new();
        for _ in 0..4 {
            let group = group.clone();
            // each thread keeps its lease alive until all threads are done
            handles.push(std::thread::spawn(move || {
                let lease = group.acquire().unwrap();
                (Arc::as_ptr(lease.backend()) as usize, lease)
            }));
        }

        let leases: Vec<(usize, BackendLease)> = handles
            .into_iter()
            .map(|h| h.join().expect("thread should not panic"))
            .collect();
        let total = leases.len();
        let mut seen: Vec<usize> = leases.iter().map(|(ptr, _)| *ptr).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), total, "a backend was handed out twice");
    }

    #[test]
    fn test_rules_normalized_at_construction() {
        let mut headers = HashMap::new();
        headers.insert("X-Service".to_string(), "Billing".to_string());
        let group = BackendGroup::new(
            "127.0.0.1",
            9000,
            vec!["/API".to_string(), "/api".to_string()],
            headers,
            1,
            Arc::new(NullEngine),
        )
        .unwrap();

        assert_eq!(group.path_prefixes(), &["/api".to_string()]);
        // names fold to lower case, values keep theirs
        assert_eq!(
            group.header_rules().get("x-service"),
            Some(&"Billing".to_string())
        );
    }

    #[test]
    fn test_invalid_host_rejected_at_construction() {
        let result = BackendGroup::new(
            "not a host",
            9000,
            vec!["/".to_string()],
            HashMap::new(),
            1,
            Arc::new(NullEngine),
        );
        assert!(result.is_err());
    }
}
