//! Pool behavior under concurrency: exclusive checkout, capacity, reuse.
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use axum::body::Body;
use crossbar::{
    core::{BackendGroup, TargetUrl, group::PoolError},
    ports::forwarder::{ForwardResult, ForwardingEngine},
};
use hyper::{Request, Response};
use tokio::sync::Barrier;

struct NullEngine;

#[async_trait]
impl ForwardingEngine for NullEngine {
    async fn forward(
        &self,
        _target: &TargetUrl,
        _req: Request<Body>,
    ) -> ForwardResult<Response<Body>> {
        Ok(Response::new(Body::empty()))
    }
}

fn pool_of(capacity: usize) -> Arc<BackendGroup> {
    BackendGroup::new(
        "127.0.0.1",
        9000,
        vec!["/a".to_string()],
        HashMap::new(),
        capacity,
        Arc::new(NullEngine),
    )
    .expect("group construction should succeed")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_acquires_get_distinct_backends() {
    let group = pool_of(8);
    let start = Arc::new(Barrier::new(8));
    let done = Arc::new(Barrier::new(8));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let group = group.clone();
        let start = start.clone();
        let done = done.clone();
        handles.push(tokio::spawn(async move {
            start.wait().await;
            let lease = group.acquire().expect("capacity covers all tasks");
            let ptr = Arc::as_ptr(lease.backend()) as usize;
            // hold the lease until every task has acquired
            done.wait().await;
            ptr
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        assert!(seen.insert(handle.await.unwrap()), "backend handed out twice");
    }
    assert_eq!(group.backend_count(), 8);
    assert_eq!(group.in_use_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pool_never_exceeds_capacity_under_contention() {
    let group = pool_of(3);
    let start = Arc::new(Barrier::new(16));
    let done = Arc::new(Barrier::new(16));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let group = group.clone();
        let start = start.clone();
        let done = done.clone();
        handles.push(tokio::spawn(async move {
            start.wait().await;
            let lease = group.acquire();
            let granted = lease.is_ok();
            // successful tasks keep their lease until every task has tried
            done.wait().await;
            granted
        }));
    }

    let granted = {
        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                granted += 1;
            }
        }
        granted
    };

    assert_eq!(granted, 3);
    assert_eq!(group.backend_count(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_capacity_one_lifecycle() {
    let group = pool_of(1);

    // first acquire succeeds
    let lease = group.acquire().expect("first acquire");
    let first = lease.backend().clone();

    // a second acquire before release is exhausted
    let err = group.acquire().expect_err("pool should be exhausted");
    assert!(matches!(err, PoolError::Exhausted { capacity: 1, .. }));

    // after release, acquire succeeds again and reuses the same backend
    drop(lease);
    let lease = group.acquire().expect("acquire after release");
    assert!(Arc::ptr_eq(lease.backend(), &first));
    assert_eq!(group.backend_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_churn_reuses_instead_of_growing() {
    let group = pool_of(4);

    for _ in 0..100 {
        let a = group.acquire().unwrap();
        let b = group.acquire().unwrap();
        drop(a);
        drop(b);
    }

    assert!(group.backend_count() <= 2);
    assert_eq!(group.in_use_count(), 0);
}
