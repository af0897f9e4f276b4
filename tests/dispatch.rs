//! Dispatcher end-to-end: resolve, acquire, forward, release -- including
//! the paths where the request is abandoned mid-exchange.
use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::body::Body;
use crossbar::{
    config::models::{GroupConfig, ServerConfig},
    core::{BackendGroup, Dispatcher, RoutingTable, TargetUrl, build_dispatcher},
    ports::forwarder::{ForwardError, ForwardResult, ForwardingEngine},
};
use http_body_util::BodyExt;
use hyper::{Request, Response, StatusCode};
use tokio::sync::Semaphore;

/// Engine that parks every exchange until the test hands out a permit.
struct GatedEngine {
    gate: Semaphore,
}

impl GatedEngine {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
        })
    }
}

#[async_trait]
impl ForwardingEngine for GatedEngine {
    async fn forward(
        &self,
        _target: &TargetUrl,
        _req: Request<Body>,
    ) -> ForwardResult<Response<Body>> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| ForwardError::Connection(e.to_string()))?;
        Ok(Response::new(Body::from("upstream says hi")))
    }
}

fn dispatcher_over(engine: Arc<dyn ForwardingEngine>, capacity: usize) -> (Dispatcher, Arc<BackendGroup>) {
    let group = BackendGroup::new(
        "127.0.0.1",
        9000,
        vec!["/a".to_string()],
        HashMap::new(),
        capacity,
        engine,
    )
    .unwrap();
    let mut table = RoutingTable::new();
    table.register_group(group.clone()).unwrap();
    (Dispatcher::new(Arc::new(table)), group)
}

fn request(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

async fn wait_for_in_use(group: &Arc<BackendGroup>, expected: usize) {
    for _ in 0..200 {
        if group.in_use_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("pool never reached {expected} backends in use");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exhaustion_while_an_exchange_is_in_flight() {
    let engine = GatedEngine::new();
    let (dispatcher, group) = dispatcher_over(engine.clone(), 1);

    let in_flight = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.dispatch(request("/a/slow")).await })
    };
    wait_for_in_use(&group, 1).await;

    // the single backend is held, so a second request is turned away
    let response = dispatcher.dispatch(request("/a/other")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    // once the exchange finishes, the same backend serves again
    engine.gate.add_permits(2);
    let response = in_flight.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    wait_for_in_use(&group, 0).await;

    let response = dispatcher.dispatch(request("/a/retry")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(group.backend_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_abandoned_request_still_releases_its_backend() {
    let engine = GatedEngine::new();
    let (dispatcher, group) = dispatcher_over(engine.clone(), 1);

    let in_flight = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.dispatch(request("/a/abandoned")).await })
    };
    wait_for_in_use(&group, 1).await;

    // the client goes away mid-exchange
    in_flight.abort();
    assert!(in_flight.await.is_err());
    wait_for_in_use(&group, 0).await;

    // the backend is immediately reusable
    engine.gate.add_permits(1);
    let response = dispatcher.dispatch(request("/a/next")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dispatcher_built_from_config_serves_and_streams_body() {
    let engine = GatedEngine::new();
    engine.gate.add_permits(1);

    let config = ServerConfig {
        listen_addr: "127.0.0.1:8443".to_string(),
        tls: None,
        groups: vec![GroupConfig {
            name: "api".to_string(),
            host: "127.0.0.1".to_string(),
            port: 9000,
            path_prefixes: vec!["/api".to_string()],
            headers: HashMap::new(),
            max_backends: 2,
        }],
    };

    let dispatcher = build_dispatcher(&config, engine).unwrap();
    let response = dispatcher.dispatch(request("/api/users")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"upstream says hi");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_config_with_conflicting_groups_fails_to_build() {
    let engine = GatedEngine::new();

    let group = GroupConfig {
        name: "api".to_string(),
        host: "127.0.0.1".to_string(),
        port: 9000,
        path_prefixes: vec!["/api".to_string()],
        headers: HashMap::new(),
        max_backends: 2,
    };
    let mut duplicate = group.clone();
    duplicate.name = "api-dup".to_string();
    duplicate.port = 9001;

    let config = ServerConfig {
        listen_addr: "127.0.0.1:8443".to_string(),
        tls: None,
        groups: vec![group, duplicate],
    };

    let err = build_dispatcher(&config, engine).expect_err("conflict expected");
    assert!(err.to_string().contains("api-dup"));
}
