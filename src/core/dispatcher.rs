//! Per-request orchestration: resolve, acquire, forward, release.
//!
//! The dispatcher is deliberately free of I/O beyond the forwarding call so
//! it stays easy to exercise in isolation. Every failure maps to a
//! client-visible response; the connection is never silently dropped. The
//! backend lease taken for a request is released by its drop guard on every
//! exit path, including the handler future being dropped when the client
//! goes away.
use std::sync::Arc;

use axum::body::Body as AxumBody;
use eyre::{Result, WrapErr};
use hyper::{Request, Response, StatusCode, header};
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    config::models::ServerConfig,
    core::{
        group::BackendGroup,
        routing::RoutingTable,
    },
    ports::forwarder::ForwardingEngine,
};

/// Request entry point over an immutable [`RoutingTable`].
///
/// Cheap to clone; the table is shared behind an `Arc` and needs no lock
/// once serving starts.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    table: Arc<RoutingTable>,
}

impl Dispatcher {
    /// Create a dispatcher over a fully registered routing table
    pub fn new(table: Arc<RoutingTable>) -> Self {
        Self { table }
    }

    /// The routing table backing this dispatcher
    pub fn routing_table(&self) -> &Arc<RoutingTable> {
        &self.table
    }

    /// Handle one inbound request end to end.
    ///
    /// Path-prefix resolution is the primary routing axis; header resolution
    /// is available on the table for future routing policies. Resolution
    /// failure answers 404, an exhausted pool answers 503, and a forwarding
    /// failure answers 502 -- in each case with a response body rather than
    /// a dropped connection.
    pub async fn dispatch(&self, req: Request<AxumBody>) -> Response<AxumBody> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "request",
            http.method = %req.method(),
            http.path = %req.uri().path(),
            request.id = %request_id,
            http.status_code = tracing::field::Empty,
        );

        let response = self.dispatch_inner(req).instrument(span.clone()).await;
        span.record("http.status_code", response.status().as_u16());
        response
    }

    async fn dispatch_inner(&self, req: Request<AxumBody>) -> Response<AxumBody> {
        let path = req.uri().path().to_string();

        let group = match self.table.resolve_path_prefix(&path) {
            Ok(group) => group,
            Err(e) => {
                tracing::warn!("routing failed: {e}");
                return error_response(StatusCode::NOT_FOUND, &e.to_string());
            }
        };

        let lease = match group.acquire() {
            Ok(lease) => lease,
            Err(e) => {
                tracing::warn!(target_url = %group.target(), "pool exhausted: {e}");
                return error_response(StatusCode::SERVICE_UNAVAILABLE, &e.to_string());
            }
        };

        tracing::debug!(
            target_url = %lease.backend().target(),
            pool_in_use = group.in_use_count(),
            "forwarding to backend"
        );

        match lease.backend().forward(req).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(target_url = %lease.backend().target(), "upstream exchange failed: {e}");
                error_response(StatusCode::BAD_GATEWAY, "upstream exchange failed")
            }
        }
        // `lease` drops here (or wherever this future is dropped), returning
        // the backend to its pool
    }
}

/// Build a dispatcher from configuration: construct every backend group and
/// register it with a fresh routing table, failing fast on the first invalid
/// target or conflicting rule.
pub fn build_dispatcher(
    config: &ServerConfig,
    engine: Arc<dyn ForwardingEngine>,
) -> Result<Dispatcher> {
    let mut table = RoutingTable::new();

    for group_config in &config.groups {
        let group: Arc<BackendGroup> = BackendGroup::new(
            &group_config.host,
            group_config.port,
            group_config.path_prefixes.clone(),
            group_config.headers.clone(),
            group_config.max_backends,
            engine.clone(),
        )
        .wrap_err_with(|| format!("invalid target for backend group '{}'", group_config.name))?;

        table
            .register_group(group.clone())
            .wrap_err_with(|| format!("cannot register backend group '{}'", group_config.name))?;

        tracing::info!(
            group = %group_config.name,
            target_url = %group.target(),
            max_backends = group.max_backends(),
            prefixes = ?group.path_prefixes(),
            "registered backend group"
        );
    }

    Ok(Dispatcher::new(Arc::new(table)))
}

fn error_response(status: StatusCode, message: &str) -> Response<AxumBody> {
    let body = serde_json::json!({ "error": message });
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(AxumBody::from(body.to_string()))
        .unwrap_or_else(|_| {
            let mut response = Response::new(AxumBody::from("internal error"));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        })
}
