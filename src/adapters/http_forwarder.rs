use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use http::Uri;
use hyper::{Request, Response, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;

use crate::{
    core::backend::TargetUrl,
    ports::forwarder::{ForwardError, ForwardResult, ForwardingEngine},
};

/// Forwarding engine backed by Hyper with Rustls (HTTP/1.1 + HTTP/2).
///
/// Responsibilities:
/// * Rewrites the inbound URI against the exchange's upstream target
/// * Forces request version to HTTP/1.1 while allowing ALPN to negotiate h2
/// * Sets the Host header for the upstream
/// * Converts between Hyper body and Axum body types
///
/// This adapter is intentionally minimal; retries or circuit breaking would
/// be layered on a different abstraction if ever required.
pub struct HttpForwarder {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
}

impl HttpForwarder {
    /// Create a new forwarding engine.
    pub fn new() -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS targets

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::info!("Loaded {} native root certificates.", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);

        tracing::info!("Created forwarding engine with HTTP/1.1 support and h2 via ALPN");
        Ok(Self { client })
    }

    /// Rebuild the request URI against the upstream target, keeping the
    /// original path and query.
    fn upstream_uri(target: &TargetUrl, original: &Uri) -> ForwardResult<Uri> {
        let path_and_query = original
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        Uri::builder()
            .scheme(target.scheme())
            .authority(format!("{}:{}", target.host(), target.port()))
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| {
                ForwardError::InvalidRequest(format!(
                    "cannot rewrite '{original}' against {target}: {e}"
                ))
            })
    }
}

#[async_trait]
impl ForwardingEngine for HttpForwarder {
    async fn forward(
        &self,
        target: &TargetUrl,
        req: Request<AxumBody>,
    ) -> ForwardResult<Response<AxumBody>> {
        let (mut parts, body) = req.into_parts();

        parts.uri = Self::upstream_uri(target, &parts.uri)?;
        // ALPN negotiates the actual version against the upstream
        parts.version = Version::HTTP_11;

        let host_header = HeaderValue::from_str(&format!("{}:{}", target.host(), target.port()))
            .map_err(|e| {
                ForwardError::InvalidRequest(format!("invalid upstream authority: {e}"))
            })?;
        parts.headers.insert(header::HOST, host_header);

        let outgoing = Request::from_parts(parts, body);
        let method = outgoing.method().clone();
        let uri = outgoing.uri().clone();

        tracing::debug!("Relaying request: {} {}", method, uri);

        match self.client.request(outgoing).await {
            Ok(response) => {
                let (mut parts, hyper_body) = response.into_parts();

                // The body is re-framed on the way back to the caller
                parts.headers.remove(header::TRANSFER_ENCODING);

                Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
            }
            Err(e) => {
                tracing::error!("Error relaying {} {} to {}: {}", method, uri, target, e);
                Err(ForwardError::Connection(format!(
                    "Request to {method} {uri} failed: {e}"
                )))
            }
        }
    }
}
