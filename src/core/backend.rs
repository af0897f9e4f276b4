use std::{
    fmt,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;
use url::Url;

use crate::ports::forwarder::{ForwardResult, ForwardingEngine};

/// Errors related to backend construction
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BackendError {
    /// Error when the upstream target address cannot be parsed
    #[error("Invalid backend target: {0}")]
    InvalidTarget(String),
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// A validated upstream address (scheme, host, port).
///
/// Parsing happens once, at group registration time, so that lazy backend
/// creation on the serving path cannot fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetUrl {
    url: Url,
}

impl TargetUrl {
    /// Parse and validate a target address string
    ///
    /// # Arguments
    /// * `target` - The address to validate, e.g. `http://10.0.0.5:8080`
    ///
    /// # Returns
    /// A result containing the TargetUrl or an error
    pub fn new(target: &str) -> BackendResult<Self> {
        let url = Url::parse(target)
            .map_err(|e| BackendError::InvalidTarget(format!("{target}: {e}")))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(BackendError::InvalidTarget(format!(
                "target scheme must be 'http' or 'https', got '{}'",
                url.scheme()
            )));
        }

        if url.host_str().is_none() {
            return Err(BackendError::InvalidTarget(format!(
                "target must have a host: {target}"
            )));
        }

        Ok(TargetUrl { url })
    }

    /// Build a plain-HTTP target from a host and port pair
    pub fn from_host_port(host: &str, port: u16) -> BackendResult<Self> {
        Self::new(&format!("http://{host}:{port}"))
    }

    /// Get the underlying URL as a string reference
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// The target host name or address
    pub fn host(&self) -> &str {
        // validated at construction
        self.url.host_str().unwrap_or_default()
    }

    /// The target port, falling back to the scheme default
    pub fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(80)
    }

    /// The target scheme ("http" or "https")
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Check if the target is using HTTPS
    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "https"
    }
}

impl FromStr for TargetUrl {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TargetUrl::new(s)
    }
}

impl fmt::Display for TargetUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// One upstream target plus the forwarding handle bound to it.
///
/// Backends are created lazily by their owning [`BackendGroup`] and live for
/// the rest of the process; the group's pool slot tracks whether a backend is
/// currently handed out.
///
/// [`BackendGroup`]: crate::core::group::BackendGroup
pub struct Backend {
    target: TargetUrl,
    /// Reserved for future liveness tracking; never consulted when handing
    /// out backends.
    alive: AtomicBool,
    engine: Arc<dyn ForwardingEngine>,
}

impl Backend {
    /// Construct a backend from a target address string
    ///
    /// Fails with [`BackendError::InvalidTarget`] if the address cannot be
    /// parsed; the caller must abort registration rather than crash.
    pub fn new(target: &str, engine: Arc<dyn ForwardingEngine>) -> BackendResult<Self> {
        Ok(Self::from_target(TargetUrl::new(target)?, engine))
    }

    /// Construct a backend from an already-validated target
    pub(crate) fn from_target(target: TargetUrl, engine: Arc<dyn ForwardingEngine>) -> Self {
        Self {
            target,
            alive: AtomicBool::new(false),
            engine,
        }
    }

    /// The upstream address this backend is bound to
    pub fn target(&self) -> &TargetUrl {
        &self.target
    }

    /// Liveness flag, reserved for future health checking
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Set the liveness flag, reserved for future health checking
    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Release);
    }

    /// Relay one request/response exchange through this backend's engine
    pub async fn forward(&self, req: Request<AxumBody>) -> ForwardResult<Response<AxumBody>> {
        self.engine.forward(&self.target, req).await
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("target", &self.target)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}
