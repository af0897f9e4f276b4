//! Configuration data structures for Crossbar.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files.
//! They are intentionally serde-friendly and include defaults so that
//! minimal configs remain concise.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Default pool ceiling for a backend group
fn default_max_backends() -> usize {
    8
}

/// Top-level server configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to, e.g. "0.0.0.0:8443"
    pub listen_addr: String,
    /// TLS material for the listener; plain HTTP when absent
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    /// Backend groups to register at startup
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            tls: None,
            groups: Vec::new(),
        }
    }
}

/// One backend group: an upstream target, its pool bound, and the routing
/// rules that select it
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GroupConfig {
    /// Name used in logs and error context
    pub name: String,
    /// Upstream host name or address
    pub host: String,
    /// Upstream port
    pub port: u16,
    /// Path prefixes routed to this group (matched case-insensitively)
    #[serde(default)]
    pub path_prefixes: Vec<String>,
    /// Header name -> value pairs routed to this group
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Hard ceiling on pooled backends for this group
    #[serde(default = "default_max_backends")]
    pub max_backends: usize,
}

/// TLS configuration for the listener: PEM certificate and private key
/// supplied as file paths. Their loading happens at startup, outside the
/// routing core.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TlsConfig {
    /// Path to the PEM encoded certificate chain
    pub cert_path: String,
    /// Path to the PEM encoded PKCS#8 private key
    pub key_path: String,
}
