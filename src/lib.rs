//! Crossbar - a reverse-proxy load balancer.
//!
//! Crossbar accepts inbound HTTP(S) requests and forwards each one to an
//! upstream selected from a registered set of backend groups, chosen by URL
//! path prefix or request header match. The crate follows a **hexagonal
//! architecture**: business logic lives in `core`, the interfaces it depends
//! on live in `ports`, and their implementations in `adapters`.
//!
//! # Building blocks
//! - [`RoutingTable`] maps path prefixes and header (name, value) pairs to
//!   backend groups, with conflict detection at registration time and
//!   longest-prefix resolution at serving time
//! - [`BackendGroup`] is a capacity-bounded pool that lazily creates, hands
//!   out, and reclaims upstream backends under one per-group lock
//! - [`Dispatcher`] resolves, acquires, forwards, and guarantees the release
//!   of the acquired backend on every exit path
//! - [`ForwardingEngine`] is the port the core delegates the byte-level
//!   request/response exchange to; [`HttpForwarder`] is the shipped
//!   hyper/rustls implementation
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use crossbar::{adapters::HttpForwarder, config, core::build_dispatcher};
//!
//! # fn main() -> eyre::Result<()> {
//! let cfg = config::load_config("config.toml")?;
//! let engine = Arc::new(HttpForwarder::new()?);
//! let dispatcher = build_dispatcher(&cfg, engine)?;
//! // Wire `dispatcher.dispatch` into an axum route (see the binary crate)
//! # Ok(()) }
//! ```
//!
//! # Concurrency model
//! The routing table is populated during startup registration and shared
//! immutably afterwards, so serving-time lookups take no lock. Each backend
//! group owns one mutex over its pool; unrelated groups never contend.
//!
//! # Error Handling
//! All fallible APIs return `eyre::Result<T>` or a domain specific error
//! type (`thiserror` enums, one per module).
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

// These modules are implementation details and should not be directly used by users
pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::HttpForwarder,
    core::{Backend, BackendGroup, BackendLease, Dispatcher, RoutingTable, build_dispatcher},
    ports::forwarder::ForwardingEngine,
    utils::GracefulShutdown,
};
