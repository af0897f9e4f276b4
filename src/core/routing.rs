//! Two-axis routing table: path prefixes and header rules.
//!
//! The table is populated during startup registration and immutable
//! afterwards; serving-time lookups run against a shared reference with no
//! lock. Registration is two-phase: every rule of a group is validated
//! against the existing entries before any of them is committed, so a
//! conflicting group leaves the table untouched.
use std::{collections::HashMap, sync::Arc};

use thiserror::Error;

use crate::core::group::BackendGroup;

/// Errors related to route registration and resolution
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RoutingError {
    /// Error when a path prefix is already registered to another group
    #[error("Conflict: path prefix '{0}' is already registered")]
    PrefixConflict(String),

    /// Error when a header name/value pair is already registered
    #[error("Conflict: header rule '{name}: {value}' is already registered")]
    HeaderConflict {
        /// The conflicting header name
        name: String,
        /// The conflicting header value
        value: String,
    },

    /// Error when no group accepts the request path
    #[error("no backend group accepts path '{0}'")]
    NoRouteForPath(String),

    /// Error when no group accepts the header pair
    #[error("no backend group accepts header '{name}: {value}'")]
    NoRouteForHeader {
        /// The header name that was probed
        name: String,
        /// The header value that was probed
        value: String,
    },
}

/// Result type for routing operations
pub type RoutingResult<T> = Result<T, RoutingError>;

/// Maps path prefixes and header (name, value) pairs to backend groups.
///
/// Prefixes and header names are matched case-insensitively (both are stored
/// lower-cased by [`BackendGroup`]); header values are matched exactly. The
/// table holds shared references to groups, not their lifecycle.
#[derive(Debug, Default)]
pub struct RoutingTable {
    by_prefix: HashMap<String, Arc<BackendGroup>>,
    by_header: HashMap<String, HashMap<String, Arc<BackendGroup>>>,
}

impl RoutingTable {
    /// Create an empty routing table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every prefix and header rule of a group, atomically.
    ///
    /// Validation runs over all rules first; the first key that is already
    /// taken fails the whole group with a conflict error and nothing is
    /// committed. Prefix *overlap* ("/api" vs "/api/v2") is not a conflict:
    /// overlapping prefixes are disambiguated at resolution time by
    /// longest-prefix match.
    pub fn register_group(&mut self, group: Arc<BackendGroup>) -> RoutingResult<()> {
        for prefix in group.path_prefixes() {
            if self.by_prefix.contains_key(prefix) {
                return Err(RoutingError::PrefixConflict(prefix.clone()));
            }
        }
        for (name, value) in group.header_rules() {
            if let Some(bucket) = self.by_header.get(name) {
                if bucket.contains_key(value) {
                    return Err(RoutingError::HeaderConflict {
                        name: name.clone(),
                        value: value.clone(),
                    });
                }
            }
        }

        for prefix in group.path_prefixes() {
            self.by_prefix.insert(prefix.clone(), group.clone());
        }
        for (name, value) in group.header_rules() {
            // entry() keeps a freshly created per-name bucket in the table
            self.by_header
                .entry(name.clone())
                .or_default()
                .insert(value.clone(), group.clone());
        }

        Ok(())
    }

    /// Exact-match prefix lookup, case-insensitive.
    ///
    /// Used by registration conflict checks; request routing goes through
    /// [`resolve_path_prefix`](Self::resolve_path_prefix).
    pub fn resolve_exact_path(&self, path: &str) -> RoutingResult<Arc<BackendGroup>> {
        let lower = path.to_ascii_lowercase();
        self.by_prefix
            .get(&lower)
            .cloned()
            .ok_or_else(|| RoutingError::NoRouteForPath(path.to_string()))
    }

    /// Resolve a request path to the group with the longest matching prefix.
    ///
    /// Every registered prefix is examined; ties in length (only possible
    /// between identical strings, which registration forbids) fall to the
    /// lexicographically smaller prefix so resolution is deterministic
    /// regardless of map iteration order.
    pub fn resolve_path_prefix(&self, path: &str) -> RoutingResult<Arc<BackendGroup>> {
        let lower = path.to_ascii_lowercase();
        self.by_prefix
            .iter()
            .filter(|(prefix, _)| lower.starts_with(prefix.as_str()))
            .max_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| b.cmp(a)))
            .map(|(_, group)| group.clone())
            .ok_or_else(|| RoutingError::NoRouteForPath(path.to_string()))
    }

    /// Resolve a header pair to its registered group.
    ///
    /// Header names are matched case-insensitively, per HTTP field-name
    /// semantics; values are matched exactly.
    pub fn resolve_header(&self, name: &str, value: &str) -> RoutingResult<Arc<BackendGroup>> {
        let lower = name.to_ascii_lowercase();
        self.by_header
            .get(&lower)
            .and_then(|bucket| bucket.get(value))
            .cloned()
            .ok_or_else(|| RoutingError::NoRouteForHeader {
                name: name.to_string(),
                value: value.to_string(),
            })
    }

    /// Registered prefixes and their groups, for startup logging
    pub fn prefixes(&self) -> impl Iterator<Item = (&String, &Arc<BackendGroup>)> {
        self.by_prefix.iter()
    }

    /// Registered header rules and their groups, for startup logging
    pub fn header_rules(&self) -> impl Iterator<Item = (&String, &String, &Arc<BackendGroup>)> {
        self.by_header.iter().flat_map(|(name, bucket)| {
            bucket.iter().map(move |(value, group)| (name, value, group))
        })
    }

    /// Number of registered path prefixes
    pub fn prefix_count(&self) -> usize {
        self.by_prefix.len()
    }
}
