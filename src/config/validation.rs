use std::{collections::HashSet, net::SocketAddr};

use eyre::Result;
use regex::Regex;

use crate::config::models::{GroupConfig, ServerConfig, TlsConfig};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid TLS configuration: {message}")]
    InvalidTls { message: String },

    #[error("Rule conflict detected: {message}")]
    RuleConflict { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Server configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire server configuration
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if config.groups.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "groups".to_string(),
            });
        } else {
            for group in &config.groups {
                if let Err(mut group_errors) = Self::validate_group(group) {
                    errors.append(&mut group_errors);
                }
            }
        }

        if let Err(mut conflict_errors) = Self::check_rule_conflicts(&config.groups) {
            errors.append(&mut conflict_errors);
        }

        if let Some(tls_config) = &config.tls {
            if let Err(e) = Self::validate_tls_config(tls_config) {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:8443' or '0.0.0.0:443')"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// Validate a single backend group configuration
    fn validate_group(group: &GroupConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let name = if group.name.is_empty() {
            "<unnamed>"
        } else {
            group.name.as_str()
        };

        if group.name.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "group name".to_string(),
            });
        }

        if let Err(e) = Self::validate_host(&group.host, name) {
            errors.push(e);
        }

        if group.port == 0 {
            errors.push(ValidationError::InvalidField {
                field: format!("group '{name}' port"),
                message: "Port must be greater than 0".to_string(),
            });
        }

        if group.max_backends == 0 {
            errors.push(ValidationError::InvalidField {
                field: format!("group '{name}' max_backends"),
                message: "Pool capacity must be greater than 0".to_string(),
            });
        }

        if group.path_prefixes.is_empty() && group.headers.is_empty() {
            errors.push(ValidationError::InvalidField {
                field: format!("group '{name}' rules"),
                message: "A group must accept at least one path prefix or header pair"
                    .to_string(),
            });
        }

        for prefix in &group.path_prefixes {
            if !prefix.starts_with('/') {
                errors.push(ValidationError::InvalidField {
                    field: format!("group '{name}' path prefix: {prefix}"),
                    message: "Path prefixes must start with '/'".to_string(),
                });
            }
        }

        for (header_name, header_value) in &group.headers {
            if header_name.trim().is_empty() {
                errors.push(ValidationError::InvalidField {
                    field: format!("group '{name}' headers"),
                    message: "Header names cannot be empty".to_string(),
                });
            }
            if header_value.is_empty() {
                errors.push(ValidationError::InvalidField {
                    field: format!("group '{name}' header '{header_name}'"),
                    message: "Header values cannot be empty".to_string(),
                });
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Check for rules claimed by more than one group.
    ///
    /// Registration enforces the same uniqueness atomically; catching it
    /// here lets `validate` report every duplicate in one pass instead of
    /// aborting on the first.
    fn check_rule_conflicts(groups: &[GroupConfig]) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut seen_prefixes: HashSet<String> = HashSet::new();
        let mut seen_headers: HashSet<(String, String)> = HashSet::new();

        for group in groups {
            for prefix in &group.path_prefixes {
                if !seen_prefixes.insert(prefix.to_ascii_lowercase()) {
                    errors.push(ValidationError::RuleConflict {
                        message: format!(
                            "path prefix '{prefix}' is claimed by more than one group"
                        ),
                    });
                }
            }
            for (header_name, header_value) in &group.headers {
                let key = (header_name.to_ascii_lowercase(), header_value.clone());
                if !seen_headers.insert(key) {
                    errors.push(ValidationError::RuleConflict {
                        message: format!(
                            "header rule '{header_name}: {header_value}' is claimed by more than one group"
                        ),
                    });
                }
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Validate TLS configuration
    fn validate_tls_config(config: &TlsConfig) -> ValidationResult<()> {
        if !std::path::Path::new(&config.cert_path).exists() {
            return Err(ValidationError::InvalidTls {
                message: format!("Certificate file does not exist: {}", config.cert_path),
            });
        }

        if !std::path::Path::new(&config.key_path).exists() {
            return Err(ValidationError::InvalidTls {
                message: format!("Private key file does not exist: {}", config.key_path),
            });
        }

        Ok(())
    }

    /// Validate host field format
    fn validate_host(host: &str, group_name: &str) -> ValidationResult<()> {
        if host.is_empty() {
            return Err(ValidationError::MissingField {
                field: format!("group '{group_name}' host"),
            });
        }

        if host.contains("://") {
            return Err(ValidationError::InvalidField {
                field: format!("group '{group_name}' host"),
                message: "Host should not contain protocol (e.g., use 'example.com' not 'http://example.com')".to_string(),
            });
        }

        // Simple hostname validation; dotted IPv4 literals match too
        let hostname_regex = Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?)*$").expect("invalid hostname regex");

        if !hostname_regex.is_match(host) {
            return Err(ValidationError::InvalidField {
                field: format!("group '{group_name}' host"),
                message: format!("Invalid hostname format: '{host}'"),
            });
        }

        Ok(())
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
