use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::ServerConfig;

/// Load configuration from a file using the config crate
/// Supports multiple formats: YAML, JSON, TOML, etc.
pub fn load_config(config_path: &str) -> Result<ServerConfig> {
    let config_path = Path::new(config_path);

    // Determine file format based on extension
    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Toml, // Default to TOML
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let server_config: ServerConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(server_config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn test_load_toml_config() {
        let toml_content = r#"
listen_addr = "127.0.0.1:8443"

[[groups]]
name = "api"
host = "10.0.0.5"
port = 8080
path_prefixes = ["/api"]
max_backends = 4

[groups.headers]
"x-service" = "api"
"#;

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:8443");
        assert_eq!(config.groups.len(), 1);
        assert_eq!(config.groups[0].max_backends, 4);
        assert_eq!(
            config.groups[0].headers.get("x-service"),
            Some(&"api".to_string())
        );
        assert!(config.tls.is_none());
    }

    #[test]
    fn test_load_yaml_config() {
        let yaml_content = r#"
listen_addr: "127.0.0.1:8443"
groups:
  - name: "search"
    host: "search.internal"
    port: 9200
    path_prefixes: ["/search"]
"#;

        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.groups.len(), 1);
        // unset pool ceiling falls back to the default
        assert_eq!(config.groups[0].max_backends, 8);
    }

    #[test]
    fn test_load_json_config() {
        let json_content = r#"
{
  "listen_addr": "127.0.0.1:8443",
  "tls": { "cert_path": "server.crt", "key_path": "server.key" },
  "groups": [
    { "name": "api", "host": "10.0.0.5", "port": 8080, "path_prefixes": ["/api"] }
  ]
}
"#;

        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, "{}", json_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap()).unwrap();
        assert!(config.tls.is_some());
        assert_eq!(config.groups[0].port, 8080);
    }
}
