use std::{fs::File, io::BufReader};

use eyre::{Context, Result, eyre};
use rustls::ServerConfig;
use rustls_pemfile::{certs, pkcs8_private_keys};

/// Build a rustls server configuration from PEM certificate and key paths.
///
/// The paths come straight from the configuration file; loading happens once
/// at startup, before the listener is bound.
pub fn load_server_config(cert_path: &str, key_path: &str) -> Result<ServerConfig> {
    let cert_file = &mut BufReader::new(
        File::open(cert_path).with_context(|| format!("failed to open cert file {cert_path}"))?,
    );
    let key_file = &mut BufReader::new(
        File::open(key_path).with_context(|| format!("failed to open key file {key_path}"))?,
    );

    let cert_chain = certs(cert_file).collect::<Result<Vec<_>, _>>()?;
    let key = pkcs8_private_keys(key_file)
        .next()
        .transpose()?
        .ok_or_else(|| eyre!("No PKCS#8 private key found in key file"))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key.into())?;

    Ok(config)
}
