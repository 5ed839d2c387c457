// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mutual-TLS material loading for the gRPC stream. Missing CA/cert/key
//! paths are hard startup errors on both sides.

use anyhow::{bail, Context};
use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

use crate::config::TlsConfig;

fn load_identity(cfg: &TlsConfig) -> anyhow::Result<(Certificate, Identity)> {
    if cfg.ca_file.is_empty() || cfg.cert_file.is_empty() || cfg.key_file.is_empty() {
        bail!("tls requires ca_file/cert_file/key_file");
    }
    let ca = std::fs::read(&cfg.ca_file).with_context(|| format!("read ca file {}", cfg.ca_file))?;
    let cert = std::fs::read(&cfg.cert_file)
        .with_context(|| format!("read cert file {}", cfg.cert_file))?;
    let key =
        std::fs::read(&cfg.key_file).with_context(|| format!("read key file {}", cfg.key_file))?;
    Ok((Certificate::from_pem(ca), Identity::from_pem(cert, key)))
}

/// Client-side config: trust the fleet CA, present the agent certificate.
pub fn load_client_tls(cfg: &TlsConfig) -> anyhow::Result<ClientTlsConfig> {
    let (ca, identity) = load_identity(cfg)?;
    let mut tls = ClientTlsConfig::new().ca_certificate(ca).identity(identity);
    if !cfg.server_name_override.is_empty() {
        tls = tls.domain_name(cfg.server_name_override.clone());
    }
    Ok(tls)
}

/// Server-side config: present the server certificate, require and verify
/// client certificates against the fleet CA.
pub fn load_server_tls(cfg: &TlsConfig) -> anyhow::Result<ServerTlsConfig> {
    let (ca, identity) = load_identity(cfg)?;
    Ok(ServerTlsConfig::new().identity(identity).client_ca_root(ca))
}
