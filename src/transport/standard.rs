//! Standard engine: reqwest-backed transport.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::debug;

use crate::config::{ConfigError, LoadConfig};
use crate::stats::RequestStat;

use super::{method_takes_body, method_takes_query_params, pick_param_set, Transport};

/// Transport built on the standard HTTP stack. Gets the full set of
/// timeout and idle-connection controls reqwest exposes.
pub struct StandardTransport {
    client: reqwest::Client,
    config: Arc<LoadConfig>,
    method: reqwest::Method,
    url: reqwest::Url,
}

impl StandardTransport {
    pub fn new(config: Arc<LoadConfig>) -> Result<Self, ConfigError> {
        let url =
            reqwest::Url::parse(&config.url).map_err(|source| ConfigError::InvalidUrl {
                url: config.url.clone(),
                source,
            })?;

        let method = reqwest::Method::from_bytes(config.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ConfigError::MissingMethod)?;

        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(config.connections);

        if !config.keep_alive.is_zero() {
            builder = builder.pool_idle_timeout(config.keep_alive);
        }
        if !config.timeout.is_zero() {
            builder = builder.timeout(config.timeout);
        }
        if !config.read_timeout.is_zero() {
            builder = builder.read_timeout(config.read_timeout);
        }
        // reqwest exposes no separate write timeout; the overall timeout
        // bounds the write side.
        if !config.write_timeout.is_zero() && config.timeout.is_zero() {
            builder = builder.timeout(config.write_timeout);
        }

        if config.tls.skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        } else if let Some(ca) = &config.tls.ca {
            let ca = reqwest::Certificate::from_pem(ca.as_bytes())
                .map_err(|e| ConfigError::Tls(format!("bad CA bundle: {}", e)))?;
            // The configured bundle is the sole trust root.
            builder = builder
                .tls_built_in_root_certs(false)
                .add_root_certificate(ca);
        }

        if config.tls.has_client_pair() {
            let identity = client_identity(&config)?;
            builder = builder.identity(identity);
        }

        let client = builder
            .build()
            .map_err(|e| ConfigError::Tls(e.to_string()))?;

        Ok(Self {
            client,
            config,
            method,
            url,
        })
    }
}

/// Combines the configured certificate and key PEM into a reqwest identity.
fn client_identity(config: &LoadConfig) -> Result<reqwest::Identity, ConfigError> {
    let cert = config.tls.cert.as_deref().unwrap_or_default();
    let key = config.tls.key.as_deref().unwrap_or_default();

    let mut pem = String::with_capacity(cert.len() + key.len() + 1);
    pem.push_str(cert);
    if !cert.ends_with('\n') {
        pem.push('\n');
    }
    pem.push_str(key);

    reqwest::Identity::from_pem(pem.as_bytes())
        .map_err(|e| ConfigError::Tls(format!("could not load X509 key pair: {}", e)))
}

#[async_trait::async_trait]
impl Transport for StandardTransport {
    async fn request(&self) -> RequestStat {
        let mut req = self.client.request(self.method.clone(), self.url.clone());

        for (name, values) in self.config.headers.iter() {
            for value in values {
                req = req.header(name, value);
            }
        }

        if let Some(body) = &self.config.body {
            if !body.is_empty() && method_takes_body(self.method.as_str()) {
                req = req.body(body.clone());
            }
        }

        if let Some(set) = pick_param_set(&self.config.params) {
            if method_takes_query_params(self.method.as_str()) {
                req = req.query(set);
            } else if method_takes_body(self.method.as_str()) {
                req = req.form(set);
            }
        }

        let start_wall = Utc::now();
        let start = Instant::now();

        match req.send().await {
            Ok(response) => {
                let ret_code = response.status().as_u16();

                // Drain the body fully before taking the end timestamp.
                match response.bytes().await {
                    Ok(body) => {
                        let duration = start.elapsed();
                        RequestStat {
                            start: start_wall,
                            end: Utc::now(),
                            duration,
                            body_size: body.len(),
                            ret_code,
                            error: String::new(),
                        }
                    }
                    Err(e) => {
                        let duration = start.elapsed();
                        debug!(error = %e, "response body read failed");
                        RequestStat::failed(start_wall, Utc::now(), duration, e.to_string())
                    }
                }
            }
            Err(e) => {
                let duration = start.elapsed();
                debug!(error = %e, "request failed");
                RequestStat::failed(start_wall, Utc::now(), duration, e.to_string())
            }
        }
    }
}
