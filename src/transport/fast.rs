//! Fast engine: raw pooled hyper client.
//!
//! Skips the high-level client stack entirely: the request head and body are
//! prebuilt once, so the per-request hot path is a clone, an optional query
//! merge, and the exchange itself.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use crate::config::{ConfigError, LoadConfig};
use crate::stats::RequestStat;

use super::{method_takes_body, method_takes_query_params, pick_param_set, tls, Transport};

type PooledClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

pub struct FastTransport {
    client: PooledClient,
    config: Arc<LoadConfig>,
    method: http::Method,
    base_url: url::Url,
    headers: http::HeaderMap,
    body: Bytes,
}

impl FastTransport {
    pub fn new(config: Arc<LoadConfig>) -> Result<Self, ConfigError> {
        let base_url =
            url::Url::parse(&config.url).map_err(|source| ConfigError::InvalidUrl {
                url: config.url.clone(),
                source,
            })?;

        let method = http::Method::from_bytes(config.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ConfigError::MissingMethod)?;

        let headers = build_header_map(&config)?;

        let needs_custom_tls = config.tls.skip_verify
            || config.tls.ca.is_some()
            || config.tls.has_client_pair();

        let connector = hyper_rustls::HttpsConnectorBuilder::new();
        let connector = if needs_custom_tls {
            connector
                .with_tls_config(tls::client_config(&config.tls)?)
                .https_or_http()
                .enable_http1()
                .build()
        } else {
            connector
                .with_native_roots()
                .map_err(|e| ConfigError::Tls(format!("could not load native roots: {}", e)))?
                .https_or_http()
                .enable_http1()
                .build()
        };

        let mut client_builder = Client::builder(TokioExecutor::new());
        client_builder.pool_max_idle_per_host(config.connections);
        if !config.keep_alive.is_zero() {
            client_builder.pool_idle_timeout(config.keep_alive);
        }
        let client: PooledClient = client_builder.build(connector);

        let body = match (&config.body, method_takes_body(method.as_str())) {
            (Some(body), true) if !body.is_empty() => Bytes::from(body.clone().into_bytes()),
            _ => Bytes::new(),
        };

        Ok(Self {
            client,
            config,
            method,
            base_url,
            headers,
            body,
        })
    }

    /// The single deadline applied to the exchange: the tighter of the read
    /// and overall timeouts. Write timeouts collapse into the overall
    /// deadline on this engine.
    fn deadline(&self) -> Option<Duration> {
        [
            self.config.timeout,
            self.config.read_timeout,
            self.config.write_timeout,
        ]
        .into_iter()
        .filter(|d| !d.is_zero())
        .min()
    }
}

fn build_header_map(config: &LoadConfig) -> Result<http::HeaderMap, ConfigError> {
    let mut map = http::HeaderMap::new();
    for (name, values) in config.headers.iter() {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ConfigError::BadHeader(name.to_string()))?;
        for value in values {
            let value = HeaderValue::from_str(value)
                .map_err(|_| ConfigError::BadHeader(value.clone()))?;
            map.append(name.clone(), value);
        }
    }
    Ok(map)
}

#[async_trait::async_trait]
impl Transport for FastTransport {
    async fn request(&self) -> RequestStat {
        let mut url = self.base_url.clone();
        let mut body = self.body.clone();
        let mut form_encoded = false;

        if let Some(set) = pick_param_set(&self.config.params) {
            if method_takes_query_params(self.method.as_str()) {
                url.query_pairs_mut().extend_pairs(set.iter());
            } else if method_takes_body(self.method.as_str()) {
                let encoded = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(set.iter())
                    .finish();
                body = Bytes::from(encoded.into_bytes());
                form_encoded = true;
            }
        }

        let start_wall = Utc::now();
        let start = Instant::now();

        let uri: http::Uri = match url.as_str().parse() {
            Ok(uri) => uri,
            Err(e) => {
                return RequestStat::failed(
                    start_wall,
                    Utc::now(),
                    start.elapsed(),
                    format!("bad request uri: {}", e),
                );
            }
        };

        let mut req = http::Request::new(Full::new(body));
        *req.method_mut() = self.method.clone();
        *req.uri_mut() = uri;
        *req.headers_mut() = self.headers.clone();
        if form_encoded {
            req.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            );
        }

        let exchange = async {
            let response = self
                .client
                .request(req)
                .await
                .map_err(|e| e.to_string())?;

            let ret_code = response.status().as_u16();

            // Drain the body fully before taking the end timestamp.
            let collected = response
                .into_body()
                .collect()
                .await
                .map_err(|e| e.to_string())?;

            Ok::<_, String>((ret_code, collected.to_bytes().len()))
        };

        let outcome = match self.deadline() {
            Some(deadline) => match tokio::time::timeout(deadline, exchange).await {
                Ok(outcome) => outcome,
                Err(_) => Err(format!(
                    "request timed out after {}",
                    humantime::format_duration(deadline)
                )),
            },
            None => exchange.await,
        };

        let duration = start.elapsed();

        match outcome {
            Ok((ret_code, body_size)) => RequestStat {
                start: start_wall,
                end: Utc::now(),
                duration,
                body_size,
                ret_code,
                error: String::new(),
            },
            Err(error) => {
                debug!(error = %error, "request failed");
                RequestStat::failed(start_wall, Utc::now(), duration, error)
            }
        }
    }
}
