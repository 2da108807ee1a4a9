//! Load configuration model, parsing and validation.
//!
//! A `LoadConfig` describes one benchmark: the target, the request shape,
//! and every knob the engine honors. A `Campaign` is a named, tagged
//! `LoadConfig` as stored in the database.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONNECTIONS: usize = 10;
pub const DEFAULT_REQUEST_COUNT: u64 = 1000;

/// Configuration errors with descriptive messages.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("bad url format '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("HTTP request method has to be set")]
    MissingMethod,

    #[error("number of connections has to be at least 1")]
    NoConnections,

    #[error("requests count or duration has to be set")]
    NoTerminationCondition,

    #[error("wrong header format: '{0}'")]
    BadHeader(String),

    #[error("could not parse parameter '{0}'")]
    BadParameter(String),

    #[error("unknown http engine '{0}'")]
    UnknownEngine(String),

    #[error("could not load TLS material: {0}")]
    Tls(String),

    #[error("could not read configuration file: {0}")]
    File(String),
}

/// Choice of HTTP client backing the transport.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    /// Raw pooled hyper client, throughput-oriented.
    #[default]
    Fast,
    /// reqwest client, full timeout and idle-connection control.
    Standard,
}

impl FromStr for Engine {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(Engine::Fast),
            "standard" => Ok(Engine::Standard),
            other => Err(ConfigError::UnknownEngine(other.to_string())),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Engine::Fast => write!(f, "fast"),
            Engine::Standard => write!(f, "standard"),
        }
    }
}

/// Header multimap: name to ordered sequence of values.
///
/// Multi-valued headers are sent as separate header lines on each request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, Vec<String>>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a `"name: value"` line into the map.
    ///
    /// Both sides are trimmed; the name must be non-empty and contain no
    /// internal whitespace.
    pub fn set(&mut self, header: &str) -> Result<(), ConfigError> {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| ConfigError::BadHeader(header.to_string()))?;

        let name = name.trim();
        let value = value.trim();

        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(ConfigError::BadHeader(header.to_string()));
        }

        self.0
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Flattens the map back into `"name:value"` lines.
    pub fn lines(&self) -> Vec<String> {
        self.0
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| format!("{}:{}", name, v)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Ordered sequence of parameter mappings; the transport picks one mapping
/// uniformly at random per request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSets(Vec<BTreeMap<String, String>>);

impl ParamSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a `"key1=value1&key2=value2"` string into one parameter set.
    pub fn set(&mut self, value: &str) -> Result<(), ConfigError> {
        let mut set = BTreeMap::new();

        for pair in value.split('&') {
            let parts: Vec<&str> = pair.split('=').collect();
            if parts.len() != 2 {
                return Err(ConfigError::BadParameter(value.to_string()));
            }
            set.insert(parts[0].to_string(), parts[1].to_string());
        }

        self.0.push(set);
        Ok(())
    }

    pub fn sets(&self) -> &[BTreeMap<String, String>] {
        &self.0
    }

    /// Serializes each set back into `"k=v&k=v"` strings.
    pub fn lines(&self) -> Vec<String> {
        self.0
            .iter()
            .map(|set| {
                set.iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join("&")
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// TLS material, held as PEM text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsOptions {
    /// Disable certificate validation entirely.
    #[serde(default)]
    pub skip_verify: bool,

    /// CA bundle; when set it is the sole trust root.
    #[serde(default)]
    pub ca: Option<String>,

    /// Client certificate chain, presented together with `key`.
    #[serde(default)]
    pub cert: Option<String>,

    /// Client private key.
    #[serde(default)]
    pub key: Option<String>,
}

impl TlsOptions {
    pub fn has_client_pair(&self) -> bool {
        matches!((&self.cert, &self.key), (Some(c), Some(k)) if !c.is_empty() && !k.is_empty())
    }
}

/// Serde helper storing durations as humantime strings ("10s", "1m30s").
mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(de)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Immutable description of one benchmark run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Target URL.
    pub url: String,

    /// HTTP method; GET, POST and PUT get parameter application, other
    /// methods are passed through unmodified.
    pub method: String,

    /// Request body, sent only for POST and PUT.
    pub body: Option<String>,

    pub headers: Headers,
    pub params: ParamSets,
    pub tls: TlsOptions,

    /// Worker count; also the connection-pool size.
    pub connections: usize,

    /// Total requests to issue; ignored when `duration` is set.
    pub request_count: u64,

    /// Run length; when non-zero it is the primary termination condition.
    #[serde(with = "duration_str")]
    pub duration: Duration,

    /// Hard deadline for count-driven runs.
    #[serde(with = "duration_str")]
    pub benchmark_timeout: Duration,

    /// Abort the run after this many failures (0 disables).
    pub abort_after: u64,

    /// Requests per second allowed (0 disables).
    pub rate_limit: u32,

    /// Minimum spacing between consecutive requests of one worker.
    #[serde(with = "duration_str")]
    pub request_delay: Duration,

    /// Idle connection keep-alive.
    #[serde(with = "duration_str")]
    pub keep_alive: Duration,

    #[serde(with = "duration_str")]
    pub read_timeout: Duration,

    #[serde(with = "duration_str")]
    pub write_timeout: Duration,

    /// Overall per-request timeout.
    #[serde(with = "duration_str")]
    pub timeout: Duration,

    /// Width of the aggregation windows (0 disables windowing).
    #[serde(with = "duration_str")]
    pub aggregate_window: Duration,

    /// Keep every `RequestStat` in the summary.
    pub gather_full_stats: bool,

    /// Maintain per-window aggregates.
    pub gather_aggregated_stats: bool,

    pub engine: Engine,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: "GET".to_string(),
            body: None,
            headers: Headers::new(),
            params: ParamSets::new(),
            tls: TlsOptions::default(),
            connections: DEFAULT_CONNECTIONS,
            request_count: 0,
            duration: Duration::ZERO,
            benchmark_timeout: Duration::ZERO,
            abort_after: 0,
            rate_limit: 0,
            request_delay: Duration::ZERO,
            keep_alive: Duration::ZERO,
            read_timeout: Duration::ZERO,
            write_timeout: Duration::ZERO,
            timeout: Duration::ZERO,
            aggregate_window: Duration::ZERO,
            gather_full_stats: false,
            gather_aggregated_stats: false,
            engine: Engine::default(),
        }
    }
}

impl LoadConfig {
    /// Checks the invariants the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.url).map_err(|source| ConfigError::InvalidUrl {
            url: self.url.clone(),
            source,
        })?;

        if self.method.is_empty() {
            return Err(ConfigError::MissingMethod);
        }

        if self.connections == 0 {
            return Err(ConfigError::NoConnections);
        }

        if self.request_count == 0 && self.duration.is_zero() {
            return Err(ConfigError::NoTerminationCondition);
        }

        Ok(())
    }

    /// Requests to issue after resolving the primary termination condition:
    /// a set duration wins and the count is ignored.
    pub fn effective_request_count(&self) -> u64 {
        if self.duration.is_zero() {
            self.request_count
        } else {
            0
        }
    }

    /// Loads a config from a YAML (or JSON, which YAML subsumes) file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::File(format!("{}: {}", path.display(), e)))?;
        serde_yaml::from_str(&raw)
            .map_err(|e| ConfigError::File(format!("{}: {}", path.display(), e)))
    }
}

/// Key/value label attached to a stored campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,

    #[serde(default)]
    pub create_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub update_date: Option<DateTime<Utc>>,
}

impl Tag {
    /// Parses a `"key=value"` (or bare `"key"`) tag argument.
    pub fn parse(s: &str) -> Self {
        match s.split_once('=') {
            Some((k, v)) => Tag {
                key: k.to_string(),
                value: v.to_string(),
                create_date: None,
                update_date: None,
            },
            None => Tag {
                key: s.to_string(),
                value: String::new(),
                create_date: None,
                update_date: None,
            },
        }
    }
}

/// A stored load configuration with its identity and labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub uuid: Option<String>,
    pub name: String,
    pub description: String,
    pub create_date: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub config: LoadConfig,

    #[serde(default)]
    pub tags: Vec<Tag>,
}
