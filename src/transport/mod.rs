//! HTTP transports.
//!
//! Two interchangeable engines produce one `RequestStat` per invocation:
//! [`fast::FastTransport`] drives a raw pooled hyper client, while
//! [`standard::StandardTransport`] goes through reqwest for full timeout and
//! idle-connection control. Both honor the configured TLS material, pick a
//! parameter set uniformly at random, and turn every network failure into a
//! `RequestStat` with a non-empty error — a transport never panics and never
//! returns an `Err`.

mod fast;
mod standard;
mod tls;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ConfigError, Engine, LoadConfig, ParamSets};
use crate::stats::RequestStat;

pub use fast::FastTransport;
pub use standard::StandardTransport;

/// Capability shared by both engines: perform one request.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self) -> RequestStat;
}

/// Builds the transport selected by the configuration.
pub fn build(config: Arc<LoadConfig>) -> Result<Arc<dyn Transport>, ConfigError> {
    match config.engine {
        Engine::Fast => Ok(Arc::new(FastTransport::new(config)?)),
        Engine::Standard => Ok(Arc::new(StandardTransport::new(config)?)),
    }
}

/// Picks one parameter set uniformly at random.
///
/// Uses the thread-local RNG so concurrent workers never serialize on shared
/// state; it is reseeded from the OS entropy source.
pub(crate) fn pick_param_set(params: &ParamSets) -> Option<&BTreeMap<String, String>> {
    use rand::seq::SliceRandom;

    params.sets().choose(&mut rand::thread_rng())
}

/// Whether the configured body (and form-encoded parameters) apply to this
/// method.
pub(crate) fn method_takes_body(method: &str) -> bool {
    method.eq_ignore_ascii_case("POST") || method.eq_ignore_ascii_case("PUT")
}

/// Whether parameter sets merge into the query string for this method.
pub(crate) fn method_takes_query_params(method: &str) -> bool {
    method.eq_ignore_ascii_case("GET")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_is_none_for_empty_sets() {
        let params = ParamSets::new();
        assert!(pick_param_set(&params).is_none());
    }

    #[test]
    fn pick_covers_all_sets() {
        let mut params = ParamSets::new();
        params.set("a=1").unwrap();
        params.set("a=2").unwrap();
        params.set("a=3").unwrap();

        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..200 {
            let set = pick_param_set(&params).unwrap();
            seen.insert(set["a"].clone());
        }

        // With 200 draws over 3 sets, missing one is practically impossible.
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn body_applies_to_post_and_put_only() {
        assert!(method_takes_body("POST"));
        assert!(method_takes_body("put"));
        assert!(!method_takes_body("GET"));
        assert!(!method_takes_body("DELETE"));
    }
}
