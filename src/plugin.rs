//! Plugin extension point.
//!
//! Third-party adapters register a factory under a provider tag at startup.
//! The registry is read-only once construction finishes — there is no
//! runtime unregister, matching the spec's "no hot-reload" non-goal.

use std::collections::HashMap;

use dashmap::DashMap;

use crate::adapters::Adapter;
use crate::config::BackendConfig;
use crate::error::RouterError;

#[derive(Debug, Clone)]
pub struct PluginMetadata {
    pub plugin_id: String,
    pub name: String,
    pub version: String,
    pub author: String,
    pub supported_backend_types: Vec<String>,
}

/// Produces a boxed adapter for a given backend configuration. Implemented
/// by plugin crates; `custom_backend_type` on the config selects which
/// factory handles it.
pub trait AdapterFactory: Send + Sync {
    fn metadata(&self) -> PluginMetadata;

    fn build(&self, config: &BackendConfig, client: reqwest::Client) -> Result<Box<dyn Adapter>, RouterError>;
}

/// Registration happens once at startup; lookups happen on every backend
/// construction, so a concurrent map is used even though writes are
/// single-threaded in practice.
#[derive(Default)]
pub struct PluginRegistry {
    factories: DashMap<String, std::sync::Arc<dyn AdapterFactory>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self { factories: DashMap::new() }
    }

    pub fn register(&self, tag: impl Into<String>, factory: std::sync::Arc<dyn AdapterFactory>) {
        self.factories.insert(tag.into(), factory);
    }

    pub fn build(&self, tag: &str, config: &BackendConfig, client: reqwest::Client) -> Result<Box<dyn Adapter>, RouterError> {
        let factory = self
            .factories
            .get(tag)
            .ok_or_else(|| RouterError::BadRequest(format!("no plugin registered for backend type '{tag}'")))?;
        factory.build(config, client)
    }

    pub fn registered_tags(&self) -> Vec<String> {
        self.factories.iter().map(|e| e.key().clone()).collect()
    }

    pub fn metadata(&self) -> HashMap<String, PluginMetadata> {
        self.factories.iter().map(|e| (e.key().clone(), e.value().metadata())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendType};
    use crate::request::ChatRequest;
    use crate::response::Response;
    use async_trait::async_trait;

    struct EchoAdapter;

    #[async_trait]
    impl Adapter for EchoAdapter {
        fn name(&self) -> &str {
            "echo"
        }
        async fn is_available(&self) -> bool {
            true
        }
        async fn chat(&self, request: &ChatRequest) -> Result<Response, RouterError> {
            let text = request.last_user_message().map(|m| m.content.clone()).unwrap_or_default();
            Ok(Response::success("echo", "echo-model", text))
        }
    }

    struct EchoFactory;

    impl AdapterFactory for EchoFactory {
        fn metadata(&self) -> PluginMetadata {
            PluginMetadata {
                plugin_id: "echo".to_string(),
                name: "Echo".to_string(),
                version: "0.1.0".to_string(),
                author: "test".to_string(),
                supported_backend_types: vec!["echo".to_string()],
            }
        }

        fn build(&self, _config: &BackendConfig, _client: reqwest::Client) -> Result<Box<dyn Adapter>, RouterError> {
            Ok(Box::new(EchoAdapter))
        }
    }

    #[test]
    fn build_fails_for_unregistered_tag() {
        let registry = PluginRegistry::new();
        let config = BackendConfig::new("b", BackendType::OpenAi, "http://x", "m");
        let err = registry.build("echo", &config, reqwest::Client::new()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BadRequest);
    }

    #[test]
    fn registered_factory_builds_adapter() {
        let registry = PluginRegistry::new();
        registry.register("echo", std::sync::Arc::new(EchoFactory));
        let config = BackendConfig::new("b", BackendType::OpenAi, "http://x", "m");
        let adapter = registry.build("echo", &config, reqwest::Client::new()).unwrap();
        assert_eq!(adapter.name(), "echo");
        assert_eq!(registry.registered_tags(), vec!["echo".to_string()]);
    }
}
