//! Execution context handed to server-side handlers.

use std::collections::BTreeMap;

use serde_json::Value;

use remsh_core::Context;
use remsh_core::ServiceContainer;

/// Configuration map plus a typed service container.
#[derive(Default)]
pub struct ServerContext {
    config: BTreeMap<String, Value>,
    container: ServiceContainer,
}

impl ServerContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: BTreeMap<String, Value>) -> Self {
        Self {
            config,
            container: ServiceContainer::new(),
        }
    }

    pub fn set_config(&mut self, key: impl Into<String>, value: Value) {
        self.config.insert(key.into(), value);
    }

    pub fn container_mut(&mut self) -> &mut ServiceContainer {
        &mut self.container
    }
}

impl Context for ServerContext {
    fn get(&self, key: &str) -> Option<Value> {
        self.config.get(key).cloned()
    }

    fn config(&self) -> BTreeMap<String, Value> {
        self.config.clone()
    }

    fn container(&self) -> &ServiceContainer {
        &self.container
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn config_lookup() {
        let mut context = ServerContext::new();
        context.set_config("env", json!("staging"));
        assert_eq!(context.get("env"), Some(json!("staging")));
        assert!(context.has("env"));
        assert!(!context.has("missing"));
    }

    #[test]
    fn services_resolve_by_type() {
        let mut context = ServerContext::new();
        context
            .container_mut()
            .insert("greeting", Arc::new("hello".to_string()));
        let service = context.container().get::<String>("greeting");
        assert_eq!(service.as_deref().map(String::as_str), Some("hello"));
    }
}
