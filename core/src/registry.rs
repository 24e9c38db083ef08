//! Command routing: the handler trait, the execution context passed to
//! handlers, and the name-to-handler registry with an optional fallback.
//!
//! Registration is explicit; there is no attribute-based discovery. Handlers
//! that fail return an error which the registry converts into a failure
//! result, so a misbehaving handler can never take the server down.

use std::any::Any;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;

use serde_json::Value;
use serde_json::json;
use tracing::warn;

use remsh_protocol::CommandResult;
use remsh_protocol::ParsedCommand;

/// Handler name that registers as the fallback for unknown commands.
pub const FALLBACK_NAME: &str = "*";

/// Opaque service locator handed to handlers through the [`Context`].
#[derive(Default)]
pub struct ServiceContainer {
    services: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, name: impl Into<String>, service: Arc<T>) {
        self.services.insert(name.into(), service);
    }

    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.services
            .get(name)
            .cloned()
            .and_then(|service| service.downcast::<T>().ok())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.services.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Read-only accessor for configuration and services, passed to every
/// handler invocation.
pub trait Context: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn config(&self) -> BTreeMap<String, Value>;

    fn container(&self) -> &ServiceContainer;
}

/// Context with no configuration and no services; used by the in-memory
/// transport and in tests.
#[derive(Default)]
pub struct EmptyContext {
    container: ServiceContainer,
}

impl EmptyContext {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Context for EmptyContext {
    fn get(&self, _key: &str) -> Option<Value> {
        None
    }

    fn config(&self) -> BTreeMap<String, Value> {
        BTreeMap::new()
    }

    fn container(&self) -> &ServiceContainer {
        &self.container
    }
}

/// Server-side code that turns a [`ParsedCommand`] into a [`CommandResult`].
pub trait CommandHandler: Send + Sync {
    /// Command name this handler answers to, or [`FALLBACK_NAME`].
    fn name(&self) -> &str;

    fn handle(
        &self,
        command: &ParsedCommand,
        context: &dyn Context,
    ) -> anyhow::Result<CommandResult>;

    fn description(&self) -> &str {
        ""
    }

    fn usage(&self) -> &str {
        ""
    }
}

/// Maps command names to handlers. Interior mutability lets a shared
/// registry be extended after it has been handed to a server.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn CommandHandler>>>,
    fallback: RwLock<Option<Arc<dyn CommandHandler>>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn handlers(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn CommandHandler>>> {
        self.handlers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn handlers_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<dyn CommandHandler>>> {
        self.handlers.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register one handler. A handler named [`FALLBACK_NAME`] becomes the
    /// fallback; otherwise a previous handler with the same name is replaced.
    pub fn register(&self, handler: Arc<dyn CommandHandler>) {
        if handler.name() == FALLBACK_NAME {
            self.set_fallback(handler);
            return;
        }
        self.handlers_mut()
            .insert(handler.name().to_string(), handler);
    }

    pub fn register_many(&self, handlers: impl IntoIterator<Item = Arc<dyn CommandHandler>>) {
        for handler in handlers {
            self.register(handler);
        }
    }

    pub fn set_fallback(&self, handler: Arc<dyn CommandHandler>) {
        *self.fallback.write().unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> bool {
        self.handlers_mut().remove(name).is_some()
    }

    pub fn clear(&self) {
        self.handlers_mut().clear();
        *self.fallback.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn count(&self) -> usize {
        self.handlers().len()
    }

    /// Registered command names, sorted.
    pub fn command_list(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers().keys().cloned().collect();
        names.sort();
        names
    }

    /// `(name, description)` pairs, sorted by name.
    pub fn command_descriptions(&self) -> Vec<(String, String)> {
        let handlers = self.handlers();
        let mut entries: Vec<_> = handlers
            .values()
            .map(|handler| {
                (
                    handler.name().to_string(),
                    handler.description().to_string(),
                )
            })
            .collect();
        entries.sort();
        entries
    }

    /// Dispatch one command: exact name match, then the fallback, then an
    /// unknown-command failure listing what is available.
    pub fn execute(&self, command: &ParsedCommand, context: &dyn Context) -> CommandResult {
        let handler = self
            .handlers()
            .get(&command.command)
            .cloned()
            .or_else(|| self.fallback.read().unwrap_or_else(|e| e.into_inner()).clone());

        let Some(handler) = handler else {
            return CommandResult::failure(format!(
                "Unknown command: '{}'. Type 'help' for available commands.",
                command.command
            ))
            .with_metadata("available", json!(self.command_list()));
        };

        match handler.handle(command, context) {
            Ok(result) => result,
            Err(err) => {
                warn!(command = %command.command, "handler failed: {err:#}");
                CommandResult::failure(err.to_string())
            }
        }
    }
}
