//! Built-in server-side handlers. All dependencies come through the
//! [`Context`]; none of them reach outside it.

use std::sync::Arc;
use std::sync::Weak;

use serde_json::json;

use remsh_core::CommandHandler;
use remsh_core::CommandRegistry;
use remsh_core::Context;
use remsh_protocol::CommandResult;
use remsh_protocol::ParsedCommand;

pub struct PingHandler;

impl CommandHandler for PingHandler {
    fn name(&self) -> &str {
        "ping"
    }

    fn handle(
        &self,
        _command: &ParsedCommand,
        _context: &dyn Context,
    ) -> anyhow::Result<CommandResult> {
        Ok(CommandResult::with_message("pong"))
    }

    fn description(&self) -> &str {
        "Liveness probe"
    }

    fn usage(&self) -> &str {
        "ping"
    }
}

/// Echoes arguments and options back; handy for exercising the wire format.
pub struct EchoHandler;

impl CommandHandler for EchoHandler {
    fn name(&self) -> &str {
        "echo"
    }

    fn handle(
        &self,
        command: &ParsedCommand,
        _context: &dyn Context,
    ) -> anyhow::Result<CommandResult> {
        Ok(CommandResult::with_data(json!({
            "arguments": command.arguments,
            "options": command.options,
        })))
    }

    fn description(&self) -> &str {
        "Echo arguments and options back"
    }

    fn usage(&self) -> &str {
        "echo [args...]"
    }
}

/// Dumps the context's configuration map, or one key of it.
pub struct ConfigHandler;

impl CommandHandler for ConfigHandler {
    fn name(&self) -> &str {
        "config"
    }

    fn handle(
        &self,
        command: &ParsedCommand,
        context: &dyn Context,
    ) -> anyhow::Result<CommandResult> {
        match command.arguments.first() {
            Some(key) => match context.get(key) {
                Some(value) => {
                    let mut row = serde_json::Map::new();
                    row.insert(key.clone(), value);
                    Ok(CommandResult::with_data(serde_json::Value::Object(row)))
                }
                None => Ok(CommandResult::failure(format!("Unknown config key: {key}"))),
            },
            None => Ok(CommandResult::with_data(json!(context.config()))),
        }
    }

    fn description(&self) -> &str {
        "Show server configuration"
    }

    fn usage(&self) -> &str {
        "config [key]"
    }
}

/// Lists the registry's commands. Holds a weak reference so the registry can
/// own the handler without a cycle.
pub struct CommandsHandler {
    registry: Weak<CommandRegistry>,
}

impl CommandsHandler {
    pub fn new(registry: &Arc<CommandRegistry>) -> Self {
        Self {
            registry: Arc::downgrade(registry),
        }
    }
}

impl CommandHandler for CommandsHandler {
    fn name(&self) -> &str {
        "commands"
    }

    fn handle(
        &self,
        _command: &ParsedCommand,
        _context: &dyn Context,
    ) -> anyhow::Result<CommandResult> {
        let Some(registry) = self.registry.upgrade() else {
            anyhow::bail!("command registry is gone");
        };
        let rows: Vec<_> = registry
            .command_descriptions()
            .into_iter()
            .map(|(command, description)| json!({"command": command, "description": description}))
            .collect();
        Ok(CommandResult::with_data(json!(rows)))
    }

    fn description(&self) -> &str {
        "List available commands"
    }

    fn usage(&self) -> &str {
        "commands"
    }
}

/// Lists the names registered in the context's service container.
pub struct ContainerHandler;

impl CommandHandler for ContainerHandler {
    fn name(&self) -> &str {
        "container"
    }

    fn handle(
        &self,
        _command: &ParsedCommand,
        context: &dyn Context,
    ) -> anyhow::Result<CommandResult> {
        let names = context.container().names();
        if names.is_empty() {
            return Ok(CommandResult::with_message("No services registered"));
        }
        Ok(CommandResult::with_data(json!(names)))
    }

    fn description(&self) -> &str {
        "List registered services"
    }

    fn usage(&self) -> &str {
        "container"
    }
}

/// Server uptime (when a `started_at` service is registered) and registry
/// size. The client shell owns the `status` name.
pub struct UptimeHandler {
    registry: Weak<CommandRegistry>,
}

impl UptimeHandler {
    pub fn new(registry: &Arc<CommandRegistry>) -> Self {
        Self {
            registry: Arc::downgrade(registry),
        }
    }
}

impl CommandHandler for UptimeHandler {
    fn name(&self) -> &str {
        "uptime"
    }

    fn handle(
        &self,
        _command: &ParsedCommand,
        context: &dyn Context,
    ) -> anyhow::Result<CommandResult> {
        let commands = self
            .registry
            .upgrade()
            .map(|registry| registry.count())
            .unwrap_or(0);
        let uptime = context
            .container()
            .get::<std::time::Instant>("started_at")
            .map(|started| started.elapsed().as_secs());
        let mut row = serde_json::Map::new();
        row.insert("commands".to_string(), json!(commands));
        if let Some(uptime) = uptime {
            row.insert("uptime_seconds".to_string(), json!(uptime));
        }
        Ok(CommandResult::with_data(serde_json::Value::Object(row)))
    }

    fn description(&self) -> &str {
        "Server uptime and registry size"
    }

    fn usage(&self) -> &str {
        "uptime"
    }
}

/// Register the stock handler set on a shared registry.
pub fn register_defaults(registry: &Arc<CommandRegistry>) {
    registry.register(Arc::new(PingHandler));
    registry.register(Arc::new(EchoHandler));
    registry.register(Arc::new(ConfigHandler));
    registry.register(Arc::new(ContainerHandler));
    registry.register(Arc::new(CommandsHandler::new(registry)));
    registry.register(Arc::new(UptimeHandler::new(registry)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServerContext;
    use pretty_assertions::assert_eq;

    #[test]
    fn ping_answers_pong() {
        let registry = Arc::new(CommandRegistry::new());
        register_defaults(&registry);
        let result = registry.execute(&ParsedCommand::new("ping"), &ServerContext::new());
        assert!(result.success);
        assert_eq!(result.message.as_deref(), Some("pong"));
    }

    #[test]
    fn config_reads_the_context() {
        let registry = Arc::new(CommandRegistry::new());
        register_defaults(&registry);
        let mut context = ServerContext::new();
        context.set_config("env", json!("staging"));

        let command = ParsedCommand::new("config").with_arguments(vec!["env".to_string()]);
        let result = registry.execute(&command, &context);
        assert!(result.success);
        assert_eq!(result.data, Some(json!({"env": "staging"})));

        let command = ParsedCommand::new("config").with_arguments(vec!["nope".to_string()]);
        let result = registry.execute(&command, &context);
        assert!(!result.success);
    }

    #[test]
    fn commands_lists_the_registry() {
        let registry = Arc::new(CommandRegistry::new());
        register_defaults(&registry);
        let result = registry.execute(&ParsedCommand::new("commands"), &ServerContext::new());
        assert!(result.success);
        let rows = result.data.expect("rows");
        let names: Vec<_> = rows
            .as_array()
            .expect("array")
            .iter()
            .map(|row| row["command"].as_str().expect("command").to_string())
            .collect();
        assert_eq!(
            names,
            vec!["commands", "config", "container", "echo", "ping", "uptime"]
        );
    }

    #[test]
    fn container_lists_services() {
        let registry = Arc::new(CommandRegistry::new());
        register_defaults(&registry);
        let mut context = ServerContext::new();

        let result = registry.execute(&ParsedCommand::new("container"), &context);
        assert!(result.success);
        assert_eq!(result.message.as_deref(), Some("No services registered"));

        context
            .container_mut()
            .insert("started_at", Arc::new(std::time::Instant::now()));
        let result = registry.execute(&ParsedCommand::new("container"), &context);
        assert_eq!(result.data, Some(json!(["started_at"])));
    }

    #[test]
    fn uptime_reports_when_service_present() {
        let registry = Arc::new(CommandRegistry::new());
        register_defaults(&registry);
        let mut context = ServerContext::new();
        context
            .container_mut()
            .insert("started_at", Arc::new(std::time::Instant::now()));

        let result = registry.execute(&ParsedCommand::new("uptime"), &context);
        assert!(result.success);
        let data = result.data.expect("data");
        assert_eq!(data["commands"], json!(6));
        assert!(data.get("uptime_seconds").is_some());
    }
}
