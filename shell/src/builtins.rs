//! Client-side built-in commands. These execute locally and never touch the
//! transport (except `status`, which reads its connection flag).

use serde_json::Value;

use remsh_protocol::ParsedCommand;

use crate::shell::Shell;

pub(crate) enum BuiltinOutcome {
    Handled,
    Exit,
    NotBuiltin,
}

/// `(name, usage, description)` for `help`.
const BUILTINS: &[(&str, &str, &str)] = &[
    ("alias", "alias [name expansion...]", "List aliases or define one"),
    ("clear", "clear", "Clear the screen"),
    ("exit", "exit", "Leave the shell, saving session and history"),
    ("format", "format [table|json|csv|vertical]", "Show or set the default output format"),
    ("get", "get [key]", "Show one or all session variables"),
    ("help", "help [command]", "Show available commands"),
    ("history", "history [clear]", "Show or clear the command history"),
    ("quit", "quit", "Same as exit"),
    ("set", "set <key> <value>", "Set a session variable"),
    ("status", "status", "Connection and session information"),
    ("unalias", "unalias <name>", "Remove an alias"),
];

pub(crate) fn run(shell: &mut Shell, command: &ParsedCommand) -> BuiltinOutcome {
    match command.command.as_str() {
        "help" => help(shell, command),
        "exit" | "quit" => return BuiltinOutcome::Exit,
        "status" => status(shell),
        "clear" => shell.output().write("\x1b[2J\x1b[H"),
        "history" => history(shell, command),
        "alias" => alias(shell, command),
        "unalias" => unalias(shell, command),
        "set" => set_var(shell, command),
        "get" => get_var(shell, command),
        "format" => format_var(shell, command),
        _ => return BuiltinOutcome::NotBuiltin,
    }
    BuiltinOutcome::Handled
}

fn help(shell: &Shell, command: &ParsedCommand) {
    let output = shell.output();
    if let Some(topic) = command.arguments.first() {
        match BUILTINS.iter().find(|(name, _, _)| *name == topic.as_str()) {
            Some((name, usage, description)) => {
                output.line(&format!("{name}: {description}"));
                output.line(&format!("usage: {usage}"));
            }
            None => {
                output.line(&format!(
                    "'{topic}' is not a built-in; it is sent to the server. Try 'commands' for the server-side list."
                ));
            }
        }
        return;
    }
    output.line("Built-in commands:");
    for (name, _, description) in BUILTINS {
        output.line(&format!("  {name:<10} {description}"));
    }
    output.line("Anything else is sent to the connected server.");
}

fn status(shell: &Shell) {
    let output = shell.output();
    let transport = shell.transport();
    output.line(&format!("Endpoint:         {}", transport.endpoint()));
    output.line(&format!(
        "Connected:        {}",
        if transport.is_connected() { "yes" } else { "no" }
    ));
    let state = shell.state();
    output.line(&format!(
        "Session commands: {}",
        state.commands_this_session()
    ));
    output.line(&format!(
        "Total commands:   {}",
        state.total_commands_ever()
    ));
    output.line(&format!(
        "Session duration: {}s",
        state.session_duration().as_secs()
    ));
    output.line(&format!("Default format:   {}", state.default_format()));
}

fn history(shell: &mut Shell, command: &ParsedCommand) {
    let output = shell.output();
    if command.arguments.first().map(String::as_str) == Some("clear") {
        shell.history_mut().clear();
        output.line("History cleared");
        return;
    }
    if shell.history().is_empty() {
        output.line("History is empty");
        return;
    }
    let lines: Vec<String> = shell
        .history()
        .entries()
        .enumerate()
        .map(|(index, entry)| format!("{:>4}  {entry}", index + 1))
        .collect();
    for line in lines {
        output.line(&line);
    }
}

fn alias(shell: &mut Shell, command: &ParsedCommand) {
    let output = shell.output();
    match command.arguments.len() {
        0 => {
            if shell.aliases().is_empty() {
                output.line("No aliases defined");
                return;
            }
            for (name, value) in shell.aliases().list() {
                output.line(&format!("{name} = {value}"));
            }
        }
        1 => {
            let name = &command.arguments[0];
            match shell.aliases().get(name) {
                Some(value) => output.line(&format!("{name} = {value}")),
                None => output.line(&format!("No such alias: {name}")),
            }
        }
        _ => {
            let name = command.arguments[0].clone();
            let value = command.arguments[1..].join(" ");
            shell.aliases_mut().set(name.as_str(), value.as_str());
            output.line(&format!("{name} = {value}"));
        }
    }
}

fn unalias(shell: &mut Shell, command: &ParsedCommand) {
    let output = shell.output();
    let Some(name) = command.arguments.first() else {
        output.line("usage: unalias <name>");
        return;
    };
    if shell.aliases_mut().remove(name) {
        output.line(&format!("Removed alias: {name}"));
    } else {
        output.line(&format!("No such alias: {name}"));
    }
}

fn set_var(shell: &mut Shell, command: &ParsedCommand) {
    let output = shell.output();
    if command.arguments.len() < 2 {
        output.line("usage: set <key> <value>");
        return;
    }
    let key = command.arguments[0].clone();
    let value = command.arguments[1..].join(" ");
    shell
        .state_mut()
        .set(key.as_str(), Value::String(value.clone()));
    output.line(&format!("{key} = {value}"));
}

fn get_var(shell: &Shell, command: &ParsedCommand) {
    let output = shell.output();
    match command.arguments.first() {
        Some(key) => match shell.state().get_str(key) {
            Some(value) => output.line(&format!("{key} = {value}")),
            None => output.line(&format!("{key} is not set")),
        },
        None => {
            for (key, value) in shell.state().vars() {
                output.line(&format!(
                    "{key} = {}",
                    remsh_core::format::value_text(value)
                ));
            }
        }
    }
}

fn format_var(shell: &mut Shell, command: &ParsedCommand) {
    let output = shell.output();
    let Some(name) = command.arguments.first() else {
        output.line(&format!("Default format: {}", shell.state().default_format()));
        return;
    };
    match name.parse::<remsh_core::OutputFormat>() {
        Ok(format) => {
            shell
                .state_mut()
                .set("default_format", Value::String(format.to_string()));
            output.line(&format!("Default format: {format}"));
        }
        Err(err) => output.line(&err.to_string()),
    }
}
