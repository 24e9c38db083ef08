//! The request/response REPL.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tracing::debug;
use tracing::warn;

use remsh_core::AliasManager;
use remsh_core::Formatter;
use remsh_core::HistoryManager;
use remsh_core::OutputFormat;
use remsh_core::ShellState;
use remsh_core::history;
use remsh_core::parser;
use remsh_protocol::CommandResult;
use remsh_protocol::ParsedCommand;
use remsh_transport::Transport;

use crate::builtins;
use crate::builtins::BuiltinOutcome;
use crate::input::InputSource;
use crate::output::OutputSink;

pub const CONTINUATION_PROMPT: &str = "...> ";

#[derive(Default)]
pub struct ShellConfig {
    /// Overrides the session store's prompt when set.
    pub prompt: Option<String>,
    /// Overrides the session store's `default_format` when set.
    pub default_format: Option<OutputFormat>,
    pub history_path: Option<PathBuf>,
    pub session_path: Option<PathBuf>,
    pub history_capacity: Option<usize>,
    pub aliases: AliasManager,
}

/// Synchronous shell: one command in flight at a time, every transport call
/// awaited inline. Owns state, history, aliases, the transport and the
/// formatter.
pub struct Shell {
    transport: Arc<dyn Transport>,
    state: ShellState,
    history: HistoryManager,
    aliases: AliasManager,
    formatter: Formatter,
    output: OutputSink,
    running: Arc<AtomicBool>,
    last_command_ok: bool,
}

pub(crate) enum LineOutcome {
    Continue,
    Exit,
}

impl Shell {
    pub fn new(transport: Arc<dyn Transport>, config: ShellConfig, output: OutputSink) -> Self {
        let capacity = config
            .history_capacity
            .unwrap_or(history::DEFAULT_CAPACITY);
        let mut history = match &config.history_path {
            Some(path) => HistoryManager::with_file(capacity, path.clone()),
            None => HistoryManager::new(capacity),
        };
        if let Err(err) = history.load() {
            debug!("could not load history: {err}");
        }

        let endpoint = transport.endpoint();
        let mut state = match &config.session_path {
            Some(path) => ShellState::with_file(endpoint.as_str(), path.clone()),
            None => ShellState::new(endpoint.as_str()),
        };
        if let Err(err) = state.load_session() {
            debug!("could not load session: {err}");
        }
        if let Some(prompt) = &config.prompt {
            state.set("prompt", serde_json::Value::String(prompt.clone()));
        }
        if let Some(format) = config.default_format {
            state.set(
                "default_format",
                serde_json::Value::String(format.to_string()),
            );
        }

        Self {
            transport,
            state,
            history,
            aliases: config.aliases,
            formatter: Formatter::new(),
            output,
            running: Arc::new(AtomicBool::new(true)),
            last_command_ok: true,
        }
    }

    pub fn output(&self) -> OutputSink {
        self.output.clone()
    }

    pub fn running_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn last_command_ok(&self) -> bool {
        self.last_command_ok
    }

    pub(crate) fn state(&self) -> &ShellState {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut ShellState {
        &mut self.state
    }

    pub(crate) fn history_mut(&mut self) -> &mut HistoryManager {
        &mut self.history
    }

    pub(crate) fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub(crate) fn aliases(&self) -> &AliasManager {
        &self.aliases
    }

    pub(crate) fn aliases_mut(&mut self) -> &mut AliasManager {
        &mut self.aliases
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Signal the loop to stop at its next iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub(crate) fn print_banner(&self) {
        self.output
            .line(&format!("Connected to {}", self.transport.endpoint()));
        self.output.line("Type 'help' for available commands.");
    }

    /// The interactive loop. Returns the process exit code: end-of-stream
    /// and `exit`/`quit` both leave with 0; an interrupt leaves through the
    /// same shutdown path.
    pub async fn run(&mut self, input: &mut dyn InputSource) -> i32 {
        self.print_banner();
        while self.running.load(Ordering::SeqCst) {
            let prompt = if self.state.in_multiline() {
                CONTINUATION_PROMPT.to_string()
            } else {
                self.state.prompt()
            };
            let line = tokio::select! {
                line = input.read_line(&prompt) => line,
                _ = tokio::signal::ctrl_c() => {
                    self.state.reset_multiline();
                    self.output.line("");
                    break;
                }
            };
            let Some(line) = line else {
                break;
            };
            match self.dispatch_line(&line).await {
                LineOutcome::Continue => {}
                LineOutcome::Exit => break,
            }
        }
        self.shutdown().await;
        0
    }

    /// Run one injected line through the full pipeline. Returns false when
    /// the command failed or the transport was disconnected; built-ins and
    /// successful commands return true.
    pub async fn execute_command(&mut self, line: &str) -> bool {
        let _ = self.dispatch_line(line).await;
        self.last_command_ok
    }

    pub(crate) async fn dispatch_line(&mut self, line: &str) -> LineOutcome {
        let Some(completed) = self.state.process_input(line) else {
            return LineOutcome::Continue;
        };
        self.history.add(&completed.text);
        let expanded = self.aliases.expand(&completed.text);
        let mut command = parser::parse(&expanded);
        if command.is_blank() {
            return LineOutcome::Continue;
        }
        // Multi-line input keeps its newlines in the raw form.
        if completed.raw.contains('\n') {
            command.raw = completed.raw.clone();
        }
        self.state.record_command();

        match builtins::run(self, &command) {
            BuiltinOutcome::Handled => {
                self.last_command_ok = true;
                LineOutcome::Continue
            }
            BuiltinOutcome::Exit => {
                self.last_command_ok = true;
                LineOutcome::Exit
            }
            BuiltinOutcome::NotBuiltin => {
                self.send_remote(&command).await;
                LineOutcome::Continue
            }
        }
    }

    async fn send_remote(&mut self, command: &ParsedCommand) {
        if !self.transport.is_connected() {
            self.output.line("Not connected");
            self.last_command_ok = false;
            return;
        }
        let result = self.transport.send(command).await;
        self.render_result(command, &result);
        self.last_command_ok = result.success;
    }

    pub(crate) fn render_result(&self, command: &ParsedCommand, result: &CommandResult) {
        let format = self.choose_format(command);
        self.output
            .write(&self.formatter.format(result, format));
    }

    /// Format precedence: explicit `--format=`, then the `\G` terminator,
    /// then the session's `default_format`.
    fn choose_format(&self, command: &ParsedCommand) -> OutputFormat {
        if let Some(name) = command.option_str("format") {
            match name.parse::<OutputFormat>() {
                Ok(format) => return format,
                Err(err) => self.output.line(&format!("{err}")),
            }
        }
        if command.vertical {
            return OutputFormat::Vertical;
        }
        self.state
            .default_format()
            .parse()
            .unwrap_or(OutputFormat::Table)
    }

    /// Best-effort shutdown: disconnect, persist session, persist history.
    /// A failure in one step does not block the next.
    pub async fn shutdown(&mut self) {
        self.transport.disconnect().await;
        if let Err(err) = self.state.save_session() {
            warn!("could not save session: {err}");
        }
        if let Err(err) = self.history.save() {
            warn!("could not save history: {err}");
        }
        debug!("shell shut down");
    }
}
