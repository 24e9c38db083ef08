//! Concurrent REPL: the input loop from [`Shell`] plus a receive task that
//! renders server pushes while the user keeps typing.
//!
//! Two tasks share a [`StreamState`]: atomic running/paused flags, an atomic
//! message counter and the client-side filters behind read/write locks. The
//! filters are swapped whole under the write lock, never mutated in place.
//! Cancellation is cooperative: `stop` flips the running flag and each task
//! exits at its next checkpoint (the 1 s receive timeout exists for exactly
//! that re-check).

use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::debug;
use tracing::info;
use tracing::warn;

use remsh_core::filter::FilterExpression;
use remsh_core::filter::GlobFilter;
use remsh_core::parser;
use remsh_protocol::Message;
use remsh_transport::StreamingTransport;
use remsh_transport::Transport;

use crate::builtins;
use crate::builtins::BuiltinOutcome;
use crate::input::InputSource;
use crate::message_format::MessageFormatter;
use crate::output::OutputSink;
use crate::shell::CONTINUATION_PROMPT;
use crate::shell::Shell;
use crate::shell::ShellConfig;

const RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

/// `(name, description)` of the commands only the streaming shell has.
const STREAMING_BUILTINS: &[(&str, &str)] = &[
    ("filter", "Show, set (field:glob list or WHERE expression) or clear the message filter"),
    ("pause", "Drop incoming messages until resumed"),
    ("resume", "Resume message delivery"),
    ("stats", "Message count, filter and pause state"),
    ("subscribe", "Subscribe to server pushes"),
    ("unsubscribe", "Stop receiving server pushes"),
];

/// State shared between the input and receive tasks.
#[derive(Default)]
pub struct StreamState {
    paused: AtomicBool,
    message_count: AtomicU64,
    glob: RwLock<Option<GlobFilter>>,
    expression: RwLock<Option<FilterExpression>>,
}

impl StreamState {
    pub fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::SeqCst)
    }

    fn count_message(&self) {
        self.message_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Replace the glob filter (clearing the expression filter).
    pub fn set_glob_filter(&self, filter: GlobFilter) {
        *self.glob.write().unwrap_or_else(|e| e.into_inner()) = Some(filter);
        *self.expression.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Replace the expression filter (clearing the glob filter).
    pub fn set_expression_filter(&self, filter: FilterExpression) {
        *self.expression.write().unwrap_or_else(|e| e.into_inner()) = Some(filter);
        *self.glob.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn clear_filters(&self) {
        *self.glob.write().unwrap_or_else(|e| e.into_inner()) = None;
        *self.expression.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Describe the configured filter, or `(none)`.
    pub fn describe_filter(&self) -> String {
        if let Some(glob) = self.glob.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            return glob.describe();
        }
        if let Some(expression) = self
            .expression
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            return expression.describe();
        }
        "(none)".to_string()
    }

    pub fn has_filter(&self) -> bool {
        self.glob.read().unwrap_or_else(|e| e.into_inner()).is_some()
            || self
                .expression
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .is_some()
    }

    pub fn matches(&self, message: &Message) -> bool {
        if let Some(glob) = self.glob.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            if !glob.matches(message) {
                return false;
            }
        }
        if let Some(expression) = self
            .expression
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            if !expression.matches(message) {
                return false;
            }
        }
        true
    }
}

/// Streaming shell: the [`Shell`] pipeline for input, a second task for
/// server pushes, and commands dispatched fire-and-forget via `send_async`.
pub struct StreamingShell<T: StreamingTransport + 'static> {
    shell: Shell,
    transport: Arc<T>,
    stream: Arc<StreamState>,
    message_formatter: MessageFormatter,
}

impl<T: StreamingTransport + 'static> StreamingShell<T> {
    pub fn new(transport: Arc<T>, config: ShellConfig, output: OutputSink) -> Self {
        let shell = Shell::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            config,
            output,
        );
        Self {
            shell,
            transport,
            stream: Arc::new(StreamState::default()),
            message_formatter: MessageFormatter::new(),
        }
    }

    pub fn stream_state(&self) -> Arc<StreamState> {
        Arc::clone(&self.stream)
    }

    pub fn running_handle(&self) -> Arc<AtomicBool> {
        self.shell.running_handle()
    }

    pub fn stop(&self) {
        self.shell.stop();
    }

    /// Run both tasks until exit. The receive task drops messages while
    /// paused, counts the rest, applies the filter, and renders survivors;
    /// the input task keeps accepting built-ins even when the transport has
    /// gone away.
    pub async fn run(&mut self, input: &mut dyn InputSource) -> i32 {
        self.shell.print_banner();
        if let Err(err) = self.transport.start_streaming().await {
            warn!("could not subscribe for streaming: {err}");
        }

        let running = self.shell.running_handle();
        let receive_task = tokio::spawn(receive_loop(
            Arc::clone(&self.transport),
            Arc::clone(&self.stream),
            Arc::clone(&running),
            self.shell.output(),
            self.message_formatter,
        ));

        while running.load(Ordering::SeqCst) {
            let prompt = if self.shell.state().in_multiline() {
                CONTINUATION_PROMPT.to_string()
            } else {
                self.shell.state().prompt()
            };
            let line = tokio::select! {
                line = input.read_line(&prompt) => line,
                _ = tokio::signal::ctrl_c() => {
                    self.shell.state_mut().reset_multiline();
                    self.shell.output().line("");
                    break;
                }
            };
            let Some(line) = line else {
                break;
            };
            if !self.dispatch_line(&line).await {
                break;
            }
        }

        running.store(false, Ordering::SeqCst);
        self.shell.shutdown().await;
        let _ = receive_task.await;
        0
    }

    /// Returns false when the shell should exit.
    pub async fn dispatch_line(&mut self, line: &str) -> bool {
        let Some(completed) = self.shell.state_mut().process_input(line) else {
            return true;
        };
        self.shell.history_mut().add(&completed.text);
        let expanded = self.shell.aliases().expand(&completed.text);
        let command = parser::parse(&expanded);
        if command.is_blank() {
            return true;
        }
        self.shell.state_mut().record_command();

        let head = command.command.to_ascii_lowercase();
        let output = self.shell.output();
        match head.as_str() {
            "help" if command.arguments.is_empty() => {
                let mut help_command = command.clone();
                help_command.command = head.clone();
                let _ = builtins::run(&mut self.shell, &help_command);
                output.line("Streaming commands:");
                for (name, description) in STREAMING_BUILTINS {
                    output.line(&format!("  {name:<12} {description}"));
                }
            }
            "pause" => {
                self.stream.set_paused(true);
                output.line("Streaming paused");
            }
            "resume" => {
                self.stream.set_paused(false);
                output.line("Streaming resumed");
            }
            "stats" => self.print_stats(),
            "filter" => {
                let tail = expanded
                    .trim_start()
                    .strip_prefix(&command.command)
                    .unwrap_or("")
                    .trim();
                self.apply_filter(tail);
            }
            "subscribe" => {
                match self.transport.start_streaming().await {
                    Ok(()) => output.line("Subscribed to server messages"),
                    Err(err) => output.line(&format!("Error: {err}")),
                }
            }
            "unsubscribe" => {
                match self.transport.stop_streaming().await {
                    Ok(()) => output.line("Unsubscribed from server messages"),
                    Err(err) => output.line(&format!("Error: {err}")),
                }
            }
            _ => match builtins::run(&mut self.shell, &command) {
                BuiltinOutcome::Handled => {}
                BuiltinOutcome::Exit => return false,
                BuiltinOutcome::NotBuiltin => {
                    match self.transport.send_async(&command).await {
                        Ok(()) => {
                            output.line(&format!("Command sent: {}", command.command));
                        }
                        Err(err) => output.line(&format!("Error: {err}")),
                    }
                }
            },
        }
        true
    }

    fn print_stats(&self) {
        let output = self.shell.output();
        output.line(&format!(
            "Messages received: {}",
            self.stream.message_count()
        ));
        output.line(&format!("Filter:            {}", self.stream.describe_filter()));
        output.line(&format!(
            "Paused:            {}",
            if self.stream.paused() { "yes" } else { "no" }
        ));
    }

    /// `filter` sub-commands: `show`, `clear`/`none`, or a filter to set.
    /// Any other tail is a WHERE expression, except a pure `field:glob` list
    /// which goes to the glob filter.
    pub fn apply_filter(&self, tail: &str) {
        let output = self.shell.output();
        match tail {
            "" | "show" => {
                output.line(&format!("Filter: {}", self.stream.describe_filter()));
            }
            "clear" | "none" => {
                self.stream.clear_filters();
                output.line("Filter cleared");
            }
            text if looks_like_glob(text) => {
                let filter = GlobFilter::parse(text);
                output.line(&format!("Filter: {}", filter.describe()));
                self.stream.set_glob_filter(filter);
            }
            text => {
                let mut expression = FilterExpression::new();
                match expression.set_where(text) {
                    Ok(()) => {
                        output.line(&format!("Filter: {}", expression.describe()));
                        self.stream.set_expression_filter(expression);
                    }
                    Err(err) => output.line(&format!("Error: {err}")),
                }
            }
        }
    }
}

/// A `field:glob` list only, never a WHERE expression: every whitespace
/// token must be a `field:glob` pair naming a field the glob filter knows.
/// Anything else (including quoted times like `'10:00'`) goes to the
/// expression parser.
fn looks_like_glob(text: &str) -> bool {
    let mut any = false;
    for token in text.split_whitespace() {
        let Some((field, glob)) = token.split_once(':') else {
            return false;
        };
        if glob.is_empty() || !matches!(field, "type" | "source" | "topic" | "channel") {
            return false;
        }
        any = true;
    }
    any
}

/// The receive task. Order matters: the pause gate drops before counting,
/// the counter includes filtered-out messages, the filter decides rendering.
async fn receive_loop<T: StreamingTransport>(
    transport: Arc<T>,
    stream: Arc<StreamState>,
    running: Arc<AtomicBool>,
    output: OutputSink,
    formatter: MessageFormatter,
) {
    while running.load(Ordering::SeqCst) {
        match transport.receive(Some(RECEIVE_TIMEOUT)).await {
            Ok(None) => continue,
            Ok(Some(message)) => {
                transport.dispatch_message(&message);
                if stream.paused() {
                    continue;
                }
                stream.count_message();
                if !stream.matches(&message) {
                    continue;
                }
                output.line(&formatter.format(&message));
            }
            Err(err) => {
                debug!("receive stream ended: {err}");
                break;
            }
        }
    }
    info!("receive task stopped");
}
