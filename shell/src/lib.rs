//! Interactive shell runtimes: the synchronous request/response REPL
//! ([`Shell`]) and the concurrent streaming variant ([`StreamingShell`])
//! that overlays it with a server-push receive task.

mod builtins;
mod input;
mod message_format;
mod output;
mod shell;
mod streaming;

pub use input::InputSource;
pub use input::ScriptedInput;
pub use input::StdinInput;
pub use message_format::MessageFormatter;
pub use output::OutputCapture;
pub use output::OutputSink;
pub use shell::Shell;
pub use shell::ShellConfig;
pub use streaming::StreamState;
pub use streaming::StreamingShell;
