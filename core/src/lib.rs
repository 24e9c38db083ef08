//! Client- and server-side building blocks for remsh: the shell tokenizer,
//! alias table, history, session state, result formatting, the command
//! handler registry and the filter/expression engine.

pub mod alias;
pub mod filter;
pub mod format;
pub mod history;
pub mod parser;
pub mod registry;
pub mod state;

pub use alias::AliasManager;
pub use format::Formatter;
pub use format::OutputFormat;
pub use history::HistoryManager;
pub use registry::CommandHandler;
pub use registry::CommandRegistry;
pub use registry::Context;
pub use registry::EmptyContext;
pub use registry::ServiceContainer;
pub use state::CompletedInput;
pub use state::ShellState;
