use std::collections::BTreeMap;

use serde_json::Value;

/// Structured form of one logical input line.
///
/// Produced by the shell tokenizer; consumed by built-in dispatch, the
/// transports and server-side handlers. The struct is plain data and carries
/// no parsing state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedCommand {
    /// Head token. Empty for blank input.
    pub command: String,
    /// Positional arguments in input order. Never contains `--key` or `-k`
    /// prefixed tokens.
    pub arguments: Vec<String>,
    /// Option tokens. Keys carry no leading dashes; bare flags map to JSON
    /// `true`, `--key=value` maps to the string after the `=`.
    pub options: BTreeMap<String, Value>,
    /// The original input, including internal newlines introduced by
    /// multi-line continuation.
    pub raw: String,
    /// True when the input ended with the two-character `\G` terminator.
    pub vertical: bool,
}

impl ParsedCommand {
    /// Convenience constructor for tests and embedders that already know the
    /// token split.
    pub fn new(command: impl Into<String>) -> Self {
        let command = command.into();
        Self {
            raw: command.clone(),
            command,
            ..Default::default()
        }
    }

    pub fn with_arguments(mut self, arguments: Vec<String>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_option(mut self, name: impl Into<String>, value: Value) -> Self {
        self.options.insert(name.into(), value);
        self
    }

    /// Option value as a string, if the option is present. Booleans render
    /// as `true`/`false` so bare flags can be read uniformly.
    pub fn option_str(&self, name: &str) -> Option<String> {
        self.options.get(name).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    pub fn has_option(&self, name: &str) -> bool {
        self.options.contains_key(name)
    }

    pub fn is_blank(&self) -> bool {
        self.command.is_empty()
    }
}
