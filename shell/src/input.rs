//! Input acquisition for the REPL loops.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::io::Lines;
use tokio::io::Stdin;

use crate::output::OutputSink;

/// One line of user input at a time; `None` at end of stream.
#[async_trait]
pub trait InputSource: Send {
    async fn read_line(&mut self, prompt: &str) -> Option<String>;
}

/// Standard input. The prompt goes through the shared output sink so it
/// serializes with the receive task's lines.
pub struct StdinInput {
    output: OutputSink,
    lines: Lines<BufReader<Stdin>>,
}

impl StdinInput {
    pub fn new(output: OutputSink) -> Self {
        Self {
            output,
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

#[async_trait]
impl InputSource for StdinInput {
    async fn read_line(&mut self, prompt: &str) -> Option<String> {
        self.output.write(prompt);
        match self.lines.next_line().await {
            Ok(line) => line,
            Err(_) => None,
        }
    }
}

/// Pre-scripted input for tests and batch execution. An optional delay
/// before each line lets concurrent tasks interleave deterministically
/// enough to observe.
pub struct ScriptedInput {
    lines: VecDeque<String>,
    delay: Option<Duration>,
}

impl ScriptedInput {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl InputSource for ScriptedInput {
    async fn read_line(&mut self, _prompt: &str) -> Option<String> {
        let line = self.lines.pop_front()?;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Some(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn scripted_input_drains_then_ends() {
        let mut input = ScriptedInput::new(["one", "two"]);
        assert_eq!(input.read_line("> ").await.as_deref(), Some("one"));
        assert_eq!(input.read_line("> ").await.as_deref(), Some("two"));
        assert_eq!(input.read_line("> ").await, None);
    }
}
