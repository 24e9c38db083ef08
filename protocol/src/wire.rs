//! Newline-delimited JSON framing.
//!
//! Every frame is one JSON object followed by `\n`. Readers must tolerate a
//! peer writing several frames in a single chunk and a frame split across
//! chunks; the buffered line readers in the transport crate provide that.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::ParsedCommand;
use crate::CommandResult;
use crate::Message;
use crate::ProtocolError;

/// Client-to-server frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Request {
    Command {
        command: String,
        #[serde(default)]
        arguments: Vec<String>,
        #[serde(default)]
        options: BTreeMap<String, Value>,
    },
    Ping,
    Subscribe {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rule: Option<String>,
    },
    Unsubscribe,
}

impl Request {
    pub fn command(parsed: &ParsedCommand) -> Self {
        Request::Command {
            command: parsed.command.clone(),
            arguments: parsed.arguments.clone(),
            options: parsed.options.clone(),
        }
    }

    /// Rebuild the [`ParsedCommand`] a `command` frame described. Used by
    /// servers and the in-memory transport; other variants return `None`.
    pub fn into_parsed(self) -> Option<ParsedCommand> {
        match self {
            Request::Command {
                command,
                arguments,
                options,
            } => {
                let raw = std::iter::once(command.as_str())
                    .chain(arguments.iter().map(String::as_str))
                    .collect::<Vec<_>>()
                    .join(" ");
                Some(ParsedCommand {
                    command,
                    arguments,
                    options,
                    raw,
                    vertical: false,
                })
            }
            _ => None,
        }
    }

    /// One JSON object plus the terminating newline.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

pub fn decode_request(line: &str) -> Result<Request, ProtocolError> {
    let trimmed = line.trim();
    serde_json::from_str(trimmed)
        .map_err(|_| ProtocolError::InvalidFrame(trimmed.to_string()))
}

pub fn encode_result(result: &CommandResult) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(result)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_result(line: &str) -> Result<CommandResult, ProtocolError> {
    let trimmed = line.trim();
    let result: CommandResult = serde_json::from_str(trimmed)
        .map_err(|_| ProtocolError::InvalidFrame(trimmed.to_string()))?;
    Ok(result.normalized())
}

pub fn encode_push(message: &Message) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(&message.to_value())?;
    line.push('\n');
    Ok(line)
}

/// Decode a pushed line. Never fails: malformed JSON becomes an error-typed
/// message quoting the offending line.
pub fn decode_push(line: &str) -> Message {
    let trimmed = line.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => Message::from_value(value),
        Err(_) => Message::error(format!("Invalid message format: {trimmed}")),
    }
}
