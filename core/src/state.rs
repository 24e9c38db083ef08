//! Per-shell state: the multi-line continuation buffer, the session
//! key-value store and session metrics.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use serde_json::json;
use tracing::debug;

use crate::history::write_private;

pub const DEFAULT_PROMPT: &str = "shell> ";
pub const DEFAULT_FORMAT: &str = "table";

/// A command completed by [`ShellState::process_input`].
///
/// `text` is the parse form (continuation segments joined by single spaces);
/// `raw` preserves the original lines joined by `\n`, so multi-line input
/// keeps its newlines in `ParsedCommand::raw`. The two only differ after a
/// continuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedInput {
    pub text: String,
    pub raw: String,
}

impl CompletedInput {
    fn single(line: &str) -> Self {
        Self {
            text: line.to_string(),
            raw: line.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct MultiLineBuffer {
    segments: Vec<String>,
    raw_segments: Vec<String>,
    active: bool,
}

impl MultiLineBuffer {
    fn clear(&mut self) {
        self.segments.clear();
        self.raw_segments.clear();
        self.active = false;
    }
}

#[derive(Debug)]
pub struct ShellState {
    multiline: MultiLineBuffer,
    session: BTreeMap<String, Value>,
    session_path: Option<PathBuf>,
    session_started: Instant,
    commands_this_session: u64,
    last_command_at: Option<chrono::DateTime<Utc>>,
    carried_total_commands: u64,
    carried_total_duration: f64,
}

impl ShellState {
    pub fn new(server_url: impl Into<String>) -> Self {
        let mut session = BTreeMap::new();
        session.insert("server_url".to_string(), json!(server_url.into()));
        session.insert("default_format".to_string(), json!(DEFAULT_FORMAT));
        session.insert("prompt".to_string(), json!(DEFAULT_PROMPT));
        Self {
            multiline: MultiLineBuffer::default(),
            session,
            session_path: None,
            session_started: Instant::now(),
            commands_this_session: 0,
            last_command_at: None,
            carried_total_commands: 0,
            carried_total_duration: 0.0,
        }
    }

    pub fn with_file(server_url: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let mut state = Self::new(server_url);
        state.session_path = Some(path.into());
        state
    }

    /// Feed one raw input line. Returns the completed command once a full
    /// logical line is available.
    ///
    /// A line whose trimmed text ends with `\` opens (or extends) the
    /// continuation buffer with the backslash stripped. An empty line while
    /// the buffer is open discards the buffer. Blank input outside a
    /// continuation completes nothing.
    pub fn process_input(&mut self, line: &str) -> Option<CompletedInput> {
        let trimmed = line.trim();

        if let Some(stripped) = trimmed.strip_suffix('\\') {
            self.multiline.active = true;
            self.multiline
                .segments
                .push(stripped.trim_end().to_string());
            self.multiline.raw_segments.push(stripped.to_string());
            return None;
        }

        if self.multiline.active {
            if trimmed.is_empty() {
                self.multiline.clear();
                return None;
            }
            self.multiline.segments.push(trimmed.to_string());
            self.multiline.raw_segments.push(line.to_string());
            let completed = CompletedInput {
                text: self.multiline.segments.join(" "),
                raw: self.multiline.raw_segments.join("\n"),
            };
            self.multiline.clear();
            return Some(completed);
        }

        if trimmed.is_empty() {
            return None;
        }
        Some(CompletedInput::single(line))
    }

    pub fn in_multiline(&self) -> bool {
        self.multiline.active
    }

    /// Discard the continuation buffer and leave multi-line mode.
    pub fn reset_multiline(&mut self) {
        self.multiline.clear();
    }

    pub fn record_command(&mut self) {
        self.commands_this_session += 1;
        self.last_command_at = Some(Utc::now());
    }

    pub fn commands_this_session(&self) -> u64 {
        self.commands_this_session
    }

    pub fn last_command_at(&self) -> Option<chrono::DateTime<Utc>> {
        self.last_command_at
    }

    pub fn session_duration(&self) -> Duration {
        self.session_started.elapsed()
    }

    pub fn total_commands_ever(&self) -> u64 {
        self.carried_total_commands + self.commands_this_session
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.session.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.session.get(key).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.session.insert(key.into(), value);
    }

    pub fn vars(&self) -> &BTreeMap<String, Value> {
        &self.session
    }

    pub fn prompt(&self) -> String {
        self.get_str("prompt")
            .unwrap_or_else(|| DEFAULT_PROMPT.to_string())
    }

    pub fn default_format(&self) -> String {
        self.get_str("default_format")
            .unwrap_or_else(|| DEFAULT_FORMAT.to_string())
    }

    /// Load the session file. An unreadable or non-object file is ignored and
    /// the defaults stand. `total_commands_ever` and `total_session_duration`
    /// are carried so they accumulate across sessions.
    pub fn load_session(&mut self) -> io::Result<()> {
        let Some(path) = &self.session_path else {
            return Ok(());
        };
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    debug!("session load failed, using defaults: {err}");
                }
                return Ok(());
            }
        };
        let Ok(Value::Object(object)) = serde_json::from_str::<Value>(&contents) else {
            debug!("session file is not a JSON object, using defaults");
            return Ok(());
        };
        for (key, value) in object {
            match key.as_str() {
                "total_commands_ever" => {
                    self.carried_total_commands = value.as_u64().unwrap_or(0);
                }
                "total_session_duration" => {
                    self.carried_total_duration = value.as_f64().unwrap_or(0.0);
                }
                "last_saved" => {}
                _ => {
                    self.session.insert(key, value);
                }
            }
        }
        Ok(())
    }

    /// Persist the session atomically with owner-only permissions.
    pub fn save_session(&self) -> io::Result<()> {
        let Some(path) = &self.session_path else {
            return Ok(());
        };
        let mut object = self.session.clone();
        object.insert(
            "total_commands_ever".to_string(),
            json!(self.total_commands_ever()),
        );
        object.insert(
            "total_session_duration".to_string(),
            json!(self.carried_total_duration + self.session_duration().as_secs_f64()),
        );
        object.insert("last_saved".to_string(), json!(Utc::now().to_rfc3339()));
        let contents = serde_json::to_string_pretty(&object)?;
        write_private(path, contents.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn continuation_joins_with_single_spaces() {
        let mut state = ShellState::new("unix:///tmp/test.sock");
        assert_eq!(state.process_input("a \\"), None);
        assert_eq!(state.process_input("b \\"), None);
        let completed = state.process_input("c").unwrap();
        assert_eq!(completed.text, "a b c");
    }

    #[test]
    fn raw_preserves_newlines() {
        let mut state = ShellState::new("unix:///tmp/test.sock");
        assert_eq!(state.process_input("SELECT *\\"), None);
        let completed = state.process_input("  FROM users").unwrap();
        assert_eq!(completed.text, "SELECT * FROM users");
        assert_eq!(completed.raw, "SELECT *\n  FROM users");
    }

    #[test]
    fn empty_line_cancels_continuation() {
        let mut state = ShellState::new("unix:///tmp/test.sock");
        assert_eq!(state.process_input("a \\"), None);
        assert!(state.in_multiline());
        assert_eq!(state.process_input(""), None);
        assert!(!state.in_multiline());
        // The buffer is gone: the next line stands alone.
        let completed = state.process_input("b").unwrap();
        assert_eq!(completed.text, "b");
    }

    #[test]
    fn reset_discards_the_buffer() {
        let mut state = ShellState::new("unix:///tmp/test.sock");
        assert_eq!(state.process_input("a \\"), None);
        state.reset_multiline();
        assert!(!state.in_multiline());
        let completed = state.process_input("b").unwrap();
        assert_eq!(completed.text, "b");
    }

    #[test]
    fn single_line_passes_through() {
        let mut state = ShellState::new("unix:///tmp/test.sock");
        let completed = state.process_input("status").unwrap();
        assert_eq!(completed.text, "status");
        assert_eq!(completed.raw, "status");
    }

    #[test]
    fn blank_input_outside_continuation_completes_nothing() {
        let mut state = ShellState::new("unix:///tmp/test.sock");
        assert_eq!(state.process_input("   "), None);
    }

    #[test]
    fn defaults_present() {
        let state = ShellState::new("http://localhost:8080");
        assert_eq!(state.get_str("server_url").unwrap(), "http://localhost:8080");
        assert_eq!(state.default_format(), "table");
        assert_eq!(state.prompt(), "shell> ");
    }

    #[test]
    fn session_totals_accumulate_across_sessions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");

        let mut first = ShellState::with_file("unix:///s", &path);
        first.record_command();
        first.record_command();
        first.set("theme", json!("dark"));
        first.save_session().unwrap();

        let mut second = ShellState::with_file("unix:///s", &path);
        second.load_session().unwrap();
        assert_eq!(second.get_str("theme").unwrap(), "dark");
        second.record_command();
        assert_eq!(second.total_commands_ever(), 3);
        second.save_session().unwrap();

        let saved: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["total_commands_ever"], json!(3));
        assert!(saved["total_session_duration"].as_f64().unwrap() >= 0.0);
        assert!(saved.get("last_saved").is_some());
    }

    #[test]
    fn corrupt_session_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        let mut state = ShellState::with_file("unix:///s", &path);
        state.load_session().unwrap();
        assert_eq!(state.default_format(), "table");

        std::fs::write(&path, "{broken").unwrap();
        state.load_session().unwrap();
        assert_eq!(state.prompt(), "shell> ");
    }
}
