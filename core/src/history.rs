//! Capped command history with best-effort persistence.
//!
//! Entries are deduplicated against the immediate predecessor only; the file
//! on disk is newline-delimited and written atomically with owner-only
//! permissions.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use tracing::debug;

pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug)]
pub struct HistoryManager {
    entries: VecDeque<String>,
    capacity: usize,
    /// Navigation cursor; `entries.len()` means one-past-end.
    cursor: usize,
    path: Option<PathBuf>,
}

impl HistoryManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            cursor: 0,
            path: None,
        }
    }

    /// History backed by a file; `load` and `save` use the given path.
    pub fn with_file(capacity: usize, path: impl Into<PathBuf>) -> Self {
        let mut history = Self::new(capacity);
        history.path = Some(path.into());
        history
    }

    /// Add one executed command. Whitespace is trimmed, empty entries are
    /// dropped and an entry identical to the current tail is ignored. Any add
    /// resets the navigation cursor to one-past-end.
    pub fn add(&mut self, entry: &str) {
        let entry = entry.trim();
        if entry.is_empty() {
            return;
        }
        if self.entries.back().is_some_and(|last| last == entry) {
            self.cursor = self.entries.len();
            return;
        }
        self.entries.push_back(entry.to_string());
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        self.cursor = self.entries.len();
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.entries.back().map(String::as_str)
    }

    /// Step backwards; clamps at the oldest entry.
    pub fn previous(&mut self) -> Option<&str> {
        if self.entries.is_empty() {
            return None;
        }
        if self.cursor > 0 {
            self.cursor -= 1;
        }
        self.entries.get(self.cursor).map(String::as_str)
    }

    /// Step forwards; returns `None` once the cursor passes the newest entry.
    pub fn next(&mut self) -> Option<&str> {
        if self.cursor < self.entries.len() {
            self.cursor += 1;
        }
        self.entries.get(self.cursor).map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = 0;
    }

    /// Write the history file atomically (temp file + rename) with mode 0600.
    /// The containing directory is created if missing.
    pub fn save(&self) -> io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut contents = String::new();
        for entry in &self.entries {
            contents.push_str(entry);
            contents.push('\n');
        }
        write_private(path, contents.as_bytes())
    }

    /// Load the history file. A missing or unreadable file yields an empty
    /// history; consecutive duplicates are collapsed and the capacity cap is
    /// applied from the tail.
    pub fn load(&mut self) -> io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        self.entries.clear();
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.cursor = 0;
                return Ok(());
            }
            Err(err) => {
                debug!("history load failed, starting empty: {err}");
                self.cursor = 0;
                return Ok(());
            }
        };
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if self.entries.back().is_some_and(|last| last == line) {
                continue;
            }
            self.entries.push_back(line.to_string());
        }
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        self.cursor = self.entries.len();
        Ok(())
    }
}

/// Atomic write with owner-only permissions, shared with the session store.
pub(crate) fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
    }
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn collected(history: &HistoryManager) -> Vec<String> {
        history.entries().map(str::to_string).collect()
    }

    #[test]
    fn consecutive_duplicates_stored_once() {
        let mut history = HistoryManager::new(10);
        history.add("status");
        history.add("status");
        history.add("ping");
        history.add("status");
        assert_eq!(collected(&history), vec!["status", "ping", "status"]);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut history = HistoryManager::new(3);
        for i in 0..7 {
            history.add(&format!("cmd{i}"));
        }
        assert_eq!(collected(&history), vec!["cmd4", "cmd5", "cmd6"]);
    }

    #[test]
    fn empty_and_whitespace_entries_dropped() {
        let mut history = HistoryManager::new(10);
        history.add("");
        history.add("   ");
        history.add("  real  ");
        assert_eq!(collected(&history), vec!["real"]);
    }

    #[test]
    fn cursor_navigation_clamps() {
        let mut history = HistoryManager::new(10);
        history.add("a");
        history.add("b");
        history.add("c");
        assert_eq!(history.previous(), Some("c"));
        assert_eq!(history.previous(), Some("b"));
        assert_eq!(history.previous(), Some("a"));
        assert_eq!(history.previous(), Some("a"));
        assert_eq!(history.next(), Some("b"));
        assert_eq!(history.next(), Some("c"));
        assert_eq!(history.next(), None);
        assert_eq!(history.next(), None);
    }

    #[test]
    fn add_resets_cursor() {
        let mut history = HistoryManager::new(10);
        history.add("a");
        history.add("b");
        history.previous();
        history.previous();
        history.add("c");
        assert_eq!(history.previous(), Some("c"));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("history");

        let mut history = HistoryManager::with_file(10, &path);
        history.add("one");
        history.add("two");
        history.save().unwrap();

        let mut reloaded = HistoryManager::with_file(10, &path);
        reloaded.load().unwrap();
        assert_eq!(collected(&reloaded), vec!["one", "two"]);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn load_collapses_duplicates_and_truncates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history");
        fs::write(&path, "a\na\nb\n\nc\nd\ne\n").unwrap();

        let mut history = HistoryManager::with_file(3, &path);
        history.load().unwrap();
        assert_eq!(collected(&history), vec!["c", "d", "e"]);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let mut history = HistoryManager::with_file(5, dir.path().join("none"));
        history.load().unwrap();
        assert!(history.is_empty());
    }
}
