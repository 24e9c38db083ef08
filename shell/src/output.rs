//! Serialized output sink shared by the input and receive tasks.
//!
//! Whole lines are written under one lock so a pushed message never tears
//! with a prompt or a command result on the same line; which task's line
//! comes first is deliberately unspecified.

use std::io;
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

#[derive(Clone)]
pub struct OutputSink {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl OutputSink {
    pub fn stdout() -> Self {
        Self::from_writer(Box::new(io::stdout()))
    }

    pub fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Sink writing into an in-memory buffer, for tests and embedding.
    pub fn capture() -> (Self, OutputCapture) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Self::from_writer(Box::new(SharedBuffer(Arc::clone(&buffer))));
        (sink, OutputCapture(buffer))
    }

    fn writer(&self) -> MutexGuard<'_, Box<dyn Write + Send>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Write `text` followed by a newline, atomically.
    pub fn line(&self, text: &str) {
        let mut writer = self.writer();
        let _ = writeln!(writer, "{text}");
        let _ = writer.flush();
    }

    /// Write raw text without a newline (prompts).
    pub fn write(&self, text: &str) {
        let mut writer = self.writer();
        let _ = writer.write_all(text.as_bytes());
        let _ = writer.flush();
    }
}

/// Read side of [`OutputSink::capture`].
#[derive(Clone)]
pub struct OutputCapture(Arc<Mutex<Vec<u8>>>);

impl OutputCapture {
    pub fn contents(&self) -> String {
        let buffer = self.0.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn capture_sees_lines_and_raw_writes() {
        let (sink, capture) = OutputSink::capture();
        sink.write("prompt> ");
        sink.line("hello");
        assert_eq!(capture.contents(), "prompt> hello\n");
    }

    #[test]
    fn clones_share_one_buffer() {
        let (sink, capture) = OutputSink::capture();
        let other = sink.clone();
        sink.line("a");
        other.line("b");
        assert_eq!(capture.contents(), "a\nb\n");
    }
}
