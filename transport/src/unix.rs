//! Local-IPC transport over a Unix domain stream socket.
//!
//! The stream is split into owned halves behind separate async mutexes so a
//! streaming shell can run `send_async` and `receive` concurrently. Line
//! buffering lives in the `BufReader`: several frames arriving in one read,
//! or one frame split across reads, both come out as complete lines.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::io::Lines;
use tokio::net::UnixStream;
use tokio::net::unix::OwnedReadHalf;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::Mutex;
use tracing::debug;

use remsh_protocol::CommandResult;
use remsh_protocol::Message;
use remsh_protocol::ParsedCommand;
use remsh_protocol::Request;
use remsh_protocol::decode_push;
use remsh_protocol::decode_result;

use crate::MessageCallback;
use crate::StreamingTransport;
use crate::Transport;
use crate::TransportError;

/// How long to wait for the server's optional welcome line on connect.
const WELCOME_DRAIN_TIMEOUT: Duration = Duration::from_millis(200);
const WELCOME_DRAIN_MAX_LINES: usize = 8;

pub struct UnixTransport {
    path: PathBuf,
    reader: Mutex<Option<Lines<BufReader<OwnedReadHalf>>>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
    streaming: AtomicBool,
    callback: std::sync::Mutex<Option<MessageCallback>>,
}

impl UnixTransport {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
            callback: std::sync::Mutex::new(None),
        }
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.streaming.store(false, Ordering::SeqCst);
    }

    async fn write_line(&self, line: &str) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        match writer.write_all(line.as_bytes()).await {
            Ok(()) => Ok(()),
            Err(err) => {
                *guard = None;
                self.mark_disconnected();
                Err(TransportError::Io(err))
            }
        }
    }

    /// Read one line, optionally bounded by `timeout` (`Ok(None)` when it
    /// elapses). End-of-stream disconnects the transport. `next_line` is
    /// cancellation safe, so a timeout cannot lose part of a frame.
    async fn read_line(&self, timeout: Option<Duration>) -> Result<Option<String>, TransportError> {
        let mut guard = self.reader.lock().await;
        let Some(reader) = guard.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        let read = match timeout {
            Some(limit) => match tokio::time::timeout(limit, reader.next_line()).await {
                Ok(read) => read,
                Err(_) => return Ok(None),
            },
            None => reader.next_line().await,
        };
        match read {
            Ok(Some(line)) => Ok(Some(line)),
            Ok(None) => {
                *guard = None;
                self.mark_disconnected();
                Err(TransportError::Closed)
            }
            Err(err) => {
                *guard = None;
                self.mark_disconnected();
                Err(TransportError::Io(err))
            }
        }
    }

    /// Consume whatever greeting the server sends right after accept, so the
    /// first `send` does not read a stale line as its response.
    async fn drain_welcome(&self) {
        for _ in 0..WELCOME_DRAIN_MAX_LINES {
            match self.read_line(Some(WELCOME_DRAIN_TIMEOUT)).await {
                Ok(Some(line)) => {
                    let message = decode_push(&line);
                    debug!(source = %message.source, "server welcome: {}", message.payload_text());
                }
                Ok(None) | Err(_) => break,
            }
        }
    }
}

#[async_trait]
impl Transport for UnixTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let stream = UnixStream::connect(&self.path).await.map_err(|err| {
            TransportError::Connect(format!("{}: {err}", self.path.display()))
        })?;
        let (read_half, write_half) = stream.into_split();
        *self.reader.lock().await = Some(BufReader::new(read_half).lines());
        *self.writer.lock().await = Some(write_half);
        self.connected.store(true, Ordering::SeqCst);
        debug!(path = %self.path.display(), "connected");
        self.drain_welcome().await;
        Ok(())
    }

    async fn disconnect(&self) {
        self.mark_disconnected();
        *self.reader.lock().await = None;
        *self.writer.lock().await = None;
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, command: &ParsedCommand) -> CommandResult {
        if !self.is_connected() {
            return CommandResult::failure("Not connected");
        }
        let line = match Request::command(command).encode() {
            Ok(line) => line,
            Err(err) => return CommandResult::failure(format!("Invalid request: {err}")),
        };
        if let Err(err) = self.write_line(&line).await {
            return CommandResult::failure(format!("Connection failed: {err}"));
        }
        match self.read_line(None).await {
            Ok(Some(line)) => match decode_result(&line) {
                Ok(result) => result,
                Err(_) => CommandResult::failure(format!("Invalid response: {}", line.trim())),
            },
            Ok(None) => CommandResult::failure("Connection failed: read timed out"),
            Err(err) => CommandResult::failure(format!("Connection failed: {err}")),
        }
    }

    async fn ping(&self) -> bool {
        if !self.is_connected() {
            return false;
        }
        let Ok(line) = Request::Ping.encode() else {
            return false;
        };
        if self.write_line(&line).await.is_err() {
            return false;
        }
        match self.read_line(None).await {
            Ok(Some(line)) => decode_result(&line).map(|r| r.success).unwrap_or(false),
            _ => false,
        }
    }

    fn info(&self) -> BTreeMap<String, Value> {
        let mut info = BTreeMap::new();
        info.insert("type".to_string(), json!("unix"));
        info.insert("path".to_string(), json!(self.path.display().to_string()));
        info.insert("connected".to_string(), json!(self.is_connected()));
        info.insert("streaming".to_string(), json!(self.is_streaming()));
        info
    }

    fn endpoint(&self) -> String {
        format!("unix://{}", self.path.display())
    }
}

#[async_trait]
impl StreamingTransport for UnixTransport {
    async fn send_async(&self, command: &ParsedCommand) -> Result<(), TransportError> {
        let line = Request::command(command).encode()?;
        self.write_line(&line).await
    }

    async fn receive(&self, timeout: Option<Duration>) -> Result<Option<Message>, TransportError> {
        match self.read_line(timeout).await? {
            Some(line) => Ok(Some(decode_push(&line))),
            None => Ok(None),
        }
    }

    async fn start_streaming(&self) -> Result<(), TransportError> {
        let line = Request::Subscribe { rule: None }.encode()?;
        self.write_line(&line).await?;
        self.streaming.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_streaming(&self) -> Result<(), TransportError> {
        let line = Request::Unsubscribe.encode()?;
        self.write_line(&line).await?;
        self.streaming.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn on_message(&self, callback: MessageCallback) {
        *self.callback.lock().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    fn dispatch_message(&self, message: &Message) {
        if let Some(callback) = self
            .callback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            callback(message);
        }
    }

    fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixListener;

    async fn echo_server(listener: UnixListener, responses: Vec<String>) {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut buf = [0u8; 4096];
        for response in responses {
            let n = stream.read(&mut buf).await.expect("read");
            if n == 0 {
                return;
            }
            stream
                .write_all(response.as_bytes())
                .await
                .expect("write response");
        }
    }

    #[tokio::test]
    async fn send_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("remsh.sock");
        let listener = UnixListener::bind(&path).expect("bind");
        let server = tokio::spawn(echo_server(
            listener,
            vec!["{\"success\":true,\"message\":\"pong\"}\n".to_string()],
        ));

        let transport = UnixTransport::new(&path);
        transport.connect().await.expect("connect");
        let result = transport.send(&ParsedCommand::new("ping")).await;
        assert!(result.success);
        assert_eq!(result.message.as_deref(), Some("pong"));
        server.await.expect("server task");
    }

    #[tokio::test]
    async fn send_when_disconnected_is_a_failure_result() {
        let transport = UnixTransport::new("/tmp/does-not-exist.sock");
        let result = transport.send(&ParsedCommand::new("status")).await;
        assert!(!result.success);
        assert!(result.error.unwrap().to_lowercase().contains("not connected"));
    }

    #[tokio::test]
    async fn connect_to_missing_socket_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let transport = UnixTransport::new(dir.path().join("absent.sock"));
        assert!(transport.connect().await.is_err());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("remsh.sock");
        let listener = UnixListener::bind(&path).expect("bind");
        let server = tokio::spawn(async move {
            let _stream = listener.accept().await.expect("accept");
            tokio::time::sleep(Duration::from_millis(50)).await;
        });

        let transport = UnixTransport::new(&path);
        transport.connect().await.expect("connect");
        transport.disconnect().await;
        transport.disconnect().await;
        assert!(!transport.is_connected());
        let result = transport.send(&ParsedCommand::new("x")).await;
        assert!(!result.success);
        server.await.expect("server task");
    }

    #[tokio::test]
    async fn peer_close_marks_disconnected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("remsh.sock");
        let listener = UnixListener::bind(&path).expect("bind");
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            drop(stream);
        });

        let transport = UnixTransport::new(&path);
        transport.connect().await.expect("connect");
        server.await.expect("server task");

        let result = transport.send(&ParsedCommand::new("status")).await;
        assert!(!result.success);
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn receive_times_out_with_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("remsh.sock");
        let listener = UnixListener::bind(&path).expect("bind");
        let server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.expect("accept");
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let transport = UnixTransport::new(&path);
        transport.connect().await.expect("connect");
        let received = transport
            .receive(Some(Duration::from_millis(20)))
            .await
            .expect("receive");
        assert!(received.is_none());
        server.await.expect("server task");
    }

    #[tokio::test]
    async fn multiple_frames_in_one_write_are_read_separately() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("remsh.sock");
        let listener = UnixListener::bind(&path).expect("bind");
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            // Write after the client's welcome drain has given up, so both
            // frames arrive in one chunk on the push path.
            tokio::time::sleep(Duration::from_millis(300)).await;
            stream
                .write_all(
                    b"{\"type\":\"data\",\"payload\":1,\"source\":\"a\"}\n{\"type\":\"data\",\"payload\":2,\"source\":\"a\"}\n",
                )
                .await
                .expect("write");
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let transport = UnixTransport::new(&path);
        transport.connect().await.expect("connect");
        let first = transport
            .receive(Some(Duration::from_secs(2)))
            .await
            .expect("receive")
            .expect("first frame");
        let second = transport
            .receive(Some(Duration::from_secs(2)))
            .await
            .expect("receive")
            .expect("second frame");
        assert_eq!(first.payload_text(), "1");
        assert_eq!(second.payload_text(), "2");
        server.await.expect("server task");
    }
}
