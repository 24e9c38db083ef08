//! Reference server: accepts connections on a Unix domain socket, routes
//! `command` frames through a [`CommandRegistry`], and pushes broadcast
//! messages to subscribed connections, optionally filtered by a
//! per-connection subscription rule.

mod context;
mod error;
pub mod handlers;

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::net::UnixListener;
use tokio::net::UnixStream;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::warn;

use remsh_core::CommandRegistry;
use remsh_core::filter::Rule;
use remsh_core::filter::parse_rule;
use remsh_protocol::CommandResult;
use remsh_protocol::Message;
use remsh_protocol::Request;
use remsh_protocol::decode_request;
use remsh_protocol::encode_push;
use remsh_protocol::encode_result;

pub use context::ServerContext;
pub use error::ServerError;

/// Read timeout per iteration; a timeout only re-checks the running flag.
const READ_TICK: Duration = Duration::from_secs(1);
const ACCEPT_TICK: Duration = Duration::from_millis(250);
const BROADCAST_CAPACITY: usize = 256;

pub struct ShellServer {
    socket_path: PathBuf,
    registry: Arc<CommandRegistry>,
    context: Arc<ServerContext>,
    events: broadcast::Sender<Message>,
    running: Arc<AtomicBool>,
    welcome: String,
}

impl ShellServer {
    pub fn new(
        socket_path: impl AsRef<Path>,
        registry: Arc<CommandRegistry>,
        context: Arc<ServerContext>,
    ) -> Self {
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            registry,
            context,
            events,
            running: Arc::new(AtomicBool::new(true)),
            welcome: "remsh server ready".to_string(),
        }
    }

    pub fn with_welcome(mut self, welcome: impl Into<String>) -> Self {
        self.welcome = welcome.into();
        self
    }

    pub fn running_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Publish a message to every subscribed connection. Returns how many
    /// connections are currently listening on the broadcast channel.
    pub fn broadcast(&self, message: Message) -> usize {
        let receivers = self.events.receiver_count();
        if self.events.send(message).is_err() {
            debug!("broadcast with no subscribed connections");
        }
        receivers
    }

    /// Accept loop. Returns once [`ShellServer::stop`] has been called (or
    /// the listener fails); the socket file is removed on the way out.
    pub async fn run(&self) -> Result<(), ServerError> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|source| ServerError::Bind {
                path: self.socket_path.clone(),
                source,
            })?;
        }
        let listener =
            UnixListener::bind(&self.socket_path).map_err(|source| ServerError::Bind {
                path: self.socket_path.clone(),
                source,
            })?;
        info!(path = %self.socket_path.display(), "listening");

        while self.running.load(Ordering::SeqCst) {
            let accepted = match tokio::time::timeout(ACCEPT_TICK, listener.accept()).await {
                Ok(accepted) => accepted,
                Err(_) => continue,
            };
            match accepted {
                Ok((stream, _addr)) => {
                    let connection = Connection {
                        registry: Arc::clone(&self.registry),
                        context: Arc::clone(&self.context),
                        events: self.events.clone(),
                        running: Arc::clone(&self.running),
                        welcome: self.welcome.clone(),
                    };
                    tokio::spawn(connection.serve(stream));
                }
                Err(err) => {
                    warn!("accept failed: {err}");
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        info!("server stopped");
        Ok(())
    }
}

struct Connection {
    registry: Arc<CommandRegistry>,
    context: Arc<ServerContext>,
    events: broadcast::Sender<Message>,
    running: Arc<AtomicBool>,
    welcome: String,
}

impl Connection {
    async fn serve(self, stream: UnixStream) {
        let (read_half, write_half) = stream.into_split();
        // `next_line` is cancellation safe: a read-tick timeout mid-frame
        // keeps the partial line buffered.
        let mut reader = BufReader::new(read_half).lines();

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel::<String>();
        let writer_task = tokio::spawn(write_loop(outgoing_rx, write_half));

        if let Ok(line) = encode_push(&Message::system(self.welcome.clone())) {
            let _ = outgoing.send(line);
        }

        let subscribed = Arc::new(AtomicBool::new(false));
        let rule: Arc<RwLock<Option<Rule>>> = Arc::new(RwLock::new(None));
        let forward_task = tokio::spawn(forward_loop(
            self.events.subscribe(),
            Arc::clone(&subscribed),
            Arc::clone(&rule),
            outgoing.clone(),
        ));

        loop {
            let read = match tokio::time::timeout(READ_TICK, reader.next_line()).await {
                // Timeout just means "check whether we are still serving".
                Err(_) => {
                    if self.running.load(Ordering::SeqCst) {
                        continue;
                    }
                    break;
                }
                Ok(read) => read,
            };
            match read {
                Ok(None) => {
                    debug!("peer closed connection");
                    break;
                }
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    self.handle_frame(&line, &outgoing, &subscribed, &rule);
                }
                Err(err) => {
                    debug!("connection read failed: {err}");
                    break;
                }
            }
        }

        forward_task.abort();
        drop(outgoing);
        let _ = writer_task.await;
    }

    fn handle_frame(
        &self,
        line: &str,
        outgoing: &mpsc::UnboundedSender<String>,
        subscribed: &Arc<AtomicBool>,
        rule: &Arc<RwLock<Option<Rule>>>,
    ) {
        let send_result = |result: &CommandResult| {
            if let Ok(encoded) = encode_result(result) {
                let _ = outgoing.send(encoded);
            }
        };
        let send_message = |message: &Message| {
            if let Ok(encoded) = encode_push(message) {
                let _ = outgoing.send(encoded);
            }
        };

        let request = match decode_request(line) {
            Ok(request) => request,
            Err(err) => {
                debug!("invalid frame: {err}");
                send_result(&CommandResult::failure(format!(
                    "Invalid request: {}",
                    line.trim()
                )));
                return;
            }
        };

        match request {
            Request::Command { .. } => {
                let Some(parsed) = request.into_parsed() else {
                    return;
                };
                debug!(command = %parsed.command, "dispatching");
                let result = self.registry.execute(&parsed, self.context.as_ref());
                send_result(&result);
            }
            Request::Ping => {
                send_result(&CommandResult::with_message("pong"));
            }
            Request::Subscribe { rule: rule_text } => {
                let compiled = match rule_text.as_deref() {
                    Some(text) => match parse_rule(text) {
                        Ok(rule) => Some(rule),
                        Err(err) => {
                            send_message(&Message::error(format!("Invalid rule: {err}")));
                            return;
                        }
                    },
                    None => None,
                };
                *rule.write().unwrap_or_else(|e| e.into_inner()) = compiled;
                subscribed.store(true, Ordering::SeqCst);
                send_message(&Message::system("Subscribed"));
            }
            Request::Unsubscribe => {
                subscribed.store(false, Ordering::SeqCst);
                send_message(&Message::system("Unsubscribed"));
            }
        }
    }
}

async fn write_loop(mut outgoing: mpsc::UnboundedReceiver<String>, mut writer: OwnedWriteHalf) {
    while let Some(line) = outgoing.recv().await {
        if let Err(err) = writer.write_all(line.as_bytes()).await {
            debug!("connection write failed: {err}");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Forward broadcast events to one connection while it is subscribed and the
/// message passes its subscription rule.
async fn forward_loop(
    mut events: broadcast::Receiver<Message>,
    subscribed: Arc<AtomicBool>,
    rule: Arc<RwLock<Option<Rule>>>,
    outgoing: mpsc::UnboundedSender<String>,
) {
    loop {
        match events.recv().await {
            Ok(mut message) => {
                if !subscribed.load(Ordering::SeqCst) {
                    continue;
                }
                {
                    let guard = rule.read().unwrap_or_else(|e| e.into_inner());
                    if let Some(rule) = guard.as_ref() {
                        if !rule.matches(&message.context()) {
                            continue;
                        }
                        if let Some(payload) = message.payload.take() {
                            message.payload = Some(rule.project(payload));
                        }
                    }
                }
                let Ok(line) = encode_push(&message) else {
                    continue;
                };
                if outgoing.send(line).is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("connection lagged, dropped {skipped} messages");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
