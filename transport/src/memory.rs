//! In-process transport dispatching straight into a [`CommandRegistry`].
//!
//! Defines request/response and streaming correctness without exercising any
//! I/O: `send` executes the command synchronously, `send_async` executes it
//! and queues the result the way a remote server would push it, and tests or
//! embedders inject pushes with [`MemoryTransport::push_message`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::sync::mpsc;

use remsh_core::CommandRegistry;
use remsh_core::Context;
use remsh_protocol::CommandResult;
use remsh_protocol::Message;
use remsh_protocol::ParsedCommand;

use crate::MessageCallback;
use crate::StreamingTransport;
use crate::Transport;
use crate::TransportError;

pub struct MemoryTransport {
    registry: Arc<CommandRegistry>,
    context: Arc<dyn Context>,
    connected: AtomicBool,
    streaming: AtomicBool,
    push_tx: mpsc::UnboundedSender<Message>,
    push_rx: Mutex<mpsc::UnboundedReceiver<Message>>,
    callback: std::sync::Mutex<Option<MessageCallback>>,
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .field("streaming", &self.streaming.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MemoryTransport {
    pub fn new(registry: Arc<CommandRegistry>, context: Arc<dyn Context>) -> Self {
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        Self {
            registry,
            context,
            connected: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
            push_tx,
            push_rx: Mutex::new(push_rx),
            callback: std::sync::Mutex::new(None),
        }
    }

    /// Queue a message for the next `receive` call, as a server push would.
    pub fn push_message(&self, message: Message) {
        let _ = self.push_tx.send(message);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.streaming.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, command: &ParsedCommand) -> CommandResult {
        if !self.is_connected() {
            return CommandResult::failure("Not connected");
        }
        self.registry.execute(command, self.context.as_ref())
    }

    async fn ping(&self) -> bool {
        self.is_connected()
    }

    fn info(&self) -> BTreeMap<String, Value> {
        let mut info = BTreeMap::new();
        info.insert("type".to_string(), json!("memory"));
        info.insert("commands".to_string(), json!(self.registry.count()));
        info.insert("connected".to_string(), json!(self.is_connected()));
        info
    }

    fn endpoint(&self) -> String {
        "memory://local".to_string()
    }
}

#[async_trait]
impl StreamingTransport for MemoryTransport {
    async fn send_async(&self, command: &ParsedCommand) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let result = self.registry.execute(command, self.context.as_ref());
        // Mirror a remote server: the result comes back through the push
        // path, shaped like any other message.
        let value = serde_json::to_value(&result).map_err(remsh_protocol::ProtocolError::from)?;
        self.push_message(Message::from_value(value));
        Ok(())
    }

    async fn receive(&self, timeout: Option<Duration>) -> Result<Option<Message>, TransportError> {
        let mut rx = self.push_rx.lock().await;
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx.recv()).await {
                Ok(Some(message)) => Ok(Some(message)),
                Ok(None) => Err(TransportError::Closed),
                Err(_) => Ok(None),
            },
            None => rx.recv().await.map(Some).ok_or(TransportError::Closed),
        }
    }

    async fn start_streaming(&self) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.streaming.store(true, Ordering::SeqCst);
        self.push_message(Message::system("Subscribed"));
        Ok(())
    }

    async fn stop_streaming(&self) -> Result<(), TransportError> {
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
    use pretty_assertions::assert_eq;
    use remsh_core::CommandHandler;
    use remsh_core::EmptyContext;

    struct PingHandler;

    impl CommandHandler for PingHandler {
        fn name(&self) -> &str {
            "ping"
        }

        fn handle(
            &self,
            _command: &ParsedCommand,
            _context: &dyn Context,
        ) -> anyhow::Result<CommandResult> {
            Ok(CommandResult::with_message("pong"))
        }
    }

    fn transport() -> MemoryTransport {
        let registry = Arc::new(CommandRegistry::new());
        registry.register(Arc::new(PingHandler));
        MemoryTransport::new(registry, Arc::new(EmptyContext::new()))
    }

    #[tokio::test]
    async fn dispatches_into_the_registry() {
        let transport = transport();
        transport.connect().await.expect("connect");
        let result = transport.send(&ParsedCommand::new("ping")).await;
        assert!(result.success);
        assert_eq!(result.message.as_deref(), Some("pong"));
    }

    #[tokio::test]
    async fn disconnected_send_fails() {
        let transport = transport();
        let result = transport.send(&ParsedCommand::new("ping")).await;
        assert!(!result.success);
        transport.connect().await.expect("connect");
        transport.disconnect().await;
        transport.disconnect().await;
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn send_async_results_arrive_as_pushes() {
        let transport = transport();
        transport.connect().await.expect("connect");
        transport
            .send_async(&ParsedCommand::new("ping"))
            .await
            .expect("send_async");
        let message = transport
            .receive(Some(Duration::from_millis(100)))
            .await
            .expect("receive")
            .expect("message");
        assert_eq!(message.metadata.get("message"), Some(&json!("pong")));
    }

    #[tokio::test]
    async fn receive_timeout_returns_none() {
        let transport = transport();
        transport.connect().await.expect("connect");
        let received = transport
            .receive(Some(Duration::from_millis(10)))
            .await
            .expect("receive");
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn registered_callback_sees_dispatched_messages() {
        let transport = transport();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        transport.on_message(Box::new(move |message: &Message| {
            sink.lock().expect("lock").push(message.kind.clone());
        }));
        transport.dispatch_message(&Message::system("hello"));
        transport.dispatch_message(&Message::error("oops"));
        assert_eq!(*seen.lock().expect("lock"), vec!["system", "error"]);
    }

    #[tokio::test]
    async fn subscribe_emits_confirmation() {
        let transport = transport();
        transport.connect().await.expect("connect");
        transport.start_streaming().await.expect("subscribe");
        assert!(transport.is_streaming());
        let message = transport
            .receive(Some(Duration::from_millis(100)))
            .await
            .expect("receive")
            .expect("message");
        assert_eq!(message.kind, "system");
        assert_eq!(message.payload_text(), "Subscribed");
    }
}
