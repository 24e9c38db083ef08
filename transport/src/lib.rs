//! Transport contract and implementations.
//!
//! A [`Transport`] speaks request/response over newline-delimited JSON; a
//! [`StreamingTransport`] adds a write-only send, a framed receive and the
//! subscribe/unsubscribe handshake. Implementations take `&self` and use
//! interior mutability so a shell can drive `send_async` and `receive`
//! concurrently from separate tasks.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use remsh_protocol::CommandResult;
use remsh_protocol::Message;
use remsh_protocol::ParsedCommand;

mod error;
mod http;
mod memory;
pub mod pool;
mod unix;

pub use error::TransportError;
pub use http::HttpConfig;
pub use http::HttpTransport;
pub use memory::MemoryTransport;
pub use pool::ConnectionPool;
pub use pool::PoolConfig;
pub use pool::PoolError;
pub use unix::UnixTransport;

/// Observer invoked by [`StreamingTransport::dispatch_message`].
pub type MessageCallback = Box<dyn Fn(&Message) + Send + Sync>;

/// Request/response messaging to one endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the connection and drain any server welcome.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Close the connection. Idempotent; never fails.
    async fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Write one request and read one response. I/O failures come back as
    /// failure results, never as errors; end-of-stream and broken pipes mark
    /// the transport disconnected.
    async fn send(&self, command: &ParsedCommand) -> CommandResult;

    /// Best-effort liveness probe; false on any failure.
    async fn ping(&self) -> bool;

    fn info(&self) -> BTreeMap<String, Value>;

    fn endpoint(&self) -> String;
}

/// Adds server-push on top of [`Transport`].
#[async_trait]
pub trait StreamingTransport: Transport {
    /// Write one request without consuming a response. Unlike `send`, a
    /// failure here is an error the caller must handle.
    async fn send_async(&self, command: &ParsedCommand) -> Result<(), TransportError>;

    /// Read one framed message. `Ok(None)` on timeout; `None` timeout means
    /// no deadline. A malformed frame yields an error-typed message rather
    /// than an error.
    async fn receive(&self, timeout: Option<Duration>) -> Result<Option<Message>, TransportError>;

    /// Send the subscribe frame and mark the transport streaming.
    async fn start_streaming(&self) -> Result<(), TransportError>;

    /// Send the unsubscribe frame and clear the streaming flag.
    async fn stop_streaming(&self) -> Result<(), TransportError>;

    /// Register the single observer callback; replaces any previous one.
    fn on_message(&self, callback: MessageCallback);

    /// Invoke the registered callback, if any, with one received message.
    fn dispatch_message(&self, message: &Message);

    fn is_streaming(&self) -> bool;

    fn supports_streaming(&self) -> bool {
        true
    }
}
