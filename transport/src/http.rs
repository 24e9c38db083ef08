//! HTTP transport: the request object is POSTed as JSON to the execute path
//! and the response body is parsed as the result object.
//!
//! For execute, the body is authoritative regardless of status; a non-2xx
//! status only shows up in the failure message when the body is not valid
//! JSON. Ping and health consult the status code alone. Server push is not
//! possible over this transport, so it implements [`Transport`] only.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;
use tracing::debug;

use remsh_protocol::CommandResult;
use remsh_protocol::ParsedCommand;
use remsh_protocol::Request;

use crate::Transport;
use crate::TransportError;

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub base_url: String,
    pub execute_path: String,
    pub ping_path: String,
    pub health_path: String,
}

impl HttpConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            execute_path: "/execute".to_string(),
            ping_path: "/ping".to_string(),
            health_path: "/health".to_string(),
        }
    }
}

pub struct HttpTransport {
    config: HttpConfig,
    client: reqwest::Client,
    connected: AtomicBool,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            connected: AtomicBool::new(false),
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}{path}",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let url = self.url(&self.config.health_path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| TransportError::Connect(format!("{url}: {err}")))?;
        if !response.status().is_success() {
            return Err(TransportError::Connect(format!(
                "{url}: health check returned {}",
                response.status()
            )));
        }
        self.connected.store(true, Ordering::SeqCst);
        debug!(url = %self.config.base_url, "connected");
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, command: &ParsedCommand) -> CommandResult {
        if !self.is_connected() {
            return CommandResult::failure("Not connected");
        }
        let response = self
            .client
            .post(self.url(&self.config.execute_path))
            .json(&Request::command(command))
            .send()
            .await;
        let response = match response {
            Ok(response) => response,
            Err(err) => return CommandResult::failure(format!("Connection failed: {err}")),
        };
        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => return CommandResult::failure(format!("Connection failed: {err}")),
        };
        match serde_json::from_str::<CommandResult>(&body) {
            Ok(result) => result.normalized(),
            Err(_) if !status.is_success() => {
                CommandResult::failure(format!("HTTP {status}: Invalid JSON response"))
            }
            Err(_) => CommandResult::failure("Invalid JSON response"),
        }
    }

    async fn ping(&self) -> bool {
        let url = self.url(&self.config.ping_path);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn info(&self) -> BTreeMap<String, Value> {
        let mut info = BTreeMap::new();
        info.insert("type".to_string(), json!("http"));
        info.insert("url".to_string(), json!(self.config.base_url));
        info.insert(
            "execute_path".to_string(),
            json!(self.config.execute_path),
        );
        info.insert("connected".to_string(), json!(self.is_connected()));
        info
    }

    fn endpoint(&self) -> String {
        self.config.base_url.clone()
    }
}
