//! Rendering of server-pushed messages, distinct from the result formatter.

use chrono::Local;

use remsh_protocol::Message;

/// `[HH:MM:SS] [type] source: payload`; error-typed messages render as an
/// error line so they stand out in the stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageFormatter;

impl MessageFormatter {
    pub fn new() -> Self {
        Self
    }

    pub fn format(&self, message: &Message) -> String {
        let time = message.timestamp.with_timezone(&Local).format("%H:%M:%S");
        let payload = message.payload_text();
        if message.kind == "error" {
            return format!("[{time}] Error from {}: {payload}", message.source);
        }
        let mut line = format!("[{time}] [{}] {}: {payload}", message.kind, message.source);
        if let Some(topic) = message.metadata.get("topic") {
            if let Some(topic) = topic.as_str() {
                line.push_str(&format!(" (topic: {topic})"));
            }
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn data_message_shows_type_source_and_topic() {
        let mut metadata = BTreeMap::new();
        metadata.insert("topic".to_string(), json!("sensor/temp"));
        let message = Message::data(json!({"v": 1}), "hub", metadata);
        let line = MessageFormatter::new().format(&message);
        assert!(line.contains("[data] hub:"));
        assert!(line.contains("{\"v\":1}"));
        assert!(line.contains("(topic: sensor/temp)"));
    }

    #[test]
    fn error_message_renders_as_error_line() {
        let message = Message::error("bad frame");
        let line = MessageFormatter::new().format(&message);
        assert!(line.contains("Error from system: bad frame"));
    }
}
