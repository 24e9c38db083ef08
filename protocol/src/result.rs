use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Outcome of executing one command; also the server-to-client wire payload.
///
/// Invariant: `success == false` implies `error` is `Some` and non-empty.
/// The constructors below maintain it; deserialized results are repaired in
/// [`CommandResult::normalized`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl CommandResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            message: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::ok()
        }
    }

    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::ok()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        let error = if error.is_empty() {
            "unknown error".to_string()
        } else {
            error
        };
        Self {
            success: false,
            data: None,
            error: Some(error),
            message: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Repair a result read off the wire so the failure invariant holds even
    /// when the peer sent `success:false` without an error string.
    pub fn normalized(mut self) -> Self {
        if !self.success {
            match &self.error {
                Some(e) if !e.is_empty() => {}
                _ => self.error = Some("unknown error".to_string()),
            }
        }
        self
    }
}
