//! Space-delimited `field:glob` filter used client-side by the streaming
//! shell. Much simpler than the expression engine: `*` and `?` are the only
//! wildcards and unknown fields are skipped rather than failing.

use wildmatch::WildMatch;

use remsh_protocol::Message;

use crate::format::value_text;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobFilter {
    pairs: Vec<(String, String)>,
}

impl GlobFilter {
    /// Parse a filter like `type:data topic:sensor/*`. Tokens without a
    /// colon are ignored.
    pub fn parse(text: &str) -> Self {
        let pairs = text
            .split_whitespace()
            .filter_map(|token| {
                token
                    .split_once(':')
                    .filter(|(field, glob)| !field.is_empty() && !glob.is_empty())
                    .map(|(field, glob)| (field.to_string(), glob.to_string()))
            })
            .collect();
        Self { pairs }
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn describe(&self) -> String {
        self.pairs
            .iter()
            .map(|(field, glob)| format!("{field}:{glob}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Every resolvable pair must match. Pairs naming unknown fields, and
    /// pairs whose metadata key is absent, are skipped. An empty filter
    /// matches everything.
    pub fn matches(&self, message: &Message) -> bool {
        for (field, glob) in &self.pairs {
            let value = match field.as_str() {
                "type" => Some(message.kind.clone()),
                "source" => Some(message.source.clone()),
                "topic" | "channel" => message.metadata.get(field).map(value_text),
                _ => None,
            };
            let Some(value) = value else {
                continue;
            };
            if !WildMatch::new(glob).matches(&value) {
                return false;
            }
        }
        true
    }
}
