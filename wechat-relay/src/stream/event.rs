//! Gotify stream frames.

use std::collections::HashMap;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

/// Title used when an event arrives without one.
pub const DEFAULT_TITLE: &str = "Gotify Notification";

/// Body used when an event arrives without one.
pub const EMPTY_BODY: &str = "(empty message)";

/// Extras key marking messages the relay posted itself.
pub const RELAY_NOTICE_EXTRA: &str = "wechat_relay::notice";

/// A message pushed by Gotify over `/stream`.
///
/// Missing fields and explicit `null`s both decode to the field's default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GotifyMessage {
    #[serde(deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub appid: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(deserialize_with = "null_as_default")]
    pub priority: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub date: String,
    #[serde(deserialize_with = "null_as_default")]
    pub extras: HashMap<String, serde_json::Value>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl GotifyMessage {
    /// Decode a text frame. Anything that is not a JSON object is an error.
    pub fn decode(frame: &str) -> serde_json::Result<Self> {
        let value: serde_json::Value = serde_json::from_str(frame)?;
        if !value.is_object() {
            return Err(de::Error::custom("expected a JSON object"));
        }
        serde_json::from_value(value)
    }

    /// Whether the relay itself posted this message as a notice.
    pub fn is_relay_notice(&self) -> bool {
        self.extras.contains_key(RELAY_NOTICE_EXTRA)
    }

    /// Title to push, with the placeholder for an empty title.
    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            DEFAULT_TITLE
        } else {
            &self.title
        }
    }

    /// Body to push, with the placeholder for an empty body.
    pub fn display_body(&self) -> &str {
        if self.message.is_empty() {
            EMPTY_BODY
        } else {
            &self.message
        }
    }
}
