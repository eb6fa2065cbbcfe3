//! Extraction of key-chain and time-source fields from operational output.
//!
//! Replies use the Junos JSON encoding, where every leaf is an array of
//! objects carrying the text under `data`:
//!
//! ```json
//! { "hakr-keychain-information": [{ "hakr-keychain": [{
//!     "hakr-keychain-name": [{ "data": "macsec-core" }],
//!     "hakr-keychain-active-send-key": [{ "data": "5" }]
//! }] }] }
//! ```

use crate::client::{find_first, StructuredReply};
use serde::Serialize;
use serde_json::Value;

/// Operational command reporting key-chain state
pub const KEYCHAIN_COMMAND: &str = "show security keychain";

/// Operational command reporting the clock source
pub const UPTIME_COMMAND: &str = "show system uptime";

const KEYCHAIN_ENTRY: &str = "hakr-keychain";
const KEYCHAIN_NAME: &str = "hakr-keychain-name";
const ACTIVE_SEND_KEY: &str = "hakr-keychain-active-send-key";
const ACTIVE_RECEIVE_KEY: &str = "hakr-keychain-active-receive-key";
const NEXT_SEND_KEY: &str = "hakr-keychain-next-send-key";
const NEXT_RECEIVE_KEY: &str = "hakr-keychain-next-receive-key";
const NEXT_KEY_TIME: &str = "hakr-keychain-next-key-time";
const UPTIME_INFORMATION: &str = "system-uptime-information";
const TIME_SOURCE: &str = "time-source";

/// Raw key-chain fields as reported by one device.
///
/// `None` means the field was absent from the reply. Present fields keep
/// the device's text verbatim (trimmed), including the `None` sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeychainStatus {
    pub name: String,
    pub active_send_key: Option<String>,
    pub active_receive_key: Option<String>,
    pub next_send_key: Option<String>,
    pub next_receive_key: Option<String>,
    pub next_key_time: Option<String>,
}

impl KeychainStatus {
    /// Status of the key-chain called `keychain`, or `None` if the device
    /// does not report one with that name.
    pub fn from_reply(reply: &StructuredReply, keychain: &str) -> Option<Self> {
        reply
            .find_all(KEYCHAIN_ENTRY)
            .into_iter()
            .flat_map(entries)
            .find(|entry| leaf(entry, KEYCHAIN_NAME).as_deref() == Some(keychain))
            .map(|entry| Self {
                name: keychain.to_string(),
                active_send_key: leaf(entry, ACTIVE_SEND_KEY),
                active_receive_key: leaf(entry, ACTIVE_RECEIVE_KEY),
                next_send_key: leaf(entry, NEXT_SEND_KEY),
                next_receive_key: leaf(entry, NEXT_RECEIVE_KEY),
                next_key_time: leaf(entry, NEXT_KEY_TIME),
            })
    }
}

/// Clock source reported by `show system uptime`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeSource {
    pub label: String,
}

impl TimeSource {
    pub fn from_reply(reply: &StructuredReply) -> Option<Self> {
        let scope = reply.find_first(UPTIME_INFORMATION).unwrap_or(reply.value());
        find_first(scope, TIME_SOURCE)
            .and_then(leaf_text)
            .map(|label| Self { label })
    }

    /// Whether the clock is disciplined by NTP. The label match ignores
    /// case, so `ntp clock` counts as well as `NTP CLOCK`.
    pub fn is_ntp(&self) -> bool {
        self.label.to_ascii_uppercase().contains("NTP")
    }
}

/// Objects held by a Junos container, which may be a list or a single object.
fn entries(value: &Value) -> Vec<&serde_json::Map<String, Value>> {
    match value {
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        Value::Object(map) => vec![map],
        _ => Vec::new(),
    }
}

fn leaf(entry: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    entry.get(key).and_then(leaf_text)
}

/// Text of a leaf: `[{"data": "v"}]`, `{"data": "v"}` or a bare string.
/// An element without text yields an empty string.
fn leaf_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::Array(items) => items.first().and_then(leaf_text),
        Value::Object(map) => Some(
            map.get("data")
                .and_then(Value::as_str)
                .map(|text| text.trim().to_string())
                .unwrap_or_default(),
        ),
        _ => None,
    }
}
