//! Device client boundary.
//!
//! The rotation core talks to devices only through these traits. Calls
//! are blocking; one session serves one device for one pass and is closed
//! before the next device is contacted.

use crate::error::DeviceResult;
use serde_json::Value;

/// Opens sessions to devices by address.
pub trait DeviceConnector: Send + Sync {
    type Session: DeviceSession;

    /// Connect and authenticate to `address`
    fn connect(&self, address: &str) -> DeviceResult<Self::Session>;
}

/// One open session to one device.
pub trait DeviceSession {
    /// Run an operational command and return its structured output
    fn query(&mut self, command: &str) -> DeviceResult<StructuredReply>;

    /// Validate `statements` against the device without committing them.
    fn commit_check(&mut self, statements: &[String]) -> DeviceResult<()>;

    /// Load `statements` into the candidate configuration and, if
    /// `commit` is set, commit them durably.
    fn apply_config(
        &mut self,
        statements: &[String],
        action: LoadAction,
        commit: bool,
    ) -> DeviceResult<()>;

    /// Revert the most recent commit.
    fn revert_last(&mut self) -> DeviceResult<()>;

    /// Release the session.
    fn close(self) -> DeviceResult<()>
    where
        Self: Sized;
}

/// How loaded statements combine with the candidate configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadAction {
    /// `set`/`delete` statements, merged into the candidate
    Set,
    /// Hierarchical text merged into the candidate
    Merge,
    /// Hierarchical text replacing matching stanzas
    Replace,
}

impl LoadAction {
    /// Value of the NETCONF `load-configuration action` attribute
    pub fn as_str(self) -> &'static str {
        match self {
            LoadAction::Set => "set",
            LoadAction::Merge => "merge",
            LoadAction::Replace => "replace",
        }
    }
}

/// Structured operational output of a device.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredReply(Value);

impl StructuredReply {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn from_json_str(json: &str) -> DeviceResult<Self> {
        Ok(Self(serde_json::from_str(json)?))
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    /// First value stored under `key` anywhere in the reply, depth first.
    pub fn find_first(&self, key: &str) -> Option<&Value> {
        find_first(&self.0, key)
    }

    /// Every value stored under `key` anywhere in the reply.
    pub fn find_all(&self, key: &str) -> Vec<&Value> {
        let mut found = Vec::new();
        collect_all(&self.0, key, &mut found);
        found
    }
}

pub(crate) fn find_first<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => {
            if let Some(hit) = map.get(key) {
                return Some(hit);
            }
            map.values().find_map(|child| find_first(child, key))
        }
        Value::Array(items) => items.iter().find_map(|child| find_first(child, key)),
        _ => None,
    }
}

fn collect_all<'a>(value: &'a Value, key: &str, found: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            for (name, child) in map {
                if name == key {
                    found.push(child);
                } else {
                    collect_all(child, key, found);
                }
            }
        }
        Value::Array(items) => {
            for child in items {
                collect_all(child, key, found);
            }
        }
        _ => {}
    }
}
