//! NETCONF 1.0 session over any byte stream.
//!
//! Messages are framed with the `]]>]]>` end-of-message marker (RFC 4742).
//! The session speaks the Junos dialect: operational commands are sent as
//! `<command format="json">` and configuration goes through the locked
//! candidate datastore.
//!
//! Reply classification lives here, but deciding which unexpected
//! replies are acceptable does not: a commit answered with a bare `<ok/>`
//! surfaces as [`DeviceError::UnexpectedEnvelope`] and the caller chooses
//! what it means.

use crate::client::{DeviceSession, LoadAction, StructuredReply};
use crate::error::{DeviceError, DeviceResult};
use std::io::{ErrorKind, Read, Write};

/// End-of-message marker
pub const DELIMITER: &str = "]]>]]>";

/// Upper bound on a single reply
const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

const READ_CHUNK: usize = 8192;

const CLIENT_HELLO: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8"?>"#,
    r#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">"#,
    "<capabilities>",
    "<capability>urn:ietf:params:netconf:base:1.0</capability>",
    "</capabilities>",
    "</hello>"
);

/// RPC bodies.
pub mod ops {
    use super::xml_escape;
    use crate::client::LoadAction;

    pub const LOCK_CANDIDATE: &str = "<lock><target><candidate/></target></lock>";
    pub const UNLOCK_CANDIDATE: &str = "<unlock><target><candidate/></target></unlock>";
    pub const DISCARD_CHANGES: &str = "<discard-changes/>";
    pub const COMMIT: &str = "<commit-configuration/>";
    pub const COMMIT_CHECK: &str = "<commit-configuration><check/></commit-configuration>";
    pub const CLOSE_SESSION: &str = "<close-session/>";

    pub fn command(command: &str) -> String {
        format!(r#"<command format="json">{}</command>"#, xml_escape(command))
    }

    pub fn load_text(statements: &[String], action: LoadAction) -> String {
        let element = match action {
            LoadAction::Set => "configuration-set",
            LoadAction::Merge | LoadAction::Replace => "configuration-text",
        };
        let body = statements
            .iter()
            .map(|line| xml_escape(line))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            r#"<load-configuration action="{}" format="text"><{element}>{body}</{element}></load-configuration>"#,
            action.as_str()
        )
    }

    pub fn rollback(index: u32) -> String {
        format!(r#"<load-configuration rollback="{index}"/>"#)
    }
}

/// Byte stream carrying a NETCONF session.
pub trait NetconfTransport: Read + Write {
    /// Tear down the underlying channel after `<close-session/>`.
    fn shutdown(&mut self) -> DeviceResult<()> {
        Ok(())
    }
}

/// Accumulates stream bytes and splits them into framed messages.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read until one complete message is buffered and return it without
    /// the delimiter. Bytes after the delimiter stay buffered.
    pub fn read_message<R: Read>(&mut self, reader: &mut R) -> DeviceResult<String> {
        let marker = DELIMITER.as_bytes();
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some(end) = find_subslice(&self.pending, marker) {
                let message: Vec<u8> = self.pending.drain(..end).collect();
                self.pending.drain(..marker.len());
                return String::from_utf8(message)
                    .map_err(|e| DeviceError::Framing(format!("reply is not UTF-8: {e}")));
            }

            if self.pending.len() > MAX_MESSAGE_BYTES {
                return Err(DeviceError::Framing(format!(
                    "reply exceeds {MAX_MESSAGE_BYTES} bytes without delimiter"
                )));
            }

            let read = match reader.read(&mut chunk) {
                Ok(read) => read,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Err(DeviceError::Timeout(e.to_string()));
                }
                Err(e) => return Err(DeviceError::Io(e)),
            };
            if read == 0 {
                return Err(DeviceError::Framing(
                    "channel closed before end of message".to_string(),
                ));
            }
            self.pending.extend_from_slice(&chunk[..read]);
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// `<rpc>` envelope for one request.
pub fn rpc_envelope(message_id: u64, body: &str) -> String {
    format!(r#"<rpc message-id="{message_id}">{body}</rpc>{DELIMITER}"#)
}

/// Fail with the first `<rpc-error>` of severity `error`. Warnings pass.
pub fn check_rpc_errors(reply: &str) -> DeviceResult<()> {
    for block in element_blocks(reply, "rpc-error") {
        let severity = element_text(block, "error-severity");
        if severity.as_deref().is_some_and(|s| s.trim() != "error") {
            tracing::debug!(severity = ?severity, "ignoring non-fatal rpc-error");
            continue;
        }
        let message = element_text(block, "error-message")
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| "unspecified rpc-error".to_string());
        return Err(DeviceError::Rpc { message });
    }
    Ok(())
}

/// Require an `<ok/>` acknowledgement.
pub fn expect_ok(reply: &str) -> DeviceResult<()> {
    check_rpc_errors(reply)?;
    if contains_element(reply, "ok") {
        Ok(())
    } else {
        Err(unexpected(reply, "ok"))
    }
}

/// Require `<commit-results>`; a bare `<ok/>` is reported as an envelope
/// mismatch.
pub fn expect_commit_results(reply: &str) -> DeviceResult<()> {
    check_rpc_errors(reply)?;
    if contains_element(reply, "commit-results") {
        Ok(())
    } else {
        Err(unexpected(reply, "commit-results"))
    }
}

fn unexpected(reply: &str, expected: &str) -> DeviceError {
    let found = local_names(reply)
        .find(|name| *name != "rpc-reply")
        .unwrap_or("nothing")
        .to_string();
    DeviceError::UnexpectedEnvelope {
        expected: expected.to_string(),
        found,
    }
}

/// Text content of the `<rpc-reply>` element, unescaped.
pub fn reply_body(reply: &str) -> DeviceResult<String> {
    let open = reply
        .find("<rpc-reply")
        .ok_or_else(|| DeviceError::Framing("missing <rpc-reply>".to_string()))?;
    let start = reply[open..]
        .find('>')
        .map(|offset| open + offset + 1)
        .ok_or_else(|| DeviceError::Framing("unterminated <rpc-reply>".to_string()))?;
    let end = reply
        .rfind("</rpc-reply>")
        .filter(|end| *end >= start)
        .ok_or_else(|| DeviceError::Framing("missing </rpc-reply>".to_string()))?;
    Ok(xml_unescape(reply[start..end].trim()))
}

/// Local names of every start or empty-element tag, in order.
fn local_names(xml: &str) -> impl Iterator<Item = &str> {
    xml.split('<').skip(1).filter_map(|fragment| {
        if fragment.starts_with(['/', '?', '!']) {
            return None;
        }
        let end = fragment
            .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
            .unwrap_or(fragment.len());
        let name = &fragment[..end];
        let local = name.rsplit(':').next().unwrap_or(name);
        (!local.is_empty()).then_some(local)
    })
}

fn contains_element(xml: &str, name: &str) -> bool {
    local_names(xml).any(|local| local == name)
}

/// Inner contents of every `<name ...>...</name>` block.
fn element_blocks<'a>(xml: &'a str, name: &str) -> Vec<&'a str> {
    let open = format!("<{name}");
    let close = format!("</{name}>");
    let mut blocks = Vec::new();
    let mut rest = xml;

    while let Some(position) = rest.find(&open) {
        let after = &rest[position + open.len()..];
        // skip longer names sharing the prefix, e.g. <rpc-error-info>
        if !after.starts_with(|c: char| c == '>' || c == '/' || c.is_whitespace()) {
            rest = after;
            continue;
        }
        let Some(tag_end) = after.find('>') else { break };
        if after[..tag_end].ends_with('/') {
            blocks.push("");
            rest = &after[tag_end + 1..];
            continue;
        }
        let body = &after[tag_end + 1..];
        match body.find(&close) {
            Some(end) => {
                blocks.push(&body[..end]);
                rest = &body[end + close.len()..];
            }
            None => {
                blocks.push(body);
                break;
            }
        }
    }
    blocks
}

fn element_text(xml: &str, name: &str) -> Option<String> {
    element_blocks(xml, name).first().map(|text| xml_unescape(text))
}

pub(crate) fn xml_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn xml_unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// NETCONF session bound to one device.
pub struct NetconfSession<T: NetconfTransport> {
    address: String,
    transport: T,
    frames: FrameBuffer,
    message_id: u64,
    closed: bool,
}

impl<T: NetconfTransport> NetconfSession<T> {
    /// Exchange hellos over a freshly opened transport.
    pub fn establish(address: impl Into<String>, mut transport: T) -> DeviceResult<Self> {
        let address = address.into();
        let mut frames = FrameBuffer::new();

        let server_hello = frames.read_message(&mut transport)?;
        if !contains_element(&server_hello, "hello") {
            return Err(DeviceError::Framing(format!(
                "{address} did not send a NETCONF hello"
            )));
        }
        transport.write_all(CLIENT_HELLO.as_bytes())?;
        transport.write_all(DELIMITER.as_bytes())?;
        transport.flush()?;

        tracing::debug!(device = %address, "netconf session established");

        Ok(Self {
            address,
            transport,
            frames,
            message_id: 0,
            closed: false,
        })
    }

    /// Send one RPC and return the raw reply; `<rpc-error>`s become errors.
    pub fn rpc(&mut self, body: &str) -> DeviceResult<String> {
        self.message_id += 1;
        let request = rpc_envelope(self.message_id, body);
        self.transport.write_all(request.as_bytes())?;
        self.transport.flush()?;

        let reply = self.frames.read_message(&mut self.transport)?;
        check_rpc_errors(&reply)?;
        Ok(reply)
    }

    /// Run `operation` with the candidate datastore locked. Pending changes
    /// are discarded when `operation` fails or when `discard` is set; the
    /// lock is always released.
    fn with_candidate<R>(
        &mut self,
        discard: bool,
        operation: impl FnOnce(&mut Self) -> DeviceResult<R>,
    ) -> DeviceResult<R> {
        let reply = self.rpc(ops::LOCK_CANDIDATE)?;
        expect_ok(&reply)?;

        let result = operation(self);

        if discard || result.is_err() {
            if let Err(e) = self.rpc(ops::DISCARD_CHANGES) {
                tracing::warn!(device = %self.address, error = %e, "discard-changes failed");
            }
        }
        if let Err(e) = self.rpc(ops::UNLOCK_CANDIDATE) {
            tracing::warn!(device = %self.address, error = %e, "candidate unlock failed");
        }

        result
    }

    fn load(&mut self, statements: &[String], action: LoadAction) -> DeviceResult<()> {
        let reply = self.rpc(&ops::load_text(statements, action))?;
        expect_ok(&reply)
    }

    fn shutdown(&mut self) -> DeviceResult<()> {
        self.closed = true;
        let farewell = self.rpc(ops::CLOSE_SESSION);
        let teardown = self.transport.shutdown();
        farewell.and(teardown)
    }
}

impl<T: NetconfTransport> DeviceSession for NetconfSession<T> {
    fn query(&mut self, command: &str) -> DeviceResult<StructuredReply> {
        let reply = self.rpc(&ops::command(command))?;
        StructuredReply::from_json_str(&reply_body(&reply)?)
    }

    fn commit_check(&mut self, statements: &[String]) -> DeviceResult<()> {
        self.with_candidate(true, |session| {
            session.load(statements, LoadAction::Set)?;
            let reply = session.rpc(ops::COMMIT_CHECK)?;
            expect_commit_results(&reply)
        })
    }

    fn apply_config(
        &mut self,
        statements: &[String],
        action: LoadAction,
        commit: bool,
    ) -> DeviceResult<()> {
        self.with_candidate(false, |session| {
            session.load(statements, action)?;
            if commit {
                let reply = session.rpc(ops::COMMIT)?;
                expect_commit_results(&reply)?;
            }
            Ok(())
        })
    }

    fn revert_last(&mut self) -> DeviceResult<()> {
        self.with_candidate(false, |session| {
            let reply = session.rpc(&ops::rollback(1))?;
            expect_ok(&reply)?;
            let reply = session.rpc(ops::COMMIT)?;
            expect_commit_results(&reply)
        })
    }

    fn close(mut self) -> DeviceResult<()> {
        self.shutdown()
    }
}

impl<T: NetconfTransport> Drop for NetconfSession<T> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.shutdown() {
                tracing::debug!(device = %self.address, error = %e, "session close on drop failed");
            }
        }
    }
}
