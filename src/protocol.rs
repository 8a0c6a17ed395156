//! Version-specific protocol behavior.
//!
//! The negotiated [`Version`] is chosen once the broker answers CONNECT and
//! then decides how header text is escaped, how ACK/NACK frames are shaped
//! and whether heartbeats exist at all.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, StompError};
use crate::frame::{Command, Frame};
use crate::headers::Headers;

/// STOMP protocol versions understood by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    V1_0,
    V1_1,
    V1_2,
}

impl Version {
    pub const ALL: [Version; 3] = [Version::V1_0, Version::V1_1, Version::V1_2];

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::V1_0 => "1.0",
            Version::V1_1 => "1.1",
            Version::V1_2 => "1.2",
        }
    }

    /// Heartbeats were introduced in 1.1; a 1.0 session is alive iff connected.
    pub fn supports_heartbeats(&self) -> bool {
        *self >= Version::V1_1
    }

    /// 1.2 exempts CONNECT and CONNECTED from escaping.
    fn escapes(&self, command: Option<Command>) -> bool {
        !(*self == Version::V1_2
            && matches!(command, Some(Command::Connect) | Some(Command::Connected)))
    }

    /// Prepare header text for the wire.
    ///
    /// 1.0 has no escape syntax, so `\n` and `:` are dropped outright.
    pub fn escape<'a>(&self, command: Option<Command>, text: &'a str) -> Cow<'a, str> {
        match self {
            Version::V1_0 => {
                if text.contains(['\n', ':']) {
                    Cow::Owned(text.chars().filter(|c| *c != '\n' && *c != ':').collect())
                } else {
                    Cow::Borrowed(text)
                }
            }
            _ if !self.escapes(command) => Cow::Borrowed(text),
            _ => {
                let specials: &[char] = if *self == Version::V1_2 {
                    &['\\', '\n', ':', '\r']
                } else {
                    &['\\', '\n', ':']
                };
                if !text.contains(specials) {
                    return Cow::Borrowed(text);
                }
                let mut escaped = String::with_capacity(text.len() + 8);
                for ch in text.chars() {
                    match ch {
                        '\\' => escaped.push_str("\\\\"),
                        '\n' => escaped.push_str("\\n"),
                        ':' => escaped.push_str("\\c"),
                        '\r' if *self == Version::V1_2 => escaped.push_str("\\r"),
                        _ => escaped.push(ch),
                    }
                }
                Cow::Owned(escaped)
            }
        }
    }

    /// Reverse [`Version::escape`] on raw header bytes read from the wire.
    pub fn unescape(&self, command: Option<Command>, raw: &[u8]) -> Result<Vec<u8>> {
        if *self == Version::V1_0 || !self.escapes(command) {
            return Ok(raw.to_vec());
        }
        let mut out = Vec::with_capacity(raw.len());
        let mut bytes = raw.iter();
        while let Some(&b) = bytes.next() {
            if b != b'\\' {
                out.push(b);
                continue;
            }
            match bytes.next() {
                Some(b'c') => out.push(b':'),
                Some(b'n') => out.push(b'\n'),
                Some(b'\\') => out.push(b'\\'),
                Some(b'r') if *self == Version::V1_2 => out.push(b'\r'),
                Some(&other) => {
                    return Err(StompError::InvalidHeaderEscape(format!(
                        "unknown sequence \\{} in {:?}",
                        other as char,
                        String::from_utf8_lossy(raw)
                    )));
                }
                None => {
                    return Err(StompError::InvalidHeaderEscape(format!(
                        "incomplete escape at end of {:?}",
                        String::from_utf8_lossy(raw)
                    )));
                }
            }
        }
        Ok(out)
    }

    /// Build an ACK frame for `target`.
    pub fn ack_frame(
        &self,
        target: AckTarget<'_>,
        subscription: Option<&str>,
        headers: Headers,
    ) -> Result<Frame> {
        self.acknowledgement(Command::Ack, target, subscription, headers)
    }

    /// Build a NACK frame for `target`. 1.0 has no NACK.
    pub fn nack_frame(
        &self,
        target: AckTarget<'_>,
        subscription: Option<&str>,
        headers: Headers,
    ) -> Result<Frame> {
        if *self == Version::V1_0 {
            return Err(StompError::UnsupportedCommand {
                command: Command::Nack.to_string(),
                version: self.to_string(),
            });
        }
        self.acknowledgement(Command::Nack, target, subscription, headers)
    }

    fn acknowledgement(
        &self,
        command: Command,
        target: AckTarget<'_>,
        subscription: Option<&str>,
        headers: Headers,
    ) -> Result<Frame> {
        let subscription = subscription
            .map(str::to_string)
            .or_else(|| target.header("subscription").map(str::to_string));

        let mut frame = Frame::new(command).with_headers(headers);
        match self {
            Version::V1_0 | Version::V1_1 => {
                let message_id = target.id_from("message-id").ok_or_else(|| {
                    StompError::Argument("message-id could not be determined".into())
                })?;
                frame.headers.set("message-id", message_id);
                match subscription {
                    Some(sub) => frame.headers.set("subscription", sub),
                    None if *self == Version::V1_1 => {
                        return Err(StompError::Argument(
                            "subscription id could not be determined".into(),
                        ));
                    }
                    None => {}
                }
            }
            Version::V1_2 => {
                let id = target
                    .id_from("ack")
                    .or_else(|| target.id_from("message-id"))
                    .ok_or_else(|| {
                        StompError::Argument("ack id could not be determined".into())
                    })?;
                frame.headers.set("id", id);
                if let Some(sub) = subscription {
                    frame.headers.set("subscription", sub);
                }
            }
        }
        Ok(frame)
    }

    /// The frame that satisfies the client's heartbeat obligation, if the
    /// version has heartbeats.
    pub fn beat_frame(&self) -> Option<Frame> {
        self.supports_heartbeats().then(Frame::heartbeat)
    }
}

impl FromStr for Version {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "1.0" => Ok(Version::V1_0),
            "1.1" => Ok(Version::V1_1),
            "1.2" => Ok(Version::V1_2),
            other => Err(StompError::UnsupportedProtocolVersion(other.to_string())),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render an `accept-version` header value.
pub fn accept_version_header(versions: &[Version]) -> String {
    versions
        .iter()
        .map(Version::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// The message an ACK or NACK refers to: a received MESSAGE frame, or a bare
/// id when the caller kept only that.
#[derive(Debug, Clone, Copy)]
pub enum AckTarget<'a> {
    Message(&'a Frame),
    Id(&'a str),
}

impl<'a> AckTarget<'a> {
    fn header(&self, name: &str) -> Option<&'a str> {
        match self {
            AckTarget::Message(frame) => frame.get_header(name),
            AckTarget::Id(_) => None,
        }
    }

    fn id_from(&self, header: &str) -> Option<&'a str> {
        match self {
            AckTarget::Message(frame) => frame.get_header(header),
            AckTarget::Id(id) => Some(id),
        }
    }
}

impl<'a> From<&'a Frame> for AckTarget<'a> {
    fn from(frame: &'a Frame) -> Self {
        AckTarget::Message(frame)
    }
}

impl<'a> From<&'a str> for AckTarget<'a> {
    fn from(id: &'a str) -> Self {
        AckTarget::Id(id)
    }
}

impl<'a> From<&'a String> for AckTarget<'a> {
    fn from(id: &'a String) -> Self {
        AckTarget::Id(id.as_str())
    }
}

/// Parse the STOMP `heart-beat` header value (format: "cx,cy").
///
/// Returns a tuple `(cx, cy)` where each value is the heartbeat interval in
/// milliseconds. Missing or invalid fields default to `0`.
pub fn parse_heartbeat_header(header: &str) -> (u64, u64) {
    let mut parts = header.split(',');
    let cx = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let cy = parts
        .next()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0);
    (cx, cy)
}

/// Negotiate heartbeat intervals between client and broker.
///
/// - `client_out`/`client_in`: the client's `heart-beat` proposal.
/// - `server_out`/`server_in`: the broker's `heart-beat` answer.
///
/// Returns `(outgoing, incoming)`. A direction is disabled (`None`) when
/// either side proposed `0` for it; otherwise the larger of the two
/// proposals wins.
pub fn negotiate_heartbeats(
    client_out: u64,
    client_in: u64,
    server_out: u64,
    server_in: u64,
) -> (Option<Duration>, Option<Duration>) {
    let pair = |ours: u64, theirs: u64| {
        (ours != 0 && theirs != 0).then(|| Duration::from_millis(ours.max(theirs)))
    };
    (pair(client_out, server_in), pair(client_in, server_out))
}
