use std::fmt;
use std::str::FromStr;

use crate::error::StompError;
use crate::headers::Headers;

/// STOMP command vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Begin,
    Commit,
    Abort,
    Ack,
    Nack,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    /// Commands that a transaction tags with its id.
    pub fn is_transactional(&self) -> bool {
        matches!(self, Command::Send | Command::Ack | Command::Nack)
    }
}

impl FromStr for Command {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let command = match s {
            "CONNECT" | "STOMP" => Command::Connect,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => {
                return Err(StompError::MalformedFrame(format!(
                    "unknown command {:?}",
                    other
                )));
            }
        };
        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame body bytes together with the charset they are meant to be read in.
///
/// `charset` is `None` for binary payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Body {
    bytes: Vec<u8>,
    charset: Option<String>,
}

impl Body {
    pub const DEFAULT_CHARSET: &'static str = "UTF-8";

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            bytes: text.into().into_bytes(),
            charset: Some(Self::DEFAULT_CHARSET.to_string()),
        }
    }

    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            charset: None,
        }
    }

    pub fn with_charset(bytes: impl Into<Vec<u8>>, charset: Option<String>) -> Self {
        Self {
            bytes: bytes.into(),
            charset,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    pub fn is_text(&self) -> bool {
        self.charset.is_some()
    }

    /// The body as a string when it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.bytes).ok()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::text(text)
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::text(text)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::binary(bytes)
    }
}

impl From<&[u8]> for Body {
    fn from(bytes: &[u8]) -> Self {
        Body::binary(bytes.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Body {
    fn from(bytes: &[u8; N]) -> Self {
        Body::binary(bytes.to_vec())
    }
}

/// A STOMP frame: optional command, ordered headers and optional body.
///
/// A frame without a command and without headers is a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// STOMP command; `None` for heartbeats
    pub command: Option<Command>,
    /// Ordered headers
    pub headers: Headers,
    /// Body, absent when the frame carries none
    pub body: Option<Body>,
}

impl Frame {
    /// Create a new frame with the given command and empty headers/body.
    pub fn new(command: Command) -> Self {
        Self {
            command: Some(command),
            headers: Headers::new(),
            body: None,
        }
    }

    /// A heartbeat: no command, no headers, no body.
    pub fn heartbeat() -> Self {
        Self {
            command: None,
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.command.is_none() && self.headers.is_empty()
    }

    /// Append a header (builder style). Repeating a name adds a value.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(key, value);
        self
    }

    /// Set a header, replacing previous values (builder style).
    pub fn set_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(key, value);
        self
    }

    /// Apply every header of `headers`, replacing values for names the
    /// frame already carries.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        for name in headers.names() {
            self.headers.delete(name);
            for value in headers.all(name) {
                self.headers.append(name, value.as_str());
            }
        }
        self
    }

    /// Set the frame body (builder style). Strings become UTF-8 text bodies,
    /// byte vectors become binary bodies.
    pub fn set_body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Request a RECEIPT for this frame.
    pub fn receipt(self, receipt_id: impl Into<String>) -> Self {
        self.set_header("receipt", receipt_id)
    }

    /// Principal value of a header (case-sensitive).
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// Body bytes, empty when there is no body.
    pub fn body_bytes(&self) -> &[u8] {
        self.body.as_ref().map(Body::bytes).unwrap_or(&[])
    }

    /// Body as UTF-8 text when present and valid.
    pub fn body_text(&self) -> Option<&str> {
        self.body.as_ref().and_then(Body::as_str)
    }

    pub fn is(&self, command: Command) -> bool {
        self.command == Some(command)
    }

    pub fn send(destination: &str, body: impl Into<Body>) -> Self {
        Frame::new(Command::Send)
            .header("destination", destination)
            .set_body(body)
    }

    pub fn subscribe(destination: &str) -> Self {
        Frame::new(Command::Subscribe).header("destination", destination)
    }

    pub fn unsubscribe() -> Self {
        Frame::new(Command::Unsubscribe)
    }

    pub fn begin(transaction: &str) -> Self {
        Frame::new(Command::Begin).header("transaction", transaction)
    }

    pub fn commit(transaction: &str) -> Self {
        Frame::new(Command::Commit).header("transaction", transaction)
    }

    pub fn abort(transaction: &str) -> Self {
        Frame::new(Command::Abort).header("transaction", transaction)
    }

    pub fn disconnect() -> Self {
        Frame::new(Command::Disconnect)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.command {
            Some(command) => writeln!(f, "Command: {}", command)?,
            None => writeln!(f, "Heartbeat")?,
        }
        write!(f, "{}", self.headers)?;
        writeln!(f, "Body ({} bytes)", self.body_bytes().len())
    }
}
