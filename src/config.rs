use std::fmt;
use std::time::Duration;

use url::Url;

use crate::error::{Result, StompError};
use crate::frame::{Command, Frame};
use crate::protocol::{Version, accept_version_header};

/// Default STOMP port.
pub const DEFAULT_PORT: u16 = 61613;

/// Heartbeat proposal sent in the CONNECT `heart-beat` header.
///
/// `send_ms` is how often the client promises to send something,
/// `receive_ms` how often it wants to hear from the broker. `0` disables a
/// direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    pub send_ms: u64,
    pub receive_ms: u64,
}

impl Heartbeat {
    pub fn new(send_ms: u64, receive_ms: u64) -> Self {
        Self {
            send_ms,
            receive_ms,
        }
    }

    pub fn disabled() -> Self {
        Self::new(0, 0)
    }

    /// Same interval in both directions.
    pub fn from_duration(interval: Duration) -> Self {
        let ms = interval.as_millis() as u64;
        Self::new(ms, ms)
    }
}

impl fmt::Display for Heartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.send_ms, self.receive_ms)
    }
}

/// Everything needed to open a connection and build its CONNECT frame.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Network host to open the stream to
    pub host: String,
    pub port: u16,
    /// The URI asked for a secure stream; honored by the chosen `Connector`
    pub tls: bool,
    pub login: Option<String>,
    pub passcode: Option<String>,
    /// CONNECT `host` header; the network host when unset
    pub virtual_host: Option<String>,
    /// Versions offered in `accept-version`, lowest first
    pub accept_versions: Vec<Version>,
    pub heartbeat: Heartbeat,
    /// `client-id` header used by brokers for durable subscriptions
    pub client_id: Option<String>,
    /// Additional CONNECT headers
    pub headers: Vec<(String, String)>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            tls: false,
            login: None,
            passcode: None,
            virtual_host: None,
            accept_versions: Version::ALL.to_vec(),
            heartbeat: Heartbeat::disabled(),
            client_id: None,
            headers: Vec::new(),
        }
    }
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `stomp://[login[:passcode]@]host[:port]`.
    ///
    /// `stomp+ssl://` and `stomp+tls://` set [`ConnectOptions::tls`].
    pub fn from_uri(uri: &str) -> Result<Self> {
        let url = Url::parse(uri).map_err(|e| StompError::InvalidUri(format!("{}: {}", uri, e)))?;
        let tls = match url.scheme() {
            "stomp" | "tcp" => false,
            "stomp+ssl" | "stomp+tls" | "ssl" => true,
            other => {
                return Err(StompError::InvalidUri(format!(
                    "unsupported scheme '{}'",
                    other
                )));
            }
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| StompError::InvalidUri(format!("{}: missing host", uri)))?;

        let mut options = ConnectOptions::default().address(host, url.port().unwrap_or(DEFAULT_PORT));
        options.tls = tls;
        if !url.username().is_empty() {
            options.login = Some(percent_decode(url.username()));
            options.passcode = url.password().map(percent_decode);
        }
        Ok(options)
    }

    pub fn address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn credentials(mut self, login: impl Into<String>, passcode: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self.passcode = Some(passcode.into());
        self
    }

    pub fn virtual_host(mut self, host: impl Into<String>) -> Self {
        self.virtual_host = Some(host.into());
        self
    }

    pub fn accept_versions(mut self, versions: &[Version]) -> Self {
        let mut versions = versions.to_vec();
        versions.sort();
        versions.dedup();
        self.accept_versions = versions;
        self
    }

    pub fn heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Build the CONNECT frame for these options.
    pub fn connect_frame(&self) -> Frame {
        let mut frame = Frame::new(Command::Connect)
            .header("accept-version", accept_version_header(&self.accept_versions))
            .header("heart-beat", self.heartbeat.to_string())
            .header(
                "host",
                self.virtual_host.as_deref().unwrap_or(self.host.as_str()),
            );
        if let Some(login) = &self.login {
            frame = frame.header("login", login.as_str());
        }
        if let Some(passcode) = &self.passcode {
            frame = frame.header("passcode", passcode.as_str());
        }
        if let Some(client_id) = &self.client_id {
            frame = frame.header("client-id", client_id.as_str());
        }
        for (k, v) in &self.headers {
            frame.headers.set_if_absent(k.as_str(), v.as_str());
        }
        frame
    }
}

/// Reconnection policy for [`crate::ReliableConnection`].
///
/// The delay starts at `delay` and doubles after every failed attempt up to
/// `max_delay`. `max_retries` of `None` retries forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    pub max_delay: Duration,
    pub max_retries: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

impl ReconnectPolicy {
    /// A constant delay between attempts.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delay,
            max_delay: delay,
            max_retries: None,
        }
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Delay to sleep before attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.delay.saturating_mul(factor).min(self.max_delay.max(self.delay))
    }
}

fn percent_decode(input: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(input.as_bytes())).into_owned()
}
