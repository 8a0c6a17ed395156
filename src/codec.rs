use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::StompError;
use crate::frame::{Body, Command, Frame};
use crate::headers::Headers;
use crate::parser::{RawFrame, parse_frame_slice};
use crate::protocol::Version;

/// `StompCodec` implements `tokio_util::codec::{Decoder, Encoder}` for the
/// STOMP wire protocol.
///
/// Responsibilities:
/// - Decode incoming bytes into [`Frame`]s; a bare LF decodes to a heartbeat
///   frame.
/// - Honor `content-length` for bodies that contain NUL bytes and insist the
///   declared length is followed by the terminator.
/// - Escape and unescape header text according to the negotiated
///   [`Version`], which starts at 1.0 and is switched once the broker
///   answers CONNECT.
/// - Emit a computed `content-type` and `content-length` for every body.
#[derive(Debug, Clone)]
pub struct StompCodec {
    version: Version,
}

impl StompCodec {
    pub fn new(version: Version) -> Self {
        Self { version }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn build_frame(&self, raw: RawFrame) -> Result<Frame, StompError> {
        if raw.command.is_empty() {
            return Ok(Frame::heartbeat());
        }
        let command = std::str::from_utf8(&raw.command)
            .map_err(|e| StompError::MalformedFrame(format!("invalid utf8 in command: {}", e)))?
            .parse::<Command>()?;

        let mut headers = Headers::new();
        for (k, v) in raw.headers {
            let name = self.header_text(command, &k)?;
            let value = self.header_text(command, &v)?;
            headers.append(name, value);
        }

        let body = raw.body.map(|bytes| {
            let charset = infer_charset(headers.get("content-type"));
            Body::with_charset(bytes, charset)
        });

        Ok(Frame {
            command: Some(command),
            headers,
            body,
        })
    }

    fn header_text(&self, command: Command, raw: &[u8]) -> Result<String, StompError> {
        let unescaped = self.version.unescape(Some(command), raw)?;
        String::from_utf8(unescaped)
            .map_err(|e| StompError::MalformedHeader(format!("invalid utf8 in header: {}", e)))
    }

    /// `content-type` written for a body: the frame's own header wins, text
    /// bodies gain a charset parameter from 1.1 on.
    fn content_type(&self, explicit: Option<&str>, body: &Body) -> String {
        let with_charset = self.version >= Version::V1_1;
        match (explicit, body.charset()) {
            (Some(ct), Some(cs)) if with_charset && charset_param(ct).is_none() => {
                format!("{};charset={}", ct, cs)
            }
            (Some(ct), _) => ct.to_string(),
            (None, Some(cs)) if with_charset => format!("text/plain;charset={}", cs),
            (None, Some(_)) => "text/plain".to_string(),
            (None, None) => "application/octet-stream".to_string(),
        }
    }

    fn put_header(&self, dst: &mut BytesMut, command: Option<Command>, name: &str, value: &str) {
        dst.extend_from_slice(self.version.escape(command, name).as_bytes());
        dst.put_u8(b':');
        dst.extend_from_slice(self.version.escape(command, value).as_bytes());
        dst.put_u8(b'\n');
    }
}

impl Default for StompCodec {
    fn default() -> Self {
        Self::new(Version::V1_0)
    }
}

/// Charset of a body given its `content-type`: an explicit `charset=`
/// parameter, UTF-8 for `text/*`, otherwise binary (`None`).
pub fn infer_charset(content_type: Option<&str>) -> Option<String> {
    let ct = content_type?;
    if let Some(charset) = charset_param(ct) {
        return Some(charset.to_string());
    }
    ct.trim()
        .to_ascii_lowercase()
        .starts_with("text/")
        .then(|| Body::DEFAULT_CHARSET.to_string())
}

fn charset_param(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
    })
}

impl Decoder for StompCodec {
    type Item = Frame;
    type Error = StompError;

    /// Decode bytes from `src` into a `Frame`.
    ///
    /// Returns `Ok(None)` and leaves `src` untouched when more bytes are
    /// required. Consumes exactly one frame (or one heartbeat line) otherwise.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        match parse_frame_slice(src.chunk())? {
            Some(raw) => {
                src.advance(raw.consumed);
                self.build_frame(raw).map(Some)
            }
            None => Ok(None),
        }
    }

    /// At end of stream any leftover bytes are an unterminated frame.
    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => Err(StompError::MalformedFrame(format!(
                "stream ended with {} bytes of an unterminated frame",
                buf.len()
            ))),
        }
    }
}

impl Encoder<Frame> for StompCodec {
    type Error = StompError;

    /// Encode a `Frame` into the destination buffer.
    ///
    /// A frame without a command encodes to a single LF. Reserved
    /// `content-type`/`content-length` headers and blank names are not
    /// copied; the codec computes both reserved headers when a body exists.
    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let Some(cmd) = frame.command else {
            dst.put_u8(b'\n');
            return Ok(());
        };
        let command = Some(cmd);

        dst.extend_from_slice(cmd.as_str().as_bytes());
        dst.put_u8(b'\n');

        for (name, value) in frame.headers.iter() {
            if name.is_empty() || name == "content-type" || name == "content-length" {
                continue;
            }
            self.put_header(dst, command, name, value);
        }

        if let Some(body) = &frame.body {
            let content_type = self.content_type(frame.headers.get("content-type"), body);
            self.put_header(dst, command, "content-type", &content_type);
            self.put_header(dst, command, "content-length", &body.len().to_string());
        }

        dst.put_u8(b'\n');
        dst.extend_from_slice(frame.body_bytes());
        dst.put_u8(0);
        Ok(())
    }
}
