// Slice-based STOMP frame parser (produces owned Vecs from input slices)

use crate::error::{Result, StompError};

/// A frame split into its raw parts; header text is still escaped.
///
/// An empty `command` means the line was a heartbeat.
#[derive(Debug)]
pub(crate) struct RawFrame {
    pub command: Vec<u8>,
    pub headers: Vec<(Vec<u8>, Vec<u8>)>,
    pub body: Option<Vec<u8>>,
    pub consumed: usize,
}

/// Principal `content-length` value, if any.
fn content_length(headers: &[(Vec<u8>, Vec<u8>)]) -> Result<Option<usize>> {
    let Some((_, v)) = headers.iter().find(|(k, _)| k.as_slice() == b"content-length") else {
        return Ok(None);
    };
    let s = std::str::from_utf8(v)
        .map_err(|e| StompError::MalformedFrame(format!("content-length not utf8: {}", e)))?;
    let trimmed = s.trim();
    trimmed.parse::<usize>().map(Some).map_err(|e| {
        StompError::MalformedFrame(format!("invalid content-length '{}': {}", trimmed, e))
    })
}

/// Take one LF-terminated line starting at `pos`, without the LF and
/// without a trailing CR. Returns the line and the position after the LF.
fn take_line(input: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let end_rel = input[pos..].iter().position(|&b| b == b'\n')?;
    let mut line = &input[pos..pos + end_rel];
    if line.last() == Some(&b'\r') {
        line = &line[..line.len() - 1];
    }
    Some((line, pos + end_rel + 1))
}

/// Parse a single STOMP frame from a raw byte slice.
///
/// Returns `Ok(Some(RawFrame))` when a full frame (or heartbeat line) was
/// parsed, together with how many bytes were consumed. Returns `Ok(None)`
/// when more bytes are required and `Err` on protocol errors.
pub(crate) fn parse_frame_slice(input: &[u8]) -> Result<Option<RawFrame>> {
    let Some((command, mut pos)) = take_line(input, 0) else {
        return Ok(None);
    };
    if command.is_empty() {
        return Ok(Some(RawFrame {
            command: Vec::new(),
            headers: Vec::new(),
            body: None,
            consumed: pos,
        }));
    }
    let command = command.to_vec();

    // headers run until an empty line
    let mut headers: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    loop {
        let Some((line, next)) = take_line(input, pos) else {
            return Ok(None);
        };
        pos = next;
        if line.is_empty() {
            break;
        }
        match line.iter().position(|&b| b == b':') {
            Some(colon) => headers.push((line[..colon].to_vec(), line[colon + 1..].to_vec())),
            None => {
                return Err(StompError::MalformedHeader(format!(
                    "header line without separator: {:?}",
                    String::from_utf8_lossy(line)
                )));
            }
        }
    }

    let len = input.len();
    let body = match content_length(&headers)? {
        Some(content_len) if content_len > 0 => {
            // need content_len bytes plus the terminating NUL
            if pos + content_len + 1 > len {
                return Ok(None);
            }
            let body = input[pos..pos + content_len].to_vec();
            pos += content_len;
            if input[pos] != 0 {
                return Err(StompError::MalformedFrame(format!(
                    "body of content-length {} is not followed by NUL",
                    content_len
                )));
            }
            pos += 1;
            body
        }
        _ => match input[pos..].iter().position(|&b| b == 0) {
            Some(nul_rel) => {
                let body = input[pos..pos + nul_rel].to_vec();
                pos += nul_rel + 1;
                body
            }
            None => return Ok(None),
        },
    };

    Ok(Some(RawFrame {
        command,
        headers,
        body: (!body.is_empty()).then_some(body),
        consumed: pos,
    }))
}
