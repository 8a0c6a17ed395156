//! Wire-level behavior of the STOMP codec.

use bytes::BytesMut;
use cobalt_stomp::{Body, Command, Frame, StompCodec, StompError, Version};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::codec::{Decoder, Encoder};

fn encode(version: Version, frame: Frame) -> BytesMut {
    let mut codec = StompCodec::new(version);
    let mut buf = BytesMut::new();
    codec.encode(frame, &mut buf).expect("encode failed");
    buf
}

fn decode_all(version: Version, bytes: &[u8]) -> Vec<Frame> {
    let mut codec = StompCodec::new(version);
    let mut buf = BytesMut::from(bytes);
    let mut frames = Vec::new();
    while let Some(frame) = codec.decode(&mut buf).expect("decode failed") {
        frames.push(frame);
    }
    assert!(buf.is_empty(), "left over: {:?}", buf);
    frames
}

#[test]
fn send_frame_survives_every_version() {
    for version in Version::ALL {
        let frame = Frame::send("/queue/a", "hello")
            .header("x-trace", "abc")
            .header("x-trace", "second");
        let wire = encode(version, frame);
        let decoded = decode_all(version, &wire);
        assert_eq!(decoded.len(), 1, "{}", version);
        let frame = &decoded[0];
        assert!(frame.is(Command::Send));
        assert_eq!(frame.get_header("destination"), Some("/queue/a"));
        assert_eq!(frame.headers.all("x-trace"), ["abc", "second"]);
        assert_eq!(frame.get_header("content-length"), Some("5"));
        assert_eq!(frame.body_text(), Some("hello"));
    }
}

#[test]
fn text_body_is_labelled_with_charset_from_1_1() {
    let wire = encode(Version::V1_0, Frame::send("/q", "hi"));
    assert!(std::str::from_utf8(&wire).unwrap().contains("content-type:text/plain\n"));

    let wire = encode(Version::V1_2, Frame::send("/q", "hi"));
    assert!(
        std::str::from_utf8(&wire)
            .unwrap()
            .contains("content-type:text/plain;charset=UTF-8\n")
    );
}

#[test]
fn decoded_text_body_keeps_charset() {
    let frames = decode_all(
        Version::V1_1,
        b"MESSAGE\ncontent-type:text/plain;charset=ISO-8859-1\n\nabc\0",
    );
    let body = frames[0].body.as_ref().expect("body");
    assert_eq!(body.charset(), Some("ISO-8859-1"));

    let frames = decode_all(Version::V1_1, b"MESSAGE\n\n\x01\x02\0");
    assert_eq!(frames[0].body, Some(Body::binary(vec![1u8, 2])));
}

#[test]
fn heartbeats_between_frames() {
    let frames = decode_all(Version::V1_1, b"\nSEND\ndestination:/q\n\nx\0\r\n\n");
    let kinds: Vec<bool> = frames.iter().map(Frame::is_heartbeat).collect();
    assert_eq!(kinds, [true, false, true, true]);
}

#[test]
fn content_length_allows_nul_in_body() {
    let frames = decode_all(
        Version::V1_2,
        b"MESSAGE\ncontent-length:5\n\na\0b\0c\0",
    );
    assert_eq!(frames[0].body_bytes(), b"a\0b\0c");
}

#[test]
fn content_length_must_end_at_nul() {
    let mut codec = StompCodec::new(Version::V1_2);
    let mut buf = BytesMut::from(&b"MESSAGE\ncontent-length:2\n\nabc\0"[..]);
    let err = codec.decode(&mut buf).unwrap_err();
    assert!(matches!(err, StompError::MalformedFrame(_)), "{:?}", err);
}

#[test]
fn unknown_command_is_rejected() {
    let mut codec = StompCodec::new(Version::V1_2);
    let mut buf = BytesMut::from(&b"FROB\n\n\0"[..]);
    assert!(codec.decode(&mut buf).is_err());
}

#[test]
fn header_without_colon_is_rejected() {
    let mut codec = StompCodec::new(Version::V1_2);
    let mut buf = BytesMut::from(&b"SEND\ndestination\n\n\0"[..]);
    let err = codec.decode(&mut buf).unwrap_err();
    assert!(matches!(err, StompError::MalformedHeader(_)), "{:?}", err);
}

#[test]
fn frames_split_at_random_points_decode_in_order() {
    let mut stream = BytesMut::new();
    let mut codec = StompCodec::new(Version::V1_2);
    for i in 0..50 {
        let body = format!("message {} with a\0nul", i);
        let frame = Frame::send(&format!("/queue/{}", i % 3), body.into_bytes())
            .header("x-seq", i.to_string());
        codec.encode(frame, &mut stream).unwrap();
        if i % 7 == 0 {
            codec.encode(Frame::heartbeat(), &mut stream).unwrap();
        }
    }

    let mut rng = StdRng::seed_from_u64(0x5707);
    let mut buf = BytesMut::new();
    let mut seen = Vec::new();
    let mut rest = &stream[..];
    while !rest.is_empty() {
        let take = rng.gen_range(1..=rest.len().min(40));
        buf.extend_from_slice(&rest[..take]);
        rest = &rest[take..];
        while let Some(frame) = codec.decode(&mut buf).expect("decode failed") {
            if !frame.is_heartbeat() {
                seen.push(frame.get_header("x-seq").unwrap().parse::<u32>().unwrap());
            }
        }
    }
    assert!(buf.is_empty());
    assert_eq!(seen, (0..50).collect::<Vec<_>>());
}
