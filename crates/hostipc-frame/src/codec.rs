use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{FrameError, ParseMessageError, Result};

/// Size of the tag that starts every message.
pub const TAG_SIZE: usize = 4;

/// Size of the byte-length prefix of a string payload.
pub const STRING_LEN_SIZE: usize = 8;

pub const TAG_UINT32: u32 = 1;
pub const TAG_FLOAT64: u32 = 2;
pub const TAG_STRING: u32 = 3;

/// Default maximum string payload accepted by the decoder: 16 MiB.
pub const DEFAULT_MAX_STRING_LEN: usize = 16 * 1024 * 1024;

/// A tagged value carried by the wire protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    UInt32(u32),
    Float64(f64),
    String(String),
}

impl Message {
    /// The wire tag of this variant.
    pub fn tag(&self) -> u32 {
        match self {
            Message::UInt32(_) => TAG_UINT32,
            Message::Float64(_) => TAG_FLOAT64,
            Message::String(_) => TAG_STRING,
        }
    }

    /// Short kind name, matching the text form prefix (`u32`, `f64`, `str`).
    pub fn kind(&self) -> &'static str {
        match self {
            Message::UInt32(_) => "u32",
            Message::Float64(_) => "f64",
            Message::String(_) => "str",
        }
    }

    /// The total wire size of this message (tag + payload).
    pub fn wire_size(&self) -> usize {
        TAG_SIZE
            + match self {
                Message::UInt32(_) => 4,
                Message::Float64(_) => 8,
                Message::String(s) => STRING_LEN_SIZE + s.len(),
            }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::UInt32(v) => write!(f, "{v}"),
            Message::Float64(v) => write!(f, "{v}"),
            Message::String(s) => f.write_str(s),
        }
    }
}

impl From<u32> for Message {
    fn from(value: u32) -> Self {
        Message::UInt32(value)
    }
}

impl From<f64> for Message {
    fn from(value: f64) -> Self {
        Message::Float64(value)
    }
}

impl From<String> for Message {
    fn from(value: String) -> Self {
        Message::String(value)
    }
}

impl From<&str> for Message {
    fn from(value: &str) -> Self {
        Message::String(value.to_string())
    }
}

/// Parses the text form used on the command line: `u32:3`, `f64:0.5`,
/// `str:Hello 5!`.
impl FromStr for Message {
    type Err = ParseMessageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (kind, value) = s
            .split_once(':')
            .ok_or_else(|| ParseMessageError::MissingKind(s.to_string()))?;
        match kind {
            "u32" => value
                .trim()
                .parse()
                .map(Message::UInt32)
                .map_err(|_| ParseMessageError::InvalidValue {
                    kind: "u32",
                    value: value.to_string(),
                }),
            "f64" => value
                .trim()
                .parse()
                .map(Message::Float64)
                .map_err(|_| ParseMessageError::InvalidValue {
                    kind: "f64",
                    value: value.to_string(),
                }),
            "str" => Ok(Message::String(value.to_string())),
            other => Err(ParseMessageError::UnknownKind(other.to_string())),
        }
    }
}

/// Encode a message into the wire format.
///
/// Wire format:
/// ```text
/// ┌───────────┬──────────────────────────────────────────────┐
/// │ Tag (4B)  │ Payload                                      │
/// │ LE        │ 1: u32 (4B LE)                               │
/// │           │ 2: f64 (8B LE)                               │
/// │           │ 3: length u64 (8B LE) + UTF-8 bytes          │
/// └───────────┴──────────────────────────────────────────────┘
/// ```
pub fn encode_message(message: &Message, dst: &mut BytesMut) {
    dst.reserve(message.wire_size());
    dst.put_u32_le(message.tag());
    match message {
        Message::UInt32(v) => dst.put_u32_le(*v),
        Message::Float64(v) => dst.put_f64_le(*v),
        Message::String(s) => {
            dst.put_u64_le(s.len() as u64);
            dst.put_slice(s.as_bytes());
        }
    }
}

/// Decode one message from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete message yet.
/// On success, consumes the message bytes from the buffer. An unknown tag is
/// reported as soon as the tag itself is available.
pub fn decode_message(src: &mut BytesMut, config: &FrameConfig) -> Result<Option<Message>> {
    if src.len() < TAG_SIZE {
        return Ok(None);
    }

    let mut peek = &src[..];
    let tag = peek.get_u32_le();

    match tag {
        TAG_UINT32 => {
            if src.len() < TAG_SIZE + 4 {
                return Ok(None);
            }
            src.advance(TAG_SIZE);
            Ok(Some(Message::UInt32(src.get_u32_le())))
        }
        TAG_FLOAT64 => {
            if src.len() < TAG_SIZE + 8 {
                return Ok(None);
            }
            src.advance(TAG_SIZE);
            Ok(Some(Message::Float64(src.get_f64_le())))
        }
        TAG_STRING => {
            if src.len() < TAG_SIZE + STRING_LEN_SIZE {
                return Ok(None);
            }
            let size = peek.get_u64_le();
            let too_long = FrameError::StringTooLong {
                size,
                max: config.max_string_len,
            };
            if size > config.max_string_len as u64 {
                return Err(too_long);
            }
            let Some((len, total)) = usize::try_from(size)
                .ok()
                .and_then(|len| Some((len, len.checked_add(TAG_SIZE + STRING_LEN_SIZE)?)))
            else {
                return Err(too_long);
            };

            if src.len() < total {
                return Ok(None);
            }
            src.advance(TAG_SIZE + STRING_LEN_SIZE);
            let bytes = src.split_to(len);
            let text = String::from_utf8(bytes.to_vec())?;
            Ok(Some(Message::String(text)))
        }
        other => Err(FrameError::UnknownTag(other)),
    }
}

/// Configuration for the message codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum string payload in bytes. Default: 16 MiB.
    pub max_string_len: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_string_len: DEFAULT_MAX_STRING_LEN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(message: &Message) -> BytesMut {
        let mut buf = BytesMut::new();
        encode_message(message, &mut buf);
        buf
    }

    #[test]
    fn uint32_wire_layout() {
        let buf = encoded(&Message::UInt32(3));
        assert_eq!(buf.as_ref(), &[1, 0, 0, 0, 3, 0, 0, 0]);
    }

    #[test]
    fn float64_wire_layout() {
        let buf = encoded(&Message::Float64(0.5));
        let mut expected = vec![2, 0, 0, 0];
        expected.extend_from_slice(&0.5f64.to_le_bytes());
        assert_eq!(buf.as_ref(), expected.as_slice());
    }

    #[test]
    fn string_wire_layout() {
        let buf = encoded(&Message::from("Hello 5!"));
        let mut expected = vec![3, 0, 0, 0];
        expected.extend_from_slice(&8u64.to_le_bytes());
        expected.extend_from_slice(b"Hello 5!");
        assert_eq!(buf.as_ref(), expected.as_slice());
    }

    #[test]
    fn string_length_counts_bytes_not_chars() {
        let message = Message::from("héllo ✓");
        let buf = encoded(&message);
        let len = u64::from_le_bytes(buf[4..12].try_into().unwrap());
        assert_eq!(len as usize, "héllo ✓".len());
        assert_eq!(buf.len(), message.wire_size());
    }

    #[test]
    fn roundtrip_edge_values() {
        let config = FrameConfig::default();
        let cases = vec![
            Message::UInt32(0),
            Message::UInt32(u32::MAX),
            Message::Float64(-0.0),
            Message::Float64(f64::MIN_POSITIVE),
            Message::Float64(f64::INFINITY),
            Message::String(String::new()),
            Message::from("multi\nline\0with nul"),
        ];

        for message in cases {
            let mut buf = encoded(&message);
            let decoded = decode_message(&mut buf, &config).unwrap().unwrap();
            match (&message, &decoded) {
                (Message::Float64(a), Message::Float64(b)) => assert_eq!(a.to_bits(), b.to_bits()),
                _ => assert_eq!(message, decoded),
            }
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn nan_roundtrips_bit_exact() {
        let nan = f64::from_bits(0x7ff8_0000_0000_1234);
        let mut buf = encoded(&Message::Float64(nan));
        match decode_message(&mut buf, &FrameConfig::default()).unwrap() {
            Some(Message::Float64(v)) => assert_eq!(v.to_bits(), nan.to_bits()),
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn decode_incomplete_tag() {
        let mut buf = BytesMut::from(&[1, 0][..]);
        assert!(decode_message(&mut buf, &FrameConfig::default())
            .unwrap()
            .is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn decode_incomplete_payload() {
        let mut buf = encoded(&Message::from("truncated"));
        buf.truncate(TAG_SIZE + STRING_LEN_SIZE + 3);
        assert!(decode_message(&mut buf, &FrameConfig::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn decode_unknown_tag() {
        let mut buf = BytesMut::from(&[9, 0, 0, 0][..]);
        let result = decode_message(&mut buf, &FrameConfig::default());
        assert!(matches!(result, Err(FrameError::UnknownTag(9))));
    }

    #[test]
    fn decode_string_too_long() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(TAG_STRING);
        buf.put_u64_le(1024);
        let config = FrameConfig { max_string_len: 16 };

        let result = decode_message(&mut buf, &config);
        assert!(matches!(
            result,
            Err(FrameError::StringTooLong { size: 1024, max: 16 })
        ));
    }

    #[test]
    fn decode_length_overflowing_usize() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(TAG_STRING);
        buf.put_u64_le(u64::MAX - 3);
        let config = FrameConfig {
            max_string_len: usize::MAX,
        };

        let result = decode_message(&mut buf, &config);
        assert!(matches!(
            result,
            Err(FrameError::StringTooLong { size, .. }) if size == u64::MAX - 3
        ));
    }

    #[test]
    fn decode_invalid_utf8() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(TAG_STRING);
        buf.put_u64_le(2);
        buf.put_slice(&[0xC3, 0x28]);

        let result = decode_message(&mut buf, &FrameConfig::default());
        assert!(matches!(result, Err(FrameError::InvalidUtf8(_))));
    }

    #[test]
    fn decode_multiple_messages() {
        let mut buf = BytesMut::new();
        encode_message(&Message::UInt32(3), &mut buf);
        encode_message(&Message::Float64(0.5), &mut buf);
        encode_message(&Message::from("Hello 5!"), &mut buf);

        let config = FrameConfig::default();
        assert_eq!(
            decode_message(&mut buf, &config).unwrap(),
            Some(Message::UInt32(3))
        );
        assert_eq!(
            decode_message(&mut buf, &config).unwrap(),
            Some(Message::Float64(0.5))
        );
        assert_eq!(
            decode_message(&mut buf, &config).unwrap(),
            Some(Message::from("Hello 5!"))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn parses_text_form() {
        assert_eq!("u32:3".parse::<Message>().unwrap(), Message::UInt32(3));
        assert_eq!("f64:0.5".parse::<Message>().unwrap(), Message::Float64(0.5));
        assert_eq!(
            "str:Hello 5!".parse::<Message>().unwrap(),
            Message::from("Hello 5!")
        );
        assert_eq!(
            "str:a:b".parse::<Message>().unwrap(),
            Message::from("a:b")
        );
    }

    #[test]
    fn rejects_bad_text_form() {
        assert!(matches!(
            "3".parse::<Message>(),
            Err(ParseMessageError::MissingKind(_))
        ));
        assert!(matches!(
            "i64:3".parse::<Message>(),
            Err(ParseMessageError::UnknownKind(_))
        ));
        assert!(matches!(
            "u32:-1".parse::<Message>(),
            Err(ParseMessageError::InvalidValue { kind: "u32", .. })
        ));
    }

    #[test]
    fn display_matches_value() {
        assert_eq!(Message::UInt32(12).to_string(), "12");
        assert_eq!(Message::Float64(0.25).to_string(), "0.25");
        assert_eq!(Message::from("text").to_string(), "text");
    }
}
