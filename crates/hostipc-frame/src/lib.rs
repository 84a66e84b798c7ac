//! Tagged binary message framing for IPC byte streams.
//!
//! Every message on the wire is a 4-byte little-endian tag followed by the
//! payload of that variant:
//! - `1` — unsigned 32-bit integer, 4 bytes LE
//! - `2` — IEEE-754 double, 8 bytes LE
//! - `3` — UTF-8 string, 8-byte LE byte length then the bytes, no terminator
//!
//! The protocol carries no version and no resynchronisation marker: once a
//! stream is misaligned it cannot recover.

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_message, encode_message, FrameConfig, Message, DEFAULT_MAX_STRING_LEN, STRING_LEN_SIZE,
    TAG_FLOAT64, TAG_SIZE, TAG_STRING, TAG_UINT32,
};
pub use error::{FrameError, ParseMessageError, Result};
pub use reader::MessageReader;
pub use writer::MessageWriter;
