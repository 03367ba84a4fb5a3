//! Wire Protocol Data Types
//!
//! This module defines the values exchanged over a client connection.
//!
//! ## Protocol Format
//!
//! Requests are plain text lines. Only the first three bytes are inspected to
//! pick the command, case-insensitively:
//!
//! ```text
//! GET <key>
//! PUT <key> [value]
//! BYE
//! ```
//!
//! Every request except `BYE` is answered with exactly one `\n`-terminated
//! line:
//!
//! ```text
//! [Hungary] => [Budapest]        GET hit
//! [Hungary] <= [Budapest]        PUT accepted
//! Key [Narnia] not found in registry
//! ???                            unrecognized command
//! ```

use crate::protocol::parser::{ParseError, MAX_KEY_LEN, MAX_VALUE_LEN};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Line terminator used for every response.
pub const LF: u8 = b'\n';

/// Length of the command token at the start of each request.
pub const COMMAND_LEN: usize = 3;

/// A validated key and its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// 1 to 16 ASCII letters or digits
    pub key: String,
    /// 0 to 32 bytes, empty for key-only lines
    pub value: Bytes,
}

/// A request received from a client.
///
/// `Get` and `Put` carry the unparsed remainder of the message after the
/// three-byte command token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get(Bytes),
    Put(Bytes),
    Bye,
    Unknown,
}

impl Command {
    /// Identifies the command at the start of a message.
    ///
    /// # Example
    /// ```
    /// use kvregistry::protocol::Command;
    /// use bytes::Bytes;
    ///
    /// let cmd = Command::parse(b"gEt Hungary\n");
    /// assert_eq!(cmd, Command::Get(Bytes::from(" Hungary\n")));
    /// ```
    pub fn parse(message: &[u8]) -> Command {
        if message.len() < COMMAND_LEN {
            return Command::Unknown;
        }

        let (token, rest) = message.split_at(COMMAND_LEN);
        if token.eq_ignore_ascii_case(b"GET") {
            Command::Get(Bytes::copy_from_slice(rest))
        } else if token.eq_ignore_ascii_case(b"PUT") {
            Command::Put(Bytes::copy_from_slice(rest))
        } else if token.eq_ignore_ascii_case(b"BYE") {
            Command::Bye
        } else {
            Command::Unknown
        }
    }

    /// Returns the canonical upper-case name, used for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get(_) => "GET",
            Command::Put(_) => "PUT",
            Command::Bye => "BYE",
            Command::Unknown => "UNKNOWN",
        }
    }
}

/// A single response line sent back to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Successful GET: `[key] => [value]`
    Value { key: String, value: Bytes },

    /// Successful PUT: `[key] <= [value]`
    Stored { key: String, value: Bytes },

    /// The request arguments did not parse
    Invalid(ParseError),

    /// GET for a key that is not in the registry
    NotFound { key: String },

    /// PUT for an existing key while updates are disabled
    Exists { key: String },

    /// The command token was not recognized
    Unrecognized,
}

impl Response {
    /// Serializes the response into its wire format, including the
    /// trailing newline.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.serialized_len_hint());
        self.write_to(&mut buf);
        buf.freeze()
    }

    /// Writes the serialized response into a buffer.
    pub fn write_to(&self, buf: &mut BytesMut) {
        match self {
            Response::Value { key, value } => write_pair(buf, key, b" => ", value),
            Response::Stored { key, value } => write_pair(buf, key, b" <= ", value),
            Response::Invalid(err) => buf.put_slice(invalid_message(err).as_bytes()),
            Response::NotFound { key } => {
                buf.put_slice(format!("Key [{}] not found in registry", key).as_bytes())
            }
            Response::Exists { key } => buf.put_slice(
                format!("Key [{}] already exists, updating keys are not allowed", key).as_bytes(),
            ),
            Response::Unrecognized => buf.put_slice(b"???"),
        }
        buf.put_u8(LF);
    }

    /// Returns true if this response reports a failed request.
    pub fn is_error(&self) -> bool {
        !matches!(self, Response::Value { .. } | Response::Stored { .. })
    }

    fn serialized_len_hint(&self) -> usize {
        match self {
            Response::Value { key, value } | Response::Stored { key, value } => {
                key.len() + value.len() + 9
            }
            _ => 64,
        }
    }
}

fn write_pair(buf: &mut BytesMut, key: &str, arrow: &[u8], value: &[u8]) {
    buf.put_u8(b'[');
    buf.put_slice(key.as_bytes());
    buf.put_u8(b']');
    buf.put_slice(arrow);
    buf.put_u8(b'[');
    buf.put_slice(value);
    buf.put_u8(b']');
}

fn invalid_message(err: &ParseError) -> String {
    match err {
        ParseError::KeyEmpty { .. } => "Key has not been provided".to_string(),
        ParseError::KeyInvalid { .. } => {
            "Key is invalid ... keys can contain digits and letters only".to_string()
        }
        ParseError::KeyTooLong { .. } => {
            format!("Key is too long ... max key length is {}", MAX_KEY_LEN)
        }
        ParseError::ValueTooLong { .. } => {
            format!("Value is too long ... max value length is {}", MAX_VALUE_LEN)
        }
        ParseError::ValueInvalid { .. } => {
            "Value is invalid ... values can't contain line breaks".to_string()
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.serialize();
        let line = bytes.strip_suffix(&[LF]).unwrap_or(&bytes[..]);
        write!(f, "{}", String::from_utf8_lossy(line))
    }
}
