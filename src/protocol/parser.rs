//! Key/Value Line Parser
//!
//! This module implements the line grammar shared by the registry file and the
//! wire protocol. Both `KEY VALUE` records in the file and the argument part of
//! `GET`/`PUT` commands go through [`parse_line`].
//!
//! ## Grammar
//!
//! ```text
//! line  = *SP key [ SP value ] [ CR ] [ LF ]
//! key   = 1*16 ALNUM
//! value = 0*32 (OCTET - CR - LF)
//! ```
//!
//! ## How the Parser Works
//!
//! 1. Leading spaces are skipped (tabs are not).
//! 2. Up to two trailing `\r`/`\n` bytes are dropped.
//! 3. The key is scanned until the first space, which is the separator.
//! 4. Everything after the separator is the value, spaces included. A `\r`
//!    or `\n` still left inside it is rejected.
//!
//! Errors carry a 1-based position inside the trimmed line so callers can
//! point at the offending character.

use crate::protocol::types::KeyValue;
use bytes::Bytes;
use thiserror::Error;

/// Maximum key length in characters.
pub const MAX_KEY_LEN: usize = 16;

/// Maximum value length in bytes.
pub const MAX_VALUE_LEN: usize = 32;

/// Separator between key and value.
const SEPARATOR: u8 = b' ';

/// Errors that can occur while parsing a key/value line.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The line contains no key at all
    #[error("key has not been provided (position {position})")]
    KeyEmpty { position: usize },

    /// The key contains a character that is not a letter or digit
    #[error("invalid key character at position {position}")]
    KeyInvalid { position: usize },

    /// The key is longer than [`MAX_KEY_LEN`]
    #[error("key exceeds 16 characters at position {position}")]
    KeyTooLong { position: usize },

    /// The value is longer than [`MAX_VALUE_LEN`]
    #[error("value exceeds 32 bytes at position {position}")]
    ValueTooLong { position: usize },

    /// The value contains a line terminator
    #[error("line break inside value at position {position}")]
    ValueInvalid { position: usize },
}

impl ParseError {
    /// Returns the 1-based position in the trimmed line where parsing failed.
    pub fn position(&self) -> usize {
        match *self {
            ParseError::KeyEmpty { position }
            | ParseError::KeyInvalid { position }
            | ParseError::KeyTooLong { position }
            | ParseError::ValueTooLong { position }
            | ParseError::ValueInvalid { position } => position,
        }
    }
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Strips leading spaces and up to two trailing line terminators.
pub fn trim_line(raw: &[u8]) -> &[u8] {
    let start = raw
        .iter()
        .position(|&b| b != b' ')
        .unwrap_or(raw.len());
    let mut line = &raw[start..];

    for _ in 0..2 {
        match line.last() {
            Some(b'\r') | Some(b'\n') => line = &line[..line.len() - 1],
            _ => break,
        }
    }

    line
}

/// Returns true if the line holds nothing but spaces and line terminators.
pub fn is_blank(raw: &[u8]) -> bool {
    trim_line(raw).is_empty()
}

/// Checks a key and value against the line grammar.
///
/// Positions are reported as if the pair had been written as `key value`.
pub fn validate(key: &[u8], value: &[u8]) -> ParseResult<()> {
    if key.is_empty() {
        return Err(ParseError::KeyEmpty { position: 1 });
    }

    for (idx, &byte) in key.iter().enumerate() {
        if !byte.is_ascii_alphanumeric() {
            return Err(ParseError::KeyInvalid { position: idx + 1 });
        }
        if idx >= MAX_KEY_LEN {
            return Err(ParseError::KeyTooLong { position: idx + 1 });
        }
    }

    validate_value(key.len(), value)
}

fn validate_value(sep: usize, value: &[u8]) -> ParseResult<()> {
    if value.len() > MAX_VALUE_LEN {
        return Err(ParseError::ValueTooLong {
            position: sep + 1 + MAX_VALUE_LEN + 1,
        });
    }

    match value.iter().position(|&b| b == b'\r' || b == b'\n') {
        Some(idx) => Err(ParseError::ValueInvalid {
            position: sep + 1 + idx + 1,
        }),
        None => Ok(()),
    }
}

/// Parses a key with an optional value out of a raw line.
///
/// A key-only line is accepted and yields an empty value; the line does not
/// need a trailing newline.
///
/// # Example
///
/// ```
/// use kvregistry::protocol::parse_line;
///
/// let kv = parse_line(b"  Hungary Budapest\r\n").unwrap();
/// assert_eq!(kv.key, "Hungary");
/// assert_eq!(&kv.value[..], b"Budapest");
/// ```
pub fn parse_line(raw: &[u8]) -> ParseResult<KeyValue> {
    let line = trim_line(raw);

    let mut key_len = 0;
    let mut separator = None;

    for (idx, &byte) in line.iter().enumerate() {
        if byte.is_ascii_alphanumeric() {
            key_len += 1;
            if key_len > MAX_KEY_LEN {
                return Err(ParseError::KeyTooLong { position: idx + 1 });
            }
        } else if byte == SEPARATOR {
            separator = Some(idx);
            break;
        } else {
            return Err(ParseError::KeyInvalid { position: idx + 1 });
        }
    }

    if key_len == 0 {
        return Err(ParseError::KeyEmpty { position: 1 });
    }

    // Only alphanumerics were accepted, so the key is valid ASCII.
    let key = String::from_utf8_lossy(&line[..key_len]).into_owned();

    let value = match separator {
        Some(sep) => {
            let value = &line[sep + 1..];
            validate_value(sep, value)?;
            Bytes::copy_from_slice(value)
        }
        None => Bytes::new(),
    };

    Ok(KeyValue { key, value })
}
