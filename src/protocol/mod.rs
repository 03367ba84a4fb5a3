//! Line Protocol Implementation
//!
//! This module provides the text protocol spoken between clients and the
//! registry server, and the key/value line grammar it shares with the
//! registry file.
//!
//! ## Modules
//!
//! - `types`: `Command`, `Response` and `KeyValue`
//! - `parser`: the key/value line parser
//!
//! ## Example
//!
//! ```
//! use kvregistry::protocol::{parse_line, Command, Response};
//!
//! // Identifying a request
//! let command = Command::parse(b"GET Hungary\n");
//! assert_eq!(command.name(), "GET");
//!
//! // Parsing its arguments
//! let kv = parse_line(b" Hungary\n").unwrap();
//! assert_eq!(kv.key, "Hungary");
//!
//! // Creating responses
//! let response = Response::NotFound { key: kv.key };
//! assert_eq!(&response.serialize()[..], b"Key [Hungary] not found in registry\n");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{
    is_blank, parse_line, validate, ParseError, ParseResult, MAX_KEY_LEN, MAX_VALUE_LEN,
};
pub use types::{Command, KeyValue, Response};
