//! Command Handler Module
//!
//! This module executes client requests against the registry. It receives
//! the raw bytes of one message, identifies the command, hands the arguments
//! to the line parser and the registry, and builds the response line.
//!
//! ## Supported Commands
//!
//! - `GET key` - Look up a key's value (anything after the key is ignored)
//! - `PUT key [value]` - Store a value, subject to the update policy
//! - `BYE` - Close the connection without a response
//!
//! Any other message is answered with `???`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐     │
//! │  │Command::parse│──>│  parse_line  │──>│   Registry   │     │
//! │  └──────────────┘   └──────────────┘   └──────────────┘     │
//! │                                               │             │
//! │                                               ▼             │
//! │                                           Response          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::protocol::{parse_line, Command, Response};
use crate::storage::{PutOutcome, Registry, RegistryError};
use bytes::Bytes;
use tracing::{debug, trace};

/// What the connection should do after a message was executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Send this response line back to the client
    Reply(Response),
    /// Close the connection without replying
    Disconnect,
}

/// Executes commands against the registry it owns.
#[derive(Debug)]
pub struct CommandHandler {
    /// The registry; only this handler mutates it
    registry: Registry,
}

impl CommandHandler {
    /// Creates a new command handler serving the given registry.
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Returns the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Consumes the handler and returns the registry.
    pub fn into_registry(self) -> Registry {
        self.registry
    }

    /// Executes one client message and returns what to do next.
    ///
    /// Parse and registry failures are turned into error responses; this
    /// never fails.
    pub fn execute(&mut self, message: &[u8]) -> Outcome {
        let command = Command::parse(message);
        trace!(command = command.name(), bytes = message.len(), "Executing command");

        let response = match command {
            Command::Get(args) => self.cmd_get(&args),
            Command::Put(args) => self.cmd_put(&args),
            Command::Bye => return Outcome::Disconnect,
            Command::Unknown => Response::Unrecognized,
        };

        Outcome::Reply(response)
    }

    /// GET key
    fn cmd_get(&mut self, args: &Bytes) -> Response {
        let kv = match parse_line(args) {
            Ok(kv) => kv,
            Err(e) => return Response::Invalid(e),
        };

        match self.registry.get(&kv.key) {
            Ok(value) => Response::Value {
                value: value.clone(),
                key: kv.key,
            },
            Err(e) => {
                debug!(error = %e, "GET miss");
                Response::NotFound { key: kv.key }
            }
        }
    }

    /// PUT key [value]
    fn cmd_put(&mut self, args: &Bytes) -> Response {
        let kv = match parse_line(args) {
            Ok(kv) => kv,
            Err(e) => return Response::Invalid(e),
        };

        match self.registry.put(kv.key.clone(), kv.value.clone()) {
            Ok(outcome) => {
                if outcome == PutOutcome::Updated {
                    debug!(key = %kv.key, "Value updated");
                }
                Response::Stored {
                    key: kv.key,
                    value: kv.value,
                }
            }
            Err(RegistryError::Invalid(e)) => Response::Invalid(e),
            Err(e) => {
                debug!(error = %e, "PUT rejected");
                Response::Exists { key: kv.key }
            }
        }
    }
}
