//! Command Handler Module
//!
//! This module implements the command processing layer. It receives the raw
//! bytes of one client message, executes it against the registry, and returns
//! either a response line or a request to close the connection.
//!
//! ## Architecture
//!
//! ```text
//! Client Message
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ Command::parse  │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Dispatch     │
//! │  - Validate     │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │    Registry     │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `GET`, `PUT`, `BYE` (first three bytes, any case)

pub mod handler;

// Re-export the main command handler
pub use handler::{CommandHandler, Outcome};
