//! Connection Module
//!
//! This module manages individual client connections. Each accepted socket
//! becomes a [`Session`] owned by the server loop; a small reader task per
//! session turns incoming bytes into messages and forwards them to the loop.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Server loop                             │
//! │          (accept, dispatch, write responses)                │
//! └──────────────────────▲──────────────────────────────────────┘
//!                        │
//!                        │ SessionEvent (mpsc)
//!                        │
//!      ┌─────────────────┼─────────────────┐
//!      │                 │                 │
//! ┌────┴─────┐     ┌─────┴────┐      ┌─────┴────┐
//! │ reader 1 │     │ reader 2 │      │ reader N │
//! └──────────┘     └──────────┘      └──────────┘
//! ```
//!
//! Reader tasks never touch the registry; every command runs inside the
//! server loop, one at a time.
//!
//! ## Features
//!
//! - **Bounded Reads**: Each read pulls at most 256 bytes
//! - **Line Framing**: Split and pipelined commands are handled per line
//! - **Statistics**: Tracks connection and command metrics

pub mod session;

// Re-export commonly used types
pub use session::{
    read_loop, ConnectionError, ConnectionStats, Framing, Session, SessionEvent,
    SessionEventKind, SessionId, SessionReader,
};
