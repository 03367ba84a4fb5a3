//! # kvregistry - A Line-Protocol Key-Value Registry
//!
//! kvregistry is a small key-value server. At startup it loads a flat
//! `KEY VALUE` file into memory; clients then connect over TCP and send
//! one-line `GET`, `PUT` and `BYE` commands.
//!
//! ## Features
//!
//! - **Shared Grammar**: The same line parser validates the registry file and
//!   the arguments of every command
//! - **Update Policy**: Overwriting existing keys is either allowed or
//!   rejected (strict mode), fixed at startup
//! - **Single Loop**: One event loop owns the listener, every session and the
//!   registry, so commands never interleave
//! - **Line Framing**: Split and pipelined commands are reassembled per line,
//!   with a one-read-one-command mode for compatibility
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              kvregistry                                 │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │   Server    │───>│  Session    │───>│  Command    │                  │
//! │  │ (event loop)│<───│  readers    │    │  Handler    │                  │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘                  │
//! │                                               │                         │
//! │                                               ▼                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐    │
//! │  │   Line      │    │                 Registry                     │    │
//! │  │   Parser    │───>│   insertion-ordered entries + UpdatePolicy   │    │
//! │  └─────────────┘    └──────────────────────────────────────────────┘    │
//! │                                               ▲                         │
//! │                                               │ load() at startup       │
//! │                                        capitals.txt                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use kvregistry::connection::Framing;
//! use kvregistry::server::Server;
//! use kvregistry::storage::{Registry, UpdatePolicy};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     // Load the registry
//!     let mut registry = Registry::new(UpdatePolicy::Allow);
//!     registry.load("capitals.txt")?;
//!
//!     // Serve it until Ctrl+C
//!     let listener = TcpListener::bind("127.0.0.1:5555").await?;
//!     Server::new(listener, registry, Framing::Lines)
//!         .run_until_ctrl_c()
//!         .await;
//!     Ok(())
//! }
//! ```
//!
//! ## Protocol
//!
//! ```text
//! > GET Hungary
//! < [Hungary] => [Budapest]
//! > PUT Japan Tokyo
//! < [Japan] <= [Tokyo]
//! > GET Narnia
//! < Key [Narnia] not found in registry
//! > BYE
//! (connection closed)
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: Line parser, commands and response lines
//! - [`storage`]: The registry and its file loader
//! - [`commands`]: Command execution against the registry
//! - [`connection`]: Sessions, framing and connection statistics
//! - [`server`]: The event loop tying everything together
//! - [`config`]: Command-line configuration

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{CommandHandler, Outcome};
pub use config::Config;
pub use connection::{ConnectionStats, Framing};
pub use protocol::{parse_line, Command, ParseError, Response};
pub use server::Server;
pub use storage::{LoadError, Registry, RegistryError, UpdatePolicy};

/// The default port kvregistry listens on
pub const DEFAULT_PORT: u16 = 5555;

/// The default host kvregistry binds to
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// The registry file loaded when none is given
pub const DEFAULT_REGISTRY: &str = "capitals.txt";

/// Version of kvregistry
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
