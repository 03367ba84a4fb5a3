//! Server configuration, parsed from the command line.

use crate::connection::Framing;
use crate::storage::UpdatePolicy;
use crate::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_REGISTRY};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::warn;

/// Lowest port the server agrees to listen on
pub const MIN_PORT: i64 = 1024;

/// Highest valid TCP port
pub const MAX_PORT: i64 = u16::MAX as i64;

/// Framing mode as given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FramingArg {
    /// One command per newline-terminated line
    Lines,
    /// One command per socket read
    SingleRead,
}

impl From<FramingArg> for Framing {
    fn from(arg: FramingArg) -> Self {
        match arg {
            FramingArg::Lines => Framing::Lines,
            FramingArg::SingleRead => Framing::SingleRead,
        }
    }
}

/// Command-line configuration of the registry server.
#[derive(Debug, Clone, Parser)]
#[command(name = "kvregistry", author, version, about, long_about = None)]
pub struct Config {
    /// Port to listen on (1024-65535, anything else falls back to the default)
    #[arg(short, long, default_value_t = DEFAULT_PORT as i64, allow_negative_numbers = true)]
    pub port: i64,

    /// Registry file loaded at startup
    #[arg(short, long, default_value = DEFAULT_REGISTRY)]
    pub file: PathBuf,

    /// Address to bind to
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Reject PUT for keys that already exist
    #[arg(long)]
    pub strict: bool,

    /// How incoming bytes are split into commands
    #[arg(long, value_enum, default_value_t = FramingArg::Lines)]
    pub framing: FramingArg,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT as i64,
            file: PathBuf::from(DEFAULT_REGISTRY),
            host: DEFAULT_HOST.to_string(),
            strict: false,
            framing: FramingArg::Lines,
        }
    }
}

impl Config {
    /// Parse configuration from command-line arguments
    pub fn from_args() -> Self {
        Config::parse()
    }

    /// Returns the port to listen on, falling back to the default when the
    /// requested one is out of range.
    pub fn listen_port(&self) -> u16 {
        if (MIN_PORT..=MAX_PORT).contains(&self.port) {
            self.port as u16
        } else {
            warn!(
                requested = self.port,
                default = DEFAULT_PORT,
                "Port out of range, using default"
            );
            DEFAULT_PORT
        }
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.listen_port())
    }

    pub fn update_policy(&self) -> UpdatePolicy {
        if self.strict {
            UpdatePolicy::Strict
        } else {
            UpdatePolicy::Allow
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing.into()
    }
}
