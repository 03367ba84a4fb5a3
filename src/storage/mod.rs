//! Storage Module
//!
//! This module provides the in-memory key/value registry served by
//! kvregistry, and the loader that seeds it from a flat file at startup.
//!
//! ## Features
//!
//! - **Insertion Ordered**: Entries keep the order they were first stored in
//! - **Unique Keys**: At most one entry per exact (case-sensitive) key
//! - **Update Policy**: Overwrites are either allowed or rejected, fixed at startup
//! - **File Seeding**: `KEY VALUE` lines, validated with the shared line parser
//!
//! ## Example
//!
//! ```
//! use kvregistry::storage::{Registry, UpdatePolicy};
//! use bytes::Bytes;
//! use std::io::Cursor;
//!
//! let mut registry = Registry::new(UpdatePolicy::Allow);
//! registry
//!     .load_from_reader(Cursor::new("Hungary Budapest\nJapan Tokyo\n"))
//!     .unwrap();
//!
//! registry.put("Japan".to_string(), Bytes::from("Kyoto")).unwrap();
//! assert_eq!(registry.get("Japan").unwrap(), &Bytes::from("Kyoto"));
//! ```

pub mod registry;

// Re-export commonly used types
pub use registry::{
    Entry, LoadError, PutOutcome, Registry, RegistryError, RegistryStats, UpdatePolicy,
};
