//! In-Memory Key/Value Registry
//!
//! This module implements the registry that backs the server: an
//! insertion-ordered list of entries with unique keys and a fixed update
//! policy.
//!
//! ## Design Decisions
//!
//! 1. **Single Owner**: The registry is owned by the command handler and only
//!    touched from the server loop, so it needs no locks.
//! 2. **Insertion Order**: Entries are kept in a `Vec` and looked up linearly.
//!    Updates replace the value in place, so an entry never moves.
//! 3. **Policy at Construction**: Whether existing keys can be overwritten is
//!    decided once with [`UpdatePolicy`] and never changes afterwards.
//! 4. **Validated Entries**: `put` checks every key and value against the
//!    line grammar, so no entry can hold a key the parser would refuse.
//!
//! ## File Loading
//!
//! ```text
//! line 1:  Hungary Budapest      -> put("Hungary", "Budapest")
//! line 2:                        -> skipped (blank)
//! line 3:  Aus#tria Vienna       -> abort: invalid key at [3,4]
//! ```
//!
//! Loading stops at the first malformed line. Entries from earlier lines stay
//! in the registry.

use crate::protocol::{is_blank, parse_line, validate, ParseError};
use bytes::Bytes;
use std::cell::Cell;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Whether existing keys may be overwritten by `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatePolicy {
    /// Existing values are replaced silently
    #[default]
    Allow,
    /// Existing keys are rejected with [`RegistryError::KeyExists`]
    Strict,
}

impl UpdatePolicy {
    /// Returns true if existing values may be replaced.
    pub fn allows_update(self) -> bool {
        matches!(self, UpdatePolicy::Allow)
    }
}

/// A stored key/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The key, already validated by the line parser
    pub key: String,
    /// The stored value
    pub value: Bytes,
}

/// What a successful `put` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// A new entry was appended
    Inserted,
    /// An existing entry's value was replaced
    Updated,
}

/// Errors returned by registry lookups and updates.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("key [{0}] not found")]
    KeyNotFound(String),

    #[error("key [{0}] already exists")]
    KeyExists(String),

    #[error("invalid entry: {0}")]
    Invalid(ParseError),
}

/// Errors that abort loading a registry file.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file could not be opened
    #[error("can't open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Reading failed part way through the file
    #[error("read error at line {line}: {source}")]
    Read {
        line: usize,
        #[source]
        source: io::Error,
    },

    /// A line did not match the key/value grammar
    #[error("parse error at [{line},{}]: {error}", .error.position())]
    Parse { line: usize, error: ParseError },
}

impl LoadError {
    /// Returns the 1-based line number of the failure, if it has one.
    pub fn line(&self) -> Option<usize> {
        match self {
            LoadError::Open { .. } => None,
            LoadError::Read { line, .. } | LoadError::Parse { line, .. } => Some(*line),
        }
    }

    /// Returns the 1-based character position of a parse failure.
    pub fn position(&self) -> Option<usize> {
        match self {
            LoadError::Parse { error, .. } => Some(error.position()),
            _ => None,
        }
    }

    /// Formats the error the way the server reports it before exiting.
    pub fn startup_message(&self) -> String {
        match self {
            LoadError::Open { path, .. } => format!("Can't open {}", path.display()),
            LoadError::Read { line, source } => {
                format!("Read error at line {}: {}", line, source)
            }
            LoadError::Parse { line, error } => {
                let what = match error {
                    ParseError::KeyEmpty { .. } => "Missing key",
                    ParseError::KeyInvalid { .. } | ParseError::ValueInvalid { .. } => {
                        "Invalid character found"
                    }
                    ParseError::KeyTooLong { .. } => "Long key found",
                    ParseError::ValueTooLong { .. } => "Long value found",
                };
                format!("{} at [{},{}]", what, line, error.position())
            }
        }
    }
}

/// Operation counters kept by the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Successful lookups
    pub hits: u64,
    /// Lookups for missing keys
    pub misses: u64,
    /// New entries appended
    pub inserts: u64,
    /// Values replaced in place
    pub updates: u64,
    /// Puts refused because the key existed in strict mode
    pub rejected: u64,
}

/// The key/value registry.
///
/// # Example
///
/// ```
/// use kvregistry::storage::{Registry, RegistryError, UpdatePolicy};
/// use bytes::Bytes;
///
/// let mut registry = Registry::new(UpdatePolicy::Strict);
/// registry.put("Hungary".to_string(), Bytes::from("Budapest")).unwrap();
///
/// let err = registry.put("Hungary".to_string(), Bytes::from("Pest")).unwrap_err();
/// assert_eq!(err, RegistryError::KeyExists("Hungary".to_string()));
/// assert_eq!(registry.get("Hungary").unwrap(), &Bytes::from("Budapest"));
/// ```
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<Entry>,
    policy: UpdatePolicy,
    stats: Cell<RegistryStats>,
}

impl Registry {
    /// Creates an empty registry with the given update policy.
    pub fn new(policy: UpdatePolicy) -> Self {
        Self {
            entries: Vec::new(),
            policy,
            stats: Cell::new(RegistryStats::default()),
        }
    }

    /// Returns the update policy.
    pub fn policy(&self) -> UpdatePolicy {
        self.policy
    }

    /// Returns the operation counters.
    pub fn stats(&self) -> RegistryStats {
        self.stats.get()
    }

    fn record(&self, update: impl FnOnce(&mut RegistryStats)) {
        let mut stats = self.stats.get();
        update(&mut stats);
        self.stats.set(stats);
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the registry holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.key == key)
    }

    /// Looks up the value stored under `key` (exact, case-sensitive match).
    pub fn get(&self, key: &str) -> Result<&Bytes, RegistryError> {
        match self.position(key) {
            Some(idx) => {
                self.record(|s| s.hits += 1);
                Ok(&self.entries[idx].value)
            }
            None => {
                self.record(|s| s.misses += 1);
                Err(RegistryError::KeyNotFound(key.to_string()))
            }
        }
    }

    /// Stores a value under `key`.
    ///
    /// The pair must satisfy the line grammar, otherwise
    /// [`RegistryError::Invalid`] is returned. New keys are appended. Existing
    /// keys are updated in place under [`UpdatePolicy::Allow`] and rejected
    /// under [`UpdatePolicy::Strict`].
    pub fn put(&mut self, key: String, value: Bytes) -> Result<PutOutcome, RegistryError> {
        validate(key.as_bytes(), &value).map_err(RegistryError::Invalid)?;

        match self.position(&key) {
            Some(_) if !self.policy.allows_update() => {
                self.record(|s| s.rejected += 1);
                Err(RegistryError::KeyExists(key))
            }
            Some(idx) => {
                self.entries[idx].value = value;
                self.record(|s| s.updates += 1);
                Ok(PutOutcome::Updated)
            }
            None => {
                self.entries.push(Entry { key, value });
                self.record(|s| s.inserts += 1);
                Ok(PutOutcome::Inserted)
            }
        }
    }

    /// Loads entries from a registry file.
    ///
    /// Returns the number of lines stored.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<usize, LoadError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| LoadError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        self.load_from_reader(BufReader::new(file))
    }

    /// Loads entries from any buffered reader.
    ///
    /// Blank lines are skipped but still counted for line numbers. The first
    /// malformed line aborts the load.
    pub fn load_from_reader<R: BufRead>(&mut self, mut reader: R) -> Result<usize, LoadError> {
        let mut line = Vec::new();
        let mut line_no = 0;
        let mut loaded = 0;

        loop {
            line.clear();
            let n = reader
                .read_until(b'\n', &mut line)
                .map_err(|source| LoadError::Read {
                    line: line_no + 1,
                    source,
                })?;
            if n == 0 {
                break;
            }
            line_no += 1;

            if is_blank(&line) {
                continue;
            }

            let kv = parse_line(&line).map_err(|error| LoadError::Parse {
                line: line_no,
                error,
            })?;

            match self.put(kv.key, kv.value) {
                Ok(_) => loaded += 1,
                Err(RegistryError::Invalid(error)) => {
                    return Err(LoadError::Parse {
                        line: line_no,
                        error,
                    })
                }
                Err(e) => warn!(line = line_no, error = %e, "Duplicate key ignored"),
            }
        }

        debug!(lines = line_no, loaded, "Registry file read");
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn bytes(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_put_and_get() {
        let mut registry = Registry::new(UpdatePolicy::Allow);

        assert_eq!(
            registry.put("Hungary".into(), bytes("Budapest")),
            Ok(PutOutcome::Inserted)
        );
        assert_eq!(registry.get("Hungary"), Ok(&bytes("Budapest")));
    }

    #[test]
    fn test_get_nonexistent() {
        let registry = Registry::default();
        assert_eq!(
            registry.get("Narnia"),
            Err(RegistryError::KeyNotFound("Narnia".to_string()))
        );
        assert_eq!(registry.stats().misses, 1);
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let mut registry = Registry::default();
        registry.put("Hungary".into(), bytes("Budapest")).unwrap();

        assert!(registry.get("hungary").is_err());
        assert!(registry.get("Hungary").is_ok());
    }

    #[test]
    fn test_put_rejects_invalid_entries() {
        let mut registry = Registry::default();

        assert_eq!(
            registry.put(String::new(), bytes("x")),
            Err(RegistryError::Invalid(ParseError::KeyEmpty { position: 1 }))
        );
        assert_eq!(
            registry.put("not a valid key because it is long!".into(), bytes("x")),
            Err(RegistryError::Invalid(ParseError::KeyInvalid { position: 4 }))
        );
        assert_eq!(
            registry.put("a".repeat(17), bytes("x")),
            Err(RegistryError::Invalid(ParseError::KeyTooLong { position: 17 }))
        );
        assert_eq!(
            registry.put("K".into(), Bytes::from("x".repeat(100))),
            Err(RegistryError::Invalid(ParseError::ValueTooLong { position: 35 }))
        );
        assert_eq!(
            registry.put("K".into(), bytes("two\nlines")),
            Err(RegistryError::Invalid(ParseError::ValueInvalid { position: 6 }))
        );

        assert!(registry.is_empty());
        assert_eq!(registry.stats(), RegistryStats::default());
    }

    #[test]
    fn test_put_accepts_limits() {
        let mut registry = Registry::default();

        assert_eq!(
            registry.put("k".repeat(16), Bytes::from("v".repeat(32))),
            Ok(PutOutcome::Inserted)
        );
        assert_eq!(registry.put("Empty".into(), Bytes::new()), Ok(PutOutcome::Inserted));
    }

    #[test]
    fn test_get_counts_through_shared_reference() {
        let mut registry = Registry::default();
        registry.put("K".into(), bytes("V")).unwrap();

        let shared = &registry;
        assert!(shared.get("K").is_ok());
        assert!(shared.get("K").is_ok());
        assert!(shared.get("X").is_err());

        let stats = registry.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.inserts, 1);
    }

    #[test]
    fn test_update_allowed() {
        let mut registry = Registry::new(UpdatePolicy::Allow);

        registry.put("K".into(), bytes("V1")).unwrap();
        assert_eq!(registry.put("K".into(), bytes("V2")), Ok(PutOutcome::Updated));
        assert_eq!(registry.get("K"), Ok(&bytes("V2")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_update_rejected_in_strict_mode() {
        let mut registry = Registry::new(UpdatePolicy::Strict);

        registry.put("K".into(), bytes("V1")).unwrap();
        assert_eq!(
            registry.put("K".into(), bytes("V2")),
            Err(RegistryError::KeyExists("K".to_string()))
        );
        assert_eq!(registry.get("K"), Ok(&bytes("V1")));
        assert_eq!(registry.stats().rejected, 1);
    }

    #[test]
    fn test_update_keeps_insertion_order() {
        let mut registry = Registry::new(UpdatePolicy::Allow);
        for key in ["a", "b", "c"] {
            registry.put(key.into(), bytes("0")).unwrap();
        }
        registry.put("a".into(), bytes("1")).unwrap();

        let keys: Vec<_> = registry.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(registry.iter().next().unwrap().value, bytes("1"));
    }

    #[test]
    fn test_load_from_reader() {
        let data = "Hungary Budapest\n\n  Austria Vienna\r\nIceland\nUSA Washington D.C.";
        let mut registry = Registry::default();

        let loaded = registry.load_from_reader(Cursor::new(data)).unwrap();

        assert_eq!(loaded, 4);
        assert_eq!(registry.get("Hungary"), Ok(&bytes("Budapest")));
        assert_eq!(registry.get("Austria"), Ok(&bytes("Vienna")));
        assert_eq!(registry.get("Iceland"), Ok(&Bytes::new()));
        assert_eq!(registry.get("USA"), Ok(&bytes("Washington D.C.")));
    }

    #[test]
    fn test_load_skips_whitespace_only_lines() {
        let data = "A 1\n   \r\n\r\nB 2\n";
        let mut registry = Registry::default();

        assert_eq!(registry.load_from_reader(Cursor::new(data)).unwrap(), 2);
    }

    #[test]
    fn test_load_reports_line_and_position() {
        let data = "Hungary Budapest\n\nAus#tria Vienna\nPeru Lima\n";
        let mut registry = Registry::default();

        let err = registry.load_from_reader(Cursor::new(data)).unwrap_err();

        assert!(matches!(
            err,
            LoadError::Parse {
                line: 3,
                error: ParseError::KeyInvalid { position: 4 }
            }
        ));
        assert_eq!(err.line(), Some(3));
        assert_eq!(err.position(), Some(4));

        // earlier lines stay, later ones never load
        assert!(registry.get("Hungary").is_ok());
        assert!(registry.get("Peru").is_err());
    }

    #[test]
    fn test_load_rejects_long_key_and_value() {
        let mut registry = Registry::default();
        let err = registry
            .load_from_reader(Cursor::new("abcdefghijklmnopq x\n"))
            .unwrap_err();
        assert_eq!(err.position(), Some(17));

        let line = format!("Key {}\n", "v".repeat(33));
        let err = registry.load_from_reader(Cursor::new(line)).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Parse {
                line: 1,
                error: ParseError::ValueTooLong { position: 37 }
            }
        ));
    }

    #[test]
    fn test_load_duplicate_in_strict_mode_keeps_first() {
        let mut registry = Registry::new(UpdatePolicy::Strict);

        let loaded = registry
            .load_from_reader(Cursor::new("K first\nK second\n"))
            .unwrap();

        assert_eq!(loaded, 1);
        assert_eq!(registry.get("K"), Ok(&bytes("first")));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capitals.txt");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "Hungary Budapest").unwrap();
        writeln!(file, "Japan Tokyo").unwrap();
        drop(file);

        let mut registry = Registry::default();
        assert_eq!(registry.load(&path).unwrap(), 2);
        assert_eq!(registry.get("Japan"), Ok(&bytes("Tokyo")));
    }

    #[test]
    fn test_load_rejects_line_break_in_value() {
        let mut registry = Registry::default();

        let err = registry
            .load_from_reader(Cursor::new("Ok fine\nKey a\rb\n"))
            .unwrap_err();

        assert!(matches!(
            err,
            LoadError::Parse {
                line: 2,
                error: ParseError::ValueInvalid { position: 6 }
            }
        ));
    }

    #[test]
    fn test_startup_messages() {
        let mut registry = Registry::default();
        let mut message = |data: &str| {
            registry
                .load_from_reader(Cursor::new(data.to_string()))
                .unwrap_err()
                .startup_message()
        };

        assert_eq!(message("A 1\n  -x 2\n"), "Invalid character found at [2,1]");
        assert_eq!(message("Hun#gary x\n"), "Invalid character found at [1,4]");
        assert_eq!(message("Key a\rb\n"), "Invalid character found at [1,6]");
        assert_eq!(
            message(&format!("{} x\n", "k".repeat(17))),
            "Long key found at [1,17]"
        );
        assert_eq!(
            message(&format!("\nK {}\n", "v".repeat(33))),
            "Long value found at [2,35]"
        );

        let missing_key = LoadError::Parse {
            line: 3,
            error: ParseError::KeyEmpty { position: 1 },
        };
        assert_eq!(missing_key.startup_message(), "Missing key at [3,1]");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.txt");
        let err = registry.load(&path).unwrap_err();
        assert_eq!(err.startup_message(), format!("Can't open {}", path.display()));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = Registry::default();

        let err = registry.load(dir.path().join("missing.txt")).unwrap_err();
        assert!(matches!(err, LoadError::Open { .. }));
        assert_eq!(err.line(), None);
    }
}
