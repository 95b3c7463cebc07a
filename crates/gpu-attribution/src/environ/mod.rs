//! Process metadata extraction from environment blocks.
//!
//! A process's environment is a sequence of NUL terminated `NAME=value`
//! entries. [`MetadataExtractor`] reads that block through an
//! [`EnvironmentReader`], picks out the variables a caller asks for and
//! returns them under caller chosen keys.

mod procfs;

use core::error::Error;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use derive_more::Display;
use error_stack::Report;
use error_stack::ResultExt;
use tracing::debug;
use tracing::warn;

pub use self::procfs::ProcEnvironmentReader;
use crate::Pid;

/// Why the environment of a process could not be read.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentReadError {
    #[display("process {pid} does not exist")]
    NotFound { pid: Pid },
    #[display("permission denied reading environment of process {pid}")]
    PermissionDenied { pid: Pid },
    #[display("failed to read environment of process {pid}")]
    Io { pid: Pid },
}

impl Error for EnvironmentReadError {}

/// Errors that can occur during metadata extraction.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ExtractError {
    #[display("process {pid} is unavailable")]
    ProcessUnavailable { pid: Pid },
}

impl Error for ExtractError {}

/// Read only access to the raw environment block of another process.
pub trait EnvironmentReader: Send + Sync {
    /// Returns the environment block of `pid` exactly as the OS exposes it.
    fn read_raw_environment(&self, pid: Pid) -> Result<Vec<u8>, Report<EnvironmentReadError>>;
}

/// Splits a raw environment block into `(name, value)` pairs.
///
/// Entries are separated by NUL bytes and only the first `=` of an entry
/// separates name from value. Entries without `=` or with an empty name are
/// skipped.
pub fn parse_environment(raw: &[u8]) -> impl Iterator<Item = (&[u8], &[u8])> {
    raw.split(|b| *b == 0).filter_map(|entry| {
        let mut split = entry.splitn(2, |b| *b == b'=');
        match (split.next(), split.next()) {
            (Some(name), Some(value)) if !name.is_empty() => Some((name, value)),
            _ => None,
        }
    })
}

/// First occurrence of every variable name in the block.
fn index_environment(raw: &[u8]) -> HashMap<&[u8], &[u8]> {
    let mut index = HashMap::new();
    for (name, value) in parse_environment(raw) {
        match index.entry(name) {
            Entry::Vacant(entry) => {
                entry.insert(value);
            }
            Entry::Occupied(_) => {
                debug!(
                    name = %String::from_utf8_lossy(name),
                    "Duplicate environment variable, keeping first occurrence"
                );
            }
        }
    }
    index
}

/// Applies a lookup table to a raw environment block.
///
/// `lookup` maps variable names to output keys. Names absent from the block
/// produce no entry.
pub fn apply_lookup(raw: &[u8], lookup: &HashMap<String, String>) -> HashMap<String, String> {
    if lookup.is_empty() {
        return HashMap::new();
    }

    let index = index_environment(raw);
    let mut metadata = HashMap::with_capacity(lookup.len());
    for (name, output_key) in lookup {
        if let Some(value) = index.get(name.as_bytes()) {
            metadata.insert(
                output_key.clone(),
                String::from_utf8_lossy(value).into_owned(),
            );
        }
    }
    metadata
}

/// Extracts caller selected environment variables from other processes.
pub struct MetadataExtractor<R> {
    reader: R,
}

impl<R: EnvironmentReader> MetadataExtractor<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Returns `output_key -> value` for every `(name, output_key)` in
    /// `lookup` whose variable is set in the environment of `pid`.
    ///
    /// When a variable appears more than once in the environment, the first
    /// occurrence is used.
    ///
    /// # Errors
    ///
    /// - [`ExtractError::ProcessUnavailable`] if `pid` is not a valid process
    ///   id, the process has exited or the caller may not read its
    ///   environment. The report carries the underlying
    ///   [`EnvironmentReadError`].
    ///
    /// An environment that exists but fails to read
    /// ([`EnvironmentReadError::Io`]) yields an empty mapping.
    #[tracing::instrument(level = "debug", skip(self, lookup), fields(keys = lookup.len()))]
    pub fn extract_metadata(
        &self,
        pid: Pid,
        lookup: &HashMap<String, String>,
    ) -> Result<HashMap<String, String>, Report<ExtractError>> {
        if pid <= 0 {
            return Err(Report::new(ExtractError::ProcessUnavailable { pid })
                .attach_printable(format!("{pid} is not a valid process id")));
        }

        let raw = match self.reader.read_raw_environment(pid) {
            Ok(raw) => raw,
            Err(report)
                if matches!(report.current_context(), EnvironmentReadError::Io { .. }) =>
            {
                // the process exists, its block just could not be read
                warn!(error = ?report, "Unreadable environment, treating as empty");
                Vec::new()
            }
            Err(report) => {
                return Err(report.change_context(ExtractError::ProcessUnavailable { pid }));
            }
        };

        let metadata = apply_lookup(&raw, lookup);
        debug!(found = metadata.len(), "Extracted process metadata");
        Ok(metadata)
    }
}
