//! CSV export for scraped profile records.
//!
//! - [`columns`]: the canonical column set, aliases, and [`ProfileRecord`]
//! - [`exporter`]: append-or-create writer with column-set negotiation
//! - [`migrate`]: rewrites legacy files to the canonical header
//!
//! Files are UTF-8 with an optional byte-order mark, CRLF line endings, and
//! every field double-quoted. No locking is taken on destination files;
//! concurrent writers from separate processes are not supported.
pub mod columns;
pub mod exporter;
pub mod migrate;

use std::path::PathBuf;

pub use columns::{CANONICAL_COLUMNS, ColumnDescriptor, ColumnSet, ProfileRecord};
pub use exporter::{CsvExporter, WriteMode, escape_field};
pub use migrate::{MigrationOutcome, SchemaMigrator};

pub(crate) const BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum MigrationError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("backup {} could not be written; {} left untouched: {source}", backup.display(), path.display())]
    Backup {
        path: PathBuf,
        backup: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to rewrite {} (backup kept at {}): {source}", path.display(), backup.display())]
    Write {
        path: PathBuf,
        backup: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn strip_bom(bytes: &[u8]) -> (&[u8], bool) {
    match bytes.strip_prefix(BOM) {
        Some(rest) => (rest, true),
        None => (bytes, false),
    }
}
