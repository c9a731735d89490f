use crate::columns::{CANONICAL_COLUMNS, EMAIL_HEADER};
use crate::exporter::encode_row;
use crate::{BOM, MigrationError, strip_bom};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

pub const DEFAULT_BACKUP_SUFFIX: &str = ".bak";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Header already canonical and Email-free; the file was not touched.
    Unchanged,
    Migrated {
        backup: PathBuf,
        rows: usize,
        /// Original headers kept after the canonical columns.
        carried_columns: Vec<String>,
    },
}

/// Rewrites legacy CSV files onto the canonical header.
#[derive(Debug, Clone)]
pub struct SchemaMigrator {
    backup_suffix: String,
}

impl Default for SchemaMigrator {
    fn default() -> Self {
        Self {
            backup_suffix: DEFAULT_BACKUP_SUFFIX.to_string(),
        }
    }
}

/// Where each output column pulls its value from.
struct ColumnPlan {
    /// Per canonical column, original indexes ordered by alias priority,
    /// then by header position among equal aliases.
    canonical: Vec<Vec<usize>>,
    /// Unconsumed, non-email original indexes in order of appearance.
    carried: Vec<usize>,
}

impl ColumnPlan {
    fn build(header: &[String]) -> Self {
        let mut consumed = vec![false; header.len()];
        let mut seen_carried: Vec<String> = Vec::new();

        let mut canonical = Vec::with_capacity(CANONICAL_COLUMNS.len());
        for column in CANONICAL_COLUMNS.iter() {
            let mut sources = Vec::new();
            for alias in column.aliases {
                if alias.eq_ignore_ascii_case(EMAIL_HEADER) {
                    continue;
                }
                for (idx, name) in header.iter().enumerate() {
                    if !consumed[idx] && name.trim().eq_ignore_ascii_case(alias) {
                        consumed[idx] = true;
                        sources.push(idx);
                    }
                }
            }
            canonical.push(sources);
        }

        let mut carried = Vec::new();
        for (idx, name) in header.iter().enumerate() {
            let trimmed = name.trim();
            if consumed[idx] || trimmed.eq_ignore_ascii_case(EMAIL_HEADER) {
                continue;
            }
            // Repeated headers collapse onto their first occurrence.
            if seen_carried.iter().any(|s| s.eq_ignore_ascii_case(trimmed)) {
                continue;
            }
            seen_carried.push(trimmed.to_string());
            carried.push(idx);
        }

        Self { canonical, carried }
    }
}

/// `contacts.csv` -> `contacts.csv.migrating`, whatever the backup suffix.
fn staging_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(".migrating");
    PathBuf::from(name)
}

fn is_canonical(header: &[String]) -> bool {
    let has_email = header
        .iter()
        .any(|h| h.trim().eq_ignore_ascii_case(EMAIL_HEADER));
    let leading_match = header.len() >= CANONICAL_COLUMNS.len()
        && CANONICAL_COLUMNS
            .iter()
            .zip(header)
            .all(|(column, h)| h.trim().eq_ignore_ascii_case(column.header));
    !has_email && leading_match
}

impl SchemaMigrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backup_suffix(suffix: impl Into<String>) -> Self {
        Self {
            backup_suffix: suffix.into(),
        }
    }

    /// `contacts.csv` -> `contacts.csv.bak`
    pub fn backup_path(&self, path: &Path) -> PathBuf {
        let mut name: OsString = path.as_os_str().to_os_string();
        name.push(&self.backup_suffix);
        PathBuf::from(name)
    }

    pub async fn migrate(&self, path: &Path) -> Result<MigrationOutcome, MigrationError> {
        let raw = fs::read(path).await.map_err(|source| MigrationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let (body, _) = strip_bom(&raw);

        let parse_err = |source| MigrationError::Parse {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(body);
        let mut records = reader.records();
        let header: Vec<String> = match records.next() {
            None => return Ok(MigrationOutcome::Unchanged),
            Some(record) => record.map_err(parse_err)?.iter().map(str::to_string).collect(),
        };

        if is_canonical(&header) {
            info!(path = %path.display(), "migrate.unchanged");
            return Ok(MigrationOutcome::Unchanged);
        }

        let plan = ColumnPlan::build(&header);
        let mut out = Vec::from(BOM);
        let headers = CANONICAL_COLUMNS
            .iter()
            .map(|c| Some(c.header))
            .chain(plan.carried.iter().map(|&idx| Some(header[idx].trim())));
        out.extend_from_slice(encode_row(headers).as_bytes());

        let mut rows = 0;
        for record in records {
            let record = record.map_err(parse_err)?;
            // Short rows read as empty cells; cells past the header are dropped.
            let cell = |idx: usize| record.get(idx).unwrap_or("");
            let canonical = plan.canonical.iter().map(|sources| {
                Some(
                    sources
                        .iter()
                        .map(|&idx| cell(idx))
                        .find(|value| !value.trim().is_empty())
                        .unwrap_or(""),
                )
            });
            let carried = plan.carried.iter().map(|&idx| Some(cell(idx)));
            out.extend_from_slice(encode_row(canonical.chain(carried)).as_bytes());
            rows += 1;
        }

        let backup = self.backup_path(path);
        if let Err(source) = fs::write(&backup, &raw).await {
            warn!(
                path = %path.display(),
                backup = %backup.display(),
                error = %source,
                "migrate.backup_failed"
            );
            return Err(MigrationError::Backup {
                path: path.to_path_buf(),
                backup,
                source,
            });
        }

        let staging = staging_path(path);
        let write_err = |source| MigrationError::Write {
            path: path.to_path_buf(),
            backup: backup.clone(),
            source,
        };
        fs::write(&staging, &out).await.map_err(write_err)?;
        if let Err(source) = fs::rename(&staging, path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(write_err(source));
        }

        let carried_columns: Vec<String> = plan
            .carried
            .iter()
            .map(|&idx| header[idx].trim().to_string())
            .collect();
        info!(
            path = %path.display(),
            backup = %backup.display(),
            rows,
            carried = carried_columns.len(),
            "migrate.rewritten"
        );
        Ok(MigrationOutcome::Migrated {
            backup,
            rows,
            carried_columns,
        })
    }

    /// Migrate every `*.csv` directly under `dir`. One file failing does not
    /// stop the rest.
    pub async fn migrate_dir(
        &self,
        dir: &Path,
    ) -> Result<Vec<(PathBuf, Result<MigrationOutcome, MigrationError>)>, MigrationError> {
        let mut entries = fs::read_dir(dir).await.map_err(|source| MigrationError::Read {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths = Vec::new();
        loop {
            let entry = entries
                .next_entry()
                .await
                .map_err(|source| MigrationError::Read {
                    path: dir.to_path_buf(),
                    source,
                })?;
            let Some(entry) = entry else { break };
            let path = entry.path();
            let is_csv = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
            if is_csv && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut results = Vec::with_capacity(paths.len());
        for path in paths {
            let outcome = self.migrate(&path).await;
            results.push((path, outcome));
        }
        Ok(results)
    }
}
