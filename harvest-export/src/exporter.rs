use crate::columns::{ColumnSet, ProfileRecord};
use crate::{BOM, ExportError, strip_bom};
use regex::Regex;
use std::ffi::OsString;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

const LINE_END: &str = "\r\n";

fn line_breaks() -> &'static Regex {
    static LINE_BREAKS: OnceLock<Regex> = OnceLock::new();
    LINE_BREAKS.get_or_init(|| Regex::new(r"[\r\n]+").expect("line-break pattern is valid"))
}

/// Quote one field. `None` becomes `""`; text has NUL stripped, line breaks
/// collapsed to a space, surrounding whitespace trimmed, and quotes doubled.
///
/// ```
/// use harvest_export::escape_field;
///
/// assert_eq!(escape_field(None), "\"\"");
/// assert_eq!(escape_field(Some(" say \"hi\"\r\nthere ")), "\"say \"\"hi\"\" there\"");
/// ```
pub fn escape_field(value: Option<&str>) -> String {
    let Some(raw) = value else {
        return "\"\"".to_string();
    };
    let without_nul = raw.replace('\0', "");
    let single_line = line_breaks().replace_all(&without_nul, " ");
    format!("\"{}\"", single_line.trim().replace('"', "\"\""))
}

/// One CRLF-terminated line of escaped fields.
pub(crate) fn encode_row<'a>(fields: impl IntoIterator<Item = Option<&'a str>>) -> String {
    let mut line = fields
        .into_iter()
        .map(escape_field)
        .collect::<Vec<_>>()
        .join(",");
    line.push_str(LINE_END);
    line
}

/// How `save` treats an existing destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Add rows below the existing header.
    #[default]
    Append,
    /// Replace the body, keeping the file's column set and byte-order mark.
    Overwrite,
}

struct ExistingHeader {
    line: String,
    had_bom: bool,
    /// Last byte of the file is `\n`.
    terminated: bool,
}

/// Writes [`ProfileRecord`] rows, negotiating the column set with whatever
/// file already sits at the destination.
#[derive(Debug, Clone, Default)]
pub struct CsvExporter {
    output_dir: Option<PathBuf>,
}

impl CsvExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative destinations against `dir`.
    pub fn with_output_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: Some(dir.into()),
        }
    }

    fn resolve(&self, destination: &Path) -> PathBuf {
        match &self.output_dir {
            Some(dir) if destination.is_relative() => dir.join(destination),
            _ => destination.to_path_buf(),
        }
    }

    /// Write `rows` to `destination` and return its absolute path.
    ///
    /// A new (or empty, or BOM-only) destination gets a byte-order mark, the
    /// full column set including Website, and the rows. An existing
    /// destination keeps the column set its header line implies. Appends go
    /// out in a single write; anything that writes a header is staged next to
    /// the destination and renamed over it.
    pub async fn save(
        &self,
        rows: &[ProfileRecord],
        destination: impl AsRef<Path>,
        mode: WriteMode,
    ) -> Result<PathBuf, ExportError> {
        let path = self.resolve(destination.as_ref());
        let write_err = |source| ExportError::Write {
            path: path.clone(),
            source,
        };

        let existing = read_header_line(&path).await?;
        let creating = existing.is_none();
        let (set, with_header, with_bom) = match (&existing, mode) {
            (None, _) => (ColumnSet::WithWebsite, true, true),
            (Some(header), WriteMode::Append) => (ColumnSet::infer(&header.line), false, false),
            (Some(header), WriteMode::Overwrite) => {
                (ColumnSet::infer(&header.line), true, header.had_bom)
            }
        };

        let mut buf = Vec::new();
        if let (Some(header), WriteMode::Append) = (&existing, mode) {
            // Keep the first new row off the last unterminated one.
            if !header.terminated {
                buf.extend_from_slice(LINE_END.as_bytes());
            }
        }
        if with_bom {
            buf.extend_from_slice(BOM);
        }
        if with_header {
            buf.extend_from_slice(encode_row(set.headers().map(Some)).as_bytes());
        }
        for row in rows {
            let fields = set
                .columns()
                .iter()
                .map(|column| Some(row.get(column.key).unwrap_or("")));
            buf.extend_from_slice(encode_row(fields).as_bytes());
        }

        if creating {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).await.map_err(write_err)?;
            }
        }

        if with_header {
            replace_file(&path, &buf).await.map_err(write_err)?;
        } else {
            let mut file = OpenOptions::new()
                .append(true)
                .open(&path)
                .await
                .map_err(write_err)?;
            file.write_all(&buf).await.map_err(write_err)?;
            file.flush().await.map_err(write_err)?;
        }

        let resolved = fs::canonicalize(&path).await.map_err(write_err)?;
        info!(
            path = %resolved.display(),
            rows = rows.len(),
            columns = set.columns().len(),
            created = creating,
            ?mode,
            "export.save"
        );
        Ok(resolved)
    }
}

/// `leads.csv` -> `leads.csv.exporting`
fn staging_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(".exporting");
    PathBuf::from(name)
}

/// Write `bytes` to a sibling and rename it over `path`, so a failed write
/// leaves the previous contents in place.
async fn replace_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let staging = staging_path(path);
    let staged = async {
        let mut file = File::create(&staging).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&staging, path).await
    }
    .await;
    if let Err(err) = staged {
        warn!(path = %path.display(), error = %err, "export.staging_failed");
        let _ = fs::remove_file(&staging).await;
        return Err(err);
    }
    Ok(())
}

/// First line of `path` without BOM or terminator. `None` when the file is
/// missing, empty, or holds nothing but a byte-order mark.
async fn read_header_line(path: &Path) -> Result<Option<ExistingHeader>, ExportError> {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ExportError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let read_err = |source| ExportError::Read {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = BufReader::new(file);
    let mut first = Vec::new();
    reader
        .read_until(b'\n', &mut first)
        .await
        .map_err(read_err)?;

    let (body, had_bom) = strip_bom(&first);
    let line = String::from_utf8_lossy(body)
        .trim_end_matches(['\r', '\n'])
        .to_string();
    if line.is_empty() {
        debug!(path = %path.display(), had_bom, "export.empty_destination");
        return Ok(None);
    }

    let mut file = reader.into_inner();
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1)).await.map_err(read_err)?;
    file.read_exact(&mut last).await.map_err(read_err)?;
    Ok(Some(ExistingHeader {
        line,
        had_bom,
        terminated: last[0] == b'\n',
    }))
}
