//! CSV source loader.
//!
//! The export carries a header row naming the columns; fields are mapped by
//! name so column order in the file does not matter.

use std::{fs::File, io::Read, path::Path};

use csv::{ErrorKind, ReaderBuilder, StringRecord};
use tracing::{debug, info, instrument, warn};

use crate::{
    error::DirectoryError,
    record::{Directory, EmployeeRecord},
};

pub const COLUMN_ID: &str = "emp_id";
pub const COLUMN_NAME: &str = "emp_name";
pub const COLUMN_POSITION: &str = "position";
pub const COLUMN_SECTION: &str = "sec_short";
pub const COLUMN_COST_CENTER: &str = "cc_name";

const BOM: char = '\u{feff}';

/// Parse the directory source at `path`.
#[instrument(name = "directory.load", skip_all, fields(path = %path.display()))]
pub fn load(path: &Path) -> Result<Directory, DirectoryError> {
    let file = File::open(path).map_err(|source| DirectoryError::SourceUnavailable {
        path: path.to_path_buf(),
        source,
    })?;
    let directory = parse(file, path)?;
    info!(records = directory.len(), "employee directory parsed");
    Ok(directory)
}

pub(crate) fn parse<R: Read>(reader: R, path: &Path) -> Result<Directory, DirectoryError> {
    let mut csv = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);
    let mut rows = csv.records();

    let header = match rows.next() {
        Some(Ok(header)) => header,
        Some(Err(err)) => return Err(read_failure(path, err)),
        None => return Err(malformed(path, "missing header row")),
    };
    let columns = Columns::from_header(&header).map_err(|reason| malformed(path, reason))?;

    let mut directory = Directory::new();
    // line 1 is the header
    for (line, row) in (2u64..).zip(rows) {
        let row = match row {
            Ok(row) => row,
            Err(err) if err.is_io_error() => return Err(read_failure(path, err)),
            Err(err) => {
                warn!(line, error = %err, "skipping unreadable directory row");
                continue;
            }
        };
        if row.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        if row.len() != columns.width {
            warn!(
                line,
                expected = columns.width,
                found = row.len(),
                "skipping directory row with mismatched column count"
            );
            continue;
        }
        let id = field(&row, Some(columns.id));
        if id.is_empty() {
            debug!(line, "skipping directory row without employee id");
            continue;
        }
        directory.insert(EmployeeRecord {
            id,
            name: field(&row, Some(columns.name)),
            job_title: field(&row, columns.position),
            unit_short: field(&row, columns.section),
            unit_full: field(&row, columns.cost_center),
        });
    }
    Ok(directory)
}

struct Columns {
    width: usize,
    id: usize,
    name: usize,
    position: Option<usize>,
    section: Option<usize>,
    cost_center: Option<usize>,
}

impl Columns {
    fn from_header(header: &StringRecord) -> Result<Self, String> {
        let names: Vec<&str> = header
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let name = if idx == 0 {
                    name.trim_start_matches(BOM)
                } else {
                    name
                };
                name.trim()
            })
            .collect();
        if names.iter().all(|name| name.is_empty()) {
            return Err("missing header row".into());
        }
        let find = |column: &str| names.iter().position(|name| *name == column);
        let required = |column: &str| find(column).ok_or_else(|| format!("missing column `{column}`"));
        Ok(Self {
            width: names.len(),
            id: required(COLUMN_ID)?,
            name: required(COLUMN_NAME)?,
            position: find(COLUMN_POSITION),
            section: find(COLUMN_SECTION),
            cost_center: find(COLUMN_COST_CENTER),
        })
    }
}

fn field(row: &StringRecord, idx: Option<usize>) -> String {
    idx.and_then(|idx| row.get(idx))
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

fn malformed(path: &Path, reason: impl Into<String>) -> DirectoryError {
    DirectoryError::SourceMalformed {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn read_failure(path: &Path, err: csv::Error) -> DirectoryError {
    match err.into_kind() {
        ErrorKind::Io(source) => DirectoryError::SourceUnavailable {
            path: path.to_path_buf(),
            source,
        },
        other => malformed(path, format!("{other:?}")),
    }
}
