//! Append-only CSV output

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::Result;
use crate::types::{Identifier, Record};

#[derive(Debug)]
struct SinkState {
    writer: csv::Writer<File>,
    processed: HashSet<Identifier>,
    appended: usize,
}

/// CSV result file plus the in-memory set of identifiers it already holds.
///
/// The file is opened in append mode; rows are never rewritten. All appends
/// go through one mutex, so concurrent workers cannot interleave rows.
#[derive(Debug)]
pub struct ResultSink {
    path: PathBuf,
    state: Mutex<SinkState>,
}

impl ResultSink {
    /// Open (or create) the result file at `path`.
    ///
    /// Existing rows are scanned once to build the processed set. The header
    /// row is written only when the file is empty. Existing bytes are never
    /// rewritten: a file that does not end in a line terminator gets one
    /// before the first new row.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let existing = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let unterminated = !existing.is_empty() && !existing.ends_with(b"\n");
        let processed = processed_ids(&existing, unterminated)?;

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if unterminated {
            tracing::warn!(
                path = %path.display(),
                "result file does not end in a newline, terminating its last row"
            );
            file.write_all(b"\n")?;
        }
        let mut writer = csv::Writer::from_writer(file);
        if existing.is_empty() {
            writer.write_record(Record::HEADER)?;
            writer.flush()?;
        }

        tracing::info!(
            path = %path.display(),
            existing = processed.len(),
            "opened result sink"
        );

        Ok(Self {
            path,
            state: Mutex::new(SinkState {
                writer,
                processed,
                appended: 0,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Location of the result file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a row for `id` exists.
    pub fn has(&self, id: &Identifier) -> bool {
        self.lock().processed.contains(id)
    }

    /// Number of identifiers with a row, old and new.
    pub fn len(&self) -> usize {
        self.lock().processed.len()
    }

    /// True when the file holds no data rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows appended through this handle.
    pub fn appended(&self) -> usize {
        self.lock().appended
    }

    /// Write one row and flush it to the file.
    ///
    /// Uniqueness is not enforced here; callers check [`has`](Self::has) first.
    pub fn append(&self, record: &Record) -> Result<()> {
        let mut state = self.lock();
        state.writer.write_record(record.to_row())?;
        state.writer.flush()?;
        state.processed.insert(record.user_id.clone());
        state.appended += 1;
        Ok(())
    }
}

/// First column of every data row.
///
/// With `unterminated`, a last row holding fewer fields than the header is a
/// fragment of an interrupted write and does not count.
fn processed_ids(contents: &[u8], unterminated: bool) -> Result<HashSet<Identifier>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(contents);

    let mut processed = HashSet::new();
    let mut rows = reader.records().peekable();
    while let Some(row) = rows.next() {
        let row = row?;
        if unterminated && rows.peek().is_none() && row.len() < Record::HEADER.len() {
            tracing::warn!(fragment = ?row, "ignoring incomplete trailing row");
            break;
        }
        if let Some(id) = row.get(0).filter(|id| !id.trim().is_empty()) {
            processed.insert(Identifier::new(id));
        }
    }
    Ok(processed)
}
