//! Durable set of identifiers still waiting to be fetched
//!
//! The base file holds one identifier per line and is only ever replaced
//! whole (temp file, fsync, rename). Removals are appended to a side log,
//! `<base>.removed`, and folded into the base file every `compact_every`
//! removals or on an explicit [`IdentifierStore::compact`].

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::Result;
use crate::types::Identifier;

#[derive(Debug, Default)]
struct StoreState {
    /// Every identifier ever seeded, in order; slots are never reused.
    entries: Vec<Identifier>,
    removed: Vec<bool>,
    index: HashMap<Identifier, usize>,
    live: usize,
    /// Lines appended to the removal log since the last compaction
    logged: usize,
    log: Option<File>,
}

impl StoreState {
    fn from_entries(ids: impl IntoIterator<Item = Identifier>) -> Self {
        let mut state = StoreState::default();
        for id in ids {
            if id.as_str().is_empty() || state.index.contains_key(&id) {
                continue;
            }
            state.index.insert(id.clone(), state.entries.len());
            state.entries.push(id);
            state.removed.push(false);
            state.live += 1;
        }
        state
    }

    fn live_slot(&self, id: &Identifier) -> Option<usize> {
        self.index
            .get(id)
            .copied()
            .filter(|&slot| !self.removed[slot])
    }

    fn mark_removed(&mut self, id: &Identifier) -> bool {
        match self.live_slot(id) {
            Some(slot) => {
                self.removed[slot] = true;
                self.live -= 1;
                true
            }
            None => false,
        }
    }

    fn pending(&self) -> impl Iterator<Item = &Identifier> {
        self.entries
            .iter()
            .zip(&self.removed)
            .filter(|(_, removed)| !**removed)
            .map(|(id, _)| id)
    }
}

/// Persisted Pending Set.
#[derive(Debug)]
pub struct IdentifierStore {
    path: PathBuf,
    log_path: PathBuf,
    compact_every: usize,
    state: Mutex<StoreState>,
}

impl IdentifierStore {
    /// Open the store at `path`. A missing file is an empty store; nothing is
    /// created until the first [`seed`](Self::seed) or removal.
    pub fn open(path: impl Into<PathBuf>, compact_every: usize) -> Result<Self> {
        let path = path.into();
        let log_path = removal_log_path(&path);

        let base = read_optional(&path)?;
        let mut state = StoreState::from_entries(base.lines().map(Identifier::new));

        let log = read_optional(&log_path)?;
        for line in complete_lines(&log) {
            state.mark_removed(&Identifier::new(line));
        }

        tracing::debug!(
            path = %path.display(),
            pending = state.live,
            "opened identifier store"
        );

        Ok(Self {
            path,
            log_path,
            compact_every: compact_every.max(1),
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pending identifiers in the order they were seeded.
    pub fn load(&self) -> Vec<Identifier> {
        self.lock().pending().cloned().collect()
    }

    /// Number of pending identifiers.
    pub fn len(&self) -> usize {
        self.lock().live
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` is still pending.
    pub fn contains(&self, id: &Identifier) -> bool {
        self.lock().live_slot(id).is_some()
    }

    /// Replace the whole store with `ids`. Blank and repeated identifiers are dropped.
    pub fn seed(&self, ids: &[Identifier]) -> Result<()> {
        let mut state = self.lock();
        let fresh = StoreState::from_entries(ids.iter().cloned());
        write_atomically(&self.path, &render(fresh.pending()))?;
        remove_if_exists(&self.log_path)?;
        *state = fresh;
        tracing::info!(
            path = %self.path.display(),
            count = state.live,
            "seeded identifier store"
        );
        Ok(())
    }

    /// Drop `id` from the pending set. Returns false when it was not pending.
    pub fn remove(&self, id: &Identifier) -> Result<bool> {
        let mut state = self.lock();
        if state.live_slot(id).is_none() {
            return Ok(false);
        }

        // Durable first: a failed log write leaves the identifier pending
        if state.log.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_path)?;
            state.log = Some(file);
        }
        if let Some(log) = state.log.as_mut() {
            log.write_all(format!("{id}\n").as_bytes())?;
            log.flush()?;
        }
        state.mark_removed(id);
        state.logged += 1;

        if state.logged >= self.compact_every {
            self.compact_locked(&mut state)?;
        }
        Ok(true)
    }

    /// Rewrite the base file with the pending identifiers and drop the removal log.
    pub fn compact(&self) -> Result<()> {
        let mut state = self.lock();
        self.compact_locked(&mut state)
    }

    fn compact_locked(&self, state: &mut StoreState) -> Result<()> {
        if state.logged == 0 && !self.log_path.exists() {
            return Ok(());
        }
        write_atomically(&self.path, &render(state.pending()))?;
        // A crash here leaves log lines naming identifiers the base file no
        // longer holds; `open` ignores those.
        state.log = None;
        remove_if_exists(&self.log_path)?;
        tracing::debug!(pending = state.live, removed = state.logged, "compacted identifier store");
        state.logged = 0;
        Ok(())
    }
}

fn removal_log_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".removed");
    PathBuf::from(name)
}

fn read_optional(path: &Path) -> io::Result<String> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e),
    }
}

/// Lines terminated by `\n`; a trailing fragment from an interrupted append is skipped.
fn complete_lines(contents: &str) -> impl Iterator<Item = &str> {
    let end = contents.rfind('\n').map_or(0, |i| i + 1);
    contents[..end].lines().filter(|line| !line.trim().is_empty())
}

fn render<'a>(ids: impl Iterator<Item = &'a Identifier>) -> String {
    ids.map(|id| format!("{id}\n")).collect()
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Replace `path` so that readers see either the old or the new contents, never a mix.
pub(crate) fn write_atomically(path: &Path, contents: &str) -> io::Result<()> {
    let mut tmp_name = OsString::from(path.as_os_str());
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let mut file = File::create(&tmp)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp, path)
}
