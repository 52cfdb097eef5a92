//! After-the-fact check of the durable files

use std::collections::HashSet;
use std::io;
use std::path::Path;

use crate::error::{Error, Result};
use crate::store::IdentifierStore;

/// What [`verify`] found.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Identifiers still pending; `None` if the pending file does not exist
    pub pending: Option<usize>,
    /// Data rows in the result file; `None` if it does not exist
    pub rows: Option<usize>,
    /// Every row whose identifier appeared in an earlier row
    pub duplicates: Vec<Vec<String>>,
}

impl VerifyReport {
    /// True when the result file has no repeated identifier.
    pub fn is_clean(&self) -> bool {
        self.duplicates.is_empty()
    }
}

/// Count pending identifiers and result rows, and list duplicate rows.
pub fn verify(output_path: &Path, pending_path: &Path) -> Result<VerifyReport> {
    let mut report = VerifyReport::default();

    if pending_path.exists() {
        report.pending = Some(IdentifierStore::open(pending_path, usize::MAX)?.len());
    }

    let mut reader = match csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(output_path)
    {
        Ok(reader) => reader,
        Err(e) if is_not_found(&e) => return Ok(report),
        Err(e) => return Err(Error::from(e)),
    };

    let mut seen = HashSet::new();
    let mut rows = 0;
    for row in reader.records() {
        let row = row?;
        rows += 1;
        let id = row.get(0).unwrap_or_default().trim().to_string();
        if !seen.insert(id) {
            report.duplicates.push(row.iter().map(str::to_string).collect());
        }
    }
    report.rows = Some(rows);

    Ok(report)
}

fn is_not_found(err: &csv::Error) -> bool {
    matches!(err.kind(), csv::ErrorKind::Io(e) if e.kind() == io::ErrorKind::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_files_are_reported_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let report = verify(&dir.path().join("users.csv"), &dir.path().join("ids.txt")).unwrap();
        assert_eq!(report, VerifyReport::default());
        assert!(report.is_clean());
    }

    #[test]
    fn counts_rows_and_finds_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("users.csv");
        let pending = dir.path().join("ids.txt");
        fs::write(
            &output,
            "user_id,country,R,F,M\nu1,ES,3,5,10\nu2,,,,\nu1,FR,1,1,1\n",
        )
        .unwrap();
        fs::write(&pending, "u3\nu4\n").unwrap();
        fs::write(dir.path().join("ids.txt.removed"), "u4\n").unwrap();

        let report = verify(&output, &pending).unwrap();
        assert_eq!(report.pending, Some(1));
        assert_eq!(report.rows, Some(3));
        assert_eq!(report.duplicates, vec![vec!["u1", "FR", "1", "1", "1"]]);
        assert!(!report.is_clean());
    }

    #[test]
    fn header_only_output_has_no_rows() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("users.csv");
        fs::write(&output, "user_id,country,R,F,M\n").unwrap();

        let report = verify(&output, &dir.path().join("ids.txt")).unwrap();
        assert_eq!(report.rows, Some(0));
        assert_eq!(report.pending, None);
    }
}
