//! The append-only change log.
//!
//! Every mutation recorded by the instance appends one [`ChangeRecord`];
//! `needs_save` is the number of records since the last save mark.

use serde::Serialize;
use std::fmt;

/// One recorded change: a path plus either a note or an old/new pair.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChangeRecord {
    /// Tree path of the changed item.
    pub path: String,
    /// Value before the change, when the change is a value change.
    pub old: Option<String>,
    /// Value after the change, when the change is a value change.
    pub new: Option<String>,
    /// Free-form note ("applied fix: …", "migrated value", …).
    pub note: Option<String>,
}

impl fmt::Display for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.path)?;
        match (&self.old, &self.new) {
            (Some(old), Some(new)) => write!(f, " '{old}' -> '{new}'")?,
            (None, Some(new)) => write!(f, " -> '{new}'")?,
            (Some(old), None) => write!(f, " '{old}' -> deleted")?,
            (None, None) => {}
        }
        if let Some(ref note) = self.note {
            write!(f, " # {note}")?;
        }
        Ok(())
    }
}

/// The append-only sequence of changes of one instance.
///
/// # Examples
///
/// ```
/// use arbor::tree::ChangeLog;
///
/// let mut log = ChangeLog::default();
/// log.push_note("a b", "created");
/// assert_eq!(log.needs_save(), 1);
/// log.save_done();
/// assert_eq!(log.needs_save(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ChangeLog {
    records: Vec<ChangeRecord>,
    saved_at: usize,
}

impl ChangeLog {
    /// Appends a value change.
    pub fn push_value(
        &mut self,
        path: impl Into<String>,
        old: Option<String>,
        new: Option<String>,
        note: Option<String>,
    ) {
        self.records.push(ChangeRecord {
            path: path.into(),
            old,
            new,
            note,
        });
    }

    /// Appends a note-only change.
    pub fn push_note(&mut self, path: impl Into<String>, note: impl Into<String>) {
        self.records.push(ChangeRecord {
            path: path.into(),
            old: None,
            new: None,
            note: Some(note.into()),
        });
    }

    /// Number of changes since the last save mark.
    #[must_use]
    pub fn needs_save(&self) -> usize {
        self.records.len() - self.saved_at
    }

    /// Marks the current state as saved.
    pub fn save_done(&mut self) {
        self.saved_at = self.records.len();
    }

    /// All records, oldest first.
    #[must_use]
    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    /// One line per change, oldest first.
    #[must_use]
    pub fn list(&self) -> String {
        self.records
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_change_display() {
        let mut log = ChangeLog::default();
        log.push_value("a b", Some("1".into()), Some("2".into()), None);
        assert_eq!(log.list(), "a b: '1' -> '2'");
    }

    #[test]
    fn test_note_display() {
        let mut log = ChangeLog::default();
        log.push_value(
            "a b",
            None,
            Some("2".into()),
            Some("migrated value".into()),
        );
        assert_eq!(log.list(), "a b: -> '2' # migrated value");
    }

    #[test]
    fn test_needs_save_counts_since_mark() {
        let mut log = ChangeLog::default();
        log.push_note("x", "one");
        log.push_note("x", "two");
        assert_eq!(log.needs_save(), 2);
        log.save_done();
        assert_eq!(log.needs_save(), 0);
        log.push_note("x", "three");
        assert_eq!(log.needs_save(), 1);
        assert_eq!(log.records().len(), 3);
    }

    #[test]
    fn test_deletion_display() {
        let mut log = ChangeLog::default();
        log.push_value("a", Some("1".into()), None, None);
        assert_eq!(log.list(), "a: '1' -> deleted");
    }
}
