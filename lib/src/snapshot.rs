//! Editor-load snapshots (spec §4.5): when a client opens a chapter for
//! editing, the server remembers exactly what text it handed out so a
//! later save can recover the ancestor for a three-way merge even if the
//! chapter has since been edited by someone else.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("storage error: {0}")]
    Storage(String),
}

/// Identifies one user's open edit of one chapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    pub username: String,
    pub bible: String,
    pub book: u16,
    pub chapter: u32,
}

/// Storage seam for editor-load snapshots. A snapshot is overwritten each
/// time the same user re-opens the same chapter; it is consumed (read,
/// then cleared) by the save pipeline so a stale snapshot from a
/// previous, already-saved edit never resurfaces as a false ancestor.
pub trait SnapshotStore: Send + Sync {
    fn record(&self, key: &SnapshotKey, usfm: &str) -> Result<(), SnapshotError>;
    fn take(&self, key: &SnapshotKey) -> Result<Option<String>, SnapshotError>;
}
