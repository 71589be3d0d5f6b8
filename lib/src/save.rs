//! The save pipeline (spec §4.9): everything that happens between a
//! client submitting edited HTML and a chapter revision landing in the
//! [`ChapterStore`]. Field validation, the write-access gate, HTML→USFM
//! conversion, ancestor lookup, merge-if-diverged, the
//! [`crate::usfm::safely_store_chapter`] quality gate, change recording,
//! and the saved/reload signal the client uses to decide whether its
//! editor buffer is now stale.

use chrono::DateTime;
use chrono::Utc;
use thiserror::Error;

use crate::access;
use crate::access::AccessError;
use crate::access::InstallationMode;
use crate::access::Transport;
use crate::change::ChangeLedger;
use crate::change::ChangeRecord;
use crate::checksum;
use crate::merge;
use crate::merge::VerseConflict;
use crate::session::Session;
use crate::snapshot::SnapshotError;
use crate::snapshot::SnapshotKey;
use crate::snapshot::SnapshotStore;
use crate::store::ChapterStore;
use crate::store::StoreError;
use crate::usfm;
use crate::usfm::SaveLimits;

/// Converts between the HTML the browser-based editor works with and the
/// USFM the store persists. The conversion itself (stylesheet-driven
/// markup mapping) is out of scope; this is the seam `scriptura-server`
/// plugs a real converter into.
pub trait HtmlUsfmConverter: Send + Sync {
    fn html_to_usfm(&self, html: &str) -> Result<String, String>;
    fn usfm_to_html(&self, usfm: &str) -> Result<String, String>;
}

/// What the editor submitted.
pub struct SaveInput {
    pub bible: String,
    pub book: u16,
    pub chapter: u32,
    pub html: String,
    /// The client's own checksum of `html`, verified against a
    /// server-side recomputation as a transport-integrity check. This is
    /// independent of the merge step below it, which compares this
    /// submission's ancestor against the server's current text, not the
    /// submission against itself.
    pub client_checksum: String,
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("submission is empty")]
    Empty,
    #[error("submission is not valid Unicode")]
    NotUnicode,
    #[error("submission does not parse as exactly the requested chapter")]
    WrongChapterBoundary,
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error("HTML conversion failed: {0}")]
    Conversion(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Outcome handed back to the HTTP layer, which translates it into the
/// client-facing saved/reload signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Committed with no interleaving edit from anyone else.
    Saved,
    /// Committed, but another save landed in between; the client's editor
    /// buffer no longer matches the stored chapter and should reload.
    MergedWithOthers { rendered_html: String },
    /// Committed, but the merge could not fully reconcile every verse;
    /// the client should reload and review the listed verses.
    SavedWithConflicts {
        rendered_html: String,
        conflicts: Vec<VerseConflict>,
    },
    /// The client's checksum of its own submission didn't match; maps to
    /// HTTP 409 at the transport layer rather than the generic 400 other
    /// rejections get.
    ChecksumMismatch,
    /// Refused outright; nothing was written.
    Rejected { message: String },
}

/// Parameters that do not vary per request, bundled so `save_chapter`'s
/// signature does not grow every time an ambient concern is added.
pub struct SaveContext<'a> {
    pub store: &'a dyn ChapterStore,
    pub snapshots: &'a dyn SnapshotStore,
    pub ledger: &'a dyn ChangeLedger,
    pub converter: &'a dyn HtmlUsfmConverter,
    pub mode: InstallationMode,
    pub transport: Transport,
    pub require_secure_transport: bool,
    pub limits: SaveLimits,
}

/// Runs the full save pipeline for one submission.
pub fn save_chapter(
    ctx: &SaveContext<'_>,
    session: &Session,
    now: DateTime<Utc>,
    input: SaveInput,
) -> SaveOutcome {
    match try_save_chapter(ctx, session, now, input) {
        Ok(outcome) => outcome,
        Err(SaveError::ChecksumMismatch) => SaveOutcome::ChecksumMismatch,
        Err(err) => SaveOutcome::Rejected {
            message: err.to_string(),
        },
    }
}

fn try_save_chapter(
    ctx: &SaveContext<'_>,
    session: &Session,
    now: DateTime<Utc>,
    input: SaveInput,
) -> Result<SaveOutcome, SaveError> {
    // 1. Field presence.
    if input.bible.trim().is_empty() {
        return Err(SaveError::MissingField("bible"));
    }
    if input.book == 0 {
        return Err(SaveError::MissingField("book"));
    }
    if input.chapter == 0 {
        return Err(SaveError::MissingField("chapter"));
    }

    // 2. Transport integrity: the client's checksum must match a hash of
    // the HTML exactly as submitted.
    if input.client_checksum.trim().is_empty() {
        return Err(SaveError::MissingField("checksum"));
    }
    if input.client_checksum != checksum::hash(&input.html) {
        return Err(SaveError::ChecksumMismatch);
    }

    // 3. Normalize.
    let html = input.html.trim();

    // 4. Empty check.
    if html.is_empty() {
        return Err(SaveError::Empty);
    }

    // 5. Unicode check (defense in depth: `&str` already guarantees valid
    // UTF-8, but a submission carrying an embedded NUL is still garbage).
    if html.as_bytes().iter().any(|&b| b == 0) {
        return Err(SaveError::NotUnicode);
    }

    // 6. Write-access check.
    access::check_write_access(
        session,
        ctx.mode,
        ctx.transport,
        ctx.require_secure_transport,
    )?;

    // 7. HTML to USFM conversion.
    let submitted_usfm = ctx
        .converter
        .html_to_usfm(html)
        .map_err(SaveError::Conversion)?;

    let key = SnapshotKey {
        username: session.username.clone(),
        bible: input.bible.clone(),
        book: input.book,
        chapter: input.chapter,
    };

    // 8. Ancestor fetch: the text this edit actually started from. A
    // missing snapshot (e.g. after a server restart) falls back to
    // treating the chapter's current text as its own ancestor, which
    // degrades gracefully to "no concurrent edit detected" rather than
    // refusing the save.
    let current = ctx
        .store
        .get_chapter(&input.bible, input.book, input.chapter)?;
    let ancestor = ctx
        .snapshots
        .take(&key)?
        .unwrap_or_else(|| current.clone());

    // 9. Parse-exactly-one-chapter check.
    let fragments = usfm::parse(&submitted_usfm, &usfm::Stylesheet);
    let matches_expected = fragments.len() == 1
        && fragments[0].chapter == input.chapter
        && (fragments[0].book == input.book || fragments[0].book == 0);
    if !matches_expected {
        return Err(SaveError::WrongChapterBoundary);
    }

    // 10. Merge-if-diverged: only run the three-way merge when someone
    // else's save landed between this edit's ancestor and now.
    let diverged = ancestor.trim_end() != current.trim_end();
    let (to_store, conflicts) = if diverged {
        let result = merge::three_way_merge(&ancestor, &current, &submitted_usfm);
        (result.merged, result.conflicts)
    } else {
        (submitted_usfm.clone(), Vec::new())
    };

    // 11. safely_store_chapter gate.
    let old_chapter_id = ctx
        .store
        .chapter_id(&input.bible, input.book, input.chapter)?;
    let (message, explanation) = usfm::safely_store_chapter(
        ctx.store,
        &input.bible,
        input.book,
        input.chapter,
        &to_store,
        &ctx.limits,
    );
    if !message.is_empty() {
        tracing::warn!(bible = %input.bible, book = input.book, chapter = input.chapter, %explanation, "save refused by safely_store_chapter gate");
        return Ok(SaveOutcome::Rejected { message });
    }
    let new_chapter_id = ctx
        .store
        .chapter_id(&input.bible, input.book, input.chapter)?;

    // 12. Change record. A failure here is logged, not propagated: a
    // missed ledger entry must never undo an already-committed chapter.
    let record = ChangeRecord {
        username: session.username.clone(),
        bible: input.bible.clone(),
        book: input.book,
        chapter: input.chapter,
        old_chapter_id,
        new_chapter_id,
        old_text: current,
        new_text: to_store.clone(),
        timestamp: now,
    };
    if let Err(err) = ctx.ledger.insert(record) {
        tracing::error!(%err, "failed to record change, save already committed");
    }

    // 13. Snapshot update: the editor keeps working from what was just
    // stored, so the next save's ancestor is correct even without a
    // fresh page load.
    ctx.snapshots.record(&key, &to_store)?;

    // 14. Re-render comparison and 15/16. saved/reload signal.
    if !conflicts.is_empty() {
        let rendered_html = ctx
            .converter
            .usfm_to_html(&to_store)
            .map_err(SaveError::Conversion)?;
        return Ok(SaveOutcome::SavedWithConflicts {
            rendered_html,
            conflicts,
        });
    }
    if diverged {
        let rendered_html = ctx
            .converter
            .usfm_to_html(&to_store)
            .map_err(SaveError::Conversion)?;
        return Ok(SaveOutcome::MergedWithOthers { rendered_html });
    }
    Ok(SaveOutcome::Saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;
    use crate::snapshot::SnapshotError;
    use scriptura_testutils::MemoryChapterStore;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct IdentityConverter;
    impl HtmlUsfmConverter for IdentityConverter {
        fn html_to_usfm(&self, html: &str) -> Result<String, String> {
            Ok(html.to_string())
        }
        fn usfm_to_html(&self, usfm: &str) -> Result<String, String> {
            Ok(usfm.to_string())
        }
    }

    #[derive(Default)]
    struct MemorySnapshots(Mutex<HashMap<SnapshotKey, String>>);
    impl SnapshotStore for MemorySnapshots {
        fn record(&self, key: &SnapshotKey, usfm: &str) -> Result<(), SnapshotError> {
            self.0.lock().unwrap().insert(key.clone(), usfm.to_string());
            Ok(())
        }
        fn take(&self, key: &SnapshotKey) -> Result<Option<String>, SnapshotError> {
            Ok(self.0.lock().unwrap().remove(key))
        }
    }

    #[derive(Default)]
    struct MemoryLedger(Mutex<Vec<ChangeRecord>>);
    impl ChangeLedger for MemoryLedger {
        fn insert(&self, record: ChangeRecord) -> Result<(), crate::change::ChangeError> {
            self.0.lock().unwrap().push(record);
            Ok(())
        }
        fn for_user_since(
            &self,
            username: &str,
            since: DateTime<Utc>,
        ) -> Result<Vec<ChangeRecord>, crate::change::ChangeError> {
            Ok(self
                .0
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.username == username && r.timestamp >= since)
                .cloned()
                .collect())
        }

        fn users_since(&self, since: DateTime<Utc>) -> Result<Vec<String>, crate::change::ChangeError> {
            let mut users: Vec<String> = self
                .0
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.timestamp >= since)
                .map(|r| r.username.clone())
                .collect();
            users.sort();
            users.dedup();
            Ok(users)
        }
    }

    fn translator() -> Session {
        Session {
            username: "alice".to_string(),
            role: Role::Translator,
        }
    }

    fn context<'a>(
        store: &'a MemoryChapterStore,
        snapshots: &'a MemorySnapshots,
        ledger: &'a MemoryLedger,
        converter: &'a IdentityConverter,
    ) -> SaveContext<'a> {
        SaveContext {
            store,
            snapshots,
            ledger,
            converter,
            mode: InstallationMode::Open,
            transport: Transport::Secure,
            require_secure_transport: true,
            limits: SaveLimits::default(),
        }
    }

    #[test]
    fn first_save_to_empty_chapter_succeeds() {
        let store = MemoryChapterStore::new();
        store.create_bible("Test").unwrap();
        let snapshots = MemorySnapshots::default();
        let ledger = MemoryLedger::default();
        let converter = IdentityConverter;
        let ctx = context(&store, &snapshots, &ledger, &converter);

        let html = "\\c 1\n\\v 1 In the beginning.\n".to_string();
        let input = SaveInput {
            bible: "Test".to_string(),
            book: 40,
            chapter: 1,
            client_checksum: checksum::hash(&html),
            html,
        };
        let outcome = save_chapter(&ctx, &translator(), scriptura_testutils::fixed_now(), input);
        assert_eq!(outcome, SaveOutcome::Saved);
        assert_eq!(
            store.get_chapter("Test", 40, 1).unwrap(),
            "\\c 1\n\\v 1 In the beginning."
        );
        assert_eq!(ledger.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn save_without_write_access_is_rejected() {
        let store = MemoryChapterStore::new();
        store.create_bible("Test").unwrap();
        let snapshots = MemorySnapshots::default();
        let ledger = MemoryLedger::default();
        let converter = IdentityConverter;
        let ctx = context(&store, &snapshots, &ledger, &converter);
        let mut ctx = ctx;
        ctx.mode = InstallationMode::Restricted;

        let guest = Session {
            username: "bob".to_string(),
            role: Role::Member,
        };
        let html = "\\c 1\n\\v 1 text\n".to_string();
        let input = SaveInput {
            bible: "Test".to_string(),
            book: 40,
            chapter: 1,
            client_checksum: checksum::hash(&html),
            html,
        };
        let outcome = save_chapter(&ctx, &guest, scriptura_testutils::fixed_now(), input);
        assert!(matches!(outcome, SaveOutcome::Rejected { .. }));
        assert_eq!(store.get_chapter("Test", 40, 1).unwrap(), "");
    }

    #[test]
    fn concurrent_non_conflicting_edit_merges_and_signals_reload() {
        let store = MemoryChapterStore::new();
        store.create_bible("Test").unwrap();
        store
            .store_chapter("Test", 40, 1, "\\c 1\n\\v 1 a\n\\v 2 b\n")
            .unwrap();
        let snapshots = MemorySnapshots::default();
        let ledger = MemoryLedger::default();
        let converter = IdentityConverter;
        let ctx = context(&store, &snapshots, &ledger, &converter);

        let key = SnapshotKey {
            username: "alice".to_string(),
            bible: "Test".to_string(),
            book: 40,
            chapter: 1,
        };
        snapshots.record(&key, "\\c 1\n\\v 1 a\n\\v 2 b\n").unwrap();
        // Someone else's edit lands on the server after alice's snapshot.
        store
            .store_chapter("Test", 40, 1, "\\c 1\n\\v 1 a\n\\v 2 b server\n")
            .unwrap();

        let html = "\\c 1\n\\v 1 a client\n\\v 2 b\n".to_string();
        let input = SaveInput {
            bible: "Test".to_string(),
            book: 40,
            chapter: 1,
            client_checksum: checksum::hash(&html),
            html,
        };
        let outcome = save_chapter(&ctx, &translator(), scriptura_testutils::fixed_now(), input);
        match outcome {
            SaveOutcome::MergedWithOthers { rendered_html } => {
                assert!(rendered_html.contains("a client"));
                assert!(rendered_html.contains("b server"));
            }
            other => panic!("expected MergedWithOthers, got {other:?}"),
        }
    }

    #[test]
    fn mismatched_checksum_is_rejected_without_writing() {
        let store = MemoryChapterStore::new();
        store.create_bible("Test").unwrap();
        let snapshots = MemorySnapshots::default();
        let ledger = MemoryLedger::default();
        let converter = IdentityConverter;
        let ctx = context(&store, &snapshots, &ledger, &converter);

        let input = SaveInput {
            bible: "Test".to_string(),
            book: 40,
            chapter: 1,
            html: "\\c 1\n\\v 1 In the beginning.\n".to_string(),
            client_checksum: "not-the-real-checksum".to_string(),
        };
        let outcome = save_chapter(&ctx, &translator(), scriptura_testutils::fixed_now(), input);
        assert_eq!(outcome, SaveOutcome::ChecksumMismatch);
        assert_eq!(store.get_chapter("Test", 40, 1).unwrap(), "");
    }
}
