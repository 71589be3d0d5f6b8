//! Shared fixtures for `scriptura-core` and `scriptura-server` test suites:
//! an in-memory [`ChapterStore`], a recording change ledger and notifier,
//! and a fixed clock, mirroring the teacher's own in-memory test doubles.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::DateTime;
use chrono::Utc;
use scriptura_core::change::ChangeError;
use scriptura_core::change::ChangeLedger;
use scriptura_core::change::ChangeRecord;
use scriptura_core::notify::Notification;
use scriptura_core::notify::Notifier;
use scriptura_core::store::ChapterStore;
use scriptura_core::store::StoreError;
use scriptura_core::store::CHAPTER_ABSENT;

/// Records every notification it is given, instead of sending it, so
/// tests can assert on the mail-and-fake-confirm behavior and the
/// nightly digest without a real SMTP transport.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: Notification) {
        self.sent.lock().unwrap().push(message);
    }
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

/// Records every [`ChangeRecord`] it is given, instead of persisting it
/// to a database, so tests can assert on what the save and sync
/// pipelines committed.
#[derive(Default)]
pub struct MemoryLedger {
    pub records: Mutex<Vec<ChangeRecord>>,
}

impl ChangeLedger for MemoryLedger {
    fn insert(&self, record: ChangeRecord) -> Result<(), ChangeError> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }

    fn for_user_since(
        &self,
        username: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ChangeRecord>, ChangeError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.username == username && r.timestamp >= since)
            .cloned()
            .collect())
    }

    fn users_since(&self, since: DateTime<Utc>) -> Result<Vec<String>, ChangeError> {
        let mut users: Vec<String> = self
            .records
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

impl MemoryLedger {
    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

type ChapterKey = (String, u16, u32);

/// In-memory [`ChapterStore`], keeping every revision ever written so
/// tests can assert on history as well as current content.
#[derive(Default)]
pub struct MemoryChapterStore {
    bibles: Mutex<Vec<String>>,
    chapters: Mutex<BTreeMap<ChapterKey, Vec<String>>>,
}

impl MemoryChapterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of revisions recorded for a chapter, 0 if never written.
    pub fn revision_count(&self, bible: &str, book: u16, chapter: u32) -> usize {
        self.chapters
            .lock()
            .unwrap()
            .get(&(bible.to_string(), book, chapter))
            .map_or(0, Vec::len)
    }
}

impl ChapterStore for MemoryChapterStore {
    fn create_bible(&self, bible: &str) -> Result<(), StoreError> {
        let mut bibles = self.bibles.lock().unwrap();
        if bibles.iter().any(|b| b == bible) {
            return Err(StoreError::BibleAlreadyExists(bible.to_string()));
        }
        bibles.push(bible.to_string());
        Ok(())
    }

    fn delete_bible(&self, bible: &str) -> Result<(), StoreError> {
        self.require_bible(bible)?;
        self.bibles.lock().unwrap().retain(|b| b != bible);
        self.chapters.lock().unwrap().retain(|(b, _, _), _| b != bible);
        Ok(())
    }

    fn list_bibles(&self) -> Result<Vec<String>, StoreError> {
        let mut bibles = self.bibles.lock().unwrap().clone();
        bibles.sort();
        Ok(bibles)
    }

    fn list_books(&self, bible: &str) -> Result<Vec<u16>, StoreError> {
        self.require_bible(bible)?;
        let mut books: Vec<u16> = self
            .chapters
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _, _)| b == bible)
            .map(|(_, book, _)| *book)
            .collect();
        books.sort_unstable();
        books.dedup();
        scriptura_core::books::sort_books(&mut books);
        Ok(books)
    }

    fn list_chapters(&self, bible: &str, book: u16) -> Result<Vec<u32>, StoreError> {
        self.require_bible(bible)?;
        let mut chapters: Vec<u32> = self
            .chapters
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, bk, _)| b == bible && *bk == book)
            .map(|(_, _, chapter)| *chapter)
            .collect();
        chapters.sort_unstable();
        Ok(chapters)
    }

    fn get_chapter(&self, bible: &str, book: u16, chapter: u32) -> Result<String, StoreError> {
        self.require_bible(bible)?;
        Ok(self
            .chapters
            .lock()
            .unwrap()
            .get(&(bible.to_string(), book, chapter))
            .and_then(|revisions| revisions.last())
            .map(|text| text.trim_end().to_string())
            .unwrap_or_default())
    }

    fn chapter_id(&self, bible: &str, book: u16, chapter: u32) -> Result<u32, StoreError> {
        self.require_bible(bible)?;
        let count = self.revision_count(bible, book, chapter);
        Ok(if count == 0 {
            CHAPTER_ABSENT
        } else {
            u32::try_from(count).unwrap_or(u32::MAX)
        })
    }

    fn chapter_age(&self, bible: &str, book: u16, chapter: u32) -> Result<u32, StoreError> {
        self.require_bible(bible)?;
        if self.revision_count(bible, book, chapter) == 0 {
            Ok(CHAPTER_ABSENT)
        } else {
            // The fixture has no wall clock; every write is "fresh".
            Ok(0)
        }
    }

    fn store_chapter(
        &self,
        bible: &str,
        book: u16,
        chapter: u32,
        usfm: &str,
    ) -> Result<(), StoreError> {
        self.require_bible(bible)?;
        let mut stored = usfm.to_string();
        if !stored.ends_with('\n') {
            stored.push('\n');
        }
        self.chapters
            .lock()
            .unwrap()
            .entry((bible.to_string(), book, chapter))
            .or_default()
            .push(stored);
        Ok(())
    }

    fn optimize(&self, retention: usize) -> Result<(), StoreError> {
        for revisions in self.chapters.lock().unwrap().values_mut() {
            revisions.retain(|text| !text.is_empty());
            if revisions.len() > retention {
                let drop = revisions.len() - retention;
                revisions.drain(0..drop);
            }
        }
        Ok(())
    }
}

impl MemoryChapterStore {
    fn require_bible(&self, bible: &str) -> Result<(), StoreError> {
        if self.bibles.lock().unwrap().iter().any(|b| b == bible) {
            Ok(())
        } else {
            Err(StoreError::BibleNotFound(bible.to_string()))
        }
    }
}

/// A fixed point in time, for tests that need a deterministic "now"
/// instead of [`chrono::Utc::now`].
pub fn fixed_now() -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp(1_700_000_000, 0).expect("valid fixed timestamp")
}

/// A minimal single-chapter Gospel of Matthew fixture, used across parser,
/// merge, checksum, and save-pipeline tests.
pub fn sample_matthew_chapter_1() -> &'static str {
    "\\c 1\n\\p\n\\v 1 The book of the genealogy of Jesus Christ.\n\\v 2 Abraham begat Isaac.\n"
}
