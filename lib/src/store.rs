//! The Chapter Store (spec §4.1): an append-only, version-retaining store
//! for chapter USFM text, keyed by bible name, book id, and chapter number.
//!
//! [`FsChapterStore`] lays each chapter out as a directory of numbered
//! revision files under `<base>/<bible>/<book>/<chapter>/`, written with a
//! temp-file-then-rename so a reader never observes a half-written
//! revision. [`optimize`](ChapterStore::optimize) purges empty (failed
//! write) revision files and keeps only the most recent few.

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use tempfile::NamedTempFile;
use thiserror::Error;

/// Sentinel returned by [`ChapterStore::chapter_id`] and
/// [`ChapterStore::chapter_age`] for a chapter that has never been
/// written — chosen, per spec, to be a value no real revision count or
/// age-in-seconds would plausibly reach.
pub const CHAPTER_ABSENT: u32 = 100_000_000;

/// Default for how many of the most recent revisions
/// [`ChapterStore::optimize`] retains for a single chapter, when the
/// caller has no more specific policy.
pub const DEFAULT_RETAINED_REVISIONS: usize = 3;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bible not found: {0}")]
    BibleNotFound(String),
    #[error("bible already exists: {0}")]
    BibleAlreadyExists(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage abstraction the rest of the crate depends on, so that
/// [`crate::usfm::safely_store_chapter`], [`crate::save`], and
/// [`crate::sync`] can all be tested against an in-memory fake without
/// touching a filesystem.
pub trait ChapterStore: Send + Sync {
    fn create_bible(&self, bible: &str) -> Result<(), StoreError>;

    /// Removes a bible and every chapter revision it holds. Irreversible;
    /// callers gate this behind an administrative role, not the write
    /// access check that guards ordinary saves.
    fn delete_bible(&self, bible: &str) -> Result<(), StoreError>;
    fn list_bibles(&self) -> Result<Vec<String>, StoreError>;
    fn list_books(&self, bible: &str) -> Result<Vec<u16>, StoreError>;
    fn list_chapters(&self, bible: &str, book: u16) -> Result<Vec<u32>, StoreError>;

    /// Current (latest-revision) text of a chapter, trimmed of trailing
    /// whitespace. Returns an empty string for a chapter that has never
    /// been written.
    fn get_chapter(&self, bible: &str, book: u16, chapter: u32) -> Result<String, StoreError>;

    /// Revision count of a chapter, or [`CHAPTER_ABSENT`] if it has never
    /// been written.
    fn chapter_id(&self, bible: &str, book: u16, chapter: u32) -> Result<u32, StoreError>;

    /// Age, in seconds, of the chapter's latest revision, or
    /// [`CHAPTER_ABSENT`] if it has never been written.
    fn chapter_age(&self, bible: &str, book: u16, chapter: u32) -> Result<u32, StoreError>;

    /// Appends a new revision. Never overwrites an existing revision file.
    fn store_chapter(
        &self,
        bible: &str,
        book: u16,
        chapter: u32,
        usfm: &str,
    ) -> Result<(), StoreError>;

    /// Purges zero-size (torn-write) revision files, then keeps only the
    /// `retention` most recent revisions of every chapter.
    fn optimize(&self, retention: usize) -> Result<(), StoreError>;
}

/// Filesystem-backed [`ChapterStore`].
///
/// Layout: `<base>/<bible>/<book>/<chapter>/<revision>.usfm`, revisions
/// numbered from 1 and never reused. A bible's existence is recorded by
/// its directory existing (possibly empty, if it has no chapters yet).
pub struct FsChapterStore {
    base: PathBuf,
}

impl FsChapterStore {
    pub fn open(base: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base = base.into();
        fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    fn bible_dir(&self, bible: &str) -> PathBuf {
        self.base.join(bible)
    }

    fn chapter_dir(&self, bible: &str, book: u16, chapter: u32) -> PathBuf {
        self.bible_dir(bible).join(book.to_string()).join(chapter.to_string())
    }

    /// Revision file numbers present for a chapter, ascending, skipping
    /// anything that is not a `<number>.usfm` file.
    fn revisions(dir: &Path) -> Result<Vec<u32>, StoreError> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut revisions: Vec<u32> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                name.strip_suffix(".usfm")?.parse::<u32>().ok()
            })
            .collect();
        revisions.sort_unstable();
        Ok(revisions)
    }

    fn require_bible(&self, bible: &str) -> Result<(), StoreError> {
        if self.bible_dir(bible).is_dir() {
            Ok(())
        } else {
            Err(StoreError::BibleNotFound(bible.to_string()))
        }
    }
}

impl ChapterStore for FsChapterStore {
    fn create_bible(&self, bible: &str) -> Result<(), StoreError> {
        let dir = self.bible_dir(bible);
        if dir.is_dir() {
            return Err(StoreError::BibleAlreadyExists(bible.to_string()));
        }
        fs::create_dir_all(dir)?;
        Ok(())
    }

    fn delete_bible(&self, bible: &str) -> Result<(), StoreError> {
        self.require_bible(bible)?;
        fs::remove_dir_all(self.bible_dir(bible))?;
        Ok(())
    }

    fn list_bibles(&self) -> Result<Vec<String>, StoreError> {
        if !self.base.is_dir() {
            return Ok(Vec::new());
        }
        let mut bibles: Vec<String> = fs::read_dir(&self.base)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        bibles.sort();
        Ok(bibles)
    }

    fn list_books(&self, bible: &str) -> Result<Vec<u16>, StoreError> {
        self.require_bible(bible)?;
        let dir = self.bible_dir(bible);
        let mut books: Vec<u16> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u16>().ok())
            .collect();
        crate::books::sort_books(&mut books);
        Ok(books)
    }

    fn list_chapters(&self, bible: &str, book: u16) -> Result<Vec<u32>, StoreError> {
        self.require_bible(bible)?;
        let dir = self.bible_dir(bible).join(book.to_string());
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut chapters: Vec<u32> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
            .collect();
        chapters.sort_unstable();
        Ok(chapters)
    }

    fn get_chapter(&self, bible: &str, book: u16, chapter: u32) -> Result<String, StoreError> {
        self.require_bible(bible)?;
        let dir = self.chapter_dir(bible, book, chapter);
        let revisions = Self::revisions(&dir)?;
        let Some(&latest) = revisions.last() else {
            return Ok(String::new());
        };
        let text = fs::read_to_string(dir.join(format!("{latest}.usfm")))?;
        Ok(text.trim_end().to_string())
    }

    fn chapter_id(&self, bible: &str, book: u16, chapter: u32) -> Result<u32, StoreError> {
        self.require_bible(bible)?;
        let dir = self.chapter_dir(bible, book, chapter);
        let revisions = Self::revisions(&dir)?;
        Ok(revisions.last().copied().unwrap_or(CHAPTER_ABSENT))
    }

    fn chapter_age(&self, bible: &str, book: u16, chapter: u32) -> Result<u32, StoreError> {
        self.require_bible(bible)?;
        let dir = self.chapter_dir(bible, book, chapter);
        let revisions = Self::revisions(&dir)?;
        let Some(&latest) = revisions.last() else {
            return Ok(CHAPTER_ABSENT);
        };
        let metadata = fs::metadata(dir.join(format!("{latest}.usfm")))?;
        let modified = metadata.modified()?;
        let age = modified.elapsed().map(|d| d.as_secs()).unwrap_or(0);
        Ok(u32::try_from(age).unwrap_or(u32::MAX))
    }

    fn store_chapter(
        &self,
        bible: &str,
        book: u16,
        chapter: u32,
        usfm: &str,
    ) -> Result<(), StoreError> {
        self.require_bible(bible)?;
        let dir = self.chapter_dir(bible, book, chapter);
        fs::create_dir_all(&dir)?;
        let next = Self::revisions(&dir)?.last().map_or(1, |last| last + 1);

        // Chapter content is always stored with exactly one trailing newline.
        let mut temp = NamedTempFile::new_in(&dir)?;
        use std::io::Write as _;
        temp.write_all(usfm.as_bytes())?;
        if !usfm.ends_with('\n') {
            temp.write_all(b"\n")?;
        }
        temp.flush()?;
        temp.persist(dir.join(format!("{next}.usfm")))
            .map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }

    fn optimize(&self, retention: usize) -> Result<(), StoreError> {
        for bible in self.list_bibles()? {
            for book in self.list_books(&bible)? {
                for chapter in self.list_chapters(&bible, book)? {
                    let dir = self.chapter_dir(&bible, book, chapter);
                    for revision in Self::revisions(&dir)? {
                        let path = dir.join(format!("{revision}.usfm"));
                        if fs::metadata(&path).map(|m| m.len()).unwrap_or(0) == 0 {
                            let _ = fs::remove_file(&path);
                        }
                    }
                    let revisions = Self::revisions(&dir)?;
                    if revisions.len() > retention {
                        for stale in &revisions[..revisions.len() - retention] {
                            let _ = fs::remove_file(dir.join(format!("{stale}.usfm")));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
