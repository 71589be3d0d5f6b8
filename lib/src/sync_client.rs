//! The client side of the sync protocol (spec §4.7/§2): a transport-agnostic
//! ladder descent that compares local and remote checksums top-down and only
//! recurses into a bible/book/chapter once its checksum actually disagrees.
//!
//! [`SyncTransport`] mirrors the server's `B0`..`B8` actions one-to-one so
//! [`client_sync_walk`] can be driven by a fake in unit tests without any
//! network or HTTP crate in this module at all; `scriptura-server`'s
//! counterpart client (if one is ever built against this library) would
//! implement `SyncTransport` over its HTTP sync endpoint.

use thiserror::Error;

use crate::checksum;
use crate::store::ChapterStore;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SyncClientError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("transport error: {0}")]
    Transport(String),
}

/// What the client does for one chapter whose checksum disagreed with the
/// server's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterAction {
    /// The server's text was pulled down and stored locally.
    Pulled { bible: String, book: u16, chapter: u32 },
    /// The client's locally edited text was pushed to the server.
    Pushed { bible: String, book: u16, chapter: u32, server_checksum: String },
}

/// Abstracts the wire round-trip for one `B0`..`B8` action so the descent
/// algorithm below can be unit-tested against an in-memory double.
/// Method names mirror [`crate::sync::Action`] variants, not the two-letter
/// wire codes, since callers should not need to remember "B3 means chapter
/// checksum" twice.
pub trait SyncTransport {
    fn total_checksum(&self) -> Result<String, SyncClientError>;
    fn list_bibles(&self) -> Result<Vec<String>, SyncClientError>;
    fn bible_checksum(&self, bible: &str) -> Result<String, SyncClientError>;
    fn list_books(&self, bible: &str) -> Result<Vec<u16>, SyncClientError>;
    fn book_checksum(&self, bible: &str, book: u16) -> Result<String, SyncClientError>;
    fn list_chapters(&self, bible: &str, book: u16) -> Result<Vec<u32>, SyncClientError>;
    fn chapter_checksum(&self, bible: &str, book: u16, chapter: u32) -> Result<String, SyncClientError>;
    fn get_chapter(&self, bible: &str, book: u16, chapter: u32) -> Result<String, SyncClientError>;
    fn send_chapter(
        &self,
        bible: &str,
        book: u16,
        chapter: u32,
        old_usfm: &str,
        new_usfm: &str,
    ) -> Result<String, SyncClientError>;
}

/// Tells the walk, for one mismatched chapter, whether the client has a
/// pending local edit to push. Returning `None` means "pull the server's
/// version"; `Some(new_usfm)` means "push this text, with `old_usfm` as the
/// ancestor the client last loaded or synced."
///
/// A real editor front-end backs this with its own open-buffer state; tests
/// below back it with a plain closure over a `HashMap`.
pub trait LocalEdits {
    fn pending_edit(&self, bible: &str, book: u16, chapter: u32) -> Option<String>;
}

/// Runs one client sync walk: bibles whose checksum matches the server's
/// are skipped outright; book and chapter checksums are only fetched for
/// bibles/books that disagree. Returns every chapter action taken, in the
/// order the walk found them.
pub fn client_sync_walk(
    local: &dyn ChapterStore,
    transport: &dyn SyncTransport,
    edits: &dyn LocalEdits,
) -> Result<Vec<ChapterAction>, SyncClientError> {
    let mut actions = Vec::new();

    let local_total = local_total_checksum(local)?;
    let remote_total = transport.total_checksum()?;
    if local_total == remote_total {
        return Ok(actions);
    }

    let remote_bibles = transport.list_bibles()?;
    let local_bibles = local.list_bibles()?;

    for bible in &remote_bibles {
        if !local_bibles.contains(bible) {
            local.create_bible(bible)?;
        }
        let local_checksum = local_bible_checksum(local, bible)?;
        let remote_checksum = transport.bible_checksum(&bible)?;
        if local_checksum == remote_checksum {
            continue;
        }
        walk_bible(local, transport, edits, &bible, &mut actions)?;
    }

    Ok(actions)
}

fn walk_bible(
    local: &dyn ChapterStore,
    transport: &dyn SyncTransport,
    edits: &dyn LocalEdits,
    bible: &str,
    actions: &mut Vec<ChapterAction>,
) -> Result<(), SyncClientError> {
    let remote_books = transport.list_books(bible)?;
    let mut books = local.list_books(bible)?;
    for book in &remote_books {
        if !books.contains(book) {
            books.push(*book);
        }
    }
    books.sort();

    for book in books {
        if !remote_books.contains(&book) {
            continue;
        }
        let local_checksum = local_book_checksum(local, bible, book)?;
        let remote_checksum = transport.book_checksum(bible, book)?;
        if local_checksum == remote_checksum {
            continue;
        }
        walk_book(local, transport, edits, bible, book, actions)?;
    }
    Ok(())
}

fn walk_book(
    local: &dyn ChapterStore,
    transport: &dyn SyncTransport,
    edits: &dyn LocalEdits,
    bible: &str,
    book: u16,
    actions: &mut Vec<ChapterAction>,
) -> Result<(), SyncClientError> {
    let remote_chapters = transport.list_chapters(bible, book)?;
    let mut chapters = local.list_chapters(bible, book)?;
    for chapter in &remote_chapters {
        if !chapters.contains(chapter) {
            chapters.push(*chapter);
        }
    }
    chapters.sort();

    for chapter in chapters {
        if !remote_chapters.contains(&chapter) {
            continue;
        }
        let local_text = local.get_chapter(bible, book, chapter)?;
        let local_checksum = checksum::checksum_of_chapter(&local_text);
        let remote_checksum = transport.chapter_checksum(bible, book, chapter)?;
        if local_checksum == remote_checksum {
            continue;
        }

        match edits.pending_edit(bible, book, chapter) {
            Some(new_usfm) => {
                let server_checksum =
                    transport.send_chapter(bible, book, chapter, &local_text, &new_usfm)?;
                local.store_chapter(bible, book, chapter, &new_usfm)?;
                actions.push(ChapterAction::Pushed {
                    bible: bible.to_string(),
                    book,
                    chapter,
                    server_checksum,
                });
            }
            None => {
                let server_text = transport.get_chapter(bible, book, chapter)?;
                local.store_chapter(bible, book, chapter, &server_text)?;
                actions.push(ChapterAction::Pulled {
                    bible: bible.to_string(),
                    book,
                    chapter,
                });
            }
        }
    }
    Ok(())
}

fn local_total_checksum(local: &dyn ChapterStore) -> Result<String, SyncClientError> {
    let mut bibles = local.list_bibles()?;
    bibles.sort();
    let checksums = bibles
        .iter()
        .map(|bible| local_bible_checksum(local, bible))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(checksum::checksum_of_bibles(&checksums))
}

fn local_bible_checksum(local: &dyn ChapterStore, bible: &str) -> Result<String, SyncClientError> {
    let books = local.list_books(bible)?;
    let checksums = books
        .iter()
        .map(|book| local_book_checksum(local, bible, *book))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(checksum::checksum_of_bible(&checksums))
}

fn local_book_checksum(local: &dyn ChapterStore, bible: &str, book: u16) -> Result<String, SyncClientError> {
    let chapters = local.list_chapters(bible, book)?;
    let checksums = chapters
        .iter()
        .map(|chapter| {
            local
                .get_chapter(bible, book, *chapter)
                .map(|text| checksum::checksum_of_chapter(&text))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(checksum::checksum_of_book(&checksums))
}
