//! The sync protocol (spec §4.11): a two-letter-keyed, newline-separated
//! field codec and nine request/response actions (`B0`..`B8`) that let a
//! client walk bibles → books → chapters → checksums, uploading and
//! downloading only what has actually changed.
//!
//! Actions, in the order a client's sync walk uses them:
//!
//! - `B0` total checksum of every bible on the server
//! - `B1` checksum of one bible (composed from its books)
//! - `B2` checksum of one book (composed from its chapters)
//! - `B3` checksum of one chapter
//! - `B4` list of bible names
//! - `B5` list of book ids in a bible
//! - `B6` list of chapter numbers in a book
//! - `B7` client sends a chapter to the server
//! - `B8` client requests a chapter from the server

use std::collections::BTreeMap;

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
use crate::notify::Notification;
use crate::notify::Notifier;
use crate::session::Session;
use crate::store::ChapterStore;
use crate::store::StoreError;
use crate::usfm;
use crate::usfm::SaveLimits;

/// The nine sync actions, named `B0`..`B8` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    TotalChecksum,
    BibleChecksum,
    BookChecksum,
    ChapterChecksum,
    ListBibles,
    ListBooks,
    ListChapters,
    SendChapter,
    GetChapter,
}

impl Action {
    pub fn wire_code(self) -> &'static str {
        match self {
            Action::TotalChecksum => "B0",
            Action::BibleChecksum => "B1",
            Action::BookChecksum => "B2",
            Action::ChapterChecksum => "B3",
            Action::ListBibles => "B4",
            Action::ListBooks => "B5",
            Action::ListChapters => "B6",
            Action::SendChapter => "B7",
            Action::GetChapter => "B8",
        }
    }

    pub fn from_wire_code(code: &str) -> Option<Self> {
        Some(match code {
            "B0" => Action::TotalChecksum,
            "B1" => Action::BibleChecksum,
            "B2" => Action::BookChecksum,
            "B3" => Action::ChapterChecksum,
            "B4" => Action::ListBibles,
            "B5" => Action::ListBooks,
            "B6" => Action::ListChapters,
            "B7" => Action::SendChapter,
            "B8" => Action::GetChapter,
            _ => return None,
        })
    }
}

/// Escapes a literal `+` as `<plus/>` so it survives transport encodings
/// that otherwise treat `+` as a space or separator; the inverse of
/// [`unescape_plus`].
pub fn escape_plus(value: &str) -> String {
    value.replace('+', "<plus/>")
}

pub fn unescape_plus(value: &str) -> String {
    value.replace("<plus/>", "+")
}

/// A set of wire fields, in insertion order preserved by `BTreeMap`'s key
/// ordering (two-letter keys sort predictably, which keeps wire dumps in
/// tests easy to read).
pub type Fields = BTreeMap<String, String>;

/// Encodes fields as `key=value` lines, escaping `+` in values.
pub fn encode(fields: &Fields) -> String {
    fields
        .iter()
        .map(|(key, value)| format!("{key}={}", escape_plus(value)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Decodes `encode`'s output back into fields, unescaping `<plus/>`.
pub fn decode(wire: &str) -> Fields {
    wire.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.to_string(), unescape_plus(value)))
        .collect()
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("malformed field: {0}")]
    MalformedField(&'static str),
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Access(#[from] AccessError),
}

/// Handles one `B0`..`B6` read-only request and returns the wire fields
/// of the response. `B7`/`B8` have their own entry points below because
/// they need write-access checks and, for `B7`, a notifier.
pub fn handle_checksum_or_list_request(
    store: &dyn ChapterStore,
    action: Action,
    fields: &Fields,
) -> Result<Fields, SyncError> {
    let mut response = Fields::new();
    match action {
        Action::TotalChecksum => {
            let bibles = store.list_bibles()?;
            let checksums = bible_checksums(store, &bibles)?;
            response.insert("ck".to_string(), checksum::checksum_of_bibles(&checksums));
        }
        Action::BibleChecksum => {
            let bible = field(fields, "bi")?;
            let checksum = bible_checksum(store, bible)?;
            response.insert("ck".to_string(), checksum);
        }
        Action::BookChecksum => {
            let bible = field(fields, "bi")?;
            let book = parse_field::<u16>(fields, "bk")?;
            let checksum = book_checksum(store, bible, book)?;
            response.insert("ck".to_string(), checksum);
        }
        Action::ChapterChecksum => {
            let bible = field(fields, "bi")?;
            let book = parse_field::<u16>(fields, "bk")?;
            let chapter = parse_field::<u32>(fields, "ch")?;
            let text = store.get_chapter(bible, book, chapter)?;
            response.insert("ck".to_string(), checksum::checksum_of_chapter(&text));
        }
        Action::ListBibles => {
            response.insert("ls".to_string(), store.list_bibles()?.join(","));
        }
        Action::ListBooks => {
            let bible = field(fields, "bi")?;
            let list = store
                .list_books(bible)?
                .into_iter()
                .map(|b| b.to_string())
                .collect::<Vec<_>>()
                .join(",");
            response.insert("ls".to_string(), list);
        }
        Action::ListChapters => {
            let bible = field(fields, "bi")?;
            let book = parse_field::<u16>(fields, "bk")?;
            let list = store
                .list_chapters(bible, book)?
                .into_iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(",");
            response.insert("ls".to_string(), list);
        }
        Action::SendChapter | Action::GetChapter => {
            unreachable!("handled by dedicated entry points")
        }
    }
    Ok(response)
}

fn bible_checksum(store: &dyn ChapterStore, bible: &str) -> Result<String, SyncError> {
    let checksums = store
        .list_books(bible)?
        .into_iter()
        .map(|book| book_checksum(store, bible, book))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(checksum::checksum_of_bible(&checksums))
}

fn book_checksum(store: &dyn ChapterStore, bible: &str, book: u16) -> Result<String, SyncError> {
    let chapters = store.list_chapters(bible, book)?;
    let checksums = chapters
        .into_iter()
        .map(|chapter| {
            store
                .get_chapter(bible, book, chapter)
                .map(|text| checksum::checksum_of_chapter(&text))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(checksum::checksum_of_book(&checksums))
}

fn bible_checksums(store: &dyn ChapterStore, bibles: &[String]) -> Result<Vec<String>, SyncError> {
    let mut sorted = bibles.to_vec();
    sorted.sort();
    sorted
        .iter()
        .map(|bible| bible_checksum(store, bible))
        .collect()
}

fn field<'a>(fields: &'a Fields, key: &'static str) -> Result<&'a str, SyncError> {
    fields.get(key).map(String::as_str).ok_or(SyncError::MissingField(key))
}

fn parse_field<T: std::str::FromStr>(fields: &Fields, key: &'static str) -> Result<T, SyncError> {
    field(fields, key)?.parse().map_err(|_| SyncError::MalformedField(key))
}

/// `B8`: the client requests a chapter's current text.
pub fn handle_get_chapter(store: &dyn ChapterStore, fields: &Fields) -> Result<Fields, SyncError> {
    let bible = field(fields, "bi")?;
    let book = parse_field::<u16>(fields, "bk")?;
    let chapter = parse_field::<u32>(fields, "ch")?;
    let text = store.get_chapter(bible, book, chapter)?;
    let mut response = Fields::new();
    response.insert("us".to_string(), text);
    Ok(response)
}

/// `B7`: the client sends a chapter, carrying both the ancestor it last
/// synced (`ou`) and its edited text (`us`), plus a transport checksum
/// (`ck`) covering the two concatenated. Mirrors the save pipeline: verify
/// the transport checksum, gate on write access (with the
/// mail-and-fake-confirm behavior below), merge against the server's
/// current text if it has diverged from the ancestor, store through the
/// same safety gate `save.rs` uses, and record a [`ChangeRecord`].
///
/// If the session is not permitted to write, the server does not tell the
/// client so outright — per spec, it replies with the same confirmation a
/// successful submission would get ("the mail-and-fake-confirm
/// behavior"), and instead mails a notification of the denied submission,
/// so a client under a compromised or misconfigured account doesn't learn
/// from protocol responses alone whether an account has write access.
#[allow(clippy::too_many_arguments)]
pub fn handle_send_chapter(
    store: &dyn ChapterStore,
    ledger: &dyn ChangeLedger,
    notifier: &dyn Notifier,
    session: &Session,
    mode: InstallationMode,
    transport: Transport,
    require_secure_transport: bool,
    limits: &SaveLimits,
    moderator_address: &str,
    now: DateTime<Utc>,
    fields: &Fields,
) -> Result<Fields, SyncError> {
    let bible = field(fields, "bi")?;
    let book = parse_field::<u16>(fields, "bk")?;
    let chapter = parse_field::<u32>(fields, "ch")?;
    let old_usfm = field(fields, "ou")?;
    let new_usfm = field(fields, "us")?;
    let submitted_checksum = field(fields, "ck")?;

    // 1. Transport integrity: the checksum must cover exactly the
    // ancestor and submission this request carries.
    let transport_checksum = checksum::hash(&format!("{old_usfm}{new_usfm}"));
    if transport_checksum != submitted_checksum {
        return Err(SyncError::ChecksumMismatch);
    }

    let mut confirmation = Fields::new();
    confirmation.insert("ck".to_string(), transport_checksum);

    // 2. Write-access gate.
    if access::check_write_access(session, mode, transport, require_secure_transport).is_err() {
        notifier.notify(Notification {
            to: moderator_address.to_string(),
            subject: format!("Denied sync submission from {}", session.username),
            body: format!(
                "{} attempted to submit {bible} {book}:{chapter} over sync without write access.\n\n{new_usfm}",
                session.username
            ),
        });
        return Ok(confirmation);
    }

    // 3. Normalize.
    let new_usfm = new_usfm.trim();

    let current = store.get_chapter(bible, book, chapter)?;

    // 4/5. Merge-if-diverged: the client's ancestor no longer matches the
    // server's current text, so reconcile rather than clobber. An empty
    // current chapter is just the degenerate case of "not diverged".
    let diverged = old_usfm.trim_end() != current.trim_end();
    let (to_store, conflicts) = if diverged {
        let result = merge::three_way_merge(old_usfm, &current, new_usfm);
        (result.merged, result.conflicts)
    } else {
        (new_usfm.to_string(), Vec::new())
    };

    // 6. Commit through the same safety gate the save pipeline uses,
    // record the change, and mail the user about any conflicts.
    let old_chapter_id = store.chapter_id(bible, book, chapter)?;
    let (message, explanation) =
        usfm::safely_store_chapter(store, bible, book, chapter, &to_store, limits);
    if !message.is_empty() {
        tracing::warn!(%bible, book, chapter, %explanation, "sync B7 submission refused");
        return Ok(confirmation);
    }
    let new_chapter_id = store.chapter_id(bible, book, chapter)?;

    let record = ChangeRecord {
        username: session.username.clone(),
        bible: bible.to_string(),
        book,
        chapter,
        old_chapter_id,
        new_chapter_id,
        old_text: current,
        new_text: to_store.clone(),
        timestamp: now,
    };
    if let Err(err) = ledger.insert(record) {
        tracing::error!(%err, "failed to record change, sync submission already committed");
    }

    if !conflicts.is_empty() {
        let verses = conflicts
            .iter()
            .map(|c| c.verse.to_string())
            .collect::<Vec<_>>()
            .join(",");
        notifier.notify(Notification {
            to: session.username.clone(),
            subject: "Conflicts in your synced chapter".to_string(),
            body: format!("Verses in conflict: {verses}\n\n{to_store}"),
        });
    }

    Ok(confirmation)
}
