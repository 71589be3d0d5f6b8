//! USFM utilities (spec §4.2): splitting a USFM string into per-chapter
//! fragments, extracting verse numbers and verse text, and the
//! [`safely_store_chapter`] quality gate that sits in front of the
//! [`crate::store::ChapterStore`].
//!
//! USFM itself (spec §6) is plain UTF-8 text: backslash-prefixed markers
//! (`\id`, `\c`, `\p`, `\v`, character markers, footnotes, cross
//! references, ...) interleaved with ordinary text. This module only
//! needs to understand book/chapter/verse boundaries, not full markup
//! semantics — character markers, footnotes and the rest pass through
//! verse text untouched.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::books;
use crate::store::ChapterStore;
use crate::store::StoreError;

/// Placeholder for the external HTML⇄USFM stylesheet configuration.
///
/// The real stylesheet governs how the (out-of-scope) HTML editor converts
/// markup; USFM structural parsing in this module does not depend on it,
/// but the signature is kept (per spec §4.2: `parse(usfm, stylesheet)`) so
/// callers that do carry a stylesheet can pass it through uniformly.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stylesheet;

/// One (book, chapter) fragment produced by [`parse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookChapterUsfm {
    pub book: u16,
    pub chapter: u32,
    pub usfm: String,
}

static ID_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\\id\s+(\S+)").unwrap());
static CHAPTER_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\\c\s+(\d+)").unwrap());
static VERSE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\v\s+([0-9]+(?:[,-][0-9]+)*)\s?").unwrap());

/// Splits a USFM string at `\id` and `\c` boundaries into per-chapter
/// fragments. Chapter 0 holds everything from a book's `\id` line up to
/// (not including) its first `\c` marker — the book-level front matter.
pub fn parse(usfm: &str, _stylesheet: &Stylesheet) -> Vec<BookChapterUsfm> {
    let mut fragments = Vec::new();
    let mut book = 0u16;
    let mut chapter = 0u32;
    let mut buffer: Vec<&str> = Vec::new();

    let flush = |book: u16, chapter: u32, buffer: &mut Vec<&str>, out: &mut Vec<BookChapterUsfm>| {
        if !buffer.is_empty() {
            let mut usfm = buffer.join("\n");
            usfm.push('\n');
            out.push(BookChapterUsfm { book, chapter, usfm });
            buffer.clear();
        }
    };

    for line in usfm.lines() {
        if let Some(caps) = ID_LINE.captures(line) {
            flush(book, chapter, &mut buffer, &mut fragments);
            book = books::code_to_id(&caps[1]).unwrap_or(0);
            chapter = 0;
        } else if let Some(caps) = CHAPTER_LINE.captures(line) {
            flush(book, chapter, &mut buffer, &mut fragments);
            chapter = caps[1].parse().unwrap_or(0);
        }
        buffer.push(line);
    }
    flush(book, chapter, &mut buffer, &mut fragments);
    fragments
}

/// Expands a verse token (`"7"`, `"2-3"`, `"4,5"`, or a mix) into its
/// member verse numbers.
fn expand_verse_token(token: &str) -> Vec<u32> {
    let mut numbers = Vec::new();
    for part in token.split(',') {
        if let Some((lo, hi)) = part.split_once('-') {
            if let (Ok(lo), Ok(hi)) = (lo.parse::<u32>(), hi.parse::<u32>()) {
                let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
                numbers.extend(lo..=hi);
                continue;
            }
        }
        if let Ok(n) = part.parse::<u32>() {
            numbers.push(n);
        }
    }
    numbers
}

/// One verse (or combined-verse group) and the text that belongs to it,
/// including any intra-verse markup. Verse group `[0]` is always present
/// and holds the pre-first-verse front matter (possibly empty).
struct VerseSegment {
    numbers: Vec<u32>,
    text: String,
}

fn verse_segments(chapter_usfm: &str) -> Vec<VerseSegment> {
    let mut segments = Vec::new();
    let mut last_end = 0;
    let mut current_numbers = vec![0u32];

    for caps in VERSE_MARKER.captures_iter(chapter_usfm) {
        let whole = caps.get(0).unwrap();
        segments.push(VerseSegment {
            numbers: current_numbers,
            text: chapter_usfm[last_end..whole.start()].to_string(),
        });
        current_numbers = expand_verse_token(&caps[1]);
        last_end = whole.end();
    }
    segments.push(VerseSegment {
        numbers: current_numbers,
        text: chapter_usfm[last_end..].to_string(),
    });
    segments
}

/// Every verse number present in the chapter, including `0` for
/// pre-first-verse front matter and every member of combined-verse markers.
pub fn get_verse_numbers(chapter_usfm: &str) -> Vec<u32> {
    verse_segments(chapter_usfm)
        .into_iter()
        .flat_map(|segment| segment.numbers)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// The text belonging to `verse`, trimmed of the trailing newline that
/// would otherwise carry over from the next marker's line break; empty if
/// the verse is absent. For a verse that is part of a combined marker
/// (e.g. `\v 2-3`), querying either member returns the whole shared text.
pub fn get_verse_text(chapter_usfm: &str, verse: u32) -> String {
    verse_segments(chapter_usfm)
        .into_iter()
        .find(|segment| segment.numbers.contains(&verse))
        .map(|segment| segment.text.trim_end_matches('\n').to_string())
        .unwrap_or_default()
}

/// Tunable thresholds for [`safely_store_chapter`]'s quality gate.
#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct SaveLimits {
    /// Refuse a save whose line count differs from the current content by
    /// more than this many lines.
    pub max_line_count_delta: usize,
    /// Refuse a save whose total byte length differs from the current
    /// content by more than this many bytes.
    pub max_length_delta: usize,
}

impl Default for SaveLimits {
    fn default() -> Self {
        Self {
            max_line_count_delta: 200,
            max_length_delta: 20_000,
        }
    }
}

/// Why [`safely_store_chapter`] refused a submission.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SafelyStoreError {
    #[error("the submitted text is not valid Unicode")]
    NotUnicode,
    #[error("line count changed by {delta} lines, which exceeds the configured limit of {limit}")]
    LineCountDeltaExceeded { delta: usize, limit: usize },
    #[error("total length changed by {delta} bytes, which exceeds the configured limit of {limit}")]
    LengthDeltaExceeded { delta: usize, limit: usize },
    #[error(
        "the submission does not parse as exactly one chapter matching book {expected_book} \
         chapter {expected_chapter} (found {found} fragment(s))"
    )]
    NotExactlyOneMatchingChapter {
        expected_book: u16,
        expected_chapter: u32,
        found: usize,
    },
    #[error("underlying store error: {0}")]
    Store(#[from] StoreError),
}

/// The quality gate of spec §4.2: refuses to commit a submission that
/// looks like a truncation, mismatched paste, or otherwise damaged
/// payload, before it ever reaches the [`ChapterStore`]. Returns the
/// user-facing message and a longer diagnostic explanation (both empty on
/// success, per spec: "on success both are empty").
pub fn safely_store_chapter(
    store: &dyn ChapterStore,
    bible: &str,
    book: u16,
    chapter: u32,
    usfm: &str,
    limits: &SaveLimits,
) -> (String, String) {
    match try_safely_store_chapter(store, bible, book, chapter, usfm, limits) {
        Ok(()) => (String::new(), String::new()),
        Err(err) => (store_refusal_message(&err), err.to_string()),
    }
}

fn store_refusal_message(err: &SafelyStoreError) -> String {
    match err {
        SafelyStoreError::NotUnicode => "Save failure: not valid Unicode".to_string(),
        SafelyStoreError::LineCountDeltaExceeded { .. } => {
            "Save failure: the line count changed too much".to_string()
        }
        SafelyStoreError::LengthDeltaExceeded { .. } => {
            "Save failure: the text length changed too much".to_string()
        }
        SafelyStoreError::NotExactlyOneMatchingChapter { .. } => "Incorrect chapter".to_string(),
        SafelyStoreError::Store(e) => format!("Save failure: {e}"),
    }
}

fn try_safely_store_chapter(
    store: &dyn ChapterStore,
    bible: &str,
    book: u16,
    chapter: u32,
    usfm: &str,
    limits: &SaveLimits,
) -> Result<(), SafelyStoreError> {
    // Test 1: Unicode validity. `usfm: &str` is already guaranteed valid
    // UTF-8 by the type system; this test exists for callers that parsed
    // the submission from raw bytes earlier in the pipeline and want the
    // gate to be the single place that rejects it.
    if usfm.as_bytes().iter().any(|&b| b == 0) {
        return Err(SafelyStoreError::NotUnicode);
    }

    let current = store.get_chapter(bible, book, chapter)?;

    let current_lines = current.lines().count();
    let new_lines = usfm.lines().count();
    let line_delta = current_lines.abs_diff(new_lines);
    if !current.is_empty() && line_delta > limits.max_line_count_delta {
        return Err(SafelyStoreError::LineCountDeltaExceeded {
            delta: line_delta,
            limit: limits.max_line_count_delta,
        });
    }

    let length_delta = current.len().abs_diff(usfm.len());
    if !current.is_empty() && length_delta > limits.max_length_delta {
        return Err(SafelyStoreError::LengthDeltaExceeded {
            delta: length_delta,
            limit: limits.max_length_delta,
        });
    }

    let fragments = parse(usfm, &Stylesheet);
    let matching = fragments
        .iter()
        .filter(|f| (f.book == book || f.book == 0) && f.chapter == chapter)
        .count();
    if fragments.len() != 1 || matching != 1 {
        return Err(SafelyStoreError::NotExactlyOneMatchingChapter {
            expected_book: book,
            expected_chapter: chapter,
            found: fragments.len(),
        });
    }

    store.store_chapter(bible, book, chapter, usfm)?;
    Ok(())
}
