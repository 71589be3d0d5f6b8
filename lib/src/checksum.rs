//! The checksum ladder (spec §4.4): a stable hash of a string, composed
//! across verse → chapter → book → bible → bible-set, used by the sync
//! protocol to prune traffic without walking into unchanged content.
//!
//! The hash function itself is a transport-only implementation choice (see
//! spec §4.4); it must simply be stable and collision-resistant enough in
//! practice, and identical on client and server. We use BLAKE2b, already
//! in this workspace's dependency set, truncated to 128 bits / 32 hex
//! characters — shorter than a full digest keeps sync payloads small
//! without weakening collision resistance in any way that matters for a
//! transport checksum.

use blake2::Blake2b512;
use blake2::Digest as _;

/// Width, in hex characters, of a checksum string.
const CHECKSUM_HEX_LEN: usize = 32;

/// Hashes a single string to a fixed-width lowercase hex checksum.
pub fn hash(s: &str) -> String {
    let mut hasher = Blake2b512::new();
    hasher.update(s.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..CHECKSUM_HEX_LEN / 2])
}

/// Composes a checksum over an ordered list of child checksums (or any
/// strings), per spec: "the checksum of a container equals the checksum of
/// the concatenation of the newline-separated checksums of its parts".
pub fn checksum(parts: &[impl AsRef<str>]) -> String {
    let joined = parts.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("\n");
    hash(&joined)
}

/// Checksum of one chapter's current content, per spec: stable under
/// trailing-newline normalization (callers pass the already-trimmed text
/// `ChapterStore::get_chapter` returns).
pub fn checksum_of_chapter(usfm: &str) -> String {
    checksum(&[usfm])
}

/// Checksum of a book given the checksums of its chapters, already sorted
/// by chapter number by the caller.
pub fn checksum_of_book(chapter_checksums: &[String]) -> String {
    checksum(chapter_checksums)
}

/// Checksum of a bible given the checksums of its books, already sorted by
/// canonical book order by the caller.
pub fn checksum_of_bible(book_checksums: &[String]) -> String {
    checksum(book_checksums)
}

/// Checksum of a set of bibles, already sorted by name by the caller.
pub fn checksum_of_bibles(bible_checksums: &[String]) -> String {
    checksum(bible_checksums)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_fixed_width() {
        let a = hash("hello");
        let b = hash("hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), CHECKSUM_HEX_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hash_differs_for_different_input() {
        assert_ne!(hash("a"), hash("b"));
    }

    #[test]
    fn checksum_is_newline_join_then_hash() {
        let parts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(checksum(&parts), hash("a\nb\nc"));
    }

    #[test]
    fn composition_is_associative_across_levels() {
        let verse_checksums = vec![hash("v1 text"), hash("v2 text")];
        let chapter = checksum_of_chapter("v1 text\nv2 text");
        // Not claiming verse-level composition equals whole-chapter hashing
        // (the chapter checksum hashes raw text, not joined verse hashes) —
        // only that composing at each named level uses the same rule.
        let book = checksum_of_book(&[chapter.clone(), hash("ch2")]);
        let bible = checksum_of_bible(&[book.clone()]);
        let bibles = checksum_of_bibles(&[bible.clone()]);
        assert_eq!(book, checksum(&[chapter, hash("ch2")]));
        assert_eq!(bible, checksum(&[book]));
        assert_eq!(bibles, checksum(&[bible]));
        let _ = verse_checksums;
    }

    #[test]
    fn stable_under_trailing_newline_normalization() {
        // Callers are expected to pass already-normalized (trimmed) text;
        // document that the checksum itself does not special-case newlines.
        assert_ne!(checksum_of_chapter("text"), checksum_of_chapter("text\n"));
    }
}
