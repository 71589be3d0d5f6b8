//! The canonical USFM book identifier table.
//!
//! Book identifiers are small integers assigned by the USFM/Paratext
//! convention (Genesis is 1, Matthew is 40, ...). They are not contiguous
//! with display order: this table sorts them for display and also maps
//! the 3-letter `\id` codes used in USFM text to their numeric id, which
//! [`crate::usfm::parse`] needs to turn `\id MAT` into book 40.

use std::collections::HashMap;
use std::sync::LazyLock;

/// One well-known book, identified by its USFM number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Book {
    pub id: u16,
    pub code: &'static str,
    pub english_name: &'static str,
    /// Position in the canonical Protestant reading order, 0-based.
    pub order: u16,
}

// (id, 3-letter USFM code, english_name) in canonical reading order.
const BOOKS_IN_ORDER: &[(u16, &str, &str)] = &[
    (1, "GEN", "Genesis"),
    (2, "EXO", "Exodus"),
    (3, "LEV", "Leviticus"),
    (4, "NUM", "Numbers"),
    (5, "DEU", "Deuteronomy"),
    (6, "JOS", "Joshua"),
    (7, "JDG", "Judges"),
    (8, "RUT", "Ruth"),
    (9, "1SA", "1 Samuel"),
    (10, "2SA", "2 Samuel"),
    (11, "1KI", "1 Kings"),
    (12, "2KI", "2 Kings"),
    (13, "1CH", "1 Chronicles"),
    (14, "2CH", "2 Chronicles"),
    (15, "EZR", "Ezra"),
    (16, "NEH", "Nehemiah"),
    (17, "EST", "Esther"),
    (18, "JOB", "Job"),
    (19, "PSA", "Psalms"),
    (20, "PRO", "Proverbs"),
    (21, "ECC", "Ecclesiastes"),
    (22, "SNG", "Song of Solomon"),
    (23, "ISA", "Isaiah"),
    (24, "JER", "Jeremiah"),
    (25, "LAM", "Lamentations"),
    (26, "EZK", "Ezekiel"),
    (27, "DAN", "Daniel"),
    (28, "HOS", "Hosea"),
    (29, "JOL", "Joel"),
    (30, "AMO", "Amos"),
    (31, "OBA", "Obadiah"),
    (32, "JON", "Jonah"),
    (33, "MIC", "Micah"),
    (34, "NAM", "Nahum"),
    (35, "HAB", "Habakkuk"),
    (36, "ZEP", "Zephaniah"),
    (37, "HAG", "Haggai"),
    (38, "ZEC", "Zechariah"),
    (39, "MAL", "Malachi"),
    (40, "MAT", "Matthew"),
    (41, "MRK", "Mark"),
    (42, "LUK", "Luke"),
    (43, "JHN", "John"),
    (44, "ACT", "Acts"),
    (45, "ROM", "Romans"),
    (46, "1CO", "1 Corinthians"),
    (47, "2CO", "2 Corinthians"),
    (48, "GAL", "Galatians"),
    (49, "EPH", "Ephesians"),
    (50, "PHP", "Philippians"),
    (51, "COL", "Colossians"),
    (52, "1TH", "1 Thessalonians"),
    (53, "2TH", "2 Thessalonians"),
    (54, "1TI", "1 Timothy"),
    (55, "2TI", "2 Timothy"),
    (56, "TIT", "Titus"),
    (57, "PHM", "Philemon"),
    (58, "HEB", "Hebrews"),
    (59, "JAS", "James"),
    (60, "1PE", "1 Peter"),
    (61, "2PE", "2 Peter"),
    (62, "1JN", "1 John"),
    (63, "2JN", "2 John"),
    (64, "3JN", "3 John"),
    (65, "JUD", "Jude"),
    (66, "REV", "Revelation"),
];

static BY_ID: LazyLock<HashMap<u16, Book>> = LazyLock::new(|| {
    BOOKS_IN_ORDER
        .iter()
        .enumerate()
        .map(|(order, &(id, code, english_name))| {
            (
                id,
                Book {
                    id,
                    code,
                    english_name,
                    order: order as u16,
                },
            )
        })
        .collect()
});

static BY_CODE: LazyLock<HashMap<&'static str, u16>> =
    LazyLock::new(|| BY_ID.values().map(|b| (b.code, b.id)).collect());

/// Looks up a book by its USFM identifier. Unknown ids (front matter, extra
/// apocryphal/deuterocanonical slots a particular bible happens to use)
/// still sort, just after every known book, in id order.
pub fn lookup(id: u16) -> Option<Book> {
    BY_ID.get(&id).copied()
}

/// Maps a `\id` code (e.g. `"MAT"`, case-insensitive, as USFM allows either
/// case) to its numeric book id.
pub fn code_to_id(code: &str) -> Option<u16> {
    BY_CODE.get(code.to_ascii_uppercase().as_str()).copied()
}

/// English display name, falling back to `Book <id>` for ids outside the
/// 66-book canonical table (deuterocanonical or project-specific books).
pub fn english_name(id: u16) -> String {
    lookup(id).map_or_else(|| format!("Book {id}"), |b| b.english_name.to_string())
}

/// Sort key: known books sort by canonical reading order, unknown ones
/// sort after all known books, ordered among themselves by id.
pub fn order_key(id: u16) -> (u16, u16) {
    match lookup(id) {
        Some(book) => (0, book.order),
        None => (1, id),
    }
}

/// Sorts a list of book ids for display, per spec: "sorted for display by a
/// canonical order table".
pub fn sort_books(books: &mut [u16]) {
    books.sort_by_key(|&id| order_key(id));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_order_matches_table_position() {
        assert_eq!(lookup(1).unwrap().order, 0);
        assert_eq!(lookup(40).unwrap().order, 39);
        assert_eq!(lookup(66).unwrap().order, 65);
    }

    #[test]
    fn sort_books_orders_canonically_and_pushes_unknowns_last() {
        let mut books = vec![40, 1, 200, 66, 8, 7];
        sort_books(&mut books);
        assert_eq!(books, vec![1, 7, 8, 40, 66, 200]);
    }

    #[test]
    fn english_name_falls_back_for_unknown_ids() {
        assert_eq!(english_name(1), "Genesis");
        assert_eq!(english_name(999), "Book 999");
    }

    #[test]
    fn code_to_id_is_case_insensitive() {
        assert_eq!(code_to_id("mat"), Some(40));
        assert_eq!(code_to_id("MAT"), Some(40));
        assert_eq!(code_to_id("xyz"), None);
    }
}
