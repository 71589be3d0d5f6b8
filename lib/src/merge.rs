//! Three-way merge (spec §4.3): given an ancestor, the server's current
//! text, and the client's submitted text, produce a merged chapter,
//! resolving non-overlapping changes automatically and falling back to a
//! prefer-client policy for genuine conflicts.
//!
//! The line-level merge follows the classic diff3 shape: find the lines
//! common to all three texts via an LCS alignment against the ancestor,
//! then treat the spans between consecutive common lines as one of
//! unchanged / changed-by-one-side / changed-identically / conflicting.
//! A second, verse-aware pass (spec §4.3: "verse-aware second pass")
//! narrows any conflicting span down to the verse numbers it actually
//! touches, since a line-level conflict inside one footnote does not mean
//! every verse on that line is in dispute.

use crate::usfm;

/// One verse whose server and client text disagree with each other and
/// with the ancestor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerseConflict {
    pub verse: u32,
    pub ancestor: String,
    pub server: String,
    pub client: String,
}

/// Outcome of [`three_way_merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreeWayMerge {
    /// The merged chapter text. Always produced: conflicting spans are
    /// resolved by preferring the client's text, per spec.
    pub merged: String,
    /// Verses where server and client disagree on text that also
    /// diverges from the ancestor. Empty if the merge was conflict-free.
    pub conflicts: Vec<VerseConflict>,
}

impl ThreeWayMerge {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Performs the three-way line merge and verse-aware conflict pass.
pub fn three_way_merge(ancestor: &str, server: &str, client: &str) -> ThreeWayMerge {
    let merged = merge_lines(ancestor, server, client);
    let conflicts = verse_conflicts(ancestor, server, client);
    ThreeWayMerge { merged, conflicts }
}

fn merge_lines(ancestor: &str, server: &str, client: &str) -> String {
    let a: Vec<&str> = ancestor.lines().collect();
    let s: Vec<&str> = server.lines().collect();
    let c: Vec<&str> = client.lines().collect();

    let server_matches = lcs_matches(&a, &s);
    let client_matches = lcs_matches(&a, &c);

    // Anchors: base lines left unchanged by *both* sides, in increasing
    // order of (ancestor, server, client) index (guaranteed monotonic
    // because each matched-pair list is itself monotonic in both indices).
    let server_by_a: std::collections::HashMap<usize, usize> = server_matches.into_iter().collect();
    let client_by_a: std::collections::HashMap<usize, usize> = client_matches.into_iter().collect();

    let mut anchors: Vec<(usize, usize, usize)> = Vec::new();
    for ai in 0..a.len() {
        if let (Some(&si), Some(&ci)) = (server_by_a.get(&ai), client_by_a.get(&ai)) {
            anchors.push((ai, si, ci));
        }
    }

    let mut output = Vec::new();
    let mut prev: (isize, isize, isize) = (-1, -1, -1);
    let terminal = (a.len() as isize, s.len() as isize, c.len() as isize);
    let mut boundaries: Vec<(isize, isize, isize)> = anchors
        .iter()
        .map(|&(ai, si, ci)| (ai as isize, si as isize, ci as isize))
        .collect();
    boundaries.push(terminal);

    for (ai, si, ci) in boundaries {
        let base_range = &a[(prev.0 + 1) as usize..ai as usize];
        let server_range = &s[(prev.1 + 1) as usize..si as usize];
        let client_range = &c[(prev.2 + 1) as usize..ci as usize];

        if server_range == base_range && client_range == base_range {
            output.extend_from_slice(base_range);
        } else if server_range == base_range {
            output.extend_from_slice(client_range);
        } else if client_range == base_range {
            output.extend_from_slice(server_range);
        } else if server_range == client_range {
            output.extend_from_slice(server_range);
        } else {
            // Genuine conflict: prefer the client's text. The verse-aware
            // pass in `verse_conflicts` is what actually records this as a
            // conflict for callers; this function only needs to pick the
            // merged output.
            output.extend_from_slice(client_range);
        }

        if ai < a.len() as isize {
            output.push(a[ai as usize]);
        }
        prev = (ai, si, ci);
    }

    let mut merged = output.join("\n");
    if !merged.is_empty() {
        merged.push('\n');
    }
    merged
}

/// LCS alignment between `a` and `b`, returned as matched index pairs
/// `(i, j)` with `a[i] == b[j]`, strictly increasing in both coordinates.
fn lcs_matches(a: &[&str], b: &[&str]) -> Vec<(usize, usize)> {
    let (n, m) = (a.len(), b.len());
    let mut table = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if a[i] == b[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut matches = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            matches.push((i, j));
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    matches
}

/// Compares server and client against the ancestor verse-by-verse (spec
/// §4.3's "verse-aware second pass"): a verse is a true conflict only if
/// both sides edited it, differently from each other, and differently
/// from the ancestor.
fn verse_conflicts(ancestor: &str, server: &str, client: &str) -> Vec<VerseConflict> {
    let mut verses: Vec<u32> = usfm::get_verse_numbers(ancestor)
        .into_iter()
        .chain(usfm::get_verse_numbers(server))
        .chain(usfm::get_verse_numbers(client))
        .collect();
    verses.sort_unstable();
    verses.dedup();

    verses
        .into_iter()
        .filter_map(|verse| {
            let a_text = usfm::get_verse_text(ancestor, verse);
            let s_text = usfm::get_verse_text(server, verse);
            let c_text = usfm::get_verse_text(client, verse);
            if s_text != a_text && c_text != a_text && s_text != c_text {
                Some(VerseConflict {
                    verse,
                    ancestor: a_text,
                    server: s_text,
                    client: c_text,
                })
            } else {
                None
            }
        })
        .collect()
}
