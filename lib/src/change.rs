//! The Change Recorder (spec §4.8): an append-only ledger of every chapter
//! write, and the nightly per-user/per-bible digest built from it.

use chrono::DateTime;
use chrono::Utc;
use thiserror::Error;

use crate::notify::Notification;
use crate::notify::Notifier;
use crate::session::SessionStore;

#[derive(Debug, Error)]
pub enum ChangeError {
    #[error("storage error: {0}")]
    Storage(String),
}

/// One recorded write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub username: String,
    pub bible: String,
    pub book: u16,
    pub chapter: u32,
    pub old_chapter_id: u32,
    pub new_chapter_id: u32,
    pub old_text: String,
    pub new_text: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only ledger seam. `scriptura-server` backs this with its
/// embedded database; `insert` must never fail the save pipeline it is
/// called from into rolling back an already-committed chapter write, so
/// callers treat a ledger failure as log-and-continue, not a save
/// failure (spec §4.8: "a missed change record must never block a save").
pub trait ChangeLedger: Send + Sync {
    fn insert(&self, record: ChangeRecord) -> Result<(), ChangeError>;
    fn for_user_since(
        &self,
        username: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ChangeRecord>, ChangeError>;

    /// Distinct usernames with at least one change since `since`, used to
    /// fan the nightly digest out one `for_user_since` query per user.
    fn users_since(&self, since: DateTime<Utc>) -> Result<Vec<String>, ChangeError>;
}

/// One line of a nightly digest: how many chapters a user touched, in
/// which bibles, since the last digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestEntry {
    pub bible: String,
    pub chapters_changed: usize,
}

/// Builds the nightly digest for one user from their change records since
/// the last digest, grouped by bible and counting each (book, chapter)
/// pair once no matter how many times it was re-saved that day.
pub fn build_digest(records: &[ChangeRecord]) -> Vec<DigestEntry> {
    use std::collections::BTreeMap;
    use std::collections::BTreeSet;

    let mut touched: BTreeMap<String, BTreeSet<(u16, u32)>> = BTreeMap::new();
    for record in records {
        touched
            .entry(record.bible.clone())
            .or_default()
            .insert((record.book, record.chapter));
    }

    touched
        .into_iter()
        .map(|(bible, chapters)| DigestEntry {
            bible,
            chapters_changed: chapters.len(),
        })
        .collect()
}

/// Builds and sends the nightly digest (spec §4.8): one notification per
/// user who changed at least one chapter since `since`, listing how many
/// chapters they touched in each bible. Runs under the maintenance
/// timer's one-day task; a failure for one user's digest is logged and
/// does not block the others (mirrors the save pipeline's
/// log-not-propagate rule for ledger writes). `accounts` resolves each
/// username to the email address `Notifier` implementations need; a user
/// with no resolvable account is skipped and logged rather than handed a
/// bare username that would silently fail delivery.
pub fn send_nightly_digests(
    ledger: &dyn ChangeLedger,
    accounts: &dyn SessionStore,
    notifier: &dyn Notifier,
    since: DateTime<Utc>,
) -> Result<(), ChangeError> {
    for username in ledger.users_since(since)? {
        let records = ledger.for_user_since(&username, since)?;
        let digest = build_digest(&records);
        if digest.is_empty() {
            continue;
        }

        let email = match accounts
            .find_account(&username)
            .map_err(|e| ChangeError::Storage(e.to_string()))?
        {
            Some(account) => account.email,
            None => {
                tracing::warn!(%username, "no account found, skipping nightly digest");
                continue;
            }
        };

        let body = digest
            .iter()
            .map(|entry| format!("{}: {} chapter(s) changed", entry.bible, entry.chapters_changed))
            .collect::<Vec<_>>()
            .join("\n");
        notifier.notify(Notification {
            to: email,
            subject: "Your nightly editing digest".to_string(),
            body,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(bible: &str, book: u16, chapter: u32) -> ChangeRecord {
        ChangeRecord {
            username: "alice".to_string(),
            bible: bible.to_string(),
            book,
            chapter,
            old_chapter_id: 1,
            new_chapter_id: 2,
            old_text: "old".to_string(),
            new_text: "new".to_string(),
            timestamp: scriptura_testutils::fixed_now(),
        }
    }

    #[test]
    fn digest_counts_distinct_chapters_once_per_bible() {
        let records = vec![
            record("KJV", 40, 1),
            record("KJV", 40, 1),
            record("KJV", 41, 1),
            record("ASV", 1, 1),
        ];
        let digest = build_digest(&records);
        assert_eq!(
            digest,
            vec![
                DigestEntry {
                    bible: "ASV".to_string(),
                    chapters_changed: 1,
                },
                DigestEntry {
                    bible: "KJV".to_string(),
                    chapters_changed: 2,
                },
            ]
        );
    }

    #[test]
    fn empty_history_yields_empty_digest() {
        assert_eq!(build_digest(&[]), Vec::new());
    }

    #[derive(Default)]
    struct MemoryLedger(std::sync::Mutex<Vec<ChangeRecord>>);
    impl ChangeLedger for MemoryLedger {
        fn insert(&self, record: ChangeRecord) -> Result<(), ChangeError> {
            self.0.lock().unwrap().push(record);
            Ok(())
        }
        fn for_user_since(
            &self,
            username: &str,
            since: DateTime<Utc>,
        ) -> Result<Vec<ChangeRecord>, ChangeError> {
            Ok(self
                .0
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.username == username && r.timestamp >= since)
                .cloned()
                .collect())
        }
        fn users_since(&self, since: DateTime<Utc>) -> Result<Vec<String>, ChangeError> {
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

    struct MapAccounts(Vec<(&'static str, &'static str)>);
    impl SessionStore for MapAccounts {
        fn find_account(
            &self,
            username: &str,
        ) -> Result<Option<crate::session::Account>, crate::session::SessionError> {
            Ok(self.0.iter().find(|(name, _)| *name == username).map(|(name, email)| {
                crate::session::Account {
                    username: name.to_string(),
                    role: crate::session::Role::Translator,
                    password_hash: String::new(),
                    email: email.to_string(),
                }
            }))
        }
        fn record_session(
            &self,
            _session: &crate::session::Session,
        ) -> Result<(), crate::session::SessionError> {
            Ok(())
        }
    }

    #[test]
    fn nightly_digest_sends_one_notification_per_active_user() {
        let ledger = MemoryLedger::default();
        ledger.insert(record("KJV", 40, 1)).unwrap();
        let mut bob_record = record("ASV", 1, 1);
        bob_record.username = "bob".to_string();
        ledger.insert(bob_record).unwrap();

        let accounts = MapAccounts(vec![
            ("alice", "alice@example.invalid"),
            ("bob", "bob@example.invalid"),
        ]);
        let notifier = scriptura_testutils::RecordingNotifier::default();
        send_nightly_digests(
            &ledger,
            &accounts,
            &notifier,
            scriptura_testutils::fixed_now() - chrono::Duration::days(1),
        )
        .unwrap();
        assert_eq!(notifier.count(), 2);
        assert!(notifier
            .sent
            .lock()
            .unwrap()
            .iter()
            .all(|n| n.to.contains('@')));
    }

    #[test]
    fn nightly_digest_skips_users_with_no_resolvable_account() {
        let ledger = MemoryLedger::default();
        ledger.insert(record("KJV", 40, 1)).unwrap();

        let accounts = MapAccounts(vec![]);
        let notifier = scriptura_testutils::RecordingNotifier::default();
        send_nightly_digests(
            &ledger,
            &accounts,
            &notifier,
            scriptura_testutils::fixed_now() - chrono::Duration::days(1),
        )
        .unwrap();
        assert_eq!(notifier.count(), 0);
    }
}
