//! Embedded database: accounts, sessions, change records, and editor-load
//! snapshots, all behind a single [`parking_lot::Mutex`]-guarded
//! `rusqlite` connection.
//!
//! A single process-wide mutex around one connection is coarser than a
//! connection pool, but this server's write volume (chapter saves,
//! logins) never approaches the point where that coarseness is the
//! bottleneck, and it sidesteps SQLite's write-concurrency rules
//! entirely. If that ever changes, a pool is a mechanical follow-up, not
//! a redesign.

use chrono::DateTime;
use chrono::TimeZone as _;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::params;
use rusqlite::Connection;
use scriptura_core::change::ChangeError;
use scriptura_core::change::ChangeLedger;
use scriptura_core::change::ChangeRecord;
use scriptura_core::session::Account;
use scriptura_core::session::Role;
use scriptura_core::session::Session;
use scriptura_core::session::SessionError;
use scriptura_core::session::SessionStore;
use scriptura_core::snapshot::SnapshotError;
use scriptura_core::snapshot::SnapshotKey;
use scriptura_core::snapshot::SnapshotStore;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &std::path::Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS accounts (
                username TEXT PRIMARY KEY,
                role TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                email TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS sessions (
                username TEXT PRIMARY KEY,
                role TEXT NOT NULL,
                last_seen_unix INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS changes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL,
                bible TEXT NOT NULL,
                book INTEGER NOT NULL,
                chapter INTEGER NOT NULL,
                old_chapter_id INTEGER NOT NULL,
                new_chapter_id INTEGER NOT NULL,
                old_text TEXT NOT NULL,
                new_text TEXT NOT NULL,
                timestamp_unix INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS changes_by_user ON changes (username, timestamp_unix);
            CREATE TABLE IF NOT EXISTS snapshots (
                username TEXT NOT NULL,
                bible TEXT NOT NULL,
                book INTEGER NOT NULL,
                chapter INTEGER NOT NULL,
                usfm TEXT NOT NULL,
                PRIMARY KEY (username, bible, book, chapter)
            );
            ",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn create_account(
        &self,
        username: &str,
        role: Role,
        password_hash: &str,
        email: &str,
    ) -> Result<(), DbError> {
        self.conn.lock().execute(
            "INSERT INTO accounts (username, role, password_hash, email) VALUES (?1, ?2, ?3, ?4)",
            params![username, role_to_str(role), password_hash, email],
        )?;
        Ok(())
    }
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::Guest => "guest",
        Role::Member => "member",
        Role::Consultant => "consultant",
        Role::Translator => "translator",
        Role::Manager => "manager",
        Role::Admin => "admin",
    }
}

fn role_from_str(role: &str) -> Option<Role> {
    Some(match role {
        "guest" => Role::Guest,
        "member" => Role::Member,
        "consultant" => Role::Consultant,
        "translator" => Role::Translator,
        "manager" => Role::Manager,
        "admin" => Role::Admin,
        _ => return None,
    })
}

impl SessionStore for Database {
    fn find_account(&self, username: &str) -> Result<Option<Account>, SessionError> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT username, role, password_hash, email FROM accounts WHERE username = ?1",
            params![username],
            |row| {
                let role_str: String = row.get(1)?;
                Ok((
                    row.get::<_, String>(0)?,
                    role_str,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        );
        match result {
            Ok((username, role_str, password_hash, email)) => {
                let role = role_from_str(&role_str)
                    .ok_or_else(|| SessionError::Storage(format!("unknown role {role_str}")))?;
                Ok(Some(Account {
                    username,
                    role,
                    password_hash,
                    email,
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SessionError::Storage(e.to_string())),
        }
    }

    fn record_session(&self, session: &Session) -> Result<(), SessionError> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO sessions (username, role, last_seen_unix) VALUES (?1, ?2, ?3)
                 ON CONFLICT(username) DO UPDATE SET role = excluded.role, last_seen_unix = excluded.last_seen_unix",
                params![session.username, role_to_str(session.role), Utc::now().timestamp()],
            )
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        Ok(())
    }
}

impl ChangeLedger for Database {
    fn insert(&self, record: ChangeRecord) -> Result<(), ChangeError> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO changes
                    (username, bible, book, chapter, old_chapter_id, new_chapter_id, old_text, new_text, timestamp_unix)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.username,
                    record.bible,
                    record.book,
                    record.chapter,
                    record.old_chapter_id,
                    record.new_chapter_id,
                    record.old_text,
                    record.new_text,
                    record.timestamp.timestamp(),
                ],
            )
            .map_err(|e| ChangeError::Storage(e.to_string()))?;
        Ok(())
    }

    fn for_user_since(
        &self,
        username: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ChangeRecord>, ChangeError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT username, bible, book, chapter, old_chapter_id, new_chapter_id,
                        old_text, new_text, timestamp_unix
                 FROM changes WHERE username = ?1 AND timestamp_unix >= ?2
                 ORDER BY timestamp_unix ASC",
            )
            .map_err(|e| ChangeError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map(params![username, since.timestamp()], |row| {
                Ok(ChangeRecord {
                    username: row.get(0)?,
                    bible: row.get(1)?,
                    book: row.get(2)?,
                    chapter: row.get(3)?,
                    old_chapter_id: row.get(4)?,
                    new_chapter_id: row.get(5)?,
                    old_text: row.get(6)?,
                    new_text: row.get(7)?,
                    timestamp: Utc
                        .timestamp_opt(row.get(8)?, 0)
                        .single()
                        .unwrap_or_else(Utc::now),
                })
            })
            .map_err(|e| ChangeError::Storage(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| ChangeError::Storage(e.to_string()))
    }

    fn users_since(&self, since: DateTime<Utc>) -> Result<Vec<String>, ChangeError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT DISTINCT username FROM changes WHERE timestamp_unix >= ?1 ORDER BY username")
            .map_err(|e| ChangeError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map(params![since.timestamp()], |row| row.get::<_, String>(0))
            .map_err(|e| ChangeError::Storage(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| ChangeError::Storage(e.to_string()))
    }
}

impl SnapshotStore for Database {
    fn record(&self, key: &SnapshotKey, usfm: &str) -> Result<(), SnapshotError> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO snapshots (username, bible, book, chapter, usfm) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(username, bible, book, chapter) DO UPDATE SET usfm = excluded.usfm",
                params![key.username, key.bible, key.book, key.chapter, usfm],
            )
            .map_err(|e| SnapshotError::Storage(e.to_string()))?;
        Ok(())
    }

    fn take(&self, key: &SnapshotKey) -> Result<Option<String>, SnapshotError> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT usfm FROM snapshots WHERE username = ?1 AND bible = ?2 AND book = ?3 AND chapter = ?4",
            params![key.username, key.bible, key.book, key.chapter],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(usfm) => {
                conn.execute(
                    "DELETE FROM snapshots WHERE username = ?1 AND bible = ?2 AND book = ?3 AND chapter = ?4",
                    params![key.username, key.bible, key.book, key.chapter],
                )
                .map_err(|e| SnapshotError::Storage(e.to_string()))?;
                Ok(Some(usfm))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SnapshotError::Storage(e.to_string())),
        }
    }
}
