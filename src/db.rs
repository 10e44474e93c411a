// SQLite persistence layer for users, conversations, and messages.

use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Local;
use rusqlite::{params, Connection};
use thiserror::Error;

use crate::session::{Role, Turn};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    /// Username or email collides with an existing account. User-correctable.
    #[error("Username or Email already exists")]
    DuplicateEntry,

    /// Unknown user or wrong password. One message for both, so login
    /// failures never reveal which accounts exist.
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// Any other storage failure. Fatal to the triggering request only.
    #[error("storage unavailable: {0}")]
    Unavailable(#[from] anyhow::Error),
}

/// Identity returned by a successful credential check, and the payload of
/// the opaque session-continuity token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: i64,
    pub username: String,
}

/// One row of a user's conversation list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub id: i64,
    pub title: String,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// SQLite-backed persistence for user accounts, conversations, and their
/// message history.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                username      TEXT NOT NULL UNIQUE,
                email         TEXT UNIQUE,
                password_hash TEXT NOT NULL,
                created_at    TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS conversations (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id    INTEGER NOT NULL REFERENCES users(id),
                title      TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL REFERENCES conversations(id),
                role            TEXT NOT NULL,
                content         TEXT NOT NULL,
                timestamp       TEXT NOT NULL,
                is_voice        INTEGER NOT NULL DEFAULT 0
            );
            ",
        )
        .context("failed to create database schema")?;

        // Every message read filters on conversation_id; the rowid PK alone
        // cannot serve those lookups.
        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation
             ON messages(conversation_id);",
        )
        .context("failed to create conversation index")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Create a new account, storing an Argon2id hash of `password` with a
    /// fresh random salt. Never stores the plaintext. A username or email
    /// collision surfaces as [`StoreError::DuplicateEntry`].
    pub fn create_user(
        &self,
        username: &str,
        password: &str,
        email: Option<&str>,
    ) -> Result<i64, StoreError> {
        let password_hash = hash_password(password)?;
        let created_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

        let conn = self.conn();
        let result = conn.query_row(
            "INSERT INTO users (username, email, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4)
             RETURNING id",
            params![username, email, password_hash, created_at],
            |row| row.get(0),
        );

        match result {
            Ok(id) => Ok(id),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateEntry),
            Err(e) => Err(anyhow::Error::new(e)
                .context("failed to insert user")
                .into()),
        }
    }

    /// Check `password` against the stored hash for `username`.
    ///
    /// Unknown usernames, undecodable stored hashes, and wrong passwords all
    /// return [`StoreError::InvalidCredentials`] with the same message.
    pub fn verify_user(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AuthenticatedUser, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id, username, password_hash FROM users WHERE username = ?1")
            .context("failed to prepare verify_user query")?;

        let mut rows = stmt
            .query_map(params![username], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .context("failed to query user")?;

        let Some(row) = rows.next() else {
            return Err(StoreError::InvalidCredentials);
        };
        let (id, username, stored_hash) = row.context("failed to read user row")?;

        let parsed = PasswordHash::new(&stored_hash).map_err(|_| StoreError::InvalidCredentials)?;
        if Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_err()
        {
            return Err(StoreError::InvalidCredentials);
        }

        Ok(AuthenticatedUser { id, username })
    }

    /// Returns `true` if a user with this exact (id, username) pair exists.
    /// Backs session restoration from a previously issued token.
    pub fn user_exists(&self, user_id: i64, username: &str) -> Result<bool, StoreError> {
        let conn = self.conn();
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1 AND username = ?2)",
                params![user_id, username],
                |row| row.get(0),
            )
            .context("failed to check user existence")?;
        Ok(exists)
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    /// Create a conversation owned by `user_id` and return its id.
    pub fn create_conversation(&self, user_id: i64, title: &str) -> Result<i64, StoreError> {
        let created_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let conn = self.conn();
        let id: i64 = conn
            .query_row(
                "INSERT INTO conversations (user_id, title, created_at)
                 VALUES (?1, ?2, ?3)
                 RETURNING id",
                params![user_id, title, created_at],
                |row| row.get(0),
            )
            .context("failed to insert conversation")?;
        Ok(id)
    }

    /// List a user's conversations, most recent first.
    pub fn list_conversations(&self, user_id: i64) -> Result<Vec<ConversationSummary>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, title, created_at FROM conversations
                 WHERE user_id = ?1 ORDER BY id DESC",
            )
            .context("failed to prepare list_conversations query")?;

        let summaries = stmt
            .query_map(params![user_id], |row| {
                Ok(ConversationSummary {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })
            .context("failed to query conversations")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map conversation rows")?;

        Ok(summaries)
    }

    /// Delete a conversation and all its messages. Both deletes run in one
    /// transaction: either the conversation disappears entirely or nothing
    /// changes, so orphaned messages cannot occur.
    pub fn delete_conversation(&self, conversation_id: i64) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        tx.execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            params![conversation_id],
        )
        .context("failed to delete conversation messages")?;
        tx.execute(
            "DELETE FROM conversations WHERE id = ?1",
            params![conversation_id],
        )
        .context("failed to delete conversation")?;
        tx.commit().context("failed to commit delete_conversation")?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// Append one message. The row takes the next rowid, which is the only
    /// ordering authority; the turn's display timestamp is stored as given.
    pub fn append_message(&self, conversation_id: i64, turn: &Turn) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO messages (conversation_id, role, content, timestamp, is_voice)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                conversation_id,
                turn.role.as_str(),
                turn.content,
                turn.timestamp,
                turn.is_voice,
            ],
        )
        .context("failed to append message")?;
        Ok(())
    }

    /// Load a conversation's full history, oldest first.
    pub fn list_messages(&self, conversation_id: i64) -> Result<Vec<Turn>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT role, content, timestamp, is_voice FROM messages
                 WHERE conversation_id = ?1 ORDER BY id ASC",
            )
            .context("failed to prepare list_messages query")?;

        let turns = stmt
            .query_map(params![conversation_id], |row| {
                let role_str: String = row.get(0)?;
                let role = match role_str.as_str() {
                    "user" => Role::User,
                    _ => Role::Assistant,
                };
                Ok(Turn {
                    role,
                    content: row.get(1)?,
                    timestamp: row.get(2)?,
                    is_voice: row.get(3)?,
                })
            })
            .context("failed to query messages")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map message rows")?;

        Ok(turns)
    }

    /// Delete a conversation's messages while keeping the conversation row.
    /// Backs the transcript-clear operation.
    pub fn clear_messages(&self, conversation_id: i64) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            params![conversation_id],
        )
        .context("failed to clear messages")?;
        Ok(())
    }

    /// Return the number of messages stored for a conversation.
    pub fn message_count(&self, conversation_id: i64) -> Result<usize, StoreError> {
        let conn = self.conn();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )
            .context("failed to count messages")?;
        Ok(count as usize)
    }
}

// ---------------------------------------------------------------------------
// Password hashing
// ---------------------------------------------------------------------------

fn hash_password(password: &str) -> Result<String, StoreError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| StoreError::Unavailable(anyhow::anyhow!("failed to hash password: {e}")))?;
    Ok(hash.to_string())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: create a fresh in-memory database for each test.
    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    /// Helper: create a user and return their id.
    fn sample_user(db: &Database, username: &str) -> i64 {
        db.create_user(username, "hunter2!", Some(&format!("{username}@example.com")))
            .expect("user should be created")
    }

    /// Helper: build a user turn with a fixed timestamp.
    fn sample_turn(n: usize) -> Turn {
        Turn {
            role: Role::User,
            content: format!("message {n}"),
            timestamp: "09:15".to_string(),
            is_voice: false,
        }
    }

    // ------------------------------------------------------------------
    // Schema / open
    // ------------------------------------------------------------------

    #[test]
    fn open_creates_tables() {
        let db = test_db();
        let conn = db.conn();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"users".to_string()));
        assert!(tables.contains(&"conversations".to_string()));
        assert!(tables.contains(&"messages".to_string()));
    }

    // ------------------------------------------------------------------
    // Users and credentials
    // ------------------------------------------------------------------

    #[test]
    fn create_user_then_verify_round_trip() {
        let db = test_db();
        let id = db
            .create_user("mina", "correct horse", Some("mina@example.com"))
            .expect("signup should succeed");

        let user = db
            .verify_user("mina", "correct horse")
            .expect("login should succeed");
        assert_eq!(user.id, id);
        assert_eq!(user.username, "mina");
    }

    #[test]
    fn password_is_stored_salted_and_hashed() {
        let db = test_db();
        db.create_user("mina", "correct horse", None).unwrap();

        let conn = db.conn();
        let stored: String = conn
            .query_row(
                "SELECT password_hash FROM users WHERE username = 'mina'",
                [],
                |row| row.get(0),
            )
            .unwrap();

        assert_ne!(stored, "correct horse");
        assert!(stored.starts_with("$argon2"));
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let db = test_db();
        sample_user(&db, "mina");

        let err = db
            .create_user("mina", "other password", Some("other@example.com"))
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEntry));
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let db = test_db();
        db.create_user("mina", "pw", Some("shared@example.com"))
            .unwrap();

        let err = db
            .create_user("jon", "pw", Some("shared@example.com"))
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEntry));
    }

    #[test]
    fn missing_email_is_not_a_duplicate() {
        let db = test_db();
        db.create_user("mina", "pw", None).unwrap();
        db.create_user("jon", "pw", None)
            .expect("two users without emails should coexist");
    }

    #[test]
    fn unknown_user_and_wrong_password_fail_identically() {
        let db = test_db();
        sample_user(&db, "mina");

        let unknown = db.verify_user("nobody", "whatever").unwrap_err();
        let wrong = db.verify_user("mina", "not the password").unwrap_err();

        assert!(matches!(unknown, StoreError::InvalidCredentials));
        assert!(matches!(wrong, StoreError::InvalidCredentials));
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[test]
    fn user_exists_requires_matching_id_and_username() {
        let db = test_db();
        let id = sample_user(&db, "mina");

        assert!(db.user_exists(id, "mina").unwrap());
        assert!(!db.user_exists(id, "jon").unwrap());
        assert!(!db.user_exists(id + 999, "mina").unwrap());
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    #[test]
    fn list_conversations_most_recent_first() {
        let db = test_db();
        let user = sample_user(&db, "mina");

        let first = db.create_conversation(user, "First chat").unwrap();
        let second = db.create_conversation(user, "Second chat").unwrap();

        let listed = db.list_conversations(user).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second);
        assert_eq!(listed[0].title, "Second chat");
        assert_eq!(listed[1].id, first);
    }

    #[test]
    fn conversations_are_scoped_to_their_owner() {
        let db = test_db();
        let mina = sample_user(&db, "mina");
        let jon = sample_user(&db, "jon");
        db.create_conversation(mina, "Mina's chat").unwrap();

        assert!(db.list_conversations(jon).unwrap().is_empty());
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    #[test]
    fn messages_come_back_in_insertion_order() {
        let db = test_db();
        let user = sample_user(&db, "mina");
        let conv = db.create_conversation(user, "Chat").unwrap();

        for n in 0..5 {
            db.append_message(conv, &sample_turn(n)).unwrap();
        }

        let messages = db.list_messages(conv).unwrap();
        assert_eq!(messages.len(), 5);
        for (n, message) in messages.iter().enumerate() {
            assert_eq!(message.content, format!("message {n}"));
        }
    }

    #[test]
    fn roles_and_voice_flags_round_trip() {
        let db = test_db();
        let user = sample_user(&db, "mina");
        let conv = db.create_conversation(user, "Chat").unwrap();

        db.append_message(
            conv,
            &Turn {
                role: Role::Assistant,
                content: "Hello! How can I help?".to_string(),
                timestamp: "10:03".to_string(),
                is_voice: true,
            },
        )
        .unwrap();

        let messages = db.list_messages(conv).unwrap();
        assert_eq!(messages[0].role, Role::Assistant);
        assert!(messages[0].is_voice);
        assert_eq!(messages[0].timestamp, "10:03");
    }

    #[test]
    fn delete_conversation_removes_conversation_and_messages() {
        let db = test_db();
        let user = sample_user(&db, "mina");
        let conv = db.create_conversation(user, "Doomed").unwrap();
        db.append_message(conv, &sample_turn(0)).unwrap();
        db.append_message(conv, &sample_turn(1)).unwrap();

        db.delete_conversation(conv).unwrap();

        assert!(db.list_messages(conv).unwrap().is_empty());
        assert!(db.list_conversations(user).unwrap().is_empty());
    }

    #[test]
    fn clear_messages_keeps_the_conversation_row() {
        let db = test_db();
        let user = sample_user(&db, "mina");
        let conv = db.create_conversation(user, "Kept").unwrap();
        db.append_message(conv, &sample_turn(0)).unwrap();

        db.clear_messages(conv).unwrap();

        assert_eq!(db.message_count(conv).unwrap(), 0);
        let listed = db.list_conversations(user).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "Kept");
    }
}
