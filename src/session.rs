// Session state: identity, active conversation, turn history, settings.

use chrono::Local;

use crate::db::{Database, StoreError};
use crate::speech::Accent;

// ---------------------------------------------------------------------------
// Turns
// ---------------------------------------------------------------------------

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in a conversation. Immutable once stored; the display
/// timestamp is informational only and never used for ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: String,
    pub is_voice: bool,
}

impl Turn {
    /// Build a turn stamped with the current local time.
    pub fn now(role: Role, content: impl Into<String>, is_voice: bool) -> Self {
        Turn {
            role,
            content: content.into(),
            timestamp: Local::now().format("%H:%M").to_string(),
            is_voice,
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Proficiency level, controlling the vocabulary-complexity directive sent
/// to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Beginner,
    Intermediate,
    Advanced,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Beginner => "Beginner",
            Level::Intermediate => "Intermediate",
            Level::Advanced => "Advanced",
        }
    }

    /// Parse a level name as it appears in config files. Returns `None` for
    /// unrecognized names.
    pub fn parse(name: &str) -> Option<Level> {
        match name {
            "Beginner" => Some(Level::Beginner),
            "Intermediate" => Some(Level::Intermediate),
            "Advanced" => Some(Level::Advanced),
            _ => None,
        }
    }
}

/// Per-session tutoring settings. Dropped with the session on logout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub level: Level,
    pub accent: Accent,
    pub auto_speak: bool,
    pub correction_enabled: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            level: Level::Intermediate,
            accent: Accent::Us,
            auto_speak: true,
            correction_enabled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Where a session's turn pipeline currently stands. Guards against
/// overlapping submissions to the same session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    AwaitingTranscription,
    AwaitingModelReply,
}

/// Opaque continuity token handed to the caller after login. Presenting it
/// later re-enters [`Session::restore`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken {
    pub user_id: i64,
    pub username: String,
}

/// The live, in-memory state for one authenticated user's interaction.
///
/// A session is an explicit value: every operation takes the store handle it
/// writes through, and two sessions never share mutable state. The in-memory
/// turn list mirrors the persisted history of the active conversation.
#[derive(Debug)]
pub struct Session {
    pub user_id: i64,
    pub username: String,
    pub conversation_id: i64,
    pub turns: Vec<Turn>,
    pub settings: SessionSettings,
    pub phase: TurnPhase,
    /// Byte content of the last processed audio submission, for
    /// deduplication of repeated identical payloads.
    pub last_audio: Option<Vec<u8>>,
}

impl Session {
    /// Verify credentials and open a session on the user's most recent
    /// conversation, creating a default-titled one for first logins.
    pub fn login(
        db: &Database,
        username: &str,
        password: &str,
        settings: SessionSettings,
    ) -> Result<Session, StoreError> {
        let user = db.verify_user(username, password)?;
        Self::open_latest(db, user.id, user.username, settings)
    }

    /// Re-open a session from a previously issued token without a password
    /// check. Returns `Ok(None)` when the token no longer matches a stored
    /// user, so the caller can fall back to an unauthenticated state.
    pub fn restore(
        db: &Database,
        token: &SessionToken,
        settings: SessionSettings,
    ) -> Result<Option<Session>, StoreError> {
        if !db.user_exists(token.user_id, &token.username)? {
            return Ok(None);
        }
        Self::open_latest(db, token.user_id, token.username.clone(), settings).map(Some)
    }

    fn open_latest(
        db: &Database,
        user_id: i64,
        username: String,
        settings: SessionSettings,
    ) -> Result<Session, StoreError> {
        let conversation_id = match db.list_conversations(user_id)?.first() {
            Some(latest) => latest.id,
            None => db.create_conversation(user_id, &default_title())?,
        };
        let turns = db.list_messages(conversation_id)?;

        Ok(Session {
            user_id,
            username,
            conversation_id,
            turns,
            settings,
            phase: TurnPhase::Idle,
            last_audio: None,
        })
    }

    /// The continuity token for this session.
    pub fn token(&self) -> SessionToken {
        SessionToken {
            user_id: self.user_id,
            username: self.username.clone(),
        }
    }

    /// Create a fresh empty conversation and make it active. The previous
    /// conversation is left untouched.
    pub fn start_new_conversation(
        &mut self,
        db: &Database,
        title: Option<&str>,
    ) -> Result<i64, StoreError> {
        let title = match title {
            Some(t) => t.to_string(),
            None => default_title(),
        };
        let id = db.create_conversation(self.user_id, &title)?;
        self.conversation_id = id;
        self.turns.clear();
        Ok(id)
    }

    /// Make another conversation active, replacing the in-memory turn list
    /// with its persisted history.
    pub fn switch_conversation(&mut self, db: &Database, id: i64) -> Result<(), StoreError> {
        self.turns = db.list_messages(id)?;
        self.conversation_id = id;
        Ok(())
    }

    /// Append a turn to the in-memory list and persist it immediately.
    /// Write-through: a crash after this returns cannot lose a turn that was
    /// shown to the user.
    pub fn append_turn(
        &mut self,
        db: &Database,
        role: Role,
        content: impl Into<String>,
        is_voice: bool,
    ) -> Result<&Turn, StoreError> {
        let turn = Turn::now(role, content, is_voice);
        db.append_message(self.conversation_id, &turn)?;
        self.turns.push(turn);
        Ok(self.turns.last().expect("turn was just pushed"))
    }

    /// Empty the transcript of the active conversation, in memory and in the
    /// store, keeping the conversation itself. Display and persisted history
    /// never disagree.
    pub fn clear_transcript(&mut self, db: &Database) -> Result<(), StoreError> {
        db.clear_messages(self.conversation_id)?;
        self.turns.clear();
        Ok(())
    }

    /// Delete a conversation and its messages. If it was the active one, the
    /// session falls back to the most recent remaining conversation, or a
    /// fresh one when none remain.
    pub fn delete_conversation(&mut self, db: &Database, id: i64) -> Result<(), StoreError> {
        db.delete_conversation(id)?;
        if id == self.conversation_id {
            self.conversation_id = match db.list_conversations(self.user_id)?.first() {
                Some(latest) => latest.id,
                None => db.create_conversation(self.user_id, &default_title())?,
            };
            self.turns = db.list_messages(self.conversation_id)?;
        }
        Ok(())
    }

    /// End the session. All in-memory state, settings included, goes with it.
    pub fn logout(self) {}
}

/// Default conversation title, e.g. `Chat 08/24 14:30`.
fn default_title() -> String {
    format!("Chat {}", Local::now().format("%m/%d %H:%M"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    /// Helper: create a user and return a logged-in session.
    fn logged_in(db: &Database, username: &str) -> Session {
        db.create_user(username, "pw", None).unwrap();
        Session::login(db, username, "pw", SessionSettings::default()).unwrap()
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    #[test]
    fn default_settings_match_the_documented_defaults() {
        let settings = SessionSettings::default();
        assert_eq!(settings.level, Level::Intermediate);
        assert_eq!(settings.accent, Accent::Us);
        assert!(settings.auto_speak);
        assert!(settings.correction_enabled);
    }

    #[test]
    fn level_parse_round_trips() {
        for level in [Level::Beginner, Level::Intermediate, Level::Advanced] {
            assert_eq!(Level::parse(level.as_str()), Some(level));
        }
        assert_eq!(Level::parse("Fluent"), None);
    }

    // ------------------------------------------------------------------
    // Login / restore
    // ------------------------------------------------------------------

    #[test]
    fn first_login_creates_a_default_titled_conversation() {
        let db = test_db();
        let session = logged_in(&db, "mina");

        assert!(session.turns.is_empty());
        assert_eq!(session.phase, TurnPhase::Idle);

        let listed = db.list_conversations(session.user_id).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, session.conversation_id);
        assert!(listed[0].title.starts_with("Chat "));
    }

    #[test]
    fn login_opens_the_most_recent_conversation_with_history() {
        let db = test_db();
        let mut session = logged_in(&db, "mina");
        session
            .append_turn(&db, Role::User, "old conversation", false)
            .unwrap();
        let recent = session.start_new_conversation(&db, Some("Recent")).unwrap();
        session
            .append_turn(&db, Role::User, "hello again", false)
            .unwrap();
        session.logout();

        let reopened = Session::login(&db, "mina", "pw", SessionSettings::default()).unwrap();
        assert_eq!(reopened.conversation_id, recent);
        assert_eq!(reopened.turns.len(), 1);
        assert_eq!(reopened.turns[0].content, "hello again");
    }

    #[test]
    fn login_with_wrong_password_fails() {
        let db = test_db();
        db.create_user("mina", "pw", None).unwrap();
        let err =
            Session::login(&db, "mina", "not it", SessionSettings::default()).unwrap_err();
        assert!(matches!(err, StoreError::InvalidCredentials));
    }

    #[test]
    fn restore_reopens_the_same_conversation() {
        let db = test_db();
        let mut session = logged_in(&db, "mina");
        session
            .append_turn(&db, Role::User, "before restore", false)
            .unwrap();
        let token = session.token();
        let conversation = session.conversation_id;
        session.logout();

        let restored = Session::restore(&db, &token, SessionSettings::default())
            .unwrap()
            .expect("token should still be valid");
        assert_eq!(restored.conversation_id, conversation);
        assert_eq!(restored.turns.len(), 1);
        assert_eq!(restored.turns[0].content, "before restore");
    }

    #[test]
    fn restore_with_a_stale_token_yields_none() {
        let db = test_db();
        let session = logged_in(&db, "mina");
        let mut token = session.token();
        token.user_id += 999;

        let restored = Session::restore(&db, &token, SessionSettings::default()).unwrap();
        assert!(restored.is_none());
    }

    #[test]
    fn restore_requires_the_username_to_match_the_id() {
        let db = test_db();
        let session = logged_in(&db, "mina");
        let mut token = session.token();
        token.username = "jon".to_string();

        let restored = Session::restore(&db, &token, SessionSettings::default()).unwrap();
        assert!(restored.is_none());
    }

    // ------------------------------------------------------------------
    // Conversation management
    // ------------------------------------------------------------------

    #[test]
    fn append_turn_is_write_through() {
        let db = test_db();
        let mut session = logged_in(&db, "mina");

        session
            .append_turn(&db, Role::User, "persist me", false)
            .unwrap();

        let persisted = db.list_messages(session.conversation_id).unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].content, "persist me");
        assert_eq!(session.turns, persisted);
    }

    #[test]
    fn start_new_conversation_keeps_the_previous_one() {
        let db = test_db();
        let mut session = logged_in(&db, "mina");
        let old = session.conversation_id;
        session
            .append_turn(&db, Role::User, "in the old chat", false)
            .unwrap();

        let new = session.start_new_conversation(&db, None).unwrap();

        assert_ne!(new, old);
        assert_eq!(session.conversation_id, new);
        assert!(session.turns.is_empty());
        assert_eq!(db.list_messages(old).unwrap().len(), 1);
    }

    #[test]
    fn switch_conversation_replaces_the_turn_list() {
        let db = test_db();
        let mut session = logged_in(&db, "mina");
        let first = session.conversation_id;
        session
            .append_turn(&db, Role::User, "first conversation", false)
            .unwrap();
        session.start_new_conversation(&db, None).unwrap();

        session.switch_conversation(&db, first).unwrap();

        assert_eq!(session.conversation_id, first);
        assert_eq!(session.turns.len(), 1);
        assert_eq!(session.turns[0].content, "first conversation");
    }

    #[test]
    fn clear_transcript_empties_memory_and_store() {
        let db = test_db();
        let mut session = logged_in(&db, "mina");
        session
            .append_turn(&db, Role::User, "about to vanish", false)
            .unwrap();

        session.clear_transcript(&db).unwrap();

        assert!(session.turns.is_empty());
        assert_eq!(db.message_count(session.conversation_id).unwrap(), 0);
        assert_eq!(db.list_conversations(session.user_id).unwrap().len(), 1);
    }

    #[test]
    fn deleting_the_active_conversation_falls_back_to_the_latest() {
        let db = test_db();
        let mut session = logged_in(&db, "mina");
        let first = session.conversation_id;
        session
            .append_turn(&db, Role::User, "kept history", false)
            .unwrap();
        let second = session.start_new_conversation(&db, None).unwrap();

        session.delete_conversation(&db, second).unwrap();

        assert_eq!(session.conversation_id, first);
        assert_eq!(session.turns.len(), 1);
        assert_eq!(session.turns[0].content, "kept history");
    }

    #[test]
    fn deleting_the_last_conversation_creates_a_fresh_one() {
        let db = test_db();
        let mut session = logged_in(&db, "mina");
        let only = session.conversation_id;

        session.delete_conversation(&db, only).unwrap();

        assert_ne!(session.conversation_id, only);
        assert!(session.turns.is_empty());
        assert_eq!(db.list_conversations(session.user_id).unwrap().len(), 1);
    }
}
