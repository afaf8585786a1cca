//! Persistent conversation history, scoped by memory id, actor and session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;

use supervisor_core::ids::SessionId;
use supervisor_core::messages::Message;
use supervisor_core::turns::ConversationTurn;

use crate::database::Database;
use crate::error::StoreError;

/// Which slice of the store a history handle reads and writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryScope {
    pub memory_id: String,
    pub actor_id: String,
    pub session_id: SessionId,
}

/// History for one session. Implementations must be cheap to call from
/// async code; they never suspend.
pub trait HistoryStore: Send + Sync {
    /// The most recent `limit` turns, oldest first.
    fn load_recent(&self, limit: usize) -> Result<Vec<ConversationTurn>, StoreError>;

    /// Append all of `turns` or none of them.
    fn append_batch(&self, turns: &[ConversationTurn]) -> Result<(), StoreError>;

    fn append(&self, turn: &ConversationTurn) -> Result<(), StoreError> {
        self.append_batch(std::slice::from_ref(turn))
    }
}

/// Opens a [`HistoryStore`] for a new session.
pub trait HistoryStoreFactory: Send + Sync {
    fn open(&self, scope: HistoryScope) -> Result<Arc<dyn HistoryStore>, StoreError>;
}

pub struct SqliteHistoryStore {
    db: Database,
    scope: HistoryScope,
}

impl SqliteHistoryStore {
    pub fn new(db: Database, scope: HistoryScope) -> Self {
        Self { db, scope }
    }

    pub fn scope(&self) -> &HistoryScope {
        &self.scope
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM turns WHERE memory_id = ?1 AND actor_id = ?2 AND session_id = ?3",
                rusqlite::params![
                    self.scope.memory_id,
                    self.scope.actor_id,
                    self.scope.session_id.as_str()
                ],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }
}

impl HistoryStore for SqliteHistoryStore {
    #[instrument(skip(self), fields(session_id = %self.scope.session_id))]
    fn load_recent(&self, limit: usize) -> Result<Vec<ConversationTurn>, StoreError> {
        let mut turns = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT message, timestamp FROM turns
                 WHERE memory_id = ?1 AND actor_id = ?2 AND session_id = ?3
                 ORDER BY id DESC LIMIT ?4",
            )?;
            let rows = stmt.query_map(
                rusqlite::params![
                    self.scope.memory_id,
                    self.scope.actor_id,
                    self.scope.session_id.as_str(),
                    limit as i64
                ],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )?;

            let mut turns = Vec::new();
            for row in rows {
                let (raw_message, raw_ts) = row?;
                turns.push(decode_turn(&raw_message, &raw_ts)?);
            }
            Ok(turns)
        })?;
        turns.reverse();
        Ok(turns)
    }

    fn append_batch(&self, turns: &[ConversationTurn]) -> Result<(), StoreError> {
        let encoded = turns
            .iter()
            .map(|turn| Ok::<_, StoreError>((turn, serde_json::to_string(&turn.message)?)))
            .collect::<Result<Vec<_>, _>>()?;

        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO turns (memory_id, actor_id, session_id, role, message, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for (turn, message) in &encoded {
                    stmt.execute(rusqlite::params![
                        self.scope.memory_id,
                        self.scope.actor_id,
                        self.scope.session_id.as_str(),
                        turn.role().as_str(),
                        message,
                        turn.timestamp.to_rfc3339(),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }
}

fn decode_turn(raw_message: &str, raw_ts: &str) -> Result<ConversationTurn, StoreError> {
    let message: Message =
        serde_json::from_str(raw_message).map_err(|e| StoreError::CorruptRow {
            table: "turns",
            column: "message",
            detail: e.to_string(),
        })?;
    let timestamp = DateTime::parse_from_rfc3339(raw_ts)
        .map_err(|e| StoreError::CorruptRow {
            table: "turns",
            column: "timestamp",
            detail: e.to_string(),
        })?
        .with_timezone(&Utc);
    Ok(ConversationTurn { message, timestamp })
}

/// Hands out SQLite-backed history handles sharing one database.
pub struct SqliteHistoryFactory {
    db: Database,
}

impl SqliteHistoryFactory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl HistoryStoreFactory for SqliteHistoryFactory {
    fn open(&self, scope: HistoryScope) -> Result<Arc<dyn HistoryStore>, StoreError> {
        if scope.memory_id.trim().is_empty() {
            return Err(StoreError::Database("memory id must not be empty".into()));
        }
        Ok(Arc::new(SqliteHistoryStore::new(self.db.clone(), scope)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(session: &str, actor: &str) -> HistoryScope {
        HistoryScope {
            memory_id: "mem-1".into(),
            actor_id: actor.into(),
            session_id: SessionId::from_raw(session),
        }
    }

    #[test]
    fn append_then_load_in_order() {
        let db = Database::in_memory().unwrap();
        let store = SqliteHistoryStore::new(db, scope("s1", "default_user"));

        store.append(&ConversationTurn::user("hi")).unwrap();
        store.append(&ConversationTurn::assistant("hello")).unwrap();
        store.append(&ConversationTurn::user("how are you")).unwrap();

        let turns = store.load_recent(10).unwrap();
        let texts: Vec<String> = turns.iter().map(|t| t.content()).collect();
        assert_eq!(texts, vec!["hi", "hello", "how are you"]);
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn failed_batch_leaves_nothing_behind() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER reject_boom BEFORE INSERT ON turns
                 WHEN NEW.message LIKE '%boom%'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )?;
            Ok(())
        })
        .unwrap();
        let store = SqliteHistoryStore::new(db, scope("s1", "a"));

        let batch = [ConversationTurn::user("fine"), ConversationTurn::assistant("boom")];
        assert!(store.append_batch(&batch).is_err());
        assert_eq!(store.count().unwrap(), 0);

        store
            .append_batch(&[ConversationTurn::user("a"), ConversationTurn::assistant("b")])
            .unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn load_recent_keeps_newest() {
        let db = Database::in_memory().unwrap();
        let store = SqliteHistoryStore::new(db, scope("s1", "a"));
        for i in 0..6 {
            store.append(&ConversationTurn::user(format!("m{i}"))).unwrap();
        }
        let texts: Vec<String> = store
            .load_recent(2)
            .unwrap()
            .iter()
            .map(|t| t.content())
            .collect();
        assert_eq!(texts, vec!["m4", "m5"]);
    }

    #[test]
    fn scopes_are_isolated() {
        let db = Database::in_memory().unwrap();
        let factory = SqliteHistoryFactory::new(db);
        let a = factory.open(scope("s1", "alice")).unwrap();
        let b = factory.open(scope("s1", "bob")).unwrap();
        let c = factory.open(scope("s2", "alice")).unwrap();

        a.append(&ConversationTurn::user("from alice")).unwrap();

        assert_eq!(a.load_recent(10).unwrap().len(), 1);
        assert!(b.load_recent(10).unwrap().is_empty());
        assert!(c.load_recent(10).unwrap().is_empty());
    }

    #[test]
    fn reopened_scope_sees_prior_turns() {
        let db = Database::in_memory().unwrap();
        let factory = SqliteHistoryFactory::new(db);
        factory
            .open(scope("s1", "a"))
            .unwrap()
            .append(&ConversationTurn::user("persisted"))
            .unwrap();

        let reopened = factory.open(scope("s1", "a")).unwrap();
        let turns = reopened.load_recent(5).unwrap();
        assert_eq!(turns[0].content(), "persisted");
    }

    #[test]
    fn empty_memory_id_is_rejected() {
        let factory = SqliteHistoryFactory::new(Database::in_memory().unwrap());
        let mut s = scope("s1", "a");
        s.memory_id = "  ".into();
        assert!(factory.open(s).is_err());
    }

    #[test]
    fn corrupt_message_is_reported() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO turns (memory_id, actor_id, session_id, role, message, timestamp)
                 VALUES ('mem-1', 'a', 's1', 'user', 'not json', '2025-01-01T00:00:00Z')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        let store = SqliteHistoryStore::new(db, scope("s1", "a"));
        assert!(matches!(
            store.load_recent(5),
            Err(StoreError::CorruptRow { column: "message", .. })
        ));
    }
}
