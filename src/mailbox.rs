//! Mailbox persistence: insert and the atomic claim-on-read transition.

use crate::db::{Database, StoreResult};
use rusqlite::{params, TransactionBehavior};
use serde::{Deserialize, Serialize};

/// A claimed (or pending) message as returned to its recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub from_agent: String,
    pub content: String,
    pub created: String,
}

impl Database {
    /// Appends a new message. Fails if the id already exists.
    pub fn insert_message(
        &self,
        id: &str,
        from_agent: &str,
        to_agent: &str,
        content: &str,
        created: &str,
    ) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                r#"INSERT INTO messages (id, from_agent, to_agent, content, created)
                   VALUES (?1, ?2, ?3, ?4, ?5)"#,
                params![id, from_agent, to_agent, content, created],
            )?;
            Ok(())
        })
    }

    /// Claims the oldest undone message addressed to `to_agent`.
    ///
    /// The select-check-update runs inside one IMMEDIATE transaction, so two
    /// concurrent claims for the same recipient can never both observe the
    /// same row as undone. On a hit the row is marked done and committed; on
    /// a miss the transaction is rolled back without writing. The transaction
    /// is held only for this call, never across a poll sleep.
    pub fn claim_oldest_undone(&self, to_agent: &str) -> StoreResult<Option<Message>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let found = {
                let mut stmt = tx.prepare(
                    r#"SELECT id, from_agent, content, created
                       FROM messages
                       WHERE to_agent = ?1 AND done = 0
                       ORDER BY created ASC, rowid ASC
                       LIMIT 1"#,
                )?;
                let result = stmt.query_row(params![to_agent], |row| {
                    Ok(Message {
                        id: row.get(0)?,
                        from_agent: row.get(1)?,
                        content: row.get(2)?,
                        created: row.get(3)?,
                    })
                });
                match result {
                    Ok(message) => Some(message),
                    Err(rusqlite::Error::QueryReturnedNoRows) => None,
                    Err(e) => return Err(e),
                }
            };

            match found {
                Some(message) => {
                    tx.execute(
                        "UPDATE messages SET done = 1 WHERE id = ?1",
                        params![message.id],
                    )?;
                    tx.commit()?;
                    Ok(Some(message))
                }
                None => {
                    tx.rollback()?;
                    Ok(None)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(db: &Database, id: &str, from: &str, to: &str, content: &str, created: &str) {
        db.insert_message(id, from, to, content, created).unwrap();
    }

    #[test]
    fn claim_returns_none_on_empty_inbox() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.claim_oldest_undone("bob").unwrap().is_none());
    }

    #[test]
    fn claimed_message_is_never_returned_again() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "m1", "alice", "bob", "hi", "2026-01-01T00:00:00Z");

        let first = db.claim_oldest_undone("bob").unwrap().unwrap();
        assert_eq!(first.id, "m1");
        assert_eq!(first.from_agent, "alice");
        assert_eq!(first.content, "hi");

        assert!(db.claim_oldest_undone("bob").unwrap().is_none());
    }

    #[test]
    fn claims_are_fifo_per_recipient() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "m1", "alice", "bob", "first", "2026-01-01T00:00:01Z");
        seed(&db, "m2", "alice", "bob", "second", "2026-01-01T00:00:02Z");

        assert_eq!(db.claim_oldest_undone("bob").unwrap().unwrap().id, "m1");
        assert_eq!(db.claim_oldest_undone("bob").unwrap().unwrap().id, "m2");
    }

    #[test]
    fn equal_timestamps_fall_back_to_insertion_order() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "m1", "alice", "bob", "first", "2026-01-01T00:00:00Z");
        seed(&db, "m2", "alice", "bob", "second", "2026-01-01T00:00:00Z");

        assert_eq!(db.claim_oldest_undone("bob").unwrap().unwrap().id, "m1");
        assert_eq!(db.claim_oldest_undone("bob").unwrap().unwrap().id, "m2");
    }

    #[test]
    fn claim_never_crosses_recipients() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "m1", "alice", "bob", "for bob", "2026-01-01T00:00:00Z");

        assert!(db.claim_oldest_undone("carol").unwrap().is_none());
        assert_eq!(db.claim_oldest_undone("bob").unwrap().unwrap().id, "m1");
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "m1", "alice", "bob", "hi", "2026-01-01T00:00:00Z");
        let err = db.insert_message("m1", "alice", "bob", "again", "2026-01-01T00:00:01Z");
        assert!(err.is_err());
    }

    #[test]
    fn concurrent_claims_deliver_at_most_once() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "m1", "alice", "bob", "only one", "2026-01-01T00:00:00Z");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                std::thread::spawn(move || db.claim_oldest_undone("bob").unwrap())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Option::is_some)
            .count();

        assert_eq!(winners, 1);
    }
}
