//! Message relay: validation, send, and the blocking check-mail poll loop.

use crate::db::{Database, StorageError};
use crate::mailbox::Message;
use chrono::Utc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// How long a blocked `check_mail` sleeps between claim attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Invalid agent name: {0:?}")]
    InvalidName(String),
    #[error("Cannot determine agent identity outside of a request context")]
    NoIdentity,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type RelayResult<T> = Result<T, RelayError>;

/// Agent names are non-empty and contain only alphanumerics, `-` and `_`.
pub fn validate_agent_name(name: &str) -> RelayResult<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
        return Err(RelayError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Coordinates `send` and `check_mail` against the mailbox store.
///
/// Holds the store handle explicitly; it is opened once at startup and passed
/// in, never looked up through a global.
pub struct RelayService {
    db: Database,
    poll_interval: Duration,
}

impl RelayService {
    pub fn new(db: Database) -> Self {
        Self::with_poll_interval(db, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(db: Database, poll_interval: Duration) -> Self {
        Self { db, poll_interval }
    }

    /// Sends a message, returning its id.
    ///
    /// Only the recipient name is validated; the sender identity was already
    /// resolved by the transport and is trusted as-is. When `id` is absent a
    /// fresh UUID is generated.
    pub fn send(
        &self,
        from_agent: &str,
        to_agent: &str,
        content: &str,
        id: Option<&str>,
    ) -> RelayResult<String> {
        validate_agent_name(to_agent)?;

        let id = id.map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
        let created = Utc::now().to_rfc3339();

        self.db
            .insert_message(&id, from_agent, to_agent, content, &created)?;
        Ok(id)
    }

    /// Single claim attempt; `Ok(None)` means nothing is pending.
    pub fn check_once(&self, to_agent: &str) -> RelayResult<Option<Message>> {
        Ok(self.db.claim_oldest_undone(to_agent)?)
    }

    /// Blocks until a message can be claimed for `to_agent`.
    ///
    /// Polls at the configured interval. The sleep yields the task and holds
    /// no lock or transaction, so any number of recipients can wait without
    /// pinning resources. Dropping the future (caller disconnect) cancels the
    /// wait at the next await point without claiming anything. A storage
    /// failure aborts the loop; only the empty result is retried.
    pub async fn check_blocking(&self, to_agent: &str) -> RelayResult<Message> {
        loop {
            if let Some(message) = self.check_once(to_agent)? {
                return Ok(message);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
