//! Storage: the event and story tables, behind two traits.
//!
//! [`Db`] is the Postgres implementation used in production. [`MemoryDb`]
//! implements the same contracts in-process for tests and dry runs.
//!
//! Connections come from the pool per statement, and every status write is
//! its own committed statement, so no transaction spans more than one event.

pub mod events;
pub mod memory;
pub mod stories;

use crate::error::{Error, Result};
use crate::model::{Event, EventId, EventStatus, NewStory, Story, StoryStatus};
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub use memory::MemoryDb;

/// Durable table of queued events.
///
/// The status mutators only move an event forward along
/// `pending -> processing -> {completed | failed}`. Anything else is rejected
/// without touching the row.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert a new `pending` event and return it.
    async fn insert_event(&self, event_type: &str, payload: &serde_json::Value) -> Result<Event>;

    /// All `pending` events in ascending id order.
    async fn pending_events(&self) -> Result<Vec<Event>>;

    async fn get_event(&self, id: EventId) -> Result<Option<Event>>;

    /// Most recent events first, optionally filtered by status.
    async fn list_events(&self, status: Option<EventStatus>, limit: i64) -> Result<Vec<Event>>;

    /// `pending -> processing`. Returns `true` only if this call moved the
    /// event. A missing or already-processing event yields `false`; a
    /// terminal event is an [`Error::InvalidTransition`].
    async fn claim_event(&self, id: EventId) -> Result<bool>;

    /// `processing -> completed`, storing `result` and stamping `processed_at`.
    async fn complete_event(&self, id: EventId, result: &serde_json::Value) -> Result<Event>;

    /// `processing -> failed`, storing `error` and stamping `processed_at`.
    async fn fail_event(&self, id: EventId, error: &str) -> Result<Event>;
}

/// Durable table of stories keyed by external id.
#[async_trait]
pub trait StoryStore: Send + Sync {
    /// Record a new story in `pending`. Duplicate external ids are rejected.
    async fn create_story(&self, new: &NewStory) -> Result<Story>;

    /// Record a new story together with the `pending` event that will
    /// process it. Both rows are written or neither is.
    async fn create_story_with_event(
        &self,
        new: &NewStory,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(Story, Event)>;

    async fn get_story(&self, external_id: i64) -> Result<Option<Story>>;

    /// Returns `None` if no story with that external id is stored locally.
    async fn update_story_status(
        &self,
        external_id: i64,
        status: StoryStatus,
    ) -> Result<Option<Story>>;
}

/// Build the error for a status write that matched no row.
pub(crate) fn rejected_transition(
    id: EventId,
    current: Option<EventStatus>,
    to: EventStatus,
) -> Error {
    match current {
        None => Error::NotFound(format!("event {id}")),
        Some(from) => Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        },
    }
}

/// Database handle. Owns the connection pool shared across all modules.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Round-trip a `SELECT 1` through the pool.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }
}
