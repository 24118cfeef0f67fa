//! Event table operations on Postgres.

use super::{Db, EventStore, rejected_transition};
use crate::error::Result;
use crate::model::{Event, EventId, EventStatus};
use async_trait::async_trait;

pub(super) const EVENT_COLUMNS: &str =
    "id, event_type, payload, status, result, error, created_at, processed_at";

#[async_trait]
impl EventStore for Db {
    async fn insert_event(&self, event_type: &str, payload: &serde_json::Value) -> Result<Event> {
        let row: EventRow = sqlx::query_as(&format!(
            "INSERT INTO events (event_type, payload, status, created_at)
             VALUES ($1, $2, 'pending', $3)
             RETURNING {EVENT_COLUMNS}"
        ))
        .bind(event_type)
        .bind(payload)
        .bind(chrono::Utc::now())
        .fetch_one(self.pool())
        .await?;

        row.try_into_event()
    }

    async fn pending_events(&self) -> Result<Vec<Event>> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE status = 'pending' ORDER BY id ASC"
        ))
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(EventRow::try_into_event).collect()
    }

    async fn get_event(&self, id: EventId) -> Result<Option<Event>> {
        let row: Option<EventRow> =
            sqlx::query_as(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(self.pool())
                .await?;

        row.map(EventRow::try_into_event).transpose()
    }

    async fn list_events(&self, status: Option<EventStatus>, limit: i64) -> Result<Vec<Event>> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE ($1::text IS NULL OR status = $1)
             ORDER BY id DESC
             LIMIT $2"
        ))
        .bind(status.map(EventStatus::as_str))
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(EventRow::try_into_event).collect()
    }

    async fn claim_event(&self, id: EventId) -> Result<bool> {
        // The status guard makes this an atomic claim: two callers racing on
        // the same pending row cannot both see a returned id.
        let claimed: Option<(i64,)> = sqlx::query_as(
            "UPDATE events SET status = 'processing'
             WHERE id = $1 AND status = 'pending'
             RETURNING id",
        )
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;

        if claimed.is_some() {
            return Ok(true);
        }

        match self.current_status(id).await? {
            None | Some(EventStatus::Processing) => Ok(false),
            current => Err(rejected_transition(id, current, EventStatus::Processing)),
        }
    }

    async fn complete_event(&self, id: EventId, result: &serde_json::Value) -> Result<Event> {
        let row: Option<EventRow> = sqlx::query_as(&format!(
            "UPDATE events SET status = 'completed', result = $2, processed_at = $3
             WHERE id = $1 AND status = 'processing'
             RETURNING {EVENT_COLUMNS}"
        ))
        .bind(id.0)
        .bind(result)
        .bind(chrono::Utc::now())
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => row.try_into_event(),
            None => {
                let current = self.current_status(id).await?;
                Err(rejected_transition(id, current, EventStatus::Completed))
            }
        }
    }

    async fn fail_event(&self, id: EventId, error: &str) -> Result<Event> {
        let row: Option<EventRow> = sqlx::query_as(&format!(
            "UPDATE events SET status = 'failed', error = $2, processed_at = $3
             WHERE id = $1 AND status = 'processing'
             RETURNING {EVENT_COLUMNS}"
        ))
        .bind(id.0)
        .bind(error)
        .bind(chrono::Utc::now())
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => row.try_into_event(),
            None => {
                let current = self.current_status(id).await?;
                Err(rejected_transition(id, current, EventStatus::Failed))
            }
        }
    }
}

impl Db {
    async fn current_status(&self, id: EventId) -> Result<Option<EventStatus>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM events WHERE id = $1")
            .bind(id.0)
            .fetch_optional(self.pool())
            .await?;

        row.map(|(status,)| status.parse()).transpose()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
pub(super) struct EventRow {
    id: i64,
    event_type: String,
    payload: serde_json::Value,
    status: String,
    result: Option<serde_json::Value>,
    error: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    processed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl EventRow {
    pub(super) fn try_into_event(self) -> Result<Event> {
        Ok(Event {
            id: EventId(self.id),
            event_type: self.event_type,
            payload: self.payload,
            status: self.status.parse()?,
            result: self.result,
            error: self.error,
            created_at: self.created_at,
            processed_at: self.processed_at,
        })
    }
}
