//! Story table operations on Postgres.

use super::events::{EVENT_COLUMNS, EventRow};
use super::{Db, StoryStore};
use crate::error::{Error, Result};
use crate::model::{Event, NewStory, Story, StoryStatus};
use async_trait::async_trait;

const STORY_COLUMNS: &str =
    "id, external_id, title, area_path, iteration_path, status, created_at, updated_at";

#[async_trait]
impl StoryStore for Db {
    async fn create_story(&self, new: &NewStory) -> Result<Story> {
        let row: Option<StoryRow> = insert_story_query(new)
            .fetch_optional(self.pool())
            .await?;

        row.ok_or_else(|| duplicate(new))?.try_into_story()
    }

    async fn create_story_with_event(
        &self,
        new: &NewStory,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(Story, Event)> {
        let mut tx = self.pool().begin().await?;

        let Some(story) = insert_story_query(new).fetch_optional(&mut *tx).await? else {
            // Dropping the transaction rolls it back.
            return Err(duplicate(new));
        };

        let event: EventRow = sqlx::query_as(&format!(
            "INSERT INTO events (event_type, payload, status, created_at)
             VALUES ($1, $2, 'pending', $3)
             RETURNING {EVENT_COLUMNS}"
        ))
        .bind(event_type)
        .bind(payload)
        .bind(chrono::Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((story.try_into_story()?, event.try_into_event()?))
    }

    async fn get_story(&self, external_id: i64) -> Result<Option<Story>> {
        let row: Option<StoryRow> = sqlx::query_as(&format!(
            "SELECT {STORY_COLUMNS} FROM stories WHERE external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(StoryRow::try_into_story).transpose()
    }

    async fn update_story_status(
        &self,
        external_id: i64,
        status: StoryStatus,
    ) -> Result<Option<Story>> {
        let row: Option<StoryRow> = sqlx::query_as(&format!(
            "UPDATE stories SET status = $1, updated_at = $2
             WHERE external_id = $3
             RETURNING {STORY_COLUMNS}"
        ))
        .bind(status.as_str())
        .bind(chrono::Utc::now())
        .bind(external_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(StoryRow::try_into_story).transpose()
    }
}

const INSERT_STORY: &str = "INSERT INTO stories (external_id, title, area_path, iteration_path, status, created_at, updated_at)
     VALUES ($1, $2, $3, $4, 'pending', $5, $5)
     ON CONFLICT (external_id) DO NOTHING
     RETURNING id, external_id, title, area_path, iteration_path, status, created_at, updated_at";

fn insert_story_query(
    new: &NewStory,
) -> sqlx::query::QueryAs<'_, sqlx::Postgres, StoryRow, sqlx::postgres::PgArguments> {
    sqlx::query_as(INSERT_STORY)
        .bind(new.external_id)
        .bind(&new.title)
        .bind(&new.area_path)
        .bind(&new.iteration_path)
        .bind(chrono::Utc::now())
}

fn duplicate(new: &NewStory) -> Error {
    Error::Validation(format!("story #{} already exists", new.external_id))
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct StoryRow {
    id: i64,
    external_id: i64,
    title: String,
    area_path: Option<String>,
    iteration_path: Option<String>,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl StoryRow {
    fn try_into_story(self) -> Result<Story> {
        Ok(Story {
            id: self.id,
            external_id: self.external_id,
            title: self.title,
            area_path: self.area_path,
            iteration_path: self.iteration_path,
            status: self.status.parse()?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
