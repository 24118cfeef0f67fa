//! In-process implementation of the storage traits.
//!
//! Mirrors the Postgres semantics row for row: ids are assigned in insert
//! order, status writes are guarded by the current status, and terminal
//! events are never touched again. Storage outages can be simulated with
//! [`MemoryDb::set_unavailable`], and a failing event table alone with
//! [`MemoryDb::set_event_inserts_failing`].

use super::{EventStore, StoryStore, rejected_transition};
use crate::error::{Error, Result};
use crate::model::{Event, EventId, EventStatus, NewStory, Story, StoryStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct MemoryDb {
    inner: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    events: BTreeMap<i64, Event>,
    stories: BTreeMap<i64, Story>,
    next_event_id: i64,
    next_story_id: i64,
    unavailable: bool,
    event_inserts_failing: bool,
}

impl Tables {
    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            Err(Error::Database(sqlx::Error::PoolTimedOut))
        } else {
            Ok(())
        }
    }

    fn insert_event(&mut self, event_type: &str, payload: &serde_json::Value) -> Result<Event> {
        if self.event_inserts_failing {
            return Err(Error::Database(sqlx::Error::PoolTimedOut));
        }
        self.next_event_id += 1;
        let event = Event {
            id: EventId(self.next_event_id),
            event_type: event_type.to_string(),
            payload: payload.clone(),
            status: EventStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            processed_at: None,
        };
        self.events.insert(event.id.0, event.clone());
        Ok(event)
    }

    fn insert_story(&mut self, new: &NewStory) -> Result<Story> {
        if self.stories.contains_key(&new.external_id) {
            return Err(Error::Validation(format!(
                "story #{} already exists",
                new.external_id
            )));
        }
        self.next_story_id += 1;
        let now = Utc::now();
        let story = Story {
            id: self.next_story_id,
            external_id: new.external_id,
            title: new.title.clone(),
            area_path: new.area_path.clone(),
            iteration_path: new.iteration_path.clone(),
            status: StoryStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.stories.insert(story.external_id, story.clone());
        Ok(story)
    }

    /// Guarded status write shared by the terminal transitions.
    fn finish(
        &mut self,
        id: EventId,
        to: EventStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<Event> {
        self.check_available()?;
        let event = match self.events.get_mut(&id.0) {
            Some(event) if event.status.can_transition_to(to) => event,
            other => return Err(rejected_transition(id, other.map(|e| e.status), to)),
        };
        event.status = to;
        event.result = result;
        event.error = error;
        event.processed_at = Some(Utc::now());
        Ok(event.clone())
    }
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every operation fails with a pool timeout.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().await.unavailable = unavailable;
    }

    /// While set, inserting an event fails but every other operation works.
    pub async fn set_event_inserts_failing(&self, failing: bool) {
        self.inner.lock().await.event_inserts_failing = failing;
    }
}

#[async_trait]
impl EventStore for MemoryDb {
    async fn insert_event(&self, event_type: &str, payload: &serde_json::Value) -> Result<Event> {
        let mut tables = self.inner.lock().await;
        tables.check_available()?;
        tables.insert_event(event_type, payload)
    }

    async fn pending_events(&self) -> Result<Vec<Event>> {
        let tables = self.inner.lock().await;
        tables.check_available()?;
        Ok(tables
            .events
            .values()
            .filter(|e| e.status == EventStatus::Pending)
            .cloned()
            .collect())
    }

    async fn get_event(&self, id: EventId) -> Result<Option<Event>> {
        let tables = self.inner.lock().await;
        tables.check_available()?;
        Ok(tables.events.get(&id.0).cloned())
    }

    async fn list_events(&self, status: Option<EventStatus>, limit: i64) -> Result<Vec<Event>> {
        let tables = self.inner.lock().await;
        tables.check_available()?;
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(tables
            .events
            .values()
            .rev()
            .filter(|e| status.is_none_or(|s| e.status == s))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn claim_event(&self, id: EventId) -> Result<bool> {
        let mut tables = self.inner.lock().await;
        tables.check_available()?;
        match tables.events.get_mut(&id.0) {
            None => Ok(false),
            Some(event) if event.status.can_transition_to(EventStatus::Processing) => {
                event.status = EventStatus::Processing;
                Ok(true)
            }
            Some(event) if event.status == EventStatus::Processing => Ok(false),
            Some(event) => Err(rejected_transition(
                id,
                Some(event.status),
                EventStatus::Processing,
            )),
        }
    }

    async fn complete_event(&self, id: EventId, result: &serde_json::Value) -> Result<Event> {
        self.inner
            .lock()
            .await
            .finish(id, EventStatus::Completed, Some(result.clone()), None)
    }

    async fn fail_event(&self, id: EventId, error: &str) -> Result<Event> {
        self.inner
            .lock()
            .await
            .finish(id, EventStatus::Failed, None, Some(error.to_string()))
    }
}

#[async_trait]
impl StoryStore for MemoryDb {
    async fn create_story(&self, new: &NewStory) -> Result<Story> {
        let mut tables = self.inner.lock().await;
        tables.check_available()?;
        tables.insert_story(new)
    }

    async fn create_story_with_event(
        &self,
        new: &NewStory,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(Story, Event)> {
        let mut tables = self.inner.lock().await;
        tables.check_available()?;
        let story = tables.insert_story(new)?;
        match tables.insert_event(event_type, payload) {
            Ok(event) => Ok((story, event)),
            Err(e) => {
                // Roll back the story insert.
                tables.stories.remove(&story.external_id);
                tables.next_story_id -= 1;
                Err(e)
            }
        }
    }

    async fn get_story(&self, external_id: i64) -> Result<Option<Story>> {
        let tables = self.inner.lock().await;
        tables.check_available()?;
        Ok(tables.stories.get(&external_id).cloned())
    }

    async fn update_story_status(
        &self,
        external_id: i64,
        status: StoryStatus,
    ) -> Result<Option<Story>> {
        let mut tables = self.inner.lock().await;
        tables.check_available()?;
        Ok(tables.stories.get_mut(&external_id).map(|story| {
            story.status = status;
            story.updated_at = Utc::now();
            story.clone()
        }))
    }
}
