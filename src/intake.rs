//! Intake: accept a user story, record it, and queue the work for it.
//!
//! Callers always get an "accepted" answer with the event id. Whether the
//! subtasks were actually created is only visible later, on the story's or
//! the event's status.

use crate::db::StoryStore;
use crate::error::{Error, Result};
use crate::model::{EventId, EventKind, ItemCreated, NewStory, Story};
use crate::queue::record_published;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

pub const MAX_TITLE_CHARS: usize = 500;
pub const MAX_PATH_CHARS: usize = 255;

/// Response returned to the caller once a story has been queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Accepted {
    pub status: String,
    pub message: String,
    pub story_id: i64,
    pub event_id: EventId,
}

#[derive(Clone)]
pub struct StoryService {
    stories: Arc<dyn StoryStore>,
}

impl StoryService {
    pub fn new(stories: Arc<dyn StoryStore>) -> Self {
        Self { stories }
    }

    /// Validate, then store the story as `pending` together with its
    /// `item_created` event.
    ///
    /// Invalid input is rejected before anything is written. The story and
    /// the event are committed together, so a failed call can simply be
    /// retried.
    pub async fn create_user_story(&self, new: NewStory) -> Result<Accepted> {
        let new = validate(new)?;
        info!(story_id = new.external_id, title = %new.title, "creating user story");

        let kind = EventKind::ItemCreated(ItemCreated {
            story_id: new.external_id,
            title: new.title.clone(),
            area_path: new.area_path.clone(),
            iteration_path: new.iteration_path.clone(),
        });
        let (_, event) = self
            .stories
            .create_story_with_event(&new, kind.event_type(), &kind.payload()?)
            .await?;
        record_published(&event);
        let event_id = event.id;

        Ok(Accepted {
            status: "accepted".to_string(),
            message: format!(
                "Story #{} received. Subtasks will be created asynchronously.",
                new.external_id
            ),
            story_id: new.external_id,
            event_id,
        })
    }

    pub async fn get_user_story(&self, external_id: i64) -> Result<Option<Story>> {
        self.stories.get_story(external_id).await
    }
}

/// Check the caller's input and normalize it: titles are trimmed and blank
/// optional paths become `None`.
pub fn validate(new: NewStory) -> Result<NewStory> {
    if new.external_id <= 0 {
        return Err(Error::Validation(format!(
            "story id must be positive, got {}",
            new.external_id
        )));
    }

    let title = new.title.trim().to_string();
    if title.is_empty() {
        return Err(Error::Validation("title must not be empty".to_string()));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(Error::Validation(format!(
            "title must be at most {MAX_TITLE_CHARS} characters"
        )));
    }

    Ok(NewStory {
        external_id: new.external_id,
        title,
        area_path: optional_path("area_path", new.area_path)?,
        iteration_path: optional_path("iteration_path", new.iteration_path)?,
    })
}

fn optional_path(field: &str, value: Option<String>) -> Result<Option<String>> {
    match value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(v) if v.chars().count() > MAX_PATH_CHARS => Err(Error::Validation(format!(
            "{field} must be at most {MAX_PATH_CHARS} characters"
        ))),
        other => Ok(other),
    }
}

/// Extract a story from an Azure DevOps service hook notification.
///
/// Only `workitem.created` notifications for work items of type
/// `User Story` are accepted; anything else yields `None` and should be
/// acknowledged and dropped by the caller.
pub fn story_from_service_hook(notification: &serde_json::Value) -> Option<NewStory> {
    if notification.get("eventType")?.as_str()? != "workitem.created" {
        return None;
    }
    let resource = notification.get("resource")?;
    let fields = resource.get("fields")?;
    if fields.get("System.WorkItemType")?.as_str()? != "User Story" {
        return None;
    }

    let text = |name: &str| {
        fields
            .get(name)
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    };

    Some(NewStory {
        external_id: resource.get("id")?.as_i64()?,
        title: text("System.Title")?,
        area_path: text("System.AreaPath"),
        iteration_path: text("System.IterationPath"),
    })
}
