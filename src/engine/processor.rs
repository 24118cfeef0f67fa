//! Workflow processor: drive one event from `pending` to a terminal status.
//!
//! Remote side effects are not transactional with the local event status. If
//! subtask #3 fails, subtasks #1 and #2 stay created upstream and the event is
//! marked failed; nothing is rolled back and the event is not retried.
//!
//! Once an event is claimed its terminal status is always written: a storage
//! outage at that point is waited out rather than leaving the event in
//! `processing`.

use crate::config::WorkflowConfig;
use crate::db::StoryStore;
use crate::devops::WorkItemClient;
use crate::error::{Error, Result};
use crate::model::{Event, EventId, EventKind, ItemCompleted, ItemCreated, StoryStatus};
use crate::queue::EventQueue;
use crate::telemetry::events::{record_status_transition, start_event_span};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::AbortHandle;
use tracing::{Instrument, Span, error, info, warn};

/// Wait between attempts to record an event's outcome while storage is down.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// What happened to an event handed to [`Processor::process`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Completed(serde_json::Value),
    Failed(String),
    /// The event was not claimable (already taken or gone).
    Skipped,
}

#[derive(Clone)]
pub struct Processor {
    queue: EventQueue,
    stories: Arc<dyn StoryStore>,
    client: Arc<dyn WorkItemClient>,
    workflow: Arc<WorkflowConfig>,
    retry_interval: Duration,
}

impl Processor {
    pub fn new(
        queue: EventQueue,
        stories: Arc<dyn StoryStore>,
        client: Arc<dyn WorkItemClient>,
        workflow: WorkflowConfig,
    ) -> Self {
        Self {
            queue,
            stories,
            client,
            workflow: Arc::new(workflow),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Set how long to wait between attempts to record an outcome while
    /// storage is unavailable.
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Claim and process a single event.
    ///
    /// Every failure inside the workflow, including a panicking handler, ends
    /// with the event marked `failed`. An `Err` is returned only when the
    /// event cannot be claimed because of a storage failure, or when the
    /// outcome write is rejected outright.
    ///
    /// Dropping the returned future also aborts the handler task, so an
    /// aborted worker leaves no workflow running in the background.
    pub async fn process(&self, event: &Event) -> Result<ProcessOutcome> {
        let span = start_event_span(&event.event_type, event.id);
        self.process_claimed(event, &span)
            .instrument(span.clone())
            .await
    }

    async fn process_claimed(&self, event: &Event, span: &Span) -> Result<ProcessOutcome> {
        // A stale snapshot of an event that has since finished is skipped
        // like one that is still being processed elsewhere.
        match self.queue.mark_processing(event.id).await {
            Ok(true) => {}
            Ok(false) | Err(Error::InvalidTransition { .. }) => {
                return Ok(ProcessOutcome::Skipped);
            }
            Err(e) => return Err(e),
        }
        record_status_transition(span, "pending", "processing");
        info!(event_id = %event.id, event_type = %event.event_type, "processing event");

        let start = Instant::now();

        // Run the handler on its own task so a panic surfaces as a JoinError
        // instead of unwinding through the worker loop.
        let this = self.clone();
        let owned = event.clone();
        let task = tokio::spawn(async move { this.dispatch(&owned).await }.in_current_span());
        let _attached = AbortOnDrop(task.abort_handle());
        let handled = task.await.unwrap_or_else(|join_err| {
            Err(Error::Other(format!(
                "event handler aborted: {}",
                panic_message(join_err)
            )))
        });

        let outcome = match handled {
            Ok(result) => ProcessOutcome::Completed(result),
            Err(e) => {
                let message = e.to_string();
                error!(event_id = %event.id, error = %message, "event processing failed");
                ProcessOutcome::Failed(message)
            }
        };
        self.record_outcome(event.id, &outcome).await?;
        let status = match outcome {
            ProcessOutcome::Completed(_) => "completed",
            _ => "failed",
        };
        record_status_transition(span, "processing", status);
        metrics::event_duration_ms().record(
            start.elapsed().as_millis() as f64,
            &[
                KeyValue::new("event_type", event.event_type.clone()),
                KeyValue::new("status", status),
            ],
        );

        Ok(outcome)
    }

    /// Write the terminal status, retrying for as long as storage is down.
    async fn record_outcome(&self, id: EventId, outcome: &ProcessOutcome) -> Result<()> {
        let mut attempts = 0u32;
        loop {
            let written = match outcome {
                ProcessOutcome::Completed(result) => self.queue.mark_completed(id, result).await,
                ProcessOutcome::Failed(message) => self.queue.mark_failed(id, message).await,
                ProcessOutcome::Skipped => return Ok(()),
            };
            match written {
                Ok(_) => return Ok(()),
                Err(Error::Database(e)) => {
                    attempts += 1;
                    warn!(
                        event_id = %id,
                        attempts,
                        error = %e,
                        "cannot record event outcome, retrying"
                    );
                    tokio::time::sleep(self.retry_interval).await;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Decode and route to the handler for the event's kind.
    async fn dispatch(&self, event: &Event) -> Result<serde_json::Value> {
        match event.kind()? {
            EventKind::ItemCreated(item) => {
                let result = self.handle_item_created(event.id, item).await?;
                Ok(serde_json::to_value(result)?)
            }
            EventKind::ItemCompleted(done) => {
                info!(event_id = %event.id, story_id = done.story_id, "completion event recorded");
                Ok(json!({"status": "recorded"}))
            }
        }
    }

    async fn handle_item_created(
        &self,
        event_id: EventId,
        item: ItemCreated,
    ) -> Result<ItemCompleted> {
        let story_id = item.story_id;
        let area_path =
            non_blank(item.area_path).unwrap_or_else(|| self.workflow.default_area_path.clone());
        let iteration_path = non_blank(item.iteration_path)
            .unwrap_or_else(|| self.workflow.default_iteration_path.clone());

        info!(%event_id, story_id, %area_path, %iteration_path, "creating subtasks for story");
        self.set_story_status(story_id, StoryStatus::InProgress).await?;

        let task_ids = match self
            .create_subtasks(story_id, &area_path, &iteration_path)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                // Keep the workflow error; a failed status write is only logged.
                if let Err(status_err) = self.set_story_status(story_id, StoryStatus::Failed).await {
                    warn!(story_id, error = %status_err, "could not mark story failed");
                }
                return Err(e);
            }
        };

        let result = ItemCompleted {
            story_id,
            tasks_created: task_ids.len(),
            task_ids,
        };

        self.set_story_status(story_id, StoryStatus::Completed).await?;
        self.queue
            .publish_kind(&EventKind::ItemCompleted(result.clone()))
            .await?;

        info!(%event_id, story_id, tasks_created = result.tasks_created, "story processed");
        Ok(result)
    }

    /// Create every templated subtask in order and link each to the story.
    /// Stops at the first failure; already created tasks are left in place.
    async fn create_subtasks(
        &self,
        story_id: i64,
        area_path: &str,
        iteration_path: &str,
    ) -> Result<Vec<i64>> {
        let mut created = Vec::with_capacity(self.workflow.task_templates.len());

        for title in &self.workflow.task_templates {
            let attempt = async {
                let task_id = self
                    .client
                    .create_item(title, area_path, iteration_path)
                    .await?;
                created.push(task_id);
                self.client.link_item(task_id, story_id).await?;
                Ok::<_, Error>(task_id)
            }
            .await;

            match attempt {
                Ok(_) => {
                    metrics::subtasks_created().add(1, &[KeyValue::new("result", "ok")]);
                }
                Err(e) => {
                    metrics::subtasks_created().add(1, &[KeyValue::new("result", "error")]);
                    if !created.is_empty() {
                        warn!(
                            story_id,
                            left_upstream = ?created,
                            "subtask failed after earlier subtasks were created; they are not rolled back"
                        );
                    }
                    let detail = match e {
                        Error::External(msg) => msg,
                        other => other.to_string(),
                    };
                    return Err(Error::External(format!("subtask '{title}': {detail}")));
                }
            }
        }

        Ok(created)
    }

    async fn set_story_status(&self, story_id: i64, status: StoryStatus) -> Result<()> {
        if self
            .stories
            .update_story_status(story_id, status)
            .await?
            .is_none()
        {
            warn!(story_id, %status, "story not tracked locally, status not recorded");
        }
        Ok(())
    }
}

/// Aborts the handler task when the processing future is dropped.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
