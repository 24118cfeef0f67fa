//! Shared fixtures: in-memory storage and a scripted work item client.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use storyq::config::WorkflowConfig;
use storyq::db::MemoryDb;
use storyq::devops::WorkItemClient;
use storyq::engine::{Processor, Worker, WorkerConfig};
use storyq::error::{Error, Result};
use storyq::intake::StoryService;
use storyq::model::{Event, EventId, EventKind, EventStatus, NewStory};
use storyq::queue::EventQueue;

/// A task created through [`FakeClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedTask {
    pub id: i64,
    pub title: String,
    pub area_path: String,
    pub iteration_path: String,
}

/// Records every call. Creation call number `fail_on_create` (1-based)
/// fails; `panic_on_create` panics instead of answering.
#[derive(Default)]
pub struct FakeClient {
    pub next_id: AtomicI64,
    pub calls: AtomicUsize,
    pub fail_on_create: Option<usize>,
    pub fail_links: bool,
    pub panic_on_create: bool,
    pub delay: Option<Duration>,
    pub created: Mutex<Vec<CreatedTask>>,
    pub links: Mutex<Vec<(i64, i64)>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1000),
            ..Default::default()
        }
    }

    pub fn failing_on(call: usize) -> Self {
        Self {
            fail_on_create: Some(call),
            ..Self::new()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    pub fn created(&self) -> Vec<CreatedTask> {
        self.created.lock().unwrap().clone()
    }

    pub fn links(&self) -> Vec<(i64, i64)> {
        self.links.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkItemClient for FakeClient {
    async fn create_item(&self, title: &str, area_path: &str, iteration_path: &str) -> Result<i64> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.panic_on_create {
            panic!("remote client blew up");
        }
        if self.fail_on_create == Some(call) {
            return Err(Error::External(format!(
                "create task '{title}' failed: 500 Internal Server Error"
            )));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.created.lock().unwrap().push(CreatedTask {
            id,
            title: title.to_string(),
            area_path: area_path.to_string(),
            iteration_path: iteration_path.to_string(),
        });
        Ok(id)
    }

    async fn link_item(&self, child_id: i64, parent_id: i64) -> Result<()> {
        if self.fail_links {
            return Err(Error::External(format!(
                "link task #{child_id} to story #{parent_id} failed: 404 Not Found"
            )));
        }
        self.links.lock().unwrap().push((child_id, parent_id));
        Ok(())
    }
}

pub fn workflow(templates: &[&str]) -> WorkflowConfig {
    WorkflowConfig {
        default_area_path: "Team-A".to_string(),
        default_iteration_path: "Team-A".to_string(),
        task_templates: templates.iter().map(|t| t.to_string()).collect(),
    }
}

/// Everything wired against one [`MemoryDb`].
pub struct Harness {
    pub db: Arc<MemoryDb>,
    pub client: Arc<FakeClient>,
    pub queue: EventQueue,
    pub processor: Processor,
    pub stories: StoryService,
}

impl Harness {
    pub fn new(client: FakeClient, templates: &[&str]) -> Self {
        let db = Arc::new(MemoryDb::new());
        let client = Arc::new(client);
        let queue = EventQueue::new(db.clone());
        let processor = Processor::new(
            queue.clone(),
            db.clone(),
            client.clone(),
            workflow(templates),
        )
        .with_retry_interval(Duration::from_millis(20));
        let stories = StoryService::new(db.clone());
        Self {
            db,
            client,
            queue,
            processor,
            stories,
        }
    }

    pub fn worker(&self, poll_interval: Duration) -> Worker {
        Worker::new(
            self.queue.clone(),
            self.processor.clone(),
            WorkerConfig { poll_interval },
        )
    }

    /// Record a story and publish its `item_created` event.
    pub async fn submit(&self, id: i64, title: &str) -> EventId {
        self.stories
            .create_user_story(NewStory {
                external_id: id,
                title: title.to_string(),
                area_path: None,
                iteration_path: None,
            })
            .await
            .unwrap()
            .event_id
    }

    pub async fn event(&self, id: EventId) -> Event {
        self.queue.get(id).await.unwrap().expect("event exists")
    }

    pub async fn events_of_type(&self, event_type: &str) -> Vec<Event> {
        self.queue
            .list(None, 1000)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    pub async fn completion_events(&self) -> Vec<Event> {
        self.events_of_type(EventKind::ITEM_COMPLETED).await
    }

    /// Poll until `id` reaches `status` or the timeout elapses.
    pub async fn wait_for_status(&self, id: EventId, status: EventStatus, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            loop {
                if let Ok(Some(event)) = self.queue.get(id).await {
                    if event.status == status {
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("event {id} did not reach {status} within {timeout:?}"));
    }
}
