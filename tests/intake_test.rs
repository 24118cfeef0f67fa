//! Story intake: validation, recording, and the service hook filter.

mod common;

use common::{FakeClient, Harness};
use serde_json::json;
use storyq::error::Error;
use storyq::intake::{MAX_PATH_CHARS, MAX_TITLE_CHARS, story_from_service_hook, validate};
use storyq::model::{EventKind, EventStatus, ItemCreated, NewStory, StoryStatus};

fn story(id: i64, title: &str) -> NewStory {
    NewStory {
        external_id: id,
        title: title.to_string(),
        area_path: None,
        iteration_path: None,
    }
}

#[tokio::test]
async fn accepted_story_is_recorded_and_queued() {
    let h = Harness::new(FakeClient::new(), &["Design"]);
    let accepted = h
        .stories
        .create_user_story(NewStory {
            area_path: Some("Team-A".to_string()),
            ..story(42, "  Add login  ")
        })
        .await
        .unwrap();

    assert_eq!(accepted.status, "accepted");
    assert_eq!(accepted.story_id, 42);
    assert!(accepted.message.contains("#42"));

    let stored = h.stories.get_user_story(42).await.unwrap().unwrap();
    assert_eq!(stored.title, "Add login");
    assert_eq!(stored.status, StoryStatus::Pending);
    assert_eq!(stored.area_path.as_deref(), Some("Team-A"));
    assert!(stored.iteration_path.is_none());

    let event = h.event(accepted.event_id).await;
    assert_eq!(event.event_type, EventKind::ITEM_CREATED);
    assert_eq!(event.status, EventStatus::Pending);
    assert_eq!(
        event.kind().unwrap(),
        EventKind::ItemCreated(ItemCreated {
            story_id: 42,
            title: "Add login".to_string(),
            area_path: Some("Team-A".to_string()),
            iteration_path: None,
        })
    );
}

#[tokio::test]
async fn invalid_story_writes_nothing() {
    let h = Harness::new(FakeClient::new(), &["Design"]);
    for bad in [story(0, "Zero"), story(-3, "Negative"), story(5, "   ")] {
        let result = h.stories.create_user_story(bad).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    assert!(h.queue.list(None, 10).await.unwrap().is_empty());
    assert!(h.stories.get_user_story(5).await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_story_is_rejected_without_second_event() {
    let h = Harness::new(FakeClient::new(), &["Design"]);
    h.stories.create_user_story(story(7, "Once")).await.unwrap();

    let result = h.stories.create_user_story(story(7, "Twice")).await;
    assert!(matches!(result, Err(Error::Validation(_))));
    assert_eq!(h.queue.list(None, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn failed_publish_leaves_no_story_and_retry_succeeds() {
    let h = Harness::new(FakeClient::new(), &["Design"]);
    h.db.set_event_inserts_failing(true).await;

    let result = h.stories.create_user_story(story(7, "Retry me")).await;
    assert!(matches!(result, Err(Error::Database(_))));
    assert!(h.stories.get_user_story(7).await.unwrap().is_none());

    h.db.set_event_inserts_failing(false).await;
    let accepted = h
        .stories
        .create_user_story(story(7, "Retry me"))
        .await
        .unwrap();

    let pending = h.queue.fetch_pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, accepted.event_id);
    assert_eq!(pending[0].payload["story_id"], 7);
    assert!(h.stories.get_user_story(7).await.unwrap().is_some());
}

#[tokio::test]
async fn storage_outage_surfaces_to_caller() {
    let h = Harness::new(FakeClient::new(), &["Design"]);
    h.db.set_unavailable(true).await;

    let result = h.stories.create_user_story(story(8, "Down")).await;
    assert!(matches!(result, Err(Error::Database(_))));
}

#[test]
fn validate_enforces_length_limits() {
    let long_title = "x".repeat(MAX_TITLE_CHARS + 1);
    assert!(validate(story(1, &long_title)).is_err());
    assert!(validate(story(1, &"x".repeat(MAX_TITLE_CHARS))).is_ok());

    let long_path = NewStory {
        iteration_path: Some("p".repeat(MAX_PATH_CHARS + 1)),
        ..story(1, "Title")
    };
    let err = validate(long_path).unwrap_err();
    assert!(err.to_string().contains("iteration_path"));
}

#[test]
fn validate_turns_blank_paths_into_none() {
    let normalized = validate(NewStory {
        area_path: Some("   ".to_string()),
        iteration_path: Some(" Team-A\\Sprint 2 ".to_string()),
        ..story(1, "Title")
    })
    .unwrap();
    assert!(normalized.area_path.is_none());
    assert_eq!(normalized.iteration_path.as_deref(), Some("Team-A\\Sprint 2"));
}

fn hook(event_type: &str, item_type: &str) -> serde_json::Value {
    json!({
        "eventType": event_type,
        "resource": {
            "id": 1234,
            "fields": {
                "System.WorkItemType": item_type,
                "System.Title": "Checkout flow",
                "System.AreaPath": "Shop",
                "System.IterationPath": "Shop\\Sprint 9"
            }
        }
    })
}

#[test]
fn service_hook_accepts_created_user_story() {
    let new = story_from_service_hook(&hook("workitem.created", "User Story")).unwrap();
    assert_eq!(new.external_id, 1234);
    assert_eq!(new.title, "Checkout flow");
    assert_eq!(new.area_path.as_deref(), Some("Shop"));
    assert_eq!(new.iteration_path.as_deref(), Some("Shop\\Sprint 9"));
}

#[test]
fn service_hook_ignores_other_notifications() {
    assert!(story_from_service_hook(&hook("workitem.updated", "User Story")).is_none());
    assert!(story_from_service_hook(&hook("workitem.created", "Task")).is_none());
    assert!(story_from_service_hook(&hook("workitem.created", "Bug")).is_none());
    assert!(story_from_service_hook(&json!({"eventType": "workitem.created"})).is_none());
}
