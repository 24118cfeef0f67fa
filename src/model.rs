//! Core data model.
//!
//! An event is one unit of asynchronous work sitting in the queue. A story is
//! the tracked work item the events act on. The two are correlated through
//! payload fields only, never through a foreign key.

pub mod event;
pub mod story;

pub use event::{Event, EventId, EventKind, EventStatus, ItemCompleted, ItemCreated};
pub use story::{NewStory, Story, StoryStatus};
