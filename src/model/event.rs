//! Queued events and their status lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A durable record of one unit of asynchronous work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Assigned on insert, strictly increasing. Also the processing order.
    pub id: EventId,

    /// Dispatch discriminator. Kept as the raw stored string so that types
    /// this build does not know about can still be loaded and failed cleanly.
    pub event_type: String,

    /// Type-specific data. Never mutated after creation.
    pub payload: serde_json::Value,

    pub status: EventStatus,

    /// Set exactly once, on the transition into `Completed`.
    pub result: Option<serde_json::Value>,

    /// Set exactly once, on the transition into `Failed`.
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,

    /// Set only on the terminal transition.
    pub processed_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Decode the stored type and payload into a typed [`EventKind`].
    pub fn kind(&self) -> Result<EventKind> {
        EventKind::decode(&self.event_type, &self.payload)
    }
}

/// Newtype for event IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub i64);

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of an event. Strictly forward-moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Published, waiting for the worker.
    Pending,
    /// Claimed by the worker, workflow running.
    Processing,
    /// Workflow finished successfully. Terminal.
    Completed,
    /// Workflow failed. Terminal, never retried.
    Failed,
}

impl EventStatus {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: EventStatus) -> bool {
        use EventStatus::*;
        matches!(
            (self, to),
            (Pending, Processing) | (Processing, Completed) | (Processing, Failed)
        )
    }

    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Completed | EventStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Processing => "processing",
            EventStatus::Completed => "completed",
            EventStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for EventStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(EventStatus::Pending),
            "processing" => Ok(EventStatus::Processing),
            "completed" => Ok(EventStatus::Completed),
            "failed" => Ok(EventStatus::Failed),
            other => Err(Error::Decode(format!("unknown event status '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// The closed set of event types this build knows how to process.
///
/// Dispatch matches exhaustively on this enum. Stored events whose type string
/// is not listed here surface as [`Error::UnknownEventType`] from
/// [`EventKind::decode`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    ItemCreated(ItemCreated),
    ItemCompleted(ItemCompleted),
}

impl EventKind {
    pub const ITEM_CREATED: &'static str = "item_created";
    pub const ITEM_COMPLETED: &'static str = "item_completed";

    /// The stored `event_type` string for this kind.
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::ItemCreated(_) => Self::ITEM_CREATED,
            EventKind::ItemCompleted(_) => Self::ITEM_COMPLETED,
        }
    }

    /// Serialize the payload half of this kind.
    pub fn payload(&self) -> Result<serde_json::Value> {
        let value = match self {
            EventKind::ItemCreated(p) => serde_json::to_value(p)?,
            EventKind::ItemCompleted(p) => serde_json::to_value(p)?,
        };
        Ok(value)
    }

    /// Decode a stored `(event_type, payload)` pair.
    pub fn decode(event_type: &str, payload: &serde_json::Value) -> Result<Self> {
        match event_type {
            Self::ITEM_CREATED => ItemCreated::deserialize(payload)
                .map(EventKind::ItemCreated)
                .map_err(|e| Error::Decode(format!("{event_type}: {e}"))),
            Self::ITEM_COMPLETED => ItemCompleted::deserialize(payload)
                .map(EventKind::ItemCompleted)
                .map_err(|e| Error::Decode(format!("{event_type}: {e}"))),
            other => Err(Error::UnknownEventType(other.to_string())),
        }
    }
}

/// Payload of `item_created`: a story was accepted and needs its subtasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCreated {
    pub story_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub area_path: Option<String>,
    #[serde(default)]
    pub iteration_path: Option<String>,
}

/// Payload of `item_completed`, and the result stored on the `item_created`
/// event that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCompleted {
    pub story_id: i64,
    pub tasks_created: usize,
    pub task_ids: Vec<i64>,
}
