//! # storyq
//!
//! Durable event queue for user story automation.
//!
//! Accepted stories are recorded and turned into `item_created` events in a
//! Postgres table. A single background worker polls the table, creates the
//! templated subtasks in Azure DevOps, links them to the story, and records
//! the outcome on the event. Failures are isolated to the event that caused
//! them.

pub mod config;
pub mod db;
pub mod devops;
pub mod engine;
pub mod error;
pub mod intake;
pub mod model;
pub mod queue;
pub mod telemetry;
