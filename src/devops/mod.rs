//! Remote work item tracker: the side effects the workflow performs.
//!
//! The processor only sees [`WorkItemClient`]. [`AzureDevOpsClient`] is the
//! production implementation; tests substitute their own.

pub mod azure;

use crate::error::Result;
use async_trait::async_trait;

pub use azure::AzureDevOpsClient;

/// Creates and links work items in the upstream tracker.
///
/// Any `Err` is treated by the processor as a hard failure of that sub-item.
#[async_trait]
pub trait WorkItemClient: Send + Sync {
    /// Create a task and return its upstream id.
    async fn create_item(&self, title: &str, area_path: &str, iteration_path: &str)
    -> Result<i64>;

    /// Make `child_id` a child of `parent_id`.
    async fn link_item(&self, child_id: i64, parent_id: i64) -> Result<()>;
}
