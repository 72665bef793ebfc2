//! Pending-upload queue.
//!
//! File writes are recorded as queue items and drained by the sync cycle.
//! Coalescing happens at drain time: only the most recent item per
//! (task, blob kind) is uploaded, and successful uploads remove every item
//! at or before the uploaded timestamp so concurrent later writes survive
//! for the next cycle.

use chrono::{DateTime, Utc};
use tether_protocol::BlobKind;

/// Queue length at which a drain is triggered without waiting for the
/// periodic flush.
pub const FLUSH_THRESHOLD: usize = 5;

#[derive(Debug, Clone)]
pub struct QueueItem {
    pub task_id: String,
    pub blob: BlobKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct SyncQueue {
    items: Vec<QueueItem>,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, task_id: &str, blob: BlobKind) {
        self.items.push(QueueItem {
            task_id: task_id.to_string(),
            blob,
            timestamp: Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn should_flush(&self) -> bool {
        self.items.len() >= FLUSH_THRESHOLD
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Distinct task ids currently queued, in first-seen order.
    pub fn unique_task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for item in &self.items {
            if !ids.iter().any(|id| id == &item.task_id) {
                ids.push(item.task_id.clone());
            }
        }
        ids
    }

    /// Distinct blob kinds queued for one task, in first-seen order.
    pub fn blob_kinds_for_task(&self, task_id: &str) -> Vec<BlobKind> {
        let mut kinds: Vec<BlobKind> = Vec::new();
        for item in self.items.iter().filter(|i| i.task_id == task_id) {
            if !kinds.contains(&item.blob) {
                kinds.push(item.blob);
            }
        }
        kinds
    }

    /// Globally most recent item across every task, by timestamp. Its task
    /// identifies the last active session once the drain completes.
    pub fn last_item(&self) -> Option<&QueueItem> {
        self.items.iter().max_by_key(|i| i.timestamp)
    }

    /// Most recent item for one (task, blob kind), by timestamp.
    pub fn last_item_for_blob(&self, task_id: &str, blob: BlobKind) -> Option<&QueueItem> {
        self.items
            .iter()
            .filter(|i| i.task_id == task_id && i.blob == blob)
            .max_by_key(|i| i.timestamp)
    }

    /// Removes items for one (task, blob kind) whose timestamp is at or
    /// before `upto`. Items enqueued after the processed one stay queued,
    /// so no write is silently lost.
    pub fn remove_processed_items(&mut self, task_id: &str, blob: BlobKind, upto: DateTime<Utc>) {
        self.items
            .retain(|i| !(i.task_id == task_id && i.blob == blob && i.timestamp <= upto));
    }
}
