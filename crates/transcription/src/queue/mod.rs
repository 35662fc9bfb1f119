pub mod classify;
pub mod item;

pub use classify::{ErrorClassifier, FailureKind};
pub use item::{FailureCause, ItemId, ItemStatus, JobType, QueueItem, TimeInterval};

use serde::{Deserialize, Serialize};

use crate::asr::ProviderLanguage;

/// Default ceiling on concurrently started items.
pub const MAX_PARALLEL: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Idle,
    Started,
}

/// Ordered job collection with bounded-concurrency admission.
#[derive(Debug, Clone)]
pub struct Queue {
    items: Vec<QueueItem>,
    id_counter: ItemId,
    status: QueueStatus,
    max_parallel: usize,
}

impl Queue {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            items: Vec::new(),
            id_counter: 0,
            status: QueueStatus::Idle,
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn get(&self, id: ItemId) -> Option<&QueueItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn get_mut(&mut self, id: ItemId) -> Option<&mut QueueItem> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    pub fn status(&self) -> QueueStatus {
        self.status
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn running_count(&self) -> usize {
        self.count(ItemStatus::Started)
    }

    pub fn count(&self, status: ItemStatus) -> usize {
        self.items.iter().filter(|i| i.status() == status).count()
    }

    /// Appends a new `IDLE` item and returns its id.
    pub fn enqueue(
        &mut self,
        job_type: JobType,
        time_interval: TimeInterval,
        level: String,
        selection: &ProviderLanguage,
        transcript_input: Option<String>,
    ) -> ItemId {
        self.id_counter += 1;
        let id = self.id_counter;
        self.items.push(QueueItem::new(
            id,
            job_type,
            time_interval,
            level,
            selection,
            transcript_input,
        ));
        id
    }

    /// Starts the oldest `IDLE` item if capacity allows.
    pub fn admit_next(&mut self) -> Option<QueueItem> {
        if self.running_count() >= self.max_parallel {
            return None;
        }

        let Some(item) = self.items.iter_mut().find(|i| i.status() == ItemStatus::Idle) else {
            self.status = QueueStatus::Idle;
            return None;
        };

        item.transition(ItemStatus::Started).ok()?;
        self.status = QueueStatus::Started;
        Some(item.clone())
    }

    pub fn remove(&mut self, id: ItemId) -> Option<QueueItem> {
        let index = self.items.iter().position(|i| i.id == id)?;
        Some(self.items.remove(index))
    }

    /// Whether an `IDLE`/`STARTED` item on `level` overlaps `interval`.
    pub fn overlaps_active(&self, level: &str, interval: &TimeInterval) -> bool {
        self.items
            .iter()
            .any(|i| i.status().is_active() && i.level == level && i.time_interval.overlaps(interval))
    }
}
