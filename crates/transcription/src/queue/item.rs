use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::asr::{AlignedWordList, ProviderLanguage};
use crate::error::TransitionError;

pub type ItemId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Asr,
    WordAlignment,
    AsrWithAlignment,
}

impl JobType {
    pub fn needs_recognition(self) -> bool {
        matches!(self, JobType::Asr | JobType::AsrWithAlignment)
    }

    pub fn needs_alignment(self) -> bool {
        matches!(self, JobType::WordAlignment | JobType::AsrWithAlignment)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Idle,
    Started,
    Finished,
    Failed,
    NoAuth,
    NoQuota,
    Stopped,
}

impl ItemStatus {
    /// Allowed edges of the item lifecycle. `NO_QUOTA` and `NO_AUTH` may be
    /// requeued explicitly by the caller, like `FAILED`.
    pub fn can_transition_to(self, next: ItemStatus) -> bool {
        use ItemStatus::*;
        matches!(
            (self, next),
            (Idle, Started)
                | (Started, Finished | Failed | NoAuth | NoQuota | Stopped)
                | (NoAuth, Idle | Failed)
                | (Failed, Idle)
                | (NoQuota, Idle)
        )
    }

    /// Whether the item still occupies its time interval.
    pub fn is_active(self) -> bool {
        matches!(self, ItemStatus::Idle | ItemStatus::Started)
    }
}

/// Audio span covered by a job, in samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub sample_start: u64,
    pub sample_length: u64,
}

impl TimeInterval {
    pub fn new(sample_start: u64, sample_length: u64) -> Self {
        Self {
            sample_start,
            sample_length,
        }
    }

    /// Exclusive end sample, or `None` when it does not fit in a `u64`.
    pub fn checked_end(&self) -> Option<u64> {
        self.sample_start.checked_add(self.sample_length)
    }

    /// Exclusive end sample, saturating at `u64::MAX`.
    pub fn end(&self) -> u64 {
        self.sample_start.saturating_add(self.sample_length)
    }

    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.sample_start < other.end() && other.sample_start < self.end()
    }
}

/// Origin of a failure. Only service-side failures are run again after a
/// successful re-authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCause {
    /// The ASR service rejected the request or could not be reached.
    Service,
    /// The item waited on a re-authentication that was abandoned.
    ReauthAbandoned,
    /// The item used up its re-authentication attempts.
    ReauthExhausted,
    /// Validation, audio, merge or worker failure on this side.
    Local,
}

impl FailureCause {
    pub fn requeues_after_reauth(self) -> bool {
        matches!(self, FailureCause::Service | FailureCause::ReauthAbandoned)
    }
}

/// One job of the ASR queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: ItemId,
    pub job_type: JobType,
    pub time_interval: TimeInterval,
    pub level: String,
    pub selected_provider: String,
    pub selected_language: String,
    pub transcript_input: Option<String>,
    status: ItemStatus,
    progress: u8,
    result: Option<String>,
    alignment: Option<AlignedWordList>,
    error: Option<String>,
    failure_cause: Option<FailureCause>,
    reauth_attempts: u32,
    enqueued_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new(
        id: ItemId,
        job_type: JobType,
        time_interval: TimeInterval,
        level: String,
        selection: &ProviderLanguage,
        transcript_input: Option<String>,
    ) -> Self {
        Self {
            id,
            job_type,
            time_interval,
            level,
            selected_provider: selection.provider.clone(),
            selected_language: selection.language.clone(),
            transcript_input,
            status: ItemStatus::Idle,
            progress: 0,
            result: None,
            alignment: None,
            error: None,
            failure_cause: None,
            reauth_attempts: 0,
            enqueued_at: Utc::now(),
        }
    }

    pub fn status(&self) -> ItemStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Final transcript, present only once `FINISHED`.
    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn alignment(&self) -> Option<&AlignedWordList> {
        self.alignment.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn failure_cause(&self) -> Option<FailureCause> {
        self.failure_cause
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    /// Time spent in the queue since enqueue, never negative.
    pub fn waited(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.enqueued_at).max(chrono::Duration::zero())
    }

    /// Whether a successful re-authentication should run the item again.
    pub fn requeues_after_reauth(&self) -> bool {
        match self.status {
            ItemStatus::NoAuth => true,
            ItemStatus::Failed => self
                .failure_cause
                .is_some_and(FailureCause::requeues_after_reauth),
            _ => false,
        }
    }

    pub fn reauth_attempts(&self) -> u32 {
        self.reauth_attempts
    }

    pub fn provider_language(&self) -> ProviderLanguage {
        ProviderLanguage::new(&self.selected_provider, &self.selected_language)
    }

    /// Applies a lifecycle edge and returns the previous status.
    pub fn transition(&mut self, to: ItemStatus) -> Result<ItemStatus, TransitionError> {
        let from = self.status;
        if !from.can_transition_to(to) {
            return Err(TransitionError::Invalid { id: self.id, from, to });
        }
        self.status = to;
        if to == ItemStatus::Idle {
            self.progress = 0;
            self.result = None;
            self.alignment = None;
            self.error = None;
            self.failure_cause = None;
        }
        Ok(from)
    }

    /// Raises progress while `STARTED`, capped at 99 until finished.
    /// Returns whether the stored value changed.
    pub fn set_progress(&mut self, progress: u8) -> bool {
        let next = progress.min(99);
        if self.status != ItemStatus::Started || next <= self.progress {
            return false;
        }
        self.progress = next;
        true
    }

    pub fn finish(
        &mut self,
        result: String,
        alignment: Option<AlignedWordList>,
    ) -> Result<ItemStatus, TransitionError> {
        let from = self.transition(ItemStatus::Finished)?;
        self.progress = 100;
        self.result = Some(result);
        self.alignment = alignment;
        Ok(from)
    }

    /// Moves to a failure status, keeping `message` for display.
    pub fn fail(
        &mut self,
        to: ItemStatus,
        cause: FailureCause,
        message: String,
    ) -> Result<ItemStatus, TransitionError> {
        let from = self.transition(to)?;
        self.error = Some(message);
        self.failure_cause = Some(cause);
        Ok(from)
    }

    /// Requeue triggered by a successful re-authentication.
    pub fn requeue_after_reauth(&mut self) -> Result<ItemStatus, TransitionError> {
        let from = self.transition(ItemStatus::Idle)?;
        if from == ItemStatus::NoAuth {
            self.reauth_attempts += 1;
        }
        Ok(from)
    }
}
