use thiserror::Error;

use crate::annotation::SegmentId;
use crate::queue::{ItemId, ItemStatus};

/// Transport or service failure reported by the remote gateway.
///
/// The rendered message is what error classification inspects, so service
/// bodies are kept verbatim.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("service error {status}: {message}")]
    Service { status: u16, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("request timed out after {0}s")]
    Timeout(u64),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AudioError {
    #[error("audio source is unavailable")]
    SourceUnavailable,
    #[error("clip {start}+{length} exceeds source of {total} samples")]
    OutOfRange { start: u64, length: u64, total: u64 },
    #[error("clip encoding failed: {0}")]
    Encode(String),
}

/// Merge-time invariant violation. The annotation is never mutated when one
/// of these is returned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("level '{0}' not found")]
    LevelNotFound(String),
    #[error("segment {0} not found")]
    SegmentNotFound(SegmentId),
    #[error("no segment owns sample {sample}")]
    OwnerNotFound { sample: u64 },
    #[error("interval starting at {sample_start} crosses the start of segment {owner} at {owner_start}")]
    CrossesSegment {
        sample_start: u64,
        owner: SegmentId,
        owner_start: u64,
    },
    #[error("alignment result is empty")]
    EmptyAlignment,
    #[error("aligned word {index} ends at {end}, past the interval end {limit}")]
    WordOutOfBounds { index: usize, end: u64, limit: u64 },
    #[error("segment boundaries must be strictly increasing and end at {duration}")]
    InvalidBoundaries { duration: u64 },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("item {id} cannot move from {from:?} to {to:?}")]
    Invalid {
        id: ItemId,
        from: ItemStatus,
        to: ItemStatus,
    },
}

/// Outcome taxonomy of a pipeline run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Transport(#[from] GatewayError),
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),
    #[error(transparent)]
    Audio(#[from] AudioError),
    /// The worker task ended without reporting, e.g. by panicking.
    #[error("worker crashed: {0}")]
    Crashed(String),
    /// Cooperative cancellation acknowledgement, not a failure.
    #[error("stop requested")]
    StopRequested,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown ASR provider '{0}'")]
    UnknownProvider(String),
    #[error("provider '{provider}' does not support language '{language}'")]
    UnsupportedLanguage { provider: String, language: String },
    #[error("queue item {0} not found")]
    UnknownItem(ItemId),
    #[error("queue item {0} is running; stop it first")]
    ItemRunning(ItemId),
    #[error("interval {sample_start}+{sample_length} overflows the sample range")]
    InvalidInterval { sample_start: u64, sample_length: u64 },
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Consistency(#[from] ConsistencyError),
    #[error("queue engine has shut down")]
    Closed,
}
