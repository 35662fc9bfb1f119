pub mod annotation;
pub mod asr;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod merge;
pub mod notify;
pub mod pipeline;
pub mod queue;
pub mod worker;

pub use annotation::{Annotation, Label, Level, Segment, SegmentId};
pub use asr::{AlignedWord, AlignedWordList, AsrGateway, HttpGateway, ProviderLanguage};
pub use audio::{AudioSource, EncodedClip, PcmAudioSource};
pub use config::{AsrQueueConfig, ProviderInfo};
pub use engine::{AsrQueueEngine, Collaborators, EnqueueRequest, QueueEvent};
pub use error::{
    AudioError, ConsistencyError, EngineError, GatewayError, PipelineError, TransitionError,
};
pub use notify::{NotificationSink, ReauthHandle, ReauthTrigger, Severity, TracingNotifier};
pub use queue::{
    FailureCause, ItemId, ItemStatus, JobType, MAX_PARALLEL, QueueItem, QueueStatus, TimeInterval,
};
