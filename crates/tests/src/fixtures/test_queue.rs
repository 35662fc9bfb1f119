use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;
use transcribo_asr::{
    Annotation, AsrQueueConfig, AsrQueueEngine, Collaborators, EnqueueRequest, ItemId, ItemStatus,
    JobType, NotificationSink, PcmAudioSource, QueueEvent, QueueItem, ReauthHandle, ReauthTrigger,
    Segment, Severity, TimeInterval,
};

use super::gateway::ScriptedGateway;

pub const SAMPLE_RATE: u32 = 16_000;
pub const TOTAL_SAMPLES: u64 = 160_000;
pub const SEGMENT_LENGTH: u64 = 32_000;
pub const LEVEL: &str = "OCTRA_1";

static TRACING: Once = Once::new();

/// Loads `.env` and installs a test subscriber once; `RUST_LOG` controls
/// verbosity.
pub fn init_tracing() {
    TRACING.call_once(|| {
        dotenvy::dotenv().ok();
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("transcribo_asr=debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Collects every notification instead of showing it.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(Severity, String)>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(Severity, String)> {
        self.messages.lock().clone()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|(_, m)| m.contains(needle))
            .count()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        self.messages.lock().push((severity, message.to_string()));
    }
}

/// Keeps re-authentication requests until the test resolves them.
#[derive(Default)]
pub struct ManualReauth {
    pending: Mutex<Vec<ReauthHandle>>,
    requests: AtomicUsize,
}

impl ManualReauth {
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn succeed(&self) {
        for handle in self.pending.lock().drain(..) {
            handle.succeeded();
        }
    }

    pub fn abandon(&self) {
        for handle in self.pending.lock().drain(..) {
            handle.abandoned();
        }
    }

    /// Drops pending handles without resolving them.
    pub fn drop_pending(&self) {
        self.pending.lock().clear();
    }
}

impl ReauthTrigger for ManualReauth {
    fn request_reauth(&self, outcome: ReauthHandle) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().push(outcome);
    }
}

/// An engine over a 10s clip with five 2s segments on level `OCTRA_1`.
pub struct TestQueue {
    pub engine: Arc<AsrQueueEngine>,
    pub gateway: Arc<ScriptedGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub reauth: Arc<ManualReauth>,
    pub audio: Arc<PcmAudioSource>,
    events: Mutex<Vec<QueueEvent>>,
    receiver: Mutex<tokio::sync::broadcast::Receiver<QueueEvent>>,
}

impl TestQueue {
    pub fn spawn() -> Self {
        Self::spawn_with(|_| {})
    }

    /// Spawns with a customized configuration.
    pub fn spawn_with(mutator: impl FnOnce(&mut AsrQueueConfig)) -> Self {
        init_tracing();

        let mut config = AsrQueueConfig::default();
        mutator(&mut config);

        let mut annotation = Annotation::new(TOTAL_SAMPLES);
        let boundaries: Vec<(u64, &str)> = (1..=5).map(|i| (i * SEGMENT_LENGTH, "")).collect();
        annotation
            .add_level_with_boundaries(LEVEL, &boundaries)
            .expect("valid test boundaries");

        let gateway = ScriptedGateway::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let reauth = Arc::new(ManualReauth::default());
        let audio = Arc::new(PcmAudioSource::new(
            SAMPLE_RATE,
            vec![0; TOTAL_SAMPLES as usize],
        ));

        let (engine, receiver) = AsrQueueEngine::new(
            config,
            Arc::new(Mutex::new(annotation)),
            Collaborators {
                gateway: gateway.clone(),
                audio: audio.clone(),
                notifier: notifier.clone(),
                reauth: reauth.clone(),
            },
        );

        Self {
            engine,
            gateway,
            notifier,
            reauth,
            audio,
            events: Mutex::new(Vec::new()),
            receiver: Mutex::new(receiver),
        }
    }

    /// The interval covering segment `index` (0-based).
    pub fn segment(index: u64) -> TimeInterval {
        TimeInterval::new(index * SEGMENT_LENGTH, SEGMENT_LENGTH)
    }

    pub async fn enqueue(&self, job_type: JobType, index: u64) -> ItemId {
        self.engine
            .enqueue(EnqueueRequest::new(job_type, LEVEL, Self::segment(index)))
            .await
            .expect("enqueue")
    }

    pub fn item(&self, id: ItemId) -> QueueItem {
        self.engine.item(id).expect("item exists")
    }

    pub fn status(&self, id: ItemId) -> ItemStatus {
        self.item(id).status()
    }

    pub async fn wait_for_status(&self, id: ItemId, status: ItemStatus) {
        wait_until(&format!("item {} to reach {:?}", id, status), || {
            self.engine.item(id).map(|i| i.status()) == Some(status)
        })
        .await;
    }

    /// Segment end samples of the test level.
    pub fn ends(&self) -> Vec<u64> {
        let annotation = self.engine.annotation();
        let annotation = annotation.lock();
        annotation
            .level(LEVEL)
            .map(|level| level.segments().iter().map(|s| s.end_sample).collect())
            .unwrap_or_default()
    }

    /// Clone of the `index`-th segment of the test level.
    pub fn segment_at(&self, index: usize) -> Segment {
        let annotation = self.engine.annotation();
        let annotation = annotation.lock();
        annotation.level(LEVEL).expect("test level").segments()[index].clone()
    }

    /// Drains the event receiver and returns everything seen so far.
    pub fn events(&self) -> Vec<QueueEvent> {
        let mut receiver = self.receiver.lock();
        let mut events = self.events.lock();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events.clone()
    }
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}

/// Lets spawned tasks run for a short while.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
