use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, oneshot};
use chrono::Utc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::annotation::Annotation;
use crate::asr::{AsrGateway, ProviderLanguage};
use crate::audio::AudioSource;
use crate::config::{AsrQueueConfig, ProviderInfo};
use crate::error::{EngineError, PipelineError};
use crate::merge::{self, MergeMarkers};
use crate::notify::{NotificationSink, ReauthHandle, ReauthTrigger, Severity};
use crate::pipeline::StageContext;
use crate::queue::{
    ErrorClassifier, FailureCause, FailureKind, ItemId, ItemStatus, JobType, Queue, QueueItem, QueueStatus,
    TimeInterval,
};
use crate::worker::{Completion, ItemWorker};

/// Observable queue change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    Enqueued { id: ItemId },
    StatusChanged {
        id: ItemId,
        from: ItemStatus,
        to: ItemStatus,
    },
    Progress { id: ItemId, progress: u8 },
    Merged {
        id: ItemId,
        level: String,
        segments: usize,
    },
    Removed { id: ItemId },
}

/// A job to add to the queue. Provider and language are taken from the
/// engine's current selection.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub job_type: JobType,
    pub level: String,
    pub time_interval: TimeInterval,
    pub transcript_input: Option<String>,
}

impl EnqueueRequest {
    pub fn new(job_type: JobType, level: &str, time_interval: TimeInterval) -> Self {
        Self {
            job_type,
            level: level.to_string(),
            time_interval,
            transcript_input: None,
        }
    }

    pub fn with_transcript(mut self, text: impl Into<String>) -> Self {
        self.transcript_input = Some(text.into());
        self
    }
}

pub(crate) enum Command {
    Enqueue {
        request: EnqueueRequest,
        reply: oneshot::Sender<Result<ItemId, EngineError>>,
    },
    Stop {
        id: ItemId,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Retry {
        id: ItemId,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Remove {
        id: ItemId,
        reply: oneshot::Sender<Result<QueueItem, EngineError>>,
    },
    Progress {
        id: ItemId,
        progress: u8,
    },
    Completed {
        id: ItemId,
        outcome: Result<Completion, PipelineError>,
    },
    ReauthSucceeded,
    ReauthAbandoned,
    Shutdown,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Enqueue { request, .. } => write!(f, "Enqueue({:?})", request.job_type),
            Command::Stop { id, .. } => write!(f, "Stop({})", id),
            Command::Retry { id, .. } => write!(f, "Retry({})", id),
            Command::Remove { id, .. } => write!(f, "Remove({})", id),
            Command::Progress { id, progress } => write!(f, "Progress({}, {})", id, progress),
            Command::Completed { id, .. } => write!(f, "Completed({})", id),
            Command::ReauthSucceeded => write!(f, "ReauthSucceeded"),
            Command::ReauthAbandoned => write!(f, "ReauthAbandoned"),
            Command::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// External collaborators of the engine.
pub struct Collaborators {
    pub gateway: Arc<dyn AsrGateway>,
    pub audio: Arc<dyn AudioSource>,
    pub notifier: Arc<dyn NotificationSink>,
    pub reauth: Arc<dyn ReauthTrigger>,
}

/// Bounded-concurrency ASR job queue.
///
/// All queue and annotation mutations are applied by a single scheduling
/// task that consumes commands (enqueue, stop, stage completion,
/// re-authentication outcome) and re-evaluates capacity after each one.
/// The engine handle itself only reads snapshots and sends commands.
pub struct AsrQueueEngine {
    queue: Arc<Mutex<Queue>>,
    annotation: Arc<Mutex<Annotation>>,
    selection: Arc<RwLock<ProviderLanguage>>,
    config: Arc<AsrQueueConfig>,
    workers: Arc<DashMap<ItemId, AbortHandle>>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    events_tx: broadcast::Sender<QueueEvent>,
}

impl AsrQueueEngine {
    /// Creates the engine and spawns its scheduling loop on the current
    /// tokio runtime.
    ///
    /// Returns `(engine, event_receiver)`.
    pub fn new(
        config: AsrQueueConfig,
        annotation: Arc<Mutex<Annotation>>,
        collaborators: Collaborators,
    ) -> (Arc<Self>, broadcast::Receiver<QueueEvent>) {
        let (events_tx, events_rx) = broadcast::channel(256);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let queue = Arc::new(Mutex::new(Queue::new(config.max_parallel)));
        let selection = Arc::new(RwLock::new(config.default_selection.clone()));
        let workers = Arc::new(DashMap::new());
        let config = Arc::new(config);

        info!(
            max_parallel = config.max_parallel,
            gateway = %collaborators.gateway.name(),
            provider = %config.default_selection.provider,
            language = %config.default_selection.language,
            "ASR queue engine created"
        );

        let scheduler = Scheduler {
            queue: Arc::clone(&queue),
            annotation: Arc::clone(&annotation),
            selection: Arc::clone(&selection),
            classifier: config.classifier(),
            config: Arc::clone(&config),
            ctx: StageContext {
                gateway: collaborators.gateway,
                audio: collaborators.audio,
                request_timeout: config.request_timeout,
            },
            notifier: collaborators.notifier,
            reauth: collaborators.reauth,
            workers: Arc::clone(&workers),
            events_tx: events_tx.clone(),
            cmd_tx: cmd_tx.clone(),
            reauth_pending: false,
        };
        tokio::spawn(scheduler.run(cmd_rx));

        let engine = Arc::new(Self {
            queue,
            annotation,
            selection,
            config,
            workers,
            cmd_tx,
            events_tx,
        });

        (engine, events_rx)
    }

    /// Returns a new receiver for queue events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events_tx.subscribe()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> Command,
    ) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx.send(make(reply)).map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)?
    }

    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<ItemId, EngineError> {
        self.request(|reply| Command::Enqueue { request, reply }).await
    }

    /// Stops a started item immediately; a pending remote result is
    /// discarded when it arrives.
    pub async fn stop(&self, id: ItemId) -> Result<(), EngineError> {
        self.request(|reply| Command::Stop { id, reply }).await
    }

    /// Requeues a `FAILED`, `NO_QUOTA` or `NO_AUTH` item.
    pub async fn retry(&self, id: ItemId) -> Result<(), EngineError> {
        self.request(|reply| Command::Retry { id, reply }).await
    }

    pub async fn remove(&self, id: ItemId) -> Result<QueueItem, EngineError> {
        self.request(|reply| Command::Remove { id, reply }).await
    }

    /// Changes the provider/language used by subsequent enqueues. Items
    /// already in the queue keep their own selection.
    pub fn set_selection(&self, selection: ProviderLanguage) -> Result<(), EngineError> {
        let provider = self
            .config
            .provider(&selection.provider)
            .ok_or_else(|| EngineError::UnknownProvider(selection.provider.clone()))?;
        if !provider.supports_language(&selection.language) {
            return Err(EngineError::UnsupportedLanguage {
                provider: selection.provider,
                language: selection.language,
            });
        }
        *self.selection.write() = selection;
        Ok(())
    }

    pub fn selection(&self) -> ProviderLanguage {
        self.selection.read().clone()
    }

    pub fn items(&self) -> Vec<QueueItem> {
        self.queue.lock().items().to_vec()
    }

    pub fn item(&self, id: ItemId) -> Option<QueueItem> {
        self.queue.lock().get(id).cloned()
    }

    pub fn running_count(&self) -> usize {
        self.queue.lock().running_count()
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.lock().status()
    }

    /// Whether an active item on `level` already covers part of
    /// `interval`. The queue does not enforce disjoint intervals itself.
    pub fn overlaps_active(&self, level: &str, interval: &TimeInterval) -> bool {
        self.queue.lock().overlaps_active(level, interval)
    }

    pub fn annotation(&self) -> Arc<Mutex<Annotation>> {
        Arc::clone(&self.annotation)
    }

    /// Returns the number of pipelines still running.
    pub fn active_worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stops the scheduling loop and aborts running pipelines.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

impl Drop for AsrQueueEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Single writer of the queue and the annotation.
struct Scheduler {
    queue: Arc<Mutex<Queue>>,
    annotation: Arc<Mutex<Annotation>>,
    selection: Arc<RwLock<ProviderLanguage>>,
    config: Arc<AsrQueueConfig>,
    classifier: ErrorClassifier,
    ctx: StageContext,
    notifier: Arc<dyn NotificationSink>,
    reauth: Arc<dyn ReauthTrigger>,
    workers: Arc<DashMap<ItemId, AbortHandle>>,
    events_tx: broadcast::Sender<QueueEvent>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    reauth_pending: bool,
}

impl Scheduler {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = cmd_rx.recv().await {
            if matches!(command, Command::Shutdown) {
                break;
            }
            debug!(?command, "Queue command");
            self.handle(command);
            self.schedule();
        }

        for entry in self.workers.iter() {
            entry.value().abort();
        }
        self.workers.clear();
        debug!("ASR queue scheduler stopped");
    }

    fn emit(&self, event: QueueEvent) {
        let _ = self.events_tx.send(event);
    }

    fn emit_status(&self, id: ItemId, from: ItemStatus, to: ItemStatus) {
        info!(item_id = id, ?from, ?to, "Queue item status changed");
        self.emit(QueueEvent::StatusChanged { id, from, to });
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Enqueue { request, reply } => {
                let _ = reply.send(self.enqueue(request));
            }
            Command::Stop { id, reply } => {
                let _ = reply.send(self.stop(id));
            }
            Command::Retry { id, reply } => {
                let _ = reply.send(self.retry(id));
            }
            Command::Remove { id, reply } => {
                let _ = reply.send(self.remove(id));
            }
            Command::Progress { id, progress } => self.progress(id, progress),
            Command::Completed { id, outcome } => self.completed(id, outcome),
            Command::ReauthSucceeded => self.reauth_succeeded(),
            Command::ReauthAbandoned => self.reauth_abandoned(),
            Command::Shutdown => {}
        }
    }

    /// Admits idle items until the ceiling is reached.
    fn schedule(&mut self) {
        loop {
            let admitted = self.queue.lock().admit_next();
            let Some(item) = admitted else {
                break;
            };
            let id = item.id;
            info!(
                item_id = id,
                waited_ms = item.waited(Utc::now()).num_milliseconds(),
                "Queue item admitted"
            );
            self.emit_status(id, ItemStatus::Idle, ItemStatus::Started);

            let provider = self
                .config
                .provider(&item.selected_provider)
                .cloned()
                .unwrap_or_else(|| ProviderInfo::unlimited(&item.selected_provider));
            let worker = ItemWorker::new(
                item,
                provider,
                self.config.pause_placeholder.clone(),
                self.ctx.clone(),
                Arc::clone(&self.queue),
                self.cmd_tx.clone(),
            );
            let handle = tokio::spawn(worker.run());
            self.workers.insert(id, handle.abort_handle());
            tokio::spawn(supervise(id, handle, self.cmd_tx.clone()));
        }
    }

    fn set_block(&self, item: &QueueItem, blocked_by: Option<JobType>) {
        let mut annotation = self.annotation.lock();
        let result = match annotation.owning_segment(&item.level, item.time_interval.end()) {
            Ok(owner) => annotation.set_blocked(&item.level, owner.id(), blocked_by),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            debug!(item_id = item.id, error = %e, "Segment block marker not updated");
        }
    }

    fn enqueue(&mut self, request: EnqueueRequest) -> Result<ItemId, EngineError> {
        let interval = request.time_interval;
        let end = interval.checked_end().ok_or(EngineError::InvalidInterval {
            sample_start: interval.sample_start,
            sample_length: interval.sample_length,
        })?;
        let selection = self.selection.read().clone();
        let provider = self
            .config
            .provider(&selection.provider)
            .ok_or_else(|| EngineError::UnknownProvider(selection.provider.clone()))?;
        if !provider.supports_language(&selection.language) {
            return Err(EngineError::UnsupportedLanguage {
                provider: selection.provider,
                language: selection.language,
            });
        }
        self.annotation
            .lock()
            .owning_segment(&request.level, end)?;

        let id = self.queue.lock().enqueue(
            request.job_type,
            request.time_interval,
            request.level,
            &selection,
            request.transcript_input,
        );
        let item = self.queue.lock().get(id).cloned();
        if let Some(item) = item {
            self.set_block(&item, Some(item.job_type));
        }

        info!(
            item_id = id,
            job_type = ?request.job_type,
            sample_start = request.time_interval.sample_start,
            sample_length = request.time_interval.sample_length,
            provider = %selection.provider,
            "Queue item enqueued"
        );
        self.emit(QueueEvent::Enqueued { id });
        Ok(id)
    }

    fn stop(&mut self, id: ItemId) -> Result<(), EngineError> {
        let (item, from) = {
            let mut queue = self.queue.lock();
            let item = queue.get_mut(id).ok_or(EngineError::UnknownItem(id))?;
            let from = item.transition(ItemStatus::Stopped)?;
            (item.clone(), from)
        };
        self.set_block(&item, None);
        self.emit_status(id, from, ItemStatus::Stopped);
        Ok(())
    }

    fn retry(&mut self, id: ItemId) -> Result<(), EngineError> {
        let (item, from) = {
            let mut queue = self.queue.lock();
            let item = queue.get_mut(id).ok_or(EngineError::UnknownItem(id))?;
            let from = item.transition(ItemStatus::Idle)?;
            (item.clone(), from)
        };
        self.set_block(&item, Some(item.job_type));
        self.emit_status(id, from, ItemStatus::Idle);
        Ok(())
    }

    fn remove(&mut self, id: ItemId) -> Result<QueueItem, EngineError> {
        let item = {
            let mut queue = self.queue.lock();
            match queue.get(id).map(QueueItem::status) {
                None => return Err(EngineError::UnknownItem(id)),
                Some(ItemStatus::Started) => return Err(EngineError::ItemRunning(id)),
                Some(_) => {}
            }
            queue.remove(id).ok_or(EngineError::UnknownItem(id))?
        };
        if item.status() == ItemStatus::Idle {
            self.set_block(&item, None);
        }
        info!(item_id = id, "Queue item removed");
        self.emit(QueueEvent::Removed { id });
        Ok(item)
    }

    fn progress(&mut self, id: ItemId, progress: u8) {
        let updated = self
            .queue
            .lock()
            .get_mut(id)
            .and_then(|item| item.set_progress(progress).then(|| item.progress()));
        if let Some(progress) = updated {
            debug!(item_id = id, progress, "Queue item progress");
            self.emit(QueueEvent::Progress { id, progress });
        }
    }

    fn completed(&mut self, id: ItemId, outcome: Result<Completion, PipelineError>) {
        self.workers.remove(&id);

        let item = match self.queue.lock().get(id) {
            Some(item) if item.status() == ItemStatus::Started => item.clone(),
            Some(item) => {
                if !matches!(outcome, Err(PipelineError::StopRequested)) {
                    warn!(item_id = id, status = ?item.status(), "Discarding result of an item that is no longer started");
                }
                return;
            }
            None => {
                debug!(item_id = id, "Discarding result of a removed item");
                return;
            }
        };

        match outcome {
            Ok(completion) => self.finish(item, completion),
            Err(PipelineError::StopRequested) => {
                self.fail(
                    &item,
                    ItemStatus::Failed,
                    FailureCause::Local,
                    "pipeline stopped unexpectedly".to_string(),
                );
            }
            Err(PipelineError::Transport(e)) => {
                let message = e.to_string();
                let kind = self.classifier.classify(&message);
                self.fail_transport(&item, kind, message);
            }
            Err(e) => self.fail(&item, ItemStatus::Failed, FailureCause::Local, e.to_string()),
        }
    }

    fn finish(&mut self, item: QueueItem, completion: Completion) {
        let merged = {
            let mut annotation = self.annotation.lock();
            match &completion.alignment {
                Some(alignment) => merge::merge_alignment(
                    &mut annotation,
                    &item.level,
                    item.time_interval,
                    &alignment.words,
                    MergeMarkers {
                        pause_placeholder: &self.config.pause_placeholder,
                        break_marker: &self.config.break_marker,
                    },
                )
                .map(|run| run.segments.len()),
                None => merge::apply_recognition(
                    &mut annotation,
                    &item.level,
                    item.time_interval,
                    &completion.text,
                )
                .map(|_| 1),
            }
        };

        let segments = match merged {
            Ok(segments) => segments,
            Err(e) => {
                warn!(item_id = item.id, error = %e, "Merge rejected");
                self.fail(
                    &item,
                    ItemStatus::Failed,
                    FailureCause::Local,
                    format!("merge rejected: {}", e),
                );
                return;
            }
        };

        let finished = self
            .queue
            .lock()
            .get_mut(item.id)
            .map(|i| i.finish(completion.text, completion.alignment));
        match finished {
            Some(Ok(from)) => {
                self.emit_status(item.id, from, ItemStatus::Finished);
                self.emit(QueueEvent::Merged {
                    id: item.id,
                    level: item.level,
                    segments,
                });
            }
            Some(Err(e)) => warn!(item_id = item.id, error = %e, "Finish rejected"),
            None => {}
        }
    }

    fn fail_transport(&mut self, item: &QueueItem, kind: FailureKind, message: String) {
        if kind != FailureKind::NoAuth {
            self.fail(item, kind.into(), FailureCause::Service, message);
            return;
        }

        match self.config.max_reauth_attempts {
            Some(max) if item.reauth_attempts() >= max => {
                let message = format!("{} (gave up after {} re-authentication attempts)", message, max);
                self.fail(item, ItemStatus::Failed, FailureCause::ReauthExhausted, message);
            }
            _ => {
                self.fail(item, ItemStatus::NoAuth, FailureCause::Service, message);
                self.request_reauth();
            }
        }
    }

    /// Moves a started item to a failure status and notifies the user once.
    /// `NO_AUTH`/`NO_QUOTA` are surfaced only when no other item already
    /// holds that status.
    fn fail(&mut self, item: &QueueItem, status: ItemStatus, cause: FailureCause, message: String) {
        let (from, already_surfaced) = {
            let mut queue = self.queue.lock();
            let already_surfaced = status != ItemStatus::Failed
                && queue
                    .items()
                    .iter()
                    .any(|i| i.id != item.id && i.status() == status);
            let Some(entry) = queue.get_mut(item.id) else {
                return;
            };
            match entry.fail(status, cause, message.clone()) {
                Ok(from) => (from, already_surfaced),
                Err(e) => {
                    warn!(item_id = item.id, error = %e, "Failure transition rejected");
                    return;
                }
            }
        };

        warn!(item_id = item.id, ?status, ?cause, %message, "Queue item failed");
        self.set_block(item, None);
        self.emit_status(item.id, from, status);

        if already_surfaced {
            return;
        }
        match status {
            ItemStatus::NoQuota => self.notifier.notify(
                Severity::Warning,
                &format!("Quota exceeded for {}: {}", item.selected_provider, message),
            ),
            ItemStatus::NoAuth => self.notifier.notify(
                Severity::Warning,
                &format!("Authentication required for {}", item.selected_provider),
            ),
            _ => self.notifier.notify(Severity::Error, &message),
        }
    }

    fn request_reauth(&mut self) {
        if self.reauth_pending {
            return;
        }
        self.reauth_pending = true;
        info!("Requesting re-authentication");
        self.reauth.request_reauth(ReauthHandle::new(self.cmd_tx.clone()));
    }

    fn reauth_succeeded(&mut self) {
        self.reauth_pending = false;
        let requeued: Vec<(QueueItem, ItemStatus)> = {
            let mut queue = self.queue.lock();
            let ids: Vec<ItemId> = queue
                .items()
                .iter()
                .filter(|i| i.requeues_after_reauth())
                .map(|i| i.id)
                .collect();
            ids.into_iter()
                .filter_map(|id| {
                    let item = queue.get_mut(id)?;
                    let from = item.requeue_after_reauth().ok()?;
                    Some((item.clone(), from))
                })
                .collect()
        };

        info!(count = requeued.len(), "Re-authentication succeeded, requeueing");
        for (item, from) in requeued {
            self.set_block(&item, Some(item.job_type));
            self.emit_status(item.id, from, ItemStatus::Idle);
        }
    }

    fn reauth_abandoned(&mut self) {
        self.reauth_pending = false;
        let failed: Vec<QueueItem> = {
            let mut queue = self.queue.lock();
            queue
                .items()
                .iter()
                .filter(|i| i.status() == ItemStatus::NoAuth)
                .map(|i| i.id)
                .collect::<Vec<_>>()
                .into_iter()
                .filter_map(|id| {
                    let item = queue.get_mut(id)?;
                    item.fail(
                        ItemStatus::Failed,
                        FailureCause::ReauthAbandoned,
                        "re-authentication abandoned".to_string(),
                    )
                    .ok()?;
                    Some(item.clone())
                })
                .collect()
        };

        if failed.is_empty() {
            return;
        }
        warn!(count = failed.len(), "Re-authentication abandoned");
        for item in &failed {
            self.emit_status(item.id, ItemStatus::NoAuth, ItemStatus::Failed);
        }
        self.notifier.notify(
            Severity::Error,
            &format!("Re-authentication abandoned; {} ASR job(s) failed", failed.len()),
        );
    }
}

/// Reports a worker that died without sending its outcome, so the item
/// leaves `STARTED` and its slot is released.
async fn supervise(id: ItemId, handle: JoinHandle<()>, cmd_tx: mpsc::UnboundedSender<Command>) {
    match handle.await {
        Ok(()) => {}
        Err(e) if e.is_panic() => {
            error!(item_id = id, error = %e, "Queue worker panicked");
            let _ = cmd_tx.send(Command::Completed {
                id,
                outcome: Err(PipelineError::Crashed(e.to_string())),
            });
        }
        Err(_) => debug!(item_id = id, "Queue worker cancelled"),
    }
}
