use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::asr::AlignedWordList;
use crate::config::ProviderInfo;
use crate::engine::Command;
use crate::error::PipelineError;
use crate::pipeline::{self, StageContext};
use crate::queue::{ItemStatus, Queue, QueueItem};

/// Progress checkpoints reported to the scheduler.
pub const PROGRESS_UPLOADED: u8 = 25;
pub const PROGRESS_RECOGNIZED: u8 = 50;

/// Output of a completed pipeline run.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub alignment: Option<AlignedWordList>,
}

/// Drives one started item through its stages.
///
/// The worker never mutates the queue: it reads the item's status before
/// each stage and reports progress and the final outcome back to the
/// scheduling loop, which owns every transition.
pub struct ItemWorker {
    item: QueueItem,
    provider: ProviderInfo,
    pause_placeholder: String,
    ctx: StageContext,
    queue: Arc<Mutex<Queue>>,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl ItemWorker {
    pub fn new(
        item: QueueItem,
        provider: ProviderInfo,
        pause_placeholder: String,
        ctx: StageContext,
        queue: Arc<Mutex<Queue>>,
        cmd_tx: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            item,
            provider,
            pause_placeholder,
            ctx,
            queue,
            cmd_tx,
        }
    }

    pub async fn run(self) {
        let id = self.item.id;
        debug!(
            item_id = id,
            job_type = ?self.item.job_type,
            provider = %self.item.selected_provider,
            gateway = %self.ctx.gateway.name(),
            "Pipeline started"
        );

        let outcome = self.execute().await;
        if matches!(outcome, Err(PipelineError::StopRequested)) {
            info!(item_id = id, "Pipeline acknowledged stop");
        }

        // The loop is gone only during shutdown; nothing is left to update.
        let _ = self.cmd_tx.send(Command::Completed { id, outcome });
    }

    fn ensure_started(&self) -> Result<(), PipelineError> {
        let status = self.queue.lock().get(self.item.id).map(QueueItem::status);
        match status {
            Some(ItemStatus::Started) => Ok(()),
            _ => Err(PipelineError::StopRequested),
        }
    }

    fn report_progress(&self, progress: u8) {
        let _ = self.cmd_tx.send(Command::Progress {
            id: self.item.id,
            progress,
        });
    }

    async fn execute(&self) -> Result<Completion, PipelineError> {
        let item = &self.item;
        let job_type = item.job_type;
        let provider_language = item.provider_language();
        let transcript_input = item.transcript_input.as_deref();

        self.ensure_started()?;
        let clip = pipeline::cut(self.ctx.audio.as_ref(), item.time_interval)?;
        pipeline::validate(&clip, &self.provider, job_type, transcript_input)?;

        self.ensure_started()?;
        let uploaded = pipeline::upload(&self.ctx, clip, item.time_interval, transcript_input).await?;
        self.ensure_started()?;
        self.report_progress(PROGRESS_UPLOADED);

        let mut text = transcript_input.map(str::to_string);
        let mut transcript_url = uploaded.transcript_url;

        if job_type.needs_recognition() {
            let output = pipeline::recognize(&self.ctx, &provider_language, &uploaded.audio_url).await?;
            self.ensure_started()?;
            debug!(item_id = item.id, chars = output.text.len(), "Recognition returned");
            text = Some(output.text);
            transcript_url = Some(output.result_url);
            if job_type.needs_alignment() {
                self.report_progress(PROGRESS_RECOGNIZED);
            }
        }

        let mut alignment = None;
        if job_type.needs_alignment() {
            let transcript_url = transcript_url.ok_or_else(|| {
                PipelineError::Validation("no transcript available for alignment".to_string())
            })?;
            let aligned = pipeline::align(
                &self.ctx,
                &provider_language,
                &uploaded.audio_url,
                &transcript_url,
            )
            .await?;
            self.ensure_started()?;
            debug!(item_id = item.id, words = aligned.words.len(), "Alignment returned");
            text = Some(aligned.transcript(&self.pause_placeholder));
            alignment = Some(aligned);
        }

        Ok(Completion {
            text: text.unwrap_or_default(),
            alignment,
        })
    }
}

impl std::fmt::Debug for ItemWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemWorker")
            .field("item_id", &self.item.id)
            .field("provider", &self.provider.name)
            .finish()
    }
}
