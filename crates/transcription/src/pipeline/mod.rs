//! Stages of a started queue item: cut → validate → upload → recognize →
//! align. Cutting and validation are synchronous; the gateway calls are the
//! only suspension points.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::asr::{AlignedWordList, AsrGateway, ProviderLanguage, RecognitionOutput, UploadFile};
use crate::audio::{AudioSource, EncodedClip};
use crate::config::ProviderInfo;
use crate::error::{GatewayError, PipelineError};
use crate::queue::{JobType, TimeInterval};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Shared collaborators of every stage.
#[derive(Clone)]
pub struct StageContext {
    pub gateway: Arc<dyn AsrGateway>,
    pub audio: Arc<dyn AudioSource>,
    pub request_timeout: Option<Duration>,
}

/// Content URLs returned by the upload stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFiles {
    pub audio_url: String,
    pub transcript_url: Option<String>,
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    call: impl Future<Output = Result<T, GatewayError>>,
) -> Result<T, GatewayError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| GatewayError::Timeout(limit.as_secs()))?,
        None => call.await,
    }
}

pub fn cut(audio: &dyn AudioSource, interval: TimeInterval) -> Result<EncodedClip, PipelineError> {
    let clip = audio.get_clip(interval.sample_start, interval.sample_length)?;
    debug!(
        sample_start = interval.sample_start,
        sample_length = interval.sample_length,
        bytes = clip.bytes.len(),
        "Clip cut"
    );
    Ok(clip)
}

/// Checks the clip against the provider limits and the job's inputs before
/// anything is sent.
pub fn validate(
    clip: &EncodedClip,
    provider: &ProviderInfo,
    job_type: JobType,
    transcript_input: Option<&str>,
) -> Result<(), PipelineError> {
    if let Some(max_secs) = provider.max_signal_duration_secs {
        let duration = clip.duration_secs();
        if duration > max_secs as f64 {
            return Err(PipelineError::Validation(format!(
                "clip of {:.1}s exceeds the maximum signal duration of {}s for {}",
                duration, max_secs, provider.name
            )));
        }
    }

    if let Some(max_mb) = provider.max_signal_size_mb {
        if clip.size_bytes() > max_mb * BYTES_PER_MB {
            return Err(PipelineError::Validation(format!(
                "clip of {} bytes exceeds the maximum signal size of {}MB for {}",
                clip.size_bytes(),
                max_mb,
                provider.name
            )));
        }
    }

    if job_type == JobType::WordAlignment && transcript_input.is_none_or(|t| t.trim().is_empty()) {
        return Err(PipelineError::Validation(
            "word alignment requires a transcript".to_string(),
        ));
    }

    Ok(())
}

pub async fn upload(
    ctx: &StageContext,
    clip: EncodedClip,
    interval: TimeInterval,
    transcript_input: Option<&str>,
) -> Result<UploadedFiles, PipelineError> {
    let mut files = vec![UploadFile {
        name: format!("clip_{}_{}.wav", interval.sample_start, interval.sample_length),
        content_type: "audio/wav".to_string(),
        bytes: clip.bytes,
    }];
    if let Some(text) = transcript_input {
        files.push(UploadFile {
            name: format!("clip_{}_{}.txt", interval.sample_start, interval.sample_length),
            content_type: "text/plain".to_string(),
            bytes: text.as_bytes().to_vec(),
        });
    }

    let expected = files.len();
    let mut urls = with_timeout(ctx.request_timeout, ctx.gateway.upload(files)).await?;
    if urls.len() != expected {
        return Err(GatewayError::InvalidResponse(format!(
            "expected {} upload urls, got {}",
            expected,
            urls.len()
        ))
        .into());
    }

    let transcript_url = (expected == 2).then(|| urls.remove(1));
    let audio_url = urls.remove(0);
    Ok(UploadedFiles {
        audio_url,
        transcript_url,
    })
}

pub async fn recognize(
    ctx: &StageContext,
    provider_language: &ProviderLanguage,
    audio_url: &str,
) -> Result<RecognitionOutput, PipelineError> {
    let output = with_timeout(
        ctx.request_timeout,
        ctx.gateway.recognize(provider_language, audio_url),
    )
    .await?;
    Ok(output)
}

pub async fn align(
    ctx: &StageContext,
    provider_language: &ProviderLanguage,
    audio_url: &str,
    transcript_url: &str,
) -> Result<AlignedWordList, PipelineError> {
    let alignment = with_timeout(
        ctx.request_timeout,
        ctx.gateway.align(provider_language, audio_url, transcript_url),
    )
    .await?;
    Ok(alignment)
}
