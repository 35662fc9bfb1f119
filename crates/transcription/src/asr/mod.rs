pub mod http;
pub mod partitur;

pub use http::HttpGateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

pub type ContentUrl = String;

/// Remote service and language pair selected for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderLanguage {
    pub provider: String,
    pub language: String,
}

impl ProviderLanguage {
    pub fn new(provider: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            language: language.into(),
        }
    }
}

/// A file sent to the upload endpoint.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionOutput {
    pub text: String,
    pub result_url: ContentUrl,
}

/// One aligned word. Offsets are in samples relative to the clip start;
/// `relative_duration` is exclusive, so the word ends at
/// `relative_start + relative_duration`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignedWord {
    pub relative_start: u64,
    pub relative_duration: u64,
    pub label: String,
}

impl AlignedWord {
    pub fn new(relative_start: u64, relative_duration: u64, label: impl Into<String>) -> Self {
        Self {
            relative_start,
            relative_duration,
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignedWordList {
    pub words: Vec<AlignedWord>,
    /// Raw alignment document as returned by the service.
    pub content: String,
}

impl AlignedWordList {
    /// Word labels joined by spaces, without pause placeholders.
    pub fn transcript(&self, pause_placeholder: &str) -> String {
        self.words
            .iter()
            .map(|w| w.label.as_str())
            .filter(|label| *label != pause_placeholder && !label.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Remote ASR service: upload, recognition and word alignment.
#[async_trait]
pub trait AsrGateway: Send + Sync + 'static {
    /// Uploads files and returns one content URL per file, in order.
    async fn upload(&self, files: Vec<UploadFile>) -> Result<Vec<ContentUrl>, GatewayError>;

    async fn recognize(
        &self,
        provider_language: &ProviderLanguage,
        audio_url: &str,
    ) -> Result<RecognitionOutput, GatewayError>;

    async fn align(
        &self,
        provider_language: &ProviderLanguage,
        audio_url: &str,
        transcript_url: &str,
    ) -> Result<AlignedWordList, GatewayError>;

    /// Human-readable gateway name.
    fn name(&self) -> &str;
}
