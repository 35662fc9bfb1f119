use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use transcribo_asr::asr::{ContentUrl, RecognitionOutput, UploadFile};
use transcribo_asr::{AlignedWord, AlignedWordList, AsrGateway, GatewayError, ProviderLanguage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Upload,
    Recognize,
    Align,
}

/// In-memory gateway whose calls are keyed by `(stage, sample_start)` of
/// the clip they concern.
///
/// - `hold` parks calls for a key until `release` is called.
/// - `fail_once` makes the next call for a key return the given error.
/// - `panic_once` makes the next call for a key panic.
/// - `script_words` replaces the default single-word alignment.
#[derive(Default)]
pub struct ScriptedGateway {
    holds: Mutex<HashMap<(Stage, u64), Arc<Semaphore>>>,
    failures: Mutex<HashMap<(Stage, u64), Vec<GatewayError>>>,
    panics: Mutex<HashSet<(Stage, u64)>>,
    words: Mutex<HashMap<u64, Vec<AlignedWord>>>,
    clips: Mutex<HashMap<String, (u64, u64)>>,
    calls: Mutex<Vec<(Stage, u64)>>,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn hold(&self, stage: Stage, sample_start: u64) {
        self.holds
            .lock()
            .insert((stage, sample_start), Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, stage: Stage, sample_start: u64) {
        if let Some(gate) = self.holds.lock().remove(&(stage, sample_start)) {
            gate.close();
        }
    }

    pub fn fail_once(&self, stage: Stage, sample_start: u64, error: GatewayError) {
        self.failures
            .lock()
            .entry((stage, sample_start))
            .or_default()
            .push(error);
    }

    pub fn panic_once(&self, stage: Stage, sample_start: u64) {
        self.panics.lock().insert((stage, sample_start));
    }

    pub fn script_words(&self, sample_start: u64, words: Vec<AlignedWord>) {
        self.words.lock().insert(sample_start, words);
    }

    pub fn calls(&self) -> Vec<(Stage, u64)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, stage: Stage) -> usize {
        self.calls.lock().iter().filter(|(s, _)| *s == stage).count()
    }

    pub fn has_called(&self, stage: Stage, sample_start: u64) -> bool {
        self.calls.lock().contains(&(stage, sample_start))
    }

    async fn enter(&self, stage: Stage, sample_start: u64) -> Result<(), GatewayError> {
        self.calls.lock().push((stage, sample_start));
        let panics = self.panics.lock().remove(&(stage, sample_start));
        if panics {
            panic!("scripted {:?} panic at {}", stage, sample_start);
        }

        let gate = self.holds.lock().get(&(stage, sample_start)).cloned();
        if let Some(gate) = gate {
            // Resolves with an error once the gate is closed.
            let _ = gate.acquire().await;
        }

        let failure = self
            .failures
            .lock()
            .get_mut(&(stage, sample_start))
            .and_then(|queued| (!queued.is_empty()).then(|| queued.remove(0)));
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn clip_of(&self, url: &str) -> Result<(u64, u64), GatewayError> {
        self.clips
            .lock()
            .get(url)
            .copied()
            .ok_or_else(|| GatewayError::InvalidResponse(format!("unknown content url {}", url)))
    }
}

/// Reads `(start, length)` from a `clip_{start}_{length}.ext` file name.
fn parse_clip_name(name: &str) -> Option<(u64, u64)> {
    let stem = name.strip_prefix("clip_")?.split('.').next()?;
    let (start, length) = stem.split_once('_')?;
    Some((start.parse().ok()?, length.parse().ok()?))
}

#[async_trait]
impl AsrGateway for ScriptedGateway {
    async fn upload(&self, files: Vec<UploadFile>) -> Result<Vec<ContentUrl>, GatewayError> {
        let (start, length) = files
            .first()
            .and_then(|f| parse_clip_name(&f.name))
            .ok_or_else(|| GatewayError::Request("unexpected upload".to_string()))?;
        self.enter(Stage::Upload, start).await?;

        let urls: Vec<ContentUrl> = files.iter().map(|f| format!("mem://{}", f.name)).collect();
        let mut clips = self.clips.lock();
        for url in &urls {
            clips.insert(url.clone(), (start, length));
        }
        Ok(urls)
    }

    async fn recognize(
        &self,
        _provider_language: &ProviderLanguage,
        audio_url: &str,
    ) -> Result<RecognitionOutput, GatewayError> {
        let (start, length) = self.clip_of(audio_url)?;
        self.enter(Stage::Recognize, start).await?;

        let result_url = format!("mem://clip_{}_{}.rec.txt", start, length);
        self.clips.lock().insert(result_url.clone(), (start, length));
        Ok(RecognitionOutput {
            text: format!("transcript {}", start),
            result_url,
        })
    }

    async fn align(
        &self,
        _provider_language: &ProviderLanguage,
        audio_url: &str,
        _transcript_url: &str,
    ) -> Result<AlignedWordList, GatewayError> {
        let (start, length) = self.clip_of(audio_url)?;
        self.enter(Stage::Align, start).await?;

        let words = self
            .words
            .lock()
            .get(&start)
            .cloned()
            .unwrap_or_else(|| vec![AlignedWord::new(0, length, "hallo")]);
        Ok(AlignedWordList {
            words,
            content: String::new(),
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
