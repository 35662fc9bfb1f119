use std::time::Duration;

use serde::{Deserialize, Serialize};
use transcribo_config::AsrSettings;

use crate::asr::ProviderLanguage;
use crate::queue::{ErrorClassifier, MAX_PARALLEL};

/// Per-request limits of one remote ASR provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    /// Longest clip the provider accepts, in seconds.
    pub max_signal_duration_secs: Option<u64>,
    /// Largest clip the provider accepts, in megabytes.
    pub max_signal_size_mb: Option<u64>,
    /// Supported language codes. Empty means any.
    pub languages: Vec<String>,
}

impl ProviderInfo {
    pub fn unlimited(name: &str) -> Self {
        Self {
            name: name.to_string(),
            max_signal_duration_secs: None,
            max_signal_size_mb: None,
            languages: Vec::new(),
        }
    }

    pub fn supports_language(&self, language: &str) -> bool {
        self.languages.is_empty() || self.languages.iter().any(|l| l == language)
    }
}

/// Runtime configuration of the ASR queue engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrQueueConfig {
    /// Maximum number of items in `STARTED` at once.
    pub max_parallel: usize,
    /// Deadline applied to every remote call. None = no deadline.
    pub request_timeout: Option<Duration>,
    /// How often re-authentication may requeue one item. None = unbounded.
    pub max_reauth_attempts: Option<u32>,
    pub quota_markers: Vec<String>,
    pub auth_markers: Vec<String>,
    /// Label the aligner emits for pauses.
    pub pause_placeholder: String,
    /// Level marker code pauses are mapped onto.
    pub break_marker: String,
    pub providers: Vec<ProviderInfo>,
    /// Provider/language copied into items at enqueue until changed.
    pub default_selection: ProviderLanguage,
}

impl Default for AsrQueueConfig {
    fn default() -> Self {
        Self {
            max_parallel: MAX_PARALLEL,
            request_timeout: None,
            max_reauth_attempts: None,
            quota_markers: vec!["quota".to_string()],
            auth_markers: vec!["not authenticated".to_string(), "unauthenticated".to_string()],
            pause_placeholder: "<p:>".to_string(),
            break_marker: "<P>".to_string(),
            providers: vec![ProviderInfo::unlimited("bas")],
            default_selection: ProviderLanguage::new("bas", "deu-DE"),
        }
    }
}

impl AsrQueueConfig {
    pub fn provider(&self, name: &str) -> Option<&ProviderInfo> {
        self.providers.iter().find(|p| p.name == name)
    }

    pub fn classifier(&self) -> ErrorClassifier {
        ErrorClassifier::new(&self.quota_markers, &self.auth_markers)
    }
}

impl From<&AsrSettings> for AsrQueueConfig {
    fn from(settings: &AsrSettings) -> Self {
        let default_selection = ProviderLanguage::new(
            &settings.selection.provider,
            &settings.selection.language,
        );

        // Without a provider table the selected provider runs without limits.
        let providers = if settings.providers.is_empty() {
            vec![ProviderInfo::unlimited(&default_selection.provider)]
        } else {
            settings
                .providers
                .iter()
                .map(|p| ProviderInfo {
                    name: p.name.clone(),
                    max_signal_duration_secs: p.max_signal_duration_secs,
                    max_signal_size_mb: p.max_signal_size_mb,
                    languages: p.languages.clone(),
                })
                .collect()
        };

        Self {
            max_parallel: settings.queue.max_parallel,
            request_timeout: settings.queue.request_timeout_secs.map(Duration::from_secs),
            max_reauth_attempts: settings.queue.max_reauth_attempts,
            quota_markers: settings.markers.quota.clone(),
            auth_markers: settings.markers.unauthenticated.clone(),
            pause_placeholder: settings.markers.pause_placeholder.clone(),
            break_marker: settings.markers.break_marker.clone(),
            providers,
            default_selection,
        }
    }
}
