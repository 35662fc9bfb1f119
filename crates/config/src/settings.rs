use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub asr: AsrSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AsrSettings {
    pub gateway: GatewaySettings,
    pub queue: QueueSettings,
    pub markers: MarkerSettings,
    pub selection: SelectionSettings,
    #[serde(default)]
    pub providers: Vec<ProviderSettings>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewaySettings {
    pub base_url: String,
    pub auth_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueSettings {
    pub max_parallel: usize,
    /// Unset means remote calls never time out.
    pub request_timeout_secs: Option<u64>,
    /// Unset means re-authentication may requeue an item any number of times.
    pub max_reauth_attempts: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarkerSettings {
    pub quota: Vec<String>,
    pub unauthenticated: Vec<String>,
    pub pause_placeholder: String,
    pub break_marker: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SelectionSettings {
    pub provider: String,
    pub language: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderSettings {
    pub name: String,
    pub max_signal_duration_secs: Option<u64>,
    pub max_signal_size_mb: Option<u64>,
    #[serde(default)]
    pub languages: Vec<String>,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::default()
                    .separator("__")
                    .prefix("TRANSCRIBO"),
            )
            .set_default("asr.gateway.base_url", "http://localhost:8080/asr")?
            .set_default("asr.gateway.auth_token", None::<String>)?
            .set_default("asr.queue.max_parallel", 3)?
            .set_default("asr.queue.request_timeout_secs", None::<String>)?
            .set_default("asr.queue.max_reauth_attempts", None::<String>)?
            .set_default("asr.markers.quota", vec!["quota"])?
            .set_default(
                "asr.markers.unauthenticated",
                vec!["not authenticated", "unauthenticated"],
            )?
            .set_default("asr.markers.pause_placeholder", "<p:>")?
            .set_default("asr.markers.break_marker", "<P>")?
            .set_default("asr.selection.provider", "bas")?
            .set_default("asr.selection.language", "deu-DE")?
            .set_default("asr.providers", Vec::<String>::new())?
            .build()?;

        config.try_deserialize()
    }
}
