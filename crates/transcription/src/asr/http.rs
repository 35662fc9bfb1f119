use async_trait::async_trait;
use reqwest::{Client, multipart};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{AlignedWordList, AsrGateway, ContentUrl, ProviderLanguage, RecognitionOutput, UploadFile, partitur};
use crate::error::GatewayError;
use transcribo_config::GatewaySettings;

/// JSON/HTTP client for the ASR proxy service.
///
/// Routes: `POST {base}/upload` (multipart), `POST {base}/recognize` and
/// `POST {base}/align`. Alignment answers with a download link to a
/// Partitur document which is fetched and parsed here.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
    pause_placeholder: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    urls: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RecognizeRequest<'a> {
    provider: &'a str,
    language: &'a str,
    audio_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    text: String,
    result_url: String,
}

#[derive(Debug, Serialize)]
struct AlignRequest<'a> {
    provider: &'a str,
    language: &'a str,
    audio_url: &'a str,
    transcript_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct AlignResponse {
    download_link: String,
}

impl HttpGateway {
    pub fn new(base_url: &str, auth_token: Option<String>, pause_placeholder: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
            pause_placeholder: pause_placeholder.to_string(),
        }
    }

    pub fn from_settings(settings: &GatewaySettings, pause_placeholder: &str) -> Self {
        Self::new(&settings.base_url, settings.auth_token.clone(), pause_placeholder)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, GatewayError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::Service { status, message });
        }
        Ok(response)
    }
}

#[async_trait]
impl AsrGateway for HttpGateway {
    async fn upload(&self, files: Vec<UploadFile>) -> Result<Vec<ContentUrl>, GatewayError> {
        let expected = files.len();
        let mut form = multipart::Form::new();
        for file in files {
            let part = multipart::Part::bytes(file.bytes)
                .file_name(file.name)
                .mime_str(&file.content_type)
                .map_err(|e| GatewayError::Request(e.to_string()))?;
            form = form.part("file", part);
        }

        let response = self.send(self.client.post(self.url("upload")).multipart(form)).await?;
        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        if body.urls.len() != expected {
            return Err(GatewayError::InvalidResponse(format!(
                "expected {} upload urls, got {}",
                expected,
                body.urls.len()
            )));
        }
        debug!(count = expected, "Files uploaded");
        Ok(body.urls)
    }

    async fn recognize(
        &self,
        provider_language: &ProviderLanguage,
        audio_url: &str,
    ) -> Result<RecognitionOutput, GatewayError> {
        let request = RecognizeRequest {
            provider: &provider_language.provider,
            language: &provider_language.language,
            audio_url,
        };
        let response = self.send(self.client.post(self.url("recognize")).json(&request)).await?;
        let body: RecognizeResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        Ok(RecognitionOutput {
            text: body.text.trim().to_string(),
            result_url: body.result_url,
        })
    }

    async fn align(
        &self,
        provider_language: &ProviderLanguage,
        audio_url: &str,
        transcript_url: &str,
    ) -> Result<AlignedWordList, GatewayError> {
        let request = AlignRequest {
            provider: &provider_language.provider,
            language: &provider_language.language,
            audio_url,
            transcript_url,
        };
        let response = self.send(self.client.post(self.url("align")).json(&request)).await?;
        let body: AlignResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        let content = self
            .send(self.client.get(&body.download_link))
            .await?
            .text()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        let words = partitur::parse(&content, &self.pause_placeholder)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        Ok(AlignedWordList { words, content })
    }

    fn name(&self) -> &str {
        "http"
    }
}
