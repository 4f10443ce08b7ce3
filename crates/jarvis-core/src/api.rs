use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::state::{BackendStatus, Plugin, SystemMetrics};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct ChatResponse {
    response: Option<String>,
    message: Option<String>,
    plugin_used: Option<String>,
}

/// The assistant's answer to one chat message
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub text: String,
    pub plugin_used: Option<String>,
}

impl From<ChatResponse> for ChatReply {
    fn from(body: ChatResponse) -> Self {
        let text = body
            .response
            .filter(|t| !t.is_empty())
            .or(body.message.filter(|t| !t.is_empty()))
            .unwrap_or_else(|| "Processing...".to_string());
        Self {
            text,
            plugin_used: body.plugin_used,
        }
    }
}

#[derive(Deserialize)]
pub(crate) struct SystemHealth {
    #[serde(default)]
    cpu_usage: Option<f64>,
    #[serde(default)]
    memory_usage: Option<f64>,
    #[serde(default)]
    disk_usage: Option<f64>,
}

impl From<SystemHealth> for SystemMetrics {
    fn from(health: SystemHealth) -> Self {
        SystemMetrics::new(
            health.cpu_usage.unwrap_or(0.0),
            health.memory_usage.unwrap_or(0.0),
            health.disk_usage.unwrap_or(0.0),
        )
    }
}

#[derive(Serialize)]
struct ToggleRequest {
    enabled: bool,
}

#[derive(Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    voice: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transcription {
    pub text: String,
    #[serde(default)]
    pub confidence: f64,
}

/// HTTP client for the assistant backend. Paths are relative to `/api/v1`.
#[derive(Clone)]
pub struct JarvisClient {
    client: Client,
    base_url: String,
}

impl JarvisClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `online` on any 2xx, `offline` on anything else including transport errors
    pub async fn check_health(&self) -> BackendStatus {
        let started = Instant::now();
        let status = match self.client.get(self.url("/health")).send().await {
            Ok(resp) if resp.status().is_success() => BackendStatus::Online,
            Ok(resp) => {
                debug!(status = %resp.status(), "health check rejected");
                BackendStatus::Offline
            }
            Err(e) => {
                debug!("health check failed: {e}");
                BackendStatus::Offline
            }
        };
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, ?status, "GET /health");
        status
    }

    pub async fn system_metrics(&self) -> Result<SystemMetrics> {
        let resp = self.timed_get("/system/health").await?;
        let health: SystemHealth = ensure_success(resp).await?.json().await?;
        Ok(health.into())
    }

    pub async fn chat(&self, message: &str, session_id: Option<&str>) -> Result<ChatReply> {
        let started = Instant::now();
        let request = ChatRequest { message, session_id };

        let response = self
            .client
            .post(self.url("/chat"))
            .json(&request)
            .send()
            .await?;
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, status = %response.status(), "POST /chat");

        let body: ChatResponse = ensure_success(response).await?.json().await?;
        Ok(body.into())
    }

    pub async fn list_plugins(&self) -> Result<Vec<Plugin>> {
        let resp = self.timed_get("/plugins").await?;
        let plugins: Vec<Plugin> = ensure_success(resp).await?.json().await?;
        Ok(plugins.into_iter().map(Plugin::normalized).collect())
    }

    pub async fn get_plugin(&self, id: &str) -> Result<Plugin> {
        let resp = self.timed_get(&format!("/plugins/{id}")).await?;
        let plugin: Plugin = ensure_success(resp).await?.json().await?;
        Ok(plugin.normalized())
    }

    pub async fn toggle_plugin(&self, id: &str, enabled: bool) -> Result<()> {
        let response = self
            .client
            .put(self.url(&format!("/plugins/{id}/toggle")))
            .json(&ToggleRequest { enabled })
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    pub async fn uninstall_plugin(&self, id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("/plugins/{id}")))
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    /// Upload a WAV recording for speech-to-text
    pub async fn transcribe(&self, wav_bytes: Vec<u8>) -> Result<Transcription> {
        let part = Part::bytes(wav_bytes)
            .file_name("recording.wav")
            .mime_str("audio/wav")?;
        let form = Form::new().part("audio", part);

        let started = Instant::now();
        let response = self
            .client
            .post(self.url("/speech/transcribe"))
            .multipart(form)
            .send()
            .await?;
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, "POST /speech/transcribe");

        Ok(ensure_success(response).await?.json().await?)
    }

    /// Server-side text-to-speech. Returns the encoded audio bytes.
    pub async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<Vec<u8>> {
        let request = SynthesizeRequest {
            text,
            voice: voice.unwrap_or("default"),
        };
        let response = self
            .client
            .post(self.url("/speech/synthesize"))
            .json(&request)
            .send()
            .await?;
        let bytes = ensure_success(response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn timed_get(&self, path: &str) -> Result<Response> {
        let started = Instant::now();
        let response = self.client.get(self.url(path)).send().await?;
        debug!(elapsed_ms = started.elapsed().as_millis() as u64, status = %response.status(), "GET {path}");
        Ok(response)
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    if text.is_empty() {
        Err(anyhow!("HTTP {}", status.as_u16()))
    } else {
        Err(anyhow!("HTTP {}: {}", status.as_u16(), text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(json: &str) -> ChatReply {
        serde_json::from_str::<ChatResponse>(json).unwrap().into()
    }

    #[test]
    fn test_reply_prefers_response_field() {
        let r = reply(r#"{"response": "All systems nominal", "message": "ignored", "plugin_used": "SystemPlugin"}"#);
        assert_eq!(r.text, "All systems nominal");
        assert_eq!(r.plugin_used.as_deref(), Some("SystemPlugin"));
    }

    #[test]
    fn test_reply_falls_back_to_message() {
        assert_eq!(reply(r#"{"message": "hello"}"#).text, "hello");
        assert_eq!(reply(r#"{"response": "", "message": "hello"}"#).text, "hello");
    }

    #[test]
    fn test_reply_placeholder_when_empty() {
        assert_eq!(reply("{}").text, "Processing...");
    }

    #[test]
    fn test_system_health_missing_fields_are_zero() {
        let health: SystemHealth =
            serde_json::from_str(r#"{"status": "healthy", "cpu_usage": 12.5}"#).unwrap();
        let metrics: SystemMetrics = health.into();
        assert_eq!(metrics.cpu, 12.5);
        assert_eq!(metrics.memory, 0.0);
        assert_eq!(metrics.disk, 0.0);
    }

    #[test]
    fn test_chat_request_omits_missing_session() {
        let body = serde_json::to_string(&ChatRequest { message: "hi", session_id: None }).unwrap();
        assert_eq!(body, r#"{"message":"hi"}"#);
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = JarvisClient::new("http://localhost:8000/api/v1/").unwrap();
        assert_eq!(client.url("/chat"), "http://localhost:8000/api/v1/chat");
    }
}
