//! Google Gemini adapters for the chat and speech services.
//!
//! Both services use the `models/{model}:generateContent` endpoint. The chat
//! adapter replays the whole [`ChatSession`] on every turn; the speech adapter
//! asks for an `AUDIO` response and returns the inline base64 PCM payload
//! (24 kHz, mono, 16-bit little-endian).

use super::{ChatService, ChatSession, SpeechService, TurnRole};
use crate::config::{ChatConfig, TtsConfig};
use crate::error::{ChatError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest error body echoed into an error message.
const MAX_ERROR_BODY: usize = 300;

// ── Wire format ───────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<TextPart<'a>>,
}

impl<'a> Content<'a> {
    fn text(role: Option<&'static str>, text: &'a str) -> Self {
        Self {
            role,
            parts: vec![TextPart { text }],
        }
    }
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: [&'static str; 1],
    speech_config: SpeechConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig<'a> {
    voice_config: VoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig<'a> {
    prebuilt_voice_config: PrebuiltVoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig<'a> {
    voice_name: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    data: String,
}

impl GenerateContentResponse {
    fn first_parts(&self) -> Option<&[ResponsePart]> {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
    }
}

fn role_name(role: TurnRole) -> &'static str {
    match role {
        TurnRole::User => "user",
        TurnRole::Model => "model",
    }
}

// ── HTTP client ───────────────────────────────────────────────

/// Authenticated HTTP client for the Gemini API.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiClient {
    /// Create a client for `base_url` (including the version segment).
    ///
    /// # Errors
    ///
    /// Returns a config error if the key is blank or the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ChatError::Config("Gemini API key is empty".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key,
        })
    }

    /// Create a client from the `[chat]` config section.
    ///
    /// # Errors
    ///
    /// Returns a config error if no API key is configured or set in the environment.
    pub fn from_config(config: &ChatConfig) -> Result<Self> {
        let api_key = config.resolved_api_key().ok_or_else(|| {
            ChatError::Config(
                "no Gemini API key: set chat.api_key or the GEMINI_API_KEY environment variable"
                    .into(),
            )
        })?;
        Self::new(
            config.base_url.clone(),
            api_key,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest<'_>,
    ) -> Result<GenerateContentResponse> {
        let url = format!("{}/models/{model}:generateContent", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY).collect();
            return Err(ChatError::Remote(format!("{model} returned {status}: {body}")));
        }

        response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| ChatError::Remote(format!("invalid {model} response: {e}")))
    }
}

// ── Chat ──────────────────────────────────────────────────────

/// Gemini chat model.
#[derive(Debug, Clone)]
pub struct GeminiChat {
    client: GeminiClient,
    model: String,
    system_instruction: String,
}

impl GeminiChat {
    /// Create a chat adapter over an existing client.
    pub fn new(
        client: GeminiClient,
        model: impl Into<String>,
        system_instruction: impl Into<String>,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            system_instruction: system_instruction.into(),
        }
    }

    /// Create a chat adapter from the `[chat]` config section.
    ///
    /// # Errors
    ///
    /// Returns a config error if no API key is available.
    pub fn from_config(config: &ChatConfig) -> Result<Self> {
        let client = GeminiClient::from_config(config)?;
        info!("Gemini chat configured: model={}", config.model);
        Ok(Self::new(
            client,
            config.model.clone(),
            config.system_instruction.clone(),
        ))
    }
}

#[async_trait]
impl ChatService for GeminiChat {
    fn open_session(&self) -> ChatSession {
        ChatSession::new(self.system_instruction.clone())
    }

    async fn send_turn(&self, user_text: &str, session: &mut ChatSession) -> Result<String> {
        let mut contents: Vec<Content<'_>> = session
            .turns()
            .iter()
            .map(|t| Content::text(Some(role_name(t.role)), &t.text))
            .collect();
        contents.push(Content::text(Some("user"), user_text));

        let system = session.system_instruction();
        let request = GenerateContentRequest {
            system_instruction: (!system.is_empty()).then(|| Content::text(None, system)),
            contents,
            generation_config: None,
        };

        let started = Instant::now();
        let response = self.client.generate(&self.model, &request).await?;
        let parts = response
            .first_parts()
            .ok_or_else(|| ChatError::Remote(format!("{} returned no candidates", self.model)))?;
        let reply: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
        if reply.is_empty() {
            return Err(ChatError::Remote(format!("{} returned no text", self.model)));
        }

        debug!(
            "chat reply in {:.0?}: {} chars, session has {} exchanges",
            started.elapsed(),
            reply.len(),
            session.exchanges() + 1
        );
        session.record_exchange(user_text, &reply);
        Ok(reply)
    }
}

// ── Speech ────────────────────────────────────────────────────

/// Gemini text-to-speech model.
#[derive(Debug, Clone)]
pub struct GeminiSpeech {
    client: GeminiClient,
    model: String,
    voice: String,
}

impl GeminiSpeech {
    /// Create a speech adapter over an existing client.
    pub fn new(client: GeminiClient, model: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            voice: voice.into(),
        }
    }

    /// Create a speech adapter from the `[chat]` (credentials) and `[tts]` sections.
    ///
    /// # Errors
    ///
    /// Returns a config error if no API key is available.
    pub fn from_config(chat: &ChatConfig, tts: &TtsConfig) -> Result<Self> {
        let client = GeminiClient::from_config(chat)?;
        info!("Gemini speech configured: model={} voice={}", tts.model, tts.voice);
        Ok(Self::new(client, tts.model.clone(), tts.voice.clone()))
    }
}

#[async_trait]
impl SpeechService for GeminiSpeech {
    async fn synthesize(&self, text: &str) -> Result<Option<String>> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let request = GenerateContentRequest {
            system_instruction: None,
            contents: vec![Content::text(None, text)],
            generation_config: Some(GenerationConfig {
                response_modalities: ["AUDIO"],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: &self.voice,
                        },
                    },
                },
            }),
        };

        let started = Instant::now();
        let response = self.client.generate(&self.model, &request).await?;
        let inline = response
            .first_parts()
            .and_then(<[ResponsePart]>::first)
            .and_then(|p| p.inline_data.as_ref())
            .filter(|d| !d.data.is_empty());

        match inline {
            Some(data) => {
                debug!(
                    "speech payload in {:.0?}: {} base64 chars ({})",
                    started.elapsed(),
                    data.data.len(),
                    data.mime_type.as_deref().unwrap_or("unknown mime type")
                );
                Ok(Some(data.data.clone()))
            }
            None => {
                warn!("TTS service did not return audio data");
                Ok(None)
            }
        }
    }
}
