//! Deepgram speech services over HTTP (blocking `reqwest`).
//!
//! - `POST {base}/v1/listen` with the raw utterance as an octet-stream body;
//!   the transcript is `results.channels[0].alternatives[0].transcript`.
//! - `POST {base}/v1/speak` with `{"text": ...}`; the response body is raw
//!   linear-16 PCM (`container=none`) and is handed to the pacer unread.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{SynthesizedAudio, Synthesizer, Transcriber};
use crate::audio::AudioFormat;
use crate::error::{CallError, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.deepgram.com";
pub const DEFAULT_TTS_MODEL: &str = "aura-asteria-en";

#[derive(Debug, Clone)]
pub struct DeepgramConfig {
    pub api_key: String,
    pub base_url: String,
    pub tts_model: String,
    /// Upper bound on each HTTP exchange.
    pub request_timeout: Duration,
}

impl DeepgramConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.into(),
            tts_model: DEFAULT_TTS_MODEL.into(),
            request_timeout: Duration::from_secs(20),
        }
    }
}

/// Deepgram client implementing both [`Transcriber`] and [`Synthesizer`].
#[derive(Debug, Clone)]
pub struct DeepgramService {
    client: Client,
    config: DeepgramConfig,
    format: AudioFormat,
}

impl DeepgramService {
    pub fn new(config: DeepgramConfig, format: AudioFormat) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(CallError::Config("deepgram api key is empty".into()));
        }
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CallError::Config(format!("http client build failed: {e}")))?;
        Ok(Self {
            client,
            config,
            format,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.config.api_key)
    }

    fn pcm_params(&self) -> [(&'static str, String); 3] {
        [
            ("encoding", "linear16".to_string()),
            ("sample_rate", self.format.sample_rate.to_string()),
            ("channels", self.format.channels.to_string()),
        ]
    }
}

impl Transcriber for DeepgramService {
    fn transcribe(&self, pcm: &[u8]) -> Result<String> {
        let response = self
            .client
            .post(self.url("/v1/listen"))
            .header(AUTHORIZATION, self.auth_header())
            .header(CONTENT_TYPE, "application/octet-stream")
            .query(&self.pcm_params())
            .body(pcm.to_vec())
            .send()
            .map_err(|e| CallError::TranscriptionFailure(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| CallError::TranscriptionFailure(format!("body read failed: {e}")))?;
        if !status.is_success() {
            return Err(CallError::TranscriptionFailure(format!(
                "status {status}: {}",
                body.trim()
            )));
        }

        debug!(bytes = pcm.len(), "deepgram listen ok");
        parse_listen_response(&body)
    }
}

#[derive(Serialize)]
struct SpeakRequest<'a> {
    text: &'a str,
}

impl Synthesizer for DeepgramService {
    fn synthesize(&self, text: &str) -> Result<SynthesizedAudio> {
        let mut params = self.pcm_params().to_vec();
        params.push(("model", self.config.tts_model.clone()));
        params.push(("container", "none".to_string()));

        let response = self
            .client
            .post(self.url("/v1/speak"))
            .header(AUTHORIZATION, self.auth_header())
            .query(&params)
            .json(&SpeakRequest { text })
            .send()
            .map_err(|e| CallError::SynthesisFailure(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(CallError::SynthesisFailure(format!(
                "status {status}: {}",
                detail.trim()
            )));
        }

        debug!(chars = text.len(), "deepgram speak streaming");
        Ok(Box::new(response))
    }
}

#[derive(Debug, Deserialize)]
struct ListenResponse {
    results: ListenResults,
}

#[derive(Debug, Deserialize)]
struct ListenResults {
    #[serde(default)]
    channels: Vec<ListenChannel>,
}

#[derive(Debug, Deserialize)]
struct ListenChannel {
    #[serde(default)]
    alternatives: Vec<ListenAlternative>,
}

#[derive(Debug, Deserialize)]
struct ListenAlternative {
    #[serde(default)]
    transcript: String,
}

/// Extract the best transcript; an empty result is `Ok("")`.
fn parse_listen_response(body: &str) -> Result<String> {
    let parsed: ListenResponse = serde_json::from_str(body)
        .map_err(|e| CallError::TranscriptionFailure(format!("unexpected response: {e}")))?;
    Ok(parsed
        .results
        .channels
        .into_iter()
        .next()
        .and_then(|c| c.alternatives.into_iter().next())
        .map(|a| a.transcript.trim().to_string())
        .unwrap_or_default())
}
