//! Speech analysis oracle.
//!
//! Thin wrapper around the Gemini generateContent endpoint: one audio
//! segment in, one `SegmentAnalysis` out. The engine only sees the
//! `AnalysisOracle` trait, so replay and tests can substitute their own.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::analysis::{parse_oracle_payload, SegmentAnalysis, DEFAULT_SEGMENT_DURATION_MS};

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const ANALYSIS_PROMPT: &str = r#"You are a speech analysis engine. Transcribe the audio and analyze the speech. Respond with ONLY a JSON object, no other text, using this exact schema:
{
  "transcription": "word-for-word transcript, empty string if no speech",
  "speakingRate": {"wordsPerMinute": number},
  "fillerWords": [{"word": "um", "count": number}],
  "stutters": [{"word": "w-word", "timestamp": seconds, "type": "repetition"|"prolongation"|"block"}],
  "pauses": [{"duration": seconds, "timestamp": seconds, "type": "filler"|"silence"}],
  "tone": {"overall": "confident"|"nervous"|"uncertain"|"aggressive"|"calm"|"neutral", "score": 0-100},
  "confidence": {"score": 0-100},
  "interruptions": {"detected": boolean, "count": number},
  "sentiment": "positive"|"neutral"|"negative",
  "keyInsights": ["short observation"]
}"#;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Oracle API key is required")]
    MissingApiKey,
    #[error("Failed to create HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("Oracle request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Oracle API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Oracle response contained no text")]
    EmptyResponse,
}

/// Boundary trait for whatever analyzes raw audio into a segment record
#[async_trait]
pub trait AnalysisOracle: Send + Sync {
    async fn analyze(
        &self,
        audio: &[u8],
        mime_type: &str,
        timestamp_ms: i64,
    ) -> Result<SegmentAnalysis, OracleError>;
}

pub struct GeminiOracle {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

// -- Response types --

#[derive(Debug, Deserialize)]
pub struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiResponseContent,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

impl GeminiOracle {
    pub fn new(api_key: &str) -> Result<Self, OracleError> {
        if api_key.trim().is_empty() {
            return Err(OracleError::MissingApiKey);
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(OracleError::Client)?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    pub fn build_request_body(audio: &[u8], mime_type: &str) -> serde_json::Value {
        let encoded = base64::engine::general_purpose::STANDARD.encode(audio);
        serde_json::json!({
            "contents": [{
                "parts": [
                    {"text": ANALYSIS_PROMPT},
                    {"inlineData": {"mimeType": mime_type, "data": encoded}}
                ]
            }]
        })
    }

    pub fn extract_text(response: &GeminiResponse) -> Option<String> {
        response
            .candidates
            .first()
            .and_then(|c| c.content.parts.iter().find_map(|p| p.text.as_ref()))
            .cloned()
    }
}

#[async_trait]
impl AnalysisOracle for GeminiOracle {
    async fn analyze(
        &self,
        audio: &[u8],
        mime_type: &str,
        timestamp_ms: i64,
    ) -> Result<SegmentAnalysis, OracleError> {
        let url = format!("{}/{}:generateContent", GEMINI_ENDPOINT, self.model);
        let body = Self::build_request_body(audio, mime_type);

        info!("Oracle analysis: {} audio bytes", audio.len());

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(
                "x-goog-api-key",
                HeaderValue::from_str(&self.api_key)
                    .map_err(|_| OracleError::MissingApiKey)?,
            )
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            // Truncate error body to avoid leaking sensitive data
            let truncated = if error_body.len() > 200 {
                error_body[..200].to_string()
            } else {
                error_body
            };
            return Err(OracleError::Api {
                status: status.as_u16(),
                body: truncated,
            });
        }

        let gemini_response: GeminiResponse = response.json().await?;
        let text = Self::extract_text(&gemini_response).ok_or(OracleError::EmptyResponse)?;

        Ok(parse_oracle_payload(
            &text,
            timestamp_ms,
            DEFAULT_SEGMENT_DURATION_MS,
        ))
    }
}
