//! Turning PDF pages into citation records with a generative model.
//!
//! The model receives one page as inline PDF data together with [`SEGMENTATION_PROMPT`] and is
//! asked for a JSON array of `{reference, text}` objects. A response that does not decode as
//! that array degrades to a single [`CitationRecord::placeholder`] instead of failing the
//! ingestion. Nothing is retried.

pub mod pdf;

use crate::config::{Config, get_config};
use crate::records::CitationRecord;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

/// Instruction sent alongside every page.
pub const SEGMENTATION_PROMPT: &str = "\
Read the content of the document and put each meaningful passage that carries the story on its own line. \
Resolve every pronoun (he, him, they, them, these, those, I, it, you, us, their, ...) by naming what it refers to in parentheses. \
Tag each line with its chapter and verse number as 'chapter:verse'. \
Answer with JSON only: an array of objects with a 'reference' and a 'text' field, and no other words.";

/// Errors raised while asking the model to segment a page.
#[derive(Debug, Error)]
pub enum SegmenterError {
    /// The model endpoint could not be reached.
    #[error("Segmentation provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// The endpoint answered with a non-success status.
    #[error("Segmentation request failed: {0}")]
    RequestFailed(String),
    /// The response envelope (not the generated JSON) could not be decoded.
    #[error("Malformed segmentation response: {0}")]
    InvalidResponse(String),
    /// No API key is configured for the provider.
    #[error("Missing API key for the segmentation provider")]
    MissingApiKey,
}

/// Interface implemented by page segmentation backends.
#[async_trait]
pub trait DocumentSegmenter: Send + Sync {
    /// Extract citation records from one single-page PDF.
    async fn segment_page(&self, page: &[u8]) -> Result<Vec<CitationRecord>, SegmenterError>;
}

/// Decode the model's JSON answer into records.
///
/// Anything other than an array of `{reference, text}` objects yields exactly one placeholder
/// record. References are not validated here; the ingestion pipeline decides what to keep.
pub fn parse_segments(raw: &str) -> Vec<CitationRecord> {
    match serde_json::from_str::<Vec<CitationRecord>>(strip_code_fence(raw)) {
        Ok(records) => records,
        Err(error) => {
            tracing::warn!(error = %error, chars = raw.len(), "Segmentation output is not valid JSON; substituting placeholder record");
            vec![CitationRecord::placeholder()]
        }
    }
}

// Models occasionally wrap JSON answers in a markdown fence despite the response MIME type.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|body| body.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

/// Segmenter backed by the Gemini `generateContent` REST endpoint.
pub struct GeminiSegmenter {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    prompt: String,
}

impl GeminiSegmenter {
    /// Construct a segmenter calling `model` at `base_url` with the default prompt.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, SegmenterError> {
        let http = Client::builder()
            .user_agent("citerag/segment")
            .build()
            .map_err(|error| SegmenterError::ProviderUnavailable(error.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            prompt: SEGMENTATION_PROMPT.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    fn request_body(&self, page: &[u8]) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "inline_data": { "mime_type": "application/pdf", "data": BASE64.encode(page) } },
                    { "text": self.prompt }
                ]
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "ARRAY",
                    "items": {
                        "type": "OBJECT",
                        "properties": {
                            "reference": { "type": "STRING" },
                            "text": { "type": "STRING" }
                        },
                        "required": ["reference", "text"]
                    }
                }
            }
        })
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateContentResponse {
    fn into_text(self) -> String {
        self.candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentSegmenter for GeminiSegmenter {
    async fn segment_page(&self, page: &[u8]) -> Result<Vec<CitationRecord>, SegmenterError> {
        tracing::debug!(model = %self.model, bytes = page.len(), "Requesting page segmentation");
        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(page))
            .send()
            .await
            .map_err(|error| {
                SegmenterError::ProviderUnavailable(format!(
                    "failed to reach {}: {error}",
                    self.base_url
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SegmenterError::RequestFailed(format!(
                "Gemini returned {status}: {body}"
            )));
        }

        let body: GenerateContentResponse = response.json().await.map_err(|error| {
            SegmenterError::InvalidResponse(format!("failed to decode Gemini response: {error}"))
        })?;
        let records = parse_segments(&body.into_text());
        tracing::debug!(records = records.len(), "Page segmented");
        Ok(records)
    }
}

/// Build the segmenter described by `config`.
pub fn segmenter_from_config(
    config: &Config,
) -> Result<Box<dyn DocumentSegmenter>, SegmenterError> {
    let api_key = config
        .gemini_api_key
        .clone()
        .ok_or(SegmenterError::MissingApiKey)?;
    Ok(Box::new(GeminiSegmenter::new(
        config.gemini_base_url.clone(),
        api_key,
        config.segmenter_model.clone(),
    )?))
}

/// Build a segmenter for the globally loaded configuration.
pub fn get_segmenter() -> Result<Box<dyn DocumentSegmenter>, SegmenterError> {
    segmenter_from_config(get_config())
}
