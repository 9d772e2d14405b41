//! Gemini-backed judgment oracle.
//!
//! Sends an instruction plus a text context to Gemini 2.0 Flash and returns the
//! model's free-text answer. Requests are rate limited client-side.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{Quota, RateLimiter as GovRateLimiter};
use serde::{Deserialize, Serialize};

use crate::capabilities::JudgmentOracle;
use crate::error::{RuckusError, Result};

/// Gemini 2.0 Flash API endpoint.
const GEMINI_API_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";

/// Rate limiter type alias.
type RateLimiter = GovRateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Judgment oracle over the Gemini REST API.
pub struct GeminiOracle {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    rate_limiter: Arc<RateLimiter>,
}

impl GeminiOracle {
    /// Create a new GeminiOracle with the given API key.
    ///
    /// Rate limited to 60 requests per minute by default.
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_rate_limit(api_key, 60)
    }

    /// Create a new GeminiOracle with custom rate limit.
    pub fn with_rate_limit(api_key: String, requests_per_minute: u32) -> Result<Self> {
        let quota =
            Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));
        let rate_limiter = Arc::new(GovRateLimiter::direct(quota));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_key,
            endpoint: GEMINI_API_URL.to_string(),
            rate_limiter,
        })
    }

    /// Point the oracle at a different `generateContent` URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn generate(&self, instruction: &str, context: &str) -> Result<String> {
        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .json(&build_request(instruction, context))
            .send()
            .await?;

        match response.status() {
            reqwest::StatusCode::TOO_MANY_REQUESTS => {
                let retry_after_secs = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.trim().parse::<u64>().ok())
                    .unwrap_or(60);
                Err(RuckusError::RateLimited {
                    retry_after_ms: retry_after_secs.saturating_mul(1000),
                })
            }
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                Err(RuckusError::Oracle(format!("HTTP {}: {}", status, body)))
            }
            _ => {
                let parsed: GenerateResponse = response.json().await?;
                first_candidate_text(&parsed)
                    .ok_or_else(|| RuckusError::Oracle("response contained no text".to_string()))
            }
        }
    }
}

#[async_trait]
impl JudgmentOracle for GeminiOracle {
    async fn ask(&self, instruction: &str, context: &str) -> Result<String> {
        let started = std::time::Instant::now();
        let result = self.generate(instruction, context).await;
        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Gemini request finished"
        );
        result
    }
}

/// Build a request carrying the instruction as the system prompt.
pub fn build_request(instruction: &str, context: &str) -> GenerateRequest {
    GenerateRequest {
        contents: vec![Content::text(context)],
        system_instruction: (!instruction.trim().is_empty()).then(|| Content::text(instruction)),
    }
}

/// Concatenated text parts of the first candidate, if any.
pub fn first_candidate_text(response: &GenerateResponse) -> Option<String> {
    let joined: String = response
        .candidates
        .first()?
        .content
        .parts
        .iter()
        .map(|p| p.text.as_str())
        .collect();
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Body of a `generateContent` call.
#[derive(Debug, Serialize)]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

/// A list of text parts, used for prompts and candidates alike.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    fn text(text: &str) -> Self {
        Self {
            parts: vec![Part {
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Content,
}
