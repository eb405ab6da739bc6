//! Language-model collaborators: embeddings, chunk labels and region
//! explanations.
//!
//! The pipeline only sees the [`Embedder`], [`Labeler`] and [`Explainer`]
//! traits. [`OpenAiClient`] implements all three against any
//! OpenAI-compatible endpoint.

use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::{
    error::{LecternError, Result},
    provider::Provider,
};

static LABEL_PROMPT: &str = "Label this transcript chunk concisely.";

static EXPLAIN_PROMPT: &str = "You are a concise tutor AI. \
Explain the selected region clearly in 1-3 sentences, using the transcript for context. \
Use the full slide also for context.";

pub trait Embedder {
    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn similarity(&self, a: &[f32], b: &[f32]) -> Result<f32> {
        cosine_similarity(a, b)
    }
}

pub trait Labeler {
    async fn label(&self, text: &str) -> Result<String>;
}

pub struct ExplainRequest<'a> {
    pub transcript: &'a str,
    pub region_png: &'a [u8],
    pub slide_png: Option<&'a [u8]>,
}

pub trait Explainer {
    async fn explain(&self, request: &ExplainRequest<'_>) -> Result<String>;
}

/// `dot(a, b) / (|a| * |b|)`. A zero vector has no direction, so its
/// similarity to anything is `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(LecternError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }
    Ok((dot / (norm_a.sqrt() * norm_b.sqrt())) as f32)
}

/// HTTP client for OpenAI-compatible `/embeddings` and `/chat/completions`.
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    chat_model: String,
    embedding_model: String,
    max_retries: usize,
    batch_size: usize,
}

impl OpenAiClient {
    pub fn new(provider: &Provider) -> Result<Self> {
        let config = provider.config();
        let api_key = provider.validate_api_key()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            chat_model: config.chat_model.to_string(),
            embedding_model: config.embedding_model.to_string(),
            max_retries: 3,
            batch_size: 256,
        })
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path);
        let mut attempt = 0usize;

        loop {
            let response = self
                .http
                .post(&url)
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(body)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => return Ok(resp.json::<Value>().await?),
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        debug!(%status, attempt, url = %url, "retrying request");
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(LecternError::ApiStatus {
                        url,
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(err) => {
                    if is_retryable(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        debug!(error = %err, attempt, url = %url, "retrying request");
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }

    async fn chat(&self, messages: Value, temperature: Option<f32>) -> Result<Option<String>> {
        let mut body = json!({
            "model": self.chat_model,
            "messages": messages,
        });
        if let Some(temperature) = temperature {
            body["temperature"] = json!(temperature);
        }
        let response = self.post_json("chat/completions", &body).await?;
        Ok(chat_content(&response))
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(500 * (1 << capped))
}

fn chat_content(response: &Value) -> Option<String> {
    response["choices"][0]["message"]["content"]
        .as_str()
        .map(|content| content.trim().to_string())
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

fn parse_embeddings(response: Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let parsed: EmbeddingResponse =
        serde_json::from_value(response).map_err(|e| LecternError::EmbeddingFailed {
            reason: format!("invalid embeddings response: {e}"),
        })?;

    let mut rows = parsed.data;
    if rows.len() != expected {
        return Err(LecternError::EmbeddingFailed {
            reason: format!("received {} embeddings for {} inputs", rows.len(), expected),
        });
    }
    rows.sort_by_key(|row| row.index);

    // Indices must be exactly 0..expected after sorting.
    if let Some((position, row)) = rows.iter().enumerate().find(|(i, row)| row.index != *i) {
        return Err(LecternError::EmbeddingFailed {
            reason: format!("embedding index {} found at position {position}", row.index),
        });
    }
    Ok(rows.into_iter().map(|row| row.embedding).collect())
}

fn data_url(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}

fn explain_messages(request: &ExplainRequest<'_>) -> Value {
    let mut content = vec![
        json!({"type": "text", "text": format!("Transcript:\n{}", request.transcript)}),
        json!({"type": "text", "text": "Cropped region:"}),
        json!({"type": "image_url", "image_url": {"url": data_url(request.region_png)}}),
    ];
    if let Some(slide) = request.slide_png {
        content.push(json!({"type": "text", "text": "Full slide:"}));
        content.push(json!({"type": "image_url", "image_url": {"url": data_url(slide)}}));
    }

    json!([
        {"role": "system", "content": EXPLAIN_PROMPT},
        {"role": "user", "content": content},
    ])
}

impl Embedder for OpenAiClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = json!({
                "model": self.embedding_model,
                "input": batch,
            });
            let response = self.post_json("embeddings", &body).await?;
            vectors.extend(parse_embeddings(response, batch.len())?);
        }
        Ok(vectors)
    }
}

impl Labeler for OpenAiClient {
    async fn label(&self, text: &str) -> Result<String> {
        let messages = json!([
            {"role": "system", "content": LABEL_PROMPT},
            {"role": "user", "content": text},
        ]);
        self.chat(messages, None)
            .await?
            .filter(|label| !label.is_empty())
            .ok_or_else(|| LecternError::LabelFailed {
                reason: "empty completion".to_string(),
            })
    }
}

impl Explainer for OpenAiClient {
    async fn explain(&self, request: &ExplainRequest<'_>) -> Result<String> {
        self.chat(explain_messages(request), Some(0.4))
            .await?
            .ok_or_else(|| LecternError::ExplanationFailed {
                reason: "empty completion".to_string(),
            })
    }
}
