//! HTTP classification gateway
//!
//! Talks to the analysis service:
//!
//! - `POST /api/analyze/text` `{text, threshold, age_group}`
//! - `POST /api/analyze/image` `{image, threshold, age_group}`, `image` is a base64 data URL
//! - `POST /api/analyze/batch` `{items: [{id, type, content, threshold, age_group}]}`, 1-50 items
//! - `GET  /api/health`
//!
//! The analyze endpoints answer `{is_safe, confidence, flagged_categories}`;
//! the batch endpoint wraps one such result per item as `{id, result}`.

use super::{ClassificationRequest, ClassifierGateway, MAX_BATCH_SIZE};
use crate::config::GatewayConfig;
use crate::error::{GatewayFailure, Result, ShieldError};
use crate::types::{ContentKind, Verdict};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_IMAGE_TYPE: &str = "image/jpeg";

type ItemOutcome = std::result::Result<Verdict, GatewayFailure>;

#[derive(Serialize)]
struct TextAnalysisRequest<'a> {
    text: &'a str,
    threshold: f64,
    age_group: &'a str,
}

#[derive(Serialize)]
struct ImageAnalysisRequest<'a> {
    image: &'a str,
    threshold: f64,
    age_group: &'a str,
}

#[derive(Deserialize)]
struct AnalysisResponse {
    is_safe: bool,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    flagged_categories: Vec<String>,
}

#[derive(Serialize)]
struct BatchItem {
    id: usize,
    #[serde(rename = "type")]
    kind: &'static str,
    content: String,
    threshold: f64,
    age_group: &'static str,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    items: &'a [BatchItem],
}

#[derive(Deserialize)]
struct BatchResponse {
    results: Vec<BatchEntry>,
}

#[derive(Deserialize)]
struct BatchEntry {
    id: Option<usize>,
    result: BatchItemResult,
}

#[derive(Deserialize)]
struct BatchItemResult {
    is_safe: Option<bool>,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    flagged_categories: Vec<String>,
    error: Option<String>,
}

impl BatchItemResult {
    fn into_verdict(self) -> ItemOutcome {
        if let Some(error) = self.error {
            return Err(GatewayFailure::transport(format!("batch item failed: {}", error)));
        }
        match self.is_safe {
            Some(is_safe) => Ok(Verdict::new(is_safe, self.confidence, self.flagged_categories)),
            None => Err(GatewayFailure::transport("batch item missing is_safe")),
        }
    }
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Deserialize)]
struct HealthResponse {
    status: String,
}

/// `ClassifierGateway` over the analysis service's HTTP API
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    /// Build a gateway with the configured base URL and per-request timeout
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ShieldError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn analyze<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Verdict> {
        let url = self.endpoint(path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayFailure::transport(format!("POST {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failure_from_response(status, response).await.into());
        }

        let parsed: AnalysisResponse = response.json().await.map_err(|e| {
            GatewayFailure::status(status.as_u16(), format!("malformed analysis response: {}", e))
        })?;

        Ok(Verdict::new(
            parsed.is_safe,
            parsed.confidence,
            parsed.flagged_categories,
        ))
    }

    /// One `/api/analyze/batch` call; results keyed by item id
    async fn analyze_batch(
        &self,
        items: &[BatchItem],
    ) -> std::result::Result<HashMap<usize, ItemOutcome>, GatewayFailure> {
        let url = self.endpoint("/api/analyze/batch");
        let response = self
            .client
            .post(&url)
            .json(&BatchRequest { items })
            .send()
            .await
            .map_err(|e| GatewayFailure::transport(format!("POST {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failure_from_response(status, response).await);
        }

        let parsed: BatchResponse = response.json().await.map_err(|e| {
            GatewayFailure::status(status.as_u16(), format!("malformed batch response: {}", e))
        })?;

        Ok(parsed
            .results
            .into_iter()
            .filter_map(|entry| Some((entry.id?, entry.result.into_verdict())))
            .collect())
    }

    /// Turn an image reference into the data URL the backend expects
    async fn image_data_url(&self, src: &str) -> Result<String> {
        if src.starts_with("data:image") {
            return Ok(src.to_string());
        }

        let response = self
            .client
            .get(src)
            .send()
            .await
            .map_err(|e| GatewayFailure::transport(format!("fetch image {}: {}", src, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(
                GatewayFailure::status(status.as_u16(), format!("fetch image {}", src)).into(),
            );
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("image/"))
            .map(|v| v.split(';').next().unwrap_or(DEFAULT_IMAGE_TYPE).trim().to_string())
            .unwrap_or_else(|| DEFAULT_IMAGE_TYPE.to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| GatewayFailure::transport(format!("read image {}: {}", src, e)))?;

        Ok(format!("data:{};base64,{}", content_type, BASE64.encode(&bytes)))
    }
}

async fn failure_from_response(status: StatusCode, response: reqwest::Response) -> GatewayFailure {
    let body = response.text().await.unwrap_or_default();
    let reason = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error)
        .unwrap_or_else(|_| {
            if body.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            } else {
                body
            }
        });
    GatewayFailure::status(status.as_u16(), reason)
}

#[async_trait]
impl ClassifierGateway for HttpGateway {
    async fn classify(&self, request: &ClassificationRequest) -> Result<Verdict> {
        request.validate()?;
        let age_group = request.age_group.as_str();

        let verdict = match request.kind {
            ContentKind::Text => {
                self.analyze(
                    "/api/analyze/text",
                    &TextAnalysisRequest {
                        text: &request.payload,
                        threshold: request.threshold,
                        age_group,
                    },
                )
                .await?
            }
            ContentKind::Image => {
                let image = self.image_data_url(&request.payload).await?;
                self.analyze(
                    "/api/analyze/image",
                    &ImageAnalysisRequest {
                        image: &image,
                        threshold: request.threshold,
                        age_group,
                    },
                )
                .await?
            }
        };

        tracing::debug!(
            kind = %request.kind,
            is_safe = verdict.is_safe,
            confidence = verdict.confidence,
            categories = ?verdict.categories,
            "Backend verdict received"
        );
        Ok(verdict)
    }

    async fn classify_batch(&self, requests: &[ClassificationRequest]) -> Vec<Result<Verdict>> {
        let mut results: Vec<Option<Result<Verdict>>> = requests.iter().map(|_| None).collect();

        let mut items = Vec::with_capacity(requests.len());
        for (id, request) in requests.iter().enumerate() {
            if let Err(e) = request.validate() {
                results[id] = Some(Err(e));
                continue;
            }
            let content = match request.kind {
                ContentKind::Text => request.payload.clone(),
                ContentKind::Image => match self.image_data_url(&request.payload).await {
                    Ok(image) => image,
                    Err(e) => {
                        results[id] = Some(Err(e));
                        continue;
                    }
                },
            };
            items.push(BatchItem {
                id,
                kind: request.kind.as_str(),
                content,
                threshold: request.threshold,
                age_group: request.age_group.as_str(),
            });
        }

        for chunk in items.chunks(MAX_BATCH_SIZE) {
            match self.analyze_batch(chunk).await {
                Ok(mut answered) => {
                    for item in chunk {
                        let outcome = answered.remove(&item.id).unwrap_or_else(|| {
                            Err(GatewayFailure::transport(format!(
                                "batch response has no result for item {}",
                                item.id
                            )))
                        });
                        results[item.id] = Some(outcome.map_err(ShieldError::from));
                    }
                }
                Err(failure) => {
                    for item in chunk {
                        results[item.id] = Some(Err(failure.clone().into()));
                    }
                }
            }
        }

        tracing::debug!(requests = requests.len(), sent = items.len(), "Batch verdicts received");
        results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| Err(GatewayFailure::transport("batch item not sent").into()))
            })
            .collect()
    }

    fn name(&self) -> &str {
        "http"
    }

    async fn health(&self) -> Result<bool> {
        let url = self.endpoint("/api/health");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GatewayFailure::transport(format!("GET {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Ok(false);
        }
        Ok(response
            .json::<HealthResponse>()
            .await
            .map(|h| h.status == "healthy")
            .unwrap_or(false))
    }
}
