//! Classification gateway: the single contract to the external backend
//!
//! All classification backends (HTTP service, in-memory script, etc.)
//! implement `ClassifierGateway`. The pipeline never looks past it.

use crate::error::{Result, ShieldError};
use crate::policy::{FilterLevel, SessionPolicy};
use crate::types::{ContentKind, Fragment, Verdict};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod http;
pub mod memory;

/// Longest text the backend accepts
pub const MAX_REQUEST_TEXT_CHARS: usize = 10_000;

/// Most items the backend accepts in one batch call
pub const MAX_BATCH_SIZE: usize = 50;

/// One classification request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationRequest {
    /// Text to analyze, or image URL / data URL
    pub payload: String,

    pub kind: ContentKind,

    /// Backend decision threshold in [0, 1]
    pub threshold: f64,

    /// Age-group parameter
    pub age_group: FilterLevel,
}

impl ClassificationRequest {
    /// Build the request for a fragment under a policy
    pub fn for_fragment(fragment: &Fragment, policy: &SessionPolicy) -> Self {
        Self {
            payload: fragment.payload.clone(),
            kind: fragment.kind,
            threshold: policy.threshold_for(fragment.kind),
            age_group: policy.filter_level,
        }
    }

    /// Reject requests the backend would refuse anyway
    pub fn validate(&self) -> Result<()> {
        if self.payload.trim().is_empty() {
            return Err(ShieldError::InvalidRequest(format!(
                "{} payload cannot be empty",
                self.kind
            )));
        }
        if self.kind == ContentKind::Text && self.payload.chars().count() > MAX_REQUEST_TEXT_CHARS {
            return Err(ShieldError::InvalidRequest(format!(
                "text too long (max {} characters)",
                MAX_REQUEST_TEXT_CHARS
            )));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ShieldError::InvalidRequest(format!(
                "threshold must be between 0.0 and 1.0, got {}",
                self.threshold
            )));
        }
        Ok(())
    }
}

/// Request/response contract to a classification backend
#[async_trait]
pub trait ClassifierGateway: Send + Sync {
    /// Classify one payload
    ///
    /// Backend and transport failures must come back as
    /// `ShieldError::Gateway`.
    async fn classify(&self, request: &ClassificationRequest) -> Result<Verdict>;

    /// Classify several payloads, one result per request in order
    ///
    /// Backends without a batch endpoint fall back to one call each.
    async fn classify_batch(&self, requests: &[ClassificationRequest]) -> Vec<Result<Verdict>> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.classify(request).await);
        }
        results
    }

    /// Gateway name (e.g., "http", "memory")
    fn name(&self) -> &str;

    /// Health check: returns true if the backend is reachable and ready
    async fn health(&self) -> Result<bool> {
        Ok(true)
    }
}
