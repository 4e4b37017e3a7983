//! Scripted in-memory gateway for tests and offline use

use super::{ClassificationRequest, ClassifierGateway};
use crate::error::{GatewayFailure, Result};
use crate::types::Verdict;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// In-memory gateway answering from a fixed script
///
/// Verdicts are looked up by exact payload; unknown payloads get the
/// default verdict. A configured failure overrides everything.
pub struct MemoryGateway {
    verdicts: RwLock<HashMap<String, Verdict>>,
    default_verdict: RwLock<Verdict>,
    failure: RwLock<Option<GatewayFailure>>,
    latency: Duration,
    calls: AtomicUsize,
    batches: AtomicUsize,
    requests: RwLock<Vec<ClassificationRequest>>,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new(Verdict::safe(0.0))
    }
}

impl MemoryGateway {
    pub fn new(default_verdict: Verdict) -> Self {
        Self {
            verdicts: RwLock::new(HashMap::new()),
            default_verdict: RwLock::new(default_verdict),
            failure: RwLock::new(None),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            batches: AtomicUsize::new(0),
            requests: RwLock::new(Vec::new()),
        }
    }

    /// Answer `payload` with `verdict`
    pub fn with_verdict(self, payload: impl Into<String>, verdict: Verdict) -> Self {
        self.set_verdict(payload, verdict);
        self
    }

    /// Delay every answer (uses the tokio clock, so paused tests can advance it)
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn failing(self, failure: GatewayFailure) -> Self {
        self.set_failure(Some(failure));
        self
    }

    pub fn set_verdict(&self, payload: impl Into<String>, verdict: Verdict) {
        self.verdicts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(payload.into(), verdict);
    }

    pub fn set_default(&self, verdict: Verdict) {
        *self
            .default_verdict
            .write()
            .unwrap_or_else(PoisonError::into_inner) = verdict;
    }

    pub fn set_failure(&self, failure: Option<GatewayFailure>) {
        *self.failure.write().unwrap_or_else(PoisonError::into_inner) = failure;
    }

    /// Number of classify calls received
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of `classify_batch` calls received
    pub fn batch_calls(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<ClassificationRequest> {
        self.requests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ClassifierGateway for MemoryGateway {
    async fn classify(&self, request: &ClassificationRequest) -> Result<Verdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let failure = self
            .failure
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(failure) = failure {
            return Err(failure.into());
        }

        request.validate()?;

        let scripted = self
            .verdicts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&request.payload)
            .cloned();
        Ok(scripted.unwrap_or_else(|| {
            self.default_verdict
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }))
    }

    async fn classify_batch(&self, requests: &[ClassificationRequest]) -> Vec<Result<Verdict>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.classify(request).await);
        }
        results
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::FilterLevel;
    use crate::types::ContentKind;

    fn request(payload: &str) -> ClassificationRequest {
        ClassificationRequest {
            payload: payload.to_string(),
            kind: ContentKind::Text,
            threshold: 0.7,
            age_group: FilterLevel::Moderate,
        }
    }

    #[tokio::test]
    async fn test_scripted_and_default_verdicts() {
        let gateway = MemoryGateway::new(Verdict::safe(0.1))
            .with_verdict("bad words here", Verdict::flagged(0.9, ["toxic"]));

        let flagged = gateway.classify(&request("bad words here")).await.unwrap();
        assert!(!flagged.is_safe);
        assert!(flagged.has_category("toxic"));

        let safe = gateway.classify(&request("a normal sentence")).await.unwrap();
        assert!(safe.is_safe);

        assert_eq!(gateway.calls(), 2);
        assert_eq!(gateway.requests()[1].payload, "a normal sentence");
    }

    #[tokio::test]
    async fn test_failure_overrides_script() {
        let gateway = MemoryGateway::default().failing(GatewayFailure::status(503, "down"));
        let err = gateway.classify(&request("anything at all")).await.unwrap_err();
        assert!(err.is_gateway());

        gateway.set_failure(None);
        assert!(gateway.classify(&request("anything at all")).await.is_ok());
        assert_eq!(gateway.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalid_request_rejected() {
        let gateway = MemoryGateway::default();
        assert!(gateway.classify(&request("   ")).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_uses_tokio_clock() {
        let gateway = MemoryGateway::default().with_latency(Duration::from_secs(30));
        let start = tokio::time::Instant::now();
        gateway.classify(&request("slow answer")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(30));
    }
}
