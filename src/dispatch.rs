//! Dispatch coordinator: fragment → verdict with caching and coalescing
//!
//! `Dispatcher` owns the result cache and the in-flight map. A cache hit
//! answers immediately; a miss either attaches to an outstanding request
//! for the same fingerprint or issues exactly one new gateway call.
//!
//! Gateway calls run on their own task. A caller going away (or the
//! session stopping) does not cancel them, so their verdicts still land
//! in the cache for later hits.

use crate::cache::{CacheStats, ResultCache};
use crate::config::CacheConfig;
use crate::error::{GatewayFailure, Result, ShieldError};
use crate::gateway::{ClassificationRequest, ClassifierGateway};
use crate::policy::SessionPolicy;
use crate::types::{Fingerprint, Fragment, Verdict};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type PendingVerdict = Shared<BoxFuture<'static, Outcome>>;
type InFlight = Arc<Mutex<HashMap<Fingerprint, PendingVerdict>>>;

/// Where a verdict came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VerdictSource {
    /// Unexpired cache entry
    Cache,
    /// This call issued the gateway request
    Gateway,
    /// Attached to another caller's outstanding request
    Coalesced,
}

/// A verdict plus how it was obtained
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub fingerprint: Fingerprint,
    pub verdict: Verdict,
    pub source: VerdictSource,
}

/// Dispatcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStats {
    /// Gateway requests issued
    pub requests: u64,
    pub cache_hits: u64,
    pub coalesced: u64,
    pub failures: u64,
    /// Requests currently outstanding
    pub in_flight: usize,
    pub cache: CacheStats,
}

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    coalesced: AtomicU64,
    failures: AtomicU64,
}

/// Classification front door for the scanner
pub struct Dispatcher {
    gateway: Arc<dyn ClassifierGateway>,
    cache: Arc<Mutex<ResultCache>>,
    in_flight: InFlight,
    counters: Arc<Counters>,
}

impl Dispatcher {
    pub fn new(gateway: Arc<dyn ClassifierGateway>, config: &CacheConfig) -> Self {
        Self::with_cache(gateway, ResultCache::new(config))
    }

    pub fn with_cache(gateway: Arc<dyn ClassifierGateway>, cache: ResultCache) -> Self {
        Self {
            gateway,
            cache: Arc::new(Mutex::new(cache)),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn gateway_name(&self) -> &str {
        self.gateway.name()
    }

    /// Whether the backend is reachable
    pub async fn health(&self) -> Result<bool> {
        self.gateway.health().await
    }

    /// Classify a fragment under a policy
    pub async fn classify(
        &self,
        fragment: &Fragment,
        policy: &SessionPolicy,
    ) -> Result<Classification> {
        let fingerprint = Fingerprint::of(fragment, policy);
        let request = ClassificationRequest::for_fragment(fragment, policy);
        self.classify_request(fingerprint, request).await
    }

    /// Classify a pre-built request under an explicit fingerprint
    pub async fn classify_request(
        &self,
        fingerprint: Fingerprint,
        request: ClassificationRequest,
    ) -> Result<Classification> {
        let (pending, source) = {
            let mut in_flight = lock(&self.in_flight);

            if let Some(verdict) = lock(&self.cache).get(&fingerprint) {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(fingerprint = %fingerprint, "Cache hit");
                return Ok(Classification {
                    fingerprint,
                    verdict,
                    source: VerdictSource::Cache,
                });
            }

            match in_flight.get(&fingerprint) {
                Some(pending) => {
                    self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(fingerprint = %fingerprint, "Coalesced onto in-flight request");
                    (pending.clone(), VerdictSource::Coalesced)
                }
                None => {
                    let pending = self.spawn_request(fingerprint.clone(), request);
                    in_flight.insert(fingerprint.clone(), pending.clone());
                    (pending, VerdictSource::Gateway)
                }
            }
        };

        let verdict = pending.await.map_err(ShieldError::Gateway)?;
        Ok(Classification {
            fingerprint,
            verdict,
            source,
        })
    }

    /// Peek at the cache without issuing a request
    pub fn cached(&self, fragment: &Fragment, policy: &SessionPolicy) -> Option<Verdict> {
        lock(&self.cache).get(&Fingerprint::of(fragment, policy))
    }

    pub fn clear_cache(&self) {
        lock(&self.cache).clear();
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            in_flight: lock(&self.in_flight).len(),
            cache: lock(&self.cache).stats(),
        }
    }

    /// Classify several fragments with at most one gateway batch call
    ///
    /// Cache hits and fragments already in flight are answered as in
    /// `classify`; the remaining distinct fingerprints go out together.
    /// Results come back in fragment order.
    pub async fn classify_batch(
        &self,
        fragments: &[Fragment],
        policy: &SessionPolicy,
    ) -> Vec<Result<Classification>> {
        let mut slots = Vec::with_capacity(fragments.len());
        {
            let mut in_flight = lock(&self.in_flight);
            let mut fresh: Vec<(Fingerprint, ClassificationRequest)> = Vec::new();

            for fragment in fragments {
                let fingerprint = Fingerprint::of(fragment, policy);
                if let Some(verdict) = lock(&self.cache).get(&fingerprint) {
                    self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                    slots.push(Slot::Ready(fingerprint, verdict));
                    continue;
                }
                if let Some(pending) = in_flight.get(&fingerprint) {
                    self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    let pending = pending.clone();
                    slots.push(Slot::Waiting(fingerprint, pending, VerdictSource::Coalesced));
                    continue;
                }
                match fresh.iter().position(|(f, _)| *f == fingerprint) {
                    Some(index) => {
                        self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                        slots.push(Slot::Fresh(fingerprint, index, VerdictSource::Coalesced));
                    }
                    None => {
                        let request = ClassificationRequest::for_fragment(fragment, policy);
                        let index = fresh.len();
                        slots.push(Slot::Fresh(fingerprint.clone(), index, VerdictSource::Gateway));
                        fresh.push((fingerprint, request));
                    }
                }
            }

            if !fresh.is_empty() {
                let keys: Vec<Fingerprint> = fresh.iter().map(|(f, _)| f.clone()).collect();
                let pending = self.spawn_batch(fresh);
                for (key, pending) in keys.into_iter().zip(&pending) {
                    in_flight.insert(key, pending.clone());
                }
                for slot in slots.iter_mut() {
                    if let Slot::Fresh(fingerprint, index, source) = slot {
                        let waiting =
                            Slot::Waiting(fingerprint.clone(), pending[*index].clone(), *source);
                        *slot = waiting;
                    }
                }
            }
        }

        let mut results = Vec::with_capacity(slots.len());
        for slot in slots {
            results.push(match slot {
                Slot::Ready(fingerprint, verdict) => Ok(Classification {
                    fingerprint,
                    verdict,
                    source: VerdictSource::Cache,
                }),
                Slot::Waiting(fingerprint, pending, source) => match pending.await {
                    Ok(verdict) => Ok(Classification {
                        fingerprint,
                        verdict,
                        source,
                    }),
                    Err(failure) => Err(ShieldError::Gateway(failure)),
                },
                Slot::Fresh(..) => Err(ShieldError::Gateway(GatewayFailure::transport(
                    "batch slot never dispatched",
                ))),
            });
        }
        results
    }

    fn spawn_request(
        &self,
        fingerprint: Fingerprint,
        request: ClassificationRequest,
    ) -> PendingVerdict {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let gateway = Arc::clone(&self.gateway);
        let cache = Arc::clone(&self.cache);
        let in_flight = Arc::clone(&self.in_flight);
        let counters = Arc::clone(&self.counters);
        let key = fingerprint.clone();

        let handle = tokio::spawn(async move {
            let outcome = into_outcome(gateway.classify(&request).await);
            record_outcome(&cache, &counters, &key, &request, &outcome);
            lock(&in_flight).remove(&key);
            outcome
        });

        let in_flight = Arc::clone(&self.in_flight);
        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    lock(&in_flight).remove(&fingerprint);
                    Err(abnormal_end(e))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// One gateway batch call, fanned out into a pending verdict per item
    fn spawn_batch(
        &self,
        batch: Vec<(Fingerprint, ClassificationRequest)>,
    ) -> Vec<PendingVerdict> {
        self.counters
            .requests
            .fetch_add(batch.len() as u64, Ordering::Relaxed);

        let gateway = Arc::clone(&self.gateway);
        let cache = Arc::clone(&self.cache);
        let in_flight = Arc::clone(&self.in_flight);
        let counters = Arc::clone(&self.counters);
        let keys: Vec<Fingerprint> = batch.iter().map(|(f, _)| f.clone()).collect();

        let handle = tokio::spawn(async move {
            let (keys, requests): (Vec<Fingerprint>, Vec<ClassificationRequest>) =
                batch.into_iter().unzip();
            let mut answers = gateway.classify_batch(&requests).await.into_iter();

            let mut outcomes = Vec::with_capacity(requests.len());
            for (key, request) in keys.iter().zip(&requests) {
                let outcome = match answers.next() {
                    Some(answer) => into_outcome(answer),
                    None => Err(GatewayFailure::transport("gateway returned too few results")),
                };
                record_outcome(&cache, &counters, key, request, &outcome);
                lock(&in_flight).remove(key);
                outcomes.push(outcome);
            }
            outcomes
        });

        let count = keys.len();
        let in_flight = Arc::clone(&self.in_flight);
        let all: Shared<BoxFuture<'static, Vec<Outcome>>> = async move {
            match handle.await {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    let mut in_flight = lock(&in_flight);
                    for key in &keys {
                        in_flight.remove(key);
                    }
                    vec![Err(abnormal_end(e)); keys.len()]
                }
            }
        }
        .boxed()
        .shared();

        (0..count)
            .map(|index| {
                let all = all.clone();
                async move {
                    all.await.get(index).cloned().unwrap_or_else(|| {
                        Err(GatewayFailure::transport("gateway returned too few results"))
                    })
                }
                .boxed()
                .shared()
            })
            .collect()
    }
}

type Outcome = std::result::Result<Verdict, GatewayFailure>;

enum Slot {
    Ready(Fingerprint, Verdict),
    Waiting(Fingerprint, PendingVerdict, VerdictSource),
    /// Index into the batch about to be sent
    Fresh(Fingerprint, usize, VerdictSource),
}

fn into_outcome(result: Result<Verdict>) -> Outcome {
    match result {
        Ok(verdict) => Ok(verdict),
        Err(ShieldError::Gateway(failure)) => Err(failure),
        Err(other) => Err(GatewayFailure::transport(other.to_string())),
    }
}

/// Cache a verdict or count a failure
///
/// Runs before the in-flight slot is released so no caller can slip
/// between the two and issue a duplicate request.
fn record_outcome(
    cache: &Mutex<ResultCache>,
    counters: &Counters,
    key: &Fingerprint,
    request: &ClassificationRequest,
    outcome: &Outcome,
) {
    match outcome {
        Ok(verdict) => lock(cache).insert(key.clone(), verdict.clone()),
        Err(failure) => {
            counters.failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                fingerprint = %key,
                kind = %request.kind,
                error = %failure,
                "Classification failed"
            );
        }
    }
}

fn abnormal_end(e: tokio::task::JoinError) -> GatewayFailure {
    GatewayFailure::transport(format!("classification task ended abnormally: {}", e))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
