//! Session controller: one moderation pipeline per page load
//!
//! `Session` wires the scanner, dispatcher and blocking state machine
//! together and owns their background tasks:
//!
//! - mutation observer and periodic rescan (discovery)
//! - throttled queue drain (at most `batch_size` fragments per tick,
//!   optionally sent as one gateway batch call)
//! - flagged-content consumer (applies blocks)
//!
//! Fragments a stopped run never got to act on (still queued, in flight,
//! or flagged but not yet blocked) lose their processed mark, so the next
//! run discovers them again.
//!
//! The dispatcher (with its cache) and the blocking state machine outlive
//! individual runs, so a policy change keeps cached verdicts and
//! `restore_all` still works after `stop`.

use crate::blocker::{BlockRecord, BlockingStateMachine};
use crate::cache::CacheStats;
use crate::config::ShieldConfig;
use crate::dispatch::{Classification, Dispatcher, VerdictSource};
use crate::error::Result;
use crate::gateway::ClassifierGateway;
use crate::page::{Mark, NodeId, PageDocument};
use crate::policy::SessionPolicy;
use crate::scanner::PageScanner;
use crate::settings::SettingsStore;
use crate::types::{Fragment, FragmentState, IssueReport, ShieldEvent, Verdict};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Why `start` did or did not launch the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StartOutcome {
    Started,
    /// Policy has the master switch off
    Disabled,
    /// Page host is on the allowlist
    TrustedSite,
}

/// Embedder-defined shortcuts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Command {
    /// Pause discovery if running, resume otherwise
    Toggle,
    RestoreAll,
    Rescan,
    Stats,
}

/// Result of executing a `Command`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum CommandOutcome {
    Toggled { paused: bool },
    Restored { count: usize },
    Rescanned { queued: usize },
    Stats(SessionStats),
}

/// Point-in-time session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    /// Fragments taken off the queue
    pub scanned: u64,
    /// Verdicts obtained (any source)
    pub classified: u64,
    pub cache_hits: u64,
    pub coalesced: u64,
    pub blocked: u64,
    pub restored: u64,
    pub gateway_failures: u64,
    /// Blocks currently in place
    pub active_blocks: usize,
    pub cache: CacheStats,
}

#[derive(Default)]
struct Counters {
    scanned: AtomicU64,
    classified: AtomicU64,
    cache_hits: AtomicU64,
    coalesced: AtomicU64,
    blocked: AtomicU64,
    restored: AtomicU64,
    gateway_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Components shared by every run of a session
struct Pipeline {
    page: Arc<dyn PageDocument>,
    dispatcher: Dispatcher,
    blocker: BlockingStateMachine,
    events: broadcast::Sender<ShieldEvent>,
    counters: Counters,
}

/// One active run
struct Running {
    scanner: Arc<PageScanner>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Moderation session for one page
pub struct Session {
    pipeline: Arc<Pipeline>,
    config: ShieldConfig,
    settings: Option<Arc<dyn SettingsStore>>,
    policy: RwLock<Arc<SessionPolicy>>,
    running: Mutex<Option<Running>>,
    paused: AtomicBool,
}

impl Session {
    /// Create an idle session; nothing runs until `start`
    pub fn new(
        page: Arc<dyn PageDocument>,
        gateway: Arc<dyn ClassifierGateway>,
        config: ShieldConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.events.capacity);
        let pipeline = Pipeline {
            dispatcher: Dispatcher::new(gateway, &config.cache),
            blocker: BlockingStateMachine::new(Arc::clone(&page), events.clone()),
            page,
            events,
            counters: Counters::default(),
        };

        Ok(Self {
            pipeline: Arc::new(pipeline),
            config,
            settings: None,
            policy: RwLock::new(Arc::new(SessionPolicy::default())),
            running: Mutex::new(None),
            paused: AtomicBool::new(false),
        })
    }

    /// Attach a settings store for policy persistence
    pub fn with_settings(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(store);
        self
    }

    /// Start with the policy from the attached settings store (or defaults)
    pub async fn start_from_settings(&self) -> Result<StartOutcome> {
        let policy = match &self.settings {
            Some(store) => SessionPolicy::load(store.as_ref())?,
            None => SessionPolicy::default(),
        };
        self.start(policy).await
    }

    /// Launch the pipeline under `policy`, stopping any current run first
    pub async fn start(&self, policy: SessionPolicy) -> Result<StartOutcome> {
        policy.validate()?;
        let policy = Arc::new(policy);
        let mut running = self.running.lock().await;
        if let Some(previous) = running.take() {
            self.shutdown(previous).await;
        }
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&policy);
        self.paused.store(false, Ordering::SeqCst);

        let url = self.pipeline.page.url();
        if !policy.enabled {
            tracing::info!(url = %url, "Shield disabled, not scanning");
            return Ok(StartOutcome::Disabled);
        }
        if policy.is_trusted(&url) {
            tracing::info!(url = %url, "Trusted site, not scanning");
            return Ok(StartOutcome::TrustedSite);
        }

        let cancel = CancellationToken::new();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (flagged_tx, flagged_rx) = mpsc::unbounded_channel();
        let scanner = Arc::new(PageScanner::new(
            Arc::clone(&self.pipeline.page),
            self.config.scanner.clone(),
            Arc::clone(&policy),
            queue_tx,
        ));

        // Subscribe before the initial scan so no insertion slips between them
        let mutations = self.pipeline.page.subscribe();
        let initial = scanner.scan_all();

        let tasks = vec![
            tokio::spawn(Arc::clone(&scanner).observe_mutations(mutations, cancel.clone())),
            tokio::spawn(
                Arc::clone(&scanner)
                    .periodic_rescan(self.config.scanner.rescan_interval(), cancel.clone()),
            ),
            tokio::spawn(drain_queue(
                Arc::clone(&self.pipeline),
                queue_rx,
                flagged_tx,
                Arc::clone(&policy),
                DrainLimits {
                    batch_size: self.config.dispatch.batch_size,
                    batch_requests: self.config.dispatch.batch_requests,
                    interval: self.config.dispatch.drain_interval(),
                },
                cancel.clone(),
            )),
            tokio::spawn(consume_flagged(
                Arc::clone(&self.pipeline),
                flagged_rx,
                Arc::clone(&policy),
                cancel.clone(),
            )),
        ];

        *running = Some(Running {
            scanner,
            cancel,
            tasks,
        });

        tracing::info!(
            url = %url,
            filter_level = policy.filter_level.as_str(),
            gateway = self.pipeline.dispatcher.gateway_name(),
            initial_fragments = initial,
            "Shield session started"
        );
        let _ = self.pipeline.events.send(ShieldEvent::SessionStarted { url });
        Ok(StartOutcome::Started)
    }

    /// Stop discovery and draining
    ///
    /// Blocks already applied stay in place. Requests already sent to the
    /// gateway finish and are cached, but no longer lead to blocking.
    pub async fn stop(&self) -> bool {
        let previous = self.running.lock().await.take();
        match previous {
            Some(run) => {
                self.shutdown(run).await;
                true
            }
            None => false,
        }
    }

    /// Swap in a new policy: stop, persist, start again
    pub async fn update_policy(&self, policy: SessionPolicy) -> Result<StartOutcome> {
        policy.validate()?;
        self.stop().await;
        if let Some(store) = &self.settings {
            policy.save(store.as_ref())?;
        }
        tracing::info!(
            enabled = policy.enabled,
            filter_level = policy.filter_level.as_str(),
            "Session policy updated"
        );
        self.start(policy).await
    }

    /// Suspend discovery; classification and blocking continue
    pub async fn pause(&self) {
        if let Some(run) = self.running.lock().await.as_ref() {
            run.scanner.pause();
            self.paused.store(true, Ordering::SeqCst);
            tracing::debug!("Discovery paused");
        }
    }

    /// Resume discovery with one catch-up scan
    pub async fn resume(&self) -> usize {
        match self.running.lock().await.as_ref() {
            Some(run) => {
                run.scanner.resume();
                self.paused.store(false, Ordering::SeqCst);
                let queued = run.scanner.scan_all();
                tracing::debug!(queued, "Discovery resumed");
                queued
            }
            None => 0,
        }
    }

    /// Run a full scan now
    pub async fn rescan(&self) -> usize {
        match self.running.lock().await.as_ref() {
            Some(run) => run.scanner.scan_all(),
            None => 0,
        }
    }

    /// Reverse every active block
    pub fn restore_all(&self) -> usize {
        let count = self.pipeline.blocker.restore_all();
        self.pipeline
            .counters
            .restored
            .fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    /// Reveal a blocked node (or one of its controls) after user confirmation
    pub fn reveal(&self, node: NodeId, confirmed: bool) -> bool {
        let revealed = self.pipeline.blocker.reveal(node, confirmed);
        if revealed {
            Counters::bump(&self.pipeline.counters.restored);
        }
        revealed
    }

    /// Direct interaction with a blurred node
    pub fn interact(&self, node: NodeId) -> bool {
        let cleared = self.pipeline.blocker.interact(node);
        if cleared {
            Counters::bump(&self.pipeline.counters.restored);
        }
        cleared
    }

    pub fn report(&self, node: NodeId) -> Option<IssueReport> {
        self.pipeline.blocker.report(node)
    }

    pub async fn execute(&self, command: Command) -> CommandOutcome {
        match command {
            Command::Toggle => {
                if self.is_paused() {
                    self.resume().await;
                } else {
                    self.pause().await;
                }
                CommandOutcome::Toggled {
                    paused: self.is_paused(),
                }
            }
            Command::RestoreAll => CommandOutcome::Restored {
                count: self.restore_all(),
            },
            Command::Rescan => CommandOutcome::Rescanned {
                queued: self.rescan().await,
            },
            Command::Stats => CommandOutcome::Stats(self.stats()),
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<ShieldEvent> {
        self.pipeline.events.subscribe()
    }

    pub fn stats(&self) -> SessionStats {
        let c = &self.pipeline.counters;
        SessionStats {
            scanned: c.scanned.load(Ordering::Relaxed),
            classified: c.classified.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            coalesced: c.coalesced.load(Ordering::Relaxed),
            blocked: c.blocked.load(Ordering::Relaxed),
            restored: c.restored.load(Ordering::Relaxed),
            gateway_failures: c.gateway_failures.load(Ordering::Relaxed),
            active_blocks: self.pipeline.blocker.active_count(),
            cache: self.pipeline.dispatcher.stats().cache,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Policy of the current (or most recent) run
    pub fn policy(&self) -> SessionPolicy {
        self.policy
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .clone()
    }

    pub fn state(&self, node: NodeId) -> FragmentState {
        self.pipeline.blocker.state(node)
    }

    pub fn blocked(&self) -> Vec<BlockRecord> {
        self.pipeline.blocker.records()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.pipeline.dispatcher
    }

    /// Whether the classification backend is reachable
    pub async fn gateway_healthy(&self) -> bool {
        match self.pipeline.dispatcher.health().await {
            Ok(healthy) => healthy,
            Err(e) => {
                tracing::warn!(error = %e, "Gateway health check failed");
                false
            }
        }
    }

    async fn shutdown(&self, run: Running) {
        run.cancel.cancel();
        for task in run.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Session task ended abnormally");
            }
        }
        self.paused.store(false, Ordering::SeqCst);

        let url = self.pipeline.page.url();
        tracing::info!(url = %url, "Shield session stopped");
        let _ = self.pipeline.events.send(ShieldEvent::SessionStopped { url });
    }
}

struct DrainLimits {
    batch_size: usize,
    batch_requests: bool,
    interval: std::time::Duration,
}

/// Take fragments off the queue at a bounded rate and classify them
///
/// Each fragment is classified on its own task so a slow backend never
/// holds up the queue.
async fn drain_queue(
    pipeline: Arc<Pipeline>,
    mut queue: mpsc::UnboundedReceiver<Fragment>,
    flagged: mpsc::UnboundedSender<(Fragment, Verdict)>,
    policy: Arc<SessionPolicy>,
    limits: DrainLimits,
    cancel: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            _ = cancel.cancelled() => break,
            next = queue.recv() => match next {
                Some(fragment) => fragment,
                None => break,
            },
        };

        let mut batch = vec![first];
        while batch.len() < limits.batch_size {
            match queue.try_recv() {
                Ok(fragment) => batch.push(fragment),
                Err(_) => break,
            }
        }

        tracing::trace!(batch = batch.len(), "Draining classification queue");
        pipeline
            .counters
            .scanned
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        if limits.batch_requests && batch.len() > 1 {
            tokio::spawn(classify_batch(
                Arc::clone(&pipeline),
                batch,
                flagged.clone(),
                Arc::clone(&policy),
                cancel.clone(),
            ));
        } else {
            for fragment in batch {
                tokio::spawn(classify_fragment(
                    Arc::clone(&pipeline),
                    fragment,
                    flagged.clone(),
                    Arc::clone(&policy),
                    cancel.clone(),
                ));
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(limits.interval) => {}
        }
    }

    queue.close();
    let mut released = 0;
    while let Ok(fragment) = queue.try_recv() {
        release(pipeline.page.as_ref(), &fragment);
        released += 1;
    }
    if released > 0 {
        tracing::debug!(released, "Returned queued fragments to the page");
    }
}

/// Make a fragment discoverable again by a later run
fn release(page: &dyn PageDocument, fragment: &Fragment) {
    page.unmark(fragment.node, Mark::Processed);
}

async fn classify_fragment(
    pipeline: Arc<Pipeline>,
    fragment: Fragment,
    flagged: mpsc::UnboundedSender<(Fragment, Verdict)>,
    policy: Arc<SessionPolicy>,
    cancel: CancellationToken,
) {
    let result = pipeline.dispatcher.classify(&fragment, &policy).await;
    handle_classification(&pipeline, fragment, result, &flagged, &policy, &cancel);
}

async fn classify_batch(
    pipeline: Arc<Pipeline>,
    fragments: Vec<Fragment>,
    flagged: mpsc::UnboundedSender<(Fragment, Verdict)>,
    policy: Arc<SessionPolicy>,
    cancel: CancellationToken,
) {
    let results = pipeline.dispatcher.classify_batch(&fragments, &policy).await;
    for (fragment, result) in fragments.into_iter().zip(results) {
        handle_classification(&pipeline, fragment, result, &flagged, &policy, &cancel);
    }
}

/// Route one classification result: count it, mark safe, or flag it
fn handle_classification(
    pipeline: &Pipeline,
    fragment: Fragment,
    result: Result<Classification>,
    flagged: &mpsc::UnboundedSender<(Fragment, Verdict)>,
    policy: &SessionPolicy,
    cancel: &CancellationToken,
) {
    let counters = &pipeline.counters;
    let classification = match result {
        Ok(classification) => classification,
        Err(e) => {
            Counters::bump(&counters.gateway_failures);
            tracing::warn!(
                node = %fragment.node,
                kind = %fragment.kind,
                error = %e,
                "Classification failed, leaving content visible"
            );
            let _ = pipeline.events.send(ShieldEvent::ClassificationFailed {
                node: fragment.node,
                error: e.to_string(),
            });
            return;
        }
    };

    Counters::bump(&counters.classified);
    match classification.source {
        VerdictSource::Cache => Counters::bump(&counters.cache_hits),
        VerdictSource::Coalesced => Counters::bump(&counters.coalesced),
        VerdictSource::Gateway => {}
    }

    // Session stopped while the request was out: cached, but no action.
    // The next run rediscovers the node and picks the verdict from cache.
    if cancel.is_cancelled() {
        release(pipeline.page.as_ref(), &fragment);
        return;
    }

    let verdict = classification.verdict;
    if verdict.is_safe {
        pipeline.page.mark(fragment.node, Mark::Safe);
        return;
    }
    if !policy.is_actionable(&verdict) {
        tracing::debug!(
            node = %fragment.node,
            categories = ?verdict.categories,
            "Flagged only for disabled categories"
        );
        return;
    }

    let _ = pipeline.events.send(ShieldEvent::ContentFlagged {
        node: fragment.node,
        kind: fragment.kind,
        verdict: verdict.clone(),
    });
    if let Err(mpsc::error::SendError((fragment, _))) = flagged.send((fragment, verdict)) {
        release(pipeline.page.as_ref(), &fragment);
    }
}

/// Apply blocks for flagged fragments until cancelled
async fn consume_flagged(
    pipeline: Arc<Pipeline>,
    mut flagged: mpsc::UnboundedReceiver<(Fragment, Verdict)>,
    policy: Arc<SessionPolicy>,
    cancel: CancellationToken,
) {
    loop {
        let (fragment, verdict) = tokio::select! {
            _ = cancel.cancelled() => break,
            next = flagged.recv() => match next {
                Some(item) => item,
                None => break,
            },
        };
        if pipeline
            .blocker
            .block(&fragment, &verdict, policy.block_method)
            .is_some()
        {
            Counters::bump(&pipeline.counters.blocked);
        }
    }

    flagged.close();
    while let Ok((fragment, _)) = flagged.try_recv() {
        release(pipeline.page.as_ref(), &fragment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::MemoryGateway;
    use crate::page::{MemoryPage, NodeTree};
    use crate::settings::MemorySettingsStore;
    use std::time::Duration;

    fn session_with(page: Arc<MemoryPage>, gateway: Arc<MemoryGateway>) -> Session {
        Session::new(page, gateway, ShieldConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_disabled_policy_does_not_start() {
        let page = Arc::new(MemoryPage::with_body(
            "https://example.com",
            vec![NodeTree::element("p").with_text("Some paragraph")],
        ));
        let session = session_with(page, Arc::new(MemoryGateway::default()));

        let policy = SessionPolicy {
            enabled: false,
            ..SessionPolicy::default()
        };
        assert_eq!(session.start(policy).await.unwrap(), StartOutcome::Disabled);
        assert!(!session.is_running().await);
        assert_eq!(session.rescan().await, 0);
    }

    #[tokio::test]
    async fn test_trusted_site_does_not_start() {
        let page = Arc::new(MemoryPage::new("https://docs.rs/tokio"));
        let gateway = Arc::new(MemoryGateway::default());
        let session = session_with(page, gateway.clone());

        let policy = SessionPolicy {
            trusted_sites: vec!["docs.rs".into()],
            ..SessionPolicy::default()
        };
        assert_eq!(session.start(policy).await.unwrap(), StartOutcome::TrustedSite);
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_policy_rejected() {
        let page = Arc::new(MemoryPage::new("https://example.com"));
        let session = session_with(page, Arc::new(MemoryGateway::default()));
        let policy = SessionPolicy {
            text_threshold: 2.0,
            ..SessionPolicy::default()
        };
        assert!(session.start(policy).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_is_throttled() {
        let children = (0..12)
            .map(|i| NodeTree::element("p").with_text(format!("Paragraph number {}", i)))
            .collect();
        let page = Arc::new(MemoryPage::with_body("https://example.com", children));
        let gateway = Arc::new(MemoryGateway::default());
        let session = session_with(page, gateway.clone());

        session.start(SessionPolicy::default()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(gateway.calls(), 5);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(gateway.calls(), 10);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(gateway.calls(), 12);
        assert_eq!(session.stats().scanned, 12);

        session.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_batched_drain_sends_one_call_per_tick() {
        let children = (0..11)
            .map(|i| NodeTree::element("p").with_text(format!("Paragraph number {}", i)))
            .collect();
        let page = Arc::new(MemoryPage::with_body("https://example.com", children));
        let gateway = Arc::new(MemoryGateway::default());
        let mut config = ShieldConfig::default();
        config.dispatch.batch_requests = true;
        let session = Session::new(page, gateway.clone(), config).unwrap();

        session.start(SessionPolicy::default()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(gateway.batch_calls(), 1);
        assert_eq!(gateway.calls(), 5);

        tokio::time::sleep(Duration::from_millis(300)).await;
        // Last tick has a single fragment and goes out on its own
        assert_eq!(gateway.batch_calls(), 2);
        assert_eq!(gateway.calls(), 11);
        let stats = session.stats();
        assert_eq!(stats.scanned, 11);
        assert_eq!(stats.classified, 11);

        session.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_command_pauses_discovery() {
        let page = Arc::new(MemoryPage::new("https://example.com"));
        let gateway = Arc::new(MemoryGateway::default());
        let session = session_with(page.clone(), gateway.clone());
        session.start(SessionPolicy::default()).await.unwrap();

        assert_eq!(
            session.execute(Command::Toggle).await,
            CommandOutcome::Toggled { paused: true }
        );
        page.append(NodeTree::element("p").with_text("Added while paused"));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(gateway.calls(), 0);

        assert_eq!(
            session.execute(Command::Toggle).await,
            CommandOutcome::Toggled { paused: false }
        );
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(gateway.calls(), 1);

        session.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_policy_persists_and_restarts() {
        let page = Arc::new(MemoryPage::with_body(
            "https://example.com",
            vec![NodeTree::element("p").with_text("Persisted policy text")],
        ));
        let store = Arc::new(MemorySettingsStore::default());
        let session = session_with(page, Arc::new(MemoryGateway::default()))
            .with_settings(store.clone());

        session.start_from_settings().await.unwrap();
        let strict = SessionPolicy {
            filter_level: crate::policy::FilterLevel::Strict,
            ..SessionPolicy::default()
        };
        assert_eq!(
            session.update_policy(strict.clone()).await.unwrap(),
            StartOutcome::Started
        );
        assert_eq!(session.policy(), strict);
        assert_eq!(SessionPolicy::load(store.as_ref()).unwrap(), strict);
        assert!(session.is_running().await);

        assert!(session.stop().await);
        assert!(!session.stop().await);
    }

    #[tokio::test]
    async fn test_stats_command() {
        let page = Arc::new(MemoryPage::new("https://example.com"));
        let session = session_with(page, Arc::new(MemoryGateway::default()));
        match session.execute(Command::Stats).await {
            CommandOutcome::Stats(stats) => assert_eq!(stats, SessionStats::default()),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(
            session.execute(Command::RestoreAll).await,
            CommandOutcome::Restored { count: 0 }
        );
    }
}
