//! Page scanner: discovers classifiable fragments in a live page
//!
//! Walks the page tree, picks out text containers and images that pass
//! the eligibility rules, marks each one processed and pushes it onto the
//! classification queue. Re-runs scoped to inserted sub-trees as
//! mutation batches arrive, plus a periodic full pass as a safety net.

use crate::config::ScannerConfig;
use crate::page::{
    Mark, MutationBatch, Node, NodeId, PageDocument, BLOCKED_ATTR, CONTROL_TAG, PLACEHOLDER_TAG,
};
use crate::policy::SessionPolicy;
use crate::types::{ContentKind, Fragment};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Discovers fragments and feeds the classification queue
pub struct PageScanner {
    page: Arc<dyn PageDocument>,
    config: ScannerConfig,
    policy: Arc<SessionPolicy>,
    queue: mpsc::UnboundedSender<Fragment>,
    trusted: bool,
    paused: AtomicBool,
    discovered: AtomicU64,
}

impl PageScanner {
    pub fn new(
        page: Arc<dyn PageDocument>,
        config: ScannerConfig,
        policy: Arc<SessionPolicy>,
        queue: mpsc::UnboundedSender<Fragment>,
    ) -> Self {
        let trusted = policy.is_trusted(&page.url());
        Self {
            page,
            config,
            policy,
            queue,
            trusted,
            paused: AtomicBool::new(false),
            discovered: AtomicU64::new(0),
        }
    }

    /// Whether the page is on the trusted-site allowlist
    pub fn is_trusted(&self) -> bool {
        self.trusted
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Stop discovering until `resume`
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Fragments queued so far
    pub fn discovered(&self) -> u64 {
        self.discovered.load(Ordering::Relaxed)
    }

    /// Scan the whole page, returning the number of fragments queued
    pub fn scan_all(&self) -> usize {
        let queued = self.scan_subtree(self.page.root());
        if queued > 0 {
            tracing::debug!(queued, url = %self.page.url(), "Full scan queued fragments");
        }
        queued
    }

    /// Scan one sub-tree, returning the number of fragments queued
    pub fn scan_subtree(&self, root: NodeId) -> usize {
        if self.trusted || self.is_paused() || !self.page.is_attached(root) {
            return 0;
        }

        let mut queued = 0;
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.page.node(id) else {
                continue;
            };
            if node.is_text() || self.is_skipped(&node) {
                continue;
            }

            if let Some(fragment) = self.discover(&node) {
                // Mark before queueing so a concurrent pass cannot pick it up again
                self.page.mark(id, Mark::Processed);
                if self.queue.send(fragment).is_err() {
                    // Leave it for whichever run owns the next queue
                    self.page.unmark(id, Mark::Processed);
                    tracing::debug!(node = %id, "Classification queue closed, scan aborted");
                    break;
                }
                self.discovered.fetch_add(1, Ordering::Relaxed);
                queued += 1;
            }

            stack.extend(node.children.iter().rev().copied());
        }
        queued
    }

    /// Handle one mutation batch
    pub fn scan_mutations(&self, batch: &MutationBatch) -> usize {
        batch
            .added
            .iter()
            .map(|id| match self.page.node(*id) {
                // New text inside an existing container: re-check the container
                Some(node) if node.is_text() => node
                    .parent
                    .map(|parent| self.scan_subtree(parent))
                    .unwrap_or(0),
                Some(_) => self.scan_subtree(*id),
                None => 0,
            })
            .sum()
    }

    /// Follow mutation batches until cancelled
    ///
    /// A lagged receiver has missed batches, so it falls back to one full
    /// scan.
    pub async fn observe_mutations(
        self: Arc<Self>,
        mut mutations: broadcast::Receiver<MutationBatch>,
        cancel: CancellationToken,
    ) {
        if self.trusted {
            return;
        }
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = mutations.recv() => match received {
                    Ok(batch) => {
                        self.scan_mutations(&batch);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::debug!(missed, "Mutation stream lagged, rescanning page");
                        self.scan_all();
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        tracing::debug!("Mutation observer stopped");
    }

    /// Full rescan every `period` until cancelled
    pub async fn periodic_rescan(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        if self.trusted {
            return;
        }
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.scan_all();
                }
            }
        }
    }

    /// Sub-trees the scanner never enters
    fn is_skipped(&self, node: &Node) -> bool {
        self.config.is_ignored_tag(&node.tag)
            || node.tag.eq_ignore_ascii_case(PLACEHOLDER_TAG)
            || node.tag.eq_ignore_ascii_case(CONTROL_TAG)
            || node.attr(BLOCKED_ATTR).is_some()
    }

    fn discover(&self, node: &Node) -> Option<Fragment> {
        if self.page.has_mark(node.id, Mark::Processed) {
            return None;
        }

        if self.config.is_image_tag(&node.tag) {
            if !self.policy.filters(ContentKind::Image) {
                return None;
            }
            let src = self.eligible_image(node)?;
            return Some(Fragment::image(node.id, src));
        }

        if self.config.is_text_tag(&node.tag) && self.policy.filters(ContentKind::Text) {
            let text = self.own_text(node);
            if self.is_eligible_text(&text) {
                return Some(Fragment::text(node.id, text));
            }
        }
        None
    }

    /// Whitespace-normalized text of the node's direct text children
    ///
    /// Nested containers contribute their own fragments, so their text is
    /// not folded into the parent's.
    fn own_text(&self, node: &Node) -> String {
        let mut words: Vec<String> = Vec::new();
        for child in &node.children {
            if let Some(text) = self.page.node(*child).and_then(|c| c.text) {
                words.extend(text.split_whitespace().map(str::to_string));
            }
        }
        words.join(" ")
    }

    fn is_eligible_text(&self, text: &str) -> bool {
        let len = text.chars().count();
        len >= self.config.min_text_length
            && len <= self.config.max_text_length
            && text.chars().any(char::is_alphabetic)
    }

    fn eligible_image(&self, node: &Node) -> Option<String> {
        let width = node.dimension("width")?;
        let height = node.dimension("height")?;
        if width < self.config.min_image_width || height < self.config.min_image_height {
            return None;
        }
        resolve_image_source(node.attr("src")?, &self.page.url())
    }
}

/// Resolve an image `src` to something the gateway can fetch
///
/// Accepts absolute http(s) URLs, `data:image/` URLs, and relative paths
/// resolved against the page URL. Everything else is unusable.
pub fn resolve_image_source(src: &str, page_url: &str) -> Option<String> {
    let src = src.trim();
    if src.is_empty() {
        return None;
    }
    if src.starts_with("data:image/") {
        return Some(src.to_string());
    }

    let url = match Url::parse(src) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse(page_url).ok()?.join(src).ok()?
        }
        Err(_) => return None,
    };

    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{MemoryPage, NodeTree};

    fn scanner_for(
        page: Arc<MemoryPage>,
        policy: SessionPolicy,
    ) -> (Arc<PageScanner>, mpsc::UnboundedReceiver<Fragment>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scanner = PageScanner::new(page, ScannerConfig::default(), Arc::new(policy), tx);
        (Arc::new(scanner), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Fragment>) -> Vec<Fragment> {
        let mut out = Vec::new();
        while let Ok(fragment) = rx.try_recv() {
            out.push(fragment);
        }
        out
    }

    fn article_page() -> Arc<MemoryPage> {
        Arc::new(MemoryPage::with_body(
            "https://www.example.com/articles/1",
            vec![
                NodeTree::element("h1").with_text("Breaking news today"),
                NodeTree::element("p")
                    .with_text("  A   long\n paragraph of text ")
                    .child(NodeTree::element("strong").with_text("with emphasis")),
                NodeTree::element("p").with_text("1234567"),
                NodeTree::element("p").with_text("Hi"),
                NodeTree::element("script")
                    .child(NodeTree::element("p").with_text("hidden script text")),
                NodeTree::image("/img/photo.jpg", 200, 150),
                NodeTree::image("https://cdn.example.com/pixel.gif", 1, 1),
                NodeTree::image("javascript:alert(1)", 200, 200),
            ],
        ))
    }

    #[test]
    fn test_scan_all_finds_eligible_fragments() {
        let page = article_page();
        let (scanner, mut rx) = scanner_for(page.clone(), SessionPolicy::default());

        assert_eq!(scanner.scan_all(), 4);
        let fragments = drain(&mut rx);
        let payloads: Vec<&str> = fragments.iter().map(|f| f.payload.as_str()).collect();
        assert_eq!(
            payloads,
            vec![
                "Breaking news today",
                "A long paragraph of text",
                "with emphasis",
                "https://www.example.com/img/photo.jpg",
            ]
        );
        assert_eq!(fragments[3].kind, ContentKind::Image);
        assert_eq!(scanner.discovered(), 4);
    }

    #[test]
    fn test_scan_is_idempotent() {
        let page = article_page();
        let (scanner, mut rx) = scanner_for(page.clone(), SessionPolicy::default());

        assert_eq!(scanner.scan_all(), 4);
        assert_eq!(scanner.scan_all(), 0);

        let fragments = drain(&mut rx);
        assert_eq!(fragments.len(), 4);
        for fragment in fragments {
            assert!(page.has_mark(fragment.node, Mark::Processed));
        }
    }

    #[test]
    fn test_closed_queue_leaves_nodes_unmarked() {
        let page = article_page();
        let (scanner, rx) = scanner_for(page.clone(), SessionPolicy::default());
        drop(rx);

        assert_eq!(scanner.scan_all(), 0);
        assert!(page.find_all("p").iter().all(|p| !page.has_mark(*p, Mark::Processed)));

        // A fresh queue picks everything up
        let (next, mut rx) = scanner_for(page, SessionPolicy::default());
        assert_eq!(next.scan_all(), 4);
        assert_eq!(drain(&mut rx).len(), 4);
    }

    #[test]
    fn test_policy_kind_filters() {
        let page = article_page();
        let text_only = SessionPolicy {
            filter_images: false,
            ..SessionPolicy::default()
        };
        let (scanner, mut rx) = scanner_for(page.clone(), text_only);
        scanner.scan_all();
        assert!(drain(&mut rx).iter().all(|f| f.kind == ContentKind::Text));

        let page = article_page();
        let images_only = SessionPolicy {
            filter_text: false,
            ..SessionPolicy::default()
        };
        let (scanner, mut rx) = scanner_for(page, images_only);
        assert_eq!(scanner.scan_all(), 1);
        assert_eq!(drain(&mut rx)[0].kind, ContentKind::Image);
    }

    #[test]
    fn test_trusted_site_skips_everything() {
        let page = article_page();
        let policy = SessionPolicy {
            trusted_sites: vec!["example.com".into()],
            ..SessionPolicy::default()
        };
        let (scanner, mut rx) = scanner_for(page, policy);
        assert!(scanner.is_trusted());
        assert_eq!(scanner.scan_all(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_paused_scanner_discovers_nothing() {
        let page = article_page();
        let (scanner, mut rx) = scanner_for(page, SessionPolicy::default());
        scanner.pause();
        assert_eq!(scanner.scan_all(), 0);
        scanner.resume();
        assert_eq!(scanner.scan_all(), 4);
        assert_eq!(drain(&mut rx).len(), 4);
    }

    #[test]
    fn test_blocker_nodes_are_not_entered() {
        let page = Arc::new(MemoryPage::with_body(
            "https://example.com",
            vec![
                NodeTree::element(PLACEHOLDER_TAG).with_text("Blocked: hate speech"),
                NodeTree::element("div")
                    .attr(BLOCKED_ATTR, "true")
                    .child(NodeTree::element("p").with_text("inside blocked")),
                NodeTree::element(CONTROL_TAG).with_text("Show anyway"),
            ],
        ));
        let (scanner, _rx) = scanner_for(page, SessionPolicy::default());
        assert_eq!(scanner.scan_all(), 0);
    }

    #[test]
    fn test_text_length_bounds() {
        let page = Arc::new(MemoryPage::with_body(
            "https://example.com",
            vec![
                NodeTree::element("p").with_text("abcde"),
                NodeTree::element("p").with_text("abcd"),
                NodeTree::element("p").with_text("x".repeat(5000)),
                NodeTree::element("p").with_text("x".repeat(5001)),
            ],
        ));
        let (scanner, _rx) = scanner_for(page, SessionPolicy::default());
        assert_eq!(scanner.scan_all(), 2);
    }

    #[test]
    fn test_resolve_image_source() {
        let base = "https://example.com/a/page.html";
        assert_eq!(
            resolve_image_source("img/x.png", base).as_deref(),
            Some("https://example.com/a/img/x.png")
        );
        assert_eq!(
            resolve_image_source("//cdn.example.com/y.png", base).as_deref(),
            Some("https://cdn.example.com/y.png")
        );
        assert_eq!(
            resolve_image_source("data:image/png;base64,AAAA", base).as_deref(),
            Some("data:image/png;base64,AAAA")
        );
        assert!(resolve_image_source("data:text/html,<b>x</b>", base).is_none());
        assert!(resolve_image_source("ftp://example.com/z.png", base).is_none());
        assert!(resolve_image_source("   ", base).is_none());
    }

    #[tokio::test]
    async fn test_mutations_scan_only_added_subtree() {
        let page = article_page();
        let (scanner, mut rx) = scanner_for(page.clone(), SessionPolicy::default());
        scanner.scan_all();
        drain(&mut rx);

        let cancel = CancellationToken::new();
        let observer = tokio::spawn(
            scanner
                .clone()
                .observe_mutations(page.subscribe(), cancel.clone()),
        );

        let comment = page.append(
            NodeTree::element("div")
                .child(NodeTree::element("p").with_text("A freshly loaded comment")),
        );
        let fragment = rx.recv().await.unwrap();
        assert_eq!(fragment.payload, "A freshly loaded comment");
        assert!(page.is_attached(comment));
        assert!(rx.try_recv().is_err());

        // Text appended to an existing container re-checks that container
        let h2 = page.append(NodeTree::element("h2"));
        let text = page.create(NodeTree::text_node("Late heading text"));
        page.append_child(h2, text);
        let fragment = rx.recv().await.unwrap();
        assert_eq!(fragment.node, h2);

        cancel.cancel();
        observer.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_rescan_runs_full_scan() {
        let page = Arc::new(MemoryPage::with_body(
            "https://example.com",
            vec![NodeTree::element("p").with_text("Text nobody announced")],
        ));
        let (scanner, mut rx) = scanner_for(page, SessionPolicy::default());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            scanner
                .clone()
                .periodic_rescan(Duration::from_secs(5), cancel.clone()),
        );

        // First pass only after one full period
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.recv().await.unwrap().payload, "Text nobody announced");

        cancel.cancel();
        task.await.unwrap();
    }
}
