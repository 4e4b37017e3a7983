//! Blocking state machine: apply, track, and reverse content suppression
//!
//! Each flagged fragment node gets at most one `BlockRecord`. A record
//! holds the node's pre-block snapshot plus the handles of whatever the
//! blocker inserted (placeholder, reveal/report controls), so any
//! treatment can be undone exactly.
//!
//! Per-node lifecycle:
//!
//! ```text
//! Unprocessed ─► Processed ─► ProcessedSafe
//!                    │
//!                    └─► Blocked(method) ─► Restored
//! ```

use crate::page::{
    Mark, NodeId, NodeTree, PageDocument, Presentation, BLOCKED_ATTR, CONTROL_TAG,
    PLACEHOLDER_TAG,
};
use crate::policy::BlockPreference;
use crate::types::{
    BlockMethod, ContentKind, Fragment, FragmentState, IssueReport, ShieldEvent, Verdict,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

/// Confidence at or above which content is treated as high severity
pub const HIGH_CONFIDENCE: f64 = 0.8;

/// Confidence at or above which content is blurred rather than replaced
pub const MEDIUM_CONFIDENCE: f64 = 0.6;

/// Labels that force high severity regardless of confidence
pub const SEVERE_CATEGORIES: &[&str] = &[
    "severe",
    "severe_toxic",
    "threat",
    "self_harm",
    "sexual",
    "nudity",
];

/// Attribute naming a control's action
pub const ACTION_ATTR: &str = "data-shield-action";

/// Attribute on inserted nodes pointing back at the blocked node
pub const TARGET_ATTR: &str = "data-shield-target";

const GENERIC_REASON: &str = "potentially inappropriate content";

/// How strongly a verdict should be acted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

/// Severity bucket for a verdict; boundaries belong to the higher bucket
pub fn severity(verdict: &Verdict) -> Severity {
    let severe_label = SEVERE_CATEGORIES.iter().any(|c| verdict.has_category(c));
    if verdict.confidence >= HIGH_CONFIDENCE || severe_label {
        Severity::High
    } else if verdict.confidence >= MEDIUM_CONFIDENCE {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Pick the blocking treatment for a verdict
///
/// `Auto` maps high and low severity to `Replace` and medium to `Blur`.
/// A forced `Hide` still falls back to `Replace` for low severity.
pub fn select_method(verdict: &Verdict, preference: BlockPreference) -> BlockMethod {
    let severity = severity(verdict);
    match preference {
        BlockPreference::Replace => BlockMethod::Replace,
        BlockPreference::Blur => BlockMethod::Blur,
        BlockPreference::Hide if severity != Severity::Low => BlockMethod::Hide,
        BlockPreference::Hide => BlockMethod::Replace,
        BlockPreference::Auto => match severity {
            Severity::Medium => BlockMethod::Blur,
            Severity::High | Severity::Low => BlockMethod::Replace,
        },
    }
}

/// Human-readable description of one category label
pub fn describe_category(label: &str) -> String {
    match label.to_ascii_lowercase().as_str() {
        "hate" => "hate speech".into(),
        "harassment" => "harassment".into(),
        "violence" => "violent content".into(),
        "sexual" => "sexual content".into(),
        "nudity" => "nudity".into(),
        "self_harm" => "self-harm content".into(),
        "toxic" => "toxic language".into(),
        "severe_toxic" | "severe" => "severely toxic language".into(),
        "obscene" => "obscene language".into(),
        "threat" => "threats".into(),
        "insult" => "insults".into(),
        "identity_hate" => "identity-based hate".into(),
        other => other.replace('_', " "),
    }
}

/// Placeholder text for a verdict
pub fn block_reason(verdict: &Verdict, severity: Severity) -> String {
    let mut described: Vec<String> = Vec::new();
    for label in &verdict.categories {
        let text = describe_category(label);
        if !text.is_empty() && !described.contains(&text) {
            described.push(text);
        }
    }

    match (severity, described.is_empty()) {
        (Severity::Low, true) => "Possibly inappropriate content".to_string(),
        (Severity::Low, false) => {
            format!("Possibly inappropriate content ({})", described.join(", "))
        }
        (_, true) => format!("Blocked: {}", GENERIC_REASON),
        (_, false) => format!("Blocked: {}", described.join(", ")),
    }
}

/// Tracking entry for one blocked node
#[derive(Debug, Clone, PartialEq)]
pub struct BlockRecord {
    pub fragment: Fragment,
    pub method: BlockMethod,
    pub severity: Severity,
    pub reason: String,
    pub verdict: Verdict,

    /// Node state before any treatment was applied
    pub snapshot: NodeTree,

    /// Presentation to restore for blur/hide
    pub prior_presentation: Presentation,

    /// Placeholder swapped in for `Replace`
    pub placeholder: Option<NodeId>,

    /// Reveal control (inside the placeholder, or next to a hidden node)
    pub reveal_control: Option<NodeId>,

    /// Report control inside the placeholder
    pub report_control: Option<NodeId>,

    /// Unix timestamp in milliseconds
    pub blocked_at: u64,
}

impl BlockRecord {
    fn handles(&self) -> impl Iterator<Item = NodeId> {
        [self.placeholder, self.reveal_control, self.report_control]
            .into_iter()
            .flatten()
    }
}

/// What `block` did
#[derive(Debug, Clone, PartialEq)]
pub struct BlockOutcome {
    pub node: NodeId,
    pub method: BlockMethod,
    pub severity: Severity,
    pub reason: String,
}

#[derive(Default)]
struct Tracking {
    records: HashMap<NodeId, BlockRecord>,
    /// Inserted node → blocked node it belongs to
    handles: HashMap<NodeId, NodeId>,
}

impl Tracking {
    fn resolve(&self, id: NodeId) -> Option<NodeId> {
        if self.records.contains_key(&id) {
            Some(id)
        } else {
            self.handles.get(&id).copied()
        }
    }

    fn take(&mut self, node: NodeId) -> Option<BlockRecord> {
        let record = self.records.remove(&node)?;
        for handle in record.handles() {
            self.handles.remove(&handle);
        }
        Some(record)
    }
}

/// Applies and reverses blocking treatments on a page
pub struct BlockingStateMachine {
    page: Arc<dyn PageDocument>,
    tracking: Mutex<Tracking>,
    events: broadcast::Sender<ShieldEvent>,
}

impl BlockingStateMachine {
    pub fn new(page: Arc<dyn PageDocument>, events: broadcast::Sender<ShieldEvent>) -> Self {
        Self {
            page,
            tracking: Mutex::new(Tracking::default()),
            events,
        }
    }

    /// Block a flagged fragment
    ///
    /// Returns `None` when the node is already blocked, was revealed or
    /// marked safe by the user, or is no longer in the page.
    pub fn block(
        &self,
        fragment: &Fragment,
        verdict: &Verdict,
        preference: BlockPreference,
    ) -> Option<BlockOutcome> {
        let node_id = fragment.node;
        let mut tracking = self.lock();

        if tracking.records.contains_key(&node_id)
            || self.page.has_mark(node_id, Mark::Revealed)
            || self.page.has_mark(node_id, Mark::Safe)
            || !self.page.is_attached(node_id)
        {
            return None;
        }

        let node = self.page.node(node_id)?;
        let snapshot = self.page.snapshot(node_id)?;
        let severity = severity(verdict);
        let method = select_method(verdict, preference);
        let reason = block_reason(verdict, severity);

        let mut record = BlockRecord {
            fragment: fragment.clone(),
            method,
            severity,
            reason: reason.clone(),
            verdict: verdict.clone(),
            snapshot,
            prior_presentation: node.presentation,
            placeholder: None,
            reveal_control: None,
            report_control: None,
            blocked_at: crate::types::now_millis(),
        };

        match method {
            BlockMethod::Replace => {
                let mut tree = placeholder_tree(node_id, fragment.kind, severity, &reason);
                if fragment.kind == ContentKind::Image {
                    for dim in ["width", "height"] {
                        if let Some(value) = node.attr(dim) {
                            tree = tree.attr(dim, value);
                        }
                    }
                }
                let placeholder = self.page.create(tree);
                if !self.page.replace(node_id, placeholder) {
                    self.page.remove(placeholder);
                    return None;
                }
                record.placeholder = Some(placeholder);
                record.reveal_control = self.find_control(placeholder, "reveal");
                record.report_control = self.find_control(placeholder, "report");
            }
            BlockMethod::Blur => {
                self.page.set_presentation(
                    node_id,
                    Presentation {
                        blurred: true,
                        ..node.presentation
                    },
                );
            }
            BlockMethod::Hide => {
                self.page.set_presentation(
                    node_id,
                    Presentation {
                        hidden: true,
                        ..node.presentation
                    },
                );
                let control = self.page.create(
                    control_tree(node_id, "reveal", &format!("{}. Show content", reason)),
                );
                if self.page.insert_after(node_id, control) {
                    record.reveal_control = Some(control);
                } else {
                    self.page.remove(control);
                }
            }
        }

        for handle in record.handles() {
            tracking.handles.insert(handle, node_id);
        }
        tracking.records.insert(node_id, record);
        drop(tracking);

        tracing::debug!(
            node = %node_id,
            kind = %fragment.kind,
            method = ?method,
            severity = severity.as_str(),
            confidence = verdict.confidence,
            "Content blocked"
        );
        let _ = self.events.send(ShieldEvent::ContentBlocked {
            node: node_id,
            method,
            reason: reason.clone(),
        });

        Some(BlockOutcome {
            node: node_id,
            method,
            severity,
            reason,
        })
    }

    /// Reveal a blocked node
    ///
    /// `id` may be the blocked node or any node the blocker inserted for
    /// it. Nothing happens unless `confirmed`. The revealed node is marked
    /// so it is never queued again.
    pub fn reveal(&self, id: NodeId, confirmed: bool) -> bool {
        if !confirmed {
            return false;
        }
        let record = {
            let mut tracking = self.lock();
            let Some(node) = tracking.resolve(id) else {
                return false;
            };
            match tracking.take(node) {
                Some(record) => record,
                None => return false,
            }
        };

        self.undo(&record);
        self.page.mark(record.fragment.node, Mark::Revealed);
        self.emit_restored(record.fragment.node);
        true
    }

    /// Direct user interaction with a blurred node
    ///
    /// Clears the blur and marks the node safe. No effect on other
    /// treatments.
    pub fn interact(&self, id: NodeId) -> bool {
        let record = {
            let mut tracking = self.lock();
            let Some(node) = tracking.resolve(id) else {
                return false;
            };
            let is_blur = tracking
                .records
                .get(&node)
                .map(|r| r.method == BlockMethod::Blur)
                .unwrap_or(false);
            if !is_blur {
                return false;
            }
            match tracking.take(node) {
                Some(record) => record,
                None => return false,
            }
        };

        self.undo(&record);
        self.page.mark(record.fragment.node, Mark::Safe);
        self.emit_restored(record.fragment.node);
        true
    }

    /// Report a wrongly blocked node; the block stays in place
    pub fn report(&self, id: NodeId) -> Option<IssueReport> {
        let report = {
            let tracking = self.lock();
            let node = tracking.resolve(id)?;
            let record = tracking.records.get(&node)?;
            IssueReport {
                node,
                kind: record.fragment.kind,
                method: record.method,
                reason: record.reason.clone(),
                verdict: record.verdict.clone(),
                page_url: self.page.url(),
                reported_at: chrono::Utc::now(),
            }
        };

        tracing::info!(node = %report.node, method = ?report.method, "Issue reported");
        let _ = self.events.send(ShieldEvent::IssueReported(report.clone()));
        Some(report)
    }

    /// Reverse every active block and clear all tracking
    pub fn restore_all(&self) -> usize {
        let records: Vec<BlockRecord> = {
            let mut tracking = self.lock();
            tracking.handles.clear();
            tracking.records.drain().map(|(_, r)| r).collect()
        };

        for record in &records {
            self.undo(record);
            self.page.mark(record.fragment.node, Mark::Revealed);
            self.emit_restored(record.fragment.node);
        }

        if !records.is_empty() {
            tracing::info!(restored = records.len(), "Restored all blocked content");
        }
        records.len()
    }

    /// Current lifecycle state of a node
    pub fn state(&self, node: NodeId) -> FragmentState {
        if let Some(record) = self.lock().records.get(&node) {
            return FragmentState::Blocked(record.method);
        }
        if self.page.has_mark(node, Mark::Revealed) {
            FragmentState::Restored
        } else if self.page.has_mark(node, Mark::Safe) {
            FragmentState::ProcessedSafe
        } else if self.page.has_mark(node, Mark::Processed) {
            FragmentState::Processed
        } else {
            FragmentState::Unprocessed
        }
    }

    pub fn is_blocked(&self, node: NodeId) -> bool {
        self.lock().records.contains_key(&node)
    }

    pub fn record(&self, node: NodeId) -> Option<BlockRecord> {
        self.lock().records.get(&node).cloned()
    }

    /// All active records, oldest first
    pub fn records(&self) -> Vec<BlockRecord> {
        let mut records: Vec<BlockRecord> = self.lock().records.values().cloned().collect();
        records.sort_by_key(|r| (r.blocked_at, r.fragment.node));
        records
    }

    pub fn active_count(&self) -> usize {
        self.lock().records.len()
    }

    fn undo(&self, record: &BlockRecord) {
        let node = record.fragment.node;
        match record.method {
            BlockMethod::Replace => {
                if let Some(placeholder) = record.placeholder {
                    if !self.page.replace(placeholder, node) {
                        // Placeholder was removed by the page itself
                        tracing::debug!(node = %node, "Placeholder gone, nothing to swap back");
                    }
                    // Controls live inside the placeholder and go with it
                    self.page.remove(placeholder);
                }
            }
            BlockMethod::Blur => {
                self.page.set_presentation(node, record.prior_presentation);
            }
            BlockMethod::Hide => {
                self.page.set_presentation(node, record.prior_presentation);
                if let Some(control) = record.reveal_control {
                    self.page.detach(control);
                    self.page.remove(control);
                }
            }
        }
    }

    fn find_control(&self, placeholder: NodeId, action: &str) -> Option<NodeId> {
        let node = self.page.node(placeholder)?;
        node.children.into_iter().find(|child| {
            self.page
                .node(*child)
                .map(|c| c.tag == CONTROL_TAG && c.attr(ACTION_ATTR) == Some(action))
                .unwrap_or(false)
        })
    }

    fn emit_restored(&self, node: NodeId) {
        tracing::debug!(node = %node, "Content restored");
        let _ = self.events.send(ShieldEvent::ContentRestored { node });
    }

    fn lock(&self) -> MutexGuard<'_, Tracking> {
        self.tracking.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn placeholder_tree(
    target: NodeId,
    kind: ContentKind,
    severity: Severity,
    reason: &str,
) -> NodeTree {
    NodeTree::element(PLACEHOLDER_TAG)
        .attr(BLOCKED_ATTR, "true")
        .attr(TARGET_ATTR, target.to_string())
        .attr("data-shield-kind", kind.as_str())
        .attr("data-shield-severity", severity.as_str())
        .attr("role", "note")
        .with_text(reason)
        .child(control_tree(target, "reveal", "Show anyway"))
        .child(control_tree(target, "report", "Report issue"))
}

fn control_tree(target: NodeId, action: &str, label: &str) -> NodeTree {
    NodeTree::element(CONTROL_TAG)
        .attr(BLOCKED_ATTR, "true")
        .attr(TARGET_ATTR, target.to_string())
        .attr(ACTION_ATTR, action)
        .attr("role", "button")
        .with_text(label)
}
