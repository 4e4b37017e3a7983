//! Core types for the a3s-shield pipeline
//!
//! All serializable types use camelCase JSON for wire compatibility with
//! the embedding application.

use crate::page::NodeId;
use crate::policy::SessionPolicy;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Kind of content carried by a fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Image,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Image => "image",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discovered candidate unit of page content
///
/// Holds a handle into the page tree rather than an owned copy of the
/// node. The node itself carries the processed mark that prevents the
/// fragment from being discovered twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    /// Unique fragment identifier (frag-<uuid>)
    pub id: String,

    /// Node the fragment was extracted from
    pub node: NodeId,

    /// Text or image
    pub kind: ContentKind,

    /// Extracted text, or the resolved image URL
    pub payload: String,

    /// Unix timestamp in milliseconds
    pub discovered_at: u64,
}

impl Fragment {
    /// Create a fragment with an auto-generated id and timestamp
    pub fn new(node: NodeId, kind: ContentKind, payload: impl Into<String>) -> Self {
        Self {
            id: format!("frag-{}", uuid::Uuid::new_v4()),
            node,
            kind,
            payload: payload.into(),
            discovered_at: now_millis(),
        }
    }

    pub fn text(node: NodeId, text: impl Into<String>) -> Self {
        Self::new(node, ContentKind::Text, text)
    }

    pub fn image(node: NodeId, src: impl Into<String>) -> Self {
        Self::new(node, ContentKind::Image, src)
    }
}

/// Deterministic cache and de-duplication key
///
/// SHA-256 over the fragment payload, its kind, and every policy
/// parameter that influences the backend's answer. Two fragments with the
/// same content under the same policy always share a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a fragment under the given policy
    pub fn of(fragment: &Fragment, policy: &SessionPolicy) -> Self {
        Self::compute(fragment.kind, &fragment.payload, policy)
    }

    pub fn compute(kind: ContentKind, payload: &str, policy: &SessionPolicy) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(policy.fingerprint_params(kind).as_bytes());
        hasher.update([0u8]);
        hasher.update(payload.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 12 hex chars are plenty for logs
        f.write_str(&self.0[..self.0.len().min(12)])
    }
}

/// Result of classifying a fragment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    /// Whether the backend considers the content safe
    pub is_safe: bool,

    /// Confidence in [0, 1]
    pub confidence: f64,

    /// Category labels the backend flagged (e.g. "hate", "violence")
    #[serde(default)]
    pub categories: Vec<String>,
}

impl Verdict {
    /// Build a verdict, clamping confidence into [0, 1]
    pub fn new(is_safe: bool, confidence: f64, categories: Vec<String>) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            is_safe,
            confidence,
            categories,
        }
    }

    pub fn safe(confidence: f64) -> Self {
        Self::new(true, confidence, Vec::new())
    }

    pub fn flagged<I, S>(confidence: f64, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            false,
            confidence,
            categories.into_iter().map(Into::into).collect(),
        )
    }

    pub fn has_category(&self, label: &str) -> bool {
        self.categories.iter().any(|c| c.eq_ignore_ascii_case(label))
    }
}

/// How a flagged fragment is suppressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockMethod {
    /// Swap the node for a placeholder
    Replace,
    /// Obscure the node in place
    Blur,
    /// Remove the node from layout and insert a reveal control
    Hide,
}

/// Lifecycle of a single fragment node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentState {
    /// Never queued
    Unprocessed,
    /// Queued, awaiting or without a verdict
    Processed,
    /// Classified safe, or unblocked by the user; terminal
    ProcessedSafe,
    /// Currently suppressed
    Blocked(BlockMethod),
    /// Revealed or restored by the user; terminal
    Restored,
}

/// A user-submitted report that a block was wrong
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueReport {
    /// Blocked node the report refers to
    pub node: NodeId,

    pub kind: ContentKind,

    pub method: BlockMethod,

    /// Reason shown on the placeholder
    pub reason: String,

    pub verdict: Verdict,

    pub page_url: String,

    pub reported_at: chrono::DateTime<chrono::Utc>,
}

/// Notifications emitted by a running session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ShieldEvent {
    /// A fragment was judged unsafe
    ContentFlagged {
        node: NodeId,
        kind: ContentKind,
        verdict: Verdict,
    },
    /// A blocking treatment was applied
    ContentBlocked {
        node: NodeId,
        method: BlockMethod,
        reason: String,
    },
    /// A blocked fragment was revealed or restored
    ContentRestored { node: NodeId },
    /// User reported a wrongly blocked fragment
    IssueReported(IssueReport),
    /// Classification could not be obtained; the fragment stays visible
    ClassificationFailed { node: NodeId, error: String },
    SessionStarted { url: String },
    SessionStopped { url: String },
}

/// Current time in Unix milliseconds
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
