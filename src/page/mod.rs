//! Page model: the node-handle abstraction the pipeline operates on
//!
//! Any tree-shaped UI document can back the pipeline by implementing
//! `PageDocument`. The scanner reads through it, the blocking state
//! machine mutates through it, and structural changes are delivered as a
//! stream of `MutationBatch` messages.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::broadcast;

pub mod memory;

pub use memory::MemoryPage;

/// Tag used for raw text nodes
pub const TEXT_TAG: &str = "#text";

/// Tag of the placeholder swapped in for replaced content
pub const PLACEHOLDER_TAG: &str = "shield-placeholder";

/// Tag of reveal/report controls inserted by the blocker
pub const CONTROL_TAG: &str = "shield-control";

/// Attribute present on any node the blocker created or treated
pub const BLOCKED_ATTR: &str = "data-shield-blocked";

/// Opaque handle to a node in a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Visual treatment applied to a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presentation {
    pub blurred: bool,
    pub hidden: bool,
}

/// Pipeline bookkeeping kept outside the node data
///
/// Marks never appear in snapshots, so restoring a node leaves it
/// identical to its pre-block state while still remembering it was seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mark {
    /// Queued for classification
    Processed,
    /// Known safe (classified safe, or unblurred by the user)
    Safe,
    /// Revealed or restored by the user
    Revealed,
}

/// A read-only view of one node
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: NodeId,
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    /// Content of a text node; `None` for elements
    pub text: Option<String>,
    pub presentation: Presentation,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl Node {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn is_text(&self) -> bool {
        self.tag == TEXT_TAG
    }

    /// Parse a numeric attribute such as `width` or `height` ("120" or "120px")
    pub fn dimension(&self, name: &str) -> Option<u32> {
        self.attr(name)
            .map(|v| v.trim().trim_end_matches("px"))
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v as u32)
    }
}

/// Owned, comparable description of a sub-tree
///
/// Used both to build nodes and as the snapshot taken before a node is
/// mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTree {
    pub tag: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub presentation: Presentation,
    #[serde(default)]
    pub children: Vec<NodeTree>,
}

impl NodeTree {
    pub fn element(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    /// A raw text node
    pub fn text_node(content: impl Into<String>) -> Self {
        Self {
            tag: TEXT_TAG.to_string(),
            text: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn child(mut self, child: NodeTree) -> Self {
        self.children.push(child);
        self
    }

    /// Append a text-node child
    pub fn with_text(self, content: impl Into<String>) -> Self {
        self.child(NodeTree::text_node(content))
    }

    /// Image element with source and pixel dimensions
    pub fn image(src: impl Into<String>, width: u32, height: u32) -> Self {
        Self::element("img")
            .attr("src", src)
            .attr("width", width.to_string())
            .attr("height", height.to_string())
    }
}

/// Nodes attached to the live tree by one structural change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationBatch {
    /// Roots of the inserted sub-trees
    pub added: Vec<NodeId>,
}

/// Live, mutable page structure
///
/// Implementations must publish a `MutationBatch` whenever a sub-tree is
/// attached (`append_child`, `insert_after`, `replace`).
pub trait PageDocument: Send + Sync {
    /// Page URL the document was loaded from
    fn url(&self) -> String;

    fn root(&self) -> NodeId;

    fn node(&self, id: NodeId) -> Option<Node>;

    /// Deep copy of a sub-tree, excluding marks
    fn snapshot(&self, id: NodeId) -> Option<NodeTree>;

    /// Whether the node is reachable from the root
    fn is_attached(&self, id: NodeId) -> bool;

    fn mark(&self, id: NodeId, mark: Mark);

    fn has_mark(&self, id: NodeId, mark: Mark) -> bool;

    fn unmark(&self, id: NodeId, mark: Mark);

    /// Create a detached sub-tree, returning its root
    fn create(&self, tree: NodeTree) -> NodeId;

    fn append_child(&self, parent: NodeId, child: NodeId) -> bool;

    /// Insert a detached node as the next sibling of `anchor`
    fn insert_after(&self, anchor: NodeId, node: NodeId) -> bool;

    /// Swap an attached node for a detached one; `old` becomes detached
    fn replace(&self, old: NodeId, new: NodeId) -> bool;

    fn detach(&self, id: NodeId) -> bool;

    /// Drop a detached sub-tree and its marks for good
    ///
    /// Returns false for attached or unknown nodes.
    fn remove(&self, id: NodeId) -> bool;

    fn set_presentation(&self, id: NodeId, presentation: Presentation) -> bool;

    /// Subscribe to structural-change batches
    fn subscribe(&self) -> broadcast::Receiver<MutationBatch>;
}
