//! In-memory page document
//!
//! Arena-backed tree used by tests, benchmarks, and embedders that mirror
//! a real document into the pipeline. Detached nodes stay in the arena so
//! that a replaced node can be swapped back later, until `remove` drops
//! them.

use super::{Mark, MutationBatch, Node, NodeId, NodeTree, PageDocument, Presentation};
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;

const MUTATION_CAPACITY: usize = 1024;

struct Arena {
    nodes: HashMap<NodeId, Node>,
    marks: HashMap<NodeId, HashSet<Mark>>,
    next_id: u64,
}

impl Arena {
    fn insert_tree(&mut self, tree: NodeTree, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;

        let NodeTree {
            tag,
            attributes,
            text,
            presentation,
            children,
        } = tree;

        self.nodes.insert(
            id,
            Node {
                id,
                tag,
                attributes,
                text,
                presentation,
                parent,
                children: Vec::with_capacity(children.len()),
            },
        );

        for child in children {
            let child_id = self.insert_tree(child, Some(id));
            if let Some(node) = self.nodes.get_mut(&id) {
                node.children.push(child_id);
            }
        }
        id
    }

    fn snapshot(&self, id: NodeId) -> Option<NodeTree> {
        let node = self.nodes.get(&id)?;
        Some(NodeTree {
            tag: node.tag.clone(),
            attributes: node.attributes.clone(),
            text: node.text.clone(),
            presentation: node.presentation,
            children: node
                .children
                .iter()
                .filter_map(|c| self.snapshot(*c))
                .collect(),
        })
    }

    fn is_detached_root(&self, id: NodeId, root: NodeId) -> bool {
        id != root
            && self
                .nodes
                .get(&id)
                .map(|n| n.parent.is_none())
                .unwrap_or(false)
    }

    /// Whether `ancestor` is `id` or one of its ancestors
    fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(cur) = current {
            if cur == ancestor {
                return true;
            }
            current = self.nodes.get(&cur).and_then(|n| n.parent);
        }
        false
    }

    fn drop_tree(&mut self, id: NodeId) -> usize {
        let Some(node) = self.nodes.remove(&id) else {
            return 0;
        };
        self.marks.remove(&id);
        1 + node
            .children
            .into_iter()
            .map(|child| self.drop_tree(child))
            .sum::<usize>()
    }

    fn unlink(&mut self, id: NodeId) -> Option<(NodeId, usize)> {
        let parent = self.nodes.get(&id)?.parent?;
        let siblings = &mut self.nodes.get_mut(&parent)?.children;
        let index = siblings.iter().position(|c| *c == id)?;
        siblings.remove(index);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = None;
        }
        Some((parent, index))
    }

    fn link(&mut self, parent: NodeId, index: usize, id: NodeId) -> bool {
        let Some(parent_node) = self.nodes.get_mut(&parent) else {
            return false;
        };
        let index = index.min(parent_node.children.len());
        parent_node.children.insert(index, id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = Some(parent);
        }
        true
    }
}

/// In-memory `PageDocument`
pub struct MemoryPage {
    url: String,
    root: NodeId,
    arena: RwLock<Arena>,
    mutations: broadcast::Sender<MutationBatch>,
}

impl MemoryPage {
    /// Create an empty page with a `body` root
    pub fn new(url: impl Into<String>) -> Self {
        let mut arena = Arena {
            nodes: HashMap::new(),
            marks: HashMap::new(),
            next_id: 1,
        };
        let root = arena.insert_tree(NodeTree::element("body"), None);
        let (mutations, _) = broadcast::channel(MUTATION_CAPACITY);
        Self {
            url: url.into(),
            root,
            arena: RwLock::new(arena),
            mutations,
        }
    }

    /// Create a page whose body holds the given sub-trees
    ///
    /// Built before anyone can subscribe, so no mutations are published.
    pub fn with_body(url: impl Into<String>, children: Vec<NodeTree>) -> Self {
        let page = Self::new(url);
        {
            let mut arena = page.write();
            for child in children {
                let id = arena.insert_tree(child, Some(page.root));
                if let Some(root) = arena.nodes.get_mut(&page.root) {
                    root.children.push(id);
                }
            }
        }
        page
    }

    /// Create a sub-tree and attach it as the last child of the body
    pub fn append(&self, tree: NodeTree) -> NodeId {
        let id = self.create(tree);
        self.append_child(self.root, id);
        id
    }

    /// All attached nodes with the given tag, in document order
    pub fn find_all(&self, tag: &str) -> Vec<NodeId> {
        let arena = self.read();
        let mut found = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if let Some(node) = arena.nodes.get(&id) {
                if node.tag.eq_ignore_ascii_case(tag) {
                    found.push(id);
                }
                stack.extend(node.children.iter().rev().copied());
            }
        }
        found
    }

    /// Concatenated text of every text node under `id`
    pub fn text_content(&self, id: NodeId) -> String {
        let arena = self.read();
        let mut out = String::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            if let Some(node) = arena.nodes.get(&cur) {
                if let Some(text) = &node.text {
                    out.push_str(text);
                }
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Number of nodes in the arena, attached or not
    pub fn len(&self) -> usize {
        self.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, Arena> {
        self.arena.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arena> {
        self.arena.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, added: NodeId) {
        // No subscribers is fine
        let _ = self.mutations.send(MutationBatch { added: vec![added] });
    }
}

impl PageDocument for MemoryPage {
    fn url(&self) -> String {
        self.url.clone()
    }

    fn root(&self) -> NodeId {
        self.root
    }

    fn node(&self, id: NodeId) -> Option<Node> {
        self.read().nodes.get(&id).cloned()
    }

    fn snapshot(&self, id: NodeId) -> Option<NodeTree> {
        self.read().snapshot(id)
    }

    fn is_attached(&self, id: NodeId) -> bool {
        let arena = self.read();
        arena.nodes.contains_key(&id) && arena.is_ancestor(self.root, id)
    }

    fn mark(&self, id: NodeId, mark: Mark) {
        let mut arena = self.write();
        if arena.nodes.contains_key(&id) {
            arena.marks.entry(id).or_default().insert(mark);
        }
    }

    fn has_mark(&self, id: NodeId, mark: Mark) -> bool {
        self.read()
            .marks
            .get(&id)
            .map(|m| m.contains(&mark))
            .unwrap_or(false)
    }

    fn unmark(&self, id: NodeId, mark: Mark) {
        let mut arena = self.write();
        if let Some(marks) = arena.marks.get_mut(&id) {
            marks.remove(&mark);
            if marks.is_empty() {
                arena.marks.remove(&id);
            }
        }
    }

    fn create(&self, tree: NodeTree) -> NodeId {
        self.write().insert_tree(tree, None)
    }

    fn append_child(&self, parent: NodeId, child: NodeId) -> bool {
        let attached = {
            let mut arena = self.write();
            if !arena.nodes.contains_key(&parent)
                || !arena.is_detached_root(child, self.root)
                || arena.is_ancestor(child, parent)
            {
                return false;
            }
            let end = arena.nodes.get(&parent).map(|n| n.children.len()).unwrap_or(0);
            arena.link(parent, end, child)
        };
        if attached {
            self.publish(child);
        }
        attached
    }

    fn insert_after(&self, anchor: NodeId, node: NodeId) -> bool {
        let attached = {
            let mut arena = self.write();
            if !arena.is_detached_root(node, self.root) || arena.is_ancestor(node, anchor) {
                return false;
            }
            let Some(parent) = arena.nodes.get(&anchor).and_then(|n| n.parent) else {
                return false;
            };
            let Some(index) = arena
                .nodes
                .get(&parent)
                .and_then(|p| p.children.iter().position(|c| *c == anchor))
            else {
                return false;
            };
            arena.link(parent, index + 1, node)
        };
        if attached {
            self.publish(node);
        }
        attached
    }

    fn replace(&self, old: NodeId, new: NodeId) -> bool {
        let attached = {
            let mut arena = self.write();
            if old == new
                || !arena.is_detached_root(new, self.root)
                || arena.is_ancestor(new, old)
            {
                return false;
            }
            match arena.unlink(old) {
                Some((parent, index)) => arena.link(parent, index, new),
                None => false,
            }
        };
        if attached {
            self.publish(new);
        }
        attached
    }

    fn detach(&self, id: NodeId) -> bool {
        self.write().unlink(id).is_some()
    }

    fn remove(&self, id: NodeId) -> bool {
        let mut arena = self.write();
        if !arena.is_detached_root(id, self.root) {
            return false;
        }
        arena.drop_tree(id) > 0
    }

    fn set_presentation(&self, id: NodeId, presentation: Presentation) -> bool {
        match self.write().nodes.get_mut(&id) {
            Some(node) => {
                node.presentation = presentation;
                true
            }
            None => false,
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<MutationBatch> {
        self.mutations.subscribe()
    }
}
