//! Timeline arena guarded by the manager's lock.
//!
//! Nodes are indexed by reference; the tree is the `parent`/`children` links
//! between them. A node stays in the index while it is checked out (`usage > 0`)
//! even after it was unlinked from the tree; lookups by reference only see
//! linked nodes.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::registry::Priority;

use super::events::TimelineMessage;
use super::types::{State, TimelineRef, TimelineSpec, TimelineType, Unit};

pub(super) struct Node {
    pub(super) reference: TimelineRef,
    pub(super) ty: TimelineType,
    pub(super) parent: Option<TimelineRef>,
    pub(super) children: Vec<TimelineRef>,
    pub(super) state: State,
    pub(super) priority: Priority,
    pub(super) unit: Unit,
    pub(super) start: f64,
    pub(super) end: f64,
    pub(super) progress: f64,
    pub(super) title: Option<Arc<str>>,
    pub(super) reason: Option<Arc<str>>,
    /// Outstanding checkouts; the node is freed once unlinked and at zero.
    pub(super) usage: u32,
    /// Negotiation round that last visited this node.
    pub(super) stamp: u64,
    /// Negotiation that moved this node into `Ending`/`Aborting`.
    pub(super) negotiator: u64,
    pub(super) linked: bool,
}

impl Node {
    fn new(reference: TimelineRef, spec: &TimelineSpec) -> Self {
        Self {
            reference,
            ty: spec.ty,
            parent: spec.parent,
            children: Vec::new(),
            state: State::Start,
            priority: spec.priority,
            unit: spec.unit,
            start: spec.start,
            end: spec.end,
            progress: spec.start,
            title: spec.title.clone(),
            reason: None,
            usage: 1,
            stamp: 0,
            negotiator: 0,
            linked: true,
        }
    }

    pub(super) fn message(&self) -> TimelineMessage {
        TimelineMessage {
            reference: self.reference,
            ty: self.ty,
            parent: self.parent,
            priority: self.priority,
            state: self.state,
            start: self.start,
            end: self.end,
            progress: self.progress,
            unit: self.unit,
            title: self.title.clone(),
            reason: self.reason.clone(),
        }
    }
}

pub(super) struct Forest {
    nodes: FxHashMap<u32, Node>,
    next_ref: u32,
    generation: u64,
}

impl Forest {
    pub(super) fn with_capacity(capacity: usize) -> Self {
        let mut nodes = FxHashMap::default();
        nodes.reserve(capacity);
        Self {
            nodes,
            next_ref: 0,
            generation: 0,
        }
    }

    /// Linked node by reference.
    pub(super) fn get(&self, reference: TimelineRef) -> Result<&Node> {
        match self.nodes.get(&reference.get()) {
            Some(node) if node.linked => Ok(node),
            _ => Err(Error::UnknownKey),
        }
    }

    pub(super) fn get_mut(&mut self, reference: TimelineRef) -> Result<&mut Node> {
        match self.nodes.get_mut(&reference.get()) {
            Some(node) if node.linked => Ok(node),
            _ => Err(Error::UnknownKey),
        }
    }

    /// Node by reference, linked or not (checked-out nodes only).
    pub(super) fn node_mut(&mut self, reference: TimelineRef) -> Option<&mut Node> {
        self.nodes.get_mut(&reference.get())
    }

    pub(super) fn linked(&self) -> usize {
        self.nodes.values().filter(|n| n.linked).count()
    }

    pub(super) fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Creates a node from `spec`, checked out once by the caller.
    ///
    /// The parent must be linked and not finalised.
    pub(super) fn attach(&mut self, spec: &TimelineSpec) -> Result<TimelineMessage> {
        if let Some(parent) = spec.parent {
            if self.get(parent)?.state.is_terminal() {
                return Err(Error::UnknownKey);
            }
        }
        self.nodes.try_reserve(1)?;
        let reference = self.allocate()?;
        if let Some(parent) = spec.parent {
            let parent = self.get_mut(parent)?;
            parent.children.try_reserve(1)?;
            parent.children.push(reference);
        }

        let node = Node::new(reference, spec);
        let message = node.message();
        self.nodes.insert(reference.get(), node);
        self.invalidate(spec.parent, spec.priority);
        Ok(message)
    }

    /// Next free reference; wraps and skips 0 and references in use.
    fn allocate(&mut self) -> Result<TimelineRef> {
        let mut candidate = self.next_ref;
        for _ in 0..=u32::MAX {
            candidate = candidate.wrapping_add(1);
            let Some(reference) = TimelineRef::new(candidate) else {
                continue;
            };
            if !self.nodes.contains_key(&candidate) {
                self.next_ref = candidate;
                return Ok(reference);
            }
        }
        Err(Error::Memory)
    }

    /// Clears negotiation stamps on the ancestors a new child may block.
    fn invalidate(&mut self, mut cursor: Option<TimelineRef>, priority: Priority) {
        while let Some(reference) = cursor {
            let Some(node) = self.nodes.get_mut(&reference.get()) else {
                break;
            };
            if node.priority <= priority {
                node.stamp = 0;
            }
            cursor = node.parent;
        }
    }

    /// Whether any child of `reference` has a priority at or above `acting`.
    pub(super) fn blocked(&self, reference: TimelineRef, acting: Priority) -> bool {
        self.get(reference).is_ok_and(|node| {
            node.children
                .iter()
                .filter_map(|c| self.get(*c).ok())
                .any(|child| child.priority >= acting)
        })
    }

    /// Linked subtree of `root`, children before parents.
    pub(super) fn post_order(&self, root: TimelineRef) -> Vec<TimelineRef> {
        let mut out = Vec::new();
        let mut stack = vec![(root, false)];
        while let Some((reference, expanded)) = stack.pop() {
            let Ok(node) = self.get(reference) else {
                continue;
            };
            if expanded {
                out.push(reference);
                continue;
            }
            stack.push((reference, true));
            for child in node.children.iter().rev() {
                stack.push((*child, false));
            }
        }
        out
    }

    /// Nearest ancestor of type `ty`, optionally starting at the node itself.
    pub(super) fn find_type(
        &self,
        reference: TimelineRef,
        ty: TimelineType,
        inclusive: bool,
    ) -> Result<TimelineRef> {
        let node = self.get(reference)?;
        if inclusive && node.ty == ty {
            return Ok(reference);
        }
        let mut cursor = node.parent;
        while let Some(r) = cursor {
            let node = self.get(r)?;
            if node.ty == ty {
                return Ok(r);
            }
            cursor = node.parent;
        }
        Err(Error::UnknownKey)
    }

    /// Removes `reference` from its parent and from lookups.
    ///
    /// Returns the node when nothing still has it checked out.
    pub(super) fn unlink(&mut self, reference: TimelineRef) -> Option<Node> {
        let node = self.nodes.get_mut(&reference.get())?;
        if !node.linked {
            return None;
        }
        node.linked = false;
        let parent = node.parent;
        let free = node.usage == 0;

        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p.get())) {
            parent.children.retain(|c| *c != reference);
        }
        if free {
            self.nodes.remove(&reference.get())
        } else {
            None
        }
    }

    /// Drops one checkout; returns the node when it was the last one on an
    /// unlinked node.
    pub(super) fn release(&mut self, reference: TimelineRef) -> Option<Node> {
        let node = self.nodes.get_mut(&reference.get())?;
        node.usage = node.usage.saturating_sub(1);
        if node.usage == 0 && !node.linked {
            self.nodes.remove(&reference.get())
        } else {
            None
        }
    }
}
