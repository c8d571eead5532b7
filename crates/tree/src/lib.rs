//! The template tree: an arena of typed nodes built by the parser, processed
//! toward a [`Status`], and rendered front to back into output segments.
//!
//! Nodes live in a slab owned by the [`Tree`]; structure is expressed with
//! [`NodeId`] indices rather than shared ownership, so a child completing
//! can be observed by any ancestor on the next processing pass without any
//! aliasing of node state.

mod cache;
mod node;
mod process;
mod status;

#[cfg(test)]
mod tests;

pub use cache::CachedTemplate;
pub use node::{NodeId, SubRequestId};
pub use process::{FetchRequest, ProcessEnv};
pub use status::Status;

use node::{Assign, Choose, Include, Kind, Literal, Node, Sequence, SequenceRole, Try, WhenClause};
use surrogate_vars::VarState;

/// Substitute and evaluate a `test` attribute. A malformed expression is
/// reported and treated as false rather than failing the document.
pub fn evaluate_test(raw: &str, vars: &mut VarState) -> bool {
    let expanded = vars.substitute(raw);
    match surrogate_expr::evaluate(&expanded) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("test expression '{expanded}' rejected: {e}");
            false
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Option<Node>>,
    root: NodeId,
}

impl Default for Tree {
    fn default() -> Self {
        Tree::new()
    }
}

impl Tree {
    /// An empty tree whose root is an incremental sequence: its completed
    /// prefix may be released while the rest is still pending.
    pub fn new() -> Self {
        let root = Node {
            parent: None,
            kind: Kind::Sequence(Sequence::new(SequenceRole::Plain, true)),
        };
        Tree {
            nodes: vec![Some(root)],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub(crate) fn alloc(&mut self, kind: Kind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(Node { parent: None, kind }));
        id
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(|n| n.as_ref())
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(|n| n.as_mut())
    }

    // --- Node constructors ---

    pub fn new_literal(&mut self, bytes: &[u8]) -> NodeId {
        self.alloc(Kind::Literal(Literal::new(bytes)))
    }

    pub fn new_comment(&mut self) -> NodeId {
        self.alloc(Kind::Comment)
    }

    pub fn new_remove(&mut self) -> NodeId {
        self.alloc(Kind::Remove)
    }

    pub fn new_vars(&mut self) -> NodeId {
        self.alloc(Kind::Sequence(Sequence::new(SequenceRole::Vars, true)))
    }

    pub fn new_when(&mut self, raw_test: String, value: bool) -> NodeId {
        let clause = WhenClause { raw_test, value };
        self.alloc(Kind::Sequence(Sequence::new(
            SequenceRole::When(clause),
            false,
        )))
    }

    pub fn new_otherwise(&mut self) -> NodeId {
        self.alloc(Kind::Sequence(Sequence::new(SequenceRole::Otherwise, false)))
    }

    pub fn new_attempt(&mut self) -> NodeId {
        self.alloc(Kind::Sequence(Sequence::new(SequenceRole::Attempt, false)))
    }

    pub fn new_except(&mut self) -> NodeId {
        self.alloc(Kind::Sequence(Sequence::new(SequenceRole::Except, false)))
    }

    pub fn new_choose(&mut self) -> NodeId {
        self.alloc(Kind::Choose(Choose::default()))
    }

    pub fn new_try(&mut self) -> NodeId {
        self.alloc(Kind::Try(Try::default()))
    }

    pub fn new_include(&mut self, attrs: &[(String, String)]) -> NodeId {
        self.alloc(Kind::Include(Include::from_attrs(attrs)))
    }

    pub fn new_assign(&mut self, name: String, value: Option<String>) -> NodeId {
        self.alloc(Kind::Assign(Assign::new(name, value)))
    }

    // --- Structure ---

    /// Attach `child` under `parent`. Returns false when the parent cannot
    /// hold that child, leaving the tree unchanged apart from freeing the
    /// rejected node. Containers that swallow their content (remove, choose
    /// and try around stray text, assign) consume the child and return true.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        let accepted = match self.node(parent).map(|n| &n.kind) {
            Some(Kind::Sequence(_)) => self.add_to_sequence(parent, child),
            Some(Kind::Choose(_)) => self.add_to_choose(parent, child),
            Some(Kind::Try(_)) => self.add_to_try(parent, child),
            Some(Kind::Remove) => {
                // Removed content disappears here; only surface text is
                // allowed inside.
                if self.is_literal(child) {
                    self.remove_subtree(child);
                    true
                } else {
                    false
                }
            }
            Some(Kind::Assign(_)) => self.add_to_assign(parent, child),
            _ => false,
        };
        if !accepted {
            self.remove_subtree(child);
        }
        accepted
    }

    fn is_literal(&self, id: NodeId) -> bool {
        matches!(self.node(id).map(|n| &n.kind), Some(Kind::Literal(_)))
    }

    fn role_of(&self, id: NodeId) -> Option<&SequenceRole> {
        match self.node(id).map(|n| &n.kind) {
            Some(Kind::Sequence(seq)) => Some(&seq.role),
            _ => None,
        }
    }

    fn add_to_sequence(&mut self, parent: NodeId, child: NodeId) -> bool {
        if matches!(
            self.role_of(child),
            Some(SequenceRole::Attempt | SequenceRole::Except)
        ) {
            return false;
        }
        // Adjacent literals merge so surface text split by the scanner
        // stays one node.
        if self.is_literal(child) {
            let last = match self.node(parent).map(|n| &n.kind) {
                Some(Kind::Sequence(seq)) => seq.children.last().copied(),
                _ => None,
            };
            if let Some(last) = last
                && self.is_literal(last)
            {
                let mut buffer = match self.node_mut(child).map(|n| &mut n.kind) {
                    Some(Kind::Literal(lit)) => std::mem::take(&mut lit.buffer),
                    _ => return false,
                };
                if let Some(Kind::Literal(lit)) = self.node_mut(last).map(|n| &mut n.kind) {
                    lit.buffer.transfer(&mut buffer);
                }
                self.remove_subtree(child);
                return true;
            }
        }
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(Kind::Sequence(seq)) = self.node_mut(parent).map(|n| &mut n.kind) {
            seq.children.push(child);
            true
        } else {
            false
        }
    }

    fn add_to_choose(&mut self, parent: NodeId, child: NodeId) -> bool {
        // Whitespace between clauses is legal and meaningless.
        if self.is_literal(child) {
            self.remove_subtree(child);
            return true;
        }
        let (is_when, tests_true) = match self.role_of(child) {
            Some(SequenceRole::When(clause)) => (true, clause.value),
            Some(SequenceRole::Otherwise) => (false, false),
            _ => return false,
        };
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }
        let Some(Kind::Choose(choose)) = self.node_mut(parent).map(|n| &mut n.kind) else {
            return false;
        };
        if is_when {
            choose.whens.push(child);
            if choose.chosen.is_none() && tests_true {
                choose.chosen = Some(child);
            }
            true
        } else if choose.otherwise.is_none() {
            choose.otherwise = Some(child);
            true
        } else {
            false
        }
    }

    fn add_to_try(&mut self, parent: NodeId, child: NodeId) -> bool {
        if self.is_literal(child) {
            self.remove_subtree(child);
            return true;
        }
        let is_attempt = match self.role_of(child) {
            Some(SequenceRole::Attempt) => true,
            Some(SequenceRole::Except) => false,
            _ => return false,
        };
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }
        let Some(Kind::Try(attempts)) = self.node_mut(parent).map(|n| &mut n.kind) else {
            return false;
        };
        let slot = if is_attempt {
            &mut attempts.attempt
        } else {
            &mut attempts.except
        };
        if slot.is_none() {
            *slot = Some(child);
            true
        } else {
            false
        }
    }

    fn add_to_assign(&mut self, parent: NodeId, child: NodeId) -> bool {
        let mut buffer = match self.node_mut(child).map(|n| &mut n.kind) {
            Some(Kind::Literal(lit)) => std::mem::take(&mut lit.buffer),
            _ => return false,
        };
        self.remove_subtree(child);
        if let Some(Kind::Assign(assign)) = self.node_mut(parent).map(|n| &mut n.kind) {
            assign.content.transfer(&mut buffer);
            true
        } else {
            false
        }
    }

    /// Drop a node and everything under it, freeing the arena slots.
    pub(crate) fn remove_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get_mut(id.0).and_then(Option::take) else {
                continue;
            };
            match node.kind {
                Kind::Sequence(seq) => stack.extend(seq.children),
                Kind::Choose(choose) => {
                    stack.extend(choose.whens);
                    stack.extend(choose.otherwise);
                }
                Kind::Try(attempts) => {
                    stack.extend(attempts.attempt);
                    stack.extend(attempts.except);
                }
                _ => {}
            }
        }
    }

    /// Tear the whole tree down, dropping any buffered content. Used on
    /// failure and when the downstream detaches.
    pub fn teardown(&mut self) {
        self.nodes.iter_mut().for_each(|slot| *slot = None);
    }

    /// Whether the tree can still fail. While true, no output derived from
    /// it may be released downstream.
    pub fn may_fail(&self) -> bool {
        match self.node(self.root).map(|n| &n.kind) {
            Some(Kind::Sequence(seq)) => seq.failed || seq.may_fail,
            _ => true,
        }
    }
}
