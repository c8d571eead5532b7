//! Request-neutral template snapshots.
//!
//! A parsed tree can be snapshotted before its first processing pass and
//! reused for later requests to the same resource, skipping the parse. The
//! snapshot strips everything request-bound: substituted literals revert to
//! their pristine bytes, includes forget their sub-requests, `when` tests
//! keep only their raw expression. Instantiation rebinds the copy to a new
//! request's variable state and re-evaluates every test.

use crate::node::{Choose, Kind, Literal, Sequence, SequenceRole, Try, WhenClause};
use crate::{NodeId, Tree};
use surrogate_vars::VarState;

/// A tree with no per-request state, safe to share across requests.
#[derive(Debug, Clone)]
pub struct CachedTemplate {
    tree: Tree,
}

impl CachedTemplate {
    /// Rebuild a live tree for a new request. `when` clauses are decided
    /// here, against the new request's variables.
    pub fn instantiate(&self, vars: &mut VarState) -> Tree {
        let mut tree = self.tree.clone();
        tree.rearm(vars);
        tree
    }
}

impl Tree {
    /// Snapshot this tree into a request-neutral copy. Comment and remove
    /// nodes contribute nothing to future requests and are dropped.
    pub fn make_cacheable(&self) -> CachedTemplate {
        let mut dst = Tree::new();
        let dst_root = dst.root();
        let children = match self.node(self.root()).map(|n| &n.kind) {
            Some(Kind::Sequence(seq)) => seq.children.clone(),
            _ => Vec::new(),
        };
        let copies: Vec<NodeId> = children
            .iter()
            .filter_map(|child| self.clone_cacheable(*child, &mut dst))
            .collect();
        install_children(&mut dst, dst_root, &copies);
        CachedTemplate { tree: dst }
    }

    fn clone_cacheable(&self, id: NodeId, dst: &mut Tree) -> Option<NodeId> {
        let node = self.node(id)?;
        match &node.kind {
            Kind::Comment | Kind::Remove => None,
            Kind::Literal(lit) => {
                let buffer = lit.pristine.clone().unwrap_or_else(|| lit.buffer.clone());
                Some(dst.alloc(Kind::Literal(Literal {
                    buffer,
                    pristine: None,
                    done_vars: false,
                })))
            }
            Kind::Sequence(seq) => {
                let role = match &seq.role {
                    SequenceRole::When(clause) => SequenceRole::When(WhenClause {
                        raw_test: clause.raw_test.clone(),
                        value: false,
                    }),
                    other => other.clone(),
                };
                let copy_id = dst.alloc(Kind::Sequence(Sequence::new(role, seq.incremental)));
                let copies: Vec<NodeId> = seq
                    .children
                    .iter()
                    .filter_map(|child| self.clone_cacheable(*child, dst))
                    .collect();
                install_children(dst, copy_id, &copies);
                Some(copy_id)
            }
            Kind::Choose(choose) => {
                let copy_id = dst.alloc(Kind::Choose(Choose::default()));
                let whens: Vec<NodeId> = choose
                    .whens
                    .iter()
                    .filter_map(|w| self.clone_cacheable(*w, dst))
                    .collect();
                let otherwise = choose.otherwise.and_then(|o| self.clone_cacheable(o, dst));
                for child in whens.iter().copied().chain(otherwise) {
                    link(dst, copy_id, child);
                }
                if let Some(Kind::Choose(installed)) = dst.node_mut(copy_id).map(|n| &mut n.kind) {
                    installed.whens = whens;
                    installed.otherwise = otherwise;
                }
                Some(copy_id)
            }
            Kind::Try(attempts) => {
                let copy_id = dst.alloc(Kind::Try(Try::default()));
                let attempt = attempts.attempt.and_then(|a| self.clone_cacheable(a, dst));
                let except = attempts.except.and_then(|e| self.clone_cacheable(e, dst));
                for child in attempt.iter().chain(except.iter()) {
                    link(dst, copy_id, *child);
                }
                if let Some(Kind::Try(installed)) = dst.node_mut(copy_id).map(|n| &mut n.kind) {
                    installed.attempt = attempt;
                    installed.except = except;
                }
                Some(copy_id)
            }
            Kind::Include(inc) => Some(dst.alloc(Kind::Include(inc.rearmed()))),
            Kind::Assign(assign) => Some(dst.alloc(Kind::Assign(assign.rearmed()))),
        }
    }

    /// Re-evaluate `when` tests against `vars` and redo clause selection.
    fn rearm(&mut self, vars: &mut VarState) {
        // Tests first, selection second; selection reads the test values.
        let ids: Vec<NodeId> = (0..self.slot_count()).map(NodeId).collect();
        for id in &ids {
            let raw = match self.node(*id).map(|n| &n.kind) {
                Some(Kind::Sequence(seq)) => match &seq.role {
                    SequenceRole::When(clause) => clause.raw_test.clone(),
                    _ => continue,
                },
                _ => continue,
            };
            let value = crate::evaluate_test(&raw, vars);
            if let Some(Kind::Sequence(seq)) = self.node_mut(*id).map(|n| &mut n.kind)
                && let SequenceRole::When(clause) = &mut seq.role
            {
                clause.value = value;
            }
        }
        for id in ids {
            let whens = match self.node(id).map(|n| &n.kind) {
                Some(Kind::Choose(choose)) => choose.whens.clone(),
                _ => continue,
            };
            let chosen = whens.iter().copied().find(|w| {
                matches!(
                    self.node(*w).map(|n| &n.kind),
                    Some(Kind::Sequence(seq))
                        if matches!(&seq.role, SequenceRole::When(c) if c.value)
                )
            });
            if let Some(Kind::Choose(choose)) = self.node_mut(id).map(|n| &mut n.kind) {
                choose.chosen = chosen;
                choose.pruned = false;
            }
        }
    }
}

fn install_children(dst: &mut Tree, parent: NodeId, children: &[NodeId]) {
    for child in children {
        link(dst, parent, *child);
    }
    if let Some(Kind::Sequence(seq)) = dst.node_mut(parent).map(|n| &mut n.kind) {
        seq.children = children.to_vec();
    }
}

fn link(dst: &mut Tree, parent: NodeId, child: NodeId) {
    if let Some(node) = dst.node_mut(child) {
        node.parent = Some(parent);
    }
}
