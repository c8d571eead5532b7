//! Processing and rendering passes over the tree.
//!
//! Processing walks the tree computing a [`Status`] per node, starting
//! sub-requests as includes are first visited. It never emits output.
//! Rendering separately drains the definitively-complete prefix into an
//! output chain and frees the nodes it consumed. A full reprocessing pass
//! runs after every external event; statuses only ever improve, so the walk
//! is cheap and idempotent.

use crate::node::{BranchState, Kind, SequenceRole, SubRequestId};
use crate::{NodeId, Status, Tree};
use surrogate_segment::SegmentList;
use surrogate_vars::VarState;

/// A sub-request an include wants issued, collected during processing for
/// the owner of the tree to hand to its fetcher.
#[derive(Debug)]
pub struct FetchRequest {
    pub id: SubRequestId,
    pub node: NodeId,
    pub url: String,
}

/// Per-pass context: the request's variable state plus the sub-requests
/// this pass decided to issue.
pub struct ProcessEnv<'a> {
    pub vars: &'a mut VarState,
    pub fetches: Vec<FetchRequest>,
    next_sub: &'a mut u64,
}

impl<'a> ProcessEnv<'a> {
    pub fn new(vars: &'a mut VarState, next_sub: &'a mut u64) -> Self {
        ProcessEnv {
            vars,
            fetches: Vec::new(),
            next_sub,
        }
    }

    fn issue(&mut self, node: NodeId, url: String) -> SubRequestId {
        let id = SubRequestId(*self.next_sub);
        *self.next_sub += 1;
        log::debug!("issuing sub-request {id:?} for '{url}'");
        self.fetches.push(FetchRequest { id, node, url });
        id
    }
}

impl Tree {
    /// One processing pass from the root.
    pub fn process(&mut self, env: &mut ProcessEnv) -> Status {
        let root = self.root();
        self.process_node(root, false, env)
    }

    fn process_node(&mut self, id: NodeId, dovars: bool, env: &mut ProcessEnv) -> Status {
        let Some(node) = self.node(id) else {
            return Status::Complete;
        };
        match &node.kind {
            Kind::Comment | Kind::Remove => Status::Complete,
            Kind::Literal(_) => self.process_literal(id, dovars, env),
            Kind::Sequence(_) => self.process_sequence(id, dovars, env),
            Kind::Choose(_) => self.process_choose(id, dovars, env),
            Kind::Try(_) => self.process_try(id, dovars, env),
            Kind::Include(_) => self.process_include(id, env),
            Kind::Assign(_) => self.process_assign(id, env),
        }
    }

    fn process_literal(&mut self, id: NodeId, dovars: bool, env: &mut ProcessEnv) -> Status {
        let Some(Kind::Literal(lit)) = self.node_mut(id).map(|n| &mut n.kind) else {
            return Status::Complete;
        };
        if dovars && !lit.done_vars {
            lit.pristine = Some(lit.buffer.clone());
            for chunk in lit.buffer.chunks() {
                env.vars.feed(chunk);
            }
            lit.buffer = env.vars.extract_list();
            lit.done_vars = true;
        }
        Status::Complete
    }

    fn process_sequence(&mut self, id: NodeId, dovars: bool, env: &mut ProcessEnv) -> Status {
        let (failed, dovars, start, len) = {
            let Some(Kind::Sequence(seq)) = self.node(id).map(|n| &n.kind) else {
                return Status::Complete;
            };
            let dovars = dovars || matches!(seq.role, SequenceRole::Vars);
            (seq.failed, dovars, seq.processed, seq.children.len())
        };
        if failed {
            return Status::Failed;
        }

        // Every unfinished child is processed each pass so independent
        // sub-requests run concurrently; the watermark still only advances
        // across the contiguous complete prefix.
        let mut result = Status::Complete;
        for i in start..len {
            let child = {
                let Some(Kind::Sequence(seq)) = self.node(id).map(|n| &n.kind) else {
                    return Status::Complete;
                };
                seq.children[i]
            };
            let status = self.process_node(child, dovars, env);
            if status == Status::Failed {
                self.fail_sequence(id);
                return Status::Failed;
            }
            if let Some(Kind::Sequence(seq)) = self.node_mut(id).map(|n| &mut n.kind)
                && status == Status::Complete
                && seq.processed == i
            {
                seq.processed = i + 1;
            }
            result = result.max(status);
        }

        if let Some(Kind::Sequence(seq)) = self.node_mut(id).map(|n| &mut n.kind)
            && result <= Status::PendingWontFail
        {
            seq.may_fail = false;
        }
        result
    }

    fn fail_sequence(&mut self, id: NodeId) {
        let children = match self.node_mut(id).map(|n| &mut n.kind) {
            Some(Kind::Sequence(seq)) => {
                seq.failed = true;
                seq.processed = 0;
                std::mem::take(&mut seq.children)
            }
            _ => return,
        };
        for child in children {
            self.remove_subtree(child);
        }
    }

    fn process_choose(&mut self, id: NodeId, dovars: bool, env: &mut ProcessEnv) -> Status {
        let (empty, pruned, target) = {
            let Some(Kind::Choose(choose)) = self.node(id).map(|n| &n.kind) else {
                return Status::Complete;
            };
            (
                choose.whens.is_empty(),
                choose.pruned,
                choose.chosen.or(choose.otherwise),
            )
        };
        if empty {
            log::error!("choose element without when clauses");
            return Status::Failed;
        }
        if !pruned {
            self.prune_unchosen(id);
        }
        match target {
            Some(branch) => self.process_node(branch, dovars, env),
            // No test held and there is no otherwise: the element
            // contributes nothing.
            None => Status::Complete,
        }
    }

    /// Drop the clauses that can never render. Runs once, on the first
    /// processing pass; cacheable snapshots are taken before that.
    fn prune_unchosen(&mut self, id: NodeId) {
        let (discard, keep) = {
            let Some(Kind::Choose(choose)) = self.node_mut(id).map(|n| &mut n.kind) else {
                return;
            };
            choose.pruned = true;
            let keep = choose.chosen.or(choose.otherwise);
            let mut discard: Vec<NodeId> = Vec::new();
            discard.extend(choose.whens.iter().copied().filter(|w| Some(*w) != keep));
            if let Some(otherwise) = choose.otherwise
                && Some(otherwise) != keep
            {
                discard.push(otherwise);
                choose.otherwise = None;
            }
            choose.whens.retain(|w| Some(*w) == keep);
            (discard, keep)
        };
        log::trace!("choose kept {keep:?}, dropped {} clause(s)", discard.len());
        for id in discard {
            self.remove_subtree(id);
        }
    }

    fn process_try(&mut self, id: NodeId, dovars: bool, env: &mut ProcessEnv) -> Status {
        let (attempt, except, attempt_failed, except_failed) = {
            let Some(Kind::Try(attempts)) = self.node(id).map(|n| &n.kind) else {
                return Status::Complete;
            };
            (
                attempts.attempt,
                attempts.except,
                attempts.attempt_failed,
                attempts.except_failed,
            )
        };
        let Some(attempt) = attempt else {
            log::error!("try element without an attempt clause");
            return Status::Failed;
        };

        if !attempt_failed {
            match self.process_node(attempt, dovars, env) {
                Status::Complete => {
                    if let Some(Kind::Try(attempts)) = self.node_mut(id).map(|n| &mut n.kind) {
                        attempts.attempt_ok = true;
                    }
                    return Status::Complete;
                }
                // The attempt cannot fail any more, so the except clause
                // will never be needed.
                Status::PendingWontFail => return Status::PendingWontFail,
                Status::PendingMayFail => {
                    // Speculatively run the except clause so a late attempt
                    // failure can recover without a stall.
                    return match except {
                        Some(except) if !except_failed => {
                            match self.process_node(except, dovars, env) {
                                Status::Complete | Status::PendingWontFail => {
                                    Status::PendingWontFail
                                }
                                Status::Failed => {
                                    self.mark_except_failed(id);
                                    Status::PendingMayFail
                                }
                                Status::PendingMayFail => Status::PendingMayFail,
                            }
                        }
                        _ => Status::PendingMayFail,
                    };
                }
                Status::Failed => {
                    log::debug!("attempt clause failed, falling back to except");
                    if let Some(Kind::Try(attempts)) = self.node_mut(id).map(|n| &mut n.kind) {
                        attempts.attempt_failed = true;
                    }
                }
            }
        }

        // Attempt is gone; the except clause carries the element.
        match except {
            None => Status::Failed,
            Some(_) if except_failed => Status::Failed,
            Some(except) => match self.process_node(except, dovars, env) {
                Status::Complete => {
                    if let Some(Kind::Try(attempts)) = self.node_mut(id).map(|n| &mut n.kind) {
                        attempts.except_ok = true;
                    }
                    Status::Complete
                }
                Status::Failed => {
                    self.mark_except_failed(id);
                    Status::Failed
                }
                pending => pending,
            },
        }
    }

    fn mark_except_failed(&mut self, id: NodeId) {
        if let Some(Kind::Try(attempts)) = self.node_mut(id).map(|n| &mut n.kind) {
            attempts.except_failed = true;
        }
    }

    fn process_include(&mut self, id: NodeId, env: &mut ProcessEnv) -> Status {
        let needs_start = {
            let Some(Kind::Include(inc)) = self.node(id).map(|n| &n.kind) else {
                return Status::Complete;
            };
            !inc.started
        };
        if needs_start {
            self.start_include(id, env);
        }
        let Some(Kind::Include(inc)) = self.node(id).map(|n| &n.kind) else {
            return Status::Complete;
        };
        if inc.failed {
            if inc.onerror_continue {
                return Status::Complete;
            }
            return Status::Failed;
        }
        if !inc.finished {
            if inc.onerror_continue {
                return Status::PendingWontFail;
            }
            return Status::PendingMayFail;
        }
        Status::Complete
    }

    fn start_include(&mut self, id: NodeId, env: &mut ProcessEnv) {
        let (src_url, alt_url) = {
            let Some(Kind::Include(inc)) = self.node_mut(id).map(|n| &mut n.kind) else {
                return;
            };
            inc.started = true;
            (inc.src.url.clone(), inc.alt.url.clone())
        };
        let Some(src_url) = src_url else {
            log::error!("include element without a src attribute");
            if let Some(Kind::Include(inc)) = self.node_mut(id).map(|n| &mut n.kind) {
                inc.failed = true;
            }
            return;
        };
        // Variables in the URLs resolve at issue time.
        let src_target = env.vars.substitute(&src_url);
        let src_sub = env.issue(id, src_target);
        let alt_sub = alt_url.map(|alt| {
            let alt_target = env.vars.substitute(&alt);
            env.issue(id, alt_target)
        });
        if let Some(Kind::Include(inc)) = self.node_mut(id).map(|n| &mut n.kind) {
            inc.src.state = BranchState::Pending(src_sub);
            if let Some(alt_sub) = alt_sub {
                inc.alt.state = BranchState::Pending(alt_sub);
            }
        }
    }

    /// Deliver the outcome of a sub-request to the include that issued it.
    /// `content` is `Some` on success. Stale deliveries are ignored.
    pub fn sub_request_done(
        &mut self,
        node: NodeId,
        sub: SubRequestId,
        content: Option<SegmentList>,
    ) {
        let Some(Kind::Include(inc)) = self.node_mut(node).map(|n| &mut n.kind) else {
            log::debug!("dropping result for {sub:?}: include is gone");
            return;
        };
        let is_src = matches!(inc.src.state, BranchState::Pending(p) if p == sub);
        let is_alt = matches!(inc.alt.state, BranchState::Pending(p) if p == sub);
        if is_src {
            match content {
                Some(data) => {
                    inc.finished = true;
                    inc.src.state = BranchState::Content(data);
                }
                None => {
                    inc.src.state = BranchState::Gone;
                    match inc.alt.state {
                        // The alternate may still save the element.
                        BranchState::Pending(_) => {}
                        BranchState::Content(_) => inc.finished = true,
                        _ => inc.failed = true,
                    }
                }
            }
        } else if is_alt {
            match content {
                Some(data) => {
                    inc.alt.state = BranchState::Content(data);
                    if matches!(inc.src.state, BranchState::Gone) {
                        inc.finished = true;
                    }
                }
                None => {
                    inc.alt.state = BranchState::Gone;
                    if matches!(inc.src.state, BranchState::Gone) {
                        inc.failed = true;
                    }
                }
            }
        } else {
            log::debug!("dropping stale result for {sub:?}");
        }
    }

    fn process_assign(&mut self, id: NodeId, env: &mut ProcessEnv) -> Status {
        let raw = {
            let Some(Kind::Assign(assign)) = self.node_mut(id).map(|n| &mut n.kind) else {
                return Status::Complete;
            };
            if assign.done {
                return Status::Complete;
            }
            assign.done = true;
            match &assign.value {
                Some(value) => value.clone(),
                None => assign.content.flatten_string(),
            }
        };
        let name = {
            let Some(Kind::Assign(assign)) = self.node(id).map(|n| &n.kind) else {
                return Status::Complete;
            };
            assign.name.clone()
        };
        let value = env.vars.substitute(&raw);
        log::trace!("assign {name} = '{value}'");
        env.vars.set_variable(&name, value);
        Status::Complete
    }

    // --- Rendering ---

    /// Drain everything that is definitively complete, in document order,
    /// into `out`, freeing the rendered nodes.
    pub fn render(&mut self, out: &mut SegmentList) {
        let root = self.root();
        self.render_node(root, out);
    }

    fn render_node(&mut self, id: NodeId, out: &mut SegmentList) {
        let Some(node) = self.node(id) else { return };
        match &node.kind {
            Kind::Comment | Kind::Remove | Kind::Assign(_) => {}
            Kind::Literal(_) => {
                if let Some(Kind::Literal(lit)) = self.node_mut(id).map(|n| &mut n.kind) {
                    out.transfer(&mut lit.buffer);
                }
            }
            Kind::Sequence(_) => self.render_sequence(id, out),
            Kind::Choose(choose) => {
                if let Some(branch) = choose.chosen.or(choose.otherwise) {
                    self.render_node(branch, out);
                }
            }
            Kind::Try(attempts) => {
                let branch = if attempts.attempt_ok {
                    attempts.attempt
                } else if attempts.except_ok {
                    attempts.except
                } else {
                    None
                };
                if let Some(branch) = branch {
                    self.render_node(branch, out);
                }
            }
            Kind::Include(_) => {
                if let Some(Kind::Include(inc)) = self.node_mut(id).map(|n| &mut n.kind) {
                    if !inc.finished || inc.sent {
                        return;
                    }
                    inc.sent = true;
                    let content = inc.src.content().or_else(|| inc.alt.content());
                    if let Some(mut content) = content {
                        out.transfer(&mut content);
                    }
                }
            }
        }
    }

    /// Render and trim the complete prefix below the watermark.
    fn render_sequence(&mut self, id: NodeId, out: &mut SegmentList) {
        let rendered: Vec<NodeId> = {
            let Some(Kind::Sequence(seq)) = self.node(id).map(|n| &n.kind) else {
                return;
            };
            // Non-incremental sequences release nothing until the whole
            // body has completed.
            if !seq.incremental && seq.processed < seq.children.len() {
                return;
            }
            seq.children[..seq.processed].to_vec()
        };
        for child in &rendered {
            self.render_node(*child, out);
        }
        if let Some(Kind::Sequence(seq)) = self.node_mut(id).map(|n| &mut n.kind) {
            seq.children.drain(..rendered.len());
            seq.processed = 0;
        }
        for child in rendered {
            self.remove_subtree(child);
        }
    }
}
