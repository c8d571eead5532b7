//! The node kinds of the template tree.

use surrogate_segment::SegmentList;

/// Index of a node in its [`Tree`](crate::Tree) arena. Plain non-owning
/// identifier; holding one never keeps a node alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

/// Token identifying one outstanding sub-request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubRequestId(pub u64);

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub parent: Option<NodeId>,
    pub kind: Kind,
}

#[derive(Debug, Clone)]
pub(crate) enum Kind {
    /// `<esi:comment>`; renders nothing and never appears in cached trees.
    Comment,
    /// `<esi:remove>`; swallows its literal content at build time.
    Remove,
    Literal(Literal),
    Sequence(Sequence),
    Choose(Choose),
    Try(Try),
    Include(Include),
    Assign(Assign),
}

/// Surface text. Substitution runs over it at most once, when it is first
/// processed inside a `<esi:vars>` subtree.
#[derive(Debug, Clone, Default)]
pub(crate) struct Literal {
    pub buffer: SegmentList,
    /// Pre-substitution bytes, kept so cached trees stay request-neutral.
    pub pristine: Option<SegmentList>,
    pub done_vars: bool,
}

impl Literal {
    pub fn new(bytes: &[u8]) -> Self {
        Literal {
            buffer: SegmentList::from_bytes(bytes),
            pristine: None,
            done_vars: false,
        }
    }
}

/// A `when` clause's parsed test. The raw expression survives for cached
/// trees; the value is per-request.
#[derive(Debug, Clone)]
pub(crate) struct WhenClause {
    pub raw_test: String,
    pub value: bool,
}

#[derive(Debug, Clone)]
pub(crate) enum SequenceRole {
    Plain,
    /// `<esi:vars>`: substitution applies to the whole subtree.
    Vars,
    When(WhenClause),
    Otherwise,
    Attempt,
    Except,
}

/// Ordered container; the workhorse node. The root of every tree is an
/// incremental plain sequence.
#[derive(Debug, Clone)]
pub(crate) struct Sequence {
    pub role: SequenceRole,
    pub children: Vec<NodeId>,
    /// Watermark: children below this index are Complete and render in
    /// order. It only advances across a contiguous complete prefix.
    pub processed: usize,
    /// Cleared once a full pass proves no child can fail any more.
    pub may_fail: bool,
    pub failed: bool,
    /// Whether the processed prefix may be released before the whole
    /// sequence completes.
    pub incremental: bool,
}

impl Sequence {
    pub fn new(role: SequenceRole, incremental: bool) -> Self {
        Sequence {
            role,
            children: Vec::new(),
            processed: 0,
            may_fail: true,
            failed: false,
            incremental,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Choose {
    /// `when` children in document order.
    pub whens: Vec<NodeId>,
    pub otherwise: Option<NodeId>,
    /// First `when` whose test held, fixed as clauses are added.
    pub chosen: Option<NodeId>,
    pub pruned: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Try {
    pub attempt: Option<NodeId>,
    pub except: Option<NodeId>,
    pub attempt_ok: bool,
    pub attempt_failed: bool,
    pub except_ok: bool,
    pub except_failed: bool,
}

#[derive(Debug, Clone)]
pub(crate) enum BranchState {
    Idle,
    Pending(SubRequestId),
    Content(SegmentList),
    /// The sub-request finished; any content it had has been claimed.
    Gone,
}

#[derive(Debug, Clone)]
pub(crate) struct Branch {
    pub url: Option<String>,
    pub state: BranchState,
}

impl Branch {
    fn new(url: Option<String>) -> Self {
        Branch {
            url,
            state: BranchState::Idle,
        }
    }

    pub fn content(&mut self) -> Option<SegmentList> {
        match std::mem::replace(&mut self.state, BranchState::Gone) {
            BranchState::Content(data) => Some(data),
            other => {
                self.state = other;
                None
            }
        }
    }
}

/// `<esi:include>`: a primary fetch with an optional alternate fallback.
#[derive(Debug, Clone)]
pub(crate) struct Include {
    pub src: Branch,
    pub alt: Branch,
    /// `onerror="continue"`: a failed include renders as nothing instead of
    /// failing the document.
    pub onerror_continue: bool,
    pub started: bool,
    pub sent: bool,
    pub finished: bool,
    pub failed: bool,
}

impl Include {
    pub fn from_attrs(attrs: &[(String, String)]) -> Self {
        let mut src = None;
        let mut alt = None;
        let mut onerror_continue = false;
        for (name, value) in attrs {
            match name.as_str() {
                "src" => src = Some(value.clone()),
                "alt" => alt = Some(value.clone()),
                "onerror" => onerror_continue = value == "continue",
                other => log::warn!("ignoring unknown include attribute '{other}'"),
            }
        }
        Include {
            src: Branch::new(src),
            alt: Branch::new(alt),
            onerror_continue,
            started: false,
            sent: false,
            finished: false,
            failed: false,
        }
    }

    /// A fresh copy with no sub-request state, for cached trees.
    pub fn rearmed(&self) -> Self {
        Include {
            src: Branch::new(self.src.url.clone()),
            alt: Branch::new(self.alt.url.clone()),
            onerror_continue: self.onerror_continue,
            started: false,
            sent: false,
            finished: false,
            failed: false,
        }
    }
}

/// `<esi:assign>`: binds a variable from a `value` attribute or from the
/// element's literal content.
#[derive(Debug, Clone)]
pub(crate) struct Assign {
    pub name: String,
    pub value: Option<String>,
    pub content: SegmentList,
    pub done: bool,
}

impl Assign {
    pub fn new(name: String, value: Option<String>) -> Self {
        Assign {
            name,
            value,
            content: SegmentList::new(),
            done: false,
        }
    }

    pub fn rearmed(&self) -> Self {
        Assign {
            name: self.name.clone(),
            value: self.value.clone(),
            content: self.content.clone(),
            done: false,
        }
    }
}
