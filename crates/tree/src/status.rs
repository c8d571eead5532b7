/// Outcome of processing a node, ordered from best to worst.
///
/// Composites combine child outcomes by taking the maximum, so a single
/// `Failed` child dooms its parent and a single `PendingMayFail` child keeps
/// the whole subtree unsendable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    /// Fully resolved; output is final.
    Complete,
    /// Still waiting on something, but the node can no longer fail.
    PendingWontFail,
    /// Still waiting, and failure is possible. Nothing downstream of this
    /// node may be released.
    PendingMayFail,
    /// Definitively failed.
    Failed,
}

impl Status {
    /// True for both pending variants.
    pub fn is_pending(self) -> bool {
        matches!(self, Status::PendingWontFail | Status::PendingMayFail)
    }
}
