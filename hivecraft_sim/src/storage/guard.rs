// Allocation guard — diagnostic bookkeeping for allocation tokens.
//
// Each storage owns one `AllocationGuard`. Issuing a token registers an
// entry carrying the token's reason and a stock snapshot; resolving it
// (fulfill or cancel) removes the entry. Ids are never reused, so an issued
// id with no entry is resolved, and a second resolution is detected and
// ignored instead of mutating the storage twice.
//
// The leak half of the guard lives in `AllocationToken`'s `Drop` impl
// (`storage/mod.rs`): a token dropped while unresolved logs a warning with
// its reason. `SimState` additionally cross-checks outstanding entries
// against the tokens held by active plans at the end of each debug step.
//
// Nothing here affects simulation outcomes. The guard is transient: it is
// never serialized, because no allocation may cross a save.

use crate::error::AllocationReason;
use crate::goods::Goods;
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of one allocation token, unique within its storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AllocationId(pub u64);

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alloc#{}", self.0)
    }
}

/// Whether a token claims future room or existing stock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocationKind {
    /// Claim on room for goods about to be added.
    Allocate,
    /// Claim on existing stock about to be removed.
    Reserve,
}

/// What the guard remembers about an outstanding token.
#[derive(Clone, Debug)]
pub struct GuardEntry {
    pub reason: AllocationReason,
    pub kind: AllocationKind,
    /// Storage stock at the moment the token was issued.
    pub snapshot: Goods,
}

#[derive(Clone, Debug, Default)]
pub struct AllocationGuard {
    next_id: u64,
    outstanding: BTreeMap<AllocationId, GuardEntry>,
}

impl AllocationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly issued token and return its id.
    pub fn issue(&mut self, entry: GuardEntry) -> AllocationId {
        let id = AllocationId(self.next_id);
        self.next_id += 1;
        self.outstanding.insert(id, entry);
        id
    }

    /// Mark a token resolved. Returns `false` if it was already resolved
    /// (or never issued here), in which case the caller must not touch
    /// storage state.
    pub fn invalidate(&mut self, id: AllocationId) -> bool {
        self.outstanding.remove(&id).is_some()
    }

    pub fn is_invalidated(&self, id: AllocationId) -> bool {
        id.0 < self.next_id && !self.outstanding.contains_key(&id)
    }

    pub fn outstanding(&self) -> impl Iterator<Item = (AllocationId, &GuardEntry)> {
        self.outstanding.iter().map(|(id, e)| (*id, e))
    }

    pub fn outstanding_count(&self) -> usize {
        self.outstanding.len()
    }
}
