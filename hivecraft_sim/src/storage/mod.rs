// Storage — finite-capacity good containers with an allocate/reserve protocol.
//
// Two layouts implement the same `Storage` contract:
// - `SlottedStorage` (`slotted.rs`): N fixed-size slots, each holding one
//   homogeneous batch. Used for carried inventories and bounded warehouses.
// - `SpecificStorage` (`specific.rs`): a per-good capacity map with unlimited
//   homogeneous stacking. Used for dedicated stockpiles and workplaces.
//
// ## Protocol
//
// `allocate` claims future room, `reserve` claims existing stock. Both return
// an `AllocationToken`. Exactly one of `fulfill` or `cancel` must be applied
// to each token; applying either again is a no-op. A token stores signed
// deltas (positive = allocation, negative = reservation) so the storage can
// commit or reverse it later without re-deriving anything.
//
// A request fails with `AllocationError` only when it is empty or when not a
// single good type in it could be claimed. Partial claims are success.
//
// ## Atomicity
//
// The simulation is single-writer and run-to-completion: every mutating call
// (`add_good`, `remove_good`, `allocate`, `reserve`, `fulfill`, `cancel`)
// takes `&mut self` and leaves the storage consistent on return. A token
// names its storage by `StorageKey` instead of borrowing it, so holding a
// token never pins the storage; `SimState` resolves keys to storages.
//
// ## Buffering
//
// An owner may declare per-good buffer targets; `buffer_deficit` turns them
// into the amount the storage wants to pull in, which `economy.rs`
// advertises as demand.
//
// See also: `guard.rs` for leak/double-resolution bookkeeping, `plan.rs` for
// the only production caller of allocate/reserve.

pub mod guard;
pub mod slotted;
pub mod specific;

pub use guard::{AllocationGuard, AllocationId, AllocationKind, GuardEntry};
pub use slotted::SlottedStorage;
pub use specific::SpecificStorage;

use crate::error::{AllocationError, AllocationReason};
use crate::goods::{EPSILON, GoodType, Goods};
use crate::types::StorageKey;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::ops::{Deref, DerefMut};

// ---------------------------------------------------------------------------
// Allocation tokens
// ---------------------------------------------------------------------------

/// One entry of a token's accounting: `amount` of `good` in `slot` (slotted
/// storages) or in the good's own bucket (`slot == None`).
#[derive(Clone, Debug, PartialEq)]
pub struct Delta {
    pub good: GoodType,
    pub slot: Option<usize>,
    /// Positive for allocations, negative for reservations.
    pub amount: f64,
}

pub type Deltas = SmallVec<[Delta; 4]>;

/// A pending claim on a storage. Not `Clone`: the plan that created it owns
/// it for its whole pending lifetime.
#[derive(Debug)]
pub struct AllocationToken {
    id: AllocationId,
    storage: StorageKey,
    kind: AllocationKind,
    reason: AllocationReason,
    deltas: Deltas,
    resolved: bool,
}

impl AllocationToken {
    pub fn id(&self) -> AllocationId {
        self.id
    }

    pub fn storage(&self) -> StorageKey {
        self.storage
    }

    pub fn kind(&self) -> AllocationKind {
        self.kind
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn deltas(&self) -> &[Delta] {
        &self.deltas
    }

    /// Claimed quantities per good, always positive.
    pub fn goods(&self) -> Goods {
        self.deltas
            .iter()
            .map(|d| (d.good.clone(), d.amount.abs()))
            .collect()
    }
}

impl Drop for AllocationToken {
    fn drop(&mut self) {
        if !self.resolved {
            tracing::warn!(
                allocation = %self.id,
                storage = %self.storage,
                reason = %self.reason,
                claimed = ?self.goods(),
                "allocation token dropped without fulfill or cancel"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Presentation snapshot
// ---------------------------------------------------------------------------

/// One visible slot (or good bucket) as the renderer sees it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenderedSlot {
    pub good: Option<GoodType>,
    pub present: f64,
    pub reserved: f64,
    pub allocated: f64,
    /// Capacity of this slot or bucket.
    pub allowed: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenderedGoods {
    pub slots: Vec<RenderedSlot>,
    /// Number of slots the layout always shows, when it is fixed.
    pub assumed_max_slots: Option<usize>,
}

// ---------------------------------------------------------------------------
// The storage contract
// ---------------------------------------------------------------------------

/// Shared contract of both storage layouts.
///
/// Implementors provide the layout-specific queries and the four claim /
/// commit / release primitives; the token protocol (`allocate`, `reserve`,
/// `fulfill`, `cancel`) is implemented once here on top of them.
pub trait Storage {
    fn key(&self) -> StorageKey;

    /// Free capacity for `good` (or for anything, when `None`).
    fn has_room(&self, good: Option<&GoodType>) -> f64;

    /// Present quantity minus reserved quantity, never negative.
    fn available(&self, good: &GoodType) -> f64;

    /// `available` for every good with positive availability.
    fn availables(&self) -> Goods;

    /// Present quantity per good, reserved included, pending allocations
    /// excluded.
    fn stock(&self) -> Goods;

    /// Room claimed by outstanding allocations for `good`.
    fn incoming(&self, good: &GoodType) -> f64;

    /// Insert up to the available room. Returns the quantity stored.
    fn add_good(&mut self, good: &GoodType, quantity: f64) -> f64;

    /// Remove up to `quantity`, never touching reserved stock. Returns the
    /// quantity removed and warns when it falls short.
    fn remove_good(&mut self, good: &GoodType, quantity: f64) -> f64;

    /// Whether every good in `goods` could be stored at once.
    fn can_store_all(&self, goods: &Goods) -> bool;

    fn rendered_goods(&self) -> RenderedGoods;

    /// A good type whose stock could be compacted into fewer slots.
    fn fragmented(&self) -> Option<GoodType>;

    fn guard(&self) -> &AllocationGuard;

    fn guard_mut(&mut self) -> &mut AllocationGuard;

    /// Claim room for as much of `goods` as fits. Returns the positive deltas
    /// applied; empty if nothing could be claimed (and nothing changed).
    fn claim_room(&mut self, goods: &Goods) -> Deltas;

    /// Claim existing stock for as much of `goods` as is available. Returns
    /// the negative deltas applied.
    fn claim_stock(&mut self, goods: &Goods) -> Deltas;

    /// Turn claimed deltas into real stock changes.
    fn commit(&mut self, deltas: &[Delta]);

    /// Drop claimed deltas without changing stock.
    fn release(&mut self, deltas: &[Delta]);

    // -- Provided protocol ---------------------------------------------------

    /// Reserve future write capacity for `goods`.
    fn allocate(&mut self, goods: &Goods, reason: &str) -> Result<AllocationToken, AllocationError> {
        if goods.is_empty() {
            return Err(AllocationError::EmptyRequest {
                reason: reason.to_owned(),
            });
        }
        let snapshot = self.stock();
        let deltas = self.claim_room(goods);
        issue_token(self, AllocationKind::Allocate, deltas, reason, goods, snapshot)
    }

    /// Reserve existing stock for future removal.
    fn reserve(&mut self, goods: &Goods, reason: &str) -> Result<AllocationToken, AllocationError> {
        if goods.is_empty() {
            return Err(AllocationError::EmptyRequest {
                reason: reason.to_owned(),
            });
        }
        let snapshot = self.stock();
        let deltas = self.claim_stock(goods);
        issue_token(self, AllocationKind::Reserve, deltas, reason, goods, snapshot)
    }

    /// Commit a token: allocations become stock, reservations leave.
    fn fulfill(&mut self, token: &mut AllocationToken) {
        if accept_resolution(self, token, "fulfill") {
            self.commit(&token.deltas);
        }
    }

    /// Release a token without touching stock.
    fn cancel(&mut self, token: &mut AllocationToken) {
        if accept_resolution(self, token, "cancel") {
            self.release(&token.deltas);
        }
    }

    /// Whether any token against this storage is still outstanding.
    fn has_pending(&self) -> bool {
        self.guard().outstanding_count() > 0
    }
}

fn issue_token<S: Storage + ?Sized>(
    storage: &mut S,
    kind: AllocationKind,
    deltas: Deltas,
    reason: &str,
    request: &Goods,
    snapshot: Goods,
) -> Result<AllocationToken, AllocationError> {
    if deltas.iter().all(|d| d.amount.abs() <= EPSILON) {
        return Err(AllocationError::Nothing {
            reason: reason.to_owned(),
            request: request.clone(),
        });
    }
    let id = storage.guard_mut().issue(GuardEntry {
        reason: reason.to_owned(),
        kind,
        snapshot,
    });
    Ok(AllocationToken {
        id,
        storage: storage.key(),
        kind,
        reason: reason.to_owned(),
        deltas,
        resolved: false,
    })
}

/// Checks shared by `fulfill` and `cancel`. Returns whether the storage
/// should apply the token's deltas; marks the token resolved either way.
fn accept_resolution<S: Storage + ?Sized>(
    storage: &mut S,
    token: &mut AllocationToken,
    action: &'static str,
) -> bool {
    if token.storage != storage.key() {
        tracing::error!(
            allocation = %token.id,
            token_storage = %token.storage,
            storage = %storage.key(),
            action,
            "token applied to a foreign storage"
        );
        return false;
    }
    if token.resolved || !storage.guard_mut().invalidate(token.id) {
        tracing::debug!(allocation = %token.id, action, "token already resolved");
        token.resolved = true;
        return false;
    }
    token.resolved = true;
    true
}

/// How much of each buffer target the storage still wants to pull in,
/// counting pending allocations as already arriving and bounded by room.
pub fn buffer_deficit(storage: &dyn Storage, targets: &Goods) -> Goods {
    let mut deficit = Goods::new();
    for (good, target) in targets.iter() {
        let stock = storage.stock().get(good);
        let wanted = target - stock - storage.incoming(good);
        let wanted = wanted.min(storage.has_room(Some(good)));
        if wanted > EPSILON {
            deficit.set(good.clone(), wanted);
        }
    }
    deficit
}

// ---------------------------------------------------------------------------
// Layout-erased storage
// ---------------------------------------------------------------------------

/// Either storage layout, as owned by an alveolus. Dereferences to
/// `dyn Storage`, so callers use the contract directly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum AnyStorage {
    Slotted(SlottedStorage),
    Specific(SpecificStorage),
}

impl AnyStorage {
    pub fn set_key(&mut self, key: StorageKey) {
        match self {
            AnyStorage::Slotted(s) => s.set_key(key),
            AnyStorage::Specific(s) => s.set_key(key),
        }
    }
}

impl Deref for AnyStorage {
    type Target = dyn Storage;

    fn deref(&self) -> &Self::Target {
        match self {
            AnyStorage::Slotted(s) => s,
            AnyStorage::Specific(s) => s,
        }
    }
}

impl DerefMut for AnyStorage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            AnyStorage::Slotted(s) => s,
            AnyStorage::Specific(s) => s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wood() -> GoodType {
        GoodType::from("wood")
    }

    fn specific(cap: f64) -> SpecificStorage {
        SpecificStorage::new(StorageKey::Detached(0), Goods::new().with("wood", cap))
    }

    #[test]
    fn empty_request_is_rejected() {
        let mut s = specific(10.0);
        let err = s.allocate(&Goods::new(), "nothing").unwrap_err();
        assert!(matches!(err, AllocationError::EmptyRequest { .. }));
        assert_eq!(err.reason(), "nothing");
    }

    #[test]
    fn token_goods_are_positive_for_reservations() {
        let mut s = specific(10.0);
        s.add_good(&wood(), 5.0);
        let mut token = s.reserve(&Goods::new().with("wood", 2.0), "take").unwrap();
        assert_eq!(token.kind(), AllocationKind::Reserve);
        assert_eq!(token.goods().get(&wood()), 2.0);
        assert!(token.deltas().iter().all(|d| d.amount < 0.0));
        s.cancel(&mut token);
    }

    #[test]
    fn long_allocate_cancel_churn_leaves_no_bookkeeping() {
        let mut s = specific(10.0);
        for _ in 0..5_000 {
            let mut token = s.allocate(&Goods::new().with("wood", 1.0), "churn").unwrap();
            s.cancel(&mut token);
        }
        assert_eq!(s.guard().outstanding_count(), 0);
        let mut token = s.allocate(&Goods::new().with("wood", 2.0), "last").unwrap();
        s.fulfill(&mut token);
        s.cancel(&mut token);
        assert_eq!(s.stock().get(&wood()), 2.0);
        assert_eq!(s.has_room(Some(&wood())), 8.0);
    }

    #[test]
    fn foreign_token_is_ignored() {
        let mut a = specific(10.0);
        let mut b = SpecificStorage::new(StorageKey::Detached(1), Goods::new().with("wood", 10.0));
        let mut token = a.allocate(&Goods::new().with("wood", 3.0), "a").unwrap();
        b.fulfill(&mut token);
        assert_eq!(b.stock().get(&wood()), 0.0);
        // The token itself is still pending against `a`.
        assert!(!token.is_resolved());
        a.cancel(&mut token);
        assert_eq!(a.has_room(Some(&wood())), 10.0);
    }

    #[test]
    fn buffer_deficit_counts_incoming() {
        let mut s = specific(10.0);
        s.add_good(&wood(), 2.0);
        let targets = Goods::new().with("wood", 6.0);
        assert_eq!(buffer_deficit(&s, &targets).get(&wood()), 4.0);
        let mut token = s.allocate(&Goods::new().with("wood", 3.0), "incoming").unwrap();
        assert_eq!(buffer_deficit(&s, &targets).get(&wood()), 1.0);
        s.fulfill(&mut token);
        assert_eq!(buffer_deficit(&s, &targets).get(&wood()), 1.0);
    }

    #[test]
    fn any_storage_derefs_to_contract() {
        let mut any = AnyStorage::Specific(specific(4.0));
        assert_eq!(any.add_good(&wood(), 6.0), 4.0);
        assert_eq!(any.stock().get(&wood()), 4.0);
    }
}
