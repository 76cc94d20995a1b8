// Slotted storage — N fixed-capacity slots, one good type per slot.
//
// Each occupied slot tracks `quantity` (present), `allocated` (room claimed
// for incoming goods) and `reserved` (present stock claimed for removal).
// Invariants per slot: all three are >= 0, `reserved <= quantity`, and
// `quantity + allocated <= max_quantity_per_slot`. A slot whose
// `quantity + allocated` reaches zero is cleared back to `None` right away,
// so occupied slots always hold something.
//
// Placement policy is deliberately asymmetric:
// - Filling (`add_good`, `allocate`) tops up the *emptiest* same-type slot
//   first and opens empty slots only once every compatible slot is full.
// - Draining (`remove_good`, `reserve`) takes from the *fullest* slot first.
// Consolidating on the way in and draining full stacks on the way out keeps
// partial stacks few, which is what `fragmented()` reports on.
//
// Persisted form (`SlottedSave`) keeps only the present quantity of each
// slot. Allocated and reserved amounts are zero at any valid save point.

use super::{AllocationGuard, Delta, Deltas, RenderedGoods, RenderedSlot, Storage};
use crate::goods::{EPSILON, GoodType, Goods};
use crate::types::StorageKey;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq)]
pub struct Slot {
    pub good: GoodType,
    pub quantity: f64,
    pub allocated: f64,
    pub reserved: f64,
}

impl Slot {
    fn room(&self, max: f64) -> f64 {
        (max - self.quantity - self.allocated).max(0.0)
    }

    fn free_stock(&self) -> f64 {
        (self.quantity - self.reserved).max(0.0)
    }
}

#[derive(Clone, Debug)]
pub struct SlottedStorage {
    key: StorageKey,
    slots: Vec<Option<Slot>>,
    max_quantity_per_slot: f64,
    guard: AllocationGuard,
}

impl SlottedStorage {
    pub fn new(key: StorageKey, slot_count: usize, max_quantity_per_slot: f64) -> Self {
        Self {
            key,
            slots: vec![None; slot_count],
            max_quantity_per_slot,
            guard: AllocationGuard::new(),
        }
    }

    pub fn slots(&self) -> &[Option<Slot>] {
        &self.slots
    }

    pub fn max_quantity_per_slot(&self) -> f64 {
        self.max_quantity_per_slot
    }

    /// Re-key the storage, e.g. once its owner's id is known.
    pub fn set_key(&mut self, key: StorageKey) {
        self.key = key;
    }

    fn matching(&self, good: &GoodType) -> impl Iterator<Item = (usize, &Slot)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(move |(i, s)| s.as_ref().filter(|s| &s.good == good).map(|s| (i, s)))
    }

    fn empty_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(i, _)| i)
    }

    /// Where `quantity` of `good` would go: emptiest compatible slot first,
    /// then empty slots in index order. Pure; returns `(slot, amount)` pairs.
    fn fill_plan(&self, good: &GoodType, quantity: f64) -> Vec<(usize, f64)> {
        let max = self.max_quantity_per_slot;
        let mut partial: Vec<(usize, f64, f64)> = self
            .matching(good)
            .map(|(i, s)| (i, s.quantity + s.allocated, s.room(max)))
            .filter(|(_, _, room)| *room > EPSILON)
            .collect();
        partial.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        let mut plan = Vec::new();
        let mut remaining = quantity;
        for (i, _, room) in partial {
            if remaining <= EPSILON {
                break;
            }
            let take = room.min(remaining);
            plan.push((i, take));
            remaining -= take;
        }
        for i in self.empty_slots() {
            if remaining <= EPSILON {
                break;
            }
            let take = max.min(remaining);
            plan.push((i, take));
            remaining -= take;
        }
        plan
    }

    /// Where `quantity` of `good` would be taken from: fullest unreserved
    /// stack first. Pure; returns `(slot, amount)` pairs.
    fn drain_plan(&self, good: &GoodType, quantity: f64) -> Vec<(usize, f64)> {
        let mut stacks: Vec<(usize, f64)> = self
            .matching(good)
            .map(|(i, s)| (i, s.free_stock()))
            .filter(|(_, free)| *free > EPSILON)
            .collect();
        stacks.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut plan = Vec::new();
        let mut remaining = quantity;
        for (i, free) in stacks {
            if remaining <= EPSILON {
                break;
            }
            let take = free.min(remaining);
            plan.push((i, take));
            remaining -= take;
        }
        plan
    }

    fn slot_mut(&mut self, i: usize, good: &GoodType) -> &mut Slot {
        self.slots[i].get_or_insert_with(|| Slot {
            good: good.clone(),
            quantity: 0.0,
            allocated: 0.0,
            reserved: 0.0,
        })
    }

    /// Clear the slot if it no longer holds or expects anything.
    fn compact(&mut self, i: usize) {
        let drained = match &mut self.slots[i] {
            Some(slot) => {
                slot.quantity = slot.quantity.max(0.0);
                slot.allocated = slot.allocated.max(0.0);
                slot.reserved = slot.reserved.clamp(0.0, slot.quantity);
                slot.quantity + slot.allocated <= EPSILON
            }
            None => false,
        };
        if drained {
            self.slots[i] = None;
        }
    }
}

impl Storage for SlottedStorage {
    fn key(&self) -> StorageKey {
        self.key
    }

    fn has_room(&self, good: Option<&GoodType>) -> f64 {
        let max = self.max_quantity_per_slot;
        self.slots
            .iter()
            .map(|slot| match (slot, good) {
                (None, _) => max,
                (Some(s), None) => s.room(max),
                (Some(s), Some(g)) if &s.good == g => s.room(max),
                (Some(_), Some(_)) => 0.0,
            })
            .sum()
    }

    fn available(&self, good: &GoodType) -> f64 {
        self.matching(good).map(|(_, s)| s.free_stock()).sum::<f64>().max(0.0)
    }

    fn availables(&self) -> Goods {
        let mut goods = Goods::new();
        for slot in self.slots.iter().flatten() {
            goods.add(&slot.good, slot.free_stock());
        }
        goods
    }

    fn stock(&self) -> Goods {
        let mut goods = Goods::new();
        for slot in self.slots.iter().flatten() {
            goods.add(&slot.good, slot.quantity);
        }
        goods
    }

    fn incoming(&self, good: &GoodType) -> f64 {
        self.matching(good).map(|(_, s)| s.allocated).sum()
    }

    fn add_good(&mut self, good: &GoodType, quantity: f64) -> f64 {
        let plan = self.fill_plan(good, quantity);
        let mut added = 0.0;
        for (i, amount) in plan {
            self.slot_mut(i, good).quantity += amount;
            added += amount;
        }
        added
    }

    fn remove_good(&mut self, good: &GoodType, quantity: f64) -> f64 {
        let plan = self.drain_plan(good, quantity);
        let mut removed = 0.0;
        for (i, amount) in plan {
            self.slot_mut(i, good).quantity -= amount;
            self.compact(i);
            removed += amount;
        }
        if removed + EPSILON < quantity {
            tracing::warn!(
                storage = %self.key,
                %good,
                requested = quantity,
                removed,
                "removed less than requested"
            );
        }
        removed
    }

    fn can_store_all(&self, goods: &Goods) -> bool {
        let max = self.max_quantity_per_slot;
        let mut free_slots = self.empty_slots().count() as f64;
        for (good, quantity) in goods.iter() {
            let partial_room: f64 = self.matching(good).map(|(_, s)| s.room(max)).sum();
            let rest = quantity - partial_room;
            if rest > EPSILON {
                free_slots -= (rest / max - EPSILON).ceil();
                if free_slots < 0.0 {
                    return false;
                }
            }
        }
        true
    }

    fn rendered_goods(&self) -> RenderedGoods {
        let allowed = self.max_quantity_per_slot;
        let slots = self
            .slots
            .iter()
            .map(|slot| match slot {
                Some(s) => RenderedSlot {
                    good: Some(s.good.clone()),
                    present: s.quantity,
                    reserved: s.reserved,
                    allocated: s.allocated,
                    allowed,
                },
                None => RenderedSlot {
                    good: None,
                    present: 0.0,
                    reserved: 0.0,
                    allocated: 0.0,
                    allowed,
                },
            })
            .collect();
        RenderedGoods {
            slots,
            assumed_max_slots: Some(self.slots.len()),
        }
    }

    fn fragmented(&self) -> Option<GoodType> {
        let max = self.max_quantity_per_slot;
        let stock = self.stock();
        stock.good_types().find_map(|good| {
            let loose = self
                .matching(good)
                .filter(|(_, s)| s.quantity + s.allocated < max - EPSILON)
                .filter(|(_, s)| s.reserved < s.quantity - EPSILON)
                .count();
            (loose >= 2).then(|| good.clone())
        })
    }

    fn guard(&self) -> &AllocationGuard {
        &self.guard
    }

    fn guard_mut(&mut self) -> &mut AllocationGuard {
        &mut self.guard
    }

    fn claim_room(&mut self, goods: &Goods) -> Deltas {
        let mut deltas = Deltas::new();
        for (good, quantity) in goods.iter() {
            for (i, amount) in self.fill_plan(good, quantity) {
                self.slot_mut(i, good).allocated += amount;
                deltas.push(Delta {
                    good: good.clone(),
                    slot: Some(i),
                    amount,
                });
            }
        }
        deltas
    }

    fn claim_stock(&mut self, goods: &Goods) -> Deltas {
        let mut deltas = Deltas::new();
        for (good, quantity) in goods.iter() {
            for (i, amount) in self.drain_plan(good, quantity) {
                self.slot_mut(i, good).reserved += amount;
                deltas.push(Delta {
                    good: good.clone(),
                    slot: Some(i),
                    amount: -amount,
                });
            }
        }
        deltas
    }

    fn commit(&mut self, deltas: &[Delta]) {
        for d in deltas {
            let Some(i) = d.slot else { continue };
            let slot = self.slot_mut(i, &d.good);
            if d.amount > 0.0 {
                slot.allocated -= d.amount;
                slot.quantity += d.amount;
            } else {
                slot.reserved += d.amount;
                slot.quantity += d.amount;
            }
            self.compact(i);
        }
    }

    fn release(&mut self, deltas: &[Delta]) {
        for d in deltas {
            let Some(i) = d.slot else { continue };
            let slot = self.slot_mut(i, &d.good);
            if d.amount > 0.0 {
                slot.allocated -= d.amount;
            } else {
                slot.reserved += d.amount;
            }
            self.compact(i);
        }
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SavedSlot {
    good: GoodType,
    quantity: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SlottedSave {
    key: StorageKey,
    max_quantity_per_slot: f64,
    slots: Vec<Option<SavedSlot>>,
}

impl From<SlottedStorage> for SlottedSave {
    fn from(storage: SlottedStorage) -> Self {
        let slots = storage
            .slots
            .iter()
            .map(|slot| {
                slot.as_ref().filter(|s| s.quantity > EPSILON).map(|s| SavedSlot {
                    good: s.good.clone(),
                    quantity: s.quantity,
                })
            })
            .collect();
        Self {
            key: storage.key,
            max_quantity_per_slot: storage.max_quantity_per_slot,
            slots,
        }
    }
}

impl From<SlottedSave> for SlottedStorage {
    fn from(save: SlottedSave) -> Self {
        let slots = save
            .slots
            .into_iter()
            .map(|slot| {
                slot.map(|s| Slot {
                    good: s.good,
                    quantity: s.quantity,
                    allocated: 0.0,
                    reserved: 0.0,
                })
            })
            .collect();
        Self {
            key: save.key,
            slots,
            max_quantity_per_slot: save.max_quantity_per_slot,
            guard: AllocationGuard::new(),
        }
    }
}

impl Serialize for SlottedStorage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        SlottedSave::from(self.clone()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SlottedStorage {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        SlottedSave::deserialize(deserializer).map(SlottedStorage::from)
    }
}
