// Specific storage — a per-good capacity map with unlimited stacking.
//
// Each good type named in `capacities` gets one bucket that can hold up to
// its capacity; goods not named have no room at all. There is no slot
// quantization, so `can_store_all` is a plain per-good room check and the
// storage is never fragmented.
//
// Persisted form (`SpecificSave`) keeps capacities and present stock only.

use super::{AllocationGuard, Delta, Deltas, RenderedGoods, RenderedSlot, Storage};
use crate::goods::{EPSILON, GoodType, Goods};
use crate::types::StorageKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq)]
struct Bucket {
    quantity: f64,
    allocated: f64,
    reserved: f64,
}

#[derive(Clone, Debug)]
pub struct SpecificStorage {
    key: StorageKey,
    capacities: Goods,
    buckets: BTreeMap<GoodType, Bucket>,
    guard: AllocationGuard,
}

impl SpecificStorage {
    pub fn new(key: StorageKey, capacities: Goods) -> Self {
        Self {
            key,
            capacities,
            buckets: BTreeMap::new(),
            guard: AllocationGuard::new(),
        }
    }

    pub fn capacities(&self) -> &Goods {
        &self.capacities
    }

    pub fn set_key(&mut self, key: StorageKey) {
        self.key = key;
    }

    fn room(&self, good: &GoodType) -> f64 {
        let used = self
            .buckets
            .get(good)
            .map_or(0.0, |b| b.quantity + b.allocated);
        (self.capacities.get(good) - used).max(0.0)
    }

    fn free_stock(&self, good: &GoodType) -> f64 {
        self.buckets
            .get(good)
            .map_or(0.0, |b| (b.quantity - b.reserved).max(0.0))
    }

    fn bucket_mut(&mut self, good: &GoodType) -> &mut Bucket {
        self.buckets.entry(good.clone()).or_default()
    }

    fn tidy(&mut self, good: &GoodType) {
        let drained = match self.buckets.get_mut(good) {
            Some(b) => {
                b.quantity = b.quantity.max(0.0);
                b.allocated = b.allocated.max(0.0);
                b.reserved = b.reserved.clamp(0.0, b.quantity);
                b.quantity + b.allocated <= EPSILON
            }
            None => false,
        };
        if drained {
            self.buckets.remove(good);
        }
    }
}

impl Storage for SpecificStorage {
    fn key(&self) -> StorageKey {
        self.key
    }

    fn has_room(&self, good: Option<&GoodType>) -> f64 {
        match good {
            Some(g) => self.room(g),
            None => self.capacities.good_types().map(|g| self.room(g)).sum(),
        }
    }

    fn available(&self, good: &GoodType) -> f64 {
        self.free_stock(good)
    }

    fn availables(&self) -> Goods {
        self.buckets
            .keys()
            .map(|g| (g.clone(), self.free_stock(g)))
            .collect()
    }

    fn stock(&self) -> Goods {
        self.buckets
            .iter()
            .map(|(g, b)| (g.clone(), b.quantity))
            .collect()
    }

    fn incoming(&self, good: &GoodType) -> f64 {
        self.buckets.get(good).map_or(0.0, |b| b.allocated)
    }

    fn add_good(&mut self, good: &GoodType, quantity: f64) -> f64 {
        let added = quantity.min(self.room(good)).max(0.0);
        if added > 0.0 {
            self.bucket_mut(good).quantity += added;
        }
        added
    }

    fn remove_good(&mut self, good: &GoodType, quantity: f64) -> f64 {
        let removed = quantity.min(self.free_stock(good)).max(0.0);
        if removed > 0.0 {
            self.bucket_mut(good).quantity -= removed;
            self.tidy(good);
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
        goods
            .iter()
            .all(|(good, quantity)| quantity <= self.room(good) + EPSILON)
    }

    fn rendered_goods(&self) -> RenderedGoods {
        let slots = self
            .capacities
            .iter()
            .map(|(good, allowed)| {
                let bucket = self.buckets.get(good).cloned().unwrap_or_default();
                RenderedSlot {
                    good: Some(good.clone()),
                    present: bucket.quantity,
                    reserved: bucket.reserved,
                    allocated: bucket.allocated,
                    allowed,
                }
            })
            .collect();
        RenderedGoods {
            slots,
            assumed_max_slots: None,
        }
    }

    fn fragmented(&self) -> Option<GoodType> {
        None
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
            let amount = quantity.min(self.room(good));
            if amount > EPSILON {
                self.bucket_mut(good).allocated += amount;
                deltas.push(Delta {
                    good: good.clone(),
                    slot: None,
                    amount,
                });
            }
        }
        deltas
    }

    fn claim_stock(&mut self, goods: &Goods) -> Deltas {
        let mut deltas = Deltas::new();
        for (good, quantity) in goods.iter() {
            let amount = quantity.min(self.free_stock(good));
            if amount > EPSILON {
                self.bucket_mut(good).reserved += amount;
                deltas.push(Delta {
                    good: good.clone(),
                    slot: None,
                    amount: -amount,
                });
            }
        }
        deltas
    }

    fn commit(&mut self, deltas: &[Delta]) {
        for d in deltas {
            let bucket = self.bucket_mut(&d.good);
            if d.amount > 0.0 {
                bucket.allocated -= d.amount;
                bucket.quantity += d.amount;
            } else {
                bucket.reserved += d.amount;
                bucket.quantity += d.amount;
            }
            self.tidy(&d.good);
        }
    }

    fn release(&mut self, deltas: &[Delta]) {
        for d in deltas {
            let bucket = self.bucket_mut(&d.good);
            if d.amount > 0.0 {
                bucket.allocated -= d.amount;
            } else {
                bucket.reserved += d.amount;
            }
            self.tidy(&d.good);
        }
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SpecificSave {
    key: StorageKey,
    capacities: Goods,
    stock: Goods,
}

impl Serialize for SpecificStorage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        SpecificSave {
            key: self.key,
            capacities: self.capacities.clone(),
            stock: self.stock(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SpecificStorage {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let save = SpecificSave::deserialize(deserializer)?;
        let buckets = save
            .stock
            .iter()
            .map(|(g, q)| {
                (
                    g.clone(),
                    Bucket {
                        quantity: q,
                        ..Bucket::default()
                    },
                )
            })
            .collect();
        Ok(Self {
            key: save.key,
            capacities: save.capacities,
            buckets,
            guard: AllocationGuard::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AllocationError;

    fn wood() -> GoodType {
        GoodType::from("wood")
    }

    fn storage() -> SpecificStorage {
        SpecificStorage::new(
            StorageKey::Detached(0),
            Goods::new().with("wood", 10.0).with("stone", 5.0),
        )
    }

    #[test]
    fn allocate_then_fulfill_creates_stock() {
        let mut s = storage();
        let mut token = s.allocate(&Goods::new().with("wood", 4.0), "x").unwrap();
        assert_eq!(s.stock().get(&wood()), 0.0, "pending allocation is not stock");
        assert_eq!(s.has_room(Some(&wood())), 6.0);
        s.fulfill(&mut token);
        assert_eq!(s.stock().get(&wood()), 4.0);
        assert_eq!(s.available(&wood()), 4.0);
    }

    #[test]
    fn reserve_blocks_availability_not_stock() {
        let mut s = storage();
        s.add_good(&wood(), 10.0);
        let mut token = s.reserve(&Goods::new().with("wood", 3.0), "x").unwrap();
        assert_eq!(s.available(&wood()), 7.0);
        assert_eq!(s.stock().get(&wood()), 10.0);
        s.fulfill(&mut token);
        assert_eq!(s.stock().get(&wood()), 7.0);
    }

    #[test]
    fn unknown_goods_have_no_room() {
        let mut s = storage();
        assert_eq!(s.has_room(Some(&"berries".into())), 0.0);
        assert_eq!(s.add_good(&"berries".into(), 2.0), 0.0);
        let err = s.allocate(&Goods::new().with("berries", 1.0), "x").unwrap_err();
        assert!(matches!(err, AllocationError::Nothing { .. }));
    }

    #[test]
    fn saturated_storage_rejects_and_stays_unchanged() {
        let mut s = storage();
        s.add_good(&wood(), 10.0);
        let before = serde_json::to_string(&s).unwrap();
        assert!(s.allocate(&Goods::new().with("wood", 1.0), "x").is_err());
        assert_eq!(serde_json::to_string(&s).unwrap(), before);
    }

    #[test]
    fn has_room_without_type_sums_capacities() {
        let mut s = storage();
        s.add_good(&wood(), 4.0);
        assert_eq!(s.has_room(None), 11.0);
    }

    #[test]
    fn can_store_all_is_per_good() {
        let s = storage();
        assert!(s.can_store_all(&Goods::new().with("wood", 10.0).with("stone", 5.0)));
        assert!(!s.can_store_all(&Goods::new().with("stone", 6.0)));
    }

    #[test]
    fn cancel_restores_everything() {
        let mut s = storage();
        s.add_good(&wood(), 5.0);
        let before = (s.stock(), s.availables(), s.has_room(None));
        let mut a = s.allocate(&Goods::new().with("wood", 5.0).with("stone", 2.0), "in").unwrap();
        let mut r = s.reserve(&Goods::new().with("wood", 2.0), "out").unwrap();
        s.cancel(&mut a);
        s.cancel(&mut r);
        assert_eq!((s.stock(), s.availables(), s.has_room(None)), before);
        assert!(!s.has_pending());
    }

    #[test]
    fn rendered_goods_lists_every_capacity() {
        let mut s = storage();
        s.add_good(&wood(), 2.0);
        let rendered = s.rendered_goods();
        assert_eq!(rendered.assumed_max_slots, None);
        assert_eq!(rendered.slots.len(), 2);
        let wood_slot = rendered.slots.iter().find(|s| s.good == Some(wood())).unwrap();
        assert_eq!(wood_slot.present, 2.0);
        assert_eq!(wood_slot.allowed, 10.0);
    }
}
