// Good types and sparse good-quantity maps.
//
// Goods are referenced by content name (`GoodType`, e.g. "wood") rather than
// by object identity, so the storage and plan layers stay agnostic of the
// content catalog in `config.rs`. A `Goods` map is sparse: an absent key
// means zero. Quantities are `f64` because decay and partial progress can
// leave fractional amounts; comparisons against zero go through `EPSILON`.
//
// **Critical constraint: determinism.** `Goods` wraps a `BTreeMap`, so
// iteration order is the lexical order of good names on every platform.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Tolerance for near-zero and near-integer quantity comparisons.
pub const EPSILON: f64 = 1e-6;

/// Name of a good type, as defined by the content catalog.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GoodType(pub String);

impl GoodType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for GoodType {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

impl fmt::Display for GoodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sparse map from good type to quantity. Zero entries are never stored.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Goods(BTreeMap<GoodType, f64>);

impl Goods {
    pub fn new() -> Self {
        Self::default()
    }

    /// Quantity of `good`, zero when absent.
    pub fn get(&self, good: &GoodType) -> f64 {
        self.0.get(good).copied().unwrap_or(0.0)
    }

    /// Set the quantity of `good`. Near-zero quantities remove the entry.
    pub fn set(&mut self, good: GoodType, quantity: f64) {
        if quantity.abs() <= EPSILON {
            self.0.remove(&good);
        } else {
            self.0.insert(good, quantity);
        }
    }

    /// Add `quantity` (may be negative) to `good`.
    pub fn add(&mut self, good: &GoodType, quantity: f64) {
        let total = self.get(good) + quantity;
        self.set(good.clone(), total);
    }

    /// Builder-style insert, convenient for literals in tests and config.
    pub fn with(mut self, good: impl Into<GoodType>, quantity: f64) -> Self {
        let good = good.into();
        self.add(&good, quantity);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GoodType, f64)> {
        self.0.iter().map(|(g, q)| (g, *q))
    }

    pub fn good_types(&self) -> impl Iterator<Item = &GoodType> {
        self.0.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Sum of all quantities.
    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    /// Entry-wise minimum of two maps (absent = zero).
    pub fn min(&self, other: &Goods) -> Goods {
        let mut out = Goods::new();
        for (good, q) in self.iter() {
            out.set(good.clone(), q.min(other.get(good)));
        }
        out
    }

    /// Whether two maps agree entry-wise within `EPSILON`.
    pub fn approx_eq(&self, other: &Goods) -> bool {
        self.iter().all(|(g, q)| (q - other.get(g)).abs() <= EPSILON)
            && other.iter().all(|(g, q)| (q - self.get(g)).abs() <= EPSILON)
    }
}

impl FromIterator<(GoodType, f64)> for Goods {
    fn from_iter<I: IntoIterator<Item = (GoodType, f64)>>(iter: I) -> Self {
        let mut goods = Goods::new();
        for (good, q) in iter {
            goods.add(&good, q);
        }
        goods
    }
}

/// Round `x` to the nearest integer if it is within `EPSILON` of one.
pub fn snap(x: f64) -> f64 {
    let rounded = x.round();
    if (x - rounded).abs() <= EPSILON { rounded } else { x }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_goods_read_as_zero() {
        let goods = Goods::new().with("wood", 3.0);
        assert_eq!(goods.get(&"wood".into()), 3.0);
        assert_eq!(goods.get(&"stone".into()), 0.0);
    }

    #[test]
    fn zero_entries_are_dropped() {
        let mut goods = Goods::new().with("wood", 2.0);
        goods.add(&"wood".into(), -2.0);
        assert!(goods.is_empty());
    }

    #[test]
    fn serializes_as_plain_map() {
        let goods = Goods::new().with("wood", 1.5).with("berries", 2.0);
        let json = serde_json::to_string(&goods).unwrap();
        assert_eq!(json, r#"{"berries":2.0,"wood":1.5}"#);
        let restored: Goods = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, goods);
    }

    #[test]
    fn snap_rounds_only_near_integers() {
        assert_eq!(snap(2.0000000001), 2.0);
        assert_eq!(snap(2.5), 2.5);
    }
}
