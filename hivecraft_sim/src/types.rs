// Core types shared across the simulation.
//
// Defines hex-grid coordinates (`AxialCoord`), compact entity identifiers,
// and `StorageKey`, the handle an allocation token uses to find the storage
// it was drawn against. All types derive `Serialize` and `Deserialize` for
// save/load.
//
// **Critical constraint: determinism.** Entity IDs are sequential integers
// assigned by `SimState` in command order. Every ID type is `Ord` so it can
// key a `BTreeMap`.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Spatial types
// ---------------------------------------------------------------------------

/// A tile position on the hex board, in axial coordinates.
///
/// The implicit third cube coordinate is `s = -q - r`. Neighbors differ by
/// one of the six `HEX_DIRECTIONS` offsets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AxialCoord {
    pub q: i32,
    pub r: i32,
}

/// The six axial neighbor offsets, counter-clockwise starting east.
pub const HEX_DIRECTIONS: [(i32, i32); 6] = [(1, 0), (1, -1), (0, -1), (-1, 0), (-1, 1), (0, 1)];

impl AxialCoord {
    pub const fn new(q: i32, r: i32) -> Self {
        Self { q, r }
    }

    /// The implicit cube coordinate `s`.
    pub const fn s(self) -> i32 {
        -self.q - self.r
    }

    /// Hex grid distance: the max of the three cube-axis differences.
    /// Symmetric by construction.
    pub fn hex_distance(self, other: Self) -> u32 {
        let dq = (self.q - other.q).unsigned_abs();
        let dr = (self.r - other.r).unsigned_abs();
        let ds = (self.s() - other.s()).unsigned_abs();
        dq.max(dr).max(ds)
    }

    /// All six adjacent tiles, in `HEX_DIRECTIONS` order.
    pub fn neighbors(self) -> [AxialCoord; 6] {
        HEX_DIRECTIONS.map(|(dq, dr)| AxialCoord::new(self.q + dq, self.r + dr))
    }

    pub fn is_adjacent(self, other: Self) -> bool {
        self.hex_distance(other) == 1
    }
}

impl fmt::Display for AxialCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}, {}>", self.q, self.r)
    }
}

// ---------------------------------------------------------------------------
// Entity IDs
// ---------------------------------------------------------------------------

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

entity_id!(/// Unique identifier for a character (an autonomous agent).
CharacterId);
entity_id!(/// Unique identifier for an alveolus (a workplace occupying a tile).
AlveolusId);
entity_id!(/// Unique identifier for a free-standing good lying on a tile.
FreeGoodId);
entity_id!(/// Identifier of a plan, unique per character.
PlanId);

/// Identifies the storage an allocation token was drawn against.
///
/// Storages are owned by economic entities, so the key names the owner. The
/// `Detached` variant is for storages that live outside a `SimState`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StorageKey {
    /// The storage of an alveolus.
    Alveolus(AlveolusId),
    /// A character's carried inventory.
    Vehicle(CharacterId),
    /// A storage not registered with any simulation.
    Detached(u32),
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKey::Alveolus(id) => write!(f, "storage of {id}"),
            StorageKey::Vehicle(id) => write!(f, "vehicle of {id}"),
            StorageKey::Detached(n) => write!(f, "detached storage #{n}"),
        }
    }
}
