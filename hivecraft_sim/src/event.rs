// Player-visible narrative events emitted by the simulation.
//
// Every `SimState::step` returns the events it produced, in the order they
// happened. Plan events carry the plan kind name (`"transfer"`, `"pickup"`,
// `"work"`, `"idle"`) so a log can be read without looking the plan up.
//
// See also: `sim.rs` and `plan.rs`, which emit these.
//
// **Critical constraint: determinism.** Events are pure output; nothing in
// the sim reads them back.

use crate::goods::GoodType;
use crate::types::{AlveolusId, AxialCoord, CharacterId, FreeGoodId, PlanId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimEvent {
    pub tick: u64,
    pub kind: SimEventKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SimEventKind {
    CharacterSpawned {
        character: CharacterId,
        position: AxialCoord,
    },
    AlveolusPlaced {
        alveolus: AlveolusId,
        kind: String,
        position: AxialCoord,
    },
    PlanBegun {
        character: CharacterId,
        plan: PlanId,
        kind: String,
    },
    PlanConcluded {
        character: CharacterId,
        plan: PlanId,
        kind: String,
    },
    PlanCancelled {
        character: CharacterId,
        plan: PlanId,
        kind: String,
    },
    /// A scheduling defect stopped this character; others carry on.
    CharacterHalted {
        character: CharacterId,
        reason: String,
    },
    FreeGoodDropped {
        free_good: FreeGoodId,
        good: GoodType,
        quantity: f64,
        position: AxialCoord,
    },
    FreeGoodRemoved {
        free_good: FreeGoodId,
    },
}
