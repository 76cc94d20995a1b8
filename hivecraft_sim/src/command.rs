// Commands that mutate simulation state from outside.
//
// All external mutations go through `SimCommand`; the sim is a function
// `(state, commands, dt) -> (new_state, events)`. A command carries the
// `tick` it should apply on and a `SimAction`. Current actions:
// - `SpawnCharacter`: place a new agent on a passable tile.
// - `PlaceAlveolus`: build an alveolus of a catalog kind on an empty tile.
// - `DropFreeGood` / `RemoveFreeGood`: add or remove a free-standing good.
//   Removing one watched by a pickup plan cancels that plan.
// - `SetBufferTarget`: change how much of a good an alveolus pulls in.
// - `Interrupt`: abandon everything an agent is doing and start a frame;
//   also resumes a halted agent.
// - `CancelPlan`: cancel one plan and let the agent's scripts recover.
//
// See also: `sim.rs` for `apply_command()` which dispatches these.
//
// **Critical constraint: determinism.** Commands are the sole external input
// to the sim and are applied in slice order.

use crate::goods::GoodType;
use crate::script::ScriptFrame;
use crate::types::{AlveolusId, AxialCoord, CharacterId, FreeGoodId, PlanId};
use serde::{Deserialize, Serialize};

/// A command targeting a specific simulation tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimCommand {
    pub tick: u64,
    pub action: SimAction,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SimAction {
    SpawnCharacter {
        position: AxialCoord,
    },
    PlaceAlveolus {
        kind: String,
        position: AxialCoord,
    },
    DropFreeGood {
        good: GoodType,
        quantity: f64,
        position: AxialCoord,
    },
    RemoveFreeGood {
        free_good: FreeGoodId,
    },
    SetBufferTarget {
        alveolus: AlveolusId,
        good: GoodType,
        quantity: f64,
    },
    Interrupt {
        character: CharacterId,
        frame: ScriptFrame,
    },
    CancelPlan {
        character: CharacterId,
        plan: PlanId,
    },
}
