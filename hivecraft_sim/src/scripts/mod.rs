// Built-in scripts and the helpers they share.
//
// | name      | does                                                     |
// |-----------|----------------------------------------------------------|
// | `walk`    | nested frame: find a path and walk it as one multi-move  |
// | `idle`    | hold an idle plan for a while                            |
// | `haul`    | walk to a provider, grab, walk to a demander, drop       |
// | `deliver` | `haul` starting from goods already carried               |
// | `work`    | staff a harvest/transform workplace for one cycle        |
// | `gather`  | walk to a free good, pick it up, bring it home           |
//
// Every script is a small state machine over a serde state struct whose
// `phase` says what the frame is waiting for. Failures that the world can
// cause (a path vanished, a storage filled up) end in a short cooldown step
// rather than an error; only defects propagate as `SchedulerError`.
//
// See also: `script.rs` for the frame model, `jobs.rs` which builds these
// frames with the constructors below.

mod gather;
mod haul;
mod idle;
mod walk;
mod work;

pub use gather::{GatherPhase, GatherScript, GatherState};
pub use haul::{HaulPhase, HaulScript, HaulState};
pub use idle::{IdleScript, IdleState};
pub use walk::{WalkScript, WalkState};
pub use work::{WorkPhase, WorkScript, WorkState};

use crate::error::{PlanError, SchedulerError};
use crate::goods::GoodType;
use crate::script::{ScriptContext, ScriptFrame, ScriptRegistry};
use crate::sim::JobClaim;
use crate::step::Step;
use crate::storage::Storage;
use crate::types::{AlveolusId, AxialCoord, FreeGoodId, PlanId};
use std::sync::Arc;

pub const WALK: &str = "walk";
pub const IDLE: &str = "idle";
pub const HAUL: &str = "haul";
pub const DELIVER: &str = "deliver";
pub const WORK: &str = "work";
pub const GATHER: &str = "gather";

const MAIN: &str = "main";

pub fn register_builtin(registry: &mut ScriptRegistry) {
    registry.register(WALK, Arc::new(WalkScript));
    registry.register(IDLE, Arc::new(IdleScript));
    registry.register(HAUL, Arc::new(HaulScript));
    registry.register(DELIVER, Arc::new(HaulScript));
    registry.register(WORK, Arc::new(WorkScript));
    registry.register(GATHER, Arc::new(GatherScript));
}

// ---------------------------------------------------------------------------
// Frame constructors
// ---------------------------------------------------------------------------

pub fn walk_frame(goal: AxialCoord, punctual: bool) -> Result<ScriptFrame, SchedulerError> {
    ScriptFrame::new(
        WALK,
        MAIN,
        &WalkState {
            goal,
            punctual,
            started: false,
        },
    )
}

pub fn idle_frame(duration: f64) -> Result<ScriptFrame, SchedulerError> {
    ScriptFrame::new(IDLE, MAIN, &IdleState { duration, plan: None })
}

pub fn haul_frame(
    from: AlveolusId,
    to: AlveolusId,
    good: GoodType,
    quantity: f64,
) -> Result<ScriptFrame, SchedulerError> {
    ScriptFrame::new(HAUL, MAIN, &HaulState::new(Some(from), to, good, quantity))
}

/// Haul goods the agent already carries to `to`.
pub fn deliver_frame(to: AlveolusId, good: GoodType, quantity: f64) -> Result<ScriptFrame, SchedulerError> {
    ScriptFrame::new(DELIVER, MAIN, &HaulState::new(None, to, good, quantity))
}

pub fn work_frame(alveolus: AlveolusId) -> Result<ScriptFrame, SchedulerError> {
    ScriptFrame::new(WORK, MAIN, &WorkState::new(alveolus))
}

pub fn gather_frame(gatherer: AlveolusId, free_good: FreeGoodId) -> Result<ScriptFrame, SchedulerError> {
    ScriptFrame::new(GATHER, MAIN, &GatherState::new(gatherer, free_good))
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

pub(crate) fn position(ctx: &ScriptContext<'_>) -> Result<AxialCoord, SchedulerError> {
    ctx.sim
        .character(ctx.agent)
        .map(|c| c.position)
        .ok_or(SchedulerError::Plan(PlanError::UnknownAgent(ctx.agent)))
}

/// Whether the agent stands on `goal` (punctual) or on or next to it.
pub(crate) fn arrived(ctx: &ScriptContext<'_>, goal: AxialCoord, punctual: bool) -> Result<bool, SchedulerError> {
    let here = position(ctx)?;
    Ok(here == goal || (!punctual && here.is_adjacent(goal)))
}

/// Quantity of `good` in the agent's vehicle.
pub(crate) fn carried(ctx: &ScriptContext<'_>, good: &GoodType) -> f64 {
    ctx.sim
        .character(ctx.agent)
        .map(|c| c.vehicle.stock().get(good))
        .unwrap_or(0.0)
}

pub(crate) fn alveolus_position(ctx: &ScriptContext<'_>, id: AlveolusId) -> Option<AxialCoord> {
    ctx.sim.alveoli.get(&id).map(|a| a.position)
}

pub(crate) fn set_claim(ctx: &mut ScriptContext<'_>, claim: Option<JobClaim>) {
    if let Some(character) = ctx.sim.characters.get_mut(&ctx.agent) {
        character.claim = claim;
    }
}

/// Cancel `plan` if the agent still holds it.
pub(crate) fn release_plan(ctx: &mut ScriptContext<'_>, plan: Option<PlanId>) {
    let Some(plan) = plan else {
        return;
    };
    match ctx.sim.cancel_plan(ctx.agent, plan, ctx.events) {
        Ok(()) | Err(PlanError::UnknownPlan { .. }) => {}
        Err(err) => tracing::warn!(character = %ctx.agent, %plan, %err, "failed to release plan"),
    }
}

pub(crate) fn cooldown(ctx: &ScriptContext<'_>) -> Step {
    Step::wait("cooldown", ctx.sim.config.character.cooldown_time)
}

pub(crate) fn handling(ctx: &ScriptContext<'_>, label: &str) -> Step {
    Step::wait(label, ctx.sim.config.character.handling_time)
}
