// `haul` / `deliver` — move goods between two alveoli.
//
// Phases, each naming what the frame waits for on its next resume:
//
//   Start -> AtSource -> Loading -> AtDestination -> Unloading -> (done)
//
// `deliver` frames start with `from: None` and skip straight to the
// destination. Loading concludes the grab before the walk, so the goods
// travel in the vehicle as real stock and no allocation spans the walk.
//
// The agent's `JobClaim::Haul` is set for the whole job so job discovery
// does not over-commit the two storages, and cleared on every exit.
//
// Anything the world can break (no path, nothing left to grab, no room
// left to drop) ends in `Cool`: a cooldown step, then return. A cancelled
// plan lands in the same place through the cancel hook.

use super::{alveolus_position, arrived, carried, cooldown, handling, release_plan, set_claim, walk_frame};
use crate::error::{PlanError, SchedulerError};
use crate::goods::{EPSILON, GoodType, Goods};
use crate::plan::PlanKind;
use crate::script::{CancelReason, Instruction, Script, ScriptContext, ScriptFrame};
use crate::sim::JobClaim;
use crate::types::{AlveolusId, PlanId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaulPhase {
    Start,
    AtSource,
    Loading,
    AtDestination,
    Unloading,
    Cool,
    Cooled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HaulState {
    /// Source alveolus; `None` once the goods are in the vehicle.
    pub from: Option<AlveolusId>,
    pub to: AlveolusId,
    pub good: GoodType,
    pub quantity: f64,
    pub phase: HaulPhase,
    #[serde(default)]
    pub plan: Option<PlanId>,
}

impl HaulState {
    pub fn new(from: Option<AlveolusId>, to: AlveolusId, good: GoodType, quantity: f64) -> Self {
        Self {
            from,
            to,
            good,
            quantity,
            phase: HaulPhase::Start,
            plan: None,
        }
    }

    fn claim(&self) -> JobClaim {
        JobClaim::Haul {
            from: self.from,
            to: self.to,
            good: self.good.clone(),
            quantity: self.quantity,
        }
    }

    fn goods(&self) -> Goods {
        Goods::new().with(self.good.clone(), self.quantity)
    }
}

pub struct HaulScript;

impl HaulScript {
    fn step(&self, ctx: &mut ScriptContext<'_>, state: &mut HaulState) -> Result<Instruction, SchedulerError> {
        match state.phase {
            HaulPhase::Start => {
                set_claim(ctx, Some(state.claim()));
                let (next, target) = match state.from {
                    Some(from) => (HaulPhase::AtSource, from),
                    None => (HaulPhase::AtDestination, state.to),
                };
                let Some(coord) = alveolus_position(ctx, target) else {
                    return Ok(self.fail(ctx, state, "alveolus is gone"));
                };
                state.phase = next;
                Ok(Instruction::Call(walk_frame(coord, false)?))
            }
            HaulPhase::AtSource => {
                let Some(coord) = state.from.and_then(|from| alveolus_position(ctx, from)) else {
                    return Ok(self.fail(ctx, state, "source is gone"));
                };
                if !arrived(ctx, coord, false)? {
                    return Ok(self.fail(ctx, state, "source unreachable"));
                }
                match ctx.sim.begin_plan(ctx.agent, PlanKind::grab(state.goods(), coord), ctx.events) {
                    Ok((plan, _)) => {
                        state.plan = Some(plan);
                        state.phase = HaulPhase::Loading;
                        Ok(Instruction::Step(handling(ctx, "load")))
                    }
                    Err(PlanError::Allocation(err)) => Ok(self.fail(ctx, state, err.reason())),
                    Err(err) => Err(err.into()),
                }
            }
            HaulPhase::Loading => {
                if let Some(plan) = state.plan.take() {
                    ctx.sim.conclude_plan(ctx.agent, plan, ctx.events)?;
                }
                let carried = carried(ctx, &state.good);
                if carried <= EPSILON {
                    return Ok(self.fail(ctx, state, "nothing loaded"));
                }
                state.quantity = carried;
                state.from = None;
                set_claim(ctx, Some(state.claim()));
                let Some(coord) = alveolus_position(ctx, state.to) else {
                    return Ok(self.fail(ctx, state, "destination is gone"));
                };
                state.phase = HaulPhase::AtDestination;
                Ok(Instruction::Call(walk_frame(coord, false)?))
            }
            HaulPhase::AtDestination => {
                let Some(coord) = alveolus_position(ctx, state.to) else {
                    return Ok(self.fail(ctx, state, "destination is gone"));
                };
                if !arrived(ctx, coord, false)? {
                    return Ok(self.fail(ctx, state, "destination unreachable"));
                }
                match ctx.sim.begin_plan(ctx.agent, PlanKind::drop(state.goods(), coord), ctx.events) {
                    Ok((plan, _)) => {
                        state.plan = Some(plan);
                        state.phase = HaulPhase::Unloading;
                        Ok(Instruction::Step(handling(ctx, "unload")))
                    }
                    Err(PlanError::Allocation(err)) => Ok(self.fail(ctx, state, err.reason())),
                    Err(err) => Err(err.into()),
                }
            }
            HaulPhase::Unloading => {
                if let Some(plan) = state.plan.take() {
                    ctx.sim.conclude_plan(ctx.agent, plan, ctx.events)?;
                }
                set_claim(ctx, None);
                Ok(Instruction::Return(None))
            }
            HaulPhase::Cool => Ok(self.fail(ctx, state, "plan cancelled")),
            HaulPhase::Cooled => Ok(Instruction::Return(None)),
        }
    }

    fn fail(&self, ctx: &mut ScriptContext<'_>, state: &mut HaulState, why: &str) -> Instruction {
        tracing::debug!(character = %ctx.agent, to = %state.to, good = %state.good, why, "haul abandoned");
        release_plan(ctx, state.plan.take());
        set_claim(ctx, None);
        state.phase = HaulPhase::Cooled;
        Instruction::Step(cooldown(ctx))
    }
}

impl Script for HaulScript {
    fn resume(&self, ctx: &mut ScriptContext<'_>, frame: &mut ScriptFrame) -> Result<Instruction, SchedulerError> {
        let mut state: HaulState = frame.state()?;
        let instruction = self.step(ctx, &mut state)?;
        frame.set_state(&state)?;
        Ok(instruction)
    }

    fn cancel(
        &self,
        ctx: &mut ScriptContext<'_>,
        frame: &ScriptFrame,
        reason: CancelReason,
    ) -> Result<Option<serde_json::Value>, SchedulerError> {
        let mut state: HaulState = frame.state()?;
        release_plan(ctx, state.plan.take());
        match reason {
            CancelReason::Abandon => {
                set_claim(ctx, None);
                Ok(None)
            }
            CancelReason::Plan(_) => {
                state.phase = HaulPhase::Cool;
                let mut recovered = frame.clone();
                recovered.set_state(&state)?;
                Ok(Some(recovered.state))
            }
        }
    }
}
