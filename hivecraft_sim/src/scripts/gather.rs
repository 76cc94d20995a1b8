// `gather` — fetch a free-standing good for a gatherer alveolus.
//
//   Start -> AtGood -> Picking -> AtHome -> Dropping -> (done)
//
// The agent staffs the gatherer with a work plan for the whole trip and
// claims the free good (`JobClaim::Gather`) so no other agent is sent after
// it. The pickup plan may begin with nothing held if the good was taken in
// the meantime; that ends the trip early. If the free good is removed while
// the pickup plan holds it, the pickup watcher cancels the plan and the
// cancel hook recovers into a cooldown.

use super::{alveolus_position, arrived, carried, cooldown, handling, release_plan, set_claim, walk_frame};
use crate::error::{PlanError, SchedulerError};
use crate::goods::{EPSILON, GoodType, Goods};
use crate::plan::{PlanKind, WorkJob};
use crate::script::{CancelReason, Instruction, Script, ScriptContext, ScriptFrame};
use crate::sim::JobClaim;
use crate::types::{AlveolusId, AxialCoord, FreeGoodId, PlanId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatherPhase {
    Start,
    AtGood,
    Picking,
    AtHome,
    Dropping,
    Cool,
    Cooled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GatherState {
    pub gatherer: AlveolusId,
    pub free_good: FreeGoodId,
    pub phase: GatherPhase,
    #[serde(default)]
    pub good: Option<GoodType>,
    #[serde(default)]
    pub target: Option<AxialCoord>,
    #[serde(default)]
    pub work_plan: Option<PlanId>,
    /// The pickup plan, then the drop plan.
    #[serde(default)]
    pub plan: Option<PlanId>,
}

impl GatherState {
    pub fn new(gatherer: AlveolusId, free_good: FreeGoodId) -> Self {
        Self {
            gatherer,
            free_good,
            phase: GatherPhase::Start,
            good: None,
            target: None,
            work_plan: None,
            plan: None,
        }
    }
}

pub struct GatherScript;

impl GatherScript {
    fn step(&self, ctx: &mut ScriptContext<'_>, state: &mut GatherState) -> Result<Instruction, SchedulerError> {
        match state.phase {
            GatherPhase::Start => {
                let Some((good, target)) = ctx.sim.free_goods.get(&state.free_good).map(|f| (f.good.clone(), f.position))
                else {
                    return Ok(self.fail(ctx, state, "free good is gone"));
                };
                match ctx.sim.begin_plan(ctx.agent, PlanKind::work(WorkJob::Gather, state.gatherer, 1.0), ctx.events) {
                    Ok((plan, _)) => state.work_plan = Some(plan),
                    Err(err @ PlanError::Occupied { .. }) => return Ok(self.fail(ctx, state, &err.to_string())),
                    Err(err) => return Err(err.into()),
                }
                set_claim(
                    ctx,
                    Some(JobClaim::Gather {
                        free_good: state.free_good,
                    }),
                );
                state.good = Some(good);
                state.target = Some(target);
                state.phase = GatherPhase::AtGood;
                Ok(Instruction::Call(walk_frame(target, true)?))
            }
            GatherPhase::AtGood => {
                let (Some(good), Some(target)) = (state.good.clone(), state.target) else {
                    return Ok(self.fail(ctx, state, "lost track of the good"));
                };
                if !arrived(ctx, target, true)? {
                    return Ok(self.fail(ctx, state, "free good unreachable"));
                }
                let plan = match ctx.sim.begin_plan(ctx.agent, PlanKind::pickup(good, target), ctx.events) {
                    Ok((plan, _)) => plan,
                    Err(PlanError::Allocation(err)) => return Ok(self.fail(ctx, state, err.reason())),
                    Err(err) => return Err(err.into()),
                };
                let claimed = matches!(
                    ctx.sim.plan(ctx.agent, plan).map(|p| &p.kind),
                    Some(PlanKind::Pickup(p)) if p.free_good.is_some()
                );
                if !claimed {
                    ctx.sim.conclude_plan(ctx.agent, plan, ctx.events)?;
                    return Ok(self.fail(ctx, state, "nothing left to pick up"));
                }
                state.plan = Some(plan);
                state.phase = GatherPhase::Picking;
                Ok(Instruction::Step(handling(ctx, "pick up")))
            }
            GatherPhase::Picking => {
                if let Some(plan) = state.plan.take() {
                    ctx.sim.conclude_plan(ctx.agent, plan, ctx.events)?;
                }
                set_claim(ctx, None);
                let Some(home) = alveolus_position(ctx, state.gatherer) else {
                    return Ok(self.fail(ctx, state, "gatherer is gone"));
                };
                state.phase = GatherPhase::AtHome;
                Ok(Instruction::Call(walk_frame(home, false)?))
            }
            GatherPhase::AtHome => {
                let (Some(home), Some(good)) = (alveolus_position(ctx, state.gatherer), state.good.clone()) else {
                    return Ok(self.fail(ctx, state, "gatherer is gone"));
                };
                if !arrived(ctx, home, false)? {
                    return Ok(self.fail(ctx, state, "gatherer unreachable"));
                }
                let quantity = carried(ctx, &good);
                if quantity <= EPSILON {
                    return Ok(self.fail(ctx, state, "nothing carried"));
                }
                let goods = Goods::new().with(good, quantity);
                match ctx.sim.begin_plan(ctx.agent, PlanKind::drop(goods, home), ctx.events) {
                    Ok((plan, _)) => state.plan = Some(plan),
                    Err(PlanError::Allocation(err)) => return Ok(self.fail(ctx, state, err.reason())),
                    Err(err) => return Err(err.into()),
                }
                state.phase = GatherPhase::Dropping;
                Ok(Instruction::Step(handling(ctx, "unload")))
            }
            GatherPhase::Dropping => {
                if let Some(plan) = state.plan.take() {
                    ctx.sim.conclude_plan(ctx.agent, plan, ctx.events)?;
                }
                if let Some(plan) = state.work_plan.take() {
                    ctx.sim.conclude_plan(ctx.agent, plan, ctx.events)?;
                }
                Ok(Instruction::Return(None))
            }
            GatherPhase::Cool => Ok(self.fail(ctx, state, "plan cancelled")),
            GatherPhase::Cooled => Ok(Instruction::Return(None)),
        }
    }

    fn fail(&self, ctx: &mut ScriptContext<'_>, state: &mut GatherState, why: &str) -> Instruction {
        tracing::debug!(character = %ctx.agent, free_good = %state.free_good, why, "gather abandoned");
        release(ctx, state);
        state.phase = GatherPhase::Cooled;
        Instruction::Step(cooldown(ctx))
    }
}

fn release(ctx: &mut ScriptContext<'_>, state: &mut GatherState) {
    release_plan(ctx, state.plan.take());
    release_plan(ctx, state.work_plan.take());
    set_claim(ctx, None);
}

impl Script for GatherScript {
    fn resume(&self, ctx: &mut ScriptContext<'_>, frame: &mut ScriptFrame) -> Result<Instruction, SchedulerError> {
        let mut state: GatherState = frame.state()?;
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
        let mut state: GatherState = frame.state()?;
        release(ctx, &mut state);
        match reason {
            CancelReason::Abandon => Ok(None),
            CancelReason::Plan(_) => {
                state.phase = GatherPhase::Cool;
                let mut recovered = frame.clone();
                recovered.set_state(&state)?;
                Ok(Some(recovered.state))
            }
        }
    }
}
