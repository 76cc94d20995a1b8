// `idle` — wait in place under an idle plan.

use super::release_plan;
use crate::error::SchedulerError;
use crate::plan::PlanKind;
use crate::script::{CancelReason, Instruction, Script, ScriptContext, ScriptFrame};
use crate::step::Step;
use crate::types::PlanId;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdleState {
    pub duration: f64,
    #[serde(default)]
    pub plan: Option<PlanId>,
}

pub struct IdleScript;

impl Script for IdleScript {
    fn resume(&self, ctx: &mut ScriptContext<'_>, frame: &mut ScriptFrame) -> Result<Instruction, SchedulerError> {
        let mut state: IdleState = frame.state()?;
        match state.plan {
            None => {
                let (plan, step) = ctx.sim.begin_plan(ctx.agent, PlanKind::idle(state.duration), ctx.events)?;
                state.plan = Some(plan);
                frame.set_state(&state)?;
                Ok(Instruction::Step(
                    step.unwrap_or_else(|| Step::wait("idle", state.duration)),
                ))
            }
            Some(plan) => {
                ctx.sim.conclude_plan(ctx.agent, plan, ctx.events)?;
                Ok(Instruction::Return(None))
            }
        }
    }

    fn cancel(
        &self,
        ctx: &mut ScriptContext<'_>,
        frame: &ScriptFrame,
        _reason: CancelReason,
    ) -> Result<Option<serde_json::Value>, SchedulerError> {
        let state: IdleState = frame.state()?;
        release_plan(ctx, state.plan);
        Ok(None)
    }
}
