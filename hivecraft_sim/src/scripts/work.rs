// `work` — staff a harvest or transform workplace for one cycle.
//
//   Start -> Arrived -> Working -> (done)
//
// The work plan links worker and workplace before the walk, so no second
// agent is sent to the same alveolus. Storage allocations only happen on
// arrival, through `begin_work_cycle`, and are fulfilled when the work plan
// concludes after the work step.

use super::{alveolus_position, arrived, cooldown, release_plan, walk_frame};
use crate::config::ActionType;
use crate::error::{PlanError, SchedulerError};
use crate::plan::{PlanKind, WorkJob};
use crate::script::{CancelReason, Instruction, Script, ScriptContext, ScriptFrame};
use crate::step::Step;
use crate::types::{AlveolusId, PlanId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkPhase {
    Start,
    Arrived,
    Working,
    Cool,
    Cooled,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkState {
    pub alveolus: AlveolusId,
    pub phase: WorkPhase,
    #[serde(default)]
    pub plan: Option<PlanId>,
}

impl WorkState {
    pub fn new(alveolus: AlveolusId) -> Self {
        Self {
            alveolus,
            phase: WorkPhase::Start,
            plan: None,
        }
    }
}

pub struct WorkScript;

impl WorkScript {
    fn step(&self, ctx: &mut ScriptContext<'_>, state: &mut WorkState) -> Result<Instruction, SchedulerError> {
        match state.phase {
            WorkPhase::Start => {
                let Some(coord) = alveolus_position(ctx, state.alveolus) else {
                    return Ok(self.fail(ctx, state, "workplace is gone"));
                };
                let job = match job_of(ctx, state.alveolus) {
                    Some(job) => job,
                    None => return Ok(self.fail(ctx, state, "nothing to staff")),
                };
                match ctx.sim.begin_plan(ctx.agent, PlanKind::work(job, state.alveolus, 1.0), ctx.events) {
                    Ok((plan, _)) => state.plan = Some(plan),
                    Err(err @ PlanError::Occupied { .. }) => return Ok(self.fail(ctx, state, &err.to_string())),
                    Err(err) => return Err(err.into()),
                }
                state.phase = WorkPhase::Arrived;
                Ok(Instruction::Call(walk_frame(coord, false)?))
            }
            WorkPhase::Arrived => {
                let Some(coord) = alveolus_position(ctx, state.alveolus) else {
                    return Ok(self.fail(ctx, state, "workplace is gone"));
                };
                let Some(plan) = state.plan else {
                    return Ok(self.fail(ctx, state, "no work plan"));
                };
                if !arrived(ctx, coord, false)? {
                    return Ok(self.fail(ctx, state, "workplace unreachable"));
                }
                match ctx.sim.begin_work_cycle(ctx.agent, plan) {
                    Ok(work_time) => {
                        state.phase = WorkPhase::Working;
                        let label = job_of(ctx, state.alveolus).map_or("work", job_label);
                        Ok(Instruction::Step(Step::wait(label, work_time)))
                    }
                    Err(PlanError::Allocation(err)) => Ok(self.fail(ctx, state, err.reason())),
                    Err(err) => Err(err.into()),
                }
            }
            WorkPhase::Working => {
                if let Some(plan) = state.plan.take() {
                    ctx.sim.conclude_plan(ctx.agent, plan, ctx.events)?;
                }
                Ok(Instruction::Return(None))
            }
            WorkPhase::Cool => Ok(self.fail(ctx, state, "plan cancelled")),
            WorkPhase::Cooled => Ok(Instruction::Return(None)),
        }
    }

    fn fail(&self, ctx: &mut ScriptContext<'_>, state: &mut WorkState, why: &str) -> Instruction {
        tracing::debug!(character = %ctx.agent, alveolus = %state.alveolus, why, "work abandoned");
        release_plan(ctx, state.plan.take());
        state.phase = WorkPhase::Cooled;
        Instruction::Step(cooldown(ctx))
    }
}

fn job_of(ctx: &ScriptContext<'_>, alveolus: AlveolusId) -> Option<WorkJob> {
    let kind = &ctx.sim.alveoli.get(&alveolus)?.kind;
    match ctx.sim.config.alveolus(kind)?.action {
        ActionType::Harvest { .. } => Some(WorkJob::Harvest),
        ActionType::Transform { .. } => Some(WorkJob::Transform),
        ActionType::Gather { .. } | ActionType::Storage => None,
    }
}

fn job_label(job: WorkJob) -> &'static str {
    match job {
        WorkJob::Harvest => "harvest",
        WorkJob::Transform => "transform",
        WorkJob::Gather => "gather",
    }
}

impl Script for WorkScript {
    fn resume(&self, ctx: &mut ScriptContext<'_>, frame: &mut ScriptFrame) -> Result<Instruction, SchedulerError> {
        let mut state: WorkState = frame.state()?;
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
        let mut state: WorkState = frame.state()?;
        release_plan(ctx, state.plan.take());
        match reason {
            CancelReason::Abandon => Ok(None),
            CancelReason::Plan(_) => {
                state.phase = WorkPhase::Cool;
                let mut recovered = frame.clone();
                recovered.set_state(&state)?;
                Ok(Some(recovered.state))
            }
        }
    }
}
