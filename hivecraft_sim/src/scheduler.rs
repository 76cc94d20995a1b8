// Per-agent behavior scheduler — frame stack, active step, defect guards.
//
// Each character owns one `Scheduler`: a stack of script frames (innermost
// last) and at most one active step. The scheduler is the only thing that
// resumes scripts.
//
// `next_step` is the drive loop. It resumes the top frame until some frame
// installs a step, pushing nested calls and popping returns as it goes. When
// the stack runs dry it asks the `ActionSource` for a new top-level action.
// `update(dt)` is the tick loop: advance the active step, and each time one
// completes, drive the stack again and carry the leftover time into the next
// step.
//
// Three defect guards turn script bugs into `SchedulerError`s instead of
// silent busy loops:
// - infinite fail: the action source offers the very action that just
//   finished without installing a single step;
// - useless steps: a completed step is replaced by one of the same kind
//   without any time passing, more than `max_useless_steps` times in a row
//   (zero-time completions of any kind are capped the same way);
// - iteration cap: one drive loop resumes more than `max_drive_iterations`
//   frames.
// The error propagates to the per-agent boundary in `sim.rs`.
//
// `abandon_and` discards everything (running every frame's cancel hook) and
// starts a new frame. `cancel_plan` unwinds one frame at a time and stops at
// the first frame whose hook supplies a replacement state.
//
// Persistence: only the stack and the active step serialize. The guard
// counters are transient and restart from zero after a load.
//
// See also: `script.rs` for frames and the `Script` trait, `step.rs` for the
// steps, `sim.rs` for how schedulers are lent out during an update.
//
// **Critical constraint: determinism.** Scripts run in stack order on the
// single simulation thread; nothing here depends on wall-clock time.

use crate::error::{PlanError, SchedulerError};
use crate::goods::EPSILON;
use crate::script::{Behavior, CancelReason, Instruction, ScriptContext, ScriptFrame};
use crate::step::Step;
use crate::types::PlanId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scheduler {
    running_scripts: Vec<ScriptFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    step_executor: Option<Step>,
    /// The last top-level action handed out by the action source.
    #[serde(skip)]
    last_action: Option<ScriptFrame>,
    /// Whether any step was installed since `last_action` started.
    #[serde(skip)]
    work_since_action: bool,
    #[serde(skip)]
    useless_steps: u32,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> &[ScriptFrame] {
        &self.running_scripts
    }

    pub fn active_step(&self) -> Option<&Step> {
        self.step_executor.as_ref()
    }

    pub fn is_idle(&self) -> bool {
        self.running_scripts.is_empty() && self.step_executor.is_none()
    }

    /// Push a frame on top of the stack without running it.
    pub fn push(&mut self, frame: ScriptFrame) {
        self.running_scripts.push(frame);
    }

    /// Drive the stack until a step is installed or nothing is left to run.
    pub fn next_step(&mut self, ctx: &mut ScriptContext<'_>) -> Result<(), SchedulerError> {
        let behavior = ctx.sim.behavior.clone();
        let limit = ctx.sim.config.scheduler.max_drive_iterations;
        if self.running_scripts.is_empty() {
            self.query_action(ctx, &behavior)?;
        }

        let mut iterations = 0;
        while self.step_executor.is_none() {
            let Some(frame) = self.running_scripts.last_mut() else {
                break;
            };
            iterations += 1;
            if iterations > limit {
                return Err(SchedulerError::IterationCap { limit });
            }
            let script = behavior.scripts.get(&frame.script_name)?;
            match script.resume(ctx, frame)? {
                Instruction::Call(child) => {
                    tracing::trace!(character = %ctx.agent, frame = %child, "call");
                    self.running_scripts.push(child);
                }
                Instruction::Step(step) => {
                    tracing::debug!(character = %ctx.agent, kind = step.kind(), remaining = step.remaining(), "step installed");
                    self.work_since_action = true;
                    self.step_executor = Some(step);
                }
                Instruction::Return(next) => {
                    self.running_scripts.pop();
                    match next {
                        Some(next) => self.running_scripts.push(next),
                        None if self.running_scripts.is_empty() => self.query_action(ctx, &behavior)?,
                        None => {}
                    }
                }
            }
        }
        Ok(())
    }

    fn query_action(&mut self, ctx: &mut ScriptContext<'_>, behavior: &Behavior) -> Result<(), SchedulerError> {
        let Some(frame) = behavior.actions.next_action(ctx.sim, ctx.agent)? else {
            return Ok(());
        };
        if !self.work_since_action && self.last_action.as_ref() == Some(&frame) {
            return Err(SchedulerError::InfiniteFail {
                action: frame.to_string(),
            });
        }
        tracing::debug!(character = %ctx.agent, action = %frame, "new action");
        self.last_action = Some(frame.clone());
        self.work_since_action = false;
        self.running_scripts.push(frame);
        Ok(())
    }

    /// Advance by `dt` seconds of simulated time.
    pub fn update(&mut self, ctx: &mut ScriptContext<'_>, dt: f64) -> Result<(), SchedulerError> {
        let max_useless = ctx.sim.config.scheduler.max_useless_steps;
        if self.step_executor.is_none() {
            self.next_step(ctx)?;
        }

        let mut remaining = dt;
        let mut zero_time_run = 0u32;
        loop {
            let Some(step) = self.step_executor.as_mut() else {
                break;
            };
            let position = &mut ctx.sim.character_mut(ctx.agent)?.position;
            let Some(leftover) = step.advance(remaining, position) else {
                self.useless_steps = 0;
                break;
            };
            let kind = step.kind();
            let consumed = remaining - leftover;
            remaining = leftover;
            self.step_executor = None;
            self.next_step(ctx)?;

            if consumed > EPSILON {
                zero_time_run = 0;
                self.useless_steps = 0;
                continue;
            }
            zero_time_run += 1;
            if self.step_executor.as_ref().is_some_and(|next| next.kind() == kind) {
                self.useless_steps += 1;
            } else {
                self.useless_steps = 0;
            }
            let count = self.useless_steps.max(zero_time_run);
            if count > max_useless {
                return Err(SchedulerError::UselessStep { kind, count });
            }
        }
        Ok(())
    }

    /// Throw away the current step and every frame, then start `frame`.
    pub fn abandon_and(&mut self, ctx: &mut ScriptContext<'_>, frame: ScriptFrame) -> Result<(), SchedulerError> {
        self.abandon(ctx);
        tracing::debug!(character = %ctx.agent, frame = %frame, "abandon and restart");
        self.running_scripts.push(frame);
        self.next_step(ctx)
    }

    /// Unwind the whole stack, running each frame's cancel hook. Hook
    /// failures are logged and unwinding continues.
    pub fn abandon(&mut self, ctx: &mut ScriptContext<'_>) {
        let behavior = ctx.sim.behavior.clone();
        self.step_executor = None;
        while let Some(frame) = self.running_scripts.pop() {
            let outcome = behavior
                .scripts
                .get(&frame.script_name)
                .and_then(|script| script.cancel(ctx, &frame, CancelReason::Abandon));
            if let Err(err) = outcome {
                tracing::warn!(character = %ctx.agent, frame = %frame, %err, "cancel hook failed while abandoning");
            }
        }
        self.last_action = None;
        self.work_since_action = false;
        self.useless_steps = 0;
    }

    /// Cancel `plan` and unwind frames until one supplies a state to resume
    /// from.
    pub fn cancel_plan(&mut self, ctx: &mut ScriptContext<'_>, plan: PlanId) -> Result<(), SchedulerError> {
        match ctx.sim.cancel_plan(ctx.agent, plan, ctx.events) {
            Ok(()) | Err(PlanError::UnknownPlan { .. }) => {}
            Err(err) => return Err(err.into()),
        }
        let behavior = ctx.sim.behavior.clone();
        self.step_executor = None;
        self.useless_steps = 0;
        while let Some(mut frame) = self.running_scripts.pop() {
            let script = behavior.scripts.get(&frame.script_name)?;
            if let Some(state) = script.cancel(ctx, &frame, CancelReason::Plan(plan))? {
                tracing::debug!(character = %ctx.agent, frame = %frame, %plan, "frame recovers from cancelled plan");
                frame.state = state;
                self.running_scripts.push(frame);
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::HexBoard;
    use crate::config::GameConfig;
    use crate::plan::PlanKind;
    use crate::script::{ActionSource, Script, ScriptRegistry};
    use crate::sim::SimState;
    use crate::types::{AxialCoord, CharacterId};
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::Arc;

    /// Returns a unit-state frame of `script` forever.
    struct Always(&'static str);

    impl ActionSource for Always {
        fn next_action(&self, _sim: &SimState, _agent: CharacterId) -> Result<Option<ScriptFrame>, SchedulerError> {
            Ok(Some(ScriptFrame::new(self.0, "main", &())?))
        }
    }

    struct Nothing;

    impl ActionSource for Nothing {
        fn next_action(&self, _sim: &SimState, _agent: CharacterId) -> Result<Option<ScriptFrame>, SchedulerError> {
            Ok(None)
        }
    }

    /// Finishes immediately without doing anything.
    struct Noop;

    impl Script for Noop {
        fn resume(&self, _ctx: &mut ScriptContext<'_>, _frame: &mut ScriptFrame) -> Result<Instruction, SchedulerError> {
            Ok(Instruction::Return(None))
        }
    }

    /// Calls `noop` forever without ever yielding a step.
    struct Spin;

    impl Script for Spin {
        fn resume(&self, _ctx: &mut ScriptContext<'_>, _frame: &mut ScriptFrame) -> Result<Instruction, SchedulerError> {
            Ok(Instruction::Call(ScriptFrame::new("noop", "main", &())?))
        }
    }

    /// Yields a zero-length wait forever.
    struct Stall;

    impl Script for Stall {
        fn resume(&self, _ctx: &mut ScriptContext<'_>, _frame: &mut ScriptFrame) -> Result<Instruction, SchedulerError> {
            Ok(Instruction::Step(Step::wait("stall", 0.0)))
        }
    }

    #[derive(Serialize, Deserialize)]
    struct Countdown {
        left: u32,
        recovered: bool,
    }

    /// Waits one second `left` times, then returns. Holds an idle plan and
    /// recovers from its cancellation by starting over with one wait.
    struct Waiter;

    impl Script for Waiter {
        fn resume(&self, ctx: &mut ScriptContext<'_>, frame: &mut ScriptFrame) -> Result<Instruction, SchedulerError> {
            let mut state: Countdown = frame.state()?;
            if state.left == 0 {
                return Ok(Instruction::Return(None));
            }
            if ctx.sim.characters[&ctx.agent].plans.is_empty() {
                ctx.sim.begin_plan(ctx.agent, PlanKind::idle(100.0), ctx.events)?;
            }
            state.left -= 1;
            frame.set_state(&state)?;
            Ok(Instruction::Step(Step::wait("tick", 1.0)))
        }

        fn cancel(
            &self,
            _ctx: &mut ScriptContext<'_>,
            _frame: &ScriptFrame,
            reason: CancelReason,
        ) -> Result<Option<serde_json::Value>, SchedulerError> {
            match reason {
                CancelReason::Plan(_) => Ok(Some(json!({ "left": 1, "recovered": true }))),
                CancelReason::Abandon => Ok(None),
            }
        }
    }

    fn registry() -> ScriptRegistry {
        let mut scripts = ScriptRegistry::builtin();
        scripts.register("noop", Arc::new(Noop));
        scripts.register("spin", Arc::new(Spin));
        scripts.register("stall", Arc::new(Stall));
        scripts.register("waiter", Arc::new(Waiter));
        scripts
    }

    fn sim_with(actions: impl ActionSource + 'static) -> (SimState, CharacterId) {
        let mut sim = SimState::new(GameConfig::default(), HexBoard::hexagon(3, 1.0));
        sim.set_behavior(Behavior::new(registry(), actions));
        let mut events = Vec::new();
        let agent = sim.spawn_character(AxialCoord::new(0, 0), &mut events).unwrap();
        (sim, agent)
    }

    fn run(sim: &mut SimState, agent: CharacterId, dt: f64) -> Result<(), SchedulerError> {
        let mut events = Vec::new();
        sim.with_scheduler(agent, &mut events, |scheduler, ctx| scheduler.update(ctx, dt))?
    }

    fn waiter(left: u32) -> ScriptFrame {
        ScriptFrame::new("waiter", "main", &Countdown { left, recovered: false }).unwrap()
    }

    #[test]
    fn same_action_without_work_is_an_infinite_fail() {
        let (mut sim, agent) = sim_with(Always("noop"));
        let err = run(&mut sim, agent, 1.0).unwrap_err();
        assert!(matches!(err, SchedulerError::InfiniteFail { ref action } if action == "noop::main"));
    }

    #[test]
    fn drive_loop_is_capped() {
        let (mut sim, agent) = sim_with(Always("spin"));
        let err = run(&mut sim, agent, 1.0).unwrap_err();
        assert!(matches!(err, SchedulerError::IterationCap { limit: 100 }));
    }

    #[test]
    fn zero_time_steps_of_one_kind_are_useless() {
        let (mut sim, agent) = sim_with(Always("stall"));
        let err = run(&mut sim, agent, 1.0).unwrap_err();
        assert!(matches!(err, SchedulerError::UselessStep { kind: "duration", count: 51 }));
    }

    #[test]
    fn leftover_time_carries_into_next_step() {
        let (mut sim, agent) = sim_with(Nothing);
        sim.characters.get_mut(&agent).unwrap().scheduler.push(waiter(3));
        run(&mut sim, agent, 2.5).unwrap();
        let scheduler = &sim.characters[&agent].scheduler;
        let step = scheduler.active_step().unwrap();
        assert!((step.remaining() - 0.5).abs() < 1e-9);
        run(&mut sim, agent, 1.0).unwrap();
        assert!(sim.characters[&agent].scheduler.is_idle());
    }

    #[test]
    fn cancel_plan_resumes_at_recovering_frame() {
        let (mut sim, agent) = sim_with(Nothing);
        sim.characters.get_mut(&agent).unwrap().scheduler.push(waiter(5));
        run(&mut sim, agent, 0.5).unwrap();
        let plan = *sim.characters[&agent].plans.keys().next().unwrap();

        let mut events = Vec::new();
        sim.with_scheduler(agent, &mut events, |s, ctx| s.cancel_plan(ctx, plan))
            .unwrap()
            .unwrap();
        let scheduler = &sim.characters[&agent].scheduler;
        assert!(scheduler.active_step().is_none());
        assert_eq!(scheduler.frames().len(), 1);
        let state: Countdown = scheduler.frames()[0].state().unwrap();
        assert!(state.recovered);
        assert!(!sim.characters[&agent].plans.contains_key(&plan));
    }

    #[test]
    fn abandon_and_replaces_the_stack() {
        let (mut sim, agent) = sim_with(Nothing);
        sim.characters.get_mut(&agent).unwrap().scheduler.push(waiter(5));
        run(&mut sim, agent, 0.5).unwrap();
        let mut events = Vec::new();
        sim.with_scheduler(agent, &mut events, |s, ctx| s.abandon_and(ctx, waiter(1)))
            .unwrap()
            .unwrap();
        let scheduler = &sim.characters[&agent].scheduler;
        assert_eq!(scheduler.frames().len(), 1);
        let state: Countdown = scheduler.frames()[0].state().unwrap();
        assert_eq!(state.left, 0);
        assert!(scheduler.active_step().is_some());
    }

    #[test]
    fn scheduler_roundtrips_mid_step() {
        let (mut sim, agent) = sim_with(Nothing);
        sim.characters.get_mut(&agent).unwrap().scheduler.push(waiter(2));
        run(&mut sim, agent, 0.25).unwrap();
        let scheduler = &sim.characters[&agent].scheduler;
        let json = serde_json::to_value(scheduler).unwrap();
        assert!(json.get("runningScripts").is_some());
        assert_eq!(json["stepExecutor"]["kind"], "duration");
        let restored: Scheduler = serde_json::from_value(json).unwrap();
        assert_eq!(restored.frames(), scheduler.frames());
        assert_eq!(restored.active_step(), scheduler.active_step());
    }
}
