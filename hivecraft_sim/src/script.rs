// Script frames — resumable, serializable units of NPC behavior.
//
// A running script is a *frame*: the script's registered name, an execution
// (entry point) name, and an opaque JSON state. Scripts are written as
// explicit state machines: the scheduler calls `Script::resume` with the
// frame, the script inspects and updates `frame.state`, and answers with one
// `Instruction`:
//
// - `Call(frame)`: push a nested frame; it runs before this one resumes.
// - `Step(step)`: install a step; this frame resumes once it completes.
// - `Return(next)`: this frame is done. `next` replaces it, if given.
//
// Because all progress lives in `state`, a frame stack serializes to plain
// `{scriptFileName, executionName, state}` tuples and resumes after a load
// without repeating any side effect.
//
// Scripts are looked up by name in a `ScriptRegistry`. The registry and the
// `ActionSource` (which chooses new work for an idle agent) form a
// `Behavior`, held transiently by `SimState` and rebuilt after load.
//
// See also: `scheduler.rs` for the drive loop, `scripts/` for the built-in
// scripts, `jobs.rs` for the default `ActionSource`.

use crate::error::SchedulerError;
use crate::event::SimEvent;
use crate::sim::SimState;
use crate::step::Step;
use crate::types::{CharacterId, PlanId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptFrame {
    #[serde(rename = "scriptFileName")]
    pub script_name: String,
    pub execution_name: String,
    pub state: serde_json::Value,
}

impl ScriptFrame {
    pub fn new<T: Serialize>(script: &str, execution: &str, state: &T) -> Result<Self, SchedulerError> {
        let state = serde_json::to_value(state).map_err(|source| SchedulerError::FrameState {
            script: script.to_owned(),
            source,
        })?;
        Ok(Self {
            script_name: script.to_owned(),
            execution_name: execution.to_owned(),
            state,
        })
    }

    /// Decode the opaque state as `T`.
    pub fn state<T: DeserializeOwned>(&self) -> Result<T, SchedulerError> {
        T::deserialize(&self.state).map_err(|source| SchedulerError::FrameState {
            script: self.script_name.clone(),
            source,
        })
    }

    pub fn set_state<T: Serialize>(&mut self, state: &T) -> Result<(), SchedulerError> {
        self.state = serde_json::to_value(state).map_err(|source| SchedulerError::FrameState {
            script: self.script_name.clone(),
            source,
        })?;
        Ok(())
    }
}

impl fmt::Display for ScriptFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.script_name, self.execution_name)
    }
}

#[derive(Debug)]
pub enum Instruction {
    Call(ScriptFrame),
    Step(Step),
    Return(Option<ScriptFrame>),
}

/// Why a frame's cancel hook is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelReason {
    /// The whole stack is being discarded.
    Abandon,
    /// A plan held by the agent was cancelled from outside.
    Plan(PlanId),
}

/// Mutable access handed to a script while it runs.
pub struct ScriptContext<'a> {
    pub sim: &'a mut SimState,
    pub agent: CharacterId,
    pub events: &'a mut Vec<SimEvent>,
}

pub trait Script: Send + Sync {
    fn resume(&self, ctx: &mut ScriptContext<'_>, frame: &mut ScriptFrame) -> Result<Instruction, SchedulerError>;

    /// Release whatever the frame holds. Returning `Some(state)` asks the
    /// scheduler to keep this frame with the new state and stop unwinding;
    /// only honored for `CancelReason::Plan`.
    fn cancel(
        &self,
        _ctx: &mut ScriptContext<'_>,
        _frame: &ScriptFrame,
        _reason: CancelReason,
    ) -> Result<Option<serde_json::Value>, SchedulerError> {
        Ok(None)
    }
}

#[derive(Clone, Default)]
pub struct ScriptRegistry {
    scripts: BTreeMap<String, Arc<dyn Script>>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with every built-in script.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        crate::scripts::register_builtin(&mut registry);
        registry
    }

    pub fn register(&mut self, name: &str, script: Arc<dyn Script>) {
        self.scripts.insert(name.to_owned(), script);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Script>, SchedulerError> {
        self.scripts
            .get(name)
            .cloned()
            .ok_or_else(|| SchedulerError::UnknownScript { name: name.to_owned() })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.scripts.keys().map(String::as_str)
    }
}

/// Chooses the next top-level frame for an agent with nothing to do.
pub trait ActionSource: Send + Sync {
    fn next_action(&self, sim: &SimState, agent: CharacterId) -> Result<Option<ScriptFrame>, SchedulerError>;
}

/// Scripts plus the action source: everything a scheduler needs besides
/// its own stack.
#[derive(Clone)]
pub struct Behavior {
    pub scripts: Arc<ScriptRegistry>,
    pub actions: Arc<dyn ActionSource>,
}

impl Behavior {
    pub fn new(scripts: ScriptRegistry, actions: impl ActionSource + 'static) -> Self {
        Self {
            scripts: Arc::new(scripts),
            actions: Arc::new(actions),
        }
    }
}

impl Default for Behavior {
    fn default() -> Self {
        Self::new(ScriptRegistry::builtin(), crate::jobs::JobBoard)
    }
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Behavior")
            .field("scripts", &self.scripts.names().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Counter {
        n: u32,
    }

    #[test]
    fn frame_serializes_with_persisted_field_names() {
        let frame = ScriptFrame::new("walk", "main", &Counter { n: 3 }).unwrap();
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({ "scriptFileName": "walk", "executionName": "main", "state": { "n": 3 } })
        );
        let restored: ScriptFrame = serde_json::from_value(value).unwrap();
        assert_eq!(restored, frame);
    }

    #[test]
    fn frame_state_roundtrips_and_reports_bad_state() {
        let mut frame = ScriptFrame::new("idle", "main", &Counter { n: 0 }).unwrap();
        frame.set_state(&Counter { n: 7 }).unwrap();
        assert_eq!(frame.state::<Counter>().unwrap(), Counter { n: 7 });

        frame.state = json!("garbage");
        let err = frame.state::<Counter>().unwrap_err();
        assert!(matches!(err, SchedulerError::FrameState { ref script, .. } if script == "idle"));
    }

    #[test]
    fn registry_reports_unknown_scripts() {
        let registry = ScriptRegistry::builtin();
        assert!(registry.get("walk").is_ok());
        assert!(matches!(
            registry.get("teleport"),
            Err(SchedulerError::UnknownScript { .. })
        ));
    }
}
