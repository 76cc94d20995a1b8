// `walk` — path to a goal and walk it as a single multi-move step.
//
// The frame resumes twice: once to plan the path and install the step, once
// more (after the step completes) to return. A missing path or a goal that
// is already reached returns at once; callers check `arrived` afterwards
// instead of trusting the walk. The path search is bounded by
// `CharacterConfig::walk_search_time`.

use super::position;
use crate::board::WalkGraph;
use crate::error::SchedulerError;
use crate::pathfinding::find_path;
use crate::script::{Instruction, Script, ScriptContext, ScriptFrame};
use crate::step::Step;
use crate::types::AxialCoord;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WalkState {
    pub goal: AxialCoord,
    pub punctual: bool,
    #[serde(default)]
    pub started: bool,
}

pub struct WalkScript;

impl Script for WalkScript {
    fn resume(&self, ctx: &mut ScriptContext<'_>, frame: &mut ScriptFrame) -> Result<Instruction, SchedulerError> {
        let mut state: WalkState = frame.state()?;
        if state.started {
            return Ok(Instruction::Return(None));
        }
        state.started = true;
        frame.set_state(&state)?;

        let from = position(ctx)?;
        let board = &ctx.sim.board;
        let budget = ctx.sim.config.character.walk_search_time;
        let Some(path) = find_path(board, from, state.goal, budget, state.punctual) else {
            tracing::info!(character = %ctx.agent, %from, goal = %state.goal, "no path");
            return Ok(Instruction::Return(None));
        };
        if path.tiles.len() < 2 {
            return Ok(Instruction::Return(None));
        }
        let factor = ctx.sim.config.character.walk_time_factor;
        let leg_times = path
            .tiles
            .windows(2)
            .map(|pair| board.walk_time(pair[0], pair[1]) * factor)
            .collect();
        Ok(Instruction::Step(Step::MultiMove {
            legs: path.tiles[1..].to_vec(),
            leg_times,
            leg: 0,
            elapsed: 0.0,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{BorderContent, HexBoard};
    use crate::config::GameConfig;
    use crate::scripts::walk_frame;
    use crate::sim::SimState;

    #[test]
    fn walk_yields_one_multi_move_then_returns() {
        let mut config = GameConfig::default();
        config.character.walk_time_factor = 2.0;
        let mut sim = SimState::new(config, HexBoard::hexagon(3, 1.0));
        let mut events = Vec::new();
        let agent = sim.spawn_character(AxialCoord::new(0, 0), &mut events).unwrap();
        let mut frame = walk_frame(AxialCoord::new(3, 0), true).unwrap();
        let mut ctx = ScriptContext {
            sim: &mut sim,
            agent,
            events: &mut events,
        };

        let Instruction::Step(Step::MultiMove { legs, leg_times, .. }) = WalkScript.resume(&mut ctx, &mut frame).unwrap()
        else {
            panic!("expected a multi-move");
        };
        assert_eq!(legs.last(), Some(&AxialCoord::new(3, 0)));
        assert_eq!(legs.len(), 3);
        assert!(leg_times.iter().all(|t| (*t - 2.0).abs() < 1e-9));
        assert!(matches!(
            WalkScript.resume(&mut ctx, &mut frame).unwrap(),
            Instruction::Return(None)
        ));
    }

    #[test]
    fn walk_beyond_the_search_budget_returns_immediately() {
        let mut config = GameConfig::default();
        config.character.walk_search_time = 2.0;
        let mut sim = SimState::new(config, HexBoard::hexagon(3, 1.0));
        let mut events = Vec::new();
        let agent = sim.spawn_character(AxialCoord::new(0, 0), &mut events).unwrap();
        let mut frame = walk_frame(AxialCoord::new(3, 0), true).unwrap();
        let mut ctx = ScriptContext {
            sim: &mut sim,
            agent,
            events: &mut events,
        };
        assert!(matches!(
            WalkScript.resume(&mut ctx, &mut frame).unwrap(),
            Instruction::Return(None)
        ));
    }

    #[test]
    fn walk_to_walled_off_goal_returns_immediately() {
        let mut board = HexBoard::hexagon(1, 1.0);
        let goal = AxialCoord::new(1, 0);
        for n in goal.neighbors() {
            board.set_border(goal, n, Some(BorderContent::Wall));
        }
        let mut sim = SimState::new(GameConfig::default(), board);
        let mut events = Vec::new();
        let agent = sim.spawn_character(AxialCoord::new(-1, 0), &mut events).unwrap();
        let mut frame = walk_frame(goal, true).unwrap();
        let mut ctx = ScriptContext {
            sim: &mut sim,
            agent,
            events: &mut events,
        };
        assert!(matches!(
            WalkScript.resume(&mut ctx, &mut frame).unwrap(),
            Instruction::Return(None)
        ));
    }
}
