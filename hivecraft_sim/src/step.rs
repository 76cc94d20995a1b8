// Steps — the primitive, time-consuming actions a scheduler runs.
//
// A character has at most one active step. The scheduler ticks it with the
// time remaining in the frame; `advance` either consumes all of it (still
// pending, returns `None`) or completes and hands back the leftover time
// (`Some(leftover)`). A completed step is never advanced again.
//
// Three kinds exist:
// - `Duration`: wait in place (handling goods, working, idling).
// - `Move`: cross one edge to an adjacent tile.
// - `MultiMove`: walk a path leg by leg. Position updates when each leg
//   finishes, so a character is always on exactly one tile.
//
// Steps serialize as plain data; resuming a step after load continues from
// its recorded `elapsed` time without repeating any effect.
//
// See also: `scheduler.rs` for the tick loop that drives steps,
// `scripts/walk.rs` which builds `MultiMove` steps from paths.

use crate::goods::EPSILON;
use crate::types::AxialCoord;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Step {
    Duration {
        /// What the character is doing, for display.
        label: String,
        duration: f64,
        elapsed: f64,
    },
    Move {
        to: AxialCoord,
        duration: f64,
        elapsed: f64,
    },
    MultiMove {
        /// Tiles to enter, in order (the starting tile excluded).
        legs: Vec<AxialCoord>,
        /// Time to cross into each of `legs`.
        leg_times: Vec<f64>,
        /// Index of the leg in progress.
        leg: usize,
        /// Time spent on the leg in progress.
        elapsed: f64,
    },
}

impl Step {
    pub fn wait(label: impl Into<String>, duration: f64) -> Self {
        Step::Duration {
            label: label.into(),
            duration,
            elapsed: 0.0,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Step::Duration { .. } => "duration",
            Step::Move { .. } => "move",
            Step::MultiMove { .. } => "multi-move",
        }
    }

    /// Total time this step still needs.
    pub fn remaining(&self) -> f64 {
        match self {
            Step::Duration {
                duration, elapsed, ..
            }
            | Step::Move {
                duration, elapsed, ..
            } => (duration - elapsed).max(0.0),
            Step::MultiMove {
                leg_times,
                leg,
                elapsed,
                ..
            } => (leg_times.iter().skip(*leg).sum::<f64>() - elapsed).max(0.0),
        }
    }

    /// Advance by `dt`. Returns `Some(leftover)` when the step completed
    /// within `dt`, `None` when it consumed everything and is still pending.
    pub fn advance(&mut self, dt: f64, position: &mut AxialCoord) -> Option<f64> {
        match self {
            Step::Duration {
                duration, elapsed, ..
            } => advance_timer(*duration, elapsed, dt),
            Step::Move {
                to,
                duration,
                elapsed,
            } => {
                let leftover = advance_timer(*duration, elapsed, dt);
                if leftover.is_some() {
                    *position = *to;
                }
                leftover
            }
            Step::MultiMove {
                legs,
                leg_times,
                leg,
                elapsed,
            } => {
                let mut budget = dt;
                while *leg < legs.len() {
                    let need = leg_times.get(*leg).copied().unwrap_or(0.0) - *elapsed;
                    if budget + EPSILON < need {
                        *elapsed += budget;
                        return None;
                    }
                    budget = (budget - need).max(0.0);
                    *position = legs[*leg];
                    *leg += 1;
                    *elapsed = 0.0;
                }
                Some(budget)
            }
        }
    }
}

fn advance_timer(duration: f64, elapsed: &mut f64, dt: f64) -> Option<f64> {
    let need = duration - *elapsed;
    if dt + EPSILON < need {
        *elapsed += dt;
        None
    } else {
        *elapsed = duration;
        Some((dt - need).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(q: i32, r: i32) -> AxialCoord {
        AxialCoord::new(q, r)
    }

    #[test]
    fn duration_reports_leftover() {
        let mut step = Step::wait("rest", 2.0);
        let mut pos = c(0, 0);
        assert_eq!(step.advance(1.5, &mut pos), None);
        assert!((step.remaining() - 0.5).abs() < 1e-9);
        assert_eq!(step.advance(1.0, &mut pos), Some(0.5));
    }

    #[test]
    fn zero_duration_completes_with_all_time_left() {
        let mut step = Step::wait("nothing", 0.0);
        let mut pos = c(0, 0);
        assert_eq!(step.advance(0.25, &mut pos), Some(0.25));
    }

    #[test]
    fn move_updates_position_only_on_arrival() {
        let mut step = Step::Move {
            to: c(1, 0),
            duration: 1.0,
            elapsed: 0.0,
        };
        let mut pos = c(0, 0);
        assert_eq!(step.advance(0.5, &mut pos), None);
        assert_eq!(pos, c(0, 0));
        assert_eq!(step.advance(0.5, &mut pos), Some(0.0));
        assert_eq!(pos, c(1, 0));
    }

    #[test]
    fn multi_move_walks_leg_by_leg() {
        let mut step = Step::MultiMove {
            legs: vec![c(1, 0), c(2, 0), c(3, 0)],
            leg_times: vec![1.0, 2.0, 1.0],
            leg: 0,
            elapsed: 0.0,
        };
        let mut pos = c(0, 0);
        assert_eq!(step.advance(2.0, &mut pos), None);
        assert_eq!(pos, c(1, 0));
        assert!((step.remaining() - 2.0).abs() < 1e-9);
        assert_eq!(step.advance(1.0, &mut pos), None);
        assert_eq!(pos, c(2, 0));
        assert_eq!(step.advance(3.0, &mut pos), Some(2.0));
        assert_eq!(pos, c(3, 0));
    }

    #[test]
    fn serialized_step_resumes_where_it_stopped() {
        let mut step = Step::MultiMove {
            legs: vec![c(1, 0), c(2, 0)],
            leg_times: vec![1.0, 1.0],
            leg: 0,
            elapsed: 0.0,
        };
        let mut pos = c(0, 0);
        step.advance(1.5, &mut pos);
        let json = serde_json::to_string(&step).unwrap();
        let mut restored: Step = serde_json::from_str(&json).unwrap();
        let mut restored_pos = pos;
        assert_eq!(step.advance(0.75, &mut pos), restored.advance(0.75, &mut restored_pos));
        assert_eq!(pos, restored_pos);
    }
}
