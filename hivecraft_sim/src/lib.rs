// hivecraft_sim — pure Rust colony simulation library.
//
// This crate contains the simulation core for Hivecraft: goods storage with
// an allocate/reserve/fulfill/cancel protocol, the plan lifecycle that moves
// goods between storages, a per-character behavior scheduler over a stack of
// script frames, and hex-board pathfinding. It has no rendering or UI
// dependencies and can be tested, benchmarked, and run headless.
//
// Module overview:
// - `sim.rs`:         Top-level SimState, tick loop, command processing, persistence.
// - `storage/`:       Storage contract, Slotted/Specific layouts, allocation guard.
// - `goods.rs`:       GoodType and the Goods quantity map.
// - `plan.rs`:        Transfer, pickup, work and idle plans and their lifecycle.
// - `scheduler.rs`:   Per-character frame stack, active step, defect guards.
// - `script.rs`:      Script frames, the Script trait, registry, action sources.
// - `scripts/`:       Built-in scripts (walk, idle, haul, deliver, work, gather).
// - `step.rs`:        Time-consuming steps (durations, moves, multi-hop moves).
// - `jobs.rs`:        JobBoard — picks the next job for an idle character.
// - `economy.rs`:     Provide/demand advertisements per alveolus.
// - `pathfinding.rs`: A*, nearest and best-score searches over the board.
// - `board.rs`:       Hex board tiles, contents and borders.
// - `command.rs`:     SimCommand / SimAction — all external sim mutations.
// - `event.rs`:       Narrative SimEvents returned from each step.
// - `config.rs`:      GameConfig — tuning and the goods/alveolus catalog.
// - `error.rs`:       Error enums for allocation, plans, scheduling, saves.
// - `types.rs`:       AxialCoord, entity IDs, storage keys.
//
// **Critical constraint: determinism.** The simulation is a pure function:
// `(state, commands, dt) -> (new_state, events)`. No `HashMap` iteration, no
// system time, no OS entropy. Use `BTreeMap` for ordered collections.

pub mod board;
pub mod command;
pub mod config;
pub mod economy;
pub mod error;
pub mod event;
pub mod goods;
pub mod jobs;
pub mod pathfinding;
pub mod plan;
pub mod scheduler;
pub mod script;
pub mod scripts;
pub mod sim;
pub mod step;
pub mod storage;
pub mod types;
