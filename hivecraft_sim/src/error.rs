// Error taxonomy for the simulation core.
//
// - `AllocationError`: recoverable. Raised by storages when no part of a
//   request can be satisfied. Always caught by the plan layer and turned
//   into a rollback.
// - `PlanError`: plan lifecycle failures, including invariant violations at
//   conclusion (a content/logic defect, raised loudly).
// - `SchedulerError`: scheduling defects (infinite-fail loops, useless step
//   loops, iteration cap). Propagates to the per-agent boundary in `sim.rs`,
//   which halts that one agent.
// - `SaveError` / `ConfigError`: persistence and configuration I/O.
//
// Leak detection (see `storage/guard.rs`) never produces an error; it only
// logs.

use crate::goods::Goods;
use crate::types::{AlveolusId, AxialCoord, CharacterId, PlanId, StorageKey};
use std::path::PathBuf;
use thiserror::Error;

/// Diagnostic tag attached to every allocation. Has no behavioral effect.
pub type AllocationReason = String;

#[derive(Debug, Error)]
pub enum AllocationError {
    /// The request map was empty.
    #[error("empty allocation request ({reason})")]
    EmptyRequest { reason: AllocationReason },

    /// Not a single good type in the request could be allocated or reserved.
    #[error("nothing in {request:?} could be allocated ({reason})")]
    Nothing {
        reason: AllocationReason,
        request: Goods,
    },
}

impl AllocationError {
    pub fn reason(&self) -> &str {
        match self {
            AllocationError::EmptyRequest { reason } | AllocationError::Nothing { reason, .. } => {
                reason
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error("{plan} plan was already begun")]
    AlreadyBegun { plan: &'static str },

    #[error("{plan} plan was never begun")]
    NotBegun { plan: &'static str },

    /// The plan's invariant check returned false at conclusion.
    #[error("{plan} plan invariant violated at conclusion")]
    InvariantViolated { plan: &'static str },

    #[error("no storage at {coord}")]
    NoStorageAt { coord: AxialCoord },

    #[error("no {key}")]
    UnknownStorage { key: StorageKey },

    #[error("{alveolus} is already staffed by {worker}")]
    Occupied {
        alveolus: AlveolusId,
        worker: CharacterId,
    },

    #[error("{agent} has no {plan}")]
    UnknownPlan { agent: CharacterId, plan: PlanId },

    #[error("unknown agent {0}")]
    UnknownAgent(CharacterId),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The action source offered the same action that just completed
    /// without performing any work.
    #[error("action {action} completed without work and was offered again")]
    InfiniteFail { action: String },

    /// A fresh step of the same kind replaced a completed one without any
    /// time passing, too many times in a row.
    #[error("{count} consecutive zero-time {kind} steps")]
    UselessStep { kind: &'static str, count: u32 },

    #[error("scheduler loop exceeded {limit} iterations")]
    IterationCap { limit: u32 },

    #[error("unknown script {name}")]
    UnknownScript { name: String },

    #[error("bad state for script {script}: {source}")]
    FrameState {
        script: String,
        #[source]
        source: serde_json::Error,
    },

    /// A plan failure escaped a script. Allocation errors reaching this
    /// level mean a job was offered that could never be allocated.
    #[error("plan failure reached the scheduler: {0}")]
    Plan(#[from] PlanError),
}

#[derive(Debug, Error)]
pub enum SaveError {
    /// Allocations are transient and must not cross a save.
    #[error("{count} allocations are still outstanding")]
    PendingAllocations { count: usize },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse game config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read game config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
