// Data-driven game configuration.
//
// All tunable simulation parameters live here in `GameConfig`, loaded from
// JSON at startup. The sim never uses magic numbers; it reads from the
// config. This covers three groups:
//
// - `SchedulerConfig`: the defect-guard thresholds of the behavior
//   scheduler (drive-loop iteration cap, consecutive useless steps).
// - `CharacterConfig`: how characters carry, walk, and pace their work.
// - `JobConfig`: staffing weights the job board scores workplaces with.
// - The content catalog: `goods` (half-life, feeding value) and `alveoli`
//   (action type, storage layout, buffer targets, work time), all keyed by
//   name so the storage and plan layers never depend on concrete content.
//
// `GameConfig::default()` ships a small playable catalog. `from_json_str`
// and `from_json_file` load replacements.
//
// See also: `sim.rs` which owns the `GameConfig` as part of `SimState`,
// `economy.rs` which turns alveolus definitions into advertisements,
// `scheduler.rs` which reads the guard thresholds.
//
// **Critical constraint: determinism.** Config values feed directly into
// simulation logic. Two runs with different configs are different games.

use crate::error::ConfigError;
use crate::goods::{GoodType, Goods};
use crate::storage::{AnyStorage, SlottedStorage, SpecificStorage};
use crate::types::StorageKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Scheduler and character tuning
// ---------------------------------------------------------------------------

/// Defect-detection thresholds for the behavior scheduler. These catch
/// script bugs; they are not gameplay limits.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum resume iterations of one `next_step` drive loop.
    pub max_drive_iterations: u32,
    /// Maximum consecutive zero-time completions of same-kind steps.
    pub max_useless_steps: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_drive_iterations: 100,
            max_useless_steps: 50,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CharacterConfig {
    /// Slots in a character's carried inventory.
    pub vehicle_slots: usize,
    /// Capacity of each carried slot.
    pub vehicle_slot_capacity: f64,
    /// Multiplier applied to tile walk times for this kind of character.
    pub walk_time_factor: f64,
    /// Seconds spent loading or unloading at a storage.
    pub handling_time: f64,
    /// Length of an idle wait when no job is available.
    pub idle_time: f64,
    /// Pause after a cancelled job before looking for new work.
    pub cooldown_time: f64,
    /// Travel-time budget for job discovery searches.
    pub job_search_time: f64,
    /// Travel-time budget for the path of a single walk.
    pub walk_search_time: f64,
}

impl Default for CharacterConfig {
    fn default() -> Self {
        Self {
            vehicle_slots: 2,
            vehicle_slot_capacity: 1.0,
            walk_time_factor: 1.0,
            handling_time: 0.5,
            idle_time: 2.0,
            cooldown_time: 1.0,
            job_search_time: 60.0,
            walk_search_time: 240.0,
        }
    }
}

/// Staffing weights used by the job board. A free workplace scores
/// `1 + urgency` before travel time is taken into account.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub transform_urgency: f64,
    pub harvest_urgency: f64,
}

impl Default for JobConfig {
    fn default() -> Self {
        // A transform consumes inputs already waiting, so it outranks a harvest.
        Self {
            transform_urgency: 1.0,
            harvest_urgency: 0.5,
        }
    }
}

// ---------------------------------------------------------------------------
// Content catalog
// ---------------------------------------------------------------------------

/// Static properties of a good type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GoodDef {
    /// Seconds for unreserved stock to halve while stored. `None` = durable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub half_life: Option<f64>,
    /// Nourishment provided per unit, zero for inedible goods.
    #[serde(default)]
    pub feeding_value: f64,
}

/// What a workplace does when staffed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ActionType {
    /// Produce `quantity` of `output` per work cycle from nothing.
    Harvest { output: GoodType, quantity: f64 },
    /// Consume `inputs` from the workplace storage to produce `outputs`.
    Transform { inputs: Goods, outputs: Goods },
    /// Collect free-standing `good` within `range` seconds of travel.
    Gather { good: GoodType, range: f64 },
    /// Passive stockpile; never staffed.
    Storage,
}

impl ActionType {
    pub fn name(&self) -> &'static str {
        match self {
            ActionType::Harvest { .. } => "harvest",
            ActionType::Transform { .. } => "transform",
            ActionType::Gather { .. } => "gather",
            ActionType::Storage => "storage",
        }
    }
}

/// Storage layout an alveolus is built with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StorageSpec {
    Slotted { slots: usize, per_slot: f64 },
    Specific { capacities: Goods },
}

impl StorageSpec {
    pub fn build(&self, key: StorageKey) -> AnyStorage {
        match self {
            StorageSpec::Slotted { slots, per_slot } => {
                AnyStorage::Slotted(SlottedStorage::new(key, *slots, *per_slot))
            }
            StorageSpec::Specific { capacities } => {
                AnyStorage::Specific(SpecificStorage::new(key, capacities.clone()))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlveolusDef {
    pub action: ActionType,
    pub storage: StorageSpec,
    /// Quantities the alveolus actively pulls in, on top of what its action
    /// demands.
    #[serde(default)]
    pub buffer: Goods,
    /// Seconds of labor per work cycle.
    #[serde(default)]
    pub work_time: f64,
}

// ---------------------------------------------------------------------------
// GameConfig
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub character: CharacterConfig,
    #[serde(default)]
    pub jobs: JobConfig,
    /// Good catalog keyed by good name.
    pub goods: BTreeMap<GoodType, GoodDef>,
    /// Alveolus catalog keyed by alveolus kind name.
    pub alveoli: BTreeMap<String, AlveolusDef>,
}

impl GameConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn alveolus(&self, kind: &str) -> Option<&AlveolusDef> {
        self.alveoli.get(kind)
    }

    pub fn half_life(&self, good: &GoodType) -> Option<f64> {
        self.goods.get(good).and_then(|def| def.half_life)
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        let mut goods = BTreeMap::new();
        goods.insert(GoodType::from("wood"), GoodDef::default());
        goods.insert(GoodType::from("stone"), GoodDef::default());
        goods.insert(GoodType::from("planks"), GoodDef::default());
        goods.insert(
            GoodType::from("berries"),
            GoodDef {
                half_life: Some(600.0),
                feeding_value: 1.0,
            },
        );

        let mut alveoli = BTreeMap::new();
        alveoli.insert(
            "tree-chopper".to_owned(),
            AlveolusDef {
                action: ActionType::Harvest {
                    output: "wood".into(),
                    quantity: 1.0,
                },
                storage: StorageSpec::Specific {
                    capacities: Goods::new().with("wood", 4.0),
                },
                buffer: Goods::new(),
                work_time: 3.0,
            },
        );
        alveoli.insert(
            "quarry".to_owned(),
            AlveolusDef {
                action: ActionType::Harvest {
                    output: "stone".into(),
                    quantity: 1.0,
                },
                storage: StorageSpec::Specific {
                    capacities: Goods::new().with("stone", 4.0),
                },
                buffer: Goods::new(),
                work_time: 4.0,
            },
        );
        alveoli.insert(
            "sawmill".to_owned(),
            AlveolusDef {
                action: ActionType::Transform {
                    inputs: Goods::new().with("wood", 1.0),
                    outputs: Goods::new().with("planks", 2.0),
                },
                storage: StorageSpec::Specific {
                    capacities: Goods::new().with("wood", 2.0).with("planks", 4.0),
                },
                buffer: Goods::new(),
                work_time: 2.0,
            },
        );
        alveoli.insert(
            "berry-gatherer".to_owned(),
            AlveolusDef {
                action: ActionType::Gather {
                    good: "berries".into(),
                    range: 20.0,
                },
                storage: StorageSpec::Specific {
                    capacities: Goods::new().with("berries", 6.0),
                },
                buffer: Goods::new(),
                work_time: 0.0,
            },
        );
        alveoli.insert(
            "stockpile".to_owned(),
            AlveolusDef {
                action: ActionType::Storage,
                storage: StorageSpec::Specific {
                    capacities: Goods::new()
                        .with("wood", 20.0)
                        .with("stone", 20.0)
                        .with("planks", 20.0)
                        .with("berries", 20.0),
                },
                buffer: Goods::new(),
                work_time: 0.0,
            },
        );
        alveoli.insert(
            "warehouse".to_owned(),
            AlveolusDef {
                action: ActionType::Storage,
                storage: StorageSpec::Slotted {
                    slots: 8,
                    per_slot: 5.0,
                },
                buffer: Goods::new(),
                work_time: 0.0,
            },
        );

        Self {
            scheduler: SchedulerConfig::default(),
            character: CharacterConfig::default(),
            jobs: JobConfig::default(),
            goods,
            alveoli,
        }
    }
}
