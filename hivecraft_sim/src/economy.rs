// Economy advertisements — what each alveolus offers and wants.
//
// Every alveolus advertises, per good type, whether it provides the good
// (has unreserved stock to give away) or demands it (has room and a reason
// to fill it), with a `Priority`. The job board pairs providers with
// demanders to create haul jobs, and sends carried goods to demanders.
//
// Rules, by the alveolus's catalog action:
//
// | action      | provides                    | demands                     |
// |-------------|-----------------------------|-----------------------------|
// | harvest     | output, Normal              |                             |
// | transform   | outputs, Normal             | inputs with room, Normal    |
// | gather      | gathered good, Normal       |                             |
// | storage     | every catalog good, Low     | every catalog good, Low     |
//
// On top of these, any unmet buffer target (`Alveolus::buffer`) is a High
// demand. An alveolus may provide and demand the same good; the job board
// never pairs an alveolus with itself.
//
// See also: `jobs.rs` which consumes the advertisements, `config.rs` for
// the action catalog.
//
// **Critical constraint: determinism.** Advertisements are `BTreeMap`s keyed
// by good type and are recomputed from state on every query.

use crate::config::{ActionType, AlveolusDef, GameConfig};
use crate::goods::{EPSILON, GoodType, Goods};
use crate::sim::Alveolus;
use crate::storage::{Storage, buffer_deficit};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Priority {
    pub fn rank(self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Advertisements {
    pub provides: BTreeMap<GoodType, Priority>,
    pub demands: BTreeMap<GoodType, Priority>,
}

impl Advertisements {
    fn provide(&mut self, good: &GoodType, priority: Priority) {
        raise(&mut self.provides, good, priority);
    }

    fn demand(&mut self, good: &GoodType, priority: Priority) {
        raise(&mut self.demands, good, priority);
    }
}

fn raise(map: &mut BTreeMap<GoodType, Priority>, good: &GoodType, priority: Priority) {
    let entry = map.entry(good.clone()).or_insert(priority);
    *entry = (*entry).max(priority);
}

/// Unreserved stock of `good` the alveolus could give away.
pub fn offered(alveolus: &Alveolus, good: &GoodType) -> f64 {
    alveolus.storage.available(good)
}

/// How much more of `good` the alveolus has room for.
pub fn wanted(alveolus: &Alveolus, good: &GoodType) -> f64 {
    alveolus.storage.has_room(Some(good))
}

pub fn advertisements(alveolus: &Alveolus, config: &GameConfig) -> Advertisements {
    let mut ads = Advertisements::default();
    let storage: &dyn Storage = &*alveolus.storage;

    for (good, _) in buffer_deficit(storage, &alveolus.buffer).iter() {
        ads.demand(good, Priority::High);
    }

    let Some(def) = config.alveolus(&alveolus.kind) else {
        return ads;
    };
    match &def.action {
        ActionType::Harvest { output, .. } => {
            if offered(alveolus, output) > EPSILON {
                ads.provide(output, Priority::Normal);
            }
        }
        ActionType::Transform { inputs, outputs } => {
            for (good, _) in outputs.iter() {
                if offered(alveolus, good) > EPSILON {
                    ads.provide(good, Priority::Normal);
                }
            }
            for (good, _) in inputs.iter() {
                if wanted(alveolus, good) > EPSILON {
                    ads.demand(good, Priority::Normal);
                }
            }
        }
        ActionType::Gather { good, .. } => {
            if offered(alveolus, good) > EPSILON {
                ads.provide(good, Priority::Normal);
            }
        }
        ActionType::Storage => {
            for good in config.goods.keys() {
                if offered(alveolus, good) > EPSILON {
                    ads.provide(good, Priority::Low);
                }
                if wanted(alveolus, good) > EPSILON {
                    ads.demand(good, Priority::Low);
                }
            }
        }
    }
    ads
}

/// Whether a staffed workplace could run one cycle right now: a harvest
/// needs room for some output, a transform needs its full inputs available
/// and room for all outputs. Gatherers and storages never run cycles.
pub fn work_cycle_feasible(alveolus: &Alveolus, def: &AlveolusDef) -> bool {
    match &def.action {
        ActionType::Harvest { output, .. } => wanted(alveolus, output) > EPSILON,
        ActionType::Transform { inputs, outputs } => {
            inputs_available(alveolus, inputs) && alveolus.storage.can_store_all(outputs)
        }
        ActionType::Gather { .. } | ActionType::Storage => false,
    }
}

fn inputs_available(alveolus: &Alveolus, inputs: &Goods) -> bool {
    inputs
        .iter()
        .all(|(good, quantity)| offered(alveolus, good) + EPSILON >= quantity)
}
