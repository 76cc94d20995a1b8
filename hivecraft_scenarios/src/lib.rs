// Scenario harness for end-to-end simulation tests.
//
// Wraps a real `SimState` with a small synchronous driver: world-building
// helpers that go through the same command path as a game would
// (`SimCommand`s queued and applied on the next tick), a fixed-`dt` run
// loop that records every event, and probes for the things scenario tests
// assert on (stock levels, conserved totals, halted characters).
//
// Everything the harness does to the world it does through `SimAction`s,
// except `stock`, which seeds storages directly before a run starts. The
// command log can be exported as JSON and replayed into a fresh sim.
//
// See also: `tests/end_to_end.rs` for the scenarios.

use hivecraft_sim::board::HexBoard;
use hivecraft_sim::command::{SimAction, SimCommand};
use hivecraft_sim::config::GameConfig;
use hivecraft_sim::error::SaveError;
use hivecraft_sim::event::{SimEvent, SimEventKind};
use hivecraft_sim::goods::GoodType;
use hivecraft_sim::script::Behavior;
use hivecraft_sim::sim::SimState;
use hivecraft_sim::storage::Storage;
use hivecraft_sim::types::{AlveolusId, AxialCoord, CharacterId, FreeGoodId};

/// Default tick length, in simulated seconds.
pub const DT: f64 = 0.25;

pub struct Scenario {
    pub sim: SimState,
    pending: Vec<SimAction>,
    log: Vec<SimCommand>,
    pub events: Vec<SimEvent>,
}

impl Scenario {
    /// A hexagonal board of the given radius with the default catalog.
    pub fn new(radius: i32) -> Self {
        Self::with_config(radius, GameConfig::default())
    }

    pub fn with_config(radius: i32, config: GameConfig) -> Self {
        Self::from_sim(SimState::new(config, HexBoard::hexagon(radius, 1.0)))
    }

    pub fn from_sim(sim: SimState) -> Self {
        Self {
            sim,
            pending: Vec::new(),
            log: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn set_behavior(&mut self, behavior: Behavior) {
        self.sim.set_behavior(behavior);
    }

    /// Queue an action for the next tick.
    pub fn submit(&mut self, action: SimAction) {
        self.pending.push(action);
    }

    /// Place an alveolus right away (through one tick with no elapsed time).
    pub fn place(&mut self, kind: &str, q: i32, r: i32) -> Option<AlveolusId> {
        let position = AxialCoord::new(q, r);
        self.submit(SimAction::PlaceAlveolus {
            kind: kind.to_owned(),
            position,
        });
        self.tick(0.0);
        self.sim.alveolus_at(position).map(|a| a.id)
    }

    pub fn spawn(&mut self, q: i32, r: i32) -> Option<CharacterId> {
        let before = self.sim.characters.len();
        self.submit(SimAction::SpawnCharacter {
            position: AxialCoord::new(q, r),
        });
        self.tick(0.0);
        (self.sim.characters.len() > before)
            .then(|| self.sim.characters.keys().next_back().copied())
            .flatten()
    }

    pub fn drop_free_good(&mut self, good: &str, quantity: f64, q: i32, r: i32) -> Option<FreeGoodId> {
        let before: Vec<FreeGoodId> = self.sim.free_goods.keys().copied().collect();
        self.submit(SimAction::DropFreeGood {
            good: GoodType::from(good),
            quantity,
            position: AxialCoord::new(q, r),
        });
        self.tick(0.0);
        self.sim.free_goods.keys().copied().find(|id| !before.contains(id))
    }

    /// Put goods straight into an alveolus's storage. Returns what fit.
    pub fn stock(&mut self, alveolus: AlveolusId, good: &str, quantity: f64) -> f64 {
        match self.sim.alveoli.get_mut(&alveolus) {
            Some(a) => a.storage.add_good(&GoodType::from(good), quantity),
            None => 0.0,
        }
    }

    /// Apply queued commands and advance by `dt`.
    pub fn tick(&mut self, dt: f64) {
        let tick = self.sim.tick + 1;
        let commands: Vec<SimCommand> = self
            .pending
            .drain(..)
            .map(|action| SimCommand { tick, action })
            .collect();
        let result = self.sim.step(&commands, dt);
        self.log.extend(commands);
        self.events.extend(result.events);
    }

    /// Run for `seconds` of simulated time in `DT` ticks.
    pub fn run(&mut self, seconds: f64) {
        let ticks = (seconds / DT).ceil() as u64;
        for _ in 0..ticks {
            self.tick(DT);
        }
    }

    /// Tick until `done` holds, for at most `max_seconds`. Returns whether
    /// it held.
    pub fn run_until(&mut self, max_seconds: f64, mut done: impl FnMut(&SimState) -> bool) -> bool {
        let ticks = (max_seconds / DT).ceil() as u64;
        for _ in 0..ticks {
            if done(&self.sim) {
                return true;
            }
            self.tick(DT);
        }
        done(&self.sim)
    }

    /// Tick until the sim can be saved, then save. Gives up after
    /// `max_seconds`.
    pub fn save_when_settled(&mut self, max_seconds: f64) -> Result<String, SaveError> {
        let ticks = (max_seconds / DT).ceil() as u64;
        for _ in 0..ticks {
            match self.sim.to_json() {
                Err(SaveError::PendingAllocations { .. }) => self.tick(DT),
                other => return other,
            }
        }
        self.sim.to_json()
    }

    // -----------------------------------------------------------------------
    // Probes
    // -----------------------------------------------------------------------

    /// Stock of `good` held by an alveolus.
    pub fn stock_of(&self, alveolus: AlveolusId, good: &str) -> f64 {
        self.sim
            .alveolus(alveolus)
            .map_or(0.0, |a| a.storage.stock().get(&GoodType::from(good)))
    }

    /// Everything of `good` in the world: alveolus storages, vehicles and
    /// free goods.
    pub fn total(&self, good: &str) -> f64 {
        let good = GoodType::from(good);
        let stored: f64 = self.sim.alveoli.values().map(|a| a.storage.stock().get(&good)).sum();
        let carried: f64 = self.sim.characters.values().map(|c| c.vehicle.stock().get(&good)).sum();
        let lying: f64 = self
            .sim
            .free_goods
            .values()
            .filter(|f| f.good == good)
            .map(|f| f.quantity)
            .sum();
        stored + carried + lying
    }

    pub fn halted(&self) -> Vec<CharacterId> {
        self.sim
            .characters
            .values()
            .filter(|c| c.halted)
            .map(|c| c.id)
            .collect()
    }

    pub fn count_events(&self, matches: impl Fn(&SimEventKind) -> bool) -> usize {
        self.events.iter().filter(|e| matches(&e.kind)).count()
    }

    /// Every command applied so far, as JSON.
    pub fn command_log_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.log)
    }
}

/// Parse a command log produced by `Scenario::command_log_json`.
pub fn parse_command_log(json: &str) -> Result<Vec<SimCommand>, serde_json::Error> {
    serde_json::from_str(json)
}
