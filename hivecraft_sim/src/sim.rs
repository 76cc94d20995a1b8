// Core simulation state and tick driver.
//
// `SimState` is the single source of truth for the colony: the hex board,
// every alveolus with its storage, every character with its carried vehicle
// storage, plans and scheduler, and the free goods lying around. The sim is
// a pure function: `(state, commands, dt) -> (new_state, events)`.
//
// ## One step
//
// `step(commands, dt)` advances the tick counter and then:
//   1. applies every command due by this tick, in slice order;
//   2. decays perishable goods (half-life from the good catalog) in alveolus
//      storages, touching unreserved stock only;
//   3. updates every non-halted character's scheduler by `dt`, in id order.
// In debug builds it then checks every storage for outstanding allocations
// that no live plan holds, and logs each as a leak.
//
// ## Per-agent failure boundary
//
// A `SchedulerError` from one character's update is a script defect. It is
// logged, the character's stack is unwound, its plans are cancelled, and it
// is marked `halted` (emitting `CharacterHalted`). Other characters are
// unaffected. An `Interrupt` command resumes a halted character.
//
// ## Lending schedulers
//
// Scripts need `&mut SimState`, and the scheduler driving them lives inside
// a character. `with_scheduler` takes the scheduler out of its character for
// the duration of the call and puts it back afterwards.
//
// ## Persistence
//
// `to_json` refuses to save while any allocation is outstanding
// (`SaveError::PendingAllocations`): tokens are transient and a save point is
// only valid between whole transfers. `from_json` restores and calls
// `rebuild_transient_state`, which re-keys storages and installs the default
// `Behavior`. Callers using custom scripts call `set_behavior` again.
//
// See also: `plan.rs` for the plan lifecycle (also an `impl SimState`),
// `scheduler.rs` for the per-agent drive loop, `command.rs` / `event.rs` for
// the inputs and outputs of `step`.
//
// **Critical constraint: determinism.** Entity maps are `BTreeMap`s, entity
// ids are sequential, and characters update in id order. The only parallel
// work (path queries in `jobs.rs`) returns results in input order.

use crate::board::{HexBoard, TileContent};
use crate::command::{SimAction, SimCommand};
use crate::config::GameConfig;
use crate::error::{PlanError, SaveError, SchedulerError};
use crate::event::{SimEvent, SimEventKind};
use crate::goods::{EPSILON, GoodType, Goods};
use crate::plan::Plan;
use crate::scheduler::Scheduler;
use crate::script::{Behavior, ScriptContext, ScriptFrame};
use crate::storage::{AnyStorage, SlottedStorage, Storage};
use crate::types::{AlveolusId, AxialCoord, CharacterId, FreeGoodId, PlanId, StorageKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The result of one `step`.
pub struct StepResult {
    pub events: Vec<SimEvent>,
}

/// What a character has committed to, so job discovery does not hand the
/// same goods or the same free good to two agents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum JobClaim {
    Haul {
        /// `None` once the goods are loaded.
        from: Option<AlveolusId>,
        to: AlveolusId,
        good: GoodType,
        quantity: f64,
    },
    Gather {
        free_good: FreeGoodId,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Character {
    pub id: CharacterId,
    pub position: AxialCoord,
    pub vehicle: SlottedStorage,
    pub scheduler: Scheduler,
    pub plans: BTreeMap<PlanId, Plan>,
    pub next_plan_id: u32,
    pub workplace: Option<AlveolusId>,
    pub claim: Option<JobClaim>,
    pub halted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Alveolus {
    pub id: AlveolusId,
    /// Catalog kind, a key of `GameConfig::alveoli`.
    pub kind: String,
    pub position: AxialCoord,
    pub storage: AnyStorage,
    /// Buffer targets, seeded from the catalog.
    pub buffer: Goods,
    pub worker: Option<CharacterId>,
}

/// A good lying on a tile outside any storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FreeGood {
    pub id: FreeGoodId,
    pub good: GoodType,
    pub position: AxialCoord,
    pub quantity: f64,
    /// The character whose pickup plan holds it.
    pub claimed_by: Option<CharacterId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SimState {
    pub tick: u64,
    /// Simulated seconds elapsed.
    pub time: f64,
    pub config: GameConfig,
    pub board: HexBoard,
    pub alveoli: BTreeMap<AlveolusId, Alveolus>,
    pub characters: BTreeMap<CharacterId, Character>,
    pub free_goods: BTreeMap<FreeGoodId, FreeGood>,
    /// Free goods held by a pickup plan, with the plan to cancel if the good
    /// is removed.
    pub pickup_watchers: BTreeMap<FreeGoodId, (CharacterId, PlanId)>,
    next_character_id: u32,
    next_alveolus_id: u32,
    next_free_good_id: u32,
    #[serde(skip)]
    pub behavior: Behavior,
}

impl SimState {
    pub fn new(config: GameConfig, board: HexBoard) -> Self {
        Self {
            tick: 0,
            time: 0.0,
            config,
            board,
            alveoli: BTreeMap::new(),
            characters: BTreeMap::new(),
            free_goods: BTreeMap::new(),
            pickup_watchers: BTreeMap::new(),
            next_character_id: 0,
            next_alveolus_id: 0,
            next_free_good_id: 0,
            behavior: Behavior::default(),
        }
    }

    pub fn set_behavior(&mut self, behavior: Behavior) {
        self.behavior = behavior;
    }

    pub fn character(&self, id: CharacterId) -> Option<&Character> {
        self.characters.get(&id)
    }

    pub fn alveolus(&self, id: AlveolusId) -> Option<&Alveolus> {
        self.alveoli.get(&id)
    }

    pub fn alveolus_at(&self, coord: AxialCoord) -> Option<&Alveolus> {
        match self.board.tile_content(coord)? {
            TileContent::Alveolus(id) => self.alveoli.get(&id),
        }
    }

    pub(crate) fn character_mut(&mut self, id: CharacterId) -> Result<&mut Character, PlanError> {
        self.characters.get_mut(&id).ok_or(PlanError::UnknownAgent(id))
    }

    pub fn storage(&self, key: StorageKey) -> Result<&dyn Storage, PlanError> {
        match key {
            StorageKey::Alveolus(id) => {
                if let Some(alveolus) = self.alveoli.get(&id) {
                    return Ok(&*alveolus.storage);
                }
            }
            StorageKey::Vehicle(id) => {
                if let Some(character) = self.characters.get(&id) {
                    return Ok(&character.vehicle);
                }
            }
            StorageKey::Detached(_) => {}
        }
        Err(PlanError::UnknownStorage { key })
    }

    pub fn storage_mut(&mut self, key: StorageKey) -> Result<&mut dyn Storage, PlanError> {
        match key {
            StorageKey::Alveolus(id) => {
                if let Some(alveolus) = self.alveoli.get_mut(&id) {
                    return Ok(&mut *alveolus.storage);
                }
            }
            StorageKey::Vehicle(id) => {
                if let Some(character) = self.characters.get_mut(&id) {
                    return Ok(&mut character.vehicle);
                }
            }
            StorageKey::Detached(_) => {}
        }
        Err(PlanError::UnknownStorage { key })
    }

    /// The storage of whatever stands on `coord`.
    pub fn storage_key_at(&self, coord: AxialCoord) -> Result<StorageKey, PlanError> {
        match self.board.tile_content(coord) {
            Some(TileContent::Alveolus(id)) => Ok(StorageKey::Alveolus(id)),
            None => Err(PlanError::NoStorageAt { coord }),
        }
    }

    // -----------------------------------------------------------------------
    // World edits
    // -----------------------------------------------------------------------

    /// Add a character on a passable tile. Returns `None` otherwise.
    pub fn spawn_character(&mut self, position: AxialCoord, events: &mut Vec<SimEvent>) -> Option<CharacterId> {
        if !self.board.tile(position)?.passable() {
            return None;
        }
        let id = CharacterId(self.next_character_id);
        self.next_character_id += 1;
        let spec = &self.config.character;
        let character = Character {
            id,
            position,
            vehicle: SlottedStorage::new(StorageKey::Vehicle(id), spec.vehicle_slots, spec.vehicle_slot_capacity),
            scheduler: Scheduler::new(),
            plans: BTreeMap::new(),
            next_plan_id: 0,
            workplace: None,
            claim: None,
            halted: false,
        };
        self.characters.insert(id, character);
        tracing::debug!(character = %id, %position, "character spawned");
        self.emit(events, SimEventKind::CharacterSpawned { character: id, position });
        Some(id)
    }

    /// Build an alveolus of catalog `kind` on an empty tile.
    pub fn place_alveolus(&mut self, kind: &str, position: AxialCoord, events: &mut Vec<SimEvent>) -> Option<AlveolusId> {
        let Some(def) = self.config.alveolus(kind) else {
            tracing::warn!(kind, "unknown alveolus kind");
            return None;
        };
        let id = AlveolusId(self.next_alveolus_id);
        let storage = def.storage.build(StorageKey::Alveolus(id));
        let buffer = def.buffer.clone();
        if !self.board.place(position, TileContent::Alveolus(id)) {
            tracing::warn!(kind, %position, "tile missing or occupied");
            return None;
        }
        self.next_alveolus_id += 1;
        self.alveoli.insert(
            id,
            Alveolus {
                id,
                kind: kind.to_owned(),
                position,
                storage,
                buffer,
                worker: None,
            },
        );
        self.emit(
            events,
            SimEventKind::AlveolusPlaced {
                alveolus: id,
                kind: kind.to_owned(),
                position,
            },
        );
        Some(id)
    }

    pub fn drop_free_good(
        &mut self,
        good: GoodType,
        quantity: f64,
        position: AxialCoord,
        events: &mut Vec<SimEvent>,
    ) -> Option<FreeGoodId> {
        if quantity <= EPSILON || !self.board.contains(position) {
            return None;
        }
        let id = FreeGoodId(self.next_free_good_id);
        self.next_free_good_id += 1;
        self.emit(
            events,
            SimEventKind::FreeGoodDropped {
                free_good: id,
                good: good.clone(),
                quantity,
                position,
            },
        );
        self.free_goods.insert(
            id,
            FreeGood {
                id,
                good,
                position,
                quantity,
                claimed_by: None,
            },
        );
        Some(id)
    }

    /// Remove a free good. A pickup plan holding it is cancelled through
    /// its character's scheduler.
    pub fn remove_free_good(&mut self, id: FreeGoodId, events: &mut Vec<SimEvent>) -> Option<FreeGood> {
        let removed = self.free_goods.remove(&id)?;
        self.emit(events, SimEventKind::FreeGoodRemoved { free_good: id });
        if let Some((agent, plan)) = self.pickup_watchers.remove(&id) {
            tracing::debug!(character = %agent, %plan, free_good = %id, "watched free good removed");
            if let Err(err) = self.cancel_character_plan(agent, plan, events) {
                self.halt_character(agent, &err, events);
            }
        }
        Some(removed)
    }

    pub fn set_buffer_target(&mut self, alveolus: AlveolusId, good: GoodType, quantity: f64) -> bool {
        match self.alveoli.get_mut(&alveolus) {
            Some(a) => {
                a.buffer.set(good, quantity.max(0.0));
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Scheduler access
    // -----------------------------------------------------------------------

    /// Run `f` with `agent`'s scheduler lent out of its character.
    pub fn with_scheduler<R>(
        &mut self,
        agent: CharacterId,
        events: &mut Vec<SimEvent>,
        f: impl FnOnce(&mut Scheduler, &mut ScriptContext<'_>) -> R,
    ) -> Result<R, PlanError> {
        let mut scheduler = std::mem::take(&mut self.character_mut(agent)?.scheduler);
        let result = f(
            &mut scheduler,
            &mut ScriptContext {
                sim: self,
                agent,
                events,
            },
        );
        if let Some(character) = self.characters.get_mut(&agent) {
            character.scheduler = scheduler;
        }
        Ok(result)
    }

    /// Abandon everything `agent` is doing and start `frame`.
    pub fn interrupt(
        &mut self,
        agent: CharacterId,
        frame: ScriptFrame,
        events: &mut Vec<SimEvent>,
    ) -> Result<(), SchedulerError> {
        self.character_mut(agent)?.halted = false;
        self.with_scheduler(agent, events, |scheduler, ctx| {
            scheduler.abandon(ctx);
            ctx.sim.release_character(ctx.agent, ctx.events);
            scheduler.abandon_and(ctx, frame)
        })?
    }

    /// Cancel one of `agent`'s plans and let its scripts recover.
    pub fn cancel_character_plan(
        &mut self,
        agent: CharacterId,
        plan: PlanId,
        events: &mut Vec<SimEvent>,
    ) -> Result<(), SchedulerError> {
        self.with_scheduler(agent, events, |scheduler, ctx| scheduler.cancel_plan(ctx, plan))?
    }

    fn release_character(&mut self, agent: CharacterId, events: &mut Vec<SimEvent>) {
        self.cancel_all_plans(agent, events);
        if let Some(character) = self.characters.get_mut(&agent) {
            character.claim = None;
        }
    }

    fn halt_character(&mut self, agent: CharacterId, err: &SchedulerError, events: &mut Vec<SimEvent>) {
        tracing::error!(character = %agent, %err, "scheduling defect, halting character");
        if let Err(unwind) = self.with_scheduler(agent, events, |scheduler, ctx| scheduler.abandon(ctx)) {
            tracing::warn!(character = %agent, %unwind, "could not unwind halted character");
        }
        self.release_character(agent, events);
        if let Some(character) = self.characters.get_mut(&agent) {
            character.halted = true;
        }
        self.emit(
            events,
            SimEventKind::CharacterHalted {
                character: agent,
                reason: err.to_string(),
            },
        );
    }

    fn update_character(&mut self, agent: CharacterId, dt: f64, events: &mut Vec<SimEvent>) {
        if self.characters.get(&agent).is_none_or(|c| c.halted) {
            return;
        }
        let outcome = self
            .with_scheduler(agent, events, |scheduler, ctx| scheduler.update(ctx, dt))
            .map_err(SchedulerError::from)
            .and_then(|r| r);
        if let Err(err) = outcome {
            self.halt_character(agent, &err, events);
        }
    }

    // -----------------------------------------------------------------------
    // Tick driver
    // -----------------------------------------------------------------------

    /// Apply the commands due by the next tick and advance everything by
    /// `dt` seconds.
    pub fn step(&mut self, commands: &[SimCommand], dt: f64) -> StepResult {
        let mut events = Vec::new();
        self.tick += 1;
        self.time += dt;

        for command in commands {
            if command.tick > self.tick {
                tracing::warn!(tick = self.tick, command_tick = command.tick, "ignoring command from the future");
                continue;
            }
            self.apply_command(command, &mut events);
        }

        self.apply_decay(dt);

        let agents: Vec<CharacterId> = self.characters.keys().copied().collect();
        for agent in agents {
            self.update_character(agent, dt, &mut events);
        }

        if cfg!(debug_assertions) {
            self.report_leaks();
        }
        StepResult { events }
    }

    fn apply_command(&mut self, command: &SimCommand, events: &mut Vec<SimEvent>) {
        match &command.action {
            SimAction::SpawnCharacter { position } => {
                if self.spawn_character(*position, events).is_none() {
                    tracing::warn!(%position, "cannot spawn character");
                }
            }
            SimAction::PlaceAlveolus { kind, position } => {
                self.place_alveolus(kind, *position, events);
            }
            SimAction::DropFreeGood { good, quantity, position } => {
                self.drop_free_good(good.clone(), *quantity, *position, events);
            }
            SimAction::RemoveFreeGood { free_good } => {
                self.remove_free_good(*free_good, events);
            }
            SimAction::SetBufferTarget { alveolus, good, quantity } => {
                if !self.set_buffer_target(*alveolus, good.clone(), *quantity) {
                    tracing::warn!(%alveolus, "no such alveolus");
                }
            }
            SimAction::Interrupt { character, frame } => {
                if let Err(err) = self.interrupt(*character, frame.clone(), events) {
                    self.halt_character(*character, &err, events);
                }
            }
            SimAction::CancelPlan { character, plan } => {
                if let Err(err) = self.cancel_character_plan(*character, *plan, events) {
                    self.halt_character(*character, &err, events);
                }
            }
        }
    }

    /// Unreserved stock of perishable goods halves every `half_life`
    /// seconds.
    fn apply_decay(&mut self, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        let config = &self.config;
        for alveolus in self.alveoli.values_mut() {
            for (good, available) in alveolus.storage.availables().iter() {
                let Some(half_life) = config.half_life(good) else {
                    continue;
                };
                let loss = available * (1.0 - 0.5_f64.powf(dt / half_life));
                if loss > 0.0 {
                    alveolus.storage.remove_good(good, loss);
                }
            }
        }
    }

    /// Outstanding allocations that no live plan holds.
    pub fn leaked_allocations(&self) -> Vec<(StorageKey, String)> {
        let held: BTreeSet<_> = self
            .characters
            .values()
            .flat_map(|c| c.plans.values())
            .flat_map(|p| p.kind.tokens())
            .map(|t| (t.storage(), t.id()))
            .collect();
        self.storages()
            .flat_map(|s| {
                s.guard()
                    .outstanding()
                    .filter(|(id, _)| !held.contains(&(s.key(), *id)))
                    .map(|(_, entry)| (s.key(), entry.reason.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn report_leaks(&self) {
        for (storage, reason) in self.leaked_allocations() {
            tracing::warn!(%storage, reason, "allocation outstanding with no plan holding it");
        }
    }

    fn storages(&self) -> impl Iterator<Item = &dyn Storage> {
        self.alveoli
            .values()
            .map(|a| &*a.storage)
            .chain(self.characters.values().map(|c| &c.vehicle as &dyn Storage))
    }

    /// Number of allocations outstanding across all storages.
    pub fn pending_allocations(&self) -> usize {
        self.storages().map(|s| s.guard().outstanding_count()).sum()
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Rebuild transient (`#[serde(skip)]`) state after deserialization.
    pub fn rebuild_transient_state(&mut self) {
        for (id, alveolus) in &mut self.alveoli {
            alveolus.storage.set_key(StorageKey::Alveolus(*id));
        }
        for (id, character) in &mut self.characters {
            character.vehicle.set_key(StorageKey::Vehicle(*id));
        }
        self.behavior = Behavior::default();
    }

    pub fn to_json(&self) -> Result<String, SaveError> {
        let count = self.pending_allocations();
        if count > 0 {
            return Err(SaveError::PendingAllocations { count });
        }
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SaveError> {
        let mut state: SimState = serde_json::from_str(json)?;
        state.rebuild_transient_state();
        Ok(state)
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;

    /// A radius-3 board with a stockpile holding 5 wood at `<1, 0>` and one
    /// character at the origin.
    pub fn market() -> (SimState, CharacterId, AlveolusId) {
        let mut sim = SimState::new(GameConfig::default(), HexBoard::hexagon(3, 1.0));
        let mut events = Vec::new();
        let stockpile = sim
            .place_alveolus("stockpile", AxialCoord::new(1, 0), &mut events)
            .expect("stockpile placed");
        sim.alveoli
            .get_mut(&stockpile)
            .expect("stockpile exists")
            .storage
            .add_good(&GoodType::from("wood"), 5.0);
        let agent = sim
            .spawn_character(AxialCoord::new(0, 0), &mut events)
            .expect("character spawned");
        (sim, agent, stockpile)
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::market;
    use super::*;
    use crate::plan::PlanKind;
    use crate::scripts::idle_frame;

    fn good(name: &str) -> GoodType {
        GoodType::from(name)
    }

    #[test]
    fn spawn_rejects_off_board_and_impassable_tiles() {
        let mut board = HexBoard::hexagon(1, 1.0);
        board.set_tile(AxialCoord::new(1, 0), f64::INFINITY);
        let mut sim = SimState::new(GameConfig::default(), board);
        let mut events = Vec::new();
        assert!(sim.spawn_character(AxialCoord::new(5, 5), &mut events).is_none());
        assert!(sim.spawn_character(AxialCoord::new(1, 0), &mut events).is_none());
        assert_eq!(sim.spawn_character(AxialCoord::new(0, 0), &mut events), Some(CharacterId(0)));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn place_alveolus_rejects_unknown_kinds_and_occupied_tiles() {
        let (mut sim, _, _) = market();
        let mut events = Vec::new();
        assert!(sim.place_alveolus("castle", AxialCoord::new(0, 1), &mut events).is_none());
        assert!(sim.place_alveolus("quarry", AxialCoord::new(1, 0), &mut events).is_none());
        let quarry = sim.place_alveolus("quarry", AxialCoord::new(0, 1), &mut events).unwrap();
        assert_eq!(sim.alveolus_at(AxialCoord::new(0, 1)).map(|a| a.id), Some(quarry));
    }

    #[test]
    fn save_refused_while_allocations_are_pending() {
        let (mut sim, agent, stockpile) = market();
        let coord = sim.alveoli[&stockpile].position;
        let mut events = Vec::new();
        let (plan, _) = sim
            .begin_plan(agent, PlanKind::grab(Goods::new().with("wood", 1.0), coord), &mut events)
            .unwrap();
        assert!(matches!(sim.to_json(), Err(SaveError::PendingAllocations { count: 2 })));
        assert!(sim.leaked_allocations().is_empty());
        sim.cancel_plan(agent, plan, &mut events).unwrap();
        assert!(sim.to_json().is_ok());
    }

    #[test]
    fn json_roundtrip_restores_storage_keys() {
        let (sim, agent, stockpile) = market();
        let json = sim.to_json().unwrap();
        let restored = SimState::from_json(&json).unwrap();
        assert_eq!(restored.alveoli[&stockpile].storage.key(), StorageKey::Alveolus(stockpile));
        assert_eq!(restored.characters[&agent].vehicle.key(), StorageKey::Vehicle(agent));
        assert_eq!(restored.alveoli[&stockpile].storage.stock().get(&good("wood")), 5.0);
        assert_eq!(restored.to_json().unwrap(), json);
    }

    #[test]
    fn decay_halves_unreserved_stock_per_half_life() {
        let (mut sim, _, stockpile) = market();
        let berries = good("berries");
        sim.alveoli.get_mut(&stockpile).unwrap().storage.add_good(&berries, 8.0);
        sim.apply_decay(600.0);
        let left = sim.alveoli[&stockpile].storage.stock().get(&berries);
        assert!((left - 4.0).abs() < 1e-9);
        // Wood has no half-life.
        assert_eq!(sim.alveoli[&stockpile].storage.stock().get(&good("wood")), 5.0);
    }

    #[test]
    fn decay_spares_reserved_stock() {
        let (mut sim, _, stockpile) = market();
        let berries = good("berries");
        let storage = &mut sim.alveoli.get_mut(&stockpile).unwrap().storage;
        storage.add_good(&berries, 2.0);
        let mut token = storage.reserve(&Goods::new().with("berries", 2.0), "held").unwrap();
        sim.apply_decay(6000.0);
        let storage = &mut sim.alveoli.get_mut(&stockpile).unwrap().storage;
        assert_eq!(storage.stock().get(&berries), 2.0);
        storage.cancel(&mut token);
    }

    #[test]
    fn removing_a_watched_free_good_cancels_the_pickup() {
        let (mut sim, agent, _) = market();
        let mut events = Vec::new();
        let spot = AxialCoord::new(-1, 0);
        let free = sim.drop_free_good(good("berries"), 1.0, spot, &mut events).unwrap();
        let (plan, _) = sim
            .begin_plan(agent, PlanKind::pickup(good("berries"), spot), &mut events)
            .unwrap();
        assert!(sim.characters[&agent].vehicle.has_pending());

        sim.remove_free_good(free, &mut events).unwrap();
        assert!(sim.plan(agent, plan).is_none());
        assert!(!sim.characters[&agent].vehicle.has_pending());
        assert!(sim.pickup_watchers.is_empty());
        assert!(events.iter().any(|e| matches!(e.kind, SimEventKind::PlanCancelled { .. })));
    }

    #[test]
    fn dropping_a_free_good_is_reported() {
        let (mut sim, _, _) = market();
        let mut events = Vec::new();
        assert!(sim.drop_free_good(good("berries"), 0.0, AxialCoord::new(-1, 0), &mut events).is_none());
        assert!(sim.drop_free_good(good("berries"), 1.0, AxialCoord::new(9, 9), &mut events).is_none());
        assert!(events.is_empty());

        let free = sim.drop_free_good(good("berries"), 1.5, AxialCoord::new(-1, 0), &mut events).unwrap();
        assert_eq!(
            events.last().map(|e| &e.kind),
            Some(&SimEventKind::FreeGoodDropped {
                free_good: free,
                good: good("berries"),
                quantity: 1.5,
                position: AxialCoord::new(-1, 0),
            })
        );
    }

    #[test]
    fn commands_from_the_future_are_ignored() {
        let (mut sim, _, _) = market();
        let commands = [SimCommand {
            tick: 5,
            action: SimAction::SpawnCharacter {
                position: AxialCoord::new(0, 2),
            },
        }];
        sim.step(&commands, 0.1);
        assert_eq!(sim.characters.len(), 1);
    }

    #[test]
    fn interrupt_resumes_a_halted_character() {
        let (mut sim, agent, _) = market();
        sim.characters.get_mut(&agent).unwrap().halted = true;
        let result = sim.step(
            &[SimCommand {
                tick: 1,
                action: SimAction::Interrupt {
                    character: agent,
                    frame: idle_frame(5.0).unwrap(),
                },
            }],
            1.0,
        );
        assert!(!sim.characters[&agent].halted);
        assert!(result.events.iter().any(|e| matches!(e.kind, SimEventKind::PlanBegun { .. })));
        let step = sim.characters[&agent].scheduler.active_step().unwrap();
        assert!((step.remaining() - 4.0).abs() < 1e-9);
    }
}
