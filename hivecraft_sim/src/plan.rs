// Plan lifecycle — the units of work that wrap storage allocations.
//
// A plan is owned by the character executing it and lives in that
// character's `plans` map from `begin_plan` until it is finalized. Every plan
// walks the same state machine:
//
//   Created -> Begun -> {Concluded | Cancelled} -> Finalized
//
// `begin_plan` dispatches on the plan kind:
// - Transfer (`Grab` / `Drop` / `Idle`): allocate room on the receiving side
//   first, then reserve exactly the allocated goods on the giving side. For
//   a grab the vehicle receives and the target storage gives; for a drop the
//   reverse. If either call fails, everything already acquired is cancelled
//   and the error returned, so a transfer is never left half-allocated.
// - Pickup: claim a matching, unclaimed free good at the target tile and
//   allocate vehicle room for it. Finding nothing is a graceful no-op (the
//   plan begins with nothing held). A watcher in `SimState.pickup_watchers`
//   cancels the plan if the free good disappears first.
// - Work: link worker and workplace both ways. Storage work happens later
//   through `begin_work_cycle`, from inside the work's own steps.
// - Idle: returns a duration step and allocates nothing.
//
// `conclude_plan` evaluates the plan's invariant (a false result is a defect:
// logged, rolled back, and returned as `PlanError::InvariantViolated`), then
// fulfills every held token. `cancel_plan` cancels every held token. Both run
// `finalize` exactly once afterwards, which also runs after a failed begin.
//
// Allocation tokens are `#[serde(skip)]`: no token may cross a save (see
// `SimState::to_json`).
//
// See also: `storage/mod.rs` for the token protocol, `scripts/` for the
// callers, `sim.rs` for `SimState` and the storage lookups used here.

use crate::config::ActionType;
use crate::error::{AllocationError, PlanError};
use crate::event::{SimEvent, SimEventKind};
use crate::goods::{EPSILON, GoodType, Goods};
use crate::sim::SimState;
use crate::step::Step;
use crate::storage::{AllocationToken, Storage};
use crate::types::{AlveolusId, AxialCoord, CharacterId, FreeGoodId, PlanId, StorageKey};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanPhase {
    Created,
    Begun,
    Concluded,
    Cancelled,
    Finalized,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDescription {
    /// Move goods from the target storage into the vehicle.
    Grab,
    /// Move goods from the vehicle into the target storage.
    Drop,
    /// Hold nothing; a placeholder transfer.
    Idle,
}

impl fmt::Display for TransferDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransferDescription::Grab => "grab",
            TransferDescription::Drop => "drop",
            TransferDescription::Idle => "idle",
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransferPlan {
    pub description: TransferDescription,
    /// Requested goods; narrowed to what was actually claimed on begin.
    pub goods: Goods,
    pub target: Option<AxialCoord>,
    #[serde(skip)]
    pub vehicle_allocation: Option<AllocationToken>,
    #[serde(skip)]
    pub allocation: Option<AllocationToken>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PickupPlan {
    pub good: GoodType,
    pub target: AxialCoord,
    /// The free good claimed on begin, if one was found.
    pub free_good: Option<FreeGoodId>,
    /// Quantity that will move into the vehicle.
    pub quantity: f64,
    #[serde(skip)]
    pub vehicle_allocation: Option<AllocationToken>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkJob {
    Harvest,
    Transform,
    Gather,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkPlan {
    pub job: WorkJob,
    pub target: AlveolusId,
    pub urgency: f64,
    pub fatigue: f64,
    pub assigned_worker: Option<CharacterId>,
    /// Tokens of the current work cycle.
    #[serde(skip)]
    pub allocations: Vec<AllocationToken>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdlePlan {
    pub duration: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum PlanKind {
    Transfer(TransferPlan),
    Pickup(PickupPlan),
    Work(WorkPlan),
    Idle(IdlePlan),
}

impl PlanKind {
    pub fn grab(goods: Goods, target: AxialCoord) -> Self {
        Self::transfer(TransferDescription::Grab, goods, Some(target))
    }

    pub fn drop(goods: Goods, target: AxialCoord) -> Self {
        Self::transfer(TransferDescription::Drop, goods, Some(target))
    }

    pub fn transfer(description: TransferDescription, goods: Goods, target: Option<AxialCoord>) -> Self {
        PlanKind::Transfer(TransferPlan {
            description,
            goods,
            target,
            vehicle_allocation: None,
            allocation: None,
        })
    }

    pub fn pickup(good: GoodType, target: AxialCoord) -> Self {
        PlanKind::Pickup(PickupPlan {
            good,
            target,
            free_good: None,
            quantity: 0.0,
            vehicle_allocation: None,
        })
    }

    pub fn work(job: WorkJob, target: AlveolusId, urgency: f64) -> Self {
        PlanKind::Work(WorkPlan {
            job,
            target,
            urgency,
            fatigue: 0.0,
            assigned_worker: None,
            allocations: Vec::new(),
        })
    }

    pub fn idle(duration: f64) -> Self {
        PlanKind::Idle(IdlePlan { duration })
    }

    pub fn name(&self) -> &'static str {
        match self {
            PlanKind::Transfer(_) => "transfer",
            PlanKind::Pickup(_) => "pickup",
            PlanKind::Work(_) => "work",
            PlanKind::Idle(_) => "idle",
        }
    }

    /// Every token the plan currently holds.
    pub fn tokens(&self) -> Vec<&AllocationToken> {
        match self {
            PlanKind::Transfer(t) => t.vehicle_allocation.iter().chain(t.allocation.iter()).collect(),
            PlanKind::Pickup(p) => p.vehicle_allocation.iter().collect(),
            PlanKind::Work(w) => w.allocations.iter().collect(),
            PlanKind::Idle(_) => Vec::new(),
        }
    }

    fn take_tokens(&mut self) -> Vec<AllocationToken> {
        match self {
            PlanKind::Transfer(t) => t.vehicle_allocation.take().into_iter().chain(t.allocation.take()).collect(),
            PlanKind::Pickup(p) => p.vehicle_allocation.take().into_iter().collect(),
            PlanKind::Work(w) => std::mem::take(&mut w.allocations),
            PlanKind::Idle(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub phase: PlanPhase,
    pub kind: PlanKind,
}

// ---------------------------------------------------------------------------
// Lifecycle on SimState
// ---------------------------------------------------------------------------

impl SimState {
    /// Create and begin a plan for `agent`. Returns the plan id and, for idle
    /// plans, the step to run. On failure the plan is rolled back and
    /// finalized before the error is returned.
    pub fn begin_plan(
        &mut self,
        agent: CharacterId,
        kind: PlanKind,
        events: &mut Vec<SimEvent>,
    ) -> Result<(PlanId, Option<Step>), PlanError> {
        let character = self.character_mut(agent)?;
        let id = PlanId(character.next_plan_id);
        character.next_plan_id += 1;
        let mut plan = Plan {
            id,
            phase: PlanPhase::Created,
            kind,
        };

        match self.begin_kind(agent, id, &mut plan.kind) {
            Ok(step) => {
                plan.phase = PlanPhase::Begun;
                tracing::debug!(character = %agent, plan = %id, kind = plan.kind.name(), "plan begun");
                self.emit(
                    events,
                    SimEventKind::PlanBegun {
                        character: agent,
                        plan: id,
                        kind: plan.kind.name().to_owned(),
                    },
                );
                self.character_mut(agent)?.plans.insert(id, plan);
                Ok((id, step))
            }
            Err(err) => {
                tracing::debug!(character = %agent, plan = %id, %err, "plan failed to begin");
                self.cancel_kind(agent, id, &mut plan.kind);
                plan.phase = PlanPhase::Cancelled;
                self.finalize(agent, plan);
                Err(err)
            }
        }
    }

    /// Conclude a begun plan: check its invariant, then fulfill every token.
    pub fn conclude_plan(
        &mut self,
        agent: CharacterId,
        id: PlanId,
        events: &mut Vec<SimEvent>,
    ) -> Result<(), PlanError> {
        let mut plan = self.take_plan(agent, id)?;
        if plan.phase != PlanPhase::Begun {
            let kind = plan.kind.name();
            self.character_mut(agent)?.plans.insert(id, plan);
            return Err(PlanError::NotBegun { plan: kind });
        }

        if self.invariant(agent, &plan.kind) == Some(false) {
            let kind = plan.kind.name();
            tracing::error!(character = %agent, plan = %id, kind, ?plan, "plan invariant violated at conclusion");
            self.cancel_kind(agent, id, &mut plan.kind);
            plan.phase = PlanPhase::Cancelled;
            self.emit(
                events,
                SimEventKind::PlanCancelled {
                    character: agent,
                    plan: id,
                    kind: kind.to_owned(),
                },
            );
            self.finalize(agent, plan);
            return Err(PlanError::InvariantViolated { plan: kind });
        }

        self.conclude_kind(agent, &mut plan.kind);
        plan.phase = PlanPhase::Concluded;
        tracing::debug!(character = %agent, plan = %id, kind = plan.kind.name(), "plan concluded");
        self.emit(
            events,
            SimEventKind::PlanConcluded {
                character: agent,
                plan: id,
                kind: plan.kind.name().to_owned(),
            },
        );
        self.finalize(agent, plan);
        Ok(())
    }

    /// Cancel a plan, releasing every token it holds.
    pub fn cancel_plan(
        &mut self,
        agent: CharacterId,
        id: PlanId,
        events: &mut Vec<SimEvent>,
    ) -> Result<(), PlanError> {
        let mut plan = self.take_plan(agent, id)?;
        self.cancel_kind(agent, id, &mut plan.kind);
        plan.phase = PlanPhase::Cancelled;
        tracing::debug!(character = %agent, plan = %id, kind = plan.kind.name(), "plan cancelled");
        self.emit(
            events,
            SimEventKind::PlanCancelled {
                character: agent,
                plan: id,
                kind: plan.kind.name().to_owned(),
            },
        );
        self.finalize(agent, plan);
        Ok(())
    }

    /// Cancel every plan `agent` still holds. Used when a character is
    /// interrupted or halted and its scripts may not have cleaned up.
    pub fn cancel_all_plans(&mut self, agent: CharacterId, events: &mut Vec<SimEvent>) {
        let ids: Vec<PlanId> = match self.characters.get(&agent) {
            Some(c) => c.plans.keys().rev().copied().collect(),
            None => return,
        };
        for id in ids {
            if let Err(err) = self.cancel_plan(agent, id, events) {
                tracing::warn!(character = %agent, plan = %id, %err, "failed to cancel leftover plan");
            }
        }
    }

    /// Acquire the storage tokens for one cycle of a begun work plan.
    /// Returns the cycle's work time.
    pub fn begin_work_cycle(&mut self, agent: CharacterId, id: PlanId) -> Result<f64, PlanError> {
        let mut plan = self.take_plan(agent, id)?;
        let result = self.acquire_work_tokens(agent, &mut plan.kind);
        self.character_mut(agent)?.plans.insert(id, plan);
        result
    }

    pub fn plan(&self, agent: CharacterId, id: PlanId) -> Option<&Plan> {
        self.characters.get(&agent).and_then(|c| c.plans.get(&id))
    }

    // -- Kind dispatch -------------------------------------------------------

    fn begin_kind(
        &mut self,
        agent: CharacterId,
        id: PlanId,
        kind: &mut PlanKind,
    ) -> Result<Option<Step>, PlanError> {
        match kind {
            PlanKind::Transfer(t) => self.begin_transfer(agent, t).map(|()| None),
            PlanKind::Pickup(p) => self.begin_pickup(agent, id, p).map(|()| None),
            PlanKind::Work(w) => self.begin_work(agent, w).map(|()| None),
            PlanKind::Idle(i) => Ok(Some(Step::wait("idle", i.duration))),
        }
    }

    fn begin_transfer(&mut self, agent: CharacterId, t: &mut TransferPlan) -> Result<(), PlanError> {
        if t.description == TransferDescription::Idle {
            return Ok(());
        }
        let coord = t.target.ok_or(PlanError::NoStorageAt {
            coord: self.character_mut(agent)?.position,
        })?;
        let target = self.storage_key_at(coord)?;
        let vehicle = StorageKey::Vehicle(agent);
        let (receiver, giver) = match t.description {
            TransferDescription::Grab => (vehicle, target),
            _ => (target, vehicle),
        };

        let requested = {
            let giver = self.storage(giver)?;
            let receiver = self.storage(receiver)?;
            t.goods
                .iter()
                .map(|(good, q)| {
                    let q = q.min(giver.available(good)).min(receiver.has_room(Some(good)));
                    (good.clone(), q.max(0.0))
                })
                .collect::<Goods>()
        };
        let reason = format!("{} {} by {agent}", t.description, target);
        let mut incoming = self.storage_mut(receiver)?.allocate(&requested, &reason)?;
        let claimed = incoming.goods();
        let outgoing = match self.storage_mut(giver).and_then(|s| Ok(s.reserve(&claimed, &reason)?)) {
            Ok(token) => token,
            Err(err) => {
                self.resolve(&mut incoming, false);
                return Err(err);
            }
        };
        t.goods = claimed;
        match t.description {
            TransferDescription::Grab => {
                t.vehicle_allocation = Some(incoming);
                t.allocation = Some(outgoing);
            }
            _ => {
                t.vehicle_allocation = Some(outgoing);
                t.allocation = Some(incoming);
            }
        }
        Ok(())
    }

    fn begin_pickup(&mut self, agent: CharacterId, id: PlanId, p: &mut PickupPlan) -> Result<(), PlanError> {
        let found = self
            .free_goods
            .values()
            .find(|f| f.position == p.target && f.good == p.good && f.claimed_by.is_none())
            .map(|f| (f.id, f.quantity));
        let Some((free_id, available)) = found else {
            tracing::info!(character = %agent, good = %p.good, at = %p.target, "nothing to pick up");
            return Ok(());
        };
        let vehicle = self.storage_mut(StorageKey::Vehicle(agent))?;
        let wanted = available.min(vehicle.has_room(Some(&p.good)));
        let reason = format!("pickup {} at {}", p.good, p.target);
        let token = vehicle.allocate(&Goods::new().with(p.good.clone(), wanted), &reason)?;
        p.quantity = token.goods().get(&p.good);
        p.vehicle_allocation = Some(token);
        p.free_good = Some(free_id);
        if let Some(free) = self.free_goods.get_mut(&free_id) {
            free.claimed_by = Some(agent);
        }
        self.pickup_watchers.insert(free_id, (agent, id));
        Ok(())
    }

    fn begin_work(&mut self, agent: CharacterId, w: &mut WorkPlan) -> Result<(), PlanError> {
        let alveolus = self
            .alveoli
            .get_mut(&w.target)
            .ok_or(PlanError::UnknownStorage {
                key: StorageKey::Alveolus(w.target),
            })?;
        if let Some(worker) = alveolus.worker.filter(|w| *w != agent) {
            return Err(PlanError::Occupied {
                alveolus: w.target,
                worker,
            });
        }
        alveolus.worker = Some(agent);
        self.character_mut(agent)?.workplace = Some(w.target);
        w.assigned_worker = Some(agent);
        Ok(())
    }

    fn acquire_work_tokens(&mut self, agent: CharacterId, kind: &mut PlanKind) -> Result<f64, PlanError> {
        let PlanKind::Work(w) = kind else {
            return Err(PlanError::NotBegun { plan: kind.name() });
        };
        let key = StorageKey::Alveolus(w.target);
        let (action, work_time) = {
            let alveolus = self.alveoli.get(&w.target).ok_or(PlanError::UnknownStorage { key })?;
            let def = self
                .config
                .alveolus(&alveolus.kind)
                .ok_or(PlanError::UnknownStorage { key })?;
            (def.action.clone(), def.work_time)
        };
        let reason = format!("{} cycle by {agent}", action.name());
        match action {
            ActionType::Harvest { output, quantity } => {
                let storage = self.storage_mut(key)?;
                let room = storage.has_room(Some(&output));
                let token = storage.allocate(&Goods::new().with(output, quantity.min(room)), &reason)?;
                w.allocations.push(token);
            }
            ActionType::Transform { inputs, outputs } => {
                let storage = self.storage_mut(key)?;
                let short = inputs.iter().any(|(g, q)| storage.available(g) + EPSILON < q);
                if short || !storage.can_store_all(&outputs) {
                    return Err(PlanError::Allocation(AllocationError::Nothing {
                        reason,
                        request: inputs,
                    }));
                }
                let consumed = storage.reserve(&inputs, &reason)?;
                match storage.allocate(&outputs, &reason) {
                    Ok(produced) => {
                        w.allocations.push(consumed);
                        w.allocations.push(produced);
                    }
                    Err(err) => {
                        let mut consumed = consumed;
                        storage.cancel(&mut consumed);
                        return Err(err.into());
                    }
                }
            }
            ActionType::Gather { .. } | ActionType::Storage => {}
        }
        Ok(work_time)
    }

    /// `None` when the plan kind carries no invariant.
    fn invariant(&self, agent: CharacterId, kind: &PlanKind) -> Option<bool> {
        match kind {
            PlanKind::Transfer(t) => match (&t.vehicle_allocation, &t.allocation) {
                (Some(a), Some(b)) => Some(a.goods().approx_eq(&b.goods())),
                (None, None) => Some(t.description == TransferDescription::Idle),
                _ => Some(false),
            },
            PlanKind::Pickup(p) => Some(p.free_good.is_some() == p.vehicle_allocation.is_some()),
            PlanKind::Work(w) => {
                let worker = self.alveoli.get(&w.target).and_then(|a| a.worker);
                Some(w.assigned_worker == Some(agent) && worker == Some(agent))
            }
            PlanKind::Idle(_) => None,
        }
    }

    fn conclude_kind(&mut self, agent: CharacterId, kind: &mut PlanKind) {
        for mut token in kind.take_tokens() {
            self.resolve(&mut token, true);
        }
        if let PlanKind::Pickup(p) = kind {
            if let Some(free_id) = p.free_good {
                let drained = match self.free_goods.get_mut(&free_id) {
                    Some(free) => {
                        free.quantity -= p.quantity;
                        free.claimed_by = None;
                        free.quantity <= EPSILON
                    }
                    None => false,
                };
                if drained {
                    self.free_goods.remove(&free_id);
                }
                self.release_watcher(free_id, agent);
            }
        }
    }

    fn cancel_kind(&mut self, agent: CharacterId, id: PlanId, kind: &mut PlanKind) {
        for mut token in kind.take_tokens() {
            self.resolve(&mut token, false);
        }
        if let PlanKind::Pickup(p) = kind {
            if let Some(free_id) = p.free_good {
                if let Some(free) = self.free_goods.get_mut(&free_id) {
                    if free.claimed_by == Some(agent) {
                        free.claimed_by = None;
                    }
                }
                self.release_watcher(free_id, agent);
            }
        }
        tracing::trace!(character = %agent, plan = %id, "plan tokens released");
    }

    /// Clear plan-local references. Runs exactly once per plan; the plan is
    /// dropped afterwards.
    fn finalize(&mut self, agent: CharacterId, mut plan: Plan) {
        // Terminal paths resolve every token; anything left here leaked.
        for mut token in plan.kind.take_tokens() {
            tracing::warn!(character = %agent, plan = %plan.id, allocation = %token.id(), "unresolved token at finalize");
            self.resolve(&mut token, false);
        }
        match &mut plan.kind {
            PlanKind::Work(w) => {
                if let Some(alveolus) = self.alveoli.get_mut(&w.target) {
                    if alveolus.worker == Some(agent) {
                        alveolus.worker = None;
                    }
                }
                if let Some(character) = self.characters.get_mut(&agent) {
                    if character.workplace == Some(w.target) {
                        character.workplace = None;
                    }
                }
                w.assigned_worker = None;
            }
            PlanKind::Pickup(p) => {
                if let Some(free_id) = p.free_good.take() {
                    self.release_watcher(free_id, agent);
                }
            }
            PlanKind::Transfer(_) | PlanKind::Idle(_) => {}
        }
        plan.phase = PlanPhase::Finalized;
    }

    // -- Helpers -------------------------------------------------------------

    fn take_plan(&mut self, agent: CharacterId, id: PlanId) -> Result<Plan, PlanError> {
        self.character_mut(agent)?
            .plans
            .remove(&id)
            .ok_or(PlanError::UnknownPlan { agent, plan: id })
    }

    fn release_watcher(&mut self, free_good: FreeGoodId, agent: CharacterId) {
        if self.pickup_watchers.get(&free_good).is_some_and(|(a, _)| *a == agent) {
            self.pickup_watchers.remove(&free_good);
        }
    }

    /// Fulfill or cancel `token` against whatever storage it names.
    pub(crate) fn resolve(&mut self, token: &mut AllocationToken, fulfill: bool) {
        match self.storage_mut(token.storage()) {
            Ok(storage) if fulfill => storage.fulfill(token),
            Ok(storage) => storage.cancel(token),
            Err(err) => {
                tracing::error!(allocation = %token.id(), %err, "token names a storage that no longer exists");
            }
        }
    }

    pub(crate) fn emit(&self, events: &mut Vec<SimEvent>, kind: SimEventKind) {
        events.push(SimEvent { tick: self.tick, kind });
    }
}
