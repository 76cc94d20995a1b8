// Job board — the default action source for idle characters.
//
// When a character's script stack runs empty, the scheduler asks its
// `ActionSource` for the next top-level frame. `JobBoard` answers from the
// economy advertisements, trying in order:
//
//   1. deliver: carried goods go to the nearest alveolus demanding them;
//   2. staff: walk to the best unstaffed harvest/transform workplace that
//      could run a cycle now (`find_best`, scored by urgency over travel);
//   3. haul: pair a provider with a demander of the same good, keeping only
//      the highest combined priority and picking the shortest round trip;
//   4. gather: send someone for a free good near an unstaffed gatherer;
//   5. idle for `idle_time`.
//
// Other characters' `JobClaim`s are subtracted from supply and demand first
// (the `Market`), so two agents are never sent for the same goods. Providers
// and demanders that are both `Low` (storage to storage) are never paired.
//
// See also: `economy.rs` for advertisements, `scripts/` for the frames built
// here, `pathfinding.rs` for the searches.
//
// **Critical constraint: determinism.** Candidates are enumerated in
// `BTreeMap` order and ties keep the first candidate. Haul path times are
// computed in parallel through `find_paths_parallel`, which returns results
// in query order.

use crate::board::TileContent;
use crate::config::ActionType;
use crate::economy::{Advertisements, Priority, advertisements, offered, wanted, work_cycle_feasible};
use crate::error::{PlanError, SchedulerError};
use crate::goods::{EPSILON, GoodType};
use crate::pathfinding::{SearchLimit, find_best, find_nearest, find_paths_parallel};
use crate::script::{ActionSource, ScriptFrame};
use crate::scripts::{deliver_frame, gather_frame, haul_frame, idle_frame, work_frame};
use crate::sim::{Character, JobClaim, SimState};
use crate::storage::Storage;
use crate::types::{AlveolusId, AxialCoord, CharacterId, FreeGoodId};
use std::collections::{BTreeMap, BTreeSet};

pub struct JobBoard;

impl ActionSource for JobBoard {
    fn next_action(&self, sim: &SimState, agent: CharacterId) -> Result<Option<ScriptFrame>, SchedulerError> {
        let character = sim.character(agent).ok_or(PlanError::UnknownAgent(agent))?;
        let market = Market::new(sim, agent);

        if let Some(frame) = deliver(sim, character, &market)? {
            return Ok(Some(frame));
        }
        if let Some(frame) = staff(sim, character)? {
            return Ok(Some(frame));
        }
        if let Some(frame) = haul(sim, character, &market)? {
            return Ok(Some(frame));
        }
        if let Some(frame) = gather(sim, &market)? {
            return Ok(Some(frame));
        }
        Ok(Some(idle_frame(sim.config.character.idle_time)?))
    }
}

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// Advertisements with everyone else's commitments subtracted.
struct Market {
    ads: BTreeMap<AlveolusId, Advertisements>,
    incoming: BTreeMap<(AlveolusId, GoodType), f64>,
    outgoing: BTreeMap<(AlveolusId, GoodType), f64>,
    gathering: BTreeSet<FreeGoodId>,
}

impl Market {
    fn new(sim: &SimState, agent: CharacterId) -> Self {
        let ads = sim
            .alveoli
            .iter()
            .map(|(id, a)| (*id, advertisements(a, &sim.config)))
            .collect();
        let mut market = Self {
            ads,
            incoming: BTreeMap::new(),
            outgoing: BTreeMap::new(),
            gathering: BTreeSet::new(),
        };
        let claims = sim
            .characters
            .values()
            .filter(|c| c.id != agent)
            .filter_map(|c| c.claim.as_ref());
        for claim in claims {
            match claim {
                JobClaim::Haul {
                    from,
                    to,
                    good,
                    quantity,
                } => {
                    if let Some(from) = from {
                        *market.outgoing.entry((*from, good.clone())).or_default() += quantity;
                    }
                    *market.incoming.entry((*to, good.clone())).or_default() += quantity;
                }
                JobClaim::Gather { free_good } => {
                    market.gathering.insert(*free_good);
                }
            }
        }
        market
    }

    fn supply(&self, sim: &SimState, alveolus: AlveolusId, good: &GoodType) -> f64 {
        let Some(a) = sim.alveolus(alveolus) else {
            return 0.0;
        };
        offered(a, good) - self.outgoing.get(&(alveolus, good.clone())).copied().unwrap_or(0.0)
    }

    fn demand(&self, sim: &SimState, alveolus: AlveolusId, good: &GoodType) -> f64 {
        let Some(a) = sim.alveolus(alveolus) else {
            return 0.0;
        };
        wanted(a, good) - self.incoming.get(&(alveolus, good.clone())).copied().unwrap_or(0.0)
    }

    fn demand_priority(&self, alveolus: AlveolusId, good: &GoodType) -> Option<Priority> {
        self.ads.get(&alveolus).and_then(|ads| ads.demands.get(good)).copied()
    }
}

fn alveolus_on(sim: &SimState, coord: AxialCoord) -> Option<AlveolusId> {
    match sim.board.tile_content(coord)? {
        TileContent::Alveolus(id) => Some(id),
    }
}

// ---------------------------------------------------------------------------
// Job kinds
// ---------------------------------------------------------------------------

fn deliver(sim: &SimState, character: &Character, market: &Market) -> Result<Option<ScriptFrame>, SchedulerError> {
    let budget = sim.config.character.job_search_time;
    for (good, carried) in character.vehicle.stock().iter() {
        if carried <= EPSILON {
            continue;
        }
        for priority in [Priority::High, Priority::Normal, Priority::Low] {
            let is_goal = |coord: AxialCoord| {
                alveolus_on(sim, coord).is_some_and(|id| {
                    market.demand_priority(id, good) == Some(priority) && market.demand(sim, id, good) > EPSILON
                })
            };
            let Some(path) = find_nearest(&sim.board, character.position, is_goal, SearchLimit::MaxTime(budget), false)
            else {
                continue;
            };
            let target = path.trailing_waypoint.unwrap_or(path.end());
            let Some(to) = alveolus_on(sim, target) else {
                continue;
            };
            let quantity = carried.min(market.demand(sim, to, good));
            tracing::debug!(character = %character.id, %to, %good, quantity, "delivering carried goods");
            return Ok(Some(deliver_frame(to, good.clone(), quantity)?));
        }
    }
    Ok(None)
}

fn staff(sim: &SimState, character: &Character) -> Result<Option<ScriptFrame>, SchedulerError> {
    let weights = sim.config.jobs;
    let urgency = |id: AlveolusId| -> Option<f64> {
        let alveolus = sim.alveolus(id)?;
        if alveolus.worker.is_some() {
            return None;
        }
        let def = sim.config.alveolus(&alveolus.kind)?;
        if !work_cycle_feasible(alveolus, def) {
            return None;
        }
        match def.action {
            ActionType::Transform { .. } => Some(weights.transform_urgency),
            ActionType::Harvest { .. } => Some(weights.harvest_urgency),
            ActionType::Gather { .. } | ActionType::Storage => None,
        }
    };
    let scoring = |coord: AxialCoord| alveolus_on(sim, coord).and_then(urgency).map(|u| 1.0 + u);
    let best = find_best(
        &sim.board,
        character.position,
        scoring,
        SearchLimit::MaxTime(sim.config.character.job_search_time),
        1.0 + weights.transform_urgency.max(weights.harvest_urgency),
        false,
    );
    let Some(best) = best else {
        return Ok(None);
    };
    let target = best.path.trailing_waypoint.unwrap_or(best.path.end());
    let Some(alveolus) = alveolus_on(sim, target) else {
        return Ok(None);
    };
    tracing::debug!(character = %character.id, %alveolus, score = best.relative_score, "staffing workplace");
    Ok(Some(work_frame(alveolus)?))
}

struct HaulCandidate {
    from: AlveolusId,
    to: AlveolusId,
    good: GoodType,
    quantity: f64,
}

fn haul(sim: &SimState, character: &Character, market: &Market) -> Result<Option<ScriptFrame>, SchedulerError> {
    let mut best_rank = None;
    let mut candidates = Vec::new();
    for (&from, provider) in &market.ads {
        for (good, &provided) in &provider.provides {
            let supply = market.supply(sim, from, good);
            if supply <= EPSILON {
                continue;
            }
            for (&to, demander) in &market.ads {
                let Some(&demanded) = demander.demands.get(good) else {
                    continue;
                };
                if to == from || (provided == Priority::Low && demanded == Priority::Low) {
                    continue;
                }
                let quantity = supply
                    .min(market.demand(sim, to, good))
                    .min(character.vehicle.has_room(Some(good)));
                if quantity <= EPSILON {
                    continue;
                }
                let rank = provided.rank() + demanded.rank();
                if best_rank.is_some_and(|best| rank < best) {
                    continue;
                }
                if best_rank.is_none_or(|best| rank > best) {
                    best_rank = Some(rank);
                    candidates.clear();
                }
                candidates.push(HaulCandidate {
                    from,
                    to,
                    good: good.clone(),
                    quantity,
                });
            }
        }
    }
    if candidates.is_empty() {
        return Ok(None);
    }

    let position_of = |id: AlveolusId| sim.alveolus(id).map(|a| a.position).unwrap_or(character.position);
    let queries: Vec<(AxialCoord, AxialCoord)> = candidates
        .iter()
        .flat_map(|c| {
            let source = position_of(c.from);
            [(character.position, source), (source, position_of(c.to))]
        })
        .collect();
    let paths = find_paths_parallel(&sim.board, &queries, sim.config.character.job_search_time, false);

    let mut chosen: Option<(f64, &HaulCandidate)> = None;
    for (candidate, legs) in candidates.iter().zip(paths.chunks(2)) {
        let [Some(to_source), Some(to_dest)] = legs else {
            continue;
        };
        let time = to_source.time + to_dest.time;
        if chosen.is_none_or(|(best, _)| time < best) {
            chosen = Some((time, candidate));
        }
    }
    let Some((time, c)) = chosen else {
        return Ok(None);
    };
    tracing::debug!(
        character = %character.id,
        from = %c.from,
        to = %c.to,
        good = %c.good,
        quantity = c.quantity,
        time,
        "hauling"
    );
    Ok(Some(haul_frame(c.from, c.to, c.good.clone(), c.quantity)?))
}

fn gather(sim: &SimState, market: &Market) -> Result<Option<ScriptFrame>, SchedulerError> {
    let mut lying: BTreeMap<(AxialCoord, GoodType), FreeGoodId> = BTreeMap::new();
    for free in sim.free_goods.values() {
        if free.claimed_by.is_none() && !market.gathering.contains(&free.id) {
            lying.entry((free.position, free.good.clone())).or_insert(free.id);
        }
    }
    if lying.is_empty() {
        return Ok(None);
    }

    for (&id, alveolus) in &sim.alveoli {
        if alveolus.worker.is_some() {
            continue;
        }
        let Some(ActionType::Gather { good, range }) = sim.config.alveolus(&alveolus.kind).map(|d| &d.action) else {
            continue;
        };
        if market.demand(sim, id, good) <= EPSILON {
            continue;
        }
        let is_goal = |coord: AxialCoord| lying.contains_key(&(coord, good.clone()));
        let Some(path) = find_nearest(&sim.board, alveolus.position, is_goal, SearchLimit::MaxTime(*range), true)
        else {
            continue;
        };
        let Some(&free_good) = lying.get(&(path.end(), good.clone())) else {
            continue;
        };
        tracing::debug!(gatherer = %id, %free_good, "gathering");
        return Ok(Some(gather_frame(id, free_good)?));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::HexBoard;
    use crate::config::GameConfig;
    use crate::scripts::{GATHER, GatherState, HAUL, HaulState, IDLE, WORK, WorkState};

    fn good(name: &str) -> GoodType {
        GoodType::from(name)
    }

    fn world() -> (SimState, CharacterId) {
        let mut sim = SimState::new(GameConfig::default(), HexBoard::hexagon(4, 1.0));
        let agent = sim.spawn_character(AxialCoord::new(0, 0), &mut Vec::new()).unwrap();
        (sim, agent)
    }

    fn place(sim: &mut SimState, kind: &str, q: i32, r: i32) -> AlveolusId {
        sim.place_alveolus(kind, AxialCoord::new(q, r), &mut Vec::new()).unwrap()
    }

    fn stock(sim: &mut SimState, id: AlveolusId, name: &str, quantity: f64) {
        sim.alveoli.get_mut(&id).unwrap().storage.add_good(&good(name), quantity);
    }

    fn next(sim: &SimState, agent: CharacterId) -> ScriptFrame {
        JobBoard.next_action(sim, agent).unwrap().unwrap()
    }

    #[test]
    fn nothing_to_do_idles() {
        let (mut sim, agent) = world();
        let stockpile = place(&mut sim, "stockpile", 1, 0);
        stock(&mut sim, stockpile, "wood", 3.0);
        assert_eq!(next(&sim, agent).script_name, IDLE);
    }

    #[test]
    fn unstaffed_harvester_is_staffed() {
        let (mut sim, agent) = world();
        let chopper = place(&mut sim, "tree-chopper", 2, 0);
        let frame = next(&sim, agent);
        assert_eq!(frame.script_name, WORK);
        assert_eq!(frame.state::<WorkState>().unwrap().alveolus, chopper);
    }

    #[test]
    fn transform_outranks_harvest_at_equal_distance() {
        let (mut sim, agent) = world();
        place(&mut sim, "tree-chopper", 2, 0);
        let sawmill = place(&mut sim, "sawmill", -2, 0);
        stock(&mut sim, sawmill, "wood", 1.0);
        let frame = next(&sim, agent);
        assert_eq!(frame.state::<WorkState>().unwrap().alveolus, sawmill);
    }

    #[test]
    fn staffing_weights_come_from_config() {
        let (mut sim, agent) = world();
        let chopper = place(&mut sim, "tree-chopper", 2, 0);
        let sawmill = place(&mut sim, "sawmill", -2, 0);
        stock(&mut sim, sawmill, "wood", 1.0);
        sim.config.jobs.transform_urgency = 0.2;
        sim.config.jobs.harvest_urgency = 1.5;
        let frame = next(&sim, agent);
        assert_eq!(frame.state::<WorkState>().unwrap().alveolus, chopper);
    }

    #[test]
    fn full_harvester_is_emptied_into_storage() {
        let (mut sim, agent) = world();
        let chopper = place(&mut sim, "tree-chopper", 2, 0);
        let stockpile = place(&mut sim, "stockpile", -2, 0);
        stock(&mut sim, chopper, "wood", 4.0);
        let frame = next(&sim, agent);
        assert_eq!(frame.script_name, HAUL);
        let state: HaulState = frame.state().unwrap();
        assert_eq!(state.from, Some(chopper));
        assert_eq!(state.to, stockpile);
        // Two vehicle slots of one unit each.
        assert_eq!(state.quantity, 2.0);
    }

    #[test]
    fn claimed_supply_is_not_hauled_twice() {
        let (mut sim, agent) = world();
        let chopper = place(&mut sim, "tree-chopper", 2, 0);
        let stockpile = place(&mut sim, "stockpile", -2, 0);
        stock(&mut sim, chopper, "wood", 4.0);
        let other = sim.spawn_character(AxialCoord::new(0, 1), &mut Vec::new()).unwrap();
        sim.characters.get_mut(&other).unwrap().claim = Some(JobClaim::Haul {
            from: Some(chopper),
            to: stockpile,
            good: good("wood"),
            quantity: 4.0,
        });
        assert_eq!(next(&sim, agent).script_name, IDLE);
    }

    #[test]
    fn storage_to_storage_is_never_hauled() {
        let (mut sim, agent) = world();
        let a = place(&mut sim, "stockpile", 2, 0);
        place(&mut sim, "warehouse", -2, 0);
        stock(&mut sim, a, "stone", 5.0);
        assert_eq!(next(&sim, agent).script_name, IDLE);
    }

    #[test]
    fn high_priority_demand_wins_over_distance() {
        let (mut sim, agent) = world();
        let chopper = place(&mut sim, "tree-chopper", 1, 0);
        place(&mut sim, "stockpile", 2, 0);
        let far = place(&mut sim, "stockpile", -4, 0);
        stock(&mut sim, chopper, "wood", 4.0);
        assert!(sim.set_buffer_target(far, good("wood"), 2.0));
        let state: HaulState = next(&sim, agent).state().unwrap();
        assert_eq!(state.to, far);
    }

    #[test]
    fn carried_goods_are_delivered_first() {
        let (mut sim, agent) = world();
        let stockpile = place(&mut sim, "stockpile", 0, 3);
        place(&mut sim, "tree-chopper", 1, 0);
        sim.characters.get_mut(&agent).unwrap().vehicle.add_good(&good("stone"), 1.0);
        let frame = next(&sim, agent);
        assert_eq!(frame.script_name, crate::scripts::DELIVER);
        let state: HaulState = frame.state().unwrap();
        assert_eq!(state.from, None);
        assert_eq!(state.to, stockpile);
        assert_eq!(state.quantity, 1.0);
    }

    #[test]
    fn free_goods_near_a_gatherer_are_fetched() {
        let (mut sim, agent) = world();
        let gatherer = place(&mut sim, "berry-gatherer", 2, 0);
        let free = sim
            .drop_free_good(good("berries"), 1.0, AxialCoord::new(3, 0), &mut Vec::new())
            .unwrap();
        let frame = next(&sim, agent);
        assert_eq!(frame.script_name, GATHER);
        let state: GatherState = frame.state().unwrap();
        assert_eq!(state.gatherer, gatherer);
        assert_eq!(state.free_good, free);

        let other = sim.spawn_character(AxialCoord::new(0, 1), &mut Vec::new()).unwrap();
        sim.characters.get_mut(&other).unwrap().claim = Some(JobClaim::Gather { free_good: free });
        assert_eq!(next(&sim, agent).script_name, IDLE);
    }
}
