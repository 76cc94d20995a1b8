// Pathfinding over the hex board.
//
// Three searches share one open-set shape, a `BinaryHeap` min-heap via
// reversed ordering:
//
// - `find_path`: A* from a start to a known goal. The heuristic is hex
//   distance times the graph's cheapest edge, which never overestimates.
// - `find_nearest`: Dijkstra expansion until a tile satisfies a predicate.
// - `find_best`: Dijkstra expansion maximizing `score / (1 + time)`, with
//   branch-and-bound against a caller-supplied best possible score.
//
// All three take a `punctual` flag. Punctual searches must stand on the
// target tile. Non-punctual ones stop on a neighbor of it and record the
// target as a trailing waypoint the walker faces but never enters.
//
// Edges of infinite cost are skipped. Running out of budget is a normal
// "no result" (`None`), never an error.
//
// Search bookkeeping (g-scores, came-from links) uses `FxHashMap`s, which
// are only ever probed by key, never iterated. `find_paths_parallel` fans
// independent queries out over rayon and returns results in input order.
//
// See also: `board.rs` for `WalkGraph` and `HexBoard`, `jobs.rs` which
// scores job candidates through these searches, `scripts/walk.rs` which
// turns a `Path` into a multi-hop move step.
//
// **Critical constraint: determinism.** Heap ties break on coordinate order,
// so equal-cost searches always expand tiles in the same sequence.

use crate::board::WalkGraph;
use crate::types::AxialCoord;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// The result of a successful search.
#[derive(Clone, Debug, PartialEq)]
pub struct Path {
    /// Tiles walked, from start to the last tile stood on (inclusive).
    pub tiles: Vec<AxialCoord>,
    /// Total traversal time.
    pub time: f64,
    /// The target tile of a non-punctual search, not entered.
    pub trailing_waypoint: Option<AxialCoord>,
}

impl Path {
    fn single(start: AxialCoord) -> Self {
        Self {
            tiles: vec![start],
            time: 0.0,
            trailing_waypoint: None,
        }
    }

    /// Last tile stood on.
    pub fn end(&self) -> AxialCoord {
        self.tiles.last().copied().unwrap_or(AxialCoord::new(0, 0))
    }

    /// Walked tiles followed by the trailing waypoint, if any.
    pub fn waypoints(&self) -> Vec<AxialCoord> {
        let mut all = self.tiles.clone();
        all.extend(self.trailing_waypoint);
        all
    }
}

/// How far an expanding search may go.
#[derive(Clone, Copy)]
pub enum SearchLimit<'a> {
    /// Prune branches that cost more than this.
    MaxTime(f64),
    /// Prune a branch when the predicate, given its cost so far and its tile,
    /// returns `true`.
    Prune(&'a dyn Fn(f64, AxialCoord) -> bool),
}

impl SearchLimit<'_> {
    fn prunes(&self, time: f64, coord: AxialCoord) -> bool {
        match self {
            SearchLimit::MaxTime(max) => time > *max,
            SearchLimit::Prune(f) => f(time, coord),
        }
    }
}

/// The outcome of `find_best`.
#[derive(Clone, Debug, PartialEq)]
pub struct BestPath {
    pub path: Path,
    /// Raw score of the chosen tile.
    pub score: f64,
    /// `score / (1 + path.time)`.
    pub relative_score: f64,
}

/// Hex distance scaled by the cheapest edge of `graph`. Symmetric, and a
/// lower bound on any path cost between `a` and `b`.
pub fn heuristic(graph: &impl WalkGraph, a: AxialCoord, b: AxialCoord) -> f64 {
    a.hex_distance(b) as f64 * graph.min_walk_time()
}

// ---------------------------------------------------------------------------
// Open set
// ---------------------------------------------------------------------------

struct OpenEntry {
    coord: AxialCoord,
    priority: f64,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority.total_cmp(&other.priority) == Ordering::Equal && self.coord == other.coord
    }
}

impl Eq for OpenEntry {}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap: smallest priority is "greatest".
        other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| other.coord.cmp(&self.coord))
    }
}

/// Shared Dijkstra/A* state.
struct Search {
    open: BinaryHeap<OpenEntry>,
    g_score: FxHashMap<AxialCoord, f64>,
    came_from: FxHashMap<AxialCoord, AxialCoord>,
}

impl Search {
    fn new(start: AxialCoord, start_priority: f64) -> Self {
        let mut search = Self {
            open: BinaryHeap::new(),
            g_score: FxHashMap::default(),
            came_from: FxHashMap::default(),
        };
        search.g_score.insert(start, 0.0);
        search.open.push(OpenEntry {
            coord: start,
            priority: start_priority,
        });
        search
    }

    fn g(&self, coord: AxialCoord) -> f64 {
        self.g_score.get(&coord).copied().unwrap_or(f64::INFINITY)
    }

    /// Pop the next unexpanded tile with its g-score, skipping stale entries.
    fn pop(&mut self, heuristic: impl Fn(AxialCoord) -> f64) -> Option<(AxialCoord, f64)> {
        while let Some(entry) = self.open.pop() {
            let g = self.g(entry.coord);
            // A stale entry was pushed before a cheaper route was found.
            if entry.priority > g + heuristic(entry.coord) {
                continue;
            }
            return Some((entry.coord, g));
        }
        None
    }

    /// Relax every finite edge out of `current`.
    fn expand(
        &mut self,
        graph: &impl WalkGraph,
        current: AxialCoord,
        current_g: f64,
        prune: impl Fn(f64, AxialCoord) -> bool,
        heuristic: impl Fn(AxialCoord) -> f64,
    ) {
        for neighbor in current.neighbors() {
            let cost = graph.walk_time(current, neighbor);
            if !cost.is_finite() {
                continue;
            }
            let tentative = current_g + cost;
            if tentative >= self.g(neighbor) || prune(tentative, neighbor) {
                continue;
            }
            self.g_score.insert(neighbor, tentative);
            self.came_from.insert(neighbor, current);
            self.open.push(OpenEntry {
                coord: neighbor,
                priority: tentative + heuristic(neighbor),
            });
        }
    }

    fn reconstruct(&self, end: AxialCoord, trailing_waypoint: Option<AxialCoord>) -> Path {
        let mut tiles = vec![end];
        let mut current = end;
        while let Some(prev) = self.came_from.get(&current) {
            tiles.push(*prev);
            current = *prev;
        }
        tiles.reverse();
        Path {
            tiles,
            time: self.g(end),
            trailing_waypoint,
        }
    }
}

// ---------------------------------------------------------------------------
// Searches
// ---------------------------------------------------------------------------

/// Shortest path from `start` to `goal` costing at most `max_time`.
///
/// With `punctual = false` the path ends on a neighbor of `goal` and
/// `goal` becomes its trailing waypoint. Returns `None` if the goal is
/// unreachable within the budget.
pub fn find_path(
    graph: &impl WalkGraph,
    start: AxialCoord,
    goal: AxialCoord,
    max_time: f64,
    punctual: bool,
) -> Option<Path> {
    if start == goal {
        return Some(Path::single(start));
    }
    let min_edge = graph.min_walk_time();
    // Non-punctual searches stop one tile short, so the bound shrinks by one.
    let h = |c: AxialCoord| {
        let d = c.hex_distance(goal) as f64;
        let d = if punctual { d } else { (d - 1.0).max(0.0) };
        d * min_edge
    };
    let reached = |c: AxialCoord| if punctual { c == goal } else { c.is_adjacent(goal) };

    let mut search = Search::new(start, h(start));
    while let Some((current, g)) = search.pop(h) {
        if reached(current) {
            let waypoint = (!punctual).then_some(goal);
            return Some(search.reconstruct(current, waypoint));
        }
        search.expand(graph, current, g, |t, _| t > max_time, h);
    }
    None
}

/// Path to the closest tile satisfying `is_goal`.
///
/// A start that already qualifies yields a single-tile path. Non-punctual
/// searches stop on the first tile adjacent to a qualifying one, without
/// needing to be able to enter it.
pub fn find_nearest(
    graph: &impl WalkGraph,
    start: AxialCoord,
    is_goal: impl Fn(AxialCoord) -> bool,
    limit: SearchLimit<'_>,
    punctual: bool,
) -> Option<Path> {
    if is_goal(start) {
        return Some(Path::single(start));
    }
    let no_h = |_: AxialCoord| 0.0;
    let mut search = Search::new(start, 0.0);
    while let Some((current, g)) = search.pop(no_h) {
        if punctual {
            if is_goal(current) {
                return Some(search.reconstruct(current, None));
            }
        } else if let Some(target) = current.neighbors().into_iter().find(|n| is_goal(*n)) {
            return Some(search.reconstruct(current, Some(target)));
        }
        search.expand(graph, current, g, |t, c| limit.prunes(t, c), no_h);
    }
    None
}

/// Path to the tile maximizing `score / (1 + travel time)`.
///
/// `scoring` returns `None` for tiles that are not candidates.
/// `best_possible_score` bounds every raw score from above; once no
/// frontier tile could beat the current best even with that score, the
/// search stops. Returns `None` only if no tile, the start included,
/// produced a score.
pub fn find_best(
    graph: &impl WalkGraph,
    start: AxialCoord,
    scoring: impl Fn(AxialCoord) -> Option<f64>,
    limit: SearchLimit<'_>,
    best_possible_score: f64,
    punctual: bool,
) -> Option<BestPath> {
    let no_h = |_: AxialCoord| 0.0;
    let mut best: Option<Candidate> = None;
    if let Some(score) = scoring(start) {
        consider(&mut best, score, 0.0, start, None);
    }

    let mut search = Search::new(start, 0.0);
    while let Some((current, g)) = search.pop(no_h) {
        if let Some(candidate) = &best {
            if best_possible_score / (1.0 + g) <= candidate.relative {
                break;
            }
        }
        if punctual {
            if current != start {
                if let Some(score) = scoring(current) {
                    consider(&mut best, score, g, current, None);
                }
            }
        } else {
            for n in current.neighbors() {
                if n == start {
                    continue;
                }
                if let Some(score) = scoring(n) {
                    consider(&mut best, score, g, current, Some(n));
                }
            }
        }
        search.expand(graph, current, g, |t, c| limit.prunes(t, c), no_h);
    }

    let best = best?;
    let path = search.reconstruct(best.stand, best.waypoint);
    Some(BestPath {
        path,
        score: best.score,
        relative_score: best.relative,
    })
}

struct Candidate {
    relative: f64,
    score: f64,
    stand: AxialCoord,
    waypoint: Option<AxialCoord>,
}

fn consider(
    best: &mut Option<Candidate>,
    score: f64,
    g: f64,
    stand: AxialCoord,
    waypoint: Option<AxialCoord>,
) {
    let relative = score / (1.0 + g);
    if best.as_ref().is_none_or(|b| relative > b.relative) {
        *best = Some(Candidate {
            relative,
            score,
            stand,
            waypoint,
        });
    }
}

/// Evaluate independent `(start, goal)` path queries in parallel. Results
/// are in query order.
pub fn find_paths_parallel<G: WalkGraph + Sync>(
    graph: &G,
    queries: &[(AxialCoord, AxialCoord)],
    max_time: f64,
    punctual: bool,
) -> Vec<Option<Path>> {
    queries
        .par_iter()
        .map(|&(start, goal)| find_path(graph, start, goal, max_time, punctual))
        .collect()
}
