// Hex board — tiles, their contents, and the borders between them.
//
// The board is sparse: only tiles that exist are stored, and anything off
// the board is impassable. Each tile has a walk time (seconds to enter it;
// `f64::INFINITY` = impassable) and optional content, currently an
// alveolus. Borders between two adjacent tiles may carry content of their
// own: a `Wall` blocks the edge outright, a `Road` scales its walk time.
//
// `HexBoard` implements `WalkGraph`, the seam pathfinding searches through.
// The cost of an edge is the walk time of the tile being entered, times the
// road factor of the border crossed, if any.
//
// Persisted form (`BoardSave`) lists tiles and borders as entry vectors,
// because coordinate keys cannot be JSON object keys, and writes infinite
// walk times as `null`.
//
// See also: `pathfinding.rs` for the searches, `plan.rs` which resolves
// "what storage lives at this coordinate" through `tile_content`.
//
// **Critical constraint: determinism.** Tiles and borders live in
// `BTreeMap`s keyed by coordinate.

use crate::types::{AlveolusId, AxialCoord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Something occupying a tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TileContent {
    Alveolus(AlveolusId),
}

/// Something sitting on the border between two adjacent tiles.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum BorderContent {
    /// The edge cannot be crossed.
    Wall,
    /// Crossing costs `factor` times the usual walk time.
    Road { factor: f64 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Tile {
    pub walk_time: f64,
    pub content: Option<TileContent>,
}

impl Tile {
    pub fn passable(&self) -> bool {
        self.walk_time.is_finite()
    }
}

/// The graph interface pathfinding needs.
pub trait WalkGraph {
    /// Cost of stepping from `from` onto the adjacent tile `to`.
    /// `f64::INFINITY` means the edge does not exist.
    fn walk_time(&self, from: AxialCoord, to: AxialCoord) -> f64;

    /// Lower bound on the cost of any single edge, used to scale the hex
    /// distance heuristic so it never overestimates.
    fn min_walk_time(&self) -> f64;
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BoardSave", into = "BoardSave")]
pub struct HexBoard {
    tiles: BTreeMap<AxialCoord, Tile>,
    /// Keyed by the ordered pair `(min, max)` of the two tiles.
    borders: BTreeMap<(AxialCoord, AxialCoord), BorderContent>,
}

fn border_key(a: AxialCoord, b: AxialCoord) -> (AxialCoord, AxialCoord) {
    if a <= b { (a, b) } else { (b, a) }
}

impl HexBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// A filled hexagon of the given radius around the origin, every tile
    /// walkable in `walk_time` seconds.
    pub fn hexagon(radius: i32, walk_time: f64) -> Self {
        let mut board = Self::new();
        for q in -radius..=radius {
            let r_min = (-radius).max(-q - radius);
            let r_max = radius.min(-q + radius);
            for r in r_min..=r_max {
                board.set_tile(AxialCoord::new(q, r), walk_time);
            }
        }
        board
    }

    /// Create or replace a tile's walk time, keeping its content.
    pub fn set_tile(&mut self, coord: AxialCoord, walk_time: f64) {
        self.tiles
            .entry(coord)
            .and_modify(|t| t.walk_time = walk_time)
            .or_insert(Tile {
                walk_time,
                content: None,
            });
    }

    pub fn tile(&self, coord: AxialCoord) -> Option<&Tile> {
        self.tiles.get(&coord)
    }

    pub fn tiles(&self) -> impl Iterator<Item = (AxialCoord, &Tile)> {
        self.tiles.iter().map(|(c, t)| (*c, t))
    }

    pub fn contains(&self, coord: AxialCoord) -> bool {
        self.tiles.contains_key(&coord)
    }

    pub fn tile_content(&self, coord: AxialCoord) -> Option<TileContent> {
        self.tiles.get(&coord).and_then(|t| t.content)
    }

    /// Set a tile's content. Returns `false` if the tile does not exist or
    /// is already occupied.
    pub fn place(&mut self, coord: AxialCoord, content: TileContent) -> bool {
        match self.tiles.get_mut(&coord) {
            Some(tile) if tile.content.is_none() => {
                tile.content = Some(content);
                true
            }
            _ => false,
        }
    }

    pub fn clear_content(&mut self, coord: AxialCoord) -> Option<TileContent> {
        self.tiles.get_mut(&coord).and_then(|t| t.content.take())
    }

    pub fn border_content(&self, a: AxialCoord, b: AxialCoord) -> Option<BorderContent> {
        self.borders.get(&border_key(a, b)).copied()
    }

    /// Put `content` on the border between two adjacent tiles. Returns
    /// `false` (and changes nothing) if they are not adjacent.
    pub fn set_border(&mut self, a: AxialCoord, b: AxialCoord, content: Option<BorderContent>) -> bool {
        if !a.is_adjacent(b) {
            return false;
        }
        match content {
            Some(c) => {
                self.borders.insert(border_key(a, b), c);
            }
            None => {
                self.borders.remove(&border_key(a, b));
            }
        }
        true
    }

    /// On-board neighbors of `coord`, passable or not.
    pub fn neighbors(&self, coord: AxialCoord) -> impl Iterator<Item = AxialCoord> + '_ {
        coord.neighbors().into_iter().filter(|n| self.contains(*n))
    }
}

impl WalkGraph for HexBoard {
    fn walk_time(&self, from: AxialCoord, to: AxialCoord) -> f64 {
        if !from.is_adjacent(to) || !self.contains(from) {
            return f64::INFINITY;
        }
        let Some(tile) = self.tiles.get(&to) else {
            return f64::INFINITY;
        };
        match self.border_content(from, to) {
            Some(BorderContent::Wall) => f64::INFINITY,
            Some(BorderContent::Road { factor }) => tile.walk_time * factor,
            None => tile.walk_time,
        }
    }

    fn min_walk_time(&self) -> f64 {
        let tile_min = self
            .tiles
            .values()
            .map(|t| t.walk_time)
            .filter(|w| w.is_finite())
            .fold(f64::INFINITY, f64::min);
        if !tile_min.is_finite() {
            return 0.0;
        }
        let road_min = self
            .borders
            .values()
            .filter_map(|b| match b {
                BorderContent::Road { factor } => Some(*factor),
                BorderContent::Wall => None,
            })
            .fold(1.0, f64::min);
        (tile_min * road_min).max(0.0)
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
struct TileSave {
    coord: AxialCoord,
    /// `None` for impassable tiles.
    walk_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<TileContent>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct BorderSave {
    a: AxialCoord,
    b: AxialCoord,
    content: BorderContent,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct BoardSave {
    tiles: Vec<TileSave>,
    #[serde(default)]
    borders: Vec<BorderSave>,
}

impl From<HexBoard> for BoardSave {
    fn from(board: HexBoard) -> Self {
        let tiles = board
            .tiles
            .into_iter()
            .map(|(coord, tile)| TileSave {
                coord,
                walk_time: tile.walk_time.is_finite().then_some(tile.walk_time),
                content: tile.content,
            })
            .collect();
        let borders = board
            .borders
            .into_iter()
            .map(|((a, b), content)| BorderSave { a, b, content })
            .collect();
        Self { tiles, borders }
    }
}

impl From<BoardSave> for HexBoard {
    fn from(save: BoardSave) -> Self {
        let tiles = save
            .tiles
            .into_iter()
            .map(|t| {
                (
                    t.coord,
                    Tile {
                        walk_time: t.walk_time.unwrap_or(f64::INFINITY),
                        content: t.content,
                    },
                )
            })
            .collect();
        let borders = save
            .borders
            .into_iter()
            .map(|b| (border_key(b.a, b.b), b.content))
            .collect();
        Self { tiles, borders }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hexagon_has_expected_tile_count() {
        // 1 + 3r(r+1) tiles in a hexagon of radius r.
        assert_eq!(HexBoard::hexagon(0, 1.0).tiles().count(), 1);
        assert_eq!(HexBoard::hexagon(2, 1.0).tiles().count(), 19);
    }

    #[test]
    fn walls_block_and_roads_scale() {
        let mut board = HexBoard::hexagon(2, 2.0);
        let a = AxialCoord::new(0, 0);
        let b = AxialCoord::new(1, 0);
        let c = AxialCoord::new(0, 1);
        assert_eq!(board.walk_time(a, b), 2.0);
        assert!(board.set_border(a, b, Some(BorderContent::Wall)));
        assert!(board.set_border(c, a, Some(BorderContent::Road { factor: 0.5 })));
        assert_eq!(board.walk_time(a, b), f64::INFINITY);
        assert_eq!(board.walk_time(b, a), f64::INFINITY);
        assert_eq!(board.walk_time(a, c), 1.0);
        assert_eq!(board.min_walk_time(), 1.0);
    }

    #[test]
    fn off_board_and_non_adjacent_edges_are_infinite() {
        let board = HexBoard::hexagon(1, 1.0);
        let origin = AxialCoord::new(0, 0);
        assert_eq!(board.walk_time(origin, AxialCoord::new(2, 0)), f64::INFINITY);
        assert_eq!(
            board.walk_time(AxialCoord::new(1, 0), AxialCoord::new(2, 0)),
            f64::INFINITY
        );
    }

    #[test]
    fn border_requires_adjacency() {
        let mut board = HexBoard::hexagon(2, 1.0);
        assert!(!board.set_border(AxialCoord::new(0, 0), AxialCoord::new(2, 0), Some(BorderContent::Wall)));
    }

    #[test]
    fn place_refuses_occupied_tiles() {
        let mut board = HexBoard::hexagon(1, 1.0);
        let c = AxialCoord::new(1, 0);
        assert!(board.place(c, TileContent::Alveolus(AlveolusId(0))));
        assert!(!board.place(c, TileContent::Alveolus(AlveolusId(1))));
        assert_eq!(board.tile_content(c), Some(TileContent::Alveolus(AlveolusId(0))));
        assert!(!board.place(AxialCoord::new(5, 5), TileContent::Alveolus(AlveolusId(2))));
    }

    #[test]
    fn board_json_roundtrip_keeps_impassable_tiles() {
        let mut board = HexBoard::hexagon(1, 1.0);
        board.set_tile(AxialCoord::new(1, 0), f64::INFINITY);
        board.place(AxialCoord::new(0, 1), TileContent::Alveolus(AlveolusId(4)));
        board.set_border(
            AxialCoord::new(0, 0),
            AxialCoord::new(-1, 0),
            Some(BorderContent::Road { factor: 0.5 }),
        );
        let json = serde_json::to_string(&board).unwrap();
        let restored: HexBoard = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, board);
        assert!(!restored.tile(AxialCoord::new(1, 0)).unwrap().passable());
    }
}
