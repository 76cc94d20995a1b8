// Benchmarks for hex-board pathfinding.
//
// Board: a radius-40 hexagon with a ring of impassable tiles at radius 20,
// broken by one gap, so long searches have to detour around it.
//   - find_path at three distance tiers (short, across the ring, edge to edge)
//   - find_nearest for a sparse predicate
//   - find_best over a scattered score field
//   - find_paths_parallel over a batch of 64 queries
//
// Run with: cargo bench -p hivecraft_sim --bench pathfinding

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use hivecraft_sim::board::HexBoard;
use hivecraft_sim::pathfinding::{SearchLimit, find_best, find_nearest, find_path, find_paths_parallel};
use hivecraft_sim::types::AxialCoord;

const RADIUS: i32 = 40;
const RING: u32 = 20;

fn board() -> HexBoard {
    let mut board = HexBoard::hexagon(RADIUS, 1.0);
    let origin = AxialCoord::new(0, 0);
    let gap = AxialCoord::new(RING as i32, 0);
    let ring: Vec<AxialCoord> = board
        .tiles()
        .map(|(c, _)| c)
        .filter(|c| c.hex_distance(origin) == RING && *c != gap)
        .collect();
    for coord in ring {
        board.set_tile(coord, f64::INFINITY);
    }
    board
}

fn bench_find_path(c: &mut Criterion) {
    let board = board();
    let mut group = c.benchmark_group("find_path");
    let tiers = [
        ("short", AxialCoord::new(0, 0), AxialCoord::new(5, 3)),
        ("through_gap", AxialCoord::new(-5, 0), AxialCoord::new(-30, 10)),
        ("edge_to_edge", AxialCoord::new(-RADIUS, 0), AxialCoord::new(RADIUS, 0)),
    ];
    for (name, start, goal) in tiers {
        group.bench_with_input(BenchmarkId::from_parameter(name), &(start, goal), |b, &(s, g)| {
            b.iter(|| find_path(black_box(&board), s, g, f64::INFINITY, true))
        });
    }
    group.finish();
}

fn bench_find_nearest(c: &mut Criterion) {
    let board = board();
    c.bench_function("find_nearest/sparse", |b| {
        b.iter(|| {
            find_nearest(
                black_box(&board),
                AxialCoord::new(0, 0),
                |c| c.q % 17 == 0 && c.r == 30,
                SearchLimit::MaxTime(200.0),
                false,
            )
        })
    });
}

fn bench_find_best(c: &mut Criterion) {
    let board = board();
    let scoring = |c: AxialCoord| ((c.q * 7 + c.r * 13).rem_euclid(97) == 0).then(|| 1.0 + (c.q.abs() % 5) as f64);
    c.bench_function("find_best/scattered", |b| {
        b.iter(|| {
            find_best(
                black_box(&board),
                AxialCoord::new(0, 0),
                scoring,
                SearchLimit::MaxTime(80.0),
                5.0,
                true,
            )
        })
    });
}

fn bench_parallel(c: &mut Criterion) {
    let board = board();
    let queries: Vec<(AxialCoord, AxialCoord)> = (0..64)
        .map(|i| (AxialCoord::new(-(i % 30), i % 9), AxialCoord::new(25 + i % 10, -(i % 12))))
        .collect();
    c.bench_function("find_paths_parallel/64", |b| {
        b.iter(|| find_paths_parallel(black_box(&board), &queries, f64::INFINITY, false))
    });
}

criterion_group!(benches, bench_find_path, bench_find_nearest, bench_find_best, bench_parallel);
criterion_main!(benches);
