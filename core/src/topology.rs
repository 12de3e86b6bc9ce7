use serde::{Deserialize, Serialize};

use crate::grid::{GridDims, PieceId, TopologyError, DIR_DOWN, DIR_LEFT, DIR_RIGHT, DIR_UP};
use crate::nib::{NibSpec, Orientation};
use crate::rng::Lcg;

/// Where nib randomness comes from. The two modes produce different shapes
/// for the same grid, so a session must stick to one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NibSource {
    /// Seed once, draw every edge from the running stream.
    Running { seed: u32 },
    /// Re-seed before each internal edge, row-major, right edge first.
    PerEdge { seeds: Vec<u16> },
}

impl NibSource {
    pub fn mode(&self) -> NibMode {
        match self {
            NibSource::Running { .. } => NibMode::RunningSeed,
            NibSource::PerEdge { .. } => NibMode::EdgeSeeds,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NibMode {
    #[default]
    RunningSeed,
    EdgeSeeds,
}

/// Hands out the generator state for each successive internal edge.
struct EdgeStream<'a> {
    rng: Lcg,
    seeds: Option<std::slice::Iter<'a, u16>>,
}

impl<'a> EdgeStream<'a> {
    fn new(source: &'a NibSource) -> Self {
        match source {
            NibSource::Running { seed } => Self {
                rng: Lcg::new(*seed),
                seeds: None,
            },
            NibSource::PerEdge { seeds } => Self {
                rng: Lcg::default(),
                seeds: Some(seeds.iter()),
            },
        }
    }

    fn next_nib(&mut self, inward: Orientation, outward: Orientation) -> NibSpec {
        if let Some(seeds) = self.seeds.as_mut() {
            // Length is checked before generation starts.
            let seed = seeds.next().copied().unwrap_or_default();
            self.rng.seed(u32::from(seed));
        }
        let orientation = if self.rng.next_bool() { inward } else { outward };
        NibSpec::random(orientation, &mut self.rng)
    }
}

/// Piece grid with every nib fixed. Index by [`PieceId`].
#[derive(Clone, Debug, PartialEq)]
pub struct Topology {
    dims: GridDims,
    nibs: Vec<[Option<NibSpec>; 4]>,
}

impl Topology {
    pub fn generate(dims: GridDims, source: &NibSource) -> Result<Self, TopologyError> {
        if let NibSource::PerEdge { seeds } = source {
            if seeds.len() != dims.edge_count() {
                return Err(TopologyError::NibSeedCount {
                    expected: dims.edge_count(),
                    found: seeds.len(),
                });
            }
        }
        let cols = dims.cols();
        let rows = dims.rows();
        let mut stream = EdgeStream::new(source);
        let mut nibs: Vec<[Option<NibSpec>; 4]> = Vec::with_capacity(dims.piece_count());
        for v in 0..rows {
            for u in 0..cols {
                let id = nibs.len();
                let mut sides: [Option<NibSpec>; 4] = [None; 4];
                if v > 0 {
                    sides[DIR_UP] = nibs[id - cols][DIR_DOWN].map(|nib| nib.inverse());
                }
                if u + 1 < cols {
                    sides[DIR_RIGHT] =
                        Some(stream.next_nib(Orientation::RightIn, Orientation::RightOut));
                }
                if v + 1 < rows {
                    sides[DIR_DOWN] =
                        Some(stream.next_nib(Orientation::BottomIn, Orientation::BottomOut));
                }
                if u > 0 {
                    sides[DIR_LEFT] = nibs[id - 1][DIR_RIGHT].map(|nib| nib.inverse());
                }
                nibs.push(sides);
            }
        }
        Ok(Self { dims, nibs })
    }

    pub fn dims(&self) -> GridDims {
        self.dims
    }

    pub fn piece_count(&self) -> usize {
        self.nibs.len()
    }

    pub fn nibs(&self, id: PieceId) -> Option<&[Option<NibSpec>; 4]> {
        self.nibs.get(id)
    }
}

/// Per-edge seeds drawn from a running generator, for hosts that want to
/// publish edge seeds instead of a single seed.
pub fn derive_edge_seeds(dims: GridDims, seed: u32) -> Vec<u16> {
    let mut rng = Lcg::new(seed);
    (0..dims.edge_count())
        .map(|_| (rng.next_raw() & 0xffff) as u16)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::DIRS;

    fn dims(cols: u8, rows: u8) -> GridDims {
        GridDims::new(cols, rows).unwrap()
    }

    #[test]
    fn boundary_sides_have_no_nib() {
        let grid = dims(3, 2);
        let topology = Topology::generate(grid, &NibSource::Running { seed: 9 }).unwrap();
        for id in 0..grid.piece_count() {
            let nibs = topology.nibs(id).unwrap();
            for dir in DIRS {
                assert_eq!(nibs[dir].is_some(), grid.neighbor(id, dir).is_some());
            }
        }
    }

    #[test]
    fn shared_edges_are_exact_inverses() {
        let grid = dims(4, 3);
        let topology = Topology::generate(grid, &NibSource::Running { seed: 42 }).unwrap();
        for id in 0..grid.piece_count() {
            for dir in DIRS {
                let Some(other) = grid.neighbor(id, dir) else {
                    continue;
                };
                let mine = topology.nibs(id).unwrap()[dir].unwrap();
                let theirs = topology.nibs(other).unwrap()[crate::grid::opposite_dir(dir)].unwrap();
                assert_eq!(mine.inverse(), theirs);
                assert_eq!(mine.orientation.side(), dir);
            }
        }
    }

    #[test]
    fn first_nib_of_seed_one_matches_reference() {
        let grid = dims(3, 2);
        let topology = Topology::generate(grid, &NibSource::Running { seed: 1 }).unwrap();
        let nib = topology.nibs(0).unwrap()[DIR_RIGHT].unwrap();
        let unit = |raw: u32| (f64::from(raw) / f64::from(1u32 << 30) * 2.0 - 1.0) * 0.5;
        assert_eq!(nib.orientation, Orientation::RightIn);
        assert_eq!(nib.first, (unit(376_140_462), unit(883_515_280)));
        assert_eq!(nib.shoulder, (unit(186_969_585), 1.0));
        assert_eq!(nib.second, (unit(762_888_635), unit(326_402_539)));
    }

    #[test]
    fn per_edge_mode_requires_exact_seed_count() {
        let grid = dims(3, 3);
        let err = Topology::generate(grid, &NibSource::PerEdge { seeds: vec![1, 2] }).unwrap_err();
        assert_eq!(
            err,
            TopologyError::NibSeedCount {
                expected: 12,
                found: 2
            }
        );
    }

    #[test]
    fn per_edge_nib_depends_only_on_its_seed() {
        let grid = dims(2, 2);
        let mut seeds = derive_edge_seeds(grid, 77);
        let before = Topology::generate(grid, &NibSource::PerEdge { seeds: seeds.clone() }).unwrap();
        // Edges are ordered: piece 0 right, piece 0 bottom, piece 1 bottom, piece 2 right.
        seeds[3] = seeds[3].wrapping_add(1);
        let after = Topology::generate(grid, &NibSource::PerEdge { seeds }).unwrap();
        assert_eq!(before.nibs(0), after.nibs(0));
        assert_eq!(before.nibs(1), after.nibs(1));
        assert_ne!(before.nibs(2).unwrap()[DIR_RIGHT], after.nibs(2).unwrap()[DIR_RIGHT]);
    }

    #[test]
    fn single_piece_grid_has_no_nibs() {
        let topology = Topology::generate(dims(1, 1), &NibSource::PerEdge { seeds: Vec::new() }).unwrap();
        assert_eq!(topology.piece_count(), 1);
        assert!(topology.nibs(0).unwrap().iter().all(Option::is_none));
    }
}
