//! Board state: topology, groups and canonical positions in one arena.

use crate::connectivity::Connectivity;
use crate::grid::{piece_local_offset, GridDims, PieceId};
use crate::layout::PlayRegion;
use crate::topology::Topology;
use crate::wire::PieceState;

#[derive(Clone, Debug)]
pub struct Board {
    topology: Topology,
    connectivity: Connectivity,
    positions: Vec<(f32, f32)>,
    piece_size: (f32, f32),
    z_levels: Vec<u32>,
    z_counter: u32,
}

impl Board {
    /// Every piece starts at the origin in its own group.
    pub fn new(topology: Topology, piece_size: (f32, f32)) -> Self {
        let total = topology.piece_count();
        Self {
            topology,
            connectivity: Connectivity::new(total),
            positions: vec![(0.0, 0.0); total],
            piece_size,
            z_levels: vec![0; total],
            z_counter: 0,
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn dims(&self) -> GridDims {
        self.topology.dims()
    }

    pub fn piece_count(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> &[(f32, f32)] {
        &self.positions
    }

    pub fn position(&self, id: PieceId) -> Option<(f32, f32)> {
        self.positions.get(id).copied()
    }

    pub fn z_level(&self, id: PieceId) -> Option<u32> {
        self.z_levels.get(id).copied()
    }

    pub fn piece_size(&self) -> (f32, f32) {
        self.piece_size
    }

    pub fn is_solved(&self) -> bool {
        self.connectivity.is_solved()
    }

    /// Canonical offset of `id` from `anchor` under the current piece size.
    pub fn offset_from(&self, id: PieceId, anchor: PieceId) -> (f32, f32) {
        piece_local_offset(
            id,
            anchor,
            self.dims().cols(),
            self.piece_size.0,
            self.piece_size.1,
        )
    }

    /// Joins two groups. Interactive merges snap the folded group onto the
    /// survivor's representative right away; snapshot merges leave positions
    /// alone until [`Board::derive_all`].
    pub fn merge(&mut self, a: PieceId, b: PieceId, interactive: bool) -> bool {
        if !self.connectivity.merge(a, b, interactive) {
            return false;
        }
        let members = self.connectivity.members(a);
        let top = members
            .iter()
            .map(|&id| self.z_levels[id])
            .max()
            .unwrap_or_default();
        for &id in members {
            self.z_levels[id] = top;
        }
        if interactive {
            self.derive_group(a);
        }
        true
    }

    /// Places every member of `id`'s group relative to its representative.
    pub fn derive_group(&mut self, id: PieceId) {
        if !self.connectivity.contains(id) {
            return;
        }
        let rep = self.connectivity.representative_of(id);
        self.place_group(rep, self.positions[rep]);
    }

    pub fn derive_all(&mut self) {
        let reps: Vec<PieceId> = self.connectivity.groups().map(|group| group[0]).collect();
        for rep in reps {
            self.derive_group(rep);
        }
    }

    /// Moves `anchor` to `pos` and lays its whole group out around it.
    pub fn place_group(&mut self, anchor: PieceId, pos: (f32, f32)) {
        if !self.connectivity.contains(anchor) {
            return;
        }
        let (cols, size) = (self.dims().cols(), self.piece_size);
        for &id in self.connectivity.members(anchor) {
            let (dx, dy) = piece_local_offset(id, anchor, cols, size.0, size.1);
            self.positions[id] = (pos.0 + dx, pos.1 + dy);
        }
    }

    /// Translates `id`'s group by `delta`, narrowed so no member leaves
    /// `region`. Returns the delta actually applied.
    pub fn translate_group(
        &mut self,
        id: PieceId,
        delta: (f32, f32),
        region: PlayRegion,
    ) -> (f32, f32) {
        if !self.connectivity.contains(id) {
            return (0.0, 0.0);
        }
        let mut applied = delta;
        for &member in self.connectivity.members(id) {
            applied = region.clamp_delta(self.positions[member], applied);
        }
        let members = self.connectivity.members(id);
        for &member in members {
            let pos = &mut self.positions[member];
            pos.0 += applied.0;
            pos.1 += applied.1;
        }
        applied
    }

    /// Lifts `id`'s group above everything else.
    pub fn raise_group(&mut self, id: PieceId) {
        if !self.connectivity.contains(id) {
            return;
        }
        self.z_counter += 1;
        for &member in self.connectivity.members(id) {
            self.z_levels[member] = self.z_counter;
        }
    }

    /// Changes the canonical piece size and re-lays out every group.
    pub fn set_piece_size(&mut self, piece_size: (f32, f32)) {
        self.piece_size = piece_size;
        self.derive_all();
    }

    pub fn set_positions(&mut self, positions: &[(f32, f32)]) {
        let count = positions.len().min(self.positions.len());
        self.positions[..count].copy_from_slice(&positions[..count]);
    }

    /// Folds a representative-valued connectivity array into the groups.
    /// Pieces the array names as their own representative are promoted to
    /// the front of their local group. Returns whether any group grew.
    pub fn apply_connectivity(&mut self, connectivity: &[u16]) -> bool {
        let mut grew = false;
        for (id, &rep) in connectivity.iter().enumerate() {
            grew |= self.connectivity.merge(rep as usize, id, false);
        }
        for (id, &rep) in connectivity.iter().enumerate() {
            if rep as usize == id && self.connectivity.contains(id) {
                self.connectivity.make_representative(id);
            }
        }
        if grew {
            self.level_all();
        }
        grew
    }

    /// Overwrites group anchors from an authoritative snapshot.
    ///
    /// Only pieces the snapshot names as representatives carry a meaningful
    /// position. `blocked` decides per local representative whether the
    /// group keeps its local position; moves shorter than `epsilon` are
    /// skipped. Returns the anchors that moved.
    pub fn apply_positions<F>(
        &mut self,
        state: &PieceState,
        epsilon: f32,
        mut blocked: F,
    ) -> Vec<PieceId>
    where
        F: FnMut(PieceId) -> bool,
    {
        let mut moved = Vec::new();
        for (id, &rep) in state.connectivity.iter().enumerate() {
            if rep as usize != id || !self.connectivity.contains(id) {
                continue;
            }
            if blocked(self.connectivity.representative_of(id)) {
                continue;
            }
            let Some(&target) = state.positions.get(id) else {
                continue;
            };
            let current = self.positions[id];
            let (dx, dy) = (target.0 - current.0, target.1 - current.1);
            if dx * dx + dy * dy < epsilon * epsilon {
                continue;
            }
            self.place_group(id, target);
            moved.push(id);
        }
        moved
    }

    /// Applies a full snapshot: connectivity first, then every group's
    /// anchor, ignoring local edits.
    pub fn load_state(&mut self, state: &PieceState) {
        self.apply_connectivity(&state.connectivity);
        for (id, &rep) in state.connectivity.iter().enumerate() {
            if rep as usize == id {
                if let Some(&pos) = state.positions.get(id) {
                    if id < self.positions.len() {
                        self.positions[id] = pos;
                    }
                }
            }
        }
        self.derive_all();
    }

    pub fn state(&self) -> PieceState {
        PieceState {
            positions: self.positions.clone(),
            connectivity: self.connectivity.to_wire(),
        }
    }

    fn level_all(&mut self) {
        let groups: Vec<Vec<PieceId>> = self.connectivity.groups().map(<[_]>::to_vec).collect();
        for group in groups {
            let top = group
                .iter()
                .map(|&id| self.z_levels[id])
                .max()
                .unwrap_or_default();
            for id in group {
                self.z_levels[id] = top;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::NibSource;

    fn board(cols: u8, rows: u8) -> Board {
        let dims = GridDims::new(cols, rows).unwrap();
        let topology = Topology::generate(dims, &NibSource::Running { seed: 7 }).unwrap();
        Board::new(topology, (0.1, 0.05))
    }

    #[test]
    fn interactive_merge_applies_offset_law() {
        let mut board = board(3, 3);
        let mut start = vec![(0.9, 0.9); 9];
        start[0] = (0.2, 0.3);
        start[4] = (0.6, 0.6);
        board.set_positions(&start);
        assert!(board.merge(0, 4, true));
        let rep = board.connectivity().representative_of(4);
        let anchor = board.position(rep).unwrap();
        for &id in board.connectivity().members(rep) {
            let pos = board.position(id).unwrap();
            let (dx, dy) = board.offset_from(id, rep);
            assert_eq!(pos, (anchor.0 + dx, anchor.1 + dy));
        }
        assert_eq!(board.position(4).unwrap(), (0.2 + 0.1, 0.3 + 0.05));
    }

    #[test]
    fn translate_is_clamped_for_whole_group() {
        let mut board = board(2, 1);
        board.set_positions(&[(0.5, 0.5), (0.6, 0.5)]);
        board.merge(0, 1, true);
        let region = PlayRegion::default();
        let applied = board.translate_group(1, (2.0, 0.0), region);
        assert!(applied.0 < 2.0);
        assert!(board.positions().iter().all(|p| p.0 <= region.max + 1e-6));
        assert!((board.position(1).unwrap().0 - region.max).abs() < 1e-6);
    }

    #[test]
    fn merge_levels_z_to_group_maximum() {
        let mut board = board(2, 2);
        board.raise_group(3);
        board.raise_group(2);
        board.merge(0, 2, true);
        assert_eq!(board.z_level(0), Some(2));
        assert_eq!(board.z_level(3), Some(1));
    }

    #[test]
    fn load_state_reads_anchor_positions() {
        let mut board = board(2, 2);
        let state = PieceState {
            positions: vec![(0.0, 0.0), (0.4, 0.4), (9.0, 9.0), (0.7, 0.1)],
            connectivity: vec![1, 1, 1, 3],
        };
        board.load_state(&state);
        assert_eq!(board.connectivity().representative_of(0), 1);
        assert_eq!(board.position(1), Some((0.4, 0.4)));
        assert_eq!(board.position(0), Some((0.4 - 0.1, 0.4)));
        assert_eq!(board.position(2), Some((0.4 - 0.1, 0.4 + 0.05)));
        assert_eq!(board.position(3), Some((0.7, 0.1)));
    }

    #[test]
    fn small_moves_and_blocked_groups_are_skipped() {
        let mut board = board(2, 1);
        board.set_positions(&[(0.5, 0.5), (0.2, 0.2)]);
        let state = PieceState {
            positions: vec![(0.505, 0.5), (0.8, 0.8)],
            connectivity: vec![0, 1],
        };
        assert_eq!(board.apply_positions(&state, 0.01, |_| false), vec![1]);
        assert_eq!(board.position(0), Some((0.5, 0.5)));
        assert_eq!(board.position(1), Some((0.8, 0.8)));

        let state = PieceState {
            positions: vec![(0.1, 0.1), (0.3, 0.3)],
            connectivity: vec![0, 1],
        };
        let moved = board.apply_positions(&state, 0.01, |rep| rep == 1);
        assert_eq!(moved, vec![0]);
        assert_eq!(board.position(1), Some((0.8, 0.8)));
    }
}
