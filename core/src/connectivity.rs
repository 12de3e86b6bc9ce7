//! Rigid piece groups.
//!
//! Groups live in slots; `group_of[id]` is the slot holding `id` and the first
//! member of a slot is the group's representative. Slots emptied by a merge
//! stay empty, so membership never shrinks and lookups stay O(1).

use crate::grid::PieceId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Connectivity {
    group_of: Vec<usize>,
    groups: Vec<Vec<PieceId>>,
    solved: bool,
}

impl Connectivity {
    /// Every piece starts alone and is its own representative.
    pub fn new(total: usize) -> Self {
        Self {
            group_of: (0..total).collect(),
            groups: (0..total).map(|id| vec![id]).collect(),
            solved: total == 1,
        }
    }

    pub fn total(&self) -> usize {
        self.group_of.len()
    }

    pub fn contains(&self, id: PieceId) -> bool {
        id < self.group_of.len()
    }

    /// Unions the groups of `a` and `b`; false if they were already joined.
    ///
    /// Interactive merges fold the smaller group into the larger so the
    /// representative of a big group does not move while someone drags. Any
    /// other merge folds `b`'s group into `a`'s.
    pub fn merge(&mut self, a: PieceId, b: PieceId, interactive: bool) -> bool {
        if !self.contains(a) || !self.contains(b) {
            return false;
        }
        let mut keep = self.group_of[a];
        let mut fold = self.group_of[b];
        if keep == fold {
            return false;
        }
        if interactive && self.groups[keep].len() < self.groups[fold].len() {
            std::mem::swap(&mut keep, &mut fold);
        }
        let moved = std::mem::take(&mut self.groups[fold]);
        for &id in &moved {
            self.group_of[id] = keep;
        }
        self.groups[keep].extend(moved);
        if !self.solved && self.groups[keep].len() == self.total() {
            self.solved = true;
        }
        true
    }

    pub fn representative_of(&self, id: PieceId) -> PieceId {
        self.groups[self.group_of[id]][0]
    }

    pub fn members(&self, id: PieceId) -> &[PieceId] {
        &self.groups[self.group_of[id]]
    }

    pub fn group_size(&self, id: PieceId) -> usize {
        self.members(id).len()
    }

    pub fn same_group(&self, a: PieceId, b: PieceId) -> bool {
        self.group_of[a] == self.group_of[b]
    }

    /// Moves `id` to the front of its group so it anchors the group.
    pub fn make_representative(&mut self, id: PieceId) {
        let group = &mut self.groups[self.group_of[id]];
        if let Some(index) = group.iter().position(|&member| member == id) {
            if index != 0 {
                group.remove(index);
                group.insert(0, id);
            }
        }
    }

    /// Sticky: stays true once a group spanned the whole puzzle.
    pub fn is_solved(&self) -> bool {
        self.solved
    }

    pub fn groups(&self) -> impl Iterator<Item = &[PieceId]> {
        self.groups
            .iter()
            .filter(|group| !group.is_empty())
            .map(|group| group.as_slice())
    }

    pub fn group_count(&self) -> usize {
        self.groups().count()
    }

    /// Wire form: representative id for every piece.
    pub fn to_wire(&self) -> Vec<u16> {
        (0..self.total())
            .map(|id| self.representative_of(id) as u16)
            .collect()
    }
}
