pub mod morton;
pub mod radix;

use bytemuck::{Pod, Zeroable};
use glam::{IVec3, Vec3};

use crate::adhesion::AttachmentBuffer;
use crate::params::SortConfig;
use crate::particle::ParticleStore;
use morton::KeySpace;
use radix::RadixSorter;

/// Half-open `[start, end)` slot range of one cell in the sorted array.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CellRange {
    pub start: u32,
    pub end: u32,
}

impl CellRange {
    pub const EMPTY: Self = Self { start: 0, end: 0 };

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Z-order spatial sort with a direct-addressed cell table.
///
/// Pipeline per build, in strict order:
/// 1. key every position through the shared [`KeySpace`]
/// 2. radix sort `(key, index)` pairs
/// 3. (particles only) gather the particle records into sorted order
/// 4. scan the sorted keys into per-cell `[start, end)` ranges
///
/// Neighbor queries visit the 3x3x3 block of cells around a position and
/// hand out sorted slots; the caller does the distance check.
pub struct ZOrderSortManager {
    space: KeySpace,
    sorter: RadixSorter,
    /// Sort keys, in sorted order after `sort_keys`.
    keys: Vec<u32>,
    /// `order[slot]` = index the slot was gathered from.
    order: Vec<u32>,
    cell_ranges: Vec<CellRange>,
    /// Keys written by the last range build, cleared sparsely on the next one.
    occupied: Vec<u32>,
}

impl ZOrderSortManager {
    pub fn new(config: &SortConfig, cell_size: f32, center: Vec3) -> Self {
        let space = KeySpace::new(config, cell_size, center);
        Self {
            space,
            sorter: RadixSorter::new(),
            keys: Vec::new(),
            order: Vec::new(),
            cell_ranges: vec![CellRange::EMPTY; space.table_size()],
            occupied: Vec::new(),
        }
    }

    pub fn key_space(&self) -> &KeySpace {
        &self.space
    }

    /// Stage 1: one key per position, identity index.
    pub fn compute_keys(&mut self, positions: &[Vec3]) {
        let n = positions.len();
        self.keys.resize(n, 0);
        self.order.clear();
        self.order.extend(0..n as u32);
        let space = &self.space;

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            self.keys
                .par_iter_mut()
                .zip(positions.par_iter())
                .for_each(|(k, p)| *k = space.key(*p));
        }
        #[cfg(not(feature = "parallel"))]
        for (k, p) in self.keys.iter_mut().zip(positions) {
            *k = space.key(*p);
        }
    }

    /// Stage 2: stable radix sort of the key/index pairs.
    pub fn sort_keys(&mut self) {
        self.sorter.sort_pairs(&mut self.keys, &mut self.order);
    }

    /// Stage 4: linear scan of the sorted keys into the cell table.
    pub fn build_cell_ranges(&mut self) {
        for key in self.occupied.drain(..) {
            self.cell_ranges[key as usize] = CellRange::EMPTY;
        }
        let n = self.keys.len();
        let mut start = 0usize;
        for i in 1..=n {
            if i == n || self.keys[i] != self.keys[i - 1] {
                let key = self.keys[i - 1];
                self.cell_ranges[key as usize] = CellRange {
                    start: start as u32,
                    end: i as u32,
                };
                self.occupied.push(key);
                start = i;
            }
        }
    }

    /// Key, sort and build ranges without moving any payload.
    ///
    /// Used for sets whose indices must stay stable (boundary particles);
    /// map slots back with [`Self::source_index`].
    pub fn build(&mut self, positions: &[Vec3]) {
        self.compute_keys(positions);
        self.sort_keys();
        self.build_cell_ranges();
    }

    /// Full particle sort by predicted position, including the payload gather.
    ///
    /// Afterwards slot `k` is particle index `k`.
    pub fn sort_particles(
        &mut self,
        particles: &mut ParticleStore,
        attachments: Option<&mut AttachmentBuffer>,
    ) {
        let count = particles.count;
        self.compute_keys(&particles.predicted[..count]);
        self.sort_keys();
        // Stage 3: single gather of the records through the sorted permutation
        particles.gather(&self.order);
        if let Some(attachments) = attachments {
            attachments.gather(&self.order);
        }
        self.build_cell_ranges();
    }

    pub fn sorted_keys(&self) -> &[u32] {
        &self.keys
    }

    /// Slot -> pre-sort index permutation of the last build.
    pub fn sorted_order(&self) -> &[u32] {
        &self.order
    }

    #[inline]
    pub fn source_index(&self, slot: usize) -> usize {
        self.order[slot] as usize
    }

    pub fn cell_range(&self, key: u32) -> CellRange {
        self.cell_ranges
            .get(key as usize)
            .copied()
            .unwrap_or(CellRange::EMPTY)
    }

    /// Keys of the non-empty cells of the last build, in ascending order.
    pub fn occupied_cells(&self) -> &[u32] {
        &self.occupied
    }

    /// Visit every sorted slot in the 27 cells around `pos`.
    pub fn for_each_neighbor<F: FnMut(usize)>(&self, pos: Vec3, mut f: F) {
        if self.keys.is_empty() {
            return;
        }
        let center = self.space.clamp_cell(self.space.cell_of(pos));
        for dz in -1..=1_i32 {
            for dy in -1..=1_i32 {
                for dx in -1..=1_i32 {
                    let Some(key) = self.space.cell_key(center + IVec3::new(dx, dy, dz)) else {
                        continue;
                    };
                    let range = self.cell_range(key);
                    for slot in range.start..range.end {
                        f(slot as usize);
                    }
                }
            }
        }
    }
}
