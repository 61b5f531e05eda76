use glam::Vec3;

use crate::fluids::poly6_kernel;
use crate::params::{SimulationParams, CM_TO_M};
use crate::sort::ZOrderSortManager;

/// How a boundary set moves between frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundaryKind {
    Static,
    /// Driven by a skeleton; positions are re-uploaded every frame.
    Skinned,
}

/// Surface samples of a static or skinned mesh.
///
/// Boundary particles add to fluid density (Akinci volume weights `psi`) and
/// give the adhesion pass something to attach to. The set is replaced every
/// frame and may change length; indices are only valid for the frame they
/// were uploaded in.
pub struct BoundarySet {
    pub kind: BoundaryKind,
    pub position: Vec<Vec3>,
    /// Positions of the previous upload, for per-frame delta motion.
    pub previous_position: Vec<Vec3>,
    pub normal: Vec<Vec3>,
    /// -1 when not bone driven.
    pub bone_index: Vec<i32>,
    /// Volume weight in kg: `rest_density / sum_k W(x_b - x_k)`.
    pub psi: Vec<f32>,
    index: ZOrderSortManager,
}

impl BoundarySet {
    pub fn new(kind: BoundaryKind, params: &SimulationParams) -> Self {
        Self {
            kind,
            position: Vec::new(),
            previous_position: Vec::new(),
            normal: Vec::new(),
            bone_index: Vec::new(),
            psi: Vec::new(),
            index: ZOrderSortManager::new(
                &params.sort,
                params.smoothing_radius(),
                params.bounds.center,
            ),
        }
    }

    pub fn len(&self) -> usize {
        self.position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }

    /// Upload this frame's samples.
    ///
    /// When the sample count is unchanged the old positions become
    /// `previous_position`, giving each sample a per-frame delta. A count
    /// change resets the deltas to zero.
    pub fn update(
        &mut self,
        positions: &[Vec3],
        normals: &[Vec3],
        bone_index: Option<&[i32]>,
        params: &SimulationParams,
    ) {
        let n = positions.len();
        if n == self.position.len() {
            std::mem::swap(&mut self.previous_position, &mut self.position);
            self.position.clear();
            self.position.extend_from_slice(positions);
        } else {
            self.position = positions.to_vec();
            self.previous_position = positions.to_vec();
        }

        self.normal.clear();
        self.normal.extend(
            (0..n).map(|i| normals.get(i).and_then(|v| v.try_normalize()).unwrap_or(Vec3::Z)),
        );
        self.bone_index.clear();
        match bone_index {
            Some(bones) => self
                .bone_index
                .extend((0..n).map(|i| bones.get(i).copied().unwrap_or(-1))),
            None => self.bone_index.resize(n, -1),
        }

        self.index.build(&self.position);
        self.compute_psi(params);
    }

    /// Rebuild the neighbor index and volume weights after the smoothing
    /// radius or sort layout changed.
    pub fn reconfigure(&mut self, params: &SimulationParams) {
        self.index = ZOrderSortManager::new(
            &params.sort,
            params.smoothing_radius(),
            params.bounds.center,
        );
        self.index.build(&self.position);
        self.compute_psi(params);
    }

    /// Frame-to-frame motion of sample `i`.
    pub fn delta(&self, i: usize) -> Vec3 {
        self.position[i] - self.previous_position[i]
    }

    fn compute_psi(&mut self, params: &SimulationParams) {
        let kernel = *params.kernel();
        let rest_density = params.rest_density;
        let mut psi = vec![0.0; self.position.len()];
        for (b, out) in psi.iter_mut().enumerate() {
            let pos_b = self.position[b];
            let mut sum = 0.0_f32;
            self.for_each_near(pos_b, |k| {
                let r = (pos_b - self.position[k]) * CM_TO_M;
                sum += poly6_kernel(r.length_squared(), &kernel);
            });
            *out = if sum > 0.0 { rest_density / sum } else { 0.0 };
        }
        self.psi = psi;
    }

    /// Visit the index of every sample in the 27 cells around `pos`.
    pub fn for_each_near<F: FnMut(usize)>(&self, pos: Vec3, mut f: F) {
        if self.is_empty() {
            return;
        }
        self.index
            .for_each_neighbor(pos, |slot| f(self.index.source_index(slot)));
    }

    /// Nearest sample within `max_dist` (cm), as `(index, distance)`.
    pub fn nearest(&self, pos: Vec3, max_dist: f32) -> Option<(usize, f32)> {
        let mut best: Option<(usize, f32)> = None;
        let max_sq = max_dist * max_dist;
        self.for_each_near(pos, |b| {
            let d_sq = (pos - self.position[b]).length_squared();
            if d_sq <= max_sq && best.map_or(true, |(_, best_sq)| d_sq < best_sq) {
                best = Some((b, d_sq));
            }
        });
        best.map(|(b, d_sq)| (b, d_sq.sqrt()))
    }
}
