use glam::Vec3;

use crate::fluids::poly6_kernel;
use crate::params::{KernelCoefficients, CM_TO_M};
use crate::particle::{ParticleFlags, ParticleStore};
use crate::sort::ZOrderSortManager;

/// XSPH velocity smoothing.
///
/// `v_i += c * sum_j (m_j / rho_j) * (v_j - v_i) * W(x_i - x_j)`
///
/// Corrections are collected from a snapshot of the velocities and applied
/// afterwards. Attached particles are driven by their boundary and skipped.
/// Requires `sort` to hold the current particle order (slot == index).
pub fn apply_xsph_viscosity(
    particles: &mut ParticleStore,
    sort: &ZOrderSortManager,
    kernel: &KernelCoefficients,
    viscosity: f32,
) {
    if viscosity <= 0.0 {
        return;
    }
    let count = particles.count;
    let h2 = kernel.h2;
    let store = &*particles;

    let correction_for = |i: usize| -> Vec3 {
        if store.flags[i].contains(ParticleFlags::ATTACHED) {
            return Vec3::ZERO;
        }
        let pos_i = store.predicted[i];
        let vel_i = store.velocity[i];
        let mut correction = Vec3::ZERO;
        sort.for_each_neighbor(pos_i, |j| {
            if j == i {
                return;
            }
            let r2 = ((pos_i - store.predicted[j]) * CM_TO_M).length_squared();
            if r2 >= h2 {
                return;
            }
            let rho_j = store.density[j].max(1e-6);
            let w = poly6_kernel(r2, kernel);
            correction += (store.velocity[j] - vel_i) * (store.mass[j] / rho_j * w);
        });
        correction * viscosity
    };

    #[cfg(feature = "parallel")]
    let corrections: Vec<Vec3> = {
        use rayon::prelude::*;
        (0..count).into_par_iter().map(correction_for).collect()
    };
    #[cfg(not(feature = "parallel"))]
    let corrections: Vec<Vec3> = (0..count).map(correction_for).collect();

    for (v, dv) in particles.velocity[..count].iter_mut().zip(&corrections) {
        *v += *dv;
    }
}
