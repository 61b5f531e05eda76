use glam::Vec3;

use crate::adhesion::stack_pressure_factor;
use crate::collision::BoundarySet;
use crate::constraints::per_particle;
use crate::fluids::{poly6_kernel, spiky_gradient};
use crate::params::{SimulationParams, CM_TO_M, M_TO_CM};
use crate::particle::{ParticleFlags, ParticleStore};
use crate::sort::ZOrderSortManager;

/// XPBD density constraint solver.
///
/// Reference: "Position Based Fluids", Macklin & Muller, SIGGRAPH 2013, with
/// the compliant multiplier update of "XPBD", Macklin et al. 2016, and
/// Akinci boundary handling.
///
/// Per iteration, each phase reads the previous phase's snapshot and writes
/// a separate buffer (Jacobi):
/// 1. density from fluid neighbors, boundary samples and stack pressure
/// 2. `dlambda_i = (-C_i - alpha * lambda_i) / (sum |grad C|^2 + alpha + eps)`
/// 3. `dp_i = 1/rho0 * sum_j m_j (dlambda_i + dlambda_j + s_corr) grad W_ij`
///
/// `C_i = max(rho_i / rho0 - 1, 0)`: only compression is corrected, so the
/// free surface does not clump.
///
/// The sort manager must describe the current particle order (slot == index).
#[derive(Default)]
pub struct DensitySolver {
    delta_lambda: Vec<f32>,
}

/// Density of particle `i` and its fluid neighbor count.
fn density_at(
    store: &ParticleStore,
    sort: &ZOrderSortManager,
    boundary: Option<&BoundarySet>,
    params: &SimulationParams,
    i: usize,
) -> (f32, u32) {
    let kernel = params.kernel();
    let up = -params.down();
    let stack_scale = if params.adhesion.enabled {
        params.adhesion.stack_pressure_scale
    } else {
        0.0
    };
    let pos_i = store.predicted[i];
    let mut rho = store.mass[i] * kernel.poly6_zero;
    let mut neighbors = 0u32;

    sort.for_each_neighbor(pos_i, |j| {
        if j == i {
            return;
        }
        let offset = store.predicted[j] - pos_i;
        let r2 = (offset * CM_TO_M).length_squared();
        if r2 >= kernel.h2 {
            return;
        }
        let w = poly6_kernel(r2, kernel);
        let attached = store.flags[j].contains(ParticleFlags::ATTACHED);
        let stack = stack_pressure_factor(offset, up, attached, stack_scale);
        rho += store.mass[j] * w * (1.0 + stack);
        neighbors += 1;
    });

    if let Some(set) = boundary {
        set.for_each_near(pos_i, |b| {
            let r2 = ((pos_i - set.position[b]) * CM_TO_M).length_squared();
            rho += set.psi[b] * poly6_kernel(r2, kernel);
        });
    }

    (rho, neighbors)
}

impl DensitySolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Multipliers restart from zero every substep.
    pub fn reset_lambda(&mut self, particles: &mut ParticleStore) {
        let count = particles.count;
        particles.lambda[..count].fill(0.0);
    }

    /// Phase 1 alone: write `density` and `neighbor_count` for every particle.
    pub fn compute_density(
        particles: &mut ParticleStore,
        sort: &ZOrderSortManager,
        boundary: Option<&BoundarySet>,
        params: &SimulationParams,
    ) {
        let count = particles.count;
        let store = &*particles;
        let results = per_particle(count, |i| density_at(store, sort, boundary, params, i));
        for (i, (rho, neighbors)) in results.into_iter().enumerate() {
            particles.density[i] = rho;
            particles.neighbor_count[i] = neighbors;
        }
    }

    /// One Jacobi iteration of the density constraint over every particle.
    ///
    /// `dt` is the substep length; compliance is scaled by `1 / dt^2`.
    pub fn solve_iteration(
        &mut self,
        particles: &mut ParticleStore,
        sort: &ZOrderSortManager,
        boundary: Option<&BoundarySet>,
        params: &SimulationParams,
        dt: f32,
    ) {
        let count = particles.count;
        Self::compute_density(particles, sort, boundary, params);

        let kernel = params.kernel();
        let inv_rho0 = 1.0 / params.rest_density;
        let alpha = if dt > 0.0 {
            params.compliance / (dt * dt)
        } else {
            0.0
        };
        let relaxation = params.relaxation;

        // Phase 2: multiplier increments
        {
            let store = &*particles;
            self.delta_lambda = per_particle(count, |i| {
                let pos_i = store.predicted[i];
                let c = (store.density[i] * inv_rho0 - 1.0).max(0.0);
                let mut grad_sum_sq = 0.0_f32;
                let mut grad_self = Vec3::ZERO;

                sort.for_each_neighbor(pos_i, |j| {
                    if j == i {
                        return;
                    }
                    let r = (pos_i - store.predicted[j]) * CM_TO_M;
                    let grad_j = spiky_gradient(r, r.length(), kernel) * (store.mass[j] * inv_rho0);
                    grad_sum_sq += grad_j.length_squared();
                    grad_self += grad_j;
                });
                if let Some(set) = boundary {
                    set.for_each_near(pos_i, |b| {
                        let r = (pos_i - set.position[b]) * CM_TO_M;
                        grad_self += spiky_gradient(r, r.length(), kernel) * (set.psi[b] * inv_rho0);
                    });
                }
                grad_sum_sq += grad_self.length_squared();

                (-c - alpha * store.lambda[i]) / (grad_sum_sq + alpha + relaxation)
            });
        }
        for (lambda, dl) in particles.lambda[..count].iter_mut().zip(&self.delta_lambda) {
            *lambda += *dl;
        }

        // Phase 3: position corrections from the multiplier increments
        let tensile = params.tensile;
        let w_dq = if tensile.enabled {
            let dq = tensile.delta_q * kernel.h;
            poly6_kernel(dq * dq, kernel)
        } else {
            1.0
        };
        let corrections = {
            let store = &*particles;
            let delta_lambda = &self.delta_lambda;
            per_particle(count, |i| {
                if store.flags[i].contains(ParticleFlags::SLEEPING) {
                    return Vec3::ZERO;
                }
                let pos_i = store.predicted[i];
                let dl_i = delta_lambda[i];
                let mut delta_p = Vec3::ZERO;

                sort.for_each_neighbor(pos_i, |j| {
                    if j == i {
                        return;
                    }
                    let r = (pos_i - store.predicted[j]) * CM_TO_M;
                    let r_len = r.length();
                    if r_len >= kernel.h {
                        return;
                    }
                    let s_corr = if tensile.enabled && w_dq > 0.0 {
                        let ratio = poly6_kernel(r_len * r_len, kernel) / w_dq;
                        -tensile.k * ratio.powi(tensile.n)
                    } else {
                        0.0
                    };
                    delta_p += (dl_i + delta_lambda[j] + s_corr)
                        * store.mass[j]
                        * spiky_gradient(r, r_len, kernel);
                });
                if let Some(set) = boundary {
                    set.for_each_near(pos_i, |b| {
                        let r = (pos_i - set.position[b]) * CM_TO_M;
                        delta_p += dl_i * set.psi[b] * spiky_gradient(r, r.length(), kernel);
                    });
                }

                delta_p * (inv_rho0 * M_TO_CM)
            })
        };
        for (p, dp) in particles.predicted[..count].iter_mut().zip(&corrections) {
            *p += *dp;
        }
    }
}
