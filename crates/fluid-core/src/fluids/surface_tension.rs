use glam::Vec3;

use crate::fluids::{cohesion_kernel, spiky_gradient};
use crate::params::{KernelCoefficients, SurfaceTensionConfig, CM_TO_M, M_TO_CM};
use crate::particle::{ParticleFlags, ParticleStore};
use crate::sort::ZOrderSortManager;

/// Flag particles with a sparse neighborhood as surface particles.
///
/// Uses the neighbor counts written by the last density pass.
pub fn update_surface_flags(particles: &mut ParticleStore, threshold: u32) {
    let count = particles.count;
    for i in 0..count {
        let sparse = particles.neighbor_count[i] < threshold;
        particles.flags[i].set(ParticleFlags::SURFACE, sparse);
    }
}

/// Akinci surface normals `n_i = h * sum_j (m_j / rho_j) * grad W(x_i - x_j)`.
fn surface_normals(
    particles: &ParticleStore,
    sort: &ZOrderSortManager,
    kernel: &KernelCoefficients,
) -> Vec<Vec3> {
    (0..particles.count)
        .map(|i| {
            let pos_i = particles.predicted[i];
            let mut n = Vec3::ZERO;
            sort.for_each_neighbor(pos_i, |j| {
                if j == i {
                    return;
                }
                let r = (pos_i - particles.predicted[j]) * CM_TO_M;
                let grad = spiky_gradient(r, r.length(), kernel);
                n += grad * (particles.mass[j] / particles.density[j].max(1e-6));
            });
            n * kernel.h
        })
        .collect()
}

/// Cohesion plus curvature surface tension (Akinci et al. 2013) applied to
/// velocities over `dt` seconds.
///
/// Only runs between particles of which at least one is a surface particle;
/// the interior is left to the density solve.
pub fn apply_surface_tension(
    particles: &mut ParticleStore,
    sort: &ZOrderSortManager,
    kernel: &KernelCoefficients,
    config: &SurfaceTensionConfig,
    rest_density: f32,
    dt: f32,
) {
    if !config.enabled || config.coefficient <= 0.0 {
        return;
    }
    let count = particles.count;
    let normals = surface_normals(particles, sort, kernel);
    let gamma = config.coefficient;

    let mut delta_v = vec![Vec3::ZERO; count];
    for (i, dv) in delta_v.iter_mut().enumerate() {
        let flags_i = particles.flags[i];
        if flags_i.contains(ParticleFlags::ATTACHED) || flags_i.contains(ParticleFlags::SLEEPING) {
            continue;
        }
        let pos_i = particles.predicted[i];
        let rho_i = particles.density[i];
        let surface_i = flags_i.contains(ParticleFlags::SURFACE);
        let mut accel = Vec3::ZERO;
        sort.for_each_neighbor(pos_i, |j| {
            if j == i || !(surface_i || particles.flags[j].contains(ParticleFlags::SURFACE)) {
                return;
            }
            let r = (pos_i - particles.predicted[j]) * CM_TO_M;
            let r_len = r.length();
            if r_len <= 1e-6 || r_len >= kernel.h {
                return;
            }
            let k_ij = 2.0 * rest_density / (rho_i + particles.density[j]).max(1e-6);
            let cohesion = -gamma * particles.mass[j] * cohesion_kernel(r_len, kernel) * (r / r_len);
            let curvature = -gamma * (normals[i] - normals[j]);
            accel += (cohesion + curvature) * k_ij;
        });
        *dv = accel * (dt * M_TO_CM);
    }

    for (v, dv) in particles.velocity[..count].iter_mut().zip(&delta_v) {
        *v += *dv;
    }
}
