pub mod surface_tension;
pub mod viscosity;

use glam::Vec3;

use crate::params::KernelCoefficients;

/// Poly6 smoothing kernel for SPH density estimation.
///
/// Takes the squared distance in meters and returns
/// `315 / (64 * PI * h^9) * (h^2 - r^2)^3` inside the support, `0.0` outside.
#[inline]
pub fn poly6_kernel(r2: f32, kernel: &KernelCoefficients) -> f32 {
    if r2 >= kernel.h2 {
        return 0.0;
    }
    let diff = kernel.h2 - r2;
    kernel.poly6 * diff * diff * diff
}

/// Spiky kernel gradient for the density constraint.
///
/// `r` is `x_i - x_j` in meters. Returns `(r / |r|) * (-45 / (PI * h^6)) * (h - |r|)^2`
/// inside the support and `Vec3::ZERO` for coincident or out-of-range pairs.
#[inline]
pub fn spiky_gradient(r: Vec3, r_len: f32, kernel: &KernelCoefficients) -> Vec3 {
    if r_len >= kernel.h || r_len <= 1e-6 {
        return Vec3::ZERO;
    }
    let diff = kernel.h - r_len;
    (r / r_len) * kernel.spiky_grad * diff * diff
}

/// Akinci cohesion spline, used by surface tension.
#[inline]
pub fn cohesion_kernel(r: f32, kernel: &KernelCoefficients) -> f32 {
    let h = kernel.h;
    if r >= h || r <= 0.0 {
        return 0.0;
    }
    let a = (h - r) * (h - r) * (h - r) * r * r * r;
    if 2.0 * r > h {
        kernel.cohesion * a
    } else {
        let h6 = kernel.h2 * kernel.h2 * kernel.h2;
        kernel.cohesion * (2.0 * a - h6 / 64.0)
    }
}
