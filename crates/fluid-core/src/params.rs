use std::f32::consts::PI;

use glam::{Quat, Vec3};
use thiserror::Error;

/// Engine world units are centimeters; kernel math runs in meters.
pub const CM_TO_M: f32 = 0.01;
/// Inverse of [`CM_TO_M`], used to bring solver corrections back to world units.
pub const M_TO_CM: f32 = 100.0;

/// Configuration contract violations. These are the only fatal errors in the
/// simulation and are reported before any substep runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("smoothing radius must be finite and positive, got {0}")]
    InvalidSmoothingRadius(f32),
    #[error("rest density must be finite and positive, got {0}")]
    InvalidRestDensity(f32),
    #[error("particle mass must be finite and positive, got {0}")]
    InvalidParticleMass(f32),
    #[error("particle radius must be finite and positive, got {0}")]
    InvalidParticleRadius(f32),
    #[error("constraint relaxation must be finite and positive, got {0}")]
    InvalidRelaxation(f32),
    #[error("compliance must be finite and non-negative, got {0}")]
    InvalidCompliance(f32),
    #[error("substep count must be at least 1")]
    ZeroSubsteps,
    #[error("solver iteration count must be at least 1")]
    ZeroIterations,
    #[error("particle capacity must be at least 1")]
    ZeroCapacity,
}

/// Smoothing-kernel constants derived from the smoothing radius (meters).
///
/// Poly6 and Spiky carry `h^9` and `h^6` terms, so these are computed once per
/// radius change and shared by every pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KernelCoefficients {
    /// Smoothing radius in meters.
    pub h: f32,
    /// `h^2` in meters squared.
    pub h2: f32,
    /// `315 / (64 * PI * h^9)`
    pub poly6: f32,
    /// `-45 / (PI * h^6)`
    pub spiky_grad: f32,
    /// `32 / (PI * h^9)` (Akinci cohesion spline)
    pub cohesion: f32,
    /// `poly6(0)`, the self-contribution of a particle to its own density.
    pub poly6_zero: f32,
}

impl KernelCoefficients {
    /// Derive the coefficients from a smoothing radius in world units (cm).
    pub fn from_smoothing_radius_cm(smoothing_radius_cm: f32) -> Self {
        let h = smoothing_radius_cm * CM_TO_M;
        let h2 = h * h;
        let h3 = h2 * h;
        let h6 = h3 * h3;
        let h9 = h6 * h3;
        let poly6 = 315.0 / (64.0 * PI * h9);
        Self {
            h,
            h2,
            poly6,
            spiky_grad: -45.0 / (PI * h6),
            cohesion: 32.0 / (PI * h9),
            poly6_zero: poly6 * h6,
        }
    }
}

/// Space-filling-curve flavour used to key particles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortMode {
    /// Plain Morton code over a bounded grid centered on the bounds.
    Classic,
    /// 3-bit tile hash + 18-bit local Morton code; tolerates unbounded domains.
    HybridTiled,
}

/// Bits per axis of the classic Morton grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GridResolution {
    Small,
    Medium,
    Large,
}

impl GridResolution {
    pub fn bits_per_axis(self) -> u32 {
        match self {
            GridResolution::Small => 6,
            GridResolution::Medium => 7,
            GridResolution::Large => 8,
        }
    }

    /// Number of grid cells along one axis.
    pub fn axis_cells(self) -> u32 {
        1 << self.bits_per_axis()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SortConfig {
    pub mode: SortMode,
    pub resolution: GridResolution,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            mode: SortMode::Classic,
            resolution: GridResolution::Medium,
        }
    }
}

/// Simulation bounds. An identity rotation gives an AABB, anything else an OBB.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundsConfig {
    pub enabled: bool,
    pub center: Vec3,
    pub half_extents: Vec3,
    pub rotation: Quat,
    /// Fraction of the incoming normal speed kept after a wall hit.
    pub restitution: f32,
    /// Fraction of the tangential speed removed on contact.
    pub friction: f32,
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            center: Vec3::new(0.0, 0.0, 100.0),
            half_extents: Vec3::splat(100.0),
            rotation: Quat::IDENTITY,
            restitution: 0.1,
            friction: 0.1,
        }
    }
}

/// Artificial pressure term (`s_corr`) against particle clumping.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TensileConfig {
    pub enabled: bool,
    pub k: f32,
    pub n: i32,
    /// Reference distance as a fraction of the smoothing radius.
    pub delta_q: f32,
}

impl Default for TensileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            k: 1.0e-4,
            n: 4,
            delta_q: 0.2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceTensionConfig {
    pub enabled: bool,
    /// Cohesion strength (Akinci gamma).
    pub coefficient: f32,
    /// Particles with fewer neighbors than this are flagged as surface.
    pub surface_neighbor_threshold: u32,
}

impl Default for SurfaceTensionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            coefficient: 0.5,
            surface_neighbor_threshold: 20,
        }
    }
}

/// Boundary attachment thresholds. Distances in cm, speeds in cm/s.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdhesionConfig {
    pub enabled: bool,
    pub attach_radius: f32,
    pub attach_max_speed: f32,
    /// Detach distance is `smoothing_radius * detach_distance_multiplier`.
    pub detach_distance_multiplier: f32,
    pub max_detach_speed: f32,
    /// 0 keeps the simulated position, 1 snaps to the recorded anchor.
    pub constraint_blend: f32,
    pub stack_pressure_scale: f32,
}

impl Default for AdhesionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            attach_radius: 10.0,
            attach_max_speed: 50.0,
            detach_distance_multiplier: 3.0,
            max_detach_speed: 500.0,
            constraint_blend: 0.3,
            stack_pressure_scale: 0.1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SleepConfig {
    pub enabled: bool,
    /// cm/s
    pub velocity_threshold: f32,
    /// Consecutive quiet frames before a particle is put to sleep.
    pub frames: u16,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            velocity_threshold: 2.0,
            frames: 30,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CollisionEventConfig {
    pub enabled: bool,
    /// Minimum speed at contact (cm/s) to report an event.
    pub min_speed: f32,
    pub cooldown_frames: u16,
    pub max_per_frame: usize,
}

impl Default for CollisionEventConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_speed: 100.0,
            cooldown_frames: 10,
            max_per_frame: 64,
        }
    }
}

/// What to do with a particle whose position or velocity stopped being finite.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NonFinitePolicy {
    /// Restore the last committed position and zero the velocity.
    Clamp,
    /// Remove the particle at the next despawn pass.
    Despawn,
}

/// Per-frame configuration snapshot. The simulation only ever reads it.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationParams {
    /// kg/m^3
    pub rest_density: f32,
    /// cm
    smoothing_radius: f32,
    /// cm
    pub particle_radius: f32,
    /// kg, used when a spawn request carries no mass of its own
    pub particle_mass: f32,
    /// XPBD compliance of the density constraint.
    pub compliance: f32,
    /// Constraint-force-mixing term added to the lambda denominator.
    pub relaxation: f32,
    /// XSPH blend coefficient.
    pub viscosity: f32,
    /// Per-substep velocity multiplier.
    pub velocity_damping: f32,
    /// cm/s
    pub max_velocity: f32,
    pub substeps: u32,
    pub solver_iterations: u32,
    /// cm/s^2
    pub gravity: Vec3,
    pub sort: SortConfig,
    pub bounds: BoundsConfig,
    pub tensile: TensileConfig,
    pub surface_tension: SurfaceTensionConfig,
    pub adhesion: AdhesionConfig,
    pub sleep: SleepConfig,
    pub collision_events: CollisionEventConfig,
    pub non_finite_policy: NonFinitePolicy,
    /// Frames between a per-source count being staged and becoming visible.
    pub readback_latency: usize,
    kernel: KernelCoefficients,
}

impl Default for SimulationParams {
    fn default() -> Self {
        let smoothing_radius = 20.0;
        let particle_radius = 5.0;
        let rest_density = 1000.0;
        Self {
            rest_density,
            smoothing_radius,
            particle_radius,
            particle_mass: lattice_mass(rest_density, particle_radius * 2.0),
            compliance: 1.0e-8,
            relaxation: 1.0,
            viscosity: 0.01,
            velocity_damping: 1.0,
            max_velocity: 2000.0,
            substeps: 2,
            solver_iterations: 3,
            gravity: Vec3::new(0.0, 0.0, -980.0),
            sort: SortConfig::default(),
            bounds: BoundsConfig::default(),
            tensile: TensileConfig::default(),
            surface_tension: SurfaceTensionConfig::default(),
            adhesion: AdhesionConfig::default(),
            sleep: SleepConfig::default(),
            collision_events: CollisionEventConfig::default(),
            non_finite_policy: NonFinitePolicy::Clamp,
            readback_latency: 2,
            kernel: KernelCoefficients::from_smoothing_radius_cm(smoothing_radius),
        }
    }
}

impl SimulationParams {
    pub fn smoothing_radius(&self) -> f32 {
        self.smoothing_radius
    }

    /// Change the smoothing radius (cm) and refresh the kernel coefficients.
    pub fn set_smoothing_radius(&mut self, smoothing_radius: f32) {
        self.smoothing_radius = smoothing_radius;
        self.kernel = KernelCoefficients::from_smoothing_radius_cm(smoothing_radius);
    }

    pub fn with_smoothing_radius(mut self, smoothing_radius: f32) -> Self {
        self.set_smoothing_radius(smoothing_radius);
        self
    }

    pub fn kernel(&self) -> &KernelCoefficients {
        &self.kernel
    }

    /// Distance (cm) an attached particle may drift before it tears off.
    pub fn detach_distance(&self) -> f32 {
        self.smoothing_radius * self.adhesion.detach_distance_multiplier
    }

    /// Unit vector along gravity, or `-Z` when gravity is zero.
    pub fn down(&self) -> Vec3 {
        self.gravity.try_normalize().unwrap_or(Vec3::NEG_Z)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.smoothing_radius.is_finite() && self.smoothing_radius > 0.0) {
            return Err(ConfigError::InvalidSmoothingRadius(self.smoothing_radius));
        }
        if !(self.rest_density.is_finite() && self.rest_density > 0.0) {
            return Err(ConfigError::InvalidRestDensity(self.rest_density));
        }
        if !(self.particle_mass.is_finite() && self.particle_mass > 0.0) {
            return Err(ConfigError::InvalidParticleMass(self.particle_mass));
        }
        if !(self.particle_radius.is_finite() && self.particle_radius > 0.0) {
            return Err(ConfigError::InvalidParticleRadius(self.particle_radius));
        }
        // Keeps the multiplier denominator positive for isolated and coincident particles
        if !(self.relaxation.is_finite() && self.relaxation > 0.0) {
            return Err(ConfigError::InvalidRelaxation(self.relaxation));
        }
        if !(self.compliance.is_finite() && self.compliance >= 0.0) {
            return Err(ConfigError::InvalidCompliance(self.compliance));
        }
        if self.substeps == 0 {
            return Err(ConfigError::ZeroSubsteps);
        }
        if self.solver_iterations == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        Ok(())
    }
}

/// Mass (kg) that makes a cubic lattice at `spacing` cm sit at `rest_density`.
pub fn lattice_mass(rest_density: f32, spacing: f32) -> f32 {
    let d = spacing * CM_TO_M;
    rest_density * d * d * d
}
