//! Position-based (XPBD) SPH fluid simulation core.
//!
//! World units are centimeters; kernel math runs in meters. Every pass reads
//! a snapshot and writes a separate buffer, so each maps onto one compute
//! dispatch. Enable the `parallel` feature to run the per-particle kernels
//! on rayon.

pub mod adhesion;
pub mod collision;
pub mod compaction;
pub mod constraints;
pub mod diagnostics;
pub mod fluids;
pub mod materials;
pub mod params;
pub mod particle;
pub mod provider;
pub mod readback;
pub mod solver;
pub mod sort;
pub mod spawn;

pub use diagnostics::{FrameDiagnostics, FrameStats};
pub use params::{ConfigError, SimulationParams};
pub use particle::{ParticleFlags, ParticleStore};
pub use solver::Simulation;
pub use spawn::{SpawnQueue, SpawnRequest};
