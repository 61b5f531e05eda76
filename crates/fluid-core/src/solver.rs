use std::collections::HashMap;
use std::sync::Arc;

use glam::Vec3;

use crate::adhesion::{AdhesionManager, AttachmentBuffer};
use crate::collision::{BoundaryKind, BoundarySet, CollisionEvent, CollisionManager};
use crate::compaction::StreamCompactionManager;
use crate::constraints::DensitySolver;
use crate::diagnostics::{FrameDiagnostics, FrameStats};
use crate::fluids::surface_tension::{apply_surface_tension, update_surface_flags};
use crate::fluids::viscosity::apply_xsph_viscosity;
use crate::params::{ConfigError, NonFinitePolicy, SimulationParams};
use crate::particle::{ParticleFlags, ParticleStore};
use crate::provider::{FluidDataProvider, ProviderDefaults, ProviderDispatch};
use crate::readback::ReadbackRing;
use crate::sort::ZOrderSortManager;
use crate::spawn::{count_by_source, SpawnManager, SpawnQueue};

/// Per-frame driver of the fluid pipeline.
///
/// Frame order:
/// 1. swap spawn/despawn buffers
/// 2. clear pass (`JUST_DETACHED`, `HAS_COLLIDED`, event cooldowns)
/// 3. despawn compaction, then spawn injection
/// 4. substeps: forces/predict, sort, density iterations, collisions,
///    velocity update with contact response, surface tension, XSPH, commit
/// 5. adhesion state machine, sleep bookkeeping
/// 6. stage per-source counts for latent readback
pub struct Simulation {
    params: SimulationParams,
    particles: ParticleStore,
    attachments: AttachmentBuffer,
    sort: ZOrderSortManager,
    density: DensitySolver,
    collision: CollisionManager,
    adhesion: AdhesionManager,
    spawn: SpawnManager,
    compaction: StreamCompactionManager,
    providers: ProviderDispatch,
    boundary: Option<BoundarySet>,
    source_counts: ReadbackRing<HashMap<i32, u32>>,
    /// Velocities from before the current substep's solve.
    incoming: Vec<Vec3>,
    frame: u64,
}

impl Simulation {
    /// Validate `params` and allocate buffers for `capacity` particles.
    ///
    /// Configuration errors are the only fatal errors of the simulation.
    pub fn new(params: SimulationParams, capacity: usize) -> Result<Self, ConfigError> {
        params.validate()?;
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        log::info!(
            "fluid simulation: capacity={} h={}cm rest_density={} substeps={} iterations={}",
            capacity,
            params.smoothing_radius(),
            params.rest_density,
            params.substeps,
            params.solver_iterations
        );

        Ok(Self {
            particles: ParticleStore::new(capacity),
            attachments: AttachmentBuffer::new(capacity),
            sort: ZOrderSortManager::new(
                &params.sort,
                params.smoothing_radius(),
                params.bounds.center,
            ),
            density: DensitySolver::new(),
            collision: CollisionManager::new(&params),
            adhesion: AdhesionManager::new(),
            spawn: SpawnManager::new(),
            compaction: StreamCompactionManager::new(),
            providers: ProviderDispatch::new(ProviderDefaults::from_params(&params)),
            boundary: None,
            source_counts: ReadbackRing::new(params.readback_latency),
            incoming: Vec::with_capacity(capacity),
            frame: 0,
            params,
        })
    }

    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    /// Replace the configuration between frames.
    pub fn set_params(&mut self, params: SimulationParams) -> Result<(), ConfigError> {
        params.validate()?;
        let layout_changed = params.smoothing_radius() != self.params.smoothing_radius()
            || params.sort != self.params.sort
            || params.bounds.center != self.params.bounds.center;
        let density_changed = params.rest_density != self.params.rest_density;

        if layout_changed {
            self.sort = ZOrderSortManager::new(
                &params.sort,
                params.smoothing_radius(),
                params.bounds.center,
            );
        }
        if layout_changed || density_changed {
            if let Some(boundary) = self.boundary.as_mut() {
                boundary.reconfigure(&params);
            }
        }
        if params.readback_latency != self.params.readback_latency {
            self.source_counts = ReadbackRing::new(params.readback_latency);
        }
        self.collision.set_bounds(&params.bounds);
        let mut defaults = ProviderDefaults::from_params(&params);
        defaults.source_max = self.providers.defaults().source_max;
        self.providers.set_defaults(defaults);
        self.params = params;
        Ok(())
    }

    /// Grow the particle buffers. Only between frames; never shrinks.
    pub fn reserve(&mut self, capacity: usize) {
        if capacity <= self.particles.capacity() {
            return;
        }
        log::info!(
            "growing particle capacity {} -> {}",
            self.particles.capacity(),
            capacity
        );
        self.particles.reserve(capacity);
        self.attachments.reserve(capacity);
    }

    pub fn capacity(&self) -> usize {
        self.particles.capacity()
    }

    /// Producer handle for spawn/despawn requests from any thread.
    pub fn spawn_queue(&self) -> Arc<SpawnQueue> {
        self.spawn.queue()
    }

    pub fn particles(&self) -> &ParticleStore {
        &self.particles
    }

    pub fn active_count(&self) -> usize {
        self.particles.count
    }

    pub fn attachments(&self) -> &AttachmentBuffer {
        &self.attachments
    }

    pub fn collision(&self) -> &CollisionManager {
        &self.collision
    }

    /// Register, move and remove primitive colliders.
    pub fn collision_mut(&mut self) -> &mut CollisionManager {
        &mut self.collision
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Register an emitter's data provider. A provider cap is forwarded to
    /// the spawn queue and takes effect at the next frame.
    pub fn register_provider(&mut self, source_id: i32, provider: Arc<dyn FluidDataProvider>) {
        self.providers.register(source_id, provider);
        if let Some(max) = self.providers.source_max(source_id) {
            self.spawn.queue().set_source_max(source_id, Some(max));
        }
    }

    pub fn providers(&self) -> &ProviderDispatch {
        &self.providers
    }

    /// Upload this frame's boundary samples.
    pub fn update_boundary(
        &mut self,
        kind: BoundaryKind,
        positions: &[Vec3],
        normals: &[Vec3],
        bone_index: Option<&[i32]>,
    ) {
        if self.boundary.as_ref().map_or(true, |set| set.kind != kind) {
            self.boundary = Some(BoundarySet::new(kind, &self.params));
        }
        if let Some(boundary) = self.boundary.as_mut() {
            boundary.update(positions, normals, bone_index, &self.params);
        }
    }

    pub fn clear_boundary(&mut self) {
        self.boundary = None;
    }

    pub fn boundary(&self) -> Option<&BoundarySet> {
        self.boundary.as_ref()
    }

    /// Latest resolved particle count of `source_id`, `readback_latency`
    /// frames old. `None` until the first count resolves.
    pub fn source_count(&self, source_id: i32) -> Option<u32> {
        self.source_counts
            .latest()
            .map(|counts| counts.get(&source_id).copied().unwrap_or(0))
    }

    /// Frame the value returned by [`Self::source_count`] was taken in.
    pub fn source_count_frame(&self) -> Option<u64> {
        self.source_counts.latest_frame()
    }

    pub fn collision_events(&self) -> &[CollisionEvent] {
        self.collision.events()
    }

    pub fn take_collision_events(&mut self) -> Vec<CollisionEvent> {
        self.collision.take_events()
    }

    /// Advance the simulation by one frame of `dt` seconds.
    pub fn step_frame(&mut self, dt: f32, diagnostics: &mut FrameDiagnostics) -> FrameStats {
        #[cfg(not(target_arch = "wasm32"))]
        let started = std::time::Instant::now();

        diagnostics.begin_frame();
        self.frame += 1;

        self.spawn.swap_buffers();
        self.adhesion.clear_pass(&mut self.particles);
        self.collision.begin_frame(&mut self.particles);

        // Despawn first so fresh spawns are never evicted as "oldest"
        let despawned = self.spawn.despawn_pass(
            &mut self.particles,
            Some(&mut self.attachments),
            &mut self.compaction,
        );
        let providers = &self.providers;
        let spawned = self.spawn.spawn_pass(
            &mut self.particles,
            Some(&mut self.attachments),
            |source| providers.particle_mass(source),
            diagnostics,
        );

        let substeps = self.params.substeps.max(1);
        let simulated = dt.is_finite() && dt > 0.0 && !self.particles.is_empty();
        if simulated {
            let sub_dt = dt / substeps as f32;
            for _ in 0..substeps {
                self.substep(sub_dt, diagnostics);
            }
        }

        let adhesion = if simulated {
            self.adhesion.update(
                &mut self.particles,
                &mut self.attachments,
                self.boundary.as_ref(),
                &self.collision,
                &self.params,
                dt,
                diagnostics,
            )
        } else {
            Default::default()
        };
        if simulated {
            self.collision.reindex_events(&self.particles);
            self.update_sleep();
        }

        self.source_counts
            .push(self.frame, count_by_source(&self.particles));

        let count = self.particles.count;
        let frame_stats = diagnostics.stats_mut();
        frame_stats.substeps = substeps;
        frame_stats.iterations = self.params.solver_iterations;
        frame_stats.active_count = count as u32;
        frame_stats.spawned = spawned.spawned as u32;
        frame_stats.despawned = despawned as u32;
        frame_stats.attached = adhesion.attached;
        frame_stats.detached = adhesion.detached;
        frame_stats.collision_events = self.collision.events().len() as u32;
        if count > 0 {
            let densities = &self.particles.density[..count];
            frame_stats.average_density = densities.iter().sum::<f32>() / count as f32;
            frame_stats.max_neighbor_count = self.particles.neighbor_count[..count]
                .iter()
                .copied()
                .max()
                .unwrap_or(0);
        }

        let stats = diagnostics.end_frame();

        // wasm hosts time the frame themselves
        #[cfg(not(target_arch = "wasm32"))]
        let stats = {
            let elapsed_ms = started.elapsed().as_secs_f32() * 1000.0;
            diagnostics.record_elapsed_ms(elapsed_ms);
            FrameStats { elapsed_ms, ..stats }
        };
        stats
    }

    fn substep(&mut self, dt: f32, diagnostics: &mut FrameDiagnostics) {
        let params = &self.params;
        let gravity = params.gravity;
        let damping = params.velocity_damping;
        let max_velocity = params.max_velocity;

        // STEP 1: forces and prediction
        let particles = &mut self.particles;
        for i in 0..particles.count {
            if particles.flags[i].contains(ParticleFlags::SLEEPING) {
                particles.velocity[i] = Vec3::ZERO;
                particles.predicted[i] = particles.position[i];
                continue;
            }
            let v = ((particles.velocity[i] + gravity * dt) * damping).clamp_length_max(max_velocity);
            particles.velocity[i] = v;
            particles.predicted[i] = particles.position[i] + v * dt;
        }

        // STEP 2: spatial sort by predicted position
        self.sort
            .sort_particles(&mut self.particles, Some(&mut self.attachments));

        // STEP 3: density constraint iterations
        self.density.reset_lambda(&mut self.particles);
        for _ in 0..params.solver_iterations {
            self.density.solve_iteration(
                &mut self.particles,
                &self.sort,
                self.boundary.as_ref(),
                params,
                dt,
            );
        }

        // STEP 4: bounds, primitives, boundary proximity
        self.collision.resolve_positions(
            &mut self.particles,
            self.boundary.as_ref(),
            params,
            diagnostics,
        );

        // STEP 5: velocity from the solved displacement, then contact response
        let particles = &mut self.particles;
        let count = particles.count;
        let inv_dt = 1.0 / dt;
        self.incoming.clear();
        self.incoming.extend_from_slice(&particles.velocity[..count]);
        for i in 0..count {
            particles.velocity[i] = (particles.predicted[i] - particles.position[i]) * inv_dt;
        }
        let resting_speed = 2.0 * gravity.length() * dt;
        self.collision.apply_velocity_response(
            particles,
            &self.incoming,
            params,
            resting_speed,
            diagnostics,
        );

        // STEP 6: surface tension and XSPH viscosity
        update_surface_flags(particles, params.surface_tension.surface_neighbor_threshold);
        apply_surface_tension(
            particles,
            &self.sort,
            params.kernel(),
            &params.surface_tension,
            params.rest_density,
            dt,
        );
        apply_xsph_viscosity(particles, &self.sort, params.kernel(), params.viscosity);

        // STEP 7: numeric guard, then commit
        let mut non_finite = 0usize;
        let mut condemned = Vec::new();
        let fallback = params.bounds.center;
        for i in 0..count {
            if particles.predicted[i].is_finite() && particles.velocity[i].is_finite() {
                continue;
            }
            non_finite += 1;
            let committed = particles.position[i];
            particles.predicted[i] = if committed.is_finite() { committed } else { fallback };
            particles.velocity[i] = Vec3::ZERO;
            if params.non_finite_policy == NonFinitePolicy::Despawn {
                condemned.push(particles.particle_id[i]);
            }
        }
        if non_finite > 0 {
            diagnostics.record_non_finite(non_finite);
            log::warn!(
                "{non_finite} particles with non-finite state ({:?})",
                params.non_finite_policy
            );
            self.spawn.condemn(condemned);
        }

        particles.position[..count].copy_from_slice(&particles.predicted[..count]);
    }

    /// Frame-level sleep bookkeeping: count quiet frames, put long-quiet
    /// particles to sleep and wake sleepers touched by fast neighbors or
    /// contacts.
    fn update_sleep(&mut self) {
        let particles = &mut self.particles;
        let count = particles.count;
        let config = self.params.sleep;

        if !config.enabled {
            for i in 0..count {
                particles.flags[i].remove(ParticleFlags::SLEEPING);
                particles.quiet_frames[i] = 0;
            }
            return;
        }

        for i in 0..count {
            let quiet = particles.velocity[i].length() < config.velocity_threshold
                && !particles.flags[i].contains(ParticleFlags::ATTACHED);
            if quiet {
                particles.quiet_frames[i] = particles.quiet_frames[i].saturating_add(1);
                if particles.quiet_frames[i] >= config.frames {
                    particles.flags[i].insert(ParticleFlags::SLEEPING);
                }
            } else {
                particles.quiet_frames[i] = 0;
                particles.flags[i].remove(ParticleFlags::SLEEPING);
            }
        }

        let h2 = self.params.smoothing_radius() * self.params.smoothing_radius();
        let wake: Vec<usize> = (0..count)
            .filter(|&i| particles.flags[i].contains(ParticleFlags::SLEEPING))
            .filter(|&i| {
                if self.collision.has_contact(i)
                    && particles.velocity[i].length() >= config.velocity_threshold
                {
                    return true;
                }
                let pos_i = particles.position[i];
                let mut disturbed = false;
                self.sort.for_each_neighbor(pos_i, |j| {
                    if disturbed || j == i {
                        return;
                    }
                    if (particles.position[j] - pos_i).length_squared() < h2
                        && !particles.flags[j].contains(ParticleFlags::SLEEPING)
                        && particles.velocity[j].length() > config.velocity_threshold
                    {
                        disturbed = true;
                    }
                });
                disturbed
            })
            .collect();
        for i in wake {
            particles.flags[i].remove(ParticleFlags::SLEEPING);
            particles.quiet_frames[i] = 0;
        }
    }
}
