//! Particle lifecycle: spawn/despawn request queues and ID allocation.
//!
//! Producers on any thread talk to a shared [`SpawnQueue`]. The simulation
//! owns the [`SpawnManager`], which swaps the pending requests into its
//! active set once per frame and applies them: despawn first, spawn second.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use glam::Vec3;

use crate::adhesion::AttachmentBuffer;
use crate::compaction::StreamCompactionManager;
use crate::diagnostics::FrameDiagnostics;
use crate::particle::{ParticleRecord, ParticleStore, INVALID_SOURCE};

/// New particle to inject at the next spawn pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpawnRequest {
    pub position: Vec3,
    pub velocity: Vec3,
    /// `None` takes the emitter/preset default mass.
    pub mass: Option<f32>,
    pub source_id: i32,
}

impl SpawnRequest {
    pub fn new(position: Vec3, velocity: Vec3) -> Self {
        Self {
            position,
            velocity,
            mass: None,
            source_id: INVALID_SOURCE,
        }
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = Some(mass);
        self
    }

    pub fn with_source(mut self, source_id: i32) -> Self {
        self.source_id = source_id;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DespawnRequest {
    /// Every particle within `radius` of `center`.
    Brush { center: Vec3, radius: f32 },
    /// Every particle owned by the emitter.
    Source { source_id: i32 },
}

#[derive(Default)]
struct RequestBatch {
    spawns: Vec<SpawnRequest>,
    despawns: Vec<DespawnRequest>,
    /// `(source, max)`; `None` removes the cap.
    source_limits: Vec<(i32, Option<u32>)>,
}

impl RequestBatch {
    fn is_empty(&self) -> bool {
        self.spawns.is_empty() && self.despawns.is_empty() && self.source_limits.is_empty()
    }

    fn clear(&mut self) {
        self.spawns.clear();
        self.despawns.clear();
        self.source_limits.clear();
    }
}

/// Thread-safe producer side: a lock around the pending batch only, plus an
/// atomic "has pending" flag for lock-free polling and the ID counter.
pub struct SpawnQueue {
    pending: Mutex<RequestBatch>,
    has_pending: AtomicBool,
    next_id: AtomicU32,
}

impl Default for SpawnQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SpawnQueue {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(RequestBatch::default()),
            has_pending: AtomicBool::new(false),
            next_id: AtomicU32::new(0),
        }
    }

    // Poisoned locks are taken over; a batch is valid after every push.
    fn lock(&self) -> MutexGuard<'_, RequestBatch> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_spawn_request(&self, request: SpawnRequest) {
        self.lock().spawns.push(request);
        self.has_pending.store(true, Ordering::Release);
    }

    pub fn add_spawn_requests<I: IntoIterator<Item = SpawnRequest>>(&self, requests: I) {
        self.lock().spawns.extend(requests);
        self.has_pending.store(true, Ordering::Release);
    }

    pub fn despawn_brush(&self, center: Vec3, radius: f32) {
        self.lock()
            .despawns
            .push(DespawnRequest::Brush { center, radius });
        self.has_pending.store(true, Ordering::Release);
    }

    pub fn despawn_source(&self, source_id: i32) {
        self.lock()
            .despawns
            .push(DespawnRequest::Source { source_id });
        self.has_pending.store(true, Ordering::Release);
    }

    /// Cap the live particle count of `source_id`; `None` lifts the cap.
    pub fn set_source_max(&self, source_id: i32, max_count: Option<u32>) {
        self.lock().source_limits.push((source_id, max_count));
        self.has_pending.store(true, Ordering::Release);
    }

    /// Reserve `count` consecutive particle IDs. Safe from any thread.
    pub fn allocate_particle_ids(&self, count: u32) -> Range<u32> {
        let start = self.next_id.fetch_add(count, Ordering::Relaxed);
        start..start + count
    }

    /// Next ID that will be handed out.
    pub fn peek_next_id(&self) -> u32 {
        self.next_id.load(Ordering::Relaxed)
    }

    pub fn has_pending(&self) -> bool {
        self.has_pending.load(Ordering::Acquire)
    }
}

/// k-th smallest (0-based) value via four 8-bit histogram passes, most
/// significant digit first. Each pass narrows the candidate prefix.
pub fn radix_select(values: &[u32], k: usize) -> Option<u32> {
    if k >= values.len() {
        return None;
    }
    let mut rank = k as u32;
    let mut prefix = 0u32;
    let mut prefix_mask = 0u32;
    for pass in 0..4 {
        let shift = 24 - 8 * pass;
        let mut histogram = [0u32; 256];
        for &v in values {
            if v & prefix_mask == prefix {
                histogram[((v >> shift) & 0xFF) as usize] += 1;
            }
        }
        let mut below = 0u32;
        for (digit, &n) in histogram.iter().enumerate() {
            if below + n > rank {
                rank -= below;
                prefix |= (digit as u32) << shift;
                prefix_mask |= 0xFF << shift;
                break;
            }
            below += n;
        }
    }
    Some(prefix)
}

/// Outcome of one frame's spawn pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpawnPassResult {
    pub spawned: usize,
    pub dropped: usize,
    /// IDs handed to the spawned particles, in request order.
    pub first_id: u32,
}

/// Simulation-side half of the spawn system.
pub struct SpawnManager {
    queue: Arc<SpawnQueue>,
    active: RequestBatch,
    source_limits: HashMap<i32, u32>,
    /// Particle IDs condemned by the simulation itself (non-finite state).
    condemned: HashSet<u32>,
    alive: Vec<bool>,
    source_ids: Vec<u32>,
}

impl Default for SpawnManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SpawnManager {
    pub fn new() -> Self {
        Self::with_queue(Arc::new(SpawnQueue::new()))
    }

    pub fn with_queue(queue: Arc<SpawnQueue>) -> Self {
        Self {
            queue,
            active: RequestBatch::default(),
            source_limits: HashMap::new(),
            condemned: HashSet::new(),
            alive: Vec::new(),
            source_ids: Vec::new(),
        }
    }

    /// Shared producer handle.
    pub fn queue(&self) -> Arc<SpawnQueue> {
        Arc::clone(&self.queue)
    }

    /// Move the pending requests to the active side. Call exactly once per
    /// frame, before the despawn and spawn passes. Returns whether anything
    /// was pending.
    pub fn swap_buffers(&mut self) -> bool {
        self.active.clear();
        if !self.queue.has_pending() {
            return false;
        }
        {
            let mut pending = self.queue.lock();
            std::mem::swap(&mut *pending, &mut self.active);
            self.queue.has_pending.store(false, Ordering::Release);
        }
        for &(source, max) in &self.active.source_limits {
            match max {
                Some(max) => {
                    self.source_limits.insert(source, max);
                }
                None => {
                    self.source_limits.remove(&source);
                }
            }
        }
        !self.active.is_empty()
    }

    pub fn source_limit(&self, source_id: i32) -> Option<u32> {
        self.source_limits.get(&source_id).copied()
    }

    /// Spawn requests swapped in for this frame.
    pub fn active_spawn_count(&self) -> usize {
        self.active.spawns.len()
    }

    /// Schedule particles for removal at the next despawn pass.
    pub fn condemn<I: IntoIterator<Item = u32>>(&mut self, particle_ids: I) {
        self.condemned.extend(particle_ids);
    }

    /// Brush, source, condemned and per-source oldest-eviction despawns,
    /// followed by one stable compaction. Returns the number removed.
    pub fn despawn_pass(
        &mut self,
        particles: &mut ParticleStore,
        attachments: Option<&mut AttachmentBuffer>,
        compaction: &mut StreamCompactionManager,
    ) -> usize {
        let count = particles.count;
        self.alive.clear();
        self.alive.resize(count, true);

        for request in &self.active.despawns {
            match *request {
                DespawnRequest::Brush { center, radius } => {
                    let r2 = radius * radius;
                    for i in 0..count {
                        if (particles.position[i] - center).length_squared() <= r2 {
                            self.alive[i] = false;
                        }
                    }
                }
                DespawnRequest::Source { source_id } => {
                    for i in 0..count {
                        if particles.source_id[i] == source_id {
                            self.alive[i] = false;
                        }
                    }
                }
            }
        }

        if !self.condemned.is_empty() {
            for i in 0..count {
                if self.condemned.contains(&particles.particle_id[i]) {
                    self.alive[i] = false;
                }
            }
            self.condemned.clear();
        }

        for (&source, &max) in &self.source_limits {
            self.source_ids.clear();
            self.source_ids.extend(
                (0..count)
                    .filter(|&i| self.alive[i] && particles.source_id[i] == source)
                    .map(|i| particles.particle_id[i]),
            );
            let live = self.source_ids.len();
            if live <= max as usize {
                continue;
            }
            let excess = live - max as usize;
            let Some(threshold) = radix_select(&self.source_ids, excess - 1) else {
                continue;
            };
            for i in 0..count {
                if particles.source_id[i] == source && particles.particle_id[i] <= threshold {
                    self.alive[i] = false;
                }
            }
            log::debug!("source {source}: evicted {excess} oldest particles (cap {max})");
        }

        compaction.compact_particles(particles, attachments, &self.alive)
    }

    /// Append this frame's spawn requests. Requests beyond capacity are
    /// dropped and counted; the buffers never grow here.
    pub fn spawn_pass(
        &mut self,
        particles: &mut ParticleStore,
        mut attachments: Option<&mut AttachmentBuffer>,
        default_mass: impl Fn(i32) -> f32,
        diagnostics: &mut FrameDiagnostics,
    ) -> SpawnPassResult {
        let requested = self.active.spawns.len();
        let free = particles.capacity().saturating_sub(particles.count);
        let accepted = requested.min(free);
        let ids = self.queue.allocate_particle_ids(accepted as u32);

        for (request, id) in self.active.spawns[..accepted].iter().zip(ids.clone()) {
            let mass = request
                .mass
                .filter(|m| m.is_finite() && *m > 0.0)
                .unwrap_or_else(|| default_mass(request.source_id));
            let record = ParticleRecord {
                position: request.position,
                velocity: request.velocity,
                mass,
                particle_id: id,
                source_id: request.source_id,
            };
            if let Some(slot) = particles.push(record) {
                if let Some(attachments) = attachments.as_deref_mut() {
                    attachments.clear(slot);
                }
            }
        }

        let dropped = requested - accepted;
        if dropped > 0 {
            diagnostics.record_spawns_dropped(dropped);
            log::warn!(
                "particle buffer full ({} / {}): dropped {dropped} spawn requests",
                particles.count,
                particles.capacity()
            );
        }
        self.active.spawns.clear();

        SpawnPassResult {
            spawned: accepted,
            dropped,
            first_id: ids.start,
        }
    }
}

/// Live particle count per source.
pub fn count_by_source(particles: &ParticleStore) -> HashMap<i32, u32> {
    let mut counts = HashMap::new();
    for &source in &particles.source_id[..particles.count] {
        *counts.entry(source).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radix_select_finds_kth_smallest() {
        let values = [900, 5, 70_000, 42, 1 << 30, 6];
        assert_eq!(radix_select(&values, 0), Some(5));
        assert_eq!(radix_select(&values, 2), Some(42));
        assert_eq!(radix_select(&values, 5), Some(1 << 30));
        assert_eq!(radix_select(&values, 6), None);
    }

    #[test]
    fn test_swap_clears_pending_flag() {
        let mut manager = SpawnManager::new();
        let queue = manager.queue();
        queue.add_spawn_request(SpawnRequest::new(Vec3::ZERO, Vec3::ZERO));
        assert!(queue.has_pending());
        assert!(manager.swap_buffers());
        assert!(!queue.has_pending());
        assert_eq!(manager.active_spawn_count(), 1);
        assert!(!manager.swap_buffers());
        assert_eq!(manager.active_spawn_count(), 0);
    }

    #[test]
    fn test_set_source_max_none_lifts_cap() {
        let mut manager = SpawnManager::new();
        let queue = manager.queue();
        queue.set_source_max(3, Some(10));
        manager.swap_buffers();
        assert_eq!(manager.source_limit(3), Some(10));
        queue.set_source_max(3, None);
        manager.swap_buffers();
        assert_eq!(manager.source_limit(3), None);
    }
}
