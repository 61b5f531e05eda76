//! Particle attachment to boundary surfaces (dripping slime, wet characters).
//!
//! Per particle state machine, evaluated once per frame after the substeps:
//!
//! ```text
//! Unattached --(near boundary, slow)--> Attached --(drift or speed)--> Detaching
//!     ^                                                                   |
//!     +-------------------------- next frame clear pass ------------------+
//! ```
//!
//! `Detaching` is `JUST_DETACHED` without `ATTACHED`; the flag lives for
//! exactly one frame.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::collision::{BoundarySet, CollisionManager};
use crate::diagnostics::FrameDiagnostics;
use crate::particle::{gather_field, ParticleFlags, ParticleStore};
use crate::params::SimulationParams;

/// Per-particle attachment, parallel to the particle store.
///
/// 64-byte GPU layout: three `vec3 + scalar` rows plus the boundary
/// velocity row.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct AttachmentRecord {
    /// Particle position at the end of the last adhesion pass (cm).
    pub previous_position: [f32; 3],
    /// Index into this frame's boundary set, -1 when unattached.
    pub boundary_index: i32,
    /// Particle offset from its boundary sample at attach time (cm).
    pub local_offset: [f32; 3],
    pub bone_index: i32,
    /// Boundary normal at attach time.
    pub local_normal: [f32; 3],
    pub attached_frames: u32,
    /// Boundary motion of the last adhesion pass (cm/s).
    pub boundary_velocity: [f32; 3],
    pub _pad: u32,
}

const _: () = assert!(std::mem::size_of::<AttachmentRecord>() == 64);

impl AttachmentRecord {
    pub const DETACHED: Self = Self {
        previous_position: [0.0; 3],
        boundary_index: -1,
        local_offset: [0.0; 3],
        bone_index: -1,
        local_normal: [0.0; 3],
        attached_frames: 0,
        boundary_velocity: [0.0; 3],
        _pad: 0,
    };

    pub fn is_attached(&self) -> bool {
        self.boundary_index >= 0
    }

    pub fn boundary(&self) -> Option<usize> {
        usize::try_from(self.boundary_index).ok()
    }
}

impl Default for AttachmentRecord {
    fn default() -> Self {
        Self::DETACHED
    }
}

/// Attachment records with the same index cardinality as the particle store.
pub struct AttachmentBuffer {
    records: Vec<AttachmentRecord>,
}

impl AttachmentBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: vec![AttachmentRecord::DETACHED; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    pub fn reserve(&mut self, capacity: usize) {
        if capacity > self.records.len() {
            self.records.resize(capacity, AttachmentRecord::DETACHED);
        }
    }

    pub fn get(&self, i: usize) -> &AttachmentRecord {
        &self.records[i]
    }

    pub fn get_mut(&mut self, i: usize) -> &mut AttachmentRecord {
        &mut self.records[i]
    }

    /// Same gather the particle store runs during sort and compaction.
    pub fn gather(&mut self, indices: &[u32]) {
        gather_field(&mut self.records, indices);
    }

    /// Reset slot `i` to unattached (new spawns land here).
    pub fn clear(&mut self, i: usize) {
        self.records[i] = AttachmentRecord::DETACHED;
    }

    pub fn as_bytes(&self, count: usize) -> &[u8] {
        bytemuck::cast_slice(&self.records[..count])
    }
}

/// Extra stack-pressure density weight of neighbor `j` on particle `i`.
///
/// Only attached neighbors sitting above `i` (against gravity) press down.
/// Returned as a factor on `m_j * W(r)`.
#[inline]
pub fn stack_pressure_factor(offset_i_to_j: Vec3, up: Vec3, neighbor_attached: bool, scale: f32) -> f32 {
    if neighbor_attached && offset_i_to_j.dot(up) > 0.0 {
        scale
    } else {
        0.0
    }
}

/// Transition counts of one adhesion pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AdhesionStats {
    pub attached: u32,
    pub newly_attached: u32,
    pub detached: u32,
    pub invalid: u32,
}

#[derive(Default)]
pub struct AdhesionManager {
    last: AdhesionStats,
}

impl AdhesionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame-start clear pass. Runs once per frame, after every consumer of
    /// last frame's `JUST_DETACHED` flags has read them.
    pub fn clear_pass(&self, particles: &mut ParticleStore) {
        let count = particles.count;
        for flags in &mut particles.flags[..count] {
            flags.remove(ParticleFlags::JUST_DETACHED);
        }
    }

    /// Run the per-particle state machine for the frame that just finished
    /// simulating. `dt` is the full frame time step.
    pub fn update(
        &mut self,
        particles: &mut ParticleStore,
        attachments: &mut AttachmentBuffer,
        boundary: Option<&BoundarySet>,
        collision: &CollisionManager,
        params: &SimulationParams,
        dt: f32,
        diagnostics: &mut FrameDiagnostics,
    ) -> AdhesionStats {
        let count = particles.count;
        let config = &params.adhesion;
        let mut stats = AdhesionStats::default();

        if !config.enabled {
            for i in 0..count {
                attachments.clear(i);
                particles.flags[i].remove(ParticleFlags::ATTACHED);
            }
            self.last = stats;
            return stats;
        }

        let detach_distance = params.detach_distance();
        let inv_dt = if dt > 0.0 { 1.0 / dt } else { 0.0 };

        for i in 0..count {
            let record = attachments.get_mut(i);

            if let Some(b) = record.boundary() {
                let Some(set) = boundary.filter(|set| b < set.len()) else {
                    // Boundary shrank under the attachment: treat as unattached
                    *record = AttachmentRecord::DETACHED;
                    particles.flags[i].remove(ParticleFlags::ATTACHED);
                    diagnostics.record_invalid_attachment();
                    stats.invalid += 1;
                    continue;
                };

                let delta = set.delta(b);
                let boundary_velocity = delta * inv_dt;
                let previous = Vec3::from(record.previous_position);
                // The substeps already carried the particle along last
                // frame's boundary velocity; only the remainder is added.
                let carried = Vec3::from(record.boundary_velocity) * dt;
                let follow = particles.position[i] + delta - carried;
                let drift = (follow - previous).length();
                let relative_speed = (particles.velocity[i] - boundary_velocity).length();

                if drift > detach_distance || relative_speed > config.max_detach_speed {
                    *record = AttachmentRecord::DETACHED;
                    let flags = &mut particles.flags[i];
                    flags.remove(ParticleFlags::ATTACHED);
                    flags.insert(ParticleFlags::JUST_DETACHED);
                    particles.velocity[i] = boundary_velocity;
                    stats.detached += 1;
                    continue;
                }

                let anchor = set.position[b] + Vec3::from(record.local_offset);
                let p = follow.lerp(anchor, config.constraint_blend);
                particles.position[i] = p;
                particles.predicted[i] = p;
                particles.velocity[i] = boundary_velocity;
                record.previous_position = p.to_array();
                record.boundary_velocity = boundary_velocity.to_array();
                record.bone_index = set.bone_index[b];
                record.attached_frames = record.attached_frames.saturating_add(1);
                stats.attached += 1;
                continue;
            }

            let Some(set) = boundary else {
                continue;
            };
            let Some((b, distance)) = collision.nearest_boundary(i) else {
                continue;
            };
            if b >= set.len()
                || distance > config.attach_radius
                || particles.velocity[i].length() >= config.attach_max_speed
            {
                continue;
            }

            let p = particles.position[i];
            let boundary_velocity = set.delta(b) * inv_dt;
            *record = AttachmentRecord {
                previous_position: p.to_array(),
                boundary_index: b as i32,
                local_offset: (p - set.position[b]).to_array(),
                bone_index: set.bone_index[b],
                local_normal: set.normal[b].to_array(),
                attached_frames: 0,
                boundary_velocity: boundary_velocity.to_array(),
                _pad: 0,
            };
            particles.flags[i].insert(ParticleFlags::ATTACHED);
            particles.velocity[i] = boundary_velocity;
            stats.attached += 1;
            stats.newly_attached += 1;
        }

        self.last = stats;
        stats
    }

    pub fn last_stats(&self) -> AdhesionStats {
        self.last
    }
}
