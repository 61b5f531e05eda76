pub mod boundary;
pub mod bounds;
pub mod events;
pub mod primitives;

use std::collections::HashMap;

use glam::Vec3;

use crate::diagnostics::FrameDiagnostics;
use crate::particle::{ParticleFlags, ParticleStore};
use crate::params::{BoundsConfig, SimulationParams};
pub use boundary::{BoundaryKind, BoundarySet};
pub use bounds::{contact_response, BoundsVolume};
pub use events::{ColliderId, CollisionEvent, CollisionEventQueue, EventOutcome};
pub use primitives::ColliderShape;

/// Contact normals this close to "up" mark a particle as resting on ground.
const GROUND_NORMAL_COS: f32 = 0.7;

/// A registered sphere/capsule/box with its own surface response.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PrimitiveCollider {
    pub id: u32,
    pub shape: ColliderShape,
    pub restitution: f32,
    pub friction: f32,
}

#[derive(Clone, Copy, Debug)]
struct Contact {
    collider: ColliderId,
    normal: Vec3,
    restitution: f32,
    friction: f32,
}

/// Position projection against bounds and colliders, plus the contact
/// velocity response that follows it.
///
/// Per substep the order is fixed: bounds, then primitives, then a
/// proximity query against the boundary set. Boundary samples never push
/// particles; they only feed density and the adhesion pass.
pub struct CollisionManager {
    bounds: Option<BoundsVolume>,
    colliders: Vec<PrimitiveCollider>,
    next_collider_id: u32,
    contacts: Vec<Option<Contact>>,
    nearest_boundary: Vec<Option<(u32, f32)>>,
    events: CollisionEventQueue,
}

impl CollisionManager {
    pub fn new(params: &SimulationParams) -> Self {
        let mut manager = Self {
            bounds: None,
            colliders: Vec::new(),
            next_collider_id: 1,
            contacts: Vec::new(),
            nearest_boundary: Vec::new(),
            events: CollisionEventQueue::new(),
        };
        manager.set_bounds(&params.bounds);
        manager
    }

    /// Replace the bounds. Disabled or zero-extent bounds leave the domain open.
    pub fn set_bounds(&mut self, config: &BoundsConfig) {
        self.bounds = BoundsVolume::from_config(config);
        if config.enabled && self.bounds.is_none() {
            log::warn!(
                "bounds with half extents {:?} are degenerate, domain left open",
                config.half_extents
            );
        }
    }

    pub fn bounds(&self) -> Option<&BoundsVolume> {
        self.bounds.as_ref()
    }

    pub fn add_collider(&mut self, shape: ColliderShape, restitution: f32, friction: f32) -> u32 {
        let id = self.next_collider_id;
        self.next_collider_id += 1;
        if shape.is_degenerate() {
            log::warn!("collider {id} registered with degenerate geometry {shape:?}");
        }
        self.colliders.push(PrimitiveCollider {
            id,
            shape,
            restitution,
            friction,
        });
        id
    }

    /// Move or reshape a collider. Returns false for unknown ids.
    pub fn update_collider(&mut self, id: u32, shape: ColliderShape) -> bool {
        match self.colliders.iter_mut().find(|c| c.id == id) {
            Some(collider) => {
                collider.shape = shape;
                true
            }
            None => false,
        }
    }

    pub fn remove_collider(&mut self, id: u32) -> bool {
        let before = self.colliders.len();
        self.colliders.retain(|c| c.id != id);
        self.colliders.len() != before
    }

    pub fn colliders(&self) -> &[PrimitiveCollider] {
        &self.colliders
    }

    /// Frame-start clear pass: drop last frame's events, tick cooldowns and
    /// clear the one-frame `HAS_COLLIDED` flag.
    pub fn begin_frame(&mut self, particles: &mut ParticleStore) {
        self.events.clear();
        let count = particles.count;
        for i in 0..count {
            particles.flags[i].remove(ParticleFlags::HAS_COLLIDED);
            particles.event_cooldown[i] = particles.event_cooldown[i].saturating_sub(1);
        }
    }

    /// Project every predicted position out of bounds and colliders, and
    /// record the nearest boundary sample within the smoothing radius.
    pub fn resolve_positions(
        &mut self,
        particles: &mut ParticleStore,
        boundary: Option<&BoundarySet>,
        params: &SimulationParams,
        diagnostics: &mut FrameDiagnostics,
    ) {
        let count = particles.count;
        let radius = params.particle_radius;
        let h = params.smoothing_radius();
        let up = -params.down();

        let degenerate = self
            .colliders
            .iter()
            .filter(|c| c.shape.is_degenerate())
            .count();
        if degenerate > 0 {
            diagnostics.record_degenerate_colliders(degenerate);
        }

        self.contacts.clear();
        self.contacts.resize(count, None);
        self.nearest_boundary.clear();
        self.nearest_boundary.resize(count, None);

        for i in 0..count {
            let mut p = particles.predicted[i];
            let mut contact = None;

            if let Some(bounds) = &self.bounds {
                if let Some(hit) = bounds.project_inside(p, radius) {
                    p = hit.position;
                    contact = Some(Contact {
                        collider: ColliderId::Bounds,
                        normal: hit.normal,
                        restitution: bounds.restitution,
                        friction: bounds.friction,
                    });
                }
            }

            for collider in &self.colliders {
                if collider.shape.is_degenerate() {
                    continue;
                }
                if let Some(hit) = collider.shape.resolve(p, radius) {
                    p = hit.position;
                    contact = Some(Contact {
                        collider: ColliderId::Primitive(collider.id),
                        normal: hit.normal,
                        restitution: collider.restitution,
                        friction: collider.friction,
                    });
                }
            }

            particles.predicted[i] = p;
            let flags = &mut particles.flags[i];
            flags.set(
                ParticleFlags::NEAR_GROUND,
                contact.map_or(false, |c| c.normal.dot(up) > GROUND_NORMAL_COS),
            );
            if contact.is_some() {
                flags.insert(ParticleFlags::HAS_COLLIDED);
            }
            self.contacts[i] = contact;

            let near = boundary.and_then(|set| set.nearest(p, h));
            flags.set(ParticleFlags::NEAR_BOUNDARY, near.is_some());
            self.nearest_boundary[i] = near.map(|(b, d)| (b as u32, d));
        }
    }

    /// Contact velocity response for the particles touched by the last
    /// `resolve_positions`. `incoming` holds the velocities from before the
    /// substep's solve; impacts emit collision events.
    pub fn apply_velocity_response(
        &mut self,
        particles: &mut ParticleStore,
        incoming: &[Vec3],
        params: &SimulationParams,
        resting_speed: f32,
        diagnostics: &mut FrameDiagnostics,
    ) {
        let count = particles.count.min(self.contacts.len());
        let dropped_before = self.events.dropped();
        for i in 0..count {
            let Some(contact) = self.contacts[i] else {
                continue;
            };
            let v_in = incoming[i];
            particles.velocity[i] = contact_response(
                particles.velocity[i],
                v_in,
                contact.normal,
                contact.restitution,
                contact.friction,
                resting_speed,
            );

            let impact_speed = (-v_in.dot(contact.normal)).max(0.0);
            let event = CollisionEvent {
                particle_index: i,
                particle_id: particles.particle_id[i],
                source_id: particles.source_id[i],
                collider: contact.collider,
                position: particles.predicted[i],
                normal: contact.normal,
                speed: impact_speed,
            };
            self.events
                .offer(&params.collision_events, &mut particles.event_cooldown[i], event);
        }
        let dropped = self.events.dropped() - dropped_before;
        if dropped > 0 {
            diagnostics.record_collision_events_dropped(dropped);
        }
    }

    /// Nearest boundary sample recorded for particle `i` by the last resolve.
    pub fn nearest_boundary(&self, i: usize) -> Option<(usize, f32)> {
        self.nearest_boundary
            .get(i)
            .copied()
            .flatten()
            .map(|(b, d)| (b as usize, d))
    }

    pub fn has_contact(&self, i: usize) -> bool {
        matches!(self.contacts.get(i), Some(Some(_)))
    }

    pub fn events(&self) -> &[CollisionEvent] {
        self.events.events()
    }

    pub fn take_events(&mut self) -> Vec<CollisionEvent> {
        self.events.take()
    }

    /// Re-point this frame's events at the final particle order. Events of
    /// earlier substeps carry indices from before the later sorts.
    pub fn reindex_events(&mut self, particles: &ParticleStore) {
        if self.events.events().is_empty() {
            return;
        }
        let slots: HashMap<u32, usize> = particles
            .ids()
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();
        self.events.reindex(|id| slots.get(&id).copied());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::ParticleRecord;

    fn store_with(positions: &[Vec3]) -> ParticleStore {
        let mut store = ParticleStore::new(positions.len());
        for (i, p) in positions.iter().enumerate() {
            store.push(ParticleRecord {
                position: *p,
                velocity: Vec3::ZERO,
                mass: 1.0,
                particle_id: i as u32,
                source_id: 0,
            });
        }
        store
    }

    #[test]
    fn test_bounds_then_primitive_order() {
        let params = SimulationParams::default();
        let mut manager = CollisionManager::new(&params);
        manager.add_collider(
            ColliderShape::Sphere {
                center: Vec3::new(0.0, 0.0, 20.0),
                radius: 10.0,
            },
            0.0,
            0.0,
        );
        let mut store = store_with(&[Vec3::new(0.0, 0.0, 18.0)]);
        let mut diag = FrameDiagnostics::new();
        manager.resolve_positions(&mut store, None, &params, &mut diag);
        let p = store.predicted[0];
        assert!(
            (p - Vec3::new(0.0, 0.0, 20.0)).length() >= 15.0 - 1e-3,
            "particle must end outside the sphere, got {p:?}"
        );
        assert!(store.flags[0].contains(ParticleFlags::HAS_COLLIDED));
    }

    #[test]
    fn test_degenerate_collider_is_counted_and_skipped() {
        let params = SimulationParams::default();
        let mut manager = CollisionManager::new(&params);
        manager.add_collider(
            ColliderShape::Sphere {
                center: Vec3::new(0.0, 0.0, 50.0),
                radius: 0.0,
            },
            0.0,
            0.0,
        );
        let mut store = store_with(&[Vec3::new(0.0, 0.0, 50.0)]);
        let mut diag = FrameDiagnostics::new();
        diag.begin_frame();
        manager.resolve_positions(&mut store, None, &params, &mut diag);
        assert_eq!(store.predicted[0], Vec3::new(0.0, 0.0, 50.0));
        assert_eq!(diag.frame_counters().degenerate_colliders_skipped, 1);
    }

    #[test]
    fn test_remove_collider() {
        let params = SimulationParams::default();
        let mut manager = CollisionManager::new(&params);
        let id = manager.add_collider(
            ColliderShape::Sphere {
                center: Vec3::ZERO,
                radius: 1.0,
            },
            0.0,
            0.0,
        );
        assert!(manager.remove_collider(id));
        assert!(!manager.remove_collider(id));
        assert!(manager.colliders().is_empty());
    }
}
