use glam::Vec3;

use crate::params::CollisionEventConfig;

/// What a particle hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColliderId {
    Bounds,
    Primitive(u32),
}

/// Impact record handed to gameplay/audio collaborators.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CollisionEvent {
    /// Index into the particle buffer as of the end of the frame (this frame only).
    pub particle_index: usize,
    pub particle_id: u32,
    pub source_id: i32,
    pub collider: ColliderId,
    pub position: Vec3,
    pub normal: Vec3,
    /// Particle speed (cm/s) going into the contact.
    pub speed: f32,
}

/// Outcome of offering an impact to the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventOutcome {
    Emitted,
    Disabled,
    TooSlow,
    CoolingDown,
    /// The per-frame cap was already reached.
    Dropped,
}

/// Per-frame event buffer with speed gate, per-particle cooldown and a cap.
#[derive(Default)]
pub struct CollisionEventQueue {
    events: Vec<CollisionEvent>,
    dropped: usize,
}

impl CollisionEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget last frame's events.
    pub fn clear(&mut self) {
        self.events.clear();
        self.dropped = 0;
    }

    /// Offer an impact. `cooldown` is the particle's remaining cooldown and is
    /// re-armed when the event is emitted.
    pub fn offer(
        &mut self,
        config: &CollisionEventConfig,
        cooldown: &mut u16,
        event: CollisionEvent,
    ) -> EventOutcome {
        if !config.enabled {
            return EventOutcome::Disabled;
        }
        if event.speed < config.min_speed {
            return EventOutcome::TooSlow;
        }
        if *cooldown > 0 {
            return EventOutcome::CoolingDown;
        }
        if self.events.len() >= config.max_per_frame {
            self.dropped += 1;
            return EventOutcome::Dropped;
        }
        *cooldown = config.cooldown_frames;
        self.events.push(event);
        EventOutcome::Emitted
    }

    pub fn events(&self) -> &[CollisionEvent] {
        &self.events
    }

    pub fn take(&mut self) -> Vec<CollisionEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Point every event at its particle's current buffer slot.
    pub fn reindex<F: Fn(u32) -> Option<usize>>(&mut self, slot_of: F) {
        for event in &mut self.events {
            if let Some(slot) = slot_of(event.particle_id) {
                event.particle_index = slot;
            }
        }
    }
}
