use glam::Vec3;

/// Source ID of a particle that belongs to no emitter.
pub const INVALID_SOURCE: i32 = -1;

bitflags::bitflags! {
    /// Per-particle state bits, uploaded as-is in the render buffer.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    #[repr(transparent)]
    pub struct ParticleFlags: u32 {
        const ATTACHED = 1 << 0;
        const SURFACE = 1 << 1;
        /// Set for exactly one frame after a particle tears off a boundary.
        const JUST_DETACHED = 1 << 2;
        const NEAR_GROUND = 1 << 3;
        const HAS_COLLIDED = 1 << 4;
        const SLEEPING = 1 << 5;
        const NEAR_BOUNDARY = 1 << 6;
    }
}

/// One particle gathered out of the store, used for spawning and inspection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParticleRecord {
    pub position: Vec3,
    pub velocity: Vec3,
    pub mass: f32,
    pub particle_id: u32,
    pub source_id: i32,
}

/// Fixed-capacity SoA particle storage.
///
/// Every field vector is `capacity` long; only the first `count` entries are
/// live. Managers operate on the store directly, the store has no behavior
/// beyond bookkeeping.
pub struct ParticleStore {
    pub count: usize,
    /// Committed post-solve positions (cm).
    pub position: Vec<Vec3>,
    /// Positions being solved within a substep (cm).
    pub predicted: Vec<Vec3>,
    /// cm/s
    pub velocity: Vec<Vec3>,
    /// SPH density estimate (kg/m^3)
    pub density: Vec<f32>,
    /// Accumulated XPBD density multiplier.
    pub lambda: Vec<f32>,
    /// kg
    pub mass: Vec<f32>,
    pub particle_id: Vec<u32>,
    pub source_id: Vec<i32>,
    pub flags: Vec<ParticleFlags>,
    pub neighbor_count: Vec<u32>,
    /// Consecutive frames spent below the sleep threshold.
    pub quiet_frames: Vec<u16>,
    /// Frames left before this particle may report another collision event.
    pub event_cooldown: Vec<u16>,
}

impl ParticleStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            count: 0,
            position: vec![Vec3::ZERO; capacity],
            predicted: vec![Vec3::ZERO; capacity],
            velocity: vec![Vec3::ZERO; capacity],
            density: vec![0.0; capacity],
            lambda: vec![0.0; capacity],
            mass: vec![0.0; capacity],
            particle_id: vec![0; capacity],
            source_id: vec![INVALID_SOURCE; capacity],
            flags: vec![ParticleFlags::empty(); capacity],
            neighbor_count: vec![0; capacity],
            quiet_frames: vec![0; capacity],
            event_cooldown: vec![0; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count >= self.capacity()
    }

    /// Grow the buffers. Never shrinks; only called between frames.
    pub fn reserve(&mut self, capacity: usize) {
        if capacity <= self.capacity() {
            return;
        }
        self.position.resize(capacity, Vec3::ZERO);
        self.predicted.resize(capacity, Vec3::ZERO);
        self.velocity.resize(capacity, Vec3::ZERO);
        self.density.resize(capacity, 0.0);
        self.lambda.resize(capacity, 0.0);
        self.mass.resize(capacity, 0.0);
        self.particle_id.resize(capacity, 0);
        self.source_id.resize(capacity, INVALID_SOURCE);
        self.flags.resize(capacity, ParticleFlags::empty());
        self.neighbor_count.resize(capacity, 0);
        self.quiet_frames.resize(capacity, 0);
        self.event_cooldown.resize(capacity, 0);
    }

    /// Append a freshly spawned particle with zeroed solver state.
    ///
    /// Returns the new index, or `None` when the store is full.
    pub fn push(&mut self, record: ParticleRecord) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        let i = self.count;
        self.position[i] = record.position;
        self.predicted[i] = record.position;
        self.velocity[i] = record.velocity;
        self.density[i] = 0.0;
        self.lambda[i] = 0.0;
        self.mass[i] = record.mass;
        self.particle_id[i] = record.particle_id;
        self.source_id[i] = record.source_id;
        self.flags[i] = ParticleFlags::empty();
        self.neighbor_count[i] = 0;
        self.quiet_frames[i] = 0;
        self.event_cooldown[i] = 0;
        self.count += 1;
        Some(i)
    }

    pub fn record(&self, i: usize) -> ParticleRecord {
        ParticleRecord {
            position: self.position[i],
            velocity: self.velocity[i],
            mass: self.mass[i],
            particle_id: self.particle_id[i],
            source_id: self.source_id[i],
        }
    }

    /// Rebuild the live range as `self[k] = old[indices[k]]`.
    ///
    /// Used both for sort reordering (a permutation) and for compaction
    /// (an ordered subset). One gather per field.
    pub fn gather(&mut self, indices: &[u32]) {
        debug_assert!(indices.len() <= self.capacity());
        gather_field(&mut self.position, indices);
        gather_field(&mut self.predicted, indices);
        gather_field(&mut self.velocity, indices);
        gather_field(&mut self.density, indices);
        gather_field(&mut self.lambda, indices);
        gather_field(&mut self.mass, indices);
        gather_field(&mut self.particle_id, indices);
        gather_field(&mut self.source_id, indices);
        gather_field(&mut self.flags, indices);
        gather_field(&mut self.neighbor_count, indices);
        gather_field(&mut self.quiet_frames, indices);
        gather_field(&mut self.event_cooldown, indices);
        self.count = indices.len();
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.position[..self.count]
    }

    pub fn velocities(&self) -> &[Vec3] {
        &self.velocity[..self.count]
    }

    pub fn ids(&self) -> &[u32] {
        &self.particle_id[..self.count]
    }

    pub fn is_attached(&self, i: usize) -> bool {
        self.flags[i].contains(ParticleFlags::ATTACHED)
    }
}

/// `field[k] = old_field[indices[k]]` for every k in `indices`.
pub(crate) fn gather_field<T: Copy>(field: &mut [T], indices: &[u32]) {
    let gathered: Vec<T> = indices.iter().map(|&i| field[i as usize]).collect();
    field[..gathered.len()].copy_from_slice(&gathered);
}
