use fluid_core::collision::{BoundaryKind, ColliderShape};
use fluid_core::materials::FluidPreset;
use fluid_core::{FrameDiagnostics, Simulation, SimulationParams, SpawnRequest};
use glam::{Quat, Vec3};
use wasm_bindgen::prelude::*;

/// GPU-compatible particle struct: 32 bytes, matches the WGSL render input
#[repr(C)]
#[derive(Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
struct GpuParticle {
    position: [f32; 3], // 12 bytes
    density: f32,       //  4 bytes
    velocity: [f32; 3], // 12 bytes
    flags: u32,         //  4 bytes
}

/// Forwards `log` records from the core crate to the browser console.
struct ConsoleLogger;

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = JsValue::from(format!("[{}] {}", record.target(), record.args()));
        match record.level() {
            log::Level::Error => web_sys::console::error_1(&line),
            log::Level::Warn => web_sys::console::warn_1(&line),
            _ => web_sys::console::log_1(&line),
        }
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

fn to_vec3s(flat: &[f32]) -> Vec<Vec3> {
    flat.chunks_exact(3)
        .map(|c| Vec3::new(c[0], c[1], c[2]))
        .collect()
}

fn to_js_error(err: impl std::fmt::Display) -> JsValue {
    JsValue::from(err.to_string())
}

#[wasm_bindgen]
pub struct FluidWorld {
    sim: Simulation,
    diagnostics: FrameDiagnostics,
    gpu_buffer: Vec<GpuParticle>,
}

#[wasm_bindgen]
impl FluidWorld {
    #[wasm_bindgen(constructor)]
    pub fn new(capacity: usize) -> Result<FluidWorld, JsValue> {
        // A second world keeps the logger installed by the first
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(log::LevelFilter::Info);
        }
        web_sys::console::log_1(&format!("WASM FluidWorld created: capacity {}", capacity).into());

        let sim = Simulation::new(SimulationParams::default(), capacity).map_err(to_js_error)?;
        Ok(FluidWorld {
            sim,
            diagnostics: FrameDiagnostics::new(),
            gpu_buffer: vec![GpuParticle::default(); capacity],
        })
    }

    /// Advance one frame; returns the wall time spent in milliseconds.
    #[wasm_bindgen]
    pub fn step(&mut self, dt: f32) -> f32 {
        let start = js_sys::Date::now();
        self.sim.step_frame(dt, &mut self.diagnostics);
        self.write_gpu_output();
        let elapsed = (js_sys::Date::now() - start) as f32;
        self.diagnostics.record_elapsed_ms(elapsed);
        elapsed
    }

    #[wasm_bindgen]
    pub fn spawn(
        &self,
        x: f32, y: f32, z: f32,
        vx: f32, vy: f32, vz: f32,
        source_id: i32,
    ) {
        let request =
            SpawnRequest::new(Vec3::new(x, y, z), Vec3::new(vx, vy, vz)).with_source(source_id);
        self.sim.spawn_queue().add_spawn_request(request);
    }

    /// Spawn at every `xyz` triple of `positions` with a shared velocity.
    #[wasm_bindgen]
    pub fn spawn_batch(&self, positions: &[f32], vx: f32, vy: f32, vz: f32, source_id: i32) {
        let velocity = Vec3::new(vx, vy, vz);
        let requests = to_vec3s(positions)
            .into_iter()
            .map(|p| SpawnRequest::new(p, velocity).with_source(source_id));
        self.sim.spawn_queue().add_spawn_requests(requests);
    }

    #[wasm_bindgen]
    pub fn despawn_brush(&self, x: f32, y: f32, z: f32, radius: f32) {
        self.sim.spawn_queue().despawn_brush(Vec3::new(x, y, z), radius);
    }

    #[wasm_bindgen]
    pub fn despawn_source(&self, source_id: i32) {
        self.sim.spawn_queue().despawn_source(source_id);
    }

    /// Negative `max_count` removes the cap.
    #[wasm_bindgen]
    pub fn set_source_max(&self, source_id: i32, max_count: i32) {
        let max = u32::try_from(max_count).ok();
        self.sim.spawn_queue().set_source_max(source_id, max);
    }

    /// Latest resolved count for `source_id`, or -1 while the readback is in flight.
    #[wasm_bindgen]
    pub fn source_count(&self, source_id: i32) -> i32 {
        self.sim
            .source_count(source_id)
            .map_or(-1, |count| i32::try_from(count).unwrap_or(i32::MAX))
    }

    #[wasm_bindgen]
    pub fn set_solver_config(
        &mut self,
        substeps: u32,
        solver_iterations: u32,
    ) -> Result<(), JsValue> {
        let mut params = self.sim.params().clone();
        params.substeps = substeps;
        params.solver_iterations = solver_iterations;
        self.sim.set_params(params).map_err(to_js_error)
    }

    #[wasm_bindgen]
    pub fn set_fluid_config(
        &mut self,
        rest_density: f32,
        viscosity: f32,
        compliance: f32,
        smoothing_radius: f32,
    ) -> Result<(), JsValue> {
        let mut params = self.sim.params().clone();
        params.rest_density = rest_density;
        params.viscosity = viscosity;
        params.compliance = compliance;
        params.set_smoothing_radius(smoothing_radius);
        self.sim.set_params(params).map_err(to_js_error)
    }

    /// 0 = water, 1 = slime, 2 = honey.
    #[wasm_bindgen]
    pub fn apply_preset(&mut self, preset: u8) -> Result<(), JsValue> {
        let preset = match preset {
            1 => FluidPreset::SLIME,
            2 => FluidPreset::HONEY,
            _ => FluidPreset::WATER,
        };
        let mut params = self.sim.params().clone();
        preset.apply_to(&mut params);
        self.sim.set_params(params).map_err(to_js_error)
    }

    #[wasm_bindgen]
    pub fn set_gravity(&mut self, x: f32, y: f32, z: f32) -> Result<(), JsValue> {
        let mut params = self.sim.params().clone();
        params.gravity = Vec3::new(x, y, z);
        self.sim.set_params(params).map_err(to_js_error)
    }

    /// `rotation` is an `xyzw` quaternion.
    #[wasm_bindgen]
    pub fn set_bounds(
        &mut self,
        center: &[f32],
        half_extents: &[f32],
        rotation: &[f32],
    ) -> Result<(), JsValue> {
        let mut params = self.sim.params().clone();
        if let (Ok(c), Ok(h)) = (center.try_into(), half_extents.try_into()) {
            params.bounds.center = Vec3::from_array(c);
            params.bounds.half_extents = Vec3::from_array(h);
        }
        if let Ok(q) = <[f32; 4]>::try_from(rotation) {
            params.bounds.rotation = Quat::from_array(q);
        }
        self.sim.set_params(params).map_err(to_js_error)
    }

    /// Upload this frame's skinned boundary samples as flat `xyz` arrays.
    #[wasm_bindgen]
    pub fn update_boundary(&mut self, positions: &[f32], normals: &[f32], bone_index: &[i32]) {
        let positions = to_vec3s(positions);
        let normals = to_vec3s(normals);
        let bones = (!bone_index.is_empty()).then_some(bone_index);
        self.sim
            .update_boundary(BoundaryKind::Skinned, &positions, &normals, bones);
    }

    #[wasm_bindgen]
    pub fn clear_boundary(&mut self) {
        self.sim.clear_boundary();
    }

    #[wasm_bindgen]
    pub fn add_sphere_collider(
        &mut self,
        x: f32, y: f32, z: f32,
        radius: f32,
        restitution: f32,
        friction: f32,
    ) -> u32 {
        let shape = ColliderShape::Sphere {
            center: Vec3::new(x, y, z),
            radius,
        };
        self.sim.collision_mut().add_collider(shape, restitution, friction)
    }

    /// Returns 0 (never a valid id) when an endpoint is not an `xyz` triple.
    #[wasm_bindgen]
    pub fn add_capsule_collider(
        &mut self,
        a: &[f32],
        b: &[f32],
        radius: f32,
        restitution: f32,
        friction: f32,
    ) -> u32 {
        let (Ok(a), Ok(b)) = (<[f32; 3]>::try_from(a), <[f32; 3]>::try_from(b)) else {
            return 0;
        };
        let shape = ColliderShape::Capsule {
            a: Vec3::from_array(a),
            b: Vec3::from_array(b),
            radius,
        };
        self.sim.collision_mut().add_collider(shape, restitution, friction)
    }

    #[wasm_bindgen]
    pub fn move_sphere_collider(&mut self, id: u32, x: f32, y: f32, z: f32, radius: f32) -> bool {
        let shape = ColliderShape::Sphere {
            center: Vec3::new(x, y, z),
            radius,
        };
        self.sim.collision_mut().update_collider(id, shape)
    }

    #[wasm_bindgen]
    pub fn remove_collider(&mut self, id: u32) -> bool {
        self.sim.collision_mut().remove_collider(id)
    }

    /// Collision events of the last frame as `[x, y, z, speed]` rows.
    #[wasm_bindgen]
    pub fn take_collision_events(&mut self) -> Vec<f32> {
        self.sim
            .take_collision_events()
            .iter()
            .flat_map(|e| [e.position.x, e.position.y, e.position.z, e.speed])
            .collect()
    }

    /// Grow the particle buffers between frames.
    #[wasm_bindgen]
    pub fn reserve(&mut self, capacity: usize) {
        self.sim.reserve(capacity);
        self.gpu_buffer.resize(self.sim.capacity(), GpuParticle::default());
    }

    #[wasm_bindgen]
    pub fn get_gpu_buffer_ptr(&self) -> *const f32 {
        self.gpu_buffer.as_ptr() as *const f32
    }

    /// Bytes of live particle data at the start of the buffer.
    #[wasm_bindgen]
    pub fn get_gpu_buffer_byte_length(&self) -> usize {
        self.sim.active_count() * std::mem::size_of::<GpuParticle>()
    }

    #[wasm_bindgen]
    pub fn particle_count(&self) -> usize {
        self.sim.active_count()
    }

    #[wasm_bindgen]
    pub fn average_frame_ms(&self) -> f32 {
        self.diagnostics.average_frame_ms()
    }

    #[wasm_bindgen]
    pub fn average_density(&self) -> f32 {
        self.diagnostics
            .last_frame()
            .map_or(0.0, |stats| stats.average_density)
    }
}

impl FluidWorld {
    fn write_gpu_output(&mut self) {
        let particles = self.sim.particles();
        for i in 0..particles.count {
            let pos = particles.position[i];
            let vel = particles.velocity[i];
            self.gpu_buffer[i] = GpuParticle {
                position: [pos.x, pos.y, pos.z],
                density: particles.density[i],
                velocity: [vel.x, vel.y, vel.z],
                flags: particles.flags[i].bits(),
            };
        }
    }
}
