use fluid_core::collision::{ColliderId, ColliderShape, CollisionManager};
use fluid_core::diagnostics::FrameDiagnostics;
use fluid_core::particle::{ParticleFlags, ParticleRecord, ParticleStore};
use fluid_core::spawn::SpawnRequest;
use fluid_core::{Simulation, SimulationParams};
use glam::{Quat, Vec3};

const DT: f32 = 1.0 / 60.0;

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

/// Scatter of particles with fast velocities in every direction.
fn spray(n: usize, center: Vec3) -> Vec<SpawnRequest> {
    (0..n)
        .map(|i| {
            let a = i as f32 * 2.399_963;
            let z = 1.0 - 2.0 * (i as f32 + 0.5) / n as f32;
            let r = (1.0 - z * z).sqrt();
            let dir = Vec3::new(a.cos() * r, a.sin() * r, z);
            SpawnRequest::new(center + dir * 15.0, dir * 1500.0)
        })
        .collect()
}

#[test]
fn test_particles_stay_inside_axis_aligned_bounds() {
    let params = SimulationParams::default();
    let radius = params.particle_radius;
    let mut sim = Simulation::new(params, 256).unwrap();
    sim.spawn_queue().add_spawn_requests(spray(200, Vec3::new(0.0, 0.0, 100.0)));

    let mut diagnostics = FrameDiagnostics::new();
    for frame in 0..60 {
        sim.step_frame(DT, &mut diagnostics);
        let bounds = *sim.collision().bounds().unwrap();
        for p in sim.particles().positions() {
            assert!(
                bounds.contains(*p, -radius + 1e-3),
                "frame {frame}: {p:?} escaped the bounds"
            );
        }
    }
}

#[test]
fn test_particles_stay_inside_rotated_bounds() {
    let mut params = SimulationParams::default();
    params.bounds.rotation = Quat::from_rotation_z(0.6) * Quat::from_rotation_x(0.3);
    let mut sim = Simulation::new(params, 256).unwrap();
    sim.spawn_queue().add_spawn_requests(spray(150, Vec3::new(0.0, 0.0, 100.0)));

    let mut diagnostics = FrameDiagnostics::new();
    for _ in 0..45 {
        sim.step_frame(DT, &mut diagnostics);
    }
    let bounds = *sim.collision().bounds().unwrap();
    assert!(!bounds.is_axis_aligned());
    for p in sim.particles().positions() {
        assert!(bounds.contains(*p, 1e-3), "{p:?} escaped the rotated bounds");
    }
}

#[test]
fn test_particles_never_end_inside_sphere_collider() {
    let params = SimulationParams::default();
    let radius = params.particle_radius;
    let mut sim = Simulation::new(params, 128).unwrap();
    let center = Vec3::new(0.0, 0.0, 60.0);
    sim.collision_mut().add_collider(
        ColliderShape::Sphere {
            center,
            radius: 25.0,
        },
        0.2,
        0.1,
    );
    let drops: Vec<SpawnRequest> = (0..40)
        .map(|i| {
            let x = (i % 8) as f32 * 6.0 - 21.0;
            let y = (i / 8) as f32 * 6.0 - 12.0;
            SpawnRequest::new(Vec3::new(x, y, 150.0), Vec3::ZERO)
        })
        .collect();
    sim.spawn_queue().add_spawn_requests(drops);

    let mut diagnostics = FrameDiagnostics::new();
    for frame in 0..90 {
        sim.step_frame(DT, &mut diagnostics);
        for p in sim.particles().positions() {
            assert!(
                (*p - center).length() >= 25.0 + radius - 1e-3,
                "frame {frame}: {p:?} inside the sphere"
            );
        }
    }
}

#[test]
fn test_moved_collider_takes_effect_next_frame() {
    let params = SimulationParams::default();
    let mut sim = Simulation::new(params, 8).unwrap();
    let id = sim.collision_mut().add_collider(
        ColliderShape::Box {
            center: Vec3::new(200.0, 0.0, 0.0),
            half_extents: Vec3::splat(10.0),
            rotation: Quat::IDENTITY,
        },
        0.0,
        0.0,
    );
    sim.spawn_queue()
        .add_spawn_request(SpawnRequest::new(Vec3::new(0.0, 0.0, 50.0), Vec3::ZERO));
    let mut diagnostics = FrameDiagnostics::new();
    sim.step_frame(DT, &mut diagnostics);

    let moved = sim.collision_mut().update_collider(
        id,
        ColliderShape::Box {
            center: Vec3::new(0.0, 0.0, 50.0),
            half_extents: Vec3::splat(10.0),
            rotation: Quat::IDENTITY,
        },
    );
    assert!(moved);
    let unknown = ColliderShape::Sphere {
        center: Vec3::ZERO,
        radius: 1.0,
    };
    assert!(!sim.collision_mut().update_collider(id + 100, unknown));
    sim.step_frame(DT, &mut diagnostics);

    let p = sim.particles().positions()[0];
    let local = (p - Vec3::new(0.0, 0.0, 50.0)).abs();
    assert!(
        local.max_element() >= 10.0 + sim.params().particle_radius - 1e-3,
        "particle {p:?} left inside the moved box"
    );
}

#[test]
fn test_degenerate_collider_skipped_and_counted_per_frame() {
    let params = SimulationParams::default();
    let mut sim = Simulation::new(params, 8).unwrap();
    sim.collision_mut().add_collider(
        ColliderShape::Capsule {
            a: Vec3::new(0.0, 0.0, 40.0),
            b: Vec3::new(0.0, 0.0, 60.0),
            radius: f32::NAN,
        },
        0.0,
        0.0,
    );
    sim.spawn_queue()
        .add_spawn_request(SpawnRequest::new(Vec3::new(0.0, 0.0, 50.0), Vec3::ZERO));

    let mut diagnostics = FrameDiagnostics::new();
    sim.step_frame(DT, &mut diagnostics);
    let p = sim.particles().positions()[0];
    assert!(p.is_finite());
    assert!(p.x.abs() < 1e-3 && p.y.abs() < 1e-3, "degenerate capsule must not push");
    // Counted once per substep
    assert_eq!(
        diagnostics.totals().degenerate_colliders_skipped,
        u64::from(sim.params().substeps)
    );
}

#[test]
fn test_floor_impact_applies_restitution_and_friction() {
    let mut params = SimulationParams::default();
    params.bounds.restitution = 0.5;
    params.bounds.friction = 0.1;
    let floor = params.bounds.center.z - params.bounds.half_extents.z + params.particle_radius;
    let mut manager = CollisionManager::new(&params);
    let mut diagnostics = FrameDiagnostics::new();

    let mut store = store_with(&[Vec3::new(0.0, 0.0, floor + 5.0)]);
    store.predicted[0] = Vec3::new(1.0, 0.0, floor - 20.0);
    manager.resolve_positions(&mut store, None, &params, &mut diagnostics);
    assert!((store.predicted[0].z - floor).abs() < 1e-4);
    assert!(store.flags[0].contains(ParticleFlags::NEAR_GROUND));
    assert!(store.flags[0].contains(ParticleFlags::HAS_COLLIDED));

    // Velocity derived from the projected step, plus some sliding speed
    store.velocity[0] = Vec3::new(200.0, 0.0, -500.0);
    let incoming = [Vec3::new(100.0, 0.0, -600.0)];
    manager.apply_velocity_response(&mut store, &incoming, &params, 1.0, &mut diagnostics);

    let v = store.velocity[0];
    assert!((v.z - 300.0).abs() < 1e-2, "bounce keeps half the impact speed, got {v:?}");
    assert!((v.x - 180.0).abs() < 1e-2);
}

#[test]
fn test_resting_contact_does_not_bounce() {
    let mut params = SimulationParams::default();
    params.bounds.restitution = 0.9;
    let floor = params.bounds.center.z - params.bounds.half_extents.z + params.particle_radius;
    let mut manager = CollisionManager::new(&params);
    let mut diagnostics = FrameDiagnostics::new();

    let mut store = store_with(&[Vec3::new(0.0, 0.0, floor)]);
    store.predicted[0] = Vec3::new(0.0, 0.0, floor - 0.1);
    manager.resolve_positions(&mut store, None, &params, &mut diagnostics);
    store.velocity[0] = Vec3::ZERO;
    let incoming = [Vec3::new(0.0, 0.0, -5.0)];
    manager.apply_velocity_response(&mut store, &incoming, &params, 2.0 * 980.0 * DT, &mut diagnostics);
    assert_eq!(store.velocity[0].z, 0.0);
}

#[test]
fn test_events_respect_speed_cap_and_cooldown() {
    let mut params = SimulationParams::default();
    params.collision_events.enabled = true;
    params.collision_events.min_speed = 100.0;
    params.collision_events.cooldown_frames = 3;
    params.collision_events.max_per_frame = 2;
    let floor = params.bounds.center.z - params.bounds.half_extents.z + params.particle_radius;
    let mut manager = CollisionManager::new(&params);
    let mut diagnostics = FrameDiagnostics::new();

    let start = [
        Vec3::new(-40.0, 0.0, floor),
        Vec3::new(0.0, 0.0, floor),
        Vec3::new(40.0, 0.0, floor),
        Vec3::new(80.0, 0.0, floor),
    ];
    let mut store = store_with(&start);
    let incoming = [
        Vec3::new(0.0, 0.0, -600.0),
        Vec3::new(0.0, 0.0, -600.0),
        Vec3::new(0.0, 0.0, -600.0),
        Vec3::new(0.0, 0.0, -50.0),
    ];

    let impact = |manager: &mut CollisionManager,
                  store: &mut ParticleStore,
                  diag: &mut FrameDiagnostics| {
        diag.begin_frame();
        manager.begin_frame(store);
        for i in 0..store.count {
            store.predicted[i] = start[i] - Vec3::Z * 3.0;
        }
        manager.resolve_positions(store, None, &params, diag);
        manager.apply_velocity_response(store, &incoming, &params, 1.0, diag);
        diag.end_frame();
    };

    impact(&mut manager, &mut store, &mut diagnostics);
    let first: Vec<u32> = manager.events().iter().map(|e| e.particle_id).collect();
    assert_eq!(first, vec![0, 1], "cap of 2, slow particle 3 filtered");
    assert!(manager.events().iter().all(|e| e.collider == ColliderId::Bounds));
    assert!(manager.events().iter().all(|e| (e.speed - 600.0).abs() < 1e-3));
    assert_eq!(diagnostics.totals().collision_events_dropped, 1);

    impact(&mut manager, &mut store, &mut diagnostics);
    let second: Vec<u32> = manager.events().iter().map(|e| e.particle_id).collect();
    assert_eq!(second, vec![2], "particles 0 and 1 are cooling down");

    impact(&mut manager, &mut store, &mut diagnostics);
    assert!(manager.events().is_empty());

    // Cooldown of 3 frames has run out for particles 0 and 1
    impact(&mut manager, &mut store, &mut diagnostics);
    let fourth: Vec<u32> = manager.events().iter().map(|e| e.particle_id).collect();
    assert_eq!(fourth, vec![0, 1]);
}

#[test]
fn test_primitive_events_name_the_collider() {
    let mut params = SimulationParams::default();
    params.collision_events.enabled = true;
    params.collision_events.min_speed = 10.0;
    let mut manager = CollisionManager::new(&params);
    let id = manager.add_collider(
        ColliderShape::Sphere {
            center: Vec3::new(0.0, 0.0, 50.0),
            radius: 10.0,
        },
        0.0,
        0.5,
    );
    let mut diagnostics = FrameDiagnostics::new();
    let mut store = store_with(&[Vec3::new(0.0, 0.0, 70.0)]);
    store.predicted[0] = Vec3::new(0.0, 0.0, 62.0);
    manager.resolve_positions(&mut store, None, &params, &mut diagnostics);
    manager.apply_velocity_response(&mut store, &[Vec3::new(0.0, 0.0, -480.0)], &params, 1.0, &mut diagnostics);

    let events = manager.take_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].collider, ColliderId::Primitive(id));
    assert_eq!(events[0].normal, Vec3::Z);
    assert!(manager.events().is_empty());
}

#[test]
fn test_event_indices_point_at_final_particle_order() {
    let mut params = SimulationParams::default();
    params.substeps = 4;
    params.collision_events.enabled = true;
    params.collision_events.min_speed = 50.0;
    params.collision_events.cooldown_frames = 1;
    params.collision_events.max_per_frame = 10_000;
    let mut sim = Simulation::new(params, 400).unwrap();
    sim.spawn_queue().add_spawn_requests(spray(400, Vec3::new(0.0, 0.0, 60.0)));

    let mut diagnostics = FrameDiagnostics::new();
    let mut seen = 0;
    for frame in 0..20 {
        sim.step_frame(DT, &mut diagnostics);
        let particles = sim.particles();
        for event in sim.collision_events() {
            assert_eq!(
                particles.particle_id[event.particle_index], event.particle_id,
                "frame {frame}: event index names another particle"
            );
            assert_eq!(particles.source_id[event.particle_index], event.source_id);
        }
        seen += sim.collision_events().len();
    }
    assert!(seen > 0, "the spray must hit the walls");
}
