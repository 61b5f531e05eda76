use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use fluid_core::adhesion::AttachmentBuffer;
use fluid_core::compaction::StreamCompactionManager;
use fluid_core::diagnostics::FrameDiagnostics;
use fluid_core::particle::ParticleStore;
use fluid_core::spawn::{SpawnManager, SpawnQueue, SpawnRequest};
use fluid_core::{Simulation, SimulationParams};
use glam::Vec3;

const DEFAULT_MASS: f32 = 1.0;

/// One frame of lifecycle work without physics: swap, despawn, spawn.
fn lifecycle_frame(
    manager: &mut SpawnManager,
    store: &mut ParticleStore,
    attachments: &mut AttachmentBuffer,
    compaction: &mut StreamCompactionManager,
    diagnostics: &mut FrameDiagnostics,
) -> (usize, usize) {
    diagnostics.begin_frame();
    manager.swap_buffers();
    let removed = manager.despawn_pass(store, Some(attachments), compaction);
    let spawned = manager.spawn_pass(store, Some(attachments), |_| DEFAULT_MASS, diagnostics);
    diagnostics.end_frame();
    (removed, spawned.spawned)
}

fn request_at(x: f32, source: i32) -> SpawnRequest {
    SpawnRequest::new(Vec3::new(x, 0.0, 50.0), Vec3::ZERO).with_source(source)
}

#[test]
fn test_concurrent_id_allocation_is_unique() {
    let queue = Arc::new(SpawnQueue::new());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut ids = Vec::new();
                for _ in 0..200 {
                    ids.extend(queue.allocate_particle_ids(5));
                }
                ids
            })
        })
        .collect();

    let mut all = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(all.insert(id), "id {id} handed out twice");
        }
    }
    assert_eq!(all.len(), 8 * 200 * 5);
    assert_eq!(queue.peek_next_id(), 8000);
}

#[test]
fn test_concurrent_producers_all_delivered() {
    let mut manager = SpawnManager::new();
    let queue = manager.queue();
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let queue = manager.queue();
            thread::spawn(move || {
                for i in 0..50 {
                    queue.add_spawn_request(request_at(i as f32, t));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(queue.has_pending());

    let mut store = ParticleStore::new(1000);
    let mut attachments = AttachmentBuffer::new(1000);
    let mut compaction = StreamCompactionManager::new();
    let mut diagnostics = FrameDiagnostics::new();
    let (_, spawned) = lifecycle_frame(
        &mut manager,
        &mut store,
        &mut attachments,
        &mut compaction,
        &mut diagnostics,
    );
    assert_eq!(spawned, 200);
    let ids: HashSet<u32> = store.ids().iter().copied().collect();
    assert_eq!(ids.len(), 200, "every spawned particle needs its own id");
}

#[test]
fn test_ids_assigned_in_request_order() {
    let mut manager = SpawnManager::new();
    let queue = manager.queue();
    queue.add_spawn_requests((0..5).map(|i| request_at(i as f32, 0)));

    let mut store = ParticleStore::new(16);
    let mut attachments = AttachmentBuffer::new(16);
    let mut compaction = StreamCompactionManager::new();
    let mut diagnostics = FrameDiagnostics::new();
    lifecycle_frame(&mut manager, &mut store, &mut attachments, &mut compaction, &mut diagnostics);

    for i in 0..5 {
        assert_eq!(store.position[i].x, i as f32);
        assert_eq!(store.particle_id[i], i as u32);
        assert_eq!(store.mass[i], DEFAULT_MASS);
    }
}

#[test]
fn test_spawns_beyond_capacity_are_dropped_and_counted() {
    let mut manager = SpawnManager::new();
    let queue = manager.queue();
    queue.add_spawn_requests((0..12).map(|i| request_at(i as f32, 0)));

    let mut store = ParticleStore::new(8);
    let mut attachments = AttachmentBuffer::new(8);
    let mut compaction = StreamCompactionManager::new();
    let mut diagnostics = FrameDiagnostics::new();
    let (_, spawned) = lifecycle_frame(
        &mut manager,
        &mut store,
        &mut attachments,
        &mut compaction,
        &mut diagnostics,
    );

    assert_eq!(spawned, 8);
    assert_eq!(store.count, 8);
    assert_eq!(store.capacity(), 8, "buffers must never grow mid-frame");
    assert_eq!(diagnostics.totals().spawns_dropped, 4);
}

#[test]
fn test_per_source_eviction_removes_smallest_ids() {
    let n = 20;
    let k = 7;
    let mut manager = SpawnManager::new();
    let queue = manager.queue();
    // Interleave another source so eviction has to respect ownership
    for i in 0..(n + k) {
        queue.add_spawn_request(request_at(i as f32, 1));
        queue.add_spawn_request(request_at(i as f32, 2));
    }

    let mut store = ParticleStore::new(256);
    let mut attachments = AttachmentBuffer::new(256);
    let mut compaction = StreamCompactionManager::new();
    let mut diagnostics = FrameDiagnostics::new();
    lifecycle_frame(&mut manager, &mut store, &mut attachments, &mut compaction, &mut diagnostics);

    let mut source_ids: Vec<u32> = (0..store.count)
        .filter(|&i| store.source_id[i] == 1)
        .map(|i| store.particle_id[i])
        .collect();
    source_ids.sort_unstable();
    let expected_removed: HashSet<u32> = source_ids[..k].iter().copied().collect();

    queue.set_source_max(1, Some(n as u32));
    let (removed, _) = lifecycle_frame(
        &mut manager,
        &mut store,
        &mut attachments,
        &mut compaction,
        &mut diagnostics,
    );

    assert_eq!(removed, k);
    let remaining: Vec<u32> = (0..store.count)
        .filter(|&i| store.source_id[i] == 1)
        .map(|i| store.particle_id[i])
        .collect();
    assert_eq!(remaining.len(), n);
    assert!(remaining.iter().all(|id| !expected_removed.contains(id)));
    let other = (0..store.count).filter(|&i| store.source_id[i] == 2).count();
    assert_eq!(other, n + k, "other sources are untouched");
}

#[test]
fn test_despawn_runs_before_spawn() {
    let mut manager = SpawnManager::new();
    let queue = manager.queue();
    queue.add_spawn_requests((0..4).map(|i| request_at(i as f32, 5)));

    let mut store = ParticleStore::new(16);
    let mut attachments = AttachmentBuffer::new(16);
    let mut compaction = StreamCompactionManager::new();
    let mut diagnostics = FrameDiagnostics::new();
    lifecycle_frame(&mut manager, &mut store, &mut attachments, &mut compaction, &mut diagnostics);
    assert_eq!(store.count, 4);

    // Same frame: wipe the source and add new particles for it
    queue.despawn_source(5);
    queue.add_spawn_requests((0..3).map(|i| request_at(100.0 + i as f32, 5)));
    let (removed, spawned) = lifecycle_frame(
        &mut manager,
        &mut store,
        &mut attachments,
        &mut compaction,
        &mut diagnostics,
    );

    assert_eq!(removed, 4);
    assert_eq!(spawned, 3);
    assert_eq!(store.count, 3, "new spawns must survive the despawn of their source");
    assert!(store.positions().iter().all(|p| p.x >= 100.0));
}

#[test]
fn test_brush_despawn_only_inside_sphere() {
    let mut manager = SpawnManager::new();
    let queue = manager.queue();
    queue.add_spawn_requests((0..10).map(|i| request_at(i as f32 * 10.0, 0)));

    let mut store = ParticleStore::new(16);
    let mut attachments = AttachmentBuffer::new(16);
    let mut compaction = StreamCompactionManager::new();
    let mut diagnostics = FrameDiagnostics::new();
    lifecycle_frame(&mut manager, &mut store, &mut attachments, &mut compaction, &mut diagnostics);

    queue.despawn_brush(Vec3::new(45.0, 0.0, 50.0), 16.0);
    let (removed, _) = lifecycle_frame(
        &mut manager,
        &mut store,
        &mut attachments,
        &mut compaction,
        &mut diagnostics,
    );
    assert_eq!(removed, 4, "x = 30, 40, 50, 60 lie inside the brush");
    let xs: Vec<f32> = store.positions().iter().map(|p| p.x).collect();
    assert_eq!(xs, vec![0.0, 10.0, 20.0, 70.0, 80.0, 90.0]);
}

#[test]
fn test_simulation_applies_lifecycle_each_frame() {
    let params = SimulationParams::default();
    let mut sim = Simulation::new(params, 64).unwrap();
    let queue = sim.spawn_queue();
    queue.add_spawn_requests((0..10).map(|i| request_at(-40.0 + i as f32 * 10.0, 3)));

    let mut diagnostics = FrameDiagnostics::new();
    let stats = sim.step_frame(1.0 / 60.0, &mut diagnostics);
    assert_eq!(stats.spawned, 10);
    assert_eq!(sim.active_count(), 10);

    queue.despawn_source(3);
    let stats = sim.step_frame(1.0 / 60.0, &mut diagnostics);
    assert_eq!(stats.despawned, 10);
    assert_eq!(sim.active_count(), 0);
}
