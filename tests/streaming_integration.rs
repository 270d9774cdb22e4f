//! Streaming orchestrator driving a world from viewer positions

mod common;

use common::{test_config, world_with, TestGenerator};
use earth_stream::config::ViewShape;
use earth_stream::{CancelToken, ChunkPos, LodLevel, ViewerPos};
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn square(center: ChunkPos, r: i32) -> FxHashSet<ChunkPos> {
    (-r..=r)
        .flat_map(|dx| (-r..=r).map(move |dz| center.offset(dx, dz)))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn update_loads_view_and_assigns_lod() {
    let mut config = test_config();
    config.streaming.view_distance = 5;
    let world = world_with(config, TestGenerator::new(Duration::ZERO), None);
    let orchestrator = world.orchestrator();

    let report = orchestrator.update(ViewerPos::new(8.0, 8.0)).await;
    assert_eq!(report.requested, 121);
    assert_eq!(report.loaded, 121);
    assert_eq!(report.failed, 0);
    // Everything past distance 2 leaves LOD 0
    assert_eq!(report.lod_updates, 121 - 25);

    let loaded: FxHashSet<_> = world.get_loaded_partitions().into_iter().collect();
    assert_eq!(loaded, square(ChunkPos::new(0, 0), 5));

    let lod_of = |pos: ChunkPos| world.store().get_loaded(pos).unwrap().read().lod();
    assert_eq!(lod_of(ChunkPos::new(0, 0)), LodLevel::HIGHEST);
    assert_eq!(lod_of(ChunkPos::new(-4, 1)).get(), 1);
    assert_eq!(lod_of(ChunkPos::new(5, 5)).get(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn moving_viewer_unloads_trailing_edge() {
    let mut config = test_config();
    config.streaming.view_distance = 5;
    let generator = TestGenerator::new(Duration::ZERO);
    let world = world_with(config, generator.clone(), None);
    let orchestrator = world.orchestrator();

    orchestrator.update(ViewerPos::new(8.0, 8.0)).await;
    // Three chunks east
    let report = orchestrator.update(ViewerPos::new(56.0, 8.0)).await;
    assert_eq!(report.unloaded, 33);
    assert_eq!(report.requested, 33);
    assert_eq!(report.loaded, 33);

    let loaded: FxHashSet<_> = world.get_loaded_partitions().into_iter().collect();
    assert_eq!(loaded, square(ChunkPos::new(3, 0), 5));
    assert_eq!(world.store().spatial_index().len(), 121);

    // Standing still is a no-op
    let idle = orchestrator.update(ViewerPos::new(57.0, 9.0)).await;
    assert!(!idle.did_work());
    assert_eq!(generator.total_calls(), (121 + 33) * 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn viewer_outside_world_unloads_everything() {
    let mut config = test_config();
    config.streaming.view_distance = 2;
    let world = world_with(config, TestGenerator::new(Duration::ZERO), None);
    let orchestrator = world.orchestrator();
    orchestrator.update(ViewerPos::new(8.0, 8.0)).await;

    let far = orchestrator.update(ViewerPos::new(1.0e12, 0.0)).await;
    assert_eq!(far.requested, 0);
    assert_eq!(far.unloaded, 25);
    assert!(world.get_loaded_partitions().is_empty());

    let back = orchestrator.update(ViewerPos::new(8.0, 8.0)).await;
    assert_eq!(back.loaded, 25);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn circular_view_skips_corners() {
    let mut config = test_config();
    config.streaming.view_distance = 3;
    config.streaming.view_shape = ViewShape::Circle;
    let world = world_with(config, TestGenerator::new(Duration::ZERO), None);

    let report = world.orchestrator().update(ViewerPos::new(0.0, 0.0)).await;
    assert_eq!(report.loaded, 29);
    assert!(!world.get_loaded_partitions().contains(&ChunkPos::new(3, 3)));
    assert!(world.get_loaded_partitions().contains(&ChunkPos::new(0, 3)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_partition_cools_down() {
    let mut config = test_config();
    config.streaming.view_distance = 1;
    config.streaming.failure_cooldown_ms = 60_000;
    config.generation.stage_retry_limit = 0;
    let generator = TestGenerator::new(Duration::ZERO);
    let broken = ChunkPos::new(1, 0);
    generator.fail(broken, 100);
    let world = world_with(config, generator.clone(), None);
    let orchestrator = world.orchestrator();

    let first = orchestrator.update(ViewerPos::new(8.0, 8.0)).await;
    assert_eq!(first.requested, 9);
    assert_eq!(first.loaded, 8);
    assert_eq!(first.failed, 1);
    assert_eq!(orchestrator.cooling_down(), vec![broken]);

    let second = orchestrator.update(ViewerPos::new(8.0, 8.0)).await;
    assert_eq!(second.requested, 0);
    assert_eq!(second.skipped_cooldown, 1);
    assert_eq!(generator.calls_for(broken), 1);
    assert!(!world.get_loaded_partitions().contains(&broken));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_coalesces_rapid_updates() {
    let mut config = test_config();
    config.streaming.view_distance = 2;
    config.streaming.debounce_ms = 50;
    let world = world_with(config, TestGenerator::new(Duration::ZERO), None);
    let orchestrator = world.orchestrator();

    let (feed, viewer_feed) = mpsc::channel(32);
    let runner = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.run(viewer_feed, CancelToken::new()).await })
    };

    for step in 0..10 {
        feed.send(ViewerPos::new(step as f64 * 16.0, 0.0)).await.unwrap();
    }
    drop(feed);
    let applied = tokio::time::timeout(Duration::from_secs(5), runner).await.unwrap().unwrap();

    assert!((1..=2).contains(&applied));
    let loaded: FxHashSet<_> = world.get_loaded_partitions().into_iter().collect();
    assert_eq!(loaded, square(ChunkPos::new(9, 0), 2));
}

#[tokio::test]
async fn run_stops_on_shutdown() {
    let world = world_with(test_config(), TestGenerator::new(Duration::ZERO), None);
    let orchestrator = world.orchestrator();
    let (_feed, viewer_feed) = mpsc::channel(4);
    let shutdown = CancelToken::new();

    let runner = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { orchestrator.run(viewer_feed, shutdown).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.cancel();

    let applied = tokio::time::timeout(Duration::from_secs(1), runner).await.unwrap().unwrap();
    assert_eq!(applied, 0);
}
