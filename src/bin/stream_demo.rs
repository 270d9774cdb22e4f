use earth_stream::{
    CancelToken, ChunkWorld, FileBackend, FlatGenerator, MemoryBackend, PersistenceBackend, StreamingConfig,
    ViewerPos,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Walks a simulated viewer across the world and streams chunks around it.
///
/// Usage: `stream_demo [config.toml] [save-dir]`
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => StreamingConfig::load(&path)?,
        None => StreamingConfig::default(),
    };
    let backend: Arc<dyn PersistenceBackend> = match args.next() {
        Some(dir) => Arc::new(FileBackend::open(dir)?),
        None => Arc::new(MemoryBackend::new()),
    };

    println!("Earth Stream - Chunk Streaming Demo");
    println!("===================================");
    println!("- View distance: {} chunks ({:?})", config.streaming.view_distance, config.streaming.view_shape);
    println!("- Store capacity: {}", config.store.capacity);
    println!("- Generation workers: {}", config.generation.max_workers);

    let generator = Arc::new(FlatGenerator::default().with_stage_delay(Duration::from_millis(2)));
    let world = ChunkWorld::new(config, generator, Some(backend))?;
    let orchestrator = world.orchestrator();

    let (feed, viewer_feed) = mpsc::channel(64);
    let shutdown = CancelToken::new();
    let streaming = {
        let orchestrator = Arc::clone(&orchestrator);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { orchestrator.run(viewer_feed, shutdown).await })
    };

    let start = Instant::now();
    // Walk east, then north-east, sending positions faster than the debounce window
    for step in 0..120 {
        let (x, z) = if step < 60 {
            (step as f64 * 4.0, 0.0)
        } else {
            (240.0 + (step - 60) as f64 * 3.0, (step - 60) as f64 * 3.0)
        };
        feed.send(ViewerPos::new(x, z)).await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    drop(feed);
    let updates = streaming.await?;
    shutdown.cancel();

    let store_stats = world.store().stats();
    let generation_stats = world.coordinator().stats();
    println!("\nResults after {:.2}s", start.elapsed().as_secs_f64());
    println!("- Streaming updates applied: {}", updates);
    println!("- Loaded partitions: {}", world.get_loaded_partitions().len());
    println!(
        "- Store: {} hits, {} misses, {} evictions, {} persisted loads",
        store_stats.hits, store_stats.misses, store_stats.evictions, store_stats.persisted_loads
    );
    println!(
        "- Generation: {} started, {} completed, {} cancelled, {} joined",
        generation_stats.started, generation_stats.completed, generation_stats.cancelled, generation_stats.joined
    );

    let nearby = world.query_radius(earth_stream::ChunkPos::new(20, 4), 2);
    println!("- Loaded within 2 chunks of (20, 4): {}", nearby.len());
    Ok(())
}
