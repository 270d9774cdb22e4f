use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

use super::{CancelToken, RawStageData, WorldGenerator};
use crate::config::{GenerationConfig, WorldConfig};
use crate::error::{ChunkError, ChunkResult};
use crate::persistence::{ChunkSerializer, PersistenceBackend};
use crate::world::{ChunkData, ChunkPos, GenerationStage};

type SharedGeneration = Shared<BoxFuture<'static, ChunkResult<Arc<ChunkData>>>>;

/// One active generation; at most one per coordinate
struct InFlightEntry {
    ticket: u64,
    future: SharedGeneration,
    cancel: CancelToken,
    discard: Arc<AtomicBool>,
}

/// A caller's share of an in-flight generation
#[derive(Clone)]
pub struct GenerationHandle {
    pos: ChunkPos,
    ticket: u64,
    future: SharedGeneration,
    discard: Arc<AtomicBool>,
    joined: bool,
}

impl GenerationHandle {
    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    /// Whether this caller attached to a generation someone else started
    pub fn joined_existing(&self) -> bool {
        self.joined
    }

    /// Wait for the shared result. Safe to call repeatedly.
    pub async fn wait(&self) -> ChunkResult<Arc<ChunkData>> {
        self.future.clone().await
    }

    /// Set when the chunk was unloaded mid-generation under the lazy policy;
    /// the result must not be cached.
    pub fn is_discarded(&self) -> bool {
        self.discard.load(Ordering::Acquire)
    }
}

/// Statistics for chunk generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationStats {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub joined: u64,
    pub stage_retries: u64,
}

#[derive(Default)]
struct StatCounters {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    joined: AtomicU64,
    stage_retries: AtomicU64,
}

/// Deduplicates generation requests and runs the stage pipeline on a bounded
/// number of workers.
pub struct GenerationCoordinator {
    generator: Arc<dyn WorldGenerator>,
    config: GenerationConfig,
    seed: u64,
    section_count: usize,
    workers: Arc<Semaphore>,
    in_flight: DashMap<ChunkPos, InFlightEntry>,
    next_ticket: AtomicU64,
    persistence: Option<(Arc<dyn PersistenceBackend>, Arc<ChunkSerializer>)>,
    stats: StatCounters,
}

impl GenerationCoordinator {
    pub fn new(generator: Arc<dyn WorldGenerator>, config: GenerationConfig, world: &WorldConfig) -> Self {
        let max_workers = config.max_workers.max(1);
        log::info!(
            "[GenerationCoordinator] Created with {} workers, {} stage retries, seed {}",
            max_workers, config.stage_retry_limit, world.seed
        );
        Self {
            generator,
            config,
            seed: world.seed,
            section_count: world.section_count,
            workers: Arc::new(Semaphore::new(max_workers)),
            in_flight: DashMap::new(),
            next_ticket: AtomicU64::new(1),
            persistence: None,
            stats: StatCounters::default(),
        }
    }

    /// Save completed chunks through `backend` when `persist_generated` is set
    pub fn with_persistence(mut self, backend: Arc<dyn PersistenceBackend>, serializer: Arc<ChunkSerializer>) -> Self {
        self.persistence = Some((backend, serializer));
        self
    }

    /// Generate a chunk, joining an in-flight generation for the same coordinate
    pub async fn generate(self: &Arc<Self>, pos: ChunkPos) -> ChunkResult<Arc<ChunkData>> {
        let generation = self.join(pos);
        let result = generation.wait().await;
        self.release(&generation);
        result
    }

    /// Get a handle on the generation for `pos`, starting one if none is active.
    ///
    /// Check-and-insert happens under the map's entry lock, so concurrent
    /// callers for one coordinate always share a single generation. A
    /// successful generation stays in the map until a caller
    /// [`release`](Self::release)s it, so requests arriving between
    /// completion and the caller's commit still join it.
    pub fn join(self: &Arc<Self>, pos: ChunkPos) -> GenerationHandle {
        match self.in_flight.entry(pos) {
            Entry::Occupied(entry) => {
                let entry = entry.get();
                // A new request revives a lazily unloaded generation
                entry.discard.store(false, Ordering::Release);
                self.stats.joined.fetch_add(1, Ordering::Relaxed);
                log::trace!("[GenerationCoordinator] Joining generation of {}", pos);
                GenerationHandle {
                    pos,
                    ticket: entry.ticket,
                    future: entry.future.clone(),
                    discard: Arc::clone(&entry.discard),
                    joined: true,
                }
            }
            Entry::Vacant(vacant) => {
                let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
                let cancel = CancelToken::new();
                let discard = Arc::new(AtomicBool::new(false));

                let task = tokio::spawn(Arc::clone(self).run(pos, ticket, cancel.clone()));
                let future = async move {
                    match task.await {
                        Ok(result) => result,
                        Err(join_error) => Err(ChunkError::Generation {
                            pos,
                            stage: GenerationStage::Empty,
                            attempts: 0,
                            message: format!("generation task failed: {}", join_error),
                        }),
                    }
                }
                .boxed()
                .shared();

                self.stats.started.fetch_add(1, Ordering::Relaxed);
                vacant.insert(InFlightEntry {
                    ticket,
                    future: future.clone(),
                    cancel,
                    discard: Arc::clone(&discard),
                });
                GenerationHandle { pos, ticket, future, discard, joined: false }
            }
        }
    }

    /// Abort the generation for `pos` now. Joined callers receive `Cancelled`,
    /// and a result that raced the abort is flagged as discarded.
    pub fn cancel(&self, pos: ChunkPos) -> bool {
        match self.in_flight.remove(&pos) {
            Some((_, entry)) => {
                entry.discard.store(true, Ordering::Release);
                entry.cancel.cancel();
                log::debug!("[GenerationCoordinator] Cancelled generation of {}", pos);
                true
            }
            None => false,
        }
    }

    /// Drop the map entry behind `generation` once its result has been
    /// consumed. A newer generation for the same coordinate is left alone.
    pub fn release(&self, generation: &GenerationHandle) -> bool {
        self.in_flight
            .remove_if(&generation.pos, |_, entry| entry.ticket == generation.ticket)
            .is_some()
    }

    /// Drop finished generations that no caller holds a handle on any more,
    /// e.g. after every waiter timed out
    pub fn release_settled(&self) -> usize {
        let before = self.in_flight.len();
        // The entry owns one reference to the discard flag, each handle another
        self.in_flight
            .retain(|_, entry| entry.future.peek().is_none() || Arc::strong_count(&entry.discard) > 1);
        before.saturating_sub(self.in_flight.len())
    }

    /// Let the generation for `pos` finish but flag its result as not to be cached
    pub fn discard_on_completion(&self, pos: ChunkPos) -> bool {
        match self.in_flight.get(&pos) {
            Some(entry) => {
                entry.discard.store(true, Ordering::Release);
                log::debug!("[GenerationCoordinator] Generation of {} will be discarded", pos);
                true
            }
            None => false,
        }
    }

    /// Running, or finished and not yet released
    pub fn is_in_flight(&self, pos: ChunkPos) -> bool {
        self.in_flight.contains_key(&pos)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> GenerationStats {
        GenerationStats {
            started: self.stats.started.load(Ordering::Relaxed),
            completed: self.stats.completed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            cancelled: self.stats.cancelled.load(Ordering::Relaxed),
            joined: self.stats.joined.load(Ordering::Relaxed),
            stage_retries: self.stats.stage_retries.load(Ordering::Relaxed),
        }
    }

    async fn run(self: Arc<Self>, pos: ChunkPos, ticket: u64, cancel: CancelToken) -> ChunkResult<Arc<ChunkData>> {
        let start = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ChunkError::Cancelled { pos }),
            result = self.drive(pos, &cancel) => result,
        };

        // Failures leave the map now so the next request starts over. An
        // eager cancel may already have replaced this entry.
        if result.is_err() {
            self.in_flight.remove_if(&pos, |_, entry| entry.ticket == ticket);
        }

        match &result {
            Ok(_) => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                log::debug!("[GenerationCoordinator] Generated {} in {:.2}ms", pos, start.elapsed().as_secs_f64() * 1000.0);
            }
            Err(ChunkError::Cancelled { .. }) => {
                self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("[GenerationCoordinator] {}", e);
            }
        }
        result.map(Arc::new)
    }

    /// Acquire a worker slot and run every stage. Dropping this future releases the slot.
    async fn drive(&self, pos: ChunkPos, cancel: &CancelToken) -> ChunkResult<ChunkData> {
        let _permit = self.workers.acquire().await.map_err(|_| ChunkError::Generation {
            pos,
            stage: GenerationStage::Empty,
            attempts: 0,
            message: "worker pool closed".to_string(),
        })?;

        let mut chunk = ChunkData::new(pos, self.section_count);
        while let Some(stage) = chunk.stage().next() {
            // Give queued generations a chance between stages
            tokio::task::yield_now().await;
            if cancel.is_cancelled() {
                return Err(ChunkError::Cancelled { pos });
            }
            let raw = self.run_stage(pos, stage).await?;
            chunk.apply_stage(stage, raw)?;
            log::trace!("[GenerationCoordinator] {} reached {}", pos, stage);
        }

        if self.config.persist_generated {
            self.persist(&chunk).await;
        }
        Ok(chunk)
    }

    /// Run one stage, retrying with exponential backoff
    async fn run_stage(&self, pos: ChunkPos, stage: GenerationStage) -> ChunkResult<RawStageData> {
        let mut backoff = self.config.stage_backoff();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.generator.generate_stage(pos, stage, self.seed).await {
                Ok(raw) => return Ok(raw),
                Err(e) if attempt <= self.config.stage_retry_limit => {
                    self.stats.stage_retries.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "[GenerationCoordinator] Stage {} of {} failed (attempt {}), retrying in {:?}: {}",
                        stage, pos, attempt, backoff, e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => {
                    return Err(ChunkError::Generation {
                        pos,
                        stage,
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// Store the compressed form of a freshly completed chunk. Failures only log.
    async fn persist(&self, chunk: &ChunkData) {
        let Some((backend, serializer)) = &self.persistence else {
            return;
        };
        let pos = chunk.position();
        let bytes = match serializer.serialize(chunk) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("[GenerationCoordinator] Failed to serialize {}: {}", pos, e);
                return;
            }
        };
        let backend = Arc::clone(backend);
        match tokio::task::spawn_blocking(move || backend.save(pos, &bytes)).await {
            Ok(Ok(())) => log::trace!("[GenerationCoordinator] Persisted {}", pos),
            Ok(Err(e)) => log::error!("[GenerationCoordinator] Failed to persist {}: {}", pos, e),
            Err(e) => log::error!("[GenerationCoordinator] Persist task for {} failed: {}", pos, e),
        }
    }
}
