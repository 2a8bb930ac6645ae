//! Media worker pool
//!
//! Workers are isolated media processes hosting independent routing
//! domains. The pool only places new routers; it carries no business
//! logic. A dead worker is never routed to again, and because in-flight
//! ICE/DTLS state cannot be reconstructed on another worker, a worker
//! death is fatal to the whole process rather than degraded around.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

use crate::config::{SfuConfig, WorkerSelection};
use crate::error::{Result, SfuError};
use crate::types::RouterId;

/// One isolated media worker. Pure resource container.
pub struct Worker {
    id: usize,
    alive: AtomicBool,
    routers: AtomicUsize,
}

impl Worker {
    fn new(id: usize) -> Self {
        Self {
            id,
            alive: AtomicBool::new(true),
            routers: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Number of routers currently hosted on this worker
    #[must_use]
    pub fn router_count(&self) -> usize {
        self.routers.load(Ordering::Acquire)
    }

    /// Mark this worker as dead. Invoked by the process-level
    /// supervision when the underlying worker process exits.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Allocate a new routing domain on this worker.
    pub fn create_router(self: &Arc<Self>) -> Result<Router> {
        if !self.is_alive() {
            return Err(SfuError::WorkerFatal(self.id));
        }
        self.routers.fetch_add(1, Ordering::AcqRel);
        let router = Router {
            id: RouterId::generate(),
            worker: Arc::clone(self),
        };
        debug!(
            worker_id = self.id,
            router_id = %router.id,
            routers = self.router_count(),
            "Created router"
        );
        Ok(router)
    }
}

/// A per-room routing domain inside a worker. Producers and consumers
/// are matched only within one router.
pub struct Router {
    id: RouterId,
    worker: Arc<Worker>,
}

impl Router {
    #[must_use]
    pub fn id(&self) -> &RouterId {
        &self.id
    }

    #[must_use]
    pub fn worker_id(&self) -> usize {
        self.worker.id
    }

    /// Release the routing domain. Explicit rather than drop-driven so
    /// the cleanup order stays deterministic.
    pub fn close(&self) {
        self.worker.routers.fetch_sub(1, Ordering::AcqRel);
        debug!(
            worker_id = self.worker.id,
            router_id = %self.id,
            "Closed router"
        );
    }
}

/// Fixed set of media workers with a load-balancing placement policy.
pub struct WorkerPool {
    workers: Vec<Arc<Worker>>,
    selection: WorkerSelection,
    next: AtomicUsize,
    fatal_tx: watch::Sender<Option<usize>>,
}

impl WorkerPool {
    /// Spawn the worker set and start health supervision.
    pub fn new(config: &SfuConfig) -> Arc<Self> {
        let workers = (0..config.workers.max(1)).map(|id| Arc::new(Worker::new(id))).collect();
        let (fatal_tx, _) = watch::channel(None);

        let pool = Arc::new(Self {
            workers,
            selection: config.worker_selection,
            next: AtomicUsize::new(0),
            fatal_tx,
        });

        info!(
            workers = pool.workers.len(),
            selection = ?pool.selection,
            "Worker pool initialized"
        );

        let pool_clone = Arc::clone(&pool);
        let check_interval = Duration::from_secs(config.health_check_interval_secs.max(1));
        tokio::spawn(async move {
            pool_clone.health_watch_task(check_interval).await;
        });

        pool
    }

    #[must_use]
    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    /// Pick a live worker for a new room's router. Dead workers are
    /// skipped; if none remain the pool reports the first dead worker.
    pub fn pick(&self) -> Result<Arc<Worker>> {
        let n = self.workers.len();
        let start = match self.selection {
            WorkerSelection::RoundRobin => self.next.fetch_add(1, Ordering::AcqRel),
            WorkerSelection::Random => rand::Rng::gen_range(&mut rand::thread_rng(), 0..n),
        };
        for offset in 0..n {
            let worker = &self.workers[(start + offset) % n];
            if worker.is_alive() {
                return Ok(Arc::clone(worker));
            }
        }
        Err(SfuError::WorkerFatal(self.workers[start % n].id()))
    }

    /// Receive the id of the first worker observed dead. The binary
    /// listens on this channel and performs an orderly shutdown.
    #[must_use]
    pub fn subscribe_fatal(&self) -> watch::Receiver<Option<usize>> {
        self.fatal_tx.subscribe()
    }

    /// Supervisory loop. Worker death is not recoverable in place, so
    /// the first death is published once and the loop ends.
    async fn health_watch_task(self: Arc<Self>, check_interval: Duration) {
        let mut ticker = interval(check_interval);
        loop {
            ticker.tick().await;
            if let Some(dead) = self.workers.iter().find(|w| !w.is_alive()) {
                error!(
                    worker_id = dead.id(),
                    routers = dead.router_count(),
                    "Media worker died, escalating to process shutdown"
                );
                let _ = self.fatal_tx.send(Some(dead.id()));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_config(workers: usize) -> SfuConfig {
        SfuConfig {
            workers,
            ..SfuConfig::default()
        }
    }

    #[tokio::test]
    async fn test_round_robin_placement() {
        let pool = WorkerPool::new(&pool_config(3));
        let picks: Vec<usize> = (0..6).map(|_| pool.pick().unwrap().id()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[tokio::test]
    async fn test_dead_worker_is_skipped() {
        let pool = WorkerPool::new(&pool_config(2));
        pool.workers()[0].kill();
        for _ in 0..4 {
            assert_eq!(pool.pick().unwrap().id(), 1);
        }
    }

    #[tokio::test]
    async fn test_all_dead_is_fatal() {
        let pool = WorkerPool::new(&pool_config(2));
        pool.workers()[0].kill();
        pool.workers()[1].kill();
        assert!(matches!(pool.pick(), Err(SfuError::WorkerFatal(_))));
    }

    #[tokio::test]
    async fn test_router_slot_accounting() {
        let pool = WorkerPool::new(&pool_config(1));
        let worker = pool.pick().unwrap();
        let router = worker.create_router().unwrap();
        assert_eq!(worker.router_count(), 1);
        router.close();
        assert_eq!(worker.router_count(), 0);
    }

    #[tokio::test]
    async fn test_dead_worker_rejects_router() {
        let pool = WorkerPool::new(&pool_config(1));
        let worker = pool.pick().unwrap();
        worker.kill();
        assert!(matches!(
            worker.create_router(),
            Err(SfuError::WorkerFatal(0))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_watch_publishes_death() {
        let pool = WorkerPool::new(&pool_config(2));
        let mut fatal = pool.subscribe_fatal();
        pool.workers()[1].kill();

        tokio::time::advance(Duration::from_secs(6)).await;
        fatal.changed().await.unwrap();
        assert_eq!(*fatal.borrow(), Some(1));
    }
}
