//! Single-worker cycle scheduler.
//!
//! The engine is moved into one dedicated thread that takes cycle requests
//! from a bounded queue, one at a time. Callers enqueue a request with its
//! own reply channel and wait on it with a deadline. The deadline covers the
//! enqueue as well: a caller never blocks on a full queue past its wait. A
//! caller giving up does not cancel its cycle: the worker finishes it and the
//! result is dropped.

use crate::engine::{CdcEngine, CycleReport, EngineStats};
use crate::error::{CdcError, CdcResult};
use crate::slot::{ReplicationSlot, SourceDatabase};
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Pause between enqueue attempts while the queue is full.
const ENQUEUE_POLL: Duration = Duration::from_millis(2);

enum Command {
    RunCycle(SyncSender<CdcResult<CycleReport>>),
    Shutdown,
}

struct WorkerHandle {
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    fn stop(&mut self) {
        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A cycle request waiting for its result.
#[must_use = "a pending cycle does nothing unless waited on"]
#[derive(Debug)]
pub struct PendingCycle {
    reply: Receiver<CdcResult<CycleReport>>,
}

impl PendingCycle {
    /// Waits for the cycle to finish.
    ///
    /// Returns [`CdcError::CycleTimeout`] if `timeout` elapses first; the
    /// cycle keeps running on the worker.
    pub fn wait(self, timeout: Duration) -> CdcResult<CycleReport> {
        match self.reply.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(CdcError::CycleTimeout { timeout }),
            Err(RecvTimeoutError::Disconnected) => Err(CdcError::WorkerClosed),
        }
    }
}

/// Runs the cycles of one engine on a single worker thread.
///
/// At most one cycle runs at any time. Requests are served in arrival order.
pub struct CycleScheduler {
    commands: SyncSender<Command>,
    worker: WorkerHandle,
    stats: Arc<RwLock<EngineStats>>,
    cycle_timeout: Duration,
    queue_capacity: usize,
}

impl CycleScheduler {
    /// Moves the engine onto a new worker thread.
    ///
    /// Queue capacity, worker name and default wait come from the engine's
    /// configuration.
    pub fn start<S, D>(engine: CdcEngine<S, D>) -> CdcResult<Self>
    where
        S: ReplicationSlot + 'static,
        D: SourceDatabase + 'static,
    {
        let config = engine.config();
        let cycle_timeout = config.cycle_timeout;
        let worker_name = config.worker_name.clone();
        let queue_capacity = config.queue_capacity.max(1);
        let (commands, queue) = mpsc::sync_channel(queue_capacity);
        let stats = engine.stats_handle();

        let join = thread::Builder::new()
            .name(worker_name.clone())
            .spawn(move || worker_loop(engine, queue))
            .map_err(CdcError::WorkerSpawn)?;

        info!(worker = %worker_name, "CDC worker started");

        Ok(Self {
            commands,
            worker: WorkerHandle { join: Some(join) },
            stats,
            cycle_timeout,
            queue_capacity,
        })
    }

    /// Enqueues a cycle without waiting for it.
    ///
    /// Fails with [`CdcError::QueueFull`] when the queue has no room.
    pub fn trigger(&self) -> CdcResult<PendingCycle> {
        let (reply, rx) = mpsc::sync_channel(1);
        match self.commands.try_send(Command::RunCycle(reply)) {
            Ok(()) => Ok(PendingCycle { reply: rx }),
            Err(TrySendError::Full(_)) => Err(CdcError::QueueFull {
                capacity: self.queue_capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(CdcError::WorkerClosed),
        }
    }

    /// Runs a cycle and waits up to `timeout` for it.
    ///
    /// Time spent waiting for room in the queue counts against `timeout`.
    pub fn run_cycle(&self, timeout: Duration) -> CdcResult<CycleReport> {
        let deadline = Instant::now() + timeout;
        let pending = loop {
            match self.trigger() {
                Err(CdcError::QueueFull { .. }) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(CdcError::CycleTimeout { timeout });
                    }
                    thread::sleep(ENQUEUE_POLL.min(remaining));
                }
                other => break other?,
            }
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        match pending.wait(remaining) {
            Err(CdcError::CycleTimeout { .. }) => Err(CdcError::CycleTimeout { timeout }),
            other => other,
        }
    }

    /// Returns the configured wait for a triggering caller.
    pub fn cycle_timeout(&self) -> Duration {
        self.cycle_timeout
    }

    /// Gets the engine stats.
    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }

    /// Stops the worker once the queued cycles are done.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.worker.join.is_some() {
            let _ = self.commands.send(Command::Shutdown);
            self.worker.stop();
            info!("CDC worker stopped");
        }
    }
}

impl Drop for CycleScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop<S, D>(engine: CdcEngine<S, D>, queue: Receiver<Command>)
where
    S: ReplicationSlot,
    D: SourceDatabase,
{
    for command in queue {
        match command {
            Command::RunCycle(reply) => {
                let result = engine.run_cycle_with_retry();
                if let Err(e) = &result {
                    error!(
                        error = %e,
                        protocol = e.is_protocol(),
                        consistency = e.is_consistency(),
                        "CDC cycle failed"
                    );
                }
                if reply.send(result).is_err() {
                    debug!("cycle caller stopped waiting");
                }
            }
            Command::Shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SchemaCatalog;
    use crate::config::EngineConfig;
    use crate::registry::EntityRegistry;
    use crate::slot::{RecordStream, Row, SlotInfo};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use walindex_protocol::Lsn;

    /// An empty slot whose peek takes a while and tracks overlapping calls.
    struct SlowSlot {
        delay: Duration,
        active: AtomicUsize,
        max_active: AtomicUsize,
        peeks: AtomicUsize,
    }

    impl SlowSlot {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                peeks: AtomicUsize::new(0),
            }
        }
    }

    impl ReplicationSlot for SlowSlot {
        fn describe(&self, slot: &str) -> CdcResult<Option<SlotInfo>> {
            Ok(Some(SlotInfo::logical(slot, "test_decoding")))
        }

        fn peek<'a>(&'a self, _slot: &str, _fetch_size: u32) -> CdcResult<RecordStream<'a>> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            thread::sleep(self.delay);
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.peeks.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(std::iter::empty()))
        }

        fn consume_up_to(&self, _slot: &str, _upto: &Lsn) -> CdcResult<u64> {
            Ok(0)
        }
    }

    struct NoDatabase;

    impl SourceDatabase for NoDatabase {
        fn reconstruct(&self, _query: &str) -> CdcResult<Row> {
            Ok(Row::new())
        }
    }

    fn start(slot: Arc<SlowSlot>) -> CycleScheduler {
        start_with(slot, EngineConfig::new("elk_slot").with_worker_name("cdc-test"))
    }

    fn start_with(slot: Arc<SlowSlot>, config: EngineConfig) -> CycleScheduler {
        let registry = EntityRegistry::build(&SchemaCatalog::default(), Vec::new());
        let engine = CdcEngine::new(
            config,
            slot,
            Arc::new(NoDatabase),
            Arc::new(registry),
        )
        .unwrap();
        CycleScheduler::start(engine).unwrap()
    }

    #[test]
    fn run_cycle_returns_report() {
        let scheduler = start(Arc::new(SlowSlot::new(Duration::ZERO)));
        let report = scheduler.run_cycle(Duration::from_secs(5)).unwrap();
        assert_eq!(report.transactions, 0);
        assert_eq!(scheduler.stats().cycles_completed, 1);
        assert_eq!(scheduler.cycle_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn timeout_does_not_cancel_cycle() {
        let slot = Arc::new(SlowSlot::new(Duration::from_millis(200)));
        let scheduler = start(slot.clone());

        let err = scheduler.run_cycle(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, CdcError::CycleTimeout { .. }));
        assert!(!err.is_retryable());

        // Served after the timed-out cycle.
        scheduler.run_cycle(Duration::from_secs(5)).unwrap();
        assert_eq!(slot.peeks.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.stats().cycles_completed, 2);
    }

    #[test]
    fn cycles_never_overlap() {
        let slot = Arc::new(SlowSlot::new(Duration::from_millis(5)));
        let scheduler = Arc::new(start(slot.clone()));

        let callers: Vec<_> = (0..4)
            .map(|_| {
                let scheduler = Arc::clone(&scheduler);
                thread::spawn(move || {
                    for _ in 0..3 {
                        scheduler.run_cycle(Duration::from_secs(10)).unwrap();
                    }
                })
            })
            .collect();
        for caller in callers {
            caller.join().unwrap();
        }

        assert_eq!(slot.peeks.load(Ordering::SeqCst), 12);
        assert_eq!(slot.max_active.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn shutdown_drains_queue() {
        let slot = Arc::new(SlowSlot::new(Duration::from_millis(5)));
        let scheduler = start(slot.clone());

        let pending: Vec<PendingCycle> = (0..3).map(|_| scheduler.trigger().unwrap()).collect();
        scheduler.shutdown();

        for cycle in pending {
            assert!(cycle.wait(Duration::from_millis(10)).is_ok());
        }
        assert_eq!(slot.peeks.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn full_queue_does_not_block_callers() {
        let slot = Arc::new(SlowSlot::new(Duration::from_millis(300)));
        let scheduler = start_with(
            slot.clone(),
            EngineConfig::new("elk_slot")
                .with_worker_name("cdc-test")
                .with_queue_capacity(1),
        );

        // The worker picks up the first request, the second fills the queue.
        let running = scheduler.trigger().unwrap();
        thread::sleep(Duration::from_millis(50));
        let queued = scheduler.trigger().unwrap();

        let err = scheduler.trigger().unwrap_err();
        assert!(matches!(err, CdcError::QueueFull { capacity: 1 }));

        let started = Instant::now();
        let err = scheduler.run_cycle(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, CdcError::CycleTimeout { timeout } if timeout == Duration::from_millis(50)));
        assert!(started.elapsed() < Duration::from_millis(200));

        assert!(running.wait(Duration::from_secs(5)).is_ok());
        assert!(queued.wait(Duration::from_secs(5)).is_ok());
        assert_eq!(slot.peeks.load(Ordering::SeqCst), 2);
    }
}
