//! Per-stage handoff queue and worker loop.
//!
//! Each stage owns one [`StageQueue`] and one [`StageWorker`]. Submitting a
//! cell appends it (once; duplicates are folded) and signals the worker
//! through a channel of capacity one. When the worker has already been
//! signalled the extra wake-up is discarded: the worker drains the queue to
//! empty on every pass and also polls on a timer, so a lost signal only
//! delays work by one poll interval.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashSet;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::health::{PipelineHealth, Stage};
use crate::cell::CellId;

/// What a stage handler did with one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Handled (including "nothing to do").
    Done,
    /// The cell's lock was held elsewhere; retry on the next pass.
    Deferred,
}

/// FIFO of cells waiting for one stage.
#[derive(Debug)]
pub struct StageQueue {
    stage: Stage,
    pending: Mutex<VecDeque<CellId>>,
    queued: DashSet<CellId>,
    wake_tx: mpsc::Sender<()>,
    wake_rx: Mutex<Option<mpsc::Receiver<()>>>,
    health: Arc<PipelineHealth>,
}

impl StageQueue {
    pub fn new(stage: Stage, health: Arc<PipelineHealth>) -> Self {
        let (wake_tx, wake_rx) = mpsc::channel(1);
        Self {
            stage,
            pending: Mutex::new(VecDeque::new()),
            queued: DashSet::new(),
            wake_tx,
            wake_rx: Mutex::new(Some(wake_rx)),
            health,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Submits `cell` and wakes the worker.
    ///
    /// Returns false if the cell was already waiting.
    pub fn push(&self, cell: CellId) -> bool {
        let added = self.enqueue(cell);
        match self.wake_tx.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => self.health.record_dropped_wake(self.stage),
            Err(TrySendError::Closed(())) => {
                trace!(stage = %self.stage, %cell, "Stage worker gone, cell left queued");
            }
        }
        added
    }

    fn enqueue(&self, cell: CellId) -> bool {
        let mut pending = self.pending.lock();
        if !self.queued.insert(cell) {
            return false;
        }
        pending.push_back(cell);
        self.health.observe_depth(self.stage, pending.len());
        true
    }

    /// Takes the next cell. It may be submitted again immediately.
    pub fn pop(&self) -> Option<CellId> {
        let mut pending = self.pending.lock();
        let cell = pending.pop_front()?;
        self.queued.remove(&cell);
        Some(cell)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, cell: &CellId) -> bool {
        self.queued.contains(cell)
    }

    /// Hands out the wake receiver. Only the first caller gets it.
    pub fn take_waker(&self) -> Option<mpsc::Receiver<()>> {
        self.wake_rx.lock().take()
    }
}

/// Single worker draining one [`StageQueue`].
pub struct StageWorker<F> {
    queue: Arc<StageQueue>,
    wake: Option<mpsc::Receiver<()>>,
    poll_interval: Duration,
    health: Arc<PipelineHealth>,
    handler: F,
}

impl<F> StageWorker<F>
where
    F: FnMut(CellId) -> StepOutcome + Send,
{
    pub fn new(
        queue: Arc<StageQueue>,
        poll_interval: Duration,
        health: Arc<PipelineHealth>,
        handler: F,
    ) -> Self {
        let wake = queue.take_waker();
        Self {
            queue,
            wake,
            poll_interval,
            health,
            handler,
        }
    }

    /// Processes cells until the queue is empty.
    ///
    /// Deferred cells go back on the queue after the pass so a contended
    /// cell cannot spin the worker. Returns the number of cells handled.
    pub fn drain(&mut self) -> usize {
        let stage = self.queue.stage();
        let mut handled = 0;
        let mut deferred = Vec::new();

        while let Some(cell) = self.queue.pop() {
            let started = Instant::now();
            match (self.handler)(cell) {
                StepOutcome::Done => {
                    self.health.record_processed(stage, started.elapsed());
                    handled += 1;
                }
                StepOutcome::Deferred => {
                    trace!(%stage, %cell, "Cell busy, deferring");
                    self.health.record_contended(stage);
                    deferred.push(cell);
                }
            }
        }

        for cell in deferred {
            self.queue.enqueue(cell);
        }
        handled
    }

    /// Runs until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let stage = self.queue.stage();
        debug!(%stage, poll_ms = self.poll_interval.as_millis() as u64, "Stage worker starting");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                _ = wait_for_wake(&mut self.wake) => {}

                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            self.drain();
        }

        debug!(%stage, left = self.queue.len(), "Stage worker stopped");
    }
}

/// Resolves on the next wake signal; never resolves without a receiver.
async fn wait_for_wake(wake: &mut Option<mpsc::Receiver<()>>) {
    match wake {
        Some(rx) => {
            if rx.recv().await.is_none() {
                *wake = None;
            }
        }
        None => std::future::pending().await,
    }
}
