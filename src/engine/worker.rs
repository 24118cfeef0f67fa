//! Worker daemon: poll for pending events, process them, sleep, repeat.
//!
//! Exactly one worker per deployment is the supported configuration. Claims
//! are atomic per event, but on start the worker fails every event still in
//! `processing`, which would also hit events a second live worker holds.

use crate::engine::processor::Processor;
use crate::error::{Error, Result};
use crate::queue::EventQueue;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Error recorded on events a previous run claimed but never finished.
pub const INTERRUPTED: &str = "interrupted: worker stopped before the event finished";
use uuid::Uuid;

/// Configuration for the worker loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between poll cycles.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Stopping,
}

impl WorkerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => WorkerState::Running,
            2 => WorkerState::Stopping,
            _ => WorkerState::Idle,
        }
    }
}

/// The polling loop. Cheap to clone; clones share state and stop signal.
#[derive(Clone)]
pub struct Worker {
    id: Uuid,
    queue: EventQueue,
    processor: Processor,
    config: WorkerConfig,
    state: Arc<AtomicU8>,
    stop: Arc<watch::Sender<bool>>,
}

impl Worker {
    pub fn new(queue: EventQueue, processor: Processor, config: WorkerConfig) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            queue,
            processor,
            config,
            state: Arc::new(AtomicU8::new(WorkerState::Idle as u8)),
            stop: Arc::new(stop),
        }
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Ask the loop to stop. Observed before each cycle, between events, and
    /// during the inter-cycle sleep. An event already being processed is
    /// finished first.
    pub fn stop(&self) {
        let _ = self.state.compare_exchange(
            WorkerState::Running as u8,
            WorkerState::Stopping as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.stop.send_replace(true);
        info!(worker_id = %self.id, "worker stopping");
    }

    /// Run the loop until [`stop`](Self::stop) is called.
    ///
    /// The first successful storage access fails events left in `processing`
    /// by an earlier run (see [`INTERRUPTED`]). Cycle failures are logged and
    /// retried after the poll interval; they never end the loop.
    pub async fn run(&self) -> Result<()> {
        self.state
            .compare_exchange(
                WorkerState::Idle as u8,
                WorkerState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|_| Error::Other("worker is already running".to_string()))?;

        let mut stop = self.stop.subscribe();
        let span = info_span!("worker", worker.id = %self.id);

        async {
            info!(
                poll_interval_secs = self.config.poll_interval.as_secs_f64(),
                "worker started"
            );

            let mut recovered = false;
            loop {
                if stop_requested(&stop) {
                    break;
                }

                let result = match self.recover(&mut recovered).await {
                    Ok(()) => self.cycle(&stop).await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(processed) => {
                        metrics::poll_cycles().add(1, &[KeyValue::new("result", "ok")]);
                        if processed > 0 {
                            debug!(processed, "poll cycle finished");
                        }
                    }
                    Err(e) => {
                        metrics::poll_cycles().add(1, &[KeyValue::new("result", "error")]);
                        error!(error = %e, "poll cycle failed, retrying after poll interval");
                    }
                }

                tokio::select! {
                    changed = stop.changed() => {
                        if changed.is_err() || stop_requested(&stop) {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }

            info!("worker stopped");
        }
        .instrument(span)
        .await;

        self.reset();
        Ok(())
    }

    /// Back to idle with the stop flag cleared so the worker can be rerun.
    fn reset(&self) {
        self.stop.send_replace(false);
        self.state.store(WorkerState::Idle as u8, Ordering::SeqCst);
    }

    async fn recover(&self, recovered: &mut bool) -> Result<()> {
        if *recovered {
            return Ok(());
        }
        let failed = self.queue.fail_interrupted(INTERRUPTED).await?;
        if failed > 0 {
            warn!(failed, "failed events interrupted by a previous run");
        }
        *recovered = true;
        Ok(())
    }

    /// Run the loop on a tokio task.
    pub fn spawn(&self) -> WorkerHandle {
        let worker = self.clone();
        let task = tokio::spawn(async move { worker.run().await });
        WorkerHandle {
            worker: self.clone(),
            task,
        }
    }

    /// Run a single poll cycle outside the loop. Returns how many events
    /// were handed to the processor.
    pub async fn poll_once(&self) -> Result<usize> {
        let stop = self.stop.subscribe();
        self.cycle(&stop).await
    }

    async fn cycle(&self, stop: &watch::Receiver<bool>) -> Result<usize> {
        let pending = self.queue.fetch_pending().await?;
        if pending.is_empty() {
            debug!("no pending events");
            return Ok(0);
        }
        info!(count = pending.len(), "found pending events");

        let mut processed = 0;
        for event in &pending {
            if stop_requested(stop) {
                info!(
                    remaining = pending.len() - processed,
                    "stop requested, leaving remaining events pending"
                );
                break;
            }
            self.processor.process(event).await?;
            processed += 1;
        }
        Ok(processed)
    }
}

fn stop_requested(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow()
}

/// A worker running on a background task.
pub struct WorkerHandle {
    worker: Worker,
    task: JoinHandle<Result<()>>,
}

impl WorkerHandle {
    pub fn state(&self) -> WorkerState {
        self.worker.state()
    }

    /// Signal stop and wait up to `grace` for the loop to exit, aborting the
    /// task if it does not. Returns `true` if the loop exited on its own.
    ///
    /// Aborting also aborts the event handler in flight. Its event stays
    /// `processing` until the worker runs again.
    pub async fn shutdown(mut self, grace: Duration) -> bool {
        self.worker.stop();
        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(Ok(Ok(()))) => true,
            Ok(Ok(Err(e))) => {
                error!(error = %e, "worker exited with error");
                false
            }
            Ok(Err(join_err)) => {
                error!(error = %join_err, "worker task panicked");
                false
            }
            Err(_) => {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "worker did not stop within grace period, aborting"
                );
                self.task.abort();
                let _ = (&mut self.task).await;
                self.worker.reset();
                false
            }
        }
    }
}
