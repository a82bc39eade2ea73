//! Single-flight processing worker.
//!
//! Frames are handed to a dedicated thread one at a time. While a run is in
//! flight, new frames are dropped at the door instead of queued.

use crate::handoff::HandoffSlot;
use crate::settings::SettingsStore;
use crate::shader::FrameProcessor;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Result of offering a frame to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The frame was handed to the worker.
    Accepted,
    /// A run was already in flight; the frame was discarded.
    Dropped,
    /// The slot was reserved but no frame could be produced.
    Skipped,
    /// The worker thread has exited.
    Closed,
}

/// Running counters for the ingestion boundary.
#[derive(Debug, Default)]
pub struct WorkerStats {
    submitted: AtomicU64,
    completed: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`WorkerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub dropped: u64,
    pub failed: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Owns the processing thread and the in-flight flag.
pub struct ProcessingWorker<F> {
    jobs: Option<Sender<F>>,
    busy: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    stats: Arc<WorkerStats>,
    handle: Option<JoinHandle<()>>,
}

/// Clears the in-flight flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Marks the worker closed when its thread exits, including by panic.
struct ExitGuard {
    busy: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.busy.store(false, Ordering::Release);
    }
}

impl<F: Send + 'static> ProcessingWorker<F> {
    /// Start the worker thread. Finished frames are published to `slot`.
    pub fn spawn<P>(mut processor: P, settings: Arc<SettingsStore>, slot: Arc<HandoffSlot<F>>) -> Result<Self>
    where
        P: FrameProcessor<Frame = F> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<F>();
        let busy = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(WorkerStats::default());

        let closed = Arc::new(AtomicBool::new(false));
        let exit = ExitGuard {
            busy: busy.clone(),
            closed: closed.clone(),
        };
        let thread_stats = stats.clone();
        let handle = thread::Builder::new()
            .name("frame-processor".to_string())
            .spawn(move || {
                let exit = exit;
                while let Ok(input) = rx.recv() {
                    let _run = RunGuard(&exit.busy);
                    // One snapshot per run; later writes apply to the next run.
                    let snapshot = settings.read();
                    // wgpu reports validation errors and device loss by panicking.
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| processor.process(&input, &snapshot)));
                    match outcome {
                        Ok(Ok(output)) => {
                            slot.publish(output);
                            thread_stats.completed.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(Err(e)) => {
                            warn!("Dropping frame: {}", e);
                            thread_stats.failed.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            error!("Processing run panicked, dropping frame");
                            thread_stats.failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    drop(input);
                }
                debug!("Processing worker stopped");
            })?;

        info!("Processing worker started");
        Ok(Self {
            jobs: Some(tx),
            busy,
            closed,
            stats,
            handle: Some(handle),
        })
    }

    /// True while a run is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// True once the worker thread has exited.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Offer a frame. Never blocks.
    pub fn submit(&self, frame: F) -> Submission {
        self.submit_with(|| Some(frame))
    }

    /// Reserve the worker, then build the input. `make` only runs when the
    /// worker is idle, so dropped frames cost nothing to prepare.
    pub fn submit_with(&self, make: impl FnOnce() -> Option<F>) -> Submission {
        if self.is_closed() {
            return Submission::Closed;
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return Submission::Dropped;
        }

        let Some(frame) = make() else {
            self.busy.store(false, Ordering::Release);
            return Submission::Skipped;
        };

        let sent = self.jobs.as_ref().map(|tx| tx.send(frame).is_ok()).unwrap_or(false);
        if !sent {
            self.busy.store(false, Ordering::Release);
            return Submission::Closed;
        }
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        Submission::Accepted
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl<F> Drop for ProcessingWorker<F> {
    fn drop(&mut self) {
        // Closing the channel ends the loop after the current run.
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Processing worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{ComputeEffect, EffectSelection};
    use crate::shader::ProcessError;
    use std::sync::mpsc::Receiver;
    use std::time::{Duration, Instant};

    /// Adds the selected compute effect's index to the input, blocking on a gate.
    struct GatedProcessor {
        calls: Arc<AtomicU64>,
        gate: Receiver<()>,
    }

    impl FrameProcessor for GatedProcessor {
        type Frame = u32;

        fn process(&mut self, input: &u32, settings: &EffectSelection) -> Result<u32, ProcessError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.gate.recv_timeout(Duration::from_secs(5));
            let offset = ComputeEffect::ALL.iter().position(|e| *e == settings.compute).unwrap() as u32;
            Ok(input + offset)
        }
    }

    struct FailingProcessor;

    impl FrameProcessor for FailingProcessor {
        type Frame = u32;

        fn process(&mut self, input: &u32, _settings: &EffectSelection) -> Result<u32, ProcessError> {
            Err(ProcessError::Allocation {
                what: "test",
                width: *input,
                height: 0,
            })
        }
    }

    /// Panics on its first run, then echoes its input.
    struct PanicOnce {
        panicked: bool,
    }

    impl FrameProcessor for PanicOnce {
        type Frame = u32;

        fn process(&mut self, input: &u32, _settings: &EffectSelection) -> Result<u32, ProcessError> {
            if !self.panicked {
                self.panicked = true;
                panic!("device lost");
            }
            Ok(*input)
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn gated() -> (GatedProcessor, Arc<AtomicU64>, mpsc::Sender<()>) {
        let calls = Arc::new(AtomicU64::new(0));
        let (open, gate) = mpsc::channel();
        let processor = GatedProcessor {
            calls: calls.clone(),
            gate,
        };
        (processor, calls, open)
    }

    #[test]
    fn test_back_to_back_frames_run_once() {
        let (processor, calls, open) = gated();
        let slot = Arc::new(HandoffSlot::new());
        let settings = Arc::new(SettingsStore::default());
        let worker = ProcessingWorker::spawn(processor, settings, slot.clone()).unwrap();

        assert_eq!(worker.submit(10), Submission::Accepted);
        assert_eq!(worker.submit(20), Submission::Dropped);
        wait_for(|| calls.load(Ordering::SeqCst) == 1);
        open.send(()).unwrap();
        wait_for(|| !slot.is_empty());

        assert_eq!(slot.take_latest(), Some(10));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = worker.stats();
        assert_eq!(stats.submitted, 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.completed, 1);
    }

    #[test]
    fn test_settings_snapshot_taken_per_run() {
        let (processor, calls, open) = gated();
        let slot = Arc::new(HandoffSlot::new());
        let settings = Arc::new(SettingsStore::default());
        let worker = ProcessingWorker::spawn(processor, settings.clone(), slot.clone()).unwrap();

        assert_eq!(worker.submit(100), Submission::Accepted);
        wait_for(|| calls.load(Ordering::SeqCst) == 1);
        // Mid-run change must not affect the run already in flight.
        settings.write(EffectSelection::default().with_compute(ComputeEffect::Blur));
        open.send(()).unwrap();
        wait_for(|| !worker.is_busy());
        assert_eq!(slot.take_latest(), Some(100));

        open.send(()).unwrap();
        assert_eq!(worker.submit(100), Submission::Accepted);
        wait_for(|| !slot.is_empty());
        assert_eq!(slot.take_latest(), Some(102));
    }

    #[test]
    fn test_make_not_called_while_busy() {
        let (processor, calls, open) = gated();
        let slot = Arc::new(HandoffSlot::new());
        let worker = ProcessingWorker::spawn(processor, Arc::new(SettingsStore::default()), slot).unwrap();

        assert_eq!(worker.submit(1), Submission::Accepted);
        wait_for(|| calls.load(Ordering::SeqCst) == 1);
        let mut prepared = false;
        let outcome = worker.submit_with(|| {
            prepared = true;
            Some(2)
        });
        assert_eq!(outcome, Submission::Dropped);
        assert!(!prepared);
        open.send(()).unwrap();
    }

    #[test]
    fn test_skipped_input_releases_reservation() {
        let (processor, _calls, _open) = gated();
        let worker =
            ProcessingWorker::spawn(processor, Arc::new(SettingsStore::default()), Arc::new(HandoffSlot::new())).unwrap();
        assert_eq!(worker.submit_with(|| None), Submission::Skipped);
        assert!(!worker.is_busy());
    }

    #[test]
    fn test_failed_run_publishes_nothing_and_recovers() {
        let slot = Arc::new(HandoffSlot::new());
        let worker = ProcessingWorker::spawn(FailingProcessor, Arc::new(SettingsStore::default()), slot.clone()).unwrap();

        assert_eq!(worker.submit(1), Submission::Accepted);
        wait_for(|| worker.stats().failed == 1);
        wait_for(|| !worker.is_busy());
        assert!(slot.is_empty());
        assert_eq!(worker.submit(2), Submission::Accepted);
        wait_for(|| worker.stats().failed == 2);
    }

    #[test]
    fn test_panicking_run_is_contained() {
        let slot = Arc::new(HandoffSlot::new());
        let worker =
            ProcessingWorker::spawn(PanicOnce { panicked: false }, Arc::new(SettingsStore::default()), slot.clone()).unwrap();

        assert_eq!(worker.submit(1), Submission::Accepted);
        wait_for(|| worker.stats().failed == 1);
        wait_for(|| !worker.is_busy());
        assert!(!worker.is_closed());
        assert!(slot.is_empty());

        assert_eq!(worker.submit(2), Submission::Accepted);
        wait_for(|| !slot.is_empty());
        assert_eq!(slot.take_latest(), Some(2));
        wait_for(|| !worker.is_busy());
        let stats = worker.stats();
        assert_eq!(stats.dropped, 0);
        assert_eq!(stats.completed, 1);
    }
}
