//! Background batch-feeding pipeline
//!
//! Worker threads prefetch image batches from disk into a bounded queue
//! consumed by the training loop. Shutdown is a single call that signals
//! every worker and joins them; the trainer runs it on every exit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result;
use tch::Tensor;

use super::folder::ImageFolder;

/// Handle over the background feeding workers and their bounded queue.
pub struct BatchFeeder {
    receiver: Receiver<Tensor>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl BatchFeeder {
    /// Spawn `num_workers` loader threads feeding batches of `batch_size`
    /// into a queue holding at most `queue_depth` batches.
    pub fn spawn(
        folder: Arc<ImageFolder>,
        batch_size: i64,
        num_workers: usize,
        queue_depth: usize,
    ) -> Self {
        let (sender, receiver) = std::sync::mpsc::sync_channel(queue_depth.max(1));
        let stop = Arc::new(AtomicBool::new(false));

        let workers = (0..num_workers.max(1))
            .map(|worker_id| {
                let folder = Arc::clone(&folder);
                let sender: SyncSender<Tensor> = sender.clone();
                let stop = Arc::clone(&stop);
                std::thread::spawn(move || {
                    feed_loop(worker_id, &folder, batch_size, &sender, &stop);
                })
            })
            .collect();

        Self {
            receiver,
            stop,
            workers,
        }
    }

    /// Pull the next prefetched batch, blocking until one is available.
    pub fn next_batch(&self) -> Result<Tensor> {
        self.receiver
            .recv()
            .map_err(|_| anyhow::anyhow!("batch feeder stopped"))
    }

    /// Signal all workers to stop and join them. Idempotent; guaranteed to
    /// run via `Drop` even when the training loop exits on an error path.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Unblock workers parked on a full queue.
        while self.receiver.try_recv().is_ok() {}
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("a data-feeder worker panicked during shutdown");
            }
        }
    }
}

impl Drop for BatchFeeder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn feed_loop(
    worker_id: usize,
    folder: &ImageFolder,
    batch_size: i64,
    sender: &SyncSender<Tensor>,
    stop: &AtomicBool,
) {
    let mut rng = rand::thread_rng();

    while !stop.load(Ordering::SeqCst) {
        let batch = match folder.sample_batch(&mut rng, batch_size) {
            Ok(batch) => batch,
            Err(err) => {
                tracing::warn!("feeder worker {worker_id} failed to load a batch: {err:#}");
                std::thread::sleep(Duration::from_millis(100));
                continue;
            }
        };

        // Bounded non-blocking send so the stop flag stays responsive.
        let mut pending = batch;
        loop {
            if stop.load(Ordering::SeqCst) {
                return;
            }
            match sender.try_send(pending) {
                Ok(()) => break,
                Err(TrySendError::Full(batch)) => {
                    pending = batch;
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}
