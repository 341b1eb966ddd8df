//! Asynchronous staleness propagation.
//!
//! Mutations enqueue a [`PropagationJob`] and return immediately; a pool of
//! worker tasks drains the queue, runs the propagation walk against the
//! course graph, and publishes every resulting state change.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify};

use coursegraph_core::graph::CourseGraph;
use coursegraph_core::propagate::{propagate, PropagationJob};

use crate::notify::Notifier;

/// Handle to a course's propagation workers.
///
/// Workers stop once every handle is dropped and the queue is drained.
#[derive(Debug)]
pub struct PropagationQueue {
    sender: mpsc::UnboundedSender<PropagationJob>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl PropagationQueue {
    /// Spawns `workers` tasks consuming one shared queue.
    pub fn start(graph: Arc<CourseGraph>, notifier: Notifier, workers: usize) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let pending = Arc::new(AtomicUsize::new(0));
        let idle = Arc::new(Notify::new());

        for worker in 0..workers.max(1) {
            tokio::spawn(run_worker(
                worker,
                Arc::clone(&graph),
                notifier.clone(),
                Arc::clone(&receiver),
                Arc::clone(&pending),
                Arc::clone(&idle),
            ));
        }

        PropagationQueue {
            sender,
            pending,
            idle,
        }
    }

    /// Queues a job. Never waits.
    pub fn enqueue(&self, job: PropagationJob) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        let origin = job.origin;
        if self.sender.send(job).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!(origin = %origin, "propagation workers stopped, job dropped");
        }
    }

    /// Jobs queued or in progress.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Waits until every queued job has been processed.
    pub async fn settle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

async fn run_worker(
    worker: usize,
    graph: Arc<CourseGraph>,
    notifier: Notifier,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<PropagationJob>>>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
) {
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(job) = job else {
            break;
        };

        let report = propagate(&graph, &job);
        notifier.publish_all(report.events.iter().copied());
        if !report.is_empty() {
            tracing::info!(
                worker,
                origin = %report.origin,
                version = report.version,
                marked = report.marked.len(),
                conflicted = report.conflicted.len(),
                "propagation applied"
            );
        }

        if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            idle.notify_waiters();
        }
    }
    tracing::debug!(worker, "propagation worker stopped");
}
