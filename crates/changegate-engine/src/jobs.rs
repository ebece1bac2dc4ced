//! Background job queue
//!
//! A bounded mpsc queue drained by a fixed set of tokio workers. The
//! durable record of an in-progress job is the entity it works on (a
//! PROVISIONING sandbox), not the queue.

use std::sync::Arc;

use async_trait::async_trait;
use changegate_core::errors::{ExError, ExErrorKind};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::errors::Result;

/// Runs one kind of job
#[async_trait]
pub trait JobHandler<J>: Send + Sync + 'static {
    async fn handle(&self, job: J);
}

struct Envelope<J> {
    job: J,
    done: oneshot::Sender<()>,
}

/// Completion handle for a submitted job
#[derive(Debug)]
pub struct JobTicket {
    done: oneshot::Receiver<()>,
}

impl JobTicket {
    /// Wait until a worker has finished the job
    pub async fn wait(self) -> Result<()> {
        self.done.await.map_err(|_| {
            ExError::new(ExErrorKind::Internal)
                .with_op("job_wait")
                .with_message("worker stopped before finishing the job")
        })
    }
}

/// Sending side of the queue; cloning shares the same workers
pub struct JobQueue<J> {
    sender: mpsc::Sender<Envelope<J>>,
    workers: Arc<Vec<JoinHandle<()>>>,
}

impl<J> Clone for JobQueue<J> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            workers: Arc::clone(&self.workers),
        }
    }
}

impl<J: Send + 'static> JobQueue<J> {
    /// Spawn `workers` tasks draining a queue of `capacity` jobs
    ///
    /// Must be called from inside a tokio runtime.
    pub fn start<H: JobHandler<J>>(handler: Arc<H>, workers: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Envelope<J>>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(envelope) = next else {
                            tracing::debug!(worker, "job queue closed; worker exiting");
                            break;
                        };
                        handler.handle(envelope.job).await;
                        let _ = envelope.done.send(());
                    }
                })
            })
            .collect();

        Self {
            sender,
            workers: Arc::new(handles),
        }
    }

    /// Enqueue a job, waiting for room if the queue is full
    pub async fn submit(&self, job: J) -> Result<JobTicket> {
        let (done, ticket) = oneshot::channel();
        self.sender
            .send(Envelope { job, done })
            .await
            .map_err(|_| {
                ExError::new(ExErrorKind::Internal)
                    .with_op("job_submit")
                    .with_message("job queue is closed")
            })?;
        Ok(JobTicket { done: ticket })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    #[async_trait]
    impl JobHandler<usize> for Counter {
        async fn handle(&self, job: usize) {
            self.0.fetch_add(job, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_jobs_run_and_tickets_resolve() {
        let handler = Arc::new(Counter(AtomicUsize::new(0)));
        let queue = JobQueue::start(Arc::clone(&handler), 2, 4);
        assert_eq!(queue.worker_count(), 2);

        let mut tickets = Vec::new();
        for n in 1..=5 {
            tickets.push(queue.submit(n).await.unwrap());
        }
        for ticket in tickets {
            ticket.wait().await.unwrap();
        }
        assert_eq!(handler.0.load(Ordering::SeqCst), 15);
    }
}
