//! Shared poll worker: one long-lived task that owns the network transport
//! and serves requests from every concurrent check.

use crate::transport::{Reply, Request, SnmpTransport, TransportError, DEFAULT_REQUEST_TIMEOUT};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;

/// Requests drained from the queue per wake-up.
pub const DEFAULT_BATCH_SIZE: usize = 50;

struct Task {
    request: Request,
    reply: oneshot::Sender<Result<Reply, TransportError>>,
}

pub struct PollWorker {
    transport: Arc<dyn SnmpTransport>,
    rx: mpsc::Receiver<Task>,
    batch_size: usize,
    max_in_flight: usize,
    /// Upper bound on one request; a transport that never answers must not
    /// keep its permit.
    request_timeout: Duration,
}

/// Cloneable submission side of a [`PollWorker`]; itself a transport.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<Task>,
}

impl PollWorker {
    pub fn new(transport: Arc<dyn SnmpTransport>, max_in_flight: usize) -> (Self, WorkerHandle) {
        let (tx, rx) = mpsc::channel(DEFAULT_BATCH_SIZE * 4);
        let worker = Self {
            transport,
            rx,
            batch_size: DEFAULT_BATCH_SIZE,
            max_in_flight: max_in_flight.max(1),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        };
        (worker, WorkerHandle { tx })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Serves requests until every handle is dropped and in-flight requests
    /// have completed.
    pub async fn run(mut self) {
        tracing::info!(
            batch_size = self.batch_size,
            max_in_flight = self.max_in_flight,
            request_timeout_ms = self.request_timeout.as_millis() as u64,
            "Poll worker started"
        );
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut in_flight = JoinSet::new();
        let mut batch = Vec::with_capacity(self.batch_size);

        loop {
            tokio::select! {
                received = self.rx.recv_many(&mut batch, self.batch_size) => {
                    if received == 0 {
                        break;
                    }
                    tracing::trace!(received, "Poll worker batch");
                    for task in batch.drain(..) {
                        let Ok(permit) = semaphore.clone().acquire_owned().await else {
                            break;
                        };
                        let transport = self.transport.clone();
                        let request_timeout = self.request_timeout;
                        in_flight.spawn(async move {
                            let _permit = permit;
                            let endpoint = task.request.target.endpoint();
                            let result = match timeout(request_timeout, transport.send(task.request)).await {
                                Ok(result) => result,
                                Err(_) => {
                                    tracing::warn!(endpoint = %endpoint, "SNMP request abandoned after timeout");
                                    Err(TransportError::Timeout {
                                        endpoint,
                                        timeout: request_timeout,
                                    })
                                }
                            };
                            // The check may have timed out and gone away.
                            let _ = task.reply.send(result);
                        });
                    }
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Poll request task failed");
                    }
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Poll request task failed");
            }
        }
        tracing::info!("Poll worker stopped");
    }
}

#[async_trait]
impl SnmpTransport for WorkerHandle {
    async fn send(&self, request: Request) -> Result<Reply, TransportError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Task { request, reply })
            .await
            .map_err(|_| TransportError::WorkerClosed)?;
        rx.await.map_err(|_| TransportError::WorkerClosed)?
    }
}
