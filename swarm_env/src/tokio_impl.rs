//! Tokio-backed implementation of `NetworkBridge`.

use crate::error::EnvError;
use crate::network::{BridgeRequest, NetworkBackend, NetworkBridge};
use crate::types::NsDelivery;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, oneshot};

/// A request in flight to the backend worker.
struct Job {
    request: BridgeRequest,
    reply: oneshot::Sender<Result<Vec<NsDelivery>, EnvError>>,
}

/// Bridge that runs a `NetworkBackend` on a private Tokio runtime.
///
/// Requests travel over a channel to a single worker task, so the backend
/// sees packets strictly in submission order. `exchange` blocks the calling
/// (simulation) thread until the reply arrives or `timeout` elapses.
pub struct TokioBridge {
    /// Runtime owning the worker task
    runtime: Runtime,

    /// Sender to the worker
    requests: mpsc::Sender<Job>,

    /// Wall-clock limit for one exchange (`None` waits forever)
    timeout: Option<Duration>,
}

impl TokioBridge {
    /// Spawns the worker and returns the bridge.
    pub fn new<B: NetworkBackend>(backend: B, timeout: Option<Duration>) -> Result<Self, EnvError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("swarm-bridge")
            .enable_time()
            .build()
            .map_err(|e| EnvError::network(format!("failed to start bridge runtime: {e}")))?;

        let (requests, mut inbox) = mpsc::channel::<Job>(64);
        let backend = Arc::new(backend);

        runtime.spawn(async move {
            while let Some(job) = inbox.recv().await {
                let result = backend.simulate(job.request).await;
                // Receiver may have timed out and gone away
                let _ = job.reply.send(result);
            }
            tracing::debug!("bridge worker shutting down");
        });

        Ok(Self {
            runtime,
            requests,
            timeout,
        })
    }

    /// Returns the configured timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl NetworkBridge for TokioBridge {
    fn exchange(&self, request: BridgeRequest) -> Result<Vec<NsDelivery>, EnvError> {
        let (reply, answer) = oneshot::channel();

        self.runtime.block_on(async {
            self.requests
                .send(Job { request, reply })
                .await
                .map_err(|_| EnvError::ChannelClosed)?;

            match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, answer).await {
                    Ok(result) => result.map_err(|_| EnvError::ChannelClosed)?,
                    Err(_) => {
                        tracing::warn!("network bridge did not answer within {:?}", limit);
                        Err(EnvError::Timeout(limit.as_millis() as u64))
                    }
                },
                None => answer.await.map_err(|_| EnvError::ChannelClosed)?,
            }
        })
    }
}
