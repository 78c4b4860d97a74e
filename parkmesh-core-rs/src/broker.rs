//! Broker bridge seam
//!
//! The root forwards status text to a publish/subscribe broker through a
//! [`BrokerBridge`]. Bridges report their own connect/disconnect edges as
//! [`UpstreamEvent`](crate::connectivity::UpstreamEvent)s on the connectivity
//! event channel; reconnecting is the bridge's business, not the root's.

use std::future::Future;

use thiserror::Error;
use tracing::info;

/// Broker bridge errors
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker client not started")]
    NotStarted,

    #[error("invalid broker endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("failed to start broker client: {0}")]
    Start(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("publish timed out")]
    Timeout,
}

/// Connect/publish primitive towards the broker
pub trait BrokerBridge: Send + Sync {
    /// Start the client. Idempotent: calling it again once started is a no-op.
    fn start(&self) -> Result<(), BrokerError>;

    /// Whether `start` has already succeeded
    fn is_started(&self) -> bool;

    /// Publish one payload with at-least-once delivery and no retain flag.
    ///
    /// Must return within the client's own timeout; never retried here.
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

/// Bridge that only logs what it would publish
#[derive(Debug, Default)]
pub struct LogBroker {
    started: std::sync::atomic::AtomicBool,
}

impl LogBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BrokerBridge for LogBroker {
    fn start(&self) -> Result<(), BrokerError> {
        use std::sync::atomic::Ordering;

        if !self.started.swap(true, Ordering::SeqCst) {
            info!("Log broker started");
        }
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started.load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        if !self.is_started() {
            return Err(BrokerError::NotStarted);
        }
        info!("[{}] {}", topic, String::from_utf8_lossy(payload));
        Ok(())
    }
}
