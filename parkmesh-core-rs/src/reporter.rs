//! Periodic node report
//!
//! While the node has a parent it samples the slot every report period and
//! sends one frame towards the root. While it has none it neither samples
//! nor sends, and checks again every reconnect poll. A failed send is
//! logged and forgotten; the next period carries a fresh reading.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::connectivity::{ConnectivityHandle, MeshState};
use crate::message::{status_text, CodecError, StatusMessage};
use crate::sensor::{EchoPins, SensorSampler};
use crate::transport::MeshTransport;
use crate::types::{NodeIdentity, SensorReading};

/// Result of one report cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// No parent, or acting as root: nothing sampled
    Skipped,
    /// Handed to the transport
    Sent(StatusMessage),
    /// The transport refused it; not retried
    Dropped(StatusMessage),
    /// Sampled, but the status text could not be framed
    Unencodable(CodecError),
}

/// Sampling and reporting loop of a field node
pub struct NodeReportTask<P, T> {
    identity: NodeIdentity,
    sampler: SensorSampler<P>,
    transport: T,
    connectivity: ConnectivityHandle,
    threshold_cm: f32,
    report_period: Duration,
    reconnect_poll: Duration,
}

impl<P, T> NodeReportTask<P, T>
where
    P: EchoPins + Send,
    T: MeshTransport,
{
    pub fn new(
        config: &NodeConfig,
        sampler: SensorSampler<P>,
        transport: T,
        connectivity: ConnectivityHandle,
    ) -> Self {
        Self {
            identity: config.identity(),
            sampler,
            transport,
            connectivity,
            threshold_cm: config.sensor.threshold_cm,
            report_period: config.timing.report_period,
            reconnect_poll: config.timing.reconnect_poll,
        }
    }

    /// Whether a report may be taken right now
    pub fn may_report(&self) -> bool {
        let snapshot = self.connectivity.snapshot();
        !self.identity.is_root()
            && !snapshot.is_root
            && snapshot.mesh == MeshState::ParentConnected
    }

    /// Sample once and send at most one frame
    pub async fn report_once(&mut self) -> ReportOutcome {
        if !self.may_report() {
            debug!("Not connected to a parent, skipping report");
            return ReportOutcome::Skipped;
        }

        let measurement = self.sampler.measure();
        if let Err(e) = &measurement {
            warn!("Sensor reading failed: {}", e);
        }
        let reading = SensorReading::from(measurement);
        let occupancy = reading.occupancy(self.threshold_cm);
        let layer = self.connectivity.snapshot().layer;

        let text = status_text(self.identity.logical_id, &reading, occupancy, layer);
        let msg = match StatusMessage::new(self.identity.logical_id, text) {
            Ok(msg) => msg,
            Err(e) => {
                error!("Failed to build status message, dropping report: {}", e);
                return ReportOutcome::Unencodable(e);
            }
        };

        match self.transport.send(&msg.encode()).await {
            Ok(()) => {
                info!("Sent to root: {}", msg.payload());
                ReportOutcome::Sent(msg)
            }
            Err(e) => {
                warn!("Failed to send to root: {}", e);
                ReportOutcome::Dropped(msg)
            }
        }
    }

    /// Run forever
    pub async fn run(mut self) {
        info!(
            "Report task started for node {} (every {:?})",
            self.identity.logical_id, self.report_period
        );

        loop {
            if !self.may_report() {
                tokio::time::sleep(self.reconnect_poll).await;
                continue;
            }

            self.report_once().await;
            tokio::time::sleep(self.report_period).await;
        }
    }

    pub fn sampler(&self) -> &SensorSampler<P> {
        &self.sampler
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}
