//! Connectivity state machine
//!
//! Reconciles mesh membership and upstream (IP / broker) reachability into a
//! single [`ConnectivitySnapshot`]:
//!
//! ```text
//! mesh:      Stopped --started--> Started --parent_connected--> ParentConnected
//!            ParentConnected --parent_disconnected--> ParentDisconnected
//!            ParentDisconnected --parent_connected--> ParentConnected
//!            any --stopped--> Stopped
//!
//! upstream:  NoIp --ip_acquired--> IpAcquired          (mesh started as root;
//!                                                      starts the broker, once)
//!            IpAcquired | BrokerDisconnected --broker_connected--> BrokerConnected
//!            BrokerConnected --broker_disconnected--> BrokerDisconnected
//! ```
//!
//! Event handlers push [`ConnectivityEvent`]s into a bounded channel; the
//! state machine is the only writer and publishes every transition on a
//! `watch` channel. Periodic tasks read through [`ConnectivityHandle`] and
//! always observe the latest transition.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::broker::BrokerBridge;
use crate::types::{NodeIdentity, Role};

/// Default capacity of the connectivity event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 32;

/// Mesh membership of this device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshState {
    Stopped,
    Started,
    ParentConnected,
    /// Started, lost its parent and waiting to re-associate
    ParentDisconnected,
}

/// Upstream reachability (root only)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamState {
    NoIp,
    IpAcquired,
    BrokerConnected,
    BrokerDisconnected,
}

/// Events delivered by the mesh stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshEvent {
    Started,
    Stopped,
    ParentConnected { layer: u8 },
    ParentDisconnected,
    ChildConnected,
    ChildDisconnected,
    RootAddressUpdated,
    RoleChanged { is_root: bool },
}

/// Events delivered by the IP stack and the broker bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamEvent {
    IpAcquired,
    BrokerConnected,
    BrokerDisconnected,
}

/// Anything the state machine consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Mesh(MeshEvent),
    Upstream(UpstreamEvent),
}

impl From<MeshEvent> for ConnectivityEvent {
    fn from(event: MeshEvent) -> Self {
        ConnectivityEvent::Mesh(event)
    }
}

impl From<UpstreamEvent> for ConnectivityEvent {
    fn from(event: UpstreamEvent) -> Self {
        ConnectivityEvent::Upstream(event)
    }
}

/// Side effect requested by a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    StartBroker,
}

/// Point-in-time view of connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivitySnapshot {
    pub mesh: MeshState,
    pub upstream: UpstreamState,
    /// Whether the mesh currently has this device acting as root
    pub is_root: bool,
    /// Mesh layer reported with the last parent connection (root is layer 1)
    pub layer: u8,
}

impl ConnectivitySnapshot {
    fn initial(identity: &NodeIdentity) -> Self {
        Self {
            mesh: MeshState::Stopped,
            upstream: UpstreamState::NoIp,
            is_root: identity.is_root(),
            layer: if identity.is_root() { 1 } else { 0 },
        }
    }
}

/// Sending half of the connectivity event channel
pub type EventSender = mpsc::Sender<ConnectivityEvent>;

/// Receiving half of the connectivity event channel
pub type EventReceiver = mpsc::Receiver<ConnectivityEvent>;

/// Create the bounded event channel feeding the state machine
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity)
}

/// Single writer of the connectivity state
pub struct ConnectivityStateMachine {
    identity: NodeIdentity,
    state: watch::Sender<ConnectivitySnapshot>,
}

impl ConnectivityStateMachine {
    /// Create the state machine and a reader handle for it
    pub fn new(identity: NodeIdentity) -> (Self, ConnectivityHandle) {
        let (state, rx) = watch::channel(ConnectivitySnapshot::initial(&identity));
        (Self { identity, state }, ConnectivityHandle { rx })
    }

    /// Another reader handle
    pub fn handle(&self) -> ConnectivityHandle {
        ConnectivityHandle {
            rx: self.state.subscribe(),
        }
    }

    pub fn snapshot(&self) -> ConnectivitySnapshot {
        *self.state.borrow()
    }

    /// Apply one event and publish the resulting state
    pub fn apply(&mut self, event: ConnectivityEvent) -> Option<Action> {
        let current = self.snapshot();
        let mut next = current;

        let action = match event {
            ConnectivityEvent::Mesh(event) => {
                self.apply_mesh(&mut next, event);
                None
            }
            ConnectivityEvent::Upstream(event) => self.apply_upstream(&mut next, event),
        };

        if next != current {
            self.state.send_replace(next);
        }
        action
    }

    fn apply_mesh(&self, next: &mut ConnectivitySnapshot, event: MeshEvent) {
        match event {
            MeshEvent::Started => {
                info!("Mesh started");
                next.mesh = MeshState::Started;
            }
            MeshEvent::Stopped => {
                info!("Mesh stopped");
                next.mesh = MeshState::Stopped;
            }
            MeshEvent::ParentConnected { layer } => {
                if next.mesh == MeshState::Stopped {
                    warn!("Ignoring parent connection while mesh is stopped");
                    return;
                }
                info!("Connected to parent, layer {}", layer);
                next.mesh = MeshState::ParentConnected;
                next.layer = layer;
            }
            MeshEvent::ParentDisconnected => {
                if next.mesh == MeshState::Stopped {
                    debug!("Parent disconnect while mesh is stopped");
                    return;
                }
                warn!("Disconnected from parent");
                next.mesh = MeshState::ParentDisconnected;
            }
            MeshEvent::ChildConnected => info!("Child node connected"),
            MeshEvent::ChildDisconnected => warn!("Child node disconnected"),
            MeshEvent::RootAddressUpdated => info!("Root address updated"),
            MeshEvent::RoleChanged { is_root } => {
                if next.is_root != is_root {
                    info!("Mesh role changed: acting as root = {}", is_root);
                }
                next.is_root = is_root;
            }
        }
    }

    fn apply_upstream(
        &self,
        next: &mut ConnectivitySnapshot,
        event: UpstreamEvent,
    ) -> Option<Action> {
        if self.identity.role != Role::Root {
            debug!("Ignoring upstream event {:?} on a {}", event, self.identity.role);
            return None;
        }

        match (next.upstream, event) {
            (UpstreamState::NoIp, UpstreamEvent::IpAcquired)
                if next.mesh == MeshState::Stopped || !next.is_root =>
            {
                warn!("Ignoring IP acquisition before joining the mesh as root");
                None
            }
            (UpstreamState::NoIp, UpstreamEvent::IpAcquired) => {
                info!("Root acquired an IP address, starting broker client");
                next.upstream = UpstreamState::IpAcquired;
                Some(Action::StartBroker)
            }
            (_, UpstreamEvent::IpAcquired) => {
                debug!("IP acquired again, broker client already started");
                None
            }
            (UpstreamState::NoIp, broker_event) => {
                warn!("Ignoring {:?} before an IP address was acquired", broker_event);
                None
            }
            (_, UpstreamEvent::BrokerConnected) => {
                info!("Broker connected");
                next.upstream = UpstreamState::BrokerConnected;
                None
            }
            (_, UpstreamEvent::BrokerDisconnected) => {
                warn!("Broker disconnected");
                next.upstream = UpstreamState::BrokerDisconnected;
                None
            }
        }
    }

    /// Consume events until every sender is gone.
    ///
    /// The broker is started on the first IP acquisition, and never again:
    /// later disconnects are left to the bridge's own reconnect policy.
    pub async fn run<B: BrokerBridge>(mut self, mut events: EventReceiver, broker: Option<Arc<B>>) {
        while let Some(event) = events.recv().await {
            debug!("Connectivity event: {:?}", event);

            if let Some(Action::StartBroker) = self.apply(event) {
                match &broker {
                    Some(broker) => {
                        if let Err(e) = broker.start() {
                            error!("Failed to start broker client: {}", e);
                        }
                    }
                    None => warn!("IP acquired but no broker bridge is configured"),
                }
            }
        }

        debug!("Connectivity event channel closed");
    }
}

/// Read side of the connectivity state
#[derive(Debug, Clone)]
pub struct ConnectivityHandle {
    rx: watch::Receiver<ConnectivitySnapshot>,
}

impl ConnectivityHandle {
    pub fn snapshot(&self) -> ConnectivitySnapshot {
        *self.rx.borrow()
    }

    pub fn mesh_state(&self) -> MeshState {
        self.rx.borrow().mesh
    }

    pub fn upstream_state(&self) -> UpstreamState {
        self.rx.borrow().upstream
    }

    pub fn is_parent_connected(&self) -> bool {
        self.mesh_state() == MeshState::ParentConnected
    }

    pub fn is_broker_connected(&self) -> bool {
        self.upstream_state() == UpstreamState::BrokerConnected
    }

    /// Wait until the state satisfies `predicate`.
    ///
    /// Returns `None` if the state machine has gone away first.
    pub async fn wait_for<F>(&mut self, predicate: F) -> Option<ConnectivitySnapshot>
    where
        F: FnMut(&ConnectivitySnapshot) -> bool,
    {
        self.rx.wait_for(predicate).await.ok().map(|s| *s)
    }
}
