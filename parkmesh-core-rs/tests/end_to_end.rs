//! Node -> mesh -> root -> broker, all in one process

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use parkmesh_core::sensor::DEFAULT_ECHO_TIMEOUT;
use parkmesh_core::{
    event_channel, memory_mesh, BrokerBridge, BrokerError, ConnectivityStateMachine, MeshAddr,
    MeshEvent, MeshTransport, NodeConfig, NodeReportTask, Role, RootAggregator, SensorSampler,
    SimulatedEcho, StatusMessage, UpstreamEvent,
};

#[derive(Default)]
struct RecordingBroker {
    started: Mutex<usize>,
    published: Mutex<Vec<(String, String)>>,
}

impl BrokerBridge for RecordingBroker {
    fn start(&self) -> Result<(), BrokerError> {
        *self.started.lock() += 1;
        Ok(())
    }

    fn is_started(&self) -> bool {
        *self.started.lock() > 0
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        self.published.lock().push((
            topic.to_string(),
            String::from_utf8_lossy(payload).into_owned(),
        ));
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_occupied_slot_reaches_broker() {
    let (mesh, root_transport) = memory_mesh(16);

    // root
    let root_config = NodeConfig::new(0, Role::Root);
    let broker = Arc::new(RecordingBroker::default());
    let (root_sm, root_handle) = ConnectivityStateMachine::new(root_config.identity());
    let (root_events, root_rx) = event_channel(root_config.event_capacity);
    tokio::spawn(root_sm.run(root_rx, Some(broker.clone())));
    let aggregator = RootAggregator::new(&root_config, root_transport, broker.clone(), root_handle);
    tokio::spawn(aggregator.run());

    // node 7, 15 cm from a car
    let node_config = NodeConfig::new(7, Role::Node);
    let (node_sm, node_handle) = ConnectivityStateMachine::new(node_config.identity());
    let (node_events, node_rx) = event_channel(node_config.event_capacity);
    tokio::spawn(node_sm.run::<RecordingBroker>(node_rx, None));
    let sampler = SensorSampler::new(SimulatedEcho::at_distance(15.0), DEFAULT_ECHO_TIMEOUT);
    let task = NodeReportTask::new(
        &node_config,
        sampler,
        mesh.attach(MeshAddr::for_node(7)),
        node_handle,
    );
    tokio::spawn(task.run());

    root_events.send(MeshEvent::Started.into()).await.unwrap();
    root_events.send(UpstreamEvent::IpAcquired.into()).await.unwrap();
    root_events.send(UpstreamEvent::BrokerConnected.into()).await.unwrap();
    node_events.send(MeshEvent::Started.into()).await.unwrap();
    node_events
        .send(MeshEvent::ParentConnected { layer: 2 }.into())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1_500)).await;

    assert_eq!(*broker.started.lock(), 1);
    let published = broker.published.lock().clone();
    assert_eq!(published.len(), 1);
    let (topic, payload) = &published[0];
    assert_eq!(topic, "esp32/parking/node/7");
    assert!(payload.contains("OCCUPIED"));
    assert!(payload.contains("15.0"));
    assert_eq!(payload, "Node 7: OCCUPIED (dist=15.0 cm, layer 2)");
}

#[tokio::test(start_paused = true)]
async fn test_nothing_published_without_ip() {
    let (mesh, root_transport) = memory_mesh(16);

    let root_config = NodeConfig::new(0, Role::Root);
    let broker = Arc::new(RecordingBroker::default());
    let (root_sm, root_handle) = ConnectivityStateMachine::new(root_config.identity());
    let (root_events, root_rx) = event_channel(root_config.event_capacity);
    tokio::spawn(root_sm.run(root_rx, Some(broker.clone())));
    let aggregator = RootAggregator::new(&root_config, root_transport, broker.clone(), root_handle);
    tokio::spawn(aggregator.run());

    root_events.send(MeshEvent::Started.into()).await.unwrap();
    root_events
        .send(MeshEvent::ParentConnected { layer: 1 }.into())
        .await
        .unwrap();

    let node = mesh.attach(MeshAddr::for_node(7));
    let frame = StatusMessage::new(7, "Node 7: OCCUPIED (dist=15.0 cm, layer 2)")
        .unwrap()
        .encode();
    node.send(&frame).await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(*broker.started.lock(), 0);
    assert!(broker.published.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_root_keeps_receiving_after_garbage() {
    let (mesh, root_transport) = memory_mesh(16);

    let root_config = NodeConfig::new(0, Role::Root);
    let broker = Arc::new(RecordingBroker::default());
    let (root_sm, root_handle) = ConnectivityStateMachine::new(root_config.identity());
    let (root_events, root_rx) = event_channel(root_config.event_capacity);
    tokio::spawn(root_sm.run(root_rx, Some(broker.clone())));
    let aggregator = RootAggregator::new(&root_config, root_transport, broker.clone(), root_handle);
    tokio::spawn(aggregator.run());

    root_events.send(MeshEvent::Started.into()).await.unwrap();
    root_events.send(UpstreamEvent::IpAcquired.into()).await.unwrap();
    root_events.send(UpstreamEvent::BrokerConnected.into()).await.unwrap();

    let node = mesh.attach(MeshAddr::for_node(9));
    node.send(&[9u8; 10]).await.unwrap();
    node.send(&StatusMessage::new(9, "Node 9: FREE").unwrap().encode())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;

    let published = broker.published.lock().clone();
    assert_eq!(
        published,
        vec![("esp32/parking/node/9".to_string(), "Node 9: FREE".to_string())]
    );
}
