//! Parkmesh Node - device entry point
//!
//! Runs one parking-mesh device, or a whole simulated installation.
//!
//! # Usage
//!
//! ```bash
//! # Root bridging the mesh to a broker
//! parkmesh-node run --role root --id 0 --bind 0.0.0.0:9990 \
//!     --broker-uri mqtt://localhost:1883
//!
//! # Field node reporting to that root, car parked 15 cm away
//! parkmesh-node run --role node --id 7 --bind 0.0.0.0:9991 \
//!     --parent 192.168.1.10:9990 --simulate-distance-cm 15
//!
//! # Root and five nodes in one process, printing instead of publishing
//! parkmesh-node simulate --nodes 5
//! ```
//!
//! Hosts have no ultrasonic sensor, so nodes measure a simulated target.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use rand::Rng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use parkmesh_adapter_mqtt::MqttBridge;
use parkmesh_core::config::NodeConfig;
use parkmesh_core::connectivity::EventReceiver;
use parkmesh_core::{
    event_channel, memory_mesh, BrokerBridge, ConfigError, ConnectivityStateMachine,
    EventSender, LogBroker, MeshAddr, MeshEvent, MeshId, MeshTransport, NodeReportTask, Role,
    RootAggregator, SensorSampler, SimulatedEcho, UdpMeshTransport, UpstreamEvent,
};

/// Parking slot occupancy mesh device
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one device over the UDP mesh
    Run(RunArgs),
    /// Run a root and N nodes in one process
    Simulate(SimulateArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// JSON config file; flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device role (node, root)
    #[arg(short, long)]
    role: Option<Role>,

    /// Logical id of this device
    #[arg(short, long)]
    id: Option<u8>,

    /// Mesh id, six hex bytes (11:11:11:11:11:11)
    #[arg(long)]
    mesh_id: Option<MeshId>,

    /// UDP address to listen on
    #[arg(short, long, default_value = "0.0.0.0:9990")]
    bind: SocketAddr,

    /// Parent address (nodes only)
    #[arg(short, long)]
    parent: Option<SocketAddr>,

    /// Broker endpoint (root only)
    #[arg(long)]
    broker_uri: Option<String>,

    #[arg(long, requires = "broker_pass")]
    broker_user: Option<String>,

    #[arg(long, requires = "broker_user")]
    broker_pass: Option<String>,

    /// Topic prefix (root only)
    #[arg(long)]
    topic_prefix: Option<String>,

    /// Occupancy threshold in centimeters
    #[arg(long)]
    threshold_cm: Option<f32>,

    /// Distance the simulated sensor sees
    #[arg(long, default_value = "100.0", value_parser = parse_distance_cm)]
    simulate_distance_cm: f32,
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Number of field nodes
    #[arg(short, long, default_value = "3", value_parser = clap::value_parser!(u8).range(1..=254))]
    nodes: u8,

    /// Publish to this broker instead of logging
    #[arg(long)]
    broker_uri: Option<String>,

    /// Stop after this many seconds
    #[arg(long)]
    duration_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Simulate(args) => simulate(args).await,
    }
}

fn load_config(args: &RunArgs) -> Result<NodeConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    };

    if let Some(role) = args.role {
        config.role = role;
    }
    if let Some(id) = args.id {
        config.logical_id = id;
    }
    if let Some(mesh_id) = args.mesh_id {
        config = config.with_mesh_id(mesh_id);
    }
    if let Some(uri) = &args.broker_uri {
        config = config.with_broker_uri(uri.clone());
    }
    if let (Some(user), Some(pass)) = (&args.broker_user, &args.broker_pass) {
        config = config.with_credentials(user, pass);
    }
    if let Some(prefix) = &args.topic_prefix {
        config = config.with_topic_prefix(prefix.clone());
    }
    if let Some(threshold) = args.threshold_cm {
        config = config.with_threshold(threshold);
    }

    config.validate()?;
    Ok(config)
}

fn parse_distance_cm(s: &str) -> Result<f32, String> {
    let cm: f32 = s.parse().map_err(|e| format!("{}", e))?;
    if !cm.is_finite() || cm < 0.0 {
        return Err(format!("distance must be a finite, non-negative number, got {}", s));
    }
    Ok(cm)
}

async fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&args)?;
    let identity = config.identity();

    info!(
        "Parkmesh {} {} starting on mesh {}",
        identity.role, identity.logical_id, config.mesh_id
    );

    let (sm, handle) = ConnectivityStateMachine::new(identity);
    let (events, rx) = event_channel(config.event_capacity);

    let parent = match identity.role {
        Role::Root => None,
        Role::Node => args.parent,
    };
    let transport = UdpMeshTransport::bind(args.bind, config.mesh_id, parent).await?;
    info!("Listening on {}", transport.local_addr()?);

    match identity.role {
        Role::Root => {
            let broker = Arc::new(MqttBridge::new(&config.broker, events.clone())?);
            info!("Broker endpoint {}", broker.endpoint());
            tokio::spawn(sm.run(rx, Some(broker.clone())));

            transport.announce(&identity, &events).await;
            // the host network is already up
            events.send(UpstreamEvent::IpAcquired.into()).await?;

            let aggregator = RootAggregator::new(&config, transport, broker, handle);
            until_ctrl_c(aggregator.run()).await;
        }
        Role::Node => {
            if parent.is_none() {
                warn!("No parent configured, this node will never report");
            }
            tokio::spawn(sm.run::<LogBroker>(rx, None));
            transport.announce(&identity, &events).await;

            info!(
                "No sensor on this host (trigger GPIO {}, echo GPIO {}), simulating {:.1} cm",
                config.sensor.trigger_pin, config.sensor.echo_pin, args.simulate_distance_cm
            );
            let echo = SimulatedEcho::at_distance(args.simulate_distance_cm);
            let sampler = SensorSampler::new(echo, config.sensor.echo_timeout);
            let task = NodeReportTask::new(&config, sampler, transport, handle);
            until_ctrl_c(task.run()).await;
        }
    }

    Ok(())
}

async fn simulate(args: SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    info!("Simulating a root and {} nodes", args.nodes);

    let (mesh, root_transport) = memory_mesh(4 * args.nodes as usize);

    let mut root_config = NodeConfig::new(0, Role::Root);
    if let Some(uri) = &args.broker_uri {
        root_config = root_config.with_broker_uri(uri.clone());
    }
    root_config.validate()?;

    let (root_events, root_rx) = event_channel(root_config.event_capacity);
    match &args.broker_uri {
        Some(_) => {
            let broker = Arc::new(MqttBridge::new(&root_config.broker, root_events.clone())?);
            spawn_root(&root_config, root_transport, broker, root_rx, &root_events).await?;
        }
        None => {
            let broker = Arc::new(LogBroker::new());
            spawn_root(&root_config, root_transport, broker, root_rx, &root_events).await?;
            // nothing to connect to
            root_events.send(UpstreamEvent::BrokerConnected.into()).await?;
        }
    }

    let distances: Vec<f32> = {
        let mut rng = rand::thread_rng();
        (0..args.nodes).map(|_| rng.gen_range(5.0..150.0)).collect()
    };

    for (index, distance) in distances.into_iter().enumerate() {
        let id = index as u8 + 1;
        let config = NodeConfig::new(id, Role::Node);
        let (sm, handle) = ConnectivityStateMachine::new(config.identity());
        let (events, rx) = event_channel(config.event_capacity);
        tokio::spawn(sm.run::<LogBroker>(rx, None));

        events.send(MeshEvent::Started.into()).await?;
        events.send(MeshEvent::ParentConnected { layer: 2 }.into()).await?;

        info!("Node {} sees a target at {:.1} cm", id, distance);
        let sampler = SensorSampler::new(
            SimulatedEcho::at_distance(distance),
            config.sensor.echo_timeout,
        );
        let uplink = mesh.attach(MeshAddr::for_node(id));
        let task = NodeReportTask::new(&config, sampler, uplink, handle);
        tokio::spawn(task.run());
    }

    let finished = async {
        match args.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    until_ctrl_c(finished).await;

    Ok(())
}

async fn spawn_root<T, B>(
    config: &NodeConfig,
    transport: T,
    broker: Arc<B>,
    rx: EventReceiver,
    events: &EventSender,
) -> Result<(), Box<dyn std::error::Error>>
where
    T: MeshTransport + 'static,
    B: BrokerBridge + 'static,
{
    let (sm, handle) = ConnectivityStateMachine::new(config.identity());
    tokio::spawn(sm.run(rx, Some(broker.clone())));

    events.send(MeshEvent::Started.into()).await?;
    events.send(MeshEvent::RoleChanged { is_root: true }.into()).await?;
    events.send(UpstreamEvent::IpAcquired.into()).await?;

    let aggregator = RootAggregator::new(config, transport, broker, handle);
    tokio::spawn(aggregator.run());
    Ok(())
}

async fn until_ctrl_c(task: impl std::future::Future<Output = ()>) {
    tokio::select! {
        _ = task => {}
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_distance_cm() {
        assert_eq!(parse_distance_cm("15"), Ok(15.0));
        assert_eq!(parse_distance_cm("0.5"), Ok(0.5));
        assert!(parse_distance_cm("inf").is_err());
        assert!(parse_distance_cm("NaN").is_err());
        assert!(parse_distance_cm("-3").is_err());
        assert!(parse_distance_cm("far").is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "parkmesh-node",
            "run",
            "--role",
            "root",
            "--mesh-id",
            "22:22:22:22:22:22",
            "--topic-prefix",
            "lot/b",
            "--threshold-cm",
            "30",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected the run subcommand");
        };

        let config = load_config(&args).unwrap();
        assert_eq!(config.role, Role::Root);
        assert_eq!(config.mesh_id.to_string(), "22:22:22:22:22:22");
        assert_eq!(config.broker.topic_prefix, "lot/b");
        assert_eq!(config.sensor.threshold_cm, 30.0);
    }

    #[test]
    fn test_rejects_infinite_simulated_distance() {
        let result = Cli::try_parse_from([
            "parkmesh-node",
            "run",
            "--simulate-distance-cm",
            "inf",
        ]);
        assert!(result.is_err());
    }
}
