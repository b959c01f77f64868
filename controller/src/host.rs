use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, Context};
use tokio::{net::TcpListener, sync::mpsc};
use tracing::{info, warn};

use gateway_common::{
    Dispatcher, GatewayConfig, LoopbackTransport, MeshTransport, PersistenceGateway,
};

use crate::{
    bridge::MqttMeshTransport,
    owner::{current_moment, spawn_owner, PendingCommand},
    server,
    store::JsonFileStore,
};

const COMMAND_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransportKind {
    Mqtt,
    Loopback,
}

impl TransportKind {
    fn from_env() -> Self {
        match std::env::var("GATEWAY_TRANSPORT").as_deref() {
            Ok("loopback") => Self::Loopback,
            Ok("mqtt") | Err(_) => Self::Mqtt,
            Ok(other) => {
                warn!("unknown GATEWAY_TRANSPORT '{other}', using mqtt");
                Self::Mqtt
            }
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let data_dir = data_dir();
    let mut config = load_config(&data_dir).await.unwrap_or_else(|err| {
        warn!("failed to load gateway config: {err:#}");
        GatewayConfig::default()
    });
    apply_env_overrides(&mut config);
    config.sanitize();

    let store = JsonFileStore::new(&data_dir);
    let shutdown = Arc::new(AtomicBool::new(false));
    let (queue, commands) = mpsc::channel::<PendingCommand>(COMMAND_QUEUE_DEPTH);

    let owner = match TransportKind::from_env() {
        TransportKind::Mqtt => {
            let transport = MqttMeshTransport::connect(&config.bridge, "mesh-gateway-controller");
            start_owner(config.clone(), transport, store, commands, shutdown.clone())?
        }
        TransportKind::Loopback => {
            info!("running with the loopback transport, no radio traffic");
            start_owner(
                config.clone(),
                LoopbackTransport::new(),
                store,
                commands,
                shutdown.clone(),
            )?
        }
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind command server at {addr}"))?;
    info!("command server listening on {addr}");

    let outcome = tokio::select! {
        result = server::serve(listener, queue) => result,
        signal = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            signal.context("failed to listen for ctrl-c")
        }
    };

    shutdown.store(true, Ordering::Relaxed);
    tokio::task::spawn_blocking(move || owner.join())
        .await
        .context("failed to wait for owner thread")?
        .map_err(|_| anyhow!("owner thread panicked"))?;
    info!("controller stopped");
    outcome
}

fn start_owner<T, S>(
    config: GatewayConfig,
    transport: T,
    store: S,
    commands: mpsc::Receiver<PendingCommand>,
    shutdown: Arc<AtomicBool>,
) -> anyhow::Result<std::thread::JoinHandle<()>>
where
    T: MeshTransport + Send + 'static,
    S: PersistenceGateway + Send + 'static,
{
    let dispatcher = Dispatcher::bootstrap(config, transport, store, current_moment());
    spawn_owner(dispatcher, commands, shutdown).context("failed to start owner thread")
}

fn data_dir() -> PathBuf {
    std::env::var("GATEWAY_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.gateway"))
}

async fn load_config(data_dir: &Path) -> anyhow::Result<GatewayConfig> {
    let path = data_dir.join("gateway.json");
    match tokio::fs::read(&path).await {
        Ok(raw) => serde_json::from_slice::<GatewayConfig>(&raw)
            .with_context(|| format!("invalid config in {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!("no config at {}, using defaults", path.display());
            Ok(GatewayConfig::default())
        }
        Err(err) => Err(err.into()),
    }
}

fn apply_env_overrides(config: &mut GatewayConfig) {
    let bridge = &mut config.bridge;
    if let Ok(host) = std::env::var("MQTT_HOST") {
        bridge.mqtt_host = host;
    }
    bridge.mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(bridge.mqtt_port);
    if let Ok(user) = std::env::var("MQTT_USER") {
        bridge.mqtt_user = user;
    }
    if let Ok(pass) = std::env::var("MQTT_PASS") {
        bridge.mqtt_pass = pass;
    }

    config.server.port = std::env::var("GATEWAY_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(config.server.port);
}
