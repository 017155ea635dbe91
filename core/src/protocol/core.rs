//! Main daemon implementation
//!
//! This is the core `Protocol` struct and its event loop. One task owns the
//! whole engine and multiplexes everything that can happen (received
//! datagrams, local client commands, periodic ticks), so no protocol state
//! is ever shared or locked. The socket receive loops and the IPC accept
//! loop run as separate tasks and talk to the engine task over channels.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UnixListener;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::{Engine, NetIf};
use crate::ipc::{self, Command};
use crate::network::netsock::{self, RecvFrame, UdpTransport};
use crate::network::resolve::Eui64Resolver;

use super::config::Config;
use super::error::ProtocolError;
use super::events::ProtocolEvent;

/// A running lantern daemon.
///
/// This is the main entry point: bind with [`Protocol::start`], consume
/// events with [`Protocol::events`], shut down with [`Protocol::stop`].
pub struct Protocol {
    config: Config,
    /// Event receiver, handed out once.
    event_rx: Arc<RwLock<Option<mpsc::UnboundedReceiver<ProtocolEvent>>>>,
    /// Engine task handle.
    engine_task: Arc<RwLock<Option<JoinHandle<()>>>>,
    /// Socket receive loops and the IPC accept loop.
    tasks: Arc<RwLock<Vec<JoinHandle<()>>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Protocol {
    /// Start the daemon: bind every configured interface, open the local
    /// client socket, spawn the engine task.
    pub async fn start(config: Config) -> Result<Self, ProtocolError> {
        if config.interfaces.is_empty() {
            return Err(ProtocolError::StartFailed(
                "no interfaces configured".to_string(),
            ));
        }

        let mut bound = Vec::new();
        for name in &config.interfaces {
            bound.push(netsock::bind_interface(name, &config)?);
        }

        let transport = UdpTransport::new(config.port, &bound);
        let interfaces: Vec<NetIf> = bound
            .iter()
            .map(|b| NetIf::new(b.name.clone(), b.index, b.hwaddr, b.own_addrs.clone()))
            .collect();

        let mut engine = Engine::new(
            &config,
            interfaces,
            Box::new(transport.clone()),
            Box::new(Eui64Resolver),
        );
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        engine.set_event_sender(event_tx);

        let mut tasks = Vec::new();

        // Socket receive loops feed the engine task.
        let (frame_tx, frame_rx) = mpsc::channel(1024);
        for iface in 0..bound.len() {
            tasks.push(tokio::spawn(netsock::run_recv_loop(
                transport.clone(),
                iface,
                config.max_payload,
                frame_tx.clone(),
            )));
        }
        drop(frame_tx);

        // Local client socket. A stale path from a previous run is removed.
        let _ = std::fs::remove_file(&config.socket_path);
        let listener = UnixListener::bind(&config.socket_path).map_err(|e| {
            ProtocolError::Ipc(format!("bind {}: {}", config.socket_path.display(), e))
        })?;
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        tasks.push(tokio::spawn(ipc::run_listener(listener, cmd_tx)));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine_task = tokio::spawn(run_event_loop(
            engine,
            config.clone(),
            Some(transport),
            frame_rx,
            cmd_rx,
            shutdown_rx,
        ));

        info!(
            mode = %config.opmode,
            interfaces = ?config.interfaces,
            socket = %config.socket_path.display(),
            "daemon started"
        );

        Ok(Self {
            config,
            event_rx: Arc::new(RwLock::new(Some(event_rx))),
            engine_task: Arc::new(RwLock::new(Some(engine_task))),
            tasks: Arc::new(RwLock::new(tasks)),
            shutdown_tx,
        })
    }

    /// Take the event receiver. Returns `None` after the first call.
    pub async fn events(&self) -> Option<mpsc::UnboundedReceiver<ProtocolEvent>> {
        self.event_rx.write().await.take()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stop the daemon and wait for the engine task to drain.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.engine_task.write().await.take() {
            let _ = handle.await;
        }
        for handle in self.tasks.write().await.drain(..) {
            handle.abort();
        }
        let _ = std::fs::remove_file(&self.config.socket_path);
        info!("daemon stopped");
    }
}

/// The single task owning all protocol state.
///
/// `net` carries the real socket layer for maintenance; tests drive the
/// loop without one.
pub(crate) async fn run_event_loop(
    mut engine: Engine,
    config: Config,
    net: Option<Arc<UdpTransport>>,
    mut frame_rx: mpsc::Receiver<RecvFrame>,
    mut cmd_rx: mpsc::Receiver<Command>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut announce = tokio::time::interval(Duration::from_secs(config.announce_interval_secs));
    let mut sync = tokio::time::interval(Duration::from_secs(config.sync_interval_secs));
    let mut push = tokio::time::interval(Duration::from_secs(config.push_interval_secs));
    let mut sweep = tokio::time::interval(Duration::from_secs(config.sweep_interval_secs));
    for interval in [&mut announce, &mut sync, &mut push, &mut sweep] {
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    }

    loop {
        tokio::select! {
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            Some(frame) = frame_rx.recv() => {
                engine.handle_frame(frame.iface, frame.src, &frame.bytes, Instant::now());
            }
            Some(command) = cmd_rx.recv() => match command {
                Command::SetData { records } => {
                    engine.client_set_data(records, Instant::now());
                }
                Command::Request { requested_type, tx_id, reply } => {
                    engine.handle_client_request(requested_type, tx_id, reply, Instant::now());
                }
            },
            _ = announce.tick() => engine.tick_announce(),
            _ = sync.tick() => engine.tick_sync(),
            _ = push.tick() => engine.tick_push_local(),
            _ = sweep.tick() => {
                engine.tick_sweep(Instant::now());
                if let Some(net) = &net {
                    net.maintain(&config);
                }
            }
        }
    }

    debug!("event loop stopped");
}
