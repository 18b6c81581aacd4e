//! Host-side entry point (§5, §6, §9). Loads the configuration file,
//! spawns one session per resolved address (`charge_bridge_ip_list`
//! fan-out), and waits for an orderly shutdown signal. Each session
//! owns its own reactor, manager thread, bus client, and set of
//! sub-bridges; sessions never share state with one another.

mod api_connector;
mod bsp_translator;
mod config;
mod discovery;
mod error;
mod error_table;
mod events;
mod firmware;
mod gpio_bridge;
mod heartbeat;
mod liveness;
mod ovm_translator;
mod passthrough;
mod supervisor;

use std::cell::RefCell;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use clap::Parser;
use nix::sys::signal::{self, SigHandler, Signal};

use bus::BusClient;
use reactor::{Interest, Reactor, RunFlag};

use api_connector::{ApiConnector, ApiConnectorHandle, BspModuleKind};
use config::{BspModule, Config};
use error::BridgeError;
use gpio_bridge::{GpioBridge, GpioHandle};
use heartbeat::{HeartbeatHandle, HeartbeatService};
use passthrough::{Channel, PassthroughBridge, PassthroughHandle};
use supervisor::{ManagerCommand, ReactorEvent, SupervisorConfig};

const MANAGEMENT_PORT: u16 = 6000;
const BSP_PORT: u16 = 6001;
const DEFAULT_HEARTBEAT_INTERVAL_S: u64 = 5;
const GPIO_RESEND_INTERVAL: Duration = Duration::from_secs(1);
const REACTOR_POLL_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(name = "chargebridge-host", about = "Host-side EVSE <-> ChargeBridge translation bridge")]
struct Cli {
    /// Path to the bridge's YAML configuration document (§6).
    #[arg(long)]
    config: PathBuf,

    /// Force a firmware update attempt during every session's startup
    /// firmware check, regardless of each config entry's own
    /// `fw_update_on_start` flag.
    #[arg(long)]
    force_fw_update: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let configs = match config::load(&cli.config) {
        Ok(configs) => configs,
        Err(e) => {
            tracing::error!(error = %e, path = %cli.config.display(), "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let run_flag = Arc::new(RunFlag::new(true));
    install_shutdown_signal_handlers();
    spawn_shutdown_watcher(Arc::clone(&run_flag));

    let session_threads: Vec<_> = configs
        .into_iter()
        .map(|cfg| {
            let run_flag = Arc::clone(&run_flag);
            let force_fw_update = cli.force_fw_update;
            let name = cfg.name.clone();
            thread::Builder::new()
                .name(format!("session-{name}"))
                .spawn(move || run_session(cfg, force_fw_update, run_flag))
                .expect("failed to spawn session thread")
        })
        .collect();

    let mut failed = false;
    for thread in session_threads {
        match thread.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(error = %e, "session exited with an error");
                failed = true;
            }
            Err(_) => {
                tracing::error!("session thread panicked");
                failed = true;
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_shutdown_signal(_: i32) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Release);
}

/// Installs a plain C signal handler for SIGINT/SIGTERM that only
/// flips an atomic flag (§5: "a process-level signal handler may
/// interrupt the reactor's wait"). The handler itself does nothing
/// beyond that, since async-signal-safety rules out anything more.
fn install_shutdown_signal_handlers() {
    let handler = SigHandler::Handler(on_shutdown_signal);
    unsafe {
        if let Err(e) = signal::signal(Signal::SIGINT, handler) {
            tracing::warn!(error = %e, "failed to install SIGINT handler");
        }
        if let Err(e) = signal::signal(Signal::SIGTERM, handler) {
            tracing::warn!(error = %e, "failed to install SIGTERM handler");
        }
    }
}

/// Translates the async-signal-safe atomic flag into the cooperative
/// `RunFlag` every session's reactor and manager loop already polls.
fn spawn_shutdown_watcher(run_flag: Arc<RunFlag>) {
    thread::Builder::new()
        .name("shutdown-watcher".to_string())
        .spawn(move || {
            while !SHUTDOWN_REQUESTED.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(100));
            }
            tracing::info!("shutdown requested");
            run_flag.stop();
        })
        .expect("failed to spawn shutdown watcher thread");
}

#[derive(serde::Serialize, serde::Deserialize)]
struct PassthroughFrame {
    data: Vec<u8>,
}

/// Everything registered with a session's reactor once its CB address
/// resolves (§4.7 `S2 FirmwareCheck -> S3 Connected`). Torn down on a
/// `S3 -> S1` drop back to idle and rebuilt on the next successful
/// firmware check.
#[derive(Default)]
struct SessionHandles {
    fds: Vec<RawFd>,
    bsp: Option<ApiConnectorHandle>,
    gpio: Option<(String, GpioHandle)>,
    heartbeat: Option<HeartbeatHandle>,
    passthrough: Vec<(String, PassthroughHandle)>,
}

impl SessionHandles {
    fn dispatch(&self, topic: &str, payload: &[u8]) {
        if let Some(bsp) = &self.bsp {
            bsp.dispatch_inbound(topic, payload);
        }
        if let Some((prefix, gpio)) = &self.gpio {
            if topic == format!("{prefix}set_states") {
                gpio.apply_set_states(payload);
            }
        }
        for (tx_topic, handle) in &self.passthrough {
            if topic == tx_topic {
                match serde_json::from_slice::<PassthroughFrame>(payload) {
                    Ok(frame) => {
                        if let Err(e) = handle.send(&frame.data) {
                            tracing::warn!(error = %e, channel = ?handle.channel(), "passthrough send failed");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "invalid passthrough payload"),
                }
            }
        }
    }

    /// Unregisters every fd this set of sub-bridges holds before
    /// dropping them, so a reused fd number doesn't collide with a
    /// stale reactor registration on the next `RegisterSubBridges`
    /// (§4.7 sub-bridge lifecycle).
    fn teardown(&mut self, reactor: &mut Reactor) {
        for fd in self.fds.drain(..) {
            if let Err(e) = reactor.unregister(fd) {
                tracing::debug!(fd, error = %e, "sub-bridge fd already unregistered");
            }
        }
        self.bsp = None;
        self.gpio = None;
        self.heartbeat = None;
        self.passthrough.clear();
    }
}

fn unspecified_for(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

/// Runs one session end to end: builds the reactor and bus client,
/// spawns the manager thread that drives discovery/firmware-check/
/// reconnect (§4.7), and loops the reactor until `run_flag` clears,
/// applying `ManagerCommand`s from the manager thread in between waits
/// rather than from inside a registered callback (§9: "either is
/// acceptable" for the reactor/manager-thread boundary).
fn run_session(cfg: Config, force_fw_update: bool, run_flag: Arc<RunFlag>) -> Result<(), BridgeError> {
    let _span = tracing::info_span!("session", name = %cfg.name).entered();
    tracing::info!(bus_host = %cfg.bus_host, bus_port = cfg.bus_port, "starting session");

    let mut reactor = Reactor::new()?;
    let bus = Rc::new(RefCell::new(BusClient::connect(&cfg.bus_host, cfg.bus_port, &cfg.name)?));
    let handles = Rc::new(RefCell::new(SessionHandles::default()));

    {
        let bus_for_drain = Rc::clone(&bus);
        let handles_for_drain = Rc::clone(&handles);
        let bus_fd = bus.borrow().as_raw_fd();
        reactor.register(bus_fd, Interest::read(), move |_readiness| {
            let handles = handles_for_drain.borrow();
            bus_for_drain.borrow().drain(|msg| handles.dispatch(&msg.topic, &msg.payload));
        })?;
    }

    let (events_tx, events_rx) = mpsc::channel::<ReactorEvent>();
    let (commands_tx, commands_rx) = mpsc::channel::<ManagerCommand>();

    let supervisor_config = SupervisorConfig {
        address: cfg.address.clone(),
        management_port: MANAGEMENT_PORT,
        local_bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        fw_file: cfg.fw_file.as_ref().map(PathBuf::from),
        fw_update_on_start: cfg.fw_update_on_start || force_fw_update,
    };

    let manager_run_flag = Arc::clone(&run_flag);
    let manager_name = cfg.name.clone();
    let manager_handle = thread::Builder::new()
        .name(format!("manager-{manager_name}"))
        .spawn(move || supervisor::run_manager_loop(supervisor_config, manager_run_flag, events_rx, commands_tx))
        .map_err(|e| BridgeError::Discovery(format!("failed to spawn manager thread for {manager_name}: {e}")))?;

    while run_flag.is_running() {
        reactor.run_once(Some(REACTOR_POLL_TIMEOUT))?;

        while let Ok(cmd) = commands_rx.try_recv() {
            match cmd {
                ManagerCommand::RegisterSubBridges { cb_ip } => {
                    handles.borrow_mut().teardown(&mut reactor);
                    if let Err(e) = register_sub_bridges(&mut reactor, &cfg, cb_ip, &bus, &handles, &events_tx) {
                        tracing::warn!(error = %e, "sub-bridge registration failed");
                    }
                }
                ManagerCommand::UnregisterSubBridges => {
                    tracing::info!("tearing down sub-bridges");
                    handles.borrow_mut().teardown(&mut reactor);
                }
            }
        }
    }

    drop(events_tx);
    let _ = manager_handle.join();
    handles.borrow_mut().teardown(&mut reactor);
    tracing::info!("session shut down");
    Ok(())
}

/// Builds and registers every sub-bridge the config enables, once the
/// manager thread has resolved (or been given) a concrete CB address
/// (§4.7 `S2 -> S3`). Collects every registered fd into the returned
/// [`SessionHandles`] so a later `UnregisterSubBridges` can cleanly
/// tear the registration down.
fn register_sub_bridges(
    reactor: &mut Reactor,
    cfg: &Config,
    cb_ip: IpAddr,
    bus: &Rc<RefCell<BusClient>>,
    handles: &Rc<RefCell<SessionHandles>>,
    events_tx: &mpsc::Sender<ReactorEvent>,
) -> Result<(), BridgeError> {
    let module_id = cfg.name.clone();
    let bind_ip = unspecified_for(cb_ip);
    tracing::info!(%cb_ip, "registering sub-bridges");

    let mut fds: Vec<RawFd> = Vec::new();

    let heartbeat_enabled = cfg.heartbeat.as_ref().map(|h| h.enable).unwrap_or(true);
    let heartbeat_handle = if heartbeat_enabled {
        let interval_s = cfg.heartbeat.as_ref().map(|h| h.interval_s).unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_S).max(1);
        let service = HeartbeatService::new(
            SocketAddr::new(cb_ip, MANAGEMENT_PORT),
            SocketAddr::new(bind_ip, 0),
            Duration::from_secs(interval_s),
            cfg.to_cb_config(),
        )?;
        fds.extend(service.raw_fds());
        let events_tx = events_tx.clone();
        Some(service.register(reactor, move |connected| {
            let _ = events_tx.send(ReactorEvent::CbConnectivityChanged(connected));
        })?)
    } else {
        None
    };

    let bsp_handle = match &cfg.bsp {
        Some(bsp_block) if bsp_block.enable => {
            let bsp_module = match bsp_block.module {
                BspModule::Evse => BspModuleKind::Evse,
                BspModule::Ev => BspModuleKind::Ev,
            };
            let ovm_enabled = bsp_block.ovm.as_ref().is_some_and(|o| o.enable);
            let connector = ApiConnector::new(
                bsp_block.module_id.as_deref().unwrap_or(&module_id),
                bsp_module,
                ovm_enabled,
                SocketAddr::new(cb_ip, BSP_PORT),
                SocketAddr::new(bind_ip, 0),
            )?;
            fds.extend(connector.raw_fds());
            Some(connector.register(reactor, Rc::clone(bus))?)
        }
        _ => None,
    };

    let gpio_handle = if cfg.gpio.as_ref().is_some_and(|g| g.enable) {
        let bridge = GpioBridge::new(&module_id, SocketAddr::new(cb_ip, MANAGEMENT_PORT), SocketAddr::new(bind_ip, 0), GPIO_RESEND_INTERVAL)?;
        fds.extend(bridge.raw_fds());
        let prefix = bridge.topic_prefix().to_string();
        Some((prefix, bridge.register(reactor, Rc::clone(bus))?))
    } else {
        None
    };

    let mut passthrough_handles = Vec::new();
    let channels: [(bool, Channel); 4] = [
        (cfg.plc.as_ref().is_some_and(|c| c.enable), Channel::Plc),
        (cfg.can_0.as_ref().is_some_and(|c| c.enable), Channel::Can0),
        (cfg.serial_1.as_ref().is_some_and(|c| c.enable), Channel::Serial1),
        (cfg.serial_2.as_ref().is_some_and(|c| c.enable), Channel::Serial2),
    ];
    for (enabled, channel) in channels {
        if !enabled {
            continue;
        }
        let bridge = PassthroughBridge::new(channel, cb_ip, SocketAddr::new(bind_ip, 0))?;
        fds.push(bridge.raw_fd());

        let tx_topic = format!("{module_id}/{}/tx", channel.name());
        let rx_topic = format!("{module_id}/{}/rx", channel.name());
        bus.borrow_mut().subscribe(&tx_topic)?;

        let bus_for_rx = Rc::clone(bus);
        let handle = bridge.register(reactor, move |_channel, frame| {
            let payload = PassthroughFrame { data: frame.to_vec() };
            if let Err(e) = bus_for_rx.borrow().publish(&rx_topic, &payload) {
                tracing::warn!(error = %e, "passthrough publish failed");
            }
        })?;
        passthrough_handles.push((tx_topic, handle));
    }

    *handles.borrow_mut() = SessionHandles {
        fds,
        bsp: bsp_handle,
        gpio: gpio_handle,
        heartbeat: heartbeat_handle,
        passthrough: passthrough_handles,
    };

    Ok(())
}
