//! Bridge supervisor (component L, §4.7): the per-session state
//! machine (`S0 DiscoveryPending` .. `S4 Degraded`) plus the manager
//! thread that drives it. The state machine itself is a pure, I/O-free
//! struct (§9 design pattern used throughout this crate); the manager
//! loop around it owns every blocking call (discovery, firmware) and
//! talks to the reactor thread over two bounded channels rather than a
//! shared mutex+condvar, per §9's "either is acceptable" note.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use protocol::firmware::VersionInfo;
use reactor::RunFlag;

use crate::config::{CbAddress, DiscoverySpec};
use crate::discovery;
use crate::error::BridgeError;
use crate::firmware::{FirmwareUpdater, UpdateOutcome};

const MANAGER_WAIT: Duration = Duration::from_secs(10);
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);
const DEGRADED_MISS_LIMIT: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    DiscoveryPending,
    Idle,
    FirmwareCheck,
    Connected,
    Degraded,
}

/// Pure transition logic (§4.7). No I/O, no clock — every transition
/// is driven by an explicit event from the manager loop.
#[derive(Debug, Clone)]
pub struct Supervisor {
    state: SessionState,
    degraded_misses: u32,
}

impl Supervisor {
    pub fn new(needs_discovery: bool) -> Self {
        Supervisor {
            state: if needs_discovery { SessionState::DiscoveryPending } else { SessionState::Idle },
            degraded_misses: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// S0 -> S2.
    pub fn on_discovery_resolved(&mut self) {
        if self.state == SessionState::DiscoveryPending {
            self.state = SessionState::FirmwareCheck;
        }
    }

    /// S1 -> S2, "entered on every re-connect attempt tick".
    pub fn on_reconnect_tick(&mut self) {
        if self.state == SessionState::Idle {
            self.state = SessionState::FirmwareCheck;
        }
    }

    /// S2 -> S3 on success; on failure the session stays eligible for
    /// another attempt on the next reconnect tick (§7: "keeps the
    /// session in state S1/S2 and retries on the next tick").
    pub fn on_firmware_check_done(&mut self, ok: bool) {
        if self.state != SessionState::FirmwareCheck {
            return;
        }
        self.state = if ok {
            self.degraded_misses = 0;
            SessionState::Connected
        } else {
            SessionState::Idle
        };
    }

    /// S3 -> S4 on a disconnect edge; S4 accumulates misses until the
    /// S4 -> S1 threshold, or recovers straight back to S3.
    pub fn on_cb_liveness_change(&mut self, connected: bool) {
        match (self.state, connected) {
            (SessionState::Connected, false) => {
                self.state = SessionState::Degraded;
                self.degraded_misses = 1;
            }
            (SessionState::Degraded, false) => {
                self.degraded_misses += 1;
                if self.degraded_misses >= DEGRADED_MISS_LIMIT {
                    self.state = SessionState::Idle;
                    self.degraded_misses = 0;
                }
            }
            (SessionState::Degraded, true) => {
                self.state = SessionState::Connected;
                self.degraded_misses = 0;
            }
            _ => {}
        }
    }
}

/// Sent reactor thread -> manager thread.
#[derive(Debug, Clone, Copy)]
pub enum ReactorEvent {
    CbConnectivityChanged(bool),
}

/// Sent manager thread -> reactor thread, to be applied via
/// `Reactor::add_action` (or directly, when the reactor's own driving
/// loop is between readiness waits).
#[derive(Debug, Clone)]
pub enum ManagerCommand {
    RegisterSubBridges { cb_ip: IpAddr },
    UnregisterSubBridges,
}

pub struct SupervisorConfig {
    pub address: CbAddress,
    pub management_port: u16,
    pub local_bind_ip: IpAddr,
    pub fw_file: Option<PathBuf>,
    pub fw_update_on_start: bool,
}

/// Reads a plain `"major.minor.patch.build"` manifest next to the
/// firmware image (named `<fw_file>.version`) for the expected version
/// to compare against the CB's reported one. The firmware protocol
/// itself carries no image metadata, so this manifest format is this
/// bridge's own convention (see DESIGN.md).
fn read_version_manifest(fw_file: &std::path::Path) -> Result<VersionInfo, BridgeError> {
    let manifest_path = {
        let mut p = fw_file.as_os_str().to_owned();
        p.push(".version");
        PathBuf::from(p)
    };
    let text = std::fs::read_to_string(&manifest_path)
        .map_err(|e| BridgeError::Firmware(format!("reading {}: {e}", manifest_path.display())))?;
    let parts: Vec<_> = text.trim().split('.').collect();
    if parts.len() != 4 {
        return Err(BridgeError::Firmware(format!(
            "malformed version manifest {}: expected major.minor.patch.build",
            manifest_path.display()
        )));
    }
    let parse = |s: &str| s.parse::<u32>().map_err(|e| BridgeError::Firmware(e.to_string()));
    Ok(VersionInfo {
        major: parse(parts[0])? as u8,
        minor: parse(parts[1])? as u8,
        patch: parse(parts[2])? as u8,
        build: parse(parts[3])?,
    })
}

/// Runs the manager loop until `run_flag` clears (§5 shutdown order:
/// "flip the flag -> break reactor loop -> join manager thread").
/// Intended to be spawned on its own thread by the caller.
pub fn run_manager_loop(
    config: SupervisorConfig,
    run_flag: Arc<RunFlag>,
    events: Receiver<ReactorEvent>,
    commands: Sender<ManagerCommand>,
) {
    let discovery_spec: Option<DiscoverySpec> = match &config.address {
        CbAddress::Discover(spec) => Some(spec.clone()),
        CbAddress::Concrete(_) => None,
    };
    let mut supervisor = Supervisor::new(discovery_spec.is_some());
    let mut resolved_ip: Option<IpAddr> = match &config.address {
        CbAddress::Concrete(ip) => Some(*ip),
        CbAddress::Discover(_) => None,
    };

    while run_flag.is_running() {
        match supervisor.state() {
            SessionState::DiscoveryPending => {
                if let Some(spec) = &discovery_spec {
                    match discovery::resolve(spec, DISCOVERY_TIMEOUT) {
                        Ok(ip) => {
                            resolved_ip = Some(ip);
                            supervisor.on_discovery_resolved();
                            continue;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "discovery attempt failed, retrying");
                        }
                    }
                }
            }
            SessionState::Idle => {
                // "S1 -> S2: entered on every re-connect attempt tick"
                // (§4.7) — the tick IS the 10s wait below, not an
                // immediate transition, so a CB that never answers the
                // firmware check's ping can't spin this loop hot.
                match events.recv_timeout(MANAGER_WAIT) {
                    Ok(ReactorEvent::CbConnectivityChanged(connected)) => {
                        supervisor.on_cb_liveness_change(connected);
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        supervisor.on_reconnect_tick();
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                continue;
            }
            SessionState::FirmwareCheck => {
                let ok = run_firmware_check(&config, resolved_ip);
                supervisor.on_firmware_check_done(ok);
                if ok {
                    if let Some(ip) = resolved_ip {
                        let _ = commands.send(ManagerCommand::RegisterSubBridges { cb_ip: ip });
                    }
                }
                continue;
            }
            SessionState::Connected | SessionState::Degraded => {}
        }

        match events.recv_timeout(MANAGER_WAIT) {
            Ok(ReactorEvent::CbConnectivityChanged(connected)) => {
                let was_connected = supervisor.state() == SessionState::Connected;
                supervisor.on_cb_liveness_change(connected);
                if was_connected && supervisor.state() == SessionState::Idle {
                    let _ = commands.send(ManagerCommand::UnregisterSubBridges);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn run_firmware_check(config: &SupervisorConfig, resolved_ip: Option<IpAddr>) -> bool {
    let Some(ip) = resolved_ip else {
        return false;
    };
    let mgmt_addr = SocketAddr::new(ip, config.management_port);
    let updater = match FirmwareUpdater::connect(mgmt_addr) {
        Ok(u) => u,
        Err(e) => {
            tracing::warn!(error = %e, "firmware updater connect failed");
            return false;
        }
    };

    if !config.fw_update_on_start {
        return updater.ping_and_version().is_ok();
    }

    let Some(fw_file) = &config.fw_file else {
        return updater.ping_and_version().is_ok();
    };

    let expected = match read_version_manifest(fw_file) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "no firmware version manifest, skipping update check");
            return updater.ping_and_version().is_ok();
        }
    };

    match updater.update_if_needed(fw_file, expected) {
        Ok(UpdateOutcome::AlreadyCurrent(_)) => true,
        Ok(UpdateOutcome::Updated { from, to }) => {
            tracing::info!(?from, ?to, "firmware update completed");
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, "firmware update failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_session_starts_in_discovery_pending() {
        assert_eq!(Supervisor::new(true).state(), SessionState::DiscoveryPending);
        assert_eq!(Supervisor::new(false).state(), SessionState::Idle);
    }

    #[test]
    fn full_happy_path_transitions() {
        let mut s = Supervisor::new(true);
        s.on_discovery_resolved();
        assert_eq!(s.state(), SessionState::FirmwareCheck);
        s.on_firmware_check_done(true);
        assert_eq!(s.state(), SessionState::Connected);
    }

    #[test]
    fn firmware_failure_returns_to_idle_for_retry() {
        let mut s = Supervisor::new(false);
        s.on_reconnect_tick();
        assert_eq!(s.state(), SessionState::FirmwareCheck);
        s.on_firmware_check_done(false);
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[test]
    fn disconnect_enters_degraded_then_idle_after_two_misses() {
        let mut s = Supervisor::new(false);
        s.on_reconnect_tick();
        s.on_firmware_check_done(true);
        assert_eq!(s.state(), SessionState::Connected);

        s.on_cb_liveness_change(false);
        assert_eq!(s.state(), SessionState::Degraded);
        s.on_cb_liveness_change(false);
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[test]
    fn degraded_recovers_to_connected_on_reconnect() {
        let mut s = Supervisor::new(false);
        s.on_reconnect_tick();
        s.on_firmware_check_done(true);
        s.on_cb_liveness_change(false);
        assert_eq!(s.state(), SessionState::Degraded);
        s.on_cb_liveness_change(true);
        assert_eq!(s.state(), SessionState::Connected);
    }

    #[test]
    fn version_manifest_parses_four_part_version() {
        let dir = std::env::temp_dir();
        let fw_path = dir.join(format!("supervisor-test-fw-{:?}.bin", std::thread::current().id()));
        let manifest_path = {
            let mut p = fw_path.as_os_str().to_owned();
            p.push(".version");
            PathBuf::from(p)
        };
        std::fs::write(&manifest_path, "1.2.3.40\n").unwrap();

        let v = read_version_manifest(&fw_path).unwrap();
        assert_eq!(v, VersionInfo { major: 1, minor: 2, patch: 3, build: 40 });

        let _ = std::fs::remove_file(&manifest_path);
    }
}
