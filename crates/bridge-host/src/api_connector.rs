//! API connector (component K, §4.6). Owns one bus client, one UDP
//! endpoint to the CB's BSP port, and the EVSE/EV-BSP and OVM
//! translators. A 1s sync timer drives both translators' host-liveness
//! supervisors and the CB-liveness supervisor below.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use bus::{BusClient, ModuleKind};
use protocol::bsp::SafetyFlag;
use protocol::codec::{decode, encode, Frame};
use protocol::BspStatus;
use reactor::{Reactor, TimerSource, UdpEndpoint};

use crate::bsp_translator::{BspOperation, BspTranslator};
use crate::error::BridgeError;
use crate::error_table::ErrorKind;
use crate::events::{self, OutboundEvent, Severity};
use crate::liveness::Liveness;
use crate::ovm_translator::{OvmOperation, OvmTranslator};

const SYNC_INTERVAL: Duration = Duration::from_secs(1);
const CB_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(2);
const CB_UNAVAILABLE_MESSAGE: &str = "ChargeBridge not available";

/// Which module (§4.6 "EVSE xor EV") this connector is publishing its
/// BSP topic segment under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BspModuleKind {
    Evse,
    Ev,
}

impl BspModuleKind {
    fn to_bus_kind(self) -> ModuleKind {
        match self {
            BspModuleKind::Evse => ModuleKind::EvseBoardSupport,
            BspModuleKind::Ev => ModuleKind::EvBoardSupport,
        }
    }
}

struct Inner {
    bsp: BspTranslator,
    ovm: Option<OvmTranslator>,
    cb_liveness: Liveness,
    module_id: String,
    bsp_kind: ModuleKind,
}

impl Inner {
    fn handle_status(&mut self, status: BspStatus) -> Vec<OutboundEvent> {
        let mut events = self.bsp.on_status(status);
        if let Some(ovm) = self.ovm.as_mut() {
            let emergency = SafetyFlag::DcHvOvEmergency.is_set(status.error_flags);
            let error = SafetyFlag::DcHvOvError.is_set(status.error_flags);
            events.extend(ovm.on_status(status, emergency, error));
        }
        events
    }
}

/// Keepalive handle: dropping it tears down the socket and timer
/// (§4.7 sub-bridge lifecycle), and is also the seam through which the
/// reactor's bus-readiness callback forwards inbound operations.
pub struct ApiConnectorHandle {
    endpoint: Rc<UdpEndpoint>,
    _timer: TimerSource,
    inner: Rc<RefCell<Inner>>,
}

impl ApiConnectorHandle {
    pub fn is_cb_connected(&self) -> bool {
        self.inner.borrow().cb_liveness.is_connected()
    }

    /// Dispatches one inbound bus message to whichever translator's
    /// topic prefix it matches, retransmitting the (shared) command
    /// struct to the CB if it changed.
    pub fn dispatch_inbound(&self, topic: &str, payload: &[u8]) {
        let mut inner = self.inner.borrow_mut();
        let module_id = inner.module_id.clone();
        let bsp_kind = inner.bsp_kind;
        let now = Instant::now();
        let mut retransmit = false;

        if let Some(name) = bus::operation_name(topic, &module_id, bsp_kind) {
            if let Some(op) = parse_bsp_operation(name, payload) {
                retransmit |= inner.bsp.apply_operation(op, now);
            }
        } else if let Some(name) = bus::operation_name(topic, &module_id, ModuleKind::OverVoltageMonitor) {
            if let Some(op) = parse_ovm_operation(name, payload) {
                // OVM operations mutate the `ovm_*` fields of the same
                // shared command struct the BSP translator owns (§3: one
                // BSP command value in flight at a time).
                let Inner { bsp, ovm, .. } = &mut *inner;
                if let Some(ovm) = ovm.as_mut() {
                    retransmit |= ovm.apply_operation(op, now, &mut bsp.cmd);
                }
            }
        }

        if retransmit {
            if let Ok(bytes) = encode(&inner.bsp.cmd) {
                if let Err(e) = self.endpoint.tx(&bytes) {
                    tracing::warn!(error = %e, "BSP command retransmit failed");
                }
            }
        }
    }
}

pub struct ApiConnector {
    endpoint: Rc<UdpEndpoint>,
    timer: TimerSource,
    inner: Rc<RefCell<Inner>>,
}

impl ApiConnector {
    /// Raw fds this connector will register once [`Self::register`] is
    /// called, so a caller that later tears the session down can
    /// explicitly `unregister` them rather than leaving a stale entry
    /// behind in the reactor's registration table.
    pub fn raw_fds(&self) -> [std::os::fd::RawFd; 2] {
        [self.endpoint.as_raw_fd(), self.timer.as_raw_fd()]
    }

    pub fn new(
        module_id: &str,
        bsp_module: BspModuleKind,
        ovm_enabled: bool,
        remote: SocketAddr,
        bind: SocketAddr,
    ) -> Result<Self, BridgeError> {
        let endpoint = Rc::new(UdpEndpoint::open_client(remote, bind)?);
        let timer = TimerSource::new()?;
        timer.set_periodic(SYNC_INTERVAL)?;
        let inner = Rc::new(RefCell::new(Inner {
            bsp: BspTranslator::new(),
            ovm: ovm_enabled.then(OvmTranslator::new),
            cb_liveness: Liveness::new(CB_HEARTBEAT_TIMEOUT),
            module_id: module_id.to_string(),
            bsp_kind: bsp_module.to_bus_kind(),
        }));
        Ok(ApiConnector { endpoint, timer, inner })
    }

    /// Registers the UDP endpoint (status -> translators -> bus), the
    /// sync timer (liveness ticks -> bus), and the bus subscriptions
    /// for both modules' inbound operations. The caller is responsible
    /// for routing bus readiness into [`ApiConnectorHandle::dispatch_inbound`].
    pub fn register(self, reactor: &mut Reactor, bus: Rc<RefCell<BusClient>>) -> Result<ApiConnectorHandle, BridgeError> {
        let (module_id, bsp_kind, ovm_present) = {
            let inner = self.inner.borrow();
            (inner.module_id.clone(), inner.bsp_kind, inner.ovm.is_some())
        };

        bus.borrow_mut().subscribe(&bus::subscribe_filter(&module_id, bsp_kind))?;
        if ovm_present {
            bus.borrow_mut().subscribe(&bus::subscribe_filter(&module_id, ModuleKind::OverVoltageMonitor))?;
        }

        let inner_for_frame = Rc::clone(&self.inner);
        let bus_for_frame = Rc::clone(&bus);
        self.endpoint.register(reactor, move |frame| {
            if let Ok(Frame::EvseBspStatus(status)) = decode(frame) {
                let (events, module_id, bsp_kind) = {
                    let mut inner = inner_for_frame.borrow_mut();
                    inner.cb_liveness.observe(Instant::now());
                    let events = inner.handle_status(status);
                    (events, inner.module_id.clone(), inner.bsp_kind)
                };
                publish_events(&bus_for_frame.borrow(), &module_id, bsp_kind, &events);
            }
        })?;

        let endpoint_for_timer = Rc::clone(&self.endpoint);
        let inner_for_timer = Rc::clone(&self.inner);
        let bus_for_timer = Rc::clone(&bus);
        let timer = self.timer.register(reactor, move || {
            let now = Instant::now();
            let (module_id, bsp_kind, bsp_events, bsp_retransmit, cb_edge, ovm_disconnect) = {
                let mut inner = inner_for_timer.borrow_mut();
                let (bsp_events, bsp_retransmit) = inner.bsp.sync_tick(now);
                let ovm_disconnect = inner.ovm.as_mut().map(|o| o.sync_tick(now)).unwrap_or(false);
                let cb_edge = inner.cb_liveness.tick(now);
                (inner.module_id.clone(), inner.bsp_kind, bsp_events, bsp_retransmit, cb_edge, ovm_disconnect)
            };

            let bus_ref = bus_for_timer.borrow();
            publish_events(&bus_ref, &module_id, bsp_kind, &bsp_events);

            if let Some(edge) = cb_edge {
                let event = if edge {
                    OutboundEvent::ClearError(events::clear(ErrorKind::CommunicationFault))
                } else {
                    OutboundEvent::RaiseError(events::raise(
                        ErrorKind::CommunicationFault,
                        None,
                        CB_UNAVAILABLE_MESSAGE,
                        Severity::High,
                    ))
                };
                publish_one(&bus_ref, &module_id, bsp_kind, &event);
            }

            if ovm_disconnect {
                tracing::debug!(module_id = %module_id, "OVM host-liveness disconnect edge");
            }

            if bsp_retransmit {
                let inner = inner_for_timer.borrow();
                if let Ok(bytes) = encode(&inner.bsp.cmd) {
                    if let Err(e) = endpoint_for_timer.tx(&bytes) {
                        tracing::warn!(error = %e, "BSP fail-safe retransmit failed");
                    }
                }
            }
        })?;

        Ok(ApiConnectorHandle {
            endpoint: self.endpoint,
            _timer: timer,
            inner: self.inner,
        })
    }
}

fn publish_events(bus: &BusClient, module_id: &str, kind: ModuleKind, events: &[OutboundEvent]) {
    for event in events {
        publish_one(bus, module_id, kind, event);
    }
}

fn publish_one(bus: &BusClient, module_id: &str, kind: ModuleKind, event: &OutboundEvent) {
    let topic = bus::publish_topic(module_id, kind, event.topic_name());
    if let Err(e) = bus.publish(&topic, event) {
        tracing::warn!(error = %e, topic = %topic, "failed to publish BSP/OVM event");
    }
}

fn parse_bsp_operation(name: &str, payload: &[u8]) -> Option<BspOperation> {
    #[derive(serde::Deserialize)]
    struct BoolArg {
        value: bool,
    }
    #[derive(serde::Deserialize)]
    struct PercentArg {
        percent: f64,
    }
    #[derive(serde::Deserialize)]
    struct HeartbeatArg {
        id: u64,
    }

    let parse_bool = || serde_json::from_slice::<BoolArg>(payload).ok().map(|a| a.value);

    match name {
        "enable" => parse_bool().map(BspOperation::Enable),
        "pwm_on" => serde_json::from_slice::<PercentArg>(payload).ok().map(|a| BspOperation::PwmOn(a.percent)),
        "cp_state_x1" => Some(BspOperation::CpStateX1),
        "cp_state_f" => Some(BspOperation::CpStateF),
        "allow_power_on" => parse_bool().map(BspOperation::AllowPowerOn),
        "lock" => Some(BspOperation::Lock),
        "unlock" => Some(BspOperation::Unlock),
        "heartbeat" => serde_json::from_slice::<HeartbeatArg>(payload).ok().map(|a| BspOperation::Heartbeat(a.id)),
        "reset" => Some(BspOperation::NoOp("reset")),
        "self_test" => Some(BspOperation::NoOp("self_test")),
        "ac_switch_three_phases_while_charging" => Some(BspOperation::NoOp("ac_switch_three_phases_while_charging")),
        "evse_replug" => Some(BspOperation::NoOp("evse_replug")),
        "ac_overcurrent_limit" => Some(BspOperation::NoOp("ac_overcurrent_limit")),
        _ => None,
    }
}

fn parse_ovm_operation(name: &str, payload: &[u8]) -> Option<OvmOperation> {
    #[derive(serde::Deserialize)]
    struct LimitsArg {
        emergency_v: f64,
        error_v: f64,
    }
    #[derive(serde::Deserialize)]
    struct HeartbeatArg {
        id: u64,
    }

    match name {
        "set_limits" => serde_json::from_slice::<LimitsArg>(payload)
            .ok()
            .map(|a| OvmOperation::SetLimits { emergency_v: a.emergency_v, error_v: a.error_v }),
        "start" => Some(OvmOperation::Start),
        "stop" => Some(OvmOperation::Stop),
        "reset_over_voltage_error" => Some(OvmOperation::ResetOverVoltageError),
        "heartbeat" => serde_json::from_slice::<HeartbeatArg>(payload).ok().map(|a| OvmOperation::Heartbeat(a.id)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_bsp_operations() {
        assert!(matches!(
            parse_bsp_operation("enable", br#"{"value":true}"#),
            Some(BspOperation::Enable(true))
        ));
        assert!(matches!(parse_bsp_operation("cp_state_x1", b""), Some(BspOperation::CpStateX1)));
        assert!(matches!(parse_bsp_operation("reset", b""), Some(BspOperation::NoOp("reset"))));
        assert!(parse_bsp_operation("unknown_op", b"").is_none());
    }

    #[test]
    fn parses_known_ovm_operations() {
        let op = parse_ovm_operation("set_limits", br#"{"emergency_v":950.0,"error_v":800.0}"#);
        assert!(matches!(op, Some(OvmOperation::SetLimits { .. })));
        assert!(matches!(parse_ovm_operation("start", b""), Some(OvmOperation::Start)));
        assert!(parse_ovm_operation("unknown_op", b"").is_none());
    }
}
