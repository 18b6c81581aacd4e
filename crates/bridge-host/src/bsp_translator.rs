//! EVSE-BSP translator (component I, §4.4). Also doubles as the EV-BSP
//! translator (component I's structural analog): the two module kinds
//! share the exact same CB command/status struct and mapping rules per
//! §3/§4.4/§4.6 ("UDP ports" lists no separate EV BSP port), differing
//! only in which bus topic prefix they publish/subscribe under.

use std::time::{Duration, Instant};

use protocol::bsp::{pwm, CpState, PpStateType1, PpStateType2, RelayState};
use protocol::BspCommand;

use crate::error_table::{self, ErrorKind};
use crate::events::{self, Ampacity, BspEvent, Capabilities, CpBusState, OutboundEvent, RelayBusState, Severity, StopReason};
use crate::liveness::Liveness;

const HOST_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(2);
const CAPABILITIES_INTERVAL: Duration = Duration::from_secs(10);

/// Inbound bus operations for the EVSE/EV BSP module (§4.4(a), §6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BspOperation {
    Enable(bool),
    PwmOn(f64),
    CpStateX1,
    CpStateF,
    AllowPowerOn(bool),
    Lock,
    Unlock,
    Heartbeat(u64),
    /// `reset`, `self_test`, `ac_switch_three_phases_while_charging`,
    /// `evse_replug`, `ac_overcurrent_limit`: accepted, not forwarded
    /// (§4.4 "Reset handling").
    NoOp(&'static str),
}

pub struct BspTranslator {
    pub cmd: BspCommand,
    enabled: bool,
    prev_flags: u32,
    prev_cp: Option<CpState>,
    prev_pp_type1: Option<PpStateType1>,
    prev_pp_type2: Option<PpStateType2>,
    prev_stop_charging: u8,
    last_cp_event: Option<BspEvent>,
    host_liveness: Liveness,
    last_hb_id: Option<u64>,
    last_capabilities_at: Option<Instant>,
}

impl Default for BspTranslator {
    fn default() -> Self {
        BspTranslator {
            cmd: BspCommand::default(),
            enabled: false,
            prev_flags: 0,
            prev_cp: None,
            prev_pp_type1: None,
            prev_pp_type2: None,
            prev_stop_charging: 0,
            last_cp_event: None,
            host_liveness: Liveness::new(HOST_HEARTBEAT_TIMEOUT),
            last_hb_id: None,
            last_capabilities_at: None,
        }
    }
}

impl BspTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one bus operation to the command struct (§3 invariant:
    /// mutates only its own fields). Returns whether the command struct
    /// changed and therefore needs retransmission to the CB.
    pub fn apply_operation(&mut self, op: BspOperation, now: Instant) -> bool {
        match op {
            BspOperation::Enable(enable) => {
                self.enabled = enable;
                false
            }
            BspOperation::PwmOn(percent) => {
                self.cmd.pwm_duty_cycle = (percent * 100.0).round() as u32;
                true
            }
            BspOperation::CpStateX1 => {
                self.cmd.pwm_duty_cycle = pwm::DISABLED_X1;
                true
            }
            BspOperation::CpStateF => {
                self.cmd.pwm_duty_cycle = pwm::FORCE_F;
                true
            }
            BspOperation::AllowPowerOn(allow) => {
                self.cmd.allow_power_on = allow as u8;
                true
            }
            BspOperation::Lock => {
                self.cmd.connector_lock = 1;
                true
            }
            BspOperation::Unlock => {
                self.cmd.connector_lock = 0;
                true
            }
            BspOperation::Heartbeat(id) => {
                self.on_host_heartbeat(id, now);
                false
            }
            BspOperation::NoOp(name) => {
                tracing::debug!(operation = name, "accepted no-op BSP operation");
                false
            }
        }
    }

    fn on_host_heartbeat(&mut self, id: u64, now: Instant) {
        if let Some(last) = self.last_hb_id {
            if id <= last {
                tracing::warn!(last, id, "host heartbeat id regressed, resynchronizing");
            } else if id > last + 1 {
                tracing::warn!(last, id, "host heartbeat id gap, resynchronizing");
            }
        }
        self.last_hb_id = Some(id);
        self.host_liveness.observe(now);
    }

    /// Diffs an incoming CB status against the previously observed one
    /// and emits bus events (§4.4(b)).
    pub fn on_status(&mut self, status: protocol::BspStatus) -> Vec<OutboundEvent> {
        let mut events = Vec::new();

        let (raises, clears) = error_table::diff(self.prev_flags, status.error_flags);
        for r in raises {
            events.push(OutboundEvent::RaiseError(events::raise(r.kind, r.subtype, r.message, Severity::Medium)));
        }
        for c in clears {
            events.push(OutboundEvent::ClearError(events::clear(c.kind)));
        }
        for warning in error_table::active_warnings(status.error_flags) {
            tracing::warn!(flag = warning, "CB warning flag active");
        }
        self.prev_flags = status.error_flags;

        if status.stop_charging != self.prev_stop_charging {
            events.push(OutboundEvent::RequestStopTransaction(StopReason::Local));
        }
        self.prev_stop_charging = status.stop_charging;

        if self.enabled {
            self.emit_cp_and_relay(status, &mut events);
            self.emit_proximity_pilot(status, &mut events);
        }

        events
    }

    fn emit_cp_and_relay(&mut self, status: protocol::BspStatus, events: &mut Vec<OutboundEvent>) {
        let cp = CpState::from_u8(status.cp_state).unwrap_or(CpState::Invalid);
        let bus_cp = match cp {
            CpState::A => CpBusState::A,
            CpState::B => CpBusState::B,
            CpState::C => CpBusState::C,
            CpState::D => CpBusState::D,
            CpState::E => CpBusState::E,
            CpState::F => CpBusState::F,
            CpState::Df | CpState::Invalid => CpBusState::E,
        };

        let entering = self.prev_cp != Some(cp);
        if entering {
            match cp {
                CpState::Df => {
                    events.push(OutboundEvent::RaiseError(events::raise(
                        ErrorKind::DiodeFault,
                        None,
                        "Diode Fault",
                        Severity::Medium,
                    )));
                }
                CpState::Invalid => {
                    events.push(OutboundEvent::RaiseError(events::raise(
                        ErrorKind::Mrec14PilotFault,
                        None,
                        "",
                        Severity::Medium,
                    )));
                }
                CpState::A => {
                    events.push(OutboundEvent::ClearError(events::clear(ErrorKind::Mrec14PilotFault)));
                    events.push(OutboundEvent::ClearError(events::clear(ErrorKind::DiodeFault)));
                }
                _ => {}
            }
        }
        self.prev_cp = Some(cp);

        let cp_event = BspEvent::Cp(bus_cp);
        events.push(OutboundEvent::Event(cp_event));
        self.last_cp_event = Some(cp_event);

        if let Ok(relay) = RelayState::from_u8(status.relay_state) {
            let bus_relay = match relay {
                RelayState::Open => RelayBusState::PowerOff,
                RelayState::Closed => RelayBusState::PowerOn,
            };
            events.push(OutboundEvent::Event(BspEvent::Relay(bus_relay)));
        }
    }

    fn emit_proximity_pilot(&mut self, status: protocol::BspStatus, events: &mut Vec<OutboundEvent>) {
        if let Ok(t2) = PpStateType2::from_u8(status.pp_state_type2) {
            let entering = self.prev_pp_type2 != Some(t2);
            match t2 {
                PpStateType2::Fault => {
                    if entering {
                        events.push(OutboundEvent::RaiseError(events::raise(
                            ErrorKind::Mrec23ProximityFault,
                            None,
                            "PP invalid",
                            Severity::Medium,
                        )));
                    }
                }
                other => {
                    if self.prev_pp_type2 == Some(PpStateType2::Fault) {
                        events.push(OutboundEvent::ClearError(events::clear(ErrorKind::Mrec23ProximityFault)));
                    }
                    let ampacity = match other {
                        PpStateType2::NotConnected => Ampacity::None,
                        PpStateType2::Amps13 => Ampacity::Amps13,
                        PpStateType2::Amps20 => Ampacity::Amps20,
                        PpStateType2::Amps32 => Ampacity::Amps32,
                        PpStateType2::Amps70 => Ampacity::Amps63ThreePhase70OnePhase,
                        PpStateType2::Fault => unreachable!(),
                    };
                    events.push(OutboundEvent::AcPpAmpacity(ampacity));
                }
            }
            self.prev_pp_type2 = Some(t2);
        }

        if let Ok(t1) = PpStateType1::from_u8(status.pp_state_type1) {
            if t1 == PpStateType1::ConnectedButtonPressed && self.prev_pp_type1 != Some(t1) {
                events.push(OutboundEvent::RequestStopTransaction(StopReason::EvDisconnected));
            }
            self.prev_pp_type1 = Some(t1);
        }
    }

    /// 1s sync tick (§4.4 host-liveness rules, §2 "1s sync timer").
    /// Returns the events to publish and whether the command struct was
    /// mutated (fail-safe on disconnect) and needs retransmission.
    pub fn sync_tick(&mut self, now: Instant) -> (Vec<OutboundEvent>, bool) {
        let mut events = Vec::new();
        let mut retransmit = false;

        match self.host_liveness.tick(now) {
            Some(true) => {
                events.push(OutboundEvent::Capabilities(Capabilities {
                    supports_lock: true,
                    supports_ovm: true,
                }));
                self.last_capabilities_at = Some(now);
                if let Some(cp) = self.last_cp_event {
                    events.push(OutboundEvent::Event(cp));
                }
            }
            Some(false) => {
                self.cmd.allow_power_on = 0;
                self.cmd.pwm_duty_cycle = pwm::FAIL_SAFE;
                retransmit = true;
            }
            None => {}
        }

        events.push(OutboundEvent::CommunicationCheck(true));

        let due = match self.last_capabilities_at {
            Some(t) => now.saturating_duration_since(t) >= CAPABILITIES_INTERVAL,
            None => true,
        };
        if due {
            events.push(OutboundEvent::Capabilities(Capabilities {
                supports_lock: true,
                supports_ovm: true,
            }));
            self.last_capabilities_at = Some(now);
        }

        (events, retransmit)
    }

    pub fn is_host_connected(&self) -> bool {
        self.host_liveness.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::BspStatus;

    fn status(cp: CpState, error_flags: u32) -> BspStatus {
        BspStatus {
            cp_state: cp.to_u8(),
            error_flags,
            ..Default::default()
        }
    }

    #[test]
    fn cp_a_b_c_emits_events_and_clears_on_a() {
        let mut t = BspTranslator::new();
        t.apply_operation(BspOperation::Enable(true), Instant::now());

        let events = t.on_status(status(CpState::A, 0));
        assert!(events.contains(&OutboundEvent::Event(BspEvent::Cp(CpBusState::A))));
        assert!(events.contains(&OutboundEvent::ClearError(events::clear(ErrorKind::Mrec14PilotFault))));
        assert!(events.contains(&OutboundEvent::ClearError(events::clear(ErrorKind::DiodeFault))));

        let events = t.on_status(status(CpState::B, 0));
        assert!(events.contains(&OutboundEvent::Event(BspEvent::Cp(CpBusState::B))));

        let events = t.on_status(status(CpState::C, 0));
        assert!(events.contains(&OutboundEvent::Event(BspEvent::Cp(CpBusState::C))));
    }

    #[test]
    fn diode_fault_then_recovery() {
        let mut t = BspTranslator::new();
        t.apply_operation(BspOperation::Enable(true), Instant::now());

        let events = t.on_status(status(CpState::Df, 0));
        assert!(events.contains(&OutboundEvent::Event(BspEvent::Cp(CpBusState::E))));
        assert!(events.contains(&OutboundEvent::RaiseError(events::raise(
            ErrorKind::DiodeFault,
            None,
            "Diode Fault",
            Severity::Medium
        ))));

        let events = t.on_status(status(CpState::A, 0));
        assert!(events.contains(&OutboundEvent::Event(BspEvent::Cp(CpBusState::A))));
        assert!(events.contains(&OutboundEvent::ClearError(events::clear(ErrorKind::Mrec14PilotFault))));
        assert!(events.contains(&OutboundEvent::ClearError(events::clear(ErrorKind::DiodeFault))));
    }

    #[test]
    fn pp_invalid_edge_driven_error_table() {
        let mut t = BspTranslator::new();
        t.apply_operation(BspOperation::Enable(true), Instant::now());

        use protocol::bsp::SafetyFlag;
        let events = t.on_status(status(CpState::C, SafetyFlag::PpInvalid.bit()));
        let raises: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, OutboundEvent::RaiseError(r) if r.kind == ErrorKind::Mrec23ProximityFault.as_str()))
            .collect();
        assert_eq!(raises.len(), 1);

        let events = t.on_status(status(CpState::C, 0));
        let clears: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, OutboundEvent::ClearError(c) if c.kind == ErrorKind::Mrec23ProximityFault.as_str()))
            .collect();
        assert_eq!(clears.len(), 1);
    }

    #[test]
    fn pwm_on_rounds_to_hundredths_of_a_percent() {
        let mut t = BspTranslator::new();
        t.apply_operation(BspOperation::PwmOn(50.0), Instant::now());
        assert_eq!(t.cmd.pwm_duty_cycle, 5000);
    }

    #[test]
    fn cp_state_x1_and_f_set_sentinel_values() {
        let mut t = BspTranslator::new();
        t.apply_operation(BspOperation::CpStateX1, Instant::now());
        assert_eq!(t.cmd.pwm_duty_cycle, pwm::DISABLED_X1);
        t.apply_operation(BspOperation::CpStateF, Instant::now());
        assert_eq!(t.cmd.pwm_duty_cycle, pwm::FORCE_F);
    }

    #[test]
    fn disabled_state_suppresses_cp_and_relay_events_but_not_errors() {
        let mut t = BspTranslator::new();
        // enabled defaults to false
        use protocol::bsp::SafetyFlag;
        let events = t.on_status(status(CpState::A, SafetyFlag::PpInvalid.bit()));
        assert!(!events.iter().any(|e| matches!(e, OutboundEvent::Event(_))));
        assert!(events.iter().any(|e| matches!(e, OutboundEvent::RaiseError(_))));
    }

    #[test]
    fn host_disconnect_forces_fail_safe_command() {
        let mut t = BspTranslator::new();
        let t0 = Instant::now();
        t.apply_operation(BspOperation::AllowPowerOn(true), t0);
        t.apply_operation(BspOperation::Heartbeat(1), t0);

        let (events, retransmit) = t.sync_tick(t0);
        assert!(!retransmit); // first tick is a connect edge, not a fail-safe mutation
        assert!(t.is_host_connected());
        assert_eq!(t.cmd.allow_power_on, 1);
        assert!(events.iter().any(|e| matches!(e, OutboundEvent::Capabilities(_))));

        let (events, retransmit) = t.sync_tick(t0 + Duration::from_secs(3));
        assert!(retransmit);
        assert!(!t.is_host_connected());
        assert_eq!(t.cmd.allow_power_on, 0);
        assert_eq!(t.cmd.pwm_duty_cycle, pwm::FAIL_SAFE);
        assert!(events.iter().any(|e| matches!(e, OutboundEvent::CommunicationCheck(true))));
    }

    #[test]
    fn host_heartbeat_never_seen_raises_disconnect_on_first_tick() {
        let mut t = BspTranslator::new();
        let (_events, retransmit) = t.sync_tick(Instant::now());
        assert!(retransmit);
        assert_eq!(t.cmd.allow_power_on, 0);
    }

    #[test]
    fn stop_charging_edge_requests_local_stop_regardless_of_enabled() {
        let mut t = BspTranslator::new();

        let mut first = status(CpState::B, 0);
        first.stop_charging = 0;
        let events = t.on_status(first);
        assert!(!events
            .iter()
            .any(|e| matches!(e, OutboundEvent::RequestStopTransaction(_))));

        let mut pressed = status(CpState::B, 0);
        pressed.stop_charging = 1;
        let events = t.on_status(pressed);
        assert!(events
            .contains(&OutboundEvent::RequestStopTransaction(StopReason::Local)));

        let events = t.on_status(pressed);
        assert!(!events
            .iter()
            .any(|e| matches!(e, OutboundEvent::RequestStopTransaction(_))));
    }
}
