//! Over-voltage monitor translator (component J, §4.5). Smaller surface
//! than [`crate::bsp_translator`]: mutates the `ovm_*` fields of the
//! *same* host-bound `BspCommand` instance the BSP translator owns
//! (§3 invariant: "at most one BSP command value is in flight"; the
//! struct is one wire message with both BSP and OVM fields, §3) — it
//! owns none of the CP/relay/PP state and is handed the shared command
//! struct by its caller rather than keeping its own copy.

use std::time::Instant;

use protocol::bsp::CpState;
use protocol::BspCommand;

use crate::error_table::{ErrorKind, VendorSubtype};
use crate::events::{self, OutboundEvent, Severity};
use crate::liveness::Liveness;

const HOST_HEARTBEAT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OvmOperation {
    SetLimits { emergency_v: f64, error_v: f64 },
    Start,
    Stop,
    ResetOverVoltageError,
    Heartbeat(u64),
}

pub struct OvmTranslator {
    prev_emergency: bool,
    prev_error: bool,
    host_liveness: Liveness,
    last_hb_id: Option<u64>,
}

impl Default for OvmTranslator {
    fn default() -> Self {
        OvmTranslator {
            prev_emergency: false,
            prev_error: false,
            host_liveness: Liveness::new(HOST_HEARTBEAT_TIMEOUT),
            last_hb_id: None,
        }
    }
}

impl OvmTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutates `cmd`'s `ovm_*` fields in place. Returns whether the
    /// command struct changed and needs retransmission.
    pub fn apply_operation(&mut self, op: OvmOperation, now: Instant, cmd: &mut BspCommand) -> bool {
        match op {
            OvmOperation::SetLimits { emergency_v, error_v } => {
                cmd.ovm_limit_emergency_mv = (emergency_v * 1000.0).round() as u32;
                cmd.ovm_limit_error_mv = (error_v * 1000.0).round() as u32;
                true
            }
            OvmOperation::Start => {
                cmd.ovm_enable = 1;
                cmd.ovm_reset_errors = 0;
                true
            }
            OvmOperation::Stop => {
                cmd.ovm_enable = 0;
                true
            }
            OvmOperation::ResetOverVoltageError => {
                cmd.ovm_reset_errors = 1;
                true
            }
            OvmOperation::Heartbeat(id) => {
                self.on_host_heartbeat(id, now);
                false
            }
        }
    }

    fn on_host_heartbeat(&mut self, id: u64, now: Instant) {
        if let Some(last) = self.last_hb_id {
            if id <= last {
                tracing::warn!(last, id, "OVM host heartbeat id regressed, resynchronizing");
            }
        }
        self.last_hb_id = Some(id);
        self.host_liveness.observe(now);
    }

    /// Reacts to an incoming BSP status (§4.5: "converts hv_mV to volts
    /// and publishes voltage_measurement_V on every CB status").
    pub fn on_status(&mut self, status: protocol::BspStatus, dc_hv_ov_emergency: bool, dc_hv_ov_error: bool) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        events.push(OutboundEvent::VoltageMeasurementV(status.hv_mv as f64 / 1000.0));

        if dc_hv_ov_emergency && !self.prev_emergency {
            events.push(OutboundEvent::RaiseError(events::raise(
                ErrorKind::Mrec5OverVoltage,
                Some(VendorSubtype::Emergency),
                "DC high voltage emergency",
                Severity::High,
            )));
        }
        self.prev_emergency = dc_hv_ov_emergency;

        if dc_hv_ov_error && !self.prev_error {
            events.push(OutboundEvent::RaiseError(events::raise(
                ErrorKind::Mrec5OverVoltage,
                Some(VendorSubtype::Error),
                "DC high voltage error",
                Severity::Medium,
            )));
        }
        self.prev_error = dc_hv_ov_error;

        let cp = CpState::from_u8(status.cp_state).unwrap_or(CpState::Invalid);
        if cp == CpState::A {
            // ClearError never carries a subtype (see events::clear), so
            // the "clear both subtypes" ambiguity noted against the
            // original source collapses to a single clear here.
            events.push(OutboundEvent::ClearError(events::clear(ErrorKind::Mrec5OverVoltage)));
        }

        events
    }

    pub fn sync_tick(&mut self, now: Instant) -> bool {
        matches!(self.host_liveness.tick(now), Some(false))
    }

    pub fn is_host_connected(&self) -> bool {
        self.host_liveness.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::BspStatus;

    fn status(cp: CpState, hv_mv: u32) -> BspStatus {
        BspStatus {
            cp_state: cp.to_u8(),
            hv_mv,
            ..Default::default()
        }
    }

    #[test]
    fn set_limits_converts_volts_to_millivolts() {
        let mut t = OvmTranslator::new();
        let mut cmd = BspCommand::default();
        let changed = t.apply_operation(
            OvmOperation::SetLimits {
                emergency_v: 950.5,
                error_v: 800.0,
            },
            Instant::now(),
            &mut cmd,
        );
        assert!(changed);
        assert_eq!(cmd.ovm_limit_emergency_mv, 950_500);
        assert_eq!(cmd.ovm_limit_error_mv, 800_000);
        assert_eq!(cmd.ovm_enable, 0);
    }

    #[test]
    fn start_and_stop_toggle_enable() {
        let mut t = OvmTranslator::new();
        let mut cmd = BspCommand::default();
        t.apply_operation(OvmOperation::Start, Instant::now(), &mut cmd);
        assert_eq!(cmd.ovm_enable, 1);
        assert_eq!(cmd.ovm_reset_errors, 0);
        t.apply_operation(OvmOperation::Stop, Instant::now(), &mut cmd);
        assert_eq!(cmd.ovm_enable, 0);
    }

    #[test]
    fn start_and_stop_do_not_touch_bsp_fields() {
        let mut t = OvmTranslator::new();
        let mut cmd = BspCommand {
            pwm_duty_cycle: 5000,
            connector_lock: 1,
            ..Default::default()
        };
        t.apply_operation(OvmOperation::Start, Instant::now(), &mut cmd);
        assert_eq!(cmd.pwm_duty_cycle, 5000);
        assert_eq!(cmd.connector_lock, 1);
    }

    #[test]
    fn voltage_published_every_status() {
        let mut t = OvmTranslator::new();
        let events = t.on_status(status(CpState::C, 400_000), false, false);
        assert!(events.contains(&OutboundEvent::VoltageMeasurementV(400.0)));
    }

    #[test]
    fn emergency_and_error_edges_raise_distinct_severities() {
        let mut t = OvmTranslator::new();
        let events = t.on_status(status(CpState::C, 0), true, false);
        assert!(events.iter().any(|e| matches!(
            e,
            OutboundEvent::RaiseError(r) if r.severity == Severity::High
        )));

        let events = t.on_status(status(CpState::C, 0), true, true);
        assert!(!events.iter().any(|e| matches!(e, OutboundEvent::RaiseError(r) if r.severity == Severity::High)));
        assert!(events.iter().any(|e| matches!(e, OutboundEvent::RaiseError(r) if r.severity == Severity::Medium)));
    }

    #[test]
    fn cp_a_clears_over_voltage_error() {
        let mut t = OvmTranslator::new();
        t.on_status(status(CpState::C, 0), true, true);
        let events = t.on_status(status(CpState::A, 0), false, false);
        assert!(events
            .iter()
            .any(|e| matches!(e, OutboundEvent::ClearError(c) if c.kind == ErrorKind::Mrec5OverVoltage.as_str())));
    }
}
