//! Outbound bus event/telemetry shapes (§6) shared by the EVSE-BSP and
//! OVM translators. Both translators speak the same small event
//! vocabulary; a translator simply never emits the variants that don't
//! apply to it (e.g. OVM never emits `Cp`/`Relay`).

use serde::Serialize;

use crate::error_table::{ErrorKind, VendorSubtype};

/// Bus-facing control-pilot state (§4.4: CB `DF`/`INVALID` both fold
/// into bus `E`, with a distinct error raised for each).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CpBusState {
    A,
    B,
    C,
    D,
    E,
    F,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayBusState {
    PowerOff,
    PowerOn,
}

/// Published under the shared "event" topic (§6); a tagged union since
/// CP-state and relay-state changes share one topic name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum BspEvent {
    Cp(CpBusState),
    Relay(RelayBusState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Ampacity {
    None,
    Amps13,
    Amps20,
    Amps32,
    Amps63ThreePhase70OnePhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    EvDisconnected,
    /// A physical stop button wired to the CB's `stop_charging` status
    /// byte was pressed (§3 data model lists the field; original_source/
    /// ties any change of it to a local stop request).
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    High,
    Medium,
    Low,
}

/// `raise_error` publish payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RaiseError {
    pub kind: &'static str,
    pub subtype: String,
    pub message: String,
    pub severity: Severity,
}

/// `clear_error` publish payload. Always carries empty subtype/message
/// regardless of what the matching raise carried (§8 scenarios 1-3).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClearError {
    pub kind: &'static str,
    pub subtype: String,
    pub message: String,
}

pub fn raise(
    kind: ErrorKind,
    subtype: Option<VendorSubtype>,
    message: impl Into<String>,
    severity: Severity,
) -> RaiseError {
    RaiseError {
        kind: kind.as_str(),
        subtype: subtype.map(VendorSubtype::as_str).unwrap_or("").to_string(),
        message: message.into(),
        severity,
    }
}

pub fn clear(kind: ErrorKind) -> ClearError {
    ClearError {
        kind: kind.as_str(),
        subtype: String::new(),
        message: String::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct Capabilities {
    pub supports_lock: bool,
    pub supports_ovm: bool,
}

/// Every outbound publication a translator can produce, paired with
/// the topic suffix it is published under (§6 "Outbound BSP
/// events/telemetry" / "OVM Outbound").
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundEvent {
    Event(BspEvent),
    /// Declared per §6 but never driven: the only operation that would
    /// logically produce it (`ac_switch_three_phases_while_charging`)
    /// is specified as a no-op in this revision (§4.4 "Reset handling").
    AcNrOfPhases(u8),
    Capabilities(Capabilities),
    AcPpAmpacity(Ampacity),
    RequestStopTransaction(StopReason),
    RaiseError(RaiseError),
    ClearError(ClearError),
    CommunicationCheck(bool),
    VoltageMeasurementV(f64),
}

impl OutboundEvent {
    /// The bus topic suffix this event publishes under (§6).
    pub const fn topic_name(&self) -> &'static str {
        match self {
            OutboundEvent::Event(_) => "event",
            OutboundEvent::AcNrOfPhases(_) => "ac_nr_of_phases",
            OutboundEvent::Capabilities(_) => "capabilities",
            OutboundEvent::AcPpAmpacity(_) => "ac_pp_ampacity",
            OutboundEvent::RequestStopTransaction(_) => "request_stop_transaction",
            OutboundEvent::RaiseError(_) => "raise_error",
            OutboundEvent::ClearError(_) => "clear_error",
            OutboundEvent::CommunicationCheck(_) => "communication_check",
            OutboundEvent::VoltageMeasurementV(_) => "voltage_measurement_V",
        }
    }
}
