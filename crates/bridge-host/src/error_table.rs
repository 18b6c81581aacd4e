//! Pure edge-triggered mapping from the CB's safety flag bitfield to
//! bus error raises/clears (§4.4 "Error table", §9 design note: "model
//! this as ... a pure function `(prev_flags, next_flags) -> (raises,
//! clears)`"). No I/O; fully unit-testable.

use protocol::bsp::SafetyFlag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Mrec14PilotFault,
    Mrec19CableOverTempStop,
    Mrec23ProximityFault,
    Mrec5OverVoltage,
    DiodeFault,
    CommunicationFault,
    VendorError,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Mrec14PilotFault => "MREC14PilotFault",
            ErrorKind::Mrec19CableOverTempStop => "MREC19CableOverTempStop",
            ErrorKind::Mrec23ProximityFault => "MREC23ProximityFault",
            ErrorKind::Mrec5OverVoltage => "MREC5OverVoltage",
            ErrorKind::DiodeFault => "DiodeFault",
            ErrorKind::CommunicationFault => "CommunicationFault",
            ErrorKind::VendorError => "VendorError",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorSubtype {
    IntTemp,
    EmgInput,
    Relays,
    V3v3,
    VddCore,
    Vcc12,
    VccN12,
    VccRef,
    ConfigMem,
    DvHv,
    Emergency,
    Error,
}

impl VendorSubtype {
    pub const fn as_str(self) -> &'static str {
        match self {
            VendorSubtype::IntTemp => "INTTEMP",
            VendorSubtype::EmgInput => "EMGINPUT",
            VendorSubtype::Relays => "RELAYS",
            VendorSubtype::V3v3 => "3V3",
            VendorSubtype::VddCore => "VDDCORE",
            VendorSubtype::Vcc12 => "VCC12",
            VendorSubtype::VccN12 => "VCCN12",
            VendorSubtype::VccRef => "VCCREF",
            VendorSubtype::ConfigMem => "CONFIGMEM",
            VendorSubtype::DvHv => "DV_HV",
            VendorSubtype::Emergency => "Emergency",
            VendorSubtype::Error => "Error",
        }
    }
}

struct TableEntry {
    flag: SafetyFlag,
    kind: ErrorKind,
    subtype: Option<VendorSubtype>,
    message: &'static str,
}

/// One entry per safety flag that participates in the error table
/// (§4.4); `cp_not_state_c`, `pwm_not_enabled`, `external_allow_power_on`
/// are deliberately absent here — they are warning-only and handled by
/// [`active_warnings`].
///
/// `dc_hv_ov_emergency` and `dc_hv_ov_error` both map to the same
/// vendor subtype `DV_HV` for backward compatibility (§9 open
/// question); they are tracked as two independent bits here, each with
/// its own edge, since that is how the CB reports them.
const TABLE: &[TableEntry] = &[
    TableEntry {
        flag: SafetyFlag::PpInvalid,
        kind: ErrorKind::Mrec23ProximityFault,
        subtype: None,
        message: "PP invalid",
    },
    TableEntry {
        flag: SafetyFlag::PlugTemperatureTooHigh,
        kind: ErrorKind::Mrec19CableOverTempStop,
        subtype: None,
        message: "Plug temperature too high",
    },
    TableEntry {
        flag: SafetyFlag::InternalTemperatureTooHigh,
        kind: ErrorKind::VendorError,
        subtype: Some(VendorSubtype::IntTemp),
        message: "ChargeBridge internal over temperature",
    },
    TableEntry {
        flag: SafetyFlag::EmergencyInputLatched,
        kind: ErrorKind::VendorError,
        subtype: Some(VendorSubtype::EmgInput),
        message: "Emergency input latched",
    },
    TableEntry {
        flag: SafetyFlag::RelayHealthLatched,
        kind: ErrorKind::VendorError,
        subtype: Some(VendorSubtype::Relays),
        message: "Relay welded error",
    },
    TableEntry {
        flag: SafetyFlag::Vdd3v3OutOfRange,
        kind: ErrorKind::VendorError,
        subtype: Some(VendorSubtype::V3v3),
        message: "3.3V supply out of range",
    },
    TableEntry {
        flag: SafetyFlag::VddCoreOutOfRange,
        kind: ErrorKind::VendorError,
        subtype: Some(VendorSubtype::VddCore),
        message: "Core supply out of range",
    },
    TableEntry {
        flag: SafetyFlag::Vdd12vOutOfRange,
        kind: ErrorKind::VendorError,
        subtype: Some(VendorSubtype::Vcc12),
        message: "12V supply out of range",
    },
    TableEntry {
        flag: SafetyFlag::VddN12vOutOfRange,
        kind: ErrorKind::VendorError,
        subtype: Some(VendorSubtype::VccN12),
        message: "-12V supply out of range",
    },
    TableEntry {
        flag: SafetyFlag::VddRefintOutOfRange,
        kind: ErrorKind::VendorError,
        subtype: Some(VendorSubtype::VccRef),
        message: "Reference voltage out of range",
    },
    TableEntry {
        flag: SafetyFlag::ConfigMemError,
        kind: ErrorKind::VendorError,
        subtype: Some(VendorSubtype::ConfigMem),
        message: "Configuration memory error",
    },
    TableEntry {
        flag: SafetyFlag::DcHvOvEmergency,
        kind: ErrorKind::VendorError,
        subtype: Some(VendorSubtype::DvHv),
        message: "DC high-voltage emergency (compatibility shim, see OVM)",
    },
    TableEntry {
        flag: SafetyFlag::DcHvOvError,
        kind: ErrorKind::VendorError,
        subtype: Some(VendorSubtype::DvHv),
        message: "DC high-voltage error (compatibility shim, see OVM)",
    },
];

/// The three warning-only flags (§4.4): "printed while active, never
/// raised as errors".
const WARNINGS: &[(SafetyFlag, &str)] = &[
    (SafetyFlag::CpNotStateC, "cp_not_state_c"),
    (SafetyFlag::PwmNotEnabled, "pwm_not_enabled"),
    (SafetyFlag::ExternalAllowPowerOn, "external_allow_power_on"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Raise {
    pub kind: ErrorKind,
    pub subtype: Option<VendorSubtype>,
    pub message: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clear {
    pub kind: ErrorKind,
}

/// `active = next & !prev`, `inactive = prev & !next` (§4.4); for every
/// table entry whose flag transitioned 0->1 emit a [`Raise`], 1->0 emit
/// a [`Clear`]. Order follows [`TABLE`] declaration order.
pub fn diff(prev_flags: u32, next_flags: u32) -> (Vec<Raise>, Vec<Clear>) {
    let mut raises = Vec::new();
    let mut clears = Vec::new();
    for entry in TABLE {
        let was = entry.flag.is_set(prev_flags);
        let now = entry.flag.is_set(next_flags);
        if !was && now {
            raises.push(Raise {
                kind: entry.kind,
                subtype: entry.subtype,
                message: entry.message,
            });
        } else if was && !now {
            clears.push(Clear { kind: entry.kind });
        }
    }
    (raises, clears)
}

/// Names of every warning flag currently set in `flags`, recomputed
/// fresh each status (not edge-triggered, §4.4).
pub fn active_warnings(flags: u32) -> Vec<&'static str> {
    WARNINGS
        .iter()
        .filter(|(flag, _)| flag.is_set(flags))
        .map(|(_, name)| *name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pp_invalid_raises_then_clears() {
        let (raises, clears) = diff(0, SafetyFlag::PpInvalid.bit());
        assert_eq!(raises.len(), 1);
        assert_eq!(raises[0].kind, ErrorKind::Mrec23ProximityFault);
        assert_eq!(raises[0].message, "PP invalid");
        assert!(clears.is_empty());

        let (raises, clears) = diff(SafetyFlag::PpInvalid.bit(), 0);
        assert!(raises.is_empty());
        assert_eq!(clears.len(), 1);
        assert_eq!(clears[0].kind, ErrorKind::Mrec23ProximityFault);
    }

    #[test]
    fn unchanged_flags_emit_nothing() {
        let flags = SafetyFlag::PpInvalid.bit() | SafetyFlag::RelayHealthLatched.bit();
        let (raises, clears) = diff(flags, flags);
        assert!(raises.is_empty() && clears.is_empty());
    }

    #[test]
    fn reserved_bits_are_ignored() {
        let reserved_bit = 1u32 << 20;
        let (raises, clears) = diff(0, reserved_bit);
        assert!(raises.is_empty() && clears.is_empty());
    }

    #[test]
    fn warning_flags_are_not_in_the_raise_table() {
        let (raises, _) = diff(0, SafetyFlag::CpNotStateC.bit());
        assert!(raises.is_empty());
        assert_eq!(active_warnings(SafetyFlag::CpNotStateC.bit()), vec!["cp_not_state_c"]);
    }

    #[test]
    fn dc_hv_ov_emergency_and_error_are_independent_edges() {
        let (raises, _) = diff(0, SafetyFlag::DcHvOvEmergency.bit());
        assert_eq!(raises.len(), 1);
        assert_eq!(raises[0].subtype, Some(VendorSubtype::DvHv));

        let both = SafetyFlag::DcHvOvEmergency.bit() | SafetyFlag::DcHvOvError.bit();
        let (raises, _) = diff(SafetyFlag::DcHvOvEmergency.bit(), both);
        assert_eq!(raises.len(), 1);
    }
}
