/// The 16-bit little-endian type tag every CB frame begins with.
///
/// `EvseBspCommand`/`EvseBspStatus` are not part of the management
/// channel's tag set in the distilled spec (it only enumerates the
/// heartbeat, GPIO, and firmware tags) but the BSP UDP port (6001/udp)
/// needs its own pair on the same codec; they are assigned the next
/// free small integers after `CbToHost_Gpio` to keep the "small
/// integers for steady-state structs, 0xFFFx for the firmware
/// sub-protocol" convention intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    HostToCbHeartbeat,
    CbToHostHeartbeat,
    HostToCbGpio,
    CbToHostGpio,
    EvseBspCommand,
    EvseBspStatus,
    FirmwareReply,
    FirmwareStart,
    FirmwarePacket,
    FirmwareFinish,
    FirmwareUpdateCancel,
    FirmwarePing,
    FirmwareGetVersion,
    /// Any tag value not recognized above. The transport never drops
    /// an unrecognized frame; it is surfaced to callers as `Unknown`.
    Unknown(u16),
}

impl Tag {
    pub const fn value(self) -> u16 {
        match self {
            Tag::HostToCbHeartbeat => 1,
            Tag::CbToHostHeartbeat => 2,
            Tag::HostToCbGpio => 3,
            Tag::CbToHostGpio => 4,
            Tag::EvseBspCommand => 5,
            Tag::EvseBspStatus => 6,
            Tag::FirmwareReply => 0xFFF9,
            Tag::FirmwareStart => 0xFFFA,
            Tag::FirmwarePacket => 0xFFFB,
            Tag::FirmwareFinish => 0xFFFC,
            Tag::FirmwareUpdateCancel => 0xFFFD,
            Tag::FirmwarePing => 0xFFFE,
            Tag::FirmwareGetVersion => 0xFFFF,
            Tag::Unknown(v) => v,
        }
    }

    pub const fn from_value(v: u16) -> Tag {
        match v {
            1 => Tag::HostToCbHeartbeat,
            2 => Tag::CbToHostHeartbeat,
            3 => Tag::HostToCbGpio,
            4 => Tag::CbToHostGpio,
            5 => Tag::EvseBspCommand,
            6 => Tag::EvseBspStatus,
            0xFFF9 => Tag::FirmwareReply,
            0xFFFA => Tag::FirmwareStart,
            0xFFFB => Tag::FirmwarePacket,
            0xFFFC => Tag::FirmwareFinish,
            0xFFFD => Tag::FirmwareUpdateCancel,
            0xFFFE => Tag::FirmwarePing,
            0xFFFF => Tag::FirmwareGetVersion,
            other => Tag::Unknown(other),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Tag::HostToCbHeartbeat => "HostToCb_Heartbeat",
            Tag::CbToHostHeartbeat => "CbToHost_Heartbeat",
            Tag::HostToCbGpio => "HostToCb_Gpio",
            Tag::CbToHostGpio => "CbToHost_Gpio",
            Tag::EvseBspCommand => "EvseBspCommand",
            Tag::EvseBspStatus => "EvseBspStatus",
            Tag::FirmwareReply => "FirmwareReply",
            Tag::FirmwareStart => "FirmwareStart",
            Tag::FirmwarePacket => "FirmwarePacket",
            Tag::FirmwareFinish => "FirmwareFinish",
            Tag::FirmwareUpdateCancel => "FirmwareUpdateCancel",
            Tag::FirmwarePing => "FirmwarePing",
            Tag::FirmwareGetVersion => "FirmwareGetVersion",
            Tag::Unknown(_) => "Unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_known_tag() {
        let known = [
            Tag::HostToCbHeartbeat,
            Tag::CbToHostHeartbeat,
            Tag::HostToCbGpio,
            Tag::CbToHostGpio,
            Tag::EvseBspCommand,
            Tag::EvseBspStatus,
            Tag::FirmwareReply,
            Tag::FirmwareStart,
            Tag::FirmwarePacket,
            Tag::FirmwareFinish,
            Tag::FirmwareUpdateCancel,
            Tag::FirmwarePing,
            Tag::FirmwareGetVersion,
        ];
        for tag in known {
            assert_eq!(Tag::from_value(tag.value()), tag);
        }
    }

    #[test]
    fn unknown_tag_is_preserved_not_dropped() {
        let t = Tag::from_value(0x1234);
        assert_eq!(t, Tag::Unknown(0x1234));
        assert_eq!(t.value(), 0x1234);
    }
}
