use crate::error::CodecError;
use crate::tag::Tag;
use crate::WireStruct;

pub const GPIO_SLOTS: usize = 10;
pub const UART_SLOTS: usize = 3;
pub const MDNS_NAME_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RelayConfig {
    pub enable: u8,
    pub trip_delay_ms: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SafetyConfig {
    pub pp_mode: u8,
    pub cp_averaging_window: u8,
    pub relays: [RelayConfig; 3],
    pub inverted_emergency: u8,
    pub pt1000_temp_limit: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpioConfig {
    pub enable: u8,
    pub mode: u8,
    pub initial_state: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UartConfig {
    pub enable: u8,
    pub baudrate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CanConfig {
    pub enable: u8,
    pub bitrate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkConfig {
    pub mdns_name: [u8; MDNS_NAME_LEN],
    pub use_dhcp: u8,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            mdns_name: [0; MDNS_NAME_LEN],
            use_dhcp: 1,
        }
    }
}

impl NetworkConfig {
    /// Builds an mDNS name field, truncating/zero-padding to 20 bytes
    /// as required by the fixed-size wire layout.
    pub fn with_mdns_name(name: &str) -> Self {
        let mut mdns_name = [0u8; MDNS_NAME_LEN];
        let bytes = name.as_bytes();
        let n = bytes.len().min(MDNS_NAME_LEN);
        mdns_name[..n].copy_from_slice(&bytes[..n]);
        NetworkConfig {
            mdns_name,
            use_dhcp: 1,
        }
    }
}

/// Full payload of `HostToCb_Heartbeat`: the complete CB configuration.
///
/// Arrays are fixed-size; unused slots are zero-filled rather than
/// omitted (§3 invariants).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CbConfig {
    pub config_version: u32,
    pub safety: SafetyConfig,
    pub gpio: [GpioConfig; GPIO_SLOTS],
    pub uart: [UartConfig; UART_SLOTS],
    pub can: CanConfig,
    pub network: NetworkConfig,
    pub plc_power_saving: u8,
}

impl WireStruct for CbConfig {
    const TAG: Tag = Tag::HostToCbHeartbeat;

    fn encoded_len(&self) -> usize {
        4 + safety_len() + GPIO_SLOTS * 3 + UART_SLOTS * 5 + 5 + (MDNS_NAME_LEN + 1) + 1
    }

    fn write_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.config_version.to_le_bytes());

        out.push(self.safety.pp_mode);
        out.push(self.safety.cp_averaging_window);
        for relay in &self.safety.relays {
            out.push(relay.enable);
            out.extend_from_slice(&relay.trip_delay_ms.to_le_bytes());
        }
        out.push(self.safety.inverted_emergency);
        out.extend_from_slice(&self.safety.pt1000_temp_limit.to_le_bytes());

        for gpio in &self.gpio {
            out.push(gpio.enable);
            out.push(gpio.mode);
            out.push(gpio.initial_state);
        }

        for uart in &self.uart {
            out.push(uart.enable);
            out.extend_from_slice(&uart.baudrate.to_le_bytes());
        }

        out.push(self.can.enable);
        out.extend_from_slice(&self.can.bitrate.to_le_bytes());

        out.extend_from_slice(&self.network.mdns_name);
        out.push(self.network.use_dhcp);

        out.push(self.plc_power_saving);
    }

    fn read_body(body: &[u8]) -> Result<Self, CodecError> {
        let expected = CbConfig::default().encoded_len();
        if body.len() != expected {
            return Err(CodecError::WrongBodyLength {
                tag: Self::TAG.name(),
                expected,
                got: body.len(),
            });
        }

        let mut r = Reader::new(body);
        let config_version = r.u32();

        let pp_mode = r.u8();
        let cp_averaging_window = r.u8();
        let mut relays = [RelayConfig::default(); 3];
        for relay in &mut relays {
            relay.enable = r.u8();
            relay.trip_delay_ms = r.u16();
        }
        let inverted_emergency = r.u8();
        let pt1000_temp_limit = r.u16();
        let safety = SafetyConfig {
            pp_mode,
            cp_averaging_window,
            relays,
            inverted_emergency,
            pt1000_temp_limit,
        };

        let mut gpio = [GpioConfig::default(); GPIO_SLOTS];
        for slot in &mut gpio {
            slot.enable = r.u8();
            slot.mode = r.u8();
            slot.initial_state = r.u8();
        }

        let mut uart = [UartConfig::default(); UART_SLOTS];
        for slot in &mut uart {
            slot.enable = r.u8();
            slot.baudrate = r.u32();
        }

        let can = CanConfig {
            enable: r.u8(),
            bitrate: r.u32(),
        };

        let mut mdns_name = [0u8; MDNS_NAME_LEN];
        mdns_name.copy_from_slice(r.bytes(MDNS_NAME_LEN));
        let use_dhcp = r.u8();
        let network = NetworkConfig { mdns_name, use_dhcp };

        let plc_power_saving = r.u8();

        Ok(CbConfig {
            config_version,
            safety,
            gpio,
            uart,
            can,
            network,
            plc_power_saving,
        })
    }
}

const fn safety_len() -> usize {
    1 + 1 + 3 * 3 + 1 + 2
}

/// Minimal cursor over a known-length body; the length has already
/// been validated by the caller so these reads cannot go out of bounds.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn u8(&mut self) -> u8 {
        let v = self.buf[self.pos];
        self.pos += 1;
        v
    }

    fn u16(&mut self) -> u16 {
        let v = u16::from_le_bytes(self.buf[self.pos..self.pos + 2].try_into().unwrap());
        self.pos += 2;
        v
    }

    fn u32(&mut self) -> u32 {
        let v = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }

    fn bytes(&mut self, n: usize) -> &'a [u8] {
        let v = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cb_config_round_trips_with_unused_slots_zero_filled() {
        let mut cfg = CbConfig::default();
        cfg.config_version = 7;
        cfg.safety.pp_mode = 1;
        cfg.gpio[0] = GpioConfig {
            enable: 1,
            mode: 2,
            initial_state: 0,
        };
        cfg.network = NetworkConfig::with_mdns_name("chargebridge-00");

        let mut buf = Vec::new();
        cfg.write_body(&mut buf);
        assert_eq!(buf.len(), cfg.encoded_len());

        let back = CbConfig::read_body(&buf).unwrap();
        assert_eq!(back, cfg);
        // unused GPIO slots stay zero-filled, not omitted
        assert_eq!(back.gpio[1], GpioConfig::default());
    }
}
