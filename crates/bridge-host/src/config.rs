//! Hierarchical bridge configuration (§6). Parsing itself is an
//! external collaborator (§1); this module owns only the `File -> Raw
//! -> Config` pipeline: deserializing the document, expanding
//! `charge_bridge_ip_list` fan-out with `##` substitution, and parsing
//! the wildcard discovery syntax.

use std::net::IpAddr;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

fn default_true() -> bool {
    true
}

fn default_heartbeat_interval() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChargeBridgeBlock {
    pub name: String,
    pub ip: String,
    #[serde(default)]
    pub fw_file: Option<String>,
    #[serde(default)]
    pub fw_update_on_start: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelBlock {
    #[serde(default = "default_true")]
    pub enable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BspModule {
    Evse,
    Ev,
}

impl Default for BspModule {
    fn default() -> Self {
        BspModule::Evse
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OvmBlock {
    #[serde(default = "default_true")]
    pub enable: bool,
}

/// The `evse_bsp` block (§6). Carrying the module selector here rather
/// than as a sibling `ev_bsp` block structurally enforces the §4.6
/// "EVSE xor EV, never both" rule: there is only one slot to put either
/// choice in.
#[derive(Debug, Clone, Deserialize)]
pub struct BspBlock {
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default)]
    pub module: BspModule,
    #[serde(default)]
    pub module_id: Option<String>,
    #[serde(default)]
    pub ovm: Option<OvmBlock>,
}

fn default_bus_host() -> String {
    "localhost".to_string()
}

fn default_bus_port() -> u16 {
    1883
}

/// Message-bus broker address. Not named as its own config block in
/// §6 (the document only lists the CB-facing blocks); every session
/// needs somewhere to point its [`bus::BusClient`] at, so this follows
/// the same `{host, port}` shape the bus crate's `connect` takes.
#[derive(Debug, Clone, Deserialize)]
pub struct BusBlock {
    #[serde(default = "default_bus_host")]
    pub host: String,
    #[serde(default = "default_bus_port")]
    pub port: u16,
}

impl Default for BusBlock {
    fn default() -> Self {
        BusBlock {
            host: default_bus_host(),
            port: default_bus_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatBlock {
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default = "default_heartbeat_interval")]
    pub interval_s: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayBlock {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub trip_delay_ms: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SafetyBlock {
    #[serde(default)]
    pub pp_mode: u8,
    #[serde(default)]
    pub cp_averaging_window: u8,
    #[serde(default)]
    pub relays: Vec<RelayBlock>,
    #[serde(default)]
    pub inverted_emergency: bool,
    #[serde(default)]
    pub pt1000_temp_limit: u16,
}

impl SafetyBlock {
    pub fn to_wire(&self) -> protocol::config::SafetyConfig {
        let mut relays = [protocol::config::RelayConfig::default(); 3];
        for (slot, block) in relays.iter_mut().zip(self.relays.iter()) {
            *slot = protocol::config::RelayConfig {
                enable: block.enable as u8,
                trip_delay_ms: block.trip_delay_ms,
            };
        }
        protocol::config::SafetyConfig {
            pp_mode: self.pp_mode,
            cp_averaging_window: self.cp_averaging_window,
            relays,
            inverted_emergency: self.inverted_emergency as u8,
            pt1000_temp_limit: self.pt1000_temp_limit,
        }
    }
}

/// The raw deserialized document, one per `charge_bridge_ip_list` entry
/// after fan-out (or a single instance if the list is absent).
#[derive(Debug, Clone, Deserialize)]
pub struct RawDocument {
    pub charge_bridge: ChargeBridgeBlock,
    #[serde(default)]
    pub can_0: Option<ChannelBlock>,
    #[serde(default)]
    pub serial_1: Option<ChannelBlock>,
    #[serde(default)]
    pub serial_2: Option<ChannelBlock>,
    #[serde(default)]
    pub plc: Option<ChannelBlock>,
    #[serde(default)]
    pub evse_bsp: Option<BspBlock>,
    #[serde(default)]
    pub gpio: Option<ChannelBlock>,
    #[serde(default)]
    pub heartbeat: Option<HeartbeatBlock>,
    #[serde(default)]
    pub safety: SafetyBlock,
    #[serde(default)]
    pub bus: BusBlock,
    #[serde(default)]
    pub charge_bridge_ip_list: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wildcard {
    AnyEvse,
    AnyEv,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceFilter {
    pub name: String,
    pub deny: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverySpec {
    pub wildcard: Wildcard,
    pub interfaces: Vec<InterfaceFilter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CbAddress {
    Concrete(IpAddr),
    Discover(DiscoverySpec),
}

/// Parses `charge_bridge.ip`: either a literal address or a wildcard
/// (`ANY_EVSE`/`ANY_EV`) followed by an optional `:`-introduced,
/// comma-separated interface allow/deny list (`!name` denies).
fn parse_cb_address(raw: &str) -> Result<CbAddress, ConfigError> {
    let (head, rest) = match raw.split_once(':') {
        Some((h, r)) => (h, Some(r)),
        None => (raw, None),
    };
    let wildcard = match head {
        "ANY_EVSE" => Some(Wildcard::AnyEvse),
        "ANY_EV" => Some(Wildcard::AnyEv),
        _ => None,
    };
    match wildcard {
        Some(wildcard) => {
            let interfaces = rest
                .map(|list| {
                    list.split(',')
                        .filter(|s| !s.is_empty())
                        .map(|token| {
                            if let Some(name) = token.strip_prefix('!') {
                                InterfaceFilter {
                                    name: name.to_string(),
                                    deny: true,
                                }
                            } else {
                                InterfaceFilter {
                                    name: token.to_string(),
                                    deny: false,
                                }
                            }
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(CbAddress::Discover(DiscoverySpec { wildcard, interfaces }))
        }
        None => raw.parse::<IpAddr>().map(CbAddress::Concrete).map_err(|e| ConfigError::Invalid {
            field: "charge_bridge.ip".to_string(),
            reason: e.to_string(),
        }),
    }
}

/// One fully resolved session configuration: the result of fan-out
/// expansion, `##` substitution, and address parsing.
#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub address: CbAddress,
    pub fw_file: Option<String>,
    pub fw_update_on_start: bool,
    pub can_0: Option<ChannelBlock>,
    pub serial_1: Option<ChannelBlock>,
    pub serial_2: Option<ChannelBlock>,
    pub plc: Option<ChannelBlock>,
    pub bsp: Option<BspBlock>,
    pub gpio: Option<ChannelBlock>,
    pub heartbeat: Option<HeartbeatBlock>,
    pub safety: SafetyBlock,
    pub bus_host: String,
    pub bus_port: u16,
}

impl Config {
    /// Builds the `CbConfig` pushed by the heartbeat service (§4.8) out
    /// of the per-channel enable blocks and the safety block. Baud
    /// rate/bitrate aren't exposed as config fields in §6, so the
    /// common defaults for the CB's UART/CAN transceivers are used.
    pub fn to_cb_config(&self) -> protocol::CbConfig {
        let mut gpio = [protocol::config::GpioConfig::default(); protocol::config::GPIO_SLOTS];
        if let Some(block) = &self.gpio {
            for slot in gpio.iter_mut() {
                slot.enable = block.enable as u8;
            }
        }

        let mut uart = [protocol::config::UartConfig::default(); protocol::config::UART_SLOTS];
        if let Some(block) = &self.serial_1 {
            uart[0] = protocol::config::UartConfig {
                enable: block.enable as u8,
                baudrate: 115_200,
            };
        }
        if let Some(block) = &self.serial_2 {
            uart[1] = protocol::config::UartConfig {
                enable: block.enable as u8,
                baudrate: 115_200,
            };
        }

        let can = self
            .can_0
            .as_ref()
            .map(|b| protocol::config::CanConfig {
                enable: b.enable as u8,
                bitrate: 500_000,
            })
            .unwrap_or_default();

        protocol::CbConfig {
            config_version: 1,
            safety: self.safety.to_wire(),
            gpio,
            uart,
            can,
            network: protocol::config::NetworkConfig::with_mdns_name(&self.name),
            plc_power_saving: self.plc.as_ref().map(|b| !b.enable as u8).unwrap_or(1),
        }
    }

    fn from_raw(mut raw: RawDocument, substitution: Option<(usize, &str)>) -> Result<Config, ConfigError> {
        if let Some((index, ip)) = substitution {
            let marker = format!("{index:02}");
            raw.charge_bridge.name = raw.charge_bridge.name.replace("##", &marker);
            raw.charge_bridge.fw_file = raw.charge_bridge.fw_file.map(|p| p.replace("##", &marker));
            if let Some(bsp) = raw.evse_bsp.as_mut() {
                bsp.module_id = bsp.module_id.take().map(|id| id.replace("##", &marker));
            }
            raw.charge_bridge.ip = ip.to_string();
        }

        let address = parse_cb_address(&raw.charge_bridge.ip)?;
        let module_id = raw.charge_bridge.name.clone();
        let bsp = raw.evse_bsp.map(|mut b| {
            if b.module_id.is_none() {
                b.module_id = Some(module_id);
            }
            b
        });

        Ok(Config {
            name: raw.charge_bridge.name,
            address,
            fw_file: raw.charge_bridge.fw_file,
            fw_update_on_start: raw.charge_bridge.fw_update_on_start,
            can_0: raw.can_0,
            serial_1: raw.serial_1,
            serial_2: raw.serial_2,
            plc: raw.plc,
            bsp,
            gpio: raw.gpio,
            heartbeat: raw.heartbeat,
            safety: raw.safety,
            bus_host: raw.bus.host,
            bus_port: raw.bus.port,
        })
    }
}

/// Loads `path`, expanding `charge_bridge_ip_list` fan-out into one
/// [`Config`] per listed address (§6). Absent a fan-out list, returns a
/// single-element vector built directly from the document's own `ip`.
pub fn load(path: &Path) -> Result<Vec<Config>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let raw: RawDocument = serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    if raw.charge_bridge_ip_list.is_empty() {
        return Ok(vec![Config::from_raw(raw, None)?]);
    }

    raw.charge_bridge_ip_list
        .iter()
        .enumerate()
        .map(|(index, ip)| Config::from_raw(raw.clone(), Some((index, ip))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_concrete_address() {
        let addr = parse_cb_address("10.0.0.5").unwrap();
        assert_eq!(addr, CbAddress::Concrete("10.0.0.5".parse().unwrap()));
    }

    #[test]
    fn parses_wildcard_with_interface_filters() {
        let addr = parse_cb_address("ANY_EVSE:eth0,!eth1").unwrap();
        match addr {
            CbAddress::Discover(spec) => {
                assert_eq!(spec.wildcard, Wildcard::AnyEvse);
                assert_eq!(
                    spec.interfaces,
                    vec![
                        InterfaceFilter {
                            name: "eth0".to_string(),
                            deny: false
                        },
                        InterfaceFilter {
                            name: "eth1".to_string(),
                            deny: true
                        },
                    ]
                );
            }
            other => panic!("expected Discover, got {other:?}"),
        }
    }

    #[test]
    fn bare_wildcard_has_no_interface_filters() {
        let addr = parse_cb_address("ANY_EV").unwrap();
        match addr {
            CbAddress::Discover(spec) => {
                assert_eq!(spec.wildcard, Wildcard::AnyEv);
                assert!(spec.interfaces.is_empty());
            }
            other => panic!("expected Discover, got {other:?}"),
        }
    }

    #[test]
    fn invalid_literal_address_is_rejected() {
        assert!(parse_cb_address("not-an-ip").is_err());
    }

    #[test]
    fn fan_out_substitutes_index_and_overrides_ip() {
        let yaml = r#"
charge_bridge:
  name: cb-##
  ip: 0.0.0.0
  fw_file: /fw/cb-##.bin
charge_bridge_ip_list:
  - 10.0.0.1
  - 10.0.0.2
"#;
        let raw: RawDocument = serde_yaml::from_str(yaml).unwrap();
        let cfgs: Vec<Config> = raw
            .charge_bridge_ip_list
            .iter()
            .enumerate()
            .map(|(i, ip)| Config::from_raw(raw.clone(), Some((i, ip))).unwrap())
            .collect();
        assert_eq!(cfgs.len(), 2);
        assert_eq!(cfgs[0].name, "cb-00");
        assert_eq!(cfgs[0].address, CbAddress::Concrete("10.0.0.1".parse().unwrap()));
        assert_eq!(cfgs[1].name, "cb-01");
        assert_eq!(cfgs[1].fw_file.as_deref(), Some("/fw/cb-01.bin"));
    }

    #[test]
    fn bsp_block_defaults_module_id_to_charge_bridge_name() {
        let yaml = r#"
charge_bridge:
  name: cb-a
  ip: 10.0.0.9
evse_bsp:
  enable: true
"#;
        let raw: RawDocument = serde_yaml::from_str(yaml).unwrap();
        let cfg = Config::from_raw(raw, None).unwrap();
        assert_eq!(cfg.bsp.unwrap().module_id.as_deref(), Some("cb-a"));
    }
}
