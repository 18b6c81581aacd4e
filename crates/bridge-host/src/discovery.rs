//! Discovery (component G, §4.7 `S0 DiscoveryPending`): when
//! `cb_remote` is a wildcard, broadcast probes and resolve to a
//! concrete IP before any other sub-bridge is started.
//!
//! The wire format of the probe/reply pair is not specified by the
//! management protocol's tag set (§3) — discovery precedes the point
//! where a CB address, and therefore a connected socket, even exists.
//! This uses a minimal fixed marker broadcast on the management port;
//! see DESIGN.md for the reasoning.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use crate::config::{DiscoverySpec, Wildcard};
use crate::error::BridgeError;

const PROBE_MARKER: &[u8] = b"CHARGEBRIDGE_DISCOVER_V1";
const MANAGEMENT_PORT: u16 = 6000;

fn wildcard_marker(wildcard: Wildcard) -> &'static str {
    match wildcard {
        Wildcard::AnyEvse => "EVSE",
        Wildcard::AnyEv => "EV",
    }
}

/// Runs on the manager thread (never the reactor thread, §4.7/§5):
/// sends broadcast probes on every allowed local interface and blocks
/// (up to `timeout`) for the first matching reply.
pub fn resolve(spec: &DiscoverySpec, timeout: Duration) -> Result<IpAddr, BridgeError> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).map_err(|e| BridgeError::Discovery(e.to_string()))?;
    socket.set_broadcast(true).map_err(|e| BridgeError::Discovery(e.to_string()))?;
    socket
        .set_read_timeout(Some(Duration::from_millis(200)))
        .map_err(|e| BridgeError::Discovery(e.to_string()))?;

    let mut probe = Vec::from(PROBE_MARKER);
    probe.push(b':');
    probe.extend_from_slice(wildcard_marker(spec.wildcard).as_bytes());

    let broadcast_addr: SocketAddr = ([255, 255, 255, 255], MANAGEMENT_PORT).into();
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 256];

    while Instant::now() < deadline {
        socket
            .send_to(&probe, broadcast_addr)
            .map_err(|e| BridgeError::Discovery(e.to_string()))?;

        match socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                if let Some(ip) = parse_reply(&buf[..n], spec) {
                    return Ok(ip);
                }
                let _ = from;
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => return Err(BridgeError::Discovery(e.to_string())),
        }
    }

    Err(BridgeError::Discovery(format!(
        "no discovery reply for wildcard {:?} within {timeout:?}",
        spec.wildcard
    )))
}

/// A reply is accepted as `"CHARGEBRIDGE_HERE:<ip>:<interface>"`; the
/// interface token is checked against the spec's allow/deny list
/// (deny entries always reject, a non-empty allow list requires a
/// match, an empty allow list accepts any non-denied interface).
fn parse_reply(body: &[u8], spec: &DiscoverySpec) -> Option<IpAddr> {
    let text = std::str::from_utf8(body).ok()?;
    let mut parts = text.splitn(3, ':');
    if parts.next()? != "CHARGEBRIDGE_HERE" {
        return None;
    }
    let ip: IpAddr = parts.next()?.parse().ok()?;
    let iface = parts.next().unwrap_or("");

    let (allow, deny): (Vec<_>, Vec<_>) = spec.interfaces.iter().partition(|f| !f.deny);
    if deny.iter().any(|f| f.name == iface) {
        return None;
    }
    if !allow.is_empty() && !allow.iter().any(|f| f.name == iface) {
        return None;
    }
    Some(ip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterfaceFilter;

    fn spec(interfaces: Vec<InterfaceFilter>) -> DiscoverySpec {
        DiscoverySpec {
            wildcard: Wildcard::AnyEvse,
            interfaces,
        }
    }

    #[test]
    fn accepts_reply_with_no_interface_filters() {
        let s = spec(vec![]);
        let ip = parse_reply(b"CHARGEBRIDGE_HERE:10.0.0.7:eth0", &s);
        assert_eq!(ip, Some("10.0.0.7".parse().unwrap()));
    }

    #[test]
    fn denied_interface_is_rejected() {
        let s = spec(vec![InterfaceFilter {
            name: "eth1".to_string(),
            deny: true,
        }]);
        assert_eq!(parse_reply(b"CHARGEBRIDGE_HERE:10.0.0.7:eth1", &s), None);
        assert!(parse_reply(b"CHARGEBRIDGE_HERE:10.0.0.7:eth0", &s).is_some());
    }

    #[test]
    fn non_empty_allow_list_requires_match() {
        let s = spec(vec![InterfaceFilter {
            name: "eth0".to_string(),
            deny: false,
        }]);
        assert!(parse_reply(b"CHARGEBRIDGE_HERE:10.0.0.7:eth0", &s).is_some());
        assert_eq!(parse_reply(b"CHARGEBRIDGE_HERE:10.0.0.7:eth1", &s), None);
    }

    #[test]
    fn malformed_reply_is_ignored() {
        let s = spec(vec![]);
        assert_eq!(parse_reply(b"garbage", &s), None);
    }
}
