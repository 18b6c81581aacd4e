//! CAN/serial/PLC passthrough tunnels (§1, §6 "UDP ports"). These three
//! sub-bridges are structurally identical: a connected UDP socket to
//! one of the CB's fixed ports, relaying raw bytes in both directions.
//! Framing, encoding, and interpretation of the payload belong to the
//! external collaborator on the other side of [`PassthroughBridge::send`]
//! and the `on_frame` callback — this module only tunnels bytes.

use std::net::SocketAddr;
use std::rc::Rc;

use reactor::{Reactor, UdpEndpoint};

use crate::error::BridgeError;

/// Fixed CB-side ports for the three passthrough channels (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Plc,
    Can0,
    Serial1,
    Serial2,
}

impl Channel {
    pub const fn cb_port(self) -> u16 {
        match self {
            Channel::Plc => 6002,
            Channel::Can0 => 6003,
            Channel::Serial1 => 6004,
            Channel::Serial2 => 6005,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Channel::Plc => "plc",
            Channel::Can0 => "can_0",
            Channel::Serial1 => "serial_1",
            Channel::Serial2 => "serial_2",
        }
    }
}

/// Keepalive handle: dropping it closes the tunnel's socket and
/// removes its reactor interest (§4.7 sub-bridge teardown).
pub struct PassthroughHandle {
    endpoint: Rc<UdpEndpoint>,
    channel: Channel,
}

impl PassthroughHandle {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Forwards one raw frame from the external collaborator to the CB.
    /// Silently drops on a would-block write, matching every other
    /// sub-bridge's "best-effort, next tick retries" transmit policy.
    pub fn send(&self, payload: &[u8]) -> Result<(), BridgeError> {
        self.endpoint.tx(payload)?;
        Ok(())
    }
}

pub struct PassthroughBridge {
    endpoint: Rc<UdpEndpoint>,
    channel: Channel,
}

impl PassthroughBridge {
    /// Raw fd this tunnel will register once [`Self::register`] is
    /// called; kept so a caller can `unregister` it explicitly on
    /// teardown instead of leaving a stale reactor entry behind.
    pub fn raw_fd(&self) -> std::os::fd::RawFd {
        self.endpoint.as_raw_fd()
    }

    pub fn new(channel: Channel, cb_ip: std::net::IpAddr, bind: SocketAddr) -> Result<Self, BridgeError> {
        let remote = SocketAddr::new(cb_ip, channel.cb_port());
        let endpoint = Rc::new(UdpEndpoint::open_client(remote, bind)?);
        Ok(PassthroughBridge { endpoint, channel })
    }

    /// Registers the tunnel; every inbound frame from the CB is handed
    /// to `on_frame` verbatim, with no decoding of any kind.
    pub fn register(self, reactor: &mut Reactor, mut on_frame: impl FnMut(Channel, &[u8]) + 'static) -> Result<PassthroughHandle, BridgeError> {
        let channel = self.channel;
        self.endpoint.register(reactor, move |frame| on_frame(channel, frame))?;
        Ok(PassthroughHandle {
            endpoint: self.endpoint,
            channel: self.channel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::time::Duration;

    #[test]
    fn each_channel_uses_its_fixed_cb_port() {
        assert_eq!(Channel::Plc.cb_port(), 6002);
        assert_eq!(Channel::Can0.cb_port(), 6003);
        assert_eq!(Channel::Serial1.cb_port(), 6004);
        assert_eq!(Channel::Serial2.cb_port(), 6005);
    }

    #[test]
    fn tunnels_bytes_in_both_directions() {
        let cb_socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let cb_addr = cb_socket.local_addr().unwrap();
        cb_socket.set_nonblocking(true).unwrap();

        let bridge = PassthroughBridge {
            endpoint: Rc::new(UdpEndpoint::open_client(cb_addr, "127.0.0.1:0".parse().unwrap()).unwrap()),
            channel: Channel::Can0,
        };
        let local_addr = bridge.endpoint.local_addr().unwrap();
        cb_socket.connect(local_addr).unwrap();

        let mut reactor = Reactor::new().unwrap();
        let received = Rc::new(RefCell::new(Vec::new()));
        let received2 = Rc::clone(&received);
        let handle = bridge
            .register(&mut reactor, move |channel, frame| {
                received2.borrow_mut().push((channel, frame.to_vec()));
            })
            .unwrap();

        cb_socket.send(b"can-frame").unwrap();
        for _ in 0..20 {
            reactor.run_once(Some(Duration::from_millis(20))).unwrap();
            if !received.borrow().is_empty() {
                break;
            }
        }
        assert_eq!(received.borrow().as_slice(), &[(Channel::Can0, b"can-frame".to_vec())]);

        handle.send(b"reply").unwrap();
        let mut buf = [0u8; 64];
        let n = cb_socket.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"reply");
    }
}
