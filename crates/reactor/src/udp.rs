use std::net::{SocketAddr, UdpSocket};
use std::os::fd::{AsRawFd, RawFd};

use crate::error::ReactorError;
use crate::interest::Interest;
use crate::reactor::Reactor;

/// Maximum single datagram this endpoint will ever hand to the OS or
/// accept from it (§4.2: "smaller than the 1500-byte MTU by the
/// protocol reserve of 256 bytes").
pub const MAX_PAYLOAD: usize = 1280;

/// Component C: a connected, non-blocking UDP socket.
///
/// `tx`/`rx` never block; the caller drives `rx` from a readiness
/// callback registered on [`Self::as_raw_fd`].
pub struct UdpEndpoint {
    socket: UdpSocket,
}

impl UdpEndpoint {
    /// Establishes a connected non-blocking socket to `remote`. Binding
    /// the 4-tuple with `connect` lets every `send`/`recv` skip address
    /// bookkeeping, matching the one-peer-per-session shape of every CB
    /// sub-bridge (§4.2).
    pub fn open_client(remote: SocketAddr, bind: SocketAddr) -> Result<Self, ReactorError> {
        let socket = UdpSocket::bind(bind)?;
        socket.connect(remote)?;
        socket.set_nonblocking(true)?;
        Ok(UdpEndpoint { socket })
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ReactorError> {
        Ok(self.socket.local_addr()?)
    }

    /// Sends `payload` without blocking. Returns `Ok(false)` (not an
    /// error) on `WouldBlock`, since the caller's outbound queue is the
    /// thing that's supposed to retry, not this call.
    pub fn tx(&self, payload: &[u8]) -> Result<bool, ReactorError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(ReactorError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("payload of {} bytes exceeds MAX_PAYLOAD {MAX_PAYLOAD}", payload.len()),
            )));
        }
        match self.socket.send(payload) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Drains one datagram into `buf`, returning the slice actually
    /// written. `None` means nothing was pending (`WouldBlock`).
    pub fn rx<'a>(&self, buf: &'a mut [u8; MAX_PAYLOAD]) -> Result<Option<&'a [u8]>, ReactorError> {
        match self.socket.recv(buf) {
            Ok(n) => Ok(Some(&buf[..n])),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Registers this endpoint read-only; writes are always attempted
    /// inline in `tx` rather than waiting for write-readiness (§4.2).
    pub fn register(
        &self,
        reactor: &mut Reactor,
        mut on_frame: impl FnMut(&[u8]) + 'static,
    ) -> Result<(), ReactorError> {
        let socket = self.socket.try_clone()?;
        reactor.register(self.as_raw_fd(), Interest::read(), move |readiness| {
            if !readiness.readable {
                return;
            }
            let mut buf = [0u8; MAX_PAYLOAD];
            loop {
                match socket.recv(&mut buf) {
                    Ok(n) => on_frame(&buf[..n]),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(_) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn loopback_round_trip_through_reactor() {
        let sock_a = UdpSocket::bind("127.0.0.1:0").unwrap();
        let sock_b = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr_a = sock_a.local_addr().unwrap();
        let addr_b = sock_b.local_addr().unwrap();
        sock_a.connect(addr_b).unwrap();
        sock_b.connect(addr_a).unwrap();
        sock_a.set_nonblocking(true).unwrap();
        sock_b.set_nonblocking(true).unwrap();

        let ep_b = UdpEndpoint { socket: sock_b };
        let mut reactor = Reactor::new().unwrap();

        let received = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let received2 = std::sync::Arc::clone(&received);
        ep_b.register(&mut reactor, move |frame| {
            received2.lock().unwrap().push(frame.to_vec());
        })
        .unwrap();

        sock_a.send(b"hello-cb").unwrap();

        for _ in 0..20 {
            reactor.run_once(Some(Duration::from_millis(20))).unwrap();
            if !received.lock().unwrap().is_empty() {
                break;
            }
        }
        assert_eq!(received.lock().unwrap().as_slice(), &[b"hello-cb".to_vec()]);
    }
}
