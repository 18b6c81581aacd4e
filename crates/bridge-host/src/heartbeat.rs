//! Heartbeat / config service (component F, §4.8). Periodically sends
//! the complete `CbConfig` to the CB and observes telemetry replies,
//! detecting a CB reset (uptime regression) and tracking connectivity
//! with an initial grace window before the first reply arrives.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use protocol::codec::{decode, encode, Frame};
use protocol::{CbConfig, CbTelemetry};
use reactor::{Reactor, TimerSource, UdpEndpoint};

use crate::error::BridgeError;

/// Pure connectivity/reset-detection state, separated from the I/O glue
/// so it is testable without a socket (§9 design note).
pub struct HeartbeatSupervisor {
    interval: Duration,
    started_at: Instant,
    last_reply: Option<Instant>,
    last_uptime_ms: Option<u32>,
    connected: Option<bool>,
    pub mcu_reset_count: u32,
}

impl HeartbeatSupervisor {
    pub fn new(interval: Duration, now: Instant) -> Self {
        HeartbeatSupervisor {
            interval,
            started_at: now,
            last_reply: None,
            last_uptime_ms: None,
            connected: None,
            mcu_reset_count: 0,
        }
    }

    pub fn on_reply(&mut self, telemetry: &CbTelemetry, now: Instant) {
        if let Some(prev) = self.last_uptime_ms {
            if telemetry.uptime_ms < prev {
                self.mcu_reset_count += 1;
            }
        }
        self.last_uptime_ms = Some(telemetry.uptime_ms);
        self.last_reply = Some(now);
    }

    /// Evaluates connectivity at `now`. Returns `None` during the
    /// one-shot initial grace window (no reply has ever been seen and
    /// less than one interval has elapsed since construction) so
    /// startup doesn't immediately read as a disconnect edge; `Some`
    /// on every subsequent transition, including the first real one.
    pub fn tick(&mut self, now: Instant) -> Option<bool> {
        if self.last_reply.is_none() && now.saturating_duration_since(self.started_at) < self.interval {
            return None;
        }
        let threshold = self.interval * 3;
        let current = match self.last_reply {
            Some(t) => now.saturating_duration_since(t) < threshold,
            None => false,
        };
        if self.connected != Some(current) {
            self.connected = Some(current);
            Some(current)
        } else {
            None
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.unwrap_or(false)
    }
}

struct Inner {
    config: CbConfig,
    supervisor: HeartbeatSupervisor,
}

/// Keepalive handle for a registered heartbeat service: dropping it
/// closes the UDP socket and stops the timer, which implicitly removes
/// both fds' reactor interest (§4.7 sub-bridge teardown).
pub struct HeartbeatHandle {
    _endpoint: Rc<UdpEndpoint>,
    _timer: TimerSource,
    inner: Rc<RefCell<Inner>>,
}

impl HeartbeatHandle {
    pub fn mcu_reset_count(&self) -> u32 {
        self.inner.borrow().mcu_reset_count
    }

    pub fn is_connected(&self) -> bool {
        self.inner.borrow().supervisor.is_connected()
    }
}

pub struct HeartbeatService {
    endpoint: Rc<UdpEndpoint>,
    timer: TimerSource,
    inner: Rc<RefCell<Inner>>,
}

impl HeartbeatService {
    /// Raw fds this service will register once [`Self::register`] is
    /// called; kept so a caller can `unregister` them explicitly on
    /// teardown instead of leaving stale reactor entries behind.
    pub fn raw_fds(&self) -> [std::os::fd::RawFd; 2] {
        [self.endpoint.as_raw_fd(), self.timer.as_raw_fd()]
    }

    pub fn new(remote: SocketAddr, bind: SocketAddr, interval: Duration, config: CbConfig) -> Result<Self, BridgeError> {
        let endpoint = Rc::new(UdpEndpoint::open_client(remote, bind)?);
        let timer = TimerSource::new()?;
        timer.set_periodic(interval)?;
        let inner = Rc::new(RefCell::new(Inner {
            config,
            supervisor: HeartbeatSupervisor::new(interval, Instant::now()),
        }));
        Ok(HeartbeatService { endpoint, timer, inner })
    }

    /// Registers both the UDP endpoint (reply callback) and the timer
    /// (periodic transmit + connectivity tick) with `reactor`.
    /// `on_connectivity_change` fires on every connection-boolean edge,
    /// including the initial determination (§4.8).
    pub fn register(
        self,
        reactor: &mut Reactor,
        mut on_connectivity_change: impl FnMut(bool) + 'static,
    ) -> Result<HeartbeatHandle, BridgeError> {
        let inner_for_frame = Rc::clone(&self.inner);
        self.endpoint.register(reactor, move |frame| {
            if let Ok(Frame::CbToHostHeartbeat(telemetry)) = decode(frame) {
                inner_for_frame.borrow_mut().on_reply(&telemetry, Instant::now());
            }
        })?;

        let endpoint_for_timer = Rc::clone(&self.endpoint);
        let inner_for_timer = Rc::clone(&self.inner);
        let timer = self.timer.register(reactor, move || {
            let mut inner = inner_for_timer.borrow_mut();
            if let Ok(bytes) = encode(&inner.config) {
                if let Err(e) = endpoint_for_timer.tx(&bytes) {
                    tracing::warn!(error = %e, "heartbeat transmit failed");
                }
            }
            if let Some(connected) = inner.supervisor.tick(Instant::now()) {
                tracing::info!(connected, "CB heartbeat connectivity changed");
                on_connectivity_change(connected);
            }
        })?;

        Ok(HeartbeatHandle {
            _endpoint: self.endpoint,
            _timer: timer,
            inner: self.inner,
        })
    }
}

impl Inner {
    fn on_reply(&mut self, telemetry: &CbTelemetry, now: Instant) {
        self.supervisor.on_reply(telemetry, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grace_window_suppresses_initial_disconnect() {
        let t0 = Instant::now();
        let mut sup = HeartbeatSupervisor::new(Duration::from_secs(5), t0);
        assert_eq!(sup.tick(t0 + Duration::from_secs(1)), None);
        assert_eq!(sup.tick(t0 + Duration::from_secs(6)), Some(false));
    }

    #[test]
    fn reply_establishes_connected_and_reset_is_detected() {
        let t0 = Instant::now();
        let mut sup = HeartbeatSupervisor::new(Duration::from_secs(5), t0);
        sup.on_reply(&CbTelemetry { uptime_ms: 1000, ..Default::default() }, t0);
        assert_eq!(sup.tick(t0 + Duration::from_millis(100)), Some(true));
        assert!(sup.is_connected());
        assert_eq!(sup.mcu_reset_count, 0);

        sup.on_reply(&CbTelemetry { uptime_ms: 50, ..Default::default() }, t0 + Duration::from_secs(1));
        assert_eq!(sup.mcu_reset_count, 1);
    }

    #[test]
    fn missed_replies_past_three_intervals_disconnect() {
        let t0 = Instant::now();
        let mut sup = HeartbeatSupervisor::new(Duration::from_secs(2), t0);
        sup.on_reply(&CbTelemetry::default(), t0);
        sup.tick(t0);
        assert_eq!(sup.tick(t0 + Duration::from_secs(7)), Some(false));
    }
}
