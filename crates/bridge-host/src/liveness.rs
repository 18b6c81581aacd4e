//! Edge-triggered connectivity supervisor shared by the host-API
//! liveness check (§4.4 rule 2) and the CB-liveness check (§4.6):
//! "connected iff `now - last_seen < timeout`". Time is injected as a
//! parameter throughout so the supervisor is testable without sleeping.

use std::time::{Duration, Instant};

pub struct Liveness {
    timeout: Duration,
    last_seen: Option<Instant>,
    /// `None` until the first [`Self::tick`]; every tick after that
    /// holds the last emitted connectivity value.
    connected: Option<bool>,
}

impl Liveness {
    pub fn new(timeout: Duration) -> Self {
        Liveness {
            timeout,
            last_seen: None,
            connected: None,
        }
    }

    /// Records an observation (a received heartbeat/status) at `now`.
    pub fn observe(&mut self, now: Instant) {
        self.last_seen = Some(now);
    }

    /// Evaluates connectivity at `now`. Returns `Some(edge)` the first
    /// time it is called (§8: "starting from no heartbeat ever, the
    /// first tick raises..." — i.e. `None` is never equal to a real
    /// bool, so the first tick always reports an edge) and on every
    /// subsequent boolean transition; `None` otherwise.
    pub fn tick(&mut self, now: Instant) -> Option<bool> {
        let current = match self.last_seen {
            Some(t) => now.saturating_duration_since(t) < self.timeout,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_with_no_heartbeat_is_a_disconnect_edge() {
        let mut live = Liveness::new(Duration::from_secs(2));
        let now = Instant::now();
        assert_eq!(live.tick(now), Some(false));
        assert!(!live.is_connected());
    }

    #[test]
    fn observation_then_tick_is_a_connect_edge_and_then_stable() {
        let mut live = Liveness::new(Duration::from_secs(2));
        let t0 = Instant::now();
        assert_eq!(live.tick(t0), Some(false));

        live.observe(t0);
        assert_eq!(live.tick(t0 + Duration::from_millis(100)), Some(true));
        assert!(live.is_connected());
        // no further edge while still within the window
        assert_eq!(live.tick(t0 + Duration::from_millis(200)), None);
    }

    #[test]
    fn missing_the_timeout_is_a_disconnect_edge() {
        let mut live = Liveness::new(Duration::from_secs(2));
        let t0 = Instant::now();
        live.observe(t0);
        live.tick(t0);
        assert_eq!(live.tick(t0 + Duration::from_secs(3)), Some(false));
    }
}
