//! GPIO bridge (component M): "a minor twin of the heartbeat service"
//! (§9) — send `HostToCb_Gpio`, receive `CbToHost_Gpio`, bridge to/from
//! a bus topic. No separate UDP port is listed for GPIO in §6, so it
//! shares the management channel's socket shape (its own connected
//! client socket to the same remote port, demultiplexed by local port
//! like every other sub-bridge here).

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use bus::BusClient;
use protocol::codec::{decode, encode, Frame};
use protocol::config::GPIO_SLOTS;
use protocol::GpioCommand;
use reactor::{Reactor, TimerSource, UdpEndpoint};
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

#[derive(Debug, Clone, Deserialize)]
struct SetStates {
    states: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
struct GpioState {
    states: [u8; GPIO_SLOTS],
}

struct Inner {
    command: GpioCommand,
}

pub struct GpioHandle {
    _endpoint: Rc<UdpEndpoint>,
    _timer: TimerSource,
    inner: Rc<RefCell<Inner>>,
}

impl GpioHandle {
    pub fn current_command(&self) -> GpioCommand {
        self.inner.borrow().command
    }

    /// Applies an inbound `set_states` bus message to the registered
    /// bridge's live command, the same mutation [`GpioBridge::apply_set_states`]
    /// performs before registration — this is the post-register seam a
    /// caller's bus-dispatch logic actually has access to.
    pub fn apply_set_states(&self, payload: &[u8]) {
        apply_set_states(&self.inner, payload);
    }
}

pub struct GpioBridge {
    endpoint: Rc<UdpEndpoint>,
    timer: TimerSource,
    inner: Rc<RefCell<Inner>>,
    topic_prefix: String,
}

impl GpioBridge {
    /// Raw fds this bridge will register once [`Self::register`] is
    /// called; kept so a caller can `unregister` them explicitly on
    /// teardown instead of leaving stale reactor entries behind.
    pub fn raw_fds(&self) -> [std::os::fd::RawFd; 2] {
        [self.endpoint.as_raw_fd(), self.timer.as_raw_fd()]
    }

    pub fn new(module_id: &str, remote: SocketAddr, bind: SocketAddr, resend_interval: Duration) -> Result<Self, BridgeError> {
        let endpoint = Rc::new(UdpEndpoint::open_client(remote, bind)?);
        let timer = TimerSource::new()?;
        timer.set_periodic(resend_interval)?;
        Ok(GpioBridge {
            endpoint,
            timer,
            inner: Rc::new(RefCell::new(Inner {
                command: GpioCommand::default(),
            })),
            topic_prefix: format!("{module_id}/gpio/"),
        })
    }

    /// Registers the UDP endpoint (status -> bus), the resend timer,
    /// and the bus subscription (`set_states` -> command mutation) with
    /// `reactor`. `bus` must already be registered with `reactor` by
    /// the caller; this only subscribes and publishes through it.
    pub fn register(self, reactor: &mut Reactor, bus: Rc<RefCell<BusClient>>) -> Result<GpioHandle, BridgeError> {
        bus.borrow_mut().subscribe(&format!("{}#", self.topic_prefix))?;

        let publish_topic = format!("{}state", self.topic_prefix);
        self.endpoint.register(reactor, move |frame| {
            if let Ok(Frame::CbToHostGpio(status)) = decode(frame) {
                let payload = GpioState { states: status.states };
                if let Err(e) = bus.borrow().publish(&publish_topic, &payload) {
                    tracing::warn!(error = %e, "failed to publish GPIO state");
                }
            }
        })?;

        let endpoint_for_timer = Rc::clone(&self.endpoint);
        let inner_for_timer = Rc::clone(&self.inner);
        let timer = self.timer.register(reactor, move || {
            let command = inner_for_timer.borrow().command;
            if let Ok(bytes) = encode(&command) {
                if let Err(e) = endpoint_for_timer.tx(&bytes) {
                    tracing::warn!(error = %e, "GPIO command transmit failed");
                }
            }
        })?;

        Ok(GpioHandle {
            _endpoint: self.endpoint,
            _timer: timer,
            inner: self.inner,
        })
    }

    /// Applies an inbound `set_states` bus message (called from the
    /// caller's subscription callback, which owns the `BusClient` and
    /// therefore the JSON deserialization of the topic's operation name).
    pub fn apply_set_states(&self, payload: &[u8]) {
        apply_set_states(&self.inner, payload);
    }

    pub fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }
}

fn apply_set_states(inner: &Rc<RefCell<Inner>>, payload: &[u8]) {
    match serde_json::from_slice::<SetStates>(payload) {
        Ok(msg) => {
            let mut inner = inner.borrow_mut();
            for (slot, value) in inner.command.states.iter_mut().zip(msg.states.iter()) {
                *slot = *value;
            }
        }
        Err(e) => tracing::warn!(error = %e, "invalid set_states payload"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_states_mutates_only_provided_slots() {
        let bridge = GpioBridge {
            endpoint: Rc::new(UdpEndpoint::open_client("127.0.0.1:16000".parse().unwrap(), "127.0.0.1:0".parse().unwrap()).unwrap()),
            timer: TimerSource::new().unwrap(),
            inner: Rc::new(RefCell::new(Inner {
                command: GpioCommand::default(),
            })),
            topic_prefix: "cb-1/gpio/".to_string(),
        };
        bridge.apply_set_states(br#"{"states":[1,0,1]}"#);
        let cmd = bridge.inner.borrow().command;
        assert_eq!(&cmd.states[..3], &[1, 0, 1]);
        assert_eq!(cmd.states[3], 0);
    }
}
