use std::collections::HashSet;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixDatagram;
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use rumqttc::{Client, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::BusError;

/// One inbound publish: topic and raw payload bytes. Callers
/// deserialize the per-operation JSON shape themselves; the bus layer
/// does not know translator-specific schemas.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Component D: a publish/subscribe client with auto-reconnect, a
/// keep-alive ping, and per-message delivery to the reactor thread.
///
/// The broker connection itself lives on a dedicated background thread
/// (`rumqttc::Connection::iter()` blocks on socket I/O); inbound
/// publishes cross to the reactor thread over a bounded channel. A
/// `UnixDatagram` pair is used purely as a wake-up signal so the
/// transfer composes with the reactor's fd-readiness model, the same
/// idiom the design notes suggest for the manager-thread/reactor-thread
/// boundary (§9), applied here in the opposite direction.
pub struct BusClient {
    client: Client,
    inbox: mpsc::Receiver<Message>,
    notify_rx: UnixDatagram,
    subscriptions: Arc<Mutex<HashSet<String>>>,
}

impl BusClient {
    pub fn connect(host: &str, port: u16, client_id: &str) -> Result<Self, BusError> {
        let mut opts = MqttOptions::new(client_id, host, port);
        opts.set_keep_alive(Duration::from_secs(5));
        opts.set_clean_session(true);

        let (client, connection) = Client::new(opts.clone(), 64);
        let (tx, inbox) = mpsc::sync_channel::<Message>(256);
        let (notify_tx, notify_rx) = UnixDatagram::pair()?;
        notify_rx.set_nonblocking(true)?;
        let subscriptions = Arc::new(Mutex::new(HashSet::new()));

        let reconnect_client = client.clone();
        let reconnect_subscriptions = Arc::clone(&subscriptions);
        thread::Builder::new()
            .name(format!("bus-{client_id}"))
            .spawn(move || {
                run_connection_loop(opts, connection, tx, notify_tx, reconnect_client, reconnect_subscriptions)
            })
            .expect("failed to spawn bus client thread");

        Ok(BusClient {
            client,
            inbox,
            notify_rx,
            subscriptions,
        })
    }

    pub fn subscribe(&mut self, filter: &str) -> Result<(), BusError> {
        if self.subscriptions.lock().unwrap().insert(filter.to_string()) {
            self.client.try_subscribe(filter, QoS::AtMostOnce)?;
        }
        Ok(())
    }

    /// Serializes `payload` as JSON and publishes without blocking. A
    /// full internal queue is reported as an error rather than blocking
    /// the reactor thread.
    pub fn publish(&self, topic: &str, payload: &impl Serialize) -> Result<(), BusError> {
        let bytes = serde_json::to_vec(payload).map_err(|e| BusError::Payload {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;
        self.client.try_publish(topic, QoS::AtMostOnce, false, bytes)?;
        Ok(())
    }

    /// The fd to register with the reactor, read-only. On readiness,
    /// call [`Self::drain`] to hand every pending message to a callback.
    pub fn as_raw_fd(&self) -> RawFd {
        self.notify_rx.as_raw_fd()
    }

    /// Non-blocking drain of whatever arrived since the last call. The
    /// wake-up byte(s) are discarded here too, coalescing any number of
    /// notifications that piled up between readiness waits.
    pub fn drain(&self, mut on_message: impl FnMut(&Message)) {
        let mut scratch = [0u8; 64];
        while self.notify_rx.recv(&mut scratch).is_ok() {}
        while let Ok(msg) = self.inbox.try_recv() {
            on_message(&msg);
        }
    }
}

/// Runs on the dedicated bus thread: iterates the broker connection
/// forever, forwarding `Publish` packets and letting `rumqttc`'s own
/// event loop perform reconnection (its `poll()` reconnects lazily on
/// the next call after an error); a fixed backoff avoids a hot loop
/// while the broker is down.
fn run_connection_loop(
    opts: MqttOptions,
    mut connection: rumqttc::Connection,
    tx: mpsc::SyncSender<Message>,
    notify_tx: UnixDatagram,
    client: Client,
    subscriptions: Arc<Mutex<HashSet<String>>>,
) {
    const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);
    let (host, port) = opts.broker_address();
    // `Connection::iter()` never terminates: each call to the
    // underlying eventloop's `poll()` reconnects automatically after an
    // error, so this single `for` loop *is* the reconnect loop.
    for notification in connection.iter() {
        match notification {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let msg = Message {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                if tx.try_send(msg).is_ok() {
                    let _ = notify_tx.send(&[1]);
                } else {
                    warn!("bus inbox full, dropping one message");
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("bus connected to {host}:{port}");
                for filter in subscriptions.lock().unwrap().iter() {
                    if let Err(e) = client.try_subscribe(filter.as_str(), QoS::AtMostOnce) {
                        warn!("resubscribe to {filter} failed: {e}");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("bus connection error, retrying in {RECONNECT_BACKOFF:?}: {e}");
                thread::sleep(RECONNECT_BACKOFF);
            }
        }
    }
    debug!("bus connection loop for {host}:{port} exited");
}
