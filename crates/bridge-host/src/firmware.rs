//! Firmware updater (component H, §4.9). A synchronous request/reply
//! sequence run on the manager thread — never the reactor thread (§5:
//! "any blocking I/O... runs on the manager thread") — against a
//! short-lived UDP client distinct from the session's long-lived
//! reactor-registered endpoint.

use std::fs;
use std::net::{SocketAddr, UdpSocket};
use std::path::Path;
use std::time::Duration;

use protocol::codec::{decode, encode, Frame};
use protocol::firmware::{
    firmware_start_flags, AppUdpResponse, FirmwareFinish, FirmwarePacket, FirmwareReply, FirmwareStart, SECTOR_SIZE,
};
use protocol::firmware::{FirmwareGetVersion, FirmwarePing, VersionInfo};

use crate::error::BridgeError;

const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

pub struct FirmwareUpdater {
    socket: UdpSocket,
    retries: u32,
    timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The CB's reported version already matched the image; nothing sent.
    AlreadyCurrent(VersionInfo),
    /// The full transfer ran and the post-update version check passed.
    Updated { from: VersionInfo, to: VersionInfo },
}

impl FirmwareUpdater {
    pub fn connect(remote: SocketAddr) -> Result<Self, BridgeError> {
        Self::connect_with(remote, DEFAULT_RETRIES, DEFAULT_TIMEOUT)
    }

    pub fn connect_with(remote: SocketAddr, retries: u32, timeout: Duration) -> Result<Self, BridgeError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).map_err(|e| BridgeError::Firmware(e.to_string()))?;
        socket.connect(remote).map_err(|e| BridgeError::Firmware(e.to_string()))?;
        socket
            .set_read_timeout(Some(timeout))
            .map_err(|e| BridgeError::Firmware(e.to_string()))?;
        Ok(FirmwareUpdater { socket, retries, timeout })
    }

    /// Confirms the CB is responsive (`FirmwarePing`) and reads its
    /// current version. Callers use this both before deciding whether
    /// an update is needed and after `run` to confirm success.
    pub fn ping_and_version(&self) -> Result<VersionInfo, BridgeError> {
        self.request_ack(&FirmwarePing)?;
        match self.request_reply(&FirmwareGetVersion)? {
            FirmwareReply::Version(v) => Ok(v),
            FirmwareReply::Ack(_) => Err(BridgeError::Firmware("expected version reply, got ack".to_string())),
        }
    }

    /// Runs the full update if `image`'s encoded version tag differs
    /// from the CB's current one; otherwise leaves the CB untouched.
    /// `expected_version` is the version the image being pushed claims
    /// to be (read from the image's own header/manifest by the caller).
    pub fn update_if_needed(&self, path: &Path, expected_version: VersionInfo) -> Result<UpdateOutcome, BridgeError> {
        let current = self.ping_and_version()?;
        if current == expected_version {
            return Ok(UpdateOutcome::AlreadyCurrent(current));
        }

        let image = fs::read(path).map_err(|e| BridgeError::Firmware(format!("reading {}: {e}", path.display())))?;
        self.transfer(&image)?;

        let confirmed = self.ping_and_version()?;
        if confirmed != expected_version {
            return Err(BridgeError::Firmware(format!(
                "post-update version mismatch: expected {expected_version:?}, got {confirmed:?}"
            )));
        }
        Ok(UpdateOutcome::Updated {
            from: current,
            to: confirmed,
        })
    }

    fn transfer(&self, image: &[u8]) -> Result<(), BridgeError> {
        self.request_ack(&FirmwareStart {
            iv: [0u8; 16],
            flags: firmware_start_flags::USE_CRC | firmware_start_flags::USE_SHA,
            firmware_len: image.len() as u32,
        })?;

        let total_sectors = image.len().div_ceil(SECTOR_SIZE);
        for (sector, chunk) in image.chunks(SECTOR_SIZE).enumerate() {
            let packet = FirmwarePacket {
                last_packet: sector + 1 == total_sectors,
                sector: sector as u16,
                data: chunk.to_vec(),
            };
            self.request_ack(&packet)?;
        }

        self.request_ack(&FirmwareFinish {
            firmware_len: image.len() as u32,
            signature: [0u8; 128],
            signature_len: 0,
            watermark: 0,
        })?;
        Ok(())
    }

    /// Aborts an in-progress transfer; best-effort, logs but does not
    /// fail if the CB is already unreachable.
    pub fn cancel(&self) {
        if let Err(e) = self.request_ack(&protocol::firmware::FirmwareUpdateCancel) {
            tracing::warn!(error = %e, "firmware cancel request failed");
        }
    }

    fn request_ack<T: protocol::WireStruct>(&self, req: &T) -> Result<(), BridgeError> {
        match self.request_reply(req)? {
            FirmwareReply::Ack(AppUdpResponse::Ok) => Ok(()),
            FirmwareReply::Ack(AppUdpResponse::Bad) => Err(BridgeError::Firmware("CB rejected request".to_string())),
            FirmwareReply::Version(_) => Err(BridgeError::Firmware("expected ack reply, got version".to_string())),
        }
    }

    fn request_reply<T: protocol::WireStruct>(&self, req: &T) -> Result<FirmwareReply, BridgeError> {
        let bytes = encode(req).map_err(|e| BridgeError::Firmware(e.to_string()))?;
        let mut buf = [0u8; protocol::MAX_UDP_BODY];
        let mut last_err = None;

        for attempt in 0..=self.retries {
            if let Err(e) = self.socket.send(&bytes) {
                last_err = Some(e.to_string());
                continue;
            }
            match self.socket.recv(&mut buf) {
                Ok(n) => match decode(&buf[..n]) {
                    Ok(Frame::FirmwareReply(reply)) => return Ok(reply),
                    Ok(other) => last_err = Some(format!("unexpected frame {other:?}")),
                    Err(e) => last_err = Some(e.to_string()),
                },
                Err(e) => {
                    last_err = Some(e.to_string());
                    tracing::debug!(attempt, timeout = ?self.timeout, "firmware reply timed out, retrying");
                }
            }
        }
        Err(BridgeError::Firmware(last_err.unwrap_or_else(|| "no reply".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_current_skips_transfer() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();
        let version = VersionInfo {
            major: 1,
            minor: 2,
            patch: 3,
            build: 9,
        };

        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 64];
            loop {
                let (n, from) = match server.recv_from(&mut buf) {
                    Ok(v) => v,
                    Err(_) => return,
                };
                match decode(&buf[..n]) {
                    Ok(Frame::FirmwarePing(_)) => {
                        let reply = encode(&FirmwareReply::Ack(AppUdpResponse::Ok)).unwrap();
                        server.send_to(&reply, from).unwrap();
                    }
                    Ok(Frame::FirmwareGetVersion(_)) => {
                        let reply = encode(&FirmwareReply::Version(version)).unwrap();
                        server.send_to(&reply, from).unwrap();
                        return;
                    }
                    _ => {}
                }
            }
        });

        let updater = FirmwareUpdater::connect_with(server_addr, 1, Duration::from_millis(500)).unwrap();
        let outcome = updater.update_if_needed(Path::new("/nonexistent"), version).unwrap();
        assert_eq!(outcome, UpdateOutcome::AlreadyCurrent(version));
        handle.join().unwrap();
    }

    #[test]
    fn transfer_sends_start_every_sector_then_finish() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let server_addr = server.local_addr().unwrap();
        let image = vec![0xAAu8; SECTOR_SIZE * 2 + 17];
        let old_version = VersionInfo {
            major: 1,
            minor: 0,
            patch: 0,
            build: 1,
        };
        let new_version = VersionInfo {
            major: 1,
            minor: 0,
            patch: 1,
            build: 2,
        };

        let tmp = std::env::temp_dir().join(format!("fw-test-{:?}.bin", std::thread::current().id()));
        fs::write(&tmp, &image).unwrap();

        let mut first_version_sent = false;
        let expected_sectors = image.len().div_ceil(SECTOR_SIZE);
        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; protocol::MAX_UDP_BODY];
            let mut sectors_seen = 0usize;
            let mut saw_start = false;
            let mut saw_finish = false;
            loop {
                let (n, from) = server.recv_from(&mut buf).unwrap();
                match decode(&buf[..n]).unwrap() {
                    Frame::FirmwarePing(_) => {
                        let reply = encode(&FirmwareReply::Ack(AppUdpResponse::Ok)).unwrap();
                        server.send_to(&reply, from).unwrap();
                    }
                    Frame::FirmwareGetVersion(_) => {
                        let version = if first_version_sent { new_version } else { old_version };
                        first_version_sent = true;
                        let reply = encode(&FirmwareReply::Version(version)).unwrap();
                        server.send_to(&reply, from).unwrap();
                        if saw_finish {
                            return (sectors_seen, saw_start);
                        }
                    }
                    Frame::FirmwareStart(_) => {
                        saw_start = true;
                        let reply = encode(&FirmwareReply::Ack(AppUdpResponse::Ok)).unwrap();
                        server.send_to(&reply, from).unwrap();
                    }
                    Frame::FirmwarePacket(_) => {
                        sectors_seen += 1;
                        let reply = encode(&FirmwareReply::Ack(AppUdpResponse::Ok)).unwrap();
                        server.send_to(&reply, from).unwrap();
                    }
                    Frame::FirmwareFinish(_) => {
                        saw_finish = true;
                        let reply = encode(&FirmwareReply::Ack(AppUdpResponse::Ok)).unwrap();
                        server.send_to(&reply, from).unwrap();
                    }
                    _ => {}
                }
            }
        });

        let updater = FirmwareUpdater::connect_with(server_addr, 1, Duration::from_millis(500)).unwrap();
        let outcome = updater.update_if_needed(&tmp, new_version).unwrap();
        assert_eq!(
            outcome,
            UpdateOutcome::Updated {
                from: old_version,
                to: new_version
            }
        );

        let (sectors_seen, saw_start) = handle.join().unwrap();
        assert!(saw_start);
        assert_eq!(sectors_seen, expected_sectors);

        let _ = fs::remove_file(&tmp);
    }
}
