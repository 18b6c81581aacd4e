use crate::error::CodecError;
use crate::tag::Tag;
use crate::WireStruct;

/// Firmware image transfer is chunked into fixed 1024-byte sectors.
pub const SECTOR_SIZE: usize = 1024;

/// Reply discriminator shared by every firmware-protocol request frame
/// (§4.9: "All request frames above expect an `AppUDPResponse` reply").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppUdpResponse {
    Ok,
    Bad,
}

impl AppUdpResponse {
    pub const OK_VALUE: u32 = 0x500D_500D;
    pub const BAD_VALUE: u32 = 0xBADB_AD00;

    pub const fn to_u32(self) -> u32 {
        match self {
            AppUdpResponse::Ok => Self::OK_VALUE,
            AppUdpResponse::Bad => Self::BAD_VALUE,
        }
    }

    pub const fn from_u32(v: u32) -> Option<AppUdpResponse> {
        match v {
            Self::OK_VALUE => Some(AppUdpResponse::Ok),
            Self::BAD_VALUE => Some(AppUdpResponse::Bad),
            _ => None,
        }
    }

    pub const fn is_ok(self) -> bool {
        matches!(self, AppUdpResponse::Ok)
    }
}

/// Firmware version blob returned by `FirmwareGetVersion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VersionInfo {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub build: u32,
}

/// The decoded reply to either `FirmwarePing`/`FirmwareStart`/... (a plain
/// [`AppUdpResponse`]) or to `FirmwareGetVersion` (a [`VersionInfo`]).
/// Both share tag `FirmwareReply`; the receiver discriminates on body
/// length (4 bytes vs. 7 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareReply {
    Ack(AppUdpResponse),
    Version(VersionInfo),
}

impl WireStruct for FirmwareReply {
    const TAG: Tag = Tag::FirmwareReply;

    fn encoded_len(&self) -> usize {
        match self {
            FirmwareReply::Ack(_) => 4,
            FirmwareReply::Version(_) => 7,
        }
    }

    fn write_body(&self, out: &mut Vec<u8>) {
        match self {
            FirmwareReply::Ack(r) => out.extend_from_slice(&r.to_u32().to_le_bytes()),
            FirmwareReply::Version(v) => {
                out.push(v.major);
                out.push(v.minor);
                out.push(v.patch);
                out.extend_from_slice(&v.build.to_le_bytes());
            }
        }
    }

    fn read_body(body: &[u8]) -> Result<Self, CodecError> {
        match body.len() {
            4 => {
                let raw = u32::from_le_bytes(body.try_into().unwrap());
                let resp = AppUdpResponse::from_u32(raw).ok_or_else(|| CodecError::FieldOutOfRange {
                    tag: Self::TAG.name(),
                    field: "response",
                    reason: format!("unrecognized AppUDPResponse value 0x{raw:08X}"),
                })?;
                Ok(FirmwareReply::Ack(resp))
            }
            7 => Ok(FirmwareReply::Version(VersionInfo {
                major: body[0],
                minor: body[1],
                patch: body[2],
                build: u32::from_le_bytes(body[3..7].try_into().unwrap()),
            })),
            other => Err(CodecError::WrongBodyLength {
                tag: Self::TAG.name(),
                expected: 4,
                got: other,
            }),
        }
    }
}

/// Which integrity/authenticity mechanisms the CB should apply while
/// receiving the image (the CB itself performs cryptographic
/// verification; the host only announces which checks to expect).
pub mod firmware_start_flags {
    pub const USE_CRC: u8 = 1 << 0;
    pub const USE_SHA: u8 = 1 << 1;
    pub const USE_SIGNATURE: u8 = 1 << 2;
}

/// `FirmwareStart` request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareStart {
    pub iv: [u8; 16],
    pub flags: u8,
    pub firmware_len: u32,
}

impl WireStruct for FirmwareStart {
    const TAG: Tag = Tag::FirmwareStart;

    fn encoded_len(&self) -> usize {
        16 + 1 + 4
    }

    fn write_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.iv);
        out.push(self.flags);
        out.extend_from_slice(&self.firmware_len.to_le_bytes());
    }

    fn read_body(body: &[u8]) -> Result<Self, CodecError> {
        if body.len() != 21 {
            return Err(CodecError::WrongBodyLength {
                tag: Self::TAG.name(),
                expected: 21,
                got: body.len(),
            });
        }
        let mut iv = [0u8; 16];
        iv.copy_from_slice(&body[0..16]);
        Ok(FirmwareStart {
            iv,
            flags: body[16],
            firmware_len: u32::from_le_bytes(body[17..21].try_into().unwrap()),
        })
    }
}

/// One 1024-byte sector of the firmware image. `data_len` is the
/// authoritative byte count (the wire body is *not* padded to the full
/// sector size), unlike every other fixed-size tag in this codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwarePacket {
    pub last_packet: bool,
    pub sector: u16,
    pub data: Vec<u8>,
}

impl WireStruct for FirmwarePacket {
    const TAG: Tag = Tag::FirmwarePacket;

    fn encoded_len(&self) -> usize {
        1 + 2 + 2 + self.data.len()
    }

    fn write_body(&self, out: &mut Vec<u8>) {
        out.push(self.last_packet as u8);
        out.extend_from_slice(&self.sector.to_le_bytes());
        out.extend_from_slice(&(self.data.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.data);
    }

    fn read_body(body: &[u8]) -> Result<Self, CodecError> {
        if body.len() < 5 {
            return Err(CodecError::WrongBodyLength {
                tag: Self::TAG.name(),
                expected: 5,
                got: body.len(),
            });
        }
        let last_packet = body[0] != 0;
        let sector = u16::from_le_bytes(body[1..3].try_into().unwrap());
        let data_len = u16::from_le_bytes(body[3..5].try_into().unwrap()) as usize;
        if data_len > SECTOR_SIZE {
            return Err(CodecError::FieldOutOfRange {
                tag: Self::TAG.name(),
                field: "data_len",
                reason: format!("{data_len} exceeds sector size {SECTOR_SIZE}"),
            });
        }
        let rest = &body[5..];
        if rest.len() != data_len {
            return Err(CodecError::WrongBodyLength {
                tag: Self::TAG.name(),
                expected: 5 + data_len,
                got: body.len(),
            });
        }
        Ok(FirmwarePacket {
            last_packet,
            sector,
            data: rest.to_vec(),
        })
    }
}

/// `FirmwareFinish` request body, closing the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareFinish {
    pub firmware_len: u32,
    pub signature: [u8; 128],
    pub signature_len: u16,
    pub watermark: u32,
}

impl WireStruct for FirmwareFinish {
    const TAG: Tag = Tag::FirmwareFinish;

    fn encoded_len(&self) -> usize {
        4 + 128 + 2 + 4
    }

    fn write_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.firmware_len.to_le_bytes());
        out.extend_from_slice(&self.signature);
        out.extend_from_slice(&self.signature_len.to_le_bytes());
        out.extend_from_slice(&self.watermark.to_le_bytes());
    }

    fn read_body(body: &[u8]) -> Result<Self, CodecError> {
        if body.len() != 138 {
            return Err(CodecError::WrongBodyLength {
                tag: Self::TAG.name(),
                expected: 138,
                got: body.len(),
            });
        }
        let mut signature = [0u8; 128];
        signature.copy_from_slice(&body[4..132]);
        Ok(FirmwareFinish {
            firmware_len: u32::from_le_bytes(body[0..4].try_into().unwrap()),
            signature,
            signature_len: u16::from_le_bytes(body[132..134].try_into().unwrap()),
            watermark: u32::from_le_bytes(body[134..138].try_into().unwrap()),
        })
    }
}

/// Empty-bodied requests: ping, get-version, cancel.
macro_rules! empty_body_request {
    ($name:ident, $tag:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name;

        impl WireStruct for $name {
            const TAG: Tag = $tag;

            fn encoded_len(&self) -> usize {
                0
            }

            fn write_body(&self, _out: &mut Vec<u8>) {}

            fn read_body(body: &[u8]) -> Result<Self, CodecError> {
                if !body.is_empty() {
                    return Err(CodecError::WrongBodyLength {
                        tag: Self::TAG.name(),
                        expected: 0,
                        got: body.len(),
                    });
                }
                Ok($name)
            }
        }
    };
}

empty_body_request!(FirmwarePing, Tag::FirmwarePing);
empty_body_request!(FirmwareGetVersion, Tag::FirmwareGetVersion);
empty_body_request!(FirmwareUpdateCancel, Tag::FirmwareUpdateCancel);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_udp_response_round_trips() {
        assert_eq!(
            AppUdpResponse::from_u32(AppUdpResponse::Ok.to_u32()),
            Some(AppUdpResponse::Ok)
        );
        assert_eq!(
            AppUdpResponse::from_u32(AppUdpResponse::Bad.to_u32()),
            Some(AppUdpResponse::Bad)
        );
        assert_eq!(AppUdpResponse::from_u32(0xDEAD_BEEF), None);
    }

    #[test]
    fn firmware_reply_discriminates_on_body_length() {
        let mut buf = Vec::new();
        FirmwareReply::Ack(AppUdpResponse::Ok).write_body(&mut buf);
        assert_eq!(buf.len(), 4);
        assert_eq!(
            FirmwareReply::read_body(&buf).unwrap(),
            FirmwareReply::Ack(AppUdpResponse::Ok)
        );

        let mut buf = Vec::new();
        let v = VersionInfo {
            major: 1,
            minor: 2,
            patch: 3,
            build: 42,
        };
        FirmwareReply::Version(v).write_body(&mut buf);
        assert_eq!(buf.len(), 7);
        assert_eq!(FirmwareReply::read_body(&buf).unwrap(), FirmwareReply::Version(v));
    }

    #[test]
    fn firmware_packet_uses_data_len_not_fixed_size() {
        let pkt = FirmwarePacket {
            last_packet: true,
            sector: 3,
            data: vec![0xAB; 100],
        };
        let mut buf = Vec::new();
        pkt.write_body(&mut buf);
        assert_eq!(buf.len(), 105); // not padded to 1024
        assert_eq!(FirmwarePacket::read_body(&buf).unwrap(), pkt);
    }

    #[test]
    fn firmware_packet_rejects_oversized_sector() {
        let mut body = vec![0u8, 0, 0];
        body.extend_from_slice(&(SECTOR_SIZE as u16 + 1).to_le_bytes());
        let err = FirmwarePacket::read_body(&body).unwrap_err();
        assert!(matches!(err, CodecError::FieldOutOfRange { .. }));
    }

    #[test]
    fn firmware_finish_round_trips() {
        let f = FirmwareFinish {
            firmware_len: 65536,
            signature: [7u8; 128],
            signature_len: 64,
            watermark: 0xCAFEBABE,
        };
        let mut buf = Vec::new();
        f.write_body(&mut buf);
        assert_eq!(FirmwareFinish::read_body(&buf).unwrap(), f);
    }

    #[test]
    fn empty_body_requests_reject_extra_bytes() {
        assert!(FirmwarePing::read_body(&[]).is_ok());
        assert!(FirmwarePing::read_body(&[1]).is_err());
    }
}
