use crate::bsp::{BspCommand, BspStatus};
use crate::config::CbConfig;
use crate::error::CodecError;
use crate::firmware::{
    FirmwareFinish, FirmwareGetVersion, FirmwarePacket, FirmwarePing, FirmwareReply,
    FirmwareStart, FirmwareUpdateCancel,
};
use crate::gpio::{GpioCommand, GpioStatus};
use crate::tag::Tag;
use crate::telemetry::CbTelemetry;
use crate::{WireStruct, MAX_CB_STRUCT_SIZE, MAX_UDP_BODY};

/// Every frame the CB management codec can decode, as a sum type.
///
/// `Unknown` carries the raw tag and body for any tag value not
/// recognized above; the transport never drops these (§4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    HostToCbHeartbeat(CbConfig),
    CbToHostHeartbeat(CbTelemetry),
    HostToCbGpio(GpioCommand),
    CbToHostGpio(GpioStatus),
    EvseBspCommand(BspCommand),
    EvseBspStatus(BspStatus),
    FirmwareReply(FirmwareReply),
    FirmwareStart(FirmwareStart),
    FirmwarePacket(FirmwarePacket),
    FirmwareFinish(FirmwareFinish),
    FirmwareUpdateCancel(FirmwareUpdateCancel),
    FirmwarePing(FirmwarePing),
    FirmwareGetVersion(FirmwareGetVersion),
    Unknown(u16, Vec<u8>),
}

/// Encodes a tagged struct into a full frame: 2-byte LE tag + body.
pub fn encode<T: WireStruct>(value: &T) -> Result<Vec<u8>, CodecError> {
    let body_len = value.encoded_len();
    if body_len > MAX_CB_STRUCT_SIZE {
        return Err(CodecError::BodyTooLarge {
            tag: T::TAG.name(),
            got: body_len,
            max: MAX_CB_STRUCT_SIZE,
        });
    }
    let mut out = Vec::with_capacity(2 + body_len);
    out.extend_from_slice(&T::TAG.value().to_le_bytes());
    value.write_body(&mut out);
    if out.len() > MAX_UDP_BODY {
        return Err(CodecError::FrameTooLarge {
            got: out.len(),
            max: MAX_UDP_BODY,
        });
    }
    Ok(out)
}

/// Decodes a full frame (tag + body) into a [`Frame`] variant.
pub fn decode(frame: &[u8]) -> Result<Frame, CodecError> {
    if frame.len() < 2 {
        return Err(CodecError::FrameTooShort(frame.len()));
    }
    if frame.len() > MAX_UDP_BODY {
        return Err(CodecError::FrameTooLarge {
            got: frame.len(),
            max: MAX_UDP_BODY,
        });
    }
    let tag_value = u16::from_le_bytes([frame[0], frame[1]]);
    let tag = Tag::from_value(tag_value);
    let body = &frame[2..];

    Ok(match tag {
        Tag::HostToCbHeartbeat => Frame::HostToCbHeartbeat(CbConfig::read_body(body)?),
        Tag::CbToHostHeartbeat => Frame::CbToHostHeartbeat(CbTelemetry::read_body(body)?),
        Tag::HostToCbGpio => Frame::HostToCbGpio(GpioCommand::read_body(body)?),
        Tag::CbToHostGpio => Frame::CbToHostGpio(GpioStatus::read_body(body)?),
        Tag::EvseBspCommand => Frame::EvseBspCommand(BspCommand::read_body(body)?),
        Tag::EvseBspStatus => Frame::EvseBspStatus(BspStatus::read_body(body)?),
        Tag::FirmwareReply => Frame::FirmwareReply(FirmwareReply::read_body(body)?),
        Tag::FirmwareStart => Frame::FirmwareStart(FirmwareStart::read_body(body)?),
        Tag::FirmwarePacket => Frame::FirmwarePacket(FirmwarePacket::read_body(body)?),
        Tag::FirmwareFinish => Frame::FirmwareFinish(FirmwareFinish::read_body(body)?),
        Tag::FirmwareUpdateCancel => Frame::FirmwareUpdateCancel(FirmwareUpdateCancel::read_body(body)?),
        Tag::FirmwarePing => Frame::FirmwarePing(FirmwarePing::read_body(body)?),
        Tag::FirmwareGetVersion => Frame::FirmwareGetVersion(FirmwareGetVersion::read_body(body)?),
        Tag::Unknown(v) => Frame::Unknown(v, body.to_vec()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsp::CpState;

    #[test]
    fn round_trips_every_fixed_size_management_tag() {
        let config = CbConfig::default();
        let frame = encode(&config).unwrap();
        assert_eq!(decode(&frame).unwrap(), Frame::HostToCbHeartbeat(config));

        let telemetry = CbTelemetry {
            uptime_ms: 42,
            ..Default::default()
        };
        let frame = encode(&telemetry).unwrap();
        assert_eq!(decode(&frame).unwrap(), Frame::CbToHostHeartbeat(telemetry));

        let gpio_cmd = GpioCommand::default();
        let frame = encode(&gpio_cmd).unwrap();
        assert_eq!(decode(&frame).unwrap(), Frame::HostToCbGpio(gpio_cmd));

        let gpio_status = GpioStatus::default();
        let frame = encode(&gpio_status).unwrap();
        assert_eq!(decode(&frame).unwrap(), Frame::CbToHostGpio(gpio_status));

        let bsp_cmd = BspCommand {
            ev_set_cp_state: CpState::C.to_u8(),
            ..Default::default()
        };
        let frame = encode(&bsp_cmd).unwrap();
        assert_eq!(decode(&frame).unwrap(), Frame::EvseBspCommand(bsp_cmd));

        let bsp_status = BspStatus::default();
        let frame = encode(&bsp_status).unwrap();
        assert_eq!(decode(&frame).unwrap(), Frame::EvseBspStatus(bsp_status));
    }

    #[test]
    fn unrecognized_tag_is_surfaced_not_dropped() {
        let mut frame = vec![0x34, 0x12]; // tag 0x1234
        frame.extend_from_slice(&[1, 2, 3]);
        match decode(&frame).unwrap() {
            Frame::Unknown(tag, body) => {
                assert_eq!(tag, 0x1234);
                assert_eq!(body, vec![1, 2, 3]);
            }
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn rejects_wrong_fixed_body_length() {
        let mut frame = vec![];
        frame.extend_from_slice(&Tag::CbToHostHeartbeat.value().to_le_bytes());
        frame.extend_from_slice(&[1, 2, 3]); // way too short
        assert!(decode(&frame).is_err());
    }

    #[test]
    fn frame_too_short_for_a_tag_is_rejected() {
        assert_eq!(decode(&[0x01]).unwrap_err(), CodecError::FrameTooShort(1));
    }
}
