use crate::error::CodecError;
use crate::tag::Tag;
use crate::WireStruct;

/// Payload of `CbToHost_Heartbeat`: CB telemetry sampled at reply time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CbTelemetry {
    pub cp_high_mv: i16,
    pub cp_low_mv: i16,
    pub pp_milliohm: u16,
    pub pp_mv: u16,
    pub relay_feedback: [u8; 3],
    pub mcu_temp_tenths_c: i16,
    pub pcb_temp_tenths_c: i16,
    pub modem_temp_tenths_c: i16,
    pub pt1000_tenths_c: [i16; 2],
    pub uptime_ms: u32,
}

impl WireStruct for CbTelemetry {
    const TAG: Tag = Tag::CbToHostHeartbeat;

    fn encoded_len(&self) -> usize {
        2 + 2 + 2 + 2 + 3 + 2 + 2 + 2 + 2 * 2 + 4
    }

    fn write_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.cp_high_mv.to_le_bytes());
        out.extend_from_slice(&self.cp_low_mv.to_le_bytes());
        out.extend_from_slice(&self.pp_milliohm.to_le_bytes());
        out.extend_from_slice(&self.pp_mv.to_le_bytes());
        out.extend_from_slice(&self.relay_feedback);
        out.extend_from_slice(&self.mcu_temp_tenths_c.to_le_bytes());
        out.extend_from_slice(&self.pcb_temp_tenths_c.to_le_bytes());
        out.extend_from_slice(&self.modem_temp_tenths_c.to_le_bytes());
        for t in &self.pt1000_tenths_c {
            out.extend_from_slice(&t.to_le_bytes());
        }
        out.extend_from_slice(&self.uptime_ms.to_le_bytes());
    }

    fn read_body(body: &[u8]) -> Result<Self, CodecError> {
        let expected = CbTelemetry::default().encoded_len();
        if body.len() != expected {
            return Err(CodecError::WrongBodyLength {
                tag: Self::TAG.name(),
                expected,
                got: body.len(),
            });
        }
        let u16_at = |o: usize| u16::from_le_bytes(body[o..o + 2].try_into().unwrap());
        let i16_at = |o: usize| i16::from_le_bytes(body[o..o + 2].try_into().unwrap());
        Ok(CbTelemetry {
            cp_high_mv: i16_at(0),
            cp_low_mv: i16_at(2),
            pp_milliohm: u16_at(4),
            pp_mv: u16_at(6),
            relay_feedback: [body[8], body[9], body[10]],
            mcu_temp_tenths_c: i16_at(11),
            pcb_temp_tenths_c: i16_at(13),
            modem_temp_tenths_c: i16_at(15),
            pt1000_tenths_c: [i16_at(17), i16_at(19)],
            uptime_ms: u32::from_le_bytes(body[21..25].try_into().unwrap()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_round_trips() {
        let t = CbTelemetry {
            cp_high_mv: 12000,
            cp_low_mv: -12000,
            pp_milliohm: 2700,
            pp_mv: 3300,
            relay_feedback: [1, 0, 1],
            mcu_temp_tenths_c: 425,
            pcb_temp_tenths_c: 410,
            modem_temp_tenths_c: 500,
            pt1000_tenths_c: [300, -50],
            uptime_ms: 123456,
        };
        let mut buf = Vec::new();
        t.write_body(&mut buf);
        assert_eq!(buf.len(), t.encoded_len());
        assert_eq!(CbTelemetry::read_body(&buf).unwrap(), t);
    }
}
