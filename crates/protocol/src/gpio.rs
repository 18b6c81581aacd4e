use crate::config::GPIO_SLOTS;
use crate::error::CodecError;
use crate::tag::Tag;
use crate::WireStruct;

/// `HostToCb_Gpio` payload: one output state byte per configured slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioCommand {
    pub states: [u8; GPIO_SLOTS],
}

impl Default for GpioCommand {
    fn default() -> Self {
        GpioCommand {
            states: [0; GPIO_SLOTS],
        }
    }
}

impl WireStruct for GpioCommand {
    const TAG: Tag = Tag::HostToCbGpio;

    fn encoded_len(&self) -> usize {
        GPIO_SLOTS
    }

    fn write_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.states);
    }

    fn read_body(body: &[u8]) -> Result<Self, CodecError> {
        if body.len() != GPIO_SLOTS {
            return Err(CodecError::WrongBodyLength {
                tag: Self::TAG.name(),
                expected: GPIO_SLOTS,
                got: body.len(),
            });
        }
        let mut states = [0u8; GPIO_SLOTS];
        states.copy_from_slice(body);
        Ok(GpioCommand { states })
    }
}

/// `CbToHost_Gpio` payload: one input state byte per configured slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioStatus {
    pub states: [u8; GPIO_SLOTS],
}

impl Default for GpioStatus {
    fn default() -> Self {
        GpioStatus {
            states: [0; GPIO_SLOTS],
        }
    }
}

impl WireStruct for GpioStatus {
    const TAG: Tag = Tag::CbToHostGpio;

    fn encoded_len(&self) -> usize {
        GPIO_SLOTS
    }

    fn write_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.states);
    }

    fn read_body(body: &[u8]) -> Result<Self, CodecError> {
        if body.len() != GPIO_SLOTS {
            return Err(CodecError::WrongBodyLength {
                tag: Self::TAG.name(),
                expected: GPIO_SLOTS,
                got: body.len(),
            });
        }
        let mut states = [0u8; GPIO_SLOTS];
        states.copy_from_slice(body);
        Ok(GpioStatus { states })
    }
}
