//! Wire format for the Host <-> ChargeBridge (CB) UDP protocol.
//!
//! Every packet is a 16-bit little-endian tag followed by a fixed or
//! bounded body (see [`tag`] and [`codec`]). Structs are byte-packed,
//! little-endian, without padding; field order is significant.

pub mod bsp;
pub mod codec;
pub mod config;
pub mod error;
pub mod firmware;
pub mod gpio;
pub mod tag;
pub mod telemetry;

pub use bsp::{BspCommand, BspStatus, CpState, PpStateType1, PpStateType2, RelayState};
pub use codec::{decode, encode, Frame};
pub use config::CbConfig;
pub use error::CodecError;
pub use gpio::{GpioCommand, GpioStatus};
pub use tag::Tag;
pub use telemetry::CbTelemetry;

/// Maximum UDP payload (tag + body) the CB transport will accept.
///
/// 1280 bytes leaves a 256-byte reserve under the 1500-byte Ethernet MTU
/// for lower-layer framing, so the codec never needs to fragment.
pub const MAX_UDP_BODY: usize = 1280;

/// Maximum size of any single CB struct body (excludes the 2-byte tag).
pub const MAX_CB_STRUCT_SIZE: usize = 1152;

/// A type whose wire body has a fixed, known-in-advance encoded size,
/// except [`firmware::FirmwarePacket`] whose `data_len` is authoritative.
pub trait WireStruct: Sized {
    const TAG: Tag;

    fn encoded_len(&self) -> usize;
    fn write_body(&self, out: &mut Vec<u8>);
    fn read_body(body: &[u8]) -> Result<Self, CodecError>;
}
