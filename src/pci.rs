//! Protocol Control Information: the leading byte(s) of every ISO-TP frame.

use embedded_can::Id;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{frame::PhyFrame, FRAME_DATA_LEN, MAX_DL, PADDING};

/// Payload bytes carried by a First Frame.
pub const FF_DATA_LEN: usize = 6;
/// Maximum payload bytes carried by a Single or Consecutive Frame.
pub const CF_DATA_LEN: usize = 7;
pub const SF_MAX_DATA_LEN: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PduError {
    #[error("Tried to decode a PCI type but it was invalid ({0:?})")]
    UnknownPciType(u8),
    #[error("Tried to decode a flow status but it was invalid ({0:?})")]
    InvalidFlowStatus(u8),
    #[error("Received a Single Frame length ({0:?}) out of the valid range (0..=7)")]
    SingleFrameLength(u8),
    #[error("Received a First Frame length ({0:?}) out of the valid range (7..=4095)")]
    FirstFrameLength(u16),
    #[error("Tried to encode ({0:?}) payload bytes which do not fit the frame type")]
    InvalidPayloadLength(usize),
}

/// Frame type selected by the high nibble of PCI byte 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[num_enum(error_type(name = PduError, constructor = PduError::UnknownPciType))]
#[repr(u8)]
pub enum PciType {
    Single = 0x0,
    First = 0x1,
    Consecutive = 0x2,
    FlowControl = 0x3,
}

impl PciType {
    /// Classifies a frame by its first payload byte.
    pub fn of(byte: u8) -> Result<Self, PduError> {
        Self::try_from(byte >> 4)
    }
}

/// Flow status carried in the low nibble of a Flow Control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[num_enum(error_type(name = PduError, constructor = PduError::InvalidFlowStatus))]
#[repr(u8)]
pub enum FlowStatus {
    #[default]
    ContinueToSend = 0x0,
    Wait = 0x1,
    Overflow = 0x2,
}

/// STmin, the minimum gap a sender leaves between Consecutive Frames.
///
/// Codes 0x00..=0x7F are milliseconds, 0xF1..=0xF9 are multiples of 100 µs.
/// Every other code is reserved and is replaced by 0x7F (127 ms).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(transparent)]
pub struct SeparationTime(u8);

impl SeparationTime {
    pub const ZERO: Self = Self(0x00);
    pub const MAX: Self = Self(0x7F);

    /// Creates a separation time, normalizing reserved codes to [`Self::MAX`].
    pub const fn new(code: u8) -> Self {
        if Self::is_valid(code) {
            Self(code)
        } else {
            Self::MAX
        }
    }

    pub const fn is_valid(code: u8) -> bool {
        code <= 0x7F || (code >= 0xF1 && code <= 0xF9)
    }

    /// The on-wire code.
    pub const fn code(self) -> u8 {
        self.0
    }

    pub const fn as_micros(self) -> u32 {
        if self.0 <= 0x7F {
            self.0 as u32 * 1000
        } else {
            (self.0 - 0xF0) as u32 * 100
        }
    }
}

impl From<u8> for SeparationTime {
    fn from(code: u8) -> Self {
        Self::new(code)
    }
}

impl From<SeparationTime> for u8 {
    fn from(st_min: SeparationTime) -> Self {
        st_min.0
    }
}

/// A decoded (or to be encoded) ISO-TP protocol data unit, borrowing its
/// payload from the frame or transmit buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pdu<'a> {
    Single {
        data: &'a [u8],
    },
    First {
        /// Total message length (FF_DL)
        len: u16,
        data: &'a [u8],
    },
    Consecutive {
        sn: u8,
        /// Always all 7 bytes when decoded; the receiver knows how many count.
        data: &'a [u8],
    },
    FlowControl {
        status: FlowStatus,
        block_size: u8,
        st_min: SeparationTime,
    },
}

impl<'a> Pdu<'a> {
    pub fn pci_type(&self) -> PciType {
        match self {
            Self::Single { .. } => PciType::Single,
            Self::First { .. } => PciType::First,
            Self::Consecutive { .. } => PciType::Consecutive,
            Self::FlowControl { .. } => PciType::FlowControl,
        }
    }

    /// Decodes the 8 payload bytes of a physical frame.
    pub fn decode(data: &'a [u8; FRAME_DATA_LEN]) -> Result<Self, PduError> {
        let pci = data[0];

        Ok(match PciType::of(pci)? {
            PciType::Single => {
                let len = pci & 0x0F;

                if len as usize > SF_MAX_DATA_LEN {
                    return Err(PduError::SingleFrameLength(len));
                }

                Self::Single {
                    data: &data[1..1 + len as usize],
                }
            }
            PciType::First => {
                let len = ((pci as u16 & 0x0F) << 8) | data[1] as u16;

                if len as usize <= FF_DATA_LEN {
                    return Err(PduError::FirstFrameLength(len));
                }

                Self::First {
                    len,
                    data: &data[2..],
                }
            }
            PciType::Consecutive => Self::Consecutive {
                sn: pci & 0x0F,
                data: &data[1..],
            },
            PciType::FlowControl => Self::FlowControl {
                status: FlowStatus::try_from(pci & 0x0F)?,
                block_size: data[1],
                st_min: SeparationTime::new(data[2]),
            },
        })
    }

    /// Builds a full length, 0xFF padded frame for `id`.
    pub fn encode(&self, id: Id) -> Result<PhyFrame, PduError> {
        let mut buf = [PADDING; FRAME_DATA_LEN];

        match *self {
            Self::Single { data } => {
                if data.len() > SF_MAX_DATA_LEN {
                    return Err(PduError::InvalidPayloadLength(data.len()));
                }
                buf[0] = data.len() as u8;
                buf[1..1 + data.len()].copy_from_slice(data);
            }
            Self::First { len, data } => {
                if len as usize <= FF_DATA_LEN || len as usize > MAX_DL {
                    return Err(PduError::FirstFrameLength(len));
                }
                if data.len() != FF_DATA_LEN {
                    return Err(PduError::InvalidPayloadLength(data.len()));
                }
                buf[0] = u8::from(PciType::First) << 4 | ((len >> 8) as u8 & 0x0F);
                buf[1] = (len & 0xFF) as u8;
                buf[2..].copy_from_slice(data);
            }
            Self::Consecutive { sn, data } => {
                if data.len() > CF_DATA_LEN {
                    return Err(PduError::InvalidPayloadLength(data.len()));
                }
                buf[0] = u8::from(PciType::Consecutive) << 4 | (sn & 0x0F);
                buf[1..1 + data.len()].copy_from_slice(data);
            }
            Self::FlowControl {
                status,
                block_size,
                st_min,
            } => {
                buf[0] = u8::from(PciType::FlowControl) << 4 | u8::from(status);
                buf[1] = block_size;
                buf[2] = SeparationTime::new(st_min.code()).code();
            }
        }

        Ok(PhyFrame::from_raw(id, buf))
    }
}
