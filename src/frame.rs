use embedded_can::Id;

use crate::{FRAME_DATA_LEN, PADDING};

/// One classic CAN data frame as exchanged with the link adapter.
///
/// The payload is always stored as 8 bytes, bytes past `len` hold the
/// [`PADDING`] sentinel. ISO-TP frames produced by this crate are always
/// emitted at full length, so `len` is 8 for everything the session sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhyFrame {
    #[cfg_attr(feature = "defmt", defmt(Debug2Format))]
    id: Id,
    len: usize,
    data: [u8; FRAME_DATA_LEN],
}

impl PhyFrame {
    /// Creates a new data frame. `data` must have a length in the range
    /// 0..=8 or else `None` will be returned instead.
    pub fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > FRAME_DATA_LEN {
            return None;
        }

        let mut copy = [PADDING; FRAME_DATA_LEN];
        copy[..data.len()].copy_from_slice(data);

        Some(Self {
            id: id.into(),
            len: data.len(),
            data: copy,
        })
    }

    /// Creates a full length frame from 8 raw bytes.
    pub fn from_raw(id: impl Into<Id>, data: [u8; FRAME_DATA_LEN]) -> Self {
        Self {
            id: id.into(),
            len: FRAME_DATA_LEN,
            data,
        }
    }

    /// Copies any `embedded_can` data frame. Payloads longer than 8 bytes are
    /// clamped to the first 8, remote frames yield `None`.
    pub fn from_frame<F: embedded_can::Frame>(frame: &F) -> Option<Self> {
        if frame.is_remote_frame() {
            return None;
        }

        let data = frame.data();
        let len = data.len().min(FRAME_DATA_LEN);

        Self::new(frame.id(), &data[..len])
    }

    /// Gets the message ID of the frame
    pub fn id(&self) -> Id {
        self.id
    }

    /// Number of meaningful payload bytes (0..=8)
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Slice over the meaningful payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// All 8 payload bytes including padding
    pub fn raw(&self) -> &[u8; FRAME_DATA_LEN] {
        &self.data
    }
}

impl embedded_can::Frame for PhyFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        PhyFrame::new(id, data)
    }

    fn new_remote(_id: impl Into<Id>, _dlc: usize) -> Option<Self> {
        None
    }

    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    fn is_remote_frame(&self) -> bool {
        false
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        self.len
    }

    fn data(&self) -> &[u8] {
        PhyFrame::data(self)
    }
}
