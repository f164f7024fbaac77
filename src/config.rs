//! Session configuration.

use crate::{
    error::Error,
    pci::{FlowStatus, SeparationTime},
};

/// ISO-TP timeouts in milliseconds.
///
/// The sender side uses the `*s` values, the receiver side the `*r` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timing {
    /// N_As: transmission of a frame on the sender side
    pub n_as: u32,
    /// N_Bs: First Frame or block end until the next Flow Control
    pub n_bs: u32,
    /// N_Cs: spacing between two Consecutive Frames sent
    pub n_cs: u32,
    /// N_Ar: transmission of a Flow Control frame on the receiver side
    pub n_ar: u32,
    /// N_Br: First Frame or block end until the receiver emits Flow Control
    pub n_br: u32,
    /// N_Cr: spacing between two Consecutive Frames received
    pub n_cr: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            n_as: 1000,
            n_bs: 250,
            n_cs: 250,
            n_ar: 1000,
            n_br: 100,
            n_cr: 250,
        }
    }
}

/// Flow control parameters a receiver advertises in its Flow Control frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlowControlParams {
    pub status: FlowStatus,
    /// Consecutive Frames per block, 0 = unlimited
    pub block_size: u8,
    pub st_min: SeparationTime,
}

impl FlowControlParams {
    pub fn new(status: FlowStatus, block_size: u8, st_min: impl Into<SeparationTime>) -> Self {
        Self {
            status,
            block_size,
            st_min: st_min.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub timing: Timing,
    /// Initial flow control advertised when receiving.
    pub flow_control: FlowControlParams,
    /// Maximum Wait frames accepted per transaction while sending. `None`
    /// bounds waiting by N_Bs alone.
    pub wft_max: Option<u8>,
}

impl Config {
    /// Rejects zero timeouts; a zero period would expire before any frame
    /// could be exchanged.
    pub fn validate(&self) -> Result<(), Error> {
        let Timing {
            n_as,
            n_bs,
            n_cs,
            n_ar,
            n_br,
            n_cr,
        } = self.timing;

        if [n_as, n_bs, n_cs, n_ar, n_br, n_cr].contains(&0) {
            return Err(Error::Parameter);
        }

        Ok(())
    }
}
