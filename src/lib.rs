#![cfg_attr(not(test), no_std)]

mod buffer;
mod config;
mod error;
mod frame;
mod link;
mod pci;
mod receive;
mod send;
mod session;
mod timer;

/// Largest message a 12-bit First Frame length can announce.
pub const MAX_DL: usize = 4095;

/// Every frame carries 8 data bytes on the wire.
pub const FRAME_DATA_LEN: usize = 8;
pub const PADDING: u8 = 0xFF;

/// Sequence number of the first Consecutive Frame.
pub const DEFAULT_SN: u8 = 1;

/// Passed to `Session::receive` to wait without an overall deadline.
pub const NO_TIMEOUT: u32 = u32::MAX;

pub use config::*;
pub use error::*;
pub use frame::*;
pub use link::*;
pub use pci::*;
pub use session::*;
pub use timer::*;

pub use embedded_can::{ExtendedId, Id, StandardId};
