use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::pci::PduError;

/// Generic status codes for everything that is not an ISO-TP protocol outcome:
/// adapter I/O, missing collaborators, session reuse and parameter violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    #[error("A required collaborator (transport or tick source) was not provided")]
    NullReference,
    #[error("The session is in the middle of another transaction")]
    Busy,
    #[error("A parameter or protocol field was out of range")]
    Parameter,
    #[error("Received a malformed protocol data unit")]
    InvalidPdu(#[from] PduError),
    #[error("The link adapter failed to transfer a frame")]
    Link,
    #[error("A protocol timer expired")]
    Timeout,
    #[error("A buffer was full")]
    Full,
    #[error("No frame was pending")]
    Empty,
}

/// Outcome of an ISO-TP transaction (ISO 15765-2 `N_Result`).
///
/// The numeric order is significant: when two conditions are detected at the
/// same time the one listed first is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum NResult {
    #[default]
    Ok = 0,
    /// N_As / N_Ar: frame transmission was not confirmed in time
    TimeoutA = 1,
    /// N_Bs / N_Br: flow control was not received or sent in time
    TimeoutB = 2,
    /// N_Cs / N_Cr: consecutive frames were spaced too far apart
    TimeoutC = 3,
    WrongSn = 4,
    InvalidFs = 5,
    UnexpectedPdu = 6,
    WftOverrun = 7,
    /// The peer answered with an Overflow flow status
    BufferOverflow = 8,
    Error = 9,
}

/// What a `send` or `receive` pass reports back: the protocol outcome and the
/// generic status, side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[must_use]
pub struct Outcome {
    pub result: NResult,
    pub status: Result<(), Error>,
}

impl Outcome {
    pub(crate) const fn ok() -> Self {
        Self {
            result: NResult::Ok,
            status: Ok(()),
        }
    }

    pub(crate) const fn failed(result: NResult, error: Error) -> Self {
        Self {
            result,
            status: Err(error),
        }
    }

    /// True when the transaction completed and nothing went wrong locally.
    pub fn is_ok(&self) -> bool {
        self.result == NResult::Ok && self.status.is_ok()
    }

    /// Collapses the outcome for callers that only need the generic status.
    pub fn into_result(self) -> Result<NResult, Error> {
        self.status.map(|()| self.result)
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, NResult, Outcome};
    use crate::pci::PduError;

    #[test]
    fn n_result_codes() {
        assert_eq!(u8::from(NResult::Ok), 0);
        assert_eq!(u8::from(NResult::WrongSn), 4);
        assert_eq!(u8::from(NResult::Error), 9);
        assert_eq!(NResult::try_from(8u8).ok(), Some(NResult::BufferOverflow));
        assert!(NResult::try_from(10u8).is_err());
    }

    #[test]
    fn outcome_keeps_both_taxonomies() {
        let outcome = Outcome::failed(NResult::TimeoutB, Error::Timeout);

        assert!(!outcome.is_ok());
        assert_eq!(outcome.result, NResult::TimeoutB);
        assert_eq!(outcome.into_result(), Err(Error::Timeout));
        assert_eq!(Outcome::ok().into_result(), Ok(NResult::Ok));
    }

    #[test]
    fn pdu_errors_convert() {
        let error: Error = PduError::UnknownPciType(0x4).into();
        assert_eq!(error, Error::InvalidPdu(PduError::UnknownPciType(0x4)));
    }
}
