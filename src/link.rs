//! Seams towards the outside world: the frame transport (link adapter) and the
//! receiver's flow control policy.

use embedded_can::Id;
use log::trace;

use crate::{config::FlowControlParams, error::Error, frame::PhyFrame, pci::Pdu};

/// Sends and receives single physical frames.
///
/// `receive` must not block: it returns `Ok(None)` (or `Err(Error::Empty)`)
/// when nothing is pending.
pub trait FrameTransport {
    fn send(&mut self, frame: &PhyFrame) -> Result<(), Error>;
    fn receive(&mut self) -> Result<Option<PhyFrame>, Error>;
}

impl<T: FrameTransport + ?Sized> FrameTransport for &mut T {
    fn send(&mut self, frame: &PhyFrame) -> Result<(), Error> {
        (**self).send(frame)
    }

    fn receive(&mut self) -> Result<Option<PhyFrame>, Error> {
        (**self).receive()
    }
}

/// Hook consulted by a receiving session right before it emits a Flow
/// Control frame. It may change the status, block size and STmin on the fly.
pub trait FlowControlPolicy {
    fn adjust(&mut self, params: &mut FlowControlParams);
}

/// Leaves the configured flow control untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicy;

impl FlowControlPolicy for DefaultPolicy {
    fn adjust(&mut self, _params: &mut FlowControlParams) {}
}

impl<F> FlowControlPolicy for F
where
    F: FnMut(&mut FlowControlParams),
{
    fn adjust(&mut self, params: &mut FlowControlParams) {
        self(params)
    }
}

/// A transport bound to the pair of addresses of one peer relationship.
///
/// Frames are sent with the `target` identifier; only frames carrying the
/// `source` identifier are accepted.
#[derive(Debug)]
pub struct Link<T> {
    source: Id,
    target: Id,
    transport: T,
}

impl<T: FrameTransport> Link<T> {
    pub fn new(source: impl Into<Id>, target: impl Into<Id>, transport: T) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            transport,
        }
    }

    pub fn source(&self) -> Id {
        self.source
    }

    pub fn target(&self) -> Id {
        self.target
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub(crate) fn send_pdu(&mut self, pdu: &Pdu<'_>) -> Result<(), Error> {
        let frame = pdu.encode(self.target)?;
        trace!("tx {:?} {:02X?}", self.target, frame.raw());
        self.transport.send(&frame)
    }

    /// Fetches the next pending frame addressed to us, if any.
    pub(crate) fn poll(&mut self) -> Result<Option<PhyFrame>, Error> {
        let frame = match self.transport.receive() {
            Ok(Some(frame)) => frame,
            Ok(None) | Err(Error::Empty) => return Ok(None),
            Err(e) => return Err(e),
        };

        if frame.id() != self.source {
            trace!("dropping frame for {:?}", frame.id());
            return Ok(None);
        }
        if frame.is_empty() {
            trace!("dropping empty frame");
            return Ok(None);
        }

        trace!("rx {:?} {:02X?}", frame.id(), frame.raw());
        Ok(Some(frame))
    }
}
