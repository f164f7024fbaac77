//! The ISO-TP session: one inbound or outbound transaction at a time between
//! a fixed pair of addresses.

use embedded_can::Id;
use log::{debug, warn};

use crate::{
    buffer::Buffer,
    config::{Config, FlowControlParams},
    error::{Error, NResult, Outcome},
    link::{DefaultPolicy, FlowControlPolicy, FrameTransport, Link},
    pci::{FlowStatus, SeparationTime},
    timer::{Clock, TickSource, Timer},
    DEFAULT_SN, MAX_DL,
};

/// Protocol state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    #[default]
    Idle,
    Send,
    SendFf,
    SendCf,
    WaitFirstFc,
    WaitFc,
    WaitData,
    Finished,
    Error,
}

impl State {
    /// States in which no transaction is running and a new one may start.
    pub fn is_at_rest(self) -> bool {
        matches!(self, Self::Idle | Self::Finished | Self::Error)
    }
}

/// Why a transaction stopped early, and which state it leaves behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Abort {
    pub result: NResult,
    pub error: Error,
    pub state: State,
}

impl Abort {
    pub(crate) const fn new(result: NResult, error: Error, state: State) -> Self {
        Self {
            result,
            error,
            state,
        }
    }

    pub(crate) const fn timeout(result: NResult) -> Self {
        Self::new(result, Error::Timeout, State::Error)
    }
}

impl From<Error> for Abort {
    fn from(error: Error) -> Self {
        Self::new(NResult::Error, error, State::Error)
    }
}

/// ISO-TP protocol engine bound to one peer.
///
/// [`Session::send`] and [`Session::receive`] block until the transaction
/// completes or fails. Every call starts with an internal reset, so a failed
/// transaction never leaks into the next one.
pub struct Session<T, S, P = DefaultPolicy> {
    pub(crate) link: Link<T>,
    pub(crate) config: Config,
    pub(crate) policy: Option<P>,
    pub(crate) clock: Clock<S>,
    pub(crate) state: State,
    /// Length of the message in the buffer
    pub(crate) dl: u16,
    pub(crate) sn: u8,
    /// Advertised by us when receiving (fc_set / policy)
    pub(crate) fc: FlowControlParams,
    /// Granted by the peer's first Flow Control when sending
    pub(crate) peer: FlowControlParams,
    pub(crate) bs_counter: u8,
    /// Bytes of a segmented reception still expected
    pub(crate) rest: u16,
    pub(crate) wait_frames: u8,
    /// Receiver has answered Wait and owes the sender another Flow Control
    pub(crate) awaiting_cts: bool,
    pub(crate) reply: NResult,
    pub(crate) buffer: Buffer,
    pub(crate) n_a: Timer<S>,
    pub(crate) n_b: Timer<S>,
    pub(crate) n_c: Timer<S>,
}

impl<T, S> Session<T, S, DefaultPolicy>
where
    T: FrameTransport,
    S: TickSource + Clone,
{
    /// Binds a session to `source` (accepted inbound identifier) and
    /// `target` (outbound identifier) with the default configuration.
    pub fn new(
        source: impl Into<Id>,
        target: impl Into<Id>,
        transport: T,
        clock: Clock<S>,
    ) -> Self {
        Self::from_parts(
            Link::new(source, target, transport),
            clock,
            None,
            Config::default(),
        )
    }
}

impl<T, S, P> Session<T, S, P>
where
    T: FrameTransport,
    S: TickSource + Clone,
    P: FlowControlPolicy,
{
    fn from_parts(link: Link<T>, clock: Clock<S>, policy: Option<P>, config: Config) -> Self {
        Self {
            link,
            policy,
            state: State::Idle,
            dl: 0,
            sn: DEFAULT_SN,
            fc: config.flow_control,
            peer: FlowControlParams::default(),
            bs_counter: config.flow_control.block_size,
            rest: 0,
            wait_frames: 0,
            awaiting_cts: false,
            reply: NResult::Ok,
            buffer: Buffer::new(),
            n_a: Timer::new(clock.clone()),
            n_b: Timer::new(clock.clone()),
            n_c: Timer::new(clock.clone()),
            clock,
            config,
        }
    }

    /// Sets the flow control advertised by subsequent receptions.
    pub fn set_flow_control(&mut self, status: FlowStatus, block_size: u8, st_min: u8) {
        self.fc = FlowControlParams::new(status, block_size, st_min);
        self.bs_counter = block_size;
    }

    pub fn flow_control(&self) -> FlowControlParams {
        self.fc
    }

    /// Flow control granted by the peer during the last send.
    pub fn peer_flow_control(&self) -> FlowControlParams {
        self.peer
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Outcome of the last completed transaction.
    pub fn reply(&self) -> NResult {
        self.reply
    }

    /// Length of the message currently held (DL).
    pub fn data_len(&self) -> usize {
        self.dl as usize
    }

    /// Next expected or emitted Consecutive Frame sequence number.
    pub fn sequence_number(&self) -> u8 {
        self.sn
    }

    /// The message held by the session: the loaded payload before a send,
    /// the reassembled one after a successful receive.
    pub fn payload(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    pub fn link(&self) -> &Link<T> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut Link<T> {
        &mut self.link
    }

    /// Loads the message for the next [`Session::send`].
    pub fn write_payload(&mut self, payload: &[u8]) -> Result<(), Error> {
        if !self.state.is_at_rest() {
            return Err(Error::Busy);
        }
        if payload.len() > MAX_DL {
            return Err(Error::Full);
        }

        self.buffer.load(payload)?;
        self.dl = payload.len() as u16;
        Ok(())
    }

    /// Loads `payload` and sends it.
    pub fn transmit(&mut self, payload: &[u8]) -> Outcome {
        match self.write_payload(payload) {
            Ok(()) => self.send(),
            Err(error) => Outcome::failed(NResult::Error, error),
        }
    }

    /// Forces the session back to `Idle`, e.g. after an adapter panicked in
    /// the middle of a transaction.
    pub fn reset(&mut self) {
        self.begin();
        self.state = State::Idle;
    }

    /// Per-transaction reset of counters and timers.
    pub(crate) fn begin(&mut self) {
        self.sn = DEFAULT_SN;
        self.bs_counter = 0;
        self.rest = 0;
        self.wait_frames = 0;
        self.awaiting_cts = false;
        self.reply = NResult::Ok;
        self.disarm_timers();
    }

    fn disarm_timers(&mut self) {
        self.n_a.disarm();
        self.n_b.disarm();
        self.n_c.disarm();
    }

    pub(crate) fn arm_timers(&mut self) {
        self.n_a.arm();
        self.n_b.arm();
        self.n_c.arm();
    }

    pub(crate) fn busy(&self) -> Option<Outcome> {
        if self.state.is_at_rest() {
            return None;
        }

        warn!("session busy ({:?})", self.state);
        Some(Outcome::failed(NResult::Error, Error::Busy))
    }

    /// Closes a transaction: disarms every timer and records the reply.
    pub(crate) fn finish(&mut self, result: Result<(), Abort>) -> Outcome {
        self.disarm_timers();

        let outcome = match result {
            Ok(()) => Outcome::ok(),
            Err(abort) => {
                warn!(
                    "transaction aborted in {:?}: {:?} ({})",
                    self.state, abort.result, abort.error
                );
                self.state = abort.state;
                Outcome::failed(abort.result, abort.error)
            }
        };

        self.reply = outcome.result;
        outcome
    }

    /// Interprets a Flow Control frame received while sending.
    ///
    /// Only valid in `WaitFirstFc`/`WaitFc`. Block size and STmin are taken
    /// from the frame that answers the First Frame; later frames only update
    /// the flow status.
    pub(crate) fn decode_flow_control(
        &mut self,
        status: FlowStatus,
        block_size: u8,
        st_min: SeparationTime,
    ) -> Result<(), Abort> {
        match self.state {
            State::WaitFirstFc => {
                self.peer = FlowControlParams {
                    status,
                    block_size,
                    st_min,
                };
            }
            State::WaitFc => self.peer.status = status,
            state => return Err(Abort::new(NResult::UnexpectedPdu, Error::Parameter, state)),
        }

        match self.peer.status {
            FlowStatus::ContinueToSend => {
                debug!(
                    "clear to send, bs {} stmin {:#04x}",
                    self.peer.block_size,
                    self.peer.st_min.code()
                );
                self.bs_counter = self.peer.block_size;
                self.wait_frames = 0;
                self.n_a.refresh();
                self.n_c.refresh();
                self.state = State::SendCf;
                Ok(())
            }
            FlowStatus::Wait => {
                self.n_b.refresh();
                self.wait_frames = self.wait_frames.saturating_add(1);
                match self.config.wft_max {
                    Some(max) if self.wait_frames > max => Err(Abort::timeout(NResult::WftOverrun)),
                    _ => Ok(()),
                }
            }
            FlowStatus::Overflow => Err(Abort::new(
                NResult::BufferOverflow,
                Error::Full,
                State::Error,
            )),
        }
    }
}

/// Assembles a [`Session`], checking that every collaborator is present.
pub struct SessionBuilder<T, S, P = DefaultPolicy> {
    source: Id,
    target: Id,
    transport: Option<T>,
    clock: Option<Clock<S>>,
    policy: Option<P>,
    config: Config,
}

impl<T, S> SessionBuilder<T, S, DefaultPolicy> {
    pub fn new(source: impl Into<Id>, target: impl Into<Id>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            transport: None,
            clock: None,
            policy: None,
            config: Config::default(),
        }
    }
}

impl<T, S, P> SessionBuilder<T, S, P> {
    pub fn transport(mut self, transport: T) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Clock<S>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Installs the hook consulted before each Flow Control frame is sent.
    pub fn policy<Q: FlowControlPolicy>(self, policy: Q) -> SessionBuilder<T, S, Q> {
        SessionBuilder {
            source: self.source,
            target: self.target,
            transport: self.transport,
            clock: self.clock,
            policy: Some(policy),
            config: self.config,
        }
    }
}

impl<T, S, P> SessionBuilder<T, S, P>
where
    T: FrameTransport,
    S: TickSource + Clone,
    P: FlowControlPolicy,
{
    pub fn build(self) -> Result<Session<T, S, P>, Error> {
        let transport = self.transport.ok_or(Error::NullReference)?;
        let clock = self.clock.ok_or(Error::NullReference)?;
        self.config.validate()?;

        Ok(Session::from_parts(
            Link::new(self.source, self.target, transport),
            clock,
            self.policy,
            self.config,
        ))
    }
}
