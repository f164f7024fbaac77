use log::{debug, warn};

use crate::{
    error::{Error, NResult, Outcome},
    link::{FlowControlPolicy, FrameTransport},
    pci::{PduError, Pdu, CF_DATA_LEN, FF_DATA_LEN, SF_MAX_DATA_LEN},
    session::{Abort, Session, State},
    timer::TickSource,
    DEFAULT_SN,
};

impl<T, S, P> Session<T, S, P>
where
    T: FrameTransport,
    S: TickSource + Clone,
    P: FlowControlPolicy,
{
    /// Sends the loaded payload, segmenting it when it does not fit a Single
    /// Frame. Blocks until the last frame is out or the transfer fails.
    pub fn send(&mut self) -> Outcome {
        if let Some(busy) = self.busy() {
            return busy;
        }

        self.begin();
        self.buffer.rewind();
        self.dl = self.buffer.len() as u16;
        self.state = State::Send;

        let result = self.run_send();
        self.finish(result)
    }

    fn run_send(&mut self) -> Result<(), Abort> {
        loop {
            match self.state {
                State::Send => self.send_first()?,
                State::WaitFirstFc | State::WaitFc => self.await_flow_control()?,
                State::SendCf => self.send_block()?,
                State::Idle => return Ok(()),
                state => {
                    warn!("send pump in {:?}", state);
                    return Err(Error::Parameter.into());
                }
            }
        }
    }

    /// Emits a Single Frame, or the First Frame of a segmented transfer.
    fn send_first(&mut self) -> Result<(), Abort> {
        if self.buffer.len() <= SF_MAX_DATA_LEN {
            let data = self.buffer.take(SF_MAX_DATA_LEN);
            self.link.send_pdu(&Pdu::Single { data })?;
            debug!("single frame sent, dl {}", self.dl);

            self.state = State::Idle;
            return Ok(());
        }

        self.state = State::SendFf;
        let data = self.buffer.take(FF_DATA_LEN);
        self.link.send_pdu(&Pdu::First { len: self.dl, data })?;
        debug!("first frame sent, dl {}", self.dl);

        self.sn = DEFAULT_SN;
        self.arm_timers();
        self.state = State::WaitFirstFc;
        Ok(())
    }

    fn await_flow_control(&mut self) -> Result<(), Abort> {
        if self.n_b.has_overflowed(self.config.timing.n_bs) {
            return Err(Abort::timeout(NResult::TimeoutB));
        }

        let Some(frame) = self.link.poll()? else {
            return Ok(());
        };

        match Pdu::decode(frame.raw()) {
            Ok(Pdu::FlowControl {
                status,
                block_size,
                st_min,
            }) => self.decode_flow_control(status, block_size, st_min),
            Ok(pdu) => {
                warn!("{:?} while waiting for flow control", pdu.pci_type());
                Err(Abort::new(
                    NResult::UnexpectedPdu,
                    Error::Parameter,
                    State::Error,
                ))
            }
            Err(PduError::InvalidFlowStatus(fs)) => {
                warn!("invalid flow status {:#x}", fs);
                Err(Abort::new(NResult::InvalidFs, Error::Parameter, State::Error))
            }
            Err(e) => Err(Abort::new(
                NResult::UnexpectedPdu,
                Error::InvalidPdu(e),
                State::Error,
            )),
        }
    }

    /// Emits Consecutive Frames until the payload or the granted block ends.
    fn send_block(&mut self) -> Result<(), Abort> {
        let timing = self.config.timing;

        while self.state == State::SendCf {
            self.clock.delay_us(self.peer.st_min.as_micros());

            self.n_a.refresh();
            let data = self.buffer.take(CF_DATA_LEN);
            self.link.send_pdu(&Pdu::Consecutive { sn: self.sn, data })?;

            if self.n_a.has_overflowed(timing.n_as) {
                return Err(Abort::timeout(NResult::TimeoutA));
            }
            if self.n_c.has_overflowed(timing.n_cs) {
                return Err(Abort::timeout(NResult::TimeoutC));
            }

            self.sn = (self.sn + 1) & 0x0F;

            if self.buffer.remaining() == 0 {
                debug!("last consecutive frame sent, dl {}", self.dl);
                self.state = State::Idle;
                break;
            }

            if self.bs_counter > 0 {
                self.bs_counter -= 1;
                if self.bs_counter == 0 {
                    self.n_b.arm();
                    self.state = State::WaitFc;
                    break;
                }
            }

            self.n_c.refresh();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, collections::VecDeque, rc::Rc, vec::Vec};

    use embedded_can::StandardId;

    use crate::{
        config::{Config, Timing},
        error::{Error, NResult},
        frame::PhyFrame,
        link::FrameTransport,
        session::{Session, SessionBuilder, State},
        timer::Clock,
    };

    /// Records sent frames and replays queued peer frames.
    #[derive(Default)]
    struct Peer {
        sent: Vec<PhyFrame>,
        inbox: VecDeque<PhyFrame>,
    }

    impl FrameTransport for Peer {
        fn send(&mut self, frame: &PhyFrame) -> Result<(), Error> {
            self.sent.push(*frame);
            Ok(())
        }

        fn receive(&mut self) -> Result<Option<PhyFrame>, Error> {
            Ok(self.inbox.pop_front())
        }
    }

    fn sid(raw: u16) -> StandardId {
        StandardId::new(raw).unwrap()
    }

    fn ticking() -> Clock<impl Fn() -> u32 + Clone> {
        let now = Rc::new(Cell::new(0u32));
        Clock::new(move || {
            now.set(now.get().wrapping_add(1));
            now.get()
        })
    }

    fn fc(bytes: [u8; 3]) -> PhyFrame {
        PhyFrame::new(sid(0x766), &bytes).unwrap()
    }

    #[test]
    fn single_frame() {
        let mut session = Session::new(sid(0x766), sid(0x706), Peer::default(), ticking());

        let outcome = session.transmit(&[6, 6, 6, 6, 6]);
        assert_eq!(outcome.into_result(), Ok(NResult::Ok));
        assert_eq!(session.state(), State::Idle);

        let sent = &session.link().transport().sent;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].raw(), &[0x05, 6, 6, 6, 6, 6, 0xFF, 0xFF]);
    }

    #[test]
    fn empty_payload_is_a_zero_length_single_frame() {
        let mut session = Session::new(sid(0x766), sid(0x706), Peer::default(), ticking());

        assert!(session.transmit(&[]).is_ok());
        assert_eq!(session.link().transport().sent[0].raw()[0], 0x00);
    }

    #[test]
    fn segmented_with_unlimited_block() {
        let mut peer = Peer::default();
        peer.inbox.push_back(fc([0x30, 0x00, 0x00]));
        let mut session = Session::new(sid(0x766), sid(0x706), peer, ticking());

        let payload: Vec<u8> = (0..20).collect();
        assert!(session.transmit(&payload).is_ok());

        let sent = &session.link().transport().sent;
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].raw(), &[0x10, 20, 0, 1, 2, 3, 4, 5]);
        assert_eq!(sent[1].raw(), &[0x21, 6, 7, 8, 9, 10, 11, 12]);
        assert_eq!(sent[2].raw(), &[0x22, 13, 14, 15, 16, 17, 18, 19]);
        assert_eq!(session.sequence_number(), 3);
        assert_eq!(session.state(), State::Idle);
    }

    #[test]
    fn wait_then_clear_to_send() {
        let mut peer = Peer::default();
        peer.inbox.push_back(fc([0x31, 0x00, 0x00]));
        peer.inbox.push_back(fc([0x30, 0x00, 0x05]));
        let mut session = Session::new(sid(0x766), sid(0x706), peer, ticking());

        assert!(session.transmit(&[0xAA; 10]).is_ok());
        assert_eq!(session.peer_flow_control().st_min.code(), 0x05);
        assert_eq!(session.link().transport().sent.len(), 2);
    }

    #[test]
    fn missing_flow_control_times_out() {
        let mut session = Session::new(sid(0x766), sid(0x706), Peer::default(), ticking());

        let outcome = session.transmit(&[0; 10]);
        assert_eq!(outcome.result, NResult::TimeoutB);
        assert_eq!(outcome.status, Err(Error::Timeout));
        assert_eq!(session.state(), State::Error);
        assert_eq!(session.reply(), NResult::TimeoutB);
    }

    #[test]
    fn block_end_without_flow_control_times_out() {
        let mut peer = Peer::default();
        peer.inbox.push_back(fc([0x30, 0x01, 0x00]));
        let mut session = Session::new(sid(0x766), sid(0x706), peer, ticking());

        let outcome = session.transmit(&[0; 20]);
        assert_eq!(outcome.result, NResult::TimeoutB);
        // FF and exactly one CF before the missing second Flow Control
        assert_eq!(session.link().transport().sent.len(), 2);
    }

    #[test]
    fn overflow_aborts() {
        let mut peer = Peer::default();
        peer.inbox.push_back(fc([0x32, 0x00, 0x00]));
        let mut session = Session::new(sid(0x766), sid(0x706), peer, ticking());

        let outcome = session.transmit(&[0; 10]);
        assert_eq!(outcome.result, NResult::BufferOverflow);
        assert_eq!(outcome.status, Err(Error::Full));
        assert_eq!(session.link().transport().sent.len(), 1);
    }

    #[test]
    fn invalid_flow_status() {
        let mut peer = Peer::default();
        peer.inbox.push_back(fc([0x35, 0x00, 0x00]));
        let mut session = Session::new(sid(0x766), sid(0x706), peer, ticking());

        let outcome = session.transmit(&[0; 10]);
        assert_eq!(outcome.result, NResult::InvalidFs);
        assert_eq!(outcome.status, Err(Error::Parameter));
    }

    #[test]
    fn unexpected_pdu_while_waiting() {
        let mut peer = Peer::default();
        peer.inbox.push_back(fc([0x21, 0x00, 0x00]));
        let mut session = Session::new(sid(0x766), sid(0x706), peer, ticking());

        let outcome = session.transmit(&[0; 10]);
        assert_eq!(outcome.result, NResult::UnexpectedPdu);
        assert_eq!(session.state(), State::Error);
    }

    #[test]
    fn wait_frame_limit() {
        let mut peer = Peer::default();
        for _ in 0..3 {
            peer.inbox.push_back(fc([0x31, 0x00, 0x00]));
        }
        let mut session = SessionBuilder::new(sid(0x766), sid(0x706))
            .transport(peer)
            .clock(ticking())
            .config(Config {
                wft_max: Some(2),
                ..Config::default()
            })
            .build()
            .unwrap();

        let outcome = session.transmit(&[0; 10]);
        assert_eq!(outcome.result, NResult::WftOverrun);
        assert_eq!(outcome.status, Err(Error::Timeout));
    }

    #[test]
    fn slow_link_times_out_a() {
        let now = Rc::new(Cell::new(0u32));
        let clock = {
            let now = now.clone();
            Clock::new(move || now.get())
        };

        struct Slow {
            now: Rc<Cell<u32>>,
            inbox: VecDeque<PhyFrame>,
        }

        impl FrameTransport for Slow {
            fn send(&mut self, _frame: &PhyFrame) -> Result<(), Error> {
                self.now.set(self.now.get() + 50);
                Ok(())
            }

            fn receive(&mut self) -> Result<Option<PhyFrame>, Error> {
                Ok(self.inbox.pop_front())
            }
        }

        let mut inbox = VecDeque::new();
        inbox.push_back(fc([0x30, 0x00, 0x00]));
        let mut session = SessionBuilder::new(sid(0x766), sid(0x706))
            .transport(Slow { now, inbox })
            .clock(clock)
            .config(Config {
                timing: Timing {
                    n_as: 40,
                    ..Timing::default()
                },
                ..Config::default()
            })
            .build()
            .unwrap();

        let outcome = session.transmit(&[0; 10]);
        assert_eq!(outcome.result, NResult::TimeoutA);
        assert_eq!(outcome.status, Err(Error::Timeout));
    }
}
