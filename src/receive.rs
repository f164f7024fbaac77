use log::{debug, warn};

use crate::{
    config::FlowControlParams,
    error::{Error, NResult, Outcome},
    frame::PhyFrame,
    link::{FlowControlPolicy, FrameTransport},
    pci::{FlowStatus, Pdu, PduError, CF_DATA_LEN, FF_DATA_LEN},
    session::{Abort, Session, State},
    timer::{TickSource, Timer},
    DEFAULT_SN, NO_TIMEOUT,
};

impl<T, S, P> Session<T, S, P>
where
    T: FrameTransport,
    S: TickSource + Clone,
    P: FlowControlPolicy,
{
    /// Receives one message, answering segmented transfers with Flow
    /// Control frames. Gives up once `timeout_ms` pass without progress;
    /// [`NO_TIMEOUT`] waits forever.
    pub fn receive(&mut self, timeout_ms: u32) -> Outcome {
        if let Some(busy) = self.busy() {
            return busy;
        }

        self.begin();
        self.buffer.clear();
        self.dl = 0;
        self.state = State::Idle;

        let mut deadline = Timer::new(self.clock.clone());
        if timeout_ms != NO_TIMEOUT {
            deadline.arm();
        }

        let result = self.run_receive(timeout_ms, &mut deadline);
        if result.is_err() {
            // a partial message must not be mistaken for a payload
            self.buffer.clear();
            self.dl = 0;
        }
        self.finish(result)
    }

    fn run_receive(&mut self, timeout_ms: u32, deadline: &mut Timer<S>) -> Result<(), Abort> {
        while self.state != State::Finished {
            if deadline.has_overflowed(timeout_ms) {
                debug!("nothing received within {} ms", timeout_ms);
                return Err(Abort::new(NResult::Error, Error::Timeout, State::Error));
            }

            if self.state == State::WaitData {
                self.supervise_reception()?;
            }

            let Some(frame) = self.link.poll()? else {
                continue;
            };

            if self.dispatch(&frame)? {
                deadline.refresh();
            }
        }

        Ok(())
    }

    /// Timer checks while a segmented reception is in progress.
    fn supervise_reception(&mut self) -> Result<(), Abort> {
        if self.awaiting_cts {
            // The sender waits on our Flow Control; ask the policy again
            // once per N_Br period.
            if self.n_b.has_overflowed(self.config.timing.n_br) {
                self.send_flow_control()?;
            }
            return Ok(());
        }

        if self.n_c.has_overflowed(self.config.timing.n_cr) {
            return Err(Abort::timeout(NResult::TimeoutC));
        }

        Ok(())
    }

    /// Handles one inbound frame. Returns whether it advanced the reception.
    fn dispatch(&mut self, frame: &PhyFrame) -> Result<bool, Abort> {
        let pdu = match Pdu::decode(frame.raw()) {
            Ok(pdu) => pdu,
            Err(PduError::InvalidFlowStatus(fs)) => {
                debug!("ignoring flow control with status {:#x}", fs);
                return Ok(false);
            }
            Err(e @ PduError::UnknownPciType(_)) => return Err(Error::from(e).into()),
            Err(e) => {
                warn!("malformed frame: {}", e);
                return Err(Abort::new(NResult::Error, Error::Parameter, State::Idle));
            }
        };

        match pdu {
            Pdu::Single { data } => self.receive_single(data),
            Pdu::First { len, data } => self.receive_first(len, data),
            Pdu::Consecutive { sn, data } => self.receive_consecutive(sn, data),
            Pdu::FlowControl {
                status,
                block_size,
                st_min,
            } => {
                // Only a sending session can use it.
                if let Err(abort) = self.decode_flow_control(status, block_size, st_min) {
                    debug!("ignoring flow control ({:?})", abort.result);
                }
                Ok(false)
            }
        }
    }

    fn receive_single(&mut self, data: &[u8]) -> Result<bool, Abort> {
        if self.state == State::WaitData {
            warn!("single frame replaces reception of {} bytes", self.dl);
        }

        self.buffer.clear();
        self.buffer.append(data)?;
        self.dl = data.len() as u16;
        self.rest = 0;
        self.state = State::Finished;
        debug!("single frame received, dl {}", self.dl);
        Ok(true)
    }

    fn receive_first(&mut self, len: u16, data: &[u8]) -> Result<bool, Abort> {
        if self.state == State::WaitData {
            warn!("first frame restarts reception of {} bytes", self.dl);
        }

        self.buffer.clear();
        self.buffer.append(data)?;
        self.dl = len;
        self.rest = len - FF_DATA_LEN as u16;
        self.sn = DEFAULT_SN;
        self.awaiting_cts = false;
        self.arm_timers();
        debug!("first frame received, dl {}", self.dl);

        if self.n_b.has_overflowed(self.config.timing.n_br) {
            return Err(Abort::timeout(NResult::TimeoutB));
        }

        self.state = State::WaitData;
        self.send_flow_control()?;
        Ok(true)
    }

    fn receive_consecutive(&mut self, sn: u8, data: &[u8]) -> Result<bool, Abort> {
        if self.state != State::WaitData {
            debug!("ignoring consecutive frame in {:?}", self.state);
            return Ok(false);
        }
        if self.awaiting_cts {
            warn!("consecutive frame while the sender should wait");
            return Err(Abort::new(
                NResult::UnexpectedPdu,
                Error::Parameter,
                State::Error,
            ));
        }
        if self.n_c.has_overflowed(self.config.timing.n_cr) {
            return Err(Abort::timeout(NResult::TimeoutC));
        }
        if sn != self.sn {
            warn!("expected sn {} got {}", self.sn, sn);
            return Err(Abort::new(NResult::WrongSn, Error::Parameter, State::Idle));
        }

        if self.rest as usize <= CF_DATA_LEN {
            self.buffer.append(&data[..self.rest as usize])?;
            self.rest = 0;
            self.state = State::Finished;
            debug!("last consecutive frame received, dl {}", self.dl);
        } else {
            self.buffer.append(data)?;
            self.rest -= CF_DATA_LEN as u16;

            if self.bs_counter > 0 {
                self.bs_counter -= 1;
                if self.bs_counter == 0 {
                    self.n_b.refresh();
                    self.send_flow_control()?;
                }
            }
        }

        self.sn = (self.sn + 1) & 0x0F;
        self.n_c.refresh();
        Ok(true)
    }

    /// Lets the policy adjust the advertised parameters, then emits them.
    fn send_flow_control(&mut self) -> Result<(), Abort> {
        if let Some(policy) = self.policy.as_mut() {
            policy.adjust(&mut self.fc);
        }

        let FlowControlParams {
            status,
            block_size,
            st_min,
        } = self.fc;

        self.n_a.refresh();
        self.link.send_pdu(&Pdu::FlowControl {
            status,
            block_size,
            st_min,
        })?;
        if self.n_a.has_overflowed(self.config.timing.n_ar) {
            return Err(Abort::timeout(NResult::TimeoutA));
        }

        match status {
            FlowStatus::ContinueToSend => {
                self.awaiting_cts = false;
                self.bs_counter = block_size;
                self.n_c.refresh();
            }
            FlowStatus::Wait => {
                self.awaiting_cts = true;
                self.n_b.refresh();
            }
            FlowStatus::Overflow => {
                warn!("refusing {} byte message", self.dl);
                return Err(Abort::new(
                    NResult::BufferOverflow,
                    Error::Full,
                    State::Error,
                ));
            }
        }

        Ok(())
    }
}
