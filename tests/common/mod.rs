#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use isotp_session::{Clock, Error, FrameTransport, PhyFrame, StandardId};

pub const SENDER_ID: u16 = 0x766;
pub const RECEIVER_ID: u16 = 0x706;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn sid(raw: u16) -> StandardId {
    StandardId::new(raw).unwrap()
}

/// Millisecond clock backed by the wall clock, usable across threads.
pub fn wall_clock() -> Clock<impl Fn() -> u32 + Clone + Send> {
    let start = Instant::now();
    Clock::new(move || start.elapsed().as_millis() as u32)
}

/// A clock that advances one millisecond every time it is read, so
/// single-threaded tests run timeouts to completion instantly.
pub fn ticking() -> Clock<impl Fn() -> u32 + Clone> {
    let now = Arc::new(AtomicU32::new(0));
    Clock::new(move || now.fetch_add(1, Ordering::Relaxed) + 1)
}

/// In-memory transport: frames queued in `inbox` are handed out one per poll,
/// sent frames are recorded.
#[derive(Default)]
pub struct Script {
    pub inbox: VecDeque<PhyFrame>,
    pub sent: Vec<PhyFrame>,
    pub panic_on_send: bool,
    pub fail_on_send: bool,
}

impl Script {
    /// Queues frames as if sent by `from`.
    pub fn with_frames(from: u16, frames: &[&[u8]]) -> Self {
        let mut script = Self::default();
        for bytes in frames {
            script.push(from, bytes);
        }
        script
    }

    pub fn push(&mut self, from: u16, bytes: &[u8]) {
        self.inbox.push_back(PhyFrame::new(sid(from), bytes).unwrap());
    }

    /// PCI bytes of everything sent so far.
    pub fn sent_pci(&self) -> Vec<u8> {
        self.sent.iter().map(|frame| frame.raw()[0]).collect()
    }
}

impl FrameTransport for Script {
    fn send(&mut self, frame: &PhyFrame) -> Result<(), Error> {
        if self.panic_on_send {
            self.panic_on_send = false;
            panic!("adapter fault");
        }
        if self.fail_on_send {
            return Err(Error::Link);
        }
        self.sent.push(*frame);
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<PhyFrame>, Error> {
        Ok(self.inbox.pop_front())
    }
}

/// One end of an in-memory CAN bus between two threads.
pub struct Port {
    tx: Sender<PhyFrame>,
    rx: Receiver<PhyFrame>,
    log: Arc<Mutex<Vec<PhyFrame>>>,
}

impl Port {
    /// Frames this port has sent.
    pub fn log(&self) -> Arc<Mutex<Vec<PhyFrame>>> {
        Arc::clone(&self.log)
    }
}

pub fn loopback() -> (Port, Port) {
    let (a_tx, b_rx) = channel();
    let (b_tx, a_rx) = channel();

    let a = Port {
        tx: a_tx,
        rx: a_rx,
        log: Default::default(),
    };
    let b = Port {
        tx: b_tx,
        rx: b_rx,
        log: Default::default(),
    };
    (a, b)
}

impl FrameTransport for Port {
    fn send(&mut self, frame: &PhyFrame) -> Result<(), Error> {
        self.log.lock().unwrap().push(*frame);
        self.tx.send(*frame).map_err(|_| Error::Link)
    }

    fn receive(&mut self) -> Result<Option<PhyFrame>, Error> {
        match self.rx.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::Link),
        }
    }
}

pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
