//! An in-memory I2C device for tests.

use std::collections::VecDeque;
use std::vec::Vec;

use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Nack;

impl embedded_hal::i2c::Error for Nack {
    fn kind(&self) -> ErrorKind {
        ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
    }
}

/// A device with 256 auto-incrementing byte registers.
///
/// The first byte of a write selects the register. Queued replies are
/// served to reads before the register file is consulted.
#[derive(Debug)]
pub(crate) struct RegisterFile {
    pub(crate) address: u8,
    pub(crate) regs: [u8; 256],
    pub(crate) replies: VecDeque<Vec<u8>>,
    pub(crate) writes: Vec<Vec<u8>>,
    pointer: u8,
}

impl RegisterFile {
    pub(crate) fn new(address: u8) -> Self {
        Self {
            address,
            regs: [0; 256],
            replies: VecDeque::new(),
            writes: Vec::new(),
            pointer: 0,
        }
    }

    pub(crate) fn reply(&mut self, bytes: &[u8]) {
        self.replies.push_back(bytes.to_vec());
    }

    pub(crate) fn take_writes(&mut self) -> Vec<Vec<u8>> {
        core::mem::take(&mut self.writes)
    }
}

impl ErrorType for RegisterFile {
    type Error = Nack;
}

impl I2c for RegisterFile {
    fn transaction(&mut self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), Nack> {
        if address != self.address {
            return Err(Nack);
        }

        for op in operations.iter_mut() {
            match op {
                Operation::Write(bytes) => {
                    self.writes.push(bytes.to_vec());
                    if let Some((&reg, data)) = bytes.split_first() {
                        self.pointer = reg;
                        for (i, b) in data.iter().enumerate() {
                            self.regs[reg.wrapping_add(i as u8) as usize] = *b;
                        }
                    }
                }
                Operation::Read(buf) => {
                    if let Some(reply) = self.replies.pop_front() {
                        let n = buf.len().min(reply.len());
                        buf[..n].copy_from_slice(&reply[..n]);
                    } else {
                        for (i, b) in buf.iter_mut().enumerate() {
                            *b = self.regs[self.pointer.wrapping_add(i as u8) as usize];
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// A delay that returns immediately, counting what was asked of it.
#[derive(Debug, Default)]
pub(crate) struct NoDelay {
    pub(crate) total_ns: u64,
}

impl embedded_hal::delay::DelayNs for NoDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += ns as u64;
    }
}

/// A sensor sink that records everything published to it.
pub(crate) fn recorder<T: 'static>() -> (crate::Sensor<T>, std::rc::Rc<core::cell::RefCell<Vec<T>>>) {
    let seen = std::rc::Rc::new(core::cell::RefCell::new(Vec::new()));
    let sink = seen.clone();
    (crate::Sensor::new(move |v| sink.borrow_mut().push(v)), seen)
}
