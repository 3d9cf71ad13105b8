//! Synchronous request/reply exchanges.
//!
//! Some devices only answer when asked. These helpers write a request
//! and then wait, bounded by a timeout, for a fixed-size or delimited
//! reply, bypassing the frame reader.

use alloc::vec::Vec;

use embedded_hal::delay::DelayNs;

use crate::protocol::checksum::ChecksumStyle;
use crate::protocol::framing::{Framing, Malformed};
use crate::protocol::serialize::CommandSerialize;
use crate::time::{DurationExtU32, MillisDuration};
use crate::{ByteSource, Error};

/// Why an exchange did not produce a usable reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ExchangeError {
    /// The device did not answer in time.
    Timeout,
    /// The device answered with garbage.
    Malformed(Malformed),
    /// The device answered with a nonzero status code.
    Status(u16),
    /// The device refused the request outright.
    Rejected,
}

#[cfg(feature = "std")]
impl std::error::Error for ExchangeError {}

impl core::fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out waiting for reply"),
            Self::Malformed(e) => write!(f, "malformed reply: {}", e),
            Self::Status(s) => write!(f, "device returned status 0x{:04x}", s),
            Self::Rejected => write!(f, "device rejected the request"),
        }
    }
}

impl From<Malformed> for ExchangeError {
    fn from(other: Malformed) -> Self {
        Self::Malformed(other)
    }
}

/// A way to wait for reply bytes.
pub trait Exchange {
    /// Read exactly `buf.len()` bytes.
    fn read_exact<S>(&mut self, port: &mut S, buf: &mut [u8]) -> Result<(), Error<S::Error>>
    where
        S: ByteSource;

    /// Append bytes to `buf` until `done(buf)` is true.
    fn read_until<S, F>(
        &mut self,
        port: &mut S,
        buf: &mut Vec<u8>,
        done: F,
    ) -> Result<(), Error<S::Error>>
    where
        S: ByteSource,
        F: FnMut(&[u8]) -> bool;
}

impl<E> Exchange for &mut E
where
    E: Exchange,
{
    fn read_exact<S>(&mut self, port: &mut S, buf: &mut [u8]) -> Result<(), Error<S::Error>>
    where
        S: ByteSource,
    {
        E::read_exact(self, port, buf)
    }

    fn read_until<S, F>(
        &mut self,
        port: &mut S,
        buf: &mut Vec<u8>,
        done: F,
    ) -> Result<(), Error<S::Error>>
    where
        S: ByteSource,
        F: FnMut(&[u8]) -> bool,
    {
        E::read_until(self, port, buf, done)
    }
}

/// Busy-wait for replies, sleeping between polls of the port.
///
/// The time slept is counted, as is the time the line needs to carry
/// every byte read, and the exchange gives up once the sum reaches the
/// timeout. A device that keeps talking without ever answering still
/// times out.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Blocking<D> {
    delay: D,
    timeout: MillisDuration,
    poll: MillisDuration,
    bytes_per_ms: u32,
}

/// Bytes per millisecond at a given baud rate, with 10 bits per byte.
fn bytes_per_ms(baud: u32) -> u32 {
    (baud / 10_000).max(1)
}

impl<D> Blocking<D>
where
    D: DelayNs,
{
    pub fn new(delay: D, timeout: MillisDuration) -> Self {
        Self {
            delay,
            timeout,
            poll: 1.millis(),
            bytes_per_ms: bytes_per_ms(115_200),
        }
    }

    /// Charge received bytes at this line rate. Defaults to 115200.
    pub fn baud(mut self, baud: u32) -> Self {
        self.bytes_per_ms = bytes_per_ms(baud);
        self
    }

    /// Sleep this long between polls. Never less than 1ms.
    pub fn poll(mut self, poll: MillisDuration) -> Self {
        self.poll = poll.max(1.millis());
        self
    }

    pub fn timeout(&self) -> MillisDuration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: MillisDuration) {
        self.timeout = timeout;
    }

    /// The wrapped delay, for drivers that need to sleep themselves.
    pub fn delay_mut(&mut self) -> &mut D {
        &mut self.delay
    }

    pub fn release(self) -> D {
        self.delay
    }

    // feed bytes to `take` until it says stop
    fn wait<S, F>(&mut self, port: &mut S, mut take: F) -> Result<(), Error<S::Error>>
    where
        S: ByteSource,
        F: FnMut(u8) -> bool,
    {
        let mut waited = 0u32;
        let mut received = 0u32;
        loop {
            while let Some(b) = port.read_byte()? {
                if take(b) {
                    return Ok(());
                }

                received += 1;
                if received >= self.bytes_per_ms {
                    received = 0;
                    waited = waited.saturating_add(1);
                    if waited >= self.timeout.ticks() {
                        return Err(Error::Exchange(ExchangeError::Timeout));
                    }
                }
            }

            if waited >= self.timeout.ticks() {
                return Err(Error::Exchange(ExchangeError::Timeout));
            }
            self.delay.delay_ms(self.poll.ticks());
            waited = waited.saturating_add(self.poll.ticks());
        }
    }
}

impl<D> Exchange for Blocking<D>
where
    D: DelayNs,
{
    fn read_exact<S>(&mut self, port: &mut S, buf: &mut [u8]) -> Result<(), Error<S::Error>>
    where
        S: ByteSource,
    {
        if buf.is_empty() {
            return Ok(());
        }

        let mut pos = 0;
        self.wait(port, |b| {
            buf[pos] = b;
            pos += 1;
            pos == buf.len()
        })
    }

    fn read_until<S, F>(
        &mut self,
        port: &mut S,
        buf: &mut Vec<u8>,
        mut done: F,
    ) -> Result<(), Error<S::Error>>
    where
        S: ByteSource,
        F: FnMut(&[u8]) -> bool,
    {
        if done(buf) {
            return Ok(());
        }

        self.wait(port, |b| {
            buf.push(b);
            done(buf)
        })
    }
}

/// Write raw bytes and flush, without touching pending input.
pub fn send<S>(port: &mut S, bytes: &[u8]) -> Result<(), Error<S::Error>>
where
    S: embedded_io::Write,
{
    port.write_all(bytes)?;
    port.flush()?;
    Ok(())
}

/// Encode and send a command, without touching pending input.
pub fn send_command<S, C, M>(
    port: &mut S,
    framing: &Framing<C>,
    kind: usize,
    command: &M,
) -> Result<(), Error<S::Error>>
where
    S: embedded_io::Write,
    C: ChecksumStyle,
    M: CommandSerialize,
{
    let bytes = command
        .frame(framing, kind)
        .map_err(|e| Error::Exchange(e.into()))?;
    log::trace!("sending: {:02x?}", bytes);
    send(port, &bytes)
}

/// Start an exchange: throw away stale input, then send the request.
///
/// The caller reads the reply through an [Exchange].
pub fn transact<S>(port: &mut S, request: &[u8]) -> Result<(), Error<S::Error>>
where
    S: ByteSource + embedded_io::Write,
{
    let stale = port.drain()?;
    if stale > 0 {
        log::trace!("discarded {} stale bytes before exchange", stale);
    }
    log::trace!("request: {:02x?}", request);
    send(port, request)
}

#[cfg(test)]
mod test {
    use alloc::vec::Vec;

    use super::*;
    use crate::port::mock::{MockPort, NoDelay};

    #[test]
    fn reply_after_request() {
        let mut port = MockPort::new();
        port.feed(b"stale");
        port.reply(b"\xff\x86\x00");

        transact(&mut port, b"\xff\x01\x86").unwrap();
        assert_eq!(port.take_output(), b"\xff\x01\x86");

        let mut ex = Blocking::new(NoDelay::default(), 100.millis());
        let mut buf = [0; 3];
        ex.read_exact(&mut port, &mut buf).unwrap();
        assert_eq!(&buf, b"\xff\x86\x00");
    }

    #[test]
    fn timeout_is_bounded() {
        let mut port = MockPort::new();
        port.feed(b"\x01");
        let mut ex = Blocking::new(NoDelay::default(), 50.millis()).poll(5.millis());
        let mut buf = [0; 2];
        assert_eq!(
            ex.read_exact(&mut port, &mut buf),
            Err(Error::Exchange(ExchangeError::Timeout))
        );
        // slept the full timeout, and no more
        assert_eq!(ex.release().total_ns, 50_000_000);
    }

    #[test]
    fn chatter_still_times_out() {
        let mut port = MockPort::new();
        port.feed(&alloc::vec![b'x'; 100_000]);
        let mut ex = Blocking::new(NoDelay::default(), 1.millis());
        let mut buf = Vec::new();
        assert_eq!(
            ex.read_until(&mut port, &mut buf, |b| b.ends_with(b"OK\r\n")),
            Err(Error::Exchange(ExchangeError::Timeout))
        );
        // one millisecond of line time at 115200 baud
        assert_eq!(buf.len(), 11);
        assert_eq!(port.input.len(), 100_000 - 11);
        assert_eq!(ex.release().total_ns, 0);
    }

    #[test]
    fn slow_lines_charge_more_per_byte() {
        let mut port = MockPort::new();
        port.feed(&[0; 64]);
        let mut ex = Blocking::new(NoDelay::default(), 5.millis()).baud(9600);
        let mut buf = [0; 32];
        assert_eq!(
            ex.read_exact(&mut port, &mut buf),
            Err(Error::Exchange(ExchangeError::Timeout))
        );
        assert_eq!(port.input.len(), 64 - 5);
    }

    #[test]
    fn zero_poll_still_bounded() {
        let mut port = MockPort::new();
        let mut ex = Blocking::new(NoDelay::default(), 3.millis()).poll(0.millis());
        let mut buf = [0; 1];
        assert!(ex.read_exact(&mut port, &mut buf).is_err());
    }

    #[test]
    fn read_line() {
        let mut port = MockPort::new();
        port.feed(b"OK\r\nmore");
        let mut ex = Blocking::new(NoDelay::default(), 10.millis());
        let mut buf = Vec::new();
        ex.read_until(&mut port, &mut buf, |b| b.ends_with(b"\r\n"))
            .unwrap();
        assert_eq!(buf, b"OK\r\n");
        assert_eq!(port.input.len(), 4);
    }
}
