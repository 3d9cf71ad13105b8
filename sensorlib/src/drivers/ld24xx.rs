//! Command protocol shared by the LD24xx family of radars.
//!
//! Commands and their acknowledgements are framed as
//! `FD FC FB FA len cmd data 04 03 02 01`, with a little-endian
//! `len` counting the command and data. Acknowledgements carry the
//! command code with bit 8 set, then a little-endian status, then any
//! returned value.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::exchange::{self, Exchange, ExchangeError};
use crate::protocol::{CommandSerialize, Field, Framing, Length, Malformed, Markers, NoChecksum, Width};
use crate::{ByteSource, Error, Health};

pub const HEADER: &[u8] = b"\xfd\xfc\xfb\xfa";
pub const TAIL: &[u8] = b"\x04\x03\x02\x01";
pub const MARKERS: &[Markers] = &[Markers {
    header: HEADER,
    tail: TAIL,
}];

/// Offset of the length field, right after the header.
const LENGTH_AT: usize = 4;

pub const COMMAND_FRAMING: Framing<NoChecksum> = Framing {
    markers: MARKERS,
    length: Length::Field {
        field: Field::new(LENGTH_AT, Width::LeU16),
        base: 10,
    },
    command: Some(Field::new(6, Width::LeU16)),
    payload: 8,
    checksum: None,
    max_len: 0x100,
};

pub const ENABLE_CONFIG: u16 = 0x00ff;
/// Data sent with [ENABLE_CONFIG].
pub const ENABLE_CONFIG_DATA: &[u8] = b"\x01\x00";
pub const DISABLE_CONFIG: u16 = 0x00fe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
/// Baud rates the radars support.
#[repr(u8)]
pub enum BaudRate {
    B9600 = 1,
    B19200 = 2,
    B38400 = 3,
    B57600 = 4,
    B115200 = 5,
    B230400 = 6,
    B256000 = 7,
    B460800 = 8,
}

impl BaudRate {
    const ALL: [Self; 8] = [
        Self::B9600,
        Self::B19200,
        Self::B38400,
        Self::B57600,
        Self::B115200,
        Self::B230400,
        Self::B256000,
        Self::B460800,
    ];

    /// Baud rate code, counting from 1.
    pub const fn code(&self) -> u8 {
        *self as u8
    }

    pub const fn bps(&self) -> u32 {
        match self {
            Self::B9600 => 9600,
            Self::B19200 => 19200,
            Self::B38400 => 38400,
            Self::B57600 => 57600,
            Self::B115200 => 115200,
            Self::B230400 => 230400,
            Self::B256000 => 256000,
            Self::B460800 => 460800,
        }
    }

    pub fn from_bps(bps: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.bps() == bps)
    }
}

/// An acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reply {
    /// Command code echoed back, usually with bit 8 set.
    pub command: u16,
    pub status: u16,
    pub value: Vec<u8>,
}

impl Reply {
    /// Parse the data of an acknowledgement frame.
    pub fn from_payload(command: u16, payload: &[u8]) -> Result<Self, Malformed> {
        let [lo, hi, ..] = *payload else {
            return Err(Malformed::Length(payload.len()));
        };
        Ok(Self {
            command,
            status: u16::from_le_bytes([lo, hi]),
            value: payload[2..].to_vec(),
        })
    }

    /// Fail on a nonzero status.
    pub fn ok(self) -> Result<Self, ExchangeError> {
        if self.status != 0 {
            Err(ExchangeError::Status(self.status))
        } else {
            Ok(self)
        }
    }

    /// The status bytes and value together as text, the way these
    /// devices report their firmware version.
    pub fn text(&self) -> String {
        let mut bytes = self.status.to_le_bytes().to_vec();
        bytes.extend_from_slice(&self.value);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Send a command and wait for its acknowledgement.
///
/// The reply is read directly off the port, so the caller must make
/// sure no uploads are interleaved with it.
pub fn command<S, E, M>(port: &mut S, exchange: &mut E, command: &M) -> Result<Reply, Error<S::Error>>
where
    S: ByteSource + embedded_io::Write,
    E: Exchange,
    M: CommandSerialize,
{
    let request = command
        .frame(&COMMAND_FRAMING, 0)
        .map_err(|e| Error::Exchange(e.into()))?;
    exchange::transact(port, &request)?;

    let malformed = |e: Malformed| Error::Exchange(ExchangeError::Malformed(e));

    let mut buf = vec![0; LENGTH_AT + 2];
    exchange.read_exact(port, &mut buf)?;
    if !buf.starts_with(HEADER) {
        return Err(malformed(Malformed::Header));
    }

    let len = u16::from_le_bytes([buf[LENGTH_AT], buf[LENGTH_AT + 1]]) as usize + 10;
    if len > COMMAND_FRAMING.max_len || len < COMMAND_FRAMING.min_len(0) {
        return Err(malformed(Malformed::Length(len)));
    }
    buf.resize(len, 0);
    exchange.read_exact(port, &mut buf[LENGTH_AT + 2..])?;

    let frame = COMMAND_FRAMING.parse(&buf).map_err(malformed)?;
    let reply = Reply::from_payload(frame.command().unwrap_or(0), frame.payload()).map_err(malformed)?;
    log::debug!(
        "ack 0x{:04x} status 0x{:04x} value {:02x?}",
        reply.command,
        reply.status,
        reply.value
    );
    Ok(reply)
}

/// Like [command], but keep the driver's warning flag in step with
/// the outcome. The status is left for the caller to judge.
pub fn unchecked<S, E, M>(
    port: &mut S,
    exchange: &mut E,
    health: &mut Health,
    request: &M,
) -> Result<Reply, Error<S::Error>>
where
    S: ByteSource + embedded_io::Write,
    E: Exchange,
    M: CommandSerialize + core::fmt::Debug,
{
    log::debug!("request {:?}", request);
    let result = command(port, exchange, request);
    track(health, request, &result);
    result
}

/// Like [unchecked], but a nonzero status is a failure too.
pub fn checked<S, E, M>(
    port: &mut S,
    exchange: &mut E,
    health: &mut Health,
    request: &M,
) -> Result<Reply, Error<S::Error>>
where
    S: ByteSource + embedded_io::Write,
    E: Exchange,
    M: CommandSerialize + core::fmt::Debug,
{
    log::debug!("request {:?}", request);
    let result = command(port, exchange, request)
        .and_then(|reply| reply.ok().map_err(Error::Exchange));
    track(health, request, &result);
    result
}

fn track<M, E>(health: &mut Health, request: &M, result: &Result<Reply, Error<E>>)
where
    M: core::fmt::Debug,
    E: core::fmt::Debug,
{
    match result {
        Ok(_) => health.clear_warning(),
        Err(e) => {
            log::warn!("{:?} failed: {}", request, e);
            health.set_warning();
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use alloc::vec::Vec;

    use super::*;
    use crate::exchange::Blocking;
    use crate::port::mock::{MockPort, NoDelay};
    use crate::protocol::Serializer;
    use crate::time::DurationExtU32;

    #[derive(Debug)]
    struct Raw(u16, &'static [u8]);

    impl CommandSerialize for Raw {
        fn command(&self) -> u16 {
            self.0
        }

        fn payload<S>(&self, ser: &mut S) -> Result<(), S::Error>
        where
            S: Serializer,
        {
            ser.write_bytes(self.1)
        }
    }

    /// An acknowledgement frame, as the device would send it.
    pub(crate) fn ack(code: u16, status: u16, value: &[u8]) -> Vec<u8> {
        let mut data = status.to_le_bytes().to_vec();
        data.extend_from_slice(value);
        COMMAND_FRAMING.encode(0, code | 0x100, &data).unwrap()
    }

    #[test]
    fn enable_config_frame() {
        let frame = Raw(ENABLE_CONFIG, ENABLE_CONFIG_DATA).frame(&COMMAND_FRAMING, 0).unwrap();
        assert_eq!(
            frame,
            b"\xfd\xfc\xfb\xfa\x04\x00\xff\x00\x01\x00\x04\x03\x02\x01"
        );
    }

    #[test]
    fn exchange_reads_ack() {
        let mut port = MockPort::new();
        port.reply(&ack(0x00a0, 0, b"\x01\x02"));
        let mut ex = Blocking::new(NoDelay::default(), 100.millis());
        let reply = command(&mut port, &mut ex, &Raw(0x00a0, b"")).unwrap();
        assert_eq!(reply.command, 0x01a0);
        assert_eq!(reply.status, 0);
        assert_eq!(reply.value, b"\x01\x02");
    }

    #[test]
    fn exchange_bad_header() {
        let mut port = MockPort::new();
        port.reply(b"\xfd\xfc\xfb\x00\x04\x00\xff\x01\x00\x00\x04\x03\x02\x01");
        let mut ex = Blocking::new(NoDelay::default(), 100.millis());
        assert_eq!(
            command(&mut port, &mut ex, &Raw(DISABLE_CONFIG, b"")),
            Err(Error::Exchange(ExchangeError::Malformed(Malformed::Header)))
        );
    }

    #[test]
    fn exchange_times_out() {
        let mut port = MockPort::new();
        let mut ex = Blocking::new(NoDelay::default(), 10.millis());
        assert_eq!(
            command(&mut port, &mut ex, &Raw(DISABLE_CONFIG, b"")),
            Err(Error::Exchange(ExchangeError::Timeout))
        );
    }

    #[test]
    fn checked_tracks_health() {
        let mut port = MockPort::new();
        port.reply(&ack(0x00a2, 1, b""));
        port.reply(&ack(0x00a2, 0, b""));
        let mut ex = Blocking::new(NoDelay::default(), 100.millis());
        let mut health = Health::new();

        let result = checked(&mut port, &mut ex, &mut health, &Raw(0x00a2, b""));
        assert_eq!(result, Err(Error::Exchange(ExchangeError::Status(1))));
        assert!(health.is_warning());

        assert!(checked(&mut port, &mut ex, &mut health, &Raw(0x00a2, b"")).is_ok());
        assert!(!health.is_warning());
    }

    #[test]
    fn nonzero_status() {
        let reply = Reply::from_payload(0x01ff, b"\x01\x00").unwrap();
        assert_eq!(reply.ok(), Err(ExchangeError::Status(1)));
    }

    #[test]
    fn version_text() {
        let reply = Reply::from_payload(0x01a0, b"V1.02.3").unwrap();
        assert_eq!(reply.text(), "V1.02.3");
    }
}
