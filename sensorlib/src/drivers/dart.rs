//! Dart WS-Z formaldehyde and ZE-series gas sensors.
//!
//! Both speak the same 9-byte protocol. In active mode readings are
//! uploaded unprompted; in passive (question-answer) mode each reading
//! is a synchronous exchange run from [Driver::update].

use embedded_hal::delay::DelayNs;
use nom::bytes::complete::take;
use nom::combinator::map;
use nom::number::complete::be_u16;
use nom::sequence::preceded;
use nom::IResult;

use crate::exchange::{self, Blocking, Exchange, ExchangeError};
use crate::protocol::parse::MessageParse;
use crate::protocol::{
    parse_frame, Checksum, CommandSerialize, Field, FrameReader, Framing, Length, Malformed,
    Markers, NegSum8, Serializer, Tag, Width,
};
use crate::time::{DurationExtU32, MillisDuration};
use crate::{ByteSource, Driver, Error, Health, Sensor};

pub const BAUD_RATE: u32 = 9600;

/// Frames sent by the sensor, both uploads and replies.
pub const FRAMING: Framing<NegSum8> = Framing {
    markers: &[Markers {
        header: b"\xff",
        tail: b"",
    }],
    length: Length::Fixed(9),
    command: Some(Field::new(1, Width::U8)),
    payload: 2,
    checksum: Some(Checksum {
        style: NegSum8,
        start: 1,
    }),
    max_len: 9,
};

/// Frames sent to the sensor.
pub const REQUEST_FRAMING: Framing<NegSum8> = Framing {
    markers: &[Markers {
        header: b"\xff\x01",
        tail: b"",
    }],
    length: Length::Fixed(9),
    command: Some(Field::new(2, Width::U8)),
    payload: 3,
    checksum: Some(Checksum {
        style: NegSum8,
        start: 1,
    }),
    max_len: 9,
};

/// Which sensor is on the line. They differ in their replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Variant {
    /// WS-Z formaldehyde sensor.
    WsZ,
    /// ZE-series gas sensor.
    Ze,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Readings are requested by [Driver::update].
    #[default]
    Passive,
    /// Readings arrive by themselves.
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    mode: Mode,
    timeout: MillisDuration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Passive,
            timeout: 1000.millis(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn get_mode(&self) -> Mode {
        self.mode
    }

    /// How long to wait for a reply in passive mode.
    pub fn timeout(mut self, timeout: MillisDuration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn get_timeout(&self) -> MillisDuration {
        self.timeout
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Request {
    /// Ask for a reading, in passive mode.
    Read,
    SetPassive,
    SetActive,
}

impl CommandSerialize for Request {
    fn command(&self) -> u16 {
        match self {
            Self::Read => 0x86,
            Self::SetPassive | Self::SetActive => 0x78,
        }
    }

    fn payload<S>(&self, ser: &mut S) -> Result<(), S::Error>
    where
        S: Serializer,
    {
        let mode = match self {
            Self::Read => 0x00,
            Self::SetPassive => 0x41,
            Self::SetActive => 0x40,
        };
        ser.write_bytes(&[mode, 0, 0, 0, 0])
    }
}

/// An unprompted reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Upload {
    pub ppb: u16,
}

impl<'a> MessageParse<'a> for Upload {
    fn parse_body(_tag: Tag) -> impl nom::Parser<&'a [u8], Self, nom::error::Error<&'a [u8]>> {
        move |input: &'a [u8]| -> IResult<&'a [u8], Self> {
            map(preceded(take(2usize), be_u16), |ppb| Upload { ppb })(input)
        }
    }
}

/// A reading answered in passive mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reading {
    /// µg/m³, from the WS-Z only.
    pub concentration: Option<u16>,
    pub ppb: u16,
}

impl Reading {
    /// Decode a validated 9-byte reply.
    pub fn from_reply(variant: Variant, reply: &[u8; 9]) -> Self {
        let word = |at: usize| u16::from_be_bytes([reply[at], reply[at + 1]]);
        match variant {
            Variant::WsZ => Self {
                concentration: Some(word(2)),
                ppb: word(6),
            },
            Variant::Ze => Self {
                concentration: None,
                ppb: word(2),
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct Sensors {
    /// µg/m³. Only the WS-Z reports this, and only in passive mode.
    pub concentration: Sensor<u16>,
    pub ppb: Sensor<u16>,
}

impl Sensors {
    fn publish(&mut self, reading: Reading) {
        if let Some(c) = reading.concentration {
            self.concentration.publish(c);
        }
        self.ppb.publish(reading.ppb);
    }
}

/// WS-Z / ZE-xx driver.
#[derive(Debug)]
pub struct Dart<P, D> {
    port: P,
    exchange: Blocking<D>,
    reader: FrameReader<NegSum8>,
    variant: Variant,
    mode: Mode,
    health: Health,
    pub sensors: Sensors,
}

impl<P, D> Dart<P, D>
where
    P: ByteSource + embedded_io::Write,
    D: DelayNs,
{
    pub fn new(port: P, delay: D, variant: Variant, config: Config, sensors: Sensors) -> Self {
        Self {
            port,
            exchange: Blocking::new(delay, config.get_timeout()).baud(BAUD_RATE),
            reader: FrameReader::new(FRAMING),
            variant,
            mode: config.get_mode(),
            health: Health::new(),
            sensors,
        }
    }

    pub fn release(self) -> (P, D) {
        (self.port, self.exchange.release())
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Send a request and read back the 9-byte answer, unchecked.
    fn transact(&mut self, request: Request) -> Result<[u8; 9], Error<P::Error>> {
        let bytes = request
            .frame(&REQUEST_FRAMING, 0)
            .map_err(|e| Error::Exchange(e.into()))?;
        exchange::transact(&mut self.port, &bytes)?;
        let mut reply = [0; 9];
        self.exchange.read_exact(&mut self.port, &mut reply)?;
        log::trace!("reply: {:02x?}", reply);
        Ok(reply)
    }

    /// Request one reading, in passive mode.
    pub fn read(&mut self) -> Result<Reading, Error<P::Error>> {
        let reply = self.transact(Request::Read)?;
        if reply[0] != 0xff || reply[1] != 0x86 {
            return Err(Error::Exchange(ExchangeError::Malformed(Malformed::Header)));
        }
        FRAMING
            .parse(&reply)
            .map_err(|e| Error::Exchange(e.into()))?;
        Ok(Reading::from_reply(self.variant, &reply))
    }

    /// Switch to question-answer mode.
    pub fn set_passive(&mut self) -> Result<(), Error<P::Error>> {
        self.transact(Request::SetPassive)?;
        self.reader.reset();
        self.mode = Mode::Passive;
        Ok(())
    }

    /// Switch to unprompted uploads.
    pub fn set_active_upload(&mut self) -> Result<(), Error<P::Error>> {
        exchange::send_command(&mut self.port, &REQUEST_FRAMING, 0, &Request::SetActive)?;
        self.mode = Mode::Active;
        Ok(())
    }
}

impl<P, D> Driver for Dart<P, D>
where
    P: ByteSource + embedded_io::Write,
    D: DelayNs,
{
    type Error = Error<P::Error>;

    fn setup(&mut self) -> Result<(), Self::Error> {
        if self.mode == Mode::Passive {
            self.set_passive().inspect_err(|e| {
                log::warn!("switching to question-answer mode failed: {}", e);
                self.health.set_warning();
            })?;
        }
        Ok(())
    }

    fn poll(&mut self) -> Result<(), Self::Error> {
        if self.mode != Mode::Active {
            return Ok(());
        }

        while let Some(frame) = self.reader.read_frame(&mut self.port)? {
            match parse_frame::<Upload>(&frame) {
                Ok(upload) => self.sensors.ppb.publish(upload.ppb),
                Err(e) => log::warn!("{}", e),
            }
        }
        Ok(())
    }

    fn update(&mut self) -> Result<(), Self::Error> {
        if self.mode != Mode::Passive {
            return Ok(());
        }

        match self.read() {
            Ok(reading) => {
                log::debug!("{:?}", reading);
                self.health.clear_warning();
                self.sensors.publish(reading);
                Ok(())
            }
            Err(e) => {
                log::warn!("reading failed: {}", e);
                self.health.set_warning();
                Err(e)
            }
        }
    }

    fn health(&self) -> Health {
        self.health
    }
}
