//! HLK-LD2413 liquid level and door limit radar.

use alloc::string::String;

use embedded_hal::delay::DelayNs;
use nom::combinator::map;
use nom::number::complete::le_f32;
use nom::IResult;

use super::ld24xx::{self, DISABLE_CONFIG, ENABLE_CONFIG, ENABLE_CONFIG_DATA, MARKERS};
use crate::exchange::{Blocking, ExchangeError};
use crate::protocol::parse::MessageParse;
use crate::protocol::{
    parse_frame, CommandSerialize, FrameReader, Framing, Length, Malformed, NoChecksum, Serializer,
    Tag,
};
use crate::time::{DurationExtU32, MillisDuration};
use crate::{ByteSource, Driver, Error, Health, Sensor};

pub const BAUD_RATE: u32 = 115200;

pub const EXCHANGE_TIMEOUT: MillisDuration = MillisDuration::millis(1000);

/// Shortest distance the radar accepts, in mm.
pub const MIN_DISTANCE: u16 = 150;
/// Longest distance the radar accepts, in mm.
pub const MAX_DISTANCE: u16 = 10500;

/// Uploads are always a single distance.
pub const UPLOAD_FRAMING: Framing<NoChecksum> = Framing {
    markers: MARKERS,
    length: Length::Fixed(14),
    command: None,
    payload: 6,
    checksum: None,
    max_len: 14,
};

/// A distance upload, in mm.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Upload(pub f32);

impl<'a> MessageParse<'a> for Upload {
    fn parse_body(_tag: Tag) -> impl nom::Parser<&'a [u8], Self, nom::error::Error<&'a [u8]>> {
        move |input: &'a [u8]| -> IResult<&'a [u8], Self> { map(le_f32, Upload)(input) }
    }
}

/// Parameters written to the radar at setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    min_distance: u16,
    max_distance: u16,
    report_interval: MillisDuration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_distance: MIN_DISTANCE,
            max_distance: MAX_DISTANCE,
            report_interval: 20.secs(),
        }
    }
}

fn clamp_distance(mm: u16) -> u16 {
    mm.clamp(MIN_DISTANCE, MAX_DISTANCE)
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nearest distance to report, in mm.
    pub fn min_distance(mut self, mm: u16) -> Self {
        self.min_distance = clamp_distance(mm);
        self
    }

    pub fn get_min_distance(&self) -> u16 {
        self.min_distance
    }

    /// Farthest distance to report, in mm.
    pub fn max_distance(mut self, mm: u16) -> Self {
        self.max_distance = clamp_distance(mm);
        self
    }

    pub fn get_max_distance(&self) -> u16 {
        self.max_distance
    }

    /// Time between uploads. The radar takes this as a 16-bit count of
    /// milliseconds.
    pub fn report_interval(mut self, interval: MillisDuration) -> Self {
        self.report_interval = interval.min(MillisDuration::millis(u16::MAX as u32));
        self
    }

    pub fn get_report_interval(&self) -> MillisDuration {
        self.report_interval
    }
}

/// Commands the radar accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Request {
    Version,
    EnableConfig,
    DisableConfig,
    /// mm
    SetMinDistance(u16),
    /// mm
    SetMaxDistance(u16),
    /// Recalibrate the door limit against the current scene.
    UpdateDoorLimit,
    /// ms
    SetReportInterval(u16),
    GetReportInterval,
}

impl CommandSerialize for Request {
    fn command(&self) -> u16 {
        match self {
            Self::Version => 0x0000,
            Self::EnableConfig => ENABLE_CONFIG,
            Self::DisableConfig => DISABLE_CONFIG,
            Self::SetMinDistance(_) => 0x0074,
            Self::SetMaxDistance(_) => 0x0075,
            Self::UpdateDoorLimit => 0x0072,
            Self::SetReportInterval(_) => 0x0071,
            Self::GetReportInterval => 0x0070,
        }
    }

    fn payload<S>(&self, ser: &mut S) -> Result<(), S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::EnableConfig => ser.write_bytes(ENABLE_CONFIG_DATA),
            Self::SetMinDistance(v) | Self::SetMaxDistance(v) | Self::SetReportInterval(v) => {
                ser.write_le_u16(*v)
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct Sensors {
    /// mm
    pub distance: Sensor<f32>,
}

/// LD2413 driver.
#[derive(Debug)]
pub struct Ld2413<P, D> {
    port: P,
    exchange: Blocking<D>,
    reader: FrameReader<NoChecksum>,
    config: Config,
    in_config: bool,
    health: Health,
    pub sensors: Sensors,
}

impl<P, D> Ld2413<P, D>
where
    P: ByteSource + embedded_io::Write,
    D: DelayNs,
{
    pub fn new(port: P, delay: D, config: Config, sensors: Sensors) -> Self {
        Self {
            port,
            exchange: Blocking::new(delay, EXCHANGE_TIMEOUT)
                .poll(5.millis())
                .baud(BAUD_RATE),
            reader: FrameReader::new(UPLOAD_FRAMING),
            config,
            in_config: false,
            health: Health::new(),
            sensors,
        }
    }

    pub fn release(self) -> (P, D) {
        (self.port, self.exchange.release())
    }

    pub fn in_config(&self) -> bool {
        self.in_config
    }

    fn command(&mut self, request: Request) -> Result<ld24xx::Reply, Error<P::Error>> {
        ld24xx::checked(&mut self.port, &mut self.exchange, &mut self.health, &request)
    }

    pub fn enable_config(&mut self) -> Result<(), Error<P::Error>> {
        self.in_config = true;
        self.reader.reset();
        self.command(Request::EnableConfig)?;
        Ok(())
    }

    pub fn disable_config(&mut self) -> Result<(), Error<P::Error>> {
        let result = self.command(Request::DisableConfig);
        self.in_config = false;
        result.map(|_| ())
    }

    /// Nearest distance to report, in mm, clamped to what the radar
    /// accepts.
    pub fn set_min_distance(&mut self, mm: u16) -> Result<(), Error<P::Error>> {
        self.command(Request::SetMinDistance(clamp_distance(mm)))?;
        Ok(())
    }

    /// Farthest distance to report, in mm, clamped to what the radar
    /// accepts.
    pub fn set_max_distance(&mut self, mm: u16) -> Result<(), Error<P::Error>> {
        self.command(Request::SetMaxDistance(clamp_distance(mm)))?;
        Ok(())
    }

    pub fn update_door_limit(&mut self) -> Result<(), Error<P::Error>> {
        self.command(Request::UpdateDoorLimit)?;
        Ok(())
    }

    pub fn set_report_interval(&mut self, interval: MillisDuration) -> Result<(), Error<P::Error>> {
        let ms = interval.ticks().min(u16::MAX as u32) as u16;
        self.command(Request::SetReportInterval(ms))?;
        Ok(())
    }

    /// The report interval, as the radar answers it.
    ///
    /// The answer is put together from the status word and the first
    /// two value bytes, `status | value[0] << 16 | value[1] << 24`. A
    /// nonzero status sets the warning flag but still produces a value.
    pub fn get_report_interval(&mut self) -> Result<u32, Error<P::Error>> {
        let reply = ld24xx::unchecked(
            &mut self.port,
            &mut self.exchange,
            &mut self.health,
            &Request::GetReportInterval,
        )?;
        if reply.status != 0 {
            log::warn!("report interval status 0x{:04x}", reply.status);
            self.health.set_warning();
        }

        match reply.value[..] {
            [lo, hi, ..] => Ok(reply.status as u32 | (lo as u32) << 16 | (hi as u32) << 24),
            _ => Err(Error::Exchange(ExchangeError::Malformed(Malformed::Length(
                reply.value.len(),
            )))),
        }
    }

    /// Firmware version text. The status word is part of it.
    pub fn version(&mut self) -> Result<String, Error<P::Error>> {
        let reply = ld24xx::unchecked(&mut self.port, &mut self.exchange, &mut self.health, &Request::Version)?;
        Ok(reply.text())
    }

    fn apply_config(&mut self) -> Result<(), Error<P::Error>> {
        self.set_report_interval(self.config.get_report_interval())?;
        self.set_min_distance(self.config.get_min_distance())?;
        self.set_max_distance(self.config.get_max_distance())
    }
}

impl<P, D> Driver for Ld2413<P, D>
where
    P: ByteSource + embedded_io::Write,
    D: DelayNs,
{
    type Error = Error<P::Error>;

    fn setup(&mut self) -> Result<(), Self::Error> {
        self.enable_config()?;
        let configured = self.apply_config();
        let disabled = self.disable_config();
        configured.and(disabled)
    }

    fn poll(&mut self) -> Result<(), Self::Error> {
        if self.in_config {
            return Ok(());
        }

        while let Some(frame) = self.reader.read_frame(&mut self.port)? {
            match parse_frame::<Upload>(&frame) {
                Ok(Upload(mm)) => self.sensors.distance.publish(mm),
                Err(e) => log::warn!("{}", e),
            }
        }
        Ok(())
    }

    fn health(&self) -> Health {
        self.health
    }
}
