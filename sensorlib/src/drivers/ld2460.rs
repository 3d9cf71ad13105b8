//! HLK-LD2460 presence radar.
//!
//! Uploads and command acknowledgements arrive on the same stream with
//! different headers, and are told apart by frame kind. Commands are
//! fire-and-forget; their answers come back through [Driver::poll].

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use nom::combinator::map;
use nom::number::complete::{le_i16, le_u16, u8};
use nom::sequence::tuple;
use nom::IResult;

pub use super::ld24xx::BaudRate;
use crate::exchange;
use crate::protocol::parse::MessageParse;
use crate::protocol::{
    parse_frame, CommandSerialize, Field, FrameReader, Framing, Length, Markers, NoChecksum,
    Serializer, Tag, Width,
};
use crate::{ByteSource, Driver, Error, Health, Sensor};

pub const BAUD_RATE: u32 = 115200;

/// Most targets reported per upload.
pub const MAX_TARGETS: usize = 5;

/// Frame kind of target uploads.
pub const UPLOAD: usize = 0;
/// Frame kind of command acknowledgements, and of commands.
pub const ACK: usize = 1;

pub const FRAMING: Framing<NoChecksum> = Framing {
    markers: &[
        Markers {
            header: b"\xf4\xf3\xf2\xf1",
            tail: b"\xf8\xf7\xf6\xf5",
        },
        Markers {
            header: b"\xfd\xfc\xfb\xfa",
            tail: b"\x04\x03\x02\x01",
        },
    ],
    length: Length::Field {
        field: Field::new(5, Width::LeU16),
        base: 0,
    },
    command: Some(Field::new(4, Width::U8)),
    payload: 7,
    checksum: None,
    max_len: 0x100,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Mode {
    Side = 1,
    Top = 2,
}

impl core::fmt::Display for Mode {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::Side => write!(f, "Side"),
            Self::Top => write!(f, "Top"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Sensitivity {
    High = 1,
    Medium = 2,
    Low = 3,
}

impl core::fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::High => write!(f, "High"),
            Self::Medium => write!(f, "Medium"),
            Self::Low => write!(f, "Low"),
        }
    }
}

/// Mounting parameters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Install {
    /// Height in cm.
    pub height: u16,
    /// Tilt in hundredths of a degree.
    pub angle: u16,
}

impl Install {
    /// From meters and degrees.
    pub fn new(height: f32, angle: f32) -> Self {
        Self {
            height: (height * 100.0) as u16,
            angle: (angle * 100.0) as u16,
        }
    }

    pub fn height_m(&self) -> f32 {
        self.height as f32 / 100.0
    }

    pub fn angle_deg(&self) -> f32 {
        self.angle as f32 / 100.0
    }
}

/// Detection area.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Range {
    /// Tenths of a meter.
    pub distance: u8,
    /// Tenths of a degree.
    pub start_angle: i16,
    /// Tenths of a degree.
    pub end_angle: i16,
}

impl Range {
    /// From meters and degrees.
    pub fn new(distance: f32, start_angle: f32, end_angle: f32) -> Self {
        Self {
            distance: (distance * 10.0) as u8,
            start_angle: (start_angle * 10.0) as i16,
            end_angle: (end_angle * 10.0) as i16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Version {
    pub year: u8,
    pub month: u8,
    pub major: u8,
    pub minor: u8,
}

impl core::fmt::Display for Version {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "20{:02}-{:02} V{}.{}",
            self.year, self.month, self.major, self.minor
        )
    }
}

/// A target position, in tenths of a meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Target {
    pub x: i16,
    pub y: i16,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Targets {
    /// Targets in the frame, which may be more than were kept.
    pub count: u8,
    pub targets: Vec<Target>,
}

/// Everything the radar sends.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reply {
    Targets(Targets),
    /// Upload toggle acknowledgement.
    UploadSet(u8),
    /// Was the install set?
    InstallSet(bool),
    Install(Install),
    /// Mode acknowledgement.
    ModeSet(u8),
    /// `None` for a mode we don't know.
    Mode(Option<Mode>),
    Version(Version),
    BaudRateSet(bool),
    FactoryReset(bool),
    RangeSet(bool),
    Range(Range),
    SensitivitySet(bool),
    /// `None` for a level we don't know.
    Sensitivity(Option<Sensitivity>),
}

fn targets(input: &[u8]) -> IResult<&[u8], Targets> {
    let count = input.len() / 4;
    let kept = count.min(MAX_TARGETS);
    let target = map(tuple((le_i16, le_i16)), |(x, y)| Target { x, y });
    let (input, targets) = nom::multi::count(target, kept)(input)?;
    Ok((
        input,
        Targets {
            count: count.min(u8::MAX as usize) as u8,
            targets,
        },
    ))
}

fn succeeded(input: &[u8]) -> IResult<&[u8], bool> {
    map(u8, |d| d != 0)(input)
}

impl<'a> MessageParse<'a> for Reply {
    fn parse_body(tag: Tag) -> impl nom::Parser<&'a [u8], Self, nom::error::Error<&'a [u8]>> {
        move |input: &'a [u8]| -> IResult<&'a [u8], Self> {
            if tag.kind == UPLOAD {
                return map(targets, Reply::Targets)(input);
            }

            match tag.command {
                Some(0x06) => map(u8, Reply::UploadSet)(input),
                Some(0x07) => map(succeeded, Reply::InstallSet)(input),
                Some(0x08) => map(tuple((le_u16, le_u16)), |(height, angle)| {
                    Reply::Install(Install { height, angle })
                })(input),
                Some(0x09) => map(u8, Reply::ModeSet)(input),
                Some(0x0a) => map(u8, |m| {
                    Reply::Mode(match m {
                        1 => Some(Mode::Side),
                        2 => Some(Mode::Top),
                        _ => None,
                    })
                })(input),
                Some(0x0b) => {
                    let (input, (_, year, month, major, minor)) =
                        tuple((u8, u8, u8, u8, u8))(input)?;
                    let version = Version {
                        year,
                        month,
                        major,
                        minor,
                    };
                    Ok((input, Reply::Version(version)))
                }
                Some(0x0e) => map(succeeded, Reply::BaudRateSet)(input),
                Some(0x10) => map(succeeded, Reply::FactoryReset)(input),
                Some(0x11) => map(succeeded, Reply::RangeSet)(input),
                Some(0x12) => map(
                    tuple((u8, le_i16, le_i16)),
                    |(distance, start_angle, end_angle)| {
                        Reply::Range(Range {
                            distance,
                            start_angle,
                            end_angle,
                        })
                    },
                )(input),
                Some(0x13) => map(succeeded, Reply::SensitivitySet)(input),
                Some(0x14) => map(u8, |s| {
                    Reply::Sensitivity(match s {
                        1 => Some(Sensitivity::High),
                        2 => Some(Sensitivity::Medium),
                        3 => Some(Sensitivity::Low),
                        _ => None,
                    })
                })(input),
                _ => nom::combinator::fail(input),
            }
        }
    }
}

/// Commands the radar accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Request {
    EnableUpload(bool),
    SetInstall(Install),
    GetInstall,
    SetMode(Mode),
    GetMode,
    Version,
    Restart,
    SetBaudRate(BaudRate),
    FactoryReset,
    SetRange(Range),
    GetRange,
    SetSensitivity(Sensitivity),
    GetSensitivity,
}

impl CommandSerialize for Request {
    fn command(&self) -> u16 {
        match self {
            Self::EnableUpload(_) => 0x06,
            Self::SetInstall(_) => 0x07,
            Self::GetInstall => 0x08,
            Self::SetMode(_) => 0x09,
            Self::GetMode => 0x0a,
            Self::Version => 0x0b,
            Self::Restart => 0x0d,
            Self::SetBaudRate(_) => 0x0e,
            Self::FactoryReset => 0x10,
            Self::SetRange(_) => 0x11,
            Self::GetRange => 0x12,
            Self::SetSensitivity(_) => 0x13,
            Self::GetSensitivity => 0x14,
        }
    }

    fn payload<S>(&self, ser: &mut S) -> Result<(), S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::EnableUpload(e) => ser.write_u8(*e as u8),
            Self::SetInstall(i) => {
                ser.write_le_u16(i.height)?;
                ser.write_le_u16(i.angle)
            }
            Self::SetMode(m) => ser.write_u8(*m as u8),
            // codes count from 0 here
            Self::SetBaudRate(b) => ser.write_u8(b.code() - 1),
            Self::SetRange(r) => {
                ser.write_u8(r.distance)?;
                ser.write_le_i16(r.start_angle)?;
                ser.write_le_i16(r.end_angle)
            }
            Self::SetSensitivity(s) => ser.write_u8(*s as u8),
            _ => ser.write_u8(0x01),
        }
    }
}

#[derive(Debug, Default)]
pub struct Sensors {
    pub count: Sensor<u8>,
    pub presence: Sensor<bool>,
    /// Meters.
    pub x: [Sensor<f32>; MAX_TARGETS],
    /// Meters.
    pub y: [Sensor<f32>; MAX_TARGETS],
    /// Meters.
    pub height: Sensor<f32>,
    /// Degrees.
    pub angle: Sensor<f32>,
    pub mode: Sensor<Mode>,
    pub version: Sensor<String>,
    /// Meters.
    pub range_distance: Sensor<f32>,
    /// Degrees.
    pub range_start_angle: Sensor<f32>,
    /// Degrees.
    pub range_end_angle: Sensor<f32>,
    pub sensitivity: Sensor<Sensitivity>,
}

impl Sensors {
    fn publish_targets(&mut self, targets: Targets) {
        self.count.publish(targets.count);
        self.presence.publish(targets.count > 0);
        if targets.count as usize > MAX_TARGETS {
            log::warn!(
                "received target number {} exceeds maximum of {}",
                targets.count,
                MAX_TARGETS
            );
        }
        for (i, t) in targets.targets.iter().enumerate() {
            self.x[i].publish(t.x as f32 / 10.0);
            self.y[i].publish(t.y as f32 / 10.0);
        }
    }

    pub fn publish(&mut self, reply: Reply) {
        match reply {
            Reply::Targets(t) => self.publish_targets(t),
            Reply::UploadSet(0) => log::warn!("disable upload failed"),
            Reply::UploadSet(1) => log::warn!("enable upload failed"),
            Reply::UploadSet(_) => {}
            Reply::InstallSet(false) => log::warn!("set install params failed"),
            Reply::Install(i) => {
                self.height.publish(i.height_m());
                self.angle.publish(i.angle_deg());
            }
            Reply::ModeSet(1) => log::warn!("set side install mode failed"),
            Reply::ModeSet(2) => log::warn!("set top install mode failed"),
            Reply::ModeSet(_) => {}
            Reply::Mode(Some(m)) => self.mode.publish(m),
            Reply::Mode(None) => log::warn!("unknown install mode"),
            Reply::Version(v) => self.version.publish(format!("{}", v)),
            Reply::BaudRateSet(false) => log::warn!("set baud rate failed"),
            Reply::FactoryReset(false) => log::warn!("factory reset failed"),
            Reply::RangeSet(false) => log::warn!("set detect range failed"),
            Reply::Range(r) => {
                self.range_distance.publish(r.distance as f32 / 10.0);
                self.range_start_angle.publish(r.start_angle as f32 / 10.0);
                self.range_end_angle.publish(r.end_angle as f32 / 10.0);
            }
            Reply::SensitivitySet(false) => log::warn!("set sensitivity failed"),
            Reply::Sensitivity(Some(s)) => self.sensitivity.publish(s),
            Reply::Sensitivity(None) => log::warn!("unknown sensitivity"),
            Reply::InstallSet(true)
            | Reply::BaudRateSet(true)
            | Reply::FactoryReset(true)
            | Reply::RangeSet(true)
            | Reply::SensitivitySet(true) => {}
        }
    }
}

/// LD2460 driver.
#[derive(Debug)]
pub struct Ld2460<P> {
    port: P,
    reader: FrameReader<NoChecksum>,
    health: Health,
    pub sensors: Sensors,
}

impl<P> Ld2460<P>
where
    P: ByteSource + embedded_io::Write,
{
    pub fn new(port: P, sensors: Sensors) -> Self {
        Self {
            port,
            reader: FrameReader::new(FRAMING),
            health: Health::new(),
            sensors,
        }
    }

    pub fn release(self) -> P {
        self.port
    }

    /// Send a request. The reply arrives through [Driver::poll].
    pub fn request(&mut self, request: Request) -> Result<(), Error<P::Error>> {
        log::debug!("request {:?}", request);
        exchange::send_command(&mut self.port, &FRAMING, ACK, &request)
    }

    /// Ask for everything the radar can report about its settings.
    pub fn read_all_info(&mut self) -> Result<(), Error<P::Error>> {
        for request in [
            Request::GetInstall,
            Request::GetMode,
            Request::Version,
            Request::GetRange,
            Request::GetSensitivity,
        ] {
            self.request(request)?;
        }
        Ok(())
    }
}

impl<P> Driver for Ld2460<P>
where
    P: ByteSource + embedded_io::Write,
{
    type Error = Error<P::Error>;

    fn setup(&mut self) -> Result<(), Self::Error> {
        self.read_all_info()
    }

    fn poll(&mut self) -> Result<(), Self::Error> {
        while let Some(frame) = self.reader.read_frame(&mut self.port)? {
            match parse_frame::<Reply>(&frame) {
                Ok(reply) => self.sensors.publish(reply),
                Err(e) => log::warn!("{}", e),
            }
        }
        Ok(())
    }

    fn health(&self) -> Health {
        self.health
    }
}
