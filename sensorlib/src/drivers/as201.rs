//! AS201 attitude and heading reference module.
//!
//! Frames are `FA FB len cmd payload sum FC FD`, where `len` counts
//! the command, payload and checksum, and `sum` is the additive sum
//! of command and payload.

use alloc::format;
use alloc::string::String;

use bitfield_struct::bitfield;
use nom::combinator::map;
use nom::number::complete::{le_i16, le_i32, le_u16, u8};
use nom::IResult;

use crate::exchange;
use crate::protocol::parse::{parse_array, Fields};
use crate::protocol::{
    parse_frame, Checksum, CommandSerialize, Field, FrameReader, Framing, Length, Markers,
    MessageParse, Serializer, Sum8, Tag, Width,
};
use crate::{ByteSource, Driver, Error, Health, Sensor};

pub const BAUD_RATE: u32 = 9600;

/// Wire format for all AS201 frames, in both directions.
pub const FRAMING: Framing<Sum8> = Framing {
    markers: &[Markers {
        header: b"\xfa\xfb",
        tail: b"\xfc\xfd",
    }],
    length: Length::Field {
        field: Field::new(2, Width::U8),
        base: 5,
    },
    command: Some(Field::new(3, Width::U8)),
    payload: 4,
    checksum: Some(Checksum {
        style: Sum8,
        start: 3,
    }),
    max_len: 0xff + 5,
};

const ACCEL_SCALE: f32 = 0.00478515625;
const GYRO_SCALE: f32 = 0.0625;
const ANGLE_SCALE: f32 = 0.0054931640625;
const FIELD_SCALE: f32 = 0.006103515625;
const QUATERNION_SCALE: f32 = 0.000030517578125;
const TEMPERATURE_SCALE: f32 = 0.01;
const PRESSURE_SCALE: f32 = 0.0002384185791;
const HEIGHT_SCALE: f32 = 0.0010728836;

/// Which sensors the module has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Axes {
    Ten,
    Nine,
    Six,
    Unknown,
}

impl Axes {
    pub const fn into_bits(self) -> u8 {
        match self {
            Self::Ten => 0,
            Self::Six => 1,
            Self::Nine => 2,
            Self::Unknown => 3,
        }
    }

    pub const fn from_bits(v: u8) -> Self {
        match v & 0b11 {
            0 => Self::Ten,
            1 => Self::Six,
            2 => Self::Nine,
            _ => Self::Unknown,
        }
    }
}

impl core::fmt::Display for Axes {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::Ten => write!(f, "10 axis"),
            Self::Nine => write!(f, "9 axis"),
            Self::Six => write!(f, "6 axis"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Heading accuracy, as reported with each data upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Accuracy {
    /// Not calibrated, or magnetic interference.
    Uncalibrated,
    /// Magnetic interference. Two codes mean this.
    Interference(u8),
    Ready,
}

impl Accuracy {
    pub const fn into_bits(self) -> u8 {
        match self {
            Self::Uncalibrated => 0,
            Self::Interference(v) => v & 0b11,
            Self::Ready => 3,
        }
    }

    pub const fn from_bits(v: u8) -> Self {
        match v & 0b11 {
            0 => Self::Uncalibrated,
            3 => Self::Ready,
            v => Self::Interference(v),
        }
    }
}

impl core::fmt::Display for Accuracy {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::Uncalibrated => write!(f, "not calibrated or have magnet field interference"),
            Self::Interference(_) => write!(f, "have magnet field interference"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

/// Type byte leading every data upload.
#[cfg_attr(not(feature = "defmt"), bitfield(u8))]
#[cfg_attr(feature = "defmt", bitfield(u8, defmt = true))]
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SensorType {
    #[bits(2, from = Axes::from_bits, into = Axes::into_bits)]
    pub axes: Axes,
    #[bits(2, from = Accuracy::from_bits, into = Accuracy::into_bits)]
    pub accuracy: Accuracy,
    #[bits(4)]
    __: u8,
}

/// Which fields the module includes in data uploads.
#[cfg_attr(not(feature = "defmt"), bitfield(u8))]
#[cfg_attr(feature = "defmt", bitfield(u8, defmt = true))]
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Subscription {
    pub accel: bool,
    pub gyro: bool,
    pub angle: bool,
    pub field: bool,
    pub quaternion: bool,
    pub temperature: bool,
    pub pressure: bool,
    pub height: bool,
}

impl Subscription {
    /// Everything.
    pub const fn all() -> Self {
        Self::from_bits(0xff)
    }
}

/// Mounting direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Horizontal,
    Vertical,
}

impl core::fmt::Display for Direction {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::Horizontal => write!(f, "horizontal"),
            Self::Vertical => write!(f, "vertical"),
        }
    }
}

/// Data upload rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UploadRate {
    Hz0_1 = 1,
    Hz0_5 = 2,
    Hz1 = 3,
    Hz2 = 4,
    Hz5 = 5,
    Hz10 = 6,
    Hz20 = 7,
}

impl UploadRate {
    /// Decode a rate code. Unknown codes mean the fastest rate.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Hz0_1,
            2 => Self::Hz0_5,
            3 => Self::Hz1,
            4 => Self::Hz2,
            5 => Self::Hz5,
            6 => Self::Hz10,
            _ => Self::Hz20,
        }
    }
}

impl core::fmt::Display for UploadRate {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let s = match self {
            Self::Hz0_1 => "0.1Hz",
            Self::Hz0_5 => "0.5Hz",
            Self::Hz1 => "1Hz",
            Self::Hz2 => "2Hz",
            Self::Hz5 => "5Hz",
            Self::Hz10 => "10Hz",
            Self::Hz20 => "20Hz",
        };
        write!(f, "{}", s)
    }
}

const BAUD_CODES: [u32; 10] = [
    4800, 9600, 19200, 38400, 57600, 115200, 230400, 460800, 500000, 921600,
];

/// Code for a baud rate. Unsupported rates are code 0, which the
/// module treats as 9600.
pub fn baud_code(baud: u32) -> u8 {
    BAUD_CODES
        .iter()
        .position(|b| *b == baud)
        .map(|i| i as u8 + 1)
        .unwrap_or(0)
}

/// Baud rate for a code, if it is one.
pub fn baud_from_code(code: u8) -> Option<u32> {
    BAUD_CODES.get((code as usize).checked_sub(1)?).copied()
}

/// One data upload. Fields the module was not subscribed to are
/// absent.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Data {
    pub kind: SensorType,
    /// m/s²
    pub accel: Option<[f32; 3]>,
    /// °/s
    pub gyro: Option<[f32; 3]>,
    /// °
    pub angle: Option<[f32; 3]>,
    /// µT
    pub field: Option<[f32; 3]>,
    pub quaternion: Option<[f32; 4]>,
    /// °C
    pub temperature: Option<f32>,
    /// kPa
    pub pressure: Option<f32>,
    /// m
    pub height: Option<f32>,
}

fn scaled<const N: usize>(raw: [u16; N], scale: f32) -> [f32; N] {
    raw.map(|v| v as f32 * scale)
}

impl Data {
    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, kind) = map(u8, SensorType::from_bits)(input)?;

        let mut f = Fields::new(input);
        let data = Data {
            kind,
            accel: f.next(parse_array(le_u16)).map(|v| scaled(v, ACCEL_SCALE)),
            gyro: f.next(parse_array(le_u16)).map(|v| scaled(v, GYRO_SCALE)),
            angle: f.next(parse_array(le_u16)).map(|v| scaled(v, ANGLE_SCALE)),
            field: f.next(parse_array(le_u16)).map(|v| scaled(v, FIELD_SCALE)),
            quaternion: f
                .next(parse_array(le_u16))
                .map(|v| scaled(v, QUATERNION_SCALE)),
            temperature: f.next(le_i16).map(|v| v as f32 * TEMPERATURE_SCALE),
            pressure: f.next(le_i32).map(|v| v as f32 * PRESSURE_SCALE),
            height: f.next(le_i32).map(|v| v as f32 * HEIGHT_SCALE),
        };

        Ok((f.rest(), data))
    }
}

/// Firmware version and build date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub year: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
}

impl core::fmt::Display for Version {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "{}.{} 20{:02}-{:02}-{:02} {:02}:00",
            self.major, self.minor, self.year, self.month, self.day, self.hour
        )
    }
}

/// Module configuration, as read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub subscription: Subscription,
    pub rate: UploadRate,
    pub baud: u8,
    pub upload: bool,
}

/// Everything the module sends.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// 0x00 unsolicited, or 0x1B on request.
    Data(Data),
    /// 0x10
    Version(Version),
    /// 0x11
    FactoryReset,
    /// 0x12
    ZeroedZ,
    /// 0x13
    ResetEuler,
    /// 0x14
    Install(Direction),
    /// 0x15
    InstallSet,
    /// 0x16
    UploadRateSet,
    /// 0x17
    Restarted,
    /// 0x18
    BaudRateSet,
    /// 0x19
    Config(Config),
    /// 0x1A
    UploadToggled,
    /// 0x1C, true on success.
    AccelCalibrated(bool),
    /// 0x1D
    MagneticCalibrationStarted,
    /// 0x1E
    MagneticCalibrationFinished,
}

impl<'a> MessageParse<'a> for Reply {
    fn parse_body(tag: Tag) -> impl nom::Parser<&'a [u8], Self, nom::error::Error<&'a [u8]>> {
        move |input: &'a [u8]| -> IResult<&'a [u8], Self> {
            let Some(command) = tag.command else {
                return nom::combinator::fail(input);
            };

            match command {
                0x00 | 0x1b => map(Data::parse, Reply::Data)(input),
                0x10 => {
                    let (input, [minor, major, hour, day, month, year]) =
                        parse_array(u8)(input)?;
                    let version = Version {
                        major,
                        minor,
                        year,
                        month,
                        day,
                        hour,
                    };
                    Ok((input, Reply::Version(version)))
                }
                0x11 => Ok((input, Reply::FactoryReset)),
                0x12 => Ok((input, Reply::ZeroedZ)),
                0x13 => Ok((input, Reply::ResetEuler)),
                0x14 => map(u8, |v| {
                    Reply::Install(if v != 0 {
                        Direction::Vertical
                    } else {
                        Direction::Horizontal
                    })
                })(input),
                0x15 => Ok((input, Reply::InstallSet)),
                0x16 => Ok((input, Reply::UploadRateSet)),
                0x17 => Ok((input, Reply::Restarted)),
                0x18 => Ok((input, Reply::BaudRateSet)),
                0x19 => {
                    let (input, [sub, rate, baud, up]) = parse_array(u8)(input)?;
                    let config = Config {
                        subscription: Subscription::from_bits(sub),
                        rate: UploadRate::from_code(rate),
                        baud,
                        upload: up == 1,
                    };
                    Ok((input, Reply::Config(config)))
                }
                0x1a => Ok((input, Reply::UploadToggled)),
                0x1c => map(u8, |v| Reply::AccelCalibrated(v != 0))(input),
                0x1d => Ok((input, Reply::MagneticCalibrationStarted)),
                0x1e => Ok((input, Reply::MagneticCalibrationFinished)),
                _ => nom::combinator::fail(input),
            }
        }
    }
}

/// Everything the module accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Request {
    Version,
    FactoryReset,
    ZeroZ,
    ResetEuler,
    GetInstall,
    SetInstall(Direction),
    SetUploadRate(UploadRate),
    Restart,
    /// Baud rate in bits/s.
    SetBaudRate(u32),
    GetConfig,
    EnableUpload(bool),
    DataOnce,
    CalibrateAccel,
    StartMagneticCalibration,
    FinishMagneticCalibration,
    Subscribe(Subscription),
}

impl CommandSerialize for Request {
    fn command(&self) -> u16 {
        match self {
            Self::Version => 0x10,
            Self::FactoryReset => 0x11,
            Self::ZeroZ => 0x12,
            Self::ResetEuler => 0x13,
            Self::GetInstall => 0x14,
            Self::SetInstall(_) => 0x15,
            Self::SetUploadRate(_) => 0x16,
            Self::Restart => 0x17,
            Self::SetBaudRate(_) => 0x18,
            Self::GetConfig => 0x19,
            Self::EnableUpload(_) => 0x1a,
            Self::DataOnce => 0x1b,
            Self::CalibrateAccel => 0x1c,
            Self::StartMagneticCalibration => 0x1d,
            Self::FinishMagneticCalibration => 0x1e,
            Self::Subscribe(_) => 0x1f,
        }
    }

    fn payload<S>(&self, ser: &mut S) -> Result<(), S::Error>
    where
        S: Serializer,
    {
        let value = match self {
            Self::SetInstall(d) => *d as u8,
            Self::SetUploadRate(r) => *r as u8,
            Self::SetBaudRate(b) => baud_code(*b),
            Self::EnableUpload(e) => *e as u8,
            Self::Subscribe(s) => s.into_bits(),
            _ => 0x01,
        };
        ser.write_u8(value)
    }
}

/// Where each reading goes.
#[derive(Debug, Default)]
pub struct Sensors {
    pub axes: Sensor<Axes>,
    pub accuracy: Sensor<Accuracy>,
    pub accel: [Sensor<f32>; 3],
    pub gyro: [Sensor<f32>; 3],
    pub angle: [Sensor<f32>; 3],
    pub field: [Sensor<f32>; 3],
    pub quaternion: [Sensor<f32>; 4],
    pub temperature: Sensor<f32>,
    pub pressure: Sensor<f32>,
    pub height: Sensor<f32>,
    pub version: Sensor<String>,
    pub direction: Sensor<Direction>,
    pub upload_rate: Sensor<UploadRate>,
    pub baud_rate: Sensor<u32>,
    pub upload_enabled: Sensor<bool>,
}

fn publish_all<const N: usize>(sensors: &mut [Sensor<f32>; N], values: Option<[f32; N]>) {
    if let Some(values) = values {
        for (s, v) in sensors.iter_mut().zip(values) {
            s.publish(v);
        }
    }
}

impl Sensors {
    fn publish_data(&mut self, data: Data) {
        self.axes.publish(data.kind.axes());
        self.accuracy.publish(data.kind.accuracy());
        publish_all(&mut self.accel, data.accel);
        publish_all(&mut self.gyro, data.gyro);
        publish_all(&mut self.angle, data.angle);
        publish_all(&mut self.field, data.field);
        publish_all(&mut self.quaternion, data.quaternion);
        if let Some(t) = data.temperature {
            self.temperature.publish(t);
        }
        if let Some(p) = data.pressure {
            self.pressure.publish(p);
        }
        if let Some(h) = data.height {
            self.height.publish(h);
        }
    }

    /// Hand a reply's contents to the right sinks.
    pub fn publish(&mut self, reply: Reply) {
        match reply {
            Reply::Data(data) => self.publish_data(data),
            Reply::Version(v) => self.version.publish(format!("{}", v)),
            Reply::FactoryReset => log::info!("factory reset successful"),
            Reply::ZeroedZ => log::info!("z axis set to zero"),
            Reply::ResetEuler => log::info!("euler angles reset"),
            Reply::Install(d) => self.direction.publish(d),
            Reply::InstallSet => log::info!("install direction set"),
            Reply::UploadRateSet => log::info!("upload rate set"),
            Reply::Restarted => log::info!("restarted"),
            Reply::BaudRateSet => log::info!("baud rate set"),
            Reply::Config(c) => {
                log::debug!("subscribed to {:?}", c.subscription);
                self.upload_rate.publish(c.rate);
                if let Some(baud) = baud_from_code(c.baud) {
                    self.baud_rate.publish(baud);
                }
                self.upload_enabled.publish(c.upload);
            }
            Reply::UploadToggled => log::info!("upload toggled"),
            Reply::AccelCalibrated(true) => log::info!("accelerometer calibrated"),
            Reply::AccelCalibrated(false) => log::warn!("accelerometer calibration failed"),
            Reply::MagneticCalibrationStarted => log::info!("magnetic calibration started"),
            Reply::MagneticCalibrationFinished => log::info!("magnetic calibration finished"),
        }
    }
}

/// AS201 driver.
#[derive(Debug)]
pub struct As201<P> {
    port: P,
    reader: FrameReader<Sum8>,
    health: Health,
    pub sensors: Sensors,
}

impl<P> As201<P>
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

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn release(self) -> P {
        self.port
    }

    /// Send a request. The reply arrives through [Driver::poll].
    pub fn request(&mut self, request: Request) -> Result<(), Error<P::Error>> {
        log::debug!("request {:?}", request);
        exchange::send_command(&mut self.port, &FRAMING, 0, &request)
    }

    /// Change the module's baud rate. The port must be switched to the
    /// new rate, and the module restarted, by the caller.
    pub fn set_baud_rate(&mut self, baud: u32) -> Result<(), Error<P::Error>> {
        if baud_code(baud) == 0 {
            log::warn!("unsupported baud rate {}, module will use 9600", baud);
        }
        self.request(Request::SetBaudRate(baud))
    }
}

impl<P> Driver for As201<P>
where
    P: ByteSource + embedded_io::Write,
{
    type Error = Error<P::Error>;

    fn setup(&mut self) -> Result<(), Self::Error> {
        self.request(Request::Version)?;
        self.request(Request::GetInstall)?;
        self.request(Request::GetConfig)
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

#[cfg(test)]
mod test {
    use alloc::vec;
    use alloc::vec::Vec;

    use super::*;
    use crate::port::mock::MockPort;
    use crate::sensor::test::recorder;

    use quickcheck_macros::quickcheck;

    fn data_payload() -> Vec<u8> {
        let mut p = vec![0b1110];
        // accel, gyro, angle, field
        for v in [2048u16, 0, 1, 16, 32, 48, 0, 16384, 65535, 164, 0, 0] {
            p.extend(v.to_le_bytes());
        }
        // quaternion
        for v in [32768u16, 0, 0, 0] {
            p.extend(v.to_le_bytes());
        }
        p.extend((-1234i16).to_le_bytes());
        p.extend(419430i32.to_le_bytes());
        p.extend(9320i32.to_le_bytes());
        p
    }

    #[test]
    fn factory_reset_scenario() {
        let mut port = MockPort::new();
        port.feed(b"\xfa\xfb\x03\x11\x01\x12\xfc\xfd");
        let mut dev = As201::new(port, Sensors::default());
        dev.poll().unwrap();
        assert!(dev.reader.buffered().is_empty());

        let frame = FRAMING.parse(b"\xfa\xfb\x03\x11\x01\x12\xfc\xfd").unwrap();
        assert_eq!(parse_frame::<Reply>(&frame), Ok(Reply::FactoryReset));
    }

    #[test]
    fn wrong_checksum_publishes_nothing() {
        let (direction, log) = recorder();
        let mut port = MockPort::new();
        port.feed(b"\xfa\xfb\x03\x14\x01\x16\xfc\xfd");
        let mut dev = As201::new(
            port,
            Sensors {
                direction,
                ..Default::default()
            },
        );
        dev.poll().unwrap();
        assert!(log.borrow().is_empty());
        assert!(dev.reader.buffered().is_empty());
        assert!(!dev.reader.is_synchronized());
    }

    #[test]
    fn install_direction() {
        let (direction, log) = recorder();
        let mut port = MockPort::new();
        port.feed(&FRAMING.encode(0, 0x14, b"\x01").unwrap());
        port.feed(&FRAMING.encode(0, 0x14, b"\x00").unwrap());
        let mut dev = As201::new(
            port,
            Sensors {
                direction,
                ..Default::default()
            },
        );
        dev.poll().unwrap();
        assert_eq!(*log.borrow(), [Direction::Vertical, Direction::Horizontal]);
    }

    #[test]
    fn full_data_upload() {
        let (temperature, temps) = recorder();
        let (accel_x, xs) = recorder();
        let (axes, kinds) = recorder();
        let (accuracy, accs) = recorder();
        let mut sensors = Sensors {
            temperature,
            axes,
            accuracy,
            ..Default::default()
        };
        sensors.accel[0] = accel_x;

        let mut port = MockPort::new();
        port.feed(&FRAMING.encode(0, 0x00, &data_payload()).unwrap());
        let mut dev = As201::new(port, sensors);
        dev.poll().unwrap();

        assert_eq!(*xs.borrow(), [9.8]);
        assert_eq!(temps.borrow().len(), 1);
        assert!((temps.borrow()[0] + 12.34).abs() < 1e-4);
        assert_eq!(*kinds.borrow(), [Axes::Nine]);
        assert_eq!(*accs.borrow(), [Accuracy::Ready]);
    }

    #[test]
    fn partial_data_upload() {
        // only the type byte and accel
        let payload = &data_payload()[..7];
        let frame_bytes = FRAMING.encode(0, 0x1b, payload).unwrap();
        let frame = FRAMING.parse(&frame_bytes).unwrap();
        let Ok(Reply::Data(data)) = parse_frame::<Reply>(&frame) else {
            panic!("not data");
        };
        assert!(data.accel.is_some());
        assert!(data.gyro.is_none());
        assert!(data.temperature.is_none());
    }

    #[test]
    fn version_text() {
        let (version, log) = recorder();
        let mut port = MockPort::new();
        port.feed(&FRAMING.encode(0, 0x10, &[2, 1, 9, 5, 3, 24]).unwrap());
        let mut dev = As201::new(
            port,
            Sensors {
                version,
                ..Default::default()
            },
        );
        dev.poll().unwrap();
        assert_eq!(*log.borrow(), ["1.2 2024-03-05 09:00"]);
    }

    #[test]
    fn config_reply() {
        let (rate, rates) = recorder();
        let (baud_rate, bauds) = recorder();
        let (upload_enabled, ups) = recorder();
        let mut port = MockPort::new();
        port.feed(&FRAMING.encode(0, 0x19, &[0xff, 0x03, 0x02, 0x01]).unwrap());
        let mut dev = As201::new(
            port,
            Sensors {
                upload_rate: rate,
                baud_rate,
                upload_enabled,
                ..Default::default()
            },
        );
        dev.poll().unwrap();
        assert_eq!(*rates.borrow(), [UploadRate::Hz1]);
        assert_eq!(*bauds.borrow(), [9600]);
        assert_eq!(*ups.borrow(), [true]);
    }

    #[test]
    fn setup_requests() {
        let mut dev = As201::new(MockPort::new(), Sensors::default());
        dev.setup().unwrap();
        let mut expected = Vec::new();
        expected.extend(b"\xfa\xfb\x03\x10\x01\x11\xfc\xfd");
        expected.extend(b"\xfa\xfb\x03\x14\x01\x15\xfc\xfd");
        expected.extend(b"\xfa\xfb\x03\x19\x01\x1a\xfc\xfd");
        assert_eq!(dev.port_mut().take_output(), expected);
    }

    #[test]
    fn request_payloads() {
        let frame = Request::SetBaudRate(115200).frame(&FRAMING, 0).unwrap();
        assert_eq!(frame, b"\xfa\xfb\x03\x18\x06\x1e\xfc\xfd");
        let frame = Request::SetBaudRate(1200).frame(&FRAMING, 0).unwrap();
        assert_eq!(frame[4], 0);
        let frame = Request::SetUploadRate(UploadRate::Hz10).frame(&FRAMING, 0).unwrap();
        assert_eq!(frame[4], 6);
        let sub = Subscription::new().with_accel(true).with_height(true);
        let frame = Request::Subscribe(sub).frame(&FRAMING, 0).unwrap();
        assert_eq!(frame[4], 0x81);
    }

    #[test]
    fn sensor_type_bits() {
        let t = SensorType::from_bits(0b0110);
        assert_eq!(t.axes(), Axes::Nine);
        assert_eq!(t.accuracy(), Accuracy::Interference(1));
        assert_eq!(SensorType::from_bits(0b0001).axes(), Axes::Six);
        assert_eq!(SensorType::from_bits(0b1000).accuracy(), Accuracy::Interference(2));
        assert_eq!(SensorType::from_bits(0).accuracy(), Accuracy::Uncalibrated);
    }

    #[quickcheck]
    fn sensor_type_symmetric(bits: u8) -> bool {
        let bits = bits & 0x0f;
        SensorType::from_bits(bits).into_bits() == bits
    }

    #[quickcheck]
    fn request_round_trip(value: u8) -> bool {
        let request = Request::Subscribe(Subscription::from_bits(value));
        let bytes = request.frame(&FRAMING, 0).unwrap();
        let frame = FRAMING.parse(&bytes).unwrap();
        frame.command() == Some(0x1f) && frame.payload() == [value]
    }

    #[test]
    fn baud_codes() {
        assert_eq!(baud_code(4800), 1);
        assert_eq!(baud_code(921600), 10);
        assert_eq!(baud_from_code(2), Some(9600));
        assert_eq!(baud_from_code(0), None);
        assert_eq!(baud_from_code(11), None);
    }
}
