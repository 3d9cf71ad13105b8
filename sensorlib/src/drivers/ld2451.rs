//! HLK-LD2451 vehicle detection radar.
//!
//! The radar streams target uploads continuously. Configuration goes
//! through the shared [ld24xx](super::ld24xx) command protocol, during
//! which uploads stop.

use alloc::string::String;
use alloc::vec::Vec;

use embedded_hal::delay::DelayNs;
use nom::combinator::map;
use nom::number::complete::u8;
use nom::sequence::tuple;
use nom::IResult;

pub use super::ld24xx::BaudRate;
use super::ld24xx::{self, DISABLE_CONFIG, ENABLE_CONFIG, ENABLE_CONFIG_DATA, MARKERS};
use crate::exchange::{Blocking, ExchangeError};
use crate::protocol::parse::MessageParse;
use crate::protocol::{
    parse_frame, CommandSerialize, Field, FrameReader, Framing, Length, Malformed, NoChecksum,
    Serializer, Tag, Width,
};
use crate::time::{DurationExtU32, MillisDuration};
use crate::{ByteSource, Driver, Error, Health, Sensor};

pub const BAUD_RATE: u32 = 115200;

/// Most targets reported per upload.
pub const MAX_TARGETS: usize = 20;

pub const EXCHANGE_TIMEOUT: MillisDuration = MillisDuration::millis(1000);

/// Uploads share the command header, but carry no command code.
pub const UPLOAD_FRAMING: Framing<NoChecksum> = Framing {
    markers: MARKERS,
    length: Length::Field {
        field: Field::new(4, Width::LeU16),
        base: 10,
    },
    command: None,
    payload: 6,
    checksum: None,
    max_len: 10 + 2 + 5 * 255,
};

/// Which way a target must be moving to be detected.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DetectDirection {
    Away = 0,
    Towards = 1,
    #[default]
    Both = 2,
}

impl DetectDirection {
    pub const fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Away,
            1 => Self::Towards,
            _ => Self::Both,
        }
    }
}

/// Which way a detected target is moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Motion {
    Away,
    Towards,
}

impl core::fmt::Display for Motion {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::Away => write!(f, "away"),
            Self::Towards => write!(f, "towards"),
        }
    }
}

/// Target detection parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TargetDetection {
    /// Meters.
    pub max_distance: u8,
    pub direction: DetectDirection,
    /// km/h.
    pub min_speed: u8,
    /// Seconds to keep reporting a target after it is lost.
    pub delay: u8,
}

impl Default for TargetDetection {
    fn default() -> Self {
        Self {
            max_distance: 255,
            direction: DetectDirection::Both,
            min_speed: 0,
            delay: 1,
        }
    }
}

/// Sensitivity parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Sensitivity {
    /// Consecutive detections before a target is reported.
    pub valid_trigs: u8,
    pub snr_threshold: u8,
}

impl Default for Sensitivity {
    fn default() -> Self {
        Self {
            valid_trigs: 1,
            snr_threshold: 3,
        }
    }
}

/// Parameters written to the radar at setup.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    detection: TargetDetection,
    sensitivity: Sensitivity,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum detection distance in meters, 10 to 255.
    pub fn max_distance(mut self, meters: u8) -> Self {
        self.detection.max_distance = meters.max(10);
        self
    }

    pub fn direction(mut self, direction: DetectDirection) -> Self {
        self.detection.direction = direction;
        self
    }

    /// Minimum target speed in km/h, 0 to 120.
    pub fn min_speed(mut self, kmh: u8) -> Self {
        self.detection.min_speed = kmh.min(120);
        self
    }

    /// How long a lost target keeps being reported, in seconds.
    pub fn no_target_delay(mut self, seconds: u8) -> Self {
        self.detection.delay = seconds;
        self
    }

    /// Detections needed before reporting a target, 1 to 10.
    pub fn valid_trigs(mut self, count: u8) -> Self {
        self.sensitivity.valid_trigs = count.clamp(1, 10);
        self
    }

    /// Signal to noise threshold level, 0 to 8.
    pub fn snr_threshold(mut self, level: u8) -> Self {
        self.sensitivity.snr_threshold = level.min(8);
        self
    }

    pub fn get_detection(&self) -> TargetDetection {
        self.detection
    }

    pub fn get_sensitivity(&self) -> Sensitivity {
        self.sensitivity
    }
}

/// One reported target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Target {
    /// Degrees off axis.
    pub angle: i16,
    /// Meters.
    pub distance: u8,
    pub motion: Motion,
    /// km/h.
    pub speed: u8,
    pub snr: u8,
}

impl Target {
    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        map(
            tuple((u8, u8, u8, u8, u8)),
            |(angle, distance, motion, speed, snr)| Self {
                angle: angle as i16 - 0x80,
                distance,
                motion: if motion != 0 {
                    Motion::Towards
                } else {
                    Motion::Away
                },
                speed,
                snr,
            },
        )(input)
    }
}

/// A target upload.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Upload {
    /// Targets the radar says it saw, which may be more than it sent.
    pub count: u8,
    pub approaching: bool,
    pub targets: Vec<Target>,
}

impl<'a> MessageParse<'a> for Upload {
    fn parse_body(_tag: Tag) -> impl nom::Parser<&'a [u8], Self, nom::error::Error<&'a [u8]>> {
        move |input: &'a [u8]| -> IResult<&'a [u8], Self> {
            // no targets at all
            if input.is_empty() {
                return Ok((input, Self::default()));
            }

            let (input, (count, approaching)) = tuple((u8, u8))(input)?;
            let records = (count as usize).min(MAX_TARGETS);
            let (input, targets) = nom::multi::count(Target::parse, records)(input)?;
            Ok((
                input,
                Self {
                    count,
                    approaching: approaching != 0,
                    targets,
                },
            ))
        }
    }
}

/// Commands the radar accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Request {
    EnableConfig,
    DisableConfig,
    SetTargetDetection(TargetDetection),
    GetTargetDetection,
    SetSensitivity(Sensitivity),
    GetSensitivity,
    Version,
    SetBaudRate(BaudRate),
    FactoryReset,
    Restart,
}

impl CommandSerialize for Request {
    fn command(&self) -> u16 {
        match self {
            Self::EnableConfig => ENABLE_CONFIG,
            Self::DisableConfig => DISABLE_CONFIG,
            Self::SetTargetDetection(_) => 0x0002,
            Self::GetTargetDetection => 0x0012,
            Self::SetSensitivity(_) => 0x0003,
            Self::GetSensitivity => 0x0013,
            Self::Version => 0x00a0,
            Self::SetBaudRate(_) => 0x00a1,
            Self::FactoryReset => 0x00a2,
            Self::Restart => 0x00a3,
        }
    }

    fn payload<S>(&self, ser: &mut S) -> Result<(), S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::EnableConfig => ser.write_bytes(ENABLE_CONFIG_DATA),
            Self::SetTargetDetection(d) => ser.write_bytes(&[
                d.max_distance,
                d.direction as u8,
                d.min_speed,
                d.delay,
            ]),
            Self::SetSensitivity(s) => ser.write_bytes(&[s.valid_trigs, s.snr_threshold, 0, 0]),
            Self::SetBaudRate(b) => ser.write_le_u16(b.code() as u16),
            _ => Ok(()),
        }
    }
}

/// Where one target slot's readings go.
#[derive(Debug, Default)]
pub struct TargetSensors {
    pub angle: Sensor<i16>,
    pub distance: Sensor<u8>,
    pub motion: Sensor<Motion>,
    pub speed: Sensor<u8>,
    pub snr: Sensor<u8>,
}

impl TargetSensors {
    fn publish(&mut self, target: &Target) {
        self.angle.publish(target.angle);
        self.distance.publish(target.distance);
        self.motion.publish(target.motion);
        self.speed.publish(target.speed);
        self.snr.publish(target.snr);
    }
}

#[derive(Debug, Default)]
pub struct Sensors {
    pub count: Sensor<u8>,
    pub approaching: Sensor<bool>,
    pub targets: [TargetSensors; MAX_TARGETS],
    pub version: Sensor<String>,
}

impl Sensors {
    pub fn publish(&mut self, upload: Upload) {
        self.count.publish(upload.count);
        self.approaching.publish(upload.approaching);
        if upload.count as usize > MAX_TARGETS {
            log::warn!(
                "received target number {} exceeds maximum of {}",
                upload.count,
                MAX_TARGETS
            );
        }
        for (sensors, target) in self.targets.iter_mut().zip(upload.targets.iter()) {
            sensors.publish(target);
        }
    }
}

/// LD2451 driver.
#[derive(Debug)]
pub struct Ld2451<P, D> {
    port: P,
    exchange: Blocking<D>,
    reader: FrameReader<NoChecksum>,
    config: Config,
    in_config: bool,
    health: Health,
    pub sensors: Sensors,
}

impl<P, D> Ld2451<P, D>
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

    /// Is the radar in configuration mode, with uploads paused?
    pub fn in_config(&self) -> bool {
        self.in_config
    }

    fn command(&mut self, request: Request) -> Result<ld24xx::Reply, Error<P::Error>> {
        ld24xx::checked(&mut self.port, &mut self.exchange, &mut self.health, &request)
    }

    pub fn enable_config(&mut self) -> Result<(), Error<P::Error>> {
        // acks must not be eaten by the upload reader
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

    pub fn set_target_detection(&mut self, detection: TargetDetection) -> Result<(), Error<P::Error>> {
        self.command(Request::SetTargetDetection(detection))?;
        Ok(())
    }

    pub fn get_target_detection(&mut self) -> Result<TargetDetection, Error<P::Error>> {
        let reply = self.command(Request::GetTargetDetection)?;
        match reply.value[..] {
            [max_distance, direction, min_speed, delay, ..] => Ok(TargetDetection {
                max_distance,
                direction: DetectDirection::from_code(direction),
                min_speed,
                delay,
            }),
            _ => Err(short_reply(&reply)),
        }
    }

    pub fn set_sensitivity(&mut self, sensitivity: Sensitivity) -> Result<(), Error<P::Error>> {
        self.command(Request::SetSensitivity(sensitivity))?;
        Ok(())
    }

    pub fn get_sensitivity(&mut self) -> Result<Sensitivity, Error<P::Error>> {
        let reply = self.command(Request::GetSensitivity)?;
        match reply.value[..] {
            [valid_trigs, snr_threshold, ..] => Ok(Sensitivity {
                valid_trigs,
                snr_threshold,
            }),
            _ => Err(short_reply(&reply)),
        }
    }

    /// Firmware version text. The status word is part of it.
    pub fn version(&mut self) -> Result<String, Error<P::Error>> {
        let reply = ld24xx::unchecked(&mut self.port, &mut self.exchange, &mut self.health, &Request::Version)?;
        Ok(reply.text())
    }

    /// Change the radar's baud rate. It takes effect after a restart,
    /// and the port must be switched by the caller.
    pub fn set_baud_rate(&mut self, baud: BaudRate) -> Result<(), Error<P::Error>> {
        self.command(Request::SetBaudRate(baud))?;
        Ok(())
    }

    pub fn factory_reset(&mut self) -> Result<(), Error<P::Error>> {
        self.command(Request::FactoryReset)?;
        Ok(())
    }

    pub fn restart(&mut self) -> Result<(), Error<P::Error>> {
        self.command(Request::Restart)?;
        Ok(())
    }

    fn apply_config(&mut self) -> Result<(), Error<P::Error>> {
        self.set_sensitivity(self.config.get_sensitivity())?;
        self.set_target_detection(self.config.get_detection())
    }
}

fn short_reply<E>(reply: &ld24xx::Reply) -> Error<E> {
    log::warn!("reply 0x{:04x} too short: {:02x?}", reply.command, reply.value);
    Error::Exchange(ExchangeError::Malformed(Malformed::Length(reply.value.len())))
}

impl<P, D> Driver for Ld2451<P, D>
where
    P: ByteSource + embedded_io::Write,
    D: DelayNs,
{
    type Error = Error<P::Error>;

    fn setup(&mut self) -> Result<(), Self::Error> {
        self.enable_config()?;
        let configured = self.apply_config();
        // leave config mode even if configuring failed
        let disabled = self.disable_config();
        configured.and(disabled)?;

        let version = self.version()?;
        log::info!("LD2451 version {:?}", version);
        self.sensors.version.publish(version);
        Ok(())
    }

    fn poll(&mut self) -> Result<(), Self::Error> {
        if self.in_config {
            return Ok(());
        }

        while let Some(frame) = self.reader.read_frame(&mut self.port)? {
            match parse_frame::<Upload>(&frame) {
                Ok(upload) => self.sensors.publish(upload),
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

    use super::ld24xx::test::ack;
    use super::ld24xx::COMMAND_FRAMING;
    use super::*;
    use crate::port::mock::{MockPort, NoDelay};
    use crate::sensor::test::recorder;

    fn upload(count: u8, approaching: u8, records: &[[u8; 5]]) -> Vec<u8> {
        let mut body = vec![count, approaching];
        for r in records {
            body.extend_from_slice(r);
        }
        UPLOAD_FRAMING.encode(0, 0, &body).unwrap()
    }

    fn driver(port: MockPort) -> Ld2451<MockPort, NoDelay> {
        Ld2451::new(port, NoDelay::default(), Config::default(), Sensors::default())
    }

    #[test]
    fn upload_publishes_targets() {
        let (count, counts) = recorder();
        let (approaching, approach) = recorder();
        let (angle, angles) = recorder();
        let (motion, motions) = recorder();
        let (speed, speeds) = recorder();

        let mut port = MockPort::new();
        port.feed(&upload(
            2,
            1,
            &[[0x8a, 40, 1, 62, 9], [0x70, 120, 0, 30, 4]],
        ));
        let mut dev = driver(port);
        dev.sensors.count = count;
        dev.sensors.approaching = approaching;
        dev.sensors.targets[0].angle = angle;
        dev.sensors.targets[1].motion = motion;
        dev.sensors.targets[1].speed = speed;
        dev.poll().unwrap();

        assert_eq!(*counts.borrow(), [2]);
        assert_eq!(*approach.borrow(), [true]);
        assert_eq!(*angles.borrow(), [10]);
        assert_eq!(*motions.borrow(), [Motion::Away]);
        assert_eq!(*speeds.borrow(), [30]);
    }

    #[test]
    fn upload_is_truncated() {
        let (last, lasts) = recorder();
        let (count, counts) = recorder();
        let records: Vec<[u8; 5]> = (0..21).map(|i| [0x80, i, 1, 0, 0]).collect();

        let mut port = MockPort::new();
        port.feed(&upload(21, 1, &records));
        let mut dev = driver(port);
        dev.sensors.count = count;
        dev.sensors.targets[MAX_TARGETS - 1].distance = last;
        dev.poll().unwrap();

        assert_eq!(*counts.borrow(), [21]);
        assert_eq!(*lasts.borrow(), [19]);
    }

    #[test]
    fn empty_upload_is_no_targets() {
        let frame = UPLOAD_FRAMING.encode(0, 0, b"").unwrap();
        let frame = UPLOAD_FRAMING.parse(&frame).unwrap();
        assert_eq!(parse_frame::<Upload>(&frame), Ok(Upload::default()));
    }

    #[test]
    fn short_upload_publishes_nothing() {
        let (count, counts) = recorder();
        let mut port = MockPort::new();
        port.feed(&upload(2, 0, &[[0x80, 1, 1, 1, 1]]));
        let mut dev = driver(port);
        dev.sensors.count = count;
        dev.poll().unwrap();
        assert!(counts.borrow().is_empty());
        assert!(dev.reader.buffered().is_empty());
    }

    #[test]
    fn polling_pauses_in_config() {
        let mut port = MockPort::new();
        port.feed(&upload(0, 0, &[]));
        let mut dev = driver(port);
        dev.in_config = true;
        dev.poll().unwrap();
        assert!(!dev.port.input.is_empty());
    }

    #[test]
    fn setup_sequence() {
        let (version, versions) = recorder();
        let mut port = MockPort::new();
        port.reply(&ack(ENABLE_CONFIG, 0, b"\x01\x00\x40\x00"));
        port.reply(&ack(0x0003, 0, b""));
        port.reply(&ack(0x0002, 0, b""));
        port.reply(&ack(DISABLE_CONFIG, 0, b""));
        port.reply(&ack(0x00a0, 0, b"V1.0"));

        let config = Config::new().max_distance(100).snr_threshold(4);
        let mut dev = Ld2451::new(port, NoDelay::default(), config, Sensors::default());
        dev.sensors.version = version;
        dev.setup().unwrap();

        let expected: Vec<u8> = [
            Request::EnableConfig,
            Request::SetSensitivity(Sensitivity {
                valid_trigs: 1,
                snr_threshold: 4,
            }),
            Request::SetTargetDetection(TargetDetection {
                max_distance: 100,
                ..Default::default()
            }),
            Request::DisableConfig,
            Request::Version,
        ]
        .iter()
        .flat_map(|r| r.frame(&COMMAND_FRAMING, 0).unwrap())
        .collect();
        assert_eq!(dev.port.take_output(), expected);
        assert_eq!(*versions.borrow(), ["\0\0V1.0"]);
        assert!(!dev.in_config());
        assert!(!dev.health().is_warning());
    }

    #[test]
    fn detection_frame() {
        let frame = Request::SetTargetDetection(TargetDetection::default())
            .frame(&COMMAND_FRAMING, 0)
            .unwrap();
        assert_eq!(
            frame,
            b"\xfd\xfc\xfb\xfa\x06\x00\x02\x00\xff\x02\x00\x01\x04\x03\x02\x01"
        );
    }

    #[test]
    fn read_sensitivity() {
        let mut port = MockPort::new();
        port.reply(&ack(0x0013, 0, b"\x05\x06\x00\x00"));
        let mut dev = driver(port);
        assert_eq!(
            dev.get_sensitivity(),
            Ok(Sensitivity {
                valid_trigs: 5,
                snr_threshold: 6
            })
        );
    }

    #[test]
    fn read_detection() {
        let mut port = MockPort::new();
        port.reply(&ack(0x0012, 0, b"\x64\x01\x0a\x02"));
        let mut dev = driver(port);
        assert_eq!(
            dev.get_target_detection(),
            Ok(TargetDetection {
                max_distance: 100,
                direction: DetectDirection::Towards,
                min_speed: 10,
                delay: 2,
            })
        );
    }

    #[test]
    fn failed_restart_warns() {
        let mut port = MockPort::new();
        port.reply(&ack(0x00a3, 1, b""));
        let mut dev = driver(port);
        assert_eq!(
            dev.restart(),
            Err(Error::Exchange(ExchangeError::Status(1)))
        );
        assert!(dev.health().is_warning());
    }

    #[test]
    fn baud_frame() {
        let frame = Request::SetBaudRate(BaudRate::B256000)
            .frame(&COMMAND_FRAMING, 0)
            .unwrap();
        assert_eq!(&frame[6..10], b"\xa1\x00\x07\x00");
        assert_eq!(BaudRate::from_bps(460800), Some(BaudRate::B460800));
        assert_eq!(BaudRate::from_bps(4800), None);
    }

    #[test]
    fn config_is_clamped() {
        let config = Config::new()
            .max_distance(3)
            .min_speed(200)
            .valid_trigs(0)
            .snr_threshold(9);
        assert_eq!(config.get_detection().max_distance, 10);
        assert_eq!(config.get_detection().min_speed, 120);
        assert_eq!(config.get_sensitivity().valid_trigs, 1);
        assert_eq!(config.get_sensitivity().snr_threshold, 8);
    }
}
