//! Sensirion SFA40 formaldehyde sensor.
//!
//! Commands are 16-bit big-endian. Every 16-bit word the device sends
//! back is followed by its CRC-8.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use sensorlib::protocol::checksum::SENSIRION_CRC;

use crate::{fail_on_error, warn_on_error, Driver, Error, Health, Sensor};

pub const DEFAULT_ADDRESS: u8 = 0x5d;

/// Time the device needs between a command and its reply.
const COMMAND_DELAY_MS: u32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    StartMeasurement = 0x00ac,
    ReadMeasurement = 0xe06d,
    StopMeasurement = 0x50d2,
    DeviceMarking = 0x02ce,
}

/// One reading, already in engineering units.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Measurement {
    /// ppb.
    pub formaldehyde: f32,
    /// %RH.
    pub humidity: f32,
    /// °C.
    pub temperature: f32,
}

impl Measurement {
    pub fn from_words(words: [u16; 3]) -> Self {
        Self {
            formaldehyde: words[0] as i16 as f32 / 10.0,
            humidity: 125.0 * words[1] as f32 / 65535.0 - 6.0,
            temperature: 175.0 * words[2] as f32 / 65535.0 - 45.0,
        }
    }
}

/// Split a reply into words, checking each CRC.
pub fn decode_words<const N: usize>(raw: &[u8]) -> Option<[u16; N]> {
    if raw.len() != N * 3 {
        return None;
    }
    let mut words = [0; N];
    for (word, chunk) in words.iter_mut().zip(raw.chunks_exact(3)) {
        if SENSIRION_CRC.checksum(&chunk[..2]) != chunk[2] {
            return None;
        }
        *word = u16::from_be_bytes([chunk[0], chunk[1]]);
    }
    Some(words)
}

#[derive(Debug, Default)]
pub struct Sensors {
    pub formaldehyde: Sensor<f32>,
    pub humidity: Sensor<f32>,
    pub temperature: Sensor<f32>,
}

#[derive(Debug)]
pub struct Sfa40<I, D> {
    i2c: I,
    delay: D,
    address: u8,
    marking: Option<[u8; 6]>,
    health: Health,
    pub sensors: Sensors,
}

impl<I, D> Sfa40<I, D>
where
    I: I2c,
    D: DelayNs,
{
    pub fn new(i2c: I, delay: D, address: u8, sensors: Sensors) -> Self {
        Self {
            i2c,
            delay,
            address,
            marking: None,
            health: Health::new(),
            sensors,
        }
    }

    pub fn release(self) -> (I, D) {
        (self.i2c, self.delay)
    }

    /// Device marking read during setup.
    pub fn marking(&self) -> Option<&[u8; 6]> {
        self.marking.as_ref()
    }

    pub fn command(&mut self, command: Command) -> Result<(), Error<I::Error>> {
        self.i2c
            .write(self.address, &(command as u16).to_be_bytes())?;
        Ok(())
    }

    fn read_words<const N: usize, const M: usize>(
        &mut self,
        command: Command,
    ) -> Result<[u16; N], Error<I::Error>> {
        self.command(command)?;
        self.delay.delay_ms(COMMAND_DELAY_MS);
        let mut raw = [0; M];
        self.i2c.read(self.address, &mut raw)?;
        decode_words(&raw).ok_or(Error::Checksum)
    }

    pub fn read_marking(&mut self) -> Result<[u8; 6], Error<I::Error>> {
        let words: [u16; 3] = self.read_words::<3, 9>(Command::DeviceMarking)?;
        let mut marking = [0; 6];
        for (pair, word) in marking.chunks_exact_mut(2).zip(words) {
            pair.copy_from_slice(&word.to_be_bytes());
        }
        Ok(marking)
    }

    pub fn read_measurement(&mut self) -> Result<Measurement, Error<I::Error>> {
        let words = self.read_words::<3, 9>(Command::ReadMeasurement)?;
        Ok(Measurement::from_words(words))
    }

    pub fn stop(&mut self) -> Result<(), Error<I::Error>> {
        self.command(Command::StopMeasurement)
    }

    fn init(&mut self) -> Result<(), Error<I::Error>> {
        let marking = self.read_marking()?;
        log::info!("sfa40 marking {:02x?}", marking);
        self.marking = Some(marking);
        self.command(Command::StartMeasurement)
    }

    fn measure(&mut self) -> Result<(), Error<I::Error>> {
        let m = self.read_measurement()?;
        log::debug!("{:?}", m);
        self.sensors.formaldehyde.publish(m.formaldehyde);
        self.sensors.humidity.publish(m.humidity);
        self.sensors.temperature.publish(m.temperature);
        Ok(())
    }
}

impl<I, D> Driver for Sfa40<I, D>
where
    I: I2c,
    D: DelayNs,
{
    type Error = Error<I::Error>;

    fn setup(&mut self) -> Result<(), Self::Error> {
        let result = self.init();
        fail_on_error(&mut self.health, "sfa40", result)
    }

    fn poll(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn update(&mut self) -> Result<(), Self::Error> {
        if self.health.is_failed() {
            return Ok(());
        }
        let result = self.measure();
        warn_on_error(&mut self.health, "sfa40", result)
    }

    fn health(&self) -> Health {
        self.health
    }
}

#[cfg(test)]
mod test {
    use std::vec;
    use std::vec::Vec;

    use quickcheck_macros::quickcheck;

    use super::*;
    use crate::mock::{recorder, NoDelay, RegisterFile};

    fn words(ws: &[u16]) -> Vec<u8> {
        let mut out = Vec::new();
        for w in ws {
            let bytes = w.to_be_bytes();
            out.extend_from_slice(&bytes);
            out.push(SENSIRION_CRC.checksum(&bytes));
        }
        out
    }

    fn device() -> Sfa40<RegisterFile, NoDelay> {
        Sfa40::new(
            RegisterFile::new(DEFAULT_ADDRESS),
            NoDelay::default(),
            DEFAULT_ADDRESS,
            Sensors::default(),
        )
    }

    #[test]
    fn known_crc() {
        assert_eq!(decode_words::<1>(&[0xbe, 0xef, 0x92]), Some([0xbeef]));
        assert_eq!(decode_words::<1>(&[0xbe, 0xef, 0x93]), None);
        assert_eq!(decode_words::<1>(&[0xbe, 0xef]), None);
    }

    #[quickcheck]
    fn words_decode(a: u16, b: u16, c: u16) -> bool {
        decode_words::<3>(&words(&[a, b, c])) == Some([a, b, c])
    }

    #[test]
    fn conversions() {
        let m = Measurement::from_words([250, 0, 0]);
        assert_eq!(m.formaldehyde, 25.0);
        assert_eq!(m.humidity, -6.0);
        assert_eq!(m.temperature, -45.0);

        let m = Measurement::from_words([(-20i16) as u16, 0xffff, 0xffff]);
        assert_eq!(m.formaldehyde, -2.0);
        assert_eq!(m.humidity, 119.0);
        assert_eq!(m.temperature, 130.0);
    }

    #[test]
    fn setup_reads_marking_and_starts() {
        let mut dev = device();
        dev.i2c.reply(&words(&[0x5346, 0x4134, 0x3030]));
        dev.setup().unwrap();
        assert_eq!(dev.marking(), Some(b"SFA400"));
        assert_eq!(dev.i2c.take_writes(), [vec![0x02, 0xce], vec![0x00, 0xac]]);
        assert_eq!(dev.delay.total_ns, 5_000_000);
    }

    #[test]
    fn bad_marking_fails() {
        let mut dev = device();
        let mut reply = words(&[0x5346, 0x4134, 0x3030]);
        reply[5] ^= 1;
        dev.i2c.reply(&reply);
        assert_eq!(dev.setup(), Err(Error::Checksum));
        assert!(dev.health().is_failed());
        assert_eq!(dev.marking(), None);
        // never started
        assert_eq!(dev.i2c.take_writes(), [vec![0x02, 0xce]]);
    }

    #[test]
    fn measures() {
        let (hcho, hchos) = recorder();
        let (rh, rhs) = recorder();
        let mut dev = device();
        dev.sensors.formaldehyde = hcho;
        dev.sensors.humidity = rh;
        dev.i2c.reply(&words(&[0, 0, 0]));
        dev.setup().unwrap();
        dev.i2c.take_writes();

        dev.i2c.reply(&words(&[123, 0xffff, 0]));
        dev.update().unwrap();
        assert_eq!(*hchos.borrow(), [12.3]);
        assert_eq!(*rhs.borrow(), [119.0]);
        assert_eq!(dev.i2c.take_writes(), [vec![0xe0, 0x6d]]);
    }

    #[test]
    fn bad_measurement_warns() {
        let (hcho, hchos) = recorder();
        let mut dev = device();
        dev.sensors.formaldehyde = hcho;
        dev.i2c.reply(&words(&[0, 0, 0]));
        dev.setup().unwrap();

        let mut reply = words(&[123, 0, 0]);
        reply[8] ^= 0xff;
        dev.i2c.reply(&reply);
        assert_eq!(dev.update(), Err(Error::Checksum));
        assert!(dev.health().is_warning());
        assert!(hchos.borrow().is_empty());

        dev.i2c.reply(&words(&[10, 0, 0]));
        dev.update().unwrap();
        assert!(!dev.health().is_warning());
        assert_eq!(*hchos.borrow(), [1.0]);
    }

    #[test]
    fn stop() {
        let mut dev = device();
        dev.stop().unwrap();
        assert_eq!(dev.i2c.take_writes(), [vec![0x50, 0xd2]]);
    }
}
