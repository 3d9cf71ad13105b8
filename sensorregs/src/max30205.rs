//! Maxim MAX30205 body temperature sensor.

use bitfield_struct::bitfield;
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::{fail_on_error, warn_on_error, Driver, Error, Health, Register, Sensor};

/// With A0-A2 grounded.
pub const DEFAULT_ADDRESS: u8 = 0x48;

const TEMPERATURE: u8 = 0x00;
const HYSTERESIS: u8 = 0x02;
const OVER_TEMPERATURE: u8 = 0x03;

/// Conversion time for a one-shot reading.
const CONVERSION_MS: u32 = 50;

/// 0x01 Configuration.
#[cfg_attr(not(feature = "defmt"), bitfield(u8))]
#[cfg_attr(feature = "defmt", bitfield(u8, defmt = true))]
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Configuration {
    pub shutdown: bool,
    /// OS pin behaves as an interrupt instead of a comparator.
    pub interrupt_mode: bool,
    /// OS pin is active high.
    pub polarity: bool,
    /// Faults needed in a row to trip OS.
    #[bits(2, from = FaultQueue::from_bits, into = FaultQueue::into_bits)]
    pub fault_queue: FaultQueue,
    /// Adds 64°C to every reading.
    pub extended_format: bool,
    /// Disable the bus timeout.
    pub timeout: bool,
    /// Start a conversion while shut down. Reads back as zero.
    pub one_shot: bool,
}

impl Register for Configuration {
    const ADDRESS: u8 = 0x01;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultQueue {
    One = 0,
    Two = 1,
    Four = 2,
    Six = 3,
}

impl FaultQueue {
    pub const fn into_bits(self) -> u8 {
        self as u8
    }

    pub const fn from_bits(v: u8) -> Self {
        match v & 0b11 {
            0 => Self::One,
            1 => Self::Two,
            2 => Self::Four,
            _ => Self::Six,
        }
    }
}

/// Convert a temperature register to °C.
///
/// Bit 15 is read as a sign and the rest as a magnitude in 1/256 °C.
pub fn decode_temperature(raw: [u8; 2], extended: bool) -> f32 {
    let magnitude = u16::from_be_bytes([raw[0] & 0x7f, raw[1]]) as f32 / 256.0;
    let t = if raw[0] & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    };
    if extended {
        t + 64.0
    } else {
        t
    }
}

/// Convert a whole °C threshold to register form.
pub fn encode_threshold(celsius: i8) -> [u8; 2] {
    (i16::from(celsius) << 8).to_be_bytes()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    configuration: Configuration,
    over_temperature: i8,
    hysteresis: i8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            configuration: Configuration::new(),
            over_temperature: 80,
            hysteresis: 75,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = configuration.with_one_shot(false);
        self
    }

    pub fn get_configuration(&self) -> Configuration {
        self.configuration
    }

    /// OS trips above this, °C.
    pub fn over_temperature(mut self, celsius: i8) -> Self {
        self.over_temperature = celsius;
        self
    }

    pub fn get_over_temperature(&self) -> i8 {
        self.over_temperature
    }

    /// OS releases below this, °C.
    pub fn hysteresis(mut self, celsius: i8) -> Self {
        self.hysteresis = celsius;
        self
    }

    pub fn get_hysteresis(&self) -> i8 {
        self.hysteresis
    }
}

#[derive(Debug, Default)]
pub struct Sensors {
    /// °C.
    pub temperature: Sensor<f32>,
    /// °C, published from [Max30205::on_alert].
    pub over_temperature: Sensor<f32>,
}

#[derive(Debug)]
pub struct Max30205<I, D> {
    i2c: I,
    delay: D,
    address: u8,
    config: Config,
    health: Health,
    pub sensors: Sensors,
}

impl<I, D> Max30205<I, D>
where
    I: I2c,
    D: DelayNs,
{
    pub fn new(i2c: I, delay: D, address: u8, config: Config, sensors: Sensors) -> Self {
        Self {
            i2c,
            delay,
            address,
            config,
            health: Health::new(),
            sensors,
        }
    }

    pub fn release(self) -> (I, D) {
        (self.i2c, self.delay)
    }

    pub fn read_register<R>(&mut self) -> Result<R, Error<I::Error>>
    where
        R: Register,
    {
        let mut buf = [0];
        self.i2c.write_read(self.address, &[R::ADDRESS], &mut buf)?;
        Ok(buf[0].into())
    }

    pub fn write_register<R>(&mut self, value: R) -> Result<(), Error<I::Error>>
    where
        R: Register,
    {
        self.i2c.write(self.address, &[R::ADDRESS, value.into()])?;
        Ok(())
    }

    fn write_threshold(&mut self, register: u8, celsius: i8) -> Result<(), Error<I::Error>> {
        let [hi, lo] = encode_threshold(celsius);
        self.i2c.write(self.address, &[register, hi, lo])?;
        Ok(())
    }

    /// Read the temperature register without starting a conversion.
    pub fn temperature(&mut self) -> Result<f32, Error<I::Error>> {
        let mut buf = [0; 2];
        self.i2c.write_read(self.address, &[TEMPERATURE], &mut buf)?;
        Ok(decode_temperature(
            buf,
            self.config.configuration.extended_format(),
        ))
    }

    pub fn shutdown(&mut self) -> Result<(), Error<I::Error>> {
        self.config.configuration.set_shutdown(true);
        self.write_register(self.config.configuration)
    }

    pub fn wakeup(&mut self) -> Result<(), Error<I::Error>> {
        self.config.configuration.set_shutdown(false);
        self.write_register(self.config.configuration)
    }

    /// Call when the OS pin fires.
    pub fn on_alert(&mut self) -> Result<(), Error<I::Error>> {
        let t = self.temperature()?;
        log::warn!("over temperature: {}", t);
        self.sensors.over_temperature.publish(t);
        Ok(())
    }

    fn init(&mut self) -> Result<(), Error<I::Error>> {
        self.write_register(self.config.configuration)?;
        self.write_threshold(OVER_TEMPERATURE, self.config.over_temperature)?;
        self.write_threshold(HYSTERESIS, self.config.hysteresis)?;
        Ok(())
    }

    fn measure(&mut self) -> Result<(), Error<I::Error>> {
        self.write_register(self.config.configuration.with_one_shot(true))?;
        self.delay.delay_ms(CONVERSION_MS);
        let t = self.temperature()?;
        if self.sensors.temperature.is_configured() {
            self.sensors.temperature.publish(t);
        }
        Ok(())
    }
}

impl<I, D> Driver for Max30205<I, D>
where
    I: I2c,
    D: DelayNs,
{
    type Error = Error<I::Error>;

    fn setup(&mut self) -> Result<(), Self::Error> {
        let result = self.init();
        fail_on_error(&mut self.health, "max30205", result)
    }

    fn poll(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn update(&mut self) -> Result<(), Self::Error> {
        if self.health.is_failed() {
            return Ok(());
        }
        let result = self.measure();
        warn_on_error(&mut self.health, "max30205", result)
    }

    fn health(&self) -> Health {
        self.health
    }
}

#[cfg(test)]
mod test {
    use std::vec;

    use quickcheck_macros::quickcheck;

    use super::*;
    use crate::mock::{recorder, NoDelay, RegisterFile};

    fn device(config: Config) -> Max30205<RegisterFile, NoDelay> {
        Max30205::new(
            RegisterFile::new(DEFAULT_ADDRESS),
            NoDelay::default(),
            DEFAULT_ADDRESS,
            config,
            Sensors::default(),
        )
    }

    #[test]
    fn configuration_bits() {
        let c = Configuration::new()
            .with_fault_queue(FaultQueue::Six)
            .with_polarity(true);
        assert_eq!(0x1c, c.into_bits());
        assert_eq!(0x80, Configuration::new().with_one_shot(true).into_bits());
        assert!(Configuration::from_bits(0x20).extended_format());
    }

    #[quickcheck]
    fn fault_queue_roundtrip(bits: u8) -> bool {
        FaultQueue::from_bits(bits).into_bits() == bits & 0b11
    }

    #[test]
    fn temperatures() {
        assert_eq!(decode_temperature([0x25, 0x80], false), 37.5);
        assert_eq!(decode_temperature([0x00, 0x40], false), 0.25);
        assert_eq!(decode_temperature([0x85, 0x00], false), -5.0);
        assert_eq!(decode_temperature([0x25, 0x80], true), 101.5);
    }

    #[test]
    fn thresholds() {
        assert_eq!(encode_threshold(80), [0x50, 0x00]);
        assert_eq!(encode_threshold(-10), [0xf6, 0x00]);
    }

    #[test]
    fn setup_writes_thresholds() {
        let mut dev = device(Config::new().over_temperature(40).hysteresis(38));
        dev.setup().unwrap();
        assert_eq!(
            dev.i2c.take_writes(),
            [vec![0x01, 0x00], vec![0x03, 40, 0], vec![0x02, 38, 0]]
        );
    }

    #[test]
    fn config_never_stores_one_shot() {
        let c = Config::new().configuration(Configuration::new().with_one_shot(true));
        assert!(!c.get_configuration().one_shot());
    }

    #[test]
    fn one_shot_update() {
        let (t, ts) = recorder();
        let mut dev = device(Config::default());
        dev.sensors.temperature = t;
        dev.setup().unwrap();
        dev.i2c.take_writes();
        dev.i2c.reply(&[0x24, 0xc0]);

        dev.update().unwrap();
        assert_eq!(*ts.borrow(), [36.75]);
        assert_eq!(dev.i2c.take_writes(), [vec![0x01, 0x80], vec![0x00]]);
        assert_eq!(dev.delay.total_ns, 50_000_000);
    }

    #[test]
    fn extended_format_update() {
        let (t, ts) = recorder();
        let config = Config::new().configuration(Configuration::new().with_extended_format(true));
        let mut dev = device(config);
        dev.sensors.temperature = t;
        dev.setup().unwrap();
        dev.i2c.reply(&[0x01, 0x00]);
        dev.update().unwrap();
        assert_eq!(*ts.borrow(), [65.0]);
    }

    #[test]
    fn alert() {
        let (over, overs) = recorder();
        let mut dev = device(Config::default());
        dev.sensors.over_temperature = over;
        dev.setup().unwrap();
        dev.i2c.reply(&[0x51, 0x00]);
        dev.on_alert().unwrap();
        assert_eq!(*overs.borrow(), [81.0]);
    }

    #[test]
    fn shutdown_and_wakeup() {
        let mut dev = device(Config::default());
        dev.setup().unwrap();
        dev.i2c.take_writes();
        dev.shutdown().unwrap();
        dev.wakeup().unwrap();
        assert_eq!(dev.i2c.take_writes(), [vec![0x01, 0x01], vec![0x01, 0x00]]);
    }

    #[test]
    fn missing_device() {
        let mut dev = Max30205::new(
            RegisterFile::new(0x49),
            NoDelay::default(),
            DEFAULT_ADDRESS,
            Config::default(),
            Sensors::default(),
        );
        assert!(dev.setup().is_err());
        assert!(dev.health().is_failed());
        assert_eq!(dev.update(), Ok(()));
    }

    #[test]
    fn bus_error_warns() {
        let mut dev = device(Config::default());
        dev.setup().unwrap();
        dev.i2c.address = 0x4a;
        assert!(dev.update().is_err());
        assert!(dev.health().is_warning());
        dev.i2c.address = DEFAULT_ADDRESS;
        dev.update().unwrap();
        assert!(!dev.health().is_warning());
    }
}
