//! Vishay VEML6040 RGBW colour sensor.
//!
//! Registers are 16-bit little-endian words behind an 8-bit command
//! code.

use bitfield_struct::bitfield;
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::{fail_on_error, warn_on_error, Driver, Error, Health, Sensor};

pub const DEFAULT_ADDRESS: u8 = 0x10;

const CONFIG: u8 = 0x00;

/// 0x00 Configuration.
#[cfg_attr(not(feature = "defmt"), bitfield(u16))]
#[cfg_attr(feature = "defmt", bitfield(u16, defmt = true))]
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Configuration {
    pub shutdown: bool,
    /// Measure only when triggered.
    pub force: bool,
    /// Start a measurement in force mode. Clears itself.
    pub trigger: bool,
    __: bool,
    #[bits(3, from = IntegrationTime::from_bits, into = IntegrationTime::into_bits)]
    pub integration_time: Result<IntegrationTime, u8>,
    #[bits(9)]
    __: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IntegrationTime {
    Ms40 = 0,
    Ms80 = 1,
    Ms160 = 2,
    Ms320 = 3,
    Ms640 = 4,
    Ms1280 = 5,
}

impl IntegrationTime {
    pub const fn into_bits(this: Result<Self, u8>) -> u8 {
        match this {
            Ok(v) => v as u8,
            Err(v) => v,
        }
    }

    pub const fn from_bits(v: u8) -> Result<Self, u8> {
        match v {
            0 => Ok(Self::Ms40),
            1 => Ok(Self::Ms80),
            2 => Ok(Self::Ms160),
            3 => Ok(Self::Ms320),
            4 => Ok(Self::Ms640),
            5 => Ok(Self::Ms1280),
            _ => Err(v),
        }
    }

    pub const fn millis(self) -> u32 {
        40 << (self as u32)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    Red = 0x08,
    Green = 0x09,
    Blue = 0x0a,
    White = 0x0b,
}

impl Channel {
    pub const ALL: [Self; 4] = [Self::Red, Self::Green, Self::Blue, Self::White];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    integration_time: IntegrationTime,
    force: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            integration_time: IntegrationTime::Ms80,
            force: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn integration_time(mut self, time: IntegrationTime) -> Self {
        self.integration_time = time;
        self
    }

    pub fn get_integration_time(&self) -> IntegrationTime {
        self.integration_time
    }

    /// Measure only on [Driver::update], instead of continuously.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn get_force(&self) -> bool {
        self.force
    }

    fn configuration(&self) -> Configuration {
        Configuration::new()
            .with_integration_time(Ok(self.integration_time))
            .with_force(self.force)
    }
}

#[derive(Debug, Default)]
pub struct Sensors {
    pub red: Sensor<u16>,
    pub green: Sensor<u16>,
    pub blue: Sensor<u16>,
    pub white: Sensor<u16>,
}

impl Sensors {
    fn channel(&mut self, channel: Channel) -> &mut Sensor<u16> {
        match channel {
            Channel::Red => &mut self.red,
            Channel::Green => &mut self.green,
            Channel::Blue => &mut self.blue,
            Channel::White => &mut self.white,
        }
    }
}

#[derive(Debug)]
pub struct Veml6040<I, D> {
    i2c: I,
    delay: D,
    address: u8,
    configuration: Configuration,
    health: Health,
    pub sensors: Sensors,
}

impl<I, D> Veml6040<I, D>
where
    I: I2c,
    D: DelayNs,
{
    pub fn new(i2c: I, delay: D, address: u8, config: Config, sensors: Sensors) -> Self {
        Self {
            i2c,
            delay,
            address,
            configuration: config.configuration(),
            health: Health::new(),
            sensors,
        }
    }

    pub fn release(self) -> (I, D) {
        (self.i2c, self.delay)
    }

    fn write_word(&mut self, command: u8, value: u16) -> Result<(), Error<I::Error>> {
        let [lo, hi] = value.to_le_bytes();
        self.i2c.write(self.address, &[command, lo, hi])?;
        Ok(())
    }

    fn read_word(&mut self, command: u8) -> Result<u16, Error<I::Error>> {
        let mut buf = [0; 2];
        self.i2c.write_read(self.address, &[command], &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn write_configuration(&mut self, configuration: Configuration) -> Result<(), Error<I::Error>> {
        self.write_word(CONFIG, configuration.into_bits())
    }

    pub fn channel(&mut self, channel: Channel) -> Result<u16, Error<I::Error>> {
        self.read_word(channel as u8)
    }

    pub fn shutdown(&mut self) -> Result<(), Error<I::Error>> {
        self.configuration.set_shutdown(true);
        self.write_configuration(self.configuration)
    }

    pub fn wakeup(&mut self) -> Result<(), Error<I::Error>> {
        self.configuration.set_shutdown(false);
        self.write_configuration(self.configuration)
    }

    fn measure(&mut self) -> Result<(), Error<I::Error>> {
        if self.configuration.force() {
            self.write_configuration(self.configuration.with_trigger(true))?;
            if let Ok(time) = self.configuration.integration_time() {
                self.delay.delay_ms(time.millis());
            }
        }

        for channel in Channel::ALL {
            if self.sensors.channel(channel).is_configured() {
                let value = self.channel(channel)?;
                self.sensors.channel(channel).publish(value);
            }
        }
        Ok(())
    }
}

impl<I, D> Driver for Veml6040<I, D>
where
    I: I2c,
    D: DelayNs,
{
    type Error = Error<I::Error>;

    fn setup(&mut self) -> Result<(), Self::Error> {
        let result = self.write_configuration(self.configuration);
        fail_on_error(&mut self.health, "veml6040", result)
    }

    fn poll(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn update(&mut self) -> Result<(), Self::Error> {
        if self.health.is_failed() {
            return Ok(());
        }
        let result = self.measure();
        warn_on_error(&mut self.health, "veml6040", result)
    }

    fn health(&self) -> Health {
        self.health
    }
}
