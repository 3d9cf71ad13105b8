//! CPS610 barometric pressure sensor.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::{fail_on_error, warn_on_error, Driver, Error, Health, Sensor};

pub const DEFAULT_ADDRESS: u8 = 0x7f;

const COMMAND: u8 = 0x30;
const DATA: u8 = 0x06;

/// Start a combined conversion.
const START: u8 = 0x0a;
/// Command register value once a conversion is done.
const DONE: u8 = 0x02;

const POLLS: u32 = 20;
const POLL_DELAY_MS: u32 = 50;

/// Convert a raw 24-bit reading to kPa.
pub fn pressure_kpa(raw: u32, a: f32, b: f32) -> f32 {
    raw as f32 * 1.02 / 8_388_608.0 * a + b
}

/// Linear calibration applied to every reading.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    scale: f32,
    offset: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset: 0.0,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn get_scale(&self) -> f32 {
        self.scale
    }

    /// kPa.
    pub fn offset(mut self, offset: f32) -> Self {
        self.offset = offset;
        self
    }

    pub fn get_offset(&self) -> f32 {
        self.offset
    }
}

#[derive(Debug, Default)]
pub struct Sensors {
    /// kPa.
    pub pressure: Sensor<f32>,
}

#[derive(Debug)]
pub struct Cps610<I, D> {
    i2c: I,
    delay: D,
    address: u8,
    config: Config,
    health: Health,
    pub sensors: Sensors,
}

impl<I, D> Cps610<I, D>
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

    fn command_status(&mut self) -> Result<u8, Error<I::Error>> {
        let mut buf = [0];
        self.i2c.write_read(self.address, &[COMMAND], &mut buf)?;
        Ok(buf[0])
    }

    /// Run a conversion and return the raw 24-bit result.
    pub fn read_raw(&mut self) -> Result<u32, Error<I::Error>> {
        self.i2c.write(self.address, &[COMMAND, START])?;

        let mut polls = 0;
        while self.command_status()? != DONE {
            polls += 1;
            if polls >= POLLS {
                return Err(Error::Timeout);
            }
            self.delay.delay_ms(POLL_DELAY_MS);
        }

        let mut buf = [0; 3];
        self.i2c.write_read(self.address, &[DATA], &mut buf)?;
        Ok(u32::from_be_bytes([0, buf[0], buf[1], buf[2]]))
    }

    /// Run a conversion and return kPa.
    pub fn pressure(&mut self) -> Result<f32, Error<I::Error>> {
        let raw = self.read_raw()?;
        Ok(pressure_kpa(raw, self.config.scale, self.config.offset))
    }

    fn measure(&mut self) -> Result<(), Error<I::Error>> {
        let p = self.pressure()?;
        log::debug!("pressure {} kPa", p);
        self.sensors.pressure.publish(p);
        Ok(())
    }
}

impl<I, D> Driver for Cps610<I, D>
where
    I: I2c,
    D: DelayNs,
{
    type Error = Error<I::Error>;

    /// Checks the device answers.
    fn setup(&mut self) -> Result<(), Self::Error> {
        let result = self.command_status().map(|_| ());
        fail_on_error(&mut self.health, "cps610", result)
    }

    fn poll(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn update(&mut self) -> Result<(), Self::Error> {
        if self.health.is_failed() {
            return Ok(());
        }
        let result = self.measure();
        warn_on_error(&mut self.health, "cps610", result)
    }

    fn health(&self) -> Health {
        self.health
    }
}
