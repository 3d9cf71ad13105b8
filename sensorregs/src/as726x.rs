//! AMS AS7261/AS7262/AS7263 spectral sensors.
//!
//! The sensor's own registers are virtual, and reached through three
//! physical I2C registers: a status register, a write register that
//! takes an address (with bit 7 set for writes) followed by data, and
//! a read register.

use bitfield_struct::bitfield;
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::{fail_on_error, warn_on_error, Driver, Error, Health, Register, Sensor};

pub const DEFAULT_ADDRESS: u8 = 0x49;

/// Physical registers.
const STATUS: u8 = 0x00;
const WRITE: u8 = 0x01;
const READ: u8 = 0x02;

const WRITE_FLAG: u8 = 0x80;

/// Status checks before a virtual register access gives up.
const POLLS: u8 = 5;
const POLL_DELAY_MS: u32 = 5;
/// How long a one-shot measurement may take.
const ONE_SHOT_TIMEOUT_MS: u32 = 3000;

/// Virtual register addresses without a bitfield of their own.
pub mod vreg {
    pub const DEVICE_TYPE: u8 = 0x00;
    pub const HW_VERSION: u8 = 0x01;
    /// Integration time, in units of 2.8ms.
    pub const INTEGRATION_TIME: u8 = 0x05;
    /// Device temperature, °C.
    pub const DEVICE_TEMP: u8 = 0x06;
}

/// Physical status register.
#[cfg_attr(not(feature = "defmt"), bitfield(u8))]
#[cfg_attr(feature = "defmt", bitfield(u8, defmt = true))]
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Status {
    /// Data is waiting in the read register.
    pub rx_valid: bool,
    /// The write register is busy.
    pub tx_valid: bool,
    #[bits(6)]
    __: u8,
}

/// 0x04 Control setup.
#[cfg_attr(not(feature = "defmt"), bitfield(u8))]
#[cfg_attr(feature = "defmt", bitfield(u8, defmt = true))]
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Control {
    __: bool,
    /// A measurement is ready. Write low to clear.
    pub data_ready: bool,
    /// Which channels are measured.
    #[bits(2, from = Mode::from_bits, into = Mode::into_bits)]
    pub bank: Mode,
    #[bits(2, from = Gain::from_bits, into = Gain::into_bits)]
    pub gain: Gain,
    /// Pull the interrupt pin low when data is ready.
    pub interrupt: bool,
    /// Soft reset. Give the device a second to come back.
    pub reset: bool,
}

impl Register for Control {
    const ADDRESS: u8 = 0x04;
}

/// 0x07 LED control.
#[cfg_attr(not(feature = "defmt"), bitfield(u8))]
#[cfg_attr(feature = "defmt", bitfield(u8, defmt = true))]
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LedControl {
    /// Indicator LED enable.
    pub indicator: bool,
    #[bits(2, from = IndicatorCurrent::from_bits, into = IndicatorCurrent::into_bits)]
    pub indicator_current: IndicatorCurrent,
    /// Illumination LED enable.
    pub drive: bool,
    #[bits(2, from = DriveCurrent::from_bits, into = DriveCurrent::into_bits)]
    pub drive_current: DriveCurrent,
    #[bits(2)]
    __: u8,
}

impl Register for LedControl {
    const ADDRESS: u8 = 0x07;
}

/// Measurement mode, or channel bank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// X, Y, Z and NIR, continuously.
    Xyzn = 0,
    /// X, Y, dark and clear, continuously.
    Xydc = 1,
    /// All six channels, continuously.
    All = 2,
    /// All six channels, once per request.
    OneShot = 3,
}

impl Mode {
    pub const fn into_bits(self) -> u8 {
        self as u8
    }

    pub const fn from_bits(v: u8) -> Self {
        match v & 0b11 {
            0 => Self::Xyzn,
            1 => Self::Xydc,
            2 => Self::All,
            _ => Self::OneShot,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Gain {
    X1 = 0,
    X3_7 = 1,
    X16 = 2,
    X64 = 3,
}

impl Gain {
    pub const fn into_bits(self) -> u8 {
        self as u8
    }

    pub const fn from_bits(v: u8) -> Self {
        match v & 0b11 {
            0 => Self::X1,
            1 => Self::X3_7,
            2 => Self::X16,
            _ => Self::X64,
        }
    }
}

/// Illumination LED current.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriveCurrent {
    Ma12_5 = 0,
    Ma25 = 1,
    Ma50 = 2,
    Ma100 = 3,
}

impl DriveCurrent {
    pub const fn into_bits(self) -> u8 {
        self as u8
    }

    pub const fn from_bits(v: u8) -> Self {
        match v & 0b11 {
            0 => Self::Ma12_5,
            1 => Self::Ma25,
            2 => Self::Ma50,
            _ => Self::Ma100,
        }
    }
}

/// Indicator LED current.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IndicatorCurrent {
    Ma1 = 0,
    Ma2 = 1,
    Ma4 = 2,
    Ma8 = 3,
}

impl IndicatorCurrent {
    pub const fn into_bits(self) -> u8 {
        self as u8
    }

    pub const fn from_bits(v: u8) -> Self {
        match v & 0b11 {
            0 => Self::Ma1,
            1 => Self::Ma2,
            2 => Self::Ma4,
            _ => Self::Ma8,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceType {
    /// XYZ tristimulus.
    As7261,
    /// Visible.
    As7262,
    /// Near infrared.
    As7263,
}

impl DeviceType {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0x3d => Some(Self::As7261),
            0x3e => Some(Self::As7262),
            0x3f => Some(Self::As7263),
            _ => None,
        }
    }
}

/// Raw 16-bit channels, as named on the AS7261.
///
/// The AS7262 and AS7263 put their six channels at the same
/// addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Channel {
    X = 0x08,
    Y = 0x0a,
    Z = 0x0c,
    Nir = 0x0e,
    Dark = 0x10,
    Clear = 0x12,
}

impl Channel {
    pub const ALL: [Self; 6] = [
        Self::X,
        Self::Y,
        Self::Z,
        Self::Nir,
        Self::Dark,
        Self::Clear,
    ];

    pub const fn address(self) -> u8 {
        self as u8
    }
}

/// Calibrated 32-bit float values, as named on the AS7261.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Calibrated {
    X = 0x14,
    Y = 0x18,
    Z = 0x1c,
    X1931 = 0x20,
    Y1931 = 0x24,
    UPrime = 0x28,
    VPrime = 0x2c,
    U = 0x30,
    V = 0x34,
    Duv = 0x38,
    Lux = 0x3c,
    /// Overlaps the lower half of [Calibrated::Lux].
    Cct = 0x3e,
}

impl Calibrated {
    pub const ALL: [Self; 12] = [
        Self::X,
        Self::Y,
        Self::Z,
        Self::X1931,
        Self::Y1931,
        Self::UPrime,
        Self::VPrime,
        Self::U,
        Self::V,
        Self::Duv,
        Self::Lux,
        Self::Cct,
    ];

    pub const fn address(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    interrupt: bool,
    gain: Gain,
    mode: Mode,
    integration_time: u8,
    led: LedControl,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interrupt: true,
            gain: Gain::X64,
            mode: Mode::All,
            integration_time: 255,
            led: LedControl::new()
                .with_drive_current(DriveCurrent::Ma100)
                .with_drive(true)
                .with_indicator_current(IndicatorCurrent::Ma8)
                .with_indicator(true),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(mut self, interrupt: bool) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn get_interrupt(&self) -> bool {
        self.interrupt
    }

    pub fn gain(mut self, gain: Gain) -> Self {
        self.gain = gain;
        self
    }

    pub fn get_gain(&self) -> Gain {
        self.gain
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn get_mode(&self) -> Mode {
        self.mode
    }

    /// Integration time in units of 2.8ms.
    pub fn integration_time(mut self, time: u8) -> Self {
        self.integration_time = time;
        self
    }

    pub fn get_integration_time(&self) -> u8 {
        self.integration_time
    }

    /// Integration time in milliseconds.
    pub fn get_integration_ms(&self) -> f32 {
        self.integration_time as f32 * 2.8
    }

    pub fn led(mut self, led: LedControl) -> Self {
        self.led = led;
        self
    }

    pub fn get_led(&self) -> LedControl {
        self.led
    }

    fn control(&self) -> Control {
        Control::new()
            .with_interrupt(self.interrupt)
            .with_gain(self.gain)
            .with_bank(self.mode)
    }
}

#[derive(Debug, Default)]
pub struct Sensors {
    pub x: Sensor<u16>,
    pub y: Sensor<u16>,
    pub z: Sensor<u16>,
    pub nir: Sensor<u16>,
    pub dark: Sensor<u16>,
    pub clear: Sensor<u16>,

    pub calibrated_x: Sensor<f32>,
    pub calibrated_y: Sensor<f32>,
    pub calibrated_z: Sensor<f32>,
    pub x1931: Sensor<f32>,
    pub y1931: Sensor<f32>,
    pub u_prime: Sensor<f32>,
    pub v_prime: Sensor<f32>,
    pub u: Sensor<f32>,
    pub v: Sensor<f32>,
    pub duv: Sensor<f32>,
    pub lux: Sensor<f32>,
    pub cct: Sensor<f32>,

    /// °C. Only good to about ±8.5°C.
    pub temperature: Sensor<u8>,
}

impl Sensors {
    fn raw(&mut self, channel: Channel) -> &mut Sensor<u16> {
        match channel {
            Channel::X => &mut self.x,
            Channel::Y => &mut self.y,
            Channel::Z => &mut self.z,
            Channel::Nir => &mut self.nir,
            Channel::Dark => &mut self.dark,
            Channel::Clear => &mut self.clear,
        }
    }

    fn calibrated(&mut self, value: Calibrated) -> &mut Sensor<f32> {
        match value {
            Calibrated::X => &mut self.calibrated_x,
            Calibrated::Y => &mut self.calibrated_y,
            Calibrated::Z => &mut self.calibrated_z,
            Calibrated::X1931 => &mut self.x1931,
            Calibrated::Y1931 => &mut self.y1931,
            Calibrated::UPrime => &mut self.u_prime,
            Calibrated::VPrime => &mut self.v_prime,
            Calibrated::U => &mut self.u,
            Calibrated::V => &mut self.v,
            Calibrated::Duv => &mut self.duv,
            Calibrated::Lux => &mut self.lux,
            Calibrated::Cct => &mut self.cct,
        }
    }
}

/// AS726x driver.
#[derive(Debug)]
pub struct As726x<I, D> {
    i2c: I,
    delay: D,
    address: u8,
    config: Config,
    device: Option<DeviceType>,
    health: Health,
    pub sensors: Sensors,
}

impl<I, D> As726x<I, D>
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
            device: None,
            health: Health::new(),
            sensors,
        }
    }

    pub fn release(self) -> (I, D) {
        (self.i2c, self.delay)
    }

    /// The device found during setup.
    pub fn device(&self) -> Option<DeviceType> {
        self.device
    }

    fn status(&mut self) -> Result<Status, Error<I::Error>> {
        let mut buf = [0];
        self.i2c.write_read(self.address, &[STATUS], &mut buf)?;
        Ok(Status::from(buf[0]))
    }

    fn wait_status(&mut self, ready: impl Fn(Status) -> bool) -> Result<(), Error<I::Error>> {
        for attempt in 0..POLLS {
            if attempt > 0 {
                self.delay.delay_ms(POLL_DELAY_MS);
            }
            if ready(self.status()?) {
                return Ok(());
            }
        }
        Err(Error::Timeout)
    }

    /// Read a virtual register.
    pub fn read_virtual(&mut self, address: u8) -> Result<u8, Error<I::Error>> {
        if self.status()?.rx_valid() {
            // stale data from an earlier read
            let mut stale = [0];
            self.i2c.write_read(self.address, &[READ], &mut stale)?;
        }

        self.wait_status(|s| !s.tx_valid())?;
        self.i2c.write(self.address, &[WRITE, address])?;
        self.wait_status(|s| s.rx_valid())?;

        let mut buf = [0];
        self.i2c.write_read(self.address, &[READ], &mut buf)?;
        Ok(buf[0])
    }

    /// Write a virtual register.
    pub fn write_virtual(&mut self, address: u8, value: u8) -> Result<(), Error<I::Error>> {
        self.wait_status(|s| !s.tx_valid())?;
        self.i2c.write(self.address, &[WRITE, address | WRITE_FLAG])?;
        self.wait_status(|s| !s.tx_valid())?;
        self.i2c.write(self.address, &[WRITE, value])?;
        Ok(())
    }

    pub fn read_register<R>(&mut self) -> Result<R, Error<I::Error>>
    where
        R: Register,
    {
        Ok(self.read_virtual(R::ADDRESS)?.into())
    }

    pub fn write_register<R>(&mut self, value: R) -> Result<(), Error<I::Error>>
    where
        R: Register,
    {
        self.write_virtual(R::ADDRESS, value.into())
    }

    fn modify_control(&mut self, f: impl FnOnce(Control) -> Control) -> Result<(), Error<I::Error>> {
        let control: Control = self.read_register()?;
        self.write_register(f(control))
    }

    /// Read the device type.
    pub fn identify(&mut self) -> Result<DeviceType, Error<I::Error>> {
        let id = self.read_virtual(vreg::HW_VERSION)?;
        DeviceType::from_id(id).ok_or(Error::Identity(id))
    }

    /// Soft reset. The device needs about a second before it answers
    /// again.
    pub fn soft_reset(&mut self) -> Result<(), Error<I::Error>> {
        self.modify_control(|c| c.with_reset(true))
    }

    pub fn enable_interrupt(&mut self, enable: bool) -> Result<(), Error<I::Error>> {
        self.modify_control(|c| c.with_interrupt(enable))
    }

    pub fn set_gain(&mut self, gain: Gain) -> Result<(), Error<I::Error>> {
        self.modify_control(|c| c.with_gain(gain))
    }

    pub fn set_mode(&mut self, mode: Mode) -> Result<(), Error<I::Error>> {
        self.modify_control(|c| c.with_bank(mode))
    }

    /// Integration time in units of 2.8ms.
    pub fn set_integration_time(&mut self, time: u8) -> Result<(), Error<I::Error>> {
        self.write_virtual(vreg::INTEGRATION_TIME, time)
    }

    pub fn set_led(&mut self, led: LedControl) -> Result<(), Error<I::Error>> {
        self.write_register(led)
    }

    pub fn data_ready(&mut self) -> Result<bool, Error<I::Error>> {
        let control: Control = self.read_register()?;
        Ok(control.data_ready())
    }

    pub fn clear_data_ready(&mut self) -> Result<(), Error<I::Error>> {
        self.modify_control(|c| c.with_data_ready(false))
    }

    /// Read a raw channel, stored big-endian.
    pub fn channel(&mut self, channel: Channel) -> Result<u16, Error<I::Error>> {
        let hi = self.read_virtual(channel.address())?;
        let lo = self.read_virtual(channel.address() + 1)?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    /// Read a calibrated value, stored as a big-endian float.
    pub fn calibrated(&mut self, value: Calibrated) -> Result<f32, Error<I::Error>> {
        let mut bytes = [0; 4];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = self.read_virtual(value.address() + i as u8)?;
        }
        Ok(f32::from_be_bytes(bytes))
    }

    /// Device temperature, °C.
    pub fn temperature(&mut self) -> Result<u8, Error<I::Error>> {
        self.read_virtual(vreg::DEVICE_TEMP)
    }

    fn init(&mut self) -> Result<(), Error<I::Error>> {
        let device = self.identify()?;
        log::info!("found {:?}", device);
        self.device = Some(device);

        self.write_register(self.config.control())?;
        self.set_integration_time(self.config.get_integration_time())?;
        self.set_led(self.config.get_led())?;
        Ok(())
    }

    fn one_shot(&mut self) -> Result<(), Error<I::Error>> {
        self.clear_data_ready()?;
        self.set_mode(Mode::OneShot)?;

        let mut waited = 0;
        while !self.data_ready()? {
            if waited >= ONE_SHOT_TIMEOUT_MS {
                log::warn!("timed out waiting for one-shot data");
                return Err(Error::Timeout);
            }
            self.delay.delay_ms(POLL_DELAY_MS);
            waited += POLL_DELAY_MS;
        }
        Ok(())
    }

    fn measure(&mut self) -> Result<(), Error<I::Error>> {
        if self.config.get_mode() == Mode::OneShot {
            self.one_shot()?;
        }

        for channel in Channel::ALL {
            if self.sensors.raw(channel).is_configured() {
                let value = self.channel(channel)?;
                self.sensors.raw(channel).publish(value);
            }
        }

        for value in Calibrated::ALL {
            if self.sensors.calibrated(value).is_configured() {
                let reading = self.calibrated(value)?;
                self.sensors.calibrated(value).publish(reading);
            }
        }

        if self.sensors.temperature.is_configured() {
            let t = self.temperature()?;
            self.sensors.temperature.publish(t);
        }
        Ok(())
    }
}

impl<I, D> Driver for As726x<I, D>
where
    I: I2c,
    D: DelayNs,
{
    type Error = Error<I::Error>;

    fn setup(&mut self) -> Result<(), Self::Error> {
        let result = self.init();
        fail_on_error(&mut self.health, "as726x", result)
    }

    fn poll(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn update(&mut self) -> Result<(), Self::Error> {
        if self.health.is_failed() {
            return Ok(());
        }
        let result = self.measure();
        warn_on_error(&mut self.health, "as726x", result)
    }

    fn health(&self) -> Health {
        self.health
    }
}
