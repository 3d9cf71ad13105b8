//! Drivers for I2C sensors.
//!
//! These share the [Driver] lifecycle, [Health] and [Sensor] sinks with
//! the UART drivers in [sensorlib].

#![no_std]

#[cfg(test)]
extern crate std;

pub use sensorlib::{Driver, Health, Sensor};

pub mod as726x;
pub mod cps610;
pub mod max30205;
pub mod sfa40;
pub mod veml6040;

#[cfg(test)]
mod mock;

/// A trait describing an 8-bit register generically.
pub trait Register: Copy + From<u8> + Into<u8> {
    /// The address of this register.
    const ADDRESS: u8;
}

/// An error produced by an I2C sensor driver.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// I2C error.
    Bus(E),
    /// The device stayed busy for too long.
    Timeout,
    /// The device is not the one we expected.
    Identity(u8),
    /// A reply failed its CRC.
    Checksum,
    /// The driver failed during setup and is disabled.
    Failed,
}

impl<E> From<E> for Error<E> {
    fn from(other: E) -> Self {
        Self::Bus(other)
    }
}

impl<E> core::fmt::Display for Error<E>
where
    E: core::fmt::Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::Bus(e) => write!(f, "bus error: {:?}", e),
            Self::Timeout => write!(f, "timed out waiting for device"),
            Self::Identity(id) => write!(f, "unexpected device id 0x{:02x}", id),
            Self::Checksum => write!(f, "crc mismatch"),
            Self::Failed => write!(f, "driver failed"),
        }
    }
}

/// Run setup, marking the driver failed on any error.
pub(crate) fn fail_on_error<T, E>(
    health: &mut Health,
    name: &str,
    result: Result<T, Error<E>>,
) -> Result<T, Error<E>>
where
    E: core::fmt::Debug,
{
    result.inspect_err(|e| {
        log::error!("{} setup failed: {}", name, e);
        health.mark_failed();
    })
}

/// Track a periodic update in the warning flag.
pub(crate) fn warn_on_error<T, E>(
    health: &mut Health,
    name: &str,
    result: Result<T, Error<E>>,
) -> Result<T, Error<E>>
where
    E: core::fmt::Debug,
{
    match &result {
        Ok(_) => health.clear_warning(),
        Err(e) => {
            log::warn!("{} update failed: {}", name, e);
            health.set_warning();
        }
    }
    result
}
