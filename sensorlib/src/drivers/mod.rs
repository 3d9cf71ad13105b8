//! Drivers for UART sensor modules.
//!
//! Each driver owns its port and implements [crate::Driver]. Decoded
//! readings go out through the [crate::Sensor] sinks in its `sensors`
//! field.

pub mod as201;
pub mod dart;
pub mod ld2413;
pub mod ld2451;
pub mod ld2460;
pub mod ld24xx;
pub mod ml307r;
