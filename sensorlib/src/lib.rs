#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod error;
pub use error::*;

pub mod drivers;
pub mod exchange;

mod health;
pub use health::*;

pub mod port;
pub use port::ByteSource;

pub mod protocol;

mod sensor;
pub use sensor::*;

pub mod time;
