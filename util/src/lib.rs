#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod bits;
mod error;
pub mod marshal;
pub mod ntp;
pub mod sync;

pub use error::{Error, Result};
pub use marshal::{Marshal, MarshalSize, Unmarshal};
