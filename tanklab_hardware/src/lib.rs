//! Device backends for the two-tank rig.
//!
//! `firmata` holds the framing used on the serial link and is always built so
//! it can be exercised without a board attached. The serial board itself is
//! behind the `hardware` feature.
pub mod error;
pub mod firmata;
pub mod util;

#[cfg(feature = "hardware")]
pub mod board;

#[cfg(feature = "hardware")]
pub use board::{BoardConfig, FirmataBoard};
pub use error::HwError;
