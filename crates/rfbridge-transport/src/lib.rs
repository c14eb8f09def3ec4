//! Line-oriented serial link abstraction.
//!
//! Provides a single [`SerialLink`] contract with two implementations:
//! - [`SerialPortLink`] over a real serial device (via `serialport`)
//! - [`SimulatedDevice`], a software microcontroller for tests and demos
//!
//! This is the lowest layer of rfbridge. The dispatcher and reassembler
//! only ever see the trait, never a concrete link.

pub mod error;
pub mod serial;
pub mod sim;
pub mod traits;

pub use error::{Result, TransportError};
pub use serial::{SerialConfig, SerialPortLink, DEFAULT_BAUD_RATE};
pub use sim::{fragment_packet, SimConfig, SimProbe, SimulatedDevice};
pub use traits::{take_line, SerialLink};
