//! Serial device communication engine for RF/IR home-automation bridges.
//!
//! rfbridge drives microcontrollers attached over serial: it sends framed
//! commands through their chunk/acknowledgement protocol, reassembles the
//! fragmented packets they emit, holds commands until a device polls for
//! them, and compresses learned infrared signals for replay.
//!
//! # Crate Structure
//!
//! - [`transport`]: serial link trait, real serial ports and a simulated device
//! - [`frame`]: channel framing, packet reassembly and IR compression
//! - [`session`]: request buffering, dispatch and device sessions (behind `session` feature)

/// Re-export transport types.
pub mod transport {
    pub use rfbridge_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use rfbridge_frame::*;
}

/// Re-export session types (requires `session` feature).
#[cfg(feature = "session")]
pub mod session {
    pub use rfbridge_session::*;
}
