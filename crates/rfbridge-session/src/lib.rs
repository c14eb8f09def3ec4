//! Device sessions for microcontrollers attached over serial.
//!
//! A [`DeviceSession`] owns one [`SerialLink`](rfbridge_transport::SerialLink)
//! and runs two worker threads over it: the [`Dispatcher`] sends queued
//! commands and walks the acknowledgement protocol, and the reassembler loop
//! turns inbound fragments into packets. Events and command results leave
//! the session through a [`NotificationSink`].

pub mod dispatcher;
pub mod error;
pub mod notify;
pub mod request;
pub mod request_buffer;
pub mod session;

pub use dispatcher::{DispatchOutcome, Dispatcher, DispatcherConfig, DispatcherExit};
pub use error::{Result, SessionError};
pub use notify::{
    learn_ir, ChannelSink, CommandErrorKind, CommandResult, JsonLineSink, Notification,
    NotificationSink,
};
pub use request::{CommandRequest, OutboundItem};
pub use request_buffer::{RequestBuffer, RequestEntry};
pub use session::{DeviceSession, SessionConfig, SessionHandle};
