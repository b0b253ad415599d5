//! Core of a bridge between the GDB Remote Serial Protocol and the serial
//! wire protocol spoken by a 16-bit real-mode x86 debug stub.
//!
//! This crate has no knowledge of sockets or serial ports; see the
//! `rsp-bridge` binary crate for the transport and event loop that feed
//! bytes into [`Bridge`] and write its output back out.

pub mod addr;
pub mod bridge;
pub mod codec;
pub mod error;
pub mod rsp_fsm;
pub mod serial_fsm;
pub mod wire;

pub use bridge::{Bridge, FrameMode};
pub use error::{FatalError, ParseError, SessionError};
