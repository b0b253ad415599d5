//! Error types for the bridge core.
//!
//! Three distinct severities: a malformed command is recoverable
//! (`ParseError`, answered with `E00`), a framing violation ends the
//! current session (`SessionError`), and a transport setup failure ends
//! the whole process (`FatalError`).

use std::io;
use thiserror::Error;

/// A single command within an otherwise well-framed RSP packet was malformed.
/// The caller recovers by replying `E00` and resuming at the next packet.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected byte {expected:#04x}, found {found:#04x}")]
    UnexpectedByte { expected: u8, found: u8 },
    #[error("expected byte in range {lo:#04x}..={hi:#04x}, found {found:#04x}")]
    OutOfRange { lo: u8, hi: u8, found: u8 },
    #[error("packet ended before a required field")]
    Truncated,
    #[error("invalid hex digit in payload")]
    InvalidHex,
    #[error("register index out of range")]
    InvalidRegisterIndex,
    #[error("value too wide for a 16-bit register")]
    RegisterValueTooWide,
}

/// An error that invalidates the current debugger or target session but
/// not the bridge process as a whole.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("RSP checksum mismatch: expected {expected:02x}, received {received:02x}")]
    ChecksumMismatch { expected: u8, received: u8 },
    #[error("RSP command buffer overflowed")]
    CommandOverflow,
    #[error("unrecognized stop reason byte {0:#04x}")]
    UnknownStopReason(u8),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// An error that terminates the whole process: transport setup failures,
/// invalid configuration, or a session error bubbled up from `main`.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("{0}")]
    Message(String),
}

/// Result of dispatching one fully-framed RSP command: either a malformed
/// command (recoverable) or an I/O failure writing a reply (fatal for the
/// session).
#[derive(Debug, Error)]
pub(crate) enum DispatchError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Io(#[from] io::Error),
}
