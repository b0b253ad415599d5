//! Incremental framer for the GDB-facing byte stream, plus the command
//! grammar parsed out of each packet's payload.

use crate::codec::{expect_char, expect_char_range, read_int, Codec};
use crate::error::{ParseError, SessionError};
use crate::wire::CTRL_C;

/// Packets larger than this are a protocol violation rather than an
/// oversized but legitimate command; nothing this bridge forwards needs
/// anywhere near it.
const MAX_PAYLOAD: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    Cmd,
    ChecksumHi,
    ChecksumLo,
}

/// One complete unit handed back by the framer.
pub enum RspFrame {
    /// The debugger wants to interrupt the target; not subject to framing.
    CtrlC,
    /// A checksum-verified packet payload, already acknowledged.
    Packet(Vec<u8>),
}

/// Byte-at-a-time parser for `$payload#cc` framing and the bare `0x03`
/// interrupt byte.
pub struct RspFsm {
    state: State,
    payload: Vec<u8>,
    checksum: u8,
    csum_hi: u8,
}

impl RspFsm {
    pub fn new() -> Self {
        RspFsm { state: State::Start, payload: Vec::new(), checksum: 0, csum_hi: 0 }
    }

    /// Returns the framer to its initial state, discarding any partial
    /// packet. Used whenever a connection is (re-)accepted.
    pub fn reset(&mut self) {
        self.state = State::Start;
        self.payload.clear();
        self.checksum = 0;
    }

    pub fn feed(&mut self, byte: u8) -> Result<Option<RspFrame>, SessionError> {
        match self.state {
            State::Start => {
                if byte == CTRL_C {
                    return Ok(Some(RspFrame::CtrlC));
                }
                if byte == b'$' {
                    self.payload.clear();
                    self.checksum = 0;
                    self.state = State::Cmd;
                }
                Ok(None)
            }
            State::Cmd => {
                if byte == b'#' {
                    self.state = State::ChecksumHi;
                } else {
                    if self.payload.len() >= MAX_PAYLOAD {
                        return Err(SessionError::CommandOverflow);
                    }
                    self.payload.push(byte);
                    self.checksum = self.checksum.wrapping_add(byte);
                }
                Ok(None)
            }
            State::ChecksumHi => {
                self.csum_hi = byte;
                self.state = State::ChecksumLo;
                Ok(None)
            }
            State::ChecksumLo => {
                self.state = State::Start;
                let received = hex_byte(self.csum_hi, byte);
                if received != self.checksum {
                    return Err(SessionError::ChecksumMismatch {
                        expected: self.checksum,
                        received,
                    });
                }
                Ok(Some(RspFrame::Packet(std::mem::take(&mut self.payload))))
            }
        }
    }
}

fn hex_byte(hi: u8, lo: u8) -> u8 {
    (hex_nibble(hi) << 4) | hex_nibble(lo)
}

fn hex_nibble(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        b'A'..=b'F' => digit - b'A' + 10,
        _ => 0,
    }
}

/// A parsed RSP command, independent of wire framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    HaltReason,
    ReadRegisters,
    ReadMemory { addr: u32, len: u16 },
    WriteMemory { addr: u32, len: u16, data: Vec<u8> },
    Step,
    Continue,
    SetInstrBreakpoint { addr: u32 },
    SetWriteWatchpoint { addr: u32 },
    SetReadWatchpoint,
    SetAccessWatchpoint { addr: u32 },
    RemoveInstrBreakpoint,
    RemoveWatchpoint,
    WriteRegister { gdb_index: u32, value: u32 },
    Unsupported,
}

pub fn parse_command(payload: &[u8], codec: &mut Codec) -> Result<Command, ParseError> {
    match payload.first() {
        None => Ok(Command::Unsupported),
        Some(b'?') => Ok(Command::HaltReason),
        Some(b'g') => Ok(Command::ReadRegisters),
        Some(b's') => Ok(Command::Step),
        Some(b'c') => Ok(Command::Continue),
        Some(b'm') => parse_read_memory(payload),
        Some(b'M') => parse_write_memory(payload, codec),
        Some(b'Z') => parse_set_breakpoint(payload),
        Some(b'z') => parse_remove_breakpoint(payload),
        Some(b'P') => parse_write_register(payload, codec),
        Some(_) => Ok(Command::Unsupported),
    }
}

fn parse_read_memory(payload: &[u8]) -> Result<Command, ParseError> {
    let rest = expect_char(b'm', payload)?;
    let (addr, rest) = read_int(rest, 16);
    let rest = expect_char(b',', rest)?;
    let (len, _rest) = read_int(rest, 16);
    Ok(Command::ReadMemory { addr, len: len as u16 })
}

fn parse_write_memory(payload: &[u8], codec: &mut Codec) -> Result<Command, ParseError> {
    let rest = expect_char(b'M', payload)?;
    let (addr, rest) = read_int(rest, 16);
    let rest = expect_char(b',', rest)?;
    let (len, rest) = read_int(rest, 16);
    let rest = expect_char(b':', rest)?;
    if len == 0 {
        return Ok(Command::WriteMemory { addr, len: 0, data: Vec::new() });
    }
    let data = codec.decode_hex(rest)?.to_vec();
    Ok(Command::WriteMemory { addr, len: len as u16, data })
}

fn parse_set_breakpoint(payload: &[u8]) -> Result<Command, ParseError> {
    let rest = expect_char(b'Z', payload)?;
    let (kind, rest) = expect_char_range(b'0', b'4', rest)?;
    let rest = expect_char(b',', rest)?;
    let (addr, _rest) = read_int(rest, 16);
    match kind {
        b'0' | b'1' => Ok(Command::SetInstrBreakpoint { addr }),
        b'2' => Ok(Command::SetWriteWatchpoint { addr }),
        b'3' => Ok(Command::SetReadWatchpoint),
        _ => Ok(Command::SetAccessWatchpoint { addr }),
    }
}

fn parse_remove_breakpoint(payload: &[u8]) -> Result<Command, ParseError> {
    let rest = expect_char(b'z', payload)?;
    let (kind, rest) = expect_char_range(b'0', b'4', rest)?;
    let _rest = expect_char(b',', rest)?;
    match kind {
        b'0' | b'1' => Ok(Command::RemoveInstrBreakpoint),
        _ => Ok(Command::RemoveWatchpoint),
    }
}

fn parse_write_register(payload: &[u8], codec: &mut Codec) -> Result<Command, ParseError> {
    let rest = expect_char(b'P', payload)?;
    let (gdb_index, rest) = read_int(rest, 16);
    let rest = expect_char(b'=', rest)?;
    let bytes = codec.decode_hex(rest)?;
    if bytes.len() < 4 {
        return Err(ParseError::Truncated);
    }
    let value = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    Ok(Command::WriteRegister { gdb_index, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(fsm: &mut RspFsm, bytes: &[u8]) -> Vec<u8> {
        for &b in bytes {
            if let Some(RspFrame::Packet(payload)) = fsm.feed(b).unwrap() {
                return payload;
            }
        }
        panic!("no packet produced");
    }

    #[test]
    fn accepts_well_formed_packet() {
        let mut fsm = RspFsm::new();
        let payload = feed_all(&mut fsm, b"$g#67");
        assert_eq!(payload, b"g");
    }

    #[test]
    fn rejects_bad_checksum() {
        let mut fsm = RspFsm::new();
        let mut result = Ok(None);
        for &b in b"$g#00" {
            result = fsm.feed(b);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(SessionError::ChecksumMismatch { .. })));
    }

    #[test]
    fn ctrl_c_is_unframed() {
        let mut fsm = RspFsm::new();
        assert!(matches!(fsm.feed(0x03).unwrap(), Some(RspFrame::CtrlC)));
    }

    #[test]
    fn parses_read_memory() {
        let mut codec = Codec::new();
        let cmd = parse_command(b"m7c00,4", &mut codec).unwrap();
        assert_eq!(cmd, Command::ReadMemory { addr: 0x7c00, len: 4 });
    }

    #[test]
    fn parses_write_memory_probe() {
        let mut codec = Codec::new();
        let cmd = parse_command(b"M1000,0:", &mut codec).unwrap();
        assert_eq!(cmd, Command::WriteMemory { addr: 0x1000, len: 0, data: Vec::new() });
    }

    #[test]
    fn parses_write_register_cs() {
        let mut codec = Codec::new();
        // register index 10 (CS) written in hex, i.e. "a".
        let cmd = parse_command(b"Pa=00010000", &mut codec).unwrap();
        assert_eq!(cmd, Command::WriteRegister { gdb_index: 10, value: 0x00000100 });
    }

    #[test]
    fn parses_breakpoint_kinds() {
        let mut codec = Codec::new();
        assert_eq!(
            parse_command(b"Z0,7c00,1", &mut codec).unwrap(),
            Command::SetInstrBreakpoint { addr: 0x7c00 }
        );
        assert_eq!(parse_command(b"Z3,7c00,1", &mut codec).unwrap(), Command::SetReadWatchpoint);
    }
}
