//! Incremental framer for the target-facing serial byte stream.

use byteorder::{ByteOrder, LittleEndian};

use crate::addr::{StopFrame, StopReason, STOP_FRAME_LEN};
use crate::error::SessionError;
use crate::wire::{TAG_OK, TAG_READ_MEM, TAG_SINGLE_STEP};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    InStop,
    InMemRead,
}

/// One complete unit handed back by the framer.
pub enum SerialEvent {
    Stop(StopFrame),
    MemRead(Vec<u8>),
    Ok,
}

/// Byte-at-a-time parser for the three shapes the stub ever replies with: a
/// bare ack, a fixed-length stop frame, or a variable-length memory dump.
/// The memory-read length isn't carried on the wire, so the caller supplies
/// it each time based on the single outstanding `m` request it issued.
pub struct SerialFsm {
    state: State,
    stop_buf: Vec<u8>,
    mem_buf: Vec<u8>,
}

impl SerialFsm {
    pub fn new() -> Self {
        SerialFsm { state: State::Start, stop_buf: Vec::with_capacity(STOP_FRAME_LEN), mem_buf: Vec::new() }
    }

    pub fn reset(&mut self) {
        self.state = State::Start;
        self.stop_buf.clear();
        self.mem_buf.clear();
    }

    pub fn feed(&mut self, byte: u8, pending_mem_len: u16) -> Result<Option<SerialEvent>, SessionError> {
        match self.state {
            State::Start => match byte {
                TAG_SINGLE_STEP => {
                    self.state = State::InStop;
                    self.stop_buf.clear();
                    Ok(None)
                }
                TAG_READ_MEM => {
                    self.state = State::InMemRead;
                    self.mem_buf.clear();
                    Ok(None)
                }
                TAG_OK => Ok(Some(SerialEvent::Ok)),
                _ => Ok(None),
            },
            State::InStop => {
                self.stop_buf.push(byte);
                if self.stop_buf.len() == STOP_FRAME_LEN {
                    self.state = State::Start;
                    let frame = decode_stop_frame(&self.stop_buf)?;
                    Ok(Some(SerialEvent::Stop(frame)))
                } else {
                    Ok(None)
                }
            }
            State::InMemRead => {
                self.mem_buf.push(byte);
                if self.mem_buf.len() == pending_mem_len as usize {
                    self.state = State::Start;
                    Ok(Some(SerialEvent::MemRead(std::mem::take(&mut self.mem_buf))))
                } else {
                    Ok(None)
                }
            }
        }
    }
}

fn decode_stop_frame(buf: &[u8]) -> Result<StopFrame, SessionError> {
    debug_assert_eq!(buf.len(), STOP_FRAME_LEN);
    let frame = StopFrame {
        edi: LittleEndian::read_u32(&buf[0..4]),
        esi: LittleEndian::read_u32(&buf[4..8]),
        ebp: LittleEndian::read_u32(&buf[8..12]),
        esp: LittleEndian::read_u32(&buf[12..16]),
        ebx: LittleEndian::read_u32(&buf[16..20]),
        edx: LittleEndian::read_u32(&buf[20..24]),
        ecx: LittleEndian::read_u32(&buf[24..28]),
        eax: LittleEndian::read_u32(&buf[28..32]),
        gs: LittleEndian::read_u16(&buf[32..34]),
        fs: LittleEndian::read_u16(&buf[34..36]),
        es: LittleEndian::read_u16(&buf[36..38]),
        ds: LittleEndian::read_u16(&buf[38..40]),
        ss: LittleEndian::read_u16(&buf[40..42]),
        eip: LittleEndian::read_u16(&buf[42..44]),
        cs: LittleEndian::read_u16(&buf[44..46]),
        eflags: LittleEndian::read_u16(&buf[46..48]),
        stop_reason: StopReason::from_byte(buf[48])?,
        stop_addr: LittleEndian::read_u32(&buf[49..53]),
        saved_insns: [buf[53], buf[54], buf[55], buf[56]],
    };
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop_frame_bytes() -> Vec<u8> {
        let mut buf = vec![0u8; STOP_FRAME_LEN];
        LittleEndian::write_u32(&mut buf[12..16], 0x1000); // esp
        LittleEndian::write_u16(&mut buf[42..44], 0x7C00); // eip
        buf[48] = 10; // stop_reason: normal
        LittleEndian::write_u32(&mut buf[49..53], 0x7C00); // stop_addr
        buf[53..57].copy_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
        buf
    }

    #[test]
    fn decodes_full_stop_frame() {
        let mut fsm = SerialFsm::new();
        let mut event = None;
        event = event.or_else(|| {
            fsm.feed(TAG_SINGLE_STEP, 0).unwrap();
            None
        });
        for &b in &stop_frame_bytes() {
            if let Some(e) = fsm.feed(b, 0).unwrap() {
                event = Some(e);
            }
        }
        match event.unwrap() {
            SerialEvent::Stop(frame) => {
                assert_eq!(frame.esp, 0x1000);
                assert_eq!(frame.eip, 0x7C00);
                assert_eq!(frame.saved_insns, [0xAA, 0xBB, 0xCC, 0xDD]);
            }
            _ => panic!("expected a stop event"),
        }
    }

    #[test]
    fn decodes_memory_read_of_requested_length() {
        let mut fsm = SerialFsm::new();
        fsm.feed(TAG_READ_MEM, 4).unwrap();
        let mut event = None;
        for &b in &[0x11, 0x22, 0x33, 0x44] {
            event = fsm.feed(b, 4).unwrap();
        }
        match event.unwrap() {
            SerialEvent::MemRead(data) => assert_eq!(data, vec![0x11, 0x22, 0x33, 0x44]),
            _ => panic!("expected a memory read event"),
        }
    }

    #[test]
    fn decodes_bare_ack() {
        let mut fsm = SerialFsm::new();
        assert!(matches!(fsm.feed(TAG_OK, 0).unwrap(), Some(SerialEvent::Ok)));
    }
}
