//! Byte-level constants for the serial wire protocol spoken to the target
//! stub. Shared between the outgoing command encoder and the incoming
//! response framer since several tags are used in both directions.

/// Out: run one instruction. In: prefixes a stop frame.
pub const TAG_SINGLE_STEP: u8 = 0xC8;
/// Out: resume execution until a breakpoint, watchpoint or error traps.
pub const TAG_CONTINUE: u8 = 0xE8;
/// Out: `addr:u32 len:u16`. In: prefixes `len` raw bytes.
pub const TAG_READ_MEM: u8 = 0xD8;
/// Out: `addr:u32 len:u16 data[len]`.
pub const TAG_WRITE_MEM: u8 = 0xF8;
/// Out: `addr:u32`, install an instruction breakpoint.
pub const TAG_ADD_INSTR_BREAK: u8 = 0xA8;
/// Out: remove the single instruction breakpoint.
pub const TAG_REMOVE_INSTR_BREAK: u8 = 0xB8;
/// Out: `kind:u8 addr:u32`, install a data watchpoint.
pub const TAG_ADD_HW_WATCH: u8 = 0xB7;
/// Out: remove the single data watchpoint.
pub const TAG_REMOVE_HW_WATCH: u8 = 0xC7;
/// Out: `target_index:u8 value:u32`, write one register.
pub const TAG_WRITE_REGISTER: u8 = 0xA7;
/// In: acknowledges a register or memory write.
pub const TAG_OK: u8 = 0x04;

/// Watchpoint kind byte for `TAG_ADD_HW_WATCH`.
pub const WATCH_WRITE: u8 = 0x01;
pub const WATCH_ACCESS: u8 = 0x03;

/// Ctrl-C, sent unframed on either wire.
pub const CTRL_C: u8 = 0x03;
