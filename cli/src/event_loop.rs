//! Single-threaded, edge-triggered readiness loop wiring the TCP/serial
//! transports into the bridge core's byte-reader entry points.

use std::io::{ErrorKind, Read, Write};
use std::net::SocketAddr;

use log::info;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use mio_serial::SerialPortBuilderExt;

use rsp_bridge::{Bridge, FatalError, FrameMode};

use crate::args::{Config, TargetSource};

const GDB: Token = Token(0);
const SERIAL: Token = Token(1);

const BAUD_RATE: u32 = 115_200;
const READ_BUF_LEN: usize = 4096;

enum GdbSlot {
    Listening(TcpListener),
    Connected(TcpStream),
    Closed,
}

enum SerialSlot {
    Device(mio_serial::SerialStream),
    Listening(TcpListener),
    Connected(TcpStream),
}

impl GdbSlot {
    fn writer(&mut self) -> Option<&mut dyn Write> {
        match self {
            GdbSlot::Connected(stream) => Some(stream),
            _ => None,
        }
    }
}

impl SerialSlot {
    fn writer(&mut self) -> Option<&mut dyn Write> {
        match self {
            SerialSlot::Device(port) => Some(port),
            SerialSlot::Connected(stream) => Some(stream),
            SerialSlot::Listening(_) => None,
        }
    }
}

/// Runs the bridge until a connected peer closes cleanly (exit code 0) or a
/// fatal error occurs.
pub fn run(config: Config) -> Result<(), FatalError> {
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(64);

    let gdb_addr: SocketAddr = format!("0.0.0.0:{}", config.gdb_port)
        .parse()
        .map_err(|e| FatalError::Message(format!("invalid gdb port: {e}")))?;
    let mut gdb_listener = TcpListener::bind(gdb_addr)?;
    poll.registry().register(&mut gdb_listener, GDB, Interest::READABLE)?;
    let mut gdb_slot = GdbSlot::Listening(gdb_listener);

    let mut serial_slot = match config.target {
        TargetSource::Device(path) => {
            info!("please turn on your debugged device and wait...");
            let mut port = mio_serial::new(path.to_string_lossy().into_owned(), BAUD_RATE)
                .open_native_async()
                .map_err(|e| FatalError::Message(format!("failed to open serial device: {e}")))?;
            poll.registry().register(&mut port, SERIAL, Interest::READABLE)?;
            SerialSlot::Device(port)
        }
        TargetSource::Socket { port } => {
            info!("please connect your serial device first...");
            let addr: SocketAddr = format!("0.0.0.0:{port}")
                .parse()
                .map_err(|e| FatalError::Message(format!("invalid serial port: {e}")))?;
            let mut listener = TcpListener::bind(addr)?;
            poll.registry().register(&mut listener, SERIAL, Interest::READABLE)?;
            SerialSlot::Listening(listener)
        }
    };
    info!("do not connect gdb yet!");

    let mut bridge = Bridge::new(FrameMode::Interrupt);
    let mut read_buf = [0u8; READ_BUF_LEN];

    'outer: loop {
        poll.poll(&mut events, None)?;
        for event in events.iter() {
            let done = match event.token() {
                GDB => handle_gdb_readable(&mut poll, &mut gdb_slot, &mut serial_slot, &mut bridge, &mut read_buf)?,
                SERIAL => handle_serial_readable(&mut poll, &mut serial_slot, &mut gdb_slot, &mut bridge, &mut read_buf)?,
                _ => unreachable!("no other tokens are registered"),
            };
            if done {
                break 'outer;
            }
        }
    }
    Ok(())
}

/// Returns `Ok(true)` when the loop should exit cleanly.
fn handle_gdb_readable(
    poll: &mut Poll,
    gdb_slot: &mut GdbSlot,
    serial_slot: &mut SerialSlot,
    bridge: &mut Bridge,
    read_buf: &mut [u8],
) -> Result<bool, FatalError> {
    if let GdbSlot::Listening(listener) = gdb_slot {
        let (mut stream, peer) = listener.accept()?;
        if !bridge.gdb_connect_allowed() {
            return Err(FatalError::Message(format!(
                "gdb connected from {peer} before the target produced its first stop frame"
            )));
        }
        poll.registry().deregister(listener)?;
        poll.registry().register(&mut stream, GDB, Interest::READABLE)?;
        info!("gdb connected from {peer}");
        bridge.on_gdb_connected();
        *gdb_slot = GdbSlot::Connected(stream);
        return Ok(false);
    }

    loop {
        let stream = match gdb_slot {
            GdbSlot::Connected(stream) => stream,
            _ => return Ok(false),
        };
        match stream.read(read_buf) {
            Ok(0) => {
                info!("gdb disconnected");
                bridge.on_gdb_disconnected();
                *gdb_slot = GdbSlot::Closed;
                return Ok(true);
            }
            Ok(n) => {
                let serial_out = serial_slot
                    .writer()
                    .ok_or_else(|| FatalError::Message("gdb sent bytes with no serial connection".to_string()))?;
                let mut gdb_out = Vec::new();
                bridge.feed_gdb_bytes(&read_buf[..n], serial_out, &mut gdb_out)?;
                if let GdbSlot::Connected(stream) = gdb_slot {
                    stream.write_all(&gdb_out)?;
                }
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e.into()),
        }
    }
}

fn handle_serial_readable(
    poll: &mut Poll,
    serial_slot: &mut SerialSlot,
    gdb_slot: &mut GdbSlot,
    bridge: &mut Bridge,
    read_buf: &mut [u8],
) -> Result<bool, FatalError> {
    if let SerialSlot::Listening(listener) = serial_slot {
        let (mut stream, peer) = listener.accept()?;
        poll.registry().deregister(listener)?;
        poll.registry().register(&mut stream, SERIAL, Interest::READABLE)?;
        info!("serial device connected from {peer}");
        bridge.on_serial_connected();
        *serial_slot = SerialSlot::Connected(stream);
        return Ok(false);
    }

    loop {
        let read_result = match serial_slot {
            SerialSlot::Device(port) => port.read(read_buf),
            SerialSlot::Connected(stream) => stream.read(read_buf),
            SerialSlot::Listening(_) => unreachable!("handled above"),
        };
        match read_result {
            Ok(0) => {
                info!("target disconnected");
                return Ok(true);
            }
            Ok(n) => {
                let mut serial_out = Vec::new();
                let gdb_out = gdb_slot.writer();
                match gdb_out {
                    Some(gdb_out) => bridge.feed_serial_bytes(&read_buf[..n], &mut serial_out, gdb_out)?,
                    None => {
                        let mut sink = Vec::new();
                        bridge.feed_serial_bytes(&read_buf[..n], &mut serial_out, &mut sink)?;
                    }
                }
                if !serial_out.is_empty() {
                    let writer = serial_slot
                        .writer()
                        .ok_or_else(|| FatalError::Message("serial event produced a reply with no serial connection".to_string()))?;
                    writer.write_all(&serial_out)?;
                }
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e.into()),
        }
    }
}
