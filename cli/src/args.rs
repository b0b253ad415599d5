//! Command-line argument parsing and validation.

use std::path::PathBuf;

use clap::Parser;

const DEFAULT_DEVICE: &str = "/dev/ttyUSB0";

#[derive(Debug, Parser)]
#[command(name = "rsp-bridge", about = "Bridges GDB's Remote Serial Protocol to a real-mode x86 debug stub")]
pub struct Cli {
    /// Reach the target over a TCP listener instead of a serial device.
    #[arg(short = 's', long = "socket")]
    pub socket: bool,

    /// Serial device path. Mutually exclusive with --socket.
    #[arg(short = 'd', long = "device")]
    pub device: Option<PathBuf>,

    /// Serial-socket listener port, only meaningful with --socket.
    #[arg(short = 'p', long = "serial-port", default_value_t = 2345)]
    pub serial_port: u16,

    /// Debugger (GDB) listener port.
    #[arg(short = 'g', long = "gdb-port", default_value_t = 1234)]
    pub gdb_port: u16,
}

/// Validated configuration derived from [`Cli`].
#[derive(Debug, Clone)]
pub enum TargetSource {
    Device(PathBuf),
    Socket { port: u16 },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub target: TargetSource,
    pub gdb_port: u16,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self, String> {
        if cli.socket && cli.device.is_some() {
            return Err("'-d' is incompatible with '-s'".to_string());
        }
        if cli.gdb_port == 0 {
            return Err("gdb port must be non-zero".to_string());
        }
        let target = if cli.socket {
            if cli.serial_port == 0 {
                return Err("serial port must be non-zero in socket mode".to_string());
            }
            TargetSource::Socket { port: cli.serial_port }
        } else {
            TargetSource::Device(cli.device.unwrap_or_else(|| PathBuf::from(DEFAULT_DEVICE)))
        };
        Ok(Config { target, gdb_port: cli.gdb_port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_device_with_socket_mode() {
        let cli = Cli { socket: true, device: Some(PathBuf::from("/dev/ttyUSB1")), serial_port: 2345, gdb_port: 1234 };
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn defaults_to_device_mode() {
        let cli = Cli { socket: false, device: None, serial_port: 2345, gdb_port: 1234 };
        let config = Config::from_cli(cli).unwrap();
        match config.target {
            TargetSource::Device(path) => assert_eq!(path, PathBuf::from(DEFAULT_DEVICE)),
            _ => panic!("expected device mode"),
        }
    }

    #[test]
    fn rejects_zero_gdb_port() {
        let cli = Cli { socket: false, device: None, serial_port: 2345, gdb_port: 0 };
        assert!(Config::from_cli(cli).is_err());
    }
}
