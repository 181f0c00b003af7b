//! Serial transport for the door actuator.
//!
//! The wire protocol is two single-byte ASCII commands. The encoding
//! lives entirely in [`DoorCommand::wire_byte`]; control logic above
//! this crate only ever sees the typed variants.

use nix::sys::termios::{self, BaudRate, SetArg, SpecialCharacterIndices};
use std::fs::File;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ActuatorError {
    #[error("actuator device not found: {0}")]
    DeviceNotFound(String),
    #[error("failed to open actuator device: {0}")]
    Open(std::io::Error),
    #[error("terminal setup failed: {0}")]
    Termios(#[from] nix::Error),
    #[error("unsupported baud rate: {0}")]
    UnsupportedBaud(u32),
    #[error("write failed: {0}")]
    Write(std::io::Error),
    #[error("actuator disconnected")]
    Disconnected,
}

/// Typed actuator command. `Open` raises the latch, `Close` drops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorCommand {
    Open,
    Close,
}

impl DoorCommand {
    /// Single-byte wire encoding understood by the door controller
    /// firmware: `'O'` opens, `'F'` closes.
    pub fn wire_byte(self) -> u8 {
        match self {
            DoorCommand::Open => b'O',
            DoorCommand::Close => b'F',
        }
    }
}

/// Byte-stream command channel to the door.
///
/// Implementations own exactly one connection; callers are expected
/// to serialize access (the door controller holds the write gate).
pub trait Actuator: Send {
    fn send(&mut self, command: DoorCommand) -> Result<(), ActuatorError>;
    /// Tear down and re-establish the connection.
    fn reconnect(&mut self) -> Result<(), ActuatorError>;
}

/// Actuator over a serial character device (USB-serial door firmware).
#[derive(Debug)]
pub struct SerialActuator {
    port: File,
    device: PathBuf,
    baud: u32,
    read_timeout: Duration,
    settle_delay: Duration,
}

impl SerialActuator {
    /// Open the serial device, put it in raw mode at `baud`, then
    /// wait `settle_delay` before the first command is trusted — the
    /// firmware resets on port open and drops anything sent while it
    /// boots.
    pub fn connect(
        device: &Path,
        baud: u32,
        read_timeout: Duration,
        settle_delay: Duration,
    ) -> Result<Self, ActuatorError> {
        let port = open_port(device, baud, read_timeout)?;
        tracing::info!(device = %device.display(), baud, "actuator connected");

        std::thread::sleep(settle_delay);

        Ok(Self {
            port,
            device: device.to_path_buf(),
            baud,
            read_timeout,
            settle_delay,
        })
    }
}

impl Actuator for SerialActuator {
    fn send(&mut self, command: DoorCommand) -> Result<(), ActuatorError> {
        self.port
            .write_all(&[command.wire_byte()])
            .and_then(|_| self.port.flush())
            .map_err(ActuatorError::Write)?;
        tracing::debug!(?command, "actuator command sent");
        Ok(())
    }

    fn reconnect(&mut self) -> Result<(), ActuatorError> {
        tracing::info!(device = %self.device.display(), "reconnecting actuator");
        self.port = open_port(&self.device, self.baud, self.read_timeout)?;
        std::thread::sleep(self.settle_delay);
        Ok(())
    }
}

fn open_port(device: &Path, baud: u32, read_timeout: Duration) -> Result<File, ActuatorError> {
    if !device.exists() {
        return Err(ActuatorError::DeviceNotFound(device.display().to_string()));
    }

    // O_NONBLOCK so open() itself cannot hang on a modem line;
    // blocking mode is restored once the port is configured.
    let port = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
        .open(device)
        .map_err(ActuatorError::Open)?;

    let mut tio = termios::tcgetattr(&port)?;
    termios::cfmakeraw(&mut tio);
    termios::cfsetspeed(&mut tio, baud_rate(baud)?)?;
    // Bounded reads: VMIN=0 with VTIME in deciseconds.
    let vtime = (read_timeout.as_millis() / 100).clamp(1, u8::MAX as u128) as u8;
    tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    tio.control_chars[SpecialCharacterIndices::VTIME as usize] = vtime;
    termios::tcsetattr(&port, SetArg::TCSANOW, &tio)?;

    // Back to blocking writes.
    let flags = unsafe { libc::fcntl(port.as_raw_fd(), libc::F_GETFL) };
    if flags >= 0 {
        unsafe { libc::fcntl(port.as_raw_fd(), libc::F_SETFL, flags & !libc::O_NONBLOCK) };
    }

    Ok(port)
}

fn baud_rate(baud: u32) -> Result<BaudRate, ActuatorError> {
    match baud {
        9600 => Ok(BaudRate::B9600),
        19200 => Ok(BaudRate::B19200),
        38400 => Ok(BaudRate::B38400),
        57600 => Ok(BaudRate::B57600),
        115200 => Ok(BaudRate::B115200),
        other => Err(ActuatorError::UnsupportedBaud(other)),
    }
}
