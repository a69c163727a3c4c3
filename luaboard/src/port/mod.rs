//! Port abstraction for the board's serial console.
//!
//! The protocol layers never touch `serialport` directly. They talk to a
//! [`Port`], which lets the same code run against a native serial device or
//! an in-memory port in tests.
//!
//! ```text
//! +------------------+      +------------------+
//! |  Shell / chunked |      |    Inspector     |
//! |   (writer half)  |      |  (reader half)   |
//! +--------+---------+      +--------+---------+
//!          |                         |
//!          v                         v
//! +--------+-------------------------+---------+
//! |                 Port trait                 |
//! +--------+-------------------------+---------+
//!          |                         |
//!          v                         v
//! +--------+---------+      +--------+---------+
//! | NativePort       |      | in-memory port   |
//! |  (serialport)    |      |   (tests only)   |
//! +------------------+      +------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Baud rate used by every Lua RTOS console session.
pub const CONSOLE_BAUD: u32 = 115_200;

/// Poll period of the reader half; bounds how long a closed link may block.
pub const READ_POLL: Duration = Duration::from_millis(50);

/// Serial line configuration.
///
/// Lua RTOS consoles always run at 115200 8N1 without flow control, so the
/// only field callers normally change is the device name.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout of the underlying handle.
    pub timeout: Duration,
}

impl SerialConfig {
    /// Create the fixed console configuration for a device.
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate: CONSOLE_BAUD,
            timeout: READ_POLL,
        }
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// Unified port trait for the board console.
///
/// Reads are expected to time out periodically (`ErrorKind::TimedOut`) rather
/// than block forever, so a reader can notice that the link was closed.
pub trait Port: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Set RTS (Request To Send) pin state.
    fn set_rts(&mut self, level: bool) -> Result<()>;

    /// Open a second handle on the same device, used by the reader thread.
    fn try_clone_port(&self) -> Result<Box<dyn Port>>;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Trait for listing available serial ports.
///
/// This is separated from `Port` because it's a static operation that
/// doesn't require an open port instance.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
