//! The physical link to an attached board.
//!
//! A [`Link`] is the writer half and the owner of the device. The inspector
//! thread holds a [`LinkReader`], a second handle on the same device that
//! shares the link's closed flag. Closing the link flips the flag, so a reader
//! blocked in a poll returns [`Error::LinkLost`] within one poll period.

use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use log::{debug, info, trace};

use crate::error::{Error, Result};
use crate::port::Port;

/// Hold time of each level of the reset pulse.
pub const RESET_PULSE: Duration = Duration::from_millis(10);

/// Writer half and owner of the serial connection.
pub struct Link {
    port: Box<dyn Port>,
    closed: Arc<AtomicBool>,
}

impl Link {
    /// Open the console of `device` with the fixed line configuration.
    #[cfg(feature = "native")]
    pub fn open(device: &str) -> Result<Self> {
        let port = crate::port::NativePort::open_console(device)
            .map_err(|e| Error::Attach(format!("{device}: {e}")))?;
        Ok(Self::from_port(Box::new(port)))
    }

    /// Wrap an already opened port.
    pub fn from_port(port: Box<dyn Port>) -> Self {
        Self {
            port,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Device name of the link.
    pub fn name(&self) -> &str {
        self.port.name()
    }

    /// Create the reader half for the inspector thread.
    pub fn reader(&self) -> Result<LinkReader> {
        Ok(LinkReader {
            port: self.port.try_clone_port()?,
            closed: Arc::clone(&self.closed),
        })
    }

    /// Whether [`Link::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Write raw bytes to the board.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::LinkLost);
        }
        trace!("TX {} bytes", bytes.len());
        self.port.write_all_bytes(bytes).map_err(|e| {
            debug!("Write failed: {e}");
            Error::LinkLost
        })
    }

    /// Toggle RTS low, high, low to trigger a hardware reset.
    pub fn pulse_reset(&mut self) -> Result<()> {
        debug!("Pulsing reset on {}", self.name());
        self.port.set_rts(false)?;
        thread::sleep(RESET_PULSE);
        self.port.set_rts(true)?;
        thread::sleep(RESET_PULSE);
        self.port.set_rts(false)?;
        Ok(())
    }

    /// Close the link. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Closing serial port {}", self.name());
        if let Err(e) = self.port.close() {
            debug!("Error while closing port: {e}");
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}

/// Reader half of a [`Link`], owned by the inspector thread.
pub struct LinkReader {
    port: Box<dyn Port>,
    closed: Arc<AtomicBool>,
}

impl LinkReader {
    /// Whether the owning link has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Read exactly one byte, polling until data arrives or the link closes.
    pub fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        loop {
            if self.is_closed() {
                return Err(Error::LinkLost);
            }

            match self.port.read(&mut buf) {
                Ok(1) => return Ok(buf[0]),
                Ok(_) => return Err(Error::LinkLost),
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {},
                Err(e) => {
                    debug!("Read failed: {e}");
                    return Err(Error::LinkLost);
                },
            }
        }
    }
}

impl Drop for LinkReader {
    fn drop(&mut self) {
        let _ = self.port.close();
    }
}
