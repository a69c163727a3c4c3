//! Request/response access to the Lua RTOS shell.
//!
//! The shell is the single consumer of the inspector's byte queue and the
//! only writer of the link. Every read goes through [`Shell::read_byte`],
//! which either blocks indefinitely or races the queue against the current
//! timeout.
//!
//! A command is written with a CRLF terminator. The board echoes it back as
//! the first response line, prints its output and finishes with the prompt:
//!
//! ```text
//! host:  print(1+1)\r\n
//! board: print(1+1)\r\n     <- echo, must match verbatim
//! board: 2\r\n              <- body
//! board: / >                <- prompt, not part of the body
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace};
use regex::Regex;

use crate::error::{Error, Result};
use crate::inspector::SessionFlags;
use crate::link::Link;

/// Quiet period before [`Shell::drain`] discards queued bytes.
pub const DRAIN_QUIET: Duration = Duration::from_millis(200);

/// Line terminator for interactive commands.
pub const COMMAND_EOL: &str = "\r\n";

/// Command-side view of the board console.
pub struct Shell {
    link: Link,
    rx: Receiver<u8>,
    flags: Arc<SessionFlags>,
    timeout: Option<Duration>,
    prompt: Regex,
}

impl Shell {
    /// Wrap the link and the consumer end of the inspector queue.
    pub fn new(link: Link, rx: Receiver<u8>, flags: Arc<SessionFlags>) -> Self {
        Self {
            link,
            rx,
            flags,
            timeout: None,
            prompt: Regex::new(r"^/.*>.*$").expect("static prompt pattern"),
        }
    }

    /// The underlying link.
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Mutable access to the underlying link.
    pub fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }

    /// Flags shared with the inspector.
    pub fn flags(&self) -> &Arc<SessionFlags> {
        &self.flags
    }

    /// Current read timeout; `None` waits forever.
    pub fn current_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Bound every subsequent read by `timeout`.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    /// Make subsequent reads wait forever.
    pub fn no_timeout(&mut self) {
        self.timeout = None;
    }

    /// Use `timeout` until the returned guard drops, then restore the
    /// previous value.
    pub fn with_timeout(&mut self, timeout: Duration) -> TimeoutScope<'_> {
        let previous = self.timeout.replace(timeout);
        TimeoutScope {
            shell: self,
            previous,
        }
    }

    /// Write raw bytes to the board.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.link.write(bytes)
    }

    /// Read one byte from the queue.
    pub fn read_byte(&mut self) -> Result<u8> {
        match self.timeout {
            Some(timeout) => self.rx.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => {
                    Error::Timeout(format!("no data within {}ms", timeout.as_millis()))
                },
                RecvTimeoutError::Disconnected => Error::LinkLost,
            }),
            None => self.rx.recv().map_err(|_| Error::LinkLost),
        }
    }

    /// Read one byte, giving up at `deadline` regardless of the timeout.
    pub fn read_byte_before(&mut self, deadline: Instant) -> Result<u8> {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(Error::Timeout("deadline reached".into()));
        }
        self.rx.recv_timeout(left).map_err(|e| match e {
            RecvTimeoutError::Timeout => Error::Timeout("deadline reached".into()),
            RecvTimeoutError::Disconnected => Error::LinkLost,
        })
    }

    /// Read one line. LF terminates it and CR is dropped.
    pub fn read_line(&mut self) -> Result<String> {
        let mut line = Vec::new();
        loop {
            match self.read_byte()? {
                b'\n' => break,
                b'\r' => {},
                b => line.push(b),
            }
        }
        let line = String::from_utf8_lossy(&line).into_owned();
        trace!("Line: {line}");
        Ok(line)
    }

    /// Read one line, giving up at `deadline`.
    pub fn read_line_before(&mut self, deadline: Instant) -> Result<String> {
        let mut line = Vec::new();
        loop {
            match self.read_byte_before(deadline)? {
                b'\n' => break,
                b'\r' => {},
                b => line.push(b),
            }
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Wait for the console to settle, then discard everything queued.
    pub fn drain(&mut self) {
        thread::sleep(DRAIN_QUIET);
        let discarded = self.discard_pending();
        if discarded > 0 {
            trace!("Drained {discarded} bytes");
        }
    }

    /// Discard everything currently queued without waiting.
    pub fn discard_pending(&mut self) -> usize {
        let mut discarded = 0;
        loop {
            match self.rx.try_recv() {
                Ok(_) => discarded += 1,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        discarded
    }

    /// Whether `line` is the shell prompt.
    pub fn is_prompt(&self, line: &str) -> bool {
        self.prompt.is_match(line)
    }

    /// Send `command` and collect its output up to the prompt.
    ///
    /// Output lines are joined with CRLF. If the echo does not match the
    /// command the result is empty.
    pub fn send_command(&mut self, command: &str) -> Result<String> {
        debug!("Command: {command}");
        self.write(format!("{command}{COMMAND_EOL}").as_bytes())?;

        let echo = self.read_line()?;
        if echo != command {
            debug!("Echo mismatch: expected {command:?}, got {echo:?}");
            return Ok(String::new());
        }

        let mut response = String::new();
        loop {
            let line = self.read_line()?;
            if self.is_prompt(&line) {
                return Ok(response);
            }
            if !response.is_empty() {
                response.push_str(COMMAND_EOL);
            }
            response.push_str(&line);
        }
    }

    /// Send `command`, then drain whatever it left on the console.
    pub fn run_command(&mut self, command: &str) -> Result<String> {
        let response = self.send_command(command)?;
        self.drain();
        Ok(response)
    }

    /// Close the link. The inspector stops and the queue disconnects.
    pub fn close(&mut self) {
        self.link.close();
    }
}

/// Scoped read timeout, restored when dropped.
#[must_use = "the previous timeout is restored as soon as the scope is dropped"]
pub struct TimeoutScope<'a> {
    shell: &'a mut Shell,
    previous: Option<Duration>,
}

impl Deref for TimeoutScope<'_> {
    type Target = Shell;

    fn deref(&self) -> &Shell {
        self.shell
    }
}

impl DerefMut for TimeoutScope<'_> {
    fn deref_mut(&mut self) -> &mut Shell {
        self.shell
    }
}

impl Drop for TimeoutScope<'_> {
    fn drop(&mut self) {
        self.shell.timeout = self.previous;
    }
}
