//! Reset and ready-wait handshake.
//!
//! After the reset pulse the console goes through the ROM banner, the
//! bootloader and the Lua RTOS banner. The host answers the Lua RTOS banner
//! with Ctrl-D to skip the boot scripts and waits for the board to confirm:
//!
//! ```text
//! AwaitingPowerOnReset --rst:..(POWERON_RESET),boot:--> AwaitingRtosBanner
//! AwaitingRtosBanner   --Booting Lua RTOS...-- (^D) --> AwaitingReadyBanner
//! AwaitingReadyBanner  --Lua RTOS-boot-scripts-aborted-ESP32--> Ready
//! any                  --image/flash failure--> Failed
//! ```

use std::time::{Duration, Instant};

use log::{debug, info, trace};
use regex::Regex;

use crate::error::{BootFailure, Error, Result};
use crate::event::{Event, EventSink};
use crate::protocol::Shell;

/// Byte that tells Lua RTOS to skip its boot scripts.
pub const CTRL_D: u8 = 0x04;

/// Default bound on the whole ready-wait.
pub const DEFAULT_BOOT_TIMEOUT: Duration = Duration::from_secs(10);

const CORRUPTED_IMAGE: &str = "boot: Failed to verify app image";
const FLASH_FALLBACK: &str = "Falling back to built-in command interpreter.";
const RTOS_BANNER: &str = "Booting Lua RTOS...";
const READY_BANNER: &str = "Lua RTOS-boot-scripts-aborted-ESP32";

/// Handshake progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    /// No reset issued yet.
    Idle,
    /// Reset issued, waiting for the power-on banner.
    AwaitingPowerOnReset,
    /// Waiting for the Lua RTOS banner.
    AwaitingRtosBanner,
    /// Ctrl-D sent, waiting for confirmation.
    AwaitingReadyBanner,
    /// The board is at the prompt.
    Ready,
    /// The board cannot boot.
    Failed(BootFailure),
}

/// What the host must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeAction {
    /// Nothing.
    None,
    /// Send Ctrl-D and turn console passthrough back on.
    AbortBootScripts,
}

/// Line-driven handshake state machine.
#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
    power_on: Regex,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    /// New machine in [`HandshakeState::Idle`].
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Idle,
            power_on: Regex::new(r"^rst:.*\(POWERON_RESET\),boot:").expect("static boot pattern"),
        }
    }

    /// Current state.
    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    /// Record that the reset pulse was sent.
    pub fn reset_sent(&mut self) {
        self.state = HandshakeState::AwaitingPowerOnReset;
    }

    /// Whether the machine reached `Ready` or `Failed`.
    pub fn is_done(&self) -> bool {
        matches!(self.state, HandshakeState::Ready | HandshakeState::Failed(_))
    }

    /// Feed one console line.
    pub fn feed(&mut self, line: &str) -> HandshakeAction {
        if self.is_done() {
            return HandshakeAction::None;
        }

        if line.contains(CORRUPTED_IMAGE) {
            self.state = HandshakeState::Failed(BootFailure::CorruptedFirmware);
            return HandshakeAction::None;
        }
        if line == FLASH_FALLBACK {
            self.state = HandshakeState::Failed(BootFailure::FlashError);
            return HandshakeAction::None;
        }

        match self.state {
            HandshakeState::Idle | HandshakeState::AwaitingPowerOnReset
                if self.power_on.is_match(line) =>
            {
                self.state = HandshakeState::AwaitingRtosBanner;
                HandshakeAction::None
            },
            HandshakeState::AwaitingRtosBanner if line.contains(RTOS_BANNER) => {
                self.state = HandshakeState::AwaitingReadyBanner;
                HandshakeAction::AbortBootScripts
            },
            HandshakeState::AwaitingReadyBanner if line == READY_BANNER => {
                self.state = HandshakeState::Ready;
                HandshakeAction::None
            },
            _ => HandshakeAction::None,
        }
    }
}

/// Pulse reset and wait until the board reaches the prompt.
///
/// Console passthrough is off until the Lua RTOS banner and restored on
/// every exit path. The whole wait is bounded by `timeout`.
pub fn reset_board(shell: &mut Shell, sink: &dyn EventSink, timeout: Duration) -> Result<()> {
    shell.drain();
    let _mute = shell.flags().mute_console();

    shell.link_mut().pulse_reset()?;
    let mut handshake = Handshake::new();
    handshake.reset_sent();

    wait_for_ready(shell, &mut handshake, sink, timeout)?;
    shell.drain();
    info!("Board is ready");
    Ok(())
}

/// Run `handshake` against console lines until it finishes.
pub fn wait_for_ready(
    shell: &mut Shell,
    handshake: &mut Handshake,
    sink: &dyn EventSink,
    timeout: Duration,
) -> Result<()> {
    debug!("Waiting for ready (up to {timeout:?})");
    let deadline = Instant::now() + timeout;

    loop {
        let line = shell.read_line_before(deadline).map_err(|e| match e {
            Error::Timeout(_) => Error::Timeout(format!(
                "board not ready after {}ms ({:?})",
                timeout.as_millis(),
                handshake.state()
            )),
            other => other,
        })?;
        trace!("Boot: {line}");

        if handshake.feed(&line) == HandshakeAction::AbortBootScripts {
            shell.write(&[CTRL_D])?;
            shell.flags().set_console(true);
        }

        match handshake.state() {
            HandshakeState::Ready => return Ok(()),
            HandshakeState::Failed(failure) => {
                let failure = *failure;
                sink.emit(Event::update(failure.message()));
                return Err(Error::Boot(failure));
            },
            _ => {},
        }
    }
}
