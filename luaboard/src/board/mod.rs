//! Board session.
//!
//! A [`Board`] owns one attached board: the link, the inspector thread and
//! the shell on top of the byte queue. Every operation runs on the caller's
//! thread and takes `&mut self`, so commands on one board never interleave.

pub mod boot;
pub mod host;
pub mod info;
pub mod provision;
pub mod upgrade;

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::error::{Error, Result};
use crate::event::Event;
use crate::inspector::{Inspector, SessionFlags};
use crate::link::Link;
use crate::port::Port;
use crate::protocol::{ChunkedTransfer, DirEntry, Shell, TransferConfig};
use crate::services::Services;

pub use boot::{Handshake, HandshakeAction, HandshakeState};
pub use host::BoardHost;
pub use info::{BoardInfo, BoardModel};

/// How long detach waits for the inspector thread.
const INSPECTOR_STOP: Duration = Duration::from_secs(1);

/// Command that loads the identification script.
const INFO_COMMAND: &str = r#"dofile("/_info.lua")"#;

/// Session timeouts.
#[derive(Debug, Clone)]
pub struct BoardOptions {
    /// Bound on the whole reset handshake.
    pub boot_timeout: Duration,
    /// Read timeout of the info query.
    pub info_timeout: Duration,
    /// Transfer timeouts.
    pub transfer: TransferConfig,
}

impl Default for BoardOptions {
    fn default() -> Self {
        Self {
            boot_timeout: boot::DEFAULT_BOOT_TIMEOUT,
            info_timeout: Duration::from_millis(2000),
            transfer: TransferConfig::default(),
        }
    }
}

/// An attached board.
pub struct Board {
    shell: Shell,
    inspector: Inspector,
    flags: Arc<SessionFlags>,
    services: Services,
    options: BoardOptions,
    device: String,
    info: Option<BoardInfo>,
    info_text: String,
    new_build: bool,
    attached: bool,
}

impl Board {
    /// Open `device`, reset and provision the board.
    #[cfg(feature = "native")]
    pub fn attach(device: &str, options: BoardOptions, services: Services) -> Result<Self> {
        info!("Attaching board on {device}");
        let link = Link::open(device)?;
        Self::attach_link(link, options, services)
    }

    /// Attach over an already opened port.
    pub fn attach_port(port: Box<dyn Port>, options: BoardOptions, services: Services) -> Result<Self> {
        Self::attach_link(Link::from_port(port), options, services)
    }

    fn attach_link(link: Link, options: BoardOptions, services: Services) -> Result<Self> {
        let device = link.name().to_string();
        let flags = Arc::new(SessionFlags::default());
        let (inspector, rx) = Inspector::spawn(
            link.reader()?,
            Arc::clone(&flags),
            Arc::clone(&services.sink),
        )?;

        let mut board = Self {
            shell: Shell::new(link, rx, Arc::clone(&flags)),
            inspector,
            flags,
            services,
            options,
            device,
            info: None,
            info_text: String::new(),
            new_build: false,
            attached: false,
        };

        if let Err(e) = board.reset(true) {
            warn!("Attach failed: {e}");
            board.shutdown();
            return Err(match e {
                Error::Attach(_) => e,
                other => Error::Attach(format!("{}: {other}", board.device)),
            });
        }

        board.attached = true;
        board.services.sink.emit(Event::Attached);
        info!("Board attached on {}", board.device);
        Ok(board)
    }

    /// Close the link and stop the inspector. Safe to call more than once.
    pub fn detach(&mut self) {
        if !self.attached {
            self.shutdown();
            return;
        }
        info!("Detaching board on {}", self.device);
        self.attached = false;
        self.shutdown();
        self.services.sink.emit(Event::Detached);
    }

    fn shutdown(&mut self) {
        self.shell.close();
        self.inspector.join_timeout(INSPECTOR_STOP);
    }

    /// Whether the link is still up.
    pub fn is_alive(&self) -> bool {
        !self.shell.link().is_closed() && !self.inspector.is_finished()
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.shell.link().is_closed() {
            return Err(Error::NotAttached);
        }
        if self.inspector.is_finished() {
            return Err(Error::LinkLost);
        }
        Ok(())
    }

    /// Device name.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Parsed board identification, if the board reported one.
    pub fn info(&self) -> Option<&BoardInfo> {
        self.info.as_ref()
    }

    /// Identification text as reported, trailing commas removed.
    pub fn info_text(&self) -> &str {
        &self.info_text
    }

    /// Board model, if known.
    pub fn model(&self) -> Option<BoardModel> {
        self.info.as_ref().map(BoardInfo::model)
    }

    /// Whether a newer firmware build than the installed one exists.
    pub fn new_build(&self) -> bool {
        self.new_build
    }

    /// Session flags shared with the inspector.
    pub fn flags(&self) -> &Arc<SessionFlags> {
        &self.flags
    }

    /// Reset the board, optionally provision it, and refresh its info.
    pub fn reset(&mut self, provisioning: bool) -> Result<()> {
        self.ensure_alive()?;
        let sink = Arc::clone(&self.services.sink);
        boot::reset_board(&mut self.shell, sink.as_ref(), self.options.boot_timeout)?;

        if provisioning {
            let packages = Arc::clone(&self.services.packages);
            provision::provision(&mut self.shell, sink.as_ref(), packages.as_ref())?;
        }

        self.refresh_info()
    }

    fn refresh_info(&mut self) -> Result<()> {
        let text = {
            let _mute = self.flags.mute_console();
            let mut shell = self.shell.with_timeout(self.options.info_timeout);
            match shell.send_command(INFO_COMMAND) {
                Ok(text) => info::sanitize(&text),
                Err(e) if e.is_timeout() => {
                    warn!("Board did not report its info");
                    String::new()
                },
                Err(e) => return Err(e),
            }
        };

        self.new_build = false;
        self.info = match BoardInfo::parse(&text) {
            Ok(info) => Some(info),
            Err(e) => {
                if !text.is_empty() {
                    warn!("{e}");
                }
                None
            },
        };
        self.info_text = text;

        if let Some(info) = &self.info {
            let model = info.model();
            if let Some(latest) = self.services.builds.latest_commit(&model) {
                if latest != info.commit {
                    info!("New firmware available for {model}: {latest}");
                    self.new_build = true;
                }
            }
        }
        Ok(())
    }

    /// Read a file from the board. `None` if the board did not answer.
    pub fn read_file(&mut self, path: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_alive()?;
        self.transfer().read_file(path)
    }

    /// Write a file to the board. `false` if the board did not confirm.
    pub fn write_file(&mut self, path: &str, data: &[u8]) -> Result<bool> {
        self.ensure_alive()?;
        self.transfer().write_file(path, data)
    }

    /// Stream code to the interpreter.
    pub fn run_code(&mut self, code: &[u8]) -> Result<()> {
        self.ensure_alive()?;
        self.transfer().run_code(code)
    }

    /// List a directory on the board.
    pub fn list_dir(&mut self, path: &str) -> Result<Vec<DirEntry>> {
        self.ensure_alive()?;
        self.transfer().list_dir(path)
    }

    /// Run a shell command and return its output.
    pub fn run_command(&mut self, command: &str) -> Result<String> {
        self.ensure_alive()?;
        self.shell.run_command(command)
    }

    /// Reset the board, install `code` at `path` as the autorun program and
    /// start it.
    ///
    /// Returns `false` if an upload was not confirmed; the program is then
    /// not started.
    pub fn run_program(&mut self, path: &str, code: &[u8]) -> Result<bool> {
        {
            let _quiet = self.flags.quiet_boot();
            self.reset(false)?;
        }

        let _mute = self.flags.mute_console();
        let autorun = format!("dofile(\"{path}\")\r\n");
        if !self.transfer().write_file("/autorun.lua", autorun.as_bytes())? {
            return Ok(false);
        }
        if !self.transfer().write_file(path, code)? {
            return Ok(false);
        }

        self.shell.write(
            format!("require(\"block\");wcBlock.delevepMode=true;dofile(\"{path}\")\r").as_bytes(),
        )?;
        self.shell.drain();
        Ok(true)
    }

    /// Discard console bytes nobody is waiting for.
    pub fn discard_pending(&mut self) -> usize {
        self.shell.discard_pending()
    }

    fn transfer(&mut self) -> ChunkedTransfer<'_> {
        ChunkedTransfer::with_config(&mut self.shell, self.options.transfer.clone())
    }
}

impl Drop for Board {
    fn drop(&mut self) {
        self.detach();
    }
}
