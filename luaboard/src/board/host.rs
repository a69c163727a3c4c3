//! Process-wide owner of the attached board.
//!
//! At most one board is attached at a time and nothing may attach while an
//! upgrade holds the serial device. All of that state sits behind a single
//! mutex.

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{info, warn};

use crate::board::{Board, BoardOptions, upgrade};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::port::Port;
use crate::services::Services;

#[derive(Default)]
struct HostState {
    board: Option<Board>,
    upgrading: bool,
}

/// Single owner of the attached board.
pub struct BoardHost {
    state: Mutex<HostState>,
    options: BoardOptions,
    services: Services,
}

impl BoardHost {
    /// Create a host with nothing attached.
    pub fn new(options: BoardOptions, services: Services) -> Self {
        Self {
            state: Mutex::new(HostState::default()),
            options,
            services,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach the board on `device`.
    #[cfg(feature = "native")]
    pub fn attach(&self, device: &str) -> Result<()> {
        self.attach_with(|options, services| Board::attach(device, options, services))
    }

    /// Attach a board over an already opened port.
    pub fn attach_port(&self, port: Box<dyn Port>) -> Result<()> {
        self.attach_with(|options, services| Board::attach_port(port, options, services))
    }

    fn attach_with<F>(&self, open: F) -> Result<()>
    where
        F: FnOnce(BoardOptions, Services) -> Result<Board>,
    {
        let mut state = self.lock();
        if state.upgrading {
            return Err(Error::Busy("upgrade in progress".into()));
        }
        if state.board.is_some() {
            return Err(Error::Busy("a board is already attached".into()));
        }

        let board = open(self.options.clone(), self.services.clone())?;
        state.board = Some(board);
        Ok(())
    }

    /// Detach the current board, if any.
    pub fn detach(&self) {
        let board = self.lock().board.take();
        if let Some(mut board) = board {
            board.detach();
        }
    }

    /// Whether a board is attached.
    pub fn is_attached(&self) -> bool {
        self.lock().board.is_some()
    }

    /// Whether an upgrade is running.
    pub fn is_upgrading(&self) -> bool {
        self.lock().upgrading
    }

    /// Run `f` against the attached board.
    ///
    /// A lost link detaches the board.
    pub fn with_board<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Board) -> Result<T>,
    {
        let mut state = self.lock();
        if state.upgrading {
            return Err(Error::Busy("upgrade in progress".into()));
        }
        let board = state.board.as_mut().ok_or(Error::NotAttached)?;

        let result = f(board);
        if matches!(result, Err(Error::LinkLost)) {
            warn!("Link lost, detaching");
            if let Some(mut board) = state.board.take() {
                board.detach();
            }
        }
        result
    }

    /// Check the link of the attached board; detach it if the link is gone.
    ///
    /// Returns whether a live board is attached.
    pub fn poll_link(&self) -> bool {
        let mut state = self.lock();
        match state.board.as_ref().map(Board::is_alive) {
            Some(true) => true,
            Some(false) => {
                info!("Board link closed");
                if let Some(mut board) = state.board.take() {
                    board.detach();
                }
                false
            },
            None => false,
        }
    }

    /// Detach the board and flash new firmware for its model.
    pub fn upgrade(&self) -> Result<()> {
        let (mut board, _busy) = {
            let mut state = self.lock();
            if state.upgrading {
                return Err(Error::Busy("upgrade in progress".into()));
            }
            let board = state.board.take().ok_or(Error::NotAttached)?;
            state.upgrading = true;
            (board, UpgradeGuard { host: self })
        };

        let device = board.device().to_string();
        let model = board.model();
        board.detach();
        drop(board);

        let model = model.ok_or_else(|| {
            let e = Error::Upgrade("board model unknown".into());
            self.services.sink.emit(Event::update(e.to_string()));
            e
        })?;
        upgrade::upgrade(
            &device,
            &model,
            self.services.packages.as_ref(),
            self.services.sink.as_ref(),
        )
    }
}

/// Clears the upgrading flag on every exit path.
struct UpgradeGuard<'a> {
    host: &'a BoardHost,
}

impl Drop for UpgradeGuard<'_> {
    fn drop(&mut self) {
        self.host.lock().upgrading = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::NoBuildTracker;
    use crate::sim::{FixturePackages, RecordingSink, SimBoard, SimConfig};
    use std::sync::Arc;
    use std::time::Duration;

    fn host() -> (BoardHost, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let services = Services::new(
            sink.clone(),
            Arc::new(FixturePackages::new()),
            Arc::new(NoBuildTracker),
        );
        let options = BoardOptions {
            boot_timeout: Duration::from_secs(3),
            ..BoardOptions::default()
        };
        (BoardHost::new(options, services), sink)
    }

    #[test]
    fn test_second_attach_is_busy() {
        let (host, _sink) = host();
        let (port, _sim) = SimBoard::connect(SimConfig::default());
        host.attach_port(Box::new(port)).unwrap();
        assert!(host.is_attached());

        let (port, _sim2) = SimBoard::connect(SimConfig::default());
        assert!(matches!(host.attach_port(Box::new(port)), Err(Error::Busy(_))));
    }

    #[test]
    fn test_with_board_requires_attach() {
        let (host, _sink) = host();
        assert!(matches!(
            host.with_board(|b| b.list_dir("/")),
            Err(Error::NotAttached)
        ));
    }

    #[test]
    fn test_failed_upgrade_clears_busy_and_detaches() {
        let (host, sink) = host();
        let (port, _sim) = SimBoard::connect(SimConfig::default());
        host.attach_port(Box::new(port)).unwrap();

        // No flashing tool is installed, so the upgrade fails.
        let result = host.upgrade();
        assert!(matches!(result, Err(Error::Upgrade(_))));
        assert!(!host.is_upgrading());
        assert!(!host.is_attached());
        assert!(sink.names().contains(&"boardDetached"));
        assert_eq!(sink.names().last(), Some(&"boardUpdate"));
    }

    #[test]
    fn test_poll_link_detaches_dead_board() {
        let (host, sink) = host();
        let (port, _sim) = SimBoard::connect(SimConfig::default());
        host.attach_port(Box::new(port)).unwrap();
        assert!(host.poll_link());

        host.with_board(|b| {
            b.detach();
            Ok(())
        })
        .unwrap();
        assert!(!host.poll_link());
        assert!(!host.is_attached());
        assert!(sink.names().contains(&"boardDetached"));
    }

    #[test]
    fn test_detach_then_attach_again() {
        let (host, _sink) = host();
        let (port, _sim) = SimBoard::connect(SimConfig::default());
        host.attach_port(Box::new(port)).unwrap();
        host.detach();
        assert!(!host.is_attached());

        let (port, _sim2) = SimBoard::connect(SimConfig::default());
        host.attach_port(Box::new(port)).unwrap();
        assert!(host.is_attached());
    }
}
