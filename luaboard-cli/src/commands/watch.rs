//! Event streaming: `watch` and the `--follow` mode of `run` and `program`.

use anyhow::Result;
use log::{info, warn};
use luaboard::BoardHost;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::sink::CliSink;
use crate::{Cli, attach_board, was_interrupted};

/// How often the link is checked and stale console bytes are dropped.
const WATCH_POLL: Duration = Duration::from_millis(100);

/// Attach and stream board events as JSON lines on stdout until Ctrl-C.
pub(crate) fn cmd_watch(cli: &Cli, config: &Config) -> Result<()> {
    let sink = Arc::new(CliSink::json_lines());
    let host = attach_board(cli, config, sink.clone())?;
    follow(&host, &sink)
}

/// Echo the console and relay events until Ctrl-C or the link goes away.
pub(crate) fn follow(host: &BoardHost, sink: &CliSink) -> Result<()> {
    sink.set_console_echo(true);
    info!("Streaming board output, press Ctrl-C to stop");

    let result: Result<()> = loop {
        if was_interrupted() {
            break Ok(());
        }
        if !host.poll_link() {
            warn!("Board link closed");
            break Ok(());
        }
        if let Err(e) = host.with_board(|board| {
            board.discard_pending();
            Ok(())
        }) {
            break Err(e.into());
        }
        thread::sleep(WATCH_POLL);
    };

    sink.set_console_echo(false);
    host.detach();
    result
}
