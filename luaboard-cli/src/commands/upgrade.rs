//! Firmware upgrade command implementation.

use anyhow::{Context, Result};
use console::style;

use crate::config::Config;
use crate::{Cli, attach_board, human_sink};

/// Attach to learn the board model, then re-flash its firmware.
pub(crate) fn cmd_upgrade(cli: &Cli, config: &Config) -> Result<()> {
    let sink = human_sink(cli);
    let host = attach_board(cli, config, sink.clone())?;

    let model = host.with_board(|board| Ok(board.model()))?;
    let model = model.map_or_else(|| "unknown".to_string(), |m| m.to_string());
    sink.status(format!("Upgrading {model} firmware"));
    let result = host.upgrade();
    sink.clear_status();
    result.context("Firmware upgrade failed")?;

    if !cli.quiet {
        eprintln!("{} Upgraded {model} firmware", style("✓").green());
    }
    Ok(())
}
