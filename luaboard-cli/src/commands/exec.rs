//! Code execution commands: `run`, `exec` and `program`.

use anyhow::{Context, Result, bail};
use console::style;
use std::fs;
use std::path::Path;

use crate::commands::watch::follow;
use crate::config::Config;
use crate::{Cli, attach_board, human_sink};

/// Default board path for a program: `/` plus the local file name.
fn default_remote(file: &Path) -> Result<String> {
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Cannot derive a board path from {}", file.display()))?;
    Ok(format!("/{name}"))
}

/// Stream a script to the interpreter.
pub(crate) fn cmd_run(cli: &Cli, config: &Config, file: &Path, keep_following: bool) -> Result<()> {
    let code = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;

    let sink = human_sink(cli);
    let host = attach_board(cli, config, sink.clone())?;
    host.with_board(|board| board.run_code(&code))
        .with_context(|| format!("Failed to run {}", file.display()))?;

    if keep_following {
        return follow(&host, &sink);
    }
    host.detach();
    Ok(())
}

/// Run one command and print its output.
pub(crate) fn cmd_exec(cli: &Cli, config: &Config, code: &str) -> Result<()> {
    let host = attach_board(cli, config, human_sink(cli))?;
    let output = host
        .with_board(|board| board.run_command(code))
        .context("Failed to run command")?;
    host.detach();

    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

/// Install `file` as the autorun program and start it.
pub(crate) fn cmd_program(
    cli: &Cli,
    config: &Config,
    file: &Path,
    remote: Option<&str>,
    keep_following: bool,
) -> Result<()> {
    let code = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let remote = match remote {
        Some(path) => path.to_string(),
        None => default_remote(file)?,
    };

    let sink = human_sink(cli);
    let host = attach_board(cli, config, sink.clone())?;
    sink.status(format!("Installing {remote}"));
    let started = host.with_board(|board| board.run_program(&remote, &code));
    sink.clear_status();

    if !started.with_context(|| format!("Failed to install {remote}"))? {
        host.detach();
        bail!("Board did not confirm the upload of {remote}");
    }
    if !cli.quiet {
        eprintln!("{} Started {remote}", style("✓").green());
    }

    if keep_following {
        return follow(&host, &sink);
    }
    host.detach();
    Ok(())
}
