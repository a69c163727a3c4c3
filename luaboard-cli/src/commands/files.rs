//! File commands: `ls`, `get` and `put`.

use anyhow::{Context, Result, bail};
use console::style;
use luaboard::DirEntry;
use std::fs;
use std::io::{self, Write as _};
use std::path::Path;

use crate::config::Config;
use crate::{Cli, attach_board, human_sink};

fn format_entry(entry: &DirEntry) -> String {
    let name = if entry.is_dir() {
        format!(
            "{}/",
            style(&entry.name)
                .blue()
                .bold()
        )
    } else {
        entry
            .name
            .clone()
    };
    format!("{:>8}  {:<19}  {name}", entry.size, entry.date)
}

/// List a directory on the board.
pub(crate) fn cmd_ls(cli: &Cli, config: &Config, path: &str, json: bool) -> Result<()> {
    let host = attach_board(cli, config, human_sink(cli))?;
    let entries = host
        .with_board(|board| board.list_dir(path))
        .with_context(|| format!("Failed to list {path}"))?;
    host.detach();

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "path": path,
                "entries": entries,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for entry in &entries {
        println!("{}", format_entry(entry));
    }
    Ok(())
}

/// Copy a file from the board to `local`, or to stdout.
pub(crate) fn cmd_get(
    cli: &Cli,
    config: &Config,
    remote: &str,
    local: Option<&Path>,
) -> Result<()> {
    let host = attach_board(cli, config, human_sink(cli))?;
    let data = host
        .with_board(|board| board.read_file(remote))
        .with_context(|| format!("Failed to read {remote}"))?;
    host.detach();

    let Some(data) = data else {
        bail!("Board did not send {remote}");
    };

    match local {
        Some(path) => {
            fs::write(path, &data)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !cli.quiet {
                eprintln!(
                    "{} {remote} -> {} ({} bytes)",
                    style("✓").green(),
                    path.display(),
                    data.len()
                );
            }
        },
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&data)?;
            stdout.flush()?;
        },
    }
    Ok(())
}

/// Copy `local` to `remote` on the board.
pub(crate) fn cmd_put(cli: &Cli, config: &Config, local: &Path, remote: &str) -> Result<()> {
    let data = fs::read(local).with_context(|| format!("Failed to read {}", local.display()))?;

    let host = attach_board(cli, config, human_sink(cli))?;
    let written = host
        .with_board(|board| board.write_file(remote, &data))
        .with_context(|| format!("Failed to write {remote}"))?;
    host.detach();

    if !written {
        bail!("Board did not confirm writing {remote}");
    }
    if !cli.quiet {
        eprintln!(
            "{} {} -> {remote} ({} bytes)",
            style("✓").green(),
            local.display(),
            data.len()
        );
    }
    Ok(())
}
