//! Filesystem provisioning after a reset.
//!
//! Provisioning makes sure `/lib` and `/lib/lua` exist and uploads the
//! support scripts shipped with the prerequisites package. Running it twice
//! is harmless: existing directories are left alone and scripts are simply
//! overwritten.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};

use crate::error::{Error, Result};
use crate::event::{Event, EventSink};
use crate::protocol::{ChunkedTransfer, Shell};
use crate::services::PackageSource;

/// Directories created on the board, parents first.
pub const BOARD_DIRS: [&str; 2] = ["/lib", "/lib/lua"];

/// Remote path of the board identification script.
pub const INFO_SCRIPT: &str = "/_info.lua";

/// Remote directory of the support library.
pub const LIB_DIR: &str = "/lib/lua";

/// Timeout for directory probes and creation.
pub const DIR_TIMEOUT: Duration = Duration::from_millis(1000);

/// Probe for a directory; prints `true` when it exists.
pub fn dir_probe(dir: &str) -> String {
    format!(
        "do local att = io.attributes(\"{dir}\"); print(att ~= nil and att.type == \"directory\"); end"
    )
}

/// Provision the board from `packages`.
pub fn provision(shell: &mut Shell, sink: &dyn EventSink, packages: &dyn PackageSource) -> Result<()> {
    sink.emit(Event::update("Downloading prerequisites"));
    let root = packages.prerequisites()?;

    sink.emit(Event::update("Uploading framework"));
    let _mute = shell.flags().mute_console();

    {
        let mut shell = shell.with_timeout(DIR_TIMEOUT);
        for dir in BOARD_DIRS {
            ensure_dir(&mut shell, dir)?;
        }
    }

    let info_script = root.join("lua").join("board-info.lua");
    upload(shell, &info_script, INFO_SCRIPT)?;

    for script in lib_scripts(&root.join("lua").join("lib"))? {
        let name = script
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        upload(shell, &script, &format!("{LIB_DIR}/{name}"))?;
        shell.drain();
    }

    info!("Board provisioned");
    Ok(())
}

fn ensure_dir(shell: &mut Shell, dir: &str) -> Result<()> {
    if shell.send_command(&dir_probe(dir))? == "true" {
        debug!("{dir} present");
        return Ok(());
    }
    info!("Creating {dir}");
    shell.send_command(&format!("os.mkdir(\"{dir}\")"))?;
    Ok(())
}

/// `*.lua` files in `dir`, sorted by name.
fn lib_scripts(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| Error::Provisioning(format!("{}: {e}", dir.display())))?;

    let mut scripts = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "lua") {
            scripts.push(path);
        }
    }
    scripts.sort();
    Ok(scripts)
}

fn upload(shell: &mut Shell, local: &Path, remote: &str) -> Result<()> {
    let data = fs::read(local)
        .map_err(|e| Error::Provisioning(format!("{}: {e}", local.display())))?;
    debug!("Sending {remote}");
    if !ChunkedTransfer::new(shell).write_file(remote, &data)? {
        return Err(Error::Provisioning(format!("upload of {remote} failed")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{FixturePackages, RecordingSink, SimConfig, sim_shell};

    #[test]
    fn test_provision_creates_dirs_and_uploads_scripts() {
        let (mut shell, board) = sim_shell(SimConfig::default());
        let packages = FixturePackages::new();
        let sink = RecordingSink::default();

        provision(&mut shell, &sink, &packages).unwrap();

        let state = board.state.lock().unwrap();
        assert_eq!(state.created_dirs, vec!["/lib", "/lib/lua"]);
        assert_eq!(
            state.files.keys().cloned().collect::<Vec<_>>(),
            vec!["/_info.lua", "/lib/lua/block.lua", "/lib/lua/util.lua"]
        );
        assert_eq!(state.files["/lib/lua/block.lua"], FixturePackages::BLOCK_LUA);
        drop(state);

        assert_eq!(
            sink.events(),
            vec![
                Event::update("Downloading prerequisites"),
                Event::update("Uploading framework")
            ]
        );
        assert!(shell.flags().console_enabled());
    }

    #[test]
    fn test_provision_is_idempotent() {
        let (mut shell, board) = sim_shell(SimConfig::default());
        let packages = FixturePackages::new();
        let sink = RecordingSink::default();

        provision(&mut shell, &sink, &packages).unwrap();
        provision(&mut shell, &sink, &packages).unwrap();

        let state = board.state.lock().unwrap();
        assert_eq!(state.created_dirs.len(), 2);
        assert_eq!(state.files.len(), 3);
    }

    #[test]
    fn test_rejected_upload_is_fatal() {
        let (mut shell, _board) = sim_shell(SimConfig {
            refuse_writes: true,
            ..SimConfig::default()
        });
        let packages = FixturePackages::new();
        let result = provision(&mut shell, &RecordingSink::default(), &packages);
        assert!(matches!(result, Err(Error::Provisioning(_))));
        assert!(shell.flags().console_enabled());
    }

    #[test]
    fn test_missing_lib_dir_is_fatal() {
        let (mut shell, _board) = sim_shell(SimConfig::default());
        let packages = FixturePackages::new();
        fs::remove_dir_all(packages.root().join("lua").join("lib")).unwrap();
        let result = provision(&mut shell, &RecordingSink::default(), &packages);
        assert!(matches!(result, Err(Error::Provisioning(_))));
    }

    #[test]
    fn test_dir_probe_command() {
        assert_eq!(
            dir_probe("/lib"),
            r#"do local att = io.attributes("/lib"); print(att ~= nil and att.type == "directory"); end"#
        );
    }
}
