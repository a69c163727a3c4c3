//! Firmware re-flash through the external flashing tool.
//!
//! The firmware package ships a `flash_args` file listing offsets and binary
//! names relative to the package. The binaries for the board model are
//! rewritten to absolute paths, the serial device is prepended and the tool's
//! progress output is relayed line by line as `boardUpdate` events.

use std::fs;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, info, warn};

use crate::board::BoardModel;
use crate::error::{Error, Result};
use crate::event::{Event, EventSink};
use crate::services::PackageSource;

/// Name of the argument file inside a firmware package.
pub const FLASH_ARGS_FILE: &str = "flash_args";

/// Binary name stems rewritten to absolute paths.
const BINARIES: [&str; 3] = ["bootloader", "lua_rtos", "partitions_singleapp"];

/// A ready-to-run flashing command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashPlan {
    /// Flashing tool executable.
    pub tool: PathBuf,
    /// Arguments, `--port <device>` first.
    pub args: Vec<String>,
}

/// Build the tool arguments from a `flash_args` template.
pub fn flash_args(template: &str, firmware_dir: &Path, board_name: &str, device: &str) -> Vec<String> {
    let mut text = template.to_string();
    for stem in BINARIES {
        let file = format!("{stem}.{board_name}.bin");
        let absolute = firmware_dir.join(&file);
        text = text.replace(&file, &absolute.to_string_lossy());
    }

    let mut args = vec!["--port".to_string(), device.to_string()];
    args.extend(text.split_whitespace().map(str::to_string));
    args
}

/// Resolve the tool and arguments for `model` on `device`.
pub fn plan(device: &str, model: &BoardModel, packages: &dyn PackageSource) -> Result<FlashPlan> {
    let board_name = model
        .firmware_name()
        .ok_or_else(|| Error::Upgrade(format!("no firmware for board model {model}")))?;

    let tool = packages.flash_tool()?;
    let firmware_dir = packages.firmware(model)?;
    let args_path = firmware_dir.join(FLASH_ARGS_FILE);
    let template = fs::read_to_string(&args_path)
        .map_err(|e| Error::Upgrade(format!("{}: {e}", args_path.display())))?;

    Ok(FlashPlan {
        tool,
        args: flash_args(&template, &firmware_dir, board_name, device),
    })
}

/// Run the flashing tool, relaying its output as `boardUpdate` events.
pub fn run(plan: &FlashPlan, sink: &dyn EventSink) -> Result<()> {
    info!("Running {} {}", plan.tool.display(), plan.args.join(" "));
    let mut child = Command::new(&plan.tool)
        .args(&plan.args)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| Error::Upgrade(format!("{}: {e}", plan.tool.display())))?;

    if let Some(stdout) = child.stdout.take() {
        if let Err(e) = relay_progress(BufReader::new(stdout), sink) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }
    }

    let status = child
        .wait()
        .map_err(|e| Error::Upgrade(format!("{}: {e}", plan.tool.display())))?;
    if !status.success() {
        return Err(Error::Upgrade(format!("flash tool exited with {status}")));
    }
    info!("Upgraded");
    Ok(())
}

/// Split tool output on CR or LF, strip `...` and emit each non-empty line.
pub fn relay_progress<R: Read>(reader: R, sink: &dyn EventSink) -> Result<()> {
    let mut line = Vec::new();
    for byte in reader.bytes() {
        match byte? {
            b'\r' | b'\n' => emit_progress(&mut line, sink),
            b => line.push(b),
        }
    }
    emit_progress(&mut line, sink);
    Ok(())
}

fn emit_progress(line: &mut Vec<u8>, sink: &dyn EventSink) {
    let text = String::from_utf8_lossy(line).replace("...", "");
    line.clear();
    if !text.is_empty() {
        debug!("Flash: {text}");
        sink.emit(Event::update(text));
    }
}

/// Flash the firmware for `model` to the board on `device`.
///
/// The board must already be detached. Every failure comes back as
/// [`Error::Upgrade`] and is also reported to the sink as a `boardUpdate`
/// event.
pub fn upgrade(
    device: &str,
    model: &BoardModel,
    packages: &dyn PackageSource,
    sink: &dyn EventSink,
) -> Result<()> {
    let result = plan(device, model, packages)
        .and_then(|plan| run(&plan, sink))
        .map_err(|e| match e {
            Error::Upgrade(_) => e,
            other => Error::Upgrade(other.to_string()),
        });
    if let Err(e) = &result {
        warn!("{e}");
        sink.emit(Event::update(e.to_string()));
    }
    result
}
