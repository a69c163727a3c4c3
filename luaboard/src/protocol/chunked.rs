//! Chunk-request file transfer over the Lua RTOS console.
//!
//! Transfers are paced by the receiver. For uploads the board asks for each
//! chunk with a `C` line; for downloads the host asks with `C\n`. A chunk is
//! one length byte followed by that many raw bytes, and a zero length ends
//! the transfer:
//!
//! ```text
//! upload (io.receive / os.run)        download (io.send)
//! host  -> io.receive("/a.lua")\r     host  -> io.send("/a.lua")\r
//! board -> io.receive("/a.lua")       board -> io.send("/a.lua")
//! board -> C                          host  -> C\n
//! host  -> [n] [n bytes]              board -> [n] [n bytes]
//! ...                                 ...
//! board -> C                          host  -> C\n
//! host  -> [0]                        board -> [0]
//! board -> true
//! ```

use std::time::Duration;

use log::{debug, trace, warn};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::protocol::shell::Shell;

/// Largest payload of a single chunk.
pub const CHUNK_SIZE: u8 = 255;

/// Line the board sends to request the next chunk.
pub const CHUNK_REQUEST: &str = "C";

/// Bytes the host sends to request the next chunk.
pub const HOST_CHUNK_REQUEST: &[u8] = b"C\n";

/// Line confirming a completed upload.
pub const UPLOAD_OK: &str = "true";

/// Transfer timeouts.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Per-read timeout for uploads and downloads.
    pub timeout: Duration,
    /// Per-read timeout for directory listings.
    pub list_timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(2000),
            list_timeout: Duration::from_millis(1000),
        }
    }
}

/// One entry of an `os.ls` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    /// `f` for files, `d` for directories.
    #[serde(rename = "type")]
    pub kind: String,
    /// Size in bytes as printed by the board; empty for directories.
    pub size: String,
    /// Modification date as printed by the board.
    pub date: String,
    /// Entry name without its directory.
    pub name: String,
}

impl DirEntry {
    /// Parse one TAB-separated listing line. Lines without exactly four
    /// fields are not entries.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches('\r');
        let fields: Vec<&str> = line.split('\t').collect();
        match fields.as_slice() {
            [kind, size, date, name] => Some(Self {
                kind: (*kind).to_string(),
                size: (*size).to_string(),
                date: (*date).to_string(),
                name: (*name).to_string(),
            }),
            _ => None,
        }
    }

    /// Whether the entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind == "d"
    }
}

/// Chunked transfer handler bound to a shell.
pub struct ChunkedTransfer<'a> {
    shell: &'a mut Shell,
    config: TransferConfig,
}

impl<'a> ChunkedTransfer<'a> {
    /// Create a handler with default timeouts.
    pub fn new(shell: &'a mut Shell) -> Self {
        Self::with_config(shell, TransferConfig::default())
    }

    /// Create a handler with custom timeouts.
    pub fn with_config(shell: &'a mut Shell, config: TransferConfig) -> Self {
        Self { shell, config }
    }

    /// Store `data` at `path` on the board.
    ///
    /// Returns `false` when the board does not echo the request, does not
    /// confirm the upload or stops answering. Losing the link is an error.
    pub fn write_file(&mut self, path: &str, data: &[u8]) -> Result<bool> {
        debug!("Writing {} bytes to {path}", data.len());
        let _mute = self.shell.flags().mute_console();
        let mut shell = self.shell.with_timeout(self.config.timeout);

        let command = format!("io.receive(\"{path}\")");
        let written = soften(upload(&mut shell, &command, data, true), false)?;
        shell.drain();

        if !written {
            warn!("Upload of {path} was not confirmed");
        }
        Ok(written)
    }

    /// Fetch the contents of `path` from the board.
    ///
    /// Returns `None` when the board does not echo the request or stops
    /// answering. A missing file reads as empty.
    pub fn read_file(&mut self, path: &str) -> Result<Option<Vec<u8>>> {
        debug!("Reading {path}");
        let _mute = self.shell.flags().mute_console();
        let mut shell = self.shell.with_timeout(self.config.timeout);

        let data = soften(download(&mut shell, path), None)?;
        shell.drain();

        if data.is_none() {
            warn!("Download of {path} failed");
        }
        Ok(data)
    }

    /// Stream `code` to the interpreter and run it.
    pub fn run_code(&mut self, code: &[u8]) -> Result<()> {
        debug!("Running {} bytes of code", code.len());
        let _mute = self.shell.flags().mute_console();
        let mut shell = self.shell.with_timeout(self.config.timeout);

        upload(&mut shell, "os.run()", code, false)?;
        shell.drain();
        Ok(())
    }

    /// List the directory at `path`.
    ///
    /// An unresponsive board yields an empty listing.
    pub fn list_dir(&mut self, path: &str) -> Result<Vec<DirEntry>> {
        let _mute = self.shell.flags().mute_console();
        let mut shell = self.shell.with_timeout(self.config.list_timeout);

        let response = soften(shell.send_command(&format!("os.ls(\"{path}\")")), String::new())?;
        Ok(response.split('\n').filter_map(DirEntry::parse).collect())
    }
}

/// Map a timeout to `fallback`, keep every other error.
fn soften<T>(result: Result<T>, fallback: T) -> Result<T> {
    match result {
        Err(Error::Timeout(reason)) => {
            debug!("Transfer timed out: {reason}");
            Ok(fallback)
        },
        other => other,
    }
}

/// Send `command` with a bare CR and feed `data` to every chunk request.
///
/// With `confirm`, the echo must match and the board must answer `true`.
fn upload(shell: &mut Shell, command: &str, data: &[u8], confirm: bool) -> Result<bool> {
    shell.write(format!("{command}\r").as_bytes())?;

    if confirm {
        let echo = shell.read_line()?;
        if echo != command {
            debug!("Echo mismatch: expected {command:?}, got {echo:?}");
            return Ok(false);
        }
    }

    let mut offset = 0;
    loop {
        if shell.read_line()? != CHUNK_REQUEST {
            continue;
        }

        let len = (data.len() - offset).min(usize::from(CHUNK_SIZE));
        let header = u8::try_from(len).unwrap_or(CHUNK_SIZE);
        shell.write(&[header])?;
        if len == 0 {
            break;
        }

        shell.write(&data[offset..offset + len])?;
        offset += len;
        trace!("Sent chunk of {len} bytes ({offset}/{})", data.len());
    }

    if !confirm {
        return Ok(true);
    }
    Ok(shell.read_line()? == UPLOAD_OK)
}

/// Request chunks of `path` until the board sends an empty one.
fn download(shell: &mut Shell, path: &str) -> Result<Option<Vec<u8>>> {
    let command = format!("io.send(\"{path}\")");
    shell.write(format!("{command}\r").as_bytes())?;

    let echo = shell.read_line()?;
    if echo != command {
        debug!("Echo mismatch: expected {command:?}, got {echo:?}");
        return Ok(None);
    }

    let mut data = Vec::new();
    loop {
        shell.write(HOST_CHUNK_REQUEST)?;
        let len = shell.read_byte()?;
        if len == 0 {
            break;
        }
        for _ in 0..len {
            data.push(shell.read_byte()?);
        }
        trace!("Received chunk of {len} bytes ({} total)", data.len());
    }
    Ok(Some(data))
}
