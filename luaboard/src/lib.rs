//! # luaboard
//!
//! A library for managing boards running Lua RTOS over their serial console.
//!
//! This crate provides the host side of the console protocol, including:
//!
//! - Console inspection: boot, block and runtime-error events detected on the
//!   fly while output is relayed to the caller
//! - Shell commands with echo verification and prompt detection
//! - Chunk-request file transfer and code execution
//! - Reset handshake and filesystem provisioning
//! - Firmware upgrade through an external flashing tool
//!
//! ## Supported Boards
//!
//! - Whitecat N1 ESP32
//! - ESP32 Core Board
//! - ESP32 Thing
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use luaboard::{Board, BoardOptions, NoBuildTracker, NullSink, PackageSource, Services};
//! # use std::path::PathBuf;
//! # struct Packages;
//! # impl PackageSource for Packages {
//! #     fn prerequisites(&self) -> luaboard::Result<PathBuf> { Ok("pkg".into()) }
//! #     fn firmware(&self, _: &luaboard::BoardModel) -> luaboard::Result<PathBuf> { Ok("fw".into()) }
//! #     fn flash_tool(&self) -> luaboard::Result<PathBuf> { Ok("esptool".into()) }
//! # }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let services = Services::new(
//!         Arc::new(NullSink),
//!         Arc::new(Packages),
//!         Arc::new(NoBuildTracker),
//!     );
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let mut board = Board::attach("/dev/ttyUSB0", BoardOptions::default(), services)?;
//!         board.write_file("/main.lua", b"print('hello')")?;
//!         println!("{}", board.run_command("dofile(\"/main.lua\")")?);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod board;
pub mod console;
pub mod device;
pub mod error;
pub mod event;
pub mod inspector;
pub mod link;
pub mod port;
pub mod protocol;
pub mod services;

#[cfg(test)]
mod sim;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    board::{Board, BoardHost, BoardInfo, BoardModel, BoardOptions},
    console::{ConsoleDecoder, clean_console_text, drain_utf8_lossy},
    device::{DetectedPort, DeviceKind, detect_ports, format_port_list, select_port},
    error::{BootFailure, Error, Result},
    event::{Event, EventSink, NullSink},
    inspector::SessionFlags,
    link::Link,
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{CHUNK_SIZE, DirEntry, Shell},
    services::{BuildTracker, NoBuildTracker, PackageSource, Services},
};
