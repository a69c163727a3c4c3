//! In-memory port and a scripted Lua RTOS board for tests.
//!
//! [`sim_port`] returns a host-side [`Port`] and the board-side endpoint.
//! [`SimBoard`] drives that endpoint like a Lua RTOS console: it echoes
//! commands, prints a prompt, runs the boot sequence when RTS is pulsed and
//! speaks the chunk-request transfer protocol.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use regex::Regex;
use tempfile::TempDir;

use crate::board::BoardModel;
use crate::error::Result;
use crate::event::{Event, EventSink, NullSink};
use crate::inspector::{Inspector, SessionFlags};
use crate::link::Link;
use crate::port::{Port, READ_POLL};
use crate::protocol::Shell;
use crate::services::PackageSource;

/// What the host did to the port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostSignal {
    /// Bytes written by the host.
    Data(Vec<u8>),
    /// RTS level change.
    Rts(bool),
}

/// Host side of an in-memory serial port.
pub struct SimPort {
    rx: Arc<Mutex<Receiver<u8>>>,
    tx: Sender<HostSignal>,
    closed: Arc<AtomicBool>,
}

/// Board side of an in-memory serial port.
pub struct SimEndpoint {
    /// Everything the host wrote or signalled, in order.
    pub signals: Receiver<HostSignal>,
    to_host: Sender<u8>,
}

impl SimEndpoint {
    /// Send raw bytes to the host.
    pub fn send(&self, bytes: &[u8]) {
        for &b in bytes {
            let _ = self.to_host.send(b);
        }
    }
}

/// Create a connected host port and board endpoint.
pub fn sim_port() -> (SimPort, SimEndpoint) {
    let (to_host, rx) = channel();
    let (tx, signals) = channel();
    (
        SimPort {
            rx: Arc::new(Mutex::new(rx)),
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        },
        SimEndpoint { signals, to_host },
    )
}

impl Read for SimPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let rx = self.rx.lock().expect("sim port lock");
        match rx.recv_timeout(READ_POLL) {
            Ok(b) => {
                buf[0] = b;
                Ok(1)
            },
            Err(RecvTimeoutError::Timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
            },
            Err(RecvTimeoutError::Disconnected) => Ok(0),
        }
    }
}

impl Write for SimPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        self.tx
            .send(HostSignal::Data(buf.to_vec()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "board gone"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SimPort {
    fn name(&self) -> &str {
        "sim"
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        let _ = self.tx.send(HostSignal::Rts(level));
        Ok(())
    }

    fn try_clone_port(&self) -> Result<Box<dyn Port>> {
        Ok(Box::new(Self {
            rx: Arc::clone(&self.rx),
            tx: self.tx.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }

    fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Shell over a new simulated board, with its inspector running.
///
/// The board is not booted; it answers commands straight away.
pub fn sim_shell(config: SimConfig) -> (Shell, SimBoard) {
    init_logging();
    let (port, board) = SimBoard::connect(config);
    let flags = Arc::new(SessionFlags::default());
    let link = Link::from_port(Box::new(port));
    let reader = link.reader().expect("sim reader");
    // The inspector thread stops by itself once the link closes.
    let (_inspector, rx) =
        Inspector::spawn(reader, Arc::clone(&flags), Arc::new(NullSink)).expect("sim inspector");
    (Shell::new(link, rx, flags), board)
}

/// Route library logs through the test harness (`RUST_LOG=trace`).
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Sink that records everything for assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
    console: Mutex<Vec<u8>>,
}

impl RecordingSink {
    /// Events received so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("sink lock").clone()
    }

    /// Names of events received so far.
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(Event::name).collect()
    }

    /// Console bytes received so far.
    pub fn console_bytes(&self) -> Vec<u8> {
        self.console.lock().expect("sink lock").clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: Event) {
        self.events.lock().expect("sink lock").push(event);
    }

    fn console(&self, bytes: &[u8]) {
        self.console.lock().expect("sink lock").extend_from_slice(bytes);
    }
}

/// How the simulated board boots after a reset pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootScript {
    /// Full Lua RTOS boot ending at the ready banner.
    Normal,
    /// Power-on banner, then nothing.
    Stalls,
    /// Bootloader rejects the application image.
    CorruptedImage,
    /// Lua RTOS falls back to the ROM interpreter.
    FlashError,
}

/// Behaviour knobs of the simulated board.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Boot behaviour.
    pub boot: BootScript,
    /// Echo every command with a corrupted first byte.
    pub garble_echo: bool,
    /// Answer `io.receive` with something other than `true`.
    pub refuse_writes: bool,
    /// Output of `dofile("/_info.lua")`.
    pub info: String,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            boot: BootScript::Normal,
            garble_echo: false,
            refuse_writes: false,
            info: r#"{"build":"1519216880","commit":"4ad6b4c","board":"N1ESP32",}"#.to_string(),
        }
    }
}

/// Observable state of the simulated board.
#[derive(Debug, Default)]
pub struct SimState {
    /// Files stored on the board.
    pub files: BTreeMap<String, Vec<u8>>,
    /// Directories present on the board.
    pub dirs: BTreeSet<String>,
    /// Directories created by `os.mkdir`, in order.
    pub created_dirs: Vec<String>,
    /// Code streamed through `os.run()`.
    pub ran: Vec<Vec<u8>>,
    /// Every shell command line received.
    pub commands: Vec<String>,
    /// Number of completed reset pulses.
    pub resets: usize,
}

enum Mode {
    Shell,
    AwaitCtrlD,
    Receive {
        target: Option<String>,
        data: Vec<u8>,
        pending: Option<usize>,
    },
    Send {
        data: Vec<u8>,
        offset: usize,
    },
}

/// Handle to a running simulated board.
///
/// The board thread ends once the host port is dropped.
pub struct SimBoard {
    /// Shared observable state.
    pub state: Arc<Mutex<SimState>>,
}

impl SimBoard {
    /// Start a simulated board on `endpoint`.
    pub fn spawn(endpoint: SimEndpoint, config: SimConfig) -> Self {
        let state = Arc::new(Mutex::new(SimState::default()));
        let shared = Arc::clone(&state);
        thread::spawn(move || BoardLoop::new(endpoint, config, shared).run());
        Self { state }
    }

    /// Create a port connected to a new simulated board.
    pub fn connect(config: SimConfig) -> (SimPort, Self) {
        init_logging();
        let (port, endpoint) = sim_port();
        (port, Self::spawn(endpoint, config))
    }

    /// Store a file on the board.
    pub fn put_file(&self, path: &str, data: &[u8]) {
        self.state
            .lock()
            .expect("sim state lock")
            .files
            .insert(path.to_string(), data.to_vec());
    }

    /// Read a file stored on the board.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .expect("sim state lock")
            .files
            .get(path)
            .cloned()
    }
}

struct BoardLoop {
    endpoint: SimEndpoint,
    config: SimConfig,
    state: Arc<Mutex<SimState>>,
    mode: Mode,
    line: Vec<u8>,
    rts: bool,
    receive: Regex,
    send: Regex,
    attributes: Regex,
    mkdir: Regex,
    ls: Regex,
}

impl BoardLoop {
    fn new(endpoint: SimEndpoint, config: SimConfig, state: Arc<Mutex<SimState>>) -> Self {
        Self {
            endpoint,
            config,
            state,
            mode: Mode::Shell,
            line: Vec::new(),
            rts: false,
            receive: Regex::new(r#"^io\.receive\("(.*)"\)$"#).expect("regex"),
            send: Regex::new(r#"^io\.send\("(.*)"\)$"#).expect("regex"),
            attributes: Regex::new(r#"io\.attributes\("(.*?)"\)"#).expect("regex"),
            mkdir: Regex::new(r#"^os\.mkdir\("(.*)"\)$"#).expect("regex"),
            ls: Regex::new(r#"^os\.ls\("(.*)"\)$"#).expect("regex"),
        }
    }

    fn run(mut self) {
        loop {
            match self.endpoint.signals.recv_timeout(Duration::from_millis(20)) {
                Ok(HostSignal::Data(bytes)) => {
                    for b in bytes {
                        self.on_byte(b);
                    }
                },
                Ok(HostSignal::Rts(level)) => {
                    if self.rts && !level {
                        self.boot();
                    }
                    self.rts = level;
                },
                Err(RecvTimeoutError::Timeout) => {},
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn println(&self, text: &str) {
        self.endpoint.send(text.as_bytes());
        self.endpoint.send(b"\r\n");
    }

    fn prompt(&self) {
        // Lua RTOS leaves the prompt unterminated; the simulation ends it so
        // the host can read it as a line.
        self.println("/ > ");
    }

    fn boot(&mut self) {
        self.state.lock().expect("sim state lock").resets += 1;
        self.mode = Mode::Shell;
        self.line.clear();

        self.println("ets Jun  8 2016 00:22:57");
        self.println("");
        self.println("rst:0x1 (POWERON_RESET),boot:0x13 (SPI_FAST_FLASH_BOOT)");
        self.println("configsip: 0, SPIWP:0xee");
        self.println("I (28) boot: ESP-IDF v3.0 2nd stage bootloader");

        match self.config.boot {
            BootScript::Normal => {
                self.println("Booting Lua RTOS...");
                self.mode = Mode::AwaitCtrlD;
            },
            BootScript::Stalls => {},
            BootScript::CorruptedImage => {
                self.println("E (120) boot: Failed to verify app image @ 0x10000 (-1)");
            },
            BootScript::FlashError => {
                self.println("Booting Lua RTOS...");
                self.println("Falling back to built-in command interpreter.");
            },
        }
    }

    fn on_byte(&mut self, b: u8) {
        match std::mem::replace(&mut self.mode, Mode::Shell) {
            Mode::AwaitCtrlD => {
                if b == 0x04 {
                    self.println("Lua RTOS-boot-scripts-aborted-ESP32");
                    self.prompt();
                } else {
                    self.mode = Mode::AwaitCtrlD;
                }
            },
            Mode::Shell => match b {
                b'\r' | b'\n' => {
                    if !self.line.is_empty() {
                        let line = String::from_utf8_lossy(&self.line).into_owned();
                        self.line.clear();
                        self.command(&line);
                    }
                },
                _ => self.line.push(b),
            },
            Mode::Receive {
                target,
                mut data,
                pending,
            } => match pending {
                None if b == 0 => self.finish_receive(target, data),
                None => {
                    self.mode = Mode::Receive {
                        target,
                        data,
                        pending: Some(usize::from(b)),
                    };
                },
                Some(left) => {
                    data.push(b);
                    let pending = if left == 1 {
                        self.println("C");
                        None
                    } else {
                        Some(left - 1)
                    };
                    self.mode = Mode::Receive {
                        target,
                        data,
                        pending,
                    };
                },
            },
            Mode::Send { data, offset } => {
                if b != b'\n' {
                    self.mode = Mode::Send { data, offset };
                    return;
                }
                let n = (data.len() - offset).min(255);
                self.endpoint.send(&[u8::try_from(n).unwrap_or(u8::MAX)]);
                self.endpoint.send(&data[offset..offset + n]);
                if n == 0 {
                    self.prompt();
                } else {
                    self.mode = Mode::Send {
                        data,
                        offset: offset + n,
                    };
                }
            },
        }
    }

    fn finish_receive(&mut self, target: Option<String>, data: Vec<u8>) {
        match target {
            Some(_) if self.config.refuse_writes => self.println("false"),
            Some(path) => {
                self.state
                    .lock()
                    .expect("sim state lock")
                    .files
                    .insert(path, data);
                self.println("true");
            },
            None => self.state.lock().expect("sim state lock").ran.push(data),
        }
        self.prompt();
    }

    fn command(&mut self, line: &str) {
        self.state
            .lock()
            .expect("sim state lock")
            .commands
            .push(line.to_string());

        if self.config.garble_echo {
            self.println(&format!("x{line}"));
        } else {
            self.println(line);
        }

        if let Some(caps) = self.receive.captures(line) {
            self.mode = Mode::Receive {
                target: Some(caps[1].to_string()),
                data: Vec::new(),
                pending: None,
            };
            self.println("C");
            return;
        }

        if line == "os.run()" {
            self.mode = Mode::Receive {
                target: None,
                data: Vec::new(),
                pending: None,
            };
            self.println("C");
            return;
        }

        if let Some(caps) = self.send.captures(line) {
            let data = self.file_or_empty(&caps[1]);
            self.mode = Mode::Send { data, offset: 0 };
            return;
        }

        if let Some(caps) = self.attributes.captures(line) {
            let exists = self
                .state
                .lock()
                .expect("sim state lock")
                .dirs
                .contains(&caps[1]);
            self.println(if exists { "true" } else { "false" });
        } else if let Some(caps) = self.mkdir.captures(line) {
            let mut state = self.state.lock().expect("sim state lock");
            state.dirs.insert(caps[1].to_string());
            state.created_dirs.push(caps[1].to_string());
        } else if let Some(caps) = self.ls.captures(line) {
            let listing = self.listing(&caps[1]);
            for entry in listing {
                self.println(&entry);
            }
        } else if line == r#"dofile("/_info.lua")"# {
            let info = self.config.info.clone();
            self.println(&info);
        }

        self.prompt();
    }

    fn file_or_empty(&self, path: &str) -> Vec<u8> {
        self.state
            .lock()
            .expect("sim state lock")
            .files
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    fn listing(&self, dir: &str) -> Vec<String> {
        let state = self.state.lock().expect("sim state lock");
        let prefix = if dir.ends_with('/') {
            dir.to_string()
        } else {
            format!("{dir}/")
        };

        let mut out = Vec::new();
        for d in &state.dirs {
            if let Some(name) = d.strip_prefix(&prefix) {
                if !name.is_empty() && !name.contains('/') {
                    out.push(format!("d\t\t\t{name}"));
                }
            }
        }
        for (path, data) in &state.files {
            if let Some(name) = path.strip_prefix(&prefix) {
                if !name.contains('/') {
                    out.push(format!("f\t{}\tJan 01 2018 00:00\t{name}", data.len()));
                }
            }
        }
        out
    }
}

/// Package directory with prerequisites and firmware for every model.
pub struct FixturePackages {
    dir: TempDir,
}

impl FixturePackages {
    /// Contents of `lua/lib/block.lua`.
    pub const BLOCK_LUA: &'static [u8] = b"wcBlock = {delevepMode = false}\n";

    /// Populate a fresh temporary directory.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let root = dir.path();

        let lib = root.join("lua").join("lib");
        fs::create_dir_all(&lib).expect("lib dir");
        fs::write(root.join("lua").join("board-info.lua"), b"print('{}')\n").expect("info");
        fs::write(lib.join("block.lua"), Self::BLOCK_LUA).expect("block");
        fs::write(lib.join("util.lua"), b"util = {}\n").expect("util");
        fs::write(lib.join("README.md"), b"not a script\n").expect("readme");

        let firmware = root.join("firmware");
        fs::create_dir_all(&firmware).expect("firmware dir");
        let mut args = String::from("--chip esp32 write_flash");
        for name in ["WHITECAT-ESP32-N1", "ESP32-CORE-BOARD", "ESP32-THING"] {
            args.push_str(&format!(
                " 0x1000 bootloader.{name}.bin 0x10000 lua_rtos.{name}.bin 0x8000 partitions_singleapp.{name}.bin"
            ));
        }
        fs::write(firmware.join("flash_args"), args).expect("flash_args");

        Self { dir }
    }

    /// Root of the package directory.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Install an executable flashing tool script.
    #[cfg(unix)]
    pub fn install_tool(&self, script: &str) {
        use std::os::unix::fs::PermissionsExt;

        let path = self.root().join("flash-tool");
        fs::write(&path, script).expect("tool");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("tool mode");
    }
}

impl PackageSource for FixturePackages {
    fn prerequisites(&self) -> Result<PathBuf> {
        Ok(self.root().to_path_buf())
    }

    fn firmware(&self, _model: &BoardModel) -> Result<PathBuf> {
        Ok(self.root().join("firmware"))
    }

    fn flash_tool(&self) -> Result<PathBuf> {
        Ok(self.root().join("flash-tool"))
    }
}
