//! luaboard CLI - Command-line tool for boards running Lua RTOS.
//!
//! ## Features
//!
//! - Attach to a board, provision it and report its firmware info
//! - List, read and write files on the board filesystem
//! - Run scripts, single commands and autorun programs
//! - Stream console events as JSON lines
//! - Re-flash the board firmware
//! - Interactive serial port selection

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{debug, warn};
use luaboard::{BoardHost, BoardOptions, Services};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

mod commands;
mod config;
mod packages;
mod serial;
mod sink;

use config::Config;
use packages::{ConfigBuildTracker, LocalPackages};
use serial::{SerialOptions, select_serial_port};
use sink::CliSink;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if spinners and colors should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors that map to a specific exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid usage or missing setup; exit code 2.
    #[error("{0}")]
    Usage(String),
    /// Cancelled by the user; exit code 130.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Cancelled(_) => 130,
        }
    }
}

/// luaboard - Talk to Lua RTOS boards over their serial console.
///
/// Environment variables:
///   LUABOARD_PORT              - Default serial port
///   LUABOARD_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "luaboard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  luaboard list-ports\n  luaboard -p /dev/ttyUSB0 ls /\n  \
                        luaboard put main.lua /main.lua\n  luaboard watch")]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "LUABOARD_PORT")]
    pub(crate) port: Option<String>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "LUABOARD_NON_INTERACTIVE")]
    pub(crate) non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub(crate) config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Attach to the board and show its firmware info.
    Info {
        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List a directory on the board.
    Ls {
        /// Directory to list.
        #[arg(default_value = "/")]
        path: String,

        /// Output entries as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Copy a file from the board.
    Get {
        /// File on the board.
        remote: String,

        /// Destination file (stdout if omitted).
        local: Option<PathBuf>,
    },

    /// Copy a file to the board.
    Put {
        /// Local file.
        local: PathBuf,

        /// Destination path on the board.
        remote: String,
    },

    /// Run a Lua script on the board without storing it.
    Run {
        /// Local Lua script.
        file: PathBuf,

        /// Keep streaming console output until Ctrl-C.
        #[arg(short, long)]
        follow: bool,
    },

    /// Execute a single shell command and print its output.
    Exec {
        /// Lua statement or shell command.
        code: String,
    },

    /// Install a program as the board's autorun program and start it.
    Program {
        /// Local Lua program.
        file: PathBuf,

        /// Destination path on the board (defaults to /<file name>).
        #[arg(long, value_name = "PATH")]
        remote: Option<String>,

        /// Keep streaming console output until Ctrl-C.
        #[arg(short, long)]
        follow: bool,
    },

    /// Stream board events as JSON lines until Ctrl-C.
    Watch,

    /// Re-flash the board firmware.
    Upgrade,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "luaboard v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        warn!("Failed to install Ctrl-C handler: {e}");
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!(
                "{} {err:#}",
                console::style("Error:")
                    .red()
                    .bold()
            );
            let code = err
                .downcast_ref::<CliError>()
                .map_or(1, CliError::exit_code);
            ExitCode::from(code)
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::ListPorts { json } => commands::info::cmd_list_ports(*json),
        Commands::Info { json } => commands::info::cmd_info(cli, &config, *json),
        Commands::Ls { path, json } => commands::files::cmd_ls(cli, &config, path, *json),
        Commands::Get { remote, local } => {
            commands::files::cmd_get(cli, &config, remote, local.as_deref())
        },
        Commands::Put { local, remote } => commands::files::cmd_put(cli, &config, local, remote),
        Commands::Run { file, follow } => commands::exec::cmd_run(cli, &config, file, *follow),
        Commands::Exec { code } => commands::exec::cmd_exec(cli, &config, code),
        Commands::Program {
            file,
            remote,
            follow,
        } => commands::exec::cmd_program(cli, &config, file, remote.as_deref(), *follow),
        Commands::Watch => commands::watch::cmd_watch(cli, &config),
        Commands::Upgrade => commands::upgrade::cmd_upgrade(cli, &config),
    }
}

/// Get serial port from CLI args, config or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &Config) -> Result<String> {
    let options = SerialOptions {
        port: cli
            .port
            .clone(),
        non_interactive: cli.non_interactive,
    };

    let selected = select_serial_port(&options, config)?;
    Ok(selected.name)
}

/// Session timeouts from the `[session]` config section.
pub(crate) fn board_options(config: &Config) -> BoardOptions {
    let mut options = BoardOptions::default();
    if let Some(ms) = config
        .session
        .boot_timeout_ms
    {
        options.boot_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = config
        .session
        .info_timeout_ms
    {
        options.info_timeout = Duration::from_millis(ms);
    }
    options
}

/// Status sink for commands that print their own results.
pub(crate) fn human_sink(cli: &Cli) -> Arc<CliSink> {
    Arc::new(CliSink::human(use_fancy_output() && !cli.quiet))
}

/// Select a port and attach the board on it.
///
/// The returned host owns the board; the sink is shared with it so the
/// caller can switch console echo on and off.
pub(crate) fn attach_board(
    cli: &Cli,
    config: &Config,
    sink: Arc<CliSink>,
) -> Result<BoardHost> {
    let port = get_port(cli, config)?;
    let services = Services::new(
        sink.clone(),
        Arc::new(LocalPackages::from_config(config)),
        Arc::new(ConfigBuildTracker::from_config(config)),
    );

    let host = BoardHost::new(board_options(config), services);
    sink.status(format!("Attaching board on {port}"));
    let result = host
        .attach(&port)
        .with_context(|| format!("Failed to attach board on {port}"));
    sink.clear_status();
    result?;
    Ok(host)
}
