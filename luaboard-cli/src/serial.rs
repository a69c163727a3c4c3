//! Interactive serial port selection.
//!
//! A port is chosen from, in order: the `--port` flag, the `[port]` config
//! section, a single recognised board, or a `dialoguer` menu. Non-interactive
//! mode never prompts.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, info},
    luaboard::{DetectedPort, detect_ports, format_port_list, select_port},
    std::{cmp::Ordering, io::IsTerminal},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail if the choice is ambiguous).
    pub non_interactive: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

fn cancelled() -> anyhow::Error {
    CliError::Cancelled("Port selection cancelled".to_string()).into()
}

/// Recognised boards first; every port if none is recognised.
fn candidates(ports: Vec<DetectedPort>) -> Vec<DetectedPort> {
    if ports.iter().any(DetectedPort::is_likely_board) {
        ports
            .into_iter()
            .filter(DetectedPort::is_likely_board)
            .collect()
    } else {
        ports
    }
}

fn select_non_interactive_port(ports: Vec<DetectedPort>) -> Result<DetectedPort> {
    match ports
        .len()
        .cmp(&1)
    {
        Ordering::Equal => ports
            .into_iter()
            .next()
            .ok_or_else(|| usage_err("No serial ports available")),
        Ordering::Greater => {
            // A single Espressif device still counts as unambiguous.
            let espressif: Vec<&DetectedPort> = ports
                .iter()
                .filter(|p| p.device == luaboard::DeviceKind::Espressif)
                .collect();
            if let [only] = espressif.as_slice() {
                return Ok((*only).clone());
            }
            Err(usage_err(
                "Found multiple serial ports; pass --port in non-interactive mode",
            ))
        },
        Ordering::Less => Err(usage_err("No serial ports available")),
    }
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<DetectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name));
    }

    if let Some(port_name) = &config
        .port
        .serial
    {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name));
    }

    let ports = detect_ports();
    if ports.is_empty() {
        return Err(usage_err("No serial ports found; is the board plugged in?"));
    }

    let ports = candidates(ports);

    if options.non_interactive {
        return select_non_interactive_port(ports);
    }

    match ports
        .len()
        .cmp(&1)
    {
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_port_interactive(ports)
        },
        Ordering::Equal => {
            let port = ports
                .into_iter()
                .next()
                .ok_or_else(|| usage_err("No serial ports available"))?;
            if port.is_likely_board() {
                info!(
                    "Auto-selected port: {} [{}]",
                    port.name,
                    port.device
                        .name()
                );
                Ok(port)
            } else {
                ensure_interactive_terminal()?;
                confirm_single_port(port)
            }
        },
        Ordering::Less => Err(usage_err("No serial ports available")),
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Port selection needs an interactive terminal; pass --port",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                cancelled()
            } else {
                usage_err(&format!("Prompt failed: {io_err}"))
            }
        },
    }
}

/// Find a port by name, keeping an unlisted name as given.
fn find_port_by_name(name: &str) -> DetectedPort {
    let ports = detect_ports();
    ports
        .iter()
        .find(|p| p.name == name)
        .or_else(|| {
            ports
                .iter()
                .find(|p| {
                    p.name
                        .eq_ignore_ascii_case(name)
                })
        })
        .cloned()
        .unwrap_or_else(|| unlisted_port(name))
}

fn unlisted_port(name: &str) -> DetectedPort {
    DetectedPort {
        name: name.to_string(),
        device: luaboard::DeviceKind::Unknown,
        vid: None,
        pid: None,
        manufacturer: None,
        product: None,
        serial: None,
    }
}

/// Interactive port selection.
fn select_port_interactive(ports: Vec<DetectedPort>) -> Result<DetectedPort> {
    eprintln!(
        "{} Detected {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    // Preselect the port auto-detection would have picked.
    let default = select_port(&ports)
        .and_then(|best| {
            ports
                .iter()
                .position(|p| p.name == best.name)
        })
        .unwrap_or(0);

    let term_width = usize::from(
        console::Term::stderr()
            .size()
            .1,
    );
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = format_port_list(&ports)
        .into_iter()
        .map(|n| console::truncate_str(&n, max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the board's serial port")
        .items(&labels)
        .default(default)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => ports
            .into_iter()
            .nth(index)
            .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}")),
        None => Err(cancelled()),
    }
}

/// Confirm use of a single unrecognised port.
fn confirm_single_port(port: DetectedPort) -> Result<DetectedPort> {
    let product_info = port
        .product
        .as_ref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use {}{product_info}?", port.name))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed { Ok(port) } else { Err(cancelled()) }
}
