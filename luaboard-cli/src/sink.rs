//! Event sink for the command line.
//!
//! In JSON mode every event is one JSON object per line on stdout, ready for
//! `jq` or another program. Otherwise events become status text on stderr.
//! Console passthrough goes to stderr in both modes when echo is on.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use luaboard::{ConsoleDecoder, Event, EventSink, clean_console_text};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

type Output = Box<dyn Write + Send>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Decode a base64 event field for display.
fn decode_field(text: &str) -> String {
    STANDARD
        .decode(text)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_else(|_| text.to_string())
}

/// Sink that reports board events on the terminal.
pub(crate) struct CliSink {
    json: bool,
    echo_console: AtomicBool,
    out: Mutex<Output>,
    decoder: Mutex<ConsoleDecoder>,
    fancy: bool,
    status: Mutex<Option<ProgressBar>>,
}

impl CliSink {
    /// Human-readable sink with a spinner when `fancy`.
    pub(crate) fn human(fancy: bool) -> Self {
        Self::with_output(false, Box::new(io::stdout()), fancy)
    }

    /// JSON-lines sink writing events to stdout.
    pub(crate) fn json_lines() -> Self {
        Self::with_output(true, Box::new(io::stdout()), false)
    }

    fn with_output(json: bool, out: Output, fancy: bool) -> Self {
        Self {
            json,
            echo_console: AtomicBool::new(false),
            out: Mutex::new(out),
            decoder: Mutex::new(ConsoleDecoder::new()),
            fancy,
            status: Mutex::new(None),
        }
    }

    /// Forward console passthrough to stderr.
    pub(crate) fn set_console_echo(&self, on: bool) {
        self.echo_console.store(on, Ordering::Relaxed);
    }

    /// Show a status line (spinner) until cleared.
    pub(crate) fn status(&self, message: String) {
        if !self.fancy {
            info!("{message}");
            return;
        }
        let mut status = lock(&self.status);
        let pb = status.get_or_insert_with(|| {
            let pb = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg}") {
                pb.set_style(style);
            }
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        });
        pb.set_message(message);
    }

    /// Remove the status line.
    pub(crate) fn clear_status(&self) {
        if let Some(pb) = lock(&self.status).take() {
            pb.finish_and_clear();
        }
    }

    /// Run `f` with the status line hidden.
    fn suspend<F: FnOnce()>(&self, f: F) {
        match lock(&self.status).as_ref() {
            Some(pb) => pb.suspend(f),
            None => f(),
        }
    }

    fn write_json(&self, event: &Event) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to encode {} event: {e}", event.name());
                return;
            },
        };
        let mut out = lock(&self.out);
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }

    fn report(&self, event: &Event) {
        match event {
            Event::Update { message } => match lock(&self.status).as_ref() {
                Some(pb) => pb.set_message(message.clone()),
                None => info!("{message}"),
            },
            Event::RuntimeError {
                location,
                line,
                message,
                ..
            } => {
                let text = format!(
                    "{} {location}:{line}: {}",
                    style("Runtime error").red().bold(),
                    decode_field(message)
                );
                self.suspend(|| eprintln!("{text}"));
            },
            Event::BlockError { block, error } => {
                warn!("Block {} failed: {}", decode_field(block), decode_field(error));
            },
            Event::BlockStart { block } | Event::BlockEnd { block } => {
                debug!("{} {}", event.name(), decode_field(block));
            },
            Event::PowerOnReset | Event::SoftwareReset | Event::DeepSleepReset => {
                info!("Board reset ({})", event.name());
            },
            Event::Attached | Event::Detached => debug!("{}", event.name()),
        }
    }
}

impl EventSink for CliSink {
    fn emit(&self, event: Event) {
        if self.json {
            self.write_json(&event);
        } else {
            self.report(&event);
        }
    }

    fn console(&self, bytes: &[u8]) {
        if !self.echo_console.load(Ordering::Relaxed) {
            return;
        }
        let text = clean_console_text(&lock(&self.decoder).push(bytes));
        if !text.is_empty() {
            self.suspend(|| {
                let mut stderr = io::stderr().lock();
                let _ = stderr.write_all(text.as_bytes());
                let _ = stderr.flush();
            });
        }
    }
}
