//! Console inspector.
//!
//! The inspector is the only reader of the link. It runs on its own thread
//! for the life of the link, reads one byte at a time, classifies every
//! completed line into [`Event`]s and forwards each raw byte to the command
//! queue (and to the console sink while passthrough is on).
//!
//! ```text
//! link --byte--> [line accumulator] --LF--> classifier --> EventSink::emit
//!        |
//!        +-----> ByteQueue (bounded) --> Shell
//!        +-----> EventSink::console   (passthrough only)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use regex::{Captures, Regex};

use crate::error::Result;
use crate::event::{Event, EventSink, encode_text};
use crate::link::LinkReader;

/// Capacity of the byte queue between inspector and shell.
pub const QUEUE_CAPACITY: usize = 10 * 1024;

/// Flags shared between the inspector thread and the session.
#[derive(Debug)]
pub struct SessionFlags {
    console: AtomicBool,
    quiet_boot: AtomicBool,
}

impl Default for SessionFlags {
    fn default() -> Self {
        Self {
            console: AtomicBool::new(true),
            quiet_boot: AtomicBool::new(false),
        }
    }
}

impl SessionFlags {
    /// Whether console bytes are duplicated to the sink.
    pub fn console_enabled(&self) -> bool {
        self.console.load(Ordering::Acquire)
    }

    /// Enable or disable console passthrough.
    pub fn set_console(&self, enabled: bool) {
        self.console.store(enabled, Ordering::Release);
    }

    /// Whether boot and block notifications are suppressed.
    pub fn boot_notify_suppressed(&self) -> bool {
        self.quiet_boot.load(Ordering::Acquire)
    }

    /// Suppress or restore boot and block notifications.
    pub fn set_boot_notify_suppressed(&self, suppressed: bool) {
        self.quiet_boot.store(suppressed, Ordering::Release);
    }

    /// Turn console passthrough off until the returned guard drops.
    pub fn mute_console(self: &Arc<Self>) -> ConsoleMute {
        ConsoleMute::new(Arc::clone(self))
    }

    /// Suppress boot and block notifications until the returned guard drops.
    pub fn quiet_boot(self: &Arc<Self>) -> QuietBoot {
        self.set_boot_notify_suppressed(true);
        QuietBoot {
            flags: Arc::clone(self),
        }
    }
}

/// Scope guard for console passthrough.
///
/// Passthrough is turned off on creation and back on when the guard drops,
/// on every exit path.
#[must_use = "passthrough is restored as soon as the guard is dropped"]
pub struct ConsoleMute {
    flags: Arc<SessionFlags>,
}

impl ConsoleMute {
    fn new(flags: Arc<SessionFlags>) -> Self {
        flags.set_console(false);
        Self { flags }
    }
}

impl Drop for ConsoleMute {
    fn drop(&mut self) {
        self.flags.set_console(true);
    }
}

/// Scope guard for boot-notify suppression.
#[must_use = "notifications are restored as soon as the guard is dropped"]
pub struct QuietBoot {
    flags: Arc<SessionFlags>,
}

impl Drop for QuietBoot {
    fn drop(&mut self) {
        self.flags.set_boot_notify_suppressed(false);
    }
}

type Handler = fn(&Captures<'_>) -> Event;

struct Rule {
    pattern: Regex,
    handler: Handler,
}

impl Rule {
    fn new(pattern: &str, handler: Handler) -> Self {
        Self {
            pattern: Regex::new(pattern).expect("static inspector pattern"),
            handler,
        }
    }
}

fn capture(caps: &Captures<'_>, index: usize) -> String {
    caps.get(index)
        .map_or_else(String::new, |m| m.as_str().to_string())
}

/// Ordered line classification table.
///
/// Boot rules are evaluated independently (a line may in principle match
/// more than one). Runtime-error rules are evaluated in order and the first
/// match wins.
pub struct Classifier {
    boot: Vec<Rule>,
    runtime: Vec<Rule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    /// Compile the classification table.
    pub fn new() -> Self {
        let boot = vec![
            Rule::new(r"^rst:.*\(POWERON_RESET\),boot:", |_| Event::PowerOnReset),
            Rule::new(r"^rst:.*\(SW_CPU_RESET\),boot:", |_| Event::SoftwareReset),
            Rule::new(r"^rst:.*\(DEEPSLEEP_RESET\),boot", |_| {
                Event::DeepSleepReset
            }),
            Rule::new(r"<blockStart,(.*)>", |c| Event::BlockStart {
                block: encode_text(&capture(c, 1)),
            }),
            Rule::new(r"<blockEnd,(.*)>", |c| Event::BlockEnd {
                block: encode_text(&capture(c, 1)),
            }),
            Rule::new(r"<blockError,(.*),(.*)>", |c| Event::BlockError {
                block: encode_text(&capture(c, 1)),
                error: encode_text(&capture(c, 2)),
            }),
        ];

        let runtime = vec![
            Rule::new(r"^([A-Za-z_/][\w./-]*):(\d+):\s(\d+):\s*(.*)$", |c| {
                Event::RuntimeError {
                    location: capture(c, 1),
                    line: capture(c, 2),
                    exception: capture(c, 3),
                    message: encode_text(&capture(c, 4)),
                }
            }),
            Rule::new(r"^([A-Za-z_/][\w./-]*):(\d+):\s*(.*)$", |c| Event::RuntimeError {
                location: capture(c, 1),
                line: capture(c, 2),
                exception: "0".to_string(),
                message: encode_text(&capture(c, 3)),
            }),
        ];

        Self { boot, runtime }
    }

    /// Classify one completed line (without CR/LF).
    pub fn classify(&self, line: &str, suppress_boot: bool) -> Vec<Event> {
        let mut events = Vec::new();

        if !suppress_boot {
            for rule in &self.boot {
                if let Some(caps) = rule.pattern.captures(line) {
                    events.push((rule.handler)(&caps));
                }
            }
        }

        if let Some(event) = self
            .runtime
            .iter()
            .find_map(|rule| rule.pattern.captures(line).map(|caps| (rule.handler)(&caps)))
        {
            events.push(event);
        }

        events
    }
}

/// Handle to a running inspector thread.
pub struct Inspector {
    handle: Option<JoinHandle<()>>,
}

impl Inspector {
    /// Start the inspector thread.
    ///
    /// Returns the handle and the consumer end of the byte queue.
    pub fn spawn(
        reader: LinkReader,
        flags: Arc<SessionFlags>,
        sink: Arc<dyn EventSink>,
    ) -> Result<(Self, Receiver<u8>)> {
        let (queue, rx) = sync_channel(QUEUE_CAPACITY);

        let handle = thread::Builder::new()
            .name("luaboard-inspector".into())
            .spawn(move || run(reader, &queue, &flags, sink.as_ref()))?;

        Ok((
            Self {
                handle: Some(handle),
            },
            rx,
        ))
    }

    /// Whether the thread has exited (link closed or lost).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait up to `timeout` for the thread to exit.
    ///
    /// Returns `false` if it is still running after the timeout; the thread is
    /// then left detached.
    pub fn join_timeout(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_finished() {
            if Instant::now() >= deadline {
                warn!("Inspector did not stop within {timeout:?}");
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        true
    }
}

fn run(
    mut reader: LinkReader,
    queue: &SyncSender<u8>,
    flags: &SessionFlags,
    sink: &dyn EventSink,
) {
    debug!("Inspector started");
    let classifier = Classifier::new();
    let mut line: Vec<u8> = Vec::with_capacity(256);

    loop {
        let byte = match reader.read_byte() {
            Ok(byte) => byte,
            Err(e) => {
                debug!("Inspector stopping: {e}");
                break;
            },
        };

        match byte {
            b'\n' => {
                let text = String::from_utf8_lossy(&line);
                trace!("RX line: {text}");
                for event in classifier.classify(&text, flags.boot_notify_suppressed()) {
                    debug!("Event {}", event.name());
                    sink.emit(event);
                }
                line.clear();
            },
            b'\r' => {},
            _ => line.push(byte),
        }

        if flags.console_enabled() {
            sink.console(&[byte]);
        }

        if !enqueue(queue, byte, &reader) {
            break;
        }
    }

    debug!("Inspector stopped");
}

/// Push a byte, waiting while the queue is full. Gives up once the link is
/// closed or the consumer is gone.
fn enqueue(queue: &SyncSender<u8>, byte: u8, reader: &LinkReader) -> bool {
    let mut pending = byte;
    loop {
        match queue.try_send(pending) {
            Ok(()) => return true,
            Err(TrySendError::Disconnected(_)) => {
                debug!("Byte queue consumer gone");
                return false;
            },
            Err(TrySendError::Full(b)) => {
                if reader.is_closed() {
                    return false;
                }
                pending = b;
                thread::sleep(Duration::from_millis(1));
            },
        }
    }
}
