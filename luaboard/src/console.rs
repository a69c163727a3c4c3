//! Console passthrough text decoding.
//!
//! The inspector hands console bytes to the sink one at a time, so multi-byte
//! UTF-8 sequences arrive split. [`ConsoleDecoder`] buffers incomplete
//! sequences and replaces invalid ones without stalling.

/// Incremental lossy UTF-8 decoder for console bytes.
#[derive(Debug, Default)]
pub struct ConsoleDecoder {
    pending: Vec<u8>,
}

impl ConsoleDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return the text that is complete so far.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        drain_utf8_lossy(&mut self.pending)
    }

    /// Bytes held back as an incomplete sequence.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }
}

/// Drain buffered bytes into displayable UTF-8 text.
///
/// - Valid UTF-8 is emitted as-is.
/// - Invalid byte sequences emit the replacement char `�` and continue.
/// - An incomplete UTF-8 suffix is kept in `buffer` for the next call.
pub fn drain_utf8_lossy(buffer: &mut Vec<u8>) -> String {
    let mut output = String::new();

    loop {
        match std::str::from_utf8(buffer) {
            Ok(valid) => {
                output.push_str(valid);
                buffer.clear();
                break;
            },
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                if let Ok(valid) = std::str::from_utf8(&buffer[..valid_up_to]) {
                    output.push_str(valid);
                }

                match err.error_len() {
                    Some(invalid_len) => {
                        output.push('\u{FFFD}');
                        let drain_to = valid_up_to.saturating_add(invalid_len).min(buffer.len());
                        buffer.drain(..drain_to);
                    },
                    None => {
                        buffer.drain(..valid_up_to);
                        break;
                    },
                }
            },
        }
    }

    output
}

/// Drop carriage returns and control characters other than `\n` and `\t`.
pub fn clean_console_text(text: &str) -> String {
    text.chars()
        .filter(|&ch| matches!(ch, '\n' | '\t') || !ch.is_control())
        .collect()
}
