//! Classified console output.
//!
//! Every line the emulator produces (or the runner synthesizes) becomes an
//! [`Io`] tagged with its origin. Programs match against the
//! [`Io::unformatted`] text, which has ANSI escape sequences and carriage
//! returns removed, since the serial console is full of colour codes and
//! cursor movement.

use std::fmt;

/// Origin of a line of output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoKind {
    /// Status message produced by the runner itself.
    Meta,
    /// Standard output of the driven process.
    Out,
    /// Standard error of the driven process.
    Err,
    /// Echo of input sent to the driven process.
    In,
}

impl IoKind {
    /// Map a textual origin to a kind. Unknown origins count as errors.
    pub fn from_origin(origin: &str) -> Self {
        match origin.trim().to_ascii_lowercase().as_str() {
            "meta" => IoKind::Meta,
            "out" | "stdout" => IoKind::Out,
            "in" | "stdin" => IoKind::In,
            _ => IoKind::Err,
        }
    }
}

impl fmt::Display for IoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoKind::Meta => write!(f, "META"),
            IoKind::Out => write!(f, "OUT"),
            IoKind::Err => write!(f, "ERR"),
            IoKind::In => write!(f, "IN"),
        }
    }
}

/// A single classified line of output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Io {
    kind: IoKind,
    raw: String,
    unformatted: String,
    blank: bool,
}

impl Io {
    pub fn new(kind: IoKind, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let unformatted = strip_ansi(raw.as_bytes());
        let blank = unformatted.trim().is_empty();
        Self {
            kind,
            raw,
            unformatted,
            blank,
        }
    }

    pub fn meta(text: impl Into<String>) -> Self {
        Self::new(IoKind::Meta, text)
    }

    pub fn out(text: impl Into<String>) -> Self {
        Self::new(IoKind::Out, text)
    }

    pub fn err(text: impl Into<String>) -> Self {
        Self::new(IoKind::Err, text)
    }

    pub fn input(text: impl Into<String>) -> Self {
        Self::new(IoKind::In, text)
    }

    pub fn kind(&self) -> IoKind {
        self.kind
    }

    /// The text exactly as received.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The text with escape sequences and carriage returns removed.
    pub fn unformatted(&self) -> &str {
        &self.unformatted
    }

    pub fn is_blank(&self) -> bool {
        self.blank
    }

    /// Whether this line came from the driven process (stdout or stderr).
    pub fn is_process_output(&self) -> bool {
        matches!(self.kind, IoKind::Out | IoKind::Err)
    }
}

impl fmt::Display for Io {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.unformatted)
    }
}

/// Strip ANSI escape sequences and carriage returns, returning UTF-8 text.
///
/// Handles CSI (`ESC [`), OSC (`ESC ]` terminated by BEL or `ESC \`),
/// two-byte escapes such as `ESC M`, and the C1 CSI `U+009B`. Input is
/// decoded first (invalid UTF-8 is replaced lossily), so continuation bytes
/// of multi-byte characters are never mistaken for control bytes.
pub fn strip_ansi(input: &[u8]) -> String {
    let text = String::from_utf8_lossy(input);
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\u{1b}' => match chars.next() {
                Some('[') => skip_csi(&mut chars),
                Some(']') => {
                    while let Some(c) = chars.next() {
                        if c == '\u{07}' {
                            break;
                        }
                        if c == '\u{1b}' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            },
            '\u{9b}' => skip_csi(&mut chars),
            '\r' => {}
            c => out.push(c),
        }
    }

    out
}

fn skip_csi(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    // parameter and intermediate bytes, then one final byte
    while chars.next_if(|c| ('\u{20}'..='\u{3f}').contains(c)).is_some() {}
    chars.next_if(|c| ('\u{40}'..='\u{7e}').contains(c));
}

/// Splits raw console chunks into lines.
///
/// Serial consoles print prompts such as `raspberrypi login: ` without a
/// trailing newline, so a reader must be able to hand out the pending
/// partial line once the stream goes quiet. Completed lines never include
/// the `\n` nor a trailing `\r`.
#[derive(Debug, Default)]
pub struct LineAssembler {
    partial: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the lines it completed.
    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        let mut completed = Vec::new();
        for &byte in data {
            if byte == b'\n' {
                let mut line = std::mem::take(&mut self.partial);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                completed.push(String::from_utf8_lossy(&line).into_owned());
            } else {
                self.partial.push(byte);
            }
        }
        completed
    }

    /// Take the unterminated remainder, if any.
    pub fn flush_partial(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.partial);
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    pub fn has_partial(&self) -> bool {
        !self.partial.is_empty()
    }
}
