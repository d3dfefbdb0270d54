//! Line demultiplexer for raw PTY output.

use crate::dialect::{Dialect, LineKind};
use std::sync::Arc;

/// A classified line of tool output, ANSI escapes and trailing whitespace
/// removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub kind: LineKind,
    pub text: String,
}

impl Line {
    #[must_use]
    pub fn output(text: impl Into<String>) -> Self {
        Self {
            kind: LineKind::Output,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            kind: LineKind::Prompt,
            text: text.into(),
        }
    }
}

/// Turns arbitrarily split output chunks into whole, classified lines.
///
/// The tool prints its prompt and its password/2FA questions without a
/// trailing newline, so an unterminated line that starts with the prompt or
/// holds an interactive question is emitted as soon as it is seen. When that
/// physical line is terminated later, only the part not yet emitted is
/// produced. The sequence of emitted lines does not depend on where chunk
/// boundaries fall.
pub struct LineDemux {
    dialect: Arc<dyn Dialect>,
    /// Bytes of the current, unterminated line not emitted yet.
    partial: Vec<u8>,
    /// Part of the current physical line was already emitted.
    continuation: bool,
}

impl LineDemux {
    #[must_use]
    pub fn new(dialect: Arc<dyn Dialect>) -> Self {
        Self {
            dialect,
            partial: Vec::new(),
            continuation: false,
        }
    }

    /// Feed a chunk of raw output, returning every line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Line> {
        let mut lines = Vec::new();
        self.partial.extend_from_slice(chunk);

        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.partial.drain(..=pos).collect();
            let mut text = clean(&raw[..pos]);
            if std::mem::replace(&mut self.continuation, false) {
                text = text.trim_start().to_string();
                if text.is_empty() {
                    continue;
                }
            }
            self.segment(text, &mut lines);
        }

        if !self.partial.is_empty() {
            let mut text = clean(&self.partial);
            if self.continuation {
                text = text.trim_start().to_string();
            }
            if self.should_flush(&text) {
                self.partial.clear();
                self.continuation = true;
                self.segment(text, &mut lines);
            }
        }

        lines
    }

    /// Bytes held back waiting for a newline.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.partial
    }

    /// An unterminated line is flushed when it is nothing but prompt markers,
    /// or ends in an interactive question. Anything else waits for its
    /// newline.
    fn should_flush(&self, text: &str) -> bool {
        let prompt = self.dialect.prompt();
        let mut rest = text;
        while let Some(after) = rest.strip_prefix(prompt) {
            rest = after.trim_start();
        }
        if rest.is_empty() {
            return !text.is_empty();
        }
        self.dialect.classify(rest).is_interactive()
    }

    /// Split off any leading prompt markers, then classify the rest.
    fn segment(&self, mut text: String, lines: &mut Vec<Line>) {
        let prompt = self.dialect.prompt();
        while let Some(rest) = text.strip_prefix(prompt) {
            let rest = rest.trim_start().to_string();
            lines.push(Line::prompt(prompt));
            if rest.is_empty() {
                return;
            }
            text = rest;
        }
        let kind = self.dialect.classify(&text);
        lines.push(Line { kind, text });
    }
}

fn clean(raw: &[u8]) -> String {
    let stripped = strip_ansi_escapes::strip(raw);
    String::from_utf8_lossy(&stripped).trim_end().to_string()
}
