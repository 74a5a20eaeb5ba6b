//! Console abstraction for `print` and the console built-ins.
//!
//! The VM never talks to stdin/stdout directly; it goes through a
//! [`ConsoleWriter`], so embedders and tests can capture program output and
//! script input without touching process streams.

use std::{
    collections::VecDeque,
    io::{self, BufRead as _, Write as _},
};

/// Destination for program output and source of `readln` input.
pub trait ConsoleWriter {
    /// Writes one value's textual form, without separators or newline.
    fn stdout_write(&mut self, text: &str);

    /// Writes a single character (used for the newline terminator).
    fn stdout_push(&mut self, ch: char);

    /// Reads one line of input, without the trailing newline.
    fn read_line(&mut self) -> String;
}

/// Writer backed by the process's stdin/stdout.
#[derive(Debug, Default)]
pub struct StdoutWriter;

impl ConsoleWriter for StdoutWriter {
    fn stdout_write(&mut self, text: &str) {
        print!("{text}");
    }

    fn stdout_push(&mut self, ch: char) {
        print!("{ch}");
        if ch == '\n' {
            let _ = io::stdout().flush();
        }
    }

    fn read_line(&mut self) -> String {
        let _ = io::stdout().flush();
        let mut line = String::new();
        let _ = io::stdin().lock().read_line(&mut line);
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        line
    }
}

/// Writer that collects output in memory and serves scripted input lines.
#[derive(Debug, Default)]
pub struct CaptureWriter {
    pub output: String,
    input: VecDeque<String>,
}

impl CaptureWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues lines to be returned by `readln`, in order.
    #[must_use]
    pub fn with_input(lines: &[&str]) -> Self {
        Self {
            output: String::new(),
            input: lines.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

impl ConsoleWriter for CaptureWriter {
    fn stdout_write(&mut self, text: &str) {
        self.output.push_str(text);
    }

    fn stdout_push(&mut self, ch: char) {
        self.output.push(ch);
    }

    fn read_line(&mut self) -> String {
        self.input.pop_front().unwrap_or_default()
    }
}
