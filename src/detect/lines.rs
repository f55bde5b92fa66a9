//! Logical line assembly from raw terminal output.

use vte::{Parser, Perform};

/// Default cap on a single unterminated line, in characters.
pub const DEFAULT_MAX_LINE: usize = 4096;

/// Splits a terminal byte stream into plain-text lines.
///
/// Escape sequences are consumed by a stateful VTE parser, so a color code
/// or a multi-byte character split across two chunks is still handled. Text
/// without a line terminator is carried over to the next chunk; once the
/// carry reaches the cap it is flushed as a line of its own.
pub struct LineSplitter {
    parser: Parser,
    collector: LineCollector,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE)
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            parser: Parser::new(),
            collector: LineCollector {
                current: String::new(),
                chars: 0,
                complete: Vec::new(),
                max_line: max_line.max(1),
            },
        }
    }

    /// Feed a chunk and return the lines it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.parser.advance(&mut self.collector, chunk);
        std::mem::take(&mut self.collector.complete)
    }
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::new()
    }
}

struct LineCollector {
    current: String,
    chars: usize,
    complete: Vec<String>,
    max_line: usize,
}

impl LineCollector {
    fn finish_line(&mut self) {
        let line = std::mem::take(&mut self.current);
        self.chars = 0;
        if !line.trim().is_empty() {
            self.complete.push(line);
        }
    }
}

impl Perform for LineCollector {
    fn print(&mut self, c: char) {
        self.current.push(c);
        self.chars += 1;
        if self.chars >= self.max_line {
            self.finish_line();
        }
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' | b'\r' => self.finish_line(),
            b'\t' => {
                self.current.push('\t');
                self.chars += 1;
            }
            _ => {}
        }
    }
}
