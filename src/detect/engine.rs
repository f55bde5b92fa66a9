//! Stateful detector turning output chunks into detection events.

use std::sync::Arc;

use serde::Serialize;

use super::lines::LineSplitter;
use super::rules::{default_rules, Category, PatternRule};

/// A structured signal emitted when an output line matches a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionEvent {
    pub rule: &'static str,
    pub category: Category,
    /// Port extracted by a tunnel-trigger rule.
    pub port: Option<u16>,
    /// The text the rule matched.
    pub matched: String,
    /// The full plain-text line containing the match.
    pub line: String,
}

impl DetectionEvent {
    /// Whether this event asks for a tunnel.
    pub fn tunnel_port(&self) -> Option<u16> {
        match self.category {
            Category::LocalAddress | Category::ReadyPhrase => self.port,
            _ => None,
        }
    }
}

/// Matches rules against logical lines of a byte stream.
///
/// The rule list is shared and never mutated; each detector owns the carry
/// buffer for one output stream.
pub struct PatternDetector {
    rules: Arc<[PatternRule]>,
    lines: LineSplitter,
}

impl PatternDetector {
    pub fn new(rules: Arc<[PatternRule]>) -> Self {
        Self {
            rules,
            lines: LineSplitter::new(),
        }
    }

    /// A detector over the built-in rule list.
    pub fn with_default_rules() -> Result<Self, regex::Error> {
        Ok(Self::new(default_rules()?.into()))
    }

    /// Consume a chunk of raw output and return the events for every line it completed.
    pub fn consume(&mut self, chunk: &[u8]) -> Vec<DetectionEvent> {
        let lines = self.lines.push(chunk);
        lines.iter().flat_map(|line| self.scan_line(line)).collect()
    }

    /// Evaluate every rule against one line, in rule-list order.
    ///
    /// A port reported by an earlier trigger rule is not reported again by a
    /// later one on the same line.
    pub fn scan_line(&self, line: &str) -> Vec<DetectionEvent> {
        let mut events = Vec::new();
        let mut claimed: Vec<u16> = Vec::new();
        for rule in self.rules.iter() {
            for (matched, port) in rule.matches(line) {
                if let Some(port) = port {
                    if claimed.contains(&port) {
                        continue;
                    }
                    claimed.push(port);
                }
                events.push(DetectionEvent {
                    rule: rule.name(),
                    category: rule.category(),
                    port,
                    matched,
                    line: line.to_string(),
                });
            }
        }
        events
    }
}
