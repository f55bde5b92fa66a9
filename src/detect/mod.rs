//! Pattern detection over PTY output.
//!
//! Raw output is assembled into plain-text lines (escape sequences removed,
//! partial lines carried between chunks) and every line is evaluated against
//! an ordered list of [`PatternRule`]s. Rules either trigger tunnels for an
//! extracted port or annotate the line for viewers.

mod engine;
mod lines;
mod rules;

pub use engine::{DetectionEvent, PatternDetector};
pub use lines::{LineSplitter, DEFAULT_MAX_LINE};
pub use rules::{default_rules, Category, PatternRule, PortExtractor};
