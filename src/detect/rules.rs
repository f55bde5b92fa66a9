//! Pattern rules matched against terminal output lines.

use regex::{Captures, Regex};
use serde::Serialize;

/// What a matched line means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// A loopback or wildcard address followed by a port.
    LocalAddress,
    /// A phrase announcing that a server is listening.
    ReadyPhrase,
    Error,
    Warning,
    FileCreated,
    BuildComplete,
    TestResult,
}

impl Category {
    /// Short tag used when annotating log lines for viewers.
    pub fn label(&self) -> &'static str {
        match self {
            Self::LocalAddress => "server",
            Self::ReadyPhrase => "ready",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::FileCreated => "file",
            Self::BuildComplete => "build",
            Self::TestResult => "test",
        }
    }
}

/// How a tunnel-trigger rule pulls the port out of its match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortExtractor {
    /// First capture group that participated in the match.
    FirstCapture,
    /// A specific capture group.
    Group(usize),
}

impl PortExtractor {
    fn extract(&self, caps: &Captures<'_>) -> Option<u16> {
        let text = match self {
            Self::FirstCapture => caps.iter().skip(1).flatten().next()?.as_str(),
            Self::Group(index) => caps.get(*index)?.as_str(),
        };
        text.parse::<u16>().ok().filter(|port| *port != 0)
    }
}

/// A single immutable detection rule.
#[derive(Debug, Clone)]
pub enum PatternRule {
    /// Lines that announce a local port worth publishing.
    TunnelTrigger {
        name: &'static str,
        regex: Regex,
        category: Category,
        port: PortExtractor,
    },
    /// Lines worth annotating for viewers; never reach the tunnel manager.
    Informational {
        name: &'static str,
        regex: Regex,
        category: Category,
    },
}

impl PatternRule {
    pub fn trigger(
        name: &'static str,
        pattern: &str,
        category: Category,
        port: PortExtractor,
    ) -> Result<Self, regex::Error> {
        Ok(Self::TunnelTrigger {
            name,
            regex: Regex::new(pattern)?,
            category,
            port,
        })
    }

    pub fn informational(
        name: &'static str,
        pattern: &str,
        category: Category,
    ) -> Result<Self, regex::Error> {
        Ok(Self::Informational {
            name,
            regex: Regex::new(pattern)?,
            category,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::TunnelTrigger { name, .. } | Self::Informational { name, .. } => name,
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Self::TunnelTrigger { category, .. } | Self::Informational { category, .. } => {
                *category
            }
        }
    }

    /// Every `(matched text, port)` this rule finds in `line`.
    ///
    /// Trigger rules report each distinct port once; informational rules
    /// report their first match with no port.
    pub fn matches(&self, line: &str) -> Vec<(String, Option<u16>)> {
        match self {
            Self::TunnelTrigger { regex, port, .. } => {
                let mut seen = Vec::new();
                let mut found = Vec::new();
                for caps in regex.captures_iter(line) {
                    let Some(p) = port.extract(&caps) else {
                        continue;
                    };
                    if seen.contains(&p) {
                        continue;
                    }
                    seen.push(p);
                    found.push((caps[0].to_string(), Some(p)));
                }
                found
            }
            Self::Informational { regex, .. } => regex
                .find(line)
                .map(|m| vec![(m.as_str().to_string(), None)])
                .unwrap_or_default(),
        }
    }
}

/// The built-in rule list, in evaluation order.
pub fn default_rules() -> Result<Vec<PatternRule>, regex::Error> {
    use Category::*;

    Ok(vec![
        PatternRule::trigger(
            "local_address",
            r"(?:https?://)?(?:localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1?\]):(\d{1,5})\b",
            LocalAddress,
            PortExtractor::FirstCapture,
        )?,
        PatternRule::trigger(
            "listening_on_port",
            r"(?i)\b(?:listening|running|started|serving)\b.*?\b(?:port|on|at)\b\s*:?\s*(?:(?:https?://)?[\w.\-]+:)?(\d{2,5})(?:[^\d.:\-]|[.:\-](?:\D|$)|$)",
            ReadyPhrase,
            PortExtractor::Group(1),
        )?,
        PatternRule::informational(
            "server_ready",
            r"(?i)(?:server|development server|dev server).*?(?:running|listening|started|ready|available)",
            ReadyPhrase,
        )?,
        PatternRule::informational("error", r"(?:ERROR|Error|error|FAIL|Failed|failed):", Error)?,
        PatternRule::informational("warning", r"(?:WARNING|Warning|warning|WARN):", Warning)?,
        PatternRule::informational(
            "file_created",
            r"(?i)(?:created|writing|saved|wrote).*?(?:file|to):\s*(.+)",
            FileCreated,
        )?,
        PatternRule::informational(
            "build_complete",
            r"(?i)(?:build|compilation|compile).*?(?:complete|successful|finished|done)",
            BuildComplete,
        )?,
        PatternRule::informational(
            "test_result",
            r"(?i)(?:tests?|specs?).*?(?:passed|failed|complete|finished)",
            TestResult,
        )?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(name: &str) -> PatternRule {
        default_rules()
            .unwrap()
            .into_iter()
            .find(|r| r.name() == name)
            .unwrap()
    }

    #[test]
    fn test_default_rules_compile() {
        let rules = default_rules().unwrap();
        assert_eq!(rules.len(), 8);
        assert!(matches!(rules[0], PatternRule::TunnelTrigger { .. }));
        assert_eq!(rules[0].category(), Category::LocalAddress);
    }

    #[test]
    fn test_local_address_forms() {
        let local = rule("local_address");
        for (line, port) in [
            ("Local: http://localhost:5173/", 5173),
            ("on 127.0.0.1:8080", 8080),
            ("bound https://0.0.0.0:4443", 4443),
            ("ipv6 http://[::1]:3001", 3001),
            ("ipv6 any [::]:9000", 9000),
        ] {
            let found = local.matches(line);
            assert_eq!(found.len(), 1, "{line}");
            assert_eq!(found[0].1, Some(port), "{line}");
        }
    }

    #[test]
    fn test_local_address_distinct_ports() {
        let found = rule("local_address").matches("localhost:3000 and localhost:3000, localhost:3001");
        let ports: Vec<_> = found.iter().map(|(_, p)| *p).collect();
        assert_eq!(ports, vec![Some(3000), Some(3001)]);
    }

    #[test]
    fn test_out_of_range_port_ignored() {
        assert!(rule("local_address").matches("localhost:99999").is_empty());
        assert!(rule("local_address").matches("localhost:0").is_empty());
    }

    #[test]
    fn test_listening_phrase() {
        let found = rule("listening_on_port").matches("Server listening on port 4000");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1, Some(4000));

        assert!(rule("listening_on_port").matches("running tests").is_empty());
    }

    #[test]
    fn test_listening_phrase_needs_a_standalone_port() {
        let listening = rule("listening_on_port");
        assert!(listening.matches("Build started at 10:45:12").is_empty());
        assert!(listening.matches("Tests running on 2024-05-01").is_empty());
        assert!(listening.matches("Job started on 3.14.2").is_empty());

        let found = listening.matches("Server running on 192.168.1.5:3000");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1, Some(3000));

        let found = listening.matches("ready, listening at :8080.");
        assert_eq!(found[0].1, Some(8080));
    }

    #[test]
    fn test_file_created_ignores_case() {
        let created = rule("file_created");
        assert_eq!(created.matches("created file: src/main.rs").len(), 1);
        assert_eq!(created.matches("Wrote to: out.json").len(), 1);
    }

    #[test]
    fn test_informational_has_no_port() {
        let found = rule("error").matches("Error: cannot find module 'x'");
        assert_eq!(found, vec![("Error:".to_string(), None)]);
        assert!(rule("warning").matches("all good").is_empty());
    }

    #[test]
    fn test_category_labels() {
        assert_eq!(Category::Error.label(), "error");
        assert_eq!(Category::BuildComplete.label(), "build");
    }
}
