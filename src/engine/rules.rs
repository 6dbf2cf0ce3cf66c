//! Built-in line rules.

use crate::model::Severity;
use std::collections::BTreeMap;

/// A configurable property of a rule.
#[derive(Debug, Clone, Copy)]
pub struct RuleProperty {
    /// Key under the rule, e.g. `max`.
    pub key: &'static str,
    /// One-line description for the documentation.
    pub description: &'static str,
    /// Value used when nothing overrides it.
    pub default_value: &'static str,
}

/// Effective property values for one rule in one analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSettings {
    values: BTreeMap<String, String>,
}

impl RuleSettings {
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Parsed numeric value, or `default` when absent or malformed.
    pub fn usize_or(&self, key: &str, default: usize) -> usize {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }
}

/// A finding on one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// Human-readable description of the finding.
    pub message: String,
    /// 1-based.
    pub column: Option<u32>,
}

/// A rule evaluated line by line.
pub trait LineRule: Send + Sync {
    fn key(&self) -> &'static str;
    fn title(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn severity(&self) -> Severity;

    fn properties(&self) -> &'static [RuleProperty] {
        &[]
    }

    fn check(&self, line: &str, settings: &RuleSettings) -> Option<Finding>;
}

/// Every built-in rule, in documentation order.
pub fn builtin_rules() -> Vec<Box<dyn LineRule>> {
    vec![
        Box::new(TrailingWhitespace),
        Box::new(LineLength),
        Box::new(TodoComment),
        Box::new(TabIndentation),
    ]
}

fn column(chars_before: usize) -> Option<u32> {
    u32::try_from(chars_before + 1).ok()
}

/// Flags spaces or tabs before the end of a line.
pub struct TrailingWhitespace;

impl LineRule for TrailingWhitespace {
    fn key(&self) -> &'static str {
        "trailing-whitespace"
    }

    fn title(&self) -> &'static str {
        "Trailing whitespace"
    }

    fn description(&self) -> &'static str {
        "Lines should not end with spaces or tabs."
    }

    fn severity(&self) -> Severity {
        Severity::Minor
    }

    fn check(&self, line: &str, _settings: &RuleSettings) -> Option<Finding> {
        let trimmed = line.trim_end_matches([' ', '\t']);
        if trimmed.len() == line.len() {
            return None;
        }
        Some(Finding {
            message: "Remove trailing whitespace".to_string(),
            column: column(trimmed.chars().count()),
        })
    }
}

/// Flags lines longer than the `max` property.
pub struct LineLength;

impl LineLength {
    /// Default for `max`, in characters.
    pub const DEFAULT_MAX: usize = 120;
}

impl LineRule for LineLength {
    fn key(&self) -> &'static str {
        "line-length"
    }

    fn title(&self) -> &'static str {
        "Line too long"
    }

    fn description(&self) -> &'static str {
        "Lines should not exceed the configured number of characters."
    }

    fn severity(&self) -> Severity {
        Severity::Major
    }

    fn properties(&self) -> &'static [RuleProperty] {
        &[RuleProperty {
            key: "max",
            description: "Maximum number of characters per line",
            default_value: "120",
        }]
    }

    fn check(&self, line: &str, settings: &RuleSettings) -> Option<Finding> {
        let max = settings.usize_or("max", Self::DEFAULT_MAX);
        let length = line.chars().count();
        if length <= max {
            return None;
        }
        Some(Finding {
            message: format!("Line is {length} characters long, the maximum is {max}"),
            column: column(max),
        })
    }
}

/// Flags `TODO` and `FIXME` markers.
pub struct TodoComment;

impl LineRule for TodoComment {
    fn key(&self) -> &'static str {
        "todo-comment"
    }

    fn title(&self) -> &'static str {
        "Unresolved TODO or FIXME"
    }

    fn description(&self) -> &'static str {
        "TODO and FIXME markers should be tracked and resolved."
    }

    fn severity(&self) -> Severity {
        Severity::Info
    }

    fn check(&self, line: &str, _settings: &RuleSettings) -> Option<Finding> {
        let (offset, marker) = ["TODO", "FIXME"]
            .iter()
            .filter_map(|marker| line.find(marker).map(|offset| (offset, *marker)))
            .min_by_key(|(offset, _)| *offset)?;
        Some(Finding {
            message: format!("Resolve this {marker} comment"),
            column: column(line[..offset].chars().count()),
        })
    }
}

/// Flags lines indented with tabs.
pub struct TabIndentation;

impl LineRule for TabIndentation {
    fn key(&self) -> &'static str {
        "tab-indentation"
    }

    fn title(&self) -> &'static str {
        "Tab indentation"
    }

    fn description(&self) -> &'static str {
        "Indent with spaces rather than tabs."
    }

    fn severity(&self) -> Severity {
        Severity::Minor
    }

    fn check(&self, line: &str, _settings: &RuleSettings) -> Option<Finding> {
        let indent = &line[..line.len() - line.trim_start_matches([' ', '\t']).len()];
        let offset = indent.find('\t')?;
        Some(Finding {
            message: "Replace tab indentation with spaces".to_string(),
            column: column(offset),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> RuleSettings {
        let mut settings = RuleSettings::default();
        for (k, v) in pairs {
            settings.set(*k, *v);
        }
        settings
    }

    #[test]
    fn trailing_whitespace_points_past_content() {
        let finding = TrailingWhitespace
            .check("let x = 1;  ", &RuleSettings::default())
            .unwrap();
        assert_eq!(finding.column, Some(11));
        assert!(TrailingWhitespace
            .check("let x = 1;", &RuleSettings::default())
            .is_none());
    }

    #[test]
    fn line_length_honours_max() {
        let line = "x".repeat(30);
        assert!(LineLength.check(&line, &RuleSettings::default()).is_none());
        let finding = LineLength.check(&line, &settings(&[("max", "20")])).unwrap();
        assert_eq!(finding.column, Some(21));
        assert!(finding.message.contains("30 characters"));
        // Malformed values fall back to the default.
        assert!(LineLength.check(&line, &settings(&[("max", "wide")])).is_none());
    }

    #[test]
    fn todo_reports_first_marker() {
        let finding = TodoComment
            .check("// FIXME then TODO", &RuleSettings::default())
            .unwrap();
        assert_eq!(finding.column, Some(4));
        assert!(finding.message.contains("FIXME"));
        assert!(TodoComment.check("// done", &RuleSettings::default()).is_none());
    }

    #[test]
    fn tabs_only_matter_in_indentation() {
        assert_eq!(
            TabIndentation
                .check("  \tfoo()", &RuleSettings::default())
                .unwrap()
                .column,
            Some(3)
        );
        assert!(TabIndentation
            .check("foo(\t)", &RuleSettings::default())
            .is_none());
    }

    #[test]
    fn builtin_rule_keys_are_unique() {
        let rules = builtin_rules();
        let mut keys: Vec<_> = rules.iter().map(|r| r.key()).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), rules.len());
    }
}
