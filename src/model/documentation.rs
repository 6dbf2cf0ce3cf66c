//! Rule and property documentation returned by the worker.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Which documentation set a [`Documentation`] value holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentationKind {
    Rules,
    Properties,
}

impl DocumentationKind {
    pub fn title(&self) -> &'static str {
        match self {
            Self::Rules => "Rules",
            Self::Properties => "Properties",
        }
    }
}

/// Metadata for one rule or property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocEntry {
    pub title: String,
    pub description: String,
    /// Default severity for a rule, default value for a property.
    #[serde(default)]
    pub default_value: Option<String>,
}

impl DocEntry {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            default_value: None,
        }
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}

/// A keyed documentation set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Documentation {
    pub kind: DocumentationKind,
    pub entries: BTreeMap<String, DocEntry>,
}

impl Documentation {
    pub fn new(kind: DocumentationKind) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: DocEntry) {
        self.entries.insert(key.into(), entry);
    }

    pub fn get(&self, key: &str) -> Option<&DocEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render as plain text, one block per key in key order.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# {}\n", self.kind.title());
        for (key, entry) in &self.entries {
            let _ = writeln!(out, "## {key}: {}", entry.title);
            if let Some(default) = &entry.default_value {
                let _ = writeln!(out, "Default: {default}");
            }
            let _ = writeln!(out, "{}\n", entry.description);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_lists_entries_in_key_order() {
        let mut doc = Documentation::new(DocumentationKind::Rules);
        doc.insert("b-rule", DocEntry::new("Second", "Comes later"));
        doc.insert(
            "a-rule",
            DocEntry::new("First", "Comes first").with_default("major"),
        );

        let text = doc.render();
        assert!(text.starts_with("# Rules"));
        let a = text.find("## a-rule: First").unwrap();
        let b = text.find("## b-rule: Second").unwrap();
        assert!(a < b);
        assert!(text.contains("Default: major"));
    }

    #[test]
    fn empty_documentation_renders_header_only() {
        let doc = Documentation::new(DocumentationKind::Properties);
        assert!(doc.is_empty());
        assert_eq!(doc.render().trim(), "# Properties");
    }
}
