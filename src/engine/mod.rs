//! Built-in analysis engine hosted by the worker.
//!
//! The engine knows its rules, the languages it was started for and its own
//! version. How files are scheduled is up to the version-gated
//! [`executor::AnalysisExecutor`] the worker resolves at startup.

pub mod executor;
pub mod rules;

use crate::model::{
    AnalyzeParams, DocEntry, Documentation, DocumentationKind, Issue, Language, SourceFile,
};
use crate::resolver::{parse_version, Version};
use rules::{builtin_rules, LineRule, RuleSettings};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::warn;

/// Version reported by the built-in engine.
pub const BUILTIN_ENGINE_VERSION: Version = Version::new(2, 3, 0);

/// Environment variable overriding the reported engine version.
pub const ENGINE_VERSION_ENV: &str = "LINT_BRIDGE_ENGINE_VERSION";

/// Engine property: skip files flagged as generated.
pub const SKIP_GENERATED: &str = "skip-generated";
/// Engine property: skip files flagged as tests.
pub const SKIP_TESTS: &str = "skip-tests";

/// A rule selected for one analysis, with its effective settings.
pub struct ActiveRule<'a> {
    /// The rule itself.
    pub rule: &'a dyn LineRule,
    /// Defaults merged with engine and per-rule properties.
    pub settings: RuleSettings,
}

/// Line-rule engine run by the worker.
pub struct Engine {
    version: Version,
    rules: Vec<Box<dyn LineRule>>,
    languages: BTreeSet<Language>,
    plugins: BTreeSet<PathBuf>,
}

impl Engine {
    /// Engine for `languages` (empty means all), reporting the version from
    /// [`ENGINE_VERSION_ENV`] when set.
    pub fn new(languages: BTreeSet<Language>, plugins: BTreeSet<PathBuf>) -> Self {
        let version = match std::env::var(ENGINE_VERSION_ENV) {
            Ok(raw) => match parse_version(&raw) {
                Ok(version) => version,
                Err(e) => {
                    warn!(value = %raw, error = %e, "Ignoring engine version override");
                    BUILTIN_ENGINE_VERSION
                }
            },
            Err(_) => BUILTIN_ENGINE_VERSION,
        };
        Self::with_version(version, languages, plugins)
    }

    /// Engine reporting `version`, ignoring the environment.
    pub fn with_version(
        version: Version,
        languages: BTreeSet<Language>,
        plugins: BTreeSet<PathBuf>,
    ) -> Self {
        Self {
            version,
            rules: builtin_rules(),
            languages,
            plugins,
        }
    }

    /// Version this engine reports to the executor registry.
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Plugin artifacts the worker was started with.
    pub fn plugins(&self) -> &BTreeSet<PathBuf> {
        &self.plugins
    }

    pub fn rules(&self) -> impl Iterator<Item = &dyn LineRule> {
        self.rules.iter().map(|r| r.as_ref())
    }

    /// Rules for `params`: the explicitly enabled ones (all when none are
    /// named), minus the disabled ones.
    ///
    /// Properties resolve as rule default, then `<rule>.<key>` from the engine
    /// properties, then the per-rule override when `rule_overrides` is set.
    pub fn active_rules(&self, params: &AnalyzeParams, rule_overrides: bool) -> Vec<ActiveRule<'_>> {
        self.rules()
            .filter(|rule| {
                params.enabled_rules.is_empty() || params.enabled_rules.contains(rule.key())
            })
            .filter(|rule| !params.disabled_rules.contains(rule.key()))
            .map(|rule| {
                let mut settings = RuleSettings::default();
                for property in rule.properties() {
                    settings.set(property.key, property.default_value);
                    let qualified = format!("{}.{}", rule.key(), property.key);
                    if let Some(value) = params.properties.get(&qualified) {
                        settings.set(property.key, value.clone());
                    }
                }
                if rule_overrides {
                    if let Some(overrides) = params.rule_properties.get(rule.key()) {
                        for (key, value) in overrides {
                            settings.set(key.clone(), value.clone());
                        }
                    }
                }
                ActiveRule { rule, settings }
            })
            .collect()
    }

    /// Files of `params` this engine should look at, in input order.
    pub fn select_files<'p>(&self, params: &'p AnalyzeParams) -> Vec<&'p SourceFile> {
        let skip_generated = flag(params, SKIP_GENERATED, true);
        let skip_tests = flag(params, SKIP_TESTS, false);
        params
            .files
            .iter()
            .filter(|file| !(skip_generated && file.is_generated))
            .filter(|file| !(skip_tests && file.is_test))
            .filter(|file| {
                let Some(language) = Language::of_path(&file.path) else {
                    return false;
                };
                (self.languages.is_empty() || self.languages.contains(&language))
                    && (params.languages.is_empty() || params.languages.contains(&language))
            })
            .collect()
    }

    /// Run `rules` over the contents of `file`.
    pub fn check_file(&self, file: &SourceFile, rules: &[ActiveRule<'_>]) -> std::io::Result<Vec<Issue>> {
        let contents = file.read_contents()?;
        Ok(self.check_contents(file, &contents, rules))
    }

    /// Run `rules` over already decoded `contents` of `file`.
    pub fn check_contents(&self, file: &SourceFile, contents: &str, rules: &[ActiveRule<'_>]) -> Vec<Issue> {
        let mut issues = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            for active in rules {
                if let Some(finding) = active.rule.check(line, &active.settings) {
                    issues.push(Issue {
                        rule_key: active.rule.key().to_string(),
                        severity: active.rule.severity(),
                        message: finding.message,
                        file: file.relative_path.clone(),
                        line: u32::try_from(index + 1).ok(),
                        column: finding.column,
                    });
                }
            }
        }
        issues
    }

    /// One entry per rule, keyed by rule key.
    pub fn rules_documentation(&self) -> Documentation {
        let mut doc = Documentation::new(DocumentationKind::Rules);
        for rule in self.rules() {
            doc.insert(
                rule.key(),
                DocEntry::new(rule.title(), rule.description()).with_default(rule.severity().as_str()),
            );
        }
        doc
    }

    /// Engine properties plus every rule property as `<rule>.<key>`.
    pub fn properties_documentation(&self) -> Documentation {
        let mut doc = Documentation::new(DocumentationKind::Properties);
        doc.insert(
            SKIP_GENERATED,
            DocEntry::new("Skip generated files", "Do not analyze files flagged as generated")
                .with_default("true"),
        );
        doc.insert(
            SKIP_TESTS,
            DocEntry::new("Skip test files", "Do not analyze files flagged as tests")
                .with_default("false"),
        );
        for rule in self.rules() {
            for property in rule.properties() {
                doc.insert(
                    format!("{}.{}", rule.key(), property.key),
                    DocEntry::new(rule.title(), property.description)
                        .with_default(property.default_value),
                );
            }
        }
        doc
    }
}

fn flag(params: &AnalyzeParams, key: &str, default: bool) -> bool {
    match params.properties.get(key).map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) if v == "true" => true,
        Some(v) if v == "false" => false,
        _ => default,
    }
}
