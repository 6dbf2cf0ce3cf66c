//! Values exchanged between controller and worker.

mod documentation;
mod source_file;

pub use documentation::{DocEntry, Documentation, DocumentationKind};
pub use source_file::{Charset, SourceFile};

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};
use uuid::Uuid;

/// Languages the engine can be asked to analyze.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Java,
    Kotlin,
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Xml,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Java => "java",
            Self::Kotlin => "kotlin",
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Go => "go",
            Self::Xml => "xml",
        }
    }

    /// File extensions (without the dot) owned by the language.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Java => &["java"],
            Self::Kotlin => &["kt", "kts"],
            Self::Rust => &["rs"],
            Self::Python => &["py"],
            Self::JavaScript => &["js", "jsx", "mjs", "cjs"],
            Self::TypeScript => &["ts", "tsx"],
            Self::Go => &["go"],
            Self::Xml => &["xml"],
        }
    }

    /// Language owning `path`, judged by its extension.
    pub fn of_path(path: &Path) -> Option<Language> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        Self::all()
            .iter()
            .copied()
            .find(|lang| lang.extensions().contains(&ext.as_str()))
    }

    pub fn all() -> &'static [Language] {
        &[
            Self::Java,
            Self::Kotlin,
            Self::Rust,
            Self::Python,
            Self::JavaScript,
            Self::TypeScript,
            Self::Go,
            Self::Xml,
        ]
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "java" => Ok(Self::Java),
            "kotlin" | "kt" => Ok(Self::Kotlin),
            "rust" | "rs" => Ok(Self::Rust),
            "python" | "py" => Ok(Self::Python),
            "javascript" | "js" => Ok(Self::JavaScript),
            "typescript" | "ts" => Ok(Self::TypeScript),
            "go" => Ok(Self::Go),
            "xml" => Ok(Self::Xml),
            _ => Err(format!("unknown language: {input}")),
        }
    }
}

/// Startup parameters for one worker process.
///
/// Written to a temp file by the controller and read once by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerParams {
    /// Loopback address every socket of the session binds to.
    pub bind_address: IpAddr,
    /// Process id of the controller.
    pub controller_pid: u32,
    /// Controller start time, used to tell it apart from a later process
    /// that reuses its pid.
    pub controller_started_at: Option<DateTime<Utc>>,
    /// Address of the controller's bootstrap directory.
    pub bootstrap_address: SocketAddr,
    /// Plugin artifacts the worker loads.
    pub plugin_paths: BTreeSet<PathBuf>,
    /// Languages the worker analyzes; empty means all.
    pub languages: BTreeSet<Language>,
}

impl ServerParams {
    /// Encode with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode a blob written by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Write the encoded params to `path`.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    /// Read and decode the params file at `path`.
    pub fn read_from(path: &Path) -> Result<Self> {
        Self::from_bytes(&std::fs::read(path)?)
    }
}

/// Identifier of one `analyze` call.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Draw a fresh id, unique among all ids issued by this process.
    pub fn generate() -> Self {
        static ISSUED: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
        let issued = ISSUED.get_or_init(|| Mutex::new(HashSet::new()));
        let mut issued = issued.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            let candidate = Uuid::new_v4().simple().to_string();
            if issued.insert(candidate.clone()) {
                return JobId(candidate);
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parameters of one `analyze` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzeParams {
    /// Identifies the job in log events and the log sink name.
    pub job_id: JobId,
    /// Root that relative paths are reported against.
    pub repository_root: PathBuf,
    /// Build module the files belong to.
    pub module_id: String,
    /// Files to analyze.
    pub files: Vec<SourceFile>,
    pub languages: BTreeSet<Language>,
    /// Free-form engine properties.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub enabled_rules: BTreeSet<String>,
    #[serde(default)]
    pub disabled_rules: BTreeSet<String>,
    /// Rule key to property overrides.
    #[serde(default)]
    pub rule_properties: BTreeMap<String, BTreeMap<String, String>>,
}

impl AnalyzeParams {
    /// New parameters with a freshly generated job id and no files.
    pub fn new(repository_root: impl Into<PathBuf>, module_id: impl Into<String>) -> Self {
        Self {
            job_id: JobId::generate(),
            repository_root: repository_root.into(),
            module_id: module_id.into(),
            files: Vec::new(),
            languages: BTreeSet::new(),
            properties: BTreeMap::new(),
            enabled_rules: BTreeSet::new(),
            disabled_rules: BTreeSet::new(),
            rule_properties: BTreeMap::new(),
        }
    }

    pub fn with_files(mut self, files: impl IntoIterator<Item = SourceFile>) -> Self {
        self.files.extend(files);
        self
    }

    pub fn with_languages(mut self, languages: impl IntoIterator<Item = Language>) -> Self {
        self.languages.extend(languages);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn enable_rule(mut self, rule: impl Into<String>) -> Self {
        self.enabled_rules.insert(rule.into());
        self
    }

    pub fn disable_rule(mut self, rule: impl Into<String>) -> Self {
        self.disabled_rules.insert(rule.into());
        self
    }

    pub fn with_rule_property(
        mut self,
        rule: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.rule_properties
            .entry(rule.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }
}

/// Severity of a reported issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Minor,
    Major,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Minor => "minor",
            Self::Major => "major",
            Self::Critical => "critical",
        }
    }
}

/// One finding produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Key of the rule that raised the issue.
    pub rule_key: String,
    /// Severity assigned by the rule.
    pub severity: Severity,
    pub message: String,
    /// File path relative to the repository root.
    pub file: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub column: Option<u32>,
}

/// Log level of a forwarded worker log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Log line pushed by the worker to a controller-side sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Severity of the event.
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub job_id: Option<JobId>,
}

impl LogEvent {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            job_id: None,
        }
    }

    /// Tag the event with `job_id`.
    pub fn for_job(mut self, job_id: &JobId) -> Self {
        self.job_id = Some(job_id.clone());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn server_params(started: Option<DateTime<Utc>>) -> ServerParams {
        ServerParams {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            controller_pid: 4242,
            controller_started_at: started,
            bootstrap_address: "127.0.0.1:40123".parse().unwrap(),
            plugin_paths: [PathBuf::from("/plugins/java.jar")].into_iter().collect(),
            languages: [Language::Java, Language::Kotlin].into_iter().collect(),
        }
    }

    #[test]
    fn server_params_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        for params in [server_params(Some(Utc::now())), server_params(None)] {
            let path = dir.path().join("params.bin");
            params.write_to(&path).unwrap();
            assert_eq!(ServerParams::read_from(&path).unwrap(), params);
        }
    }

    #[test]
    fn corrupt_server_params_are_rejected() {
        assert!(ServerParams::from_bytes(&[1, 2, 3]).is_err());
    }

    #[test]
    fn analyze_params_round_trip() {
        let params = AnalyzeParams::new("/repo", ":app")
            .with_files([
                SourceFile::new("/repo/src/Main.java", "src/Main.java"),
                SourceFile::new("/repo/src/Gen.java", "src/Gen.java")
                    .with_generated(true)
                    .with_charset("ISO-8859-1"),
            ])
            .with_languages([Language::Java])
            .with_property("engine.verbose", "true")
            .enable_rule("todo-comment")
            .disable_rule("tab-indentation")
            .with_rule_property("line-length", "max", "100");

        let json = serde_json::to_string(&params).unwrap();
        let decoded: AnalyzeParams = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, params);

        let minimal = AnalyzeParams::new("/repo", ":lib");
        let json = serde_json::to_string(&minimal).unwrap();
        assert_eq!(serde_json::from_str::<AnalyzeParams>(&json).unwrap(), minimal);
    }

    #[test]
    fn job_ids_are_unique() {
        let ids: HashSet<JobId> = (0..1000).map(|_| JobId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn language_detection_by_extension() {
        assert_eq!(Language::of_path(Path::new("a/B.kt")), Some(Language::Kotlin));
        assert_eq!(Language::of_path(Path::new("a/b.RS")), Some(Language::Rust));
        assert_eq!(Language::of_path(Path::new("README")), None);
        assert_eq!("ts".parse::<Language>(), Ok(Language::TypeScript));
        assert!("cobol".parse::<Language>().is_err());
    }

    #[test]
    fn issue_omits_absent_positions() {
        let issue = Issue {
            rule_key: "todo-comment".into(),
            severity: Severity::Info,
            message: "TODO found".into(),
            file: PathBuf::from("src/lib.rs"),
            line: None,
            column: None,
        };
        let json = serde_json::to_string(&issue).unwrap();
        assert!(!json.contains("line"));
        assert_eq!(serde_json::from_str::<Issue>(&json).unwrap(), issue);
    }
}
