//! Version-gated implementation selection.
//!
//! Several implementations of one capability are registered up front, each
//! with the dependency versions it accepts. At startup the registry picks the
//! single implementation compatible with the versions actually present.

use crate::error::{BridgeError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;
use tracing::info;

pub use semver::Version;

/// Parse a version the way tools report them: `"9"`, `"2.5"`,
/// `"10.3.0.82913"` and `"3.1.0-rc1"` are all accepted.
///
/// Missing components are zero. Components past the third, pre-release tags
/// and build metadata are dropped, so ranges compare release numbers only.
pub fn parse_version(raw: &str) -> Result<Version> {
    let core = raw
        .trim()
        .split(|c: char| c == '-' || c == '+' || c.is_whitespace())
        .next()
        .unwrap_or("");
    let mut parts: Vec<&str> = core.split('.').take(3).collect();
    if parts.iter().any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit())) {
        return Err(BridgeError::InvalidVersion(raw.to_string()));
    }
    parts.resize(3, "0");
    // semver rejects leading zeros; the numeric value is what matters here.
    let normalized: Vec<String> = parts
        .iter()
        .map(|p| p.parse::<u64>().map(|n| n.to_string()))
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| BridgeError::InvalidVersion(raw.to_string()))?;
    Version::parse(&normalized.join("."))
        .map_err(|e| BridgeError::InvalidVersion(format!("{raw}: {e}")))
}

/// Half-open range `[min, max)`; a missing bound is unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionRange {
    /// Inclusive lower bound.
    pub min: Option<Version>,
    /// Exclusive upper bound.
    pub max: Option<Version>,
}

impl VersionRange {
    /// `[min, max)`.
    pub const fn between(min: Version, max: Version) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    /// `[min, *)`.
    pub const fn at_least(min: Version) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    /// `[*, max)`.
    pub const fn below(max: Version) -> Self {
        Self {
            min: None,
            max: Some(max),
        }
    }

    pub const fn any() -> Self {
        Self {
            min: None,
            max: None,
        }
    }

    /// `[major, major + 1)`.
    pub const fn major(major: u64) -> Self {
        Self::between(Version::new(major, 0, 0), Version::new(major + 1, 0, 0))
    }

    /// Whether `version` lies inside the range.
    pub fn accepts(&self, version: &Version) -> bool {
        self.min.as_ref().map_or(true, |min| version >= min)
            && self.max.as_ref().map_or(true, |max| version < max)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.min, &self.max) {
            (Some(min), Some(max)) => write!(f, "[{min}, {max})"),
            (Some(min), None) => write!(f, "[{min}, *)"),
            (None, Some(max)) => write!(f, "[*, {max})"),
            (None, None) => f.write_str("*"),
        }
    }
}

/// Versions of the dependencies present in this process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeVersions {
    versions: BTreeMap<String, Version>,
}

impl RuntimeVersions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `dependency` at `version`.
    pub fn with(mut self, dependency: impl Into<String>, version: Version) -> Self {
        self.versions.insert(dependency.into(), version);
        self
    }

    pub fn get(&self, dependency: &str) -> Option<&Version> {
        self.versions.get(dependency)
    }
}

impl fmt::Display for RuntimeVersions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.versions.is_empty() {
            return f.write_str("(no versions)");
        }
        let rendered: Vec<String> = self
            .versions
            .iter()
            .map(|(name, version)| format!("{name} {version}"))
            .collect();
        f.write_str(&rendered.join(", "))
    }
}

/// One registered implementation.
pub struct Candidate<T> {
    name: &'static str,
    requirements: BTreeMap<String, VersionRange>,
    build: fn() -> T,
}

impl<T> Candidate<T> {
    pub fn new(name: &'static str, build: fn() -> T) -> Self {
        Self {
            name,
            requirements: BTreeMap::new(),
            build,
        }
    }

    /// Only eligible when `dependency` is present at a version in `range`.
    pub fn requires(mut self, dependency: impl Into<String>, range: VersionRange) -> Self {
        self.requirements.insert(dependency.into(), range);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// A dependency absent from `versions` fails its requirement.
    pub fn accepts(&self, versions: &RuntimeVersions) -> bool {
        self.requirements.iter().all(|(dependency, range)| {
            versions
                .get(dependency)
                .is_some_and(|version| range.accepts(version))
        })
    }
}

impl<T> fmt::Debug for Candidate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("name", &self.name)
            .field("requirements", &self.requirements)
            .finish()
    }
}

/// Registration table for one capability.
pub struct Registry<T> {
    capability: &'static str,
    candidates: Vec<Candidate<T>>,
}

impl<T> Registry<T> {
    pub fn new(capability: &'static str) -> Self {
        Self {
            capability,
            candidates: Vec::new(),
        }
    }

    /// Add `candidate`. Registration order is kept for error messages.
    pub fn register(mut self, candidate: Candidate<T>) -> Self {
        self.candidates.push(candidate);
        self
    }

    pub fn capability(&self) -> &'static str {
        self.capability
    }

    pub fn candidates(&self) -> impl Iterator<Item = &Candidate<T>> {
        self.candidates.iter()
    }

    /// Build the unique candidate compatible with `versions`.
    pub fn resolve(&self, versions: &RuntimeVersions) -> Result<T> {
        let matching: Vec<&Candidate<T>> = self
            .candidates
            .iter()
            .filter(|c| c.accepts(versions))
            .collect();
        match matching.as_slice() {
            [] => Err(BridgeError::NoCompatibleImplementation {
                capability: self.capability.to_string(),
                versions: versions.to_string(),
            }),
            [only] => {
                info!(
                    capability = self.capability,
                    implementation = only.name,
                    versions = %versions,
                    "Resolved implementation"
                );
                Ok((only.build)())
            }
            several => Err(BridgeError::AmbiguousImplementation {
                capability: self.capability.to_string(),
                versions: versions.to_string(),
                candidates: several.iter().map(|c| c.name.to_string()).collect(),
            }),
        }
    }
}

/// Process-wide cache of a resolved implementation.
///
/// The first successful [`Resolved::get_or_resolve`] wins; failures are not
/// cached.
pub struct Resolved<T> {
    cell: OnceLock<T>,
}

impl<T> Resolved<T> {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    /// The cached implementation, resolving from `registry` on first success.
    pub fn get_or_resolve(&self, registry: &Registry<T>, versions: &RuntimeVersions) -> Result<&T> {
        if let Some(resolved) = self.cell.get() {
            return Ok(resolved);
        }
        let value = registry.resolve(versions)?;
        Ok(self.cell.get_or_init(|| value))
    }
}

impl<T> Default for Resolved<T> {
    fn default() -> Self {
        Self::new()
    }
}
