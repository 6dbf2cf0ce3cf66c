//! Source files handed to the engine.

use crate::log_once::warn_once;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Character sets the engine can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Charset {
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
    UsAscii,
    Iso8859_1,
}

impl Charset {
    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Utf16Le => "UTF-16LE",
            Self::Utf16Be => "UTF-16BE",
            Self::UsAscii => "US-ASCII",
            Self::Iso8859_1 => "ISO-8859-1",
        }
    }

    /// Decode `bytes`, replacing invalid sequences.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Self::Utf16Le | Self::Utf16Be => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| match self {
                        Self::Utf16Le => u16::from_le_bytes([pair[0], pair[1]]),
                        _ => u16::from_be_bytes([pair[0], pair[1]]),
                    })
                    .collect();
                String::from_utf16_lossy(&units)
            }
            Self::UsAscii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { '\u{FFFD}' })
                .collect(),
            Self::Iso8859_1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Charset {
    type Err = ();

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "utf-16le" | "utf16le" => Ok(Self::Utf16Le),
            "utf-16be" | "utf16be" | "utf-16" => Ok(Self::Utf16Be),
            "us-ascii" | "ascii" => Ok(Self::UsAscii),
            "iso-8859-1" | "latin1" | "latin-1" => Ok(Self::Iso8859_1),
            _ => Err(()),
        }
    }
}

/// One file of the module under analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Path relative to the repository root, used in reported issues.
    pub relative_path: PathBuf,
    pub is_test: bool,
    pub is_generated: bool,
    /// Charset name as configured by the build; `None` means UTF-8.
    #[serde(default)]
    pub charset: Option<String>,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, relative_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            relative_path: relative_path.into(),
            is_test: false,
            is_generated: false,
            charset: None,
        }
    }

    /// Build a source file for `path` relative to `root`.
    pub fn under_root(root: &Path, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let relative = path
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.clone());
        Self::new(path, relative)
    }

    pub fn with_test(mut self, is_test: bool) -> Self {
        self.is_test = is_test;
        self
    }

    pub fn with_generated(mut self, is_generated: bool) -> Self {
        self.is_generated = is_generated;
        self
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    /// Resolve the configured charset, falling back to UTF-8.
    ///
    /// An unknown name is reported once per process.
    pub fn charset(&self) -> Charset {
        let Some(name) = self.charset.as_deref() else {
            return Charset::Utf8;
        };
        match name.parse() {
            Ok(charset) => charset,
            Err(()) => {
                warn_once(
                    &format!("charset:{name}"),
                    &format!("Unknown charset '{name}', falling back to UTF-8"),
                );
                Charset::Utf8
            }
        }
    }

    /// Read and decode the file contents.
    pub fn read_contents(&self) -> std::io::Result<String> {
        let bytes = std::fs::read(&self.path)?;
        Ok(self.charset().decode(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charset_defaults_to_utf8() {
        let file = SourceFile::new("/repo/a.rs", "a.rs");
        assert_eq!(file.charset(), Charset::Utf8);
    }

    #[test]
    fn charset_aliases_resolve() {
        assert_eq!("utf_8".parse::<Charset>(), Ok(Charset::Utf8));
        assert_eq!("Latin1".parse::<Charset>(), Ok(Charset::Iso8859_1));
        let file = SourceFile::new("/repo/a.rs", "a.rs").with_charset("UTF-16LE");
        assert_eq!(file.charset(), Charset::Utf16Le);
    }

    #[test]
    fn unknown_charset_falls_back() {
        let file = SourceFile::new("/repo/a.rs", "a.rs").with_charset("klingon-8");
        assert_eq!(file.charset(), Charset::Utf8);
        // Second resolution takes the same path without a second warning.
        assert_eq!(file.charset(), Charset::Utf8);
        assert!(!warn_once("charset:klingon-8", "already reported"));
    }

    #[test]
    fn decodes_non_utf8_charsets() {
        assert_eq!(Charset::Iso8859_1.decode(&[0x63, 0x61, 0x66, 0xe9]), "café");
        assert_eq!(Charset::Utf16Le.decode(&[0x68, 0x00, 0x69, 0x00]), "hi");
        assert_eq!(Charset::Utf16Be.decode(&[0x00, 0x68, 0x00, 0x69]), "hi");
        assert_eq!(Charset::UsAscii.decode(&[0x61, 0xff]), "a\u{FFFD}");
    }

    #[test]
    fn relative_path_under_root() {
        let file = SourceFile::under_root(Path::new("/repo"), "/repo/src/lib.rs");
        assert_eq!(file.relative_path, PathBuf::from("src/lib.rs"));
        let outside = SourceFile::under_root(Path::new("/repo"), "/elsewhere/x.rs");
        assert_eq!(outside.relative_path, PathBuf::from("/elsewhere/x.rs"));
    }

    #[test]
    fn json_round_trip_keeps_absent_charset() {
        let files = vec![
            SourceFile::new("/repo/a.rs", "a.rs"),
            SourceFile::new("/repo/t.rs", "t.rs")
                .with_test(true)
                .with_generated(true)
                .with_charset("ISO-8859-1"),
        ];
        for file in files {
            let json = serde_json::to_string(&file).unwrap();
            let decoded: SourceFile = serde_json::from_str(&json).unwrap();
            assert_eq!(decoded, file);
        }
    }
}
