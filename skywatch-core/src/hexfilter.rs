//! Hex-code wildcard filters
//!
//! A filter file holds one lowercase glob per line (`*` matches any run of
//! characters, `?` exactly one). Blank lines and lines starting with `#` are
//! ignored. An empty pattern list lets every hex through in either mode.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

use crate::Sample;

/// Errors from hex filter construction
#[derive(Debug, Error)]
pub enum HexFilterError {
    #[error("Failed to read filter file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Unknown filter mode {0:?} (expected include or exclude)")]
    Mode(String),
}

/// Whether matching hexes are kept or dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    #[default]
    Include,
    Exclude,
}

impl FromStr for FilterMode {
    type Err = HexFilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "include" => Ok(Self::Include),
            "exclude" => Ok(Self::Exclude),
            other => Err(HexFilterError::Mode(other.to_string())),
        }
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Include => write!(f, "include"),
            Self::Exclude => write!(f, "exclude"),
        }
    }
}

/// Compiled set of hex globs
#[derive(Debug, Clone, Default)]
pub struct HexFilter {
    patterns: Vec<Regex>,
    mode: FilterMode,
}

impl HexFilter {
    pub fn new<I, S>(patterns: I, mode: FilterMode) -> Result<Self, HexFilterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| compile_glob(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns, mode })
    }

    /// Parse filter file contents
    pub fn parse(text: &str, mode: FilterMode) -> Result<Self, HexFilterError> {
        let lines = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_lowercase);
        Self::new(lines, mode)
    }

    /// Load a filter file. A missing or unreadable file yields an empty filter.
    pub fn load(path: Option<&Path>, mode: FilterMode) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        let result = fs::read_to_string(path)
            .map_err(HexFilterError::from)
            .and_then(|text| Self::parse(&text, mode));

        match result {
            Ok(filter) => {
                if !filter.is_empty() {
                    info!("Loaded {} hex patterns ({})", filter.len(), mode);
                }
                filter
            }
            Err(e) => {
                warn!("Hex filter file {} not usable: {}", path.display(), e);
                Self {
                    patterns: Vec::new(),
                    mode,
                }
            }
        }
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// True if any pattern matches the hex
    pub fn matches(&self, hex: &str) -> bool {
        let hex = hex.to_lowercase();
        self.patterns.iter().any(|p| p.is_match(&hex))
    }

    /// Whether a hex passes the filter in its configured mode
    pub fn allows(&self, hex: &str) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        match self.mode {
            FilterMode::Include => self.matches(hex),
            FilterMode::Exclude => !self.matches(hex),
        }
    }

    /// Keep only the samples that pass
    pub fn apply(&self, samples: Vec<Sample>) -> Vec<Sample> {
        samples.into_iter().filter(|s| self.allows(&s.hex)).collect()
    }
}

/// Translate a glob into an anchored regex
fn compile_glob(pattern: &str) -> Result<Regex, HexFilterError> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }
    expr.push('$');

    Regex::new(&expr).map_err(|source| HexFilterError::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}
