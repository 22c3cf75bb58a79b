//! YAML configuration for the rewrite CLI: the deletion requests to apply.
//!
//! ```yaml
//! deletions:
//!   - matchers:
//!       - { type: eq, name: a, value: "1" }
//!       - { type: re, name: instance, value: "node-.*" }
//!     intervals:
//!       - { mint: 0, maxt: 1000 }
//! ```
//!
//! A deletion with no intervals is kept as written: it matches and deletes
//! nothing. Use `{ mint: -9223372036854775808, maxt: 9223372036854775807 }`
//! (or the `full_range: true` shorthand) to drop whole series.

use std::path::Path;

use serde::Deserialize;

use blockdb::{Interval, Intervals, Matcher, MatcherType};

use crate::error::{Error, Result};
use crate::modifiers::DeletionRequest;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RewriteConfig {
    #[serde(default)]
    pub deletions: Vec<DeletionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeletionConfig {
    pub matchers: Vec<MatcherConfig>,
    #[serde(default)]
    pub intervals: Vec<IntervalConfig>,
    /// Shorthand for a single `i64::MIN..=i64::MAX` interval.
    #[serde(default)]
    pub full_range: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatcherConfig {
    #[serde(rename = "type", default)]
    pub matcher_type: MatcherTypeConfig,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatcherTypeConfig {
    #[default]
    Eq,
    Neq,
    Re,
    Nre,
}

impl From<MatcherTypeConfig> for MatcherType {
    fn from(cfg: MatcherTypeConfig) -> Self {
        match cfg {
            MatcherTypeConfig::Eq => MatcherType::Eq,
            MatcherTypeConfig::Neq => MatcherType::Neq,
            MatcherTypeConfig::Re => MatcherType::Re,
            MatcherTypeConfig::Nre => MatcherType::Nre,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct IntervalConfig {
    pub mint: i64,
    pub maxt: i64,
}

impl RewriteConfig {
    /// Compile the configured deletions into requests, validating every
    /// matcher regex.
    pub fn deletion_requests(&self) -> Result<Vec<DeletionRequest>> {
        let mut requests = Vec::with_capacity(self.deletions.len());
        for deletion in &self.deletions {
            if deletion.matchers.is_empty() {
                return Err(Error::Config(
                    "a deletion must name at least one matcher".into(),
                ));
            }
            let mut matchers = Vec::with_capacity(deletion.matchers.len());
            for m in &deletion.matchers {
                matchers.push(Matcher::new(m.matcher_type.into(), &m.name, &m.value)?);
            }
            let mut intervals = Intervals::new();
            if deletion.full_range {
                intervals.add(Interval::new(i64::MIN, i64::MAX));
            }
            for iv in &deletion.intervals {
                if iv.mint > iv.maxt {
                    return Err(Error::Config(format!(
                        "deletion interval min {} > max {}",
                        iv.mint, iv.maxt
                    )));
                }
                intervals.add(Interval::new(iv.mint, iv.maxt));
            }
            requests.push(DeletionRequest::new(matchers, intervals));
        }
        Ok(requests)
    }
}

/// Load a rewrite configuration from a YAML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RewriteConfig> {
    let contents = std::fs::read_to_string(path.as_ref())
        .map_err(|e| Error::Config(format!("failed to read config file: {}", e)))?;
    serde_yaml::from_str(&contents)
        .map_err(|e| Error::Config(format!("failed to parse config file: {}", e)))
}
