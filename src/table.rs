//! Per-level solver parameters chosen by the optimizer.
//!
//! JSON layout:
//! `{ "<level>": { "Basic" | "Fast": { "case", "degree", "iteration", "time", "mre" } } }`

use crate::error::{Result, StatError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Named selection rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Policy {
    /// Fastest configuration within the accuracy band.
    Basic,
    /// Fastest configuration overall.
    Fast,
}

/// Whether the operand is moved to the maximum level before solving.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum PreBootstrap {
    /// case 0
    No,
    /// case 1: ÷B, bootstrap, ×B
    Yes,
}

impl PreBootstrap {
    /// `true` for case 1.
    pub fn required(self) -> bool {
        self == PreBootstrap::Yes
    }
}

impl From<PreBootstrap> for u8 {
    fn from(p: PreBootstrap) -> u8 {
        match p {
            PreBootstrap::No => 0,
            PreBootstrap::Yes => 1,
        }
    }
}

impl TryFrom<u8> for PreBootstrap {
    type Error = String;

    fn try_from(case: u8) -> std::result::Result<Self, Self::Error> {
        match case {
            0 => Ok(PreBootstrap::No),
            1 => Ok(PreBootstrap::Yes),
            other => Err(format!("unknown pre-bootstrap case {other}")),
        }
    }
}

/// Solver schedule for one (level, policy).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterEntry {
    /// Stored as `case`, 0 or 1
    #[serde(rename = "case")]
    pub pre_bootstrap: PreBootstrap,
    /// Degree exponent `d`; the polynomial degree is `2^d − 2`.
    pub degree: u32,
    /// Newton steps
    #[serde(rename = "iteration")]
    pub iterations: usize,
    /// Measured latency, informational only.
    #[serde(rename = "time")]
    pub time_seconds: f64,
    /// Mean relative error measured by the optimizer
    pub mre: f64,
}

/// Immutable once built; passed explicitly to the adaptive policy.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterTable {
    levels: BTreeMap<usize, BTreeMap<Policy, ParameterEntry>>,
}

impl ParameterTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the entry for `(level, policy)`.
    pub fn insert(&mut self, level: usize, policy: Policy, entry: ParameterEntry) {
        self.levels.entry(level).or_default().insert(policy, entry);
    }

    /// Exact entry, no fallback.
    pub fn get(&self, level: usize, policy: Policy) -> Option<&ParameterEntry> {
        self.levels.get(&level)?.get(&policy)
    }

    /// Entry for `(level, policy)`, or any entry recorded for `level`.
    pub fn lookup(&self, level: usize, policy: Policy) -> Result<&ParameterEntry> {
        let entries = self
            .levels
            .get(&level)
            .ok_or(StatError::MissingParameterEntry { level })?;
        entries
            .get(&policy)
            .or_else(|| entries.values().next())
            .ok_or(StatError::MissingParameterEntry { level })
    }

    /// Levels with at least one entry, ascending.
    pub fn levels(&self) -> impl Iterator<Item = usize> + '_ {
        self.levels.keys().copied()
    }

    /// Entries recorded for `level`.
    pub fn entries(&self, level: usize) -> impl Iterator<Item = (Policy, &ParameterEntry)> + '_ {
        self.levels
            .get(&level)
            .into_iter()
            .flat_map(|m| m.iter().map(|(p, e)| (*p, e)))
    }

    /// `true` if no level has an entry.
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Parses the JSON layout above.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reads a table written by [`Self::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    /// Writes the table as JSON to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}
