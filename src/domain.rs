use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ResolverError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StructureId(String);

impl StructureId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StructureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StructureId {
    type Err = ResolverError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        let is_valid = (4..=8).contains(&normalized.len())
            && normalized.chars().all(|ch| ch.is_ascii_alphanumeric());
        if !is_valid {
            return Err(ResolverError::InvalidStructureId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for StructureId {
    type Error = ResolverError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StructureId> for String {
    fn from(value: StructureId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryId {
    pub raw: String,
    pub structure: StructureId,
    pub assembly: Option<String>,
    pub chains: Vec<String>,
}

impl EntryId {
    pub fn selects_chain(&self, chain: &str) -> bool {
        self.chains.is_empty() || self.chains.iter().any(|label| label == chain)
    }
}

impl FromStr for EntryId {
    type Err = ResolverError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let parts = trimmed.split('_').collect::<Vec<_>>();
        let structure: StructureId = parts
            .first()
            .copied()
            .unwrap_or_default()
            .parse()
            .map_err(|_| ResolverError::InvalidEntryId(value.to_string()))?;

        let (assembly, chain_parts) = match parts.len() {
            1 => (None, &parts[1..]),
            2 => (None, &parts[1..]),
            3 | 4 => (Some(parts[1].to_string()), &parts[2..]),
            _ => return Err(ResolverError::InvalidEntryId(value.to_string())),
        };

        let mut chains = Vec::new();
        for chain in chain_parts {
            if chain.is_empty() || !chain.chars().all(|ch| ch.is_ascii_alphanumeric()) {
                return Err(ResolverError::InvalidEntryId(value.to_string()));
            }
            chains.push(chain.to_string());
        }

        Ok(Self {
            raw: trimmed.to_string(),
            structure,
            assembly,
            chains,
        })
    }
}

/// Inclusive line-number ranges; `None` as upper bound means open-ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineFilter {
    ranges: Vec<(u64, Option<u64>)>,
}

impl LineFilter {
    pub fn all() -> Self {
        Self {
            ranges: vec![(1, None)],
        }
    }

    pub fn after(line: u64) -> Self {
        Self {
            ranges: vec![(line.saturating_add(1), None)],
        }
    }

    pub fn from_ranges(ranges: Vec<(u64, Option<u64>)>) -> Self {
        let mut filter = Self { ranges };
        filter.normalize();
        filter
    }

    pub fn contains(&self, line: u64) -> bool {
        self.ranges
            .iter()
            .any(|(lo, hi)| line >= *lo && hi.is_none_or(|hi| line <= hi))
    }

    pub fn upper_bound(&self) -> Option<u64> {
        let mut max = 0u64;
        for (_, hi) in &self.ranges {
            max = max.max((*hi)?);
        }
        Some(max)
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn intersect(&self, other: &LineFilter) -> LineFilter {
        let mut ranges = Vec::new();
        for (a_lo, a_hi) in &self.ranges {
            for (b_lo, b_hi) in &other.ranges {
                let lo = (*a_lo).max(*b_lo);
                let hi = match (a_hi, b_hi) {
                    (Some(a), Some(b)) => Some((*a).min(*b)),
                    (Some(a), None) => Some(*a),
                    (None, Some(b)) => Some(*b),
                    (None, None) => None,
                };
                if hi.is_none_or(|hi| lo <= hi) {
                    ranges.push((lo, hi));
                }
            }
        }
        LineFilter::from_ranges(ranges)
    }

    fn normalize(&mut self) {
        self.ranges.sort_by_key(|(lo, _)| *lo);
        let mut merged: Vec<(u64, Option<u64>)> = Vec::with_capacity(self.ranges.len());
        for (lo, hi) in self.ranges.drain(..) {
            if let Some(last) = merged.last_mut() {
                let touches = last.1.is_none_or(|last_hi| lo <= last_hi.saturating_add(1));
                if touches {
                    last.1 = match (last.1, hi) {
                        (Some(a), Some(b)) => Some(a.max(b)),
                        _ => None,
                    };
                    continue;
                }
            }
            merged.push((lo, hi));
        }
        self.ranges = merged;
    }
}

impl FromStr for LineFilter {
    type Err = ResolverError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ResolverError::InvalidLineFilter(value.to_string());
        let mut ranges = Vec::new();
        for part in value.split(',').map(str::trim).filter(|part| !part.is_empty()) {
            let range = match part.split_once('-') {
                Some((lo, hi)) => {
                    let lo = lo.trim().parse::<u64>().map_err(|_| invalid())?;
                    let hi = if hi.trim().is_empty() {
                        None
                    } else {
                        Some(hi.trim().parse::<u64>().map_err(|_| invalid())?)
                    };
                    (lo, hi)
                }
                None => {
                    let line = part.parse::<u64>().map_err(|_| invalid())?;
                    (line, Some(line))
                }
            };
            if range.0 == 0 || range.1.is_some_and(|hi| hi < range.0) {
                return Err(invalid());
            }
            ranges.push(range);
        }
        if ranges.is_empty() {
            return Err(invalid());
        }
        Ok(LineFilter::from_ranges(ranges))
    }
}
