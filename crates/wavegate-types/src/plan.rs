//! Wave plans
//!
//! A WavePlan is the immutable output of dependency resolution: an ordered
//! sequence of waves where every unit's dependencies sit in an earlier wave.

use crate::{ClusterId, ServiceUnit, UnitName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A set of units that may be applied concurrently
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wave {
    /// 1-based wave number
    pub number: u32,
    /// Units in declaration order
    pub units: Vec<ServiceUnit>,
}

impl Wave {
    pub fn clusters(&self) -> BTreeSet<ClusterId> {
        self.units.iter().map(|u| u.cluster.clone()).collect()
    }

    pub fn unit_names(&self) -> Vec<UnitName> {
        self.units.iter().map(|u| u.name.clone()).collect()
    }

    pub fn contains(&self, name: &UnitName) -> bool {
        self.units.iter().any(|u| &u.name == name)
    }
}

/// Ordered, immutable sequence of waves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WavePlan {
    waves: Vec<Wave>,
}

impl WavePlan {
    /// Wraps already-resolved waves. Waves are kept sorted by number.
    pub fn new(mut waves: Vec<Wave>) -> Self {
        waves.sort_by_key(|w| w.number);
        Self { waves }
    }

    pub fn waves(&self) -> &[Wave] {
        &self.waves
    }

    pub fn len(&self) -> usize {
        self.waves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    pub fn wave(&self, number: u32) -> Option<&Wave> {
        self.waves.iter().find(|w| w.number == number)
    }

    pub fn wave_of(&self, name: &UnitName) -> Option<u32> {
        self.waves
            .iter()
            .find(|w| w.contains(name))
            .map(|w| w.number)
    }

    pub fn unit(&self, name: &UnitName) -> Option<&ServiceUnit> {
        self.units().find(|u| &u.name == name)
    }

    pub fn units(&self) -> impl Iterator<Item = &ServiceUnit> {
        self.waves.iter().flat_map(|w| w.units.iter())
    }

    pub fn total_units(&self) -> usize {
        self.waves.iter().map(|w| w.units.len()).sum()
    }

    /// Every cluster targeted by any unit in the plan
    pub fn clusters(&self) -> BTreeSet<ClusterId> {
        self.units().map(|u| u.cluster.clone()).collect()
    }

    /// Restricts the plan to the selected waves, preserving order.
    pub fn select(&self, selection: &WaveSelection) -> WavePlan {
        let waves = self
            .waves
            .iter()
            .filter(|w| selection.includes(w.number))
            .cloned()
            .collect();
        WavePlan { waves }
    }
}

/// Which waves a run should execute (`--components`)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WaveSelection {
    #[default]
    All,
    /// Sorted, non-overlapping, non-adjacent ranges
    Waves(Vec<WaveRange>),
}

/// Inclusive range of wave numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WaveRange {
    pub start: u32,
    pub end: u32,
}

impl WaveRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, wave: u32) -> bool {
        self.start <= wave && wave <= self.end
    }
}

impl fmt::Display for WaveRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

impl WaveSelection {
    pub fn includes(&self, wave: u32) -> bool {
        match self {
            WaveSelection::All => true,
            WaveSelection::Waves(ranges) => ranges.iter().any(|r| r.contains(wave)),
        }
    }
}

/// Sorts ranges and merges those that overlap or touch.
fn normalize(mut ranges: Vec<WaveRange>) -> Vec<WaveRange> {
    ranges.sort_unstable();
    let mut merged: Vec<WaveRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end.saturating_add(1) => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid wave selection '{input}': {reason}")]
pub struct SelectionParseError {
    pub input: String,
    pub reason: String,
}

impl FromStr for WaveSelection {
    type Err = SelectionParseError;

    /// Parses `all`, `2`, `1,3`, `2-4` or combinations like `1,3-5`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        let fail = |reason: &str| SelectionParseError {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        if input.is_empty() {
            return Err(fail("empty selection"));
        }
        if input.eq_ignore_ascii_case("all") {
            return Ok(WaveSelection::All);
        }

        let parse_wave = |raw: &str| -> Result<u32, SelectionParseError> {
            match raw.trim().parse::<u32>() {
                Ok(0) => Err(fail("waves are numbered from 1")),
                Ok(n) => Ok(n),
                Err(_) => Err(fail(&format!("'{}' is not a wave number", raw.trim()))),
            }
        };

        let mut ranges = Vec::new();
        for part in input.split(',') {
            let range = match part.split_once('-') {
                Some((start, end)) => {
                    let (start, end) = (parse_wave(start)?, parse_wave(end)?);
                    if start > end {
                        return Err(fail("range start is after range end"));
                    }
                    WaveRange::new(start, end)
                }
                None => {
                    let wave = parse_wave(part)?;
                    WaveRange::new(wave, wave)
                }
            };
            ranges.push(range);
        }
        Ok(WaveSelection::Waves(normalize(ranges)))
    }
}

impl fmt::Display for WaveSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaveSelection::All => f.write_str("all"),
            WaveSelection::Waves(ranges) => {
                let parts: Vec<String> = ranges.iter().map(WaveRange::to_string).collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}
