//! Callsigns and the reference databases that vet them
//!
//! The DXCC country-prefix list and the super-check partial database are
//! external collaborators; this module defines the read-only finder traits
//! the text processor consumes, plus a plain-text-file implementation of
//! each for standalone use.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

/// A parsed amateur radio callsign
///
/// Callsigns have the shape `[prefix/]base[/suffix][/working_condition]`,
/// where the base consists of a one-or-two-letter (or digit-letter)
/// prefix, a digit, and a suffix ending in a letter. `Display` renders the
/// canonical uppercase form.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Callsign {
    pub prefix: Option<String>,
    pub base: String,
    pub suffix: Option<String>,
    pub working_condition: Option<String>,
}

/// The input does not parse as a callsign
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("not a valid callsign: {0:?}")]
pub struct InvalidCallsign(pub String);

lazy_static! {
    static ref CALLSIGN_EXP: Regex = Regex::new(
        r"^(?:([a-z0-9]+)/)?(([a-z]|[a-z][a-z]|[0-9][a-z]|[0-9][a-z][a-z])[0-9][a-z0-9]*[a-z])(?:/([a-z0-9]+))?(?:/(p|a|m|mm|am))?$"
    )
    .expect("valid callsign expression");
}

impl Callsign {
    /// Parse a callsign from its string representation
    ///
    /// The input is matched case-insensitively; it must yield a valid
    /// prefix-number-suffix form.
    pub fn parse(s: &str) -> Result<Self, InvalidCallsign> {
        let normalized = s.trim().to_lowercase();
        let captures = CALLSIGN_EXP
            .captures(&normalized)
            .ok_or_else(|| InvalidCallsign(s.to_string()))?;

        Ok(Self {
            prefix: captures.get(1).map(|m| m.as_str().to_uppercase()),
            base: captures[2].to_uppercase(),
            suffix: captures.get(4).map(|m| m.as_str().to_uppercase()),
            working_condition: captures.get(5).map(|m| m.as_str().to_uppercase()),
        })
    }
}

impl fmt::Display for Callsign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, "{}/", prefix)?;
        }
        write!(f, "{}", self.base)?;
        if let Some(suffix) = &self.suffix {
            write!(f, "/{}", suffix)?;
        }
        if let Some(wc) = &self.working_condition {
            write!(f, "/{}", wc)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Callsign {
    type Err = InvalidCallsign;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Read-only view on a DXCC prefix database
///
/// Accepts or rejects a callsign based on whether any known country prefix
/// matches it.
pub trait DxccFinder: Send + Sync {
    fn find(&self, callsign: &str) -> bool;
}

/// Read-only view on a super-check partial database of known callsigns
pub trait ScpFinder: Send + Sync {
    /// Matching known callsigns, best match first
    fn find_strings(&self, callsign: &str) -> Vec<String>;
}

/// DXCC finder over a plain list of country prefixes
///
/// A callsign is accepted when it starts with any of the prefixes. This is
/// a simplification of the full DXCC rules, sufficient to weed out decoder
/// garbage.
pub struct PrefixList {
    prefixes: Vec<String>,
}

impl PrefixList {
    pub fn new(prefixes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            prefixes: prefixes.into_iter().map(|p| p.into().to_uppercase()).collect(),
        }
    }

    /// Load from a text file with one prefix per line
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::new(contents.lines().map(str::trim).filter(|l| !l.is_empty())))
    }
}

impl DxccFinder for PrefixList {
    fn find(&self, callsign: &str) -> bool {
        let callsign = callsign.to_uppercase();
        self.prefixes.iter().any(|p| callsign.starts_with(p))
    }
}

/// Super-check finder over a set of known callsigns
pub struct CallsignSet {
    callsigns: HashSet<String>,
}

impl CallsignSet {
    pub fn new(callsigns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            callsigns: callsigns
                .into_iter()
                .map(|c| c.into().to_uppercase())
                .collect(),
        }
    }

    /// Load from a text file with one callsign per line
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::new(contents.lines().map(str::trim).filter(|l| !l.is_empty())))
    }
}

impl ScpFinder for CallsignSet {
    fn find_strings(&self, callsign: &str) -> Vec<String> {
        let callsign = callsign.to_uppercase();
        if self.callsigns.contains(&callsign) {
            vec![callsign]
        } else {
            Vec::new()
        }
    }
}

/// The finders available to a text processor
///
/// An absent DXCC finder accepts every callsign; an absent SCP finder
/// weights every callsign with 0.
#[derive(Clone, Default)]
pub struct Finders {
    pub dxcc: Option<Arc<dyn DxccFinder>>,
    pub scp: Option<Arc<dyn ScpFinder>>,
}
