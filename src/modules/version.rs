//! Semantic versions and Terraform-style version constraints.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use super::ModuleError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    segments: Vec<u64>,
    /// How many segments were written out, e.g. 2 for `5.36`.
    specified: usize,
    pre: Option<String>,
}

impl Version {
    fn segment(&self, i: usize) -> u64 {
        self.segments.get(i).copied().unwrap_or(0)
    }
}

impl FromStr for Version {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let raw = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let raw = raw.split('+').next().unwrap_or_default();
        let (core, pre) = match raw.split_once('-') {
            Some((core, pre)) => (core, Some(pre.to_string())),
            None => (raw, None),
        };
        if core.is_empty() {
            return Err(ModuleError::InvalidVersion(s.to_string()));
        }
        let segments = core
            .split('.')
            .map(|p| p.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ModuleError::InvalidVersion(s.to_string()))?;
        Ok(Version {
            specified: segments.len(),
            segments,
            pre,
        })
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len()).max(3);
        for i in 0..len {
            match self.segment(i).cmp(&other.segment(i)) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        match (&self.pre, &other.pre) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.segments.len().max(3);
        let parts: Vec<String> = (0..len).map(|i| self.segment(i).to_string()).collect();
        write!(f, "{}", parts.join("."))?;
        if let Some(pre) = &self.pre {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Pessimistic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Bound {
    op: Op,
    version: Version,
}

impl Bound {
    fn check(&self, v: &Version) -> bool {
        // prereleases only satisfy bounds that name a prerelease themselves
        if v.pre.is_some() && self.version.pre.is_none() {
            return false;
        }
        match self.op {
            Op::Eq => v == &self.version || v.cmp(&self.version) == Ordering::Equal,
            Op::Ne => v.cmp(&self.version) != Ordering::Equal,
            Op::Gt => v > &self.version,
            Op::Ge => v >= &self.version,
            Op::Lt => v < &self.version,
            Op::Le => v <= &self.version,
            Op::Pessimistic => {
                if v < &self.version {
                    return false;
                }
                let pinned = self.version.specified.saturating_sub(1).max(1);
                if self.version.specified == 1 {
                    return v.segment(0) == self.version.segment(0);
                }
                (0..pinned).all(|i| v.segment(i) == self.version.segment(i))
            }
        }
    }
}

/// A comma separated conjunction such as `>= 1.2, < 2.0` or `~> 5.36`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Constraint {
    bounds: Vec<Bound>,
}

impl Constraint {
    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    pub fn matches(&self, v: &Version) -> bool {
        self.bounds.iter().all(|b| b.check(v))
    }

    /// True when `version` parses and satisfies the constraint.
    pub fn allows(&self, version: &str) -> bool {
        version
            .parse::<Version>()
            .map(|v| self.matches(&v))
            .unwrap_or(false)
    }
}

impl FromStr for Constraint {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bounds = Vec::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                if s.trim().is_empty() {
                    continue;
                }
                return Err(ModuleError::InvalidConstraint(s.to_string()));
            }
            let (op, rest) = [
                ("~>", Op::Pessimistic),
                (">=", Op::Ge),
                ("<=", Op::Le),
                ("!=", Op::Ne),
                (">", Op::Gt),
                ("<", Op::Lt),
                ("=", Op::Eq),
            ]
            .iter()
            .find_map(|(prefix, op)| part.strip_prefix(prefix).map(|rest| (*op, rest)))
            .unwrap_or((Op::Eq, part));
            let version = rest
                .trim()
                .parse::<Version>()
                .map_err(|_| ModuleError::InvalidConstraint(s.to_string()))?;
            bounds.push(Bound { op, version });
        }
        Ok(Constraint { bounds })
    }
}

/// Pick the highest version satisfying `constraint`. An empty constraint
/// selects the highest version overall. The result is normalized to at
/// least three segments, without a `v` prefix or build metadata.
pub fn latest_matching(versions: &[String], constraint: &str) -> Result<String, ModuleError> {
    let parsed: Constraint = constraint.parse()?;
    let mut best: Option<Version> = None;
    for raw in versions {
        let v: Version = raw.parse()?;
        if best.as_ref().is_some_and(|current| &v < current) {
            continue;
        }
        if parsed.matches(&v) {
            best = Some(v);
        }
    }
    best.map(|v| v.to_string())
        .ok_or_else(|| ModuleError::NoMatchingVersion {
            constraint: constraint.to_string(),
        })
}
