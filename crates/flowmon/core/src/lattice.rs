// Flowmon
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Security Level Lattices
//!
//! Every label tracked by the monitor is an element of a finite join-semilattice
//! with a public bottom and a secret top. The lattice is picked once per
//! deployment as a type parameter; sessions, the heap table and the static
//! checker all agree on it through the [`Lattice`] trait.
//!
//! Three lattices ship with the crate:
//!
//! - [`TwoLevel`]: `Low ⊑ High`
//! - [`ThreeLevel`]: `Low ⊑ Medium ⊑ High`
//! - [`CategorySet`]: subsets of `N` categories ordered by inclusion

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

/// Capability interface of a security lattice.
pub trait Lattice: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// The public level; every label starts here.
    fn bottom() -> Self;

    /// The most secret level.
    fn top() -> Self;

    /// Least upper bound of two levels.
    fn join(self, other: Self) -> Self;

    /// Partial order test, `self ⊑ other`.
    fn leq(self, other: Self) -> bool;

    /// Join over any number of levels, starting from bottom.
    fn join_all<I>(levels: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        levels.into_iter().fold(Self::bottom(), Self::join)
    }

    fn is_bottom(self) -> bool {
        self == Self::bottom()
    }

    fn is_top(self) -> bool {
        self == Self::top()
    }
}

/// Error returned when a level name cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown security level '{0}'")]
pub struct ParseLevelError(pub String);

/// Two-point lattice: public and secret.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TwoLevel {
    #[default]
    Low,
    High,
}

impl Lattice for TwoLevel {
    fn bottom() -> Self {
        TwoLevel::Low
    }

    fn top() -> Self {
        TwoLevel::High
    }

    fn join(self, other: Self) -> Self {
        self.max(other)
    }

    fn leq(self, other: Self) -> bool {
        self <= other
    }
}

impl fmt::Display for TwoLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TwoLevel::Low => write!(f, "LOW"),
            TwoLevel::High => write!(f, "HIGH"),
        }
    }
}

impl FromStr for TwoLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(TwoLevel::Low),
            "high" => Ok(TwoLevel::High),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// Three-point chain with an intermediate confidentiality level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreeLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl Lattice for ThreeLevel {
    fn bottom() -> Self {
        ThreeLevel::Low
    }

    fn top() -> Self {
        ThreeLevel::High
    }

    fn join(self, other: Self) -> Self {
        self.max(other)
    }

    fn leq(self, other: Self) -> bool {
        self <= other
    }
}

impl fmt::Display for ThreeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreeLevel::Low => write!(f, "LOW"),
            ThreeLevel::Medium => write!(f, "MEDIUM"),
            ThreeLevel::High => write!(f, "HIGH"),
        }
    }
}

impl FromStr for ThreeLevel {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(ThreeLevel::Low),
            "medium" => Ok(ThreeLevel::Medium),
            "high" => Ok(ThreeLevel::High),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

/// Powerset lattice over `N` categories (`N <= 32`).
///
/// A level is the set of categories whose owners may not observe it; join is
/// union and the order is inclusion, so `{0}` and `{1}` are incomparable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct CategorySet<const N: u32>(u32);

impl<const N: u32> CategorySet<N> {
    const MASK: u32 = if N >= 32 { u32::MAX } else { (1u32 << N) - 1 };

    /// Build a set from raw bits; bits outside the `N` categories are dropped.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits & Self::MASK)
    }

    /// Set containing a single category.
    pub fn category(index: u32) -> Option<Self> {
        (index < N).then(|| Self(1 << index))
    }

    pub fn with(self, index: u32) -> Option<Self> {
        Self::category(index).map(|c| self.join(c))
    }

    pub fn contains(self, index: u32) -> bool {
        index < N && self.0 & (1 << index) != 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl<const N: u32> Lattice for CategorySet<N> {
    fn bottom() -> Self {
        Self(0)
    }

    fn top() -> Self {
        Self(Self::MASK)
    }

    fn join(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    fn leq(self, other: Self) -> bool {
        self.0 & !other.0 == 0
    }
}

impl<const N: u32> fmt::Display for CategorySet<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members: Vec<String> = (0..N).filter(|i| self.contains(*i)).map(|i| i.to_string()).collect();
        write!(f, "{{{}}}", members.join(","))
    }
}

impl<const N: u32> TryFrom<u32> for CategorySet<N> {
    type Error = ParseLevelError;

    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        if bits & !Self::MASK != 0 {
            return Err(ParseLevelError(format!("{bits:#x} has categories outside 0..{N}")));
        }
        Ok(Self(bits))
    }
}

impl<const N: u32> From<CategorySet<N>> for u32 {
    fn from(set: CategorySet<N>) -> Self {
        set.0
    }
}

impl<const N: u32> FromStr for CategorySet<N> {
    type Err = ParseLevelError;

    /// Parses `{}` / `{0,2}` as written by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s
            .trim()
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .ok_or_else(|| ParseLevelError(s.to_string()))?;
        inner
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .try_fold(Self::bottom(), |acc, part| {
                let index: u32 = part.parse().map_err(|_| ParseLevelError(s.to_string()))?;
                acc.with(index).ok_or_else(|| ParseLevelError(s.to_string()))
            })
    }
}
