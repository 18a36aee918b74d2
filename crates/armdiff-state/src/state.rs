//! Canonical state snapshot keyed by register/flag identifier.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Number of general-purpose `Xn` registers reported by a dump.
pub const NUM_XREGS: u8 = 32;

/// Identifier of one value in a register dump.
///
/// Keys order lexicographically by their identifier text (`FLAG_N` < `PC` <
/// `X0` < `X1` < `X10`), which is the order reports are printed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    /// Program counter.
    Pc,
    /// General-purpose register `Xn`, `n < 32`.
    X(u8),
    /// Negative flag.
    FlagN,
    /// Zero flag.
    FlagZ,
}

/// Error returned when an identifier does not name a known key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("unknown state key: {0}")]
    Unknown(String),
    #[error("register X{0} out of range (X0..X31)")]
    RegisterOutOfRange(u32),
}

impl StateKey {
    /// Register key for `Xn`, or `None` if `n` is out of range.
    #[must_use]
    pub const fn x(n: u8) -> Option<Self> {
        if n < NUM_XREGS { Some(Self::X(n)) } else { None }
    }

    /// Identifier text as it appears in a dump.
    #[must_use]
    pub fn name(&self) -> Cow<'static, str> {
        match self {
            Self::Pc => Cow::Borrowed("PC"),
            Self::X(n) => Cow::Owned(format!("X{n}")),
            Self::FlagN => Cow::Borrowed("FLAG_N"),
            Self::FlagZ => Cow::Borrowed("FLAG_Z"),
        }
    }

    /// Flags hold a single digit; everything else is an address-sized word.
    #[must_use]
    pub const fn is_flag(&self) -> bool {
        matches!(self, Self::FlagN | Self::FlagZ)
    }

    /// Render a value the way the simulators print it for this key.
    #[must_use]
    pub fn format_value(&self, value: u64) -> String {
        if self.is_flag() {
            value.to_string()
        } else {
            format!("{value:#x}")
        }
    }

    /// Every key a dump can contain.
    pub fn all() -> impl Iterator<Item = Self> {
        [Self::Pc, Self::FlagN, Self::FlagZ]
            .into_iter()
            .chain((0..NUM_XREGS).map(Self::X))
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl Ord for StateKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name().cmp(&other.name())
    }
}

impl PartialOrd for StateKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for StateKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.as_str() {
            "PC" => return Ok(Self::Pc),
            "FLAG_N" => return Ok(Self::FlagN),
            "FLAG_Z" => return Ok(Self::FlagZ),
            _ => {}
        }
        let n = upper
            .strip_prefix('X')
            .and_then(|digits| digits.parse::<u32>().ok())
            .ok_or_else(|| KeyError::Unknown(s.to_string()))?;
        u8::try_from(n)
            .ok()
            .and_then(Self::x)
            .ok_or(KeyError::RegisterOutOfRange(n))
    }
}

/// Parsed, identifier-keyed snapshot of one simulator's reported state.
///
/// A key that is absent was not found in the output; this is distinct from a
/// key holding zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalState {
    values: BTreeMap<StateKey, u64>,
}

impl CanonicalState {
    /// Create an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for a key, `None` if it was not reported.
    #[must_use]
    pub fn get(&self, key: StateKey) -> Option<u64> {
        self.values.get(&key).copied()
    }

    /// Set a value, replacing any earlier one.
    pub fn insert(&mut self, key: StateKey, value: u64) -> Option<u64> {
        self.values.insert(key, value)
    }

    /// Drop a key, returning its previous value.
    pub fn remove(&mut self, key: StateKey) -> Option<u64> {
        self.values.remove(&key)
    }

    #[must_use]
    pub fn contains(&self, key: StateKey) -> bool {
        self.values.contains_key(&key)
    }

    /// Keys in report order.
    pub fn keys(&self) -> impl Iterator<Item = StateKey> + '_ {
        self.values.keys().copied()
    }

    /// `(key, value)` pairs in report order.
    pub fn iter(&self) -> impl Iterator<Item = (StateKey, u64)> + '_ {
        self.values.iter().map(|(k, v)| (*k, *v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(StateKey, u64)> for CanonicalState {
    fn from_iter<I: IntoIterator<Item = (StateKey, u64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for CanonicalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in self.iter() {
            writeln!(f, "{key}: {}", key.format_value(value))?;
        }
        Ok(())
    }
}
