//! Structured comparison of two canonical states.

use std::collections::BTreeSet;
use std::fmt;

use crate::state::{CanonicalState, StateKey};

/// One key whose value differs between the two simulators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Discrepancy {
    /// Register or flag that differs.
    pub key: StateKey,
    /// Value reported by the reference simulator (`None` if not reported).
    pub reference: Option<u64>,
    /// Value reported by the candidate simulator (`None` if not reported).
    pub candidate: Option<u64>,
}

impl Discrepancy {
    fn side(&self, value: Option<u64>) -> String {
        value.map_or_else(|| "not present".to_string(), |v| self.key.format_value(v))
    }

    /// Same discrepancy with reference and candidate exchanged.
    #[must_use]
    pub const fn swapped(self) -> Self {
        Self {
            key: self.key,
            reference: self.candidate,
            candidate: self.reference,
        }
    }
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} vs {}",
            self.key,
            self.side(self.reference),
            self.side(self.candidate)
        )
    }
}

/// Ordered list of discrepancies produced by [`diff_states`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComparisonReport {
    discrepancies: Vec<Discrepancy>,
}

impl ComparisonReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.discrepancies.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.discrepancies.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Discrepancy> {
        self.discrepancies.iter()
    }

    /// Keys that differ, in report order.
    pub fn keys(&self) -> impl Iterator<Item = StateKey> + '_ {
        self.discrepancies.iter().map(|d| d.key)
    }
}

impl<'a> IntoIterator for &'a ComparisonReport {
    type Item = &'a Discrepancy;
    type IntoIter = std::slice::Iter<'a, Discrepancy>;

    fn into_iter(self) -> Self::IntoIter {
        self.discrepancies.iter()
    }
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.discrepancies.is_empty() {
            return writeln!(f, "States are identical.");
        }
        let noun = if self.discrepancies.len() == 1 {
            "discrepancy"
        } else {
            "discrepancies"
        };
        writeln!(f, "Found {} {noun}:", self.discrepancies.len())?;
        for d in &self.discrepancies {
            writeln!(f, "  - {d}")?;
        }
        Ok(())
    }
}

/// Compare two states key by key.
///
/// Walks the union of both key sets in identifier order. Values are compared
/// numerically, so `0x0` and `0x00` in the source text are equal. A key
/// reported by only one side is a discrepancy against "not present".
#[must_use]
pub fn diff_states(reference: &CanonicalState, candidate: &CanonicalState) -> ComparisonReport {
    let keys: BTreeSet<StateKey> = reference.keys().chain(candidate.keys()).collect();

    let discrepancies = keys
        .into_iter()
        .filter_map(|key| {
            let (r, c) = (reference.get(key), candidate.get(key));
            (r != c).then_some(Discrepancy {
                key,
                reference: r,
                candidate: c,
            })
        })
        .collect();

    ComparisonReport { discrepancies }
}
