//! Parameter predicates and the deduplicated predicate list.
//!
//! Every filter declares zero or more parameter conditions. Filters that
//! declare byte-identical conditions share a single stored [`Predicate`]
//! which keeps the set of slot positions depending on it, so each
//! condition is evaluated once per intercepted operation no matter how
//! many filters use it.

use serde::{Deserialize, Serialize};

use crate::{
    error::FilterError,
    event::{EventData, ParameterId},
};

/// How observed parameter bytes are compared against the literal set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    /// Matches if the observed bytes equal any literal in the set.
    Equals,
    /// Matches if `observed & literal != 0`. Defined for 4-byte values
    /// only, with exactly one literal.
    BitwiseAndNonZero,
}

/// One or more fixed-width literal values stored back to back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawValueSet")]
pub struct ValueSet {
    data: Vec<u8>,
    count: u32,
}

/// Unvalidated wire shape of [`ValueSet`]; deserialization funnels
/// through [`ValueSet::new`] so malformed configuration is rejected at
/// the boundary.
#[derive(Deserialize)]
struct RawValueSet {
    data: Vec<u8>,
    count: u32,
}

impl TryFrom<RawValueSet> for ValueSet {
    type Error = FilterError;

    fn try_from(raw: RawValueSet) -> Result<Self, FilterError> {
        ValueSet::new(raw.data, raw.count)
    }
}

impl ValueSet {
    /// Builds a set of `count` literals of width `data.len() / count`.
    pub fn new(data: Vec<u8>, count: u32) -> Result<Self, FilterError> {
        if count == 0 || data.is_empty() {
            return Err(FilterError::InvalidArgument(
                "predicate literal set must not be empty",
            ));
        }
        if data.len() % count as usize != 0 {
            return Err(FilterError::InvalidArgument(
                "predicate literal set size must be a multiple of the value count",
            ));
        }
        Ok(ValueSet { data, count })
    }

    /// Single literal from raw bytes.
    pub fn single(bytes: &[u8]) -> Result<Self, FilterError> {
        ValueSet::new(bytes.to_vec(), 1)
    }

    /// Single 4-byte literal in native byte order.
    pub fn from_u32(value: u32) -> Self {
        ValueSet {
            data: value.to_ne_bytes().to_vec(),
            count: 1,
        }
    }

    pub fn width(&self) -> usize {
        self.data.len() / self.count as usize
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact(self.width())
    }
}

/// Caller-supplied description of one parameter condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredicateSpec {
    pub parameter: ParameterId,
    pub comparison: Comparison,
    pub negated: bool,
    pub values: ValueSet,
}

impl PredicateSpec {
    pub(crate) fn validate(&self) -> Result<(), FilterError> {
        if self.comparison == Comparison::BitwiseAndNonZero {
            if self.values.count() != 1 {
                return Err(FilterError::InvalidArgument(
                    "bitwise predicate takes exactly one literal",
                ));
            }
            if self.values.width() != 4 {
                return Err(FilterError::InvalidArgument(
                    "bitwise predicate is defined for 4-byte values only",
                ));
            }
        }
        Ok(())
    }
}

/// A stored, deduplicated condition plus the slot positions that
/// depend on it.
pub(crate) struct Predicate {
    parameter: ParameterId,
    comparison: Comparison,
    negated: bool,
    values: ValueSet,
    positions: Vec<usize>,
}

impl Predicate {
    fn matches_spec(&self, spec: &PredicateSpec) -> bool {
        self.parameter == spec.parameter
            && self.comparison == spec.comparison
            && self.negated == spec.negated
            && self.values == spec.values
    }

    pub(crate) fn positions(&self) -> &[usize] {
        &self.positions
    }

    /// Evaluates this condition against a live event.
    ///
    /// Width mismatches between observed and literal bytes are ordinary
    /// non-matches; a parameter the event cannot resolve is an error.
    pub(crate) fn evaluate(&self, event: &dyn EventData) -> Result<bool, FilterError> {
        let observed = event.query_parameter(self.parameter)?;

        let matched = match self.comparison {
            Comparison::Equals => {
                observed.len() == self.values.width()
                    && self.values.iter().any(|literal| literal == observed)
            }
            Comparison::BitwiseAndNonZero => {
                // Literal width is validated at registration; the
                // observed side may still disagree, which is a
                // non-match.
                match (
                    <[u8; 4]>::try_from(observed),
                    self.values.iter().next().and_then(|literal| <[u8; 4]>::try_from(literal).ok()),
                ) {
                    (Ok(observed), Some(literal)) => {
                        u32::from_ne_bytes(observed) & u32::from_ne_bytes(literal) != 0
                    }
                    _ => false,
                }
            }
        };

        Ok(matched != self.negated)
    }
}

/// Owned collection of deduplicated predicates for one filter set.
pub(crate) struct PredicateList {
    entries: Vec<Predicate>,
}

impl PredicateList {
    pub(crate) fn new() -> Self {
        PredicateList {
            entries: Vec::new(),
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Predicate> {
        self.entries.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Attaches `position` to the predicate described by `spec`,
    /// reusing an existing identical predicate or storing a new one.
    pub(crate) fn attach(
        &mut self,
        spec: PredicateSpec,
        position: usize,
    ) -> Result<(), FilterError> {
        spec.validate()?;

        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|entry| entry.matches_spec(&spec))
        {
            if !existing.positions.contains(&position) {
                existing.positions.push(position);
            }
            return Ok(());
        }

        self.entries.push(Predicate {
            parameter: spec.parameter,
            comparison: spec.comparison,
            negated: spec.negated,
            values: spec.values,
            positions: vec![position],
        });
        Ok(())
    }

    /// Detaches `position` from every predicate, dropping predicates
    /// whose dependent set becomes empty. Used both by filter removal
    /// and by the rollback path of a failed registration.
    pub(crate) fn detach_position(&mut self, position: usize) {
        for entry in &mut self.entries {
            entry.positions.retain(|&pos| pos != position);
        }
        self.entries.retain(|entry| !entry.positions.is_empty());
    }
}
