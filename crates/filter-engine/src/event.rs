//! Boundary types shared with the interception layer: the [`EventData`]
//! accessor over a live operation's decoded parameters, and the bitmask
//! types folded into a filtering decision.

use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::error::FilterError;

/// Name of a decoded operation parameter.
///
/// The engine never interprets parameter byte layouts, it only compares
/// them; which id maps to which layout is a contract between the
/// interception layer and whoever registers filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterId {
    Path,
    VolumeName,
    ProcessId,
    ThreadId,
    UserId,
    DesiredAccess,
    CreateOptions,
    AccessFlags,
    ResultStatus,
}

/// Read-only access to the currently intercepted operation.
///
/// Implementations must return stable bytes for the duration of a single
/// [`FilterSet::get_verdict`](crate::FilterSet::get_verdict) call and be
/// safe to query repeatedly.
pub trait EventData {
    /// Raw bytes of the decoded parameter `id`.
    ///
    /// A missing parameter is a contract breach between the caller and
    /// the registered filters, so it surfaces as
    /// [`FilterError::ParameterNotFound`] rather than a non-match.
    fn query_parameter(&self, id: ParameterId) -> Result<&[u8], FilterError>;
}

/// Bit-flag decision value. Winning filters contribute their bits via
/// OR, so independent policy dimensions (deny, audit, ...) compose.
#[derive(Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict(u32);

impl Verdict {
    /// No filter matched. This is the empty bit set, never an error.
    pub const NOT_FILTERED: Verdict = Verdict(0);
    pub const ASK: Verdict = Verdict(0x1);
    pub const DENY: Verdict = Verdict(0x2);
    pub const AUDIT: Verdict = Verdict(0x4);
    pub const CACHE: Verdict = Verdict(0x8);

    pub const fn from_bits(bits: u32) -> Self {
        Verdict(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Verdict) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Verdict {
    type Output = Verdict;

    fn bitor(self, rhs: Verdict) -> Verdict {
        Verdict(self.0 | rhs.0)
    }
}

impl BitOrAssign for Verdict {
    fn bitor_assign(&mut self, rhs: Verdict) {
        self.0 |= rhs.0;
    }
}

impl std::fmt::Debug for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Verdict({:#x})", self.0)
    }
}

/// Bitmask naming which extra parameters the caller should collect for
/// deeper processing, contributed by winning filters via OR.
#[derive(Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamsMask(u64);

impl ParamsMask {
    pub const EMPTY: ParamsMask = ParamsMask(0);

    pub const fn from_bits(bits: u64) -> Self {
        ParamsMask(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ParamsMask {
    type Output = ParamsMask;

    fn bitor(self, rhs: ParamsMask) -> ParamsMask {
        ParamsMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for ParamsMask {
    fn bitor_assign(&mut self, rhs: ParamsMask) {
        self.0 |= rhs.0;
    }
}

impl std::fmt::Debug for ParamsMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ParamsMask({:#x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_bits_compose() {
        let v = Verdict::DENY | Verdict::AUDIT;
        assert!(v.contains(Verdict::DENY));
        assert!(v.contains(Verdict::AUDIT));
        assert!(!v.contains(Verdict::ASK));
        assert_eq!(v.bits(), 0x6);
    }

    #[test]
    fn not_filtered_is_empty() {
        assert!(Verdict::NOT_FILTERED.is_empty());
        assert_eq!(Verdict::default(), Verdict::NOT_FILTERED);
        assert!(ParamsMask::EMPTY.is_empty());
    }
}
