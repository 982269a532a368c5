//! Open-ended capability bitmask for matching tasks to processors.
//!
//! Capabilities are deliberately an opaque integer newtype rather than a
//! closed enum: subsystems mint their own bits independently, and the
//! scheduler only ever reasons about them with bitwise operations.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Bitmask describing a task's special execution requirement or a
/// processor's supported requirements.
///
/// The mask is 32 bits wide and that width is a hard budget: subsystems
/// registering specialized processors must coordinate bit assignment among
/// themselves (the crate reserves only [`CapabilityMask::GRAPHICS`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityMask(u32);

impl CapabilityMask {
    /// General tasks with no special requirements.
    pub const GENERAL: Self = Self(0);

    /// Tasks that need a graphics context bound to the executing thread.
    pub const GRAPHICS: Self = Self(0x1);

    /// Create a mask from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bit representation.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True if no capability bits are set.
    #[must_use]
    pub const fn is_general(self) -> bool {
        self.0 == 0
    }

    /// True if every bit required by `required` is present in this mask.
    #[must_use]
    pub const fn satisfies(self, required: Self) -> bool {
        required.0 & !self.0 == 0
    }

    /// Number of bits on which the two masks differ.
    ///
    /// Used by capability resolution to prefer the most specific,
    /// non-over-provisioned processor for a requirement.
    #[must_use]
    pub const fn distance(self, other: Self) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

impl BitOr for CapabilityMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CapabilityMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for CapabilityMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for CapabilityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn general_satisfies_only_general() {
        assert!(CapabilityMask::GENERAL.satisfies(CapabilityMask::GENERAL));
        assert!(!CapabilityMask::GENERAL.satisfies(CapabilityMask::GRAPHICS));
    }

    #[test]
    fn superset_satisfies_requirement() {
        let pool = CapabilityMask::from_bits(0x3);
        assert!(pool.satisfies(CapabilityMask::GRAPHICS));
        assert!(pool.satisfies(CapabilityMask::from_bits(0x2)));
        assert!(!pool.satisfies(CapabilityMask::from_bits(0x4)));
    }

    #[test]
    fn distance_counts_differing_bits() {
        let a = CapabilityMask::from_bits(0b1010);
        let b = CapabilityMask::from_bits(0b0110);
        assert_eq!(a.distance(b), 2);
        assert_eq!(a.distance(a), 0);
    }

    #[test]
    fn bit_operators_compose() {
        let mut m = CapabilityMask::GENERAL;
        m |= CapabilityMask::GRAPHICS;
        assert_eq!(m.bits(), 0x1);
        assert_eq!((m | CapabilityMask::from_bits(0x4)).bits(), 0x5);
        assert_eq!((m & CapabilityMask::GRAPHICS).bits(), 0x1);
    }
}
