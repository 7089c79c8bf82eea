//! Switch comparators.

/// Comparison relation a switch applies between its tag and each match
/// constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparator {
    Equal,
    NotEqual,
    UnsignedLess,
    UnsignedLessEqual,
    UnsignedGreaterEqual,
    UnsignedGreater,
    SignedLess,
    SignedLessEqual,
    SignedGreaterEqual,
    SignedGreater,
}

impl Comparator {
    /// Whether this is the equality relation, the only one eligible for
    /// multi-way dispatch lowering.
    #[inline]
    pub const fn is_equality(self) -> bool {
        matches!(self, Comparator::Equal)
    }
}
