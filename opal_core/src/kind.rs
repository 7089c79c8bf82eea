//! Value kinds.
//!
//! A `Kind` is the static category of a value as the backend sees it:
//! wide enough to pick instruction widths and frame slots, nothing more.

/// Static value kind of a variable, constant, or continuation parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// 32-bit integer (the native switch tag kind).
    Int,
    /// 64-bit integer.
    Long,
    /// 32-bit IEEE float.
    Float,
    /// 64-bit IEEE float.
    Double,
    /// Heap reference.
    Reference,
    /// Machine word (pointer-sized, untraced).
    Word,
    /// No value (a continuation that receives nothing).
    Void,
}

impl Kind {
    /// Size of one stack slot in bytes on the 64-bit target.
    pub const STACK_SLOT_SIZE: u32 = 8;

    /// Width of this kind in bytes.
    #[inline]
    pub const fn width(self) -> u32 {
        match self {
            Kind::Int | Kind::Float => 4,
            Kind::Long | Kind::Double | Kind::Reference | Kind::Word => 8,
            Kind::Void => 0,
        }
    }

    /// Whether values of this kind live in general-purpose registers.
    #[inline]
    pub const fn is_integral(self) -> bool {
        matches!(self, Kind::Int | Kind::Long | Kind::Reference | Kind::Word)
    }

    /// Round a byte count up to a whole number of stack slots, in bytes.
    #[inline]
    pub const fn round_to_slot(bytes: u32) -> u32 {
        (bytes + Self::STACK_SLOT_SIZE - 1) & !(Self::STACK_SLOT_SIZE - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_widths() {
        assert_eq!(Kind::Int.width(), 4);
        assert_eq!(Kind::Long.width(), 8);
        assert_eq!(Kind::Reference.width(), 8);
        assert_eq!(Kind::Void.width(), 0);
    }

    #[test]
    fn test_round_to_slot() {
        assert_eq!(Kind::round_to_slot(0), 0);
        assert_eq!(Kind::round_to_slot(1), 8);
        assert_eq!(Kind::round_to_slot(8), 8);
        assert_eq!(Kind::round_to_slot(9), 16);
        assert_eq!(Kind::round_to_slot(24), 24);
    }
}
