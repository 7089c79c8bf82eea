//! Bytecode opcode ordinals.
//!
//! The template table is a fixed array indexed by these ordinals. The set
//! here is the subset the backend and its tests exercise; it is not a full
//! instruction catalogue.

/// A bytecode opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    IConst0,
    IConst1,
    LConst0,
    ILoad,
    IStore,
    LLoad,
    LStore,
    ALoad,
    AStore,
    IAdd,
    ISub,
    IMul,
    LAdd,
    LSub,
    IAnd,
    IOr,
    IXor,
    IfEq,
    IfNe,
    IfLt,
    Goto,
    TableSwitch,
    IReturn,
    LReturn,
    AReturn,
    Return,
    InvokeStatic,
}

impl Opcode {
    /// Number of opcode ordinals (the template table length).
    pub const COUNT: usize = Opcode::InvokeStatic as usize + 1;

    /// The ordinal used to index the template table.
    #[inline]
    pub const fn ordinal(self) -> usize {
        self as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinals_are_dense() {
        assert_eq!(Opcode::Nop.ordinal(), 0);
        assert_eq!(Opcode::InvokeStatic.ordinal(), Opcode::COUNT - 1);
        assert!(Opcode::COUNT < 256);
    }
}
