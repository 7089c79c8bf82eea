//! Target description: registers, instruction sets, calling conventions.
//!
//! The backend is written against the [`CallingConvention`] trait so the
//! template validator and the encoder share one answer to "where does
//! parameter `i` live". The only concrete convention here is the System-V
//! x64 one the runtime uses for compiled-to-compiled calls.

use opal_core::Kind;

/// x64 general-purpose registers in encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Gpr {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Gpr {
    /// Low three encoding bits.
    #[inline]
    pub fn low_bits(self) -> u8 {
        self as u8 & 0x7
    }

    /// Whether the register needs a REX extension bit.
    #[inline]
    pub fn needs_rex_bit(self) -> bool {
        self as u8 >= 8
    }
}

/// Instruction-set architectures the backend knows about.
///
/// Only x64 has an encoder; the other values let template sets carry
/// sources for several targets, with the host filtering out the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isa {
    X64,
    Arm64,
}

impl Isa {
    /// The ISA code is generated for.
    pub fn host() -> Isa {
        Isa::X64
    }

    /// Bytes per pointer.
    #[inline]
    pub fn word_width(self) -> u32 {
        match self {
            Isa::X64 | Isa::Arm64 => 8,
        }
    }
}

/// Where one parameter of a signature lives at entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgLocation {
    /// In a general-purpose register.
    Register(Gpr),
    /// In a floating-point register, identified by index.
    FloatRegister(u8),
    /// On the stack, at `offset` bytes above the frame pointer.
    Stack { offset: u32 },
}

impl ArgLocation {
    /// Whether the argument is passed on the stack.
    #[inline]
    pub fn is_stack(self) -> bool {
        matches!(self, ArgLocation::Stack { .. })
    }
}

/// A method signature as the convention sees it.
#[derive(Debug, Clone)]
pub struct Signature {
    pub params: Vec<Kind>,
    pub result: Kind,
}

impl Signature {
    pub fn new(params: Vec<Kind>, result: Kind) -> Self {
        Signature { params, result }
    }
}

/// Maps signature parameters to locations and names the result register.
pub trait CallingConvention {
    /// Locations for every parameter of `signature`, in order.
    fn locate(&self, signature: &Signature) -> Vec<ArgLocation>;

    /// The register an integral or reference result is returned in.
    fn result_register(&self) -> Gpr;

    /// Registers free for scratch use inside a method body.
    fn scratch_registers(&self) -> &[Gpr];
}

/// System-V AMD64: six integer argument registers, eight float registers,
/// the rest on the stack; integral results in `rax`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemV;

impl SystemV {
    const INT_ARGS: [Gpr; 6] = [Gpr::Rdi, Gpr::Rsi, Gpr::Rdx, Gpr::Rcx, Gpr::R8, Gpr::R9];
    const FLOAT_ARG_COUNT: u8 = 8;
    const SCRATCH: [Gpr; 7] = [
        Gpr::Rax,
        Gpr::R10,
        Gpr::R11,
        Gpr::Rdi,
        Gpr::Rsi,
        Gpr::Rdx,
        Gpr::Rcx,
    ];
}

impl CallingConvention for SystemV {
    fn locate(&self, signature: &Signature) -> Vec<ArgLocation> {
        let mut locations = Vec::with_capacity(signature.params.len());
        let mut next_int = 0;
        let mut next_float = 0;
        let mut stack_offset = 16; // above saved rbp and the return address

        for &kind in &signature.params {
            let location = match kind {
                Kind::Float | Kind::Double if next_float < Self::FLOAT_ARG_COUNT => {
                    let index = next_float;
                    next_float += 1;
                    ArgLocation::FloatRegister(index)
                }
                Kind::Float | Kind::Double => spill(&mut stack_offset),
                _ if next_int < Self::INT_ARGS.len() => {
                    let register = Self::INT_ARGS[next_int];
                    next_int += 1;
                    ArgLocation::Register(register)
                }
                _ => spill(&mut stack_offset),
            };
            locations.push(location);
        }
        locations
    }

    fn result_register(&self) -> Gpr {
        Gpr::Rax
    }

    fn scratch_registers(&self) -> &[Gpr] {
        &Self::SCRATCH
    }
}

fn spill(stack_offset: &mut u32) -> ArgLocation {
    let offset = *stack_offset;
    *stack_offset += Kind::STACK_SLOT_SIZE;
    ArgLocation::Stack { offset }
}
