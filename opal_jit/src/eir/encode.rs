//! EIR to x64 machine code.
//!
//! A single forward pass over the blocks in arena order. Virtual
//! variables are bound to general-purpose registers up front: parameters
//! take their calling-convention registers, everything else draws from a
//! free pool. `r11` is reserved as the encoder's own scratch register for
//! materializing immediates. Forward jump displacements are emitted as
//! zero and patched once every block offset is known.

use rustc_hash::FxHashMap;

use opal_core::{CompileError, CompileResult, Kind};

use crate::cir::{Builtin, VarId};
use crate::code::{CodeBuffer, CompiledMethod};
use crate::eir::{ConditionCode, EirBlockId, EirInstruction, EirMethod, EirOperand};
use crate::platform::{ArgLocation, CallingConvention, Gpr, Signature};

const SCRATCH: Gpr = Gpr::R11;

/// Registers handed to non-parameter variables, in preference order.
const POOL: [Gpr; 12] = [
    Gpr::Rax,
    Gpr::Rcx,
    Gpr::Rdx,
    Gpr::Rbx,
    Gpr::Rsi,
    Gpr::Rdi,
    Gpr::R8,
    Gpr::R9,
    Gpr::R10,
    Gpr::R12,
    Gpr::R13,
    Gpr::R14,
];

/// Encode a selected method into executable bytes.
pub fn encode(method: &EirMethod, cc: &dyn CallingConvention) -> CompileResult<CompiledMethod> {
    let registers = assign_registers(method, cc)?;
    let mut encoder = Encoder {
        buffer: CodeBuffer::new(),
        registers,
        result_register: cc.result_register(),
        block_offsets: FxHashMap::default(),
        fixups: Vec::new(),
    };

    for id in method.blocks.ids() {
        let offset = encoder.buffer.current_position();
        encoder.block_offsets.insert(id, offset);
        for instruction in &method.blocks[id].instructions {
            encoder.encode_instruction(instruction)?;
        }
    }
    encoder.apply_fixups()?;

    let frame_size = Kind::round_to_slot(
        encoder.registers.len() as u32 * Kind::STACK_SLOT_SIZE,
    );
    Ok(CompiledMethod::new(encoder.buffer.finish(), frame_size))
}

/// Bind every variable the method mentions to a register.
fn assign_registers(
    method: &EirMethod,
    cc: &dyn CallingConvention,
) -> CompileResult<FxHashMap<VarId, Gpr>> {
    let mut registers: FxHashMap<VarId, Gpr> = FxHashMap::default();

    let signature = Signature::new(vec![Kind::Word; method.params.len()], method.result_kind);
    for (&param, location) in method.params.iter().zip(cc.locate(&signature)) {
        match location {
            ArgLocation::Register(r) => {
                registers.insert(param, r);
            }
            _ => {
                return Err(CompileError::Unrepresentable(
                    "parameter does not fit in an integer register",
                ))
            }
        }
    }

    let used: Vec<Gpr> = registers.values().copied().collect();
    let mut pool = POOL.iter().copied().filter(move |r| !used.contains(r));
    let mut bind = |registers: &mut FxHashMap<VarId, Gpr>, v: VarId| -> CompileResult<()> {
        if registers.contains_key(&v) {
            return Ok(());
        }
        match pool.next() {
            Some(r) => {
                registers.insert(v, r);
                Ok(())
            }
            None => Err(CompileError::Unrepresentable(
                "method needs more registers than the allocator has",
            )),
        }
    };

    for id in method.blocks.ids() {
        for instruction in &method.blocks[id].instructions {
            match instruction {
                EirInstruction::Mov { dest, src } => {
                    bind(&mut registers, *dest)?;
                    bind_operand(&mut registers, &mut bind, *src)?;
                }
                EirInstruction::Op { dest, args, .. } => {
                    bind(&mut registers, *dest)?;
                    for &arg in args {
                        bind_operand(&mut registers, &mut bind, arg)?;
                    }
                }
                EirInstruction::Compare32 { left, right }
                | EirInstruction::Compare64 { left, right } => {
                    bind_operand(&mut registers, &mut bind, *left)?;
                    bind_operand(&mut registers, &mut bind, *right)?;
                }
                EirInstruction::IndirectJump(target) => {
                    bind_operand(&mut registers, &mut bind, *target)?;
                }
                EirInstruction::Switch { tag, matches, .. } => {
                    bind_operand(&mut registers, &mut bind, *tag)?;
                    for &m in matches {
                        bind_operand(&mut registers, &mut bind, m)?;
                    }
                }
                EirInstruction::Ret(Some(value)) => {
                    bind_operand(&mut registers, &mut bind, *value)?;
                }
                EirInstruction::Branch { .. }
                | EirInstruction::Jump(_)
                | EirInstruction::Ret(None) => {}
            }
        }
    }
    Ok(registers)
}

fn bind_operand(
    registers: &mut FxHashMap<VarId, Gpr>,
    bind: &mut impl FnMut(&mut FxHashMap<VarId, Gpr>, VarId) -> CompileResult<()>,
    operand: EirOperand,
) -> CompileResult<()> {
    match operand {
        EirOperand::Var(v) => bind(registers, v),
        EirOperand::Imm { .. } => Ok(()),
    }
}

struct Encoder {
    buffer: CodeBuffer,
    registers: FxHashMap<VarId, Gpr>,
    result_register: Gpr,
    block_offsets: FxHashMap<EirBlockId, usize>,
    /// `(displacement_offset, target)` pairs awaiting final block offsets.
    fixups: Vec<(usize, EirBlockId)>,
}

impl Encoder {
    fn encode_instruction(&mut self, instruction: &EirInstruction) -> CompileResult<()> {
        match instruction {
            EirInstruction::Mov { dest, src } => {
                let dest = self.register(*dest);
                self.mov(dest, *src);
                Ok(())
            }
            EirInstruction::Op { dest, op, args } => self.op(*dest, *op, args),
            EirInstruction::Compare32 { left, right } => self.compare(false, *left, *right),
            EirInstruction::Compare64 { left, right } => self.compare(true, *left, *right),
            EirInstruction::Branch { cc, target } => {
                self.jcc(*cc, *target);
                Ok(())
            }
            EirInstruction::Jump(target) => {
                self.jmp(*target);
                Ok(())
            }
            EirInstruction::IndirectJump(target) => match *target {
                EirOperand::Var(v) => {
                    let r = self.register(v);
                    self.jmp_register(r);
                    Ok(())
                }
                EirOperand::Imm { .. } => Err(CompileError::Unrepresentable(
                    "indirect jump through an immediate",
                )),
            },
            EirInstruction::Switch {
                tag,
                matches,
                targets,
                default,
            } => {
                // Dispatch encodes as a test-and-branch per case; the
                // selector has already fixed the shape, this is just its
                // byte form.
                for (&m, &t) in matches.iter().zip(targets) {
                    self.compare(false, *tag, m)?;
                    self.jcc(ConditionCode::Jz, t);
                }
                self.jmp(*default);
                Ok(())
            }
            EirInstruction::Ret(value) => {
                if let Some(value) = value {
                    self.mov(self.result_register, *value);
                }
                self.buffer.emit_byte(0xC3);
                Ok(())
            }
        }
    }

    fn register(&self, v: VarId) -> Gpr {
        // assign_registers visited every instruction first.
        self.registers[&v]
    }

    /// `dest := src`, eliding register self-moves.
    fn mov(&mut self, dest: Gpr, src: EirOperand) {
        match src {
            EirOperand::Var(v) => {
                let src = self.register(v);
                if src != dest {
                    self.mov_rr(dest, src);
                }
            }
            EirOperand::Imm { kind, bits } => self.mov_imm(dest, kind, bits),
        }
    }

    fn op(&mut self, dest: VarId, op: Builtin, args: &[EirOperand]) -> CompileResult<()> {
        let dest = self.register(dest);
        let wide = matches!(op, Builtin::LongAdd | Builtin::LongSub);

        // Two-address form: dest takes the left operand, then combines with
        // the right. If dest is also the right operand's register, park the
        // right value in scratch first.
        if let EirOperand::Var(v) = args[1] {
            if self.register(v) == dest {
                self.mov_rr(SCRATCH, dest);
                self.mov(dest, args[0]);
                self.alu_rr(op, wide, dest, SCRATCH);
                return Ok(());
            }
        }
        self.mov(dest, args[0]);

        match args[1] {
            EirOperand::Var(v) => {
                let r = self.register(v);
                self.alu_rr(op, wide, dest, r);
            }
            EirOperand::Imm { bits, .. } => match alu_imm_digit(op) {
                Some(digit) if fits_i32(bits, wide) => {
                    self.rex(wide, None, dest);
                    self.buffer.emit_byte(0x81);
                    self.modrm_digit(digit, dest);
                    self.buffer.emit_u32(bits as u32);
                }
                _ => {
                    self.mov_imm(SCRATCH, if wide { Kind::Long } else { Kind::Int }, bits);
                    self.alu_rr(op, wide, dest, SCRATCH);
                }
            },
        }
        Ok(())
    }

    fn compare(&mut self, wide: bool, left: EirOperand, right: EirOperand) -> CompileResult<()> {
        let left = match left {
            EirOperand::Var(v) => self.register(v),
            EirOperand::Imm { kind, bits } => {
                self.mov_imm(SCRATCH, kind, bits);
                SCRATCH
            }
        };
        match right {
            EirOperand::Var(v) => {
                let r = self.register(v);
                // cmp left, r
                self.rex(wide, Some(left), r);
                self.buffer.emit_byte(0x3B);
                self.modrm_rr(left, r);
            }
            EirOperand::Imm { bits, .. } => {
                if fits_i32(bits, wide) {
                    self.rex(wide, None, left);
                    self.buffer.emit_byte(0x81);
                    self.modrm_digit(7, left);
                    self.buffer.emit_u32(bits as u32);
                } else {
                    self.mov_imm(SCRATCH, Kind::Long, bits);
                    self.rex(wide, Some(left), SCRATCH);
                    self.buffer.emit_byte(0x3B);
                    self.modrm_rr(left, SCRATCH);
                }
            }
        }
        Ok(())
    }

    // ==================== raw x64 forms ====================

    /// `mov dest, src` (64-bit, register to register).
    fn mov_rr(&mut self, dest: Gpr, src: Gpr) {
        self.rex(true, Some(dest), src);
        self.buffer.emit_byte(0x8B);
        self.modrm_rr(dest, src);
    }

    /// `mov dest, imm`, at the immediate's natural width.
    fn mov_imm(&mut self, dest: Gpr, kind: Kind, bits: u64) {
        if kind.width() <= 4 {
            // B8+rd id, zero-extending into the full register.
            if dest.needs_rex_bit() {
                self.buffer.emit_byte(0x41);
            }
            self.buffer.emit_byte(0xB8 + dest.low_bits());
            self.buffer.emit_u32(bits as u32);
        } else {
            self.rex(true, None, dest);
            self.buffer.emit_byte(0xB8 + dest.low_bits());
            self.buffer.emit_u64(bits);
        }
    }

    /// Two-register ALU op in the `op r, r/m` direction.
    fn alu_rr(&mut self, op: Builtin, wide: bool, dest: Gpr, src: Gpr) {
        self.rex(wide, Some(dest), src);
        match op {
            Builtin::IntAdd | Builtin::LongAdd => self.buffer.emit_byte(0x03),
            Builtin::IntSub | Builtin::LongSub => self.buffer.emit_byte(0x2B),
            Builtin::IntAnd => self.buffer.emit_byte(0x23),
            Builtin::IntOr => self.buffer.emit_byte(0x0B),
            Builtin::IntXor => self.buffer.emit_byte(0x33),
            Builtin::IntMul => {
                self.buffer.emit_byte(0x0F);
                self.buffer.emit_byte(0xAF);
            }
        }
        self.modrm_rr(dest, src);
    }

    /// `jcc rel32` to a block, displacement patched later if forward.
    fn jcc(&mut self, cc: ConditionCode, target: EirBlockId) {
        self.buffer.emit_byte(0x0F);
        self.buffer.emit_byte(0x80 | cc.encoding());
        self.emit_rel32(target);
    }

    /// `jmp rel32` to a block.
    fn jmp(&mut self, target: EirBlockId) {
        self.buffer.emit_byte(0xE9);
        self.emit_rel32(target);
    }

    /// `jmp r64`.
    fn jmp_register(&mut self, target: Gpr) {
        if target.needs_rex_bit() {
            self.buffer.emit_byte(0x41);
        }
        self.buffer.emit_byte(0xFF);
        self.modrm_digit(4, target);
    }

    fn emit_rel32(&mut self, target: EirBlockId) {
        let offset = self.buffer.current_position();
        self.fixups.push((offset, target));
        self.buffer.emit_u32(0);
    }

    fn apply_fixups(&mut self) -> CompileResult<()> {
        for &(offset, target) in &self.fixups {
            let destination = self.block_offsets[&target];
            let relative = destination as i64 - (offset as i64 + 4);
            let relative = i32::try_from(relative)
                .map_err(|_| CompileError::DisplacementOverflow(offset))?;
            self.buffer
                .fix_with(offset, 4, |bytes| {
                    bytes.copy_from_slice(&relative.to_le_bytes())
                })?;
        }
        Ok(())
    }

    /// Emit a REX prefix when width or register extension requires one.
    fn rex(&mut self, wide: bool, reg: Option<Gpr>, rm: Gpr) {
        let mut rex = 0x40u8;
        if wide {
            rex |= 0x08;
        }
        if reg.is_some_and(|r| r.needs_rex_bit()) {
            rex |= 0x04;
        }
        if rm.needs_rex_bit() {
            rex |= 0x01;
        }
        if rex != 0x40 {
            self.buffer.emit_byte(rex);
        }
    }

    fn modrm_rr(&mut self, reg: Gpr, rm: Gpr) {
        self.buffer
            .emit_byte(0xC0 | (reg.low_bits() << 3) | rm.low_bits());
    }

    fn modrm_digit(&mut self, digit: u8, rm: Gpr) {
        self.buffer.emit_byte(0xC0 | (digit << 3) | rm.low_bits());
    }
}

fn alu_imm_digit(op: Builtin) -> Option<u8> {
    match op {
        Builtin::IntAdd | Builtin::LongAdd => Some(0),
        Builtin::IntSub | Builtin::LongSub => Some(5),
        Builtin::IntAnd => Some(4),
        Builtin::IntOr => Some(1),
        Builtin::IntXor => Some(6),
        Builtin::IntMul => None,
    }
}

fn fits_i32(bits: u64, wide: bool) -> bool {
    if !wide {
        return true;
    }
    i32::try_from(bits as i64).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{Arena, Id};
    use crate::eir::EirBlock;
    use crate::platform::SystemV;
    use smallvec::smallvec;

    fn var(n: u32) -> VarId {
        Id::new(n)
    }

    fn method_of(blocks: Arena<EirBlock>, params: Vec<VarId>, result_kind: Kind) -> EirMethod {
        let entry = Id::new(0);
        EirMethod {
            params,
            blocks,
            entry,
            result_kind,
        }
    }

    #[test]
    fn test_ret_only() {
        let mut blocks = Arena::new();
        blocks.alloc(EirBlock {
            instructions: vec![EirInstruction::Ret(None)],
        });
        let method = method_of(blocks, vec![], Kind::Void);

        let compiled = encode(&method, &SystemV).unwrap();
        assert_eq!(compiled.code, vec![0xC3]);
    }

    #[test]
    fn test_add_immediate_returns_in_rax() {
        // v1 := v0 + 1; return v1. v0 arrives in rdi, v1 lands in rax.
        let v0 = var(0);
        let v1 = var(1);
        let mut blocks = Arena::new();
        blocks.alloc(EirBlock {
            instructions: vec![
                EirInstruction::Op {
                    dest: v1,
                    op: Builtin::IntAdd,
                    args: smallvec![
                        EirOperand::Var(v0),
                        EirOperand::Imm {
                            kind: Kind::Int,
                            bits: 1
                        }
                    ],
                },
                EirInstruction::Ret(Some(EirOperand::Var(v1))),
            ],
        });
        let method = method_of(blocks, vec![v0], Kind::Int);

        let compiled = encode(&method, &SystemV).unwrap();
        assert_eq!(
            compiled.code,
            vec![
                0x48, 0x8B, 0xC7, // mov rax, rdi
                0x81, 0xC0, 0x01, 0x00, 0x00, 0x00, // add eax, 1
                0xC3, // ret
            ]
        );
    }

    #[test]
    fn test_forward_jump_patches_to_zero() {
        // Entry jumps to the block that starts right after it.
        let mut blocks = Arena::new();
        let _entry = blocks.alloc(EirBlock {
            instructions: vec![],
        });
        let exit: EirBlockId = Id::new(1);
        blocks[Id::new(0)].instructions = vec![EirInstruction::Jump(exit)];
        blocks.alloc(EirBlock {
            instructions: vec![EirInstruction::Ret(None)],
        });
        let method = method_of(blocks, vec![], Kind::Void);

        let compiled = encode(&method, &SystemV).unwrap();
        assert_eq!(compiled.code, vec![0xE9, 0, 0, 0, 0, 0xC3]);
    }

    #[test]
    fn test_conditional_branch_displacement() {
        // cmp edi, 5; jz exit; ret; exit: ret
        let v0 = var(0);
        let mut blocks = Arena::new();
        let exit: EirBlockId = Id::new(1);
        blocks.alloc(EirBlock {
            instructions: vec![
                EirInstruction::Compare32 {
                    left: EirOperand::Var(v0),
                    right: EirOperand::Imm {
                        kind: Kind::Int,
                        bits: 5,
                    },
                },
                EirInstruction::Branch {
                    cc: ConditionCode::Jz,
                    target: exit,
                },
                EirInstruction::Ret(None),
            ],
        });
        blocks.alloc(EirBlock {
            instructions: vec![EirInstruction::Ret(None)],
        });
        let method = method_of(blocks, vec![v0], Kind::Void);

        let compiled = encode(&method, &SystemV).unwrap();
        assert_eq!(
            compiled.code,
            vec![
                0x81, 0xFF, 0x05, 0x00, 0x00, 0x00, // cmp edi, 5
                0x0F, 0x84, 0x01, 0x00, 0x00, 0x00, // jz +1 (over the ret)
                0xC3, // ret
                0xC3, // exit: ret
            ]
        );
    }

    #[test]
    fn test_indirect_jump_through_register() {
        let v0 = var(0);
        let mut blocks = Arena::new();
        blocks.alloc(EirBlock {
            instructions: vec![EirInstruction::IndirectJump(EirOperand::Var(v0))],
        });
        let method = method_of(blocks, vec![v0], Kind::Void);

        let compiled = encode(&method, &SystemV).unwrap();
        // jmp rdi
        assert_eq!(compiled.code, vec![0xFF, 0xE7]);
    }

    #[test]
    fn test_long_immediate_materializes() {
        // A 64-bit add whose immediate cannot sign-extend from 32 bits.
        let v0 = var(0);
        let v1 = var(1);
        let big = 0x1_0000_0000u64;
        let mut blocks = Arena::new();
        blocks.alloc(EirBlock {
            instructions: vec![
                EirInstruction::Op {
                    dest: v1,
                    op: Builtin::LongAdd,
                    args: smallvec![
                        EirOperand::Var(v0),
                        EirOperand::Imm {
                            kind: Kind::Long,
                            bits: big
                        }
                    ],
                },
                EirInstruction::Ret(Some(EirOperand::Var(v1))),
            ],
        });
        let method = method_of(blocks, vec![v0], Kind::Long);

        let compiled = encode(&method, &SystemV).unwrap();
        let mut expected = vec![0x48, 0x8B, 0xC7]; // mov rax, rdi
        expected.extend([0x49, 0xBB]); // movabs r11, big
        expected.extend(big.to_le_bytes());
        expected.extend([0x49, 0x03, 0xC3]); // add rax, r11
        expected.push(0xC3);
        assert_eq!(compiled.code, expected);
    }

    #[test]
    fn test_register_pool_exhaustion_is_an_error() {
        let mut blocks = Arena::new();
        let instructions: Vec<EirInstruction> = (0..32)
            .map(|i| EirInstruction::Mov {
                dest: var(i),
                src: EirOperand::Imm {
                    kind: Kind::Int,
                    bits: i as u64,
                },
            })
            .collect();
        blocks.alloc(EirBlock { instructions });
        let method = method_of(blocks, vec![], Kind::Void);

        assert!(matches!(
            encode(&method, &SystemV),
            Err(CompileError::Unrepresentable(_))
        ));
    }
}
