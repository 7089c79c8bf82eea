//! Per-opcode template table.
//!
//! The fast compilation path does not run the IR pipeline at all: it
//! copies a precompiled code template per bytecode opcode into the output
//! buffer. For that to be sound every template must be position-free and
//! self-contained, which the builder enforces at table-construction time:
//! no stack-resident parameters, no reference literals, no scalar
//! literals. Templates are registered either precompiled or straight from
//! a CIR source, which runs the optimizing pipeline in place; sources for
//! an instruction set other than the host's are skipped. All templates
//! share one frame layout, so the table's frame size is the maximum over
//! its members, rounded to a whole slot count.

pub mod stitch;

use opal_core::{CompileError, CompileResult, Kind, Opcode};

use crate::code::CompiledMethod;
use crate::compile::{compile_method_with, CirMethod};
use crate::platform::{CallingConvention, Isa, Signature};

pub use stitch::{stitch, StitchedMethod};

/// One opcode's precompiled code.
#[derive(Debug, Clone)]
pub struct Template {
    pub opcode: Opcode,
    pub code: Vec<u8>,
    /// Frame bytes this template needs when executing.
    pub frame_size: u32,
}

impl Template {
    #[inline]
    pub fn code_len(&self) -> usize {
        self.code.len()
    }
}

/// A template's CIR form, tagged with the opcode it implements and the
/// instruction set it was written for.
#[derive(Debug)]
pub struct TemplateSource {
    pub opcode: Opcode,
    pub isa: Isa,
    pub method: CirMethod,
}

/// Immutable, fully validated table of templates, indexed by ordinal.
#[derive(Debug)]
pub struct TemplateTable {
    slots: [Option<Template>; Opcode::COUNT],
    frame_size: u32,
}

impl TemplateTable {
    /// The template for `opcode`, if one was registered.
    #[inline]
    pub fn get(&self, opcode: Opcode) -> Option<&Template> {
        self.slots[opcode.ordinal()].as_ref()
    }

    /// Shared frame size of every stitched method, in bytes.
    #[inline]
    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    /// Number of registered templates.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }
}

/// Builds a [`TemplateTable`], validating each template as it is added.
#[derive(Debug)]
pub struct TemplateTableBuilder {
    slots: [Option<Template>; Opcode::COUNT],
    max_frame: u32,
}

impl Default for TemplateTableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateTableBuilder {
    pub fn new() -> Self {
        TemplateTableBuilder {
            slots: std::array::from_fn(|_| None),
            max_frame: 0,
        }
    }

    /// Register the compiled form of `opcode`.
    ///
    /// Rejects duplicates and any template that is not self-contained:
    /// stack parameters or literal-pool entries would make the copied
    /// bytes depend on where and for which method they were compiled.
    pub fn add(&mut self, opcode: Opcode, compiled: CompiledMethod) -> CompileResult<()> {
        if self.slots[opcode.ordinal()].is_some() {
            return Err(CompileError::DuplicateTemplate(opcode));
        }
        Self::validate(
            opcode,
            compiled.stack_parameters,
            compiled.reference_literals,
            compiled.scalar_literals,
        )?;

        self.max_frame = self.max_frame.max(compiled.frame_size);
        self.slots[opcode.ordinal()] = Some(Template {
            opcode,
            code: compiled.code,
            frame_size: compiled.frame_size,
        });
        Ok(())
    }

    /// Compile `source` through the optimizing pipeline and register the
    /// result.
    ///
    /// Returns `Ok(false)` without compiling when the source targets an
    /// instruction set other than the host's, so one template set can
    /// carry sources for several targets. Self-containment is checked
    /// before code generation: stack-parameter counts come from where
    /// `cc` places the entry signature, and literal counts from the
    /// source's constant pool.
    pub fn compile_and_add(
        &mut self,
        source: TemplateSource,
        cc: &dyn CallingConvention,
    ) -> CompileResult<bool> {
        if source.isa != Isa::host() {
            return Ok(false);
        }
        if self.slots[source.opcode.ordinal()].is_some() {
            return Err(CompileError::DuplicateTemplate(source.opcode));
        }

        let graph = &source.method.graph;
        let entry = &graph.closures[source.method.entry];
        let params: Vec<Kind> = entry
            .value_params()
            .iter()
            .map(|&p| graph.vars[p].kind.unwrap_or(Kind::Word))
            .collect();
        let signature = Signature::new(params, source.method.result_kind);
        let stack_parameters = cc
            .locate(&signature)
            .iter()
            .filter(|location| location.is_stack())
            .count();

        // Float and double constants need a literal pool on x64; reference
        // constants embed a heap address. Either breaks position freedom.
        let reference_literals = graph
            .consts
            .iter()
            .filter(|(_, c)| c.kind == Kind::Reference)
            .count();
        let scalar_literals = graph
            .consts
            .iter()
            .filter(|(_, c)| matches!(c.kind, Kind::Float | Kind::Double))
            .count();

        Self::validate(
            source.opcode,
            stack_parameters,
            reference_literals,
            scalar_literals,
        )?;

        let opcode = source.opcode;
        let (mut compiled, _) = compile_method_with(source.method, cc)?;
        compiled.stack_parameters = stack_parameters;
        compiled.reference_literals = reference_literals;
        compiled.scalar_literals = scalar_literals;
        self.add(opcode, compiled)?;
        Ok(true)
    }

    fn validate(
        opcode: Opcode,
        stack_parameters: usize,
        reference_literals: usize,
        scalar_literals: usize,
    ) -> CompileResult<()> {
        if stack_parameters > 0 {
            return Err(CompileError::TemplateStackParameters {
                opcode,
                count: stack_parameters,
            });
        }
        if reference_literals > 0 {
            return Err(CompileError::TemplateReferenceLiterals(opcode));
        }
        if scalar_literals > 0 {
            return Err(CompileError::TemplateScalarLiterals(opcode));
        }
        Ok(())
    }

    /// Seal the table.
    pub fn finish(self) -> TemplateTable {
        TemplateTable {
            slots: self.slots,
            frame_size: Kind::round_to_slot(self.max_frame),
        }
    }
}
