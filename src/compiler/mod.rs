// This module is the public face of the backend. ShaderCompiler holds only the compile
// options; every compile_* call builds a fresh CompilationContext and runs the pipeline
// over it: lowering (lower.rs), copy propagation (copy_prop.rs), reference counting
// (regalloc.rs), scheduling with interleaved register allocation and scalar filler
// synthesis (scheduler.rs, filler.rs), and finally encoding (assembler.rs). The fragment
// stage runs first and fills in the FragLinkage that the vertex stage then uses to place
// its varying exports.

//! Shader compilation pipeline.
//!
//! ```ignore
//! use a2xx_compiler::{parse_program, CompileOptions, FragLinkage, ShaderCompiler};
//!
//! let compiler = ShaderCompiler::new(CompileOptions::default());
//! let mut linkage = FragLinkage::default();
//! let fs = compiler.compile_fragment(&parse_program(fs_text)?, &mut linkage)?;
//! let vs = compiler.compile_vertex(&parse_program(vs_text)?, &linkage)?;
//! ```

pub mod assembler;
pub mod context;
pub mod copy_prop;
pub mod filler;
pub mod lower;
pub mod regalloc;
pub mod scheduler;

pub use assembler::{FetchPatch, FetchPatchKind, ShaderBinary};
pub use context::CompilationContext;

use crate::a2xx::disasm;
use crate::core::{CompileError, CompileOptions, CompileResult, CompileStats};
use crate::ir::Immediate;
use crate::shader::{Program, Semantic, Stage};

use lower::IrBuilder;
use scheduler::Scheduler;

/// One interpolated fragment input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkageSlot {
    pub semantic: Semantic,
    pub components: u8,
}

/// Fragment inputs in input-register order, shared with the vertex stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragLinkage {
    pub inputs: Vec<LinkageSlot>,
    /// Input register receiving the fragcoord varying.
    pub fragcoord: Option<u8>,
}

impl FragLinkage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, semantic: Semantic) -> Option<usize> {
        self.inputs.iter().position(|slot| slot.semantic == semantic)
    }

    /// Index of `semantic`, appending a new slot when it is not linked yet.
    pub fn slot_for(&mut self, semantic: Semantic, components: u8) -> usize {
        match self.find(semantic) {
            Some(idx) => {
                let slot = &mut self.inputs[idx];
                slot.components = slot.components.max(components);
                idx
            }
            None => {
                self.inputs.push(LinkageSlot {
                    semantic,
                    components,
                });
                self.inputs.len() - 1
            }
        }
    }

    pub fn num_varyings(&self) -> usize {
        self.inputs.len()
    }
}

/// Result of compiling one shader variant.
#[derive(Debug, Clone)]
pub struct CompiledShader {
    pub binary: ShaderBinary,
    /// Highest general purpose register used.
    pub max_reg: Option<u8>,
    /// Constants to upload at `first_immediate`.
    pub immediates: Vec<Immediate>,
    pub first_immediate: u32,
    pub writes_psize: bool,
    pub has_kill: bool,
    pub need_param: bool,
    pub stats: CompileStats,
}

impl CompiledShader {
    /// Disassembly of the binary.
    pub fn disassemble(&self) -> String {
        disasm::disassemble(&self.binary.dwords)
    }
}

/// Compiles shader programs with a fixed set of options.
#[derive(Debug, Clone, Default)]
pub struct ShaderCompiler {
    options: CompileOptions,
}

impl ShaderCompiler {
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    /// Compiler configured from `A2XX_DEBUG`.
    pub fn from_env() -> Self {
        Self::new(CompileOptions::from_env())
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Compile a fragment shader. Inputs already present in `linkage` keep their
    /// slots; new ones are appended.
    pub fn compile_fragment(
        &self,
        program: &Program,
        linkage: &mut FragLinkage,
    ) -> CompileResult<CompiledShader> {
        let ctx = CompilationContext::new(self.options, Stage::Fragment, linkage.clone());
        let (shader, ctx) = self.run(ctx, program)?;
        *linkage = ctx.linkage;
        Ok(shader)
    }

    /// Compile a vertex shader exporting the varyings `linkage` expects.
    pub fn compile_vertex(
        &self,
        program: &Program,
        linkage: &FragLinkage,
    ) -> CompileResult<CompiledShader> {
        let ctx = CompilationContext::new(self.options, Stage::Vertex, linkage.clone());
        self.run(ctx, program).map(|(shader, _)| shader)
    }

    /// Compile the binning variant of a vertex shader: position only, plus the
    /// per-tile memory exports.
    pub fn compile_binning(&self, program: &Program) -> CompileResult<CompiledShader> {
        let mut ctx = CompilationContext::new(self.options, Stage::Vertex, FragLinkage::default());
        ctx.binning = true;
        self.run(ctx, program).map(|(shader, _)| shader)
    }

    fn run(
        &self,
        mut ctx: CompilationContext,
        program: &Program,
    ) -> CompileResult<(CompiledShader, CompilationContext)> {
        if program.stage != ctx.stage {
            return Err(CompileError::invalid(format!(
                "{:?} program passed to the {:?} entry point",
                program.stage, ctx.stage
            )));
        }
        log::info!(
            "compiling {:?} shader{}",
            ctx.stage,
            if ctx.binning { " (binning)" } else { "" }
        );

        IrBuilder::new(&mut ctx, program).build()?;
        ctx.copy_propagate();
        ctx.count_references();
        Scheduler::new(&mut ctx).run()?;
        let binary = assembler::assemble(&mut ctx)?;

        ctx.stats.immediates = ctx.immediates.len();
        ctx.stats.max_reg = ctx.reg_file.max_slot();

        if ctx.options.disasm {
            log::debug!("disassembly:\n{}", disasm::disassemble(&binary.dwords));
        }
        log::debug!("{}", ctx.stats);
        log::info!(
            "compiled {:?} shader: {} cf, {} instructions, max reg {:?}",
            ctx.stage,
            binary.cf.len(),
            binary.instr_count,
            ctx.stats.max_reg
        );

        let shader = CompiledShader {
            binary,
            max_reg: ctx.reg_file.max_slot(),
            immediates: ctx.immediates.entries().to_vec(),
            first_immediate: ctx.first_immediate,
            writes_psize: ctx.writes_psize,
            has_kill: ctx.has_kill,
            need_param: ctx.need_param,
            stats: ctx.stats.clone(),
        };
        Ok((shader, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linkage_slots_are_stable() {
        let mut linkage = FragLinkage::new();
        assert_eq!(linkage.slot_for(Semantic::Varying(3), 2), 0);
        assert_eq!(linkage.slot_for(Semantic::Varying(1), 4), 1);
        assert_eq!(linkage.slot_for(Semantic::Varying(3), 4), 0);
        assert_eq!(linkage.inputs[0].components, 4);
        assert_eq!(linkage.find(Semantic::Varying(1)), Some(1));
        assert_eq!(linkage.find(Semantic::Varying(2)), None);
        assert_eq!(linkage.num_varyings(), 2);
    }

    #[test]
    fn test_compiler_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ShaderCompiler>();
    }

    #[test]
    fn test_stage_mismatch_rejected() {
        let compiler = ShaderCompiler::default();
        let program = Program::new(Stage::Vertex);
        let err = compiler
            .compile_fragment(&program, &mut FragLinkage::default())
            .unwrap_err();
        assert!(matches!(err, CompileError::InvalidProgram { .. }));
    }
}
