//! a2xx-compiler - shader compiler backend for Adreno a2xx GPUs.
//!
//! Lowers structured SSA vertex and fragment programs into the a2xx native
//! instruction stream: a control-flow program of EXEC/ALLOC/JMP words followed
//! by VLIW ALU and fetch triples, together with the patch tables a driver needs
//! to rebind vertex formats and samplers without recompiling.
//!
//! # Primary Usage
//!
//! ```ignore
//! use a2xx_compiler::{parse_program, CompileOptions, FragLinkage, ShaderCompiler};
//!
//! let compiler = ShaderCompiler::new(CompileOptions::default());
//! let mut linkage = FragLinkage::new();
//! let fs = compiler.compile_fragment(&parse_program(fs_text)?, &mut linkage)?;
//! let vs = compiler.compile_vertex(&parse_program(vs_text)?, &linkage)?;
//! println!("{}", fs.disassemble());
//! ```
//!
//! # Architecture
//!
//! - [`shader`] - Input program representation, builder and text parser
//! - [`ir`] - Backend instruction IR, relative swizzles, immediate pool
//! - [`compiler`] - Lowering, copy propagation, scheduling, register allocation, assembly
//! - [`a2xx`] - Hardware opcodes, word encodings and the disassembler
//! - [`core`] - Errors, options, register file, statistics

pub mod a2xx;
pub mod compiler;
pub mod core;
pub mod ir;
pub mod shader;

pub use compiler::{
    CompiledShader, FetchPatch, FetchPatchKind, FragLinkage, LinkageSlot, ShaderBinary,
    ShaderCompiler,
};
pub use core::{CompileError, CompileOptions, CompileResult, CompileStats};
pub use shader::{parse_program, ParseError, Program, ProgramBuilder, Semantic, Stage};
