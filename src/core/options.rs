// This module holds the knobs a compile invocation reads: the a20x fragcoord variant,
// whether the scheduler may synthesize scalar filler moves, and whether the finished
// binary is disassembled into the debug log. Options are plain data passed by value into
// each ShaderCompiler; from_env() builds them from the A2XX_DEBUG environment variable so
// the driver and the CLI can flip debugging switches without recompiling.

//! Compiler configuration.

use std::env;

/// Environment variable read by [`CompileOptions::from_env`].
pub const DEBUG_ENV_VAR: &str = "A2XX_DEBUG";

/// Options for one compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Target is an a20x part; fragcoord needs the tile offset from C64.
    pub a20x: bool,
    /// Allow the scheduler to move operands into spare lanes to fill scalar slots.
    pub scalar_fillers: bool,
    /// Log the disassembly of every compiled shader at debug level.
    pub disasm: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            a20x: false,
            scalar_fillers: true,
            disasm: false,
        }
    }
}

impl CompileOptions {
    /// Build options from `A2XX_DEBUG`, a comma separated flag list
    /// (`disasm`, `nofill`, `a20x`).
    pub fn from_env() -> Self {
        match env::var(DEBUG_ENV_VAR) {
            Ok(flags) => Self::from_flags(&flags),
            Err(_) => Self::default(),
        }
    }

    pub fn from_flags(flags: &str) -> Self {
        let mut options = Self::default();
        for flag in flags.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            match flag {
                "disasm" => options.disasm = true,
                "nofill" => options.scalar_fillers = false,
                "a20x" => options.a20x = true,
                other => log::warn!("ignoring unknown {DEBUG_ENV_VAR} flag '{other}'"),
            }
        }
        options
    }
}
