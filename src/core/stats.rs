// This module tracks per-compile statistics. CompileStats is filled in as the pipeline
// runs: the IR builder counts instructions, reference counting records how many were
// eliminated, the scheduler counts slots, vector/scalar pairs, synthesized filler moves
// and inserted set-LOD fetches, and the assembler records the final control-flow and
// instruction word counts. The Display implementation produces the summary that the
// compiler logs at debug level and the CLI prints on request.

//! Compilation statistics.

use std::fmt;

/// Counters gathered while compiling one shader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileStats {
    /// Instructions produced by the IR builder.
    pub instrs_built: usize,

    /// Instructions removed by copy propagation or as unreachable.
    pub instrs_eliminated: usize,

    /// Issue slots produced by the scheduler.
    pub slots: usize,

    /// Slots issuing both a vector and a scalar instruction.
    pub paired_slots: usize,

    /// Scalar moves synthesized into earlier slots.
    pub scalar_fillers: usize,

    /// Set-LOD fetches inserted ahead of texture fetches.
    pub tex_lod_inserted: usize,

    /// Control-flow words, including padding.
    pub cf_count: usize,

    /// Instruction triples.
    pub instr_words: usize,

    /// Immediate vec4 entries appended after the uniforms.
    pub immediates: usize,

    /// Highest register slot used.
    pub max_reg: Option<u8>,
}

impl fmt::Display for CompileStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Shader compile statistics:")?;
        writeln!(f, "  IR instructions built: {}", self.instrs_built)?;
        writeln!(f, "  IR instructions eliminated: {}", self.instrs_eliminated)?;
        writeln!(
            f,
            "  Issue slots: {} ({} paired, {} scalar fillers)",
            self.slots, self.paired_slots, self.scalar_fillers
        )?;
        if self.tex_lod_inserted > 0 {
            writeln!(f, "  Set-LOD fetches inserted: {}", self.tex_lod_inserted)?;
        }
        writeln!(f, "  Control-flow words: {}", self.cf_count)?;
        writeln!(f, "  Instruction words: {}", self.instr_words)?;
        writeln!(f, "  Immediates: {}", self.immediates)?;
        match self.max_reg {
            Some(reg) => writeln!(f, "  Registers used: {}", reg as usize + 1),
            None => writeln!(f, "  Registers used: 0"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_display() {
        let stats = CompileStats {
            instrs_built: 12,
            slots: 5,
            paired_slots: 2,
            max_reg: Some(3),
            ..Default::default()
        };
        let text = stats.to_string();
        assert!(text.contains("IR instructions built: 12"));
        assert!(text.contains("Issue slots: 5 (2 paired, 0 scalar fillers)"));
        assert!(text.contains("Registers used: 4"));
        assert!(!text.contains("Set-LOD"));
    }
}
