// This module defines CompilationContext, the single owner of all mutable state for one
// shader compile: the instruction arena, the persistent and input registers, the
// hardware register file, the immediate pool, the scheduled slots, the fragment linkage
// and the statistics. Passes receive &mut CompilationContext and address everything by
// index, which keeps the borrow checker out of the way of the allocator's
// read-modify-write patterns. Nothing here is shared between compiles, so independent
// variants can be compiled on different threads.

//! Per-compile state shared by all passes.

use crate::a2xx::VectorOp;
use crate::core::{CompileOptions, CompileStats, RegisterFile};
use crate::ir::*;
use crate::shader::Stage;

use super::FragLinkage;

#[derive(Debug)]
pub struct CompilationContext {
    pub options: CompileOptions,
    pub stage: Stage,
    /// Vertex shader compiled for the binning pass.
    pub binning: bool,

    pub instrs: Vec<Instr>,
    /// Persistent registers: the program's own first, then builder temporaries.
    pub regs: Vec<Reg>,
    pub inputs: Vec<Reg>,
    pub reg_file: RegisterFile,

    pub immediates: ImmediatePool,
    /// Constant index of immediate entry 0.
    pub first_immediate: u32,

    pub num_blocks: usize,
    pub sched: Vec<ScheduledSlot>,

    pub linkage: FragLinkage,
    pub writes_psize: bool,
    pub has_kill: bool,
    /// Fragment shader reads the param register.
    pub need_param: bool,

    pub stats: CompileStats,
}

impl CompilationContext {
    pub fn new(options: CompileOptions, stage: Stage, linkage: FragLinkage) -> Self {
        Self {
            options,
            stage,
            binning: false,
            instrs: Vec::new(),
            regs: Vec::new(),
            inputs: Vec::new(),
            reg_file: RegisterFile::new(),
            immediates: ImmediatePool::new(),
            first_immediate: 0,
            num_blocks: 0,
            sched: Vec::new(),
            linkage,
            writes_psize: false,
            has_kill: false,
            need_param: false,
            stats: CompileStats::default(),
        }
    }

    pub fn reg(&self, r: RegRef) -> &Reg {
        match r {
            RegRef::Ssa(idx) => match &self.instrs[idx].dest {
                Dest::Ssa(reg) => reg,
                Dest::Reg(reg) => &self.regs[*reg],
            },
            RegRef::Reg(idx) => &self.regs[idx],
            RegRef::Input(idx) => &self.inputs[idx],
        }
    }

    pub fn reg_mut(&mut self, r: RegRef) -> &mut Reg {
        match r {
            RegRef::Ssa(idx) => match &mut self.instrs[idx].dest {
                Dest::Ssa(reg) => reg,
                Dest::Reg(reg) => &mut self.regs[*reg],
            },
            RegRef::Reg(idx) => &mut self.regs[idx],
            RegRef::Input(idx) => &mut self.inputs[idx],
        }
    }

    /// Input register `idx`, created on first use.
    pub fn input_reg(&mut self, idx: usize) -> RegRef {
        if self.inputs.len() <= idx {
            self.inputs.resize(idx + 1, Reg::with_components(4));
        }
        RegRef::Input(idx)
    }

    /// Register written by instruction `idx`.
    pub fn dest_reg(&self, idx: InstrIdx) -> &Reg {
        self.reg(self.instrs[idx].dest_ref())
    }

    /// Components the instruction writes.
    pub fn dst_ncomp(&self, idx: InstrIdx) -> u8 {
        let instr = &self.instrs[idx];
        match (&instr.dest, &instr.kind) {
            (Dest::Ssa(reg), _) => reg.ncomp,
            (Dest::Reg(reg), InstrKind::Alu(alu)) => {
                let full = (1u8 << self.regs[*reg].ncomp) - 1;
                (alu.write_mask & full).count_ones() as u8
            }
            (Dest::Reg(reg), _) => self.regs[*reg].ncomp,
        }
    }

    /// Components source `src` of instruction `idx` reads.
    pub fn src_ncomp(&self, idx: InstrIdx, src: usize) -> u8 {
        let instr = &self.instrs[idx];
        match &instr.kind {
            InstrKind::Alu(alu) => match alu.vector {
                None => 1,
                Some(VectorOp::Dot2Add) => 2,
                Some(VectorOp::Dot3) => 3,
                Some(VectorOp::Dot4 | VectorOp::Cube | VectorOp::Max4) => 4,
                Some(op) if op.is_pred_push() => 1,
                _ => self.dst_ncomp(idx),
            },
            InstrKind::Fetch(FetchKind::Vertex { .. }) => 1,
            InstrKind::Fetch(FetchKind::Texture { is_cube, .. }) => match (src, is_cube) {
                (0, true) => 3,
                (0, false) => 2,
                _ => 1,
            },
            InstrKind::Fetch(FetchKind::SetTexLod) => 1,
            InstrKind::ControlFlow { .. } | InstrKind::Elided => 0,
        }
    }

    /// Scalar unit can execute this instruction on its own.
    pub fn scalar_possible(&self, idx: InstrIdx) -> bool {
        let instr = &self.instrs[idx];
        match instr.scalar_op() {
            Some(op) => {
                self.src_ncomp(idx, 0) == 1 && (instr.srcs.len() == 1 || op.is_binary())
            }
            None => false,
        }
    }

    pub fn push_instr(
        &mut self,
        block_idx: usize,
        kind: InstrKind,
        srcs: Vec<Src>,
        dest: Dest,
        pred: Predicate,
    ) -> InstrIdx {
        let idx = self.instrs.len();
        self.instrs.push(Instr {
            idx,
            block_idx,
            kind,
            srcs,
            dest,
            pred,
            need_emit: false,
        });
        idx
    }

    /// All registers: persistent, input and SSA destinations.
    pub fn all_reg_refs(&self) -> Vec<RegRef> {
        let persistent = (0..self.regs.len()).map(RegRef::Reg);
        let inputs = (0..self.inputs.len()).map(RegRef::Input);
        let ssa = self
            .instrs
            .iter()
            .filter(|instr| matches!(instr.dest, Dest::Ssa(_)))
            .map(|instr| RegRef::Ssa(instr.idx));
        persistent.chain(inputs).chain(ssa).collect()
    }
}
