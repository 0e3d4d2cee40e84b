// This module defines the internal IR every pass after the builder works on. Instructions
// live in one flat Vec owned by the compilation context and refer to each other by index:
// an SSA operand names the index of its producer, a register operand names a persistent
// register, and inputs and constants name hardware input registers and constant-bank
// entries. Each instruction owns the Reg describing where its SSA result lives, so the
// allocator can assign lanes per component without a side table. The scheduler's issue
// slots are defined here too, since the assembler consumes them directly.

//! Internal IR for the a2xx backend.

pub mod immediates;
pub mod swizzle;

use crate::a2xx::{ScalarOp, VectorOp};
use crate::core::register_file::{RegState, LANE_UNUSED};

pub use immediates::{Immediate, ImmediatePool};
pub use swizzle::Swizzle;

/// Index of an instruction in the context's instruction arena.
pub type InstrIdx = usize;

/// What an operand refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SrcKind {
    /// Result of the instruction with this index.
    Ssa,
    /// Persistent (non-SSA) register.
    Reg,
    /// Hardware input register.
    Input,
    /// Constant bank entry.
    Const,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Src {
    pub num: u32,
    pub swizzle: Swizzle,
    pub kind: SrcKind,
    pub abs: bool,
    pub negate: bool,
}

impl Src {
    pub fn new(num: u32, swizzle: Swizzle, kind: SrcKind) -> Self {
        Self {
            num,
            swizzle,
            kind,
            abs: false,
            negate: false,
        }
    }

    pub fn ssa(instr: InstrIdx) -> Self {
        Self::new(instr as u32, Swizzle::IDENTITY, SrcKind::Ssa)
    }

    pub fn input(idx: usize, swizzle: Swizzle) -> Self {
        Self::new(idx as u32, swizzle, SrcKind::Input)
    }

    pub fn constant(idx: u32, swizzle: Swizzle) -> Self {
        Self::new(idx, swizzle, SrcKind::Const)
    }

    pub fn reg(idx: usize, swizzle: Swizzle) -> Self {
        Self::new(idx as u32, swizzle, SrcKind::Reg)
    }

    pub fn with_swizzle(mut self, swizzle: Swizzle) -> Self {
        self.swizzle = swizzle;
        self
    }

    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    pub fn absolute(mut self) -> Self {
        self.abs = true;
        self.negate = false;
        self
    }

    /// Register this operand reads, `None` for constants.
    pub fn reg_ref(&self) -> Option<RegRef> {
        match self.kind {
            SrcKind::Ssa => Some(RegRef::Ssa(self.num as InstrIdx)),
            SrcKind::Reg => Some(RegRef::Reg(self.num as usize)),
            SrcKind::Input => Some(RegRef::Input(self.num as usize)),
            SrcKind::Const => None,
        }
    }
}

/// Handle naming a `Reg` wherever it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegRef {
    Ssa(InstrIdx),
    Reg(usize),
    Input(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegComponent {
    /// Hardware lane, `LANE_UNUSED` when the component has no storage.
    pub lane: u8,
    pub allocated: bool,
    pub ref_count: u32,
}

impl Default for RegComponent {
    fn default() -> Self {
        Self {
            lane: LANE_UNUSED,
            allocated: false,
            ref_count: 0,
        }
    }
}

/// Storage for one value: a hardware slot plus a lane per component.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reg {
    pub slot: u8,
    pub ncomp: u8,
    pub loop_depth: usize,
    pub initialized: bool,
    pub free_at_block: Option<usize>,
    /// First and last block of the outermost loop touching a persistent
    /// register; the register holds one slot across that whole range.
    pub loop_span: Option<(usize, usize)>,
    pub comp: [RegComponent; 4],
}

impl Reg {
    pub fn with_components(ncomp: u8) -> Self {
        Self {
            ncomp,
            ..Default::default()
        }
    }

    pub fn is_allocated(&self) -> bool {
        self.comp[..self.ncomp as usize].iter().any(|c| c.allocated)
    }

    pub fn total_refs(&self) -> u32 {
        self.comp.iter().map(|c| c.ref_count).sum()
    }
}

/// Where an instruction's result goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dest {
    /// Fresh SSA value owned by the instruction.
    Ssa(Reg),
    /// Persistent register, written under the ALU write mask.
    Reg(usize),
}

/// Predicate an instruction executes under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum Predicate {
    #[default]
    Always,
    IfFalse,
    IfTrue,
}

impl Predicate {
    /// Two-bit `pred_select` encoding.
    pub fn bits(self) -> u8 {
        match self {
            Predicate::Always => 0,
            Predicate::IfFalse => 2,
            Predicate::IfTrue => 3,
        }
    }

    pub fn is_predicated(self) -> bool {
        self != Predicate::Always
    }

    /// Condition bit for fetch and jump encodings.
    pub fn condition(self) -> bool {
        self.bits() & 1 != 0
    }
}

/// Vector/scalar ALU instruction fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AluInstr {
    pub vector: Option<VectorOp>,
    pub scalar: Option<ScalarOp>,
    pub export: Option<u8>,
    pub write_mask: u8,
    pub saturate: bool,
    /// Lane of operand B for a two-source scalar op built by the filler.
    pub scalar_lane_b: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Vertex { const_idx: u8, const_idx_sel: u8 },
    Texture { sampler: u8, is_cube: bool, is_rect: bool },
    SetTexLod,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrKind {
    /// Removed by a pass; the index stays valid.
    Elided,
    Alu(AluInstr),
    Fetch(FetchKind),
    ControlFlow { target_block: usize },
}

#[derive(Debug, Clone)]
pub struct Instr {
    pub idx: InstrIdx,
    pub block_idx: usize,
    pub kind: InstrKind,
    pub srcs: Vec<Src>,
    pub dest: Dest,
    pub pred: Predicate,
    pub need_emit: bool,
}

impl Instr {
    pub fn alu(&self) -> Option<&AluInstr> {
        match &self.kind {
            InstrKind::Alu(alu) => Some(alu),
            _ => None,
        }
    }

    pub fn alu_mut(&mut self) -> Option<&mut AluInstr> {
        match &mut self.kind {
            InstrKind::Alu(alu) => Some(alu),
            _ => None,
        }
    }

    pub fn is_alu(&self) -> bool {
        matches!(self.kind, InstrKind::Alu(_))
    }

    pub fn is_elided(&self) -> bool {
        matches!(self.kind, InstrKind::Elided)
    }

    pub fn export(&self) -> Option<u8> {
        self.alu().and_then(|alu| alu.export)
    }

    pub fn vector_op(&self) -> Option<VectorOp> {
        self.alu().and_then(|alu| alu.vector)
    }

    pub fn scalar_op(&self) -> Option<ScalarOp> {
        self.alu().and_then(|alu| alu.scalar)
    }

    /// Plain move: single-source MAXv without saturate.
    pub fn is_plain_mov(&self) -> bool {
        match self.alu() {
            Some(alu) => {
                alu.vector == Some(VectorOp::Max) && self.srcs.len() == 1 && !alu.saturate
            }
            None => false,
        }
    }

    /// Instructions kept alive regardless of whether their result is read.
    pub fn has_side_effects(&self) -> bool {
        match &self.kind {
            InstrKind::ControlFlow { .. } => true,
            InstrKind::Alu(alu) => {
                alu.export.is_some()
                    || alu.scalar.is_some_and(|op| op.is_pred_set() || op.is_kill())
                    || alu.vector.is_some_and(|op| op.is_pred_push() || op.is_kill())
            }
            InstrKind::Fetch(_) | InstrKind::Elided => false,
        }
    }

    pub fn is_pred_set(&self) -> bool {
        self.scalar_op().is_some_and(|op| op.is_pred_set())
    }

    /// Register written by this instruction.
    pub fn dest_ref(&self) -> RegRef {
        match self.dest {
            Dest::Ssa(_) => RegRef::Ssa(self.idx),
            Dest::Reg(reg) => RegRef::Reg(reg),
        }
    }
}

/// One issue slot: a vector/fetch/control-flow instruction and an optional
/// scalar instruction, plus the register file occupancy once the slot retired.
#[derive(Debug, Clone, Default)]
pub struct ScheduledSlot {
    pub vector: Option<InstrIdx>,
    pub scalar: Option<InstrIdx>,
    pub reg_state: RegState,
}

impl ScheduledSlot {
    pub fn instrs(&self) -> impl Iterator<Item = InstrIdx> {
        self.vector.into_iter().chain(self.scalar)
    }
}
