// This module defines the structured SSA program the backend accepts. A Program is a
// stage, the declared inputs (vertex attributes or fragment varyings), the uniform count,
// the non-SSA registers, and a tree of control-flow nodes: straight-line blocks, if/else
// and loops, with break/continue as jump instructions. Values are SSA ids or register ids;
// operands carry a per-destination-component swizzle plus negate/abs modifiers. Programs
// are built in code with ProgramBuilder or parsed from the text format in parser.rs.

//! Input program model.

pub mod builder;
pub mod parser;

use std::fmt;

pub use builder::ProgramBuilder;
pub use parser::{parse_program, ParseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Vertex,
    Fragment,
}

/// Input/output slot semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Semantic {
    /// Vertex attribute `n`.
    Attribute(u8),
    /// Vertex position output; as a fragment input this is fragcoord.
    Position,
    PointSize,
    /// Generic varying `n`.
    Varying(u8),
    /// Fragment color output.
    Color,
    /// Fragment data output `n`.
    Data(u8),
    /// Fragment depth output.
    Depth,
}

impl fmt::Display for Semantic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Semantic::Attribute(n) => write!(f, "attribute({n})"),
            Semantic::Position => write!(f, "position"),
            Semantic::PointSize => write!(f, "point_size"),
            Semantic::Varying(n) => write!(f, "varying({n})"),
            Semantic::Color => write!(f, "color"),
            Semantic::Data(n) => write!(f, "data({n})"),
            Semantic::Depth => write!(f, "depth"),
        }
    }
}

/// Declared shader input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variable {
    pub semantic: Semantic,
    pub components: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SsaId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    Ssa(SsaId),
    Reg(RegId),
}

/// Operand with one swizzle entry per destination component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    pub value: Value,
    pub swizzle: [u8; 4],
    pub negate: bool,
    pub abs: bool,
}

impl Operand {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            swizzle: [0, 1, 2, 3],
            negate: false,
            abs: false,
        }
    }

    pub fn swizzled(mut self, swizzle: [u8; 4]) -> Self {
        self.swizzle = swizzle;
        self
    }

    /// Broadcast one component.
    pub fn splat(self, comp: u8) -> Self {
        self.swizzled([comp; 4])
    }

    pub fn neg(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    pub fn abs(mut self) -> Self {
        self.abs = true;
        self
    }
}

impl From<SsaId> for Operand {
    fn from(id: SsaId) -> Self {
        Operand::new(Value::Ssa(id))
    }
}

impl From<RegId> for Operand {
    fn from(id: RegId) -> Self {
        Operand::new(Value::Reg(id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dest {
    Ssa { id: SsaId, components: u8 },
    Reg { id: RegId, write_mask: u8 },
}

/// ALU operations understood by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluOp {
    Mov,
    Fneg,
    Fabs,
    Fsat,
    Fsign,
    Fadd,
    Fsub,
    Fmul,
    Ffma,
    Fmax,
    Fmin,
    Ffloor,
    Ffract,
    Ftrunc,
    Fdot2,
    Fdot3,
    Fdot4,
    Sge,
    Slt,
    Sne,
    Seq,
    Fcsel,
    Frsq,
    Frcp,
    Flog2,
    Fexp2,
    Fsqrt,
    Fcos,
    Fsin,
    Cube,
}

impl AluOp {
    const NAMES: [(AluOp, &'static str); 30] = [
        (AluOp::Mov, "mov"),
        (AluOp::Fneg, "fneg"),
        (AluOp::Fabs, "fabs"),
        (AluOp::Fsat, "fsat"),
        (AluOp::Fsign, "fsign"),
        (AluOp::Fadd, "fadd"),
        (AluOp::Fsub, "fsub"),
        (AluOp::Fmul, "fmul"),
        (AluOp::Ffma, "ffma"),
        (AluOp::Fmax, "fmax"),
        (AluOp::Fmin, "fmin"),
        (AluOp::Ffloor, "ffloor"),
        (AluOp::Ffract, "ffract"),
        (AluOp::Ftrunc, "ftrunc"),
        (AluOp::Fdot2, "fdot2"),
        (AluOp::Fdot3, "fdot3"),
        (AluOp::Fdot4, "fdot4"),
        (AluOp::Sge, "sge"),
        (AluOp::Slt, "slt"),
        (AluOp::Sne, "sne"),
        (AluOp::Seq, "seq"),
        (AluOp::Fcsel, "fcsel"),
        (AluOp::Frsq, "frsq"),
        (AluOp::Frcp, "frcp"),
        (AluOp::Flog2, "flog2"),
        (AluOp::Fexp2, "fexp2"),
        (AluOp::Fsqrt, "fsqrt"),
        (AluOp::Fcos, "fcos"),
        (AluOp::Fsin, "fsin"),
        (AluOp::Cube, "cube"),
    ];

    pub fn name(self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(op, _)| *op == self)
            .map_or("?", |(_, name)| name)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(op, _)| *op)
    }

    pub fn num_inputs(self) -> usize {
        match self {
            AluOp::Ffma | AluOp::Fcsel => 3,
            AluOp::Fadd
            | AluOp::Fsub
            | AluOp::Fmul
            | AluOp::Fmax
            | AluOp::Fmin
            | AluOp::Fdot2
            | AluOp::Fdot3
            | AluOp::Fdot4
            | AluOp::Sge
            | AluOp::Slt
            | AluOp::Sne
            | AluOp::Seq
            | AluOp::Cube => 2,
            _ => 1,
        }
    }

    /// Components each input reads when it does not follow the write mask.
    pub fn input_size(self) -> Option<u8> {
        match self {
            AluOp::Fdot2 => Some(2),
            AluOp::Fdot3 => Some(3),
            AluOp::Fdot4 | AluOp::Cube => Some(4),
            _ => None,
        }
    }
}

impl fmt::Display for AluOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerDim {
    Dim2D,
    Rect,
    Cube,
    External,
    Dim3D,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TexOp {
    /// Implicit LOD sample.
    Tex,
    /// Sample with LOD bias.
    Bias,
    /// Sample at explicit LOD.
    Lod,
    /// Texel fetch by integer coordinate.
    Fetch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    Break,
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Alu {
        op: AluOp,
        dest: Dest,
        srcs: Vec<Operand>,
        saturate: bool,
    },
    LoadConst {
        dest: SsaId,
        values: Vec<f32>,
    },
    LoadInput {
        dest: SsaId,
        components: u8,
        location: u32,
    },
    LoadUniform {
        dest: SsaId,
        components: u8,
        index: u32,
    },
    LoadFrontFace {
        dest: SsaId,
    },
    LoadPointCoord {
        dest: SsaId,
    },
    StoreOutput {
        semantic: Semantic,
        src: Operand,
        components: u8,
    },
    Discard,
    DiscardIf {
        cond: Operand,
    },
    Tex {
        dest: SsaId,
        components: u8,
        op: TexOp,
        dim: SamplerDim,
        coord: Operand,
        lod_bias: Option<Operand>,
        sampler: u32,
    },
    Jump(JumpKind),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub instrs: Vec<Instr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfNode {
    pub condition: Operand,
    pub then_list: Vec<CfNode>,
    pub else_list: Vec<CfNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopNode {
    pub body: Vec<CfNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CfNode {
    Block(Block),
    If(IfNode),
    Loop(LoopNode),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub stage: Stage,
    /// Inputs indexed by driver location.
    pub inputs: Vec<Variable>,
    pub num_uniforms: u32,
    /// Component count of each non-SSA register.
    pub registers: Vec<u8>,
    pub body: Vec<CfNode>,
}

impl Program {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            inputs: Vec::new(),
            num_uniforms: 0,
            registers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Number of basic blocks `list` expands to: one opened at the start and
    /// one after every if or loop, plus the blocks of nested lists.
    pub fn count_blocks(list: &[CfNode]) -> usize {
        1 + list
            .iter()
            .map(|node| match node {
                CfNode::Block(_) => 0,
                CfNode::If(n) => {
                    Self::count_blocks(&n.then_list) + Self::count_blocks(&n.else_list) + 1
                }
                CfNode::Loop(n) => Self::count_blocks(&n.body) + 1,
            })
            .sum::<usize>()
    }

    pub fn num_blocks(&self) -> usize {
        Self::count_blocks(&self.body)
    }
}
