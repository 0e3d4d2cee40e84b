// This module describes the a2xx shader ISA as the rest of the compiler sees it: the
// vector, scalar, fetch and control-flow opcode spaces, the export buffer classes, and
// the hardware limits that bound register allocation and program layout. The bit-level
// layout of each instruction word lives in the encoding submodule, and the disassembler
// decodes finished binaries back into text for debugging.

//! a2xx instruction set definitions.

pub mod disasm;
pub mod encoding;

/// Number of general purpose registers available to a shader.
pub const MAX_GPRS: usize = 64;

/// Upper bound on `cf_count / 2 + instr_count` for one program.
pub const MAX_PROGRAM_SIZE: usize = 384;

/// Maximum number of instructions covered by one EXEC header.
pub const MAX_EXEC_COUNT: usize = 6;

/// Number of visibility tiles handled by the binning pass.
pub const MAX_BIN_TILES: usize = 8;

/// Highest constant index an 8-bit source field can address.
pub const MAX_CONST_INDEX: u32 = 255;

/// Fetch constants for vertex attributes start at this index.
pub const VERTEX_FETCH_CONST_BASE: u32 = 20;

/// Export slot indices.
pub const EXPORT_POSITION: u8 = 62;
pub const EXPORT_POINT_SIZE: u8 = 63;
pub const EXPORT_MEMORY_ADDR: u8 = 32;
pub const EXPORT_MEMORY_DATA: u8 = 33;
pub const EXPORT_COLOR: u8 = 0;

macro_rules! opcode_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident = $value:literal => $mnemonic:literal,)* }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $value,)*
        }

        impl $name {
            pub fn from_bits(bits: u8) -> Option<Self> {
                match bits {
                    $($value => Some(Self::$variant),)*
                    _ => None,
                }
            }

            pub fn bits(self) -> u8 {
                self as u8
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Self::$variant => $mnemonic,)*
                }
            }
        }
    };
}

opcode_enum! {
    /// Vector unit opcodes (5-bit field).
    VectorOp {
        Add = 0 => "ADDv",
        Mul = 1 => "MULv",
        Max = 2 => "MAXv",
        Min = 3 => "MINv",
        SetE = 4 => "SETEv",
        SetGt = 5 => "SETGTv",
        SetGte = 6 => "SETGTEv",
        SetNe = 7 => "SETNEv",
        Frac = 8 => "FRACv",
        Trunc = 9 => "TRUNCv",
        Floor = 10 => "FLOORv",
        MulAdd = 11 => "MULADDv",
        CndE = 12 => "CNDEv",
        CndGte = 13 => "CNDGTEv",
        CndGt = 14 => "CNDGTv",
        Dot4 = 15 => "DOT4v",
        Dot3 = 16 => "DOT3v",
        Dot2Add = 17 => "DOT2ADDv",
        Cube = 18 => "CUBEv",
        Max4 = 19 => "MAX4v",
        PredSetEPush = 20 => "PRED_SETE_PUSHv",
        PredSetNePush = 21 => "PRED_SETNE_PUSHv",
        PredSetGtPush = 22 => "PRED_SETGT_PUSHv",
        PredSetGtePush = 23 => "PRED_SETGTE_PUSHv",
        KillE = 24 => "KILLEv",
        KillGt = 25 => "KILLGTv",
        KillGte = 26 => "KILLGTEv",
        KillNe = 27 => "KILLNEv",
        Dst = 28 => "DSTv",
        MovA = 29 => "MOVAv",
    }
}

opcode_enum! {
    /// Scalar unit opcodes (6-bit field).
    ScalarOp {
        Add = 0 => "ADDs",
        AddPrev = 1 => "ADD_PREVs",
        Mul = 2 => "MULs",
        MulPrev = 3 => "MUL_PREVs",
        MulPrev2 = 4 => "MUL_PREV2s",
        Max = 5 => "MAXs",
        Min = 6 => "MINs",
        SetE = 7 => "SETEs",
        SetGt = 8 => "SETGTs",
        SetGte = 9 => "SETGTEs",
        SetNe = 10 => "SETNEs",
        Frac = 11 => "FRACs",
        Trunc = 12 => "TRUNCs",
        Floor = 13 => "FLOORs",
        ExpIeee = 14 => "EXP_IEEE",
        LogClamp = 15 => "LOG_CLAMP",
        LogIeee = 16 => "LOG_IEEE",
        RecipClamp = 17 => "RECIP_CLAMP",
        RecipFf = 18 => "RECIP_FF",
        RecipIeee = 19 => "RECIP_IEEE",
        RecipSqClamp = 20 => "RECIPSQ_CLAMP",
        RecipSqFf = 21 => "RECIPSQ_FF",
        RecipSqIeee = 22 => "RECIPSQ_IEEE",
        MovA = 23 => "MOVAs",
        MovAFloor = 24 => "MOVA_FLOORs",
        Sub = 25 => "SUBs",
        SubPrev = 26 => "SUB_PREVs",
        PredSetE = 27 => "PRED_SETEs",
        PredSetNe = 28 => "PRED_SETNEs",
        PredSetGt = 29 => "PRED_SETGTs",
        PredSetGte = 30 => "PRED_SETGTEs",
        PredSetInv = 31 => "PRED_SET_INVs",
        PredSetPop = 32 => "PRED_SET_POPs",
        PredSetClr = 33 => "PRED_SET_CLRs",
        PredSetRestore = 34 => "PRED_SET_RESTOREs",
        KillE = 35 => "KILLEs",
        KillGt = 36 => "KILLGTs",
        KillGte = 37 => "KILLGTEs",
        KillNe = 38 => "KILLNEs",
        KillOne = 39 => "KILLONEs",
        SqrtIeee = 40 => "SQRT_IEEE",
        MulConst0 = 42 => "MUL_CONST_0",
        MulConst1 = 43 => "MUL_CONST_1",
        AddConst0 = 44 => "ADD_CONST_0",
        AddConst1 = 45 => "ADD_CONST_1",
        SubConst0 = 46 => "SUB_CONST_0",
        SubConst1 = 47 => "SUB_CONST_1",
        Sin = 48 => "SIN",
        Cos = 49 => "COS",
        RetainPrev = 50 => "RETAIN_PREV",
    }
}

opcode_enum! {
    /// Fetch opcodes.
    FetchOp {
        VtxFetch = 0 => "VTX_FETCH",
        TexFetch = 1 => "TEX_FETCH",
        TexGetBorderColorFrac = 16 => "TEX_GET_BORDER_COLOR_FRAC",
        TexGetCompTexLod = 17 => "TEX_GET_COMP_TEX_LOD",
        TexGetGradients = 18 => "TEX_GET_GRADIENTS",
        TexGetWeights = 19 => "TEX_GET_WEIGHTS",
        TexSetTexLod = 24 => "TEX_SET_TEX_LOD",
        TexSetGradientsH = 25 => "TEX_SET_GRADIENTS_H",
        TexSetGradientsV = 26 => "TEX_SET_GRADIENTS_V",
    }
}

opcode_enum! {
    /// Control-flow opcodes (4-bit field).
    CfOp {
        Nop = 0 => "NOP",
        Exec = 1 => "EXEC",
        ExecEnd = 2 => "EXEC_END",
        CondExec = 3 => "COND_EXEC",
        CondExecEnd = 4 => "COND_EXEC_END",
        CondPredExec = 5 => "COND_PRED_EXEC",
        CondPredExecEnd = 6 => "COND_PRED_EXEC_END",
        LoopStart = 7 => "LOOP_START",
        LoopEnd = 8 => "LOOP_END",
        CondCall = 9 => "COND_CALL",
        Return = 10 => "RETURN",
        CondJmp = 11 => "COND_JMP",
        Alloc = 12 => "ALLOC",
        CondExecPredClean = 13 => "COND_EXEC_PRED_CLEAN",
        CondExecPredCleanEnd = 14 => "COND_EXEC_PRED_CLEAN_END",
        MarkVsFetchDone = 15 => "MARK_VS_FETCH_DONE",
    }
}

impl VectorOp {
    /// Ops that read a fixed number of components regardless of the write mask.
    pub fn is_reduction(self) -> bool {
        matches!(
            self,
            VectorOp::Dot4
                | VectorOp::Dot3
                | VectorOp::Dot2Add
                | VectorOp::Cube
                | VectorOp::Max4
                | VectorOp::PredSetEPush
                | VectorOp::PredSetNePush
                | VectorOp::PredSetGtPush
                | VectorOp::PredSetGtePush
        )
    }

    pub fn is_pred_push(self) -> bool {
        matches!(
            self,
            VectorOp::PredSetEPush
                | VectorOp::PredSetNePush
                | VectorOp::PredSetGtPush
                | VectorOp::PredSetGtePush
        )
    }

    pub fn is_kill(self) -> bool {
        matches!(
            self,
            VectorOp::KillE | VectorOp::KillGt | VectorOp::KillGte | VectorOp::KillNe
        )
    }

    pub fn is_compare(self) -> bool {
        matches!(
            self,
            VectorOp::SetE | VectorOp::SetGt | VectorOp::SetGte | VectorOp::SetNe
        )
    }
}

impl ScalarOp {
    pub fn is_pred_set(self) -> bool {
        matches!(
            self,
            ScalarOp::PredSetE
                | ScalarOp::PredSetNe
                | ScalarOp::PredSetGt
                | ScalarOp::PredSetGte
                | ScalarOp::PredSetInv
                | ScalarOp::PredSetPop
                | ScalarOp::PredSetClr
                | ScalarOp::PredSetRestore
        )
    }

    pub fn is_kill(self) -> bool {
        matches!(
            self,
            ScalarOp::KillE
                | ScalarOp::KillGt
                | ScalarOp::KillGte
                | ScalarOp::KillNe
                | ScalarOp::KillOne
        )
    }

    /// Scalar ops that combine two operands read from lanes A and B.
    pub fn is_binary(self) -> bool {
        matches!(
            self,
            ScalarOp::Add | ScalarOp::Mul | ScalarOp::Max | ScalarOp::Min | ScalarOp::Sub
        )
    }

    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            ScalarOp::Add | ScalarOp::Mul | ScalarOp::Max | ScalarOp::Min
        )
    }
}

/// Export buffer classes, in the order the scheduler drains them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum AllocBuffer {
    NoAlloc = 0,
    Position = 1,
    ParameterPixel = 2,
    Memory = 3,
}

impl AllocBuffer {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            1 => AllocBuffer::Position,
            2 => AllocBuffer::ParameterPixel,
            3 => AllocBuffer::Memory,
            _ => AllocBuffer::NoAlloc,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AllocBuffer::NoAlloc => "NO_ALLOC",
            AllocBuffer::Position => "POSITION",
            AllocBuffer::ParameterPixel => "PARAM/PIXEL",
            AllocBuffer::Memory => "MEMORY",
        }
    }
}

/// Buffer class an export slot writes into.
pub fn export_buffer(export: u8) -> AllocBuffer {
    if export < 32 {
        AllocBuffer::ParameterPixel
    } else if export >= 62 {
        AllocBuffer::Position
    } else {
        AllocBuffer::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_values() {
        assert_eq!(VectorOp::MulAdd.bits(), 11);
        assert_eq!(VectorOp::MovA.bits(), 29);
        assert_eq!(ScalarOp::SqrtIeee.bits(), 40);
        assert_eq!(ScalarOp::MulConst0.bits(), 42);
        assert_eq!(ScalarOp::RetainPrev.bits(), 50);
        assert_eq!(FetchOp::TexSetTexLod.bits(), 24);
        assert_eq!(CfOp::CondJmp.bits(), 11);
        assert_eq!(CfOp::Alloc.bits(), 12);
    }

    #[test]
    fn test_opcode_from_bits() {
        assert_eq!(ScalarOp::from_bits(41), None);
        assert_eq!(ScalarOp::from_bits(22), Some(ScalarOp::RecipSqIeee));
        assert_eq!(VectorOp::from_bits(17), Some(VectorOp::Dot2Add));
        assert_eq!(VectorOp::from_bits(30), None);
    }

    #[test]
    fn test_export_buffer_classes() {
        assert_eq!(export_buffer(0), AllocBuffer::ParameterPixel);
        assert_eq!(export_buffer(15), AllocBuffer::ParameterPixel);
        assert_eq!(export_buffer(EXPORT_MEMORY_ADDR), AllocBuffer::Memory);
        assert_eq!(export_buffer(EXPORT_MEMORY_DATA), AllocBuffer::Memory);
        assert_eq!(export_buffer(EXPORT_POSITION), AllocBuffer::Position);
        assert_eq!(export_buffer(EXPORT_POINT_SIZE), AllocBuffer::Position);
        assert!(AllocBuffer::Position < AllocBuffer::ParameterPixel);
        assert!(AllocBuffer::ParameterPixel < AllocBuffer::Memory);
    }
}
