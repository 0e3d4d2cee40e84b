// This module holds the bit-exact layouts of every a2xx machine word the assembler emits:
// the 96-bit ALU triple (vector + scalar + export control), the 96-bit texture and vertex
// fetch triples, and the 48-bit control-flow words (EXEC, COND_JMP, ALLOC, NOP) that are
// packed two per three dwords. Every word is a plain struct of raw fields with encode()
// and decode() so the disassembler and tests can round the assembler's output back into
// fields. Field packing goes through the BitField helper, which writes bit ranges that
// may straddle dword boundaries.

//! Bit-level encoding of a2xx instruction and control-flow words.

use std::ops::Range;

/// Read/write access to arbitrary bit ranges of a word array.
pub trait BitField {
    fn get_field(&self, range: Range<usize>) -> u64;
    fn set_field(&mut self, range: Range<usize>, val: u64);

    fn get_bit(&self, bit: usize) -> bool {
        self.get_field(bit..bit + 1) != 0
    }

    fn set_bit(&mut self, bit: usize, val: bool) {
        self.set_field(bit..bit + 1, u64::from(val));
    }
}

fn mask_for_bits(bits: usize) -> u64 {
    debug_assert!(bits > 0 && bits <= 64);
    !0u64 >> (64 - bits)
}

impl BitField for [u32] {
    fn get_field(&self, range: Range<usize>) -> u64 {
        debug_assert!(!range.is_empty() && range.end <= self.len() * 32);
        let mask = mask_for_bits(range.len());
        let first = range.start / 32;
        let shift = range.start % 32;
        let chunks = (shift + range.len()).div_ceil(32);

        let mut val = 0u64;
        for i in 0..chunks {
            let chunk = u64::from(self[first + i]);
            if i == 0 {
                val |= chunk >> shift;
            } else {
                val |= chunk << (i * 32 - shift);
            }
        }
        val & mask
    }

    fn set_field(&mut self, range: Range<usize>, val: u64) {
        debug_assert!(!range.is_empty() && range.end <= self.len() * 32);
        let mask = mask_for_bits(range.len());
        debug_assert!(val & mask == val, "value {val:#x} overflows {range:?}");
        let val = val & mask;

        let first = range.start / 32;
        let shift = range.start % 32;
        let chunks = (shift + range.len()).div_ceil(32);

        for i in 0..chunks {
            let (chunk_mask, chunk_val) = if i == 0 {
                (mask << shift, val << shift)
            } else {
                (mask >> (i * 32 - shift), val >> (i * 32 - shift))
            };
            let word = &mut self[first + i];
            *word = (*word & !(chunk_mask as u32)) | (chunk_val as u32);
        }
    }
}

impl BitField for u64 {
    fn get_field(&self, range: Range<usize>) -> u64 {
        (*self >> range.start) & mask_for_bits(range.len())
    }

    fn set_field(&mut self, range: Range<usize>, val: u64) {
        let mask = mask_for_bits(range.len());
        debug_assert!(val & mask == val);
        *self = (*self & !(mask << range.start)) | ((val & mask) << range.start);
    }
}

/// ALU instruction triple: one vector op, one scalar op, shared sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AluWord {
    pub vector_dest: u8,
    pub vector_dest_rel: bool,
    pub low_precision: bool,
    pub scalar_dest: u8,
    pub scalar_dest_rel: bool,
    pub export_data: bool,
    pub vector_write_mask: u8,
    pub scalar_write_mask: u8,
    pub vector_clamp: bool,
    pub scalar_clamp: bool,
    pub scalar_opc: u8,

    pub src3_swiz: u8,
    pub src2_swiz: u8,
    pub src1_swiz: u8,
    pub src3_negate: bool,
    pub src2_negate: bool,
    pub src1_negate: bool,
    pub pred_select: u8,
    pub relative_addr: bool,
    pub const_1_rel_abs: bool,
    pub const_0_rel_abs: bool,

    pub src3_reg: u8,
    pub src2_reg: u8,
    pub src1_reg: u8,
    pub vector_opc: u8,
    pub src3_sel: bool,
    pub src2_sel: bool,
    pub src1_sel: bool,
}

impl AluWord {
    pub fn encode(&self) -> [u32; 3] {
        let mut w = [0u32; 3];
        let bits: &mut [u32] = &mut w;
        bits.set_field(0..6, self.vector_dest.into());
        bits.set_bit(6, self.vector_dest_rel);
        bits.set_bit(7, self.low_precision);
        bits.set_field(8..14, self.scalar_dest.into());
        bits.set_bit(14, self.scalar_dest_rel);
        bits.set_bit(15, self.export_data);
        bits.set_field(16..20, self.vector_write_mask.into());
        bits.set_field(20..24, self.scalar_write_mask.into());
        bits.set_bit(24, self.vector_clamp);
        bits.set_bit(25, self.scalar_clamp);
        bits.set_field(26..32, self.scalar_opc.into());

        bits.set_field(32..40, self.src3_swiz.into());
        bits.set_field(40..48, self.src2_swiz.into());
        bits.set_field(48..56, self.src1_swiz.into());
        bits.set_bit(56, self.src3_negate);
        bits.set_bit(57, self.src2_negate);
        bits.set_bit(58, self.src1_negate);
        bits.set_field(59..61, self.pred_select.into());
        bits.set_bit(61, self.relative_addr);
        bits.set_bit(62, self.const_1_rel_abs);
        bits.set_bit(63, self.const_0_rel_abs);

        bits.set_field(64..72, self.src3_reg.into());
        bits.set_field(72..80, self.src2_reg.into());
        bits.set_field(80..88, self.src1_reg.into());
        bits.set_field(88..93, self.vector_opc.into());
        bits.set_bit(93, self.src3_sel);
        bits.set_bit(94, self.src2_sel);
        bits.set_bit(95, self.src1_sel);
        w
    }

    pub fn decode(w: &[u32; 3]) -> Self {
        let bits: &[u32] = w;
        Self {
            vector_dest: bits.get_field(0..6) as u8,
            vector_dest_rel: bits.get_bit(6),
            low_precision: bits.get_bit(7),
            scalar_dest: bits.get_field(8..14) as u8,
            scalar_dest_rel: bits.get_bit(14),
            export_data: bits.get_bit(15),
            vector_write_mask: bits.get_field(16..20) as u8,
            scalar_write_mask: bits.get_field(20..24) as u8,
            vector_clamp: bits.get_bit(24),
            scalar_clamp: bits.get_bit(25),
            scalar_opc: bits.get_field(26..32) as u8,
            src3_swiz: bits.get_field(32..40) as u8,
            src2_swiz: bits.get_field(40..48) as u8,
            src1_swiz: bits.get_field(48..56) as u8,
            src3_negate: bits.get_bit(56),
            src2_negate: bits.get_bit(57),
            src1_negate: bits.get_bit(58),
            pred_select: bits.get_field(59..61) as u8,
            relative_addr: bits.get_bit(61),
            const_1_rel_abs: bits.get_bit(62),
            const_0_rel_abs: bits.get_bit(63),
            src3_reg: bits.get_field(64..72) as u8,
            src2_reg: bits.get_field(72..80) as u8,
            src1_reg: bits.get_field(80..88) as u8,
            vector_opc: bits.get_field(88..93) as u8,
            src3_sel: bits.get_bit(93),
            src2_sel: bits.get_bit(94),
            src1_sel: bits.get_bit(95),
        }
    }
}

/// Texture fetch filter selection meaning "take it from the fetch constant".
pub const TEX_FILTER_USE_FETCH_CONST: u8 = 2;
pub const ANISO_FILTER_USE_FETCH_CONST: u8 = 7;
pub const ARBITRARY_FILTER_USE_FETCH_CONST: u8 = 7;
pub const TEX_SAMPLE_LOCATION_CENTER: bool = true;

/// Texture fetch triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TexFetchWord {
    pub opc: u8,
    pub src_reg: u8,
    pub src_reg_am: bool,
    pub dst_reg: u8,
    pub dst_reg_am: bool,
    pub fetch_valid_only: bool,
    pub const_idx: u8,
    pub tx_coord_denorm: bool,
    pub src_swiz: u8,

    pub dst_swiz: u16,
    pub mag_filter: u8,
    pub min_filter: u8,
    pub mip_filter: u8,
    pub aniso_filter: u8,
    pub arbitrary_filter: u8,
    pub vol_mag_filter: u8,
    pub vol_min_filter: u8,
    pub use_comp_lod: bool,
    pub use_reg_lod: bool,
    pub pred_select: bool,

    pub use_reg_gradients: bool,
    pub sample_location: bool,
    pub lod_bias: u8,
    pub offset_x: u8,
    pub offset_y: u8,
    pub offset_z: u8,
    pub pred_condition: bool,
}

impl TexFetchWord {
    pub fn encode(&self) -> [u32; 3] {
        let mut w = [0u32; 3];
        let bits: &mut [u32] = &mut w;
        bits.set_field(0..5, self.opc.into());
        bits.set_field(5..11, self.src_reg.into());
        bits.set_bit(11, self.src_reg_am);
        bits.set_field(12..18, self.dst_reg.into());
        bits.set_bit(18, self.dst_reg_am);
        bits.set_bit(19, self.fetch_valid_only);
        bits.set_field(20..25, self.const_idx.into());
        bits.set_bit(25, self.tx_coord_denorm);
        bits.set_field(26..32, self.src_swiz.into());

        bits.set_field(32..44, self.dst_swiz.into());
        bits.set_field(44..46, self.mag_filter.into());
        bits.set_field(46..48, self.min_filter.into());
        bits.set_field(48..50, self.mip_filter.into());
        bits.set_field(50..53, self.aniso_filter.into());
        bits.set_field(53..56, self.arbitrary_filter.into());
        bits.set_field(56..58, self.vol_mag_filter.into());
        bits.set_field(58..60, self.vol_min_filter.into());
        bits.set_bit(60, self.use_comp_lod);
        bits.set_bit(61, self.use_reg_lod);
        bits.set_bit(63, self.pred_select);

        bits.set_bit(64, self.use_reg_gradients);
        bits.set_bit(65, self.sample_location);
        bits.set_field(66..73, self.lod_bias.into());
        bits.set_field(80..85, self.offset_x.into());
        bits.set_field(85..90, self.offset_y.into());
        bits.set_field(90..95, self.offset_z.into());
        bits.set_bit(95, self.pred_condition);
        w
    }

    pub fn decode(w: &[u32; 3]) -> Self {
        let bits: &[u32] = w;
        Self {
            opc: bits.get_field(0..5) as u8,
            src_reg: bits.get_field(5..11) as u8,
            src_reg_am: bits.get_bit(11),
            dst_reg: bits.get_field(12..18) as u8,
            dst_reg_am: bits.get_bit(18),
            fetch_valid_only: bits.get_bit(19),
            const_idx: bits.get_field(20..25) as u8,
            tx_coord_denorm: bits.get_bit(25),
            src_swiz: bits.get_field(26..32) as u8,
            dst_swiz: bits.get_field(32..44) as u16,
            mag_filter: bits.get_field(44..46) as u8,
            min_filter: bits.get_field(46..48) as u8,
            mip_filter: bits.get_field(48..50) as u8,
            aniso_filter: bits.get_field(50..53) as u8,
            arbitrary_filter: bits.get_field(53..56) as u8,
            vol_mag_filter: bits.get_field(56..58) as u8,
            vol_min_filter: bits.get_field(58..60) as u8,
            use_comp_lod: bits.get_bit(60),
            use_reg_lod: bits.get_bit(61),
            pred_select: bits.get_bit(63),
            use_reg_gradients: bits.get_bit(64),
            sample_location: bits.get_bit(65),
            lod_bias: bits.get_field(66..73) as u8,
            offset_x: bits.get_field(80..85) as u8,
            offset_y: bits.get_field(85..90) as u8,
            offset_z: bits.get_field(90..95) as u8,
            pred_condition: bits.get_bit(95),
        }
    }
}

/// Vertex fetch triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VtxFetchWord {
    pub opc: u8,
    pub src_reg: u8,
    pub src_reg_am: bool,
    pub dst_reg: u8,
    pub dst_reg_am: bool,
    pub must_be_one: bool,
    pub const_index: u8,
    pub const_index_sel: u8,
    pub src_swiz: u8,

    pub dst_swiz: u16,
    pub format_comp_all: bool,
    pub num_format_all: bool,
    pub signed_rf_mode_all: bool,
    pub format: u8,
    pub exp_adjust_all: u8,
    pub pred_select: bool,

    pub stride: u8,
    pub offset: u32,
    pub pred_condition: bool,
}

impl VtxFetchWord {
    pub fn encode(&self) -> [u32; 3] {
        let mut w = [0u32; 3];
        let bits: &mut [u32] = &mut w;
        bits.set_field(0..5, self.opc.into());
        bits.set_field(5..11, self.src_reg.into());
        bits.set_bit(11, self.src_reg_am);
        bits.set_field(12..18, self.dst_reg.into());
        bits.set_bit(18, self.dst_reg_am);
        bits.set_bit(19, self.must_be_one);
        bits.set_field(20..25, self.const_index.into());
        bits.set_field(25..27, self.const_index_sel.into());
        bits.set_field(30..32, self.src_swiz.into());

        bits.set_field(32..44, self.dst_swiz.into());
        bits.set_bit(44, self.format_comp_all);
        bits.set_bit(45, self.num_format_all);
        bits.set_bit(46, self.signed_rf_mode_all);
        bits.set_field(48..54, self.format.into());
        bits.set_field(56..62, self.exp_adjust_all.into());
        bits.set_bit(63, self.pred_select);

        bits.set_field(64..72, self.stride.into());
        bits.set_field(72..94, self.offset.into());
        bits.set_bit(95, self.pred_condition);
        w
    }

    pub fn decode(w: &[u32; 3]) -> Self {
        let bits: &[u32] = w;
        Self {
            opc: bits.get_field(0..5) as u8,
            src_reg: bits.get_field(5..11) as u8,
            src_reg_am: bits.get_bit(11),
            dst_reg: bits.get_field(12..18) as u8,
            dst_reg_am: bits.get_bit(18),
            must_be_one: bits.get_bit(19),
            const_index: bits.get_field(20..25) as u8,
            const_index_sel: bits.get_field(25..27) as u8,
            src_swiz: bits.get_field(30..32) as u8,
            dst_swiz: bits.get_field(32..44) as u16,
            format_comp_all: bits.get_bit(44),
            num_format_all: bits.get_bit(45),
            signed_rf_mode_all: bits.get_bit(46),
            format: bits.get_field(48..54) as u8,
            exp_adjust_all: bits.get_field(56..62) as u8,
            pred_select: bits.get_bit(63),
            stride: bits.get_field(64..72) as u8,
            offset: bits.get_field(72..94) as u32,
            pred_condition: bits.get_bit(95),
        }
    }
}

/// EXEC / EXEC_END header covering up to six instructions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecCf {
    pub address: u16,
    pub count: u8,
    pub is_yield: bool,
    /// Two bits per instruction: bit 0 = fetch, bit 1 = sync.
    pub serialize: u16,
    pub vc: u8,
    pub bool_addr: u8,
    pub condition: bool,
    pub address_mode: bool,
    pub end: bool,
}

/// COND_JMP to another CF index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JmpCf {
    pub address: u16,
    pub force_call: bool,
    pub predicated_jmp: bool,
    pub direction: bool,
    pub bool_addr: u8,
    pub condition: bool,
    pub address_mode: bool,
}

/// ALLOC header reserving export buffer space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocCf {
    pub size: u8,
    pub no_serial: bool,
    pub buffer_select: u8,
    pub alloc_mode: bool,
}

/// A 48-bit control-flow word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfWord {
    Nop,
    Exec(ExecCf),
    Jmp(JmpCf),
    Alloc(AllocCf),
    /// Opcode the compiler never emits, kept for disassembly.
    Other { opc: u8, raw: u64 },
}

impl CfWord {
    pub fn encode(&self) -> u64 {
        let mut v = 0u64;
        match self {
            CfWord::Nop => {}
            CfWord::Exec(exec) => {
                v.set_field(0..9, exec.address.into());
                v.set_field(12..15, exec.count.into());
                v.set_field(15..16, exec.is_yield.into());
                v.set_field(16..28, exec.serialize.into());
                v.set_field(28..34, exec.vc.into());
                v.set_field(34..42, exec.bool_addr.into());
                v.set_field(42..43, exec.condition.into());
                v.set_field(43..44, exec.address_mode.into());
                let opc = if exec.end {
                    super::CfOp::ExecEnd
                } else {
                    super::CfOp::Exec
                };
                v.set_field(44..48, opc.bits().into());
            }
            CfWord::Jmp(jmp) => {
                v.set_field(0..10, jmp.address.into());
                v.set_field(13..14, jmp.force_call.into());
                v.set_field(14..15, jmp.predicated_jmp.into());
                v.set_field(33..34, jmp.direction.into());
                v.set_field(34..42, jmp.bool_addr.into());
                v.set_field(42..43, jmp.condition.into());
                v.set_field(43..44, jmp.address_mode.into());
                v.set_field(44..48, super::CfOp::CondJmp.bits().into());
            }
            CfWord::Alloc(alloc) => {
                v.set_field(0..4, alloc.size.into());
                v.set_field(40..41, alloc.no_serial.into());
                v.set_field(41..43, alloc.buffer_select.into());
                v.set_field(43..44, alloc.alloc_mode.into());
                v.set_field(44..48, super::CfOp::Alloc.bits().into());
            }
            CfWord::Other { raw, .. } => v = *raw & mask_for_bits(48),
        }
        v
    }

    pub fn decode(v: u64) -> Self {
        let opc = v.get_field(44..48) as u8;
        match super::CfOp::from_bits(opc) {
            Some(super::CfOp::Nop) => CfWord::Nop,
            Some(op @ (super::CfOp::Exec | super::CfOp::ExecEnd)) => CfWord::Exec(ExecCf {
                address: v.get_field(0..9) as u16,
                count: v.get_field(12..15) as u8,
                is_yield: v.get_field(15..16) != 0,
                serialize: v.get_field(16..28) as u16,
                vc: v.get_field(28..34) as u8,
                bool_addr: v.get_field(34..42) as u8,
                condition: v.get_field(42..43) != 0,
                address_mode: v.get_field(43..44) != 0,
                end: op == super::CfOp::ExecEnd,
            }),
            Some(super::CfOp::CondJmp) => CfWord::Jmp(JmpCf {
                address: v.get_field(0..10) as u16,
                force_call: v.get_field(13..14) != 0,
                predicated_jmp: v.get_field(14..15) != 0,
                direction: v.get_field(33..34) != 0,
                bool_addr: v.get_field(34..42) as u8,
                condition: v.get_field(42..43) != 0,
                address_mode: v.get_field(43..44) != 0,
            }),
            Some(super::CfOp::Alloc) => CfWord::Alloc(AllocCf {
                size: v.get_field(0..4) as u8,
                no_serial: v.get_field(40..41) != 0,
                buffer_select: v.get_field(41..43) as u8,
                alloc_mode: v.get_field(43..44) != 0,
            }),
            _ => CfWord::Other { opc, raw: v },
        }
    }
}

/// Pack two CF words into one three-dword group.
pub fn pack_cf_pair(cf0: &CfWord, cf1: &CfWord) -> [u32; 3] {
    let mut w = [0u32; 3];
    let bits: &mut [u32] = &mut w;
    bits.set_field(0..48, cf0.encode());
    bits.set_field(48..96, cf1.encode());
    w
}

pub fn unpack_cf_pair(w: &[u32; 3]) -> (CfWord, CfWord) {
    let bits: &[u32] = w;
    (
        CfWord::decode(bits.get_field(0..48)),
        CfWord::decode(bits.get_field(48..96)),
    )
}
