//! Text disassembly of assembled a2xx programs.
//!
//! Decodes the control-flow half first, then walks each EXEC run and prints
//! its instruction triples, using the serialize bits to tell fetches from ALU
//! instructions.

use std::fmt::Write;

use super::encoding::{unpack_cf_pair, AluWord, CfWord, TexFetchWord, VtxFetchWord};
use super::{AllocBuffer, CfOp, FetchOp, ScalarOp, VectorOp};
use crate::ir::Swizzle;

pub fn disassemble(dwords: &[u32]) -> String {
    let mut out = String::new();
    let total = dwords.len() / 3;

    // the CF half ends where the lowest exec address points
    let mut cf = Vec::new();
    let mut limit = total;
    let mut pair = 0;
    while pair < limit {
        let w = [dwords[pair * 3], dwords[pair * 3 + 1], dwords[pair * 3 + 2]];
        let (a, b) = unpack_cf_pair(&w);
        for word in [a, b] {
            if let CfWord::Exec(exec) = word {
                limit = limit.min(exec.address as usize);
            }
            cf.push(word);
        }
        pair += 1;
    }

    let _ = writeln!(out, "; cf");
    for (i, word) in cf.iter().enumerate() {
        let _ = writeln!(out, "{i:4}: {}", cf_text(word));
    }

    let _ = writeln!(out, "; instructions");
    for word in &cf {
        let CfWord::Exec(exec) = word else {
            continue;
        };
        for j in 0..exec.count as usize {
            let idx = exec.address as usize + j;
            if idx >= total {
                let _ = writeln!(out, "{idx:4}: <out of range>");
                continue;
            }
            let w = [dwords[idx * 3], dwords[idx * 3 + 1], dwords[idx * 3 + 2]];
            let is_fetch = exec.serialize & (1 << (2 * j)) != 0;
            let text = if is_fetch { fetch_text(&w) } else { alu_text(&w) };
            let _ = writeln!(out, "{idx:4}: {text}");
        }
    }
    out
}

fn cf_text(word: &CfWord) -> String {
    match word {
        CfWord::Nop => "NOP".to_string(),
        CfWord::Exec(exec) => format!(
            "{} addr={} cnt={} serialize={:#x}",
            if exec.end { "EXEC_END" } else { "EXEC" },
            exec.address,
            exec.count,
            exec.serialize
        ),
        CfWord::Jmp(jmp) => {
            let cond = match (jmp.force_call, jmp.condition) {
                (true, _) => "",
                (false, true) => " (p)",
                (false, false) => " (!p)",
            };
            format!("COND_JMP addr={}{cond}", jmp.address)
        }
        CfWord::Alloc(alloc) => format!(
            "ALLOC {} size={}",
            AllocBuffer::from_bits(alloc.buffer_select).name(),
            alloc.size
        ),
        CfWord::Other { opc, .. } => match CfOp::from_bits(*opc) {
            Some(op) => op.mnemonic().to_string(),
            None => format!("CF?{opc}"),
        },
    }
}

fn pred_prefix(select: u8) -> &'static str {
    match select {
        3 => "(p) ",
        2 => "(!p) ",
        _ => "",
    }
}

fn mask_text(mask: u8) -> String {
    (0..4)
        .map(|i| if mask & (1 << i) != 0 { ['x', 'y', 'z', 'w'][i] } else { '_' })
        .collect()
}

fn dest_text(export: bool, reg: u8, mask: u8) -> String {
    if export {
        format!("export{reg}.{}", mask_text(mask))
    } else {
        format!("R{reg}.{}", mask_text(mask))
    }
}

fn src_text(reg: u8, sel: bool, swiz: u8, negate: bool) -> String {
    let neg = if negate { "-" } else { "" };
    let swiz = Swizzle::from_raw(swiz).display(4);
    if !sel {
        format!("{neg}C{reg}.{swiz}")
    } else if reg & 0x80 != 0 {
        format!("{neg}|R{}.{swiz}|", reg & 0x7f)
    } else {
        format!("{neg}R{reg}.{swiz}")
    }
}

fn alu_text(w: &[u32; 3]) -> String {
    let alu = AluWord::decode(w);
    let mut text = String::from(pred_prefix(alu.pred_select));

    let vop = VectorOp::from_bits(alu.vector_opc).map_or("?v", |op| op.mnemonic());
    let _ = write!(
        text,
        "{vop}{} {} = {}, {}",
        if alu.vector_clamp { "_sat" } else { "" },
        dest_text(alu.export_data, alu.vector_dest, alu.vector_write_mask),
        src_text(alu.src1_reg, alu.src1_sel, alu.src1_swiz, alu.src1_negate),
        src_text(alu.src2_reg, alu.src2_sel, alu.src2_swiz, alu.src2_negate),
    );
    let three_src = matches!(
        VectorOp::from_bits(alu.vector_opc),
        Some(
            VectorOp::MulAdd
                | VectorOp::CndE
                | VectorOp::CndGte
                | VectorOp::CndGt
                | VectorOp::Dot2Add
        )
    );
    if three_src {
        let _ = write!(
            text,
            ", {}",
            src_text(alu.src3_reg, alu.src3_sel, alu.src3_swiz, alu.src3_negate)
        );
    }

    if alu.scalar_write_mask != 0 || alu.scalar_opc != ScalarOp::Max.bits() {
        let sop = ScalarOp::from_bits(alu.scalar_opc).map_or("?s", |op| op.mnemonic());
        let _ = write!(
            text,
            " ; {sop}{} {} = {}",
            if alu.scalar_clamp { "_sat" } else { "" },
            dest_text(alu.export_data, alu.scalar_dest, alu.scalar_write_mask),
            src_text(alu.src3_reg, alu.src3_sel, alu.src3_swiz, alu.src3_negate),
        );
    }
    text
}

fn fetch_dst_text(swiz: u16) -> String {
    (0..4)
        .map(|lane| match (swiz >> (3 * lane)) & 7 {
            0 => 'x',
            1 => 'y',
            2 => 'z',
            3 => 'w',
            4 => '0',
            5 => '1',
            _ => '_',
        })
        .collect()
}

fn fetch_src_text(reg: u8, swiz: u8, ncomp: usize) -> String {
    let comps: String = (0..ncomp)
        .map(|i| ['x', 'y', 'z', 'w'][((swiz >> (2 * i)) & 3) as usize])
        .collect();
    format!("R{reg}.{comps}")
}

fn fetch_text(w: &[u32; 3]) -> String {
    let opc = (w[0] & 0x1f) as u8;
    match FetchOp::from_bits(opc) {
        Some(FetchOp::VtxFetch) => {
            let vtx = VtxFetchWord::decode(w);
            format!(
                "{}VTX_FETCH R{}.{} = {} const {}.{}",
                pred_prefix(if vtx.pred_select { 2 | u8::from(vtx.pred_condition) } else { 0 }),
                vtx.dst_reg,
                fetch_dst_text(vtx.dst_swiz),
                fetch_src_text(vtx.src_reg, vtx.src_swiz, 1),
                vtx.const_index,
                vtx.const_index_sel
            )
        }
        Some(FetchOp::TexSetTexLod) => {
            let tex = TexFetchWord::decode(w);
            format!(
                "{}TEX_SET_TEX_LOD {}",
                pred_prefix(if tex.pred_select { 2 | u8::from(tex.pred_condition) } else { 0 }),
                fetch_src_text(tex.src_reg, tex.src_swiz, 1)
            )
        }
        Some(op) => {
            let tex = TexFetchWord::decode(w);
            let mut text = format!(
                "{}{} R{}.{} = {} sampler {}",
                pred_prefix(if tex.pred_select { 2 | u8::from(tex.pred_condition) } else { 0 }),
                op.mnemonic(),
                tex.dst_reg,
                fetch_dst_text(tex.dst_swiz),
                fetch_src_text(tex.src_reg, tex.src_swiz, 3),
                tex.const_idx
            );
            if tex.use_reg_lod {
                text.push_str(" reg_lod");
            }
            if tex.tx_coord_denorm {
                text.push_str(" denorm");
            }
            text
        }
        None => format!("FETCH?{opc}"),
    }
}
