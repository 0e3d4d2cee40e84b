//! Program layout and machine-word emission.
//!
//! The binary starts with the control-flow half: 48-bit CF words packed two per
//! three dwords and padded with a NOP to an even count. The 96-bit instruction
//! triples follow. Issue slots are grouped into EXEC runs of up to six. A run
//! ends when it is full, when the sync class changes (ALU, vertex fetch, texture
//! fetch) or when the block changes. ALLOC headers go in front of exports and
//! COND_JMP headers stand in for control-flow slots. Jump targets are block
//! indices until the layout is final, then they are patched to CF indices.

use crate::a2xx::encoding::{
    pack_cf_pair, AllocCf, AluWord, CfWord, ExecCf, JmpCf, TexFetchWord, VtxFetchWord,
    ANISO_FILTER_USE_FETCH_CONST, ARBITRARY_FILTER_USE_FETCH_CONST, TEX_FILTER_USE_FETCH_CONST,
    TEX_SAMPLE_LOCATION_CENTER,
};
use crate::a2xx::{
    export_buffer, AllocBuffer, FetchOp, ScalarOp, VectorOp, EXPORT_MEMORY_ADDR, MAX_CONST_INDEX,
    MAX_EXEC_COUNT, MAX_PROGRAM_SIZE,
};
use crate::core::{CompileError, CompileResult, LANE_UNUSED};
use crate::ir::{FetchKind, InstrIdx, InstrKind, ScheduledSlot, Src, SrcKind, Swizzle};
use crate::shader::Stage;

use super::context::CompilationContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPatchKind {
    Vertex { dst_swizzle: u16 },
    Texture { sampler: u8, src_swizzle: u8 },
}

/// Fetch instruction the driver completes at draw time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPatch {
    /// Byte offset of the fetch triple in `dwords`.
    pub byte_offset: usize,
    pub kind: FetchPatchKind,
}

/// An assembled program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderBinary {
    pub dwords: Vec<u32>,
    /// CF words in program order, padding included.
    pub cf: Vec<CfWord>,
    pub instr_count: usize,
    pub fetch_patches: Vec<FetchPatch>,
    /// Byte offset of the CF pair holding the exec after the first memory ALLOC.
    pub mem_export_offset: Option<usize>,
}

impl ShaderBinary {
    pub fn size_bytes(&self) -> usize {
        self.dwords.len() * 4
    }
}

/// Assemble the scheduled program in `ctx`.
pub fn assemble(ctx: &mut CompilationContext) -> CompileResult<ShaderBinary> {
    let sched = std::mem::take(&mut ctx.sched);
    let result = Assembler::new(ctx).run(&sched);
    ctx.sched = sched;

    let binary = result?;
    ctx.stats.cf_count = binary.cf.len();
    ctx.stats.instr_words = binary.instr_count;
    Ok(binary)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncClass {
    Alu,
    VertexFetch,
    TextureFetch,
}

struct PendingExec {
    address: usize,
    count: usize,
    serialize: u16,
    block: usize,
}

struct Assembler<'a> {
    ctx: &'a mut CompilationContext,
    cf: Vec<CfWord>,
    words: Vec<[u32; 3]>,
    /// Instruction index and patch kind of every patched fetch.
    fetches: Vec<(usize, FetchPatchKind)>,
    /// CF index and target block of every jump.
    jumps: Vec<(usize, usize)>,
    block_addr: Vec<Option<usize>>,
    exec: Option<PendingExec>,
    prev_sync: Option<SyncClass>,
    alloc: Option<AllocBuffer>,
    mem_alloc_pending: bool,
    mem_exec: Option<usize>,
}

impl<'a> Assembler<'a> {
    fn new(ctx: &'a mut CompilationContext) -> Self {
        let num_blocks = ctx.num_blocks;
        Self {
            ctx,
            cf: Vec::new(),
            words: Vec::new(),
            fetches: Vec::new(),
            jumps: Vec::new(),
            block_addr: vec![None; num_blocks],
            exec: None,
            prev_sync: None,
            alloc: None,
            mem_alloc_pending: false,
            mem_exec: None,
        }
    }

    fn run(mut self, sched: &[ScheduledSlot]) -> CompileResult<ShaderBinary> {
        if self.ctx.stage == Stage::Vertex && self.ctx.linkage.num_varyings() == 0 {
            self.push_alloc(AllocBuffer::ParameterPixel);
        }

        for slot in sched {
            self.emit_slot(slot)?;
        }
        self.flush();

        let end = match self.cf.last_mut() {
            Some(CfWord::Exec(exec)) => {
                exec.end = true;
                self.cf.len() - 1
            }
            _ => {
                self.cf.push(CfWord::Exec(ExecCf {
                    address: self.words.len() as u16,
                    end: true,
                    ..Default::default()
                }));
                self.cf.len() - 1
            }
        };
        self.patch_jumps(end)?;

        if self.cf.len() % 2 != 0 {
            self.cf.push(CfWord::Nop);
        }
        let cf_pairs = self.cf.len() / 2;
        if cf_pairs + self.words.len() > MAX_PROGRAM_SIZE {
            return Err(CompileError::ProgramTooLarge {
                cf: self.cf.len(),
                instrs: self.words.len(),
            });
        }
        for word in &mut self.cf {
            if let CfWord::Exec(exec) = word {
                exec.address += cf_pairs as u16;
            }
        }

        let mut dwords = Vec::with_capacity(3 * (cf_pairs + self.words.len()));
        for pair in self.cf.chunks(2) {
            dwords.extend_from_slice(&pack_cf_pair(&pair[0], &pair[1]));
        }
        for word in &self.words {
            dwords.extend_from_slice(word);
        }

        let fetch_patches = self
            .fetches
            .iter()
            .map(|&(instr, kind)| FetchPatch {
                byte_offset: (cf_pairs + instr) * 3 * 4,
                kind,
            })
            .collect();

        log::trace!(
            "layout: {} cf words, {} instructions, {} fetch patches",
            self.cf.len(),
            self.words.len(),
            self.fetches.len()
        );
        Ok(ShaderBinary {
            dwords,
            instr_count: self.words.len(),
            cf: self.cf,
            fetch_patches,
            mem_export_offset: self.mem_exec.map(|idx| idx / 2 * 3 * 4),
        })
    }

    fn emit_slot(&mut self, slot: &ScheduledSlot) -> CompileResult<()> {
        let Some(head) = slot.vector.or(slot.scalar) else {
            return Err(CompileError::internal("empty issue slot"));
        };
        let instr = &self.ctx.instrs[head];
        let (block, kind, pred) = (instr.block_idx, instr.kind.clone(), instr.pred);

        if self.exec.as_ref().is_some_and(|e| e.block != block) {
            self.flush();
        }
        let cf_len = self.cf.len();
        let Some(addr) = self.block_addr.get_mut(block) else {
            return Err(CompileError::internal(format!("instruction in unknown block {block}")));
        };
        addr.get_or_insert(cf_len);

        let sync = match kind {
            InstrKind::ControlFlow { target_block } => {
                self.flush();
                self.jumps.push((self.cf.len(), target_block));
                self.cf.push(CfWord::Jmp(JmpCf {
                    force_call: !pred.is_predicated(),
                    predicated_jmp: true,
                    direction: target_block > block,
                    condition: pred.condition(),
                    ..Default::default()
                }));
                return Ok(());
            }
            InstrKind::Alu(_) => SyncClass::Alu,
            InstrKind::Fetch(FetchKind::Vertex { .. }) => SyncClass::VertexFetch,
            InstrKind::Fetch(_) => SyncClass::TextureFetch,
            InstrKind::Elided => {
                return Err(CompileError::internal(format!("elided instr {head} was scheduled")));
            }
        };

        let export = slot.instrs().find_map(|i| self.ctx.instrs[i].export());
        if let Some(export) = export {
            let buffer = export_buffer(export);
            if self.alloc != Some(buffer) || export == EXPORT_MEMORY_ADDR {
                self.flush();
                self.push_alloc(buffer);
            }
        }

        let full = self
            .exec
            .as_ref()
            .is_some_and(|e| e.count == MAX_EXEC_COUNT || self.prev_sync != Some(sync));
        if full {
            self.flush();
        }

        let word = match kind {
            InstrKind::Fetch(fetch) => self.encode_fetch(head, fetch)?,
            _ => self.encode_alu(slot)?.encode(),
        };

        let exec = self.exec.get_or_insert(PendingExec {
            address: self.words.len(),
            count: 0,
            serialize: 0,
            block,
        });
        let c = exec.count;
        if sync != SyncClass::Alu {
            exec.serialize |= 1 << (2 * c);
        }
        if self.prev_sync != Some(sync) {
            exec.serialize |= 1 << (2 * c + 1);
        }
        exec.count += 1;
        self.prev_sync = Some(sync);
        self.words.push(word);
        Ok(())
    }

    fn push_alloc(&mut self, buffer: AllocBuffer) {
        let size = match buffer {
            AllocBuffer::Position => u8::from(self.ctx.writes_psize),
            AllocBuffer::ParameterPixel if self.ctx.stage == Stage::Vertex => {
                self.ctx.linkage.num_varyings().saturating_sub(1) as u8
            }
            _ => 0,
        };
        self.cf.push(CfWord::Alloc(AllocCf {
            size,
            buffer_select: buffer as u8,
            ..Default::default()
        }));
        self.alloc = Some(buffer);
        if buffer == AllocBuffer::Memory && self.mem_exec.is_none() {
            self.mem_alloc_pending = true;
        }
    }

    fn flush(&mut self) {
        let Some(exec) = self.exec.take() else {
            return;
        };
        if self.mem_alloc_pending {
            self.mem_exec = Some(self.cf.len());
            self.mem_alloc_pending = false;
        }
        self.cf.push(CfWord::Exec(ExecCf {
            address: exec.address as u16,
            count: exec.count as u8,
            serialize: exec.serialize,
            ..Default::default()
        }));
    }

    /// Resolve jump targets. A block that emitted nothing starts where the
    /// next one does; trailing empty blocks land on the final EXEC_END.
    fn patch_jumps(&mut self, end: usize) -> CompileResult<()> {
        let mut next = end;
        for addr in self.block_addr.iter_mut().rev() {
            match addr {
                Some(a) => next = *a,
                None => *addr = Some(next),
            }
        }

        for &(cf_idx, target) in &self.jumps {
            let Some(&Some(addr)) = self.block_addr.get(target) else {
                return Err(CompileError::internal(format!(
                    "unresolved branch target block {target}"
                )));
            };
            if let CfWord::Jmp(jmp) = &mut self.cf[cf_idx] {
                jmp.address = addr as u16;
            }
        }
        Ok(())
    }

    fn encode_alu(&mut self, slot: &ScheduledSlot) -> CompileResult<AluWord> {
        let mut word = AluWord::default();

        match slot.vector {
            Some(v) => {
                let instr = &self.ctx.instrs[v];
                let (op, alu) = match instr.alu() {
                    Some(alu) => (alu.vector, *alu),
                    None => (None, Default::default()),
                };
                let Some(op) = op else {
                    return Err(CompileError::internal(format!("instr {v} has no vector opcode")));
                };
                let srcs = instr.srcs.clone();
                let pred = instr.pred;
                let Some(&src1) = srcs.first() else {
                    return Err(CompileError::internal(format!("instr {v} has no operands")));
                };
                let mut src2 = srcs[usize::from(srcs.len() > 1)];
                // single operand compares test against 0.0
                if srcs.len() == 1 && op.is_compare() {
                    src2 = self.zero_const()?;
                }

                let ctx = &*self.ctx;
                word.vector_opc = op.bits();
                word.vector_write_mask = write_mask(ctx, v);
                word.vector_dest = dest_index(ctx, v);
                word.vector_clamp = alu.saturate;
                word.export_data = alu.export.is_some();

                word.src1_reg = src_reg_byte(ctx, &src1)?;
                word.src1_swiz = alu_swizzle(ctx, v, &src1).raw();
                word.src1_negate = src1.negate;
                word.src1_sel = src1.kind != SrcKind::Const;

                word.src2_reg = src_reg_byte(ctx, &src2)?;
                word.src2_swiz = alu_swizzle(ctx, v, &src2).raw();
                word.src2_negate = src2.negate;
                word.src2_sel = src2.kind != SrcKind::Const;

                if let Some(src3) = srcs.get(2) {
                    word.src3_reg = src_reg_byte(ctx, src3)?;
                    word.src3_swiz = alu_swizzle(ctx, v, src3).raw();
                    word.src3_negate = src3.negate;
                    word.src3_sel = src3.kind != SrcKind::Const;
                }
                word.pred_select = pred.bits();
            }
            None => word.vector_opc = VectorOp::Max.bits(),
        }

        match slot.scalar {
            Some(s) => {
                let ctx = &*self.ctx;
                let instr = &ctx.instrs[s];
                let Some(alu) = instr.alu().copied() else {
                    return Err(CompileError::internal(format!("instr {s} is not an ALU op")));
                };
                let Some(op) = alu.scalar else {
                    return Err(CompileError::internal(format!("instr {s} has no scalar opcode")));
                };
                let Some(&src) = instr.srcs.first() else {
                    return Err(CompileError::internal(format!("instr {s} has no operands")));
                };

                word.scalar_opc = op.bits();
                word.scalar_write_mask = write_mask(ctx, s);
                word.scalar_dest = dest_index(ctx, s);
                word.scalar_clamp = alu.saturate;
                word.export_data = alu.export.is_some();

                word.src3_reg = src_reg_byte(ctx, &src)?;
                word.src3_swiz = match instr.srcs.len() {
                    1 => scalar_swizzle(ctx, &src),
                    // both operands come from one register: A then B, repeated
                    _ => {
                        let a = src_swizzle(ctx, &src, 1).get(0);
                        let b = alu.scalar_lane_b;
                        Swizzle::from_components([a, b, a, b])
                    }
                }
                .raw();
                word.src3_negate = src.negate;
                word.src3_sel = src.kind != SrcKind::Const;
                word.pred_select = instr.pred.bits();
            }
            None => word.scalar_opc = ScalarOp::Max.bits(),
        }

        let ctx = &*self.ctx;
        word.relative_addr = slot
            .instrs()
            .any(|i| ctx.instrs[i].export() == Some(EXPORT_MEMORY_ADDR));
        Ok(word)
    }

    fn encode_fetch(&mut self, idx: InstrIdx, fetch: FetchKind) -> CompileResult<[u32; 3]> {
        let ctx = &*self.ctx;
        let instr = &ctx.instrs[idx];
        let Some(&src) = instr.srcs.first() else {
            return Err(CompileError::internal(format!("fetch {idx} has no address operand")));
        };
        let Some(src_ref) = src.reg_ref() else {
            return Err(CompileError::internal(format!("fetch {idx} reads a constant")));
        };
        let src_reg = ctx.reg(src_ref).slot;
        let pred = instr.pred;
        let at = self.words.len();

        let word = match fetch {
            FetchKind::Vertex {
                const_idx,
                const_idx_sel,
            } => {
                let dst_swiz = fetch_dst_swizzle(ctx, idx);
                self.fetches.push((at, FetchPatchKind::Vertex { dst_swizzle: dst_swiz }));
                VtxFetchWord {
                    opc: FetchOp::VtxFetch.bits(),
                    src_reg,
                    src_swiz: src_swizzle(ctx, &src, 1).to_absolute(1),
                    dst_reg: ctx.dest_reg(idx).slot,
                    dst_swiz,
                    must_be_one: true,
                    const_index: const_idx,
                    const_index_sel: const_idx_sel,
                    pred_select: pred.is_predicated(),
                    pred_condition: pred.condition(),
                    ..Default::default()
                }
                .encode()
            }
            FetchKind::Texture {
                sampler, is_rect, ..
            } => {
                let src_swiz = src_swizzle(ctx, &src, 3).to_absolute(3);
                self.fetches.push((
                    at,
                    FetchPatchKind::Texture {
                        sampler,
                        src_swizzle: src_swiz,
                    },
                ));
                TexFetchWord {
                    opc: FetchOp::TexFetch.bits(),
                    src_reg,
                    src_swiz,
                    dst_reg: ctx.dest_reg(idx).slot,
                    dst_swiz: fetch_dst_swizzle(ctx, idx),
                    const_idx: sampler,
                    tx_coord_denorm: is_rect,
                    use_comp_lod: ctx.stage == Stage::Fragment,
                    use_reg_lod: instr.srcs.len() == 2,
                    pred_select: pred.is_predicated(),
                    pred_condition: pred.condition(),
                    ..tex_fetch_defaults()
                }
                .encode()
            }
            FetchKind::SetTexLod => TexFetchWord {
                opc: FetchOp::TexSetTexLod.bits(),
                src_reg,
                src_swiz: src_swizzle(ctx, &src, 1).to_absolute(1),
                dst_swiz: 0xfff,
                use_comp_lod: true,
                pred_select: pred.is_predicated(),
                pred_condition: pred.condition(),
                ..tex_fetch_defaults()
            }
            .encode(),
        };
        Ok(word)
    }

    fn zero_const(&mut self) -> CompileResult<Src> {
        let (entry, swizzle) = self.ctx.immediates.intern_scalar(0.0);
        let index = self.ctx.first_immediate + entry as u32;
        if index > MAX_CONST_INDEX {
            return Err(CompileError::ConstantBankOverflow { index });
        }
        Ok(Src::constant(index, swizzle))
    }
}

fn tex_fetch_defaults() -> TexFetchWord {
    TexFetchWord {
        mag_filter: TEX_FILTER_USE_FETCH_CONST,
        min_filter: TEX_FILTER_USE_FETCH_CONST,
        mip_filter: TEX_FILTER_USE_FETCH_CONST,
        aniso_filter: ANISO_FILTER_USE_FETCH_CONST,
        arbitrary_filter: ARBITRARY_FILTER_USE_FETCH_CONST,
        vol_mag_filter: TEX_FILTER_USE_FETCH_CONST,
        vol_min_filter: TEX_FILTER_USE_FETCH_CONST,
        sample_location: TEX_SAMPLE_LOCATION_CENTER,
        ..Default::default()
    }
}

/// 8-bit source register field: a constant index, or a register slot with
/// the abs modifier in the top bit.
fn src_reg_byte(ctx: &CompilationContext, src: &Src) -> CompileResult<u8> {
    match src.reg_ref() {
        None => u8::try_from(src.num)
            .map_err(|_| CompileError::ConstantBankOverflow { index: src.num }),
        Some(r) => Ok(ctx.reg(r).slot | if src.abs { 0x80 } else { 0 }),
    }
}

/// Operand swizzle after allocation: positions read the lanes the components
/// were placed in.
fn src_swizzle(ctx: &CompilationContext, src: &Src, ncomp: usize) -> Swizzle {
    if !matches!(src.kind, SrcKind::Ssa | SrcKind::Reg) {
        return src.swizzle;
    }
    let Some(r) = src.reg_ref() else {
        return src.swizzle;
    };
    let comps = &ctx.reg(r).comp;
    let mut swiz = Swizzle::IDENTITY;
    for i in 0..ncomp {
        swiz.set(i, comps[src.swizzle.get(i) as usize].lane & 3);
    }
    swiz
}

fn scalar_swizzle(ctx: &CompilationContext, src: &Src) -> Swizzle {
    src_swizzle(ctx, src, 1).select(Swizzle::X)
}

/// Vector operand swizzle: operand position `i` feeds the lane that the
/// `i`-th written destination component lives in.
fn alu_swizzle(ctx: &CompilationContext, idx: InstrIdx, src: &Src) -> Swizzle {
    let instr = &ctx.instrs[idx];
    let swiz0 = src_swizzle(ctx, src, ctx.src_ncomp(idx, 0) as usize);
    match instr.vector_op() {
        Some(op) if op.is_pred_push() => return scalar_swizzle(ctx, src),
        Some(op) if op.is_reduction() => return swiz0,
        _ => {}
    }

    let write = instr.alu().map_or(0, |alu| alu.write_mask);
    let comps = &ctx.dest_reg(idx).comp;
    let ncomp = ctx.dst_ncomp(idx) as usize;
    let mut swiz = Swizzle::IDENTITY;
    let mut i = 0;
    for (j, comp) in comps.iter().enumerate() {
        if i >= ncomp {
            break;
        }
        if write & (1 << j) == 0 {
            continue;
        }
        if comp.lane != LANE_UNUSED {
            swiz.set(comp.lane as usize, swiz0.get(i));
        }
        i += 1;
    }
    swiz
}

fn write_mask(ctx: &CompilationContext, idx: InstrIdx) -> u8 {
    let write = ctx.instrs[idx].alu().map_or(0, |alu| alu.write_mask);
    let comps = &ctx.dest_reg(idx).comp;
    (0..4)
        .filter(|&i| write & (1 << i) != 0 && comps[i].lane != LANE_UNUSED)
        .fold(0, |mask, i| mask | 1 << comps[i].lane)
}

fn dest_index(ctx: &CompilationContext, idx: InstrIdx) -> u8 {
    ctx.instrs[idx]
        .export()
        .unwrap_or_else(|| ctx.dest_reg(idx).slot)
}

/// Fetch destination swizzle: three bits per lane naming the fetched
/// component, 7 for lanes left untouched.
fn fetch_dst_swizzle(ctx: &CompilationContext, idx: InstrIdx) -> u16 {
    let reg = ctx.dest_reg(idx);
    let mut swiz = 0xfffu16;
    for (i, comp) in reg.comp[..reg.ncomp as usize].iter().enumerate() {
        if comp.lane == LANE_UNUSED {
            continue;
        }
        let shift = 3 * u16::from(comp.lane);
        swiz = (swiz & !(7 << shift)) | ((i as u16) << shift);
    }
    swiz
}
