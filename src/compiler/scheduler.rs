// This module implements the list scheduler that turns the live IR into issue slots. Each
// step collects the instructions that are ready in the first block with pending work,
// picks a fetch or control-flow instruction to issue alone if one is ready, and otherwise
// picks the best vector candidate and the best compatible scalar candidate by priority.
// When the scalar half would stay empty, it asks the filler module to rewrite a
// two-operand candidate into a scalar op. Retiring a slot frees the sources, allocates
// the destinations and records a snapshot of the register file, which the filler search
// reads later. Entering a new block first places the registers a loop around it
// carries. The per-step candidate list lives in a bump arena that is reset after
// every step.

//! Instruction scheduling with interleaved register allocation.

use bumpalo::{collections::Vec as BumpVec, Bump};

use crate::a2xx::{export_buffer, AllocBuffer};
use crate::core::{CompileError, CompileResult};
use crate::ir::{Dest, FetchKind, InstrIdx, InstrKind, Reg, ScheduledSlot, SrcKind};

use super::context::CompilationContext;
use super::regalloc::Placement;

/// Schedules one compilation's instructions into `ctx.sched`.
pub struct Scheduler<'a> {
    ctx: &'a mut CompilationContext,
    arena: Bump,
    /// Block the previous step issued from.
    block: Option<usize>,
}

impl<'a> Scheduler<'a> {
    pub fn new(ctx: &'a mut CompilationContext) -> Self {
        Self {
            ctx,
            arena: Bump::new(),
            block: None,
        }
    }

    pub fn run(mut self) -> CompileResult<()> {
        self.ctx.allocate_inputs()?;
        while self.step()? {
            self.arena.reset();
        }

        // fillers can pair a slot after it retired
        let paired = self
            .ctx
            .sched
            .iter()
            .filter(|s| s.vector.is_some() && s.scalar.is_some())
            .count();
        let stats = &mut self.ctx.stats;
        stats.slots = self.ctx.sched.len();
        stats.paired_slots = paired;
        log::debug!(
            "scheduled {} slots ({} paired, {} scalar fillers)",
            stats.slots,
            stats.paired_slots,
            stats.scalar_fillers
        );
        Ok(())
    }

    /// Issue one slot. Returns false once nothing is left to schedule.
    fn step(&mut self) -> CompileResult<bool> {
        let ctx = &mut *self.ctx;
        let Some((block, avail)) = available(ctx, &self.arena) else {
            return Ok(false);
        };
        if avail.is_empty() {
            return Err(CompileError::internal(format!(
                "no instruction in block {block} can be scheduled"
            )));
        }
        if self.block != Some(block) {
            ctx.allocate_loop_carried(block)?;
            self.block = Some(block);
        }

        let (vector, scalar) = match avail.iter().copied().find(|&i| !ctx.instrs[i].is_alu()) {
            Some(idx) => (Some(idx), None),
            None => pick_alu(ctx, &avail)?,
        };
        retire(ctx, vector, scalar)?;
        log::trace!("slot {}: vector {vector:?} scalar {scalar:?}", ctx.sched.len() - 1);

        if let Some(tex) = vector {
            insert_set_lod(ctx, tex);
        }

        let block_done = !ctx
            .instrs
            .iter()
            .any(|i| i.need_emit && i.block_idx == block);
        if block_done {
            ctx.free_at_block_end(block)?;
        }
        Ok(true)
    }
}

/// Ready instructions of the first block that still has pending work. All
/// returned instructions share one predicate.
fn available<'b>(
    ctx: &CompilationContext,
    arena: &'b Bump,
) -> Option<(usize, BumpVec<'b, InstrIdx>)> {
    let block = ctx.instrs.iter().find(|i| i.need_emit)?.block_idx;

    // exports drain one buffer class at a time
    let class = ctx
        .instrs
        .iter()
        .filter(|i| i.need_emit && i.block_idx == block)
        .filter_map(|i| i.export())
        .map(export_buffer)
        .min();

    let mut avail: BumpVec<'b, InstrIdx> = BumpVec::new_in(arena);
    let mut first = true;
    for instr in &ctx.instrs {
        if !instr.need_emit || instr.block_idx != block {
            continue;
        }
        let export_class = instr.export().map(export_buffer);
        if export_class.is_some() && export_class != class {
            continue;
        }
        // control flow and memory exports keep program order
        let ordered = matches!(instr.kind, InstrKind::ControlFlow { .. })
            || export_class == Some(AllocBuffer::Memory);
        if ordered && !first {
            break;
        }
        first = false;

        if !deps_ready(ctx, instr.idx) {
            continue;
        }
        let head: Option<InstrIdx> = avail.first().copied();
        if head.is_some_and(|head| ctx.instrs[head].pred != instr.pred) {
            continue;
        }
        avail.push(instr.idx);
    }
    Some((block, avail))
}

fn deps_ready(ctx: &CompilationContext, idx: InstrIdx) -> bool {
    let instr = &ctx.instrs[idx];
    let earlier = &ctx.instrs[..idx];

    for src in &instr.srcs {
        match src.kind {
            SrcKind::Ssa => {
                if ctx.instrs[src.num as usize].need_emit {
                    return false;
                }
            }
            SrcKind::Reg => {
                let reg = Dest::Reg(src.num as usize);
                if earlier.iter().any(|p| p.need_emit && p.dest == reg) {
                    return false;
                }
            }
            SrcKind::Input | SrcKind::Const => {}
        }
    }

    if let Dest::Reg(reg) = instr.dest {
        let blocked = earlier.iter().any(|p| {
            p.need_emit
                && (p.dest == Dest::Reg(reg)
                    || p.srcs
                        .iter()
                        .any(|s| s.kind == SrcKind::Reg && s.num as usize == reg))
        });
        if blocked {
            return false;
        }
    }
    true
}

fn vector_prio(ctx: &CompilationContext, idx: InstrIdx) -> u32 {
    let instr = &ctx.instrs[idx];
    if instr.vector_op().is_none() {
        u32::MAX
    } else if instr.srcs.len() == 3 {
        0
    } else if instr.export().is_some() {
        1
    } else if !ctx.scalar_possible(idx) {
        2
    } else if instr.srcs.len() == 2 {
        3
    } else {
        4
    }
}

fn scalar_prio(ctx: &CompilationContext, idx: InstrIdx) -> u32 {
    let instr = &ctx.instrs[idx];
    if !ctx.scalar_possible(idx) || (instr.srcs.len() > 1 && instr.vector_op().is_some()) {
        u32::MAX
    } else if instr.is_pred_set() {
        6
    } else if instr.vector_op().is_none() {
        0
    } else if instr.export().is_some() {
        5
    } else {
        4
    }
}

/// Whether `b` can issue on the scalar unit next to vector instruction `a`.
fn is_alu_compatible(ctx: &CompilationContext, a: Option<InstrIdx>, b: InstrIdx) -> bool {
    let Some(a) = a else {
        return true;
    };
    if a == b {
        return false;
    }
    let (va, sb) = (&ctx.instrs[a], &ctx.instrs[b]);
    if sb.is_pred_set() || va.vector_op().is_some_and(|op| op.is_pred_push()) {
        return false;
    }
    va.export() == sb.export()
}

fn pick_alu(
    ctx: &mut CompilationContext,
    avail: &[InstrIdx],
) -> CompileResult<(Option<InstrIdx>, Option<InstrIdx>)> {
    let mut vector = None;
    let mut prio_v = u32::MAX;
    for &idx in avail {
        let prio = vector_prio(ctx, idx);
        if prio < prio_v {
            vector = Some(idx);
            prio_v = prio;
        }
    }

    let mut scalar = None;
    if vector.map_or(true, |v| ctx.instrs[v].srcs.len() < 3) {
        let mut prio_s = u32::MAX;
        for &idx in avail {
            let compat = is_alu_compatible(ctx, vector, idx);
            let prio = scalar_prio(ctx, idx);
            if prio >= prio_v && !compat {
                continue;
            }
            if prio < prio_s {
                scalar = Some(idx);
                prio_s = prio;
                if !compat {
                    vector = None;
                }
            }
        }
    }

    if scalar.is_none() && ctx.options.scalar_fillers {
        if let Some(v) = vector.filter(|&v| ctx.instrs[v].srcs.len() < 3) {
            for &idx in avail {
                if !is_alu_compatible(ctx, Some(v), idx)
                    || !ctx.scalar_possible(idx)
                    || ctx.instrs[idx].srcs.len() != 2
                {
                    continue;
                }
                if ctx.scalarize(idx, false) || ctx.scalarize(idx, true) {
                    scalar = Some(idx);
                    break;
                }
            }
        }
    }

    if vector.is_none() && scalar.is_none() {
        return Err(CompileError::internal("ready ALU instructions fit neither unit"));
    }
    Ok((vector, scalar))
}

fn retire(
    ctx: &mut CompilationContext,
    vector: Option<InstrIdx>,
    scalar: Option<InstrIdx>,
) -> CompileResult<()> {
    let issued = [vector, scalar];
    for idx in issued.into_iter().flatten() {
        ctx.instrs[idx].need_emit = false;
    }
    for idx in issued.into_iter().flatten() {
        ctx.free_after_use(idx)?;
    }
    for idx in issued.into_iter().flatten() {
        let instr = &ctx.instrs[idx];
        let placement = if instr.export().is_some() {
            Placement::Export
        } else {
            Placement::Anywhere
        };
        ctx.allocate(instr.dest_ref(), placement)?;
    }
    for idx in issued.into_iter().flatten() {
        ctx.release_persistent(idx)?;
    }

    let reg_state = ctx.reg_file.snapshot();
    ctx.sched.push(ScheduledSlot {
        vector,
        scalar,
        reg_state,
    });
    Ok(())
}

/// A texture fetch with an explicit LOD needs a SET_TEX_LOD right before it.
fn insert_set_lod(ctx: &mut CompilationContext, tex: InstrIdx) {
    let instr = &ctx.instrs[tex];
    if !matches!(instr.kind, InstrKind::Fetch(FetchKind::Texture { .. })) || instr.srcs.len() != 2 {
        return;
    }
    let (block, pred, lod) = (instr.block_idx, instr.pred, instr.srcs[1]);
    let set_lod = ctx.push_instr(
        block,
        InstrKind::Fetch(FetchKind::SetTexLod),
        vec![lod],
        Dest::Ssa(Reg::default()),
        pred,
    );

    let pos = ctx.sched.len() - 1;
    let reg_state = ctx.sched[pos].reg_state;
    ctx.sched.insert(
        pos,
        ScheduledSlot {
            vector: Some(set_lod),
            scalar: None,
            reg_state,
        },
    );
    ctx.stats.tex_lod_inserted += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2xx::{ScalarOp, VectorOp, EXPORT_POSITION};
    use crate::compiler::lower::IrBuilder;
    use crate::compiler::{FragLinkage, LinkageSlot};
    use crate::core::{CompileOptions, LANE_UNUSED};
    use crate::ir::{AluInstr, Predicate, RegRef, Src, Swizzle};
    use crate::shader::{parse_program, Semantic, Stage};

    const FUSION: &str = "fragment\n\
        input varying(0) 4\n\
        input varying(1) 4\n\
        %a = load_input 0\n\
        %b = load_input 1\n\
        %p = fadd %a.x, %b.x\n\
        %q = fadd %a.y, %b.y\n\
        %r = fmul %a.z, %b.z\n\
        %t = fmul %a.w, %b.w\n\
        %sa = fadd %p, %q\n\
        %sb = fmul %r, %t\n\
        %o = fadd %sa, %sb\n\
        store color %o.xxxx\n";

    fn schedule_with(
        text: &str,
        options: CompileOptions,
        linkage: FragLinkage,
    ) -> CompilationContext {
        let program = parse_program(text).expect("parse");
        let mut ctx = CompilationContext::new(options, program.stage, linkage);
        IrBuilder::new(&mut ctx, &program).build().expect("lower");
        ctx.copy_propagate();
        ctx.count_references();
        Scheduler::new(&mut ctx).run().expect("schedule");
        ctx
    }

    fn schedule(text: &str) -> CompilationContext {
        schedule_with(text, CompileOptions::default(), FragLinkage::default())
    }

    /// Slot each issued instruction landed in.
    fn issue_slots(ctx: &CompilationContext) -> Vec<Option<usize>> {
        let mut slots = vec![None; ctx.instrs.len()];
        for (pos, entry) in ctx.sched.iter().enumerate() {
            for idx in entry.instrs() {
                slots[idx] = Some(pos);
            }
        }
        slots
    }

    /// Slot holding the jump to `block`.
    fn jump_to(ctx: &CompilationContext, block: usize) -> Option<usize> {
        ctx.sched.iter().position(|s| {
            s.vector.is_some_and(|v| {
                ctx.instrs[v].kind == InstrKind::ControlFlow { target_block: block }
            })
        })
    }

    fn is_set_lod(ctx: &CompilationContext, pos: usize) -> bool {
        ctx.sched[pos]
            .vector
            .is_some_and(|v| ctx.instrs[v].kind == InstrKind::Fetch(FetchKind::SetTexLod))
    }

    fn lane_mask(reg: &Reg, comps: impl Iterator<Item = usize>) -> u8 {
        comps.fold(0, |mask, c| {
            let lane = reg.comp[c].lane;
            assert_ne!(lane, LANE_UNUSED, "component {c} has no lane");
            mask | 1 << lane
        })
    }

    /// Every lane an issued instruction reads is still held right before
    /// its slot.
    fn assert_reads_are_live(ctx: &CompilationContext) {
        let issued = issue_slots(ctx);
        for (idx, pos) in issued.iter().enumerate() {
            let Some(pos) = *pos else {
                continue;
            };
            // a SET_TEX_LOD slot carries the state after its fetch
            let Some(before) = (0..pos).rev().find(|&p| !is_set_lod(ctx, p)) else {
                continue;
            };
            for (s, src) in ctx.instrs[idx].srcs.iter().enumerate() {
                let r = match src.kind {
                    SrcKind::Ssa => RegRef::Ssa(src.num as InstrIdx),
                    SrcKind::Input => RegRef::Input(src.num as usize),
                    SrcKind::Reg | SrcKind::Const => continue,
                };
                let reg = ctx.reg(r);
                let ncomp = ctx.src_ncomp(idx, s) as usize;
                let comps = (0..ncomp).map(|i| src.swizzle.get(i) as usize);
                let lanes = lane_mask(reg, comps);
                let held = ctx.sched[before].reg_state.mask(reg.slot);
                assert_eq!(
                    held & lanes,
                    lanes,
                    "instr {idx} reads {r:?} after R{} was freed",
                    reg.slot
                );
            }
        }
    }

    /// No two values alive at the same time hold the same lane. Each
    /// component lives from its definition to its own last read.
    fn assert_no_shared_lanes(ctx: &CompilationContext) {
        let issued = issue_slots(ctx);
        let mut ranges = Vec::new();
        for instr in &ctx.instrs {
            let (Dest::Ssa(reg), Some(def)) = (&instr.dest, issued[instr.idx]) else {
                continue;
            };
            if instr.export().is_some() {
                continue;
            }
            for c in 0..reg.ncomp as usize {
                let lane = reg.comp[c].lane;
                if lane == LANE_UNUSED {
                    continue;
                }
                let last_read = ctx
                    .instrs
                    .iter()
                    .filter(|r| {
                        r.srcs.iter().enumerate().any(|(s, src)| {
                            src.kind == SrcKind::Ssa
                                && src.num as usize == instr.idx
                                && (0..ctx.src_ncomp(r.idx, s) as usize)
                                    .any(|i| src.swizzle.get(i) as usize == c)
                        })
                    })
                    .filter_map(|r| issued[r.idx])
                    .max()
                    .unwrap_or(def);
                ranges.push((instr.idx, reg.slot, lane, def, last_read.max(def)));
            }
        }
        for (i, a) in ranges.iter().enumerate() {
            for b in &ranges[i + 1..] {
                // a lane freed by a read may be taken again in that same slot
                let overlap = a.3 < b.4 && b.3 < a.4;
                assert!(
                    a.1 != b.1 || a.2 != b.2 || !overlap,
                    "instrs {} and {} share R{}.{}",
                    a.0,
                    b.0,
                    a.1,
                    a.2
                );
            }
        }
    }

    #[test]
    fn test_scalar_filler_saves_a_slot() {
        let ctx = schedule(FUSION);
        assert_eq!(ctx.sched.len(), 6);
        assert_eq!(ctx.stats.scalar_fillers, 1);
        assert_eq!(ctx.stats.paired_slots, 2);

        // the filler move sits in the scalar half of an earlier slot
        let mov = ctx.sched[1].scalar.expect("filler move");
        assert_eq!(ctx.instrs[mov].scalar_op(), Some(ScalarOp::Max));
        assert!(ctx.instrs[mov].vector_op().is_none());
        assert!(ctx.reg_file.state().is_empty());

        let nofill = CompileOptions {
            scalar_fillers: false,
            ..CompileOptions::default()
        };
        let ctx = schedule_with(FUSION, nofill, FragLinkage::default());
        assert_eq!(ctx.sched.len(), 7);
        assert_eq!(ctx.stats.scalar_fillers, 0);
    }

    #[test]
    fn test_predicated_ops_pair() {
        let ctx = schedule(
            "fragment\n\
             input varying(0) 4\n\
             %a = load_input 0\n\
             if %a.x {\n\
               %f = ffloor %a.y\n\
               %g = ffract %a.z\n\
               %h = fadd %f, %g\n\
               store color %h.xxxx\n\
             }\n",
        );
        let paired = ctx
            .sched
            .iter()
            .find(|s| s.vector.is_some() && s.scalar.is_some())
            .expect("paired slot");
        let (v, s) = (paired.vector.unwrap(), paired.scalar.unwrap());
        assert_eq!(ctx.instrs[v].vector_op(), Some(VectorOp::Floor));
        assert_eq!(ctx.instrs[s].scalar_op(), Some(ScalarOp::Frac));
        assert_eq!(ctx.instrs[v].pred, Predicate::IfTrue);
        assert_eq!(ctx.instrs[s].pred, Predicate::IfTrue);
    }

    #[test]
    fn test_predicate_set_issues_alone() {
        let ctx = schedule(
            "fragment\n\
             input varying(0) 4\n\
             %a = load_input 0\n\
             %b = fmul %a, %a\n\
             if %a.x {\n\
               store color %b\n\
             } else {\n\
               store color %a\n\
             }\n",
        );
        for slot in &ctx.sched {
            if let Some(s) = slot.scalar {
                if ctx.instrs[s].is_pred_set() {
                    assert!(slot.vector.is_none(), "predicate set paired with a vector op");
                }
            }
        }
        assert!(ctx
            .sched
            .iter()
            .filter_map(|s| s.scalar)
            .any(|s| ctx.instrs[s].scalar_op() == Some(ScalarOp::PredSetInv)));
    }

    #[test]
    fn test_position_exports_drain_first() {
        let linkage = FragLinkage {
            inputs: vec![LinkageSlot {
                semantic: Semantic::Varying(0),
                components: 4,
            }],
            fragcoord: None,
        };
        let ctx = schedule_with(
            "vertex\n\
             input attribute(0) 4\n\
             input attribute(1) 4\n\
             %p = load_input 0\n\
             %c = load_input 1\n\
             store varying(0) %c\n\
             store position %p\n",
            CompileOptions::default(),
            linkage,
        );
        let export_slot = |export: u8| {
            ctx.sched
                .iter()
                .position(|s| s.vector.is_some_and(|v| ctx.instrs[v].export() == Some(export)))
                .expect("export slot")
        };
        assert!(export_slot(EXPORT_POSITION) < export_slot(0));
    }

    #[test]
    fn test_texture_lod_gets_set_lod_slot() {
        let ctx = schedule(
            "fragment\n\
             input varying(0) 4\n\
             %a = load_input 0\n\
             %t = tex 2d sampler 0 %a.xy bias %a.z\n\
             store color %t\n",
        );
        assert_eq!(ctx.stats.tex_lod_inserted, 1);
        let pos = (0..ctx.sched.len())
            .find(|&pos| is_set_lod(&ctx, pos))
            .expect("set lod slot");
        let tex = ctx.sched[pos + 1].vector.unwrap();
        assert!(matches!(ctx.instrs[tex].kind, InstrKind::Fetch(FetchKind::Texture { .. })));
        assert_eq!(ctx.sched[pos].reg_state, ctx.sched[pos + 1].reg_state);
    }

    #[test]
    fn test_loop_schedule_releases_everything() {
        let ctx = schedule(
            "fragment\n\
             input varying(0) 4\n\
             reg r0 4\n\
             %a = load_input 0\n\
             r0 = fadd %a, %a\n\
             loop {\n\
               r0 = fmul r0, %a\n\
               if r0.x {\n\
                 break\n\
               }\n\
             }\n\
             store color r0\n",
        );
        assert!(ctx.reg_file.state().is_empty());
        // %a is read inside the loop and kept until the back edge retires
        let jump = jump_to(&ctx, 1).expect("back edge");
        let mov = ctx.instrs.iter().position(|i| i.is_plain_mov() && i.export().is_none()).unwrap();
        let slot = ctx.reg(crate::ir::RegRef::Ssa(mov)).slot;
        assert!(ctx.sched[jump - 1].reg_state.mask(slot) != 0);
    }

    #[test]
    fn test_register_lanes_stay_sound() {
        let programs = [
            FUSION,
            "fragment\n\
             input varying(0) 4\n\
             %a = load_input 0\n\
             %b = fadd %a.xxyy, %a.zwzw\n\
             %c = fmul %b, %a\n\
             %d = fdot3 %c, %b\n\
             %e = fadd %d.xxxx, %c\n\
             store color %e\n",
            "fragment\n\
             input varying(0) 4\n\
             %a = load_input 0\n\
             %t = tex 2d sampler 0 %a.xy bias %a.z\n\
             %u = fmul %t, %a\n\
             store color %u\n",
            "fragment\n\
             input varying(0) 4\n\
             %a = load_input 0\n\
             if %a.x {\n\
               %f = ffloor %a.y\n\
               %g = ffract %a.z\n\
               %h = fadd %f, %g\n\
               store color %h.xxxx\n\
             }\n",
        ];
        for text in programs {
            for scalar_fillers in [true, false] {
                let options = CompileOptions {
                    scalar_fillers,
                    ..CompileOptions::default()
                };
                let ctx = schedule_with(text, options, FragLinkage::default());
                assert_reads_are_live(&ctx);
                assert_no_shared_lanes(&ctx);
            }
        }
    }

    #[test]
    fn test_loop_register_read_before_write_keeps_its_slot() {
        let ctx = schedule(
            "fragment\n\
             input varying(0) 4\n\
             reg r0 4\n\
             %a = load_input 0\n\
             loop {\n\
               %x = fmul r0, %a\n\
               %y = fadd %x, %a\n\
               %z = fadd r0, %y\n\
               %w = fmul %z, %z\n\
               r0 = fadd %w, %a\n\
               if %a.x {\n\
                 break\n\
               }\n\
             }\n\
             store color r0\n",
        );
        assert_reads_are_live(&ctx);
        assert_no_shared_lanes(&ctx);

        let head = ctx
            .sched
            .iter()
            .position(|s| s.instrs().any(|i| ctx.instrs[i].block_idx == 1))
            .expect("loop head");
        let jump = jump_to(&ctx, 1).expect("back edge");
        let slot = ctx.regs[0].slot;
        for pos in head..=jump {
            assert_eq!(ctx.sched[pos].reg_state.mask(slot), 0xf, "r0 lost a lane in slot {pos}");
            for idx in ctx.sched[pos].instrs() {
                let instr = &ctx.instrs[idx];
                let Dest::Ssa(reg) = &instr.dest else {
                    continue;
                };
                let placed = reg.comp[..reg.ncomp as usize]
                    .iter()
                    .any(|c| c.lane != LANE_UNUSED);
                if placed && instr.export().is_none() {
                    assert_ne!(reg.slot, slot, "instr {idx} written over r0");
                }
            }
        }
        assert!(ctx.reg_file.state().is_empty());
    }

    fn vector_and_scalar(pred: Predicate) -> CompilationContext {
        let mut ctx = CompilationContext::new(
            CompileOptions::default(),
            Stage::Fragment,
            FragLinkage::default(),
        );
        let mul = InstrKind::Alu(AluInstr {
            vector: Some(VectorOp::Mul),
            write_mask: 0xf,
            ..Default::default()
        });
        let rcp = InstrKind::Alu(AluInstr {
            scalar: Some(ScalarOp::RecipIeee),
            write_mask: 1,
            ..Default::default()
        });
        let consts = vec![Src::constant(0, Swizzle::IDENTITY), Src::constant(1, Swizzle::IDENTITY)];
        let vec4 = Dest::Ssa(Reg::with_components(4));
        let v = ctx.push_instr(0, mul, consts, vec4, Predicate::Always);
        let scalar_src = vec![Src::constant(2, Swizzle::X)];
        let s = ctx.push_instr(0, rcp, scalar_src, Dest::Ssa(Reg::with_components(1)), pred);
        ctx.instrs[v].need_emit = true;
        ctx.instrs[s].need_emit = true;
        Scheduler::new(&mut ctx).run().expect("schedule");
        ctx
    }

    #[test]
    fn test_different_predicates_never_pair() {
        let same = vector_and_scalar(Predicate::Always);
        assert_eq!(same.sched.len(), 1);
        assert_eq!(same.stats.paired_slots, 1);

        for pred in [Predicate::IfTrue, Predicate::IfFalse] {
            let ctx = vector_and_scalar(pred);
            assert_eq!(ctx.sched.len(), 2);
            assert_eq!(ctx.stats.paired_slots, 0);
            for slot in &ctx.sched {
                let preds: Vec<_> = slot.instrs().map(|i| ctx.instrs[i].pred).collect();
                assert!(preds.windows(2).all(|w| w[0] == w[1]));
            }
        }
    }

    #[test]
    fn test_predicated_halves_of_one_export_pair() {
        let ctx = schedule(
            "fragment\n\
             input varying(0) 4\n\
             reg r0 2\n\
             %a = load_input 0\n\
             if %a.x {\n\
               r0.x = frcp %a.y\n\
               r0.y = fadd %a.z, %a.w\n\
               store color r0.xyxy\n\
             }\n",
        );
        let paired = ctx
            .sched
            .iter()
            .find(|s| s.vector.is_some() && s.scalar.is_some())
            .expect("paired slot");
        let (v, s) = (&ctx.instrs[paired.vector.unwrap()], &ctx.instrs[paired.scalar.unwrap()]);
        assert_eq!(v.vector_op(), Some(VectorOp::Add));
        assert_eq!(s.scalar_op(), Some(ScalarOp::RecipIeee));
        assert_eq!((v.export(), s.export()), (Some(0), Some(0)));
        assert_eq!((v.pred, s.pred), (Predicate::IfTrue, Predicate::IfTrue));
        let (vm, sm) = (v.alu().unwrap().write_mask, s.alu().unwrap().write_mask);
        assert_eq!(vm & sm, 0);
        assert_eq!(vm | sm, 0xf);
    }

    #[test]
    fn test_stall_is_internal_error() {
        let mut ctx = CompilationContext::new(
            CompileOptions::default(),
            Stage::Fragment,
            FragLinkage::default(),
        );
        let kind = InstrKind::Alu(AluInstr {
            vector: Some(VectorOp::Add),
            write_mask: 1,
            ..Default::default()
        });
        let dest = Dest::Ssa(Reg::with_components(1));
        let a = ctx.push_instr(0, kind.clone(), vec![Src::ssa(1)], dest.clone(), Predicate::Always);
        let b = ctx.push_instr(1, kind, vec![], dest, Predicate::Always);
        ctx.instrs[a].need_emit = true;
        ctx.instrs[b].need_emit = true;
        let err = Scheduler::new(&mut ctx).run().unwrap_err();
        assert!(err.is_internal());
    }
}
