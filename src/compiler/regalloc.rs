// This module implements liveness and register allocation for the a2xx backend. Liveness
// is plain reference counting: count_references() walks back from every instruction
// with a side effect, drops whatever is unreachable, and counts how many times each
// component of each value is read. The scheduler then drives allocation as it issues
// instructions: the destination of every retired instruction is placed in the first
// completely empty register (or at a fixed slot for inputs, or nowhere for exports),
// and every read decrements a component's count, releasing its lane at zero. Values
// that must survive loop iterations carry free_at_block and are released when that
// block's last instruction retires instead. Persistent registers touched inside a loop
// are placed when scheduling enters the loop, since the first read of an iteration
// may come before the write, and keep that slot until the loop is done.

//! Reference counting and lane-level register allocation.

use crate::core::{CompileError, CompileResult, RegAllocError, LANE_UNUSED};
use crate::ir::{Dest, InstrIdx, InstrKind, RegRef, SrcKind};

use super::context::CompilationContext;

/// Where a destination is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// First register with no occupied lane.
    Anywhere,
    /// A specific register; input registers live at their input index.
    Fixed(u8),
    /// Export destination; lanes map one to one, no register is used.
    Export,
}

fn alloc_error(err: RegAllocError) -> CompileError {
    match err {
        RegAllocError::Exhausted => CompileError::RegisterFileExhausted,
        other => CompileError::internal(other.to_string()),
    }
}

impl CompilationContext {
    /// Mark live instructions, elide the rest and count component reads.
    pub fn count_references(&mut self) {
        let mut worklist: Vec<InstrIdx> = Vec::new();
        for instr in &mut self.instrs {
            instr.need_emit = !instr.is_elided() && instr.has_side_effects();
            if instr.need_emit {
                worklist.push(instr.idx);
            }
        }

        while let Some(idx) = worklist.pop() {
            for s in 0..self.instrs[idx].srcs.len() {
                let src = self.instrs[idx].srcs[s];
                match src.kind {
                    SrcKind::Ssa => self.mark_needed(src.num as usize, &mut worklist),
                    SrcKind::Reg => {
                        let reg = src.num as usize;
                        for w in 0..self.instrs.len() {
                            if self.instrs[w].dest == Dest::Reg(reg) {
                                self.mark_needed(w, &mut worklist);
                            }
                        }
                    }
                    SrcKind::Input | SrcKind::Const => {}
                }
            }
        }

        let mut eliminated = 0;
        for instr in &mut self.instrs {
            if !instr.need_emit && !instr.is_elided() {
                instr.kind = InstrKind::Elided;
                eliminated += 1;
            }
        }
        self.stats.instrs_eliminated += eliminated;

        for r in self.all_reg_refs() {
            for comp in &mut self.reg_mut(r).comp {
                comp.ref_count = 0;
            }
        }
        for idx in 0..self.instrs.len() {
            if self.instrs[idx].is_elided() {
                continue;
            }
            for s in 0..self.instrs[idx].srcs.len() {
                let src = self.instrs[idx].srcs[s];
                let Some(r) = src.reg_ref() else {
                    continue;
                };
                let ncomp = self.src_ncomp(idx, s) as usize;
                let reg = self.reg_mut(r);
                for i in 0..ncomp {
                    reg.comp[src.swizzle.get(i) as usize].ref_count += 1;
                }
            }
        }
        log::debug!(
            "{} live instructions, {} eliminated",
            self.instrs.iter().filter(|i| i.need_emit).count(),
            eliminated
        );
    }

    fn mark_needed(&mut self, idx: InstrIdx, worklist: &mut Vec<InstrIdx>) {
        let instr = &mut self.instrs[idx];
        if !instr.need_emit && !instr.is_elided() {
            instr.need_emit = true;
            worklist.push(idx);
        }
    }

    /// Give register `r` storage. Components nobody reads get no lane.
    pub fn allocate(&mut self, r: RegRef, placement: Placement) -> CompileResult<()> {
        if placement == Placement::Export {
            for (i, comp) in self.reg_mut(r).comp.iter_mut().enumerate() {
                comp.lane = i as u8;
            }
            return Ok(());
        }

        let reg = self.reg(r);
        if reg.ncomp == 0 || reg.is_allocated() {
            return Ok(());
        }
        let ncomp = reg.ncomp as usize;
        // a loop-carried register may have had its reads retired before the first write
        let loop_carried = matches!(r, RegRef::Reg(_))
            && (reg.free_at_block.is_some() || reg.loop_span.is_some());

        let slot = match placement {
            Placement::Fixed(slot) => slot,
            _ => self.reg_file.find_empty_slot().map_err(alloc_error)?,
        };
        self.reg_file.note_slot(slot);

        for i in 0..ncomp {
            if self.reg(r).comp[i].ref_count == 0 && !loop_carried {
                self.reg_mut(r).comp[i].lane = LANE_UNUSED;
                continue;
            }
            let lane = i as u8;
            self.reg_file.claim(slot, lane).map_err(alloc_error)?;
            let comp = &mut self.reg_mut(r).comp[i];
            comp.lane = lane;
            comp.allocated = true;
        }
        self.reg_mut(r).slot = slot;
        log::trace!("{r:?} -> R{slot}");
        Ok(())
    }

    /// Input registers sit at their input index; call before any other allocation.
    pub fn allocate_inputs(&mut self) -> CompileResult<()> {
        for idx in 0..self.inputs.len() {
            if self.inputs[idx].initialized {
                self.allocate(RegRef::Input(idx), Placement::Fixed(idx as u8))?;
            }
        }
        Ok(())
    }

    /// Place the persistent registers a loop around `block` carries, before
    /// anything in the loop reads them.
    pub fn allocate_loop_carried(&mut self, block: usize) -> CompileResult<()> {
        for reg in 0..self.regs.len() {
            let inside = self.regs[reg]
                .loop_span
                .is_some_and(|(first, last)| first <= block && block <= last);
            if !inside || self.regs[reg].is_allocated() {
                continue;
            }
            let touched = self.instrs.iter().any(|i| {
                i.need_emit
                    && (i.dest == Dest::Reg(reg)
                        || i.srcs.iter().any(|s| s.kind == SrcKind::Reg && s.num as usize == reg))
            });
            if touched {
                self.allocate(RegRef::Reg(reg), Placement::Anywhere)?;
            }
        }
        Ok(())
    }

    /// Drop one reference per component instruction `idx` reads, releasing
    /// lanes whose count reaches zero. Persistent registers are left to
    /// `release_persistent`.
    pub fn free_after_use(&mut self, idx: InstrIdx) -> CompileResult<()> {
        for s in 0..self.instrs[idx].srcs.len() {
            let src = self.instrs[idx].srcs[s];
            let Some(r) = src.reg_ref() else {
                continue;
            };
            let ncomp = self.src_ncomp(idx, s) as usize;
            for i in 0..ncomp {
                let c = src.swizzle.get(i) as usize;
                let reg = self.reg_mut(r);
                if reg.comp[c].ref_count == 0 {
                    return Err(CompileError::internal(format!(
                        "reference count underflow on {r:?}.{c} read by instr {idx}"
                    )));
                }
                reg.comp[c].ref_count -= 1;
            }
            if !matches!(r, RegRef::Reg(_)) {
                self.release_dead(r)?;
            }
        }
        Ok(())
    }

    /// Release persistent registers instruction `idx` touched, once its
    /// destination has been placed.
    pub fn release_persistent(&mut self, idx: InstrIdx) -> CompileResult<()> {
        let instr = &self.instrs[idx];
        let mut regs: Vec<RegRef> = instr
            .srcs
            .iter()
            .filter(|s| s.kind == SrcKind::Reg)
            .filter_map(|s| s.reg_ref())
            .collect();
        if let Dest::Reg(reg) = instr.dest {
            regs.push(RegRef::Reg(reg));
        }
        for r in regs {
            self.release_dead(r)?;
        }
        Ok(())
    }

    /// Release the lanes of `r` that nobody will read again. Persistent
    /// registers wait until their last pending write retired and their loop
    /// is done, so every instruction touching them sees the same placement.
    pub fn release_dead(&mut self, r: RegRef) -> CompileResult<()> {
        if self.reg(r).free_at_block.is_some() {
            return Ok(());
        }
        if let RegRef::Reg(reg) = r {
            let loop_last = self.regs[reg].loop_span.map(|(_, last)| last);
            let pending = self.instrs.iter().any(|i| {
                i.need_emit
                    && (i.dest == Dest::Reg(reg)
                        || loop_last.is_some_and(|last| i.block_idx <= last))
            });
            if pending {
                return Ok(());
            }
        }

        let slot = self.reg(r).slot;
        for c in 0..4 {
            let comp = self.reg(r).comp[c];
            if comp.allocated && comp.ref_count == 0 {
                self.reg_file.release(slot, comp.lane).map_err(alloc_error)?;
                self.reg_mut(r).comp[c].allocated = false;
            }
        }
        Ok(())
    }

    /// Release every register kept alive until the end of `block`.
    pub fn free_at_block_end(&mut self, block: usize) -> CompileResult<()> {
        for r in self.all_reg_refs() {
            let reg = self.reg(r);
            if reg.free_at_block.is_none() && reg.loop_span.is_some_and(|(_, last)| last == block) {
                // still read after the loop; drop the lanes only the loop used
                self.release_dead(r)?;
                continue;
            }
            if reg.free_at_block != Some(block) {
                continue;
            }
            let slot = self.reg(r).slot;
            for c in 0..4 {
                let comp = self.reg(r).comp[c];
                if comp.allocated {
                    self.reg_file.release(slot, comp.lane).map_err(alloc_error)?;
                    self.reg_mut(r).comp[c].allocated = false;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2xx::{ScalarOp, VectorOp};
    use crate::compiler::lower::IrBuilder;
    use crate::compiler::FragLinkage;
    use crate::core::CompileOptions;
    use crate::ir::{AluInstr, Predicate, Reg, Src, Swizzle};
    use crate::shader::{parse_program, Stage};

    fn prepared(text: &str) -> CompilationContext {
        let program = parse_program(text).expect("parse");
        let mut ctx = CompilationContext::new(
            CompileOptions::default(),
            program.stage,
            FragLinkage::default(),
        );
        IrBuilder::new(&mut ctx, &program).build().expect("lower");
        ctx.copy_propagate();
        ctx.count_references();
        ctx
    }

    fn alu(ctx: &mut CompilationContext, srcs: Vec<Src>, ncomp: u8) -> InstrIdx {
        let kind = InstrKind::Alu(AluInstr {
            vector: Some(VectorOp::Add),
            scalar: Some(ScalarOp::Add),
            write_mask: (1 << ncomp) - 1,
            ..Default::default()
        });
        ctx.push_instr(0, kind, srcs, Dest::Ssa(Reg::with_components(ncomp)), Predicate::Always)
    }

    fn bare() -> CompilationContext {
        CompilationContext::new(CompileOptions::default(), Stage::Fragment, FragLinkage::default())
    }

    #[test]
    fn test_dead_code_is_elided() {
        let ctx = prepared(
            "fragment\n\
             input varying(0) 4\n\
             %a = load_input 0\n\
             %unused = fmul %a, %a\n\
             %b = fadd %a, %a\n\
             store color %b\n",
        );
        assert!(ctx
            .instrs
            .iter()
            .all(|i| i.vector_op() != Some(VectorOp::Mul) || i.is_elided()));
        // the input move, the multiply and the folded export move
        assert_eq!(ctx.stats.instrs_eliminated, 3);
        assert!(ctx.instrs.iter().filter(|i| i.need_emit).count() == 1);
    }

    #[test]
    fn test_reference_counts_follow_swizzles() {
        let ctx = prepared(
            "fragment\n\
             input varying(0) 4\n\
             %a = load_input 0\n\
             %b = fadd %a.xxyy, %a.xyxy\n\
             store color %b\n",
        );
        let input = &ctx.inputs[0];
        let refs: Vec<u32> = input.comp.iter().map(|c| c.ref_count).collect();
        assert_eq!(refs, vec![4, 4, 0, 0]);
    }

    #[test]
    fn test_unread_components_get_no_lane() {
        let mut ctx = bare();
        let a = alu(&mut ctx, vec![], 4);
        ctx.reg_mut(RegRef::Ssa(a)).comp[0].ref_count = 1;
        ctx.reg_mut(RegRef::Ssa(a)).comp[2].ref_count = 1;

        ctx.allocate(RegRef::Ssa(a), Placement::Anywhere).unwrap();
        let reg = ctx.reg(RegRef::Ssa(a));
        assert_eq!(reg.slot, 0);
        let lanes: Vec<u8> = reg.comp.iter().map(|c| c.lane).collect();
        assert_eq!(lanes, vec![0, LANE_UNUSED, 2, LANE_UNUSED]);
        assert_eq!(ctx.reg_file.state().mask(0), 0b0101);
    }

    #[test]
    fn test_lanes_released_at_last_use() {
        let mut ctx = bare();
        let a = alu(&mut ctx, vec![], 1);
        let b = alu(&mut ctx, vec![Src::ssa(a), Src::ssa(a)], 1);
        ctx.reg_mut(RegRef::Ssa(a)).comp[0].ref_count = 2;

        ctx.allocate(RegRef::Ssa(a), Placement::Anywhere).unwrap();
        assert_eq!(ctx.reg_file.find_empty_slot(), Ok(1));
        ctx.free_after_use(b).unwrap();
        assert!(!ctx.reg(RegRef::Ssa(a)).is_allocated());
        assert_eq!(ctx.reg_file.find_empty_slot(), Ok(0));
        // a second release has nothing left to count down
        assert!(ctx.free_after_use(b).unwrap_err().is_internal());
    }

    #[test]
    fn test_loop_value_held_until_block_end() {
        let mut ctx = bare();
        let a = alu(&mut ctx, vec![], 1);
        let b = alu(&mut ctx, vec![Src::ssa(a)], 1);
        ctx.reg_mut(RegRef::Ssa(a)).comp[0].ref_count = 1;
        ctx.reg_mut(RegRef::Ssa(a)).free_at_block = Some(3);

        ctx.allocate(RegRef::Ssa(a), Placement::Anywhere).unwrap();
        ctx.free_after_use(b).unwrap();
        assert!(ctx.reg(RegRef::Ssa(a)).is_allocated());
        assert_eq!(ctx.reg_file.state().mask(0), 1);

        ctx.free_at_block_end(2).unwrap();
        assert!(ctx.reg(RegRef::Ssa(a)).is_allocated());
        ctx.free_at_block_end(3).unwrap();
        assert!(ctx.reg_file.state().is_empty());
    }

    #[test]
    fn test_persistent_register_kept_for_pending_write() {
        let mut ctx = bare();
        ctx.regs.push(Reg::with_components(1));
        let kind = InstrKind::Alu(AluInstr {
            vector: Some(VectorOp::Max),
            write_mask: 1,
            ..Default::default()
        });
        let w0 = ctx.push_instr(0, kind.clone(), vec![], Dest::Reg(0), Predicate::Always);
        let read = alu(&mut ctx, vec![Src::reg(0, Swizzle::IDENTITY)], 1);
        let w1 = ctx.push_instr(0, kind, vec![], Dest::Reg(0), Predicate::Always);
        ctx.regs[0].comp[0].ref_count = 1;
        ctx.instrs[w1].need_emit = true;

        ctx.allocate(RegRef::Reg(0), Placement::Anywhere).unwrap();
        ctx.instrs[w0].need_emit = false;
        ctx.free_after_use(read).unwrap();
        ctx.release_persistent(read).unwrap();
        // w1 still writes r0, so it keeps its lane
        assert!(ctx.regs[0].is_allocated());

        ctx.instrs[w1].need_emit = false;
        ctx.allocate(RegRef::Reg(0), Placement::Anywhere).unwrap();
        assert_eq!(ctx.regs[0].slot, 0);
        ctx.release_persistent(w1).unwrap();
        assert!(!ctx.regs[0].is_allocated());
    }

    #[test]
    fn test_loop_carried_register_placed_on_loop_entry() {
        let mut ctx = bare();
        let mut r0 = Reg::with_components(2);
        r0.loop_span = Some((1, 2));
        ctx.regs.push(r0);
        let kind = InstrKind::Alu(AluInstr {
            vector: Some(VectorOp::Max),
            write_mask: 1,
            ..Default::default()
        });
        let read = ctx.push_instr(
            1,
            kind.clone(),
            vec![Src::reg(0, Swizzle::X)],
            Dest::Ssa(Reg::with_components(1)),
            Predicate::Always,
        );
        let write = ctx.push_instr(2, kind, vec![], Dest::Reg(0), Predicate::Always);
        ctx.regs[0].comp[0].ref_count = 1;
        ctx.instrs[read].need_emit = true;
        ctx.instrs[write].need_emit = true;

        ctx.allocate_loop_carried(0).unwrap();
        assert!(!ctx.regs[0].is_allocated());
        ctx.allocate_loop_carried(1).unwrap();
        // y is never read but the loop still owns it
        let slot = ctx.regs[0].slot;
        assert_eq!(ctx.reg_file.state().mask(slot), 0b11);

        ctx.instrs[read].need_emit = false;
        ctx.free_after_use(read).unwrap();
        ctx.release_persistent(read).unwrap();
        assert_eq!(ctx.reg_file.state().mask(slot), 0b11);

        ctx.instrs[write].need_emit = false;
        ctx.allocate(RegRef::Reg(0), Placement::Anywhere).unwrap();
        assert_eq!(ctx.regs[0].slot, slot);
        ctx.release_persistent(write).unwrap();
        assert!(ctx.reg_file.state().is_empty());
        // leaving the loop does not place it again
        ctx.allocate_loop_carried(3).unwrap();
        assert!(ctx.reg_file.state().is_empty());
    }

    #[test]
    fn test_loop_carried_register_read_after_loop_keeps_its_lanes() {
        let mut ctx = bare();
        let mut r0 = Reg::with_components(2);
        r0.loop_span = Some((1, 1));
        ctx.regs.push(r0);
        let kind = InstrKind::Alu(AluInstr {
            vector: Some(VectorOp::Max),
            write_mask: 1,
            ..Default::default()
        });
        let in_loop = ctx.push_instr(
            1,
            kind.clone(),
            vec![Src::reg(0, Swizzle::Y)],
            Dest::Ssa(Reg::with_components(1)),
            Predicate::Always,
        );
        let after = ctx.push_instr(
            2,
            kind,
            vec![Src::reg(0, Swizzle::X)],
            Dest::Ssa(Reg::with_components(1)),
            Predicate::Always,
        );
        ctx.regs[0].comp[0].ref_count = 1;
        ctx.regs[0].comp[1].ref_count = 1;
        ctx.instrs[in_loop].need_emit = true;
        ctx.instrs[after].need_emit = true;

        ctx.allocate_loop_carried(1).unwrap();
        let slot = ctx.regs[0].slot;
        ctx.instrs[in_loop].need_emit = false;
        ctx.free_after_use(in_loop).unwrap();
        ctx.release_persistent(in_loop).unwrap();
        // y has no reads left, but a later iteration may still read it
        assert_eq!(ctx.reg_file.state().mask(slot), 0b11);

        ctx.free_at_block_end(1).unwrap();
        assert_eq!(ctx.reg_file.state().mask(slot), 0b01);
    }

    #[test]
    fn test_exports_kept_without_readers() {
        let folded = prepared(
            "fragment\n\
             input varying(0) 4\n\
             %a = load_input 0\n\
             %b = fmul %a, %a\n\
             store color %b\n",
        );
        let constant = prepared(
            "fragment\n\
             %c = const 0.5\n\
             store color %c.xxxx\n",
        );
        for ctx in [folded, constant] {
            let export = ctx
                .instrs
                .iter()
                .find(|i| i.export().is_some())
                .expect("export");
            assert!(export.need_emit);
            assert_eq!(ctx.reg(export.dest_ref()).total_refs(), 0);
        }
    }

    #[test]
    fn test_distinct_values_never_share_a_register() {
        let mut ctx = bare();
        let a = alu(&mut ctx, vec![], 2);
        let b = alu(&mut ctx, vec![], 2);
        for idx in [a, b] {
            ctx.reg_mut(RegRef::Ssa(idx)).comp[0].ref_count = 1;
        }
        ctx.allocate(RegRef::Ssa(a), Placement::Anywhere).unwrap();
        ctx.allocate(RegRef::Ssa(b), Placement::Anywhere).unwrap();
        assert_eq!(ctx.reg(RegRef::Ssa(a)).slot, 0);
        assert_eq!(ctx.reg(RegRef::Ssa(b)).slot, 1);
    }

    #[test]
    fn test_fixed_collision_is_internal_error() {
        let mut ctx = bare();
        let a = alu(&mut ctx, vec![], 1);
        let b = alu(&mut ctx, vec![], 1);
        for idx in [a, b] {
            ctx.reg_mut(RegRef::Ssa(idx)).comp[0].ref_count = 1;
        }
        ctx.allocate(RegRef::Ssa(a), Placement::Fixed(5)).unwrap();
        let err = ctx.allocate(RegRef::Ssa(b), Placement::Fixed(5)).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_exhaustion_reported() {
        let mut ctx = bare();
        for _ in 0..65 {
            let idx = alu(&mut ctx, vec![], 1);
            ctx.reg_mut(RegRef::Ssa(idx)).comp[0].ref_count = 1;
        }
        for idx in 0..64 {
            ctx.allocate(RegRef::Ssa(idx), Placement::Anywhere).unwrap();
        }
        assert_eq!(
            ctx.allocate(RegRef::Ssa(64), Placement::Anywhere),
            Err(CompileError::RegisterFileExhausted)
        );
    }

    #[test]
    fn test_export_placement_uses_identity_lanes() {
        let mut ctx = bare();
        let a = alu(&mut ctx, vec![], 3);
        ctx.allocate(RegRef::Ssa(a), Placement::Export).unwrap();
        let lanes: Vec<u8> = ctx.reg(RegRef::Ssa(a)).comp.iter().map(|c| c.lane).collect();
        assert_eq!(lanes, vec![0, 1, 2, 3]);
        assert!(ctx.reg_file.state().is_empty());
        assert_eq!(ctx.reg_file.max_slot(), None);
    }
}
