//! Copy propagation.
//!
//! Two rewrites run back to back before reference counting. Source propagation
//! replaces every operand that reads a plain move in the same block with the
//! move's own operand, composing swizzles and modifiers. Export propagation then
//! retargets the producer of an exported value to write the export directly, so
//! the export move disappears. Neither pass deletes the moves it bypasses; the
//! liveness walk in `count_references` removes whatever became unreachable.

use crate::ir::{Dest, InstrIdx, InstrKind, Predicate, Reg, Src, SrcKind, Swizzle};

use super::context::CompilationContext;

/// Operand reading `inner` through a move that `outer` reads.
fn compose(outer: Src, inner: Src) -> Src {
    Src {
        num: inner.num,
        kind: inner.kind,
        swizzle: inner.swizzle.select(outer.swizzle),
        negate: if outer.abs {
            outer.negate
        } else {
            outer.negate ^ inner.negate
        },
        abs: outer.abs || inner.abs,
    }
}

/// Bit position of the `n`-th set bit of `mask`.
fn nth_set_bit(mask: u8, n: usize) -> Option<u8> {
    (0..4u8).filter(|bit| mask & (1 << bit) != 0).nth(n)
}

/// Number of set bits of `mask` below `bit`.
fn rank(mask: u8, bit: u8) -> u8 {
    (mask & ((1u8 << bit) - 1)).count_ones() as u8
}

/// One producer retargeted at an export.
#[derive(Debug, Clone, Copy)]
struct Retarget {
    instr: InstrIdx,
    write_mask: u8,
    /// Position `j` of the new result reads old position `reswizzle[j]`.
    reswizzle: Swizzle,
}

impl CompilationContext {
    /// Run source and export propagation.
    pub fn copy_propagate(&mut self) {
        let before = self.stats.instrs_eliminated;
        self.propagate_sources();
        self.propagate_exports();
        log::debug!(
            "copy propagation removed {} export moves",
            self.stats.instrs_eliminated - before
        );
    }

    fn propagate_sources(&mut self) {
        for idx in 0..self.instrs.len() {
            if self.instrs[idx].is_elided() {
                continue;
            }
            for s in 0..self.instrs[idx].srcs.len() {
                while let Some(src) = self.propagated_src(idx, s) {
                    self.instrs[idx].srcs[s] = src;
                }
            }
        }
    }

    /// Operand `s` of `idx` read through the move it names, if that is legal.
    fn propagated_src(&self, idx: InstrIdx, s: usize) -> Option<Src> {
        let instr = &self.instrs[idx];
        let src = instr.srcs[s];
        if src.kind != SrcKind::Ssa {
            return None;
        }
        let mov = &self.instrs[src.num as usize];
        if !mov.is_plain_mov() || mov.block_idx != instr.block_idx {
            return None;
        }
        let inner = mov.srcs[0];

        if !instr.is_alu() && (inner.negate || inner.abs || inner.kind == SrcKind::Const) {
            return None;
        }
        if inner.kind == SrcKind::Const && src.abs {
            return None;
        }
        if inner.kind == SrcKind::Reg
            && self.reg_written_between(inner.num as usize, mov.idx, idx)
        {
            return None;
        }
        Some(compose(src, inner))
    }

    fn reg_written_between(&self, reg: usize, from: InstrIdx, to: InstrIdx) -> bool {
        self.instrs[from + 1..to]
            .iter()
            .any(|instr| !instr.is_elided() && instr.dest == Dest::Reg(reg))
    }

    fn propagate_exports(&mut self) {
        for idx in 0..self.instrs.len() {
            let instr = &self.instrs[idx];
            let Some(export) = instr.export() else {
                continue;
            };
            if !instr.is_plain_mov() {
                continue;
            }
            let src = instr.srcs[0];
            if src.negate || src.abs || matches!(src.kind, SrcKind::Input | SrcKind::Const) {
                continue;
            }
            let Some(plan) = self.export_retargets(idx) else {
                continue;
            };

            log::trace!("export {export}: retargeting {} producer(s) of instr {idx}", plan.len());
            for target in plan {
                self.retarget(target, export);
            }
            let mov = &mut self.instrs[idx];
            mov.kind = InstrKind::Elided;
            mov.need_emit = false;
            self.stats.instrs_eliminated += 1;
        }
    }

    /// Producers that can write export move `idx`'s value directly.
    fn export_retargets(&self, idx: InstrIdx) -> Option<Vec<Retarget>> {
        let mov = &self.instrs[idx];
        let src = mov.srcs[0];
        let export_mask = mov.alu()?.write_mask;
        let ncomp = export_mask.count_ones() as usize;

        if self.read_elsewhere(src, idx) {
            return None;
        }

        match src.kind {
            SrcKind::Ssa => {
                let p = src.num as usize;
                if !self.can_retarget(p, mov.block_idx, mov.pred) {
                    return None;
                }
                Some(vec![Retarget {
                    instr: p,
                    write_mask: export_mask,
                    reswizzle: src.swizzle,
                }])
            }
            SrcKind::Reg => {
                let reg = src.num as usize;
                let writers: Vec<InstrIdx> = self
                    .instrs
                    .iter()
                    .filter(|i| !i.is_elided() && i.dest == Dest::Reg(reg))
                    .map(|i| i.idx)
                    .collect();

                let mut seen = 0u8;
                let mut covered = 0u8;
                let mut plan = Vec::with_capacity(writers.len());
                for w in writers {
                    if !self.can_retarget(w, mov.block_idx, mov.pred) {
                        return None;
                    }
                    let mask = self.instrs[w].alu()?.write_mask;
                    if mask & seen != 0 {
                        return None;
                    }
                    seen |= mask;

                    let mut write_mask = 0;
                    let mut reswizzle = Swizzle::IDENTITY;
                    let mut j = 0;
                    for k in 0..ncomp {
                        let comp = src.swizzle.get(k);
                        if mask & (1 << comp) == 0 {
                            continue;
                        }
                        write_mask |= 1 << nth_set_bit(export_mask, k)?;
                        reswizzle.set(j, rank(mask, comp));
                        j += 1;
                    }
                    covered |= write_mask;
                    plan.push(Retarget {
                        instr: w,
                        write_mask,
                        reswizzle,
                    });
                }
                (covered == export_mask).then_some(plan)
            }
            SrcKind::Input | SrcKind::Const => None,
        }
    }

    fn can_retarget(&self, producer: InstrIdx, block: usize, pred: Predicate) -> bool {
        let instr = &self.instrs[producer];
        instr.is_alu()
            && !instr.has_side_effects()
            && instr.block_idx == block
            && instr.pred == pred
    }

    /// Another live instruction reads the value `src` names. Moves that source
    /// propagation already bypassed do not count.
    fn read_elsewhere(&self, src: Src, reader: InstrIdx) -> bool {
        self.instrs.iter().any(|instr| {
            instr.idx != reader
                && !instr.is_elided()
                && !self.is_bypassed_mov(instr.idx)
                && instr
                    .srcs
                    .iter()
                    .any(|s| s.kind == src.kind && s.num == src.num)
        })
    }

    fn is_bypassed_mov(&self, idx: InstrIdx) -> bool {
        let mov = &self.instrs[idx];
        mov.is_plain_mov()
            && mov.export().is_none()
            && matches!(mov.dest, Dest::Ssa(_))
            && !self.instrs.iter().any(|instr| {
                !instr.is_elided()
                    && instr
                        .srcs
                        .iter()
                        .any(|s| s.kind == SrcKind::Ssa && s.num as usize == idx)
            })
    }

    fn retarget(&mut self, target: Retarget, export: u8) {
        let instr = &mut self.instrs[target.instr];
        if target.write_mask == 0 {
            // none of its components reach the export
            instr.kind = InstrKind::Elided;
            self.stats.instrs_eliminated += 1;
            return;
        }

        let reduction = instr
            .vector_op()
            .is_some_and(|op| op.is_reduction());
        if !reduction {
            for src in &mut instr.srcs {
                src.swizzle = src.swizzle.select(target.reswizzle);
            }
        }
        if let InstrKind::Alu(alu) = &mut instr.kind {
            alu.export = Some(export);
            alu.write_mask = target.write_mask;
        }
        instr.dest = Dest::Ssa(Reg::with_components(target.write_mask.count_ones() as u8));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2xx::{ScalarOp, VectorOp};
    use crate::compiler::lower::IrBuilder;
    use crate::compiler::FragLinkage;
    use crate::core::CompileOptions;
    use crate::shader::parse_program;

    fn propagate(text: &str) -> CompilationContext {
        let program = parse_program(text).expect("parse");
        let mut ctx = CompilationContext::new(
            CompileOptions::default(),
            program.stage,
            FragLinkage::default(),
        );
        IrBuilder::new(&mut ctx, &program).build().expect("lower");
        ctx.copy_propagate();
        ctx
    }

    fn find(ctx: &CompilationContext, op: VectorOp) -> &crate::ir::Instr {
        ctx.instrs
            .iter()
            .find(|i| !i.is_plain_mov() && i.vector_op() == Some(op))
            .expect("instruction")
    }

    #[test]
    fn test_compose_modifiers() {
        let inner = Src::input(0, Swizzle::from_components([1, 2, 3, 0])).negated();
        let outer = Src::ssa(4).with_swizzle(Swizzle::from_components([3, 3, 0, 1]));
        let src = compose(outer, inner);
        assert_eq!(src.kind, SrcKind::Input);
        assert_eq!(src.swizzle.components(), [0, 0, 1, 2]);
        assert!(src.negate);

        // abs on the outer read swallows the inner negate
        let src = compose(outer.negated().absolute(), inner);
        assert!(src.abs && !src.negate);
    }

    #[test]
    fn test_move_chain_is_bypassed() {
        let ctx = propagate(
            "fragment\n\
             input varying(0) 4\n\
             %a = load_input 0\n\
             %b = fneg %a.yxwz\n\
             %c = fadd %b, %a\n\
             store color %c\n",
        );
        let add = find(&ctx, VectorOp::Add);
        assert_eq!(add.srcs[0].kind, SrcKind::Input);
        assert!(add.srcs[0].negate);
        assert_eq!(add.srcs[0].swizzle.components(), [1, 0, 3, 2]);
        assert_eq!(add.srcs[1], Src::input(0, Swizzle::IDENTITY));
    }

    #[test]
    fn test_export_move_is_folded_into_producer() {
        let ctx = propagate(
            "fragment\n\
             input varying(0) 4\n\
             %a = load_input 0\n\
             %b = fmul %a, %a\n\
             store color %b.zyxw\n",
        );
        let mul = find(&ctx, VectorOp::Mul);
        assert_eq!(mul.export(), Some(0));
        assert_eq!(mul.alu().unwrap().write_mask, 0xf);
        assert_eq!(mul.srcs[0].swizzle.components(), [2, 1, 0, 3]);
        assert_eq!(ctx.stats.instrs_eliminated, 1);
        assert!(ctx.instrs.iter().filter(|i| i.export().is_some()).count() == 1);
    }

    #[test]
    fn test_export_of_shared_value_keeps_move() {
        let ctx = propagate(
            "fragment\n\
             input varying(0) 4\n\
             %a = load_input 0\n\
             %b = fmul %a, %a\n\
             %c = fadd %b, %a\n\
             store color %b\n\
             store data(1) %c\n",
        );
        let mul = find(&ctx, VectorOp::Mul);
        assert_eq!(mul.export(), None);
        assert!(ctx
            .instrs
            .iter()
            .any(|i| i.is_plain_mov() && i.export() == Some(0)));
    }

    #[test]
    fn test_split_register_writers_export_directly() {
        let ctx = propagate(
            "fragment\n\
             input varying(0) 4\n\
             %a = load_input 0\n\
             %r = frcp %a.xy\n\
             store color %r.yxyx\n",
        );
        let rcps: Vec<_> = ctx
            .instrs
            .iter()
            .filter(|i| i.scalar_op() == Some(ScalarOp::RecipIeee))
            .collect();
        assert_eq!(rcps.len(), 2);
        // r.x feeds export lanes 1 and 3, r.y lanes 0 and 2
        assert_eq!(rcps[0].alu().unwrap().write_mask, 0b1010);
        assert_eq!(rcps[1].alu().unwrap().write_mask, 0b0101);
        assert!(rcps.iter().all(|i| i.export() == Some(0)));
        assert!(matches!(rcps[0].dest, Dest::Ssa(Reg { ncomp: 2, .. })));
    }

    #[test]
    fn test_predicated_producer_not_retargeted() {
        let ctx = propagate(
            "fragment\n\
             input varying(0) 4\n\
             reg r0 4\n\
             %a = load_input 0\n\
             r0 = fadd %a, %a\n\
             if %a.x {\n\
               r0 = fmul %a, %a\n\
             }\n\
             store color r0\n",
        );
        assert!(find(&ctx, VectorOp::Mul).export().is_none());
        assert!(find(&ctx, VectorOp::Add).export().is_none());
    }

    #[test]
    fn test_constant_not_propagated_into_fetch() {
        let ctx = propagate(
            "fragment\n\
             %c = const 0.25, 0.75\n\
             %t = tex 2d sampler 0 %c.xy\n\
             store color %t\n",
        );
        let tex = ctx
            .instrs
            .iter()
            .find(|i| matches!(i.kind, InstrKind::Fetch(_)))
            .unwrap();
        assert_eq!(tex.srcs[0].kind, SrcKind::Ssa);
    }

    #[test]
    fn test_bit_helpers() {
        assert_eq!(nth_set_bit(0b1010, 0), Some(1));
        assert_eq!(nth_set_bit(0b1010, 1), Some(3));
        assert_eq!(nth_set_bit(0b1010, 2), None);
        assert_eq!(rank(0b1011, 3), 2);
        assert_eq!(rank(0b1011, 0), 0);
    }
}
