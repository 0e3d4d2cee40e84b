//! Scalar filler synthesis.
//!
//! A two-operand instruction can only run on the scalar unit if both operands
//! sit in the same register. When a slot has a vector instruction but no scalar
//! partner, the scheduler asks this module whether one of the candidates can be
//! made to fit: operand B is copied by a scalar move into a free lane of operand
//! A's register, placed in the scalar half of an earlier slot that had none.

use crate::a2xx::ScalarOp;
use crate::ir::{
    AluInstr, Dest, Instr, InstrIdx, InstrKind, Predicate, Reg, RegComponent, ScheduledSlot,
    SrcKind,
};

use super::context::CompilationContext;

/// Walk back from the newest slot looking for one whose scalar half is free
/// and where a lane of register `slot` stays free from there up to now.
///
/// The walk stops at a block boundary, at the slot that produced operand B,
/// or once no lane of `slot` has been free throughout. Returns the earliest
/// qualifying slot the walk reached and the lowest such lane.
pub fn find_filler_slot(
    history: &[ScheduledSlot],
    instrs: &[Instr],
    block: usize,
    pred: Predicate,
    slot: u8,
    src1_producer: Option<InstrIdx>,
) -> Option<(usize, u8)> {
    let mut mask = 0xfu8;
    let mut found = None;

    for pos in (0..history.len()).rev() {
        let entry = &history[pos];
        if entry.instrs().any(|i| instrs[i].block_idx != block) {
            break;
        }
        if src1_producer.is_some_and(|p| entry.instrs().any(|i| i == p)) {
            break;
        }
        mask &= entry.reg_state.free_mask(slot);
        if mask == 0 {
            break;
        }

        if entry.scalar.is_some() {
            continue;
        }
        let Some(v) = entry.vector else {
            continue;
        };
        let vector = &instrs[v];
        let usable = vector.alu().is_some_and(|alu| alu.export.is_none())
            && vector.srcs.len() < 3
            && vector.pred == pred;
        if usable {
            found = Some((pos, mask.trailing_zeros() as u8));
        }
    }
    found
}

impl CompilationContext {
    /// Try to turn two-operand instruction `idx` into a scalar op by moving
    /// one operand next to the other. `swap` reads the operands reversed,
    /// which only commutative ops allow.
    pub fn scalarize(&mut self, idx: InstrIdx, swap: bool) -> bool {
        let instr = &self.instrs[idx];
        let Some(op) = instr.scalar_op() else {
            return false;
        };
        if instr.srcs.len() != 2 || (swap && !op.is_commutative()) {
            return false;
        }
        let (a, b) = if swap {
            (instr.srcs[1], instr.srcs[0])
        } else {
            (instr.srcs[0], instr.srcs[1])
        };
        if matches!(a.kind, SrcKind::Const | SrcKind::Input) || a.negate || a.abs {
            return false;
        }
        if b.kind == SrcKind::Reg {
            return false;
        }
        let Some(a_reg) = a.reg_ref() else {
            return false;
        };

        // A's register must not hold anything else anyone reads
        let reg = self.reg(a_reg);
        let comp = reg.comp[a.swizzle.get(0) as usize];
        if reg.total_refs() != 1 || !comp.allocated {
            return false;
        }
        let slot = reg.slot;
        let producer = (b.kind == SrcKind::Ssa).then_some(b.num as InstrIdx);

        let block = instr.block_idx;
        let pred = instr.pred;
        let Some((pos, lane)) =
            find_filler_slot(&self.sched, &self.instrs, block, pred, slot, producer)
        else {
            return false;
        };

        for entry in &mut self.sched[pos..] {
            entry.reg_state.set(slot, lane);
        }

        let mut dest = Reg::with_components(1);
        dest.slot = slot;
        dest.comp[0] = RegComponent {
            lane,
            allocated: false,
            ref_count: 0,
        };
        let mov = self.push_instr(
            block,
            InstrKind::Alu(AluInstr {
                scalar: Some(ScalarOp::Max),
                write_mask: 1,
                ..Default::default()
            }),
            vec![b],
            Dest::Ssa(dest),
            pred,
        );
        self.sched[pos].scalar = Some(mov);

        let instr = &mut self.instrs[idx];
        instr.srcs = vec![a, b];
        if let Some(alu) = instr.alu_mut() {
            alu.scalar_lane_b = lane;
        }
        self.stats.scalar_fillers += 1;
        log::trace!("instr {idx}: operand moved to R{slot}.{lane} in slot {pos}");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2xx::VectorOp;
    use crate::core::RegState;

    fn alu_instr(idx: InstrIdx, block_idx: usize, nsrc: usize, export: Option<u8>) -> Instr {
        Instr {
            idx,
            block_idx,
            kind: InstrKind::Alu(AluInstr {
                vector: Some(VectorOp::Add),
                scalar: Some(ScalarOp::Add),
                export,
                write_mask: 1,
                ..Default::default()
            }),
            srcs: vec![crate::ir::Src::ssa(0); nsrc],
            dest: Dest::Ssa(Reg::with_components(1)),
            pred: Predicate::Always,
            need_emit: false,
        }
    }

    fn slot(vector: InstrIdx, occupied: &[(u8, u8)]) -> ScheduledSlot {
        let mut reg_state = RegState::new();
        for &(slot, lane) in occupied {
            reg_state.set(slot, lane);
        }
        ScheduledSlot {
            vector: Some(vector),
            scalar: None,
            reg_state,
        }
    }

    #[test]
    fn test_earliest_slot_with_lane_free_throughout() {
        let instrs: Vec<Instr> = (0..3).map(|i| alu_instr(i, 0, 2, None)).collect();
        let history = vec![
            slot(0, &[(2, 0)]),
            slot(1, &[(2, 0), (2, 1)]),
            slot(2, &[(2, 0), (2, 2)]),
        ];
        // lane 3 of R2 is the only one free in all three slots
        assert_eq!(
            find_filler_slot(&history, &instrs, 0, Predicate::Always, 2, None),
            Some((0, 3))
        );
    }

    #[test]
    fn test_stops_at_operand_producer() {
        let instrs: Vec<Instr> = (0..3).map(|i| alu_instr(i, 0, 2, None)).collect();
        let history = vec![slot(0, &[]), slot(1, &[]), slot(2, &[])];
        assert_eq!(
            find_filler_slot(&history, &instrs, 0, Predicate::Always, 5, Some(1)),
            Some((2, 0))
        );
        assert_eq!(
            find_filler_slot(&history, &instrs, 0, Predicate::Always, 5, Some(2)),
            None
        );
    }

    #[test]
    fn test_stops_at_block_boundary() {
        let instrs = vec![alu_instr(0, 0, 2, None), alu_instr(1, 1, 2, None)];
        let history = vec![slot(0, &[]), slot(1, &[])];
        assert_eq!(
            find_filler_slot(&history, &instrs, 1, Predicate::Always, 0, None),
            Some((1, 0))
        );
    }

    #[test]
    fn test_skips_unusable_slots() {
        let instrs = vec![
            alu_instr(0, 0, 3, None),
            alu_instr(1, 0, 2, Some(0)),
            alu_instr(2, 0, 1, None),
        ];
        let mut history = vec![slot(0, &[]), slot(1, &[]), slot(2, &[])];
        history[2].scalar = Some(0);
        assert_eq!(
            find_filler_slot(&history, &instrs, 0, Predicate::Always, 0, None),
            None
        );
    }

    #[test]
    fn test_predicate_must_match() {
        let mut instrs = vec![alu_instr(0, 0, 2, None)];
        instrs[0].pred = Predicate::IfTrue;
        let history = vec![slot(0, &[])];
        assert_eq!(
            find_filler_slot(&history, &instrs, 0, Predicate::Always, 0, None),
            None
        );
        assert_eq!(
            find_filler_slot(&history, &instrs, 0, Predicate::IfTrue, 0, None),
            Some((0, 0))
        );
    }

    #[test]
    fn test_full_register_blocks_search() {
        let instrs = vec![alu_instr(0, 0, 2, None), alu_instr(1, 0, 2, None)];
        let history = vec![slot(0, &[]), slot(1, &[(4, 0), (4, 1), (4, 2), (4, 3)])];
        assert_eq!(
            find_filler_slot(&history, &instrs, 0, Predicate::Always, 4, None),
            None
        );
    }
}
