// This module lowers a shader::Program into the internal IR. It walks the control-flow
// tree in program order, numbering basic blocks as it goes (a list opens a block, every
// if or loop closes it and opens a fresh one afterwards), and emits one or more IR
// instructions per source instruction: ALU ops map onto vector/scalar opcode pairs with
// operand fixups, inputs become vertex fetches or input-register moves with the built-in
// fragcoord/front-face/point-coord sequences, outputs become export moves, textures
// become fetches (cube maps get their coordinate transform), and if/else becomes a
// predicate push/invert/pop sequence. Every operand and destination passes through
// update_range(), which records the loop depth a register lives at so the allocator can
// defer freeing values that must survive loop iterations.

//! Program to IR lowering.

use hashbrown::HashMap;

use crate::a2xx::{
    ScalarOp, VectorOp, EXPORT_COLOR, EXPORT_MEMORY_ADDR, EXPORT_MEMORY_DATA,
    EXPORT_POINT_SIZE, EXPORT_POSITION, MAX_BIN_TILES, MAX_CONST_INDEX, VERTEX_FETCH_CONST_BASE,
};
use crate::core::{CompileError, CompileResult};
use crate::ir::{
    AluInstr, Dest, FetchKind, InstrIdx, InstrKind, Predicate, Reg, RegRef, Src, SrcKind,
    Swizzle,
};
use crate::shader::{
    self, AluOp, CfNode, IfNode, JumpKind, LoopNode, Operand, Program, SamplerDim, Semantic,
    SsaId, Stage, TexOp, Value,
};

use super::context::CompilationContext;

/// Constant registers the driver fills for the vertex stage.
const CONST_TILE_OFFSET: u32 = 64;
const CONST_VIEWPORT: u32 = 66;
const CONST_BIN_SCALE: u32 = 67;
const CONST_BIN_SELECT: u32 = 1;
const CONST_BIN_BASE: u32 = 3;
const INPUT_BIN_OFFSET: usize = 2;

/// Vector and scalar opcodes implementing each ALU op.
fn alu_opcodes(op: AluOp) -> (Option<VectorOp>, Option<ScalarOp>) {
    use AluOp::*;
    match op {
        Mov | Fneg | Fabs | Fsat => (Some(VectorOp::Max), Some(ScalarOp::Max)),
        Fsign => (Some(VectorOp::CndGte), None),
        Fadd | Fsub => (Some(VectorOp::Add), Some(ScalarOp::Add)),
        Fmul => (Some(VectorOp::Mul), Some(ScalarOp::Mul)),
        Ffma => (Some(VectorOp::MulAdd), None),
        Fmax => (Some(VectorOp::Max), Some(ScalarOp::Max)),
        Fmin => (Some(VectorOp::Min), Some(ScalarOp::Min)),
        Ffloor => (Some(VectorOp::Floor), Some(ScalarOp::Floor)),
        Ffract => (Some(VectorOp::Frac), Some(ScalarOp::Frac)),
        Ftrunc => (Some(VectorOp::Trunc), Some(ScalarOp::Trunc)),
        Fdot2 => (Some(VectorOp::Dot2Add), None),
        Fdot3 => (Some(VectorOp::Dot3), None),
        Fdot4 => (Some(VectorOp::Dot4), None),
        // scalar SETxx compare against zero, so two-operand compares stay vector-only
        Sge => (Some(VectorOp::SetGte), None),
        Slt => (Some(VectorOp::SetGt), None),
        Sne => (Some(VectorOp::SetNe), None),
        Seq => (Some(VectorOp::SetE), None),
        Fcsel => (Some(VectorOp::CndE), None),
        Frsq => (None, Some(ScalarOp::RecipSqIeee)),
        Frcp => (None, Some(ScalarOp::RecipIeee)),
        Flog2 => (None, Some(ScalarOp::LogIeee)),
        Fexp2 => (None, Some(ScalarOp::ExpIeee)),
        Fsqrt => (None, Some(ScalarOp::SqrtIeee)),
        Fcos => (None, Some(ScalarOp::Cos)),
        Fsin => (None, Some(ScalarOp::Sin)),
        Cube => (Some(VectorOp::Cube), None),
    }
}

fn full_mask(ncomp: u8) -> u8 {
    (1u8 << ncomp) - 1
}

pub(crate) struct IrBuilder<'a> {
    ctx: &'a mut CompilationContext,
    program: &'a Program,

    ssa_map: HashMap<SsaId, InstrIdx>,
    ssa_ncomp: HashMap<SsaId, u8>,
    consts: HashMap<SsaId, Vec<u32>>,
    /// Program input location to input register (fragment) or fetch location (vertex).
    input_map: Vec<usize>,
    /// Fragment input register holding the param (pixel position, facing, point coord).
    param_input: usize,

    block_idx: usize,
    next_block: usize,
    block_jump: Vec<Option<usize>>,

    pred: Predicate,
    pred_idx: Option<InstrIdx>,

    loop_depth: usize,
    loop_last_block: Vec<usize>,
    /// (first block, block after the loop) of each enclosing loop.
    loops: Vec<(usize, usize)>,

    position: Option<Src>,
}

impl<'a> IrBuilder<'a> {
    pub fn new(ctx: &'a mut CompilationContext, program: &'a Program) -> Self {
        Self {
            ctx,
            program,
            ssa_map: HashMap::new(),
            ssa_ncomp: HashMap::new(),
            consts: HashMap::new(),
            input_map: Vec::new(),
            param_input: 0,
            block_idx: 0,
            next_block: 0,
            block_jump: Vec::new(),
            pred: Predicate::Always,
            pred_idx: None,
            loop_depth: 0,
            loop_last_block: vec![0],
            loops: Vec::new(),
            position: None,
        }
    }

    pub fn build(mut self) -> CompileResult<()> {
        if self.program.stage != self.ctx.stage {
            return Err(CompileError::invalid("program stage does not match compile entry point"));
        }

        self.ctx.first_immediate = self.program.num_uniforms;
        for &ncomp in &self.program.registers {
            if !(1..=4).contains(&ncomp) {
                return Err(CompileError::invalid(format!("register with {ncomp} components")));
            }
            self.ctx.regs.push(Reg::with_components(ncomp));
        }

        self.setup_inputs()?;

        self.ctx.num_blocks = self.program.num_blocks();
        self.block_jump = vec![None; self.ctx.num_blocks];
        let program = self.program;
        self.emit_cf_list(&program.body, None)?;

        if self.ctx.stage == Stage::Vertex {
            self.extra_position_exports()?;
        }

        self.ctx.stats.instrs_built = self.ctx.instrs.len();
        log::debug!(
            "lowered {} instructions in {} blocks",
            self.ctx.instrs.len(),
            self.ctx.num_blocks
        );
        Ok(())
    }

    fn setup_inputs(&mut self) -> CompileResult<()> {
        for (loc, var) in self.program.inputs.iter().enumerate() {
            if !(1..=4).contains(&var.components) {
                return Err(CompileError::invalid(format!(
                    "input {loc} has {} components",
                    var.components
                )));
            }
            let slot = match self.program.stage {
                Stage::Vertex => loc,
                Stage::Fragment => match var.semantic {
                    Semantic::Attribute(_)
                    | Semantic::PointSize
                    | Semantic::Color
                    | Semantic::Data(_)
                    | Semantic::Depth => {
                        return Err(CompileError::invalid(format!(
                            "{} is not a fragment input",
                            var.semantic
                        )));
                    }
                    Semantic::Position => {
                        let slot = self.ctx.linkage.slot_for(var.semantic, 4);
                        self.ctx.linkage.fragcoord = Some(slot as u8);
                        self.ctx.need_param = true;
                        slot
                    }
                    Semantic::Varying(_) => {
                        self.ctx.linkage.slot_for(var.semantic, var.components)
                    }
                },
            };
            self.input_map.push(slot);
        }
        self.param_input = self.ctx.linkage.inputs.len();
        Ok(())
    }

    // ---- registers and operands -------------------------------------------------

    fn update_range(&mut self, r: RegRef) {
        let depth = self.loop_depth;
        let persistent = matches!(r, RegRef::Reg(_));
        let last_blocks = &self.loop_last_block;
        let outer = self.loops.first().map(|&(first, after)| (first, after - 1));
        let reg = self.ctx.reg_mut(r);

        if !reg.initialized {
            reg.initialized = true;
            reg.loop_depth = depth;
        }

        if depth > reg.loop_depth {
            reg.free_at_block = Some(last_blocks[reg.loop_depth + 1]);
        } else {
            reg.loop_depth = depth;
            reg.free_at_block = None;
        }

        if !persistent {
            return;
        }
        // a loop may read a register before writing it, so the value crosses
        // the back edge of every enclosing loop
        if let Some((first, last)) = outer {
            reg.loop_span = Some(match reg.loop_span {
                Some((f, l)) => (f.min(first), l.max(last)),
                None => (first, last),
            });
        }
        if reg.loop_depth > 0 {
            reg.free_at_block = reg.loop_span.map(|(_, last)| last);
        }
    }

    fn value_ncomp(&self, value: Value) -> CompileResult<u8> {
        match value {
            Value::Ssa(id) => self
                .ssa_ncomp
                .get(&id)
                .copied()
                .ok_or_else(|| CompileError::invalid(format!("use of undefined value %{}", id.0))),
            Value::Reg(id) => self
                .program
                .registers
                .get(id.0 as usize)
                .copied()
                .ok_or_else(|| {
                    CompileError::invalid(format!("use of undeclared register r{}", id.0))
                }),
        }
    }

    fn constant(&mut self, values: &[u32]) -> CompileResult<Src> {
        let (entry, swizzle) = self.ctx.immediates.intern(values);
        let index = self.ctx.first_immediate + entry as u32;
        if index > MAX_CONST_INDEX {
            return Err(CompileError::ConstantBankOverflow { index });
        }
        Ok(Src::constant(index, swizzle))
    }

    fn splat_const(&mut self, value: f32) -> CompileResult<Src> {
        self.constant(&[value.to_bits()])
    }

    /// Source for `operand` before swizzle compression.
    fn make_src(&mut self, operand: &Operand) -> CompileResult<Src> {
        match operand.value {
            Value::Ssa(id) => {
                if let Some(values) = self.consts.get(&id) {
                    let values = values.clone();
                    let values: Vec<u32> = if operand.abs {
                        values.iter().map(|v| v & 0x7fff_ffff).collect()
                    } else {
                        values
                    };
                    return self.constant(&values);
                }
                match self.ssa_map.get(&id) {
                    Some(&idx) => Ok(Src::ssa(idx)),
                    None => Err(CompileError::invalid(format!("use of undefined value %{}", id.0))),
                }
            }
            Value::Reg(id) => {
                self.value_ncomp(operand.value)?;
                Ok(Src::reg(id.0 as usize, Swizzle::IDENTITY))
            }
        }
    }

    /// Source for an ALU operand, its swizzle compressed to the written components.
    fn alu_src(
        &mut self,
        operand: &Operand,
        write_mask: u8,
        input_size: Option<u8>,
    ) -> CompileResult<Src> {
        let ncomp = self.value_ncomp(operand.value)?;
        let mut src = self.make_src(operand)?;

        let mut swizzle = Swizzle::IDENTITY;
        let mut j = 0;
        for i in 0..4 {
            let used = match input_size {
                Some(n) => i < n as usize,
                None => write_mask & (1 << i) != 0,
            };
            if !used {
                continue;
            }
            let comp = operand.swizzle[i];
            if comp >= ncomp {
                return Err(CompileError::invalid(format!(
                    "swizzle reads component {comp} of a {ncomp}-component value"
                )));
            }
            swizzle.set(j, comp);
            j += 1;
        }

        src.swizzle = src.swizzle.select(swizzle);
        src.negate = operand.negate;
        // constant values already had abs folded in
        src.abs = operand.abs && src.kind != SrcKind::Const;
        Ok(src)
    }

    /// Like `alu_src`, but materializes constants into a move (fetch sources).
    fn alu_src_noconst(&mut self, operand: &Operand, ncomp: u8) -> CompileResult<Src> {
        let src = self.alu_src(operand, full_mask(ncomp), None)?;
        if src.kind != SrcKind::Const {
            return Ok(src);
        }
        let mov = self.emit_alu_op(
            VectorOp::Max,
            Some(ScalarOp::Max),
            vec![src],
            Dest::Ssa(Reg::with_components(ncomp)),
            full_mask(ncomp),
        )?;
        Ok(Src::ssa(mov))
    }

    // ---- instruction creation ---------------------------------------------------

    fn emit(
        &mut self,
        kind: InstrKind,
        mut srcs: Vec<Src>,
        dest: Dest,
        pred: Predicate,
    ) -> CompileResult<InstrIdx> {
        for i in 0..srcs.len() {
            if srcs[i].kind == SrcKind::Const && srcs[i].abs {
                srcs[i] = self.materialize_abs_const(srcs[i])?;
            }
        }
        for src in &srcs {
            if let Some(r) = src.reg_ref() {
                self.update_range(r);
            }
        }
        let idx = self.ctx.push_instr(self.block_idx, kind, srcs, dest, pred);
        let dest_ref = self.ctx.instrs[idx].dest_ref();
        self.update_range(dest_ref);
        Ok(idx)
    }

    /// Constant operands cannot carry abs; read them through a move instead.
    fn materialize_abs_const(&mut self, src: Src) -> CompileResult<Src> {
        let plain = Src { abs: false, negate: false, ..src };
        let mov = self.emit_alu_op(
            VectorOp::Max,
            Some(ScalarOp::Max),
            vec![plain],
            Dest::Ssa(Reg::with_components(4)),
            0xf,
        )?;
        Ok(Src {
            abs: true,
            negate: src.negate,
            ..Src::ssa(mov)
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_alu(
        &mut self,
        vector: Option<VectorOp>,
        scalar: Option<ScalarOp>,
        srcs: Vec<Src>,
        dest: Dest,
        write_mask: u8,
        saturate: bool,
        export: Option<u8>,
    ) -> CompileResult<InstrIdx> {
        let kind = InstrKind::Alu(AluInstr {
            vector,
            scalar,
            export,
            write_mask,
            saturate,
            scalar_lane_b: 0,
        });
        self.emit(kind, srcs, dest, self.pred)
    }

    fn emit_alu_op(
        &mut self,
        vector: VectorOp,
        scalar: Option<ScalarOp>,
        srcs: Vec<Src>,
        dest: Dest,
        write_mask: u8,
    ) -> CompileResult<InstrIdx> {
        self.emit_alu(Some(vector), scalar, srcs, dest, write_mask, false, None)
    }

    /// Scalar-only instruction executing regardless of the current predicate.
    fn emit_pred_scalar(&mut self, op: ScalarOp, src: Src) -> CompileResult<InstrIdx> {
        let kind = InstrKind::Alu(AluInstr {
            scalar: Some(op),
            write_mask: 1,
            ..Default::default()
        });
        self.emit(kind, vec![src], Dest::Ssa(Reg::with_components(1)), Predicate::Always)
    }

    fn new_temp_reg(&mut self, ncomp: u8) -> usize {
        self.ctx.regs.push(Reg::with_components(ncomp));
        self.ctx.regs.len() - 1
    }

    fn define(&mut self, id: SsaId, idx: InstrIdx, ncomp: u8) -> CompileResult<()> {
        if self.ssa_ncomp.insert(id, ncomp).is_some() {
            return Err(CompileError::invalid(format!("value %{} defined twice", id.0)));
        }
        self.ssa_map.insert(id, idx);
        Ok(())
    }

    // ---- control flow -----------------------------------------------------------

    fn open_block(&mut self) {
        self.block_idx = self.next_block;
        self.next_block += 1;
    }

    /// End the current block, jumping when it has a break/continue or when its
    /// successor lies behind it.
    fn close_block(&mut self, successor: Option<usize>) -> CompileResult<()> {
        let cur = self.block_idx;
        let target = match self.block_jump[cur] {
            Some(target) => Some(target),
            None => successor.filter(|succ| *succ <= cur),
        };
        if let Some(target_block) = target {
            self.emit(
                InstrKind::ControlFlow { target_block },
                Vec::new(),
                Dest::Ssa(Reg::default()),
                self.pred,
            )?;
        }
        Ok(())
    }

    fn emit_cf_list(&mut self, list: &'a [CfNode], successor: Option<usize>) -> CompileResult<()> {
        self.open_block();
        for node in list {
            match node {
                CfNode::Block(block) => {
                    for instr in &block.instrs {
                        self.emit_instr(instr)?;
                    }
                }
                CfNode::If(node) => self.emit_if(node)?,
                CfNode::Loop(node) => self.emit_loop(node)?,
            }
        }
        self.close_block(successor)
    }

    fn emit_if(&mut self, node: &'a IfNode) -> CompileResult<()> {
        let saved_pred = self.pred;
        let cond = self.alu_src(&node.condition, 1, None)?;

        let pred_set = match self.pred_idx.filter(|_| saved_pred.is_predicated()) {
            Some(outer) => {
                let kind = InstrKind::Alu(AluInstr {
                    vector: Some(VectorOp::PredSetNePush),
                    write_mask: 1,
                    ..Default::default()
                });
                let srcs = vec![
                    Src::ssa(outer).with_swizzle(Swizzle::X),
                    cond.with_swizzle(cond.swizzle.select(Swizzle::X)),
                ];
                self.emit(kind, srcs, Dest::Ssa(Reg::with_components(1)), Predicate::Always)?
            }
            None => self.emit_pred_scalar(ScalarOp::PredSetNe, cond)?,
        };
        self.pred_idx = Some(pred_set);
        self.close_block(Some(self.block_idx + 1))?;

        let after = self.next_block
            + Program::count_blocks(&node.then_list)
            + Program::count_blocks(&node.else_list);

        self.pred = Predicate::IfTrue;
        self.emit_cf_list(&node.then_list, Some(after))?;

        let inv = self.emit_pred_scalar(ScalarOp::PredSetInv, Src::ssa(pred_set))?;
        self.pred_idx = Some(inv);
        self.emit_cf_list(&node.else_list, Some(after))?;

        if saved_pred.is_predicated() {
            let pop = self.emit_pred_scalar(ScalarOp::PredSetPop, Src::ssa(inv))?;
            self.pred_idx = Some(pop);
        }

        self.pred = saved_pred;
        self.open_block();
        Ok(())
    }

    fn emit_loop(&mut self, node: &'a LoopNode) -> CompileResult<()> {
        self.close_block(Some(self.block_idx + 1))?;

        let first = self.next_block;
        let blocks = Program::count_blocks(&node.body);
        self.loop_depth += 1;
        if self.loop_last_block.len() <= self.loop_depth {
            self.loop_last_block.push(0);
        }
        self.loop_last_block[self.loop_depth] = first + blocks - 1;
        self.loops.push((first, first + blocks));

        self.emit_cf_list(&node.body, Some(first))?;

        self.loops.pop();
        self.loop_depth -= 1;
        self.open_block();
        Ok(())
    }

    // ---- instructions -----------------------------------------------------------

    fn emit_instr(&mut self, instr: &shader::Instr) -> CompileResult<()> {
        if self.block_jump[self.block_idx].is_some() {
            return Err(CompileError::invalid("instruction after break/continue"));
        }

        match instr {
            shader::Instr::Alu {
                op,
                dest,
                srcs,
                saturate,
            } => self.emit_alu_instr(*op, dest, srcs, *saturate),
            shader::Instr::LoadConst { dest, values } => {
                if values.is_empty() || values.len() > 4 {
                    return Err(CompileError::invalid("constant must have 1 to 4 values"));
                }
                if self.ssa_ncomp.insert(*dest, values.len() as u8).is_some() {
                    return Err(CompileError::invalid(format!("value %{} defined twice", dest.0)));
                }
                self.consts
                    .insert(*dest, values.iter().map(|v| v.to_bits()).collect());
                Ok(())
            }
            shader::Instr::LoadInput {
                dest,
                components,
                location,
            } => self.emit_load_input(*dest, *components, *location),
            shader::Instr::LoadUniform {
                dest,
                components,
                index,
            } => {
                if *index > MAX_CONST_INDEX {
                    return Err(CompileError::ConstantBankOverflow { index: *index });
                }
                let ncomp = *components;
                let idx = self.emit_alu_op(
                    VectorOp::Max,
                    Some(ScalarOp::Max),
                    vec![Src::constant(*index, Swizzle::IDENTITY)],
                    Dest::Ssa(Reg::with_components(ncomp)),
                    full_mask(ncomp),
                )?;
                self.define(*dest, idx, ncomp)
            }
            shader::Instr::LoadFrontFace { dest } => self.emit_front_face(*dest),
            shader::Instr::LoadPointCoord { dest } => {
                self.require_fragment("point coordinate")?;
                self.ctx.need_param = true;
                self.ctx.input_reg(self.param_input);
                let src = Src::input(self.param_input, Swizzle::from_components([2, 3, 3, 3]));
                let idx = self.emit_alu_op(
                    VectorOp::Max,
                    Some(ScalarOp::Max),
                    vec![src],
                    Dest::Ssa(Reg::with_components(2)),
                    0b11,
                )?;
                self.define(*dest, idx, 2)
            }
            shader::Instr::StoreOutput {
                semantic,
                src,
                components,
            } => self.emit_store_output(*semantic, src, *components),
            shader::Instr::Discard => {
                self.require_fragment("discard")?;
                let zero = self.splat_const(0.0)?;
                self.emit_kill(ScalarOp::KillE, zero)
            }
            shader::Instr::DiscardIf { cond } => {
                self.require_fragment("discard")?;
                let cond = self.alu_src(cond, 1, None)?;
                self.emit_kill(ScalarOp::KillNe, cond)
            }
            shader::Instr::Tex {
                dest,
                components,
                op,
                dim,
                coord,
                lod_bias,
                sampler,
            } => self.emit_tex(*dest, *components, *op, *dim, coord, lod_bias.as_ref(), *sampler),
            shader::Instr::Jump(kind) => {
                let Some(&(first, after)) = self.loops.last() else {
                    return Err(CompileError::invalid("break/continue outside of a loop"));
                };
                self.block_jump[self.block_idx] = Some(match kind {
                    JumpKind::Break => after,
                    JumpKind::Continue => first,
                });
                Ok(())
            }
        }
    }

    fn require_fragment(&self, what: &str) -> CompileResult<()> {
        if self.ctx.stage == Stage::Fragment {
            Ok(())
        } else {
            Err(CompileError::unsupported(format!("{what} in a vertex shader")))
        }
    }

    fn emit_alu_instr(
        &mut self,
        op: AluOp,
        dest: &shader::Dest,
        operands: &[Operand],
        saturate: bool,
    ) -> CompileResult<()> {
        if operands.len() != op.num_inputs() {
            return Err(CompileError::invalid(format!(
                "{op} takes {} operands, got {}",
                op.num_inputs(),
                operands.len()
            )));
        }

        let (ncomp, write_mask, ir_dest) = match *dest {
            shader::Dest::Ssa { components, .. } => {
                if !(1..=4).contains(&components) {
                    return Err(CompileError::invalid(format!(
                        "{op} result has {components} components"
                    )));
                }
                (components, full_mask(components), Dest::Ssa(Reg::with_components(components)))
            }
            shader::Dest::Reg { id, write_mask } => {
                let reg_ncomp = self.value_ncomp(Value::Reg(id))?;
                if write_mask == 0 || write_mask & !full_mask(reg_ncomp) != 0 {
                    return Err(CompileError::invalid(format!(
                        "write mask {write_mask:#x} does not fit register r{}",
                        id.0
                    )));
                }
                (write_mask.count_ones() as u8, write_mask, Dest::Reg(id.0 as usize))
            }
        };

        let (vector, scalar) = alu_opcodes(op);
        if vector.is_none() && ncomp > 1 {
            return self.emit_scalarized(op, dest, &operands[0], write_mask, saturate);
        }

        let mut srcs = Vec::with_capacity(3);
        for operand in operands {
            srcs.push(self.alu_src(operand, write_mask, op.input_size())?);
        }

        let mut saturate = saturate;
        match op {
            AluOp::Fneg => srcs[0].negate = !srcs[0].negate,
            AluOp::Fabs => {
                srcs[0].abs = true;
                srcs[0].negate = false;
            }
            AluOp::Fsat => saturate = true,
            AluOp::Fsub => srcs[1].negate = !srcs[1].negate,
            AluOp::Slt => srcs.swap(0, 1),
            AluOp::Fcsel => srcs.swap(1, 2),
            AluOp::Fdot2 => srcs.push(self.splat_const(0.0)?),
            AluOp::Fsign => {
                // tmp = x == 0 ? 0 : 1; result = x >= 0 ? tmp : -tmp
                let zero = self.splat_const(0.0)?;
                let one = self.splat_const(1.0)?;
                let tmp = self.emit_alu(
                    Some(VectorOp::CndE),
                    None,
                    vec![srcs[0], zero, one],
                    Dest::Ssa(Reg::with_components(ncomp)),
                    full_mask(ncomp),
                    false,
                    None,
                )?;
                srcs.push(Src::ssa(tmp));
                srcs.push(Src::ssa(tmp).negated());
            }
            _ => {}
        }

        let idx = self.emit_alu(vector, scalar, srcs, ir_dest, write_mask, saturate, None)?;
        if let shader::Dest::Ssa { id, components } = *dest {
            self.define(id, idx, components)?;
        }
        Ok(())
    }

    /// Scalar-only op on a vector: one scalar instruction per component.
    fn emit_scalarized(
        &mut self,
        op: AluOp,
        dest: &shader::Dest,
        operand: &Operand,
        write_mask: u8,
        saturate: bool,
    ) -> CompileResult<()> {
        let (_, scalar) = alu_opcodes(op);
        let (reg, ssa) = match *dest {
            shader::Dest::Reg { id, .. } => (id.0 as usize, None),
            shader::Dest::Ssa { id, components } => {
                (self.new_temp_reg(components), Some((id, components)))
            }
        };

        for i in 0..4 {
            if write_mask & (1 << i) == 0 {
                continue;
            }
            let src = self.alu_src(operand, 1 << i, None)?;
            self.emit_alu(None, scalar, vec![src], Dest::Reg(reg), 1 << i, saturate, None)?;
        }

        if let Some((id, ncomp)) = ssa {
            let idx = self.emit_alu_op(
                VectorOp::Max,
                Some(ScalarOp::Max),
                vec![Src::reg(reg, Swizzle::IDENTITY)],
                Dest::Ssa(Reg::with_components(ncomp)),
                full_mask(ncomp),
            )?;
            self.define(id, idx, ncomp)?;
        }
        Ok(())
    }

    fn emit_load_input(&mut self, dest: SsaId, ncomp: u8, location: u32) -> CompileResult<()> {
        let loc = location as usize;
        let Some(var) = self.program.inputs.get(loc) else {
            return Err(CompileError::invalid(format!("input location {location} not declared")));
        };
        if !(1..=4).contains(&ncomp) {
            return Err(CompileError::invalid(format!("input load of {ncomp} components")));
        }

        if self.ctx.stage == Stage::Vertex {
            let const_idx = VERTEX_FETCH_CONST_BASE + location / 3;
            if const_idx > 31 {
                return Err(CompileError::unsupported(format!("vertex attribute {location}")));
            }
            self.ctx.input_reg(0);
            let idx = self.emit(
                InstrKind::Fetch(FetchKind::Vertex {
                    const_idx: const_idx as u8,
                    const_idx_sel: (location % 3) as u8,
                }),
                vec![Src::input(0, Swizzle::IDENTITY)],
                Dest::Ssa(Reg::with_components(ncomp)),
                self.pred,
            )?;
            return self.define(dest, idx, ncomp);
        }

        let slot = self.input_map[loc];
        let src = if var.semantic == Semantic::Position {
            self.fragcoord(slot)?
        } else {
            self.ctx.input_reg(slot);
            Src::input(slot, Swizzle::IDENTITY)
        };
        let idx = self.emit_alu_op(
            VectorOp::Max,
            Some(ScalarOp::Max),
            vec![src],
            Dest::Ssa(Reg::with_components(ncomp)),
            full_mask(ncomp),
        )?;
        self.define(dest, idx, ncomp)
    }

    /// Builds fragcoord in a temporary: xy from |param.xy| (plus the tile offset on
    /// a20x), z from the fragcoord varying, w as the reciprocal of its y.
    fn fragcoord(&mut self, slot: usize) -> CompileResult<Src> {
        self.ctx.input_reg(slot);
        self.ctx.input_reg(self.param_input);
        let reg = self.new_temp_reg(4);
        let param = Src::input(self.param_input, Swizzle::IDENTITY).absolute();

        if self.ctx.options.a20x {
            let offset = Src::constant(CONST_TILE_OFFSET, Swizzle::IDENTITY);
            self.emit_alu(
                Some(VectorOp::Add),
                Some(ScalarOp::Add),
                vec![param, offset],
                Dest::Reg(reg),
                0b0011,
                false,
                None,
            )?;
        } else {
            let max = Some(ScalarOp::Max);
            self.emit_alu_op(VectorOp::Max, max, vec![param], Dest::Reg(reg), 0b0011)?;
        }
        self.emit_alu_op(
            VectorOp::Max,
            Some(ScalarOp::Max),
            vec![Src::input(slot, Swizzle::IDENTITY)],
            Dest::Reg(reg),
            0b0100,
        )?;
        self.emit_alu(
            None,
            Some(ScalarOp::RecipIeee),
            vec![Src::input(slot, Swizzle::Y)],
            Dest::Reg(reg),
            0b1000,
            false,
            None,
        )?;
        Ok(Src::reg(reg, Swizzle::IDENTITY))
    }

    fn emit_front_face(&mut self, dest: SsaId) -> CompileResult<()> {
        self.require_fragment("front facing")?;
        self.ctx.need_param = true;
        self.ctx.input_reg(self.param_input);

        // facing is the sign of param.x; the reciprocal separates -0.0 from +0.0
        let rcp = self.emit_alu(
            None,
            Some(ScalarOp::RecipIeee),
            vec![Src::input(self.param_input, Swizzle::IDENTITY)],
            Dest::Ssa(Reg::with_components(1)),
            1,
            false,
            None,
        )?;
        let zero = self.splat_const(0.0)?;
        let idx = self.emit_alu_op(
            VectorOp::SetGte,
            None,
            vec![Src::ssa(rcp), zero],
            Dest::Ssa(Reg::with_components(1)),
            1,
        )?;
        self.define(dest, idx, 1)
    }

    fn emit_kill(&mut self, op: ScalarOp, src: Src) -> CompileResult<()> {
        self.ctx.has_kill = true;
        let dest = Dest::Ssa(Reg::with_components(1));
        self.emit_alu(None, Some(op), vec![src], dest, 1, false, None)?;
        Ok(())
    }

    fn emit_store_output(
        &mut self,
        semantic: Semantic,
        operand: &Operand,
        ncomp: u8,
    ) -> CompileResult<()> {
        if !(1..=4).contains(&ncomp) {
            return Err(CompileError::invalid(format!("output {semantic} with {ncomp} components")));
        }

        let export = match (self.ctx.stage, semantic) {
            (Stage::Fragment, Semantic::Depth) => {
                return Err(CompileError::unsupported("fragment depth output"));
            }
            (Stage::Fragment, Semantic::Color | Semantic::Data(0)) => EXPORT_COLOR,
            (Stage::Fragment, _) => {
                log::debug!("dropping unused fragment output {semantic}");
                return Ok(());
            }
            (Stage::Vertex, Semantic::Position) => EXPORT_POSITION,
            (Stage::Vertex, Semantic::PointSize) => {
                self.ctx.writes_psize = true;
                EXPORT_POINT_SIZE
            }
            (Stage::Vertex, _) => match self.ctx.linkage.find(semantic) {
                Some(slot) => slot as u8,
                None => {
                    log::debug!(
                        "dropping vertex output {semantic} not read by the fragment shader"
                    );
                    return Ok(());
                }
            },
        };

        let src = self.alu_src(operand, full_mask(ncomp), None)?;
        if export == EXPORT_POSITION {
            self.position = Some(src);
        }
        self.emit_alu(
            Some(VectorOp::Max),
            Some(ScalarOp::Max),
            vec![src],
            Dest::Ssa(Reg::with_components(ncomp)),
            full_mask(ncomp),
            false,
            Some(export),
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_tex(
        &mut self,
        dest: SsaId,
        ncomp: u8,
        op: TexOp,
        dim: SamplerDim,
        coord: &Operand,
        lod_bias: Option<&Operand>,
        sampler: u32,
    ) -> CompileResult<()> {
        let (is_cube, is_rect) = match dim {
            SamplerDim::Dim2D | SamplerDim::External => (false, false),
            SamplerDim::Rect => (false, true),
            SamplerDim::Cube => (true, false),
            SamplerDim::Dim3D => return Err(CompileError::unsupported("3D textures")),
        };
        match (op, lod_bias) {
            (TexOp::Fetch, _) => return Err(CompileError::unsupported("texel fetch")),
            (TexOp::Bias | TexOp::Lod, None) => {
                return Err(CompileError::invalid("texture bias/lod without an operand"));
            }
            _ => {}
        }
        if sampler > 31 {
            return Err(CompileError::unsupported(format!("sampler {sampler}")));
        }
        if !(1..=4).contains(&ncomp) {
            return Err(CompileError::invalid(format!("texture result with {ncomp} components")));
        }

        let coord_ncomp = if is_cube { 3 } else { 2 };
        let mut coord = self.alu_src_noconst(coord, coord_ncomp)?;

        if is_cube {
            coord = self.cube_coord(coord)?;
        }

        let mut srcs = vec![coord];
        if let Some(lod) = lod_bias {
            let lod = self.alu_src_noconst(lod, 1)?;
            srcs.push(lod.with_swizzle(lod.swizzle.select(Swizzle::X)));
        }

        let idx = self.emit(
            InstrKind::Fetch(FetchKind::Texture {
                sampler: sampler as u8,
                is_cube,
                is_rect,
            }),
            srcs,
            Dest::Ssa(Reg::with_components(ncomp)),
            self.pred,
        )?;
        self.define(dest, idx, ncomp)
    }

    /// CUBE + rcp(|ma|) + ffma(t, rcp, 1.5) into a temporary, read as yxw.
    fn cube_coord(&mut self, coord: Src) -> CompileResult<Src> {
        let reg = self.new_temp_reg(4);
        let zzxy = Swizzle::from_components([2, 2, 0, 1]);
        let yxzz = Swizzle::from_components([1, 0, 2, 2]);
        self.emit_alu_op(
            VectorOp::Cube,
            None,
            vec![
                coord.with_swizzle(coord.swizzle.select(zzxy)),
                coord.with_swizzle(coord.swizzle.select(yxzz)),
            ],
            Dest::Reg(reg),
            0b1111,
        )?;

        let rcp = self.emit_alu(
            None,
            Some(ScalarOp::RecipIeee),
            vec![Src::reg(reg, Swizzle::Z).absolute()],
            Dest::Ssa(Reg::with_components(1)),
            1,
            false,
            None,
        )?;

        let bias = self.splat_const(1.5)?;
        self.emit_alu_op(
            VectorOp::MulAdd,
            None,
            vec![
                Src::reg(reg, Swizzle::IDENTITY),
                Src::ssa(rcp).with_swizzle(Swizzle::X),
                bias,
            ],
            Dest::Reg(reg),
            0b0011,
        )?;

        Ok(Src::reg(reg, Swizzle::from_components([1, 0, 3, 3])))
    }

    /// Vertex-stage exports derived from the position: window coordinates for
    /// fragcoord, and the per-tile memory exports of the binning pass.
    fn extra_position_exports(&mut self) -> CompileResult<()> {
        let binning = self.ctx.binning;
        let fragcoord = self.ctx.linkage.fragcoord.filter(|_| !binning);
        if fragcoord.is_none() && !binning {
            return Ok(());
        }
        let Some(position) = self.position else {
            log::warn!("vertex shader does not write position");
            return Ok(());
        };
        let pos_w = position.with_swizzle(position.swizzle.select(Swizzle::W));

        let zero = self.splat_const(0.0)?;
        let w = self.emit_alu(
            Some(VectorOp::Max),
            Some(ScalarOp::Max),
            vec![pos_w, zero],
            Dest::Ssa(Reg::with_components(1)),
            1,
            false,
            None,
        )?;
        let rcp = self.emit_alu(
            None,
            Some(ScalarOp::RecipIeee),
            vec![Src::ssa(w)],
            Dest::Ssa(Reg::with_components(1)),
            1,
            false,
            None,
        )?;
        let viewport = Src::constant(CONST_VIEWPORT, Swizzle::IDENTITY);
        let sc = self.emit_alu_op(
            VectorOp::Mul,
            Some(ScalarOp::Mul),
            vec![viewport, Src::ssa(rcp).with_swizzle(Swizzle::X)],
            Dest::Ssa(Reg::with_components(4)),
            0xf,
        )?;
        let wincoord = self.emit_alu_op(
            VectorOp::MulAdd,
            None,
            vec![viewport, position, Src::ssa(sc)],
            Dest::Ssa(Reg::with_components(4)),
            0xf,
        )?;

        if let Some(slot) = fragcoord {
            self.emit_alu(
                Some(VectorOp::Max),
                Some(ScalarOp::Max),
                vec![Src::ssa(wincoord).with_swizzle(Swizzle::Z)],
                Dest::Ssa(Reg::with_components(1)),
                0b0001,
                false,
                Some(slot),
            )?;
            self.emit_alu(
                Some(VectorOp::Max),
                Some(ScalarOp::Max),
                vec![pos_w],
                Dest::Ssa(Reg::with_components(1)),
                0b0010,
                false,
                Some(slot),
            )?;
        }

        if !binning {
            return Ok(());
        }

        self.ctx.input_reg(INPUT_BIN_OFFSET);
        let off = self.emit_alu_op(
            VectorOp::Add,
            Some(ScalarOp::Add),
            vec![
                Src::constant(CONST_TILE_OFFSET, Swizzle::IDENTITY),
                Src::input(INPUT_BIN_OFFSET, Swizzle::IDENTITY),
            ],
            Dest::Ssa(Reg::with_components(1)),
            1,
        )?;

        let wyww = Swizzle::from_components([3, 1, 3, 3]);
        for i in 0..MAX_BIN_TILES as u32 {
            self.emit_alu(
                Some(VectorOp::MulAdd),
                None,
                vec![
                    Src::constant(CONST_BIN_SELECT, wyww),
                    Src::ssa(off).with_swizzle(Swizzle::X),
                    Src::constant(CONST_BIN_BASE + i, Swizzle::IDENTITY),
                ],
                Dest::Ssa(Reg::with_components(4)),
                0xf,
                false,
                Some(EXPORT_MEMORY_ADDR),
            )?;
            self.emit_alu(
                Some(VectorOp::MulAdd),
                None,
                vec![
                    Src::constant(CONST_BIN_SCALE + 1 + i * 2, Swizzle::IDENTITY),
                    Src::ssa(wincoord),
                    Src::constant(CONST_BIN_SCALE + i * 2, Swizzle::IDENTITY),
                ],
                Dest::Ssa(Reg::with_components(4)),
                0xf,
                false,
                Some(EXPORT_MEMORY_DATA),
            )?;
        }
        Ok(())
    }
}
