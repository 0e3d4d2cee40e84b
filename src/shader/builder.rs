//! Incremental construction of [`Program`]s.
//!
//! `ProgramBuilder` hands out fresh SSA ids and keeps a stack of open control-flow
//! lists, so callers write programs top to bottom with `push_if` / `push_else` /
//! `pop_if` and `push_loop` / `pop_loop` brackets.

use super::*;
use crate::core::{CompileError, CompileResult};

enum Frame {
    Root(Vec<CfNode>),
    Then {
        condition: Operand,
        list: Vec<CfNode>,
    },
    Else {
        condition: Operand,
        then_list: Vec<CfNode>,
        list: Vec<CfNode>,
    },
    Loop(Vec<CfNode>),
}

impl Frame {
    fn list(&mut self) -> &mut Vec<CfNode> {
        match self {
            Frame::Root(list)
            | Frame::Then { list, .. }
            | Frame::Else { list, .. }
            | Frame::Loop(list) => list,
        }
    }
}

pub struct ProgramBuilder {
    program: Program,
    stack: Vec<Frame>,
    next_ssa: u32,
}

impl ProgramBuilder {
    pub fn new(stage: Stage) -> Self {
        Self {
            program: Program::new(stage),
            stack: vec![Frame::Root(Vec::new())],
            next_ssa: 0,
        }
    }

    pub fn stage(&self) -> Stage {
        self.program.stage
    }

    pub fn set_uniforms(&mut self, count: u32) {
        self.program.num_uniforms = count;
    }

    /// Declare the next input location.
    pub fn input(&mut self, semantic: Semantic, components: u8) -> u32 {
        self.program.inputs.push(Variable {
            semantic,
            components,
        });
        (self.program.inputs.len() - 1) as u32
    }

    pub fn input_components(&self, location: u32) -> Option<u8> {
        self.program
            .inputs
            .get(location as usize)
            .map(|var| var.components)
    }

    /// Declare a non-SSA register.
    pub fn reg(&mut self, components: u8) -> RegId {
        self.program.registers.push(components);
        RegId((self.program.registers.len() - 1) as u32)
    }

    pub fn reg_components(&self, reg: RegId) -> Option<u8> {
        self.program.registers.get(reg.0 as usize).copied()
    }

    fn fresh(&mut self) -> SsaId {
        let id = SsaId(self.next_ssa);
        self.next_ssa += 1;
        id
    }

    pub fn emit(&mut self, instr: Instr) {
        let list = match self.stack.last_mut() {
            Some(frame) => frame.list(),
            None => return,
        };
        match list.last_mut() {
            Some(CfNode::Block(block)) => block.instrs.push(instr),
            _ => list.push(CfNode::Block(Block {
                instrs: vec![instr],
            })),
        }
    }

    pub fn load_input(&mut self, location: u32) -> SsaId {
        let components = self.input_components(location).unwrap_or(4);
        let dest = self.fresh();
        self.emit(Instr::LoadInput {
            dest,
            components,
            location,
        });
        dest
    }

    pub fn load_uniform(&mut self, index: u32, components: u8) -> SsaId {
        let dest = self.fresh();
        self.emit(Instr::LoadUniform {
            dest,
            components,
            index,
        });
        dest
    }

    pub fn constant(&mut self, values: &[f32]) -> SsaId {
        let dest = self.fresh();
        self.emit(Instr::LoadConst {
            dest,
            values: values.to_vec(),
        });
        dest
    }

    pub fn front_face(&mut self) -> SsaId {
        let dest = self.fresh();
        self.emit(Instr::LoadFrontFace { dest });
        dest
    }

    pub fn point_coord(&mut self) -> SsaId {
        let dest = self.fresh();
        self.emit(Instr::LoadPointCoord { dest });
        dest
    }

    pub fn alu(&mut self, op: AluOp, components: u8, srcs: &[Operand]) -> SsaId {
        self.alu_full(op, components, srcs, false)
    }

    pub fn alu_full(
        &mut self,
        op: AluOp,
        components: u8,
        srcs: &[Operand],
        saturate: bool,
    ) -> SsaId {
        let id = self.fresh();
        self.emit(Instr::Alu {
            op,
            dest: Dest::Ssa { id, components },
            srcs: srcs.to_vec(),
            saturate,
        });
        id
    }

    pub fn alu_to_reg(&mut self, op: AluOp, reg: RegId, write_mask: u8, srcs: &[Operand]) {
        self.emit(Instr::Alu {
            op,
            dest: Dest::Reg { id: reg, write_mask },
            srcs: srcs.to_vec(),
            saturate: false,
        });
    }

    pub fn store(&mut self, semantic: Semantic, src: Operand, components: u8) {
        self.emit(Instr::StoreOutput {
            semantic,
            src,
            components,
        });
    }

    pub fn discard(&mut self) {
        self.emit(Instr::Discard);
    }

    pub fn discard_if(&mut self, cond: Operand) {
        self.emit(Instr::DiscardIf { cond });
    }

    pub fn tex(&mut self, dim: SamplerDim, sampler: u32, coord: Operand) -> SsaId {
        self.tex_full(TexOp::Tex, dim, sampler, coord, None)
    }

    pub fn tex_full(
        &mut self,
        op: TexOp,
        dim: SamplerDim,
        sampler: u32,
        coord: Operand,
        lod_bias: Option<Operand>,
    ) -> SsaId {
        let dest = self.fresh();
        self.emit(Instr::Tex {
            dest,
            components: 4,
            op,
            dim,
            coord,
            lod_bias,
            sampler,
        });
        dest
    }

    pub fn jump(&mut self, kind: JumpKind) {
        self.emit(Instr::Jump(kind));
    }

    pub fn push_if(&mut self, condition: Operand) {
        self.stack.push(Frame::Then {
            condition,
            list: Vec::new(),
        });
    }

    pub fn push_else(&mut self) -> CompileResult<()> {
        match self.stack.pop() {
            Some(Frame::Then { condition, list }) => {
                self.stack.push(Frame::Else {
                    condition,
                    then_list: list,
                    list: Vec::new(),
                });
                Ok(())
            }
            other => {
                self.restore(other);
                Err(CompileError::invalid("else without matching if"))
            }
        }
    }

    pub fn pop_if(&mut self) -> CompileResult<()> {
        let node = match self.stack.pop() {
            Some(Frame::Then { condition, list }) => IfNode {
                condition,
                then_list: list,
                else_list: Vec::new(),
            },
            Some(Frame::Else {
                condition,
                then_list,
                list,
            }) => IfNode {
                condition,
                then_list,
                else_list: list,
            },
            other => {
                self.restore(other);
                return Err(CompileError::invalid("end of if without matching if"));
            }
        };
        self.push_node(CfNode::If(node));
        Ok(())
    }

    pub fn push_loop(&mut self) {
        self.stack.push(Frame::Loop(Vec::new()));
    }

    pub fn pop_loop(&mut self) -> CompileResult<()> {
        match self.stack.pop() {
            Some(Frame::Loop(body)) => {
                self.push_node(CfNode::Loop(LoopNode { body }));
                Ok(())
            }
            other => {
                self.restore(other);
                Err(CompileError::invalid("end of loop without matching loop"))
            }
        }
    }

    fn restore(&mut self, frame: Option<Frame>) {
        if let Some(frame) = frame {
            self.stack.push(frame);
        }
    }

    fn push_node(&mut self, node: CfNode) {
        if let Some(frame) = self.stack.last_mut() {
            frame.list().push(node);
        }
    }

    pub fn finish(mut self) -> CompileResult<Program> {
        match (self.stack.pop(), self.stack.is_empty()) {
            (Some(Frame::Root(body)), true) => {
                self.program.body = body;
                Ok(self.program)
            }
            _ => Err(CompileError::invalid("unterminated if or loop")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_straight_line_program() {
        let mut b = ProgramBuilder::new(Stage::Fragment);
        let loc = b.input(Semantic::Varying(0), 4);
        let v = b.load_input(loc);
        b.store(Semantic::Color, v.into(), 4);
        let program = b.finish().unwrap();

        assert_eq!(program.inputs.len(), 1);
        assert_eq!(program.body.len(), 1);
        match &program.body[0] {
            CfNode::Block(block) => assert_eq!(block.instrs.len(), 2),
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[test]
    fn test_nested_control_flow() {
        let mut b = ProgramBuilder::new(Stage::Fragment);
        let c = b.constant(&[1.0]);
        b.push_loop();
        b.push_if(c.into());
        b.jump(JumpKind::Break);
        b.push_else().unwrap();
        b.jump(JumpKind::Continue);
        b.pop_if().unwrap();
        b.pop_loop().unwrap();
        let program = b.finish().unwrap();

        assert_eq!(program.body.len(), 2);
        let CfNode::Loop(lp) = &program.body[1] else {
            panic!("expected loop");
        };
        let CfNode::If(node) = &lp.body[0] else {
            panic!("expected if");
        };
        assert_eq!(node.then_list.len(), 1);
        assert_eq!(node.else_list.len(), 1);
        assert_eq!(program.num_blocks(), 6);
    }

    #[test]
    fn test_unbalanced_brackets() {
        let mut b = ProgramBuilder::new(Stage::Vertex);
        assert!(b.pop_loop().is_err());
        assert!(b.push_else().is_err());
        b.push_loop();
        assert!(b.pop_if().is_err());
        assert!(b.finish().is_err());
    }
}
