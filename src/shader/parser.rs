//! Text format parser for shader programs.
//!
//! The format is what the CLI and the integration tests feed the compiler:
//!
//! ```text
//! fragment                    ; stage
//! uniforms 4
//! input varying(0) 4          ; next input location
//! reg r0 4                    ; non-SSA register
//! %t = load_input 0
//! %c = const 1.0, 0.5
//! %s:4 = fmul %t, -|%c.xyxy|
//! r0.xy = fadd %s, %c
//! if %t.x {
//!   discard
//! } else {
//!   %x = tex 2d sampler 0 %c.xy bias %c.x
//! }
//! store color r0.xyyy
//! ```
//!
//! Component counts on `%v:N` definitions are optional for everything except
//! uniform loads; they default to the width of the first operand.

use super::*;
use hashbrown::HashMap;
use thiserror::Error;

use crate::ir::swizzle::parse_components;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

pub fn parse_program(text: &str) -> Result<Program, ParseError> {
    Parser::new(text).parse()
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    line: usize,
    builder: Option<ProgramBuilder>,

    values: HashMap<&'a str, (SsaId, u8)>,
    regs: HashMap<&'a str, (RegId, u8)>,
}

type PResult<T> = Result<T, ParseError>;

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            line: 1,
            builder: None,
            values: HashMap::new(),
            regs: HashMap::new(),
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> PResult<T> {
        Err(ParseError {
            line: self.line,
            message: message.into(),
        })
    }

    fn parse(mut self) -> PResult<Program> {
        self.skip_whitespace();
        let stage = match self.read_identifier() {
            Some("vertex") => Stage::Vertex,
            Some("fragment") => Stage::Fragment,
            _ => return self.error("expected 'vertex' or 'fragment'"),
        };
        self.builder = Some(ProgramBuilder::new(stage));

        self.skip_whitespace();
        while !self.is_eof() {
            self.parse_statement()?;
            self.skip_whitespace();
        }

        let line = self.line;
        match self.builder.take() {
            Some(builder) => builder.finish().map_err(|e| ParseError {
                line,
                message: e.to_string(),
            }),
            None => self.error("missing stage"),
        }
    }

    fn builder(&mut self) -> &mut ProgramBuilder {
        // set right after the stage line, before any statement is parsed
        self.builder.get_or_insert_with(|| ProgramBuilder::new(Stage::Fragment))
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn bump(&mut self) {
        if self.peek() == Some(b'\n') {
            self.line += 1;
        }
        self.pos += 1;
    }

    /// Skip spaces, newlines and `;` comments.
    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c == b';' {
                while self.peek().is_some_and(|c| c != b'\n') {
                    self.bump();
                }
            } else if c.is_ascii_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    /// Skip spaces within the current line.
    fn skip_blanks(&mut self) {
        while self.peek().is_some_and(|c| c == b' ' || c == b'\t') {
            self.bump();
        }
    }

    fn try_consume(&mut self, c: u8) -> bool {
        self.skip_blanks();
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: u8) -> PResult<()> {
        if self.try_consume(c) {
            Ok(())
        } else {
            self.error(format!("expected '{}'", c as char))
        }
    }

    fn read_identifier(&mut self) -> Option<&'a str> {
        self.skip_blanks();
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
        {
            self.bump();
        }
        if start == self.pos {
            None
        } else {
            Some(&self.text[start..self.pos])
        }
    }

    fn expect_identifier(&mut self, what: &str) -> PResult<&'a str> {
        match self.read_identifier() {
            Some(ident) => Ok(ident),
            None => self.error(format!("expected {what}")),
        }
    }

    fn read_int(&mut self) -> PResult<u32> {
        self.skip_blanks();
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        match self.text[start..self.pos].parse() {
            Ok(n) => Ok(n),
            Err(_) => self.error("expected integer"),
        }
    }

    fn read_float(&mut self) -> PResult<f32> {
        self.skip_blanks();
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, b'.' | b'-' | b'+' | b'e' | b'E'))
        {
            self.bump();
        }
        match self.text[start..self.pos].parse() {
            Ok(v) => Ok(v),
            Err(_) => self.error(format!("invalid float '{}'", &self.text[start..self.pos])),
        }
    }

    fn read_components(&mut self) -> PResult<u8> {
        let n = self.read_int()?;
        if (1..=4).contains(&n) {
            Ok(n as u8)
        } else {
            self.error(format!("component count {n} out of range"))
        }
    }

    fn parse_semantic(&mut self) -> PResult<Semantic> {
        let name = self.expect_identifier("semantic")?;
        let indexed = |p: &mut Self| -> PResult<u8> {
            p.expect(b'(')?;
            let n = p.read_int()?;
            p.expect(b')')?;
            u8::try_from(n).or_else(|_| p.error("semantic index too large"))
        };
        Ok(match name {
            "position" => Semantic::Position,
            "point_size" => Semantic::PointSize,
            "color" => Semantic::Color,
            "depth" => Semantic::Depth,
            "varying" => Semantic::Varying(indexed(self)?),
            "data" => Semantic::Data(indexed(self)?),
            "attribute" => Semantic::Attribute(indexed(self)?),
            other => return self.error(format!("unknown semantic '{other}'")),
        })
    }

    fn parse_statement(&mut self) -> PResult<()> {
        if self.peek() == Some(b'%') {
            return self.parse_ssa_definition();
        }

        let keyword = self.expect_identifier("statement")?;
        match keyword {
            "uniforms" => {
                let n = self.read_int()?;
                self.builder().set_uniforms(n);
            }
            "input" => {
                let semantic = self.parse_semantic()?;
                let n = self.read_components()?;
                self.builder().input(semantic, n);
            }
            "reg" => {
                let name = self.expect_identifier("register name")?;
                let n = self.read_components()?;
                let id = self.builder().reg(n);
                self.regs.insert(name, (id, n));
            }
            "store" => {
                let semantic = self.parse_semantic()?;
                let (operand, width) = self.parse_operand()?;
                self.builder().store(semantic, operand, width);
            }
            "discard" => self.builder().discard(),
            "discard_if" => {
                let (cond, _) = self.parse_operand()?;
                self.builder().discard_if(cond);
            }
            "break" => self.builder().jump(JumpKind::Break),
            "continue" => self.builder().jump(JumpKind::Continue),
            "if" => self.parse_if()?,
            "loop" => {
                self.builder().push_loop();
                self.parse_body()?;
                self.wrap(|b| b.pop_loop())?;
            }
            _ => self.parse_reg_write(keyword)?,
        }
        Ok(())
    }

    fn wrap(
        &mut self,
        f: impl FnOnce(&mut ProgramBuilder) -> crate::core::CompileResult<()>,
    ) -> PResult<()> {
        let line = self.line;
        f(self.builder()).map_err(|e| ParseError {
            line,
            message: e.to_string(),
        })
    }

    fn parse_if(&mut self) -> PResult<()> {
        let (cond, _) = self.parse_operand()?;
        self.builder().push_if(cond);
        self.parse_body()?;

        let save = (self.pos, self.line);
        self.skip_whitespace();
        if self.read_identifier() == Some("else") {
            self.wrap(|b| b.push_else())?;
            self.parse_body()?;
        } else {
            (self.pos, self.line) = save;
        }
        self.wrap(|b| b.pop_if())
    }

    /// `{ statements }`
    fn parse_body(&mut self) -> PResult<()> {
        self.expect(b'{')?;
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'}') => {
                    self.bump();
                    return Ok(());
                }
                Some(_) => self.parse_statement()?,
                None => return self.error("unterminated block"),
            }
        }
    }

    fn parse_reg_write(&mut self, name: &'a str) -> PResult<()> {
        let Some(&(reg, ncomp)) = self.regs.get(name) else {
            return self.error(format!("unknown statement or register '{name}'"));
        };
        let mut write_mask = (1u8 << ncomp) - 1;
        if self.try_consume(b'.') {
            let mask = self.expect_identifier("write mask")?;
            write_mask = 0;
            for c in mask.chars() {
                match parse_components(&c.to_string()) {
                    Some(comps) if comps[0] < ncomp => write_mask |= 1 << comps[0],
                    _ => return self.error(format!("invalid write mask '{mask}'")),
                }
            }
        }
        self.expect(b'=')?;
        let op_name = self.expect_identifier("ALU op")?;
        let Some(op) = AluOp::from_name(op_name) else {
            return self.error(format!("unknown ALU op '{op_name}'"));
        };
        let srcs = self.parse_operand_list(op.num_inputs())?;
        let operands: Vec<Operand> = srcs.into_iter().map(|(o, _)| o).collect();
        self.builder().alu_to_reg(op, reg, write_mask, &operands);
        Ok(())
    }

    fn parse_ssa_definition(&mut self) -> PResult<()> {
        self.bump(); // '%'
        let name = self.expect_identifier("value name")?;
        if self.values.contains_key(name) {
            return self.error(format!("value %{name} redefined"));
        }
        let explicit = if self.try_consume(b':') {
            Some(self.read_components()?)
        } else {
            None
        };
        self.expect(b'=')?;

        let rhs = self.expect_identifier("operation")?;
        let (id, ncomp) = match rhs {
            "load_input" => {
                let loc = self.read_int()?;
                let Some(n) = self.builder().input_components(loc) else {
                    return self.error(format!("input location {loc} not declared"));
                };
                (self.builder().load_input(loc), n)
            }
            "load_uniform" => {
                let index = self.read_int()?;
                let n = explicit.unwrap_or(4);
                (self.builder().load_uniform(index, n), n)
            }
            "const" => {
                let mut values = vec![self.read_float()?];
                while self.try_consume(b',') {
                    values.push(self.read_float()?);
                }
                if values.len() > 4 {
                    return self.error("constant has more than four values");
                }
                let n = values.len() as u8;
                (self.builder().constant(&values), n)
            }
            "front_face" => (self.builder().front_face(), 1),
            "point_coord" => (self.builder().point_coord(), 2),
            "tex" => self.parse_tex(explicit)?,
            op_name => {
                let (op_name, saturate) = match op_name.strip_suffix("_sat") {
                    Some(base) => (base, true),
                    None => (op_name, false),
                };
                let Some(op) = AluOp::from_name(op_name) else {
                    return self.error(format!("unknown operation '{op_name}'"));
                };
                let srcs = self.parse_operand_list(op.num_inputs())?;
                let inferred = match op {
                    AluOp::Fdot2 | AluOp::Fdot3 | AluOp::Fdot4 => 1,
                    AluOp::Cube => 4,
                    _ => srcs[0].1,
                };
                let n = explicit.unwrap_or(inferred);
                let operands: Vec<Operand> = srcs.into_iter().map(|(o, _)| o).collect();
                (self.builder().alu_full(op, n, &operands, saturate), n)
            }
        };
        self.values.insert(name, (id, ncomp));
        Ok(())
    }

    fn parse_tex(&mut self, explicit: Option<u8>) -> PResult<(SsaId, u8)> {
        let dim = match self.expect_identifier("sampler dimension")? {
            "2d" => SamplerDim::Dim2D,
            "rect" => SamplerDim::Rect,
            "cube" => SamplerDim::Cube,
            "external" => SamplerDim::External,
            "3d" => SamplerDim::Dim3D,
            other => return self.error(format!("unknown sampler dimension '{other}'")),
        };
        if self.read_identifier() != Some("sampler") {
            return self.error("expected 'sampler'");
        }
        let sampler = self.read_int()?;
        let (coord, _) = self.parse_operand()?;

        let save = (self.pos, self.line);
        let (op, lod) = match self.read_identifier() {
            Some("bias") => (TexOp::Bias, Some(self.parse_operand()?.0)),
            Some("lod") => (TexOp::Lod, Some(self.parse_operand()?.0)),
            Some("fetch") => (TexOp::Fetch, None),
            _ => {
                (self.pos, self.line) = save;
                (TexOp::Tex, None)
            }
        };
        let id = self.builder().tex_full(op, dim, sampler, coord, lod);
        Ok((id, explicit.unwrap_or(4)))
    }

    fn parse_operand_list(&mut self, count: usize) -> PResult<Vec<(Operand, u8)>> {
        let mut srcs = Vec::with_capacity(count);
        for i in 0..count {
            if i > 0 {
                self.expect(b',')?;
            }
            srcs.push(self.parse_operand()?);
        }
        Ok(srcs)
    }

    /// Parse `[-][|]value[.swizzle][|]`, returning the operand and its width.
    fn parse_operand(&mut self) -> PResult<(Operand, u8)> {
        let negate = self.try_consume(b'-');
        let abs = self.try_consume(b'|');

        self.skip_blanks();
        let (value, ncomp) = if self.peek() == Some(b'%') {
            self.bump();
            let name = self.expect_identifier("value name")?;
            match self.values.get(name) {
                Some(&(id, n)) => (Value::Ssa(id), n),
                None => return self.error(format!("undefined value %{name}")),
            }
        } else {
            let name = self.expect_identifier("operand")?;
            match self.regs.get(name) {
                Some(&(id, n)) => (Value::Reg(id), n),
                None => return self.error(format!("unknown register '{name}'")),
            }
        };

        let mut operand = Operand::new(value);
        let mut width = ncomp;
        if self.peek() == Some(b'.') {
            self.bump();
            let swz = self.expect_identifier("swizzle")?;
            match parse_components(swz) {
                Some(comps) => {
                    operand = operand.swizzled(comps);
                    width = swz.len() as u8;
                }
                None => return self.error(format!("invalid swizzle '{swz}'")),
            }
        }

        if abs {
            self.expect(b'|')?;
            operand = operand.abs();
        }
        if negate {
            operand = operand.neg();
        }
        Ok((operand, width))
    }
}
