//! Disassembly of compiled shaders.

use a2xx_compiler::a2xx::disasm::disassemble;
use a2xx_compiler::{parse_program, FragLinkage, ShaderCompiler};

fn disasm_fs(text: &str) -> String {
    let _ = env_logger::builder().is_test(true).try_init();
    let program = parse_program(text).expect("parse");
    let shader = ShaderCompiler::default()
        .compile_fragment(&program, &mut FragLinkage::new())
        .expect("compile");
    let text = shader.disassemble();
    assert_eq!(text, disassemble(&shader.binary.dwords));
    text
}

#[test]
fn test_chain_listing() {
    let text = disasm_fs(
        "fragment
         input varying(0) 4
         %a = load_input 0
         %b = fadd %a, %a
         %c = fmul %b, %b
         %d = fadd %c, %c
         %e = fmul %d, %d
         %f = fadd %e, %e
         %g = fmul %f, %f
         %h = fadd %g, %g
         store color %h
        ",
    );
    assert!(text.starts_with("; cf\n"));
    assert!(text.contains("; instructions\n"));
    assert!(text.contains("EXEC addr=2 cnt=6"));
    assert!(text.contains("ALLOC PARAM/PIXEL size=0"));
    assert!(text.contains("EXEC_END addr=8 cnt=1"));
    assert!(text.contains("ADDv export0.xyzw"));
    assert_eq!(text.lines().filter(|l| l.contains("MULv")).count(), 3);
}

#[test]
fn test_predicated_pair_listing() {
    let text = disasm_fs(
        "fragment
         input varying(0) 4
         %a = load_input 0
         if %a.x {
           %f = ffloor %a.y
           %g = ffract %a.z
           %h = fadd %f, %g
           store color %h.xxxx
         }
        ",
    );
    let pair = text
        .lines()
        .find(|l| l.contains("FLOORv"))
        .expect("floor instruction");
    assert!(pair.contains("(p) FLOORv"), "{pair}");
    assert!(pair.contains("; FRACs"), "{pair}");
    assert!(text.contains("PRED_SETNEs"));
}

#[test]
fn test_texture_listing() {
    let text = disasm_fs(
        "fragment
         input varying(0) 4
         %a = load_input 0
         %t = tex 2d sampler 2 %a.xy bias %a.z
         store color %t
        ",
    );
    assert!(text.contains("TEX_SET_TEX_LOD"));
    let fetch = text
        .lines()
        .find(|l| l.contains("TEX_FETCH"))
        .expect("texture fetch");
    assert!(fetch.contains("sampler 2"), "{fetch}");
    assert!(fetch.contains("reg_lod"), "{fetch}");
}

#[test]
fn test_filler_listing() {
    let text = disasm_fs(
        "fragment
         input varying(0) 4
         input varying(1) 4
         %a = load_input 0
         %b = load_input 1
         %p = fadd %a.x, %b.x
         %q = fadd %a.y, %b.y
         %r = fmul %a.z, %b.z
         %t = fmul %a.w, %b.w
         %sa = fadd %p, %q
         %sb = fmul %r, %t
         %o = fadd %sa, %sb
         store color %o.xxxx
        ",
    );
    // the synthesized move is a scalar MAX
    assert!(text.contains("; MAXs R3._y__"), "{text}");
    assert!(text.contains("; ADDs"));
}
