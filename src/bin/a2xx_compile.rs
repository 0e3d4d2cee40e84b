//! Shader compile driver.
//!
//! Compiles a fragment program, and optionally the vertex program linked to
//! it, then prints the disassembly or the raw dwords.

use std::fs;
use std::path::PathBuf;
use std::process;

use clap::Parser;

use a2xx_compiler::{parse_program, CompileOptions, CompiledShader, FragLinkage, ShaderCompiler};

#[derive(Parser, Debug)]
#[command(name = "a2xx-compile", about = "Compile shader programs for Adreno a2xx GPUs")]
struct Args {
    /// Fragment program
    fragment: PathBuf,

    /// Vertex program linked against the fragment inputs
    vertex: Option<PathBuf>,

    /// Also compile the binning variant of the vertex program
    #[arg(long)]
    binning: bool,

    /// Target an a20x part
    #[arg(long)]
    a20x: bool,

    /// Print dwords in hex instead of disassembly
    #[arg(long)]
    hex: bool,

    /// Disable scalar filler synthesis
    #[arg(long)]
    no_fill: bool,

    /// Print compile statistics
    #[arg(long)]
    stats: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut options = CompileOptions::from_env();
    options.a20x |= args.a20x;
    options.scalar_fillers &= !args.no_fill;
    let compiler = ShaderCompiler::new(options);

    let fs_program = parse_program(&fs::read_to_string(&args.fragment)?)?;
    let mut linkage = FragLinkage::new();
    let fs = compiler.compile_fragment(&fs_program, &mut linkage)?;
    print_shader("fragment", &fs, args);

    if let Some(path) = &args.vertex {
        let vs_program = parse_program(&fs::read_to_string(path)?)?;
        let vs = compiler.compile_vertex(&vs_program, &linkage)?;
        print_shader("vertex", &vs, args);

        if args.binning {
            let bin = compiler.compile_binning(&vs_program)?;
            print_shader("binning", &bin, args);
        }
    } else if args.binning {
        log::warn!("--binning needs a vertex program");
    }
    Ok(())
}

fn print_shader(name: &str, shader: &CompiledShader, args: &Args) {
    println!("; {name} shader: {} bytes", shader.binary.size_bytes());
    if args.hex {
        for chunk in shader.binary.dwords.chunks(3) {
            let words: Vec<String> = chunk.iter().map(|w| format!("{w:08x}")).collect();
            println!("{}", words.join(" "));
        }
    } else {
        print!("{}", shader.disassemble());
    }

    if !shader.immediates.is_empty() {
        println!("; immediates at C{}", shader.first_immediate);
        for (i, imm) in shader.immediates.iter().enumerate() {
            println!(";   C{}: {:?}", shader.first_immediate as usize + i, imm.as_f32());
        }
    }
    for patch in &shader.binary.fetch_patches {
        println!("; fetch patch @{}: {:?}", patch.byte_offset, patch.kind);
    }
    if let Some(offset) = shader.binary.mem_export_offset {
        println!("; memory export exec @{offset}");
    }
    if args.stats {
        print!("{}", shader.stats);
    }
}
