use clap::Parser;
use ssirc::{compile, words_to_bytes, CompileOptions, TargetEnv};
use std::{
    borrow::Borrow,
    fs::File,
    io::{stderr, Read, Write},
    path::Path,
    process::exit,
};

const SPIRV_VERSION_1_3: u32 = 0x0001_0300;
const SPIRV_VERSION_1_4: u32 = 0x0001_0400;
const SPIRV_VERSION_1_5: u32 = 0x0001_0500;
const SPIRV_VERSION_1_6: u32 = 0x0001_0600;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(help = "Input WGSL file path.")]
    in_path: String,

    #[arg(
        short,
        long,
        help = "Output SPIR-V file path. The output file is defaulted to \
        {in_path}.spv if this path is not given."
    )]
    out_path: Option<String>,

    #[arg(
        long,
        help = "{vulkan1.1|vulkan1.2|vulkan1.3|webgpu} Use specified \
        environment."
    )]
    target_env: Option<String>,

    #[arg(long, help = "Print the SSIR of the module instead of emitting.")]
    dump_ssir: bool,

    #[arg(long, help = "Strip debug names from the output.")]
    strip_names: bool,
}

fn main() {
    let args = Args::parse();

    let in_path = Path::new(&args.in_path);
    let out_path = if let Some(out_path) = args.out_path {
        Path::new(&out_path).to_owned()
    } else {
        Path::new(&format!("{}.spv", args.in_path)).to_owned()
    };

    let mut in_file = File::open(in_path).unwrap_or_else(|e| {
        writeln!(stderr(), "error: failed to open input file: {}", e).unwrap();
        exit(1);
    });

    let mut code = String::new();
    in_file.read_to_string(&mut code).unwrap_or_else(|e| {
        writeln!(stderr(), "error: failed to read input file: {}", e).unwrap();
        exit(1);
    });

    let mut opts = CompileOptions::default();
    match args.target_env.as_ref().map(Borrow::borrow) {
        Some("vulkan1.1") | None => {
            opts.lower.env = TargetEnv::Vulkan1_1;
            opts.spv.version = SPIRV_VERSION_1_3;
        }
        Some("vulkan1.2") => {
            opts.lower.env = TargetEnv::Vulkan1_2;
            opts.spv.version = SPIRV_VERSION_1_5;
        }
        Some("vulkan1.3") => {
            opts.lower.env = TargetEnv::Vulkan1_3;
            opts.spv.version = SPIRV_VERSION_1_6;
        }
        Some("webgpu") => {
            opts.lower.env = TargetEnv::WebGpu;
            opts.spv.version = SPIRV_VERSION_1_3;
        }
        Some("spv1.4") => {
            opts.spv.version = SPIRV_VERSION_1_4;
        }
        _ => {
            writeln!(
                stderr(),
                "error: unknown target environment: {}",
                args.target_env.unwrap()
            )
            .unwrap();
            exit(1);
        }
    }
    if args.strip_names {
        opts.lower.debug_names = false;
        opts.spv.debug_names = false;
    }

    if args.dump_ssir {
        let prog = ssirc::parse(&code);
        if prog.had_error() {
            for e in prog.errors.iter() {
                writeln!(stderr(), "error: {}:{}: {}", e.line, e.col, e.message).unwrap();
            }
            exit(1);
        }
        let resolver = ssirc::resolve(&prog);
        let module = ssirc::lower(&prog, &resolver, &opts.lower).unwrap_or_else(|e| {
            writeln!(stderr(), "error: {}", e).unwrap();
            exit(1);
        });
        print!("{}", ssirc::ssir_to_string(&module));
        return;
    }

    let spv = compile(&code, &opts).unwrap_or_else(|e| {
        writeln!(stderr(), "error: {}", e).unwrap();
        exit(1);
    });

    let mut out_file = File::create(out_path).unwrap_or_else(|e| {
        writeln!(stderr(), "error: failed to open output file: {}", e).unwrap();
        exit(1);
    });

    out_file
        .write_all(&words_to_bytes(&spv))
        .unwrap_or_else(|e| {
            writeln!(stderr(), "error: failed to write output file: {}", e).unwrap();
            exit(1);
        });
}
