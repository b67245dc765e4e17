//! modelc driver.
//!
//! Builds a small demo model and writes it in the requested formats:
//!
//! ```text
//! modelc --target pi3 --format obj --format h -o out/
//! modelc --threads 2 --profile --symbols --disassemble demo_Predict
//! ```

use std::fs;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use inkwell::context::Context;
use modelc::{
    object_info, swig_writer, CompilerOptions, EmitterResult, ModelProfiler, ModuleEmitter, ModuleOutputFormat,
    ProfiledNode, TargetDevice, TypedOperator, VariableType,
};

/// Number of doubles the demo predict function reads.
const INPUT_SIZE: u32 = 8;

#[derive(Parser)]
#[command(name = "modelc", about = "Emit a demo model as IR, object code, headers and SWIG interfaces")]
struct Args {
    /// Module name, used as the prefix of every exported symbol
    #[arg(short, long, default_value = "demo")]
    name: String,

    /// Target device (host, pi0, pi3, orangepi0, pi3_64, aarch64, ios, mac, linux, windows)
    #[arg(short, long, default_value = "host")]
    target: String,

    /// Output formats (ir, bc, asm, obj, h, i)
    #[arg(short, long = "format", default_values_t = vec!["ir".to_string()])]
    formats: Vec<String>,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Sum the input on the emitted thread pool with this many worker threads
    #[arg(long)]
    threads: Option<u32>,

    /// Emit profiling counters
    #[arg(long)]
    profile: bool,

    /// Disable the optimization pipeline
    #[arg(long)]
    no_opt: bool,

    /// Annotate assembly output
    #[arg(long)]
    verbose_asm: bool,

    /// Print the symbols defined by the object code
    #[arg(long)]
    symbols: bool,

    /// Print a disassembly of this function (x86-64 targets)
    #[arg(long)]
    disassemble: Option<String>,
}

struct SumNode;

impl ProfiledNode for SumNode {
    fn id(&self) -> String {
        "sum".to_string()
    }

    fn runtime_type_name(&self) -> String {
        "ScaledSumNode<double>".to_string()
    }
}

/// `<name>_SumChunk(double* input, double* result, int32_t count)`.
fn emit_sum_chunk(module: &mut ModuleEmitter<'_>) -> EmitterResult<String> {
    let name = format!("{}_SumChunk", module.name());
    let mut f = module.begin_function(
        &name,
        VariableType::Void,
        &[
            ("input", VariableType::Double.pointer_to()),
            ("result", VariableType::Double.pointer_to()),
            ("count", VariableType::Int32),
        ],
    )?;
    let input = f.argument(0)?;
    let result = f.argument(1)?;
    let count = f.argument(2)?;
    f.store(&result, &f.literal(0.0f64))?;
    f.for_count(&count, |f, i| {
        let x = f.value_at(&input, &i)?;
        f.operation_and_update(&result, TypedOperator::AddFloat, &x)
    })?;
    f.end()?;
    Ok(name)
}

/// `<name>_Predict(double* input, double* output)`: output[0] = scale * sum(input).
fn emit_predict(module: &mut ModuleEmitter<'_>, use_threads: bool) -> EmitterResult<()> {
    let prefix = module.name().to_string();
    let chunk = emit_sum_chunk(module)?;
    let scale = module.constant(&format!("{prefix}_Scale"), 0.5f64)?;
    module.add_preprocessor_definition(&format!("{}_INPUT_SIZE", prefix.to_uppercase()), &INPUT_SIZE.to_string());
    module.enable_profiler(1)?;

    let double_ptr = VariableType::Double.pointer_to();
    let mut f = module.begin_function(
        &format!("{prefix}_Predict"),
        VariableType::Void,
        &[("input", double_ptr.clone()), ("output", double_ptr)],
    )?;
    let input = f.argument(0)?;
    let output = f.argument(1)?;
    let model_start = ModelProfiler::start_model(&mut f)?;
    ModelProfiler::init_node(&mut f, &SumNode)?;
    let node_start = ModelProfiler::start_node(&mut f, &SumNode)?;

    let sum = if use_threads {
        let half = INPUT_SIZE / 2;
        let partials = f.variable_array(&VariableType::Double, 2, "partials")?;
        let tasks = vec![
            vec![
                input.clone(),
                f.pointer_offset(&partials, &f.literal(0i32))?,
                f.literal(half as i32),
            ],
            vec![
                f.pointer_offset(&input, &f.literal(half as i32))?,
                f.pointer_offset(&partials, &f.literal(1i32))?,
                f.literal((INPUT_SIZE - half) as i32),
            ],
        ];
        let batch = f.add_tasks(&chunk, tasks)?;
        batch.wait_all(&mut f)?;
        let first = f.value_at(&partials, &f.literal(0i32))?;
        let second = f.value_at(&partials, &f.literal(1i32))?;
        f.binary(TypedOperator::AddFloat, &first, &second)?
    } else {
        let total = f.variable(&VariableType::Double, "total")?;
        let count = f.literal(INPUT_SIZE as i32);
        f.call(&chunk, &[input.clone(), total.clone(), count])?;
        f.load(&total)?
    };
    let factor = f.load(&scale)?;
    let scaled = f.binary(TypedOperator::MultiplyFloat, &sum, &factor)?;
    f.store(&output, &scaled)?;

    ModelProfiler::end_node(&mut f, &SumNode, node_start.as_ref())?;
    ModelProfiler::end_model(&mut f, model_start.as_ref())?;
    f.include_in_header()?;
    f.include_in_predict_interface()?;
    f.set_comment("Scaled sum of the input")?;
    f.end()?;
    Ok(())
}

fn run(args: Args) -> EmitterResult<()> {
    let formats = args
        .formats
        .iter()
        .map(|f| f.parse::<ModuleOutputFormat>())
        .collect::<EmitterResult<Vec<_>>>()?;

    let mut options = CompilerOptions {
        target_device: TargetDevice::resolve(&args.target)?,
        optimize: !args.no_opt,
        profile: args.profile,
        ..CompilerOptions::default()
    };
    if let Some(threads) = args.threads {
        options.max_threads = threads;
    }

    let context = Context::create();
    let mut module = ModuleEmitter::new(&context, &args.name, options)?;
    emit_predict(&mut module, args.threads.is_some())?;

    let mut machine_options = module.machine_code_options();
    machine_options.verbose_asm = args.verbose_asm;

    fs::create_dir_all(&args.output)?;
    for format in formats {
        let path = args.output.join(format!("{}.{}", args.name, format.extension()));
        module.write_to_file_with_options(&path, format, &machine_options)?;
        if format == ModuleOutputFormat::SwigInterface {
            let header = args.output.join(format!("{}.i.h", args.name));
            fs::write(&header, swig_writer::write_swig_header(&module)?)?;
        }
        println!("{}", path.display());
    }

    if args.symbols || args.disassemble.is_some() {
        let object = module.render(ModuleOutputFormat::ObjectCode, &machine_options)?;
        if args.symbols {
            for symbol in object_info::defined_symbols(&object)? {
                println!("{:08x} {:6} {:<16} {}", symbol.address, symbol.size, symbol.section, symbol.name);
            }
        }
        if let Some(name) = &args.disassemble {
            print!("{}", object_info::disassemble_symbol(&object, name)?);
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
