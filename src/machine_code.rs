// Lowering of an emitted module to assembly or object code. Generation always works on a
// clone of the module so the emitter's module is never mutated by codegen, which keeps
// repeated writes byte-identical. The clone is verified, retargeted to the requested
// triple and data layout, stamped with per-function target cpu/features and floating-point
// attributes, optionally run through the new pass manager's default<On> pipeline and then
// handed to the target machine. Backend diagnostics raised during the run are collected by
// the module's DiagnosticHandler; any error-severity diagnostic fails the write even when
// LLVM itself reported success.

//! Machine code generation.

use inkwell::attributes::AttributeLoc;
use inkwell::module::Module;
use inkwell::passes::PassBuilderOptions;
use inkwell::targets::{CodeModel, FileType, RelocMode, Target, TargetMachine, TargetTriple};
use inkwell::OptimizationLevel;

use crate::error::{EmitterError, EmitterResult};
use crate::module_emitter::ModuleEmitter;
use crate::options::CompilerOptions;
use crate::target::{initialize_backends, TargetDevice};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelocationModel {
    #[default]
    Static,
    Pic,
    DynamicNoPic,
}

impl From<RelocationModel> for RelocMode {
    fn from(model: RelocationModel) -> Self {
        match model {
            RelocationModel::Static => RelocMode::Static,
            RelocationModel::Pic => RelocMode::PIC,
            RelocationModel::DynamicNoPic => RelocMode::DynamicNoPic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FloatAbi {
    #[default]
    Default,
    Soft,
    Hard,
}

/// Whether separate multiply and add may be fused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FloatFusion {
    Fast,
    #[default]
    Standard,
    Strict,
}

#[derive(Debug, Clone)]
pub struct MachineCodeOptions {
    pub target_device: TargetDevice,
    pub optimization_level: OptimizationLevel,
    pub reloc_mode: RelocationModel,
    pub float_abi: FloatAbi,
    pub float_fusion: FloatFusion,
    pub verify_module: bool,
    pub optimize: bool,
    pub verbose_asm: bool,
}

impl Default for MachineCodeOptions {
    fn default() -> Self {
        Self {
            target_device: TargetDevice::default(),
            optimization_level: OptimizationLevel::Default,
            reloc_mode: RelocationModel::Static,
            float_abi: FloatAbi::Default,
            float_fusion: FloatFusion::Standard,
            verify_module: true,
            optimize: true,
            verbose_asm: false,
        }
    }
}

impl MachineCodeOptions {
    pub fn from_compiler_options(options: &CompilerOptions) -> Self {
        Self {
            target_device: options.target_device.clone(),
            optimization_level: if options.optimize { OptimizationLevel::Default } else { OptimizationLevel::None },
            reloc_mode: if options.position_independent_code == Some(true) {
                RelocationModel::Pic
            } else {
                RelocationModel::Static
            },
            float_abi: FloatAbi::Default,
            float_fusion: if options.use_fast_math { FloatFusion::Fast } else { FloatFusion::Standard },
            verify_module: true,
            optimize: options.optimize,
            verbose_asm: false,
        }
    }

    fn pipeline(&self) -> &'static str {
        match self.optimization_level {
            OptimizationLevel::None => "default<O0>",
            OptimizationLevel::Less => "default<O1>",
            OptimizationLevel::Default => "default<O2>",
            OptimizationLevel::Aggressive => "default<O3>",
        }
    }
}

fn stamp_function_attributes(module: &Module<'_>, options: &MachineCodeOptions) {
    let context = module.get_context();
    let device = &options.target_device;
    let soft_float = match options.float_abi {
        FloatAbi::Soft => Some("true"),
        FloatAbi::Hard => Some("false"),
        FloatAbi::Default => None,
    };
    let fused = match options.float_fusion {
        FloatFusion::Fast => Some("true"),
        FloatFusion::Strict => Some("false"),
        FloatFusion::Standard => None,
    };

    for function in module.get_functions() {
        if function.count_basic_blocks() == 0 {
            continue;
        }
        let mut attributes = Vec::new();
        if !device.cpu.is_empty() {
            attributes.push(("target-cpu", device.cpu.as_str()));
            attributes.push(("target-features", device.features.as_str()));
        }
        if let Some(value) = soft_float {
            attributes.push(("use-soft-float", value));
        }
        if let Some(value) = fused {
            attributes.push(("less-precise-fpmad", value));
        }
        for (key, value) in attributes {
            function.add_attribute(AttributeLoc::Function, context.create_string_attribute(key, value));
        }
    }
}

/// Lower `module` to assembly text or object file bytes.
pub fn generate_machine_code(module: &ModuleEmitter<'_>, file_type: FileType, options: &MachineCodeOptions) -> EmitterResult<Vec<u8>> {
    initialize_backends();
    let lowered = module.module().clone();

    if options.verify_module {
        lowered
            .verify()
            .map_err(|e| EmitterError::unexpected(format!("Module verification failed: {e}")))?;
    }

    let triple = if !options.target_device.triple.is_empty() {
        options.target_device.triple.clone()
    } else {
        let existing = lowered.get_triple().as_str().to_string_lossy().into_owned();
        if existing.is_empty() {
            TargetMachine::get_default_triple().as_str().to_string_lossy().into_owned()
        } else {
            existing
        }
    };
    let target_triple = TargetTriple::create(&triple);
    lowered.set_triple(&target_triple);

    let target = Target::from_triple(&target_triple)
        .map_err(|e| EmitterError::unexpected(format!("Couldn't create target {}", e.to_string_lossy())))?;
    let machine = target
        .create_target_machine(
            &target_triple,
            &options.target_device.cpu,
            &options.target_device.features,
            options.optimization_level,
            options.reloc_mode.into(),
            CodeModel::Default,
        )
        .ok_or_else(|| EmitterError::unexpected("Unable to allocate target machine"))?;
    machine.set_asm_verbosity(options.verbose_asm);
    lowered.set_data_layout(&machine.get_target_data().get_data_layout());

    stamp_function_attributes(&lowered, options);

    if options.optimize {
        lowered
            .run_passes(options.pipeline(), &machine, PassBuilderOptions::create())
            .map_err(|e| EmitterError::unexpected(format!("Optimization failed: {}", e.to_string_lossy())))?;
    }

    let buffer = machine
        .write_to_memory_buffer(&lowered, file_type)
        .map_err(|e| EmitterError::unexpected(format!("Error compiling module: {}", e.to_string_lossy())))?;
    // Errors recorded before this write also fail it, until the caller clears them.
    if module.diagnostics().had_error() {
        return Err(EmitterError::unexpected("Error compiling module"));
    }
    log::debug!("Generated {} bytes of {:?} for {}", buffer.get_size(), file_type, triple);
    Ok(buffer.as_slice().to_vec())
}
