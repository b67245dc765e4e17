//! modelc - module and function emission for a model compiler.
//!
//! A model-graph compiler drives this crate to build one LLVM module per model: typed
//! functions with structured control flow, globals and structs, metadata that describes
//! the public surface, and runtime machinery emitted into the generated program itself
//! (a pthread worker pool, profiling counters, a wall clock). The finished module is
//! written as textual IR, bitcode, assembly, object code, a C header or a SWIG interface
//! for a named target device.
//!
//! # Primary Usage
//!
//! ```ignore
//! use inkwell::context::Context;
//! use modelc::{CompilerOptions, ModuleEmitter, ModuleOutputFormat, VariableType};
//!
//! let context = Context::create();
//! let mut module = ModuleEmitter::new(&context, "model", CompilerOptions::default())?;
//! let mut f = module.begin_function("model_Add", VariableType::Int32,
//!     &[("a", VariableType::Int32), ("b", VariableType::Int32)])?;
//! let sum = f.binary(TypedOperator::Add, &f.argument(0)?, &f.argument(1)?)?;
//! f.include_in_header()?;
//! f.end_with(&sum)?;
//! module.write_to_file("model.o", ModuleOutputFormat::ObjectCode)?;
//! ```
//!
//! # Architecture
//!
//! - [`target`] - Target device descriptors
//! - [`types`] - Value and operator vocabulary
//! - [`ir_emitter`] - Typed wrapper over the LLVM builder
//! - [`module_emitter`] / [`function_emitter`] - Module and function construction
//! - [`thread_pool`], [`profiler`], [`runtime`] - Code emitted into the generated program
//! - [`machine_code`], [`header_writer`], [`swig_writer`] - Artifact output
//! - [`object_info`] - Inspection of emitted object files

pub mod diagnostics;
pub mod error;
pub mod function_emitter;
pub mod header_writer;
pub mod ir_emitter;
pub mod machine_code;
pub mod metadata;
pub mod module_emitter;
pub mod object_info;
pub mod options;
pub mod profiler;
pub mod runtime;
pub mod swig_writer;
pub mod target;
pub mod thread_pool;
pub mod types;

pub use diagnostics::{Diagnostic, DiagnosticHandler, DiagnosticSeverity};
pub use error::{EmitterError, EmitterResult};
pub use function_emitter::{FunctionEmitter, IfBuilder};
pub use ir_emitter::IrEmitter;
pub use machine_code::{FloatAbi, FloatFusion, MachineCodeOptions, RelocationModel};
pub use metadata::CallbackKind;
pub use module_emitter::{
    FunctionDeclaration, ModuleEmitter, ModuleOutputFormat, Parameter, StructDefinition,
};
pub use options::{BlasType, CompilerOptions};
pub use profiler::{ModelProfiler, ProfiledNode};
pub use target::TargetDevice;
pub use thread_pool::{TaskArray, ThreadPool};
pub use types::{
    ArgFlags, ScalarValue, TypedComparison, TypedOperator, TypedValue, UnaryOperation,
    VariableScope, VariableType,
};
