// Compiler options handed to the emission layer by the model-graph compiler. The field set
// mirrors the documented options bundle: loop unrolling, operator inlining, vectorization,
// BLAS selection, optimization, diagnostic info, parallelization and the emitted thread pool,
// fast math, debug, profiling, position-independent code and global alignment, plus the
// target device. from_map parses the textual key=value form used by tools.

//! Compiler options.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{EmitterError, EmitterResult};
use crate::target::TargetDevice;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlasType {
    #[default]
    Unknown,
    OpenBlas,
    Atlas,
}

impl FromStr for BlasType {
    type Err = EmitterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(BlasType::Unknown),
            "openBLAS" | "openblas" => Ok(BlasType::OpenBlas),
            "atlas" => Ok(BlasType::Atlas),
            other => Err(EmitterError::BadFunctionArguments(format!("unknown BLAS type {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompilerOptions {
    pub unroll_loops: bool,
    pub inline_operators: bool,
    pub allow_vector_instructions: bool,
    pub vector_width: u32,
    pub use_blas: bool,
    pub blas_type: BlasType,
    pub optimize: bool,
    pub include_diagnostic_info: bool,
    pub parallelize: bool,
    pub use_thread_pool: bool,
    pub max_threads: u32,
    pub use_fast_math: bool,
    pub debug: bool,
    pub profile: bool,
    pub position_independent_code: Option<bool>,
    /// Alignment in bytes applied to emitted globals; 0 leaves the ABI default.
    pub global_value_alignment: u32,
    pub target_device: TargetDevice,
    /// Log backend diagnostics as they arrive.
    pub verbose_diagnostics: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            unroll_loops: false,
            inline_operators: true,
            allow_vector_instructions: false,
            vector_width: 4,
            use_blas: false,
            blas_type: BlasType::Unknown,
            optimize: true,
            include_diagnostic_info: false,
            parallelize: false,
            use_thread_pool: true,
            max_threads: 4,
            use_fast_math: true,
            debug: false,
            profile: false,
            position_independent_code: None,
            global_value_alignment: 0,
            target_device: TargetDevice::default(),
            verbose_diagnostics: false,
        }
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> EmitterResult<T> {
    value
        .parse()
        .map_err(|_| EmitterError::BadFunctionArguments(format!("invalid value {value:?} for {key}")))
}

impl CompilerOptions {
    /// Build options from `name -> value` pairs, starting from the defaults.
    ///
    /// Keys use the documented camelCase names. `positionIndependentCode` accepts `auto`.
    /// `targetDevice` is resolved by name.
    pub fn from_map(values: &HashMap<String, String>) -> EmitterResult<Self> {
        let mut options = CompilerOptions::default();
        let mut keys: Vec<&String> = values.keys().collect();
        keys.sort();
        for key in keys {
            let value = values[key].as_str();
            match key.as_str() {
                "unrollLoops" => options.unroll_loops = parse_value(key, value)?,
                "inlineOperators" => options.inline_operators = parse_value(key, value)?,
                "allowVectorInstructions" => options.allow_vector_instructions = parse_value(key, value)?,
                "vectorWidth" => options.vector_width = parse_value(key, value)?,
                "useBlas" => options.use_blas = parse_value(key, value)?,
                "blasType" => options.blas_type = value.parse()?,
                "optimize" => options.optimize = parse_value(key, value)?,
                "includeDiagnosticInfo" => options.include_diagnostic_info = parse_value(key, value)?,
                "parallelize" => options.parallelize = parse_value(key, value)?,
                "useThreadPool" => options.use_thread_pool = parse_value(key, value)?,
                "maxThreads" => options.max_threads = parse_value(key, value)?,
                "useFastMath" => options.use_fast_math = parse_value(key, value)?,
                "debug" => options.debug = parse_value(key, value)?,
                "profile" => options.profile = parse_value(key, value)?,
                "positionIndependentCode" => {
                    options.position_independent_code = match value {
                        "auto" => None,
                        other => Some(parse_value(key, other)?),
                    }
                }
                "globalValueAlignment" => options.global_value_alignment = parse_value(key, value)?,
                "targetDevice" => options.target_device = TargetDevice::resolve(value)?,
                other => log::debug!("Ignoring unknown compiler option {}", other),
            }
        }
        Ok(options)
    }
}
