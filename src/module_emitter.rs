// This module implements ModuleEmitter, the owner of one LLVM module under construction. It
// keeps the function declaration table (a name may only be redeclared with an identical
// signature), the explicit stack of functions being emitted (each frame saves the insertion
// block of the function it interrupted so nested emission resumes exactly where it left
// off), the global, struct and string-constant registries, the metadata store that drives
// header and interface generation, global constructor/destructor lists, the per-node reset
// functions aggregated into <module>_Reset, and the lazily initialized thread pool and
// profiler state. Output goes through a closed ModuleOutputFormat enum: IR and bitcode are
// serialized directly, assembly and object code go through the machine-code writer, and the
// C header and SWIG interface are synthesized from recorded metadata. File output is
// written to a temporary sibling and renamed into place only after the artifact is complete.
// Routines generated at finish (the reset aggregator and the profiler accessors) are rebuilt
// whenever their inputs changed since the last write. A module parsed from IR recovers its
// declarations, recorded metadata, struct field names and node reset routines from the IR.

//! Module emitter.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use hashbrown::{HashMap, HashSet};
use inkwell::attributes::{Attribute, AttributeLoc};
use inkwell::basic_block::BasicBlock;
use inkwell::context::Context;
use inkwell::memory_buffer::MemoryBuffer;
use inkwell::module::{Linkage, Module};
use inkwell::targets::{FileType, TargetTriple};
use inkwell::values::{
    AnyValueEnum, BasicMetadataValueEnum, BasicValueEnum, FunctionValue, GlobalValue, StructValue,
};

use crate::diagnostics::DiagnosticHandler;
use crate::error::{EmitterError, EmitterResult};
use crate::function_emitter::FunctionEmitter;
use crate::ir_emitter::IrEmitter;
use crate::machine_code::{self, MachineCodeOptions};
use crate::metadata::{self, CallbackKind, MetadataStore};
use crate::options::CompilerOptions;
use crate::profiler::ModelProfiler;
use crate::thread_pool::ThreadPoolState;
use crate::types::{ArgFlags, ScalarValue, TypedValue, VariableType};
use crate::{header_writer, swig_writer};

/// Default priority for global constructors and destructors.
pub const DEFAULT_STRUCTOR_PRIORITY: u32 = 65535;

/// Artifact kinds a module can be written as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleOutputFormat {
    Ir,
    Bitcode,
    Assembly,
    ObjectCode,
    CHeader,
    SwigInterface,
}

impl ModuleOutputFormat {
    pub const ALL: [ModuleOutputFormat; 6] = [
        ModuleOutputFormat::Ir,
        ModuleOutputFormat::Bitcode,
        ModuleOutputFormat::Assembly,
        ModuleOutputFormat::ObjectCode,
        ModuleOutputFormat::CHeader,
        ModuleOutputFormat::SwigInterface,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            ModuleOutputFormat::Ir => "ll",
            ModuleOutputFormat::Bitcode => "bc",
            ModuleOutputFormat::Assembly => "s",
            ModuleOutputFormat::ObjectCode => "o",
            ModuleOutputFormat::CHeader => "h",
            ModuleOutputFormat::SwigInterface => "i",
        }
    }

    pub fn is_binary(self) -> bool {
        matches!(self, ModuleOutputFormat::Bitcode | ModuleOutputFormat::ObjectCode)
    }
}

impl FromStr for ModuleOutputFormat {
    type Err = EmitterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ir" | "ll" => Ok(ModuleOutputFormat::Ir),
            "bc" | "bitcode" => Ok(ModuleOutputFormat::Bitcode),
            "asm" | "assembly" | "s" => Ok(ModuleOutputFormat::Assembly),
            "obj" | "o" | "objectCode" => Ok(ModuleOutputFormat::ObjectCode),
            "h" | "header" | "cHeader" => Ok(ModuleOutputFormat::CHeader),
            "i" | "swig" | "swigInterface" => Ok(ModuleOutputFormat::SwigInterface),
            other => Err(EmitterError::BadFunctionArguments(format!("unknown output format {other}"))),
        }
    }
}

impl fmt::Display for ModuleOutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleOutputFormat::Ir => "ir",
            ModuleOutputFormat::Bitcode => "bitcode",
            ModuleOutputFormat::Assembly => "assembly",
            ModuleOutputFormat::ObjectCode => "objectCode",
            ModuleOutputFormat::CHeader => "cHeader",
            ModuleOutputFormat::SwigInterface => "swigInterface",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub ty: VariableType,
    pub flags: ArgFlags,
}

impl Parameter {
    pub fn new(name: impl Into<String>, ty: VariableType) -> Self {
        Self { name: name.into(), ty, flags: ArgFlags::NONE }
    }

    pub fn with_flags(name: impl Into<String>, ty: VariableType, flags: ArgFlags) -> Self {
        Self { name: name.into(), ty, flags }
    }
}

/// Name and signature of a function owned by the module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub return_type: VariableType,
    pub parameters: Vec<Parameter>,
    pub variadic: bool,
}

impl FunctionDeclaration {
    pub fn new(name: impl Into<String>, return_type: VariableType, parameters: Vec<Parameter>) -> Self {
        Self { name: name.into(), return_type, parameters, variadic: false }
    }

    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    pub fn parameter_types(&self) -> Vec<VariableType> {
        self.parameters.iter().map(|p| p.ty.clone()).collect()
    }

    /// Same return type, parameter types and variadic-ness. Parameter names may differ.
    pub fn signature_matches(&self, other: &FunctionDeclaration) -> bool {
        self.return_type == other.return_type
            && self.variadic == other.variadic
            && self.parameter_types() == other.parameter_types()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDefinition {
    pub name: String,
    pub fields: Vec<(String, VariableType)>,
}

/// What the routines generated at finish were last built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GeneratedRoutines {
    resets: usize,
    profiled_nodes: Option<(usize, usize)>,
}

/// A function being emitted and the block to resume in once it ends.
struct FunctionFrame<'ctx> {
    function: FunctionValue<'ctx>,
    resume_block: Option<BasicBlock<'ctx>>,
}

pub struct ModuleEmitter<'ctx> {
    name: String,
    options: CompilerOptions,
    emitter: IrEmitter<'ctx>,
    diagnostics: DiagnosticHandler<'ctx>,
    declarations: HashMap<String, FunctionDeclaration>,
    declaration_order: Vec<String>,
    /// Declarations recovered from parsed IR. Their pointer parameters are untyped, so a
    /// later declaration with the same LLVM signature replaces them.
    imported: HashSet<String>,
    function_stack: Vec<FunctionFrame<'ctx>>,
    globals: HashMap<String, TypedValue<'ctx>>,
    structs: Vec<StructDefinition>,
    string_constants: HashMap<String, TypedValue<'ctx>>,
    metadata: MetadataStore,
    callbacks: BTreeMap<CallbackKind, Vec<String>>,
    constructors: Vec<(u32, FunctionValue<'ctx>)>,
    destructors: Vec<(u32, FunctionValue<'ctx>)>,
    reset_functions: Vec<String>,
    preprocessor_definitions: Vec<(String, String)>,
    pub(crate) thread_pool: ThreadPoolState<'ctx>,
    pub(crate) profiler: Option<ModelProfiler<'ctx>>,
    generated: Option<GeneratedRoutines>,
}

impl<'ctx> ModuleEmitter<'ctx> {
    /// Create an empty module for the options' target device.
    pub fn new(context: &'ctx Context, name: &str, options: CompilerOptions) -> EmitterResult<Self> {
        let module = context.create_module(name);
        Self::from_module(context, module, options)
    }

    fn from_module(context: &'ctx Context, module: Module<'ctx>, mut options: CompilerOptions) -> EmitterResult<Self> {
        let existing_layout = module.get_data_layout().as_str().to_string_lossy().into_owned();
        let existing_triple = module.get_triple().as_str().to_string_lossy().into_owned();
        options.target_device = options.target_device.resolved()?;

        if existing_triple.is_empty() {
            module.set_triple(&TargetTriple::create(&options.target_device.triple));
        }
        let data_layout = if existing_layout.is_empty() {
            options.target_device.data_layout.clone()
        } else {
            existing_layout
        };

        let name = module.get_name().to_string_lossy().into_owned();
        let diagnostics = DiagnosticHandler::new(context, options.verbose_diagnostics);
        let emitter = IrEmitter::new(context, module, &data_layout);
        log::debug!("Created module {} for {}", name, options.target_device.triple);

        let mut module_emitter = Self {
            name,
            options,
            emitter,
            diagnostics,
            declarations: HashMap::new(),
            declaration_order: Vec::new(),
            imported: HashSet::new(),
            function_stack: Vec::new(),
            globals: HashMap::new(),
            structs: Vec::new(),
            string_constants: HashMap::new(),
            metadata: MetadataStore::new(),
            callbacks: BTreeMap::new(),
            constructors: Vec::new(),
            destructors: Vec::new(),
            reset_functions: Vec::new(),
            preprocessor_definitions: Vec::new(),
            thread_pool: ThreadPoolState::default(),
            profiler: None,
            generated: None,
        };
        module_emitter.import_existing();
        Ok(module_emitter)
    }

    /// Rebuild the registries from functions and metadata already present in the module.
    fn import_existing(&mut self) {
        let functions: Vec<FunctionValue<'ctx>> = self.module().get_functions().collect();
        for function in functions {
            let name = function.get_name().to_string_lossy().into_owned();
            if name.starts_with("llvm.") {
                continue;
            }
            match self.declaration_of(function) {
                Ok(declaration) => {
                    self.declaration_order.push(name.clone());
                    self.imported.insert(name.clone());
                    self.declarations.insert(name, declaration);
                }
                Err(e) => log::debug!("Not importing {}: {}", name, e),
            }
        }

        for node in self.module().get_global_metadata("modelc.metadata") {
            let strings: Vec<String> = node
                .get_node_values()
                .into_iter()
                .filter_map(|v| match v {
                    BasicMetadataValueEnum::MetadataValue(m) => {
                        m.get_string_value().map(|s| s.to_string_lossy().into_owned())
                    }
                    _ => None,
                })
                .collect();
            let [function, tag, values @ ..] = strings.as_slice() else {
                continue;
            };
            if tag == metadata::CALLBACK_FUNCTION {
                if let Some(kind) = values.first().and_then(|v| CallbackKind::from_tag_value(v)) {
                    self.callbacks.entry(kind).or_default().push(function.clone());
                }
            }
            if let Some(struct_name) = tag.strip_prefix(metadata::STRUCT_FIELDS_PREFIX) {
                self.import_struct(struct_name, values);
            }
            self.metadata.insert(function, tag, values.to_vec());
        }

        let aggregator = format!("{}_Reset", self.name);
        let prefix = format!("{}_", self.name);
        self.reset_functions = self
            .declaration_order
            .iter()
            .filter(|n| n.starts_with(&prefix) && n.ends_with("_Reset") && **n != aggregator)
            .filter(|n| self.function(n).is_ok_and(|f| f.count_basic_blocks() > 0))
            .cloned()
            .collect();
        if self.function(&aggregator).is_ok_and(|f| f.count_basic_blocks() > 0) {
            self.generated = Some(self.routine_inputs());
        }
        if !self.declarations.is_empty() {
            log::debug!("Imported {} declarations into {}", self.declarations.len(), self.name);
        }
    }

    fn import_struct(&mut self, name: &str, field_names: &[String]) {
        let Some(struct_type) = self.context().get_struct_type(name) else {
            return;
        };
        let fields = struct_type
            .get_field_types()
            .into_iter()
            .map(|t| self.emitter.variable_type_of(t))
            .collect::<EmitterResult<Vec<_>>>();
        match fields {
            Ok(types) if types.len() == field_names.len() => {
                let fields = field_names.iter().cloned().zip(types).collect();
                self.structs.push(StructDefinition { name: name.to_string(), fields });
            }
            _ => log::debug!("Not importing struct {}", name),
        }
    }

    /// Signature of an existing LLVM function in descriptor form.
    fn declaration_of(&self, function: FunctionValue<'ctx>) -> EmitterResult<FunctionDeclaration> {
        let fn_type = function.get_type();
        let return_type = match fn_type.get_return_type() {
            Some(ty) => self.emitter.variable_type_of(ty)?,
            None => VariableType::Void,
        };
        let parameters = function
            .get_params()
            .into_iter()
            .enumerate()
            .map(|(index, param)| {
                let name = param.get_name().to_string_lossy().into_owned();
                let name = if name.is_empty() { format!("arg{index}") } else { name };
                Ok(Parameter::new(name, self.emitter.variable_type_of(param.get_type())?))
            })
            .collect::<EmitterResult<Vec<_>>>()?;
        let declaration = FunctionDeclaration::new(function.get_name().to_string_lossy(), return_type, parameters);
        Ok(if fn_type.is_var_arg() { declaration.variadic() } else { declaration })
    }

    /// Parse textual LLVM IR into a new module emitter.
    pub fn load_ir(context: &'ctx Context, name: &str, ir: &str, options: CompilerOptions) -> EmitterResult<Self> {
        let buffer = MemoryBuffer::create_from_memory_range_copy(ir.as_bytes(), name);
        let module = context
            .create_module_from_ir(buffer)
            .map_err(|e| EmitterError::ParserError(e.to_string()))?;
        log::info!("Loaded module {} from IR", name);
        Self::from_module(context, module, options)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub fn context(&self) -> &'ctx Context {
        self.emitter.context()
    }

    pub fn module(&self) -> &Module<'ctx> {
        self.emitter.module()
    }

    pub fn emitter(&self) -> &IrEmitter<'ctx> {
        &self.emitter
    }

    pub fn diagnostics(&self) -> &DiagnosticHandler<'ctx> {
        &self.diagnostics
    }

    pub fn print_ir(&self) -> String {
        self.module().print_to_string().to_string()
    }

    pub fn verify(&self) -> EmitterResult<()> {
        self.module()
            .verify()
            .map_err(|e| EmitterError::unexpected(format!("Module verification failed: {e}")))
    }

    // ---- Function declarations and the emission stack ----

    fn register_declaration(&mut self, declaration: &FunctionDeclaration) -> EmitterResult<FunctionValue<'ctx>> {
        let imported = self.imported.contains(&declaration.name);
        if let Some(existing) = self.declarations.get(&declaration.name) {
            if !imported && !existing.signature_matches(declaration) {
                return Err(EmitterError::FunctionNotFound(format!(
                    "{} redeclared with a different signature",
                    declaration.name
                )));
            }
        }
        // Checks the LLVM signature of any existing function.
        let function = self.emitter.declare_function(
            &declaration.name,
            &declaration.return_type,
            &declaration.parameter_types(),
            declaration.variadic,
        )?;
        if imported {
            self.imported.remove(&declaration.name);
            self.declarations.insert(declaration.name.clone(), declaration.clone());
        } else if !self.declarations.contains_key(&declaration.name) {
            self.declarations.insert(declaration.name.clone(), declaration.clone());
            self.declaration_order.push(declaration.name.clone());
        }
        for (index, param) in declaration.parameters.iter().enumerate() {
            if let Some(value) = function.get_nth_param(index as u32) {
                value.set_name(&param.name);
            }
            if param.flags.contains(ArgFlags::NO_ALIAS) {
                let kind = Attribute::get_named_enum_kind_id("noalias");
                let attribute = self.context().create_enum_attribute(kind, 0);
                function.add_attribute(AttributeLoc::Param(index as u32), attribute);
            }
        }
        Ok(function)
    }

    /// Declare a function defined elsewhere, such as a C library routine.
    pub fn declare_function(&mut self, declaration: FunctionDeclaration) -> EmitterResult<FunctionValue<'ctx>> {
        self.register_declaration(&declaration)
    }

    pub fn declaration(&self, name: &str) -> EmitterResult<&FunctionDeclaration> {
        self.declarations
            .get(name)
            .ok_or_else(|| EmitterError::FunctionNotFound(name.to_string()))
    }

    /// Declarations in the order they were first seen.
    pub fn declarations(&self) -> impl Iterator<Item = &FunctionDeclaration> {
        self.declaration_order.iter().filter_map(|n| self.declarations.get(n))
    }

    pub fn function(&self, name: &str) -> EmitterResult<FunctionValue<'ctx>> {
        self.module()
            .get_function(name)
            .ok_or_else(|| EmitterError::FunctionNotFound(name.to_string()))
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.module().get_function(name).is_some()
    }

    /// Begin emitting the body of `name`. The returned emitter is positioned in its entry
    /// block; any function already being emitted resumes when this one ends.
    pub fn begin_function(&mut self, name: &str, return_type: VariableType, parameters: &[(&str, VariableType)]) -> EmitterResult<FunctionEmitter<'_, 'ctx>> {
        let parameters = parameters
            .iter()
            .map(|(n, t)| Parameter::new(*n, t.clone()))
            .collect();
        self.begin_function_with_declaration(FunctionDeclaration::new(name, return_type, parameters))
    }

    /// Like [`begin_function`](Self::begin_function), with attributes per parameter.
    pub fn begin_function_with_flags(&mut self, name: &str, return_type: VariableType, parameters: &[(&str, VariableType, ArgFlags)]) -> EmitterResult<FunctionEmitter<'_, 'ctx>> {
        let parameters = parameters
            .iter()
            .map(|(n, t, flags)| Parameter::with_flags(*n, t.clone(), *flags))
            .collect();
        self.begin_function_with_declaration(FunctionDeclaration::new(name, return_type, parameters))
    }

    pub fn begin_function_with_declaration(&mut self, declaration: FunctionDeclaration) -> EmitterResult<FunctionEmitter<'_, 'ctx>> {
        let function = self.register_declaration(&declaration)?;
        if function.count_basic_blocks() > 0 {
            return Err(EmitterError::BadFunctionArguments(format!(
                "function {} already has a body",
                declaration.name
            )));
        }
        let resume_block = self.emitter.current_block();
        self.function_stack.push(FunctionFrame { function, resume_block });
        let entry = self.emitter.begin_function_body(function);
        log::debug!("Begin function {} (depth {})", declaration.name, self.function_stack.len());
        Ok(FunctionEmitter::new(self, function, declaration, entry))
    }

    /// The function on top of the emission stack.
    pub fn current_function(&self) -> Option<FunctionValue<'ctx>> {
        self.function_stack.last().map(|f| f.function)
    }

    pub fn function_depth(&self) -> usize {
        self.function_stack.len()
    }

    /// End the function on top of the stack, returning `value` if the current block is not
    /// yet terminated, and resume the function it interrupted.
    pub fn end_function(&mut self, value: Option<TypedValue<'ctx>>) -> EmitterResult<FunctionValue<'ctx>> {
        let frame = self.function_stack.pop().ok_or_else(|| {
            EmitterError::IndexOutOfRange("end_function called with no function being emitted".to_string())
        })?;
        let function = frame.function;
        let name = function.get_name().to_string_lossy().into_owned();

        let current = self.emitter.current_block();
        let live = live_blocks(function);
        let dangling = current.is_some_and(|b| !live.contains(&b));
        if dangling && !self.emitter.is_terminated() {
            // Left behind by an early return; pruned below.
            self.emitter.builder().build_unreachable()?;
        } else if !self.emitter.is_terminated() {
            let returns_void = function.get_type().get_return_type().is_none();
            match (&value, returns_void) {
                (None, true) => self.emitter.ret(None)?,
                (Some(v), false) => self.emitter.ret(Some(v))?,
                (None, false) => {
                    return Err(EmitterError::BadFunctionArguments(format!(
                        "function {name} must return a value"
                    )));
                }
                (Some(_), true) => {
                    return Err(EmitterError::BadFunctionArguments(format!(
                        "void function {name} cannot return a value"
                    )));
                }
            }
        }

        prune_unreachable_blocks(function);

        match frame.resume_block {
            Some(block) => self.emitter.position_at_end(block),
            None => self.emitter.builder().clear_insertion_position(),
        }

        if !function.verify(false) {
            return Err(EmitterError::unexpected(format!("Function verification failed: {name}")));
        }
        log::debug!("End function {}", name);
        Ok(function)
    }

    // ---- Globals ----

    fn add_global(&mut self, name: &str, ty: &VariableType, initializer: Option<BasicValueEnum<'ctx>>, constant: bool) -> EmitterResult<GlobalValue<'ctx>> {
        if self.globals.contains_key(name) || self.module().get_global(name).is_some() {
            return Err(EmitterError::VariableScopeNotSupported(format!("global {name} already exists")));
        }
        let llvm_ty = self.emitter.ty(ty)?;
        let global = self.module().add_global(llvm_ty, None, name);
        let init = match initializer {
            Some(value) => value,
            None => self.emitter.zero(ty)?.value,
        };
        global.set_initializer(&init);
        global.set_constant(constant);
        if self.options.global_value_alignment > 0 {
            global.set_alignment(self.options.global_value_alignment);
        }
        log::trace!("global {}: {}", name, ty);
        Ok(global)
    }

    fn register_global(&mut self, name: &str, value: TypedValue<'ctx>) -> TypedValue<'ctx> {
        self.globals.insert(name.to_string(), value.clone());
        value
    }

    /// Zero-initialized module storage. Returns a pointer to it.
    pub fn global(&mut self, ty: &VariableType, name: &str) -> EmitterResult<TypedValue<'ctx>> {
        let global = self.add_global(name, ty, None, false)?;
        Ok(self.register_global(name, TypedValue::new(global.as_pointer_value().into(), ty.pointer_to())))
    }

    pub fn global_with_value<T: ScalarValue>(&mut self, name: &str, value: T) -> EmitterResult<TypedValue<'ctx>> {
        let ty = T::variable_type();
        let global = self.add_global(name, &ty, Some(value.const_value(self.context())), false)?;
        Ok(self.register_global(name, TypedValue::new(global.as_pointer_value().into(), ty.pointer_to())))
    }

    /// Thread-local, zero-initialized storage.
    pub fn thread_local_global(&mut self, ty: &VariableType, name: &str) -> EmitterResult<TypedValue<'ctx>> {
        let global = self.add_global(name, ty, None, false)?;
        global.set_thread_local(true);
        Ok(self.register_global(name, TypedValue::new(global.as_pointer_value().into(), ty.pointer_to())))
    }

    /// Zero-initialized array of `len` elements. Returns a pointer to the first element.
    pub fn global_array(&mut self, elem: &VariableType, name: &str, len: u32) -> EmitterResult<TypedValue<'ctx>> {
        let global = self.add_global(name, &elem.array_of(len), None, false)?;
        Ok(self.register_global(name, TypedValue::new(global.as_pointer_value().into(), elem.pointer_to())))
    }

    pub fn global_array_with_values<T: ScalarValue>(&mut self, name: &str, values: &[T]) -> EmitterResult<TypedValue<'ctx>> {
        let array = self.emitter.const_array(values)?;
        let global = self.add_global(name, &array.ty, Some(array.value), false)?;
        Ok(self.register_global(name, TypedValue::new(global.as_pointer_value().into(), T::variable_type().pointer_to())))
    }

    /// Read-only scalar.
    pub fn constant<T: ScalarValue>(&mut self, name: &str, value: T) -> EmitterResult<TypedValue<'ctx>> {
        let ty = T::variable_type();
        let global = self.add_global(name, &ty, Some(value.const_value(self.context())), true)?;
        Ok(self.register_global(name, TypedValue::new(global.as_pointer_value().into(), ty.pointer_to())))
    }

    /// Read-only array. Returns a pointer to the first element.
    pub fn constant_array<T: ScalarValue>(&mut self, name: &str, values: &[T]) -> EmitterResult<TypedValue<'ctx>> {
        let array = self.emitter.const_array(values)?;
        let global = self.add_global(name, &array.ty, Some(array.value), true)?;
        Ok(self.register_global(name, TypedValue::new(global.as_pointer_value().into(), T::variable_type().pointer_to())))
    }

    pub fn global_value(&self, name: &str) -> Option<TypedValue<'ctx>> {
        self.globals.get(name).cloned()
    }

    /// A NUL-terminated string constant, shared between identical texts.
    pub fn string_literal(&mut self, text: &str) -> TypedValue<'ctx> {
        if let Some(existing) = self.string_constants.get(text) {
            return existing.clone();
        }
        let name = format!(".str.{}", self.string_constants.len());
        let value = self.emitter.string_constant(&name, text);
        self.string_constants.insert(text.to_string(), value.clone());
        value
    }

    // ---- Structs ----

    /// Return the named struct, creating it on first use. Field names are recorded for
    /// header emission.
    pub fn get_or_create_struct(&mut self, name: &str, fields: &[(&str, VariableType)]) -> EmitterResult<VariableType> {
        let requested: Vec<(String, VariableType)> =
            fields.iter().map(|(n, t)| (n.to_string(), t.clone())).collect();
        if let Some(existing) = self.structs.iter().find(|s| s.name == name) {
            let same_types = existing.fields.len() == requested.len()
                && existing.fields.iter().zip(&requested).all(|(a, b)| a.1 == b.1);
            if !same_types {
                return Err(EmitterError::BadStructDefinition(format!(
                    "struct {name} already defined with different fields"
                )));
            }
            return Ok(VariableType::Struct(name.to_string()));
        }

        let field_types = requested
            .iter()
            .map(|(_, t)| self.emitter.ty(t))
            .collect::<EmitterResult<Vec<_>>>()?;
        if self.context().get_struct_type(name).is_none() {
            let struct_type = self.context().opaque_struct_type(name);
            struct_type.set_body(&field_types, false);
        }
        log::debug!("Created struct {} with {} fields", name, requested.len());

        let field_names: Vec<&str> = requested.iter().map(|(n, _)| n.as_str()).collect();
        self.insert_metadata(&format!("{}{}", metadata::STRUCT_FIELDS_PREFIX, name), &field_names)?;
        self.structs.push(StructDefinition { name: name.to_string(), fields: requested });
        Ok(VariableType::Struct(name.to_string()))
    }

    pub fn struct_definition(&self, name: &str) -> EmitterResult<&StructDefinition> {
        self.structs
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| EmitterError::BadStructDefinition(format!("unknown struct {name}")))
    }

    pub fn struct_definitions(&self) -> &[StructDefinition] {
        &self.structs
    }

    /// Declare `name` in the generated C header.
    pub fn include_type_in_header(&mut self, name: &str) -> EmitterResult<()> {
        self.struct_definition(name)?;
        self.insert_metadata(metadata::DECLARE_TYPE_IN_HEADER, &[name])
    }

    // ---- Metadata ----

    fn mirror_metadata(&self, function: &str, tag: &str, values: &[&str]) -> EmitterResult<()> {
        let context = self.context();
        let mut nodes: Vec<BasicMetadataValueEnum<'ctx>> =
            vec![context.metadata_string(function).into(), context.metadata_string(tag).into()];
        nodes.extend(values.iter().map(|v| BasicMetadataValueEnum::from(context.metadata_string(v))));
        let node = context.metadata_node(&nodes);
        self.module()
            .add_global_metadata("modelc.metadata", &node)
            .map_err(|e| EmitterError::unexpected(format!("cannot attach metadata {tag}: {e}")))
    }

    pub fn insert_metadata(&mut self, tag: &str, values: &[&str]) -> EmitterResult<()> {
        self.mirror_metadata("", tag, values)?;
        self.metadata.insert("", tag, values.iter().map(|v| v.to_string()).collect());
        Ok(())
    }

    pub fn insert_function_metadata(&mut self, function: &str, tag: &str, values: &[&str]) -> EmitterResult<()> {
        self.function(function)?;
        self.mirror_metadata(function, tag, values)?;
        self.metadata.insert(function, tag, values.iter().map(|v| v.to_string()).collect());
        Ok(())
    }

    pub fn has_metadata(&self, tag: &str) -> bool {
        self.metadata.contains("", tag)
    }

    pub fn has_function_metadata(&self, function: &str, tag: &str) -> bool {
        self.metadata.contains(function, tag)
    }

    /// Values recorded under `tag`. Fails with `MetadataNotFound` when the tag was never
    /// inserted; check with [`has_metadata`](Self::has_metadata) first.
    pub fn get_metadata(&self, tag: &str) -> EmitterResult<&[Vec<String>]> {
        self.metadata.get("", tag)
    }

    pub fn get_function_metadata(&self, function: &str, tag: &str) -> EmitterResult<&[Vec<String>]> {
        self.metadata.get(function, tag)
    }

    pub fn try_get_metadata(&self, tag: &str) -> Option<&[Vec<String>]> {
        self.metadata.try_get("", tag)
    }

    pub fn functions_with_tag(&self, tag: &str) -> Vec<(String, Vec<String>)> {
        self.metadata.functions_with_tag(tag)
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Record `function` as a callback of `kind`.
    pub fn register_callback(&mut self, function: &str, kind: CallbackKind) -> EmitterResult<()> {
        if self.callbacks(kind).iter().any(|f| f == function) {
            return Ok(());
        }
        self.insert_function_metadata(function, metadata::CALLBACK_FUNCTION, &[kind.tag_value()])?;
        self.callbacks.entry(kind).or_default().push(function.to_string());
        Ok(())
    }

    pub fn callbacks(&self, kind: CallbackKind) -> &[String] {
        self.callbacks.get(&kind).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn add_preprocessor_definition(&mut self, name: &str, value: &str) {
        self.preprocessor_definitions.push((name.to_string(), value.to_string()));
    }

    pub fn preprocessor_definitions(&self) -> &[(String, String)] {
        &self.preprocessor_definitions
    }

    // ---- Constructors, destructors and reset ----

    fn rebuild_structor_list(&self, list: &str, entries: &[(u32, FunctionValue<'ctx>)]) {
        if let Some(old) = self.module().get_global(list) {
            unsafe { old.delete() };
        }
        let context = self.context();
        let i32_ty = context.i32_type();
        let ptr_ty = self.emitter.ptr_type();
        let entry_ty = context.struct_type(&[i32_ty.into(), ptr_ty.into(), ptr_ty.into()], false);
        let values: Vec<StructValue<'ctx>> = entries
            .iter()
            .map(|(priority, function)| {
                entry_ty.const_named_struct(&[
                    i32_ty.const_int(*priority as u64, false).into(),
                    function.as_global_value().as_pointer_value().into(),
                    ptr_ty.const_null().into(),
                ])
            })
            .collect();
        let global = self
            .module()
            .add_global(entry_ty.array_type(values.len() as u32), None, list);
        global.set_linkage(Linkage::Appending);
        global.set_initializer(&entry_ty.const_array(&values));
    }

    /// Run `function` at program startup.
    pub fn add_initialization_function(&mut self, function: FunctionValue<'ctx>, priority: u32) {
        self.constructors.push((priority, function));
        self.rebuild_structor_list("llvm.global_ctors", &self.constructors);
    }

    /// Run `function` at program teardown.
    pub fn add_finalization_function(&mut self, function: FunctionValue<'ctx>, priority: u32) {
        self.destructors.push((priority, function));
        self.rebuild_structor_list("llvm.global_dtors", &self.destructors);
    }

    /// Begin a reset routine for one node. All reset routines are called from
    /// `<module>_Reset`.
    pub fn begin_reset_function(&mut self, node_name: &str) -> EmitterResult<FunctionEmitter<'_, 'ctx>> {
        let name = format!("{}_{}_Reset", self.name, node_name);
        self.reset_functions.push(name.clone());
        self.begin_function(&name, VariableType::Void, &[])
    }

    /// Begin a routine that `finish` may rebuild: any body from an earlier write is
    /// discarded first.
    pub(crate) fn begin_generated_function(&mut self, name: &str, return_type: VariableType, parameters: &[(&str, VariableType)]) -> EmitterResult<FunctionEmitter<'_, 'ctx>> {
        if let Some(function) = self.module().get_function(name) {
            if function.count_basic_blocks() > 0 {
                log::debug!("Rebuilding {}", name);
                delete_blocks(function.get_basic_blocks());
            }
        }
        self.begin_function(name, return_type, parameters)
    }

    fn routine_inputs(&self) -> GeneratedRoutines {
        GeneratedRoutines {
            resets: self.reset_functions.len(),
            profiled_nodes: self.profiler.as_ref().map(|p| (p.num_nodes(), p.num_node_types())),
        }
    }

    fn emit_reset_aggregator(&mut self) -> EmitterResult<()> {
        let name = format!("{}_Reset", self.name);
        let resets = self.reset_functions.clone();
        let mut function = self.begin_generated_function(&name, VariableType::Void, &[])?;
        for reset in &resets {
            function.call(reset, &[])?;
        }
        function.include_in_header()?;
        function.set_comment("Reset all node state to its initial values")?;
        function.end()?;
        Ok(())
    }

    /// Emit module-level routines that depend on everything else being emitted. Every
    /// write calls it; the routines are rebuilt only when reset functions or profiled nodes
    /// were added since the last call.
    pub fn finish(&mut self) -> EmitterResult<()> {
        if !self.function_stack.is_empty() {
            return Err(EmitterError::IndexOutOfRange(format!(
                "{} functions still being emitted",
                self.function_stack.len()
            )));
        }
        let inputs = self.routine_inputs();
        if self.generated == Some(inputs) {
            return Ok(());
        }
        self.emit_reset_aggregator()?;
        if self.profiler.is_some() {
            ModelProfiler::emit_model_profiler_functions(self)?;
        }
        self.generated = Some(inputs);
        Ok(())
    }

    // ---- Output ----

    /// Produce the complete artifact in memory.
    pub fn render(&mut self, format: ModuleOutputFormat, options: &MachineCodeOptions) -> EmitterResult<Vec<u8>> {
        self.finish()?;
        match format {
            ModuleOutputFormat::Ir => Ok(self.print_ir().into_bytes()),
            ModuleOutputFormat::Bitcode => Ok(self.module().write_bitcode_to_memory().as_slice().to_vec()),
            ModuleOutputFormat::Assembly => machine_code::generate_machine_code(self, FileType::Assembly, options),
            ModuleOutputFormat::ObjectCode => machine_code::generate_machine_code(self, FileType::Object, options),
            ModuleOutputFormat::CHeader => Ok(header_writer::write_header(self)?.into_bytes()),
            ModuleOutputFormat::SwigInterface => Ok(swig_writer::write_swig_interface(self)?.into_bytes()),
        }
    }

    pub fn machine_code_options(&self) -> MachineCodeOptions {
        MachineCodeOptions::from_compiler_options(&self.options)
    }

    pub fn write_to_stream<W: Write>(&mut self, stream: &mut W, format: ModuleOutputFormat) -> EmitterResult<()> {
        let options = self.machine_code_options();
        self.write_to_stream_with_options(stream, format, &options)
    }

    pub fn write_to_stream_with_options<W: Write>(&mut self, stream: &mut W, format: ModuleOutputFormat, options: &MachineCodeOptions) -> EmitterResult<()> {
        let bytes = self.render(format, options)?;
        stream.write_all(&bytes)?;
        Ok(())
    }

    pub fn write_to_file(&mut self, path: impl AsRef<Path>, format: ModuleOutputFormat) -> EmitterResult<()> {
        let options = self.machine_code_options();
        self.write_to_file_with_options(path, format, &options)
    }

    /// Write the artifact to a temporary sibling of `path`, then rename it into place.
    pub fn write_to_file_with_options(&mut self, path: impl AsRef<Path>, format: ModuleOutputFormat, options: &MachineCodeOptions) -> EmitterResult<()> {
        let path = path.as_ref();
        let bytes = self.render(format, options)?;
        let file_name = path
            .file_name()
            .ok_or_else(|| EmitterError::BadFunctionArguments(format!("{} is not a file path", path.display())))?;
        let temp = path.with_file_name(format!(
            ".{}.tmp-{}",
            file_name.to_string_lossy(),
            std::process::id()
        ));
        let committed = fs::write(&temp, &bytes).and_then(|_| fs::rename(&temp, path));
        if let Err(e) = committed {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        log::info!("Wrote {} ({} bytes) to {}", format, bytes.len(), path.display());
        Ok(())
    }

    /// Byte size of a type under the module's data layout.
    pub fn size_of(&self, ty: &VariableType) -> EmitterResult<u64> {
        self.emitter.size_of(ty)
    }
}

/// Blocks reachable from the entry block.
fn live_blocks(function: FunctionValue<'_>) -> Vec<BasicBlock<'_>> {
    let blocks = function.get_basic_blocks();
    let Some(entry) = blocks.first().copied() else {
        return Vec::new();
    };

    let mut live = vec![entry];
    let mut changed = true;
    while changed {
        changed = false;
        for block in &blocks {
            if live.contains(block) {
                continue;
            }
            let mut use_ = block.get_first_use();
            while let Some(u) = use_ {
                let from = match u.get_user() {
                    AnyValueEnum::InstructionValue(i) => i.get_parent(),
                    _ => None,
                };
                if from.is_some_and(|b| live.contains(&b)) {
                    live.push(*block);
                    changed = true;
                    break;
                }
                use_ = u.get_next_use();
            }
        }
    }
    live
}

/// Delete blocks that cannot be reached from the entry block.
fn prune_unreachable_blocks(function: FunctionValue<'_>) {
    let live = live_blocks(function);
    let dead: Vec<_> = function.get_basic_blocks().into_iter().filter(|b| !live.contains(b)).collect();
    if dead.is_empty() {
        return;
    }
    log::trace!("pruning {} unreachable blocks", dead.len());
    delete_blocks(dead);
}

/// Delete `blocks`, given in layout order.
fn delete_blocks(blocks: Vec<BasicBlock<'_>>) {
    for block in &blocks {
        if let Some(terminator) = block.get_terminator() {
            terminator.erase_from_basic_block();
        }
    }
    // Later blocks only use values from earlier ones, so delete back to front.
    for block in blocks.into_iter().rev() {
        let _ = unsafe { block.delete() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parsing() {
        assert_eq!("ir".parse::<ModuleOutputFormat>().unwrap(), ModuleOutputFormat::Ir);
        assert_eq!("obj".parse::<ModuleOutputFormat>().unwrap(), ModuleOutputFormat::ObjectCode);
        assert_eq!("i".parse::<ModuleOutputFormat>().unwrap(), ModuleOutputFormat::SwigInterface);
        assert!("exe".parse::<ModuleOutputFormat>().is_err());
        assert_eq!(ModuleOutputFormat::CHeader.extension(), "h");
    }

    #[test]
    fn test_signature_matching_ignores_names() {
        let a = FunctionDeclaration::new("f", VariableType::Int32, vec![Parameter::new("x", VariableType::Int32)]);
        let b = FunctionDeclaration::new("f", VariableType::Int32, vec![Parameter::new("y", VariableType::Int32)]);
        let c = FunctionDeclaration::new("f", VariableType::Int64, vec![Parameter::new("x", VariableType::Int32)]);
        assert!(a.signature_matches(&b));
        assert!(!a.signature_matches(&c));
    }

    #[test]
    fn test_end_without_begin_is_out_of_range() {
        let context = Context::create();
        let mut module = ModuleEmitter::new(&context, "empty", CompilerOptions::default()).unwrap();
        let err = module.end_function(None).unwrap_err();
        assert!(matches!(err, EmitterError::IndexOutOfRange(_)));
    }

    #[test]
    fn test_unreachable_block_after_early_return_is_pruned() {
        let context = Context::create();
        let mut module = ModuleEmitter::new(&context, "prune", CompilerOptions::default()).unwrap();
        let mut f = module
            .begin_function("early", VariableType::Int32, &[("x", VariableType::Int32)])
            .unwrap();
        let x = f.argument(0).unwrap();
        f.return_value(&x).unwrap();
        let function = f.end().unwrap();
        assert_eq!(function.count_basic_blocks(), 1);
        module.verify().unwrap();
    }
}
