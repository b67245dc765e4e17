// This module implements FunctionEmitter, the handle through which one function body is
// emitted. It mutably borrows its ModuleEmitter for as long as the body is open, so only
// the innermost function can emit instructions; nested functions are begun through
// module(), which reborrows the module emitter and relies on the module's explicit frame
// stack to restore this function's insertion point when the nested one ends. Local
// storage is always allocated in the entry block so every alloca dominates its uses.
// Control constructs (if/else-if/else, counted loops with a bound that may be re-read from
// memory every iteration, and while loops over a boolean variable) take closures that
// receive the emitter back, and they only branch out of blocks that the body left without
// a terminator. Calls are checked against the module's recorded declarations. Tagging
// methods record the metadata that header and SWIG generation consume.

//! Function body emission.

use inkwell::basic_block::BasicBlock;
use inkwell::values::{BasicValueEnum, FunctionValue};

use crate::error::{EmitterError, EmitterResult};
use crate::ir_emitter::IrEmitter;
use crate::metadata::{self, CallbackKind};
use crate::module_emitter::{FunctionDeclaration, ModuleEmitter, Parameter};
use crate::types::{
    ScalarValue, TypedComparison, TypedOperator, TypedValue, UnaryOperation, VariableType,
};

pub struct FunctionEmitter<'m, 'ctx> {
    module: &'m mut ModuleEmitter<'ctx>,
    function: FunctionValue<'ctx>,
    declaration: FunctionDeclaration,
    entry: BasicBlock<'ctx>,
}

impl<'m, 'ctx> FunctionEmitter<'m, 'ctx> {
    pub(crate) fn new(
        module: &'m mut ModuleEmitter<'ctx>,
        function: FunctionValue<'ctx>,
        declaration: FunctionDeclaration,
        entry: BasicBlock<'ctx>,
    ) -> Self {
        Self { module, function, declaration, entry }
    }

    /// The owning module emitter. Begin nested functions through this.
    pub fn module(&mut self) -> &mut ModuleEmitter<'ctx> {
        self.module
    }

    pub fn emitter(&self) -> &IrEmitter<'ctx> {
        self.module.emitter()
    }

    pub fn function(&self) -> FunctionValue<'ctx> {
        self.function
    }

    pub fn name(&self) -> &str {
        &self.declaration.name
    }

    pub fn declaration(&self) -> &FunctionDeclaration {
        &self.declaration
    }

    pub fn entry_block(&self) -> BasicBlock<'ctx> {
        self.entry
    }

    // ---- Arguments ----

    pub fn argument(&self, index: usize) -> EmitterResult<TypedValue<'ctx>> {
        let param = self.declaration.parameters.get(index).ok_or_else(|| {
            EmitterError::IndexOutOfRange(format!("{} has no argument {index}", self.declaration.name))
        })?;
        let value = self
            .function
            .get_nth_param(index as u32)
            .ok_or_else(|| EmitterError::unexpected(format!("missing parameter {index}")))?;
        Ok(TypedValue::new(value, param.ty.clone()))
    }

    pub fn argument_by_name(&self, name: &str) -> EmitterResult<TypedValue<'ctx>> {
        let index = self
            .declaration
            .parameters
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| {
                EmitterError::BadFunctionArguments(format!("{} has no argument {name}", self.declaration.name))
            })?;
        self.argument(index)
    }

    pub fn arguments(&self) -> EmitterResult<Vec<TypedValue<'ctx>>> {
        (0..self.declaration.parameters.len()).map(|i| self.argument(i)).collect()
    }

    // ---- Values ----

    pub fn literal<T: ScalarValue>(&self, value: T) -> TypedValue<'ctx> {
        self.emitter().literal(value)
    }

    pub fn int_literal(&self, ty: &VariableType, value: i64) -> EmitterResult<TypedValue<'ctx>> {
        self.emitter().int_literal(ty, value)
    }

    pub fn binary(&self, op: TypedOperator, lhs: &TypedValue<'ctx>, rhs: &TypedValue<'ctx>) -> EmitterResult<TypedValue<'ctx>> {
        self.emitter().binary(op, lhs, rhs, "")
    }

    pub fn compare(&self, cmp: TypedComparison, lhs: &TypedValue<'ctx>, rhs: &TypedValue<'ctx>) -> EmitterResult<TypedValue<'ctx>> {
        self.emitter().compare(cmp.for_type(&lhs.ty), lhs, rhs, "")
    }

    pub fn unary(&self, op: UnaryOperation, value: &TypedValue<'ctx>) -> EmitterResult<TypedValue<'ctx>> {
        self.emitter().unary(op, value, "")
    }

    pub fn cast(&self, value: &TypedValue<'ctx>, to: &VariableType) -> EmitterResult<TypedValue<'ctx>> {
        self.emitter().cast(value, to, "")
    }

    pub fn select(&self, cond: &TypedValue<'ctx>, then: &TypedValue<'ctx>, otherwise: &TypedValue<'ctx>) -> EmitterResult<TypedValue<'ctx>> {
        self.emitter().select(cond, then, otherwise, "")
    }

    // ---- Local storage ----

    fn entry_alloca(&self, ty: &VariableType, name: &str) -> EmitterResult<TypedValue<'ctx>> {
        let emitter = self.emitter();
        let resume = emitter.current_block();
        match self.entry.get_first_instruction() {
            Some(first) => emitter.builder().position_before(&first),
            None => emitter.position_at_end(self.entry),
        }
        let slot = emitter.alloca(ty, None, name);
        if let Some(block) = resume {
            emitter.position_at_end(block);
        }
        Ok(TypedValue::new(slot?.into(), ty.pointer_to()))
    }

    /// Stack storage for one value. Returns a pointer to it.
    pub fn variable(&self, ty: &VariableType, name: &str) -> EmitterResult<TypedValue<'ctx>> {
        self.entry_alloca(ty, name)
    }

    /// Stack storage for one value, initialized to `value`.
    pub fn variable_with_value(&self, value: &TypedValue<'ctx>, name: &str) -> EmitterResult<TypedValue<'ctx>> {
        let slot = self.entry_alloca(&value.ty, name)?;
        self.store(&slot, value)?;
        Ok(slot)
    }

    /// Stack storage for `len` elements. Returns a pointer to the first element.
    pub fn variable_array(&self, elem: &VariableType, len: u32, name: &str) -> EmitterResult<TypedValue<'ctx>> {
        let array = self.entry_alloca(&elem.array_of(len), name)?;
        Ok(TypedValue::new(array.value, elem.pointer_to()))
    }

    pub fn load(&self, ptr: &TypedValue<'ctx>) -> EmitterResult<TypedValue<'ctx>> {
        self.emitter().load(ptr, "")
    }

    pub fn store(&self, ptr: &TypedValue<'ctx>, value: &TypedValue<'ctx>) -> EmitterResult<()> {
        self.emitter().store(ptr, value)
    }

    /// Address of `ptr[index]`.
    pub fn pointer_offset(&self, ptr: &TypedValue<'ctx>, index: &TypedValue<'ctx>) -> EmitterResult<TypedValue<'ctx>> {
        self.emitter().gep(ptr, index, "")
    }

    pub fn value_at(&self, ptr: &TypedValue<'ctx>, index: &TypedValue<'ctx>) -> EmitterResult<TypedValue<'ctx>> {
        let address = self.pointer_offset(ptr, index)?;
        self.load(&address)
    }

    pub fn set_value_at(&self, ptr: &TypedValue<'ctx>, index: &TypedValue<'ctx>, value: &TypedValue<'ctx>) -> EmitterResult<()> {
        let address = self.pointer_offset(ptr, index)?;
        self.store(&address, value)
    }

    /// `*ptr = *ptr op value`.
    pub fn operation_and_update(&self, ptr: &TypedValue<'ctx>, op: TypedOperator, value: &TypedValue<'ctx>) -> EmitterResult<()> {
        let current = self.load(ptr)?;
        let updated = self.binary(op, &current, value)?;
        self.store(ptr, &updated)
    }

    /// Address of field `field` of the struct `ptr` points to.
    pub fn struct_field_pointer(&self, ptr: &TypedValue<'ctx>, field: u32) -> EmitterResult<TypedValue<'ctx>> {
        let VariableType::Struct(name) = ptr.ty.pointee()? else {
            return Err(EmitterError::type_not_supported(format!("{} does not point to a struct", ptr.ty)));
        };
        let definition = self.module.struct_definition(name)?;
        let (_, field_ty) = definition.fields.get(field as usize).ok_or_else(|| {
            EmitterError::IndexOutOfRange(format!("struct {name} has no field {field}"))
        })?;
        self.emitter().struct_gep(ptr, field, field_ty, "")
    }

    /// Store `values` into the struct's fields in order.
    pub fn fill_struct(&self, ptr: &TypedValue<'ctx>, values: &[TypedValue<'ctx>]) -> EmitterResult<()> {
        for (index, value) in values.iter().enumerate() {
            let field = self.struct_field_pointer(ptr, index as u32)?;
            self.store(&field, value)?;
        }
        Ok(())
    }

    // ---- Memory ----

    pub fn memory_copy(&self, dest: &TypedValue<'ctx>, src: &TypedValue<'ctx>, count: &TypedValue<'ctx>) -> EmitterResult<()> {
        self.emitter().mem_copy(dest, src, count)
    }

    pub fn memory_move(&self, dest: &TypedValue<'ctx>, src: &TypedValue<'ctx>, count: &TypedValue<'ctx>) -> EmitterResult<()> {
        self.emitter().mem_move(dest, src, count)
    }

    pub fn memory_set(&self, dest: &TypedValue<'ctx>, value: u8, count: &TypedValue<'ctx>) -> EmitterResult<()> {
        self.emitter().mem_set(dest, value, count)
    }

    /// Shift `buffer` left by `data_len` elements and append `new_data`. When given,
    /// `shifted_out` receives the elements dropped from the front.
    pub fn shift_and_update(&self, buffer: &TypedValue<'ctx>, buffer_len: u32, new_data: &TypedValue<'ctx>, data_len: u32, shifted_out: Option<&TypedValue<'ctx>>) -> EmitterResult<()> {
        if data_len > buffer_len {
            return Err(EmitterError::IndexOutOfRange(format!(
                "cannot shift {data_len} elements into a buffer of {buffer_len}"
            )));
        }
        let count = |n: u32| self.literal(n as i32);
        if let Some(out) = shifted_out {
            self.memory_copy(out, buffer, &count(data_len))?;
        }
        let kept = buffer_len - data_len;
        if kept > 0 {
            let tail = self.pointer_offset(buffer, &count(data_len))?;
            self.memory_move(buffer, &tail, &count(kept))?;
        }
        let insert_at = self.pointer_offset(buffer, &count(kept))?;
        self.memory_copy(&insert_at, new_data, &count(data_len))
    }

    // ---- Calls ----

    fn check_call_arguments(declaration: &FunctionDeclaration, args: &[TypedValue<'ctx>]) -> EmitterResult<()> {
        let expected = declaration.parameters.len();
        let count_ok = if declaration.variadic { args.len() >= expected } else { args.len() == expected };
        if !count_ok {
            return Err(EmitterError::BadFunctionArguments(format!(
                "{} expects {} arguments, got {}",
                declaration.name,
                expected,
                args.len()
            )));
        }
        for (param, arg) in declaration.parameters.iter().zip(args) {
            if !param.ty.accepts(&arg.ty) {
                return Err(EmitterError::BadFunctionArguments(format!(
                    "argument {} of {} expects {}, got {}",
                    param.name, declaration.name, param.ty, arg.ty
                )));
            }
        }
        Ok(())
    }

    fn emit_call(&self, function: FunctionValue<'ctx>, declaration: &FunctionDeclaration, args: &[TypedValue<'ctx>]) -> EmitterResult<Option<TypedValue<'ctx>>> {
        Self::check_call_arguments(declaration, args)?;
        let raw: Vec<BasicValueEnum<'ctx>> = args.iter().map(|a| a.value).collect();
        let name = if declaration.return_type.is_void() { "" } else { "call" };
        let result = self.emitter().call(function, &raw, name)?;
        Ok(result.map(|v| TypedValue::new(v, declaration.return_type.clone())))
    }

    /// Call a function declared in this module.
    pub fn call(&self, name: &str, args: &[TypedValue<'ctx>]) -> EmitterResult<Option<TypedValue<'ctx>>> {
        let declaration = self.module.declaration(name)?.clone();
        let function = self.module.function(name)?;
        self.emit_call(function, &declaration, args)
    }

    /// Call `function`, whose signature must be recorded in this module.
    pub fn call_value(&self, function: FunctionValue<'ctx>, args: &[TypedValue<'ctx>]) -> EmitterResult<Option<TypedValue<'ctx>>> {
        let name = function.get_name().to_string_lossy().into_owned();
        let declaration = self.module.declaration(&name)?.clone();
        self.emit_call(function, &declaration, args)
    }

    /// Declare `declaration` if it is new and call it.
    pub(crate) fn call_runtime(&mut self, declaration: FunctionDeclaration, args: &[TypedValue<'ctx>]) -> EmitterResult<Option<TypedValue<'ctx>>> {
        let function = self.module.declare_function(declaration.clone())?;
        self.emit_call(function, &declaration, args)
    }

    /// Call C `printf`. Float arguments are promoted to double and small integers to int.
    pub fn printf(&mut self, format: &str, args: &[TypedValue<'ctx>]) -> EmitterResult<()> {
        let format = self.module.string_literal(format);
        let mut call_args = vec![format];
        for arg in args {
            let promoted = match &arg.ty {
                VariableType::Float => self.cast(arg, &VariableType::Double)?,
                VariableType::Boolean | VariableType::Char8 | VariableType::Byte | VariableType::Int16 => {
                    self.cast(arg, &VariableType::Int32)?
                }
                _ => arg.clone(),
            };
            call_args.push(promoted);
        }
        let declaration = FunctionDeclaration::new(
            "printf",
            VariableType::Int32,
            vec![Parameter::new("format", VariableType::Char8.pointer_to())],
        )
        .variadic();
        self.call_runtime(declaration, &call_args)?;
        Ok(())
    }

    /// Heap storage for `count` elements of `ty`.
    pub fn malloc(&mut self, ty: &VariableType, count: &TypedValue<'ctx>) -> EmitterResult<TypedValue<'ctx>> {
        let size = self.literal(self.module.size_of(ty)? as i64);
        let count = self.cast(count, &VariableType::Int64)?;
        let bytes = self.binary(TypedOperator::Multiply, &count, &size)?;
        let declaration = FunctionDeclaration::new(
            "malloc",
            VariableType::opaque_pointer(),
            vec![Parameter::new("size", VariableType::Int64)],
        );
        let raw = self
            .call_runtime(declaration, &[bytes])?
            .ok_or_else(|| EmitterError::unexpected("malloc returned void"))?;
        Ok(TypedValue::new(raw.value, ty.pointer_to()))
    }

    pub fn free(&mut self, ptr: &TypedValue<'ctx>) -> EmitterResult<()> {
        let declaration = FunctionDeclaration::new(
            "free",
            VariableType::Void,
            vec![Parameter::new("ptr", VariableType::opaque_pointer())],
        );
        self.call_runtime(declaration, std::slice::from_ref(ptr))?;
        Ok(())
    }

    // ---- Control flow ----

    fn append_block(&self, name: &str) -> BasicBlock<'ctx> {
        self.emitter().append_block(self.function, name)
    }

    fn branch_if_open(&self, target: BasicBlock<'ctx>) -> EmitterResult<()> {
        if !self.emitter().is_terminated() {
            self.emitter().branch(target)?;
        }
        Ok(())
    }

    /// Begin an if statement. Chain `else_if`/`otherwise`, or call `end`.
    pub fn if_then<F>(&mut self, cond: &TypedValue<'ctx>, body: F) -> EmitterResult<IfBuilder<'_, 'm, 'ctx>>
    where
        F: FnOnce(&mut Self) -> EmitterResult<()>,
    {
        let then_block = self.append_block("if.then");
        let else_block = self.append_block("if.else");
        let after = self.append_block("if.after");
        self.emitter().cond_branch(cond, then_block, else_block)?;

        self.emitter().position_at_end(then_block);
        body(self)?;
        self.branch_if_open(after)?;

        self.emitter().position_at_end(else_block);
        Ok(IfBuilder { function: self, else_block, after })
    }

    /// Loop `i` from `begin` while `i < end`, adding `step` after each iteration. `end`
    /// may be a pointer to the bound, which is then re-read before every iteration.
    pub fn for_range<F>(&mut self, begin: &TypedValue<'ctx>, end: &TypedValue<'ctx>, step: &TypedValue<'ctx>, mut body: F) -> EmitterResult<()>
    where
        F: FnMut(&mut Self, TypedValue<'ctx>) -> EmitterResult<()>,
    {
        let index_ty = begin.ty.clone();
        let bound_ty = match &end.ty {
            VariableType::Pointer(inner) => inner.as_ref(),
            other => other,
        };
        if !index_ty.is_integer() || *bound_ty != index_ty || step.ty != index_ty {
            return Err(EmitterError::type_not_supported(format!(
                "loop over {} with bound {} and step {}",
                index_ty, end.ty, step.ty
            )));
        }

        let counter = self.variable(&index_ty, "i")?;
        let init = self.append_block("for.init");
        let cond = self.append_block("for.cond");
        let body_block = self.append_block("for.body");
        let inc = self.append_block("for.inc");
        let after = self.append_block("for.after");

        self.emitter().branch(init)?;
        self.emitter().position_at_end(init);
        self.store(&counter, begin)?;
        self.emitter().branch(cond)?;

        self.emitter().position_at_end(cond);
        let index = self.load(&counter)?;
        let bound = if end.ty.is_pointer() { self.load(end)? } else { end.clone() };
        let keep_going = self.compare(TypedComparison::LessThan, &index, &bound)?;
        self.emitter().cond_branch(&keep_going, body_block, after)?;

        self.emitter().position_at_end(body_block);
        let index = self.load(&counter)?;
        body(self, index)?;
        self.branch_if_open(inc)?;

        self.emitter().position_at_end(inc);
        self.operation_and_update(&counter, TypedOperator::Add, step)?;
        self.emitter().branch(cond)?;

        self.emitter().position_at_end(after);
        Ok(())
    }

    /// Loop `i` over `0..count`.
    pub fn for_count<F>(&mut self, count: &TypedValue<'ctx>, body: F) -> EmitterResult<()>
    where
        F: FnMut(&mut Self, TypedValue<'ctx>) -> EmitterResult<()>,
    {
        let index_ty = match &count.ty {
            VariableType::Pointer(inner) => inner.as_ref().clone(),
            other => other.clone(),
        };
        let zero = self.int_literal(&index_ty, 0)?;
        let one = self.int_literal(&index_ty, 1)?;
        self.for_range(&zero, count, &one, body)
    }

    /// Loop while the boolean `cond_var` points to is true. It is re-read before every
    /// iteration.
    pub fn while_loop<F>(&mut self, cond_var: &TypedValue<'ctx>, body: F) -> EmitterResult<()>
    where
        F: FnOnce(&mut Self) -> EmitterResult<()>,
    {
        if *cond_var.ty.pointee()? != VariableType::Boolean {
            return Err(EmitterError::type_not_supported(format!("while condition of type {}", cond_var.ty)));
        }
        let cond = self.append_block("while.cond");
        let body_block = self.append_block("while.body");
        let after = self.append_block("while.after");

        self.emitter().branch(cond)?;
        self.emitter().position_at_end(cond);
        let keep_going = self.load(cond_var)?;
        self.emitter().cond_branch(&keep_going, body_block, after)?;

        self.emitter().position_at_end(body_block);
        body(self)?;
        self.branch_if_open(cond)?;

        self.emitter().position_at_end(after);
        Ok(())
    }

    /// Return `value` from the current block. Code emitted afterwards is unreachable and
    /// is removed when the function ends.
    pub fn return_value(&mut self, value: &TypedValue<'ctx>) -> EmitterResult<()> {
        self.emitter().ret(Some(value))?;
        let dead = self.append_block("after.return");
        self.emitter().position_at_end(dead);
        Ok(())
    }

    pub fn return_void(&mut self) -> EmitterResult<()> {
        self.emitter().ret(None)?;
        let dead = self.append_block("after.return");
        self.emitter().position_at_end(dead);
        Ok(())
    }

    // ---- Tags ----

    /// Record `tag` on this function unless it already carries exactly `value`.
    fn tag(&mut self, tag: &str, value: &str) -> EmitterResult<()> {
        let name = self.declaration.name.clone();
        let present = self
            .module
            .metadata()
            .try_get(&name, tag)
            .is_some_and(|values| values.iter().any(|v| v.len() == 1 && v[0] == value));
        if present {
            return Ok(());
        }
        self.module.insert_function_metadata(&name, tag, &[value])
    }

    pub fn include_in_header(&mut self) -> EmitterResult<()> {
        self.tag(metadata::DECLARE_FUNCTION_IN_HEADER, "")
    }

    pub fn include_in_predict_interface(&mut self) -> EmitterResult<()> {
        self.tag(metadata::PREDICT_FUNCTION, "")
    }

    pub fn include_in_swig_interface(&mut self) -> EmitterResult<()> {
        self.tag(metadata::SWIG_FUNCTION, "")
    }

    pub fn tag_callback(&mut self, kind: CallbackKind) -> EmitterResult<()> {
        let name = self.declaration.name.clone();
        self.module.register_callback(&name, kind)
    }

    /// Comment written above the function's declaration in the C header.
    pub fn set_comment(&mut self, text: &str) -> EmitterResult<()> {
        self.tag(metadata::FUNCTION_COMMENT, text)
    }

    // ---- Termination ----

    fn check_innermost(&self) -> EmitterResult<()> {
        if self.module.current_function() != Some(self.function) {
            return Err(EmitterError::IndexOutOfRange(format!(
                "{} is not the innermost function being emitted",
                self.declaration.name
            )));
        }
        Ok(())
    }

    /// Finish a void function, or one whose every path already returned.
    pub fn end(self) -> EmitterResult<FunctionValue<'ctx>> {
        self.check_innermost()?;
        self.module.end_function(None)
    }

    /// Finish the function, returning `value` from the current block.
    pub fn end_with(self, value: &TypedValue<'ctx>) -> EmitterResult<FunctionValue<'ctx>> {
        self.check_innermost()?;
        if !self.declaration.return_type.accepts(&value.ty) {
            return Err(EmitterError::BadFunctionArguments(format!(
                "{} returns {}, got {}",
                self.declaration.name, self.declaration.return_type, value.ty
            )));
        }
        self.module.end_function(Some(value.clone()))
    }
}

/// An if statement under construction. Control is positioned in the pending else block.
#[must_use = "an if statement must be finished with `otherwise` or `end`"]
pub struct IfBuilder<'f, 'm, 'ctx> {
    function: &'f mut FunctionEmitter<'m, 'ctx>,
    else_block: BasicBlock<'ctx>,
    after: BasicBlock<'ctx>,
}

impl<'f, 'm, 'ctx> IfBuilder<'f, 'm, 'ctx> {
    /// Add an `else if`. The condition is computed in the else block.
    pub fn else_if<C, F>(self, cond: C, body: F) -> EmitterResult<Self>
    where
        C: FnOnce(&mut FunctionEmitter<'m, 'ctx>) -> EmitterResult<TypedValue<'ctx>>,
        F: FnOnce(&mut FunctionEmitter<'m, 'ctx>) -> EmitterResult<()>,
    {
        let IfBuilder { function, after, .. } = self;
        let cond = cond(function)?;
        let then_block = function.append_block("if.then");
        let else_block = function.append_block("if.else");
        function.emitter().cond_branch(&cond, then_block, else_block)?;

        function.emitter().position_at_end(then_block);
        body(function)?;
        function.branch_if_open(after)?;

        function.emitter().position_at_end(else_block);
        Ok(IfBuilder { function, else_block, after })
    }

    pub fn otherwise<F>(self, body: F) -> EmitterResult<()>
    where
        F: FnOnce(&mut FunctionEmitter<'m, 'ctx>) -> EmitterResult<()>,
    {
        body(self.function)?;
        self.end()
    }

    pub fn end(self) -> EmitterResult<()> {
        self.function.branch_if_open(self.after)?;
        self.function.emitter().position_at_end(self.after);
        log::trace!("if statement closed at {:?}", self.else_block.get_name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use inkwell::context::Context;

    use super::*;
    use crate::options::CompilerOptions;

    #[test]
    fn test_arguments_are_typed_and_named() {
        let context = Context::create();
        let mut module = ModuleEmitter::new(&context, "args", CompilerOptions::default()).unwrap();
        let f = module
            .begin_function(
                "scale",
                VariableType::Double,
                &[("x", VariableType::Double), ("n", VariableType::Int32)],
            )
            .unwrap();
        assert_eq!(f.argument_by_name("n").unwrap().ty, VariableType::Int32);
        assert!(matches!(f.argument(2), Err(EmitterError::IndexOutOfRange(_))));
        let x = f.argument(0).unwrap();
        f.end_with(&x).unwrap();
        module.verify().unwrap();
    }

    #[test]
    fn test_call_checks_arguments() {
        let context = Context::create();
        let mut module = ModuleEmitter::new(&context, "calls", CompilerOptions::default()).unwrap();
        let callee = module
            .begin_function("callee", VariableType::Int32, &[("a", VariableType::Int32)])
            .unwrap();
        let a = callee.argument(0).unwrap();
        callee.end_with(&a).unwrap();

        let caller = module.begin_function("caller", VariableType::Void, &[]).unwrap();
        let wrong = caller.literal(1.0f64);
        assert!(matches!(
            caller.call("callee", &[wrong]),
            Err(EmitterError::BadFunctionArguments(_))
        ));
        assert!(matches!(caller.call("callee", &[]), Err(EmitterError::BadFunctionArguments(_))));
        let result = caller.call("callee", &[caller.literal(2i32)]).unwrap().unwrap();
        assert_eq!(result.ty, VariableType::Int32);
        caller.end().unwrap();
        module.verify().unwrap();
    }

    #[test]
    fn test_non_void_function_needs_a_value() {
        let context = Context::create();
        let mut module = ModuleEmitter::new(&context, "ret", CompilerOptions::default()).unwrap();
        let f = module.begin_function("answer", VariableType::Int32, &[]).unwrap();
        assert!(matches!(f.end(), Err(EmitterError::BadFunctionArguments(_))));
    }
}
