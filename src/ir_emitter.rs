// This module wraps inkwell's Context/Module/Builder triple into the typed low-level builder
// every higher emitter uses. IrEmitter maps VariableType descriptors onto LLVM types, builds
// literals and zero values, and lowers TypedOperator/TypedComparison/UnaryOperation requests
// into the matching LLVM instructions with explicit operand checking (LLVM has no implicit
// numeric promotion, so mismatches are reported as VariableTypeNotSupported instead of
// producing invalid IR). It also owns function prototype creation, intrinsic declaration,
// private string constants and the memory intrinsics used for copy/move/set. The
// module's data layout is kept as a TargetData so byte sizes of emitted types can be folded
// into constants.

//! Low-level typed IR builder.

use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::{Linkage, Module};
use inkwell::targets::TargetData;
use inkwell::types::{BasicMetadataTypeEnum, BasicType, BasicTypeEnum, FunctionType};
use inkwell::values::{BasicMetadataValueEnum, BasicValueEnum, FunctionValue, IntValue, PointerValue};
use inkwell::{AddressSpace, FloatPredicate, IntPredicate};

use crate::error::{EmitterError, EmitterResult};
use crate::types::{ScalarValue, TypedComparison, TypedOperator, TypedValue, UnaryOperation, VariableType};

pub struct IrEmitter<'ctx> {
    context: &'ctx Context,
    module: Module<'ctx>,
    builder: Builder<'ctx>,
    target_data: TargetData,
}

impl<'ctx> IrEmitter<'ctx> {
    pub fn new(context: &'ctx Context, module: Module<'ctx>, data_layout: &str) -> Self {
        let builder = context.create_builder();
        let target_data = TargetData::create(data_layout);
        module.set_data_layout(&target_data.get_data_layout());
        Self { context, module, builder, target_data }
    }

    pub fn context(&self) -> &'ctx Context {
        self.context
    }

    pub fn module(&self) -> &Module<'ctx> {
        &self.module
    }

    pub fn builder(&self) -> &Builder<'ctx> {
        &self.builder
    }

    pub fn into_module(self) -> Module<'ctx> {
        self.module
    }

    // ---- Types ----

    pub fn ptr_type(&self) -> inkwell::types::PointerType<'ctx> {
        self.context.ptr_type(AddressSpace::default())
    }

    /// LLVM type for a descriptor. `Void` has no value type.
    pub fn ty(&self, ty: &VariableType) -> EmitterResult<BasicTypeEnum<'ctx>> {
        let c = self.context;
        Ok(match ty {
            VariableType::Void => {
                return Err(EmitterError::type_not_supported("void has no value representation"));
            }
            VariableType::Boolean => c.bool_type().into(),
            VariableType::Char8 | VariableType::Byte => c.i8_type().into(),
            VariableType::Int16 => c.i16_type().into(),
            VariableType::Int32 => c.i32_type().into(),
            VariableType::Int64 => c.i64_type().into(),
            VariableType::Float => c.f32_type().into(),
            VariableType::Double => c.f64_type().into(),
            VariableType::Pointer(_) => self.ptr_type().into(),
            VariableType::Array(inner, len) => self.ty(inner)?.array_type(*len).into(),
            VariableType::Struct(name) => c
                .get_struct_type(name)
                .ok_or_else(|| EmitterError::type_not_supported(format!("unknown struct {name}")))?
                .into(),
        })
    }

    /// Descriptor for an LLVM type found in parsed IR. Pointers come back as `void*` and
    /// `i8` as `Byte`, since LLVM keeps neither pointee nor signedness.
    pub fn variable_type_of(&self, ty: BasicTypeEnum<'ctx>) -> EmitterResult<VariableType> {
        Ok(match ty {
            BasicTypeEnum::IntType(t) => match t.get_bit_width() {
                1 => VariableType::Boolean,
                8 => VariableType::Byte,
                16 => VariableType::Int16,
                32 => VariableType::Int32,
                64 => VariableType::Int64,
                bits => return Err(EmitterError::type_not_supported(format!("i{bits}"))),
            },
            BasicTypeEnum::FloatType(t) if t == self.context.f32_type() => VariableType::Float,
            BasicTypeEnum::FloatType(t) if t == self.context.f64_type() => VariableType::Double,
            BasicTypeEnum::PointerType(_) => VariableType::opaque_pointer(),
            BasicTypeEnum::ArrayType(t) => self.variable_type_of(t.get_element_type())?.array_of(t.len()),
            BasicTypeEnum::StructType(t) => match t.get_name() {
                Some(name) => VariableType::Struct(name.to_string_lossy().into_owned()),
                None => return Err(EmitterError::type_not_supported("literal struct type")),
            },
            other => return Err(EmitterError::type_not_supported(format!("{other:?}"))),
        })
    }

    pub fn fn_type(&self, ret: &VariableType, params: &[VariableType], variadic: bool) -> EmitterResult<FunctionType<'ctx>> {
        let params = params
            .iter()
            .map(|p| self.ty(p).map(BasicMetadataTypeEnum::from))
            .collect::<EmitterResult<Vec<_>>>()?;
        Ok(match ret {
            VariableType::Void => self.context.void_type().fn_type(&params, variadic),
            other => self.ty(other)?.fn_type(&params, variadic),
        })
    }

    /// Allocation size in bytes of a descriptor under the module's data layout.
    pub fn size_of(&self, ty: &VariableType) -> EmitterResult<u64> {
        let llvm_ty = self.ty(ty)?;
        Ok(self.target_data.get_abi_size(&llvm_ty))
    }

    // ---- Literals ----

    pub fn literal<T: ScalarValue>(&self, value: T) -> TypedValue<'ctx> {
        TypedValue::new(value.const_value(self.context), T::variable_type())
    }

    /// Integer literal of an arbitrary integer descriptor.
    pub fn int_literal(&self, ty: &VariableType, value: i64) -> EmitterResult<TypedValue<'ctx>> {
        if !ty.is_integer() {
            return Err(EmitterError::type_not_supported(format!("{ty} is not an integer type")));
        }
        let int_ty = self.ty(ty)?.into_int_type();
        Ok(TypedValue::new(int_ty.const_int(value as u64, !ty.is_unsigned()).into(), ty.clone()))
    }

    pub fn true_bit(&self) -> TypedValue<'ctx> {
        self.literal(true)
    }

    pub fn false_bit(&self) -> TypedValue<'ctx> {
        self.literal(false)
    }

    pub fn null_pointer(&self, ty: &VariableType) -> TypedValue<'ctx> {
        TypedValue::new(self.ptr_type().const_null().into(), ty.clone())
    }

    pub fn zero(&self, ty: &VariableType) -> EmitterResult<TypedValue<'ctx>> {
        let value: BasicValueEnum<'ctx> = match self.ty(ty)? {
            BasicTypeEnum::IntType(t) => t.const_zero().into(),
            BasicTypeEnum::FloatType(t) => t.const_zero().into(),
            BasicTypeEnum::PointerType(t) => t.const_null().into(),
            BasicTypeEnum::ArrayType(t) => t.const_zero().into(),
            BasicTypeEnum::StructType(t) => t.const_zero().into(),
            BasicTypeEnum::VectorType(t) => t.const_zero().into(),
            #[allow(unreachable_patterns)]
            _ => return Err(EmitterError::type_not_supported(format!("no zero value for {ty}"))),
        };
        Ok(TypedValue::new(value, ty.clone()))
    }

    /// Constant array of scalars, typed `[T x n]`.
    pub fn const_array<T: ScalarValue>(&self, values: &[T]) -> EmitterResult<TypedValue<'ctx>> {
        let elem_ty = T::variable_type();
        let llvm_elem = self.ty(&elem_ty)?;
        let consts: Vec<BasicValueEnum<'ctx>> = values.iter().map(|v| v.const_value(self.context)).collect();
        let array = match llvm_elem {
            BasicTypeEnum::IntType(t) => {
                let ints: Vec<IntValue<'ctx>> = consts.iter().map(|v| v.into_int_value()).collect();
                t.const_array(&ints)
            }
            BasicTypeEnum::FloatType(t) => {
                let floats: Vec<_> = consts.iter().map(|v| v.into_float_value()).collect();
                t.const_array(&floats)
            }
            _ => return Err(EmitterError::type_not_supported(format!("constant array of {elem_ty}"))),
        };
        Ok(TypedValue::new(array.into(), elem_ty.array_of(values.len() as u32)))
    }

    /// A private, constant, NUL-terminated string global.
    pub fn string_constant(&self, name: &str, text: &str) -> TypedValue<'ctx> {
        let data = self.context.const_string(text.as_bytes(), true);
        let global = self.module.add_global(data.get_type(), None, name);
        global.set_initializer(&data);
        global.set_constant(true);
        global.set_linkage(Linkage::Private);
        global.set_unnamed_addr(true);
        TypedValue::new(global.as_pointer_value().into(), VariableType::Char8.pointer_to())
    }

    // ---- Operators ----

    fn check_same_type(&self, lhs: &TypedValue<'ctx>, rhs: &TypedValue<'ctx>) -> EmitterResult<()> {
        if lhs.ty != rhs.ty {
            return Err(EmitterError::type_not_supported(format!(
                "operand types differ: {} and {}",
                lhs.ty, rhs.ty
            )));
        }
        Ok(())
    }

    pub fn binary(&self, op: TypedOperator, lhs: &TypedValue<'ctx>, rhs: &TypedValue<'ctx>, name: &str) -> EmitterResult<TypedValue<'ctx>> {
        self.check_same_type(lhs, rhs)?;
        let b = &self.builder;
        let value: BasicValueEnum<'ctx> = if op.is_float_operator() {
            if !lhs.ty.is_float() {
                return Err(EmitterError::type_not_supported(format!("{op:?} on {}", lhs.ty)));
            }
            let (l, r) = (lhs.into_float()?, rhs.into_float()?);
            match op {
                TypedOperator::AddFloat => b.build_float_add(l, r, name)?,
                TypedOperator::SubtractFloat => b.build_float_sub(l, r, name)?,
                TypedOperator::MultiplyFloat => b.build_float_mul(l, r, name)?,
                TypedOperator::DivideFloat => b.build_float_div(l, r, name)?,
                _ => b.build_float_rem(l, r, name)?,
            }
            .into()
        } else {
            if !lhs.ty.is_integer() {
                return Err(EmitterError::type_not_supported(format!("{op:?} on {}", lhs.ty)));
            }
            let (l, r) = (lhs.into_int()?, rhs.into_int()?);
            match op {
                TypedOperator::Add => b.build_int_add(l, r, name)?,
                TypedOperator::Subtract => b.build_int_sub(l, r, name)?,
                TypedOperator::Multiply => b.build_int_mul(l, r, name)?,
                TypedOperator::DivideSigned => b.build_int_signed_div(l, r, name)?,
                TypedOperator::ModuloSigned => b.build_int_signed_rem(l, r, name)?,
                TypedOperator::DivideUnsigned => b.build_int_unsigned_div(l, r, name)?,
                TypedOperator::ModuloUnsigned => b.build_int_unsigned_rem(l, r, name)?,
                TypedOperator::LogicalAnd => b.build_and(l, r, name)?,
                TypedOperator::LogicalOr => b.build_or(l, r, name)?,
                TypedOperator::LogicalXor => b.build_xor(l, r, name)?,
                TypedOperator::ShiftLeft => b.build_left_shift(l, r, name)?,
                TypedOperator::LogicalShiftRight => b.build_right_shift(l, r, false, name)?,
                TypedOperator::ArithmeticShiftRight => b.build_right_shift(l, r, true, name)?,
                _ => unreachable!("float operators handled above"),
            }
            .into()
        };
        log::trace!("{:?} {} -> {}", op, lhs.ty, name);
        Ok(TypedValue::new(value, lhs.ty.clone()))
    }

    pub fn compare(&self, cmp: TypedComparison, lhs: &TypedValue<'ctx>, rhs: &TypedValue<'ctx>, name: &str) -> EmitterResult<TypedValue<'ctx>> {
        self.check_same_type(lhs, rhs)?;
        let b = &self.builder;
        let value = if cmp.is_float_comparison() {
            if !lhs.ty.is_float() {
                return Err(EmitterError::type_not_supported(format!("{cmp:?} on {}", lhs.ty)));
            }
            let predicate = match cmp {
                TypedComparison::EqualsFloat => FloatPredicate::OEQ,
                TypedComparison::LessThanFloat => FloatPredicate::OLT,
                TypedComparison::LessThanOrEqualsFloat => FloatPredicate::OLE,
                TypedComparison::GreaterThanFloat => FloatPredicate::OGT,
                TypedComparison::GreaterThanOrEqualsFloat => FloatPredicate::OGE,
                _ => FloatPredicate::ONE,
            };
            b.build_float_compare(predicate, lhs.into_float()?, rhs.into_float()?, name)?
        } else {
            let unsigned = lhs.ty.is_unsigned() || lhs.ty.is_pointer();
            let predicate = match (cmp, unsigned) {
                (TypedComparison::Equals, _) => IntPredicate::EQ,
                (TypedComparison::NotEquals, _) => IntPredicate::NE,
                (TypedComparison::LessThan, false) => IntPredicate::SLT,
                (TypedComparison::LessThan, true) => IntPredicate::ULT,
                (TypedComparison::LessThanOrEquals, false) => IntPredicate::SLE,
                (TypedComparison::LessThanOrEquals, true) => IntPredicate::ULE,
                (TypedComparison::GreaterThan, false) => IntPredicate::SGT,
                (TypedComparison::GreaterThan, true) => IntPredicate::UGT,
                (TypedComparison::GreaterThanOrEquals, false) => IntPredicate::SGE,
                (TypedComparison::GreaterThanOrEquals, true) => IntPredicate::UGE,
                _ => unreachable!("float comparisons handled above"),
            };
            let (l, r) = if lhs.ty.is_pointer() {
                let i64_ty = self.context.i64_type();
                (
                    b.build_ptr_to_int(lhs.into_pointer()?, i64_ty, "lhs.addr")?,
                    b.build_ptr_to_int(rhs.into_pointer()?, i64_ty, "rhs.addr")?,
                )
            } else if lhs.ty.is_integer() {
                (lhs.into_int()?, rhs.into_int()?)
            } else {
                return Err(EmitterError::type_not_supported(format!("{cmp:?} on {}", lhs.ty)));
            };
            b.build_int_compare(predicate, l, r, name)?
        };
        Ok(TypedValue::new(value.into(), VariableType::Boolean))
    }

    pub fn unary(&self, op: UnaryOperation, value: &TypedValue<'ctx>, name: &str) -> EmitterResult<TypedValue<'ctx>> {
        let b = &self.builder;
        let result: BasicValueEnum<'ctx> = match op {
            UnaryOperation::LogicalNot if value.ty.is_integer() => b.build_not(value.into_int()?, name)?.into(),
            UnaryOperation::Negate if value.ty.is_integer() => b.build_int_neg(value.into_int()?, name)?.into(),
            UnaryOperation::Negate if value.ty.is_float() => b.build_float_neg(value.into_float()?, name)?.into(),
            _ if value.ty.is_float() && op.intrinsic_stem().is_some() => {
                let intrinsic = self.float_intrinsic(op, &value.ty)?;
                self.call(intrinsic, &[value.value], name)?
                    .ok_or_else(|| EmitterError::unexpected("math intrinsic returned void"))?
            }
            _ => {
                return Err(EmitterError::type_not_supported(format!("{op:?} on {}", value.ty)));
            }
        };
        Ok(TypedValue::new(result, value.ty.clone()))
    }

    fn float_intrinsic(&self, op: UnaryOperation, ty: &VariableType) -> EmitterResult<FunctionValue<'ctx>> {
        let stem = op
            .intrinsic_stem()
            .ok_or_else(|| EmitterError::type_not_supported(format!("{op:?} has no intrinsic")))?;
        let suffix = match ty {
            VariableType::Float => "f32",
            VariableType::Double => "f64",
            other => return Err(EmitterError::type_not_supported(format!("{op:?} on {other}"))),
        };
        self.intrinsic(&format!("{stem}.{suffix}"), ty, &[ty.clone()])
    }

    /// Convert between scalar descriptors.
    pub fn cast(&self, value: &TypedValue<'ctx>, to: &VariableType, name: &str) -> EmitterResult<TypedValue<'ctx>> {
        if &value.ty == to {
            return Ok(value.clone());
        }
        let b = &self.builder;
        let from = &value.ty;
        let result: BasicValueEnum<'ctx> = if *to == VariableType::Boolean && from.is_integer() {
            let zero = value.into_int()?.get_type().const_zero();
            b.build_int_compare(IntPredicate::NE, value.into_int()?, zero, name)?.into()
        } else if *to == VariableType::Boolean && from.is_float() {
            let zero = value.into_float()?.get_type().const_zero();
            b.build_float_compare(FloatPredicate::UNE, value.into_float()?, zero, name)?.into()
        } else if from.is_integer() && to.is_integer() {
            let target = self.ty(to)?.into_int_type();
            let (from_bits, to_bits) = (from.bit_width().unwrap_or(0), to.bit_width().unwrap_or(0));
            let v = value.into_int()?;
            if to_bits > from_bits {
                if from.is_unsigned() {
                    b.build_int_z_extend(v, target, name)?.into()
                } else {
                    b.build_int_s_extend(v, target, name)?.into()
                }
            } else if to_bits < from_bits {
                b.build_int_truncate(v, target, name)?.into()
            } else {
                v.into()
            }
        } else if from.is_integer() && to.is_float() {
            let target = self.ty(to)?.into_float_type();
            if from.is_unsigned() {
                b.build_unsigned_int_to_float(value.into_int()?, target, name)?.into()
            } else {
                b.build_signed_int_to_float(value.into_int()?, target, name)?.into()
            }
        } else if from.is_float() && to.is_integer() {
            let target = self.ty(to)?.into_int_type();
            b.build_float_to_signed_int(value.into_float()?, target, name)?.into()
        } else if from.is_float() && to.is_float() {
            let target = self.ty(to)?.into_float_type();
            b.build_float_cast(value.into_float()?, target, name)?.into()
        } else if from.is_pointer() && to.is_pointer() {
            value.value
        } else {
            return Err(EmitterError::type_not_supported(format!("cast from {from} to {to}")));
        };
        Ok(TypedValue::new(result, to.clone()))
    }

    pub fn select(&self, cond: &TypedValue<'ctx>, then: &TypedValue<'ctx>, otherwise: &TypedValue<'ctx>, name: &str) -> EmitterResult<TypedValue<'ctx>> {
        self.check_same_type(then, otherwise)?;
        let value = self.builder.build_select(cond.into_int()?, then.value, otherwise.value, name)?;
        Ok(TypedValue::new(value, then.ty.clone()))
    }

    // ---- Memory ----

    pub fn alloca(&self, ty: &VariableType, count: Option<u32>, name: &str) -> EmitterResult<PointerValue<'ctx>> {
        let llvm_ty = self.ty(ty)?;
        Ok(match count {
            Some(n) => {
                let n = self.context.i32_type().const_int(n as u64, false);
                self.builder.build_array_alloca(llvm_ty, n, name)?
            }
            None => self.builder.build_alloca(llvm_ty, name)?,
        })
    }

    pub fn load(&self, ptr: &TypedValue<'ctx>, name: &str) -> EmitterResult<TypedValue<'ctx>> {
        let pointee = ptr.ty.pointee()?.clone();
        let value = self.builder.build_load(self.ty(&pointee)?, ptr.into_pointer()?, name)?;
        Ok(TypedValue::new(value, pointee))
    }

    pub fn store(&self, ptr: &TypedValue<'ctx>, value: &TypedValue<'ctx>) -> EmitterResult<()> {
        let pointee = ptr.ty.pointee()?;
        if !pointee.accepts(&value.ty) {
            return Err(EmitterError::type_not_supported(format!(
                "cannot store {} through {}",
                value.ty, ptr.ty
            )));
        }
        self.builder.build_store(ptr.into_pointer()?, value.value)?;
        Ok(())
    }

    /// Address of `ptr[index]`.
    pub fn gep(&self, ptr: &TypedValue<'ctx>, index: &TypedValue<'ctx>, name: &str) -> EmitterResult<TypedValue<'ctx>> {
        let pointee = ptr.ty.pointee()?;
        if !index.ty.is_integer() {
            return Err(EmitterError::type_not_supported(format!("index of type {}", index.ty)));
        }
        let elem = self.ty(pointee)?;
        // No bounds checks are emitted; out-of-range offsets are the caller's responsibility.
        let address = unsafe { self.builder.build_gep(elem, ptr.into_pointer()?, &[index.into_int()?], name)? };
        Ok(TypedValue::new(address.into(), ptr.ty.clone()))
    }

    /// Address of field `field` of the struct `ptr` points to.
    pub fn struct_gep(&self, ptr: &TypedValue<'ctx>, field: u32, field_ty: &VariableType, name: &str) -> EmitterResult<TypedValue<'ctx>> {
        let struct_ty = self.ty(ptr.ty.pointee()?)?;
        let address = self.builder.build_struct_gep(struct_ty, ptr.into_pointer()?, field, name)?;
        Ok(TypedValue::new(address.into(), field_ty.pointer_to()))
    }

    fn memory_intrinsic(&self, name: &str, dest: PointerValue<'ctx>, src: BasicValueEnum<'ctx>, bytes: IntValue<'ctx>) -> EmitterResult<()> {
        let i64_ty = self.context.i64_type();
        let ptr_ty = self.ptr_type();
        let src_ty: BasicMetadataTypeEnum<'ctx> = match src {
            BasicValueEnum::IntValue(v) => v.get_type().into(),
            _ => ptr_ty.into(),
        };
        let fn_ty = self.context.void_type().fn_type(
            &[ptr_ty.into(), src_ty, i64_ty.into(), self.context.bool_type().into()],
            false,
        );
        let function = self
            .module
            .get_function(name)
            .unwrap_or_else(|| self.module.add_function(name, fn_ty, None));
        let args: [BasicMetadataValueEnum<'ctx>; 4] = [
            dest.into(),
            src.into(),
            bytes.into(),
            self.context.bool_type().const_zero().into(),
        ];
        self.builder.build_call(function, &args, "")?;
        Ok(())
    }

    fn byte_count(&self, elem: &VariableType, count: &TypedValue<'ctx>) -> EmitterResult<IntValue<'ctx>> {
        let count64 = self.cast(count, &VariableType::Int64, "count")?.into_int()?;
        let size = self.context.i64_type().const_int(self.size_of(elem)?, false);
        Ok(self.builder.build_int_mul(count64, size, "bytes")?)
    }

    /// Copy `count` elements from `src` to `dest`. The ranges must not overlap.
    pub fn mem_copy(&self, dest: &TypedValue<'ctx>, src: &TypedValue<'ctx>, count: &TypedValue<'ctx>) -> EmitterResult<()> {
        let bytes = self.byte_count(dest.ty.pointee()?, count)?;
        self.memory_intrinsic("llvm.memcpy.p0.p0.i64", dest.into_pointer()?, src.value, bytes)
    }

    /// Copy `count` elements from `src` to `dest`. The ranges may overlap.
    pub fn mem_move(&self, dest: &TypedValue<'ctx>, src: &TypedValue<'ctx>, count: &TypedValue<'ctx>) -> EmitterResult<()> {
        let bytes = self.byte_count(dest.ty.pointee()?, count)?;
        self.memory_intrinsic("llvm.memmove.p0.p0.i64", dest.into_pointer()?, src.value, bytes)
    }

    /// Fill `count` elements at `dest` with the byte `value`.
    pub fn mem_set(&self, dest: &TypedValue<'ctx>, value: u8, count: &TypedValue<'ctx>) -> EmitterResult<()> {
        let bytes = self.byte_count(dest.ty.pointee()?, count)?;
        let fill = self.context.i8_type().const_int(value as u64, false);
        self.memory_intrinsic("llvm.memset.p0.i64", dest.into_pointer()?, fill.into(), bytes)
    }

    // ---- Functions and control flow ----

    /// Create (or return the existing) prototype for `name`. An existing function must
    /// have the same LLVM signature.
    pub fn declare_function(&self, name: &str, ret: &VariableType, params: &[VariableType], variadic: bool) -> EmitterResult<FunctionValue<'ctx>> {
        let fn_type = self.fn_type(ret, params, variadic)?;
        if let Some(existing) = self.module.get_function(name) {
            if existing.get_type() != fn_type {
                return Err(EmitterError::FunctionNotFound(format!(
                    "{name} already declared as {}",
                    existing.get_type().print_to_string().to_string()
                )));
            }
            return Ok(existing);
        }
        log::trace!("declare {}", name);
        Ok(self.module.add_function(name, fn_type, None))
    }

    /// Declare an LLVM intrinsic by its mangled name.
    pub fn intrinsic(&self, name: &str, ret: &VariableType, params: &[VariableType]) -> EmitterResult<FunctionValue<'ctx>> {
        self.declare_function(name, ret, params, false)
    }

    /// Append the entry block to a prototype and position the builder in it.
    pub fn begin_function_body(&self, function: FunctionValue<'ctx>) -> BasicBlock<'ctx> {
        let entry = self.context.append_basic_block(function, "entry");
        self.builder.position_at_end(entry);
        entry
    }

    pub fn append_block(&self, function: FunctionValue<'ctx>, name: &str) -> BasicBlock<'ctx> {
        self.context.append_basic_block(function, name)
    }

    pub fn call(&self, function: FunctionValue<'ctx>, args: &[BasicValueEnum<'ctx>], name: &str) -> EmitterResult<Option<BasicValueEnum<'ctx>>> {
        let args: Vec<BasicMetadataValueEnum<'ctx>> = args.iter().map(|a| (*a).into()).collect();
        let call = self.builder.build_call(function, &args, name)?;
        Ok(call.try_as_basic_value().left())
    }

    pub fn branch(&self, block: BasicBlock<'ctx>) -> EmitterResult<()> {
        self.builder.build_unconditional_branch(block)?;
        Ok(())
    }

    pub fn cond_branch(&self, cond: &TypedValue<'ctx>, then: BasicBlock<'ctx>, otherwise: BasicBlock<'ctx>) -> EmitterResult<()> {
        if cond.ty != VariableType::Boolean {
            return Err(EmitterError::type_not_supported(format!("branch condition of type {}", cond.ty)));
        }
        self.builder.build_conditional_branch(cond.into_int()?, then, otherwise)?;
        Ok(())
    }

    pub fn ret(&self, value: Option<&TypedValue<'ctx>>) -> EmitterResult<()> {
        match value {
            Some(v) => self.builder.build_return(Some(&v.value))?,
            None => self.builder.build_return(None)?,
        };
        Ok(())
    }

    pub fn current_block(&self) -> Option<BasicBlock<'ctx>> {
        self.builder.get_insert_block()
    }

    pub fn position_at_end(&self, block: BasicBlock<'ctx>) {
        self.builder.position_at_end(block);
    }

    /// Whether the block the builder is positioned in already ends in a terminator.
    pub fn is_terminated(&self) -> bool {
        self.builder
            .get_insert_block()
            .and_then(|b| b.get_terminator())
            .is_some()
    }
}
