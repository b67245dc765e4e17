// This module defines the small type system used to describe every value the emission layer
// manipulates, independent of LLVM's own type objects. VariableType covers the scalar kinds
// (bool, char, byte, 16/32/64-bit integers, float, double), pointers, fixed-size arrays and
// named structs; VariableScope records where a value lives. TypedValue pairs an inkwell
// BasicValueEnum with its VariableType so that later operations can pick signed/unsigned or
// integer/float lowering without inspecting LLVM types (opaque pointers carry no pointee).
// TypedOperator, TypedComparison and UnaryOperation are the operator vocabulary of the
// low-level emitter, and ScalarValue maps Rust scalars onto literals. ArgFlags annotates
// function parameters.

//! Typed value and variable model.

use std::fmt;

use inkwell::context::Context;
use inkwell::values::{BasicValueEnum, FloatValue, IntValue, PointerValue};

use crate::error::{EmitterError, EmitterResult};

/// Type of a value in emitted code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VariableType {
    Void,
    Boolean,
    Char8,
    Byte,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    Pointer(Box<VariableType>),
    Array(Box<VariableType>, u32),
    Struct(String),
}

impl VariableType {
    pub fn pointer_to(&self) -> VariableType {
        VariableType::Pointer(Box::new(self.clone()))
    }

    pub fn array_of(&self, len: u32) -> VariableType {
        VariableType::Array(Box::new(self.clone()), len)
    }

    /// `void*` in emitted code. Any pointer may be passed where this is expected.
    pub fn opaque_pointer() -> VariableType {
        VariableType::Byte.pointer_to()
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            VariableType::Boolean
                | VariableType::Char8
                | VariableType::Byte
                | VariableType::Int16
                | VariableType::Int32
                | VariableType::Int64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, VariableType::Float | VariableType::Double)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, VariableType::Pointer(_))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, VariableType::Void)
    }

    /// Unsigned integers compare and divide with unsigned semantics.
    pub fn is_unsigned(&self) -> bool {
        matches!(self, VariableType::Boolean | VariableType::Byte)
    }

    pub fn pointee(&self) -> EmitterResult<&VariableType> {
        match self {
            VariableType::Pointer(inner) => Ok(inner),
            other => Err(EmitterError::type_not_supported(format!(
                "expected a pointer, found {other}"
            ))),
        }
    }

    /// Width in bits for scalar types.
    pub fn bit_width(&self) -> Option<u32> {
        match self {
            VariableType::Boolean => Some(1),
            VariableType::Char8 | VariableType::Byte => Some(8),
            VariableType::Int16 => Some(16),
            VariableType::Int32 | VariableType::Float => Some(32),
            VariableType::Int64 | VariableType::Double => Some(64),
            _ => None,
        }
    }

    /// Whether a value of type `value` may be stored into or passed as `self`.
    pub fn accepts(&self, value: &VariableType) -> bool {
        if self == value {
            return true;
        }
        *self == VariableType::opaque_pointer() && value.is_pointer()
    }

    /// Spelling of this type in a C declaration.
    pub fn c_type_name(&self) -> String {
        match self {
            VariableType::Void => "void".to_string(),
            VariableType::Boolean => "bool".to_string(),
            VariableType::Char8 => "char".to_string(),
            VariableType::Byte => "uint8_t".to_string(),
            VariableType::Int16 => "int16_t".to_string(),
            VariableType::Int32 => "int32_t".to_string(),
            VariableType::Int64 => "int64_t".to_string(),
            VariableType::Float => "float".to_string(),
            VariableType::Double => "double".to_string(),
            VariableType::Pointer(inner) => format!("{}*", inner.c_type_name()),
            // Arrays decay in parameter position.
            VariableType::Array(inner, _) => format!("{}*", inner.c_type_name()),
            VariableType::Struct(name) => name.clone(),
        }
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableType::Void => write!(f, "void"),
            VariableType::Boolean => write!(f, "bool"),
            VariableType::Char8 => write!(f, "char8"),
            VariableType::Byte => write!(f, "byte"),
            VariableType::Int16 => write!(f, "int16"),
            VariableType::Int32 => write!(f, "int32"),
            VariableType::Int64 => write!(f, "int64"),
            VariableType::Float => write!(f, "float"),
            VariableType::Double => write!(f, "double"),
            VariableType::Pointer(inner) => write!(f, "{inner}*"),
            VariableType::Array(inner, len) => write!(f, "{inner}[{len}]"),
            VariableType::Struct(name) => write!(f, "struct {name}"),
        }
    }
}

/// Where a variable lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableScope {
    Literal,
    Global,
    Local,
    Input,
    Output,
}

/// A low-level value together with its type descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedValue<'ctx> {
    pub value: BasicValueEnum<'ctx>,
    pub ty: VariableType,
}

impl<'ctx> TypedValue<'ctx> {
    pub fn new(value: BasicValueEnum<'ctx>, ty: VariableType) -> Self {
        Self { value, ty }
    }

    pub fn into_int(&self) -> EmitterResult<IntValue<'ctx>> {
        match self.value {
            BasicValueEnum::IntValue(v) => Ok(v),
            _ => Err(EmitterError::type_not_supported(format!(
                "expected an integer value, found {}",
                self.ty
            ))),
        }
    }

    pub fn into_float(&self) -> EmitterResult<FloatValue<'ctx>> {
        match self.value {
            BasicValueEnum::FloatValue(v) => Ok(v),
            _ => Err(EmitterError::type_not_supported(format!(
                "expected a floating-point value, found {}",
                self.ty
            ))),
        }
    }

    pub fn into_pointer(&self) -> EmitterResult<PointerValue<'ctx>> {
        match self.value {
            BasicValueEnum::PointerValue(v) => Ok(v),
            _ => Err(EmitterError::type_not_supported(format!(
                "expected a pointer value, found {}",
                self.ty
            ))),
        }
    }
}

/// Binary operators. The result has the operand type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypedOperator {
    Add,
    Subtract,
    Multiply,
    DivideSigned,
    ModuloSigned,
    DivideUnsigned,
    ModuloUnsigned,
    AddFloat,
    SubtractFloat,
    MultiplyFloat,
    DivideFloat,
    ModuloFloat,
    LogicalAnd,
    LogicalOr,
    LogicalXor,
    ShiftLeft,
    LogicalShiftRight,
    ArithmeticShiftRight,
}

impl TypedOperator {
    pub fn is_float_operator(self) -> bool {
        matches!(
            self,
            TypedOperator::AddFloat
                | TypedOperator::SubtractFloat
                | TypedOperator::MultiplyFloat
                | TypedOperator::DivideFloat
                | TypedOperator::ModuloFloat
        )
    }

    pub fn add_for(ty: &VariableType) -> Self {
        if ty.is_float() { TypedOperator::AddFloat } else { TypedOperator::Add }
    }

    pub fn subtract_for(ty: &VariableType) -> Self {
        if ty.is_float() { TypedOperator::SubtractFloat } else { TypedOperator::Subtract }
    }

    pub fn multiply_for(ty: &VariableType) -> Self {
        if ty.is_float() { TypedOperator::MultiplyFloat } else { TypedOperator::Multiply }
    }

    pub fn divide_for(ty: &VariableType) -> Self {
        if ty.is_float() {
            TypedOperator::DivideFloat
        } else if ty.is_unsigned() {
            TypedOperator::DivideUnsigned
        } else {
            TypedOperator::DivideSigned
        }
    }
}

/// Comparison predicates. The result is a Boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypedComparison {
    Equals,
    LessThan,
    LessThanOrEquals,
    GreaterThan,
    GreaterThanOrEquals,
    NotEquals,
    EqualsFloat,
    LessThanFloat,
    LessThanOrEqualsFloat,
    GreaterThanFloat,
    GreaterThanOrEqualsFloat,
    NotEqualsFloat,
}

impl TypedComparison {
    pub fn is_float_comparison(self) -> bool {
        matches!(
            self,
            TypedComparison::EqualsFloat
                | TypedComparison::LessThanFloat
                | TypedComparison::LessThanOrEqualsFloat
                | TypedComparison::GreaterThanFloat
                | TypedComparison::GreaterThanOrEqualsFloat
                | TypedComparison::NotEqualsFloat
        )
    }

    /// Picks the float variant of `self` when `ty` is a floating-point type.
    pub fn for_type(self, ty: &VariableType) -> Self {
        if !ty.is_float() || self.is_float_comparison() {
            return self;
        }
        match self {
            TypedComparison::Equals => TypedComparison::EqualsFloat,
            TypedComparison::LessThan => TypedComparison::LessThanFloat,
            TypedComparison::LessThanOrEquals => TypedComparison::LessThanOrEqualsFloat,
            TypedComparison::GreaterThan => TypedComparison::GreaterThanFloat,
            TypedComparison::GreaterThanOrEquals => TypedComparison::GreaterThanOrEqualsFloat,
            TypedComparison::NotEquals => TypedComparison::NotEqualsFloat,
            other => other,
        }
    }
}

/// Unary operations. Math operations lower to LLVM intrinsics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperation {
    LogicalNot,
    Negate,
    Sqrt,
    Abs,
    Exp,
    Log,
    Sin,
    Cos,
}

impl UnaryOperation {
    pub(crate) fn intrinsic_stem(self) -> Option<&'static str> {
        match self {
            UnaryOperation::Sqrt => Some("llvm.sqrt"),
            UnaryOperation::Abs => Some("llvm.fabs"),
            UnaryOperation::Exp => Some("llvm.exp"),
            UnaryOperation::Log => Some("llvm.log"),
            UnaryOperation::Sin => Some("llvm.sin"),
            UnaryOperation::Cos => Some("llvm.cos"),
            UnaryOperation::LogicalNot | UnaryOperation::Negate => None,
        }
    }
}

/// Per-parameter attributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ArgFlags(u8);

impl ArgFlags {
    pub const NONE: ArgFlags = ArgFlags(0);
    pub const NO_ALIAS: ArgFlags = ArgFlags(1);
    pub const INPUT: ArgFlags = ArgFlags(2);
    pub const OUTPUT: ArgFlags = ArgFlags(4);

    pub fn contains(self, other: ArgFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ArgFlags {
    type Output = ArgFlags;

    fn bitor(self, rhs: ArgFlags) -> ArgFlags {
        ArgFlags(self.0 | rhs.0)
    }
}

/// Rust scalars that can be emitted as literals.
pub trait ScalarValue: Copy {
    fn variable_type() -> VariableType;
    fn const_value<'ctx>(self, context: &'ctx Context) -> BasicValueEnum<'ctx>;
}

macro_rules! int_scalar {
    ($rust:ty, $vt:expr, $method:ident, $signed:expr) => {
        impl ScalarValue for $rust {
            fn variable_type() -> VariableType {
                $vt
            }

            fn const_value<'ctx>(self, context: &'ctx Context) -> BasicValueEnum<'ctx> {
                context.$method().const_int(self as u64, $signed).into()
            }
        }
    };
}

int_scalar!(i8, VariableType::Char8, i8_type, true);
int_scalar!(u8, VariableType::Byte, i8_type, false);
int_scalar!(i16, VariableType::Int16, i16_type, true);
int_scalar!(i32, VariableType::Int32, i32_type, true);
int_scalar!(i64, VariableType::Int64, i64_type, true);

impl ScalarValue for bool {
    fn variable_type() -> VariableType {
        VariableType::Boolean
    }

    fn const_value<'ctx>(self, context: &'ctx Context) -> BasicValueEnum<'ctx> {
        context.bool_type().const_int(self as u64, false).into()
    }
}

impl ScalarValue for f32 {
    fn variable_type() -> VariableType {
        VariableType::Float
    }

    fn const_value<'ctx>(self, context: &'ctx Context) -> BasicValueEnum<'ctx> {
        context.f32_type().const_float(self as f64).into()
    }
}

impl ScalarValue for f64 {
    fn variable_type() -> VariableType {
        VariableType::Double
    }

    fn const_value<'ctx>(self, context: &'ctx Context) -> BasicValueEnum<'ctx> {
        context.f64_type().const_float(self).into()
    }
}
