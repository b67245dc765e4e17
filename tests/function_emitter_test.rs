//! Test function bodies: control flow, memory helpers and calls, checked by running them.

mod common;

use common::{host_module, jit};
use inkwell::context::Context;
use modelc::{EmitterError, TypedComparison, TypedOperator, UnaryOperation, VariableType};

#[test]
fn test_shift_register() {
    let context = Context::create();
    let mut module = host_module(&context, "shift");
    let double_ptr = VariableType::Double.pointer_to();
    let f = module
        .begin_function(
            "shift",
            VariableType::Void,
            &[("buffer", double_ptr.clone()), ("data", double_ptr.clone()), ("dropped", double_ptr)],
        )
        .unwrap();
    let buffer = f.argument(0).unwrap();
    let data = f.argument(1).unwrap();
    let dropped = f.argument(2).unwrap();
    f.shift_and_update(&buffer, 4, &data, 2, Some(&dropped)).unwrap();
    assert!(matches!(
        f.shift_and_update(&buffer, 1, &data, 2, None),
        Err(EmitterError::IndexOutOfRange(_))
    ));
    f.end().unwrap();

    let engine = jit(&mut module);
    let shift = unsafe {
        engine
            .get_function::<unsafe extern "C" fn(*mut f64, *const f64, *mut f64)>("shift")
            .unwrap()
    };
    let mut buffer = [1.0, 2.0, 3.0, 4.0];
    let data = [5.0, 6.0];
    let mut dropped = [0.0; 2];
    unsafe { shift.call(buffer.as_mut_ptr(), data.as_ptr(), dropped.as_mut_ptr()) };
    assert_eq!(buffer, [3.0, 4.0, 5.0, 6.0]);
    assert_eq!(dropped, [1.0, 2.0]);
}

#[test]
fn test_shift_register_over_two_runs() {
    let context = Context::create();
    let mut module = host_module(&context, "delay");
    let double_ptr = VariableType::Double.pointer_to();
    let f = module
        .begin_function("delay", VariableType::Void, &[("buffer", double_ptr.clone()), ("data", double_ptr)])
        .unwrap();
    let buffer = f.argument(0).unwrap();
    let data = f.argument(1).unwrap();
    f.shift_and_update(&buffer, 5, &data, 2, None).unwrap();
    f.end().unwrap();

    let engine = jit(&mut module);
    let delay = unsafe { engine.get_function::<unsafe extern "C" fn(*mut f64, *const f64)>("delay").unwrap() };
    let mut buffer = [1.1, 2.1, 3.1, 4.1, 5.1];
    unsafe { delay.call(buffer.as_mut_ptr(), [1.2, 2.2].as_ptr()) };
    assert_eq!(buffer, [3.1, 4.1, 5.1, 1.2, 2.2]);
    unsafe { delay.call(buffer.as_mut_ptr(), [3.2, 4.2].as_ptr()) };
    assert_eq!(buffer, [5.1, 1.2, 2.2, 3.2, 4.2]);
}

#[test]
fn test_if_else_if_else() {
    let context = Context::create();
    let mut module = host_module(&context, "branches");
    let mut f = module
        .begin_function("classify", VariableType::Int32, &[("x", VariableType::Int32)])
        .unwrap();
    let x = f.argument(0).unwrap();
    let result = f.variable(&VariableType::Int32, "result").unwrap();
    let negative = f.compare(TypedComparison::LessThan, &x, &f.literal(0i32)).unwrap();
    f.if_then(&negative, |f| f.store(&result, &f.literal(-1i32)))
        .unwrap()
        .else_if(
            |f| f.compare(TypedComparison::Equals, &x, &f.literal(0i32)),
            |f| f.store(&result, &f.literal(0i32)),
        )
        .unwrap()
        .otherwise(|f| f.store(&result, &f.literal(1i32)))
        .unwrap();
    let value = f.load(&result).unwrap();
    f.end_with(&value).unwrap();

    let engine = jit(&mut module);
    let classify = unsafe { engine.get_function::<unsafe extern "C" fn(i32) -> i32>("classify").unwrap() };
    unsafe {
        assert_eq!(classify.call(-7), -1);
        assert_eq!(classify.call(0), 0);
        assert_eq!(classify.call(12), 1);
    }
}

#[test]
fn test_early_return_inside_if() {
    let context = Context::create();
    let mut module = host_module(&context, "early");
    let mut f = module
        .begin_function("absolute", VariableType::Int32, &[("x", VariableType::Int32)])
        .unwrap();
    let x = f.argument(0).unwrap();
    let negative = f.compare(TypedComparison::LessThan, &x, &f.literal(0i32)).unwrap();
    f.if_then(&negative, |f| {
        let negated = f.unary(UnaryOperation::Negate, &x)?;
        f.return_value(&negated)
    })
    .unwrap()
    .end()
    .unwrap();
    f.end_with(&x).unwrap();

    let engine = jit(&mut module);
    let absolute = unsafe { engine.get_function::<unsafe extern "C" fn(i32) -> i32>("absolute").unwrap() };
    unsafe {
        assert_eq!(absolute.call(-5), 5);
        assert_eq!(absolute.call(5), 5);
    }
}

#[test]
fn test_end_after_every_branch_returned() {
    let context = Context::create();
    let mut module = host_module(&context, "branches_return");
    let mut f = module
        .begin_function("abs", VariableType::Int32, &[("x", VariableType::Int32)])
        .unwrap();
    let x = f.argument(0).unwrap();
    let negative = f.compare(TypedComparison::LessThan, &x, &f.literal(0i32)).unwrap();
    f.if_then(&negative, |f| {
        let negated = f.unary(UnaryOperation::Negate, &x)?;
        f.return_value(&negated)
    })
    .unwrap()
    .otherwise(|f| f.return_value(&x))
    .unwrap();
    let function = f.end().unwrap();
    assert_eq!(function.count_basic_blocks(), 3);

    let engine = jit(&mut module);
    let abs = unsafe { engine.get_function::<unsafe extern "C" fn(i32) -> i32>("abs").unwrap() };
    unsafe {
        assert_eq!(abs.call(-9), 9);
        assert_eq!(abs.call(4), 4);
    }
}

#[test]
fn test_integer_to_boolean_cast_is_nonzero_test() {
    let context = Context::create();
    let mut module = host_module(&context, "truthy");
    let f = module
        .begin_function("truthy", VariableType::Int32, &[("x", VariableType::Int32)])
        .unwrap();
    let x = f.argument(0).unwrap();
    let truth = f.cast(&x, &VariableType::Boolean).unwrap();
    let widened = f.cast(&truth, &VariableType::Int32).unwrap();
    f.end_with(&widened).unwrap();

    let engine = jit(&mut module);
    let truthy = unsafe { engine.get_function::<unsafe extern "C" fn(i32) -> i32>("truthy").unwrap() };
    unsafe {
        assert_eq!(truthy.call(2), 1);
        assert_eq!(truthy.call(-1), 1);
        assert_eq!(truthy.call(0), 0);
    }
}

#[test]
fn test_for_loop_rereads_mutable_bound() {
    let context = Context::create();
    let mut module = host_module(&context, "loops");
    let mut f = module
        .begin_function("sum_below", VariableType::Int32, &[("n", VariableType::Int32)])
        .unwrap();
    let n = f.argument(0).unwrap();
    let bound = f.variable_with_value(&n, "bound").unwrap();
    let sum = f.variable_with_value(&f.literal(0i32), "sum").unwrap();
    let begin = f.literal(0i32);
    let step = f.literal(1i32);
    f.for_range(&begin, &bound, &step, |f, i| {
        f.operation_and_update(&sum, TypedOperator::Add, &i)?;
        // Shrink the bound from inside the loop.
        f.store(&bound, &f.literal(5i32))
    })
    .unwrap();
    let total = f.load(&sum).unwrap();
    f.end_with(&total).unwrap();

    let engine = jit(&mut module);
    let sum_below = unsafe { engine.get_function::<unsafe extern "C" fn(i32) -> i32>("sum_below").unwrap() };
    unsafe {
        assert_eq!(sum_below.call(100), 10);
        assert_eq!(sum_below.call(3), 10);
        assert_eq!(sum_below.call(0), 0);
    }
}

#[test]
fn test_while_loop() {
    let context = Context::create();
    let mut module = host_module(&context, "whiles");
    let mut f = module
        .begin_function("halvings", VariableType::Int32, &[("x", VariableType::Int32)])
        .unwrap();
    let x = f.argument(0).unwrap();
    let value = f.variable_with_value(&x, "value").unwrap();
    let steps = f.variable_with_value(&f.literal(0i32), "steps").unwrap();
    let keep_going = f.variable(&VariableType::Boolean, "keepGoing").unwrap();
    let above_one = f.compare(TypedComparison::GreaterThan, &x, &f.literal(1i32)).unwrap();
    f.store(&keep_going, &above_one).unwrap();
    f.while_loop(&keep_going, |f| {
        f.operation_and_update(&value, TypedOperator::DivideSigned, &f.literal(2i32))?;
        f.operation_and_update(&steps, TypedOperator::Add, &f.literal(1i32))?;
        let current = f.load(&value)?;
        let more = f.compare(TypedComparison::GreaterThan, &current, &f.literal(1i32))?;
        f.store(&keep_going, &more)
    })
    .unwrap();
    let result = f.load(&steps).unwrap();
    f.end_with(&result).unwrap();

    let engine = jit(&mut module);
    let halvings = unsafe { engine.get_function::<unsafe extern "C" fn(i32) -> i32>("halvings").unwrap() };
    unsafe {
        assert_eq!(halvings.call(16), 4);
        assert_eq!(halvings.call(1), 0);
    }
}

#[test]
fn test_dot_product_and_math() {
    let context = Context::create();
    let mut module = host_module(&context, "math");
    let float_ptr = VariableType::Float.pointer_to();
    let mut f = module
        .begin_function("norm3", VariableType::Float, &[("a", float_ptr.clone()), ("b", float_ptr)])
        .unwrap();
    let a = f.argument(0).unwrap();
    let b = f.argument(1).unwrap();
    let dot = f.dot_product(3, &a, &b).unwrap();
    let root = f.unary(UnaryOperation::Sqrt, &dot).unwrap();
    f.end_with(&root).unwrap();

    let engine = jit(&mut module);
    let norm3 = unsafe { engine.get_function::<unsafe extern "C" fn(*const f32, *const f32) -> f32>("norm3").unwrap() };
    let v = [2.0f32, 3.0, 6.0];
    assert_eq!(unsafe { norm3.call(v.as_ptr(), v.as_ptr()) }, 7.0);
}

#[test]
fn test_heap_and_casts() {
    let context = Context::create();
    let mut module = host_module(&context, "heap");
    let mut f = module
        .begin_function("fill_and_sum", VariableType::Double, &[("n", VariableType::Int32)])
        .unwrap();
    let n = f.argument(0).unwrap();
    let data = f.malloc(&VariableType::Int32, &n).unwrap();
    f.for_count(&n, |f, i| f.set_value_at(&data, &i, &i)).unwrap();
    let sum = f.variable_with_value(&f.literal(0.0f64), "sum").unwrap();
    f.for_count(&n, |f, i| {
        let item = f.value_at(&data, &i)?;
        let item = f.cast(&item, &VariableType::Double)?;
        f.operation_and_update(&sum, TypedOperator::AddFloat, &item)
    })
    .unwrap();
    f.free(&data).unwrap();
    let total = f.load(&sum).unwrap();
    f.end_with(&total).unwrap();

    let engine = jit(&mut module);
    let fill_and_sum = unsafe { engine.get_function::<unsafe extern "C" fn(i32) -> f64>("fill_and_sum").unwrap() };
    assert_eq!(unsafe { fill_and_sum.call(5) }, 10.0);
}

#[test]
fn test_printf_is_declared_variadic() {
    let context = Context::create();
    let mut module = host_module(&context, "print");
    let mut f = module.begin_function("hello", VariableType::Void, &[]).unwrap();
    let value = f.literal(1.5f32);
    f.printf("value: %f\n", &[value]).unwrap();
    f.printf("again\n", &[]).unwrap();
    f.end().unwrap();
    module.verify().unwrap();

    let ir = module.print_ir();
    assert!(ir.contains("declare i32 @printf(ptr, ...)"));
    assert!(ir.contains("fpext float"));
}

#[test]
fn test_end_with_checks_return_type() {
    let context = Context::create();
    let mut module = host_module(&context, "returns");
    let f = module.begin_function("wrong", VariableType::Int32, &[]).unwrap();
    let value = f.literal(1.0f64);
    assert!(matches!(f.end_with(&value), Err(EmitterError::BadFunctionArguments(_))));
}

#[test]
fn test_current_time_is_positive() {
    let context = Context::create();
    let mut module = host_module(&context, "clock");
    let mut f = module.begin_function("now", VariableType::Double, &[]).unwrap();
    let now = f.current_time().unwrap();
    f.end_with(&now).unwrap();

    let engine = jit(&mut module);
    let now = unsafe { engine.get_function::<unsafe extern "C" fn() -> f64>("now").unwrap() };
    assert!(unsafe { now.call() } > 0.0);
}
