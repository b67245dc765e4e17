//! Test module-level emission: functions, globals, structs, metadata and output.

mod common;

use common::{host_module, jit};
use inkwell::context::Context;
use modelc::{
    CompilerOptions, EmitterError, FunctionDeclaration, ModuleEmitter, ModuleOutputFormat, Parameter,
    TypedOperator, VariableType,
};

/// Emit `int32_t add(int32_t a, int32_t b)`.
fn emit_add(module: &mut ModuleEmitter<'_>) {
    let f = module
        .begin_function("add", VariableType::Int32, &[("a", VariableType::Int32), ("b", VariableType::Int32)])
        .unwrap();
    let a = f.argument(0).unwrap();
    let b = f.argument(1).unwrap();
    let sum = f.binary(TypedOperator::Add, &a, &b).unwrap();
    f.end_with(&sum).unwrap();
}

#[test]
fn test_ir_round_trip_runs() {
    let context = Context::create();
    let mut module = host_module(&context, "adder");
    emit_add(&mut module);
    module.finish().unwrap();
    let ir = module.print_ir();
    assert!(ir.contains("define i32 @add(i32 %a, i32 %b)"));

    let mut loaded = ModuleEmitter::load_ir(&context, "adder", &ir, CompilerOptions::default()).unwrap();
    assert!(loaded.has_function("adder_Reset"));
    let engine = jit(&mut loaded);
    let add = unsafe { engine.get_function::<unsafe extern "C" fn(i32, i32) -> i32>("add").unwrap() };
    assert_eq!(unsafe { add.call(3, 4) }, 7);
}

#[test]
fn test_load_ir_rejects_garbage() {
    let context = Context::create();
    let result = ModuleEmitter::load_ir(&context, "bad", "define i32 @f( {", CompilerOptions::default());
    assert!(matches!(result, Err(EmitterError::ParserError(_))));
}

#[test]
fn test_nested_function_emission() {
    let context = Context::create();
    let mut module = host_module(&context, "nested");

    let mut outer = module
        .begin_function("outer", VariableType::Int32, &[("x", VariableType::Int32)])
        .unwrap();
    let x = outer.argument(0).unwrap();
    let before = outer.binary(TypedOperator::Add, &x, &outer.literal(1i32)).unwrap();
    {
        let mut inner = outer
            .module()
            .begin_function("inner", VariableType::Int32, &[("y", VariableType::Int32)])
            .unwrap();
        assert_eq!(inner.module().function_depth(), 2);
        let y = inner.argument(0).unwrap();
        let doubled = inner.binary(TypedOperator::Add, &y, &y).unwrap();
        inner.end_with(&doubled).unwrap();
    }
    assert_eq!(outer.module().function_depth(), 1);
    let call = outer.call("inner", &[before]).unwrap().unwrap();
    outer.end_with(&call).unwrap();
    assert_eq!(module.function_depth(), 0);

    let engine = jit(&mut module);
    let outer = unsafe { engine.get_function::<unsafe extern "C" fn(i32) -> i32>("outer").unwrap() };
    assert_eq!(unsafe { outer.call(4) }, 10);
}

#[test]
fn test_finish_with_open_function_fails() {
    let context = Context::create();
    let mut module = host_module(&context, "open");
    let f = module.begin_function("pending", VariableType::Void, &[]).unwrap();
    drop(f);
    assert!(matches!(module.finish(), Err(EmitterError::IndexOutOfRange(_))));
}

#[test]
fn test_redeclaration_must_match() {
    let context = Context::create();
    let mut module = host_module(&context, "decls");
    let puts = FunctionDeclaration::new(
        "puts",
        VariableType::Int32,
        vec![Parameter::new("s", VariableType::Char8.pointer_to())],
    );
    module.declare_function(puts.clone()).unwrap();
    module.declare_function(puts).unwrap();

    let wrong = FunctionDeclaration::new("puts", VariableType::Void, vec![]);
    assert!(matches!(module.declare_function(wrong), Err(EmitterError::FunctionNotFound(_))));
    assert_eq!(module.declarations().count(), 1);
}

#[test]
fn test_globals_are_zero_initialized() {
    let context = Context::create();
    let mut module = host_module(&context, "globals");
    let counter = module.global(&VariableType::Int32, "counter").unwrap();
    module.global_array(&VariableType::Double, "weights", 4).unwrap();
    module.constant_array("bias", &[1.5f64, 2.5]).unwrap();
    assert_eq!(counter.ty, VariableType::Int32.pointer_to());

    let ir = module.print_ir();
    assert!(ir.contains("@counter = global i32 0"));
    assert!(ir.contains("@weights = global [4 x double] zeroinitializer"));
    assert!(ir.contains("@bias = constant [2 x double] [double 1.500000e+00, double 2.500000e+00]"));

    let again = module.global(&VariableType::Int32, "counter");
    assert!(matches!(again, Err(EmitterError::VariableScopeNotSupported(_))));
    assert!(module.global_value("weights").is_some());
}

#[test]
fn test_string_literals_are_shared() {
    let context = Context::create();
    let mut module = host_module(&context, "strings");
    let a = module.string_literal("hello");
    let b = module.string_literal("hello");
    let c = module.string_literal("world");
    assert_eq!(a.value, b.value);
    assert_ne!(a.value, c.value);
}

#[test]
fn test_struct_creation_is_idempotent() {
    let context = Context::create();
    let mut module = host_module(&context, "structs");
    let fields = [("x", VariableType::Float), ("y", VariableType::Float)];
    let first = module.get_or_create_struct("Point", &fields).unwrap();
    let second = module.get_or_create_struct("Point", &fields).unwrap();
    assert_eq!(first, second);
    assert_eq!(module.struct_definitions().len(), 1);

    let definition = module.struct_definition("Point").unwrap();
    assert_eq!(definition.fields[1].0, "y");
    assert_eq!(module.size_of(&first).unwrap(), 8);

    let conflicting = module.get_or_create_struct("Point", &[("x", VariableType::Double)]);
    assert!(matches!(conflicting, Err(EmitterError::BadStructDefinition(_))));
}

#[test]
fn test_metadata_round_trip() {
    let context = Context::create();
    let mut module = host_module(&context, "meta");
    emit_add(&mut module);

    module.insert_metadata("model.version", &["1", "2"]).unwrap();
    module.insert_metadata("model.version", &["3"]).unwrap();
    module.insert_function_metadata("add", "model.op", &["plus"]).unwrap();

    assert!(module.has_metadata("model.version"));
    let values = module.get_metadata("model.version").unwrap();
    assert_eq!(values, &[vec!["1".to_string(), "2".to_string()], vec!["3".to_string()]]);
    assert_eq!(module.get_function_metadata("add", "model.op").unwrap()[0], vec!["plus".to_string()]);
    assert_eq!(module.functions_with_tag("model.op")[0].0, "add");

    module.insert_metadata("model.flag", &[""]).unwrap();
    module.insert_function_metadata("add", "model.flag", &[""]).unwrap();
    assert_eq!(module.get_metadata("model.flag").unwrap(), &[vec![String::new()]]);
    assert_eq!(module.get_function_metadata("add", "model.flag").unwrap(), &[vec![String::new()]]);

    assert!(!module.has_metadata("model.missing"));
    assert!(module.try_get_metadata("model.missing").is_none());
    assert!(matches!(module.get_metadata("model.missing"), Err(EmitterError::MetadataNotFound(_))));
    assert!(matches!(
        module.insert_function_metadata("nope", "model.op", &[]),
        Err(EmitterError::FunctionNotFound(_))
    ));

    let ir = module.print_ir();
    assert!(ir.contains("!modelc.metadata"));
    assert!(ir.contains("!\"model.version\""));
}

#[test]
fn test_reset_aggregator_calls_every_reset() {
    let context = Context::create();
    let mut module = host_module(&context, "resets");
    let state = module.global(&VariableType::Int32, "state").unwrap();
    for node in ["a", "b"] {
        let f = module.begin_reset_function(node).unwrap();
        f.store(&state, &f.literal(0i32)).unwrap();
        f.end().unwrap();
    }
    module.finish().unwrap();
    let ir = module.print_ir();
    assert!(ir.contains("call void @resets_a_Reset()"));
    assert!(ir.contains("call void @resets_b_Reset()"));
    assert!(module.has_function_metadata("resets_Reset", modelc::metadata::DECLARE_FUNCTION_IN_HEADER));
}

#[test]
fn test_reset_aggregator_follows_later_additions() {
    let context = Context::create();
    let mut module = host_module(&context, "late");
    let state = module.global(&VariableType::Int32, "state").unwrap();
    let f = module.begin_reset_function("a").unwrap();
    f.store(&state, &f.literal(0i32)).unwrap();
    f.end().unwrap();

    let options = module.machine_code_options();
    let first = String::from_utf8(module.render(ModuleOutputFormat::Ir, &options).unwrap()).unwrap();
    assert!(first.contains("call void @late_a_Reset()"));
    assert!(!first.contains("@late_b_Reset"));

    let f = module.begin_reset_function("b").unwrap();
    f.store(&state, &f.literal(1i32)).unwrap();
    f.end().unwrap();
    let second = String::from_utf8(module.render(ModuleOutputFormat::Ir, &options).unwrap()).unwrap();
    assert!(second.contains("call void @late_a_Reset()"));
    assert!(second.contains("call void @late_b_Reset()"));
    module.verify().unwrap();

    let header = String::from_utf8(module.render(ModuleOutputFormat::CHeader, &options).unwrap()).unwrap();
    assert_eq!(header.matches("void late_Reset(void);").count(), 1);
}

#[test]
fn test_loaded_module_calls_parsed_functions() {
    let context = Context::create();
    let mut source = host_module(&context, "lib");
    let mut f = source
        .begin_function("lib_Add", VariableType::Int32, &[("a", VariableType::Int32), ("b", VariableType::Int32)])
        .unwrap();
    let a = f.argument(0).unwrap();
    let b = f.argument(1).unwrap();
    let sum = f.binary(TypedOperator::Add, &a, &b).unwrap();
    f.include_in_header().unwrap();
    f.end_with(&sum).unwrap();
    source.finish().unwrap();
    let ir = source.print_ir();

    let other = Context::create();
    let mut loaded = ModuleEmitter::load_ir(&other, "lib", &ir, CompilerOptions::default()).unwrap();
    let declaration = loaded.declaration("lib_Add").unwrap();
    assert_eq!(declaration.return_type, VariableType::Int32);
    assert_eq!(declaration.parameters[1].name, "b");
    assert!(matches!(
        loaded.begin_function("lib_Add", VariableType::Double, &[]),
        Err(EmitterError::FunctionNotFound(_))
    ));

    let f = loaded
        .begin_function("lib_AddTwice", VariableType::Int32, &[("x", VariableType::Int32)])
        .unwrap();
    let x = f.argument(0).unwrap();
    let once = f.call("lib_Add", &[x.clone(), x]).unwrap().unwrap();
    let twice = f.call("lib_Add", &[once.clone(), once]).unwrap().unwrap();
    f.end_with(&twice).unwrap();

    let options = loaded.machine_code_options();
    let header = String::from_utf8(loaded.render(ModuleOutputFormat::CHeader, &options).unwrap()).unwrap();
    assert!(header.contains("int32_t lib_Add(int32_t a, int32_t b);"));
    assert_eq!(header.matches("void lib_Reset(void);").count(), 1);

    let engine = jit(&mut loaded);
    let add_twice = unsafe { engine.get_function::<unsafe extern "C" fn(i32) -> i32>("lib_AddTwice").unwrap() };
    assert_eq!(unsafe { add_twice.call(3) }, 12);
}

#[test]
fn test_every_format_is_deterministic() {
    let context = Context::create();
    let mut module = host_module(&context, "det");
    emit_add(&mut module);
    let options = module.machine_code_options();
    for format in ModuleOutputFormat::ALL {
        let first = module.render(format, &options).unwrap();
        let second = module.render(format, &options).unwrap();
        assert!(!first.is_empty(), "{format} output is empty");
        assert_eq!(first, second, "{format} output differs between writes");
    }
}

#[test]
fn test_write_to_file_replaces_atomically() {
    let context = Context::create();
    let mut module = host_module(&context, "files");
    emit_add(&mut module);

    let dir = std::env::temp_dir().join(format!("modelc-files-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("files.ll");
    std::fs::write(&path, "stale").unwrap();
    module.write_to_file(&path, ModuleOutputFormat::Ir).unwrap();

    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("define i32 @add"));
    let leftovers: Vec<_> = std::fs::read_dir(&dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
        .collect();
    assert!(leftovers.is_empty());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_write_to_stream() {
    let context = Context::create();
    let mut module = host_module(&context, "stream");
    emit_add(&mut module);
    let mut buffer = Vec::new();
    module.write_to_stream(&mut buffer, ModuleOutputFormat::Bitcode).unwrap();
    assert_eq!(&buffer[..2], b"BC");
}
