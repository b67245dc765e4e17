//! Test generated artifacts: C header, SWIG interface, object code and the diagnostic gate.

mod common;

use common::{device_module, host_module};
use inkwell::context::Context;
use modelc::{
    object_info, swig_writer, CallbackKind, DiagnosticSeverity, EmitterError, FunctionDeclaration, ModuleEmitter, ModuleOutputFormat,
    Parameter, TypedOperator, VariableType,
};

fn render_text(module: &mut ModuleEmitter<'_>, format: ModuleOutputFormat) -> String {
    let options = module.machine_code_options();
    String::from_utf8(module.render(format, &options).unwrap()).unwrap()
}

/// Declare `bool <name>(double* input)` and register it as a source callback.
fn declare_source_callback(module: &mut ModuleEmitter<'_>, name: &str) {
    module
        .declare_function(FunctionDeclaration::new(
            name,
            VariableType::Boolean,
            vec![Parameter::new("input", VariableType::Double.pointer_to())],
        ))
        .unwrap();
    module.register_callback(name, CallbackKind::Source).unwrap();
}

#[test]
fn test_header_text() {
    let context = Context::create();
    let mut module = host_module(&context, "hdr");
    module.add_preprocessor_definition("HDR_INPUT_SIZE", "3");
    module
        .get_or_create_struct(
            "hdr_Point",
            &[("x", VariableType::Float), ("y", VariableType::Float), ("tags", VariableType::Int32.array_of(3))],
        )
        .unwrap();
    module.get_or_create_struct("hdr_Hidden", &[("z", VariableType::Int64)]).unwrap();
    module.include_type_in_header("hdr_Point").unwrap();
    declare_source_callback(&mut module, "hdr_InputCallback");

    let mut f = module
        .begin_function("hdr_Predict", VariableType::Void, &[("output", VariableType::Double.pointer_to())])
        .unwrap();
    let output = f.argument(0).unwrap();
    let input = f.variable_array(&VariableType::Double, 3, "input").unwrap();
    f.call("hdr_InputCallback", &[input.clone()]).unwrap();
    let first = f.load(&input).unwrap();
    f.store(&output, &first).unwrap();
    f.include_in_header().unwrap();
    f.include_in_predict_interface().unwrap();
    f.set_comment("Runs the model\nOne sample at a time").unwrap();
    f.end().unwrap();

    let header = render_text(&mut module, ModuleOutputFormat::CHeader);
    assert!(header.starts_with("//\n// modelc header for module hdr\n//\n\n#pragma once\n"));
    assert!(header.contains("#include <stdint.h>"));
    assert!(header.contains("#define HDR_INPUT_SIZE 3\n"));
    assert!(header.contains("#ifdef __cplusplus\nextern \"C\"\n{\n#endif"));
    assert!(header.contains(
        "#ifndef __hdr_Point_DEFINED__\n#define __hdr_Point_DEFINED__\ntypedef struct hdr_Point\n{\n    float x;\n    float y;\n    int32_t tags[3];\n} hdr_Point;\n"
    ));
    assert!(!header.contains("hdr_Hidden"));
    assert!(header.contains("// Runs the model\n// One sample at a time\nvoid hdr_Predict(double* output);\n"));
    assert!(header.contains("void hdr_Reset(void);"));
    assert!(header.find("// Types").unwrap() < header.find("// Functions").unwrap());

    // C++ wrapper forwarding the source callback.
    assert!(header.contains("class hdr_Wrapper"));
    assert!(header.contains("virtual bool FillInput(double* input) = 0;"));
    assert!(header.contains("std::vector<double> Predict(size_t outputSize)"));
    assert!(header.contains("extern \"C\" inline bool hdr_InputCallback(double* input)"));
    assert!(!header.contains("@@"));
}

#[test]
fn test_header_without_callbacks_has_no_wrapper() {
    let context = Context::create();
    let mut module = host_module(&context, "plain");
    let f = module
        .begin_function("plain_Scale", VariableType::Float, &[("x", VariableType::Float)])
        .unwrap();
    let x = f.argument(0).unwrap();
    let doubled = f.binary(TypedOperator::AddFloat, &x, &x).unwrap();
    f.end_with(&doubled).unwrap();

    let header = render_text(&mut module, ModuleOutputFormat::CHeader);
    assert!(!header.contains("plain_Scale"));
    assert!(!header.contains("// Types"));
    assert!(!header.contains("class plain_Wrapper"));
}

#[test]
fn test_swig_interface_text() {
    let context = Context::create();
    let mut module = host_module(&context, "swg");
    declare_source_callback(&mut module, "swg_SourceCallback");

    let double_ptr = VariableType::Double.pointer_to();
    let mut f = module
        .begin_function("swg_Predict", VariableType::Void, &[("input", double_ptr.clone()), ("output", double_ptr)])
        .unwrap();
    let input = f.argument(0).unwrap();
    let output = f.argument(1).unwrap();
    f.memory_copy(&output, &input, &f.literal(1i32)).unwrap();
    f.include_in_header().unwrap();
    f.include_in_predict_interface().unwrap();
    f.end().unwrap();

    let interface = render_text(&mut module, ModuleOutputFormat::SwigInterface);
    assert!(interface.contains("%module(directors=\"1\") swg\n"));
    assert!(interface.contains("%feature(\"autodoc\", \"3\");"));
    assert!(interface.contains("%include \"callback.i\"\n%include \"macros.i\"\n"));
    assert!(interface.contains("#ifdef SWIGPYTHON\n%rename(\"%(undercase)s\", %$isfunction) \"\";\n#endif"));
    assert!(interface.contains("%{\n#include \"swg.i.h\"\n%}"));
    assert!(interface.contains("WRAP_CALLABLES_AS_CALLBACKS(swgPredictor, DoubleCallbackBase, double)"));
    assert!(interface.trim_end().ends_with("%include \"swg.i.h\""));

    let swig_header = swig_writer::write_swig_header(&module).unwrap();
    assert!(swig_header.contains("#include \"CallbackInterface.h\""));
    assert!(swig_header.contains("void swg_Predict(double* input, double* output);"));
    assert!(swig_header.contains(
        "void swg_Predict(const std::vector<double>& input, std::vector<double>& output);"
    ));
    assert!(swig_header.contains("    swg_Predict(const_cast<double*>(&input[0]), &output[0]);"));
}

fn emit_exported_add(module: &mut ModuleEmitter<'_>) {
    let f = module
        .begin_function("obj_Add", VariableType::Int32, &[("a", VariableType::Int32), ("b", VariableType::Int32)])
        .unwrap();
    let a = f.argument(0).unwrap();
    let b = f.argument(1).unwrap();
    let sum = f.binary(TypedOperator::Add, &a, &b).unwrap();
    f.end_with(&sum).unwrap();
}

#[test]
fn test_object_symbols_elf() {
    let context = Context::create();
    let mut module = device_module(&context, "obj", "linux");
    emit_exported_add(&mut module);
    let options = module.machine_code_options();
    let object = module.render(ModuleOutputFormat::ObjectCode, &options).unwrap();

    let symbols = object_info::defined_symbols(&object).unwrap();
    let add = symbols.iter().find(|s| s.name == "obj_Add").unwrap();
    assert_eq!(add.section, ".text");
    assert!(add.size > 0);

    let listing = object_info::disassemble_symbol(&object, "obj_Add").unwrap();
    assert!(listing.contains("ret"));
    assert!(matches!(
        object_info::disassemble_symbol(&object, "missing"),
        Err(EmitterError::FunctionNotFound(_))
    ));
}

#[test]
fn test_object_symbols_macho() {
    let context = Context::create();
    let mut module = device_module(&context, "obj", "mac");
    emit_exported_add(&mut module);
    let options = module.machine_code_options();
    let object = module.render(ModuleOutputFormat::ObjectCode, &options).unwrap();

    let add = object_info::find_symbol(&object, "obj_Add").unwrap();
    assert_eq!(add.name, "_obj_Add");
    assert!(add.size > 0);
}

#[test]
fn test_arm_assembly_and_no_x86_disassembly() {
    let context = Context::create();
    let mut module = device_module(&context, "arm", "pi3");
    emit_exported_add(&mut module);
    let assembly = render_text(&mut module, ModuleOutputFormat::Assembly);
    assert!(assembly.contains("obj_Add:"));

    let options = module.machine_code_options();
    let object = module.render(ModuleOutputFormat::ObjectCode, &options).unwrap();
    assert!(matches!(
        object_info::disassemble_symbol(&object, "obj_Add"),
        Err(EmitterError::TargetNotSupported(_))
    ));
}

#[test]
fn test_backend_error_fails_the_write() {
    let context = Context::create();
    let mut module = device_module(&context, "gate", "linux");
    emit_exported_add(&mut module);
    module.module().set_inline_assembly("bogus_instruction %eax");

    let options = module.machine_code_options();
    let result = module.render(ModuleOutputFormat::ObjectCode, &options);
    assert!(matches!(result, Err(EmitterError::Unexpected(_))));
    assert!(module.diagnostics().had_error());
    assert!(!module.diagnostics().messages().is_empty());
}

#[test]
fn test_recorded_errors_survive_a_write() {
    let context = Context::create();
    let mut module = device_module(&context, "sticky", "linux");
    emit_exported_add(&mut module);
    module.diagnostics().record(DiagnosticSeverity::Error, "earlier failure");

    let options = module.machine_code_options();
    let result = module.render(ModuleOutputFormat::ObjectCode, &options);
    assert!(matches!(result, Err(EmitterError::Unexpected(_))));
    assert!(module.diagnostics().had_error());
    assert!(module.diagnostics().messages().iter().any(|d| d.message == "earlier failure"));

    module.diagnostics().clear_messages();
    let object = module.render(ModuleOutputFormat::ObjectCode, &options).unwrap();
    assert!(!object.is_empty());
    assert!(!module.diagnostics().had_error());
}
