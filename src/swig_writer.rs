// SWIG interface generation. The interface file declares the module with directors enabled,
// pulls in the shared callback and macro interfaces, renames functions to snake case for
// Python, includes the companion <module>.i.h header and wraps each source callback with
// WRAP_CALLABLES_AS_CALLBACKS. The companion header is the C header followed by
// std::vector overloads of each two-pointer predict function, whose bodies are hidden from
// SWIG behind #ifndef SWIG.

//! SWIG interface writer.

use std::fmt::Write;

use crate::error::{EmitterError, EmitterResult};
use crate::header_writer;
use crate::metadata::{self, CallbackKind};
use crate::module_emitter::ModuleEmitter;
use crate::types::VariableType;

fn fmt_err(_: std::fmt::Error) -> EmitterError {
    EmitterError::unexpected("failed to format SWIG interface")
}

fn pascal_case(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

fn pointee_name(ty: &VariableType) -> Option<String> {
    match ty {
        VariableType::Pointer(elem) => Some(elem.c_type_name()),
        _ => None,
    }
}

/// Element type of a source callback's buffer argument.
fn callback_value_type(module: &ModuleEmitter<'_>, callback: &str) -> EmitterResult<String> {
    let declaration = module.declaration(callback)?;
    declaration
        .parameters
        .first()
        .and_then(|p| pointee_name(&p.ty))
        .ok_or_else(|| EmitterError::BadFunctionArguments(format!("callback {callback} must take a buffer pointer")))
}

/// Write `<module>.i`.
pub fn write_swig_interface(module: &ModuleEmitter<'_>) -> EmitterResult<String> {
    let name = module.name();
    let header = format!("{name}.i.h");
    let mut out = String::new();

    write!(out, "//\n// modelc SWIG interface for module {name}\n//\n\n").map_err(fmt_err)?;
    writeln!(out, "%module(directors=\"1\") {name}").map_err(fmt_err)?;
    out.push_str("%feature(\"autodoc\", \"3\");\n\n");
    out.push_str("%include \"callback.i\"\n");
    out.push_str("%include \"macros.i\"\n\n");
    out.push_str("#ifdef SWIGPYTHON\n");
    out.push_str("%rename(\"%(undercase)s\", %$isfunction) \"\";\n");
    out.push_str("#endif\n\n");

    write!(out, "%{{\n#include \"{header}\"\n%}}\n\n").map_err(fmt_err)?;

    for callback in module.callbacks(CallbackKind::Source) {
        let value_type = callback_value_type(module, callback)?;
        let class_name = pascal_case(&format!("{value_type}CallbackBase"));
        write!(out, "WRAP_CALLABLES_AS_CALLBACKS({name}Predictor, {class_name}, {value_type})\n\n").map_err(fmt_err)?;
    }

    writeln!(out, "%include \"{header}\"").map_err(fmt_err)?;
    Ok(out)
}

/// Write `<module>.i.h`, the header SWIG wraps.
pub fn write_swig_header(module: &ModuleEmitter<'_>) -> EmitterResult<String> {
    let mut out = String::new();
    write!(out, "//\n// modelc SWIG header for module {}\n//\n\n", module.name()).map_err(fmt_err)?;
    out.push_str("#pragma once\n\n");

    out.push_str("#ifndef SWIG\n");
    if !module.callbacks(CallbackKind::Source).is_empty() {
        out.push_str("#include \"CallbackInterface.h\"\n");
        out.push_str("#include \"ClockInterface.h\"\n");
    }
    out.push_str("#include <vector>\n\n");
    header_writer::write_header_body(&mut out, module)?;
    out.push_str("#endif // SWIG\n\n");

    for (predict, _) in module.functions_with_tag(metadata::PREDICT_FUNCTION) {
        let declaration = module.declaration(&predict)?;
        let [input, output] = declaration.parameters.as_slice() else {
            log::debug!("No vector overload for {}: expected input and output", predict);
            continue;
        };
        let (Some(input_type), Some(output_type)) = (pointee_name(&input.ty), pointee_name(&output.ty)) else {
            continue;
        };
        let signature = format!(
            "void {predict}(const std::vector<{input_type}>& input, std::vector<{output_type}>& output)"
        );
        write!(out, "{signature};\n\n").map_err(fmt_err)?;
        out.push_str("#ifndef SWIG\n");
        write!(
            out,
            "{signature}\n{{\n    {predict}(const_cast<{input_type}*>(&input[0]), &output[0]);\n}}\n"
        )
        .map_err(fmt_err)?;
        out.push_str("#endif // SWIG\n\n");
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pascal_case() {
        assert_eq!(pascal_case("doubleCallbackBase"), "DoubleCallbackBase");
        assert_eq!(pascal_case(""), "");
    }
}
