// C header generation. The header is synthesized from what the module recorded while it was
// being emitted, never from the LLVM IR: struct definitions and their field names, function
// declarations, the per-function comment and header tags, preprocessor definitions and
// callback registrations. Structs are written in creation order, which is always a valid
// declaration order because a struct can only reference types that already exist. When the
// module has a predict entry point and a source callback, a small C++ wrapper class is
// appended that forwards the callback to a virtual method.

//! C header writer.

use std::fmt::Write;

use crate::error::{EmitterError, EmitterResult};
use crate::metadata::{self, CallbackKind};
use crate::module_emitter::{FunctionDeclaration, ModuleEmitter, StructDefinition};
use crate::types::VariableType;

const CPP_WRAPPER_TEMPLATE: &str = r#"#ifdef __cplusplus
#include <vector>

class @@MODULE@@_Wrapper
{
public:
    virtual ~@@MODULE@@_Wrapper() = default;

    // Fill `input` with the next sample. Return false when no sample is available.
    virtual bool FillInput(@@INPUT_TYPE@@* input) = 0;

    std::vector<@@OUTPUT_TYPE@@> Predict(size_t outputSize)
    {
        std::vector<@@OUTPUT_TYPE@@> output(outputSize);
        s_instance = this;
        @@PREDICT@@(output.data());
        s_instance = nullptr;
        return output;
    }

    static bool Forward(@@INPUT_TYPE@@* input)
    {
        return s_instance != nullptr && s_instance->FillInput(input);
    }

private:
    static inline @@MODULE@@_Wrapper* s_instance = nullptr;
};

extern "C" inline bool @@CALLBACK@@(@@INPUT_TYPE@@* input)
{
    return @@MODULE@@_Wrapper::Forward(input);
}
#endif // __cplusplus
"#;

fn fmt_err(_: std::fmt::Error) -> EmitterError {
    EmitterError::unexpected("failed to format header")
}

/// Declaration of `name` with type `ty`, keeping array extents.
pub(crate) fn declarator(ty: &VariableType, name: &str) -> String {
    match ty {
        VariableType::Array(elem, len) => format!("{} {}[{}]", elem.c_type_name(), name, len),
        other => format!("{} {}", other.c_type_name(), name),
    }
}

fn write_struct(out: &mut String, definition: &StructDefinition) -> std::fmt::Result {
    let name = &definition.name;
    writeln!(out, "#ifndef __{name}_DEFINED__")?;
    writeln!(out, "#define __{name}_DEFINED__")?;
    writeln!(out, "typedef struct {name}")?;
    writeln!(out, "{{")?;
    for (field, ty) in &definition.fields {
        writeln!(out, "    {};", declarator(ty, field))?;
    }
    writeln!(out, "}} {name};")?;
    writeln!(out, "#endif // __{name}_DEFINED__")
}

/// `ret name(type p0, type p1)` without a trailing semicolon.
pub(crate) fn prototype(declaration: &FunctionDeclaration) -> String {
    let params: Vec<String> = declaration
        .parameters
        .iter()
        .map(|p| format!("{} {}", p.ty.c_type_name(), p.name))
        .collect();
    let mut params = params.join(", ");
    if declaration.variadic {
        params.push_str(if params.is_empty() { "..." } else { ", ..." });
    } else if params.is_empty() {
        params.push_str("void");
    }
    format!("{} {}({})", declaration.return_type.c_type_name(), declaration.name, params)
}

fn header_structs<'a>(module: &'a ModuleEmitter<'_>) -> Vec<&'a StructDefinition> {
    let Some(tagged) = module.try_get_metadata(metadata::DECLARE_TYPE_IN_HEADER) else {
        return Vec::new();
    };
    let names: Vec<&str> = tagged.iter().flatten().map(String::as_str).collect();
    module
        .struct_definitions()
        .iter()
        .filter(|s| names.contains(&s.name.as_str()))
        .collect()
}

fn write_function(out: &mut String, module: &ModuleEmitter<'_>, name: &str) -> EmitterResult<()> {
    let declaration = module.declaration(name)?;
    if let Some(comments) = module.metadata().try_get(name, metadata::FUNCTION_COMMENT) {
        for line in comments.iter().filter_map(|c| c.first()).flat_map(|c| c.lines()) {
            writeln!(out, "// {line}").map_err(fmt_err)?;
        }
    }
    writeln!(out, "{};", prototype(declaration)).map_err(fmt_err)?;
    writeln!(out).map_err(fmt_err)
}

/// Types for the C++ wrapper: the source callback's input element and predict's output element.
fn wrapper_types(module: &ModuleEmitter<'_>, predict: &str, callback: &str) -> EmitterResult<Option<(String, String)>> {
    let predict = module.declaration(predict)?;
    let callback = module.declaration(callback)?;
    // Callback-driven predict functions take only the output buffer.
    let output = match predict.parameters.as_slice() {
        [only] => match &only.ty {
            VariableType::Pointer(elem) => elem.c_type_name(),
            _ => return Ok(None),
        },
        _ => return Ok(None),
    };
    let input = match callback.parameters.first().map(|p| &p.ty) {
        Some(VariableType::Pointer(elem)) => elem.c_type_name(),
        _ => return Ok(None),
    };
    Ok(Some((input, output)))
}

fn write_cpp_wrapper(out: &mut String, module: &ModuleEmitter<'_>) -> EmitterResult<()> {
    let predicts = module.functions_with_tag(metadata::PREDICT_FUNCTION);
    let (Some((predict, _)), Some(callback)) = (predicts.first(), module.callbacks(CallbackKind::Source).first()) else {
        return Ok(());
    };
    let Some((input, output)) = wrapper_types(module, predict, callback)? else {
        log::debug!("Skipping C++ wrapper for {}: unsupported signatures", module.name());
        return Ok(());
    };
    let wrapper = CPP_WRAPPER_TEMPLATE
        .replace("@@MODULE@@", module.name())
        .replace("@@PREDICT@@", predict)
        .replace("@@CALLBACK@@", callback)
        .replace("@@INPUT_TYPE@@", &input)
        .replace("@@OUTPUT_TYPE@@", &output);
    out.push('\n');
    out.push_str(&wrapper);
    Ok(())
}

/// Write the C header declaring the module's public types and functions.
pub fn write_header(module: &ModuleEmitter<'_>) -> EmitterResult<String> {
    let mut out = String::new();
    write_header_body(&mut out, module)?;
    write_cpp_wrapper(&mut out, module)?;
    log::debug!("Header for {}: {} bytes", module.name(), out.len());
    Ok(out)
}

/// The header without the C++ wrapper.
pub(crate) fn write_header_body(out: &mut String, module: &ModuleEmitter<'_>) -> EmitterResult<()> {
    write!(out, "//\n// modelc header for module {}\n//\n\n", module.name()).map_err(fmt_err)?;
    out.push_str("#pragma once\n\n");
    out.push_str("#include <stdint.h>\n#include <stdbool.h>\n\n");

    let definitions = module.preprocessor_definitions();
    if !definitions.is_empty() {
        for (name, value) in definitions {
            writeln!(out, "#define {name} {value}").map_err(fmt_err)?;
        }
        out.push('\n');
    }

    out.push_str("#ifdef __cplusplus\nextern \"C\"\n{\n#endif\n\n");

    let structs = header_structs(module);
    if !structs.is_empty() {
        out.push_str("//\n// Types\n//\n\n");
        for definition in structs {
            write_struct(out, definition).map_err(fmt_err)?;
            out.push('\n');
        }
    }

    out.push_str("//\n// Functions\n//\n\n");
    for (name, _) in module.functions_with_tag(metadata::DECLARE_FUNCTION_IN_HEADER) {
        write_function(out, module, &name)?;
    }

    out.push_str("#ifdef __cplusplus\n} // extern \"C\"\n#endif\n");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module_emitter::Parameter;

    #[test]
    fn test_declarator_keeps_array_extent() {
        assert_eq!(declarator(&VariableType::Float.array_of(4), "data"), "float data[4]");
        assert_eq!(declarator(&VariableType::Int32.pointer_to(), "p"), "int32_t* p");
    }

    #[test]
    fn test_prototype() {
        let decl = FunctionDeclaration::new(
            "model_Predict",
            VariableType::Void,
            vec![
                Parameter::new("input", VariableType::Double.pointer_to()),
                Parameter::new("output", VariableType::Double.pointer_to()),
            ],
        );
        assert_eq!(prototype(&decl), "void model_Predict(double* input, double* output)");
        let empty = FunctionDeclaration::new("model_Reset", VariableType::Void, vec![]);
        assert_eq!(prototype(&empty), "void model_Reset(void)");
        let printf = FunctionDeclaration::new(
            "printf",
            VariableType::Int32,
            vec![Parameter::new("format", VariableType::Char8.pointer_to())],
        )
        .variadic();
        assert_eq!(prototype(&printf), "int32_t printf(char* format, ...)");
    }
}
