// Metadata storage for emitted modules. Metadata is a free-form store keyed by
// (function-name-or-empty, tag) whose values are ordered lists of string lists; it drives C
// header and SWIG interface generation without re-reading LLVM IR. Tag names used at the
// serialization boundary live here as constants, and CallbackKind gives callback tagging a
// typed face inside the crate while preserving the string values external tooling expects.
// A BTreeMap keeps iteration deterministic so repeated writes produce identical artifacts.

//! Module and function metadata.

use std::collections::BTreeMap;

use crate::error::{EmitterError, EmitterResult};

/// Function is declared in the generated C header.
pub const DECLARE_FUNCTION_IN_HEADER: &str = "modelc.header.declareFunction";
/// Module-level list of struct names declared in the generated C header.
pub const DECLARE_TYPE_IN_HEADER: &str = "modelc.header.declareType";
/// Function is a model predict entry point.
pub const PREDICT_FUNCTION: &str = "modelc.fn.predict";
/// Function is a callback; the value names the callback kind.
pub const CALLBACK_FUNCTION: &str = "modelc.fn.callback";
/// Function is exposed through the SWIG interface.
pub const SWIG_FUNCTION: &str = "swig.function";
/// Function comment lines, written above its declaration in the header.
pub const FUNCTION_COMMENT: &str = "modelc.fn.comment";
/// Prefix of module-level tags recording struct field names.
pub const STRUCT_FIELDS_PREFIX: &str = "modelc.struct.fields.";

/// Kinds of callback a model can call out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CallbackKind {
    Source,
    Sink,
    Lag,
}

impl CallbackKind {
    pub fn tag_value(self) -> &'static str {
        match self {
            CallbackKind::Source => "SourceNode",
            CallbackKind::Sink => "SinkNode",
            CallbackKind::Lag => "LagNotification",
        }
    }

    pub fn from_tag_value(value: &str) -> Option<Self> {
        match value {
            "SourceNode" => Some(CallbackKind::Source),
            "SinkNode" => Some(CallbackKind::Sink),
            "LagNotification" => Some(CallbackKind::Lag),
            _ => None,
        }
    }
}

/// Ordered key to value-list store.
#[derive(Debug, Default, Clone)]
pub struct MetadataStore {
    entries: BTreeMap<(String, String), Vec<Vec<String>>>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one value list under (function, tag). An empty function name is module scope.
    pub fn insert(&mut self, function: &str, tag: &str, values: Vec<String>) {
        log::trace!("metadata [{}] {} = {:?}", function, tag, values);
        self.entries
            .entry((function.to_string(), tag.to_string()))
            .or_default()
            .push(values);
    }

    pub fn contains(&self, function: &str, tag: &str) -> bool {
        self.entries.contains_key(&(function.to_string(), tag.to_string()))
    }

    pub fn get(&self, function: &str, tag: &str) -> EmitterResult<&[Vec<String>]> {
        self.try_get(function, tag).ok_or_else(|| {
            if function.is_empty() {
                EmitterError::MetadataNotFound(tag.to_string())
            } else {
                EmitterError::MetadataNotFound(format!("{tag} on function {function}"))
            }
        })
    }

    pub fn try_get(&self, function: &str, tag: &str) -> Option<&[Vec<String>]> {
        self.entries
            .get(&(function.to_string(), tag.to_string()))
            .map(|v| v.as_slice())
    }

    /// Functions carrying `tag`, in name order, with their first value list.
    pub fn functions_with_tag(&self, tag: &str) -> Vec<(String, Vec<String>)> {
        self.entries
            .iter()
            .filter(|((function, t), _)| !function.is_empty() && t == tag)
            .map(|((function, _), values)| {
                (function.clone(), values.first().cloned().unwrap_or_default())
            })
            .collect()
    }

    /// All entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &[Vec<String>])> {
        self.entries
            .iter()
            .map(|((f, t), v)| (f.as_str(), t.as_str(), v.as_slice()))
    }
}
