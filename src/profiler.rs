// Emitted performance counters for compiled models. When profiling is enabled the module
// gets two header-visible structs, <module>_NodeInfo {nodeName, nodeType} and
// <module>_PerformanceCounters {count, totalTime}, one counters instance for the whole model
// and fixed-size arrays of infos and counters for nodes and for node types, sized by the
// node count of the graph being compiled. Nodes receive array slots lazily in the order the
// compiler first profiles them, and so do their runtime types. start/end pairs read the
// wall clock through <module>_GetTime, bump the entry count at start and accumulate
// elapsed milliseconds at end into both the node's and its type's counters. At finish the
// module gets accessor, print and reset routines for each counter family.

//! Model profiling support.

use crate::error::{EmitterError, EmitterResult};
use crate::function_emitter::FunctionEmitter;
use crate::module_emitter::ModuleEmitter;
use crate::types::{TypedOperator, TypedValue, VariableType};

const COUNT: u32 = 0;
const TOTAL_TIME: u32 = 1;
const NODE_NAME: u32 = 0;
const NODE_TYPE: u32 = 1;

/// A graph node as seen by the profiler.
pub trait ProfiledNode {
    /// Unique id of the node within its model.
    fn id(&self) -> String;
    /// Name of the node's runtime type, shared by all nodes of that type.
    fn runtime_type_name(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct ModelProfiler<'ctx> {
    capacity: u32,
    node_info_type: VariableType,
    counters_type: VariableType,
    model_counters: TypedValue<'ctx>,
    node_info: TypedValue<'ctx>,
    node_counters: TypedValue<'ctx>,
    type_info: TypedValue<'ctx>,
    type_counters: TypedValue<'ctx>,
    nodes: Vec<String>,
    node_types: Vec<String>,
}

/// Array slots and counters of one profiled node.
struct NodeSlots<'ctx> {
    node: u32,
    node_type: u32,
    node_info: TypedValue<'ctx>,
    node_counters: TypedValue<'ctx>,
    type_info: TypedValue<'ctx>,
    type_counters: TypedValue<'ctx>,
}

fn ordinal(names: &mut Vec<String>, name: String, capacity: u32, what: &str) -> EmitterResult<u32> {
    if let Some(index) = names.iter().position(|n| *n == name) {
        return Ok(index as u32);
    }
    if names.len() as u32 >= capacity {
        return Err(EmitterError::IndexOutOfRange(format!(
            "cannot profile {what} {name}: only {capacity} slots"
        )));
    }
    names.push(name);
    Ok(names.len() as u32 - 1)
}

impl<'ctx> ModuleEmitter<'ctx> {
    /// Set up profiling for a model with `node_count` nodes. Does nothing unless profiling
    /// is enabled in the compiler options. Returns whether profiling is active.
    pub fn enable_profiler(&mut self, node_count: u32) -> EmitterResult<bool> {
        if !self.options().profile {
            return Ok(false);
        }
        if self.profiler.is_some() {
            return Ok(true);
        }
        let prefix = self.name().to_string();
        let info_name = format!("{prefix}_NodeInfo");
        let counters_name = format!("{prefix}_PerformanceCounters");
        let c_string = VariableType::Char8.pointer_to();
        let node_info_type = self.get_or_create_struct(&info_name, &[("nodeName", c_string.clone()), ("nodeType", c_string)])?;
        let counters_type = self.get_or_create_struct(
            &counters_name,
            &[("count", VariableType::Int64), ("totalTime", VariableType::Double)],
        )?;
        self.include_type_in_header(&info_name)?;
        self.include_type_in_header(&counters_name)?;

        let profiler = ModelProfiler {
            capacity: node_count,
            model_counters: self.global(&counters_type, &format!("{prefix}_ModelPerformanceCounters"))?,
            node_info: self.global_array(&node_info_type, &format!("{prefix}_NodeInfoArray"), node_count)?,
            node_counters: self.global_array(&counters_type, &format!("{prefix}_NodePerformanceCountersArray"), node_count)?,
            type_info: self.global_array(&node_info_type, &format!("{prefix}_NodeTypeInfoArray"), node_count)?,
            type_counters: self.global_array(&counters_type, &format!("{prefix}_NodeTypePerformanceCountersArray"), node_count)?,
            node_info_type,
            counters_type,
            nodes: Vec::new(),
            node_types: Vec::new(),
        };
        self.profiler = Some(profiler);
        log::debug!("Profiling enabled for {} nodes", node_count);
        Ok(true)
    }

    pub fn profiler(&self) -> Option<&ModelProfiler<'ctx>> {
        self.profiler.as_ref()
    }
}

impl<'ctx> ModelProfiler<'ctx> {
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_node_types(&self) -> usize {
        self.node_types.len()
    }

    pub fn node_info_type(&self) -> &VariableType {
        &self.node_info_type
    }

    pub fn counters_type(&self) -> &VariableType {
        &self.counters_type
    }

    fn slots_for(function: &mut FunctionEmitter<'_, 'ctx>, node: &dyn ProfiledNode) -> EmitterResult<Option<NodeSlots<'ctx>>> {
        let Some(profiler) = function.module().profiler.as_mut() else {
            return Ok(None);
        };
        let capacity = profiler.capacity;
        let node_index = ordinal(&mut profiler.nodes, node.id(), capacity, "node")?;
        let type_index = ordinal(&mut profiler.node_types, node.runtime_type_name(), capacity, "node type")?;
        let arrays = profiler.clone();

        Ok(Some(NodeSlots {
            node: node_index,
            node_type: type_index,
            node_info: element_at(function, &arrays.node_info, node_index)?,
            node_counters: element_at(function, &arrays.node_counters, node_index)?,
            type_info: element_at(function, &arrays.type_info, type_index)?,
            type_counters: element_at(function, &arrays.type_counters, type_index)?,
        }))
    }

    fn model_counters(function: &mut FunctionEmitter<'_, 'ctx>) -> Option<TypedValue<'ctx>> {
        function.module().profiler.as_ref().map(|p| p.model_counters.clone())
    }

    fn start_counters(function: &FunctionEmitter<'_, 'ctx>, counters: &TypedValue<'ctx>) -> EmitterResult<()> {
        let count = function.struct_field_pointer(counters, COUNT)?;
        function.operation_and_update(&count, TypedOperator::Add, &function.literal(1i64))
    }

    fn end_counters(function: &FunctionEmitter<'_, 'ctx>, counters: &TypedValue<'ctx>, elapsed: &TypedValue<'ctx>) -> EmitterResult<()> {
        let total = function.struct_field_pointer(counters, TOTAL_TIME)?;
        function.operation_and_update(&total, TypedOperator::AddFloat, elapsed)
    }

    fn reset_counters(function: &FunctionEmitter<'_, 'ctx>, counters: &TypedValue<'ctx>) -> EmitterResult<()> {
        function.store(&function.struct_field_pointer(counters, COUNT)?, &function.literal(0i64))?;
        function.store(&function.struct_field_pointer(counters, TOTAL_TIME)?, &function.literal(0.0f64))
    }

    fn elapsed_since(function: &mut FunctionEmitter<'_, 'ctx>, start: &TypedValue<'ctx>) -> EmitterResult<TypedValue<'ctx>> {
        let now = function.current_time()?;
        function.binary(TypedOperator::SubtractFloat, &now, start)
    }

    /// Record the node's id and type name in its info slots.
    pub fn init_node(function: &mut FunctionEmitter<'_, 'ctx>, node: &dyn ProfiledNode) -> EmitterResult<()> {
        let Some(slots) = Self::slots_for(function, node)? else {
            return Ok(());
        };
        let name = function.module().string_literal(&node.id());
        let type_name = function.module().string_literal(&node.runtime_type_name());
        function.fill_struct(&slots.node_info, &[name, type_name.clone()])?;
        function.fill_struct(&slots.type_info, &[type_name.clone(), type_name])?;
        log::trace!("profiling node {} as slot {} (type slot {})", node.id(), slots.node, slots.node_type);
        Ok(())
    }

    /// Count an entry into `node` and return its start time, or `None` when profiling is off.
    pub fn start_node(function: &mut FunctionEmitter<'_, 'ctx>, node: &dyn ProfiledNode) -> EmitterResult<Option<TypedValue<'ctx>>> {
        let Some(slots) = Self::slots_for(function, node)? else {
            return Ok(None);
        };
        let start = function.current_time()?;
        Self::start_counters(function, &slots.node_counters)?;
        Self::start_counters(function, &slots.type_counters)?;
        Ok(Some(start))
    }

    /// Add the time since `start` to the node's and its type's counters.
    pub fn end_node(function: &mut FunctionEmitter<'_, 'ctx>, node: &dyn ProfiledNode, start: Option<&TypedValue<'ctx>>) -> EmitterResult<()> {
        let (Some(start), Some(slots)) = (start, Self::slots_for(function, node)?) else {
            return Ok(());
        };
        let elapsed = Self::elapsed_since(function, start)?;
        Self::end_counters(function, &slots.node_counters, &elapsed)?;
        Self::end_counters(function, &slots.type_counters, &elapsed)
    }

    pub fn start_model(function: &mut FunctionEmitter<'_, 'ctx>) -> EmitterResult<Option<TypedValue<'ctx>>> {
        let Some(counters) = Self::model_counters(function) else {
            return Ok(None);
        };
        let start = function.current_time()?;
        Self::start_counters(function, &counters)?;
        Ok(Some(start))
    }

    pub fn end_model(function: &mut FunctionEmitter<'_, 'ctx>, start: Option<&TypedValue<'ctx>>) -> EmitterResult<()> {
        let (Some(start), Some(counters)) = (start, Self::model_counters(function)) else {
            return Ok(());
        };
        let elapsed = Self::elapsed_since(function, start)?;
        Self::end_counters(function, &counters, &elapsed)
    }

    /// Emit the accessor, print and reset routines. Called from `ModuleEmitter::finish`
    /// whenever the set of profiled nodes changed since the last emission.
    pub(crate) fn emit_model_profiler_functions(module: &mut ModuleEmitter<'ctx>) -> EmitterResult<()> {
        let Some(profiler) = module.profiler.clone() else {
            return Ok(());
        };
        let prefix = module.name().to_string();
        let counters_ptr = profiler.counters_type.pointer_to();
        let info_ptr = profiler.node_info_type.pointer_to();

        // Model
        let mut f = module.begin_generated_function(&format!("{prefix}_GetModelPerformanceCounters"), counters_ptr.clone(), &[])?;
        f.include_in_header()?;
        f.end_with(&profiler.model_counters)?;

        let mut f = module.begin_generated_function(&format!("{prefix}_PrintModelProfilingInfo"), VariableType::Void, &[])?;
        let (time, count) = load_counters(&f, &profiler.model_counters)?;
        f.printf("Total time: %f ms\tcount: %d\n", &[time, count])?;
        f.include_in_header()?;
        f.end()?;

        let mut f = module.begin_generated_function(&format!("{prefix}_ResetModelProfilingInfo"), VariableType::Void, &[])?;
        Self::reset_counters(&f, &profiler.model_counters)?;
        f.include_in_header()?;
        f.end()?;

        // Nodes
        let nodes = profiler.nodes.len() as i32;
        emit_count_function(module, &format!("{prefix}_GetNumNodes"), nodes)?;
        emit_lookup_function(module, &format!("{prefix}_GetNodeInfo"), &profiler.node_info, &info_ptr)?;
        emit_lookup_function(module, &format!("{prefix}_GetNodePerformanceCounters"), &profiler.node_counters, &counters_ptr)?;
        emit_print_function(
            module,
            &format!("{prefix}_PrintNodeProfilingInfo"),
            &profiler.node_info,
            &profiler.node_counters,
            nodes,
            "Node[%s]:\ttype: %s\ttime: %f ms\tcount: %d\n",
            true,
        )?;
        emit_reset_function(module, &format!("{prefix}_ResetNodeProfilingInfo"), &profiler.node_counters, nodes)?;

        // Node types
        let types = profiler.node_types.len() as i32;
        emit_count_function(module, &format!("{prefix}_GetNumNodeTypes"), types)?;
        emit_lookup_function(module, &format!("{prefix}_GetNodeTypeInfo"), &profiler.type_info, &info_ptr)?;
        emit_lookup_function(module, &format!("{prefix}_GetNodeTypePerformanceCounters"), &profiler.type_counters, &counters_ptr)?;
        emit_print_function(
            module,
            &format!("{prefix}_PrintNodeTypeProfilingInfo"),
            &profiler.type_info,
            &profiler.type_counters,
            types,
            "Node type: %s\ttime: %f ms\tcount: %d\n",
            false,
        )?;
        emit_reset_function(module, &format!("{prefix}_ResetNodeTypeProfilingInfo"), &profiler.type_counters, types)?;
        log::debug!("Emitted profiler routines for {} nodes and {} types", nodes, types);
        Ok(())
    }
}

fn element_at<'ctx>(f: &FunctionEmitter<'_, 'ctx>, array: &TypedValue<'ctx>, index: u32) -> EmitterResult<TypedValue<'ctx>> {
    f.pointer_offset(array, &f.literal(index as i32))
}

/// Loads (totalTime, count as int32) for printing.
fn load_counters<'ctx>(f: &FunctionEmitter<'_, 'ctx>, counters: &TypedValue<'ctx>) -> EmitterResult<(TypedValue<'ctx>, TypedValue<'ctx>)> {
    let time = f.load(&f.struct_field_pointer(counters, TOTAL_TIME)?)?;
    let count = f.load(&f.struct_field_pointer(counters, COUNT)?)?;
    Ok((time, f.cast(&count, &VariableType::Int32)?))
}

fn emit_count_function(module: &mut ModuleEmitter<'_>, name: &str, count: i32) -> EmitterResult<()> {
    let mut f = module.begin_generated_function(name, VariableType::Int32, &[])?;
    let value = f.literal(count);
    f.include_in_header()?;
    f.end_with(&value)?;
    Ok(())
}

fn emit_lookup_function<'ctx>(module: &mut ModuleEmitter<'ctx>, name: &str, array: &TypedValue<'ctx>, returns: &VariableType) -> EmitterResult<()> {
    let mut f = module.begin_generated_function(name, returns.clone(), &[("index", VariableType::Int32)])?;
    let index = f.argument(0)?;
    let element = f.pointer_offset(array, &index)?;
    f.include_in_header()?;
    f.end_with(&element)?;
    Ok(())
}

fn emit_print_function<'ctx>(
    module: &mut ModuleEmitter<'ctx>,
    name: &str,
    infos: &TypedValue<'ctx>,
    counters: &TypedValue<'ctx>,
    count: i32,
    format: &str,
    with_node_name: bool,
) -> EmitterResult<()> {
    let mut f = module.begin_generated_function(name, VariableType::Void, &[])?;
    let n = f.literal(count);
    f.for_count(&n, |f, i| {
        let info = f.pointer_offset(infos, &i)?;
        let entry = f.pointer_offset(counters, &i)?;
        let node_name = f.load(&f.struct_field_pointer(&info, NODE_NAME)?)?;
        let node_type = f.load(&f.struct_field_pointer(&info, NODE_TYPE)?)?;
        let (time, count) = load_counters(f, &entry)?;
        let mut args = Vec::with_capacity(4);
        if with_node_name {
            args.push(node_name);
        }
        args.extend([node_type, time, count]);
        f.printf(format, &args)
    })?;
    f.include_in_header()?;
    f.end()?;
    Ok(())
}

fn emit_reset_function<'ctx>(module: &mut ModuleEmitter<'ctx>, name: &str, counters: &TypedValue<'ctx>, count: i32) -> EmitterResult<()> {
    let mut f = module.begin_generated_function(name, VariableType::Void, &[])?;
    let n = f.literal(count);
    f.for_count(&n, |f, i| {
        let entry = f.pointer_offset(counters, &i)?;
        ModelProfiler::reset_counters(f, &entry)
    })?;
    f.include_in_header()?;
    f.end()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinals_are_assigned_in_insertion_order() {
        let mut names = Vec::new();
        assert_eq!(ordinal(&mut names, "b".into(), 2, "node").unwrap(), 0);
        assert_eq!(ordinal(&mut names, "a".into(), 2, "node").unwrap(), 1);
        assert_eq!(ordinal(&mut names, "b".into(), 2, "node").unwrap(), 0);
        assert!(matches!(
            ordinal(&mut names, "c".into(), 2, "node"),
            Err(EmitterError::IndexOutOfRange(_))
        ));
    }
}
