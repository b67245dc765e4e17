//! Test profiling counters by running an instrumented model.

mod common;

use std::ffi::{c_char, CStr};

use common::jit;
use inkwell::context::Context;
use modelc::{
    CompilerOptions, EmitterError, ModelProfiler, ModuleEmitter, ModuleOutputFormat, ProfiledNode, VariableType,
};

#[repr(C)]
struct PerformanceCounters {
    count: i64,
    total_time: f64,
}

#[repr(C)]
struct NodeInfo {
    node_name: *const c_char,
    node_type: *const c_char,
}

struct Node {
    id: &'static str,
    type_name: &'static str,
}

impl ProfiledNode for Node {
    fn id(&self) -> String {
        self.id.to_string()
    }

    fn runtime_type_name(&self) -> String {
        self.type_name.to_string()
    }
}

const NODES: [Node; 2] = [
    Node { id: "input_0", type_name: "InputNode<float>" },
    Node { id: "input_1", type_name: "InputNode<float>" },
];

fn profiled_module<'ctx>(context: &'ctx Context, name: &str) -> ModuleEmitter<'ctx> {
    let options = CompilerOptions { profile: true, ..CompilerOptions::default() };
    ModuleEmitter::new(context, name, options).unwrap()
}

fn emit_model(module: &mut ModuleEmitter<'_>) {
    assert!(module.enable_profiler(NODES.len() as u32).unwrap());
    let mut f = module.begin_function("prof_Predict", VariableType::Void, &[]).unwrap();
    let model_start = ModelProfiler::start_model(&mut f).unwrap();
    for node in &NODES {
        ModelProfiler::init_node(&mut f, node).unwrap();
        let start = ModelProfiler::start_node(&mut f, node).unwrap();
        assert!(start.is_some());
        ModelProfiler::end_node(&mut f, node, start.as_ref()).unwrap();
    }
    ModelProfiler::end_model(&mut f, model_start.as_ref()).unwrap();
    f.end().unwrap();
}

#[test]
fn test_profiler_counts() {
    let context = Context::create();
    let mut module = profiled_module(&context, "prof");
    emit_model(&mut module);
    let profiler = module.profiler().unwrap();
    assert_eq!(profiler.num_nodes(), 2);
    assert_eq!(profiler.num_node_types(), 1);

    let engine = jit(&mut module);
    unsafe {
        let predict = engine.get_function::<unsafe extern "C" fn()>("prof_Predict").unwrap();
        for _ in 0..3 {
            predict.call();
        }

        let num_nodes = engine.get_function::<unsafe extern "C" fn() -> i32>("prof_GetNumNodes").unwrap();
        let num_types = engine.get_function::<unsafe extern "C" fn() -> i32>("prof_GetNumNodeTypes").unwrap();
        assert_eq!(num_nodes.call(), 2);
        assert_eq!(num_types.call(), 1);

        let model = engine
            .get_function::<unsafe extern "C" fn() -> *const PerformanceCounters>("prof_GetModelPerformanceCounters")
            .unwrap();
        assert_eq!((*model.call()).count, 3);
        assert!((*model.call()).total_time >= 0.0);

        let node_counters = engine
            .get_function::<unsafe extern "C" fn(i32) -> *const PerformanceCounters>("prof_GetNodePerformanceCounters")
            .unwrap();
        assert_eq!((*node_counters.call(0)).count, 3);
        assert_eq!((*node_counters.call(1)).count, 3);

        let type_counters = engine
            .get_function::<unsafe extern "C" fn(i32) -> *const PerformanceCounters>(
                "prof_GetNodeTypePerformanceCounters",
            )
            .unwrap();
        assert_eq!((*type_counters.call(0)).count, 6);

        let node_info = engine
            .get_function::<unsafe extern "C" fn(i32) -> *const NodeInfo>("prof_GetNodeInfo")
            .unwrap();
        let second = &*node_info.call(1);
        assert_eq!(CStr::from_ptr(second.node_name).to_str().unwrap(), "input_1");
        assert_eq!(CStr::from_ptr(second.node_type).to_str().unwrap(), "InputNode<float>");

        let reset = engine.get_function::<unsafe extern "C" fn()>("prof_ResetNodeProfilingInfo").unwrap();
        reset.call();
        assert_eq!((*node_counters.call(0)).count, 0);
        assert_eq!((*node_counters.call(0)).total_time, 0.0);
        assert_eq!((*type_counters.call(0)).count, 6);
    }
}

#[test]
fn test_profiler_header_declarations() {
    let context = Context::create();
    let mut module = profiled_module(&context, "prof");
    emit_model(&mut module);
    let options = module.machine_code_options();
    let header = String::from_utf8(module.render(ModuleOutputFormat::CHeader, &options).unwrap()).unwrap();
    assert!(header.contains("typedef struct prof_PerformanceCounters\n{\n    int64_t count;\n    double totalTime;\n}"));
    assert!(header.contains("typedef struct prof_NodeInfo\n{\n    char* nodeName;\n    char* nodeType;\n}"));
    assert!(header.contains("prof_PerformanceCounters* prof_GetNodePerformanceCounters(int32_t index);"));
    assert!(header.contains("void prof_PrintNodeProfilingInfo(void);"));
    assert!(header.contains("void prof_ResetModelProfilingInfo(void);"));
}

#[test]
fn test_profiling_disabled() {
    let context = Context::create();
    let mut module = ModuleEmitter::new(&context, "off", CompilerOptions::default()).unwrap();
    assert!(!module.enable_profiler(4).unwrap());
    let mut f = module.begin_function("off_Predict", VariableType::Void, &[]).unwrap();
    assert!(ModelProfiler::start_node(&mut f, &NODES[0]).unwrap().is_none());
    assert!(ModelProfiler::start_model(&mut f).unwrap().is_none());
    f.end().unwrap();
    module.finish().unwrap();
    assert!(!module.has_function("off_GetNumNodes"));
}

#[test]
fn test_too_many_nodes() {
    let context = Context::create();
    let mut module = profiled_module(&context, "small");
    module.enable_profiler(1).unwrap();
    let mut f = module.begin_function("small_Predict", VariableType::Void, &[]).unwrap();
    ModelProfiler::init_node(&mut f, &NODES[0]).unwrap();
    let result = ModelProfiler::init_node(&mut f, &NODES[1]);
    assert!(matches!(result, Err(EmitterError::IndexOutOfRange(_))));
}

#[test]
fn test_profiler_routines_follow_later_nodes() {
    let context = Context::create();
    let mut module = profiled_module(&context, "late");
    module.enable_profiler(NODES.len() as u32).unwrap();
    let mut f = module.begin_function("late_First", VariableType::Void, &[]).unwrap();
    ModelProfiler::init_node(&mut f, &NODES[0]).unwrap();
    f.end().unwrap();
    let options = module.machine_code_options();
    module.render(ModuleOutputFormat::Ir, &options).unwrap();

    let mut f = module.begin_function("late_Second", VariableType::Void, &[]).unwrap();
    ModelProfiler::init_node(&mut f, &NODES[1]).unwrap();
    f.end().unwrap();
    let header = String::from_utf8(module.render(ModuleOutputFormat::CHeader, &options).unwrap()).unwrap();
    assert_eq!(header.matches("int32_t late_GetNumNodes(void);").count(), 1);

    let engine = jit(&mut module);
    unsafe {
        let num_nodes = engine.get_function::<unsafe extern "C" fn() -> i32>("late_GetNumNodes").unwrap();
        assert_eq!(num_nodes.call(), 2);
    }
}
