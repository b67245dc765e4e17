//! Helpers shared by the integration tests.

#![allow(dead_code)]

use inkwell::context::Context;
use inkwell::execution_engine::ExecutionEngine;
use inkwell::OptimizationLevel;
use modelc::{CompilerOptions, ModuleEmitter, TargetDevice};

/// A module for the host machine, so it can be run through the JIT.
pub fn host_module<'ctx>(context: &'ctx Context, name: &str) -> ModuleEmitter<'ctx> {
    ModuleEmitter::new(context, name, CompilerOptions::default()).unwrap()
}

/// A module for a named target device.
pub fn device_module<'ctx>(context: &'ctx Context, name: &str, device: &str) -> ModuleEmitter<'ctx> {
    let options = CompilerOptions {
        target_device: TargetDevice::resolve(device).unwrap(),
        ..CompilerOptions::default()
    };
    ModuleEmitter::new(context, name, options).unwrap()
}

/// Finish and verify `module`, then hand it to MCJIT. Nothing may be emitted afterwards.
pub fn jit<'ctx>(module: &mut ModuleEmitter<'ctx>) -> ExecutionEngine<'ctx> {
    module.finish().unwrap();
    module.verify().unwrap();
    module
        .module()
        .create_jit_execution_engine(OptimizationLevel::None)
        .unwrap()
}

pub fn host_is_x86_64() -> bool {
    cfg!(target_arch = "x86_64")
}
