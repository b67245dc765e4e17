// This module emits a pthreads-based worker pool into the generated program. The pool is
// per-module state: the first add_tasks call on a module emits the queue and task-array
// globals, a fixed array of max_threads thread handles, the worker entry point, and the
// initThreadPool/shutDownThreadPool routines registered as global constructor and
// destructor, each guarded by an emitted threadPoolInitialized flag so calling them twice
// is harmless. Later calls only emit the dispatch sequence inline in the calling function.
//
// Emitted protocol, all counts and flags touched only under the queue mutex:
//   start:   lock, install task wrapper/return slots/argument structs, set the unscheduled
//            and unfinished counts to N, broadcast work-available, unlock
//   pop:     lock, wait on work-available while (unscheduled == 0 && !shutdown), decrement
//            unscheduled if non-zero, unlock; a negative index yields the null task
//   worker:  loop popping tasks; a null task ends the thread, otherwise run it, decrement
//            unfinished under the lock and broadcast work-finished when it reaches zero
//   wait:    lock, wait on work-finished while unfinished != 0, unlock
// Task functions are called through a threadPoolTask_<fn>(void*) -> void* wrapper that
// unpacks an argument struct, so every task has the same C signature.

//! Emitted thread pool.

use inkwell::values::{BasicMetadataValueEnum, FunctionValue};

use crate::error::{EmitterError, EmitterResult};
use crate::function_emitter::FunctionEmitter;
use crate::module_emitter::{ModuleEmitter, DEFAULT_STRUCTOR_PRIORITY};
use crate::runtime::{pthread_sync_type, pthread_type, PosixFunction};
use crate::types::{TypedComparison, TypedOperator, TypedValue, UnaryOperation, VariableType};

const QUEUE_STRUCT: &str = "ThreadPoolQueue";
const TASK_ARRAY_STRUCT: &str = "ThreadPoolTaskArray";

// ThreadPoolQueue fields
const QUEUE_MUTEX: u32 = 0;
const WORK_AVAILABLE: u32 = 1;
const WORK_FINISHED: u32 = 2;
const UNSCHEDULED: u32 = 3;
const UNFINISHED: u32 = 4;
const SHUTDOWN: u32 = 5;

// ThreadPoolTaskArray fields
const TASK_FUNCTION: u32 = 0;
const RETURN_VALUES: u32 = 1;
const ARG_STORAGE: u32 = 2;
const ARG_STRUCT_SIZE: u32 = 3;

/// Globals shared by every pool routine.
#[derive(Debug, Clone)]
struct PoolGlobals<'ctx> {
    queue: TypedValue<'ctx>,
    tasks: TypedValue<'ctx>,
    threads: TypedValue<'ctx>,
    initialized: TypedValue<'ctx>,
    max_threads: u32,
}

/// Per-module pool state.
#[derive(Debug, Default)]
pub(crate) struct ThreadPoolState<'ctx> {
    initialized: bool,
    globals: Option<PoolGlobals<'ctx>>,
}

impl ThreadPoolState<'_> {
    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// A dispatched batch of tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskArray {
    count: u32,
}

/// The task a worker popped. All three are null for the shutdown task.
struct PoppedTask<'ctx> {
    function: TypedValue<'ctx>,
    args: TypedValue<'ctx>,
    return_slot: TypedValue<'ctx>,
}

fn void_ptr() -> VariableType {
    VariableType::opaque_pointer()
}

fn pool_globals<'ctx>(module: &ModuleEmitter<'ctx>) -> EmitterResult<PoolGlobals<'ctx>> {
    module
        .thread_pool
        .globals
        .clone()
        .ok_or_else(|| EmitterError::unexpected("thread pool used before initialization"))
}

impl<'m, 'ctx> FunctionEmitter<'m, 'ctx> {
    fn queue_field(&self, pool: &PoolGlobals<'ctx>, field: u32) -> EmitterResult<TypedValue<'ctx>> {
        self.struct_field_pointer(&pool.queue, field)
    }

    fn task_field(&self, pool: &PoolGlobals<'ctx>, field: u32) -> EmitterResult<TypedValue<'ctx>> {
        self.struct_field_pointer(&pool.tasks, field)
    }

    fn lock_queue(&mut self, pool: &PoolGlobals<'ctx>) -> EmitterResult<()> {
        let mutex = self.queue_field(pool, QUEUE_MUTEX)?;
        self.posix_call(PosixFunction::MutexLock, &[mutex])?;
        Ok(())
    }

    fn unlock_queue(&mut self, pool: &PoolGlobals<'ctx>) -> EmitterResult<()> {
        let mutex = self.queue_field(pool, QUEUE_MUTEX)?;
        self.posix_call(PosixFunction::MutexUnlock, &[mutex])?;
        Ok(())
    }

    fn broadcast(&mut self, pool: &PoolGlobals<'ctx>, condition: u32) -> EmitterResult<()> {
        let cond = self.queue_field(pool, condition)?;
        self.posix_call(PosixFunction::CondBroadcast, &[cond])?;
        Ok(())
    }

    fn wait_on(&mut self, pool: &PoolGlobals<'ctx>, condition: u32) -> EmitterResult<()> {
        let cond = self.queue_field(pool, condition)?;
        let mutex = self.queue_field(pool, QUEUE_MUTEX)?;
        self.posix_call(PosixFunction::CondWait, &[cond, mutex])?;
        Ok(())
    }

    /// Decrement `*count` unless it is zero. Returns `*count - 1` either way.
    fn decrement_count(&mut self, count: &TypedValue<'ctx>) -> EmitterResult<TypedValue<'ctx>> {
        let old = self.load(count)?;
        let one = self.literal(1i32);
        let new = self.binary(TypedOperator::Subtract, &old, &one)?;
        let nonzero = self.compare(TypedComparison::NotEquals, &old, &self.literal(0i32))?;
        self.if_then(&nonzero, |f| f.store(count, &new))?.end()?;
        Ok(new)
    }

    fn queue_is_idle(&self, pool: &PoolGlobals<'ctx>) -> EmitterResult<TypedValue<'ctx>> {
        let unscheduled = self.load(&self.queue_field(pool, UNSCHEDULED)?)?;
        let empty = self.compare(TypedComparison::Equals, &unscheduled, &self.literal(0i32))?;
        let shutdown = self.load(&self.queue_field(pool, SHUTDOWN)?)?;
        let running = self.unary(UnaryOperation::LogicalNot, &shutdown)?;
        self.binary(TypedOperator::LogicalAnd, &empty, &running)
    }

    fn unfinished_tasks_remain(&self, pool: &PoolGlobals<'ctx>) -> EmitterResult<TypedValue<'ctx>> {
        let unfinished = self.load(&self.queue_field(pool, UNFINISHED)?)?;
        self.compare(TypedComparison::NotEquals, &unfinished, &self.literal(0i32))
    }

    fn pop_next_task(&mut self, pool: &PoolGlobals<'ctx>) -> EmitterResult<PoppedTask<'ctx>> {
        let waiting = self.variable(&VariableType::Boolean, "isEmpty")?;
        self.lock_queue(pool)?;
        self.store(&waiting, &self.queue_is_idle(pool)?)?;
        self.while_loop(&waiting, |f| {
            f.wait_on(pool, WORK_AVAILABLE)?;
            f.store(&waiting, &f.queue_is_idle(pool)?)
        })?;
        let unscheduled = self.queue_field(pool, UNSCHEDULED)?;
        let index = self.decrement_count(&unscheduled)?;
        self.unlock_queue(pool)?;
        self.task_at(pool, &index)
    }

    fn task_at(&mut self, pool: &PoolGlobals<'ctx>, index: &TypedValue<'ctx>) -> EmitterResult<PoppedTask<'ctx>> {
        let slot_ty = void_ptr().pointer_to();
        let function_var = self.variable(&void_ptr(), "taskFunction")?;
        let args_var = self.variable(&void_ptr(), "taskArgs")?;
        let return_var = self.variable(&slot_ty, "taskReturnValue")?;

        let valid = self.compare(TypedComparison::GreaterThanOrEquals, index, &self.literal(0i32))?;
        self.if_then(&valid, |f| {
            let function = f.load(&f.task_field(pool, TASK_FUNCTION)?)?;
            let size = f.load(&f.task_field(pool, ARG_STRUCT_SIZE)?)?;
            let storage = f.load(&f.task_field(pool, ARG_STORAGE)?)?;
            let returns = f.load(&f.task_field(pool, RETURN_VALUES)?)?;
            let offset = f.binary(TypedOperator::Multiply, index, &size)?;
            let args = f.pointer_offset(&storage, &offset)?;
            let slot = f.pointer_offset(&returns, index)?;
            f.store(&function_var, &function)?;
            f.store(&args_var, &args)?;
            f.store(&return_var, &slot)
        })?
        .otherwise(|f| {
            f.store(&function_var, &f.emitter().null_pointer(&void_ptr()))?;
            f.store(&args_var, &f.emitter().null_pointer(&void_ptr()))?;
            f.store(&return_var, &f.emitter().null_pointer(&slot_ty))
        })?;

        Ok(PoppedTask {
            function: self.load(&function_var)?,
            args: self.load(&args_var)?,
            return_slot: self.load(&return_var)?,
        })
    }

    fn run_task(&mut self, task: &PoppedTask<'ctx>) -> EmitterResult<()> {
        let emitter = self.emitter();
        let wrapper_ty = emitter.fn_type(&void_ptr(), &[void_ptr()], false)?;
        let args: [BasicMetadataValueEnum<'ctx>; 1] = [task.args.value.into()];
        let call = emitter
            .builder()
            .build_indirect_call(wrapper_ty, task.function.into_pointer()?, &args, "taskResult")?;
        let result = call
            .try_as_basic_value()
            .left()
            .ok_or_else(|| EmitterError::unexpected("task wrapper returned void"))?;
        self.store(&task.return_slot, &TypedValue::new(result, void_ptr()))
    }

    /// Dispatch one task per argument list to the module's thread pool. Each task calls
    /// `task_function` with its arguments. Only one batch may be in flight at a time.
    pub fn add_tasks(&mut self, task_function: &str, args: Vec<Vec<TypedValue<'ctx>>>) -> EmitterResult<TaskArray> {
        if !self.module().thread_pool.is_initialized() {
            ThreadPool::initialize(self.module())?;
        }
        let pool = pool_globals(self.module())?;
        let count = u32::try_from(args.len())
            .map_err(|_| EmitterError::IndexOutOfRange(format!("{} tasks", args.len())))?;

        let declaration = self.module().declaration(task_function)?.clone();
        for task_args in &args {
            if task_args.len() != declaration.parameters.len() {
                return Err(EmitterError::BadFunctionArguments(format!(
                    "task {} expects {} arguments, got {}",
                    task_function,
                    declaration.parameters.len(),
                    task_args.len()
                )));
            }
        }
        let wrapper = if count > 0 { Some(ThreadPool::task_wrapper(self.module(), task_function)?) } else { None };

        self.lock_queue(&pool)?;
        let function_field = self.task_field(&pool, TASK_FUNCTION)?;
        let returns_field = self.task_field(&pool, RETURN_VALUES)?;
        let storage_field = self.task_field(&pool, ARG_STORAGE)?;
        let size_field = self.task_field(&pool, ARG_STRUCT_SIZE)?;
        match wrapper {
            None => {
                self.store(&function_field, &self.emitter().null_pointer(&void_ptr()))?;
                self.store(&returns_field, &self.emitter().null_pointer(&void_ptr().pointer_to()))?;
                self.store(&storage_field, &self.emitter().null_pointer(&void_ptr()))?;
                self.store(&size_field, &self.literal(0i32))?;
            }
            Some((wrapper, arg_struct)) => {
                let wrapper_ptr = TypedValue::new(wrapper.as_global_value().as_pointer_value().into(), void_ptr());
                let returns = self.variable_array(&void_ptr(), count, "taskReturnValues")?;
                let storage = self.variable_array(&arg_struct, count, "taskArgStorage")?;
                for (index, task_args) in args.iter().enumerate() {
                    let task_data = self.pointer_offset(&storage, &self.literal(index as i32))?;
                    self.fill_struct(&task_data, task_args)?;
                }
                let size = self.module().size_of(&arg_struct)?;
                self.store(&function_field, &wrapper_ptr)?;
                self.store(&returns_field, &returns)?;
                self.store(&storage_field, &storage)?;
                self.store(&size_field, &self.literal(size as i32))?;
            }
        }
        let total = self.literal(count as i32);
        self.store(&self.queue_field(&pool, UNSCHEDULED)?, &total)?;
        self.store(&self.queue_field(&pool, UNFINISHED)?, &total)?;
        self.broadcast(&pool, WORK_AVAILABLE)?;
        self.unlock_queue(&pool)?;
        log::debug!("Dispatched {} tasks of {} ({} threads)", count, task_function, pool.max_threads);
        Ok(TaskArray { count })
    }
}

impl TaskArray {
    pub fn len(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Block until every task of the batch has finished.
    pub fn wait_all(&self, function: &mut FunctionEmitter<'_, '_>) -> EmitterResult<()> {
        let pool = pool_globals(function.module())?;
        let waiting = function.variable(&VariableType::Boolean, "isNotDone")?;
        function.lock_queue(&pool)?;
        function.store(&waiting, &function.unfinished_tasks_remain(&pool)?)?;
        function.while_loop(&waiting, |f| {
            f.wait_on(&pool, WORK_FINISHED)?;
            f.store(&waiting, &f.unfinished_tasks_remain(&pool)?)
        })?;
        function.unlock_queue(&pool)
    }

    /// The `void*` returned by task `index`. Null unless the task function returns a pointer.
    pub fn return_value<'ctx>(&self, function: &mut FunctionEmitter<'_, 'ctx>, index: u32) -> EmitterResult<TypedValue<'ctx>> {
        if index >= self.count {
            return Err(EmitterError::IndexOutOfRange(format!("task {index} of {}", self.count)));
        }
        let pool = pool_globals(function.module())?;
        let returns = function.load(&function.task_field(&pool, RETURN_VALUES)?)?;
        function.value_at(&returns, &function.literal(index as i32))
    }
}

/// Emission of the pool's module-level routines.
pub struct ThreadPool;

impl ThreadPool {
    fn initialize(module: &mut ModuleEmitter<'_>) -> EmitterResult<()> {
        let max_threads = module.options().max_threads;
        if max_threads == 0 {
            return Err(EmitterError::BadFunctionArguments("thread pool needs max_threads > 0".to_string()));
        }
        let device = module.options().target_device.clone();
        let sync = pthread_sync_type();
        let queue_ty = module.get_or_create_struct(
            QUEUE_STRUCT,
            &[
                ("mutex", sync.clone()),
                ("workAvailable", sync.clone()),
                ("workFinished", sync),
                ("unscheduledCount", VariableType::Int32),
                ("unfinishedCount", VariableType::Int32),
                ("shutdown", VariableType::Boolean),
            ],
        )?;
        let tasks_ty = module.get_or_create_struct(
            TASK_ARRAY_STRUCT,
            &[
                ("function", void_ptr()),
                ("returnValues", void_ptr().pointer_to()),
                ("argStorage", void_ptr()),
                ("argStructSize", VariableType::Int32),
            ],
        )?;

        let pool = PoolGlobals {
            queue: module.global(&queue_ty, "threadPoolQueue")?,
            tasks: module.global(&tasks_ty, "threadPoolTasks")?,
            threads: module.global_array(&pthread_type(&device), "threadPoolThreads", max_threads)?,
            initialized: module.global(&VariableType::Boolean, "threadPoolInitialized")?,
            max_threads,
        };
        module.thread_pool.globals = Some(pool.clone());
        module.thread_pool.initialized = true;

        let worker = Self::emit_worker(module, &pool)?;
        let init = Self::emit_init(module, &pool, worker)?;
        let shutdown = Self::emit_shutdown(module, &pool)?;
        module.add_initialization_function(init, DEFAULT_STRUCTOR_PRIORITY);
        module.add_finalization_function(shutdown, DEFAULT_STRUCTOR_PRIORITY);
        log::debug!("Initialized thread pool with {} threads", max_threads);
        Ok(())
    }

    fn emit_worker<'ctx>(module: &mut ModuleEmitter<'ctx>, pool: &PoolGlobals<'ctx>) -> EmitterResult<FunctionValue<'ctx>> {
        let mut f = module.begin_function("threadPoolWorker", void_ptr(), &[("queue", void_ptr())])?;
        let not_done = f.variable_with_value(&f.literal(true), "notDone")?;
        f.while_loop(&not_done, |f| {
            let task = f.pop_next_task(pool)?;
            let is_null = f.compare(TypedComparison::Equals, &task.function, &f.emitter().null_pointer(&void_ptr()))?;
            f.if_then(&is_null, |f| f.store(&not_done, &f.literal(false)))?
                .otherwise(|f| {
                    f.run_task(&task)?;
                    f.lock_queue(pool)?;
                    let unfinished = f.queue_field(pool, UNFINISHED)?;
                    let remaining = f.decrement_count(&unfinished)?;
                    f.unlock_queue(pool)?;
                    let all_done = f.compare(TypedComparison::Equals, &remaining, &f.literal(0i32))?;
                    f.if_then(&all_done, |f| f.broadcast(pool, WORK_FINISHED))?.end()
                })
        })?;
        let null = f.emitter().null_pointer(&void_ptr());
        f.end_with(&null)
    }

    fn emit_init<'ctx>(module: &mut ModuleEmitter<'ctx>, pool: &PoolGlobals<'ctx>, worker: FunctionValue<'ctx>) -> EmitterResult<FunctionValue<'ctx>> {
        let mut f = module.begin_function("initThreadPool", VariableType::Void, &[])?;
        let already = f.load(&pool.initialized)?;
        let needed = f.unary(UnaryOperation::LogicalNot, &already)?;
        f.if_then(&needed, |f| {
            f.store(&pool.initialized, &f.literal(true))?;
            let null = f.emitter().null_pointer(&void_ptr());
            let mutex = f.queue_field(pool, QUEUE_MUTEX)?;
            f.posix_call(PosixFunction::MutexInit, &[mutex, null.clone()])?;
            for condition in [WORK_AVAILABLE, WORK_FINISHED] {
                let cond = f.queue_field(pool, condition)?;
                f.posix_call(PosixFunction::CondInit, &[cond, null.clone()])?;
            }
            f.store(&f.queue_field(pool, UNSCHEDULED)?, &f.literal(0i32))?;
            f.store(&f.queue_field(pool, UNFINISHED)?, &f.literal(0i32))?;
            f.store(&f.queue_field(pool, SHUTDOWN)?, &f.literal(false))?;

            let worker_ptr = TypedValue::new(worker.as_global_value().as_pointer_value().into(), void_ptr());
            let threads = f.literal(pool.max_threads as i32);
            f.for_count(&threads, |f, i| {
                let thread = f.pointer_offset(&pool.threads, &i)?;
                let args = [thread, null.clone(), worker_ptr.clone(), pool.queue.clone()];
                f.posix_call(PosixFunction::PthreadCreate, &args)?;
                Ok(())
            })
        })?
        .end()?;
        f.end()
    }

    fn emit_shutdown<'ctx>(module: &mut ModuleEmitter<'ctx>, pool: &PoolGlobals<'ctx>) -> EmitterResult<FunctionValue<'ctx>> {
        let mut f = module.begin_function("shutDownThreadPool", VariableType::Void, &[])?;
        let running = f.load(&pool.initialized)?;
        f.if_then(&running, |f| {
            f.lock_queue(pool)?;
            f.store(&f.queue_field(pool, SHUTDOWN)?, &f.literal(true))?;
            f.broadcast(pool, WORK_AVAILABLE)?;
            f.unlock_queue(pool)?;

            let threads = f.literal(pool.max_threads as i32);
            f.for_count(&threads, |f, i| {
                let thread = f.value_at(&pool.threads, &i)?;
                let null = f.emitter().null_pointer(&void_ptr());
                f.posix_call(PosixFunction::PthreadJoin, &[thread, null])?;
                Ok(())
            })?;
            f.store(&pool.initialized, &f.literal(false))
        })?
        .end()?;
        f.end()
    }

    /// `threadPoolTask_<fn>(void* args) -> void*` and the argument struct type it unpacks.
    fn task_wrapper<'ctx>(module: &mut ModuleEmitter<'ctx>, task_function: &str) -> EmitterResult<(FunctionValue<'ctx>, VariableType)> {
        let declaration = module.declaration(task_function)?.clone();
        let fields: Vec<(String, VariableType)> = declaration
            .parameters
            .iter()
            .map(|p| (p.name.clone(), p.ty.clone()))
            .collect();
        let field_refs: Vec<(&str, VariableType)> = fields.iter().map(|(n, t)| (n.as_str(), t.clone())).collect();
        let arg_struct = module.get_or_create_struct(&format!("threadPoolArgs_{task_function}"), &field_refs)?;

        let wrapper_name = format!("threadPoolTask_{task_function}");
        if module.has_function(&wrapper_name) {
            return Ok((module.function(&wrapper_name)?, arg_struct));
        }

        let mut f = module.begin_function(&wrapper_name, void_ptr(), &[("args", void_ptr())])?;
        let raw = f.argument(0)?;
        let packed = f.cast(&raw, &arg_struct.pointer_to())?;
        let mut call_args = Vec::with_capacity(fields.len());
        for index in 0..fields.len() {
            let field = f.struct_field_pointer(&packed, index as u32)?;
            call_args.push(f.load(&field)?);
        }
        let result = f.call(task_function, &call_args)?;
        let returned = match result {
            Some(value) if value.ty.is_pointer() => f.cast(&value, &void_ptr())?,
            _ => f.emitter().null_pointer(&void_ptr()),
        };
        let wrapper = f.end_with(&returned)?;
        Ok((wrapper, arg_struct))
    }
}
