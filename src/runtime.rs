// Runtime support for emitted code. The generated program links against the C library, so
// the POSIX routines it uses (pthreads for the thread pool, clock_gettime for timing) are
// declared here with signatures derived from the target device: pthread_t follows the
// pointer width, mutexes and condition variables are passed as opaque void pointers to
// storage sized for every supported libc, and struct timespec uses the target's long.
// Declarations go through the module's declaration table, so repeated uses share one
// prototype and argument types are checked at every call site. The module also emits
// <module>_GetTime, a millisecond wall clock used by the profiler, and a scalar dot
// product loop used by matrix kernels.

//! POSIX declarations and small runtime routines.

use inkwell::values::FunctionValue;

use crate::error::{EmitterError, EmitterResult};
use crate::function_emitter::FunctionEmitter;
use crate::module_emitter::{FunctionDeclaration, ModuleEmitter, Parameter};
use crate::target::TargetDevice;
use crate::types::{TypedOperator, TypedValue, VariableType};

const CLOCK_REALTIME: i32 = 0;

/// `pthread_t` on the target.
pub fn pthread_type(device: &TargetDevice) -> VariableType {
    if device.pointer_bits() == 32 {
        VariableType::Int32
    } else {
        VariableType::Int64
    }
}

/// Storage for a `pthread_mutex_t` or `pthread_cond_t`. 64 bytes covers glibc, musl and Darwin.
pub fn pthread_sync_type() -> VariableType {
    VariableType::Int64.array_of(8)
}

/// C `long` on the target, as used by `struct timespec`.
pub fn long_type(device: &TargetDevice) -> VariableType {
    if device.pointer_bits() == 32 || device.is_windows() {
        VariableType::Int32
    } else {
        VariableType::Int64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PosixFunction {
    PthreadCreate,
    PthreadJoin,
    MutexInit,
    MutexLock,
    MutexUnlock,
    CondInit,
    CondWait,
    CondBroadcast,
    ClockGetTime,
}

impl PosixFunction {
    pub fn name(self) -> &'static str {
        match self {
            PosixFunction::PthreadCreate => "pthread_create",
            PosixFunction::PthreadJoin => "pthread_join",
            PosixFunction::MutexInit => "pthread_mutex_init",
            PosixFunction::MutexLock => "pthread_mutex_lock",
            PosixFunction::MutexUnlock => "pthread_mutex_unlock",
            PosixFunction::CondInit => "pthread_cond_init",
            PosixFunction::CondWait => "pthread_cond_wait",
            PosixFunction::CondBroadcast => "pthread_cond_broadcast",
            PosixFunction::ClockGetTime => "clock_gettime",
        }
    }

    pub fn declaration(self, device: &TargetDevice) -> FunctionDeclaration {
        let ptr = VariableType::opaque_pointer;
        let params = match self {
            PosixFunction::PthreadCreate => vec![
                Parameter::new("thread", ptr()),
                Parameter::new("attr", ptr()),
                Parameter::new("start_routine", ptr()),
                Parameter::new("arg", ptr()),
            ],
            PosixFunction::PthreadJoin => vec![
                Parameter::new("thread", pthread_type(device)),
                Parameter::new("value_ptr", ptr()),
            ],
            PosixFunction::MutexInit => vec![Parameter::new("mutex", ptr()), Parameter::new("attr", ptr())],
            PosixFunction::MutexLock | PosixFunction::MutexUnlock => vec![Parameter::new("mutex", ptr())],
            PosixFunction::CondInit => vec![Parameter::new("cond", ptr()), Parameter::new("attr", ptr())],
            PosixFunction::CondWait => vec![Parameter::new("cond", ptr()), Parameter::new("mutex", ptr())],
            PosixFunction::CondBroadcast => vec![Parameter::new("cond", ptr())],
            PosixFunction::ClockGetTime => vec![
                Parameter::new("clock_id", VariableType::Int32),
                Parameter::new("tp", ptr()),
            ],
        };
        FunctionDeclaration::new(self.name(), VariableType::Int32, params)
    }
}

impl<'m, 'ctx> FunctionEmitter<'m, 'ctx> {
    /// Call a POSIX routine, declaring it on first use. Returns the error code.
    pub fn posix_call(&mut self, function: PosixFunction, args: &[TypedValue<'ctx>]) -> EmitterResult<TypedValue<'ctx>> {
        let declaration = function.declaration(&self.module().options().target_device);
        self.call_runtime(declaration, args)?
            .ok_or_else(|| EmitterError::unexpected(format!("{} returned void", function.name())))
    }

    /// Milliseconds of wall-clock time, as a double.
    pub fn current_time(&mut self) -> EmitterResult<TypedValue<'ctx>> {
        let get_time = self.module().current_time_function()?;
        self.call_value(get_time, &[])?
            .ok_or_else(|| EmitterError::unexpected("time function returned void"))
    }

    /// Sum of `a[i] * b[i]` for `i` in `0..len`.
    pub fn dot_product(&mut self, len: u32, a: &TypedValue<'ctx>, b: &TypedValue<'ctx>) -> EmitterResult<TypedValue<'ctx>> {
        let elem = a.ty.pointee()?.clone();
        if b.ty.pointee()? != &elem || !(elem.is_float() || elem.is_integer()) {
            return Err(EmitterError::type_not_supported(format!("dot product of {} and {}", a.ty, b.ty)));
        }
        let zero = self.emitter().zero(&elem)?;
        let sum = self.variable_with_value(&zero, "dot")?;
        let count = self.literal(len as i32);
        self.for_count(&count, |f, i| {
            let x = f.value_at(a, &i)?;
            let y = f.value_at(b, &i)?;
            let product = f.binary(TypedOperator::multiply_for(&elem), &x, &y)?;
            f.operation_and_update(&sum, TypedOperator::add_for(&elem), &product)
        })?;
        self.load(&sum)
    }
}

impl<'ctx> ModuleEmitter<'ctx> {
    /// `<module>_GetTime() -> double`, returning milliseconds from `CLOCK_REALTIME`.
    pub fn current_time_function(&mut self) -> EmitterResult<FunctionValue<'ctx>> {
        let name = format!("{}_GetTime", self.name());
        if self.has_function(&name) {
            return self.function(&name);
        }
        let long = long_type(&self.options().target_device);
        let timespec = self.get_or_create_struct(
            &format!("{}_TimeSpec", self.name()),
            &[("tv_sec", long.clone()), ("tv_nsec", long)],
        )?;

        let mut f = self.begin_function(&name, VariableType::Double, &[])?;
        let ts = f.variable(&timespec, "ts")?;
        let clock = f.literal(CLOCK_REALTIME);
        f.posix_call(PosixFunction::ClockGetTime, &[clock, ts.clone()])?;

        let seconds = f.load(&f.struct_field_pointer(&ts, 0)?)?;
        let nanoseconds = f.load(&f.struct_field_pointer(&ts, 1)?)?;
        let seconds = f.cast(&seconds, &VariableType::Double)?;
        let nanoseconds = f.cast(&nanoseconds, &VariableType::Double)?;
        let ms = f.binary(TypedOperator::MultiplyFloat, &seconds, &f.literal(1000.0f64))?;
        let fraction = f.binary(TypedOperator::DivideFloat, &nanoseconds, &f.literal(1.0e6f64))?;
        let total = f.binary(TypedOperator::AddFloat, &ms, &fraction)?;
        f.set_comment("Wall-clock time in milliseconds")?;
        f.end_with(&total)
    }
}
