// This module installs a diagnostic sink on an LLVM context for the lifetime of a module
// emitter. inkwell does not wrap LLVMContextSetDiagnosticHandler, so the handler is
// registered through llvm-sys with a pointer to heap-allocated state; the callback appends
// each diagnostic (severity plus description) to an ordered log and raises a monotonic
// error flag for error-severity entries. Machine-code generation checks had_error() after
// running codegen passes and turns a recorded error into EmitterError::Unexpected.
// Verbose mode forwards each diagnostic to the log crate as it arrives. Dropping the
// handler detaches it from the context before the state is freed.

//! Backend diagnostic collection.

use std::cell::RefCell;
use std::ffi::{c_void, CStr};

use inkwell::context::{AsContextRef, Context};
use llvm_sys::core::{
    LLVMContextSetDiagnosticHandler, LLVMDisposeMessage, LLVMGetDiagInfoDescription,
    LLVMGetDiagInfoSeverity,
};
use llvm_sys::prelude::LLVMDiagnosticInfoRef;
use llvm_sys::LLVMDiagnosticSeverity;

/// Severity of a backend diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Remark,
    Note,
}

impl From<LLVMDiagnosticSeverity> for DiagnosticSeverity {
    fn from(severity: LLVMDiagnosticSeverity) -> Self {
        match severity {
            LLVMDiagnosticSeverity::LLVMDSError => DiagnosticSeverity::Error,
            LLVMDiagnosticSeverity::LLVMDSWarning => DiagnosticSeverity::Warning,
            LLVMDiagnosticSeverity::LLVMDSRemark => DiagnosticSeverity::Remark,
            LLVMDiagnosticSeverity::LLVMDSNote => DiagnosticSeverity::Note,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub message: String,
}

#[derive(Debug, Default)]
struct DiagnosticLog {
    messages: Vec<Diagnostic>,
    had_error: bool,
    verbose: bool,
}

impl DiagnosticLog {
    fn record(&mut self, diagnostic: Diagnostic) {
        if self.verbose {
            match diagnostic.severity {
                DiagnosticSeverity::Error => log::error!("{}", diagnostic.message),
                DiagnosticSeverity::Warning => log::warn!("{}", diagnostic.message),
                DiagnosticSeverity::Remark | DiagnosticSeverity::Note => {
                    log::info!("{}", diagnostic.message)
                }
            }
        }
        if diagnostic.severity == DiagnosticSeverity::Error {
            self.had_error = true;
        }
        self.messages.push(diagnostic);
    }
}

extern "C" fn handle_diagnostic(info: LLVMDiagnosticInfoRef, state: *mut c_void) {
    if state.is_null() {
        return;
    }
    // SAFETY: `state` is the RefCell owned by the DiagnosticHandler that registered this
    // callback, and the handler unregisters itself before freeing it.
    let log = unsafe { &*(state as *const RefCell<DiagnosticLog>) };
    let severity = unsafe { LLVMGetDiagInfoSeverity(info) }.into();
    let message = unsafe {
        let raw = LLVMGetDiagInfoDescription(info);
        if raw.is_null() {
            String::new()
        } else {
            let text = CStr::from_ptr(raw).to_string_lossy().into_owned();
            LLVMDisposeMessage(raw);
            text
        }
    };
    if let Ok(mut log) = log.try_borrow_mut() {
        log.record(Diagnostic { severity, message });
    }
}

/// Collects diagnostics raised on one LLVM context.
pub struct DiagnosticHandler<'ctx> {
    context: &'ctx Context,
    log: Box<RefCell<DiagnosticLog>>,
}

impl<'ctx> DiagnosticHandler<'ctx> {
    pub fn new(context: &'ctx Context, verbose: bool) -> Self {
        let log = Box::new(RefCell::new(DiagnosticLog { verbose, ..Default::default() }));
        let state = &*log as *const RefCell<DiagnosticLog> as *mut c_void;
        unsafe {
            LLVMContextSetDiagnosticHandler(context.as_ctx_ref(), Some(handle_diagnostic), state);
        }
        Self { context, log }
    }

    /// True once an error-severity diagnostic arrived since construction or the last clear.
    pub fn had_error(&self) -> bool {
        self.log.borrow().had_error
    }

    /// Diagnostics in arrival order.
    pub fn messages(&self) -> Vec<Diagnostic> {
        self.log.borrow().messages.clone()
    }

    pub fn clear_messages(&self) {
        let mut log = self.log.borrow_mut();
        log.messages.clear();
        log.had_error = false;
    }

    pub fn set_verbose(&self, verbose: bool) {
        self.log.borrow_mut().verbose = verbose;
    }

    pub fn record(&self, severity: DiagnosticSeverity, message: impl Into<String>) {
        self.log.borrow_mut().record(Diagnostic { severity, message: message.into() });
    }
}

impl Drop for DiagnosticHandler<'_> {
    fn drop(&mut self) {
        unsafe {
            LLVMContextSetDiagnosticHandler(self.context.as_ctx_ref(), None, std::ptr::null_mut());
        }
    }
}
