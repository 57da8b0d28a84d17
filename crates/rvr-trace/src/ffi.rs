//! C ABI bridge for generated engine code.
//!
//! Engines emitted as C call these extern functions at their trace points. The
//! `FfiTracerPtr` argument holds an `inner` pointer to a boxed Rust tracer.
//!
//! # Safety
//!
//! The caller (C code) must ensure:
//! - `tracer` is null or a valid pointer to an `FfiTracerPtr`
//! - `tracer->inner` is null or was produced by [`FfiTracerPtr::from_boxed`]
//! - no two calls for the same tracer run concurrently

use std::ffi::c_void;

use tracing::error;

use crate::event::OpClass;
use crate::tracer::Tracer;

/// Pointer struct matching the C side's `Tracer` typedef:
///
/// ```c
/// typedef struct Tracer {
///     void* inner;
/// } Tracer;
/// ```
#[repr(C)]
pub struct FfiTracerPtr {
    pub inner: *mut c_void,
}

impl FfiTracerPtr {
    /// Hand a tracer to C. Release it with [`FfiTracerPtr::into_boxed`] or
    /// [`trace_drop`].
    #[must_use]
    pub fn from_boxed(tracer: Box<dyn Tracer>) -> Self {
        Self {
            inner: Box::into_raw(Box::new(tracer)).cast::<c_void>(),
        }
    }

    /// Take the tracer back, leaving `inner` null.
    ///
    /// # Safety
    /// `inner` must be null or come from `from_boxed` and not be freed yet.
    pub unsafe fn into_boxed(&mut self) -> Option<Box<dyn Tracer>> {
        let inner = std::mem::replace(&mut self.inner, std::ptr::null_mut());
        if inner.is_null() {
            return None;
        }
        Some(*unsafe { Box::from_raw(inner.cast::<Box<dyn Tracer>>()) })
    }
}

/// Run `f` on the tracer behind `ptr`; null pointers are ignored.
#[inline]
unsafe fn with_tracer<R>(
    ptr: *mut FfiTracerPtr,
    f: impl FnOnce(&mut dyn Tracer) -> R,
) -> Option<R> {
    unsafe {
        if ptr.is_null() || (*ptr).inner.is_null() {
            return None;
        }
        let tracer = &mut **(*ptr).inner.cast::<Box<dyn Tracer>>();
        Some(f(tracer))
    }
}

// =============================================================================
// FFI Exports - called by generated C code
// =============================================================================

/// Initialize tracer. Returns 0 on success, -1 on failure or a null tracer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn trace_init(tracer: *mut FfiTracerPtr) -> i32 {
    match unsafe { with_tracer(tracer, |t| t.init()) } {
        Some(Ok(())) => 0,
        Some(Err(e)) => {
            error!(error = %e, "tracer init failed");
            -1
        }
        None => -1,
    }
}

/// Finalize tracer. Returns 0 on success, -1 on failure or a null tracer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn trace_fini(tracer: *mut FfiTracerPtr) -> i32 {
    match unsafe { with_tracer(tracer, |t| t.fini()) } {
        Some(Ok(())) => 0,
        Some(Err(e)) => {
            error!(error = %e, "tracer fini failed");
            -1
        }
        None => -1,
    }
}

/// Free the tracer and null out `inner`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn trace_drop(tracer: *mut FfiTracerPtr) {
    if !tracer.is_null() {
        drop(unsafe { (*tracer).into_boxed() });
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn trace_block(tracer: *mut FfiTracerPtr, pc: u64) {
    unsafe { with_tracer(tracer, |t| t.trace_block(pc)) };
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn trace_pc(tracer: *mut FfiTracerPtr, pc: u64, op: u16) {
    unsafe { with_tracer(tracer, |t| t.trace_pc(pc, OpClass(op))) };
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn trace_opcode(tracer: *mut FfiTracerPtr, pc: u64, op: u16, opcode: u32) {
    unsafe { with_tracer(tracer, |t| t.trace_opcode(pc, OpClass(op), opcode)) };
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn trace_reg_read(
    tracer: *mut FfiTracerPtr,
    pc: u64,
    op: u16,
    reg: u8,
    value: u64,
) {
    unsafe { with_tracer(tracer, |t| t.trace_reg_read(pc, OpClass(op), reg, value)) };
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn trace_reg_write(
    tracer: *mut FfiTracerPtr,
    pc: u64,
    op: u16,
    reg: u8,
    value: u64,
) {
    unsafe { with_tracer(tracer, |t| t.trace_reg_write(pc, OpClass(op), reg, value)) };
}

/// Declare memory access exports; value width follows the access size.
macro_rules! mem_exports {
    ($($name:ident: $ty:ty;)*) => {
        $(
            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn $name(
                tracer: *mut FfiTracerPtr,
                pc: u64,
                op: u16,
                addr: u64,
                value: $ty,
            ) {
                unsafe { with_tracer(tracer, |t| t.$name(pc, OpClass(op), addr, value)) };
            }
        )*
    };
}

mem_exports! {
    trace_mem_read_byte: u8;
    trace_mem_read_halfword: u16;
    trace_mem_read_word: u32;
    trace_mem_read_dword: u64;
    trace_mem_write_byte: u8;
    trace_mem_write_halfword: u16;
    trace_mem_write_word: u32;
    trace_mem_write_dword: u64;
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn trace_branch_taken(
    tracer: *mut FfiTracerPtr,
    pc: u64,
    op: u16,
    target: u64,
) {
    unsafe { with_tracer(tracer, |t| t.trace_branch_taken(pc, OpClass(op), target)) };
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn trace_branch_not_taken(
    tracer: *mut FfiTracerPtr,
    pc: u64,
    op: u16,
    target: u64,
) {
    unsafe { with_tracer(tracer, |t| t.trace_branch_not_taken(pc, OpClass(op), target)) };
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn trace_csr_read(
    tracer: *mut FfiTracerPtr,
    pc: u64,
    op: u16,
    csr: u16,
    value: u64,
) {
    unsafe { with_tracer(tracer, |t| t.trace_csr_read(pc, OpClass(op), csr, value)) };
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn trace_csr_write(
    tracer: *mut FfiTracerPtr,
    pc: u64,
    op: u16,
    csr: u16,
    value: u64,
) {
    unsafe { with_tracer(tracer, |t| t.trace_csr_write(pc, OpClass(op), csr, value)) };
}
