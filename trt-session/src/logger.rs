//! Bridge from the TensorRT logger callback to `tracing`

use crate::error::Result;
use std::ffi::{c_void, CStr};
use std::os::raw::c_char;
use trt_session_sys::*;

/// Severity level for log messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i32)]
pub enum Severity {
    /// Internal error (most severe)
    InternalError = TrtxLoggerSeverity::TRTX_SEVERITY_INTERNAL_ERROR as i32,
    /// Error
    Error = TrtxLoggerSeverity::TRTX_SEVERITY_ERROR as i32,
    /// Warning
    Warning = TrtxLoggerSeverity::TRTX_SEVERITY_WARNING as i32,
    /// Info
    Info = TrtxLoggerSeverity::TRTX_SEVERITY_INFO as i32,
    /// Verbose (most detailed)
    Verbose = TrtxLoggerSeverity::TRTX_SEVERITY_VERBOSE as i32,
}

impl From<TrtxLoggerSeverity> for Severity {
    fn from(severity: TrtxLoggerSeverity) -> Self {
        match severity {
            TrtxLoggerSeverity::TRTX_SEVERITY_INTERNAL_ERROR => Severity::InternalError,
            TrtxLoggerSeverity::TRTX_SEVERITY_ERROR => Severity::Error,
            TrtxLoggerSeverity::TRTX_SEVERITY_WARNING => Severity::Warning,
            TrtxLoggerSeverity::TRTX_SEVERITY_INFO => Severity::Info,
            TrtxLoggerSeverity::TRTX_SEVERITY_VERBOSE => Severity::Verbose,
        }
    }
}

/// Trait for handling log messages from TensorRT
pub trait LogHandler: Send + Sync {
    /// Called when TensorRT emits a log message
    fn log(&self, severity: Severity, message: &str);
}

/// Forwards runtime messages to `tracing` under the `tensorrt` target
#[derive(Debug, Default)]
pub struct TracingLogHandler;

impl LogHandler for TracingLogHandler {
    fn log(&self, severity: Severity, message: &str) {
        match severity {
            Severity::InternalError | Severity::Error => {
                tracing::error!(target: "tensorrt", "{message}")
            }
            Severity::Warning => tracing::warn!(target: "tensorrt", "{message}"),
            Severity::Info => tracing::info!(target: "tensorrt", "{message}"),
            Severity::Verbose => tracing::trace!(target: "tensorrt", "{message}"),
        }
    }
}

/// Logger handed to the TensorRT runtime
pub struct Logger {
    inner: *mut TrtxLogger,
    // Double-boxed so the callback's user data is a thin pointer; must outlive `inner`
    _handler: Box<Box<dyn LogHandler>>,
}

impl Logger {
    /// Create a new logger with a custom handler
    pub fn new<H: LogHandler + 'static>(handler: H) -> Result<Self> {
        let handler: Box<Box<dyn LogHandler>> = Box::new(Box::new(handler));
        let user_data = &*handler as *const Box<dyn LogHandler> as *mut c_void;

        let mut logger_ptr: *mut TrtxLogger = std::ptr::null_mut();
        let mut error_msg = [0 as c_char; 1024];

        let result = unsafe {
            trtx_logger_create(
                Some(Self::log_callback),
                user_data,
                &mut logger_ptr,
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result != TRTX_SUCCESS {
            return Err(crate::error::Error::from_ffi(result, &error_msg));
        }

        Ok(Logger {
            inner: logger_ptr,
            _handler: handler,
        })
    }

    /// Create a logger that forwards to `tracing`
    pub fn tracing() -> Result<Self> {
        Self::new(TracingLogHandler)
    }

    /// Get the raw pointer (for internal use)
    pub(crate) fn as_ptr(&self) -> *mut TrtxLogger {
        self.inner
    }

    /// C callback function that bridges to Rust trait
    unsafe extern "C" fn log_callback(
        user_data: *mut c_void,
        severity: TrtxLoggerSeverity,
        msg: *const c_char,
    ) {
        if user_data.is_null() || msg.is_null() {
            return;
        }

        let handler = &*(user_data as *const Box<dyn LogHandler>);
        if let Ok(msg) = CStr::from_ptr(msg).to_str() {
            handler.log(severity.into(), msg);
        }
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        if !self.inner.is_null() {
            unsafe {
                trtx_logger_destroy(self.inner);
            }
        }
    }
}

// Logger must be Send and Sync to be used across threads
unsafe impl Send for Logger {}
unsafe impl Sync for Logger {}
