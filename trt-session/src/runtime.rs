//! Runtime, engine and execution context handles
//!
//! These handles carry no lifetimes: [`TensorRtAccelerator`](crate::TensorRtAccelerator)
//! owns all of them together and its field order drops the context before
//! the engine, the engine before the runtime and the runtime before the
//! logger.

use std::ffi::{c_void, CStr};
use std::os::raw::c_char;

use crate::accelerator::DataType;
use crate::error::{Error, Result};
use crate::logger::Logger;
use trt_session_sys::*;

/// A deserialized engine
pub(crate) struct CudaEngine {
    inner: *mut TrtxCudaEngine,
}

impl CudaEngine {
    /// Get the number of I/O tensors
    pub(crate) fn get_nb_io_tensors(&self) -> Result<i32> {
        let mut count: i32 = 0;

        let result = unsafe { trtx_cuda_engine_get_nb_io_tensors(self.inner, &mut count) };

        if result != TRTX_SUCCESS {
            return Err(Error::from_ffi(result, &[]));
        }

        Ok(count)
    }

    /// Get the name of a tensor by index
    pub(crate) fn get_tensor_name(&self, index: i32) -> Result<String> {
        let mut name_ptr: *const c_char = std::ptr::null();
        let mut error_msg = [0 as c_char; 1024];

        let result = unsafe {
            trtx_cuda_engine_get_tensor_name(
                self.inner,
                index,
                &mut name_ptr,
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result != TRTX_SUCCESS {
            return Err(Error::from_ffi(result, &error_msg));
        }
        if name_ptr.is_null() {
            return Err(Error::Runtime(format!("tensor {index} has no name")));
        }

        let name = unsafe { CStr::from_ptr(name_ptr) }.to_str()?.to_string();

        Ok(name)
    }

    /// Get the declared dimensions of a tensor; dynamic axes are reported as -1
    pub(crate) fn get_tensor_shape(&self, name: &CStr) -> Result<Vec<i64>> {
        let mut dims = [0i64; TRTX_MAX_DIMS as usize];
        let mut nb_dims: i32 = 0;
        let mut error_msg = [0 as c_char; 1024];

        let result = unsafe {
            trtx_cuda_engine_get_tensor_shape(
                self.inner,
                name.as_ptr(),
                dims.as_mut_ptr(),
                dims.len() as i32,
                &mut nb_dims,
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result != TRTX_SUCCESS {
            return Err(Error::from_ffi(result, &error_msg));
        }

        let nb_dims = usize::try_from(nb_dims)
            .ok()
            .filter(|&n| n <= dims.len())
            .ok_or_else(|| Error::Runtime(format!("tensor reports {nb_dims} dimensions")))?;

        Ok(dims[..nb_dims].to_vec())
    }

    /// Get the element type of a tensor
    pub(crate) fn get_tensor_dtype(&self, name: &CStr) -> Result<DataType> {
        let mut dtype: i32 = 0;
        let mut error_msg = [0 as c_char; 1024];

        let result = unsafe {
            trtx_cuda_engine_get_tensor_dtype(
                self.inner,
                name.as_ptr(),
                &mut dtype,
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result != TRTX_SUCCESS {
            return Err(Error::from_ffi(result, &error_msg));
        }

        match dtype {
            d if d == TRTX_DTYPE_FLOAT as i32 => Ok(DataType::F32),
            d if d == TRTX_DTYPE_HALF as i32 => Ok(DataType::F16),
            d if d == TRTX_DTYPE_INT8 as i32 => Ok(DataType::I8),
            d if d == TRTX_DTYPE_INT32 as i32 => Ok(DataType::I32),
            d if d == TRTX_DTYPE_INT64 as i32 => Ok(DataType::I64),
            d if d == TRTX_DTYPE_UINT8 as i32 => Ok(DataType::U8),
            d if d == TRTX_DTYPE_BOOL as i32 => Ok(DataType::Bool),
            other => Err(Error::Runtime(format!("unsupported tensor data type {other}"))),
        }
    }

    /// Whether a tensor is an engine input
    pub(crate) fn is_input(&self, name: &CStr) -> Result<bool> {
        let mut is_input: i32 = 0;
        let mut error_msg = [0 as c_char; 1024];

        let result = unsafe {
            trtx_cuda_engine_is_input(
                self.inner,
                name.as_ptr(),
                &mut is_input,
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result != TRTX_SUCCESS {
            return Err(Error::from_ffi(result, &error_msg));
        }

        Ok(is_input != 0)
    }

    /// Create an execution context for inference
    pub(crate) fn create_execution_context(&self) -> Result<ExecutionContext> {
        let mut context_ptr: *mut TrtxExecutionContext = std::ptr::null_mut();
        let mut error_msg = [0 as c_char; 1024];

        let result = unsafe {
            trtx_cuda_engine_create_execution_context(
                self.inner,
                &mut context_ptr,
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result != TRTX_SUCCESS {
            return Err(Error::from_ffi(result, &error_msg));
        }

        Ok(ExecutionContext { inner: context_ptr })
    }
}

impl Drop for CudaEngine {
    fn drop(&mut self) {
        if !self.inner.is_null() {
            unsafe {
                trtx_cuda_engine_destroy(self.inner);
            }
        }
    }
}

unsafe impl Send for CudaEngine {}

/// Execution context for running inference
///
/// Must be dropped before the [`CudaEngine`] that created it.
pub(crate) struct ExecutionContext {
    inner: *mut TrtxExecutionContext,
}

impl ExecutionContext {
    /// Set the address of a tensor for input or output
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - `data` points to valid CUDA device memory
    /// - The memory remains valid for the lifetime of inference
    /// - The memory is large enough for the tensor's size
    pub(crate) unsafe fn set_tensor_address(&mut self, name: &CStr, data: *mut c_void) -> Result<()> {
        let mut error_msg = [0 as c_char; 1024];

        let result = trtx_execution_context_set_tensor_address(
            self.inner,
            name.as_ptr(),
            data,
            error_msg.as_mut_ptr(),
            error_msg.len(),
        );

        if result != TRTX_SUCCESS {
            return Err(Error::from_ffi(result, &error_msg));
        }

        Ok(())
    }

    /// Enqueue inference work on a CUDA stream
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - `cuda_stream` is a valid CUDA stream handle (or null for default stream)
    /// - All tensor addresses have been set
    pub(crate) unsafe fn enqueue_v3(&mut self, cuda_stream: *mut c_void) -> Result<()> {
        let mut error_msg = [0 as c_char; 1024];

        let result = trtx_execution_context_enqueue_v3(
            self.inner,
            cuda_stream,
            error_msg.as_mut_ptr(),
            error_msg.len(),
        );

        if result != TRTX_SUCCESS {
            return Err(Error::from_ffi(result, &error_msg));
        }

        Ok(())
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if !self.inner.is_null() {
            unsafe {
                trtx_execution_context_destroy(self.inner);
            }
        }
    }
}

unsafe impl Send for ExecutionContext {}

/// Runtime for deserializing engines
///
/// Must be dropped before the [`Logger`] it was created with.
pub(crate) struct Runtime {
    inner: *mut TrtxRuntime,
}

impl Runtime {
    /// Create a new runtime
    pub(crate) fn new(logger: &Logger) -> Result<Self> {
        let mut runtime_ptr: *mut TrtxRuntime = std::ptr::null_mut();
        let mut error_msg = [0 as c_char; 1024];

        let result = unsafe {
            trtx_runtime_create(
                logger.as_ptr(),
                &mut runtime_ptr,
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result != TRTX_SUCCESS {
            return Err(Error::from_ffi(result, &error_msg));
        }

        Ok(Runtime { inner: runtime_ptr })
    }

    /// Deserialize an engine from serialized data
    pub(crate) fn deserialize_cuda_engine(&self, data: &[u8]) -> Result<CudaEngine> {
        let mut engine_ptr: *mut TrtxCudaEngine = std::ptr::null_mut();
        let mut error_msg = [0 as c_char; 1024];

        let result = unsafe {
            trtx_runtime_deserialize_cuda_engine(
                self.inner,
                data.as_ptr() as *const c_void,
                data.len(),
                &mut engine_ptr,
                error_msg.as_mut_ptr(),
                error_msg.len(),
            )
        };

        if result != TRTX_SUCCESS {
            return Err(Error::from_ffi(result, &error_msg));
        }

        Ok(CudaEngine { inner: engine_ptr })
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if !self.inner.is_null() {
            unsafe {
                trtx_runtime_destroy(self.inner);
            }
        }
    }
}

unsafe impl Send for Runtime {}

