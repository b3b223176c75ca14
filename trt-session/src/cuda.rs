//! CUDA memory management utilities
//!
//! Thin wrappers over the runtime's allocation and copy entry points. Device
//! memory is owned by [`BufferManager`](crate::BufferManager), which frees
//! every handle exactly once, so no RAII wrapper lives here.

use std::ffi::c_void;
use std::os::raw::c_char;

use crate::accelerator::DevicePtr;
use crate::error::{Error, Result};
use trt_session_sys::*;

/// Allocate `size` bytes of device memory
pub fn malloc(size: usize) -> Result<DevicePtr> {
    let mut ptr: *mut c_void = std::ptr::null_mut();
    let mut error_msg = [0 as c_char; 1024];

    let result = unsafe { trtx_cuda_malloc(&mut ptr, size, error_msg.as_mut_ptr(), error_msg.len()) };

    if result != TRTX_SUCCESS {
        return Err(Error::from_ffi(result, &error_msg));
    }

    DevicePtr::from_raw(ptr).ok_or_else(|| Error::Cuda("cudaMalloc returned null".to_string()))
}

/// Release device memory returned by [`malloc`]
pub fn free(ptr: DevicePtr) -> Result<()> {
    let mut error_msg = [0 as c_char; 1024];

    let result = unsafe { trtx_cuda_free(ptr.as_raw(), error_msg.as_mut_ptr(), error_msg.len()) };

    if result != TRTX_SUCCESS {
        return Err(Error::from_ffi(result, &error_msg));
    }

    Ok(())
}

/// Copy data from host to device
pub fn memcpy_htod(dst: DevicePtr, data: &[u8]) -> Result<()> {
    let mut error_msg = [0 as c_char; 1024];

    let result = unsafe {
        trtx_cuda_memcpy_host_to_device(
            dst.as_raw(),
            data.as_ptr() as *const c_void,
            data.len(),
            error_msg.as_mut_ptr(),
            error_msg.len(),
        )
    };

    if result != TRTX_SUCCESS {
        return Err(Error::from_ffi(result, &error_msg));
    }

    Ok(())
}

/// Copy `data.len()` bytes from device to host
pub fn memcpy_dtoh(data: &mut [u8], src: DevicePtr) -> Result<()> {
    let mut error_msg = [0 as c_char; 1024];

    let result = unsafe {
        trtx_cuda_memcpy_device_to_host(
            data.as_mut_ptr() as *mut c_void,
            src.as_raw(),
            data.len(),
            error_msg.as_mut_ptr(),
            error_msg.len(),
        )
    };

    if result != TRTX_SUCCESS {
        return Err(Error::from_ffi(result, &error_msg));
    }

    Ok(())
}

/// Synchronize CUDA device
pub fn synchronize() -> Result<()> {
    let mut error_msg = [0 as c_char; 1024];

    let result = unsafe { trtx_cuda_synchronize(error_msg.as_mut_ptr(), error_msg.len()) };

    if result != TRTX_SUCCESS {
        return Err(Error::from_ffi(result, &error_msg));
    }

    Ok(())
}

/// Get the default CUDA stream
pub fn default_stream() -> *mut c_void {
    unsafe { trtx_cuda_get_default_stream() }
}
