//! The seam between the session manager and the accelerator runtime
//!
//! The session never performs tensor arithmetic itself. Everything it needs
//! from the runtime (model deserialization, binding enumeration, device
//! memory, host/device copies and the single execution call) goes through
//! [`Accelerator`].

use std::ffi::c_void;
use std::fmt;

use crate::buffers::BindingTable;
use crate::error::Result;

/// Element type of a binding as reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    F32,
    F16,
    I8,
    I32,
    I64,
    U8,
    Bool,
}

impl DataType {
    /// Width of one element in bytes
    pub const fn size_bytes(self) -> usize {
        match self {
            DataType::F32 | DataType::I32 => 4,
            DataType::F16 => 2,
            DataType::I8 | DataType::U8 | DataType::Bool => 1,
            DataType::I64 => 8,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::F32 => "float32",
            DataType::F16 => "float16",
            DataType::I8 => "int8",
            DataType::I32 => "int32",
            DataType::I64 => "int64",
            DataType::U8 => "uint8",
            DataType::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// Opaque handle to a region of device memory
///
/// Handles are never null. They are only meaningful to the accelerator that
/// produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePtr(usize);

impl DevicePtr {
    /// Wrap a raw device address, rejecting null
    pub fn from_raw(ptr: *mut c_void) -> Option<Self> {
        if ptr.is_null() {
            None
        } else {
            Some(DevicePtr(ptr as usize))
        }
    }

    /// Get the raw device address
    pub fn as_raw(self) -> *mut c_void {
        self.0 as *mut c_void
    }
}

/// One entry of the runtime's binding table, before validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBinding {
    pub name: Option<String>,
    pub is_input: bool,
    /// Dimensions as reported; may contain non-positive (dynamic/invalid) values
    pub dims: Vec<i64>,
    pub dtype: DataType,
}

/// External accelerator runtime driven by a [`Session`](crate::Session)
///
/// Implementations are single-owner: the session calls them from one thread
/// and never concurrently.
pub trait Accelerator {
    /// Deserialize a model and prepare one execution context for it
    fn from_model_bytes(model: &[u8]) -> Result<Self>
    where
        Self: Sized;

    /// Enumerate every binding in the model's native order
    fn bindings(&self) -> Result<Vec<RawBinding>>;

    /// Allocate `bytes` of device memory
    fn allocate(&mut self, bytes: usize) -> Result<DevicePtr>;

    /// Release memory previously returned by [`allocate`](Self::allocate)
    fn free(&mut self, ptr: DevicePtr) -> Result<()>;

    /// Copy `src` into device memory at `dst`
    fn copy_to_device(&mut self, dst: DevicePtr, src: &[u8]) -> Result<()>;

    /// Copy `dst.len()` bytes of device memory at `src` into `dst`
    fn copy_to_host(&mut self, dst: &mut [u8], src: DevicePtr) -> Result<()>;

    /// Run the model once against the given binding table, blocking until done
    ///
    /// `Ok(())` only means the call returned. A runtime that silently writes
    /// garbage into the output buffers is indistinguishable from success.
    fn execute(&mut self, bindings: &BindingTable) -> Result<()>;
}
