//! [`Accelerator`] backed by the TensorRT-RTX runtime

use std::ffi::CString;

use tracing::debug;

use crate::accelerator::{Accelerator, DataType, DevicePtr, RawBinding};
use crate::buffers::BindingTable;
use crate::cuda;
use crate::error::{Error, Result};
use crate::logger::Logger;
use crate::runtime::{CudaEngine, ExecutionContext, Runtime};

/// One engine I/O tensor, in engine order
struct EngineTensor {
    name: CString,
    is_input: bool,
    dims: Vec<i64>,
    dtype: DataType,
}

/// A deserialized TensorRT engine with one execution context
///
/// Tensors are addressed by name on the engine side; the binding table's
/// positional order (inputs then outputs, each in engine order) is mapped
/// back to names on every [`execute`](Accelerator::execute).
pub struct TensorRtAccelerator {
    // Field order is drop order
    context: ExecutionContext,
    engine: CudaEngine,
    _runtime: Runtime,
    _logger: Logger,
    tensors: Vec<EngineTensor>,
}

impl TensorRtAccelerator {
    /// Deserialize `model` with runtime messages routed through `logger`
    pub fn with_logger(model: &[u8], logger: Logger) -> Result<Self> {
        let runtime = Runtime::new(&logger)?;
        let engine = runtime.deserialize_cuda_engine(model)?;
        let tensors = enumerate_tensors(&engine)?;
        let context = engine.create_execution_context()?;

        debug!(
            bytes = model.len(),
            tensors = tensors.len(),
            "Deserialized engine"
        );

        Ok(TensorRtAccelerator {
            context,
            engine,
            _runtime: runtime,
            _logger: logger,
            tensors,
        })
    }

    /// Number of I/O tensors the engine reports
    pub fn num_io_tensors(&self) -> Result<usize> {
        io_tensor_count(self.engine.get_nb_io_tensors()?)
    }
}

fn io_tensor_count(count: i32) -> Result<usize> {
    usize::try_from(count)
        .map_err(|_| Error::Runtime(format!("engine reports {count} I/O tensors")))
}

fn enumerate_tensors(engine: &CudaEngine) -> Result<Vec<EngineTensor>> {
    let count = engine.get_nb_io_tensors()?;
    let mut tensors = Vec::with_capacity(io_tensor_count(count)?);

    for index in 0..count {
        let name = CString::new(engine.get_tensor_name(index)?)?;
        let is_input = engine.is_input(&name)?;
        let dims = engine.get_tensor_shape(&name)?;
        let dtype = engine.get_tensor_dtype(&name)?;
        tensors.push(EngineTensor {
            name,
            is_input,
            dims,
            dtype,
        });
    }

    Ok(tensors)
}

impl Accelerator for TensorRtAccelerator {
    fn from_model_bytes(model: &[u8]) -> Result<Self> {
        Self::with_logger(model, Logger::tracing()?)
    }

    fn bindings(&self) -> Result<Vec<RawBinding>> {
        self.tensors
            .iter()
            .map(|t| {
                Ok(RawBinding {
                    name: Some(t.name.to_str()?.to_string()),
                    is_input: t.is_input,
                    dims: t.dims.clone(),
                    dtype: t.dtype,
                })
            })
            .collect()
    }

    fn allocate(&mut self, bytes: usize) -> Result<DevicePtr> {
        cuda::malloc(bytes)
    }

    fn free(&mut self, ptr: DevicePtr) -> Result<()> {
        cuda::free(ptr)
    }

    fn copy_to_device(&mut self, dst: DevicePtr, src: &[u8]) -> Result<()> {
        cuda::memcpy_htod(dst, src)
    }

    fn copy_to_host(&mut self, dst: &mut [u8], src: DevicePtr) -> Result<()> {
        cuda::memcpy_dtoh(dst, src)
    }

    fn execute(&mut self, bindings: &BindingTable) -> Result<()> {
        if bindings.len() != self.tensors.len() {
            return Err(Error::Runtime(format!(
                "binding table has {} entries, engine has {} tensors",
                bindings.len(),
                self.tensors.len()
            )));
        }

        let inputs = self.tensors.iter().filter(|t| t.is_input);
        let outputs = self.tensors.iter().filter(|t| !t.is_input);
        let addresses = bindings.inputs().iter().chain(bindings.outputs());

        for (tensor, ptr) in inputs.chain(outputs).zip(addresses) {
            // SAFETY: every handle in the table is a live allocation sized for its tensor
            unsafe {
                self.context.set_tensor_address(&tensor.name, ptr.as_raw())?;
            }
        }

        unsafe {
            self.context.enqueue_v3(cuda::default_stream())?;
        }
        cuda::synchronize()
    }
}
