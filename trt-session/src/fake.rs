//! In-memory accelerator for tests: host "device" memory, call counting,
//! injectable failures and a pluggable kernel

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::accelerator::{Accelerator, DataType, DevicePtr, RawBinding};
use crate::buffers::BindingTable;
use crate::error::{Error, Result};

/// Header line of the text model description shared with the mock runtime
pub(crate) const MODEL_MAGIC: &str = "trtx-mock-engine";

#[derive(Debug, Clone)]
pub(crate) struct FakeBinding {
    name: Option<String>,
    is_input: bool,
    dims: Vec<i64>,
    dtype: DataType,
}

impl FakeBinding {
    pub(crate) fn input(name: &str, dims: &[i64]) -> Self {
        Self {
            name: Some(name.to_string()),
            is_input: true,
            dims: dims.to_vec(),
            dtype: DataType::F32,
        }
    }

    pub(crate) fn output(name: &str, dims: &[i64]) -> Self {
        Self {
            is_input: false,
            ..Self::input(name, dims)
        }
    }

    pub(crate) fn with_dtype(mut self, dtype: DataType) -> Self {
        self.dtype = dtype;
        self
    }

    pub(crate) fn unnamed(mut self) -> Self {
        self.name = None;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct FakeStats {
    pub allocations: usize,
    pub frees: usize,
    pub invalid_frees: usize,
    pub copies_to_device: usize,
    pub copies_to_host: usize,
    pub executions: usize,
}

type Kernel = Box<dyn FnMut(&[Vec<u8>], &mut [Vec<u8>])>;

pub(crate) struct FakeAccelerator {
    bindings: Vec<FakeBinding>,
    memory: HashMap<DevicePtr, Vec<u8>>,
    next_addr: usize,
    stats: Rc<RefCell<FakeStats>>,
    allocation_attempts: usize,
    fail_allocation_at: Option<usize>,
    fail_frees: bool,
    kernel: Kernel,
}

impl FakeAccelerator {
    pub(crate) fn new(bindings: Vec<FakeBinding>) -> Self {
        Self {
            bindings,
            memory: HashMap::new(),
            next_addr: 0x1000,
            stats: Rc::new(RefCell::new(FakeStats::default())),
            allocation_attempts: 0,
            fail_allocation_at: None,
            fail_frees: false,
            kernel: Box::new(identity_kernel),
        }
    }

    /// Make the allocation attempt with this zero-based ordinal fail
    pub(crate) fn fail_allocation_at(&mut self, attempt: usize) {
        self.fail_allocation_at = Some(attempt);
    }

    pub(crate) fn fail_frees(&mut self, fail: bool) {
        self.fail_frees = fail;
    }

    pub(crate) fn set_kernel(&mut self, kernel: impl FnMut(&[Vec<u8>], &mut [Vec<u8>]) + 'static) {
        self.kernel = Box::new(kernel);
    }

    pub(crate) fn stats(&self) -> FakeStats {
        *self.stats.borrow()
    }

    /// Shared view of the counters that survives moving the accelerator into a session
    pub(crate) fn stats_handle(&self) -> Rc<RefCell<FakeStats>> {
        Rc::clone(&self.stats)
    }

    pub(crate) fn live_allocations(&self) -> usize {
        self.memory.len()
    }
}

/// Copy the first input into every output, zero-padding the remainder
pub(crate) fn identity_kernel(inputs: &[Vec<u8>], outputs: &mut [Vec<u8>]) {
    let Some(source) = inputs.first() else {
        return;
    };
    for output in outputs.iter_mut() {
        let n = source.len().min(output.len());
        output[..n].copy_from_slice(&source[..n]);
        output[n..].fill(0);
    }
}

impl Accelerator for FakeAccelerator {
    fn from_model_bytes(model: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(model)?;
        let mut lines = text.lines();

        if lines.next().map(str::trim) != Some(MODEL_MAGIC) {
            return Err(Error::Runtime("corrupt or incompatible model".to_string()));
        }

        let mut bindings = Vec::new();
        for line in lines.map(str::trim).filter(|l| !l.is_empty() && !l.starts_with('#')) {
            bindings.push(parse_binding_line(line)?);
        }

        Ok(Self::new(bindings))
    }

    fn bindings(&self) -> Result<Vec<RawBinding>> {
        Ok(self
            .bindings
            .iter()
            .map(|b| RawBinding {
                name: b.name.clone(),
                is_input: b.is_input,
                dims: b.dims.clone(),
                dtype: b.dtype,
            })
            .collect())
    }

    fn allocate(&mut self, bytes: usize) -> Result<DevicePtr> {
        let attempt = self.allocation_attempts;
        self.allocation_attempts += 1;
        if self.fail_allocation_at == Some(attempt) {
            return Err(Error::OutOfMemory(format!("injected failure at allocation {attempt}")));
        }

        let ptr = DevicePtr::from_raw(self.next_addr as *mut std::ffi::c_void)
            .ok_or_else(|| Error::Cuda("address space exhausted".to_string()))?;
        self.next_addr += bytes.max(1).next_multiple_of(256);
        self.memory.insert(ptr, vec![0; bytes]);
        self.stats.borrow_mut().allocations += 1;
        Ok(ptr)
    }

    fn free(&mut self, ptr: DevicePtr) -> Result<()> {
        let mut stats = self.stats.borrow_mut();
        stats.frees += 1;
        if self.memory.remove(&ptr).is_none() {
            stats.invalid_frees += 1;
            return Err(Error::Cuda(format!("free of unknown pointer {:?}", ptr)));
        }
        if self.fail_frees {
            return Err(Error::Cuda("injected free failure".to_string()));
        }
        Ok(())
    }

    fn copy_to_device(&mut self, dst: DevicePtr, src: &[u8]) -> Result<()> {
        let region = self
            .memory
            .get_mut(&dst)
            .ok_or_else(|| Error::Cuda(format!("copy to unknown pointer {:?}", dst)))?;
        if src.len() > region.len() {
            return Err(Error::InvalidArgument(
                "Data size exceeds buffer size".to_string(),
            ));
        }
        region[..src.len()].copy_from_slice(src);
        self.stats.borrow_mut().copies_to_device += 1;
        Ok(())
    }

    fn copy_to_host(&mut self, dst: &mut [u8], src: DevicePtr) -> Result<()> {
        let region = self
            .memory
            .get(&src)
            .ok_or_else(|| Error::Cuda(format!("copy from unknown pointer {:?}", src)))?;
        if dst.len() > region.len() {
            return Err(Error::InvalidArgument(
                "Data size exceeds buffer size".to_string(),
            ));
        }
        dst.copy_from_slice(&region[..dst.len()]);
        self.stats.borrow_mut().copies_to_host += 1;
        Ok(())
    }

    fn execute(&mut self, bindings: &BindingTable) -> Result<()> {
        if bindings.len() != self.bindings.len() {
            return Err(Error::Runtime(format!(
                "binding table has {} entries, model has {}",
                bindings.len(),
                self.bindings.len()
            )));
        }

        let mut inputs = Vec::with_capacity(bindings.inputs().len());
        for ptr in bindings.inputs() {
            let region = self
                .memory
                .get(ptr)
                .ok_or_else(|| Error::Runtime(format!("unbound input {:?}", ptr)))?;
            inputs.push(region.clone());
        }

        let mut outputs = Vec::with_capacity(bindings.outputs().len());
        for ptr in bindings.outputs() {
            let region = self
                .memory
                .get(ptr)
                .ok_or_else(|| Error::Runtime(format!("unbound output {:?}", ptr)))?;
            outputs.push(region.clone());
        }

        (self.kernel)(&inputs, &mut outputs);

        for (ptr, data) in bindings.outputs().iter().zip(outputs) {
            self.memory.insert(*ptr, data);
        }

        self.stats.borrow_mut().executions += 1;
        Ok(())
    }
}

fn parse_binding_line(line: &str) -> Result<FakeBinding> {
    let bad = || Error::Runtime(format!("malformed binding line: {line}"));
    let fields: Vec<&str> = line.split_whitespace().collect();
    let &[role, name, dtype, dims] = fields.as_slice() else {
        return Err(bad());
    };

    let is_input = match role {
        "input" => true,
        "output" => false,
        _ => return Err(bad()),
    };
    let dtype = match dtype {
        "float32" => DataType::F32,
        "float16" => DataType::F16,
        "int8" => DataType::I8,
        "int32" => DataType::I32,
        "int64" => DataType::I64,
        "uint8" => DataType::U8,
        "bool" => DataType::Bool,
        _ => return Err(bad()),
    };
    let dims = if dims == "-" {
        Vec::new()
    } else {
        dims.split('x')
            .map(|d| d.parse::<i64>().map_err(|_| bad()))
            .collect::<Result<Vec<_>>>()?
    };

    Ok(FakeBinding {
        name: Some(name.to_string()),
        is_input,
        dims,
        dtype,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_description() {
        let model = b"trtx-mock-engine\ninput images float32 1x3x4x4\n# comment\noutput num_dets int32 1x1\n";
        let accel = FakeAccelerator::from_model_bytes(model).unwrap();
        let bindings = accel.bindings().unwrap();

        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].name.as_deref(), Some("images"));
        assert!(bindings[0].is_input);
        assert_eq!(bindings[0].dims, vec![1, 3, 4, 4]);
        assert_eq!(bindings[1].dtype, DataType::I32);
    }

    #[test]
    fn test_rejects_bad_magic() {
        assert!(FakeAccelerator::from_model_bytes(b"not a model").is_err());
    }

    #[test]
    fn test_double_free_is_detected() {
        let mut accel = FakeAccelerator::new(Vec::new());
        let ptr = accel.allocate(16).unwrap();
        accel.free(ptr).unwrap();
        assert!(accel.free(ptr).is_err());
        assert_eq!(accel.stats().invalid_frees, 1);
    }
}
