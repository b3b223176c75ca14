//! Device buffer lifecycle: allocate once, expose the binding table, free once

use tracing::{debug, error};

use crate::accelerator::{Accelerator, DevicePtr};
use crate::catalog::{BindingCatalog, Role, F32_WIDTH};
use crate::error::{Error, ModelStructureError, Result};

/// Device memory backing one binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceBuffer {
    ptr: DevicePtr,
    size: usize,
}

impl DeviceBuffer {
    /// Get the device handle
    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    /// Get the size in bytes
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Ordered device handles handed to the execution call: inputs first, then outputs
///
/// Only [`BufferManager`] builds a table, and only from a complete buffer set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingTable {
    ptrs: Vec<DevicePtr>,
    num_inputs: usize,
}

impl BindingTable {
    fn from_buffers(inputs: &[DeviceBuffer], outputs: &[DeviceBuffer]) -> Self {
        let ptrs = inputs
            .iter()
            .chain(outputs.iter())
            .map(DeviceBuffer::ptr)
            .collect();
        BindingTable {
            ptrs,
            num_inputs: inputs.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.ptrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ptrs.is_empty()
    }

    /// Bounds-checked access by table position
    pub fn get(&self, position: usize) -> Option<DevicePtr> {
        self.ptrs.get(position).copied()
    }

    pub fn as_slice(&self) -> &[DevicePtr] {
        &self.ptrs
    }

    pub fn inputs(&self) -> &[DevicePtr] {
        &self.ptrs[..self.num_inputs]
    }

    pub fn outputs(&self) -> &[DevicePtr] {
        &self.ptrs[self.num_inputs..]
    }
}

/// Owner of every device buffer of a session
///
/// The buffer set is either empty or complete; a failed allocation never
/// leaves part of a set behind.
#[derive(Debug, Default)]
pub struct BufferManager {
    inputs: Vec<DeviceBuffer>,
    outputs: Vec<DeviceBuffer>,
    table: BindingTable,
}

impl BufferManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate one `element_count * 4` byte buffer per binding, inputs then outputs
    ///
    /// Fails with [`Error::AlreadyAllocated`] (leaving the current set
    /// untouched) if buffers exist. On any allocation failure every buffer
    /// allocated by this call is released before the error is returned.
    pub fn allocate<A: Accelerator>(
        &mut self,
        catalog: &BindingCatalog,
        accelerator: &mut A,
    ) -> Result<()> {
        if self.is_allocated() {
            error!("Device buffers already allocated; free them first");
            return Err(Error::AlreadyAllocated);
        }

        if catalog.num_inputs() < 1 || catalog.num_outputs() < 1 {
            return Err(ModelStructureError::MissingRole {
                inputs: catalog.num_inputs(),
                outputs: catalog.num_outputs(),
            }
            .into());
        }

        let mut inputs = Vec::with_capacity(catalog.num_inputs());
        let mut outputs = Vec::with_capacity(catalog.num_outputs());

        let allocated = allocate_role(catalog, Role::Input, accelerator, &mut inputs)
            .and_then(|()| allocate_role(catalog, Role::Output, accelerator, &mut outputs));

        if let Err(err) = allocated {
            release_all(accelerator, outputs.drain(..).rev());
            release_all(accelerator, inputs.drain(..).rev());
            return Err(err);
        }

        self.table = BindingTable::from_buffers(&inputs, &outputs);
        self.inputs = inputs;
        self.outputs = outputs;

        debug!(
            inputs = self.inputs.len(),
            outputs = self.outputs.len(),
            bindings = self.table.len(),
            bytes = self.total_bytes(),
            "Allocated device buffers"
        );

        Ok(())
    }

    /// Release every buffer and clear the binding table
    ///
    /// Safe to call with nothing allocated. A failed free is logged and does
    /// not stop the remaining frees; the first failure is returned after the
    /// set has been emptied.
    pub fn free<A: Accelerator>(&mut self, accelerator: &mut A) -> Result<()> {
        if !self.is_allocated() {
            return Ok(());
        }

        self.table = BindingTable::default();
        let outputs = std::mem::take(&mut self.outputs);
        let inputs = std::mem::take(&mut self.inputs);
        let count = inputs.len() + outputs.len();

        let first_error = release_all(accelerator, inputs.into_iter().chain(outputs));

        debug!(buffers = count, "Freed device buffers");

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn is_allocated(&self) -> bool {
        !self.inputs.is_empty() || !self.outputs.is_empty()
    }

    /// Bounds-checked access by role and position
    pub fn buffer(&self, role: Role, index: usize) -> Option<&DeviceBuffer> {
        match role {
            Role::Input => self.inputs.get(index),
            Role::Output => self.outputs.get(index),
        }
    }

    pub fn inputs(&self) -> &[DeviceBuffer] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[DeviceBuffer] {
        &self.outputs
    }

    pub fn binding_table(&self) -> &BindingTable {
        &self.table
    }

    /// Total device memory held, in bytes
    pub fn total_bytes(&self) -> usize {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .map(DeviceBuffer::size)
            .sum()
    }
}

fn allocate_role<A: Accelerator>(
    catalog: &BindingCatalog,
    role: Role,
    accelerator: &mut A,
    buffers: &mut Vec<DeviceBuffer>,
) -> Result<()> {
    for (index, binding) in catalog.role(role).iter().enumerate() {
        let size = binding
            .size_bytes(F32_WIDTH)
            .ok_or_else(|| Error::Allocation {
                role,
                index,
                bytes: usize::MAX,
                reason: "byte size overflows".to_string(),
            })?;

        let ptr = accelerator.allocate(size).map_err(|err| {
            error!(%role, index, bytes = size, %err, "Failed to allocate device buffer");
            Error::Allocation {
                role,
                index,
                bytes: size,
                reason: err.to_string(),
            }
        })?;

        buffers.push(DeviceBuffer { ptr, size });
    }
    Ok(())
}

fn release_all<A: Accelerator>(
    accelerator: &mut A,
    buffers: impl Iterator<Item = DeviceBuffer>,
) -> Option<Error> {
    let mut first_error = None;
    for buffer in buffers {
        if let Err(err) = accelerator.free(buffer.ptr) {
            error!(bytes = buffer.size, %err, "Failed to free device buffer");
            first_error.get_or_insert(err);
        }
    }
    first_error
}
