//! Binding catalog: the validated input/output contract of a loaded model

use std::fmt;

use tracing::info;

use crate::accelerator::{Accelerator, DataType, RawBinding};
use crate::error::{ModelStructureError, Result};

/// Width in bytes of the 32-bit float elements every device buffer holds
pub const F32_WIDTH: usize = 4;

/// Direction of a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Input,
    Output,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Input => f.write_str("input"),
            Role::Output => f.write_str("output"),
        }
    }
}

/// One validated model input or output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorBinding {
    name: Option<String>,
    role: Role,
    native_index: usize,
    shape: Vec<usize>,
    element_count: usize,
    dtype: DataType,
}

impl TensorBinding {
    /// Tensor name, if the model declares one
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Position in the model's full binding table
    pub fn native_index(&self) -> usize {
        self.native_index
    }

    /// Dimensions, every one strictly positive
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Product of all dimensions
    pub fn element_count(&self) -> usize {
        self.element_count
    }

    /// Element type reported by the runtime
    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    /// Size in bytes for elements of `element_width` bytes, `None` on overflow
    pub fn size_bytes(&self, element_width: usize) -> Option<usize> {
        self.element_count.checked_mul(element_width)
    }

    /// Row-major strides in elements, innermost axis last
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1; self.shape.len()];
        for axis in (0..self.shape.len().saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * self.shape[axis + 1];
        }
        strides
    }

    fn display_name(&self) -> &str {
        self.name().unwrap_or("unnamed")
    }
}

/// Structured description of every binding of one model
///
/// Order within each role is the model's native binding order. All
/// downstream indexing (buffers, binding table, host buffers) is positional
/// against this order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingCatalog {
    inputs: Vec<TensorBinding>,
    outputs: Vec<TensorBinding>,
}

impl BindingCatalog {
    /// Introspect the accelerator's binding table
    pub fn build<A: Accelerator>(accelerator: &A) -> Result<Self> {
        let raw = accelerator.bindings()?;
        Ok(Self::from_bindings(raw)?)
    }

    /// Validate raw bindings into a catalog
    pub fn from_bindings(raw: Vec<RawBinding>) -> std::result::Result<Self, ModelStructureError> {
        info!(bindings = raw.len(), "Discovering model bindings");

        let mut catalog = BindingCatalog::default();

        for (index, binding) in raw.into_iter().enumerate() {
            let name_for_errors = binding.name.clone().unwrap_or_else(|| "unnamed".to_string());
            let shape = validate_dims(index, &name_for_errors, &binding.dims)?;
            let element_count = shape
                .iter()
                .try_fold(1usize, |acc, &d| acc.checked_mul(d))
                .ok_or(ModelStructureError::ElementCountOverflow { binding: index })?;

            let role = if binding.is_input {
                Role::Input
            } else {
                Role::Output
            };
            let tensor = TensorBinding {
                name: binding.name,
                role,
                native_index: index,
                shape,
                element_count,
                dtype: binding.dtype,
            };

            info!(
                index,
                role = %role,
                name = tensor.display_name(),
                shape = ?tensor.shape,
                dtype = %tensor.dtype,
                elements = element_count,
                kib = element_count.saturating_mul(F32_WIDTH) as f64 / 1024.0,
                "Binding"
            );

            match role {
                Role::Input => catalog.inputs.push(tensor),
                Role::Output => catalog.outputs.push(tensor),
            }
        }

        info!(
            inputs = catalog.inputs.len(),
            outputs = catalog.outputs.len(),
            "Binding catalog built"
        );

        Ok(catalog)
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn inputs(&self) -> &[TensorBinding] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorBinding] {
        &self.outputs
    }

    /// Bindings of one role, in native order
    pub fn role(&self, role: Role) -> &[TensorBinding] {
        match role {
            Role::Input => &self.inputs,
            Role::Output => &self.outputs,
        }
    }

    /// Bounds-checked access by role and position
    pub fn binding(&self, role: Role, index: usize) -> Option<&TensorBinding> {
        self.role(role).get(index)
    }

    pub fn input_shapes(&self) -> Vec<&[usize]> {
        self.inputs.iter().map(TensorBinding::shape).collect()
    }

    pub fn output_shapes(&self) -> Vec<&[usize]> {
        self.outputs.iter().map(TensorBinding::shape).collect()
    }

    pub fn input_element_counts(&self) -> Vec<usize> {
        self.inputs.iter().map(TensorBinding::element_count).collect()
    }

    pub fn output_element_counts(&self) -> Vec<usize> {
        self.outputs.iter().map(TensorBinding::element_count).collect()
    }

    /// Bytes needed by binding `index` of `role` at `element_width` bytes per element
    ///
    /// Returns `None` for an out-of-range index or an overflowing size.
    pub fn size_of(&self, role: Role, index: usize, element_width: usize) -> Option<usize> {
        self.binding(role, index)?.size_bytes(element_width)
    }

    /// Byte size of every binding of `role`, saturating on overflow
    pub fn sizes_bytes(&self, role: Role, element_width: usize) -> Vec<usize> {
        self.role(role)
            .iter()
            .map(|b| b.element_count.saturating_mul(element_width))
            .collect()
    }
}

fn validate_dims(
    binding: usize,
    name: &str,
    dims: &[i64],
) -> std::result::Result<Vec<usize>, ModelStructureError> {
    if dims.is_empty() {
        return Err(ModelStructureError::NoDimensions {
            binding,
            name: name.to_string(),
        });
    }

    dims.iter()
        .enumerate()
        .map(|(axis, &value)| {
            usize::try_from(value)
                .ok()
                .filter(|&d| d > 0)
                .ok_or(ModelStructureError::InvalidDimension {
                    binding,
                    axis,
                    value,
                })
        })
        .collect()
}
