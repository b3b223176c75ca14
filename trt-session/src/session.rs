//! Inference session: one loaded model, its binding catalog and its device buffers
//!
//! A [`Session`] is built in a fixed order (load the model, build the
//! catalog, allocate buffers) and torn down in reverse. Construction either
//! yields a fully usable session or nothing.
//!
//! # Execution guarantees
//!
//! [`Session::infer`] validates every host buffer before any device traffic.
//! Once the gates pass, `Ok(())` means the copies and the single execution
//! call all returned without error. It does *not* prove the outputs are
//! meaningful: the runtime's execution call offers no way to tell a silently
//! corrupted run from a correct one.

use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::accelerator::{Accelerator, DataType};
use crate::buffers::{BufferManager, DeviceBuffer};
use crate::catalog::{BindingCatalog, Role};
use crate::error::{BufferContractError, Error, Result, SizeMismatch};

/// A loaded model ready for synchronous inference
///
/// One session serves one caller at a time; `infer` takes `&mut self`, so
/// overlapping calls, or a teardown racing an inference, cannot compile.
pub struct Session<A: Accelerator> {
    catalog: BindingCatalog,
    buffers: BufferManager,
    // None once torn down
    accelerator: Option<A>,
}

impl<A: Accelerator> Session<A> {
    /// Build a session around an accelerator that already holds a model
    pub fn new(mut accelerator: A) -> Result<Self> {
        let catalog = BindingCatalog::build(&accelerator)?;

        let mut buffers = BufferManager::new();
        buffers.allocate(&catalog, &mut accelerator)?;

        info!(
            inputs = catalog.num_inputs(),
            outputs = catalog.num_outputs(),
            device_bytes = buffers.total_bytes(),
            "Session ready"
        );

        Ok(Session {
            catalog,
            buffers,
            accelerator: Some(accelerator),
        })
    }

    /// Deserialize a model from memory and build a session for it
    pub fn from_model_bytes(model: &[u8]) -> Result<Self> {
        let accelerator = A::from_model_bytes(model)?;
        Self::new(accelerator)
    }

    /// Read a serialized model from disk and build a session for it
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let model = std::fs::read(path)?;
        info!(path = %path.display(), bytes = model.len(), "Loading model");
        Self::from_model_bytes(&model)
    }

    /// Run the model once
    ///
    /// `inputs` and `outputs` are ordered by catalog position and each must
    /// hold exactly the bytes of its device buffer (element count × 4). A
    /// count or size mismatch fails before any copy; size mismatches are
    /// reported for every failing slot at once.
    pub fn infer(&mut self, inputs: &[&[u8]], outputs: &mut [&mut [u8]]) -> Result<()> {
        let accelerator = self.accelerator.as_mut().ok_or(Error::SessionClosed)?;

        check_counts(&self.catalog, inputs.len(), outputs.len())?;
        check_sizes(
            &self.buffers,
            inputs.iter().map(|b| b.len()),
            outputs.iter().map(|b| b.len()),
        )?;

        run(accelerator, &self.buffers, inputs, outputs)
    }

    /// Single-input, single-output form of [`infer`](Self::infer)
    ///
    /// Returns the number of output bytes written.
    pub fn infer_single(&mut self, input: &[u8], output: &mut [u8]) -> Result<usize> {
        let written = output.len();
        self.infer(&[input], &mut [output])?;
        Ok(written)
    }

    /// Run the model on caller-owned raw host memory
    ///
    /// Applies the count and size gates of [`infer`](Self::infer) to the
    /// declared sizes, and additionally rejects null pointers.
    ///
    /// # Safety
    ///
    /// Each non-null `inputs[i]` must be valid for reads of `input_sizes[i]`
    /// bytes and each non-null `outputs[i]` valid for writes of
    /// `output_sizes[i]` bytes for the duration of the call. Output regions
    /// must not overlap each other or any input region.
    pub unsafe fn infer_raw(
        &mut self,
        inputs: &[*const u8],
        input_sizes: &[usize],
        outputs: &[*mut u8],
        output_sizes: &[usize],
    ) -> Result<()> {
        if self.accelerator.is_none() {
            return Err(Error::SessionClosed);
        }
        if inputs.len() != input_sizes.len() || outputs.len() != output_sizes.len() {
            warn!(
                input_sizes = input_sizes.len(),
                output_sizes = output_sizes.len(),
                inputs = inputs.len(),
                outputs = outputs.len(),
                "Pointer and size lists differ in length"
            );
            return Err(BufferContractError::CountMismatch {
                expected_inputs: input_sizes.len(),
                expected_outputs: output_sizes.len(),
                inputs: inputs.len(),
                outputs: outputs.len(),
            }
            .into());
        }

        check_counts(&self.catalog, inputs.len(), outputs.len())?;

        if let Some(index) = inputs.iter().position(|p| p.is_null()) {
            warn!(index, "Null input buffer");
            return Err(BufferContractError::NullBuffer {
                role: Role::Input,
                index,
            }
            .into());
        }
        if let Some(index) = outputs.iter().position(|p| p.is_null()) {
            warn!(index, "Null output buffer");
            return Err(BufferContractError::NullBuffer {
                role: Role::Output,
                index,
            }
            .into());
        }

        check_sizes(
            &self.buffers,
            input_sizes.iter().copied(),
            output_sizes.iter().copied(),
        )?;

        // SAFETY: pointers are non-null and the caller guarantees validity for the declared sizes
        let input_slices: Vec<&[u8]> = inputs
            .iter()
            .zip(input_sizes)
            .map(|(&ptr, &len)| unsafe { std::slice::from_raw_parts(ptr, len) })
            .collect();
        let mut output_slices: Vec<&mut [u8]> = outputs
            .iter()
            .zip(output_sizes)
            .map(|(&ptr, &len)| unsafe { std::slice::from_raw_parts_mut(ptr, len) })
            .collect();

        self.infer(&input_slices, &mut output_slices)
    }

    /// Submit an inference without waiting for it
    ///
    /// Asynchronous execution is not supported; this always fails with
    /// [`Error::NotImplemented`].
    pub fn infer_async(&mut self, _inputs: &[&[u8]]) -> Result<()> {
        Err(Error::NotImplemented("asynchronous inference"))
    }

    /// Collect the outputs of an [`infer_async`](Self::infer_async) submission
    ///
    /// Always fails with [`Error::NotImplemented`].
    pub fn retrieve_async_result(&mut self, _outputs: &mut [&mut [u8]]) -> Result<usize> {
        Err(Error::NotImplemented("asynchronous result retrieval"))
    }

    /// Free device buffers, then release the model and runtime
    ///
    /// Idempotent. A failed buffer free is logged and returned, but the
    /// session is closed regardless; later calls fail with
    /// [`Error::SessionClosed`].
    pub fn teardown(&mut self) -> Result<()> {
        let Some(mut accelerator) = self.accelerator.take() else {
            return Ok(());
        };

        let freed = self.buffers.free(&mut accelerator);
        drop(accelerator);

        info!("Session torn down");
        freed
    }

    pub fn is_closed(&self) -> bool {
        self.accelerator.is_none()
    }

    pub fn catalog(&self) -> &BindingCatalog {
        &self.catalog
    }

    pub fn buffers(&self) -> &BufferManager {
        &self.buffers
    }

    pub fn num_inputs(&self) -> usize {
        self.catalog.num_inputs()
    }

    pub fn num_outputs(&self) -> usize {
        self.catalog.num_outputs()
    }

    pub fn input_shapes(&self) -> Vec<&[usize]> {
        self.catalog.input_shapes()
    }

    pub fn output_shapes(&self) -> Vec<&[usize]> {
        self.catalog.output_shapes()
    }

    pub fn input_element_counts(&self) -> Vec<usize> {
        self.catalog.input_element_counts()
    }

    pub fn output_element_counts(&self) -> Vec<usize> {
        self.catalog.output_element_counts()
    }

    pub fn input_names(&self) -> Vec<Option<&str>> {
        self.catalog.inputs().iter().map(|b| b.name()).collect()
    }

    pub fn output_names(&self) -> Vec<Option<&str>> {
        self.catalog.outputs().iter().map(|b| b.name()).collect()
    }

    pub fn input_dtypes(&self) -> Vec<DataType> {
        self.catalog.inputs().iter().map(|b| b.dtype()).collect()
    }

    pub fn output_dtypes(&self) -> Vec<DataType> {
        self.catalog.outputs().iter().map(|b| b.dtype()).collect()
    }

    /// Bytes of binding `index` of `role` at `element_width` bytes per element
    pub fn size_of(&self, role: Role, index: usize, element_width: usize) -> Option<usize> {
        self.catalog.size_of(role, index, element_width)
    }

    pub fn input_sizes_bytes(&self, element_width: usize) -> Vec<usize> {
        self.catalog.sizes_bytes(Role::Input, element_width)
    }

    pub fn output_sizes_bytes(&self, element_width: usize) -> Vec<usize> {
        self.catalog.sizes_bytes(Role::Output, element_width)
    }

    /// Device memory held by this session, zero once torn down
    pub fn total_device_bytes(&self) -> usize {
        self.buffers.total_bytes()
    }

    /// Zeroed host buffers sized to receive every output, in catalog order
    pub fn output_host_buffers(&self) -> Vec<Vec<u8>> {
        self.buffers
            .outputs()
            .iter()
            .map(|b| vec![0; b.size()])
            .collect()
    }
}

impl<A: Accelerator> Drop for Session<A> {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            error!(%err, "Failed to release session cleanly");
        }
    }
}

fn check_counts(catalog: &BindingCatalog, inputs: usize, outputs: usize) -> Result<()> {
    if inputs == catalog.num_inputs() && outputs == catalog.num_outputs() {
        return Ok(());
    }

    warn!(
        expected_inputs = catalog.num_inputs(),
        expected_outputs = catalog.num_outputs(),
        inputs,
        outputs,
        "Buffer count mismatch"
    );
    Err(BufferContractError::CountMismatch {
        expected_inputs: catalog.num_inputs(),
        expected_outputs: catalog.num_outputs(),
        inputs,
        outputs,
    }
    .into())
}

fn check_sizes(
    buffers: &BufferManager,
    input_sizes: impl Iterator<Item = usize>,
    output_sizes: impl Iterator<Item = usize>,
) -> Result<()> {
    let mut mismatches = Vec::new();
    collect_mismatches(Role::Input, buffers.inputs(), input_sizes, &mut mismatches);
    collect_mismatches(Role::Output, buffers.outputs(), output_sizes, &mut mismatches);

    if mismatches.is_empty() {
        return Ok(());
    }

    for m in &mismatches {
        warn!(
            role = %m.role,
            index = m.index,
            expected = m.expected,
            received = m.received,
            "Buffer size mismatch"
        );
    }
    Err(BufferContractError::SizeMismatch(mismatches).into())
}

fn collect_mismatches(
    role: Role,
    buffers: &[DeviceBuffer],
    sizes: impl Iterator<Item = usize>,
    mismatches: &mut Vec<SizeMismatch>,
) {
    for (index, (buffer, received)) in buffers.iter().zip(sizes).enumerate() {
        if buffer.size() != received {
            mismatches.push(SizeMismatch {
                role,
                index,
                expected: buffer.size(),
                received,
            });
        }
    }
}

fn run<A: Accelerator>(
    accelerator: &mut A,
    buffers: &BufferManager,
    inputs: &[&[u8]],
    outputs: &mut [&mut [u8]],
) -> Result<()> {
    for (buffer, host) in buffers.inputs().iter().zip(inputs) {
        accelerator.copy_to_device(buffer.ptr(), host)?;
    }

    accelerator.execute(buffers.binding_table())?;

    for (buffer, host) in buffers.outputs().iter().zip(outputs.iter_mut()) {
        accelerator.copy_to_host(host, buffer.ptr())?;
    }

    debug!(
        inputs = inputs.len(),
        outputs = outputs.len(),
        "Inference complete"
    );
    Ok(())
}
