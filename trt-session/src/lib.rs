//! Inference session manager for serialized TensorRT-RTX engines
//!
//! ⚠️ **EXPERIMENTAL - NOT FOR PRODUCTION USE**
//!
//! The crate wraps one loaded model in a [`Session`]: it discovers the
//! model's input/output bindings, allocates one device buffer per binding,
//! validates caller-supplied host buffers and runs the model synchronously.
//! A [`DetectionDecoder`] turns the outputs of end-to-end object detectors
//! into [`Detection`] records, and [`Detector`] bundles both behind a
//! load/identify/unload interface.
//!
//! # Workflow
//!
//! 1. Load a model into a [`Session`] (this builds the [`BindingCatalog`]
//!    and allocates device buffers)
//! 2. Inspect shapes and byte sizes through the introspection queries
//! 3. Call [`Session::infer`] with one host buffer per binding
//! 4. Tear the session down, explicitly or by dropping it
//!
//! # Example
//!
//! ```rust,ignore
//! use trt_session::{Detector, TensorRtAccelerator};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut detector = Detector::<TensorRtAccelerator>::load("yolov8n.engine")?;
//!
//! let image = vec![0.0f32; 3 * 640 * 640];
//! let mut detections = Vec::new();
//! detector.identify_objects(&image, &mut detections)?;
//!
//! for d in &detections {
//!     println!("class {} at {:?} ({:.2})", d.class_id, d.rect, d.confidence);
//! }
//! detector.unload()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - `tensorrt`: link the TensorRT-RTX runtime and expose [`TensorRtAccelerator`]
//! - `mock`: as `tensorrt`, but against the host-memory mock runtime
//!
//! Without either feature only the runtime-independent parts are built; any
//! type implementing [`Accelerator`] can drive a session.
//!
//! # Prerequisites
//!
//! - NVIDIA TensorRT-RTX library installed
//! - CUDA Runtime
//! - Compatible NVIDIA GPU
//!
//! Set the `TENSORRT_RTX_DIR` environment variable to the installation path
//! if TensorRT-RTX is not in a standard location.

pub mod accelerator;
pub mod buffers;
pub mod catalog;
pub mod detection;
pub mod detector;
pub mod error;
pub mod session;

#[cfg(feature = "tensorrt")]
pub mod cuda;
#[cfg(feature = "tensorrt")]
pub mod logger;
#[cfg(feature = "tensorrt")]
mod runtime;
#[cfg(feature = "tensorrt")]
pub mod tensorrt;

#[cfg(test)]
mod fake;

// Re-export commonly used types
pub use accelerator::{Accelerator, DataType, DevicePtr, RawBinding};
pub use buffers::{BindingTable, BufferManager, DeviceBuffer};
pub use catalog::{BindingCatalog, Role, TensorBinding, F32_WIDTH};
pub use detection::{
    BoundingBox, DecoderConfig, Detection, DetectionDecoder, DetectionSchema, Semantic,
    TensorSpec,
};
pub use detector::Detector;
pub use error::{
    BufferContractError, DetectionSchemaError, Error, ModelStructureError, Result, SizeMismatch,
};
pub use session::Session;

#[cfg(feature = "tensorrt")]
pub use logger::{LogHandler, Logger, Severity, TracingLogHandler};
#[cfg(feature = "tensorrt")]
pub use tensorrt::TensorRtAccelerator;
