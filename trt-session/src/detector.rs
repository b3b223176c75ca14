//! Object detector front-end: load a detection model, identify objects, unload

use std::path::Path;

use tracing::debug;

use crate::accelerator::Accelerator;
use crate::catalog::{Role, F32_WIDTH};
use crate::detection::{Detection, DetectionDecoder};
use crate::error::{BufferContractError, Error, Result, SizeMismatch};
use crate::session::Session;

/// A [`Session`] paired with the decoder for its outputs
///
/// Output host buffers are sized once at construction and reused by every
/// [`identify_objects`](Self::identify_objects) call.
pub struct Detector<A: Accelerator> {
    session: Session<A>,
    decoder: DetectionDecoder,
    outputs: Vec<Vec<u8>>,
}

impl<A: Accelerator> Detector<A> {
    /// Wrap a session whose outputs match the decoder's schema
    ///
    /// The model must take exactly one input (the image tensor).
    pub fn new(session: Session<A>, decoder: DetectionDecoder) -> Result<Self> {
        if session.num_inputs() != 1 {
            return Err(Error::InvalidArgument(format!(
                "detector needs exactly one input, model has {}",
                session.num_inputs()
            )));
        }
        decoder.schema().check_catalog(session.catalog())?;

        let outputs = session.output_host_buffers();
        Ok(Detector {
            session,
            decoder,
            outputs,
        })
    }

    /// Load a model with the end-to-end YOLO output layout
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(Session::load(path)?, DetectionDecoder::default())
    }

    /// Run the model on one preprocessed image and append its detections
    ///
    /// `image` must hold exactly the input binding's element count. Returns
    /// the number of detections appended.
    pub fn identify_objects(
        &mut self,
        image: &[f32],
        detections: &mut Vec<Detection>,
    ) -> Result<usize> {
        if self.session.is_closed() {
            return Err(Error::SessionClosed);
        }

        let expected = self.session.size_of(Role::Input, 0, F32_WIDTH).unwrap_or(0);
        let received = std::mem::size_of_val(image);
        if received != expected {
            return Err(BufferContractError::SizeMismatch(vec![SizeMismatch {
                role: Role::Input,
                index: 0,
                expected,
                received,
            }])
            .into());
        }

        let mut outputs: Vec<&mut [u8]> = self.outputs.iter_mut().map(Vec::as_mut_slice).collect();
        self.session
            .infer(&[bytemuck::cast_slice(image)], &mut outputs)?;

        let found = self.decoder.decode_into(&self.outputs, detections)?;
        debug!(detections = found, "Objects identified");
        Ok(found)
    }

    /// Release the model; every later call fails with [`Error::SessionClosed`]
    pub fn unload(&mut self) -> Result<()> {
        self.session.teardown()
    }

    pub fn session(&self) -> &Session<A> {
        &self.session
    }

    pub fn decoder(&self) -> &DetectionDecoder {
        &self.decoder
    }

    pub fn set_confidence_threshold(&mut self, threshold: f32) -> Result<()> {
        self.decoder.set_confidence_threshold(threshold)
    }
}
