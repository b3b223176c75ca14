//! Detection decoding: turns the count/boxes/scores/labels outputs of an
//! end-to-end detector into confidence-filtered [`Detection`] records
//!
//! Which output holds what is described by a [`DetectionSchema`], so the
//! decoder itself is independent of a particular model family. Non-maximum
//! suppression is expected to have run inside the engine already; the
//! decoder only filters by confidence.

use bytemuck::pod_read_unaligned;

use crate::accelerator::DataType;
use crate::catalog::BindingCatalog;
use crate::error::{DetectionSchemaError, Result};

/// Detections kept when no threshold is configured
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;

/// Capacity of the end-to-end YOLO output tensors
pub const YOLO_MAX_DETECTIONS: usize = 100;

/// Axis-aligned box anchored at its first corner
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Build from a corner pair `[x1, y1, x2, y2]`
    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        }
    }
}

/// One decoded object
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub rect: BoundingBox,
    pub class_id: i32,
    pub confidence: f32,
}

/// What an output tensor carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Semantic {
    /// Number of valid detections, one integer
    Count,
    /// Corner pairs `[x1, y1, x2, y2]` per detection slot
    Boxes,
    /// Confidence per detection slot
    Scores,
    /// Class id per detection slot
    Labels,
}

/// Expected layout of one output tensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorSpec {
    pub semantic: Semantic,
    pub dtype: DataType,
    pub shape: Vec<usize>,
}

impl TensorSpec {
    pub fn new(semantic: Semantic, dtype: DataType, shape: &[usize]) -> Self {
        TensorSpec {
            semantic,
            dtype,
            shape: shape.to_vec(),
        }
    }

    /// Product of all dimensions, `None` on overflow
    pub fn element_count(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    /// Bytes of one host buffer for this tensor, `None` on overflow
    pub fn size_bytes(&self) -> Option<usize> {
        self.element_count()?.checked_mul(self.dtype.size_bytes())
    }
}

/// Ordered description of a detector's outputs, positional by output index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionSchema {
    specs: Vec<TensorSpec>,
    count: usize,
    boxes: usize,
    scores: usize,
    labels: usize,
    max_detections: usize,
    // Byte size per output, validated free of overflow
    sizes: Vec<usize>,
}

impl DetectionSchema {
    /// Validate a descriptor
    ///
    /// Every semantic must appear exactly once. Counts and labels are
    /// `int32`, boxes and scores `float32`; the count tensor holds one
    /// element, and boxes/labels must cover as many slots as scores. Shapes
    /// whose byte size overflows `usize` are rejected.
    pub fn new(specs: Vec<TensorSpec>) -> std::result::Result<Self, DetectionSchemaError> {
        let invalid = |msg: String| DetectionSchemaError::InvalidSchema(msg);

        let find = |semantic: Semantic| -> std::result::Result<usize, DetectionSchemaError> {
            let mut hits = specs
                .iter()
                .enumerate()
                .filter(|(_, s)| s.semantic == semantic)
                .map(|(i, _)| i);
            match (hits.next(), hits.next()) {
                (Some(i), None) => Ok(i),
                (None, _) => Err(invalid(format!("no {:?} tensor", semantic))),
                (Some(_), Some(_)) => Err(invalid(format!("duplicate {:?} tensor", semantic))),
            }
        };

        let count = find(Semantic::Count)?;
        let boxes = find(Semantic::Boxes)?;
        let scores = find(Semantic::Scores)?;
        let labels = find(Semantic::Labels)?;

        let mut sizes = Vec::with_capacity(specs.len());
        let mut counts = Vec::with_capacity(specs.len());
        for (index, spec) in specs.iter().enumerate() {
            if spec.shape.is_empty() || spec.shape.contains(&0) {
                return Err(invalid(format!("output {index} has an empty shape")));
            }
            let expected = match spec.semantic {
                Semantic::Count | Semantic::Labels => DataType::I32,
                Semantic::Boxes | Semantic::Scores => DataType::F32,
            };
            if spec.dtype != expected {
                return Err(invalid(format!(
                    "{:?} tensor must be {}, not {}",
                    spec.semantic, expected, spec.dtype
                )));
            }
            let (Some(elements), Some(bytes)) = (spec.element_count(), spec.size_bytes()) else {
                return Err(invalid(format!("output {index} size overflows")));
            };
            counts.push(elements);
            sizes.push(bytes);
        }

        if counts[count] != 1 {
            return Err(invalid("count tensor must hold one element".to_string()));
        }
        let max_detections = counts[scores];
        if max_detections.checked_mul(4) != Some(counts[boxes]) {
            return Err(invalid(format!(
                "boxes tensor must hold 4 x {max_detections} elements"
            )));
        }
        if counts[labels] != max_detections {
            return Err(invalid(format!(
                "labels tensor must hold {max_detections} elements"
            )));
        }

        Ok(DetectionSchema {
            specs,
            count,
            boxes,
            scores,
            labels,
            max_detections,
            sizes,
        })
    }

    /// End-to-end YOLO export: `num_dets [1,1]`, `bboxes [1,100,4]`,
    /// `scores [1,100]`, `labels [1,100]`
    pub fn yolo_end2end() -> Self {
        let specs = vec![
            TensorSpec::new(Semantic::Count, DataType::I32, &[1, 1]),
            TensorSpec::new(Semantic::Boxes, DataType::F32, &[1, YOLO_MAX_DETECTIONS, 4]),
            TensorSpec::new(Semantic::Scores, DataType::F32, &[1, YOLO_MAX_DETECTIONS]),
            TensorSpec::new(Semantic::Labels, DataType::I32, &[1, YOLO_MAX_DETECTIONS]),
        ];
        DetectionSchema {
            specs,
            count: 0,
            boxes: 1,
            scores: 2,
            labels: 3,
            max_detections: YOLO_MAX_DETECTIONS,
            sizes: vec![
                4,
                YOLO_MAX_DETECTIONS * 4 * 4,
                YOLO_MAX_DETECTIONS * 4,
                YOLO_MAX_DETECTIONS * 4,
            ],
        }
    }

    pub fn specs(&self) -> &[TensorSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Largest detection count the outputs can describe
    pub fn max_detections(&self) -> usize {
        self.max_detections
    }

    /// Check that a model's outputs line up with this schema
    pub fn check_catalog(
        &self,
        catalog: &BindingCatalog,
    ) -> std::result::Result<(), DetectionSchemaError> {
        if catalog.num_outputs() != self.specs.len() {
            return Err(DetectionSchemaError::OutputCount {
                expected: self.specs.len(),
                received: catalog.num_outputs(),
            });
        }

        for (index, (binding, spec)) in catalog.outputs().iter().zip(&self.specs).enumerate() {
            if binding.shape() != spec.shape.as_slice() {
                return Err(DetectionSchemaError::OutputMismatch {
                    index,
                    reason: format!(
                        "shape {:?}, expected {:?} for {:?}",
                        binding.shape(),
                        spec.shape,
                        spec.semantic
                    ),
                });
            }
            if binding.dtype() != spec.dtype {
                return Err(DetectionSchemaError::OutputMismatch {
                    index,
                    reason: format!(
                        "type {}, expected {} for {:?}",
                        binding.dtype(),
                        spec.dtype,
                        spec.semantic
                    ),
                });
            }
        }

        Ok(())
    }
}

/// Decoder settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecoderConfig {
    confidence_threshold: f32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        DecoderConfig {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

impl DecoderConfig {
    /// Scores strictly below this are dropped; a score equal to it is kept
    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Set the confidence threshold, which must lie in `[0, 1]`
    pub fn set_confidence_threshold(&mut self, threshold: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(crate::Error::InvalidArgument(format!(
                "confidence threshold {threshold} outside [0, 1]"
            )));
        }
        self.confidence_threshold = threshold;
        Ok(())
    }
}

/// Schema-driven decoder for detection outputs
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionDecoder {
    schema: DetectionSchema,
    config: DecoderConfig,
}

impl Default for DetectionDecoder {
    fn default() -> Self {
        Self::new(DetectionSchema::yolo_end2end(), DecoderConfig::default())
    }
}

impl DetectionDecoder {
    pub fn new(schema: DetectionSchema, config: DecoderConfig) -> Self {
        DetectionDecoder { schema, config }
    }

    pub fn schema(&self) -> &DetectionSchema {
        &self.schema
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn set_confidence_threshold(&mut self, threshold: f32) -> Result<()> {
        self.config.set_confidence_threshold(threshold)
    }

    /// Decode host output buffers (ordered by output index) into detections
    pub fn decode<B: AsRef<[u8]>>(&self, outputs: &[B]) -> Result<Vec<Detection>> {
        let mut detections = Vec::new();
        self.decode_into(outputs, &mut detections)?;
        Ok(detections)
    }

    /// Append detections to `detections`, returning how many were appended
    ///
    /// Detections keep their slot order. On error nothing is appended.
    pub fn decode_into<B: AsRef<[u8]>>(
        &self,
        outputs: &[B],
        detections: &mut Vec<Detection>,
    ) -> Result<usize> {
        self.check_buffers(outputs)?;

        let count_buf = outputs[self.schema.count].as_ref();
        let boxes = outputs[self.schema.boxes].as_ref();
        let scores = outputs[self.schema.scores].as_ref();
        let labels = outputs[self.schema.labels].as_ref();

        let count = read_i32(count_buf, 0);
        let max = self.schema.max_detections;
        let count = usize::try_from(count)
            .ok()
            .filter(|&c| c <= max)
            .ok_or(DetectionSchemaError::CountOutOfRange {
                count: i64::from(count),
                max,
            })?;

        let start = detections.len();
        for i in 0..count {
            let score = read_f32(scores, i);
            if score < self.config.confidence_threshold {
                continue;
            }

            let rect = BoundingBox::from_corners(
                read_f32(boxes, i * 4),
                read_f32(boxes, i * 4 + 1),
                read_f32(boxes, i * 4 + 2),
                read_f32(boxes, i * 4 + 3),
            );
            detections.push(Detection {
                rect,
                class_id: read_i32(labels, i),
                confidence: score,
            });
        }

        Ok(detections.len() - start)
    }

    fn check_buffers<B: AsRef<[u8]>>(
        &self,
        outputs: &[B],
    ) -> std::result::Result<(), DetectionSchemaError> {
        if outputs.len() != self.schema.len() {
            return Err(DetectionSchemaError::OutputCount {
                expected: self.schema.len(),
                received: outputs.len(),
            });
        }
        for (index, (buffer, &expected)) in outputs.iter().zip(&self.schema.sizes).enumerate() {
            let received = buffer.as_ref().len();
            if received != expected {
                return Err(DetectionSchemaError::BufferSize {
                    index,
                    expected,
                    received,
                });
            }
        }
        Ok(())
    }
}

fn read_f32(bytes: &[u8], index: usize) -> f32 {
    pod_read_unaligned(&bytes[index * 4..index * 4 + 4])
}

fn read_i32(bytes: &[u8], index: usize) -> i32 {
    pod_read_unaligned(&bytes[index * 4..index * 4 + 4])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::RawBinding;
    use bytemuck::cast_slice;

    struct Outputs {
        count: Vec<u8>,
        boxes: Vec<u8>,
        scores: Vec<u8>,
        labels: Vec<u8>,
    }

    impl Outputs {
        fn new(count: i32, boxes: &[[f32; 4]], scores: &[f32], labels: &[i32]) -> Self {
            let mut b = vec![0f32; YOLO_MAX_DETECTIONS * 4];
            for (i, bx) in boxes.iter().enumerate() {
                b[i * 4..i * 4 + 4].copy_from_slice(bx);
            }
            let mut s = vec![0f32; YOLO_MAX_DETECTIONS];
            s[..scores.len()].copy_from_slice(scores);
            let mut l = vec![0i32; YOLO_MAX_DETECTIONS];
            l[..labels.len()].copy_from_slice(labels);

            Outputs {
                count: cast_slice(&[count]).to_vec(),
                boxes: cast_slice(&b).to_vec(),
                scores: cast_slice(&s).to_vec(),
                labels: cast_slice(&l).to_vec(),
            }
        }

        fn buffers(&self) -> [&[u8]; 4] {
            [&self.count, &self.boxes, &self.scores, &self.labels]
        }
    }

    #[test]
    fn test_filters_low_confidence_in_slot_order() {
        let outputs = Outputs::new(
            3,
            &[
                [10.0, 20.0, 50.0, 80.0],
                [0.0, 0.0, 1.0, 1.0],
                [5.0, 6.0, 7.5, 9.0],
            ],
            &[0.9, 0.1, 0.3],
            &[2, 7, 4],
        );

        let detections = DetectionDecoder::default().decode(&outputs.buffers()).unwrap();

        assert_eq!(detections.len(), 2);
        assert_eq!(
            detections[0],
            Detection {
                rect: BoundingBox {
                    x: 10.0,
                    y: 20.0,
                    width: 40.0,
                    height: 60.0
                },
                class_id: 2,
                confidence: 0.9,
            }
        );
        assert_eq!(detections[1].class_id, 4);
        assert_eq!(detections[1].confidence, 0.3);
        assert_eq!(
            detections[1].rect,
            BoundingBox {
                x: 5.0,
                y: 6.0,
                width: 2.5,
                height: 3.0
            }
        );
    }

    #[test]
    fn test_score_equal_to_threshold_is_kept() {
        let outputs = Outputs::new(2, &[[0.0; 4], [0.0; 4]], &[0.25, 0.2499], &[1, 2]);
        let detections = DetectionDecoder::default().decode(&outputs.buffers()).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 1);
    }

    #[test]
    fn test_count_out_of_range() {
        let decoder = DetectionDecoder::default();

        let err = decoder
            .decode(&Outputs::new(101, &[], &[], &[]).buffers())
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::DetectionSchema(DetectionSchemaError::CountOutOfRange {
                count: 101,
                max: 100
            })
        ));

        let err = decoder
            .decode(&Outputs::new(-1, &[], &[], &[]).buffers())
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::DetectionSchema(DetectionSchemaError::CountOutOfRange { count: -1, .. })
        ));
    }

    #[test]
    fn test_zero_count_is_empty() {
        let outputs = Outputs::new(0, &[[1.0; 4]], &[0.99], &[3]);
        let detections = DetectionDecoder::default().decode(&outputs.buffers()).unwrap();
        assert!(detections.is_empty());
    }

    #[test]
    fn test_full_count_decodes_every_slot() {
        let scores = vec![0.5f32; YOLO_MAX_DETECTIONS];
        let labels: Vec<i32> = (0..YOLO_MAX_DETECTIONS as i32).collect();
        let outputs = Outputs::new(100, &[], &scores, &labels);
        let detections = DetectionDecoder::default().decode(&outputs.buffers()).unwrap();
        assert_eq!(detections.len(), 100);
        assert_eq!(detections[99].class_id, 99);
    }

    #[test]
    fn test_decode_into_appends() {
        let outputs = Outputs::new(1, &[[0.0, 0.0, 2.0, 2.0]], &[0.8], &[5]);
        let mut detections = vec![Detection {
            rect: BoundingBox::default(),
            class_id: -1,
            confidence: 1.0,
        }];

        let appended = DetectionDecoder::default()
            .decode_into(&outputs.buffers(), &mut detections)
            .unwrap();

        assert_eq!(appended, 1);
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].class_id, -1);
        assert_eq!(detections[1].class_id, 5);
    }

    #[test]
    fn test_wrong_buffer_size() {
        let outputs = Outputs::new(1, &[], &[0.9], &[0]);
        let short = &outputs.scores[..outputs.scores.len() - 4];
        let buffers: [&[u8]; 4] = [&outputs.count, &outputs.boxes, short, &outputs.labels];

        let err = DetectionDecoder::default().decode(&buffers).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::DetectionSchema(DetectionSchemaError::BufferSize {
                index: 2,
                expected: 400,
                received: 396
            })
        ));

        let err = DetectionDecoder::default()
            .decode(&buffers[..3])
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::DetectionSchema(DetectionSchemaError::OutputCount {
                expected: 4,
                received: 3
            })
        ));
    }

    #[test]
    fn test_custom_schema_order() {
        let schema = DetectionSchema::new(vec![
            TensorSpec::new(Semantic::Scores, DataType::F32, &[1, 2]),
            TensorSpec::new(Semantic::Labels, DataType::I32, &[1, 2]),
            TensorSpec::new(Semantic::Boxes, DataType::F32, &[1, 2, 4]),
            TensorSpec::new(Semantic::Count, DataType::I32, &[1]),
        ])
        .unwrap();
        assert_eq!(schema.max_detections(), 2);

        let scores: Vec<u8> = cast_slice(&[0.4f32, 0.7]).to_vec();
        let labels: Vec<u8> = cast_slice(&[8i32, 9]).to_vec();
        let boxes: Vec<u8> = cast_slice(&[0f32, 0.0, 1.0, 1.0, 2.0, 2.0, 4.0, 5.0]).to_vec();
        let count: Vec<u8> = cast_slice(&[2i32]).to_vec();

        let decoder = DetectionDecoder::new(schema, DecoderConfig::default());
        let detections = decoder.decode(&[scores, labels, boxes, count]).unwrap();

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[1].class_id, 9);
        assert_eq!(detections[1].rect.width, 2.0);
        assert_eq!(detections[1].rect.height, 3.0);
    }

    #[test]
    fn test_invalid_schemas() {
        let missing = DetectionSchema::new(vec![
            TensorSpec::new(Semantic::Count, DataType::I32, &[1]),
            TensorSpec::new(Semantic::Scores, DataType::F32, &[10]),
            TensorSpec::new(Semantic::Labels, DataType::I32, &[10]),
        ]);
        assert!(matches!(missing, Err(DetectionSchemaError::InvalidSchema(_))));

        let wrong_type = DetectionSchema::new(vec![
            TensorSpec::new(Semantic::Count, DataType::F32, &[1]),
            TensorSpec::new(Semantic::Boxes, DataType::F32, &[10, 4]),
            TensorSpec::new(Semantic::Scores, DataType::F32, &[10]),
            TensorSpec::new(Semantic::Labels, DataType::I32, &[10]),
        ]);
        assert!(wrong_type.is_err());

        let wrong_capacity = DetectionSchema::new(vec![
            TensorSpec::new(Semantic::Count, DataType::I32, &[1]),
            TensorSpec::new(Semantic::Boxes, DataType::F32, &[9, 4]),
            TensorSpec::new(Semantic::Scores, DataType::F32, &[10]),
            TensorSpec::new(Semantic::Labels, DataType::I32, &[10]),
        ]);
        assert!(wrong_capacity.is_err());
    }

    #[test]
    fn test_overflowing_descriptor_is_rejected() {
        let huge_scores = DetectionSchema::new(vec![
            TensorSpec::new(Semantic::Count, DataType::I32, &[1]),
            TensorSpec::new(Semantic::Boxes, DataType::F32, &[10, 4]),
            TensorSpec::new(Semantic::Scores, DataType::F32, &[usize::MAX / 2, 3]),
            TensorSpec::new(Semantic::Labels, DataType::I32, &[10]),
        ]);
        assert!(matches!(huge_scores, Err(DetectionSchemaError::InvalidSchema(_))));

        // Element count fits, byte size does not
        let huge_bytes = DetectionSchema::new(vec![
            TensorSpec::new(Semantic::Count, DataType::I32, &[1]),
            TensorSpec::new(Semantic::Boxes, DataType::F32, &[10, 4]),
            TensorSpec::new(Semantic::Scores, DataType::F32, &[usize::MAX / 2]),
            TensorSpec::new(Semantic::Labels, DataType::I32, &[10]),
        ]);
        assert!(matches!(huge_bytes, Err(DetectionSchemaError::InvalidSchema(_))));

        let spec = TensorSpec::new(Semantic::Scores, DataType::F32, &[usize::MAX / 2, 3]);
        assert_eq!(spec.element_count(), None);
        assert_eq!(spec.size_bytes(), None);
    }

    #[test]
    fn test_yolo_schema_matches_validated_form() {
        let validated = DetectionSchema::new(DetectionSchema::yolo_end2end().specs().to_vec());
        assert_eq!(validated.unwrap(), DetectionSchema::yolo_end2end());
    }

    #[test]
    fn test_check_catalog() {
        let binding = |name: &str, dims: &[i64], dtype| RawBinding {
            name: Some(name.to_string()),
            is_input: name == "images",
            dims: dims.to_vec(),
            dtype,
        };
        let catalog = BindingCatalog::from_bindings(vec![
            binding("images", &[1, 3, 640, 640], DataType::F32),
            binding("num_dets", &[1, 1], DataType::I32),
            binding("bboxes", &[1, 100, 4], DataType::F32),
            binding("scores", &[1, 100], DataType::F32),
            binding("labels", &[1, 100], DataType::I32),
        ])
        .unwrap();
        assert!(DetectionSchema::yolo_end2end().check_catalog(&catalog).is_ok());

        let catalog = BindingCatalog::from_bindings(vec![
            binding("images", &[1, 3, 640, 640], DataType::F32),
            binding("num_dets", &[1, 1], DataType::I32),
            binding("bboxes", &[1, 100, 4], DataType::F32),
            binding("scores", &[1, 50], DataType::F32),
            binding("labels", &[1, 100], DataType::I32),
        ])
        .unwrap();
        assert!(matches!(
            DetectionSchema::yolo_end2end().check_catalog(&catalog),
            Err(DetectionSchemaError::OutputMismatch { index: 2, .. })
        ));
    }

    #[test]
    fn test_threshold_setter() {
        let mut config = DecoderConfig::default();
        assert_eq!(config.confidence_threshold(), 0.25);
        config.set_confidence_threshold(0.5).unwrap();
        assert_eq!(config.confidence_threshold(), 0.5);
        assert!(config.set_confidence_threshold(1.5).is_err());
        assert!(config.set_confidence_threshold(f32::NAN).is_err());
        assert_eq!(config.confidence_threshold(), 0.5);
    }
}
