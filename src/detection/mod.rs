pub mod annotate;
pub mod model;
pub mod postprocess;
pub mod preprocessing;

use std::io::{Cursor, ErrorKind};
use std::path::Path;
use std::sync::Arc;

use image::{DynamicImage, ImageReader, RgbImage};
use serde::Deserialize;

use crate::error::DetectError;
use crate::models::{BoundingBox, DetectionResult};
use annotate::LabelFont;
use model::InferenceBackend;

pub const DEFAULT_TARGET_CLASS: &str = "book";

/// Order in which accepted boxes are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxOrder {
    /// Whatever order the inference pass produced.
    #[default]
    Inference,
    /// Top to bottom, then left to right.
    TopLeft,
}

impl std::str::FromStr for BoxOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inference" => Ok(BoxOrder::Inference),
            "top_left" => Ok(BoxOrder::TopLeft),
            other => Err(format!("unknown box order '{other}'")),
        }
    }
}

/// Finds books in a single image and renders them.
///
/// Holds only the shared inference backend and immutable parameters, so one
/// detector serves any number of concurrent calls.
pub struct Detector {
    backend: Arc<dyn InferenceBackend>,
    font: Option<LabelFont>,
    pub target_class: String,
    /// Candidates below this confidence are dropped even if the backend
    /// returned them.
    pub confidence_threshold: f32,
    pub jpeg_quality: u8,
    pub box_order: BoxOrder,
}

impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector")
            .field("target_class", &self.target_class)
            .field("confidence_threshold", &self.confidence_threshold)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("box_order", &self.box_order)
            .field("font", &self.font)
            .finish()
    }
}

impl Detector {
    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self {
            backend,
            font: None,
            target_class: DEFAULT_TARGET_CLASS.to_string(),
            confidence_threshold: 0.25,
            jpeg_quality: 90,
            box_order: BoxOrder::Inference,
        }
    }

    pub fn with_target_class(mut self, class: impl Into<String>) -> Self {
        self.target_class = class.into();
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn with_box_order(mut self, order: BoxOrder) -> Self {
        self.box_order = order;
        self
    }

    pub fn with_font(mut self, font: Option<LabelFont>) -> Self {
        self.font = font;
        self
    }

    /// Whether the backend can emit the target class at all.
    pub fn supports_target_class(&self) -> bool {
        self.backend.labels().iter().any(|l| l == &self.target_class)
    }

    /// Detect books in the image at `image_path`.
    pub fn detect<P: AsRef<Path>>(&self, image_path: P) -> Result<DetectionResult, DetectError> {
        let path = image_path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => DetectError::ImageNotFound(path.to_path_buf()),
            _ if !path.exists() => DetectError::ImageNotFound(path.to_path_buf()),
            _ => DetectError::ImageDecode(format!("{}: {}", path.display(), e)),
        })?;
        self.detect_bytes(&bytes)
    }

    /// Detect books in an encoded image held in memory.
    pub fn detect_bytes(&self, bytes: &[u8]) -> Result<DetectionResult, DetectError> {
        let image = decode(bytes)?.to_rgb8();
        let (width, height) = image.dimensions();

        let boxes = self.find_boxes(&image)?;
        tracing::debug!(
            width,
            height,
            count = boxes.len(),
            target = %self.target_class,
            "Detection finished"
        );

        let annotated = annotate::annotate(&image, &boxes, &self.target_class, self.font.as_ref());
        let encoded = annotate::encode_jpeg_base64(&annotated, self.jpeg_quality)?;

        Ok(DetectionResult::new(boxes, encoded, width, height))
    }

    /// Run inference and keep the in-frame boxes of the target class.
    pub fn find_boxes(&self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectError> {
        let (width, height) = image.dimensions();
        let candidates = self.backend.infer(image)?;
        let total = candidates.len();

        let mut boxes: Vec<BoundingBox> = candidates
            .into_iter()
            .filter(|c| c.label == self.target_class)
            .filter(|c| c.confidence >= self.confidence_threshold)
            .filter_map(|c| BoundingBox::clipped(c.x1, c.y1, c.x2, c.y2, width, height))
            .collect();

        if boxes.len() < total {
            tracing::trace!(kept = boxes.len(), total, "Filtered candidates");
        }

        if self.box_order == BoxOrder::TopLeft {
            boxes.sort_by_key(|b| (b.y1, b.x1));
        }
        Ok(boxes)
    }
}

fn decode(bytes: &[u8]) -> Result<DynamicImage, DetectError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| DetectError::ImageDecode(e.to_string()))?
        .decode()
        .map_err(|e| DetectError::ImageDecode(e.to_string()))
}

/// Where an image came from, for the event log.
pub fn source_ref(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
