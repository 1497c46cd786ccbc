use std::path::{Path, PathBuf};

use image::RgbImage;
use rten::Model;
use rten_tensor::NdTensor;
use rten_tensor::prelude::*;

use crate::detection::postprocess::{self, DecodeParams};
use crate::detection::preprocessing::{self, Letterbox};
use crate::error::{DetectError, ModelLoadError};
use crate::models::Candidate;

/// Anything that can turn an RGB image into class-labelled candidates in
/// source image coordinates.
///
/// Implementations must be safe to call from several threads at once.
pub trait InferenceBackend: Send + Sync {
    fn infer(&self, image: &RgbImage) -> Result<Vec<Candidate>, DetectError>;

    /// Class names the backend can emit, indexed by class id.
    fn labels(&self) -> &[String];
}

/// The 80 COCO classes, in the order YOLO models are trained on.
pub const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// Options for [`ModelHandle::load_with`].
#[derive(Debug, Clone)]
pub struct ModelOptions {
    /// Side of the square model input, in pixels.
    pub input_size: u32,
    /// Newline separated class names. COCO names are used when absent.
    pub labels_path: Option<PathBuf>,
    pub decode: DecodeParams,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            input_size: 640,
            labels_path: None,
            decode: DecodeParams::default(),
        }
    }
}

/// A loaded YOLO detector. Immutable after load and shared by every request.
pub struct ModelHandle {
    model: Model,
    path: PathBuf,
    labels: Vec<String>,
    input_size: u32,
    decode: DecodeParams,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("path", &self.path)
            .field("labels", &self.labels.len())
            .field("input_size", &self.input_size)
            .finish()
    }
}

impl ModelHandle {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ModelLoadError> {
        Self::load_with(path, ModelOptions::default())
    }

    pub fn load_with<P: AsRef<Path>>(path: P, options: ModelOptions) -> Result<Self, ModelLoadError> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(ModelLoadError::NotFound(path));
        }

        let labels = match &options.labels_path {
            Some(labels_path) => read_labels(labels_path)?,
            None => COCO_LABELS.iter().map(|s| s.to_string()).collect(),
        };

        let model = Model::load_file(&path).map_err(|e| ModelLoadError::Runtime {
            path: path.clone(),
            message: e.to_string(),
        })?;

        tracing::info!(
            path = %path.display(),
            labels = labels.len(),
            input_size = options.input_size,
            "Detection model loaded"
        );

        Ok(Self {
            model,
            path,
            labels,
            input_size: options.input_size,
            decode: options.decode,
        })
    }
}

impl InferenceBackend for ModelHandle {
    fn infer(&self, image: &RgbImage) -> Result<Vec<Candidate>, DetectError> {
        let (canvas, letterbox) = preprocessing::letterbox(image, self.input_size);
        let size = self.input_size as usize;
        let input = NdTensor::from_data([1, 3, size, size], preprocessing::to_chw(&canvas));

        let output = self
            .model
            .run_one(input.view().into(), None)
            .map_err(|e| DetectError::Inference(e.to_string()))?;
        let output = NdTensor::<f32, 3>::try_from(output)
            .map_err(|e| DetectError::Inference(format!("unexpected output tensor: {e}")))?;

        candidates_from_output(output, &self.labels, &letterbox, &self.decode)
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }
}

/// Decode a `[1, 4 + classes, anchors]` head into source image candidates.
fn candidates_from_output(
    output: NdTensor<f32, 3>,
    labels: &[String],
    letterbox: &Letterbox,
    params: &DecodeParams,
) -> Result<Vec<Candidate>, DetectError> {
    let (batch, rows, anchors) = (output.size(0), output.size(1), output.size(2));
    if batch != 1 || rows <= 4 {
        return Err(DetectError::Inference(format!(
            "expected [1, 4 + classes, anchors] output, got [{batch}, {rows}, {anchors}]"
        )));
    }
    if rows - 4 != labels.len() {
        tracing::warn!(
            model_classes = rows - 4,
            labels = labels.len(),
            "Model class count does not match label list"
        );
    }

    let data = output.to_vec();
    Ok(postprocess::decode_yolo(&data, rows, anchors, labels, letterbox, params))
}

fn read_labels(path: &Path) -> Result<Vec<String>, ModelLoadError> {
    let content = std::fs::read_to_string(path).map_err(|e| ModelLoadError::Labels {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let labels: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    if labels.is_empty() {
        return Err(ModelLoadError::Labels {
            path: path.to_path_buf(),
            message: "no labels found".to_string(),
        });
    }
    Ok(labels)
}
