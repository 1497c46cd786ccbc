use serde::Serialize;

/// Axis-aligned box in pixel coordinates of the source image.
///
/// Boxes handed out by the detector always satisfy
/// `x1 < x2 <= width` and `y1 < y2 <= height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn is_within(&self, width: u32, height: u32) -> bool {
        self.x1 < self.x2 && self.y1 < self.y2 && self.x2 <= width && self.y2 <= height
    }

    /// Clip a floating point box to the image frame.
    ///
    /// Coordinates are truncated toward zero like the integer conversion the
    /// upload endpoint has always used. Returns `None` when nothing of the box
    /// remains inside the frame.
    pub fn clipped(x1: f32, y1: f32, x2: f32, y2: f32, width: u32, height: u32) -> Option<Self> {
        if !(x1.is_finite() && y1.is_finite() && x2.is_finite() && y2.is_finite()) {
            return None;
        }
        let clamp = |v: f32, max: u32| v.max(0.0).min(max as f32) as u32;
        let bbox = BoundingBox {
            x1: clamp(x1.min(x2), width),
            y1: clamp(y1.min(y2), height),
            x2: clamp(x1.max(x2), width),
            y2: clamp(y1.max(y2), height),
        };
        bbox.is_within(width, height).then_some(bbox)
    }

    /// `[x1, y1, x2, y2]`, the shape used on the wire.
    pub fn to_array(&self) -> [u32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        if ix2 <= ix1 || iy2 <= iy1 {
            return 0.0;
        }
        let inter = (ix2 - ix1) as f32 * (iy2 - iy1) as f32;
        let union = self.area() as f32 + other.area() as f32 - inter;
        if union > 0.0 { inter / union } else { 0.0 }
    }
}

/// One raw detection as produced by an inference backend, already mapped
/// into source image coordinates but not yet clipped.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub class_id: usize,
    pub label: String,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Candidate {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn iou(&self, other: &Candidate) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);
        let inter = if x2 > x1 && y2 > y1 { (x2 - x1) * (y2 - y1) } else { 0.0 };
        let union = self.area() + other.area() - inter;
        if union > 0.0 { inter / union } else { 0.0 }
    }
}

/// Outcome of one successful detection.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub count: usize,
    pub boxes: Vec<BoundingBox>,
    /// Annotated JPEG, base64 encoded with the standard alphabet.
    pub annotated_image: String,
    /// Dimensions of the decoded source image.
    pub width: u32,
    pub height: u32,
}

impl DetectionResult {
    pub(crate) fn new(boxes: Vec<BoundingBox>, annotated_image: String, width: u32, height: u32) -> Self {
        Self {
            count: boxes.len(),
            boxes,
            annotated_image,
            width,
            height,
        }
    }

    pub fn box_arrays(&self) -> Vec<[u32; 4]> {
        self.boxes.iter().map(BoundingBox::to_array).collect()
    }
}
