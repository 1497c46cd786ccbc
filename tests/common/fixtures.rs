use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use image::{ImageBuffer, Rgb, RgbImage};
use shelfscan::{Candidate, DetectError, Detector, EventStore, InferenceBackend, ShelfService};
use tempfile::{NamedTempFile, TempDir};

/// Backend that answers every call with the same candidates.
pub struct FixedBackend {
    candidates: Vec<Candidate>,
    labels: Vec<String>,
    delay: Option<Duration>,
    fail: bool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FixedBackend {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self {
            candidates,
            labels: vec!["person".to_string(), "book".to_string(), "vase".to_string()],
            delay: None,
            fail: false,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every call with an inference error.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most calls ever running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

impl InferenceBackend for FixedBackend {
    fn infer(&self, _image: &RgbImage) -> Result<Vec<Candidate>, DetectError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail {
            return Err(DetectError::Inference("scripted failure".to_string()));
        }
        Ok(self.candidates.clone())
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }
}

pub fn candidate(label: &str, confidence: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> Candidate {
    Candidate {
        class_id: match label {
            "person" => 0,
            "book" => 1,
            _ => 2,
        },
        label: label.to_string(),
        confidence,
        x1,
        y1,
        x2,
        y2,
    }
}

/// Three clearly separated books and one distractor on a 200x120 shelf.
pub fn three_books() -> Vec<Candidate> {
    vec![
        candidate("book", 0.91, 10.0, 20.0, 40.0, 110.0),
        candidate("book", 0.84, 60.0, 25.0, 95.0, 110.0),
        candidate("vase", 0.77, 100.0, 40.0, 130.0, 110.0),
        candidate("book", 0.66, 140.0, 15.0, 185.0, 110.0),
    ]
}

pub fn shelf_image(width: u32, height: u32) -> RgbImage {
    ImageBuffer::from_fn(width, height, |x, _| {
        if x % 50 < 35 {
            Rgb([120u8, 80u8, 40u8])
        } else {
            Rgb([230u8, 220u8, 200u8])
        }
    })
}

/// Writes a shelf image to a temp file with the given extension.
/// The file will be automatically cleaned up when dropped.
pub fn create_test_image(width: u32, height: u32, suffix: &str) -> NamedTempFile {
    let file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("Failed to create temp image file");
    shelf_image(width, height)
        .save(file.path())
        .expect("Failed to save test image");
    file
}

pub fn encode_jpeg(image: &RgbImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, 90)
        .encode_image(image)
        .expect("Failed to encode test jpeg");
    bytes
}

/// A JPEG cut off inside its header tables. Still sniffs as JPEG.
pub fn create_truncated_jpeg(dir: &Path) -> PathBuf {
    let bytes = encode_jpeg(&shelf_image(200, 120));
    let path = dir.join("truncated.jpg");
    std::fs::write(&path, &bytes[..64]).expect("Failed to write truncated jpeg");
    path
}

/// Opens an event store in a fresh temp directory (which must be kept alive).
pub async fn create_test_store() -> (EventStore, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp directory");
    let store = EventStore::open(dir.path().join("bookshelf.db"))
        .await
        .expect("Failed to open test store");
    (store, dir)
}

/// Service over `backend` with a temp store and uploads directory.
pub async fn create_test_service(
    backend: Arc<FixedBackend>,
    workers: usize,
    timeout: Duration,
) -> (ShelfService, TempDir) {
    let (store, dir) = create_test_store().await;
    let detector = Detector::new(backend);
    let service = ShelfService::new(Arc::new(detector), store, workers, timeout, dir.path().join("uploads"));
    (service, dir)
}
