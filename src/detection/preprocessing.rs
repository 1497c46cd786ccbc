use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

/// Grey used by YOLO exporters for letterbox padding.
const PAD_VALUE: u8 = 114;

/// Scale and padding applied when fitting an image into the square model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    pub fn for_image(width: u32, height: u32, input_size: u32) -> Self {
        let scale = (input_size as f32 / width as f32).min(input_size as f32 / height as f32);
        let scaled_w = (width as f32 * scale).round();
        let scaled_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((input_size as f32 - scaled_w) / 2.0).floor(),
            pad_y: ((input_size as f32 - scaled_h) / 2.0).floor(),
        }
    }

    /// Map a point from model input space back to source image space.
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Resize into a padded square canvas while keeping the aspect ratio.
pub fn letterbox(img: &RgbImage, input_size: u32) -> (RgbImage, Letterbox) {
    let (width, height) = img.dimensions();
    let lb = Letterbox::for_image(width, height, input_size);
    let scaled_w = ((width as f32 * lb.scale).round() as u32).clamp(1, input_size);
    let scaled_h = ((height as f32 * lb.scale).round() as u32).clamp(1, input_size);

    let resized = imageops::resize(img, scaled_w, scaled_h, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(input_size, input_size, Rgb([PAD_VALUE; 3]));
    imageops::overlay(&mut canvas, &resized, lb.pad_x as i64, lb.pad_y as i64);

    (canvas, lb)
}

/// Planar CHW float data normalised to `[0, 1]`.
pub fn to_chw(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; plane * 3];
    for (x, y, pixel) in img.enumerate_pixels() {
        let idx = (y * width + x) as usize;
        for c in 0..3 {
            data[c * plane + idx] = pixel[c] as f32 / 255.0;
        }
    }
    data
}
