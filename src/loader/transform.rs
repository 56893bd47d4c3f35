// Image transforms applied before a sample reaches the training boundary
//
// Ops work on RgbImage; the pipeline ends by converting to a normalised
// CHW f32 tensor. Random ops draw from the caller's rng so a seeded loader
// reproduces its augmentations.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::Rng;

use crate::constants::{CROP_SIZE, NORMALIZE_MEAN, NORMALIZE_STD};

pub trait ImageOp: Send + Sync {
    fn apply(&self, image: RgbImage, rng: &mut StdRng) -> RgbImage;

    fn name(&self) -> &'static str;
}

/// Resize to a fixed square size (aspect ratio not preserved).
#[derive(Debug, Clone)]
pub struct Resize {
    pub size: u32,
}

impl ImageOp for Resize {
    fn apply(&self, image: RgbImage, _rng: &mut StdRng) -> RgbImage {
        if image.dimensions() == (self.size, self.size) {
            return image;
        }
        imageops::resize(&image, self.size, self.size, FilterType::Triangle)
    }

    fn name(&self) -> &'static str {
        "resize"
    }
}

#[derive(Debug, Clone)]
pub struct RandomHorizontalFlip {
    pub probability: f64,
}

impl ImageOp for RandomHorizontalFlip {
    fn apply(&self, image: RgbImage, rng: &mut StdRng) -> RgbImage {
        if rng.gen_bool(self.probability.clamp(0.0, 1.0)) {
            imageops::flip_horizontal(&image)
        } else {
            image
        }
    }

    fn name(&self) -> &'static str {
        "hflip"
    }
}

/// Rotation about the centre by an angle drawn uniformly from
/// `[-degrees, degrees]`. Corners uncovered by the rotation are black.
#[derive(Debug, Clone)]
pub struct RandomRotation {
    pub degrees: f32,
}

impl ImageOp for RandomRotation {
    fn apply(&self, image: RgbImage, rng: &mut StdRng) -> RgbImage {
        if self.degrees <= 0.0 {
            return image;
        }
        let angle = rng.gen_range(-self.degrees..=self.degrees);
        rotate_about_center(&image, angle.to_radians(), Interpolation::Bilinear, Rgb([0, 0, 0]))
    }

    fn name(&self) -> &'static str {
        "rotation"
    }
}

/// Random brightness and contrast scaling. Factors are drawn uniformly
/// from `[1 - x, 1 + x]`.
#[derive(Debug, Clone)]
pub struct ColorJitter {
    pub brightness: f32,
    pub contrast: f32,
}

impl ImageOp for ColorJitter {
    fn apply(&self, mut image: RgbImage, rng: &mut StdRng) -> RgbImage {
        let b = jitter_factor(self.brightness, rng);
        let c = jitter_factor(self.contrast, rng);

        for px in image.pixels_mut() {
            for ch in px.0.iter_mut() {
                *ch = (*ch as f32 * b).round().clamp(0.0, 255.0) as u8;
            }
        }

        // Contrast blends towards the mean grey level
        let gray = imageops::grayscale(&image);
        let pixels = (gray.width() as f32 * gray.height() as f32).max(1.0);
        let mean = gray.pixels().map(|p| p.0[0] as f32).sum::<f32>() / pixels;
        for px in image.pixels_mut() {
            for ch in px.0.iter_mut() {
                *ch = ((*ch as f32 - mean) * c + mean).round().clamp(0.0, 255.0) as u8;
            }
        }
        image
    }

    fn name(&self) -> &'static str {
        "color_jitter"
    }
}

fn jitter_factor(amount: f32, rng: &mut StdRng) -> f32 {
    if amount <= 0.0 {
        return 1.0;
    }
    rng.gen_range((1.0 - amount).max(0.0)..=(1.0 + amount))
}

/// Ordered image ops followed by tensor conversion and normalisation.
pub struct TransformPipeline {
    ops: Vec<Box<dyn ImageOp>>,
    mean: [f32; 3],
    std: [f32; 3],
}

impl TransformPipeline {
    pub fn new(ops: Vec<Box<dyn ImageOp>>) -> Self {
        Self { ops, mean: NORMALIZE_MEAN, std: NORMALIZE_STD }
    }

    /// Resize, random flip, rotation within 10 degrees, brightness/contrast
    /// jitter, ImageNet normalisation.
    pub fn train_default() -> Self {
        Self::new(vec![
            Box::new(Resize { size: CROP_SIZE }),
            Box::new(RandomHorizontalFlip { probability: 0.5 }),
            Box::new(RandomRotation { degrees: 10.0 }),
            Box::new(ColorJitter { brightness: 0.2, contrast: 0.2 }),
        ])
    }

    /// Resize and ImageNet normalisation only.
    pub fn eval_default() -> Self {
        Self::new(vec![Box::new(Resize { size: CROP_SIZE })])
    }

    pub fn op_names(&self) -> Vec<&'static str> {
        self.ops.iter().map(|op| op.name()).collect()
    }

    pub fn apply(&self, image: RgbImage, rng: &mut StdRng) -> Array3<f32> {
        let image = self.ops.iter().fold(image, |img, op| op.apply(img, rng));
        to_tensor(&image, &self.mean, &self.std)
    }
}

/// Convert to a `[3, H, W]` tensor of `(x / 255 - mean) / std`.
pub fn to_tensor(image: &RgbImage, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut tensor = Array3::<f32>::zeros((3, height as usize, width as usize));
    for (x, y, Rgb(px)) in image.enumerate_pixels() {
        for c in 0..3 {
            tensor[[c, y as usize, x as usize]] = (px[c] as f32 / 255.0 - mean[c]) / std[c];
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_eval_pipeline_shape_and_values() {
        let img = RgbImage::from_pixel(50, 80, Rgb([255, 0, 128]));
        let mut rng = StdRng::seed_from_u64(1);
        let t = TransformPipeline::eval_default().apply(img, &mut rng);
        assert_eq!(t.shape(), &[3, CROP_SIZE as usize, CROP_SIZE as usize]);
        let expected_r = (1.0 - NORMALIZE_MEAN[0]) / NORMALIZE_STD[0];
        assert!((t[[0, 10, 10]] - expected_r).abs() < 0.02);
        let expected_g = (0.0 - NORMALIZE_MEAN[1]) / NORMALIZE_STD[1];
        assert!((t[[1, 100, 100]] - expected_g).abs() < 1e-4);
    }

    #[test]
    fn test_flip_always_and_never() {
        let mut img = RgbImage::from_pixel(4, 1, Rgb([0, 0, 0]));
        img.put_pixel(0, 0, Rgb([255, 255, 255]));
        let mut rng = StdRng::seed_from_u64(7);

        let flipped = RandomHorizontalFlip { probability: 1.0 }.apply(img.clone(), &mut rng);
        assert_eq!(flipped.get_pixel(3, 0), &Rgb([255, 255, 255]));

        let kept = RandomHorizontalFlip { probability: 0.0 }.apply(img, &mut rng);
        assert_eq!(kept.get_pixel(0, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_train_pipeline_is_seed_reproducible() {
        let mut img = RgbImage::new(64, 64);
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = Rgb([(x * 4) as u8, (y * 4) as u8, 90]);
        }
        let pipeline = TransformPipeline::train_default();
        let a = pipeline.apply(img.clone(), &mut StdRng::seed_from_u64(99));
        let b = pipeline.apply(img, &mut StdRng::seed_from_u64(99));
        assert_eq!(a, b);
        assert_eq!(pipeline.op_names(), vec!["resize", "hflip", "rotation", "color_jitter"]);
    }

    #[test]
    fn test_zero_jitter_is_identity() {
        let img = RgbImage::from_pixel(3, 3, Rgb([10, 100, 200]));
        let out = ColorJitter { brightness: 0.0, contrast: 0.0 }.apply(img.clone(), &mut StdRng::seed_from_u64(0));
        assert_eq!(out, img);
    }

    #[test]
    fn test_rotation_reproducible_and_zero_is_identity() {
        let mut img = RgbImage::new(32, 32);
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = Rgb([(x * 8) as u8, (y * 8) as u8, 40]);
        }

        let rotate = RandomRotation { degrees: 10.0 };
        let a = rotate.apply(img.clone(), &mut StdRng::seed_from_u64(5));
        let b = rotate.apply(img.clone(), &mut StdRng::seed_from_u64(5));
        assert_eq!(a, b);
        assert_eq!(a.dimensions(), (32, 32));

        let still = RandomRotation { degrees: 0.0 }.apply(img.clone(), &mut StdRng::seed_from_u64(5));
        assert_eq!(still, img);
    }
}
