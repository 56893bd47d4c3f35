// Face detection backends
//
// Detection runs on a grayscale copy of each sampled frame. The default
// backend is rustface (SeetaFace funnel cascade, pure Rust); the `opencv`
// feature adds a Haar cascade backend using the classic parameters.

use std::path::Path;
use std::sync::Arc;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DETECT_MIN_NEIGHBORS, DETECT_MIN_SIZE, DETECT_SCALE_FACTOR, DETECT_SCORE_THRESHOLD,
    DETECT_WINDOW_STEP,
};
use crate::error::{PrepError, Result};

/// Axis-aligned face box in frame pixel coordinates. May extend past the
/// frame edge; cropping clamps it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceBox {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl FaceBox {
    pub fn new(x: i64, y: i64, width: i64, height: i64) -> Self {
        Self { x, y, width, height }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectorParams {
    /// Pyramid step between detection scales (> 1.0)
    pub scale_factor: f64,
    /// Neighbour votes required per detection (Haar backend)
    pub min_neighbors: u32,
    /// Smallest face side in pixels
    pub min_size: u32,
    /// Classifier score threshold (rustface backend)
    pub score_threshold: f64,
    /// Sliding window step in pixels (rustface backend)
    pub window_step: u32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            scale_factor: DETECT_SCALE_FACTOR,
            min_neighbors: DETECT_MIN_NEIGHBORS,
            min_size: DETECT_MIN_SIZE,
            score_threshold: DETECT_SCORE_THRESHOLD,
            window_step: DETECT_WINDOW_STEP,
        }
    }
}

impl DetectorParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.scale_factor > 1.0 && self.scale_factor < 100.0) {
            return Err(PrepError::InvalidConfig(format!(
                "detector.scaleFactor must be greater than 1.0, got {}",
                self.scale_factor
            )));
        }
        if self.min_size == 0 {
            return Err(PrepError::InvalidConfig("detector.minSize must be at least 1".to_string()));
        }
        if self.score_threshold <= 0.0 {
            return Err(PrepError::InvalidConfig(
                "detector.scoreThreshold must be positive".to_string(),
            ));
        }
        if self.window_step == 0 {
            return Err(PrepError::InvalidConfig(
                "detector.windowStep must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Finds face boxes in a grayscale frame.
///
/// Implementations hold mutable model state and are not required to be
/// `Send`; each extraction worker builds its own through a [`DetectorFactory`].
pub trait FaceDetector {
    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<FaceBox>>;
}

/// Builds one detector per worker.
pub type DetectorFactory = Arc<dyn Fn() -> Result<Box<dyn FaceDetector>> + Send + Sync>;

/// Factory for the rustface backend loading `model_path` on every call.
pub fn rustface_factory(model_path: &Path, params: &DetectorParams) -> DetectorFactory {
    let model_path = model_path.to_path_buf();
    let params = params.clone();
    Arc::new(move || -> Result<Box<dyn FaceDetector>> {
        let detector = RustfaceDetector::load(&model_path, &params)?;
        Ok(Box::new(detector) as Box<dyn FaceDetector>)
    })
}

// rustface refuses min face sizes below 20 and pyramid factors outside (0, 1)
const RUSTFACE_MIN_FACE: u32 = 20;

pub struct RustfaceDetector {
    inner: Box<dyn rustface::Detector>,
}

impl RustfaceDetector {
    pub fn load(model_path: &Path, params: &DetectorParams) -> Result<Self> {
        params.validate()?;
        let path_str = model_path.to_str().ok_or_else(|| {
            PrepError::Detector(format!("model path is not UTF-8: {}", model_path.display()))
        })?;
        if !model_path.exists() {
            return Err(PrepError::Detector(format!(
                "face model not found: {}",
                model_path.display()
            )));
        }

        let mut inner = rustface::create_detector(path_str)
            .map_err(|e| PrepError::Detector(format!("failed to load {}: {}", path_str, e)))?;

        inner.set_min_face_size(params.min_size.max(RUSTFACE_MIN_FACE));
        inner.set_score_thresh(params.score_threshold);
        let pyramid = (1.0 / params.scale_factor).clamp(0.01, 0.99) as f32;
        inner.set_pyramid_scale_factor(pyramid);
        inner.set_slide_window_step(params.window_step, params.window_step);

        log::debug!("Loaded rustface model {}", model_path.display());
        Ok(Self { inner })
    }
}

impl FaceDetector for RustfaceDetector {
    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<FaceBox>> {
        let (width, height) = frame.dimensions();
        if width < RUSTFACE_MIN_FACE || height < RUSTFACE_MIN_FACE {
            return Ok(Vec::new());
        }

        let mut data = rustface::ImageData::new(frame.as_raw(), width, height);
        let faces = self
            .inner
            .detect(&mut data)
            .into_iter()
            .map(|face| {
                let bbox = face.bbox();
                FaceBox::new(
                    bbox.x() as i64,
                    bbox.y() as i64,
                    bbox.width() as i64,
                    bbox.height() as i64,
                )
            })
            .collect();
        Ok(faces)
    }
}

#[cfg(feature = "opencv")]
pub use haar::{haar_factory, HaarCascadeDetector};

#[cfg(feature = "opencv")]
mod haar {
    use super::*;
    use opencv::core::{Mat, Rect, Size, Vector};
    use opencv::objdetect::CascadeClassifier;
    use opencv::prelude::*;

    fn cv_err(e: opencv::Error) -> PrepError {
        PrepError::Detector(e.to_string())
    }

    /// Factory for the Haar cascade backend.
    pub fn haar_factory(cascade_path: &Path, params: &DetectorParams) -> DetectorFactory {
        let cascade_path = cascade_path.to_path_buf();
        let params = params.clone();
        Arc::new(move || -> Result<Box<dyn FaceDetector>> {
            let detector = HaarCascadeDetector::load(&cascade_path, &params)?;
            Ok(Box::new(detector) as Box<dyn FaceDetector>)
        })
    }

    pub struct HaarCascadeDetector {
        cascade: CascadeClassifier,
        params: DetectorParams,
    }

    impl HaarCascadeDetector {
        pub fn load(cascade_path: &Path, params: &DetectorParams) -> Result<Self> {
            params.validate()?;
            let path_str = cascade_path.to_str().ok_or_else(|| {
                PrepError::Detector(format!("cascade path is not UTF-8: {}", cascade_path.display()))
            })?;
            let cascade = CascadeClassifier::new(path_str).map_err(cv_err)?;
            if cascade.empty().map_err(cv_err)? {
                return Err(PrepError::Detector(format!("empty cascade: {}", path_str)));
            }
            Ok(Self { cascade, params: params.clone() })
        }
    }

    impl FaceDetector for HaarCascadeDetector {
        fn detect(&mut self, frame: &GrayImage) -> Result<Vec<FaceBox>> {
            let (width, height) = frame.dimensions();
            if width == 0 || height == 0 {
                return Ok(Vec::new());
            }
            let flat = Mat::new_rows_cols_with_data(height as i32, width as i32, frame.as_raw())
                .map_err(cv_err)?;

            let min = self.params.min_size as i32;
            let mut faces = Vector::<Rect>::new();
            self.cascade
                .detect_multi_scale(
                    &*flat,
                    &mut faces,
                    self.params.scale_factor,
                    self.params.min_neighbors as i32,
                    0,
                    Size::new(min, min),
                    Size::new(0, 0),
                )
                .map_err(cv_err)?;

            Ok(faces
                .iter()
                .map(|r| FaceBox::new(r.x as i64, r.y as i64, r.width as i64, r.height as i64))
                .collect())
        }
    }
}
