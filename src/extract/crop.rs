// Face crop geometry, naming and output

use std::path::Path;
use std::sync::OnceLock;

use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbImage};
use regex::Regex;

use crate::constants::{CROP_FORMAT, CROP_FRAME_DIGITS, CROP_SIZE, CROP_SOURCE_SEPARATOR};
use crate::dataset::Label;
use crate::error::Result;
use crate::extract::detector::FaceBox;

/// Pixel region inside a frame, always non-empty and in bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Grow a face box by `padding` on every side and clamp it to the frame.
/// Returns `None` when nothing of the box lies inside the frame.
pub fn padded_region(face: &FaceBox, frame_width: u32, frame_height: u32, padding: i64) -> Option<CropRegion> {
    let x1 = (face.x - padding).max(0);
    let y1 = (face.y - padding).max(0);
    let x2 = (face.x + face.width + padding).min(frame_width as i64);
    let y2 = (face.y + face.height + padding).min(frame_height as i64);

    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    Some(CropRegion {
        x: x1 as u32,
        y: y1 as u32,
        width: (x2 - x1) as u32,
        height: (y2 - y1) as u32,
    })
}

/// Cut `region` out of the frame and resize it to the square crop size.
/// The aspect ratio is not preserved.
pub fn crop_face(frame: &RgbImage, region: &CropRegion) -> RgbImage {
    let sub = imageops::crop_imm(frame, region.x, region.y, region.width, region.height).to_image();
    imageops::resize(&sub, CROP_SIZE, CROP_SIZE, FilterType::Triangle)
}

/// Write a crop as JPEG via a temp file and rename.
pub fn save_crop(image: &RgbImage, path: &Path) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.tmp", file_name));

    if let Err(e) = image.save_with_format(&temp_path, ImageFormat::Jpeg) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e.into());
    }
    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

/// Parsed form of a crop file name:
/// `<video_id>[__<source>]_frame<NNNN>_face<i>.jpg`.
///
/// `source` is the manipulation method for fake crops, which keeps crops of
/// same-id fakes from different methods apart in the shared fake folder.
/// Real crops never carry one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CropName {
    pub video_id: String,
    pub source: Option<String>,
    pub frame: u64,
    pub face: usize,
}

fn tagged_name_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<id>.+?)(?:__(?P<src>[A-Za-z0-9]+))?_frame(?P<frame>\d+)_face(?P<face>\d+)\.(?i:jpe?g)$").ok()
    })
    .as_ref()
}

fn plain_name_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<id>.+)_frame(?P<frame>\d+)_face(?P<face>\d+)\.(?i:jpe?g)$").ok())
        .as_ref()
}

/// Source tag used in crop names for a fake category. Only ASCII
/// alphanumerics survive so the tag never collides with the separators.
pub fn source_tag(category: &str) -> String {
    category.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

impl CropName {
    pub fn new(video_id: impl Into<String>, source: Option<&str>, frame: u64, face: usize) -> Self {
        Self {
            video_id: video_id.into(),
            source: source.map(|s| s.to_string()),
            frame,
            face,
        }
    }

    pub fn file_name(&self) -> String {
        let source = match &self.source {
            Some(s) => format!("{}{}", CROP_SOURCE_SEPARATOR, s),
            None => String::new(),
        };
        format!(
            "{}{}_frame{:0width$}_face{}.{}",
            self.video_id,
            source,
            self.frame,
            self.face,
            CROP_FORMAT,
            width = CROP_FRAME_DIGITS
        )
    }

    /// Parse a crop name found in the face folder of `label`.
    pub fn parse(file_name: &str, label: Label) -> Option<Self> {
        let re = match label {
            Label::Fake => tagged_name_regex()?,
            Label::Real => plain_name_regex()?,
        };
        let caps = re.captures(file_name)?;
        Some(Self {
            video_id: caps.name("id")?.as_str().to_string(),
            source: caps.name("src").map(|m| m.as_str().to_string()),
            frame: caps.name("frame")?.as_str().parse().ok()?,
            face: caps.name("face")?.as_str().parse().ok()?,
        })
    }
}
