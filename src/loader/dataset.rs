// Face-backed datasets
//
// Every index is always satisfiable: when no crop resolves, or a resolved
// file fails to decode, a grey placeholder stands in and the origin records
// why. The manifest label is returned unchanged either way.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{Rgb, RgbImage};
use ndarray::Array3;
use rand::rngs::StdRng;
use walkdir::WalkDir;

use crate::constants::{CROP_SIZE, PLACEHOLDER_RGB};
use crate::dataset::inventory::video_id;
use crate::dataset::{read_manifest, Label, ManifestEntry, Split};
use crate::error::{PrepError, Result};
use crate::extract::crop::source_tag;
use crate::loader::index::{is_image_file, CropIndex, MatchMode};
use crate::loader::transform::TransformPipeline;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceholderReason {
    /// No crop name matched the video id
    NoMatch,
    /// The label's face folder does not exist
    NoFaceDir,
    /// A matched file could not be read or decoded
    Unreadable(String),
}

/// Where a sample's pixels came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleOrigin {
    Found(PathBuf),
    Placeholder(PlaceholderReason),
}

impl SampleOrigin {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, SampleOrigin::Placeholder(_))
    }
}

#[derive(Debug, Clone)]
pub struct Sample {
    /// `[3, H, W]` normalised pixels
    pub tensor: Array3<f32>,
    pub label: Label,
    pub origin: SampleOrigin,
}

/// Snapshot of how many loads resolved to files vs. placeholders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadCounts {
    pub found: usize,
    pub placeholders: usize,
}

#[derive(Debug, Default)]
struct LoadStats {
    found: AtomicUsize,
    placeholders: AtomicUsize,
}

impl LoadStats {
    fn record(&self, origin: &SampleOrigin) {
        let counter = if origin.is_placeholder() { &self.placeholders } else { &self.found };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LoadCounts {
        LoadCounts {
            found: self.found.load(Ordering::Relaxed),
            placeholders: self.placeholders.load(Ordering::Relaxed),
        }
    }
}

/// Indexed access to labelled image samples.
pub trait SampleSource: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn label(&self, index: usize) -> Result<Label>;

    /// Load and transform sample `index`. Only an out-of-range index errors.
    fn load(&self, index: usize, rng: &mut StdRng) -> Result<Sample>;

    fn counts(&self) -> LoadCounts;
}

/// Fixed-colour stand-in at crop resolution.
pub fn placeholder_image() -> RgbImage {
    RgbImage::from_pixel(CROP_SIZE, CROP_SIZE, Rgb(PLACEHOLDER_RGB))
}

fn open_rgb(path: &Path) -> std::result::Result<RgbImage, String> {
    image::open(path).map(|img| img.to_rgb8()).map_err(|e| e.to_string())
}

fn check_index(index: usize, len: usize) -> Result<()> {
    if index >= len {
        return Err(PrepError::IndexOutOfRange { index, len });
    }
    Ok(())
}

/// Manifest-driven dataset resolving each video to a face crop.
pub struct FaceDataset {
    entries: Vec<ManifestEntry>,
    indexes: BTreeMap<Label, CropIndex>,
    transform: TransformPipeline,
    stats: LoadStats,
}

impl FaceDataset {
    pub fn from_manifest(
        manifest: &Path,
        faces_root: &Path,
        transform: TransformPipeline,
        mode: MatchMode,
    ) -> Result<Self> {
        let entries = read_manifest(manifest)?;
        log::info!("Loaded {} entries from {}", entries.len(), manifest.display());
        Self::new(entries, faces_root, transform, mode)
    }

    pub fn new(
        entries: Vec<ManifestEntry>,
        faces_root: &Path,
        transform: TransformPipeline,
        mode: MatchMode,
    ) -> Result<Self> {
        let mut indexes = BTreeMap::new();
        for label in [Label::Real, Label::Fake] {
            let index = CropIndex::build(&faces_root.join(label.faces_folder()), label, mode)?;
            indexes.insert(label, index);
        }
        Ok(Self { entries, indexes, transform, stats: LoadStats::default() })
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Resolve entry `index` to pixels without transforming.
    ///
    /// Image paths in the manifest are read directly; video paths are matched
    /// against the crop index of their label.
    pub fn resolve(&self, index: usize) -> Result<(RgbImage, SampleOrigin)> {
        check_index(index, self.entries.len())?;
        let entry = &self.entries[index];

        if is_image_file(&entry.video_path) {
            return Ok(self.read_or_placeholder(&entry.video_path));
        }

        let crops = match self.indexes.get(&entry.label) {
            Some(idx) if idx.exists() => idx,
            _ => return Ok((placeholder_image(), SampleOrigin::Placeholder(PlaceholderReason::NoFaceDir))),
        };

        let id = video_id(&entry.video_path).unwrap_or_default();
        let source = match entry.label {
            Label::Fake => entry
                .video_path
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| source_tag(&n.to_string_lossy())),
            Label::Real => None,
        };

        match crops.first(&id, source.as_deref()) {
            Some(path) => Ok(self.read_or_placeholder(path)),
            None => Ok((placeholder_image(), SampleOrigin::Placeholder(PlaceholderReason::NoMatch))),
        }
    }

    fn read_or_placeholder(&self, path: &Path) -> (RgbImage, SampleOrigin) {
        match open_rgb(path) {
            Ok(img) => (img, SampleOrigin::Found(path.to_path_buf())),
            Err(e) => {
                log::debug!("Unreadable crop {}: {}", path.display(), e);
                (placeholder_image(), SampleOrigin::Placeholder(PlaceholderReason::Unreadable(e)))
            }
        }
    }

    /// Warn once with the placeholder total, if any.
    pub fn log_summary(&self) {
        let counts = self.stats.snapshot();
        if counts.placeholders > 0 {
            log::warn!(
                "{} of {} loads used a placeholder image (no matching face crop)",
                counts.placeholders,
                counts.found + counts.placeholders
            );
        }
    }
}

impl SampleSource for FaceDataset {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn label(&self, index: usize) -> Result<Label> {
        check_index(index, self.entries.len())?;
        Ok(self.entries[index].label)
    }

    fn load(&self, index: usize, rng: &mut StdRng) -> Result<Sample> {
        let (image, origin) = self.resolve(index)?;
        if let SampleOrigin::Placeholder(reason) = &origin {
            log::debug!(
                "Placeholder for {} ({:?})",
                self.entries[index].video_path.display(),
                reason
            );
        }
        self.stats.record(&origin);
        Ok(Sample {
            tensor: self.transform.apply(image, rng),
            label: self.entries[index].label,
            origin,
        })
    }

    fn counts(&self) -> LoadCounts {
        self.stats.snapshot()
    }
}

/// Dataset over pre-sorted folders: `root/<split>/{real,fake}/*`.
pub struct FolderDataset {
    samples: Vec<(PathBuf, Label)>,
    transform: TransformPipeline,
    stats: LoadStats,
}

impl FolderDataset {
    pub fn new(root: &Path, split: Split, transform: TransformPipeline) -> Result<Self> {
        let split_dir = root.join(split.as_str());
        let mut samples = Vec::new();

        for label in [Label::Real, Label::Fake] {
            let dir = split_dir.join(label.faces_folder());
            if !dir.is_dir() {
                log::warn!("Folder not found: {}", dir.display());
                continue;
            }
            for entry in WalkDir::new(&dir)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.file_type().is_file() && is_image_file(entry.path()) {
                    samples.push((entry.into_path(), label));
                }
            }
        }

        log::info!("Found {} images under {}", samples.len(), split_dir.display());
        Ok(Self { samples, transform, stats: LoadStats::default() })
    }
}

impl SampleSource for FolderDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn label(&self, index: usize) -> Result<Label> {
        check_index(index, self.samples.len())?;
        Ok(self.samples[index].1)
    }

    fn load(&self, index: usize, rng: &mut StdRng) -> Result<Sample> {
        check_index(index, self.samples.len())?;
        let (path, label) = &self.samples[index];
        let (image, origin) = match open_rgb(path) {
            Ok(img) => (img, SampleOrigin::Found(path.clone())),
            Err(e) => {
                log::debug!("Unreadable image {}: {}", path.display(), e);
                (placeholder_image(), SampleOrigin::Placeholder(PlaceholderReason::Unreadable(e)))
            }
        };
        self.stats.record(&origin);
        Ok(Sample { tensor: self.transform.apply(image, rng), label: *label, origin })
    }

    fn counts(&self) -> LoadCounts {
        self.stats.snapshot()
    }
}
