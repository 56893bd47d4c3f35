// Pipeline configuration
// Loaded from an optional JSON file (camelCase keys, every key optional);
// CLI flags are applied on top by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_DATA_DIR, DEFAULT_EXTRACT_WORKERS, DEFAULT_FACES_PER_VIDEO, DEFAULT_SPLIT_SEED,
    DEFAULT_TRAIN_FRACTION, DEFAULT_VIDEO_TIMEOUT_SECS, FACES_FOLDER, FAKE_CATEGORIES,
    MANIFESTS_FOLDER, REAL_CATEGORY,
};
use crate::dataset::{Category, UnmatchedPolicy};
use crate::error::{PrepError, Result};
use crate::extract::detector::DetectorParams;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// Dataset root holding one directory per category
    pub data_dir: PathBuf,
    pub real_category: String,
    pub fake_categories: Vec<String>,
    pub manifest_dir: PathBuf,
    /// Root of the label-specific crop folders
    pub faces_dir: PathBuf,
    pub train_fraction: f64,
    /// `null` draws a seed from entropy (logged)
    pub seed: Option<u64>,
    pub unmatched_policy: UnmatchedPolicy,
    pub faces_per_video: usize,
    /// Process only the first K videos of each category
    pub videos_per_category: Option<usize>,
    pub workers: usize,
    /// 0 disables the per-video timeout
    pub video_timeout_secs: u64,
    pub detector: DetectorParams,
    pub model_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            real_category: REAL_CATEGORY.to_string(),
            fake_categories: FAKE_CATEGORIES.iter().map(|s| s.to_string()).collect(),
            manifest_dir: PathBuf::from(MANIFESTS_FOLDER),
            faces_dir: PathBuf::from(FACES_FOLDER),
            train_fraction: DEFAULT_TRAIN_FRACTION,
            seed: Some(DEFAULT_SPLIT_SEED),
            unmatched_policy: UnmatchedPolicy::default(),
            faces_per_video: DEFAULT_FACES_PER_VIDEO,
            videos_per_category: None,
            workers: DEFAULT_EXTRACT_WORKERS,
            video_timeout_secs: DEFAULT_VIDEO_TIMEOUT_SECS,
            detector: DetectorParams::default(),
            model_path: None,
        }
    }
}

impl PipelineConfig {
    /// Load a JSON config file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.train_fraction) {
            return Err(PrepError::InvalidConfig(format!(
                "trainFraction must be within [0, 1], got {}",
                self.train_fraction
            )));
        }
        if self.faces_per_video == 0 {
            return Err(PrepError::InvalidConfig("facesPerVideo must be at least 1".to_string()));
        }
        if self.workers == 0 {
            return Err(PrepError::InvalidConfig("workers must be at least 1".to_string()));
        }
        if self.real_category.is_empty() {
            return Err(PrepError::InvalidConfig("realCategory must not be empty".to_string()));
        }
        self.detector.validate()?;
        Ok(())
    }

    /// Real category first, then fake categories in configured order.
    pub fn categories(&self) -> Vec<Category> {
        std::iter::once(Category::real(&self.real_category))
            .chain(self.fake_categories.iter().map(Category::fake))
            .collect()
    }

    pub fn video_timeout(&self) -> Option<Duration> {
        if self.video_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.video_timeout_secs))
        }
    }
}
