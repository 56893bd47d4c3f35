// Dataset module: inventory scan, split assignment and manifest creation
//
// Flow: scan categories -> abort on any missing directory -> partition real
// ids -> propagate to fakes -> write train/test manifests.

pub mod inventory;
pub mod manifest;
pub mod split;


use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::constants::{FAKE_FACES_FOLDER, REAL_FACES_FOLDER, TEST_MANIFEST, TRAIN_MANIFEST};
use crate::error::Result;
use crate::progress::{emit_progress, JobProgress};

pub use inventory::{scan_inventory, Inventory};
pub use manifest::{read_manifest, write_manifest, ManifestEntry};
pub use split::{SplitAssignment, UnmatchedPolicy};

/// Ground-truth authenticity of a video (0 = real, 1 = fake).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Real,
    Fake,
}

impl Label {
    pub fn as_u8(self) -> u8 {
        match self {
            Label::Real => 0,
            Label::Fake => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Label::Real),
            1 => Some(Label::Fake),
            _ => None,
        }
    }

    /// Label-specific face-crop folder name.
    pub fn faces_folder(self) -> &'static str {
        match self {
            Label::Real => REAL_FACES_FOLDER,
            Label::Fake => FAKE_FACES_FOLDER,
        }
    }
}

/// Data split of a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub fn as_str(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }

    pub fn manifest_filename(self) -> &'static str {
        match self {
            Split::Train => TRAIN_MANIFEST,
            Split::Test => TEST_MANIFEST,
        }
    }
}

/// A named category directory (`original` or a manipulation method).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Category {
    pub name: String,
    pub label: Label,
}

impl Category {
    pub fn real(name: impl Into<String>) -> Self {
        Self { name: name.into(), label: Label::Real }
    }

    pub fn fake(name: impl Into<String>) -> Self {
        Self { name: name.into(), label: Label::Fake }
    }
}

/// A discovered video. Identity is `video_id` (file stem).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRecord {
    pub path: PathBuf,
    pub label: Label,
    pub video_id: String,
    pub category: String,
}

/// Aggregate counts of one manifest creation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSummary {
    pub real_videos: usize,
    pub fake_videos: usize,
    pub train_real: usize,
    pub train_fake: usize,
    pub test_real: usize,
    pub test_fake: usize,
    /// Fakes with no real video of the same id
    pub unmatched_fakes: usize,
    /// Unmatched fakes dropped by `UnmatchedPolicy::Exclude`
    pub excluded_fakes: usize,
    pub seed: u64,
}

impl ManifestSummary {
    pub fn train_total(&self) -> usize {
        self.train_real + self.train_fake
    }

    pub fn test_total(&self) -> usize {
        self.test_real + self.test_fake
    }
}

/// Train/test manifest contents before they are written.
#[derive(Debug, Clone, Default)]
pub struct ManifestPlan {
    pub train: Vec<ManifestEntry>,
    pub test: Vec<ManifestEntry>,
    pub summary: ManifestSummary,
}

impl ManifestPlan {
    pub fn entries(&self, split: Split) -> &[ManifestEntry] {
        match split {
            Split::Train => &self.train,
            Split::Test => &self.test,
        }
    }
}

/// Build manifest contents: one record per video, reals first, then fakes in
/// category order.
pub fn plan_manifests(inventory: &Inventory, assignment: &SplitAssignment) -> ManifestPlan {
    let mut plan = ManifestPlan::default();
    plan.summary.seed = assignment.seed();

    for video in inventory.real_videos() {
        plan.summary.real_videos += 1;
        // Every scanned real id was part of the assignment
        let split = assignment.split_of_real(&video.video_id).unwrap_or(Split::Test);
        push_entry(&mut plan, split, video);
    }

    for video in inventory.fake_videos() {
        plan.summary.fake_videos += 1;
        if !assignment.has_real(&video.video_id) {
            plan.summary.unmatched_fakes += 1;
        }
        match assignment.split_for_fake(&video.video_id) {
            Some(split) => push_entry(&mut plan, split, video),
            None => {
                plan.summary.excluded_fakes += 1;
                log::debug!("Excluding unmatched fake {}", video.path.display());
            }
        }
    }

    plan
}

fn push_entry(plan: &mut ManifestPlan, split: Split, video: &VideoRecord) {
    let entry = ManifestEntry::new(video.path.clone(), video.label);
    let s = &mut plan.summary;
    match (split, video.label) {
        (Split::Train, Label::Real) => s.train_real += 1,
        (Split::Train, Label::Fake) => s.train_fake += 1,
        (Split::Test, Label::Real) => s.test_real += 1,
        (Split::Test, Label::Fake) => s.test_fake += 1,
    }
    match split {
        Split::Train => plan.train.push(entry),
        Split::Test => plan.test.push(entry),
    }
}

/// Path of a split's manifest inside `manifest_dir`.
pub fn manifest_path(manifest_dir: &Path, split: Split) -> PathBuf {
    manifest_dir.join(split.manifest_filename())
}

/// Scan, split and write both manifests.
///
/// Fails with `MissingDirectory` before any split decision when a configured
/// category directory is absent.
pub fn create_manifests(config: &PipelineConfig) -> Result<ManifestSummary> {
    config.validate()?;

    let categories = config.categories();
    emit_progress(&JobProgress::new("manifest", 0, 3).with_message("scanning categories"));
    let inventory = scan_inventory(&config.data_dir, &categories)?;
    inventory.require_complete()?;

    let real_ids: Vec<String> = inventory.real_videos().map(|v| v.video_id.clone()).collect();
    log::info!("Found {} real videos", real_ids.len());

    emit_progress(&JobProgress::new("manifest", 1, 3).with_message("assigning splits"));
    let assignment = SplitAssignment::assign(
        &real_ids,
        config.train_fraction,
        config.seed,
        config.unmatched_policy,
    )?;
    let plan = plan_manifests(&inventory, &assignment);

    emit_progress(&JobProgress::new("manifest", 2, 3).with_message("writing manifests"));
    for split in [Split::Train, Split::Test] {
        let path = manifest_path(&config.manifest_dir, split);
        let entries = plan.entries(split);
        write_manifest(&path, entries)?;
        log::info!("Saved {} entries to {}", entries.len(), path.display());
    }

    let s = &plan.summary;
    log::info!(
        "Real videos: {}, fake videos: {}, unmatched fakes: {} ({} excluded)",
        s.real_videos,
        s.fake_videos,
        s.unmatched_fakes,
        s.excluded_fakes
    );
    log::info!("Train - real: {}, fake: {}", s.train_real, s.train_fake);
    log::info!("Test  - real: {}, fake: {}", s.test_real, s.test_fake);
    emit_progress(&JobProgress::new("manifest", 3, 3).with_message("done"));

    Ok(plan.summary)
}
