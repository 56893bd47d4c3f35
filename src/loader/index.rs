// Crop index: video id -> crop files of one label folder
//
// Built once per dataset from a single directory listing. Names are kept
// sorted so the first match is the same on every platform.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::constants::{CROP_SOURCE_SEPARATOR, IMAGE_EXTENSIONS};
use crate::dataset::Label;
use crate::error::{PrepError, Result};
use crate::extract::crop::CropName;

/// How a manifest entry's video id is matched against crop file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// File name contains the video id anywhere
    #[default]
    Substring,
    /// Parsed crop name has exactly this video id
    Exact,
}

impl FromStr for MatchMode {
    type Err = PrepError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "substring" => Ok(MatchMode::Substring),
            "exact" => Ok(MatchMode::Exact),
            other => Err(PrepError::InvalidConfig(format!("unknown match mode: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
struct IndexedCrop {
    name: String,
    path: PathBuf,
    parsed: Option<CropName>,
}

#[derive(Debug, Clone)]
pub struct CropIndex {
    exists: bool,
    mode: MatchMode,
    crops: Vec<IndexedCrop>,
    // video id -> positions in `crops`, for exact lookups
    by_id: HashMap<String, Vec<usize>>,
}

impl CropIndex {
    /// Index the image files directly inside `dir`. A missing directory
    /// yields an empty index, not an error.
    pub fn build(dir: &Path, label: Label, mode: MatchMode) -> Result<Self> {
        let mut index = Self {
            exists: dir.is_dir(),
            mode,
            crops: Vec::new(),
            by_id: HashMap::new(),
        };
        if !index.exists {
            log::debug!("Face directory {} does not exist", dir.display());
            return Ok(index);
        }

        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() || !is_image_file(entry.path()) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            index.crops.push(IndexedCrop {
                parsed: CropName::parse(&name, label),
                path: entry.into_path(),
                name,
            });
        }

        for (pos, crop) in index.crops.iter().enumerate() {
            if let Some(parsed) = &crop.parsed {
                index.by_id.entry(parsed.video_id.clone()).or_default().push(pos);
            }
        }

        log::debug!("Indexed {} crops in {}", index.crops.len(), dir.display());
        Ok(index)
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn len(&self) -> usize {
        self.crops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.crops.is_empty()
    }

    /// All crops matching `video_id`, in lexicographic file-name order.
    ///
    /// `source` narrows fake lookups to crops tagged with that manipulation
    /// method. Untagged crops still match, and in substring mode the filter
    /// only applies when at least one tagged crop exists.
    pub fn lookup(&self, video_id: &str, source: Option<&str>) -> Vec<&Path> {
        if video_id.is_empty() {
            return Vec::new();
        }
        match self.mode {
            MatchMode::Substring => {
                let hits: Vec<&IndexedCrop> = self.crops.iter().filter(|c| c.name.contains(video_id)).collect();
                let tagged: Vec<&IndexedCrop> = match source {
                    Some(src) => {
                        let tag = format!("{}{}_", CROP_SOURCE_SEPARATOR, src);
                        hits.iter().copied().filter(|c| c.name.contains(&tag)).collect()
                    }
                    None => Vec::new(),
                };
                let chosen = if tagged.is_empty() { hits } else { tagged };
                chosen.into_iter().map(|c| c.path.as_path()).collect()
            }
            MatchMode::Exact => self
                .by_id
                .get(video_id)
                .map(|positions| {
                    positions
                        .iter()
                        .map(|&p| &self.crops[p])
                        .filter(|c| match (source, c.parsed.as_ref().and_then(|n| n.source.as_deref())) {
                            (Some(want), Some(have)) => want == have,
                            _ => true,
                        })
                        .map(|c| c.path.as_path())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// First match of [`lookup`](Self::lookup).
    pub fn first(&self, video_id: &str, source: Option<&str>) -> Option<&Path> {
        self.lookup(video_id, source).into_iter().next()
    }
}

/// Check if a path has an image extension.
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}
