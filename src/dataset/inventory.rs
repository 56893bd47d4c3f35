// Video inventory scanning for manifest creation and extraction

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{Category, Label, VideoRecord};
use crate::constants::VIDEO_EXTENSIONS;
use crate::error::{PrepError, Result};

/// Videos found for one category directory.
#[derive(Debug, Clone)]
pub struct CategoryListing {
    pub category: Category,
    pub dir: PathBuf,
    pub videos: Vec<VideoRecord>,
}

/// Result of scanning every requested category under a dataset root.
/// Absent category directories are flagged in `missing`, never an error.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub listings: Vec<CategoryListing>,
    pub missing: Vec<Category>,
}

impl Inventory {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Fail with `MissingDirectory` when any category was absent.
    pub fn require_complete(&self) -> Result<()> {
        if self.is_complete() {
            return Ok(());
        }
        Err(PrepError::MissingDirectory(
            self.missing.iter().map(|c| c.name.clone()).collect(),
        ))
    }

    pub fn listing(&self, name: &str) -> Option<&CategoryListing> {
        self.listings.iter().find(|l| l.category.name == name)
    }

    /// All real videos across real categories, in scan order.
    pub fn real_videos(&self) -> impl Iterator<Item = &VideoRecord> {
        self.listings
            .iter()
            .filter(|l| l.category.label == Label::Real)
            .flat_map(|l| l.videos.iter())
    }

    /// All fake videos across fake categories, in category then scan order.
    pub fn fake_videos(&self) -> impl Iterator<Item = &VideoRecord> {
        self.listings
            .iter()
            .filter(|l| l.category.label == Label::Fake)
            .flat_map(|l| l.videos.iter())
    }

    pub fn total_videos(&self) -> usize {
        self.listings.iter().map(|l| l.videos.len()).sum()
    }
}

/// Scan `root/<category>` for every category. Directory reads only.
pub fn scan_inventory(root: &Path, categories: &[Category]) -> Result<Inventory> {
    let mut inventory = Inventory::default();

    for category in categories {
        let dir = root.join(&category.name);
        if !dir.is_dir() {
            log::warn!("Category directory not found: {}", dir.display());
            inventory.missing.push(category.clone());
            continue;
        }

        let videos = list_videos(&dir, category)?;
        log::info!("{}: {} videos", category.name, videos.len());
        inventory.listings.push(CategoryListing {
            category: category.clone(),
            dir,
            videos,
        });
    }

    Ok(inventory)
}

/// List video files directly inside `dir` (no recursion), sorted by path.
pub fn list_videos(dir: &Path, category: &Category) -> Result<Vec<VideoRecord>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
    {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                log::warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        let path = entry.path();
        if path.is_file() && is_video_file(path) {
            files.push(path.to_path_buf());
        }
    }

    // Sort by path for consistent ordering
    files.sort();

    Ok(files
        .into_iter()
        .filter_map(|path| {
            let id = video_id(&path)?;
            Some(VideoRecord {
                path,
                label: category.label,
                video_id: id,
                category: category.name.clone(),
            })
        })
        .collect())
}

/// Check if a file is a video based on extension
pub fn is_video_file(path: &Path) -> bool {
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(e) => e.to_lowercase(),
        None => return false,
    };

    VIDEO_EXTENSIONS.contains(&ext.as_str())
}

/// Identity of a video: its file stem.
pub fn video_id(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_is_video_file() {
        assert!(is_video_file(Path::new("clip.mp4")));
        assert!(is_video_file(Path::new("clip.MP4")));
        assert!(is_video_file(Path::new("clip.avi")));
        assert!(!is_video_file(Path::new("face.jpg")));
        assert!(!is_video_file(Path::new("00012.mts")));
        assert!(!is_video_file(Path::new("README")));
    }

    #[test]
    fn test_video_id_is_stem() {
        assert_eq!(video_id(Path::new("/d/original/000_003.mp4")).as_deref(), Some("000_003"));
        assert_eq!(video_id(Path::new("a.b.mp4")).as_deref(), Some("a.b"));
    }

    #[test]
    fn test_missing_category_is_flagged_not_fatal() {
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join("original/a.mp4"));

        let categories = vec![Category::real("original"), Category::fake("Deepfakes")];
        let inv = scan_inventory(tmp.path(), &categories).unwrap();

        assert_eq!(inv.listings.len(), 1);
        assert_eq!(inv.missing.len(), 1);
        assert_eq!(inv.missing[0].name, "Deepfakes");
        assert!(matches!(inv.require_complete(), Err(PrepError::MissingDirectory(ref m)) if m == &vec!["Deepfakes".to_string()]));
    }

    #[test]
    fn test_listing_sorted_and_filtered() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("original");
        touch(&dir.join("b.mp4"));
        touch(&dir.join("a.mp4"));
        touch(&dir.join("notes.txt"));
        touch(&dir.join("nested/c.mp4"));

        let videos = list_videos(&dir, &Category::real("original")).unwrap();
        let ids: Vec<&str> = videos.iter().map(|v| v.video_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(videos.iter().all(|v| v.label == Label::Real && v.category == "original"));
    }
}
