// Manifest files: one `<video_path>,<label>` record per line, no header
//
// Writes go to a temp file in the same directory and are renamed over the
// target, so a manifest is either the previous version or the complete new one.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::Label;
use crate::constants::MANIFEST_DELIMITER;
use crate::error::{PrepError, Result};

/// One manifest record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub video_path: PathBuf,
    pub label: Label,
}

impl ManifestEntry {
    pub fn new(video_path: impl Into<PathBuf>, label: Label) -> Self {
        Self {
            video_path: video_path.into(),
            label,
        }
    }

    /// Render as a manifest line (without newline).
    pub fn to_line(&self) -> String {
        format!(
            "{}{}{}",
            self.video_path.to_string_lossy(),
            MANIFEST_DELIMITER,
            self.label.as_u8()
        )
    }
}

/// Write a full manifest, replacing any file at `path`.
pub fn write_manifest(path: &Path, entries: &[ManifestEntry]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    for entry in entries {
        let p = entry.video_path.to_string_lossy();
        if p.contains('\n') || p.contains('\r') {
            return Err(PrepError::Other(format!(
                "manifest path contains a line break: {:?}",
                entry.video_path
            )));
        }
    }

    let tmp_path = path.with_extension("tmp.csv");

    let write_result = (|| -> Result<()> {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        for entry in entries {
            writeln!(writer, "{}", entry.to_line())?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    })();

    if let Err(e) = write_result {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e);
    }

    // Atomic rename
    std::fs::rename(&tmp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        PrepError::Io(e)
    })?;

    Ok(())
}

/// Read a manifest back. Blank lines are skipped.
///
/// The label is taken after the last delimiter, so paths that contain the
/// delimiter still read back intact.
pub fn read_manifest(path: &Path) -> Result<Vec<ManifestEntry>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        entries.push(parse_line(line).map_err(|reason| PrepError::ManifestParse {
            path: path.display().to_string(),
            line: idx + 1,
            reason,
        })?);
    }

    Ok(entries)
}

fn parse_line(line: &str) -> std::result::Result<ManifestEntry, String> {
    let (video_path, label) = line
        .rsplit_once(MANIFEST_DELIMITER)
        .ok_or_else(|| format!("missing '{}' delimiter", MANIFEST_DELIMITER))?;

    if video_path.is_empty() {
        return Err("empty video path".to_string());
    }

    let label = label
        .trim()
        .parse::<u8>()
        .ok()
        .and_then(Label::from_u8)
        .ok_or_else(|| format!("label must be 0 or 1, got '{}'", label))?;

    Ok(ManifestEntry::new(video_path, label))
}
