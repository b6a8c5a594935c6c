use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Create the image directory if needed and return it.
pub fn ensure_artifact_dir(dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create image directory: {}", dir.display()))?;
    Ok(dir.to_path_buf())
}

fn file_safe(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `<project>_<platform>_<YYYYmmdd_HHMMSS_mmm>.png`, with anything outside
/// `[A-Za-z0-9_-]` replaced. Images for different platforms of one task never
/// share a path, even when generated within the same second.
pub fn artifact_file_name(project: &str, platform: &str, at: DateTime<Local>) -> String {
    format!(
        "{}_{}_{}.png",
        file_safe(project),
        file_safe(platform),
        at.format("%Y%m%d_%H%M%S_%3f")
    )
}

/// Owns a generated image file for the duration of one publish attempt.
/// The file is removed when the artifact is dropped.
#[derive(Debug)]
pub struct ImageArtifact {
    path: Option<PathBuf>,
}

impl ImageArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Wrap an optional path; `None` owns nothing.
    pub fn adopt(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Give up ownership without deleting the file.
    pub fn keep(mut self) -> Option<PathBuf> {
        self.path.take()
    }
}

impl Drop for ImageArtifact {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        match fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed image artifact"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove image artifact"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};
    use tempfile::tempdir;

    #[test]
    fn test_artifact_file_name() {
        let at = Local
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .unwrap()
            .with_nanosecond(42_000_000)
            .unwrap();
        assert_eq!(
            artifact_file_name("RouteOfRest", "tg", at),
            "RouteOfRest_tg_20240309_140507_042.png"
        );
        assert_eq!(
            artifact_file_name("my/project name", "ig", at),
            "my_project_name_ig_20240309_140507_042.png"
        );
    }

    #[test]
    fn test_platforms_in_same_instant_get_distinct_names() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_ne!(
            artifact_file_name("RouteOfRest", "tg", at),
            artifact_file_name("RouteOfRest", "ig", at)
        );
    }

    #[test]
    fn test_drop_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("image.png");
        fs::write(&path, b"png").unwrap();

        {
            let artifact = ImageArtifact::new(&path);
            assert_eq!(artifact.path(), Some(path.as_path()));
        }

        assert!(!path.exists());
    }

    #[test]
    fn test_drop_tolerates_missing_file() {
        let dir = tempdir().unwrap();
        drop(ImageArtifact::new(dir.path().join("never-written.png")));
        drop(ImageArtifact::adopt(None));
    }

    #[test]
    fn test_keep_leaves_file_in_place() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("image.png");
        fs::write(&path, b"png").unwrap();

        let kept = ImageArtifact::new(&path).keep();

        assert_eq!(kept, Some(path.clone()));
        assert!(path.exists());
    }

    #[test]
    fn test_ensure_artifact_dir_creates_nested_dirs() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("autopost").join("images");

        let created = ensure_artifact_dir(&nested).unwrap();

        assert!(created.is_dir());
    }
}
