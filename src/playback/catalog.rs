use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoEntry {
    pub path: PathBuf,
    /// Loop this clip with the player's repeat flag instead of yielding back to idle.
    #[serde(default)]
    pub repeat: bool,
}

/// Action name → clip. One entry, named by `idle`, is the looping fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoCatalog {
    #[serde(default = "default_idle")]
    pub idle: String,
    #[serde(default)]
    pub clips: HashMap<String, VideoEntry>,
}

fn default_idle() -> String {
    "idle".to_string()
}

/// Everything the player needs to start one clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipRequest {
    pub action: String,
    pub path: PathBuf,
    pub looping: bool,
}

impl VideoCatalog {
    pub fn new(idle: impl Into<String>) -> Self {
        Self {
            idle: idle.into(),
            clips: HashMap::new(),
        }
    }

    pub fn with_clip(mut self, action: impl Into<String>, path: impl Into<PathBuf>, repeat: bool) -> Self {
        self.clips.insert(
            action.into(),
            VideoEntry {
                path: path.into(),
                repeat,
            },
        );
        self
    }

    pub fn contains(&self, action: &str) -> bool {
        self.clips.contains_key(action)
    }

    /// The idle clip always loops, whatever its entry says.
    pub fn idle_clip(&self) -> Option<ClipRequest> {
        self.clips.get(&self.idle).map(|entry| ClipRequest {
            action: self.idle.clone(),
            path: entry.path.clone(),
            looping: true,
        })
    }

    pub fn clip_for(&self, action: &str) -> Option<ClipRequest> {
        self.clips.get(action).map(|entry| ClipRequest {
            action: action.to_string(),
            path: entry.path.clone(),
            looping: entry.repeat,
        })
    }

    /// Catalog entries whose file is not on disk, sorted by action.
    pub fn missing_files(&self) -> Vec<(String, PathBuf)> {
        let mut missing: Vec<_> = self
            .clips
            .iter()
            .filter(|(_, entry)| !entry.path.exists())
            .map(|(action, entry)| (action.clone(), entry.path.clone()))
            .collect();
        missing.sort();
        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_clip_always_loops() {
        let catalog = VideoCatalog::new("idle").with_clip("idle", "guide.mp4", false);
        let idle = catalog.idle_clip().unwrap();
        assert!(idle.looping);
        assert_eq!(idle.path, PathBuf::from("guide.mp4"));
    }

    #[test]
    fn test_repeat_annotation_selects_looping() {
        let catalog = VideoCatalog::new("idle")
            .with_clip("Warning", "Warning.mp4", true)
            .with_clip("A", "a.mp4", false);

        assert!(catalog.clip_for("Warning").unwrap().looping);
        assert!(!catalog.clip_for("A").unwrap().looping);
        assert!(catalog.clip_for("missing").is_none());
    }

    #[test]
    fn test_missing_files_lists_absent_paths() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("a.mp4");
        std::fs::write(&present, b"").unwrap();

        let catalog = VideoCatalog::new("idle")
            .with_clip("A", &present, false)
            .with_clip("idle", dir.path().join("guide.mp4"), false);

        let missing = catalog.missing_files();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].0, "idle");
    }
}
