//! Preset folders and lookup
//!
//! Presets are found by exact name. At each level of the folder tree all
//! sibling folders' presets are checked before any child folder is entered,
//! and children are entered in folder order (first folder's subtree first).

use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::warn;

use super::{HostError, Preset, PresetFolder, PresetRepository};

/// Finds a preset by exact name
///
/// Uses an explicit stack of folder levels instead of recursion, so deep
/// hierarchies cannot exhaust the call stack.
pub fn find_preset<'a>(folders: &'a [PresetFolder], name: &str) -> Option<&'a Preset> {
    let mut levels: Vec<&'a [PresetFolder]> = vec![folders];

    while let Some(level) = levels.pop() {
        if let Some(preset) = level
            .iter()
            .flat_map(|folder| folder.presets.iter())
            .find(|preset| preset.name == name)
        {
            return Some(preset);
        }

        // Reversed so the first folder's children are popped first
        for folder in level.iter().rev() {
            if !folder.children.is_empty() {
                levels.push(&folder.children);
            }
        }
    }

    None
}

/// On-disk preset file format
#[derive(Debug, Deserialize)]
struct PresetFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    settings: Map<String, Value>,
}

/// Preset repository backed by a directory tree
///
/// Every sub-directory of the root is a folder; every `*.json` file inside a
/// folder is a preset. Files that fail to parse are skipped with a warning.
pub struct DirectoryPresetRepository {
    root: PathBuf,
}

impl DirectoryPresetRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn load_folder(path: &Path) -> Result<PresetFolder, HostError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut folder = PresetFolder {
            name,
            ..PresetFolder::default()
        };

        for entry in sorted_entries(path)? {
            if entry.is_dir() {
                folder.children.push(Self::load_folder(&entry)?);
            } else if entry.extension().is_some_and(|ext| ext == "json") {
                match load_preset(&entry) {
                    Ok(preset) => folder.presets.push(preset),
                    Err(e) => warn!("Skipping preset {}: {}", entry.display(), e),
                }
            }
        }

        Ok(folder)
    }
}

impl PresetRepository for DirectoryPresetRepository {
    fn preset_folders(&self) -> Result<Vec<PresetFolder>, HostError> {
        if !self.root.is_dir() {
            warn!("Preset directory {} does not exist", self.root.display());
            return Ok(Vec::new());
        }

        sorted_entries(&self.root)?
            .into_iter()
            .filter(|path| path.is_dir())
            .map(|path| Self::load_folder(&path))
            .collect()
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, HostError> {
    let mut entries = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort();
    Ok(entries)
}

fn load_preset(path: &Path) -> Result<Preset, HostError> {
    let bytes = std::fs::read(path)?;
    let file: PresetFile = serde_json::from_slice(&bytes)?;
    let name = file.name.unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    });

    Ok(Preset {
        name,
        settings: file.settings,
    })
}
