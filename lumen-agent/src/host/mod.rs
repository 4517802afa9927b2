//! Editing host
//!
//! The pipeline engine never touches pixels. It asks an editing host to
//! duplicate a photo, record a checkpoint, and assign develop settings,
//! curves and presets. All mutations happen inside a write-access scope the
//! host hands out, and the host decides what "atomic" means for it.
//!
//! Shipped implementations:
//! - `CatalogHost`: a JSON file-backed catalog
//! - `DirectoryPresetRepository`: presets read from a directory tree

mod catalog;
mod presets;
mod settings;

pub use catalog::CatalogHost;
pub use presets::{DirectoryPresetRepository, find_preset};

use lumen_core::domain::pipeline::{CurvePoint, WhiteBalance};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Identifier of a photo (or virtual copy) in the host's catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhotoId(String);

impl PhotoId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors reported by the editing host
#[derive(Debug, Error)]
pub enum HostError {
    #[error("photo not found: {0}")]
    PhotoNotFound(PhotoId),

    #[error("unknown setting: {0}")]
    UnknownSetting(String),

    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("{name} = {value} is outside {min}..={max}")]
    OutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("write access denied: {0}")]
    WriteAccess(String),

    #[error("catalog I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog data is invalid: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A develop preset: a named bundle of settings
#[derive(Debug, Clone, PartialEq)]
pub struct Preset {
    pub name: String,
    pub settings: Map<String, Value>,
}

/// A folder of presets, possibly nested
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PresetFolder {
    pub name: String,
    pub presets: Vec<Preset>,
    pub children: Vec<PresetFolder>,
}

/// Mutations available inside a write-access scope
pub trait Catalog {
    /// Creates an isolated duplicate; `None` if the host could not make one
    fn create_virtual_copy(&mut self, photo: &PhotoId) -> Result<Option<PhotoId>, HostError>;

    /// Records a named checkpoint of the photo's current state
    fn create_snapshot(&mut self, photo: &PhotoId, name: &str) -> Result<(), HostError>;

    fn set_value(&mut self, photo: &PhotoId, name: &str, value: &Value) -> Result<(), HostError>;

    fn set_white_balance(&mut self, photo: &PhotoId, white_balance: &WhiteBalance)
    -> Result<(), HostError>;

    fn set_tone_curve(
        &mut self,
        photo: &PhotoId,
        channel: &str,
        points: &[CurvePoint],
    ) -> Result<(), HostError>;

    fn apply_preset(&mut self, photo: &PhotoId, preset: &Preset) -> Result<(), HostError>;
}

/// The host application the agent drives
pub trait EditingHost: Send + Sync {
    /// The photo the user currently has selected, if any
    fn selected_photo(&self) -> Result<Option<PhotoId>, HostError>;

    /// Runs `body` with exclusive write access
    ///
    /// Scopes never overlap. If `body` fails, none of its mutations are kept.
    fn with_write_access(
        &self,
        action: &str,
        body: &mut dyn FnMut(&mut dyn Catalog) -> Result<(), HostError>,
    ) -> Result<(), HostError>;

    /// Shows a short, transient status message to the user
    fn show_status(&self, message: &str);
}

/// Source of the host's preset folder hierarchy
pub trait PresetRepository: Send + Sync {
    fn preset_folders(&self) -> Result<Vec<PresetFolder>, HostError>;
}
