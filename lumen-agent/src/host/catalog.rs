//! File-backed catalog
//!
//! A minimal editing host that keeps develop settings for each photo in a
//! JSON file. Write scopes run against a working copy of the catalog that is
//! committed, and persisted, only when the scope's body succeeds.

use lumen_core::domain::pipeline::{CurvePoint, WhiteBalance};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::settings::{
    tone_curve_setting, validate_curve, validate_setting, validate_white_balance,
};
use super::{Catalog, EditingHost, HostError, PhotoId, Preset};

/// Persisted catalog contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogData {
    #[serde(default)]
    selected: Option<String>,
    #[serde(default)]
    photos: BTreeMap<String, PhotoRecord>,
    #[serde(default)]
    next_copy: u64,
}

/// One photo or virtual copy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    /// Image file on disk, for masters
    #[serde(default)]
    pub file: Option<String>,
    /// Master photo id, for virtual copies
    #[serde(default)]
    pub master: Option<String>,
    #[serde(default)]
    pub develop: BTreeMap<String, Value>,
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
}

/// Named checkpoint of a photo's develop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    pub develop: BTreeMap<String, Value>,
}

/// Editing host backed by a JSON catalog file
pub struct CatalogHost {
    path: PathBuf,
    data: Mutex<CatalogData>,
}

impl CatalogHost {
    /// Opens the catalog at `path`, starting empty if the file does not exist
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HostError> {
        let path = path.as_ref().to_path_buf();
        let data = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Catalog {} does not exist yet, starting empty", path.display());
                CatalogData::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    fn lock(&self) -> MutexGuard<'_, CatalogData> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds a master photo if it is not already in the catalog
    pub fn import_photo(&self, id: &str, file: Option<&str>) -> Result<PhotoId, HostError> {
        let mut data = self.lock();
        data.photos
            .entry(id.to_string())
            .or_insert_with(|| PhotoRecord {
                file: file.map(str::to_string),
                ..PhotoRecord::default()
            });
        persist(&self.path, &data)?;
        Ok(PhotoId::new(id))
    }

    /// Marks a photo as the current selection
    pub fn select(&self, id: &str) -> Result<(), HostError> {
        let mut data = self.lock();
        if !data.photos.contains_key(id) {
            return Err(HostError::PhotoNotFound(PhotoId::new(id)));
        }
        data.selected = Some(id.to_string());
        persist(&self.path, &data)
    }

    /// Returns a copy of a photo's record
    #[allow(dead_code)]
    pub fn photo(&self, id: &PhotoId) -> Option<PhotoRecord> {
        self.lock().photos.get(id.as_str()).cloned()
    }
}

impl EditingHost for CatalogHost {
    fn selected_photo(&self) -> Result<Option<PhotoId>, HostError> {
        let data = self.lock();
        Ok(data
            .selected
            .as_deref()
            .filter(|id| data.photos.contains_key(*id))
            .map(PhotoId::new))
    }

    fn with_write_access(
        &self,
        action: &str,
        body: &mut dyn FnMut(&mut dyn Catalog) -> Result<(), HostError>,
    ) -> Result<(), HostError> {
        let mut data = self.lock();
        let mut session = CatalogSession {
            data: data.clone(),
        };

        debug!("Write access: {}", action);
        body(&mut session)?;

        persist(&self.path, &session.data)?;
        *data = session.data;
        Ok(())
    }

    fn show_status(&self, message: &str) {
        info!("[status] {}", message);
    }
}

/// Working copy handed to a write scope's body
struct CatalogSession {
    data: CatalogData,
}

impl CatalogSession {
    fn record_mut(&mut self, photo: &PhotoId) -> Result<&mut PhotoRecord, HostError> {
        self.data
            .photos
            .get_mut(photo.as_str())
            .ok_or_else(|| HostError::PhotoNotFound(photo.clone()))
    }
}

impl Catalog for CatalogSession {
    fn create_virtual_copy(&mut self, photo: &PhotoId) -> Result<Option<PhotoId>, HostError> {
        let Some(source) = self.data.photos.get(photo.as_str()).cloned() else {
            return Ok(None);
        };

        self.data.next_copy += 1;
        let master = source.master.clone().unwrap_or_else(|| photo.to_string());
        let copy_id = format!("{}/copy-{}", master, self.data.next_copy);

        self.data.photos.insert(
            copy_id.clone(),
            PhotoRecord {
                file: source.file,
                master: Some(master),
                develop: source.develop,
                snapshots: Vec::new(),
            },
        );

        Ok(Some(PhotoId::new(copy_id)))
    }

    fn create_snapshot(&mut self, photo: &PhotoId, name: &str) -> Result<(), HostError> {
        let record = self.record_mut(photo)?;
        let develop = record.develop.clone();
        record.snapshots.push(Snapshot {
            name: name.to_string(),
            develop,
        });
        Ok(())
    }

    fn set_value(&mut self, photo: &PhotoId, name: &str, value: &Value) -> Result<(), HostError> {
        validate_setting(name, value)?;
        self.record_mut(photo)?
            .develop
            .insert(name.to_string(), value.clone());
        Ok(())
    }

    fn set_white_balance(
        &mut self,
        photo: &PhotoId,
        white_balance: &WhiteBalance,
    ) -> Result<(), HostError> {
        validate_white_balance(white_balance)?;
        let develop = &mut self.record_mut(photo)?.develop;
        develop.insert("WhiteBalance".to_string(), json!(white_balance.mode));
        if let Some(temperature) = white_balance.temperature {
            develop.insert("Temperature".to_string(), json!(temperature));
        }
        if let Some(tint) = white_balance.tint {
            develop.insert("Tint".to_string(), json!(tint));
        }
        Ok(())
    }

    fn set_tone_curve(
        &mut self,
        photo: &PhotoId,
        channel: &str,
        points: &[CurvePoint],
    ) -> Result<(), HostError> {
        let setting = tone_curve_setting(channel)?;
        validate_curve(points)?;
        let flattened: Vec<f64> = points.iter().flat_map(|p| [p.x, p.y]).collect();
        self.record_mut(photo)?
            .develop
            .insert(setting.to_string(), json!(flattened));
        Ok(())
    }

    fn apply_preset(&mut self, photo: &PhotoId, preset: &Preset) -> Result<(), HostError> {
        for (name, value) in &preset.settings {
            self.set_value(photo, name, value)?;
        }
        Ok(())
    }
}

/// Writes the catalog next to its final path, then renames it into place
fn persist(path: &Path, data: &CatalogData) -> Result<(), HostError> {
    let bytes = serde_json::to_vec_pretty(data)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
