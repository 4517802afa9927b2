//! Pipeline engine
//!
//! Applies a job's ordered stages to an isolated copy of the selected photo.
//! Only three things fail a job: a missing pipeline, no selected photo, and
//! a copy the host could not make. Everything else is recorded per operation
//! and the pipeline moves on.

use lumen_core::domain::job::JobConfig;
use lumen_core::domain::pipeline::{
    BaseStage, HslStage, PipelineStage, PresetStage, RGB_CHANNEL, ToneCurveStage,
    WHITE_BALANCE_KEY, WhiteBalance, hsl_setting_name,
};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::outcome::{OperationOutcome, StageOutcome};
use crate::host::{Catalog, EditingHost, HostError, PhotoId, PresetRepository, find_preset};

/// Name of the checkpoint recorded on the edit target before any stage runs
pub const BEFORE_SNAPSHOT: &str = "Before";

/// Structural failures that abort a job
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid pipeline")]
    InvalidPipeline,

    #[error("no photo selected")]
    NoPhotoSelected,

    #[error("failed to create virtual copy: {0}")]
    DuplicationFailed(String),

    #[error("editing host error: {0}")]
    Host(#[from] HostError),
}

/// What a finished pipeline did
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub original: PhotoId,
    pub edit_target: PhotoId,
    pub stages: Vec<StageOutcome>,
}

impl PipelineReport {
    pub fn failed_operations(&self) -> usize {
        self.stages.iter().map(StageOutcome::failed_count).sum()
    }
}

/// Receives progress while a pipeline runs
pub trait PipelineObserver {
    /// Called once the edit target exists, before the first stage
    fn on_edit_target_ready(&mut self, _original: &PhotoId, _target: &PhotoId) {}

    fn on_stage_complete(&mut self, outcome: &StageOutcome);
}

impl<F> PipelineObserver for F
where
    F: FnMut(&StageOutcome),
{
    fn on_stage_complete(&mut self, outcome: &StageOutcome) {
        self(outcome)
    }
}

pub struct PipelineEngine {
    host: Arc<dyn EditingHost>,
    presets: Arc<dyn PresetRepository>,
}

impl PipelineEngine {
    pub fn new(host: Arc<dyn EditingHost>, presets: Arc<dyn PresetRepository>) -> Self {
        Self { host, presets }
    }

    pub fn host(&self) -> &Arc<dyn EditingHost> {
        &self.host
    }

    /// Runs every stage of `config` against a fresh copy of the selected photo
    ///
    /// Blocks on host calls; run it off the async runtime.
    pub fn run_pipeline(
        &self,
        config: &JobConfig,
        observer: &mut dyn PipelineObserver,
    ) -> Result<PipelineReport, PipelineError> {
        let Some(stages) = config.stages() else {
            error!("Job config has no usable pipeline");
            return Err(PipelineError::InvalidPipeline);
        };

        let original = self
            .host
            .selected_photo()?
            .ok_or(PipelineError::NoPhotoSelected)?;

        let edit_target = self.prepare_edit_target(&original)?;
        info!("Editing {} (copy of {})", edit_target, original);
        observer.on_edit_target_ready(&original, &edit_target);

        let total = stages.len();
        let mut outcomes = Vec::with_capacity(total);
        for (index, raw) in stages.iter().enumerate() {
            let outcome = self.run_stage(&edit_target, index, total, raw);
            debug!(
                "Stage {}/{} '{}' finished: {:?} ({} ok, {} failed)",
                index + 1,
                total,
                outcome.name,
                outcome.status,
                outcome.applied_count(),
                outcome.failed_count()
            );
            observer.on_stage_complete(&outcome);
            outcomes.push(outcome);
        }

        Ok(PipelineReport {
            original,
            edit_target,
            stages: outcomes,
        })
    }

    /// Duplicates the photo and records the "before" checkpoint in one scope
    fn prepare_edit_target(&self, original: &PhotoId) -> Result<PhotoId, PipelineError> {
        let mut copy = None;

        self.host
            .with_write_access("Create edit copy", &mut |catalog: &mut dyn Catalog| {
                let Some(id) = catalog.create_virtual_copy(original)? else {
                    return Ok(());
                };
                if let Err(e) = catalog.create_snapshot(&id, BEFORE_SNAPSHOT) {
                    warn!("Could not record '{}' snapshot on {}: {}", BEFORE_SNAPSHOT, id, e);
                }
                copy = Some(id);
                Ok(())
            })
            .map_err(|e| PipelineError::DuplicationFailed(e.to_string()))?;

        copy.ok_or_else(|| PipelineError::DuplicationFailed("host returned no copy".to_string()))
    }

    fn run_stage(&self, target: &PhotoId, index: usize, total: usize, raw: &Value) -> StageOutcome {
        let stage = match PipelineStage::from_value(raw) {
            Ok(stage) => stage,
            Err(e) => {
                let name = raw.get("stage").and_then(Value::as_str).unwrap_or("unknown");
                warn!("Skipping stage {}: {}", index + 1, e);
                return StageOutcome::skipped(index, total, name, e.to_string());
            }
        };

        let operations = match &stage {
            PipelineStage::Base(base) => self.apply_base(target, base),
            PipelineStage::ToneCurve(curve) => match self.apply_tone_curve(target, curve) {
                Some(operations) => operations,
                None => {
                    return StageOutcome::skipped(index, total, stage.name(), "no rgb channel");
                }
            },
            PipelineStage::Hsl(hsl) => self.apply_hsl(target, hsl),
            PipelineStage::Preset(presets) => self.apply_presets(target, presets),
            PipelineStage::Unknown { tag } => {
                warn!("Unknown stage '{}', skipping", tag);
                return StageOutcome::skipped(index, total, tag, "unknown stage");
            }
        };

        StageOutcome::from_operations(index, total, stage.name(), operations)
    }

    fn apply_base(&self, target: &PhotoId, stage: &BaseStage) -> Vec<OperationOutcome> {
        self.in_scope("Apply base settings", |catalog| {
            stage
                .settings
                .iter()
                .map(|(key, value)| {
                    let result = match structured_white_balance(key, value) {
                        Some(Ok(white_balance)) => catalog.set_white_balance(target, &white_balance),
                        Some(Err(e)) => Err(e),
                        None => catalog.set_value(target, key, value),
                    };
                    record(key, value, result)
                })
                .collect()
        })
    }

    fn apply_tone_curve(
        &self,
        target: &PhotoId,
        stage: &ToneCurveStage,
    ) -> Option<Vec<OperationOutcome>> {
        for key in &stage.ignored {
            warn!("Ignoring tone curve key '{}'", key);
        }

        let Some(points) = stage.rgb() else {
            warn!("Tone curve stage has no rgb channel, skipping");
            return None;
        };

        Some(self.in_scope("Apply tone curve", |catalog| {
            let result = catalog.set_tone_curve(target, RGB_CHANNEL, points);
            if let Err(e) = &result {
                warn!("Failed to apply rgb tone curve: {}", e);
            }
            vec![OperationOutcome::from_result("ToneCurve.rgb", result)]
        }))
    }

    fn apply_hsl(&self, target: &PhotoId, stage: &HslStage) -> Vec<OperationOutcome> {
        self.in_scope("Apply HSL adjustments", |catalog| {
            let mut operations = Vec::new();
            for (axis, colors) in stage.axes() {
                for (color, delta) in colors {
                    let name = hsl_setting_name(color, axis);
                    let result = if delta.is_number() {
                        catalog.set_value(target, &name, delta)
                    } else {
                        Err(HostError::InvalidValue {
                            name: name.clone(),
                            reason: format!("expected a number, got {}", delta),
                        })
                    };
                    operations.push(record(&name, delta, result));
                }
            }
            operations
        })
    }

    /// Each preset is applied in its own write scope
    fn apply_presets(&self, target: &PhotoId, stage: &PresetStage) -> Vec<OperationOutcome> {
        let folders = match self.presets.preset_folders() {
            Ok(folders) => folders,
            Err(e) => {
                warn!("Could not list preset folders: {}", e);
                return stage
                    .apply
                    .iter()
                    .map(|name| OperationOutcome::failed(name, &e))
                    .collect();
            }
        };

        stage
            .apply
            .iter()
            .map(|name| {
                let Some(preset) = find_preset(&folders, name) else {
                    warn!("Preset '{}' not found, skipping", name);
                    return OperationOutcome::failed(name, "preset not found");
                };

                let result = self.host.with_write_access(
                    &format!("Apply preset {}", name),
                    &mut |catalog: &mut dyn Catalog| catalog.apply_preset(target, preset),
                );
                if let Err(e) = &result {
                    warn!("Failed to apply preset '{}': {}", name, e);
                }
                OperationOutcome::from_result(name, result)
            })
            .collect()
    }

    /// Runs `body` inside one write scope and returns its outcomes
    ///
    /// A scope that fails as a whole keeps none of its changes, so every
    /// operation it reported as applied is turned into a failure.
    fn in_scope<F>(&self, action: &str, mut body: F) -> Vec<OperationOutcome>
    where
        F: FnMut(&mut dyn Catalog) -> Vec<OperationOutcome>,
    {
        let mut operations = Vec::new();
        let result = self
            .host
            .with_write_access(action, &mut |catalog: &mut dyn Catalog| {
                operations = body(catalog);
                Ok(())
            });

        if let Err(e) = result {
            error!("{} failed: {}", action, e);
            if operations.is_empty() {
                return vec![OperationOutcome::failed(action, &e)];
            }
            for operation in operations.iter_mut().filter(|op| op.ok) {
                operation.ok = false;
                operation.error = Some(format!("write scope failed: {}", e));
            }
        }

        operations
    }
}

/// Returns the structured white balance call for an object-valued key
fn structured_white_balance(
    key: &str,
    value: &Value,
) -> Option<Result<WhiteBalance, HostError>> {
    if key != WHITE_BALANCE_KEY {
        return None;
    }
    WhiteBalance::from_setting(value).map(|parsed| {
        parsed.map_err(|e| HostError::InvalidValue {
            name: key.to_string(),
            reason: e.to_string(),
        })
    })
}

fn record(key: &str, value: &Value, result: Result<(), HostError>) -> OperationOutcome {
    if let Err(e) = &result {
        warn!("Failed to apply {} = {}: {}", key, value, e);
    }
    OperationOutcome::from_result(key, result)
}
