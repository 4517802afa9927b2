//! Pipeline stage types
//!
//! A job's `config.pipeline` is an ordered array of tagged stages. Stages are
//! parsed one at a time so that an unknown or malformed stage can be skipped
//! without rejecting the rest of the pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Setting key that carries a structured white balance value
pub const WHITE_BALANCE_KEY: &str = "WhiteBalance";

/// Channel name of the master tone curve
pub const RGB_CHANNEL: &str = "rgb";

/// One step of a job's edit pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineStage {
    Base(BaseStage),
    ToneCurve(ToneCurveStage),
    Hsl(HslStage),
    Preset(PresetStage),
    /// A tag this agent does not know how to apply
    Unknown { tag: String },
}

/// Plain develop settings, applied key by key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseStage {
    pub settings: Map<String, Value>,
}

/// Tone curve stage; only the master (RGB) channel is applied
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToneCurveStage {
    pub rgb: Option<Vec<CurvePoint>>,
    /// Other keys on the stage, in document order; never parsed
    pub ignored: Vec<String>,
}

impl ToneCurveStage {
    /// Returns the master (RGB) channel's points
    pub fn rgb(&self) -> Option<&[CurvePoint]> {
        self.rgb.as_deref()
    }
}

/// Per-colour hue/saturation/luminance deltas
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HslStage {
    #[serde(default)]
    pub hue: Option<Map<String, Value>>,
    #[serde(default)]
    pub saturation: Option<Map<String, Value>>,
    #[serde(default)]
    pub luminance: Option<Map<String, Value>>,
}

/// Axis of an HSL adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HslAxis {
    Hue,
    Saturation,
    Luminance,
}

impl HslAxis {
    pub fn as_str(&self) -> &'static str {
        match self {
            HslAxis::Hue => "Hue",
            HslAxis::Saturation => "Saturation",
            HslAxis::Luminance => "Luminance",
        }
    }
}

impl HslStage {
    /// Returns the present adjustment maps in hue, saturation, luminance order
    pub fn axes(&self) -> impl Iterator<Item = (HslAxis, &Map<String, Value>)> {
        [
            (HslAxis::Hue, self.hue.as_ref()),
            (HslAxis::Saturation, self.saturation.as_ref()),
            (HslAxis::Luminance, self.luminance.as_ref()),
        ]
        .into_iter()
        .filter_map(|(axis, map)| map.map(|m| (axis, m)))
    }
}

/// Canonical display form of a colour name (`orange` -> `Orange`)
pub fn normalize_color_name(color: &str) -> String {
    let lower = color.trim().to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Setting name for a colour adjustment, e.g. `OrangeHue`
pub fn hsl_setting_name(color: &str, axis: HslAxis) -> String {
    format!("{}{}", normalize_color_name(color), axis.as_str())
}

/// Presets to apply by name, in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetStage {
    pub apply: Vec<String>,
}

/// Tone curve control point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawCurvePoint")]
pub struct CurvePoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCurvePoint {
    Pair([f64; 2]),
    Object { x: f64, y: f64 },
}

impl From<RawCurvePoint> for CurvePoint {
    fn from(raw: RawCurvePoint) -> Self {
        match raw {
            RawCurvePoint::Pair([x, y]) => CurvePoint { x, y },
            RawCurvePoint::Object { x, y } => CurvePoint { x, y },
        }
    }
}

/// Structured white balance: mode plus optional temperature and tint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhiteBalance {
    pub mode: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub tint: Option<f64>,
}

impl WhiteBalance {
    /// Interprets a `WhiteBalance` setting value; only objects are structured
    pub fn from_setting(value: &Value) -> Option<Result<Self, serde_json::Error>> {
        match value {
            Value::Object(_) => Some(serde_json::from_value(value.clone())),
            _ => None,
        }
    }
}

/// Errors raised while parsing a single stage
#[derive(Debug, Error)]
pub enum StageError {
    #[error("stage has no \"stage\" tag")]
    MissingTag,

    #[error("malformed {tag} stage: {reason}")]
    Malformed { tag: String, reason: String },
}

impl PipelineStage {
    /// Parses one entry of the pipeline array
    pub fn from_value(value: &Value) -> Result<Self, StageError> {
        let tag = value
            .get("stage")
            .and_then(Value::as_str)
            .ok_or(StageError::MissingTag)?;

        let malformed = |reason: String| StageError::Malformed {
            tag: tag.to_string(),
            reason,
        };

        match tag {
            "base" => serde_json::from_value(value.clone())
                .map(PipelineStage::Base)
                .map_err(|e| malformed(e.to_string())),
            "toneCurve" => parse_tone_curve(value)
                .map(PipelineStage::ToneCurve)
                .map_err(malformed),
            "hsl" => serde_json::from_value(value.clone())
                .map(PipelineStage::Hsl)
                .map_err(|e| malformed(e.to_string())),
            "preset" => serde_json::from_value(value.clone())
                .map(PipelineStage::Preset)
                .map_err(|e| malformed(e.to_string())),
            other => Ok(PipelineStage::Unknown {
                tag: other.to_string(),
            }),
        }
    }

    /// Tag of the stage as it appears on the wire
    pub fn name(&self) -> &str {
        match self {
            PipelineStage::Base(_) => "base",
            PipelineStage::ToneCurve(_) => "toneCurve",
            PipelineStage::Hsl(_) => "hsl",
            PipelineStage::Preset(_) => "preset",
            PipelineStage::Unknown { tag } => tag,
        }
    }
}

fn parse_tone_curve(value: &Value) -> Result<ToneCurveStage, String> {
    let Some(object) = value.as_object() else {
        return Err("expected an object".to_string());
    };

    let mut stage = ToneCurveStage::default();
    for (name, points) in object.iter().filter(|(key, _)| key.as_str() != "stage") {
        if name.eq_ignore_ascii_case(RGB_CHANNEL) {
            let points: Vec<CurvePoint> = serde_json::from_value(points.clone())
                .map_err(|e| format!("channel {}: {}", name, e))?;
            stage.rgb = Some(points);
        } else {
            stage.ignored.push(name.clone());
        }
    }

    Ok(stage)
}
