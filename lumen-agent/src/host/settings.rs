//! Develop setting validation for the file-backed catalog

use lumen_core::domain::pipeline::{CurvePoint, WhiteBalance};
use serde_json::Value;

use super::HostError;

/// Numeric develop settings and their accepted ranges
const NUMERIC_SETTINGS: &[(&str, f64, f64)] = &[
    ("Exposure", -5.0, 5.0),
    ("Contrast", -100.0, 100.0),
    ("Highlights", -100.0, 100.0),
    ("Shadows", -100.0, 100.0),
    ("Whites", -100.0, 100.0),
    ("Blacks", -100.0, 100.0),
    ("Texture", -100.0, 100.0),
    ("Clarity", -100.0, 100.0),
    ("Dehaze", -100.0, 100.0),
    ("Vibrance", -100.0, 100.0),
    ("Saturation", -100.0, 100.0),
    ("Temperature", 2000.0, 50000.0),
    ("Tint", -150.0, 150.0),
    ("Sharpness", 0.0, 150.0),
    ("SharpenRadius", 0.5, 3.0),
    ("SharpenDetail", 0.0, 100.0),
    ("LuminanceSmoothing", 0.0, 100.0),
    ("ColorNoiseReduction", 0.0, 100.0),
    ("PostCropVignetteAmount", -100.0, 100.0),
    ("GrainAmount", 0.0, 100.0),
];

const HSL_COLORS: &[&str] = &[
    "Red", "Orange", "Yellow", "Green", "Aqua", "Blue", "Purple", "Magenta",
];

const HSL_AXES: &[&str] = &["Hue", "Saturation", "Luminance"];

const WHITE_BALANCE_MODES: &[&str] = &[
    "As Shot",
    "Auto",
    "Custom",
    "Daylight",
    "Cloudy",
    "Shade",
    "Tungsten",
    "Fluorescent",
    "Flash",
];

fn numeric_range(name: &str) -> Option<(f64, f64)> {
    if let Some((_, min, max)) = NUMERIC_SETTINGS.iter().find(|(n, _, _)| *n == name) {
        return Some((*min, *max));
    }

    let is_hsl = HSL_COLORS.iter().any(|color| {
        name.strip_prefix(color)
            .is_some_and(|axis| HSL_AXES.contains(&axis))
    });
    is_hsl.then_some((-100.0, 100.0))
}

fn check_range(name: &str, value: f64, min: f64, max: f64) -> Result<(), HostError> {
    if value < min || value > max {
        return Err(HostError::OutOfRange {
            name: name.to_string(),
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Validates one `name = value` assignment
pub fn validate_setting(name: &str, value: &Value) -> Result<(), HostError> {
    if name == "WhiteBalance" {
        return match value.as_str() {
            Some(mode) => validate_white_balance_mode(mode),
            None => Err(HostError::InvalidValue {
                name: name.to_string(),
                reason: "expected a mode name".to_string(),
            }),
        };
    }

    let (min, max) =
        numeric_range(name).ok_or_else(|| HostError::UnknownSetting(name.to_string()))?;

    let number = value.as_f64().ok_or_else(|| HostError::InvalidValue {
        name: name.to_string(),
        reason: format!("expected a number, got {}", value),
    })?;

    check_range(name, number, min, max)
}

fn validate_white_balance_mode(mode: &str) -> Result<(), HostError> {
    if WHITE_BALANCE_MODES.contains(&mode) {
        Ok(())
    } else {
        Err(HostError::InvalidValue {
            name: "WhiteBalance".to_string(),
            reason: format!("unknown mode '{}'", mode),
        })
    }
}

pub fn validate_white_balance(white_balance: &WhiteBalance) -> Result<(), HostError> {
    validate_white_balance_mode(&white_balance.mode)?;
    if let Some(temperature) = white_balance.temperature {
        check_range("Temperature", temperature, 2000.0, 50000.0)?;
    }
    if let Some(tint) = white_balance.tint {
        check_range("Tint", tint, -150.0, 150.0)?;
    }
    Ok(())
}

/// Develop setting that stores a tone curve channel
pub fn tone_curve_setting(channel: &str) -> Result<&'static str, HostError> {
    match channel.to_ascii_lowercase().as_str() {
        "rgb" => Ok("ToneCurvePV2012"),
        "red" => Ok("ToneCurvePV2012Red"),
        "green" => Ok("ToneCurvePV2012Green"),
        "blue" => Ok("ToneCurvePV2012Blue"),
        _ => Err(HostError::UnknownSetting(format!("tone curve channel {}", channel))),
    }
}

pub fn validate_curve(points: &[CurvePoint]) -> Result<(), HostError> {
    if points.len() < 2 {
        return Err(HostError::InvalidValue {
            name: "ToneCurve".to_string(),
            reason: "a curve needs at least two points".to_string(),
        });
    }

    for point in points {
        check_range("ToneCurve.x", point.x, 0.0, 255.0)?;
        check_range("ToneCurve.y", point.y, 0.0, 255.0)?;
    }

    if points.windows(2).any(|pair| pair[1].x <= pair[0].x) {
        return Err(HostError::InvalidValue {
            name: "ToneCurve".to_string(),
            reason: "control points must be strictly increasing in x".to_string(),
        });
    }

    Ok(())
}
