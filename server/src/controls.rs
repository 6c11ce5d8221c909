// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::collections::BTreeMap;

use canonical_error::CanonicalError;
use log::{debug, info};
use serde::Serialize;
use serde_json::Value;

use astrocam_elements::camera_trait::{ControlMap, ControlRange, ControlValue,
                                      ImagingDevice};

// Exposure choices offered by the UI, in microseconds. Requests refer to them
// by index.
pub const EXPOSURE_TIMES_US: [i64; 11] = [
    1000, 2000, 4000, 8000, 16000, 32000, 64000, 125000, 250000, 500000, 1000000];

// Slider name, device control name, (min, max) used if the device doesn't
// report a range, current value assumed if the device doesn't report one.
const SLIDER_CONTROLS: &[(&str, &str, (f64, f64), f64)] = &[
    ("gain", "AnalogueGain", (1.0, 251.1886444091797), 1.0),
    ("brightness", "Brightness", (-1.0, 1.0), 0.0),
    ("contrast", "Contrast", (0.0, 32.0), 1.0),
    ("sharpness", "Sharpness", (0.0, 16.0), 1.0),
];

const DEFAULT_EXPOSURE_US: f64 = 10000.0;

// Applied once at startup.
pub fn initial_controls() -> ControlMap {
    let mut controls = ControlMap::new();
    controls.insert("AnalogueGain".to_string(), ControlValue::Float(1.0));
    controls.insert("ExposureTime".to_string(), ControlValue::Int(10000));
    controls.insert("Brightness".to_string(), ControlValue::Float(0.0));
    controls.insert("Contrast".to_string(), ControlValue::Float(1.0));
    controls.insert("Sharpness".to_string(), ControlValue::Float(1.0));
    controls.insert("ExposureValue".to_string(), ControlValue::Float(0.0));
    controls
}

// Maps a 0..100 slider position onto [min, max].
pub fn slider_to_native(slider: f64, min: f64, max: f64) -> f64 {
    min + (slider / 100.0) * (max - min)
}

// Inverse of slider_to_native(), truncated to an integer position. A
// zero-width range maps to 0.
pub fn native_to_slider(value: f64, min: f64, max: f64) -> i64 {
    if max - min == 0.0 {
        return 0;
    }
    (((value - min) / (max - min)) * 100.0) as i64
}

// Index of the EXPOSURE_TIMES_US entry nearest to `exposure_us`. Ties go to
// the shorter exposure.
pub fn closest_exposure_index(exposure_us: f64) -> usize {
    let mut best = 0;
    for (i, t) in EXPOSURE_TIMES_US.iter().enumerate() {
        if (*t as f64 - exposure_us).abs() < (EXPOSURE_TIMES_US[best] as f64 - exposure_us).abs() {
            best = i;
        }
    }
    best
}

fn bounds_for(ranges: &BTreeMap<String, ControlRange>, control: &str,
              fallback: (f64, f64)) -> (f64, f64) {
    ranges.get(control).and_then(ControlRange::numeric_bounds).unwrap_or(fallback)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SliderPositions {
    pub gain: i64,
    pub exposure_index: usize,
    pub exposure_times: Vec<i64>,
    pub brightness: i64,
    pub contrast: i64,
    pub sharpness: i64,
}

// Where the UI's sliders should sit given the device's current controls.
pub fn slider_positions(ranges: &BTreeMap<String, ControlRange>,
                        current: &ControlMap) -> SliderPositions {
    let mut positions = BTreeMap::<&str, i64>::new();
    for (slider, control, fallback, default_value) in SLIDER_CONTROLS {
        let (min, max) = bounds_for(ranges, control, *fallback);
        let value = current.get(*control).and_then(ControlValue::as_f64)
            .unwrap_or(*default_value);
        positions.insert(slider, native_to_slider(value, min, max));
    }
    let exposure = current.get("ExposureTime").and_then(ControlValue::as_f64)
        .unwrap_or(DEFAULT_EXPOSURE_US);
    SliderPositions{
        gain: positions["gain"],
        exposure_index: closest_exposure_index(exposure),
        exposure_times: EXPOSURE_TIMES_US.to_vec(),
        brightness: positions["brightness"],
        contrast: positions["contrast"],
        sharpness: positions["sharpness"],
    }
}

// Numbers arrive either as JSON numbers or numeric strings.
fn numeric(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

fn rect(value: &Value) -> Option<[i32; 4]> {
    let items = value.as_array()?;
    if items.len() != 4 {
        return None;
    }
    let mut rect = [0_i32; 4];
    for (slot, item) in rect.iter_mut().zip(items) {
        let n = numeric(item)?;
        if n < i32::MIN as f64 || n > i32::MAX as f64 {
            return None;
        }
        *slot = n.round() as i32;
    }
    Some(rect)
}

// Converts a request body of slider positions into device controls. Unknown
// keys and unusable values are dropped individually. Auto-exposure is turned
// off whenever any manual control results.
pub fn controls_from_request(request: &serde_json::Map<String, Value>,
                             ranges: &BTreeMap<String, ControlRange>) -> ControlMap {
    let mut controls = ControlMap::new();
    for (slider, control, fallback, _) in SLIDER_CONTROLS {
        let Some(value) = request.get(*slider) else {
            continue;
        };
        let Some(position) = numeric(value) else {
            debug!("Ignoring {} value {}", slider, value);
            continue;
        };
        let (min, max) = bounds_for(ranges, control, *fallback);
        let native = slider_to_native(position.clamp(0.0, 100.0), min, max);
        let native = match ranges.get(*control).map(|r| &r.default) {
            Some(ControlValue::Int(_)) => ControlValue::Int(native.round() as i64),
            _ => ControlValue::Float(native),
        };
        controls.insert(control.to_string(), native);
    }
    if let Some(value) = request.get("exposure_index") {
        let index = numeric(value).filter(|i| *i >= 0.0 && i.fract() == 0.0)
            .map(|i| i as usize);
        match index.and_then(|i| EXPOSURE_TIMES_US.get(i)) {
            Some(exposure) => {
                controls.insert("ExposureTime".to_string(), ControlValue::Int(*exposure));
            },
            None => debug!("Ignoring exposure_index value {}", value),
        }
    }
    if let Some(value) = request.get("ScalerCrop") {
        match rect(value) {
            Some(r) => { controls.insert("ScalerCrop".to_string(), ControlValue::Rect(r)); },
            None => debug!("Ignoring ScalerCrop value {}", value),
        }
    }
    if !controls.is_empty() {
        controls.insert("AeEnable".to_string(), ControlValue::Bool(false));
    }
    controls
}

// The subset of `controls` the device reports.
pub fn safe_controls(controls: &ControlMap,
                     ranges: &BTreeMap<String, ControlRange>) -> ControlMap {
    let mut safe = ControlMap::new();
    for (name, value) in controls {
        if ranges.contains_key(name) {
            safe.insert(name.clone(), value.clone());
        } else {
            debug!("Device does not support control {}", name);
        }
    }
    safe
}

// Sets the controls the device supports, silently skipping the rest. Returns
// the controls actually applied.
pub async fn safe_set_controls(device: &mut (dyn ImagingDevice + Send),
                               controls: &ControlMap)
                               -> Result<ControlMap, CanonicalError> {
    let safe = safe_controls(controls, &device.control_ranges());
    if !safe.is_empty() {
        info!("Setting controls: {}", describe_controls(&safe));
        device.set_controls(&safe).await?;
    }
    Ok(safe)
}

pub fn describe_controls(controls: &ControlMap) -> String {
    controls.iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<String>>()
        .join(", ")
}

// Multi-line table of the device's controls for the startup log.
pub fn control_table(ranges: &BTreeMap<String, ControlRange>) -> String {
    let mut table = format!("{:<25} {:<15} {:<15} {:<15}", "Control Name", "Min", "Max", "Default");
    for (name, range) in ranges {
        table.push_str(&format!("\n{:<25} {:<15} {:<15} {:<15}",
                                name, range.min.to_string(), range.max.to_string(),
                                range.default.to_string()));
    }
    table
}

// mod tests.
