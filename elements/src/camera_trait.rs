// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use canonical_error::CanonicalError;

// Which of the device's output streams a capture is taken from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamSelector {
    // Full sensor resolution.
    Main,
    // Reduced resolution preview stream.
    Lores,
}

// Value of a single device control. Devices report booleans, integers,
// floats, and rectangles (x, y, width, height; used for ScalerCrop).
#[derive(Clone, Debug, PartialEq)]
pub enum ControlValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Rect([i32; 4]),
}

impl ControlValue {
    // Numeric view of the value; None for booleans and rectangles.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ControlValue::Int(i) => Some(*i as f64),
            ControlValue::Float(f) => Some(*f),
            ControlValue::Bool(_) | ControlValue::Rect(_) => None,
        }
    }
}

impl fmt::Display for ControlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlValue::Bool(b) => write!(f, "{}", b),
            ControlValue::Int(i) => write!(f, "{}", i),
            ControlValue::Float(x) => write!(f, "{}", x),
            ControlValue::Rect(r) =>
                write!(f, "({}, {}, {}, {})", r[0], r[1], r[2], r[3]),
        }
    }
}

// The (min, max, default) triple a device reports for one of its controls.
#[derive(Clone, Debug, PartialEq)]
pub struct ControlRange {
    pub min: ControlValue,
    pub max: ControlValue,
    pub default: ControlValue,
}

impl ControlRange {
    pub fn new(min: ControlValue, max: ControlValue, default: ControlValue) -> Self {
        ControlRange{min, max, default}
    }

    // Returns (min, max) when both ends are numeric.
    pub fn numeric_bounds(&self) -> Option<(f64, f64)> {
        Some((self.min.as_f64()?, self.max.as_f64()?))
    }
}

pub type ControlMap = BTreeMap<String, ControlValue>;

// Interface to the camera. Implementations wrap a specific driver; the rest
// of the system only sees encoded frames and named controls.
#[async_trait]
pub trait ImagingDevice {
    // Returns a string identifying the sensor, e.g. "imx296".
    fn model(&self) -> String;

    // Full resolution sensor size (width, height).
    fn pixel_array_size(&self) -> (u32, u32);

    // Controls supported by the device, keyed by control name.
    fn control_ranges(&self) -> BTreeMap<String, ControlRange>;

    // Current values of the device's controls.
    fn current_controls(&self) -> ControlMap;

    // Applies the given controls. An error is returned if any control name is
    // not supported or a value has the wrong type; in that case no control is
    // changed.
    async fn set_controls(&mut self, controls: &ControlMap)
                          -> Result<(), CanonicalError>;

    // Captures a frame from the selected stream and returns it JPEG encoded.
    // Errors are transient I/O failures; a later call may succeed.
    async fn capture(&mut self, stream: StreamSelector)
                     -> Result<Vec<u8>, CanonicalError>;
}
