// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use canonical_error::{CanonicalError, invalid_argument_error};
use image::DynamicImage;
use image::imageops::FilterType;

use crate::camera_trait::{ControlMap, ControlRange, ControlValue,
                          ImagingDevice, StreamSelector};
use crate::image_utils::{fit_within, jpeg_encode};

// Size bound of the preview (low resolution) stream.
pub const LORES_WIDTH: u32 = 640;
pub const LORES_HEIGHT: u32 = 480;

// Shortest simulated frame time, regardless of ExposureTime.
pub const MIN_FRAME_TIME: Duration = Duration::from_micros(33_333);

// An ImagingDevice that returns the same still image for every capture. Used
// when no camera hardware is attached, and for demos. Controls are accepted
// and remembered but do not alter the image.
pub struct ImageCamera {
    image: DynamicImage,
    ranges: BTreeMap<String, ControlRange>,
    controls: ControlMap,
}

impl ImageCamera {
    pub fn new(image: DynamicImage) -> Result<Self, CanonicalError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(invalid_argument_error("ImageCamera image must not be empty"));
        }
        let (width, height) = (image.width() as i32, image.height() as i32);
        let ranges = default_control_ranges(width, height);
        let controls = ranges.iter()
            .map(|(name, range)| (name.clone(), range.default.clone()))
            .collect();
        Ok(ImageCamera{image, ranges, controls})
    }

    // Simulated exposure: the current ExposureTime (microseconds), but no
    // shorter than MIN_FRAME_TIME.
    pub fn frame_time(&self) -> Duration {
        let exposure_us = self.controls.get("ExposureTime")
            .and_then(|v| v.as_f64())
            .filter(|us| us.is_finite() && *us > 0.0)
            .unwrap_or(0.0);
        Duration::from_secs_f64(exposure_us / 1_000_000.0).max(MIN_FRAME_TIME)
    }
}

// Control table modelled on the Raspberry Pi camera stack.
fn default_control_ranges(width: i32, height: i32) -> BTreeMap<String, ControlRange> {
    use ControlValue::{Bool, Float, Int, Rect};
    let mut ranges = BTreeMap::new();
    ranges.insert("AnalogueGain".to_string(),
                  ControlRange::new(Float(1.0), Float(251.1886444091797), Float(1.0)));
    ranges.insert("ExposureTime".to_string(),
                  ControlRange::new(Int(1), Int(66666666), Int(10000)));
    ranges.insert("Brightness".to_string(),
                  ControlRange::new(Float(-1.0), Float(1.0), Float(0.0)));
    ranges.insert("Contrast".to_string(),
                  ControlRange::new(Float(0.0), Float(32.0), Float(1.0)));
    ranges.insert("Sharpness".to_string(),
                  ControlRange::new(Float(0.0), Float(16.0), Float(1.0)));
    ranges.insert("ExposureValue".to_string(),
                  ControlRange::new(Float(-8.0), Float(8.0), Float(0.0)));
    ranges.insert("AeEnable".to_string(),
                  ControlRange::new(Bool(false), Bool(true), Bool(true)));
    ranges.insert("ScalerCrop".to_string(),
                  ControlRange::new(Rect([0, 0, 64, 64]),
                                    Rect([0, 0, width, height]),
                                    Rect([0, 0, width, height])));
    ranges
}

fn same_kind(a: &ControlValue, b: &ControlValue) -> bool {
    matches!((a, b),
             (ControlValue::Bool(_), ControlValue::Bool(_)) |
             (ControlValue::Int(_), ControlValue::Int(_)) |
             (ControlValue::Float(_), ControlValue::Float(_)) |
             (ControlValue::Rect(_), ControlValue::Rect(_)))
}

#[async_trait]
impl ImagingDevice for ImageCamera {
    fn model(&self) -> String {
        "ImageCamera".to_string()
    }

    fn pixel_array_size(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    fn control_ranges(&self) -> BTreeMap<String, ControlRange> {
        self.ranges.clone()
    }

    fn current_controls(&self) -> ControlMap {
        self.controls.clone()
    }

    async fn set_controls(&mut self, controls: &ControlMap)
                          -> Result<(), CanonicalError> {
        for (name, value) in controls {
            let Some(range) = self.ranges.get(name) else {
                return Err(invalid_argument_error(
                    format!("Unsupported control {}", name).as_str()));
            };
            // Ints are accepted for float controls and vice versa.
            let numeric_pair = value.as_f64().is_some() && range.default.as_f64().is_some();
            if !numeric_pair && !same_kind(value, &range.default) {
                return Err(invalid_argument_error(
                    format!("Wrong value type for control {}: {}", name, value)
                        .as_str()));
            }
        }
        for (name, value) in controls {
            self.controls.insert(name.clone(), value.clone());
        }
        Ok(())
    }

    async fn capture(&mut self, stream: StreamSelector)
                     -> Result<Vec<u8>, CanonicalError> {
        tokio::time::sleep(self.frame_time()).await;
        match stream {
            StreamSelector::Main => jpeg_encode(&self.image),
            StreamSelector::Lores => {
                let (width, height) = fit_within(
                    self.image.width(), self.image.height(),
                    LORES_WIDTH, LORES_HEIGHT);
                if (width, height) == (self.image.width(), self.image.height()) {
                    return jpeg_encode(&self.image);
                }
                let scaled = self.image.resize_exact(width, height, FilterType::Triangle);
                jpeg_encode(&scaled)
            }
        }
    }
}

// mod tests.
