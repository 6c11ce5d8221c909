// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fs;
use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_circle_mut, draw_text_mut};
use log::{info, warn};

use astrocam_elements::image_utils::max_combine;
use astrocam_elements::solver_trait::PlateSolution;
use astrocam_elements::star_names::StarNames;

// Tried in order when no label font is given.
const SYSTEM_FONT_PATHS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/truetype/freefont/FreeSans.ttf",
];

const MARKER_COLOR: Rgb<u8> = Rgb([255, 210, 0]);
const LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

// Produces the solved image: the acquired image composited with the solver's
// overlay, with each matched star circled and labelled.
pub struct Annotator {
    star_names: StarNames,

    // Without a font only the markers are drawn.
    font: Option<FontArc>,
}

impl Annotator {
    pub fn new(star_names: StarNames, font: Option<FontArc>) -> Self {
        Annotator{star_names, font}
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn annotate(&self, image: &DynamicImage, solution: &PlateSolution) -> RgbImage {
        let base = image.to_rgb8();
        let mut annotated = match &solution.overlay {
            Some(overlay) => max_combine(&base, overlay),
            None => base,
        };
        let (width, height) = annotated.dimensions();
        let radius = (width.max(height) / 120).max(6) as i32;
        let scale = PxScale::from((height as f32 / 40.0).clamp(12.0, 48.0));
        for star in &solution.matched_stars {
            if !star.x.is_finite() || !star.y.is_finite() {
                continue;
            }
            let (x, y) = (star.x.round() as i32, star.y.round() as i32);
            draw_hollow_circle_mut(&mut annotated, (x, y), radius, MARKER_COLOR);
            if let Some(font) = &self.font {
                let label = self.star_names.label(&star.catalog_id);
                // Upper right of the marker.
                draw_text_mut(&mut annotated, LABEL_COLOR,
                              x + radius + 2, y - radius - scale.y as i32,
                              scale, font, &label);
            }
        }
        annotated
    }
}

// Loads the label font from `path`, or else from the first well known system
// location that has one. Returns None if no usable font is found.
pub fn load_font(path: Option<&Path>) -> Option<FontArc> {
    if let Some(path) = path {
        match read_font(path) {
            Some(font) => return Some(font),
            None => warn!("Could not load label font {:?}", path),
        }
    }
    for candidate in SYSTEM_FONT_PATHS {
        let candidate = Path::new(candidate);
        if !candidate.exists() {
            continue;
        }
        if let Some(font) = read_font(candidate) {
            info!("Using label font {:?}", candidate);
            return Some(font);
        }
    }
    warn!("No label font found; solved images will have markers only");
    None
}

fn read_font(path: &Path) -> Option<FontArc> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            warn!("Error reading font {:?}: {:?}", path, e);
            return None;
        }
    };
    match FontArc::try_from_vec(bytes) {
        Ok(font) => Some(font),
        Err(e) => {
            warn!("Invalid font {:?}: {:?}", path, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use image::{GrayImage, Luma};

    use astrocam_elements::solver_trait::StarMatch;
    use super::*;

    fn solution(overlay: Option<RgbImage>, stars: Vec<StarMatch>) -> PlateSolution {
        PlateSolution{
            ra: 88.79, dec: 7.41, roll: 0.0,
            solve_duration: Duration::from_millis(40),
            overlay,
            matched_stars: stars,
        }
    }

    fn black(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([0_u8])))
    }

    #[test]
    fn test_markers_at_centroids() {
        let annotator = Annotator::new(StarNames::default(), None);
        let stars = vec![StarMatch{catalog_id: "27989".to_string(), x: 50.0, y: 50.0}];
        let annotated = annotator.annotate(&black(200, 100), &solution(None, stars));
        assert_eq!(annotated.dimensions(), (200, 100));
        // Radius is 6 for this image size.
        assert_eq!(*annotated.get_pixel(50, 56), MARKER_COLOR);
        assert_eq!(*annotated.get_pixel(50, 44), MARKER_COLOR);
        // Centroid itself is not painted.
        assert_eq!(*annotated.get_pixel(50, 50), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_overlay_is_max_combined() {
        let annotator = Annotator::new(StarNames::default(), None);
        let mut overlay = RgbImage::from_pixel(100, 50, Rgb([0, 0, 0]));
        for x in 0..100 {
            overlay.put_pixel(x, 0, Rgb([200, 0, 0]));
        }
        // Overlay is half size; it gets stretched to the image.
        let annotated = annotator.annotate(&black(200, 100), &solution(Some(overlay), vec![]));
        assert_eq!(annotated.dimensions(), (200, 100));
        assert!(annotated.get_pixel(100, 0)[0] > 50);
        assert_eq!(*annotated.get_pixel(100, 80), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_off_image_and_invalid_stars_are_harmless() {
        let annotator = Annotator::new(StarNames::default(), load_font(None));
        let stars = vec![
            StarMatch{catalog_id: "1".to_string(), x: -500.0, y: 20.0},
            StarMatch{catalog_id: "2".to_string(), x: f64::NAN, y: 20.0},
            StarMatch{catalog_id: "3".to_string(), x: 199.0, y: 0.0},
        ];
        let annotated = annotator.annotate(&black(200, 100), &solution(None, stars));
        assert_eq!(annotated.dimensions(), (200, 100));
    }

    #[test]
    fn test_load_font_bad_path_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.ttf");
        fs::write(&bogus, b"not a font").unwrap();
        assert!(read_font(&bogus).is_none());
        // Falls through to the same system fonts as no path at all.
        assert_eq!(load_font(Some(&bogus)).is_some(), load_font(None).is_some());
    }
}  // mod tests.
