// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::time::Duration;

use async_trait::async_trait;
use canonical_error::CanonicalError;
use image::{GrayImage, RgbImage};

#[derive(Debug, Default, Clone)]
pub struct SolveParams {
    // Radial distortion hint. Positive is barrel, negative is pincushion.
    // None lets the solver use its own default.
    pub distortion: Option<f64>,

    pub solve_timeout: Option<Duration>,  // Default determined by implementation.
}

// A catalog star that the solver matched to an image centroid.
#[derive(Debug, Clone, PartialEq)]
pub struct StarMatch {
    // Catalog identifier, e.g. a Hipparcos number.
    pub catalog_id: String,

    // Centroid in image pixel coordinates (0,0 at upper left).
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone)]
pub struct PlateSolution {
    // Degrees. `ra` is 0..360, `dec` is -90..90.
    pub ra: f64,
    pub dec: f64,
    pub roll: f64,

    // Time spent by the solver itself.
    pub solve_duration: Duration,

    // Solver-rendered visualization of the match (star pattern, catalog
    // positions). Normally the same size as the solved image.
    pub overlay: Option<RgbImage>,

    pub matched_stars: Vec<StarMatch>,
}

// If a solve could be attempted, returns Ok with either the solution or None
// when no match was found. Errors:
//   DeadlineExceeded: the params.solve_timeout was reached.
//   InvalidArgument: the image could not be processed.
//   FailedPrecondition/Internal: the solver itself failed.
#[async_trait]
pub trait PlateSolverTrait {
    // Can take several seconds.
    async fn solve(&self, image: &GrayImage, params: &SolveParams)
                   -> Result<Option<PlateSolution>, CanonicalError>;

    // Returns the default SolveParams::solve_timeout value.
    fn default_timeout(&self) -> Duration;
}
