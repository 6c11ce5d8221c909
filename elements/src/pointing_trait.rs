// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use async_trait::async_trait;
use canonical_error::CanonicalError;

// Receives solved boresight positions, e.g. to let a planetarium app show where
// the camera points.
#[async_trait]
pub trait PointingTrait {
    // `ra` and `dec` in degrees (J2000).
    async fn report_position(&self, ra: f64, dec: f64) -> Result<(), CanonicalError>;
}
