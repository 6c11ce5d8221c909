// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

pub mod astro_util;
pub mod camera_trait;
pub mod image_camera;
pub mod image_utils;
pub mod pointing_trait;
pub mod solver_trait;
pub mod star_names;
