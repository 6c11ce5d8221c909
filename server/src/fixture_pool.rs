// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fs;
use std::path::{Path, PathBuf};

use canonical_error::{CanonicalError, failed_precondition_error};
use glob::glob;
use log::warn;
use rand::seq::SliceRandom;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

// Pre-supplied images used in place of device captures when test mode is on.
// The directory is listed on every draw, so images can be added or removed
// while the server runs.
#[derive(Clone, Debug)]
pub struct FixturePool {
    dir: PathBuf,
}

impl FixturePool {
    pub fn new(dir: &Path) -> Self {
        FixturePool{dir: dir.to_path_buf()}
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // Image files currently in the pool, sorted. A missing directory is an
    // empty pool.
    pub fn list(&self) -> Vec<PathBuf> {
        let mut paths = Vec::<PathBuf>::new();
        if !self.dir.is_dir() {
            return paths;
        }
        for extension in IMAGE_EXTENSIONS {
            let pattern = self.dir.join(format!("*.{}", extension));
            let Some(pattern) = pattern.to_str() else {
                warn!("Fixture directory {:?} is not valid unicode", self.dir);
                return paths;
            };
            let entries = match glob(pattern) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Error globbing pattern {:?}: {:?}", pattern, e);
                    continue;
                }
            };
            for entry in entries {
                match entry {
                    Ok(path) => paths.push(path),
                    Err(e) => warn!("Error globbing pattern {:?}: {:?}", pattern, e),
                }
            }
        }
        paths.sort();
        paths
    }

    // Draws an image uniformly at random and returns its path and contents.
    // Returns None if the pool is empty.
    pub fn choose(&self) -> Result<Option<(PathBuf, Vec<u8>)>, CanonicalError> {
        let paths = self.list();
        let Some(path) = paths.choose(&mut rand::thread_rng()) else {
            return Ok(None);
        };
        let bytes = fs::read(path).map_err(|e| {
            failed_precondition_error(
                format!("Could not read fixture {:?}: {:?}", path, e).as_str())
        })?;
        Ok(Some((path.clone(), bytes)))
    }
}

// mod tests.
