// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use canonical_error::{CanonicalError, deadline_exceeded_error,
                      failed_precondition_error, internal_error,
                      invalid_argument_error};
use image::GrayImage;
use log::{debug, info, warn};
use serde::Deserialize;
use tokio::process::Command;

use astrocam_elements::solver_trait::{PlateSolution, PlateSolverTrait,
                                      SolveParams, StarMatch};

// Slack given to the solver program beyond the timeout it is told to honor.
const TIMEOUT_GRACE: Duration = Duration::from_secs(1);

// Output protocol: the solver program prints one JSON object on the last
// non-empty line of stdout.
#[derive(Debug, Deserialize)]
struct SolverOutput {
    solution: Option<SolverSolution>,
}

#[derive(Debug, Deserialize)]
struct SolverSolution {
    ra: f64,
    dec: f64,
    roll: f64,
    t_solve_ms: f64,
    #[serde(default)]
    overlay: Option<PathBuf>,
    #[serde(default)]
    matched_stars: Vec<SolverStar>,
}

#[derive(Debug, Deserialize)]
struct SolverStar {
    // Catalog ids may be numbers or strings.
    id: serde_json::Value,
    x: f64,
    y: f64,
}

// Solution as parsed, before the overlay image is loaded.
#[derive(Debug, PartialEq)]
pub struct ParsedSolution {
    pub ra: f64,
    pub dec: f64,
    pub roll: f64,
    pub solve_duration: Duration,
    pub overlay: Option<PathBuf>,
    pub matched_stars: Vec<StarMatch>,
}

pub fn parse_solver_output(stdout: &str) -> Result<Option<ParsedSolution>, CanonicalError> {
    let Some(line) = stdout.lines().map(str::trim).rfind(|l| !l.is_empty()) else {
        return Err(invalid_argument_error("Solver produced no output"));
    };
    let output: SolverOutput = serde_json::from_str(line).map_err(|e| {
        invalid_argument_error(format!("Invalid solver output {:?}: {}", line, e).as_str())
    })?;
    let Some(solution) = output.solution else {
        return Ok(None);
    };
    if !solution.ra.is_finite() || !solution.dec.is_finite() || !solution.roll.is_finite() {
        return Err(invalid_argument_error(
            format!("Non-finite solver solution {:?}", solution).as_str()));
    }
    let matched_stars = solution.matched_stars.into_iter()
        .map(|s| StarMatch{
            catalog_id: match s.id {
                serde_json::Value::String(id) => id,
                other => other.to_string(),
            },
            x: s.x,
            y: s.y,
        })
        .collect();
    Ok(Some(ParsedSolution{
        ra: solution.ra,
        dec: solution.dec,
        roll: solution.roll,
        solve_duration: Duration::from_secs_f64(solution.t_solve_ms.max(0.0) / 1000.0),
        overlay: solution.overlay,
        matched_stars,
    }))
}

// Plate solver that runs an external program once per solve:
//   <command> <extra args> --image <png> --distortion <d> --timeout_ms <ms>
pub struct SubprocessSolver {
    command: PathBuf,
    extra_args: Vec<String>,
    default_timeout: Duration,
}

impl SubprocessSolver {
    pub fn new(command: PathBuf, extra_args: Vec<String>, default_timeout: Duration) -> Self {
        info!("Using solver command {:?} {:?}", command, extra_args);
        SubprocessSolver{command, extra_args, default_timeout}
    }
}

#[async_trait]
impl PlateSolverTrait for SubprocessSolver {
    async fn solve(&self, image: &GrayImage, params: &SolveParams)
                   -> Result<Option<PlateSolution>, CanonicalError> {
        let temp_dir = tempfile::tempdir().map_err(|e| {
            failed_precondition_error(format!("Could not create temp dir: {:?}", e).as_str())
        })?;
        let image_path = temp_dir.path().join("solve_input.png");
        let to_save = image.clone();
        let save_path = image_path.clone();
        tokio::task::spawn_blocking(move || to_save.save(&save_path))
            .await
            .map_err(|e| internal_error(format!("Image save task failed: {:?}", e).as_str()))?
            .map_err(|e| internal_error(format!("Error writing {:?}: {:?}", image_path, e).as_str()))?;

        let timeout = params.solve_timeout.unwrap_or(self.default_timeout);
        let distortion = params.distortion.unwrap_or(0.0);
        let child = Command::new(&self.command)
            .args(&self.extra_args)
            .arg("--image").arg(&image_path)
            .arg("--distortion").arg(distortion.to_string())
            .arg("--timeout_ms").arg(timeout.as_millis().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| failed_precondition_error(
                format!("Could not run solver {:?}: {:?}", self.command, e).as_str()))?;

        // On timeout the child is dropped, which kills it.
        let output = match tokio::time::timeout(timeout + TIMEOUT_GRACE,
                                                child.wait_with_output()).await {
            Ok(output) => output.map_err(|e| internal_error(
                format!("Error waiting for solver: {:?}", e).as_str()))?,
            Err(_) => {
                return Err(deadline_exceeded_error(
                    format!("Solver did not finish within {:?}", timeout).as_str()));
            }
        };
        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
            debug!("solver: {}", line);
        }
        if !output.status.success() {
            return Err(internal_error(
                format!("Solver exited with {}: {}", output.status, stderr.trim()).as_str()));
        }
        let Some(parsed) = parse_solver_output(&String::from_utf8_lossy(&output.stdout))? else {
            return Ok(None);
        };
        let overlay = match &parsed.overlay {
            Some(path) => match image::open(path) {
                Ok(img) => Some(img.to_rgb8()),
                Err(e) => {
                    warn!("Could not load solver overlay {:?}: {:?}", path, e);
                    None
                }
            },
            None => None,
        };
        Ok(Some(PlateSolution{
            ra: parsed.ra,
            dec: parsed.dec,
            roll: parsed.roll,
            solve_duration: parsed.solve_duration,
            overlay,
            matched_stars: parsed.matched_stars,
        }))
    }

    fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}

// mod tests.
