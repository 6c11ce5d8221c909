// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use pico_args::Arguments;

use astrocam_elements::camera_trait::ImagingDevice;
use astrocam_elements::solver_trait::PlateSolverTrait;
use astrocam_server::astrocam_server::server_main;
use astrocam_server::solver_subprocess::SubprocessSolver;

const DEFAULT_SOLVE_TIMEOUT: Duration = Duration::from_secs(5);

fn get_dependencies(mut pargs: Arguments)
                    -> (Arc<tokio::sync::Mutex<dyn PlateSolverTrait + Send + Sync>>,
                        Option<Box<dyn ImagingDevice + Send>>) {
    let command: PathBuf = pargs.value_from_str("--solver_command")
        .unwrap_or(PathBuf::from("astrocam-solve"));
    let extra_args: Vec<String> = pargs.values_from_str("--solver_arg")
        .unwrap_or_default();
    let remaining = pargs.finish();
    if !remaining.is_empty() {
        warn!("Ignoring unrecognized arguments {:?}", remaining);
    }
    let solver = SubprocessSolver::new(command, extra_args, DEFAULT_SOLVE_TIMEOUT);
    (Arc::new(tokio::sync::Mutex::new(solver)), None)
}

fn main() {
    server_main("Astrocam",
                "Copyright (c) 2024 Steven Rosenthal smr@dt3.org.\n\
                 See LICENSE file in root directory for license terms.",
                get_dependencies);
}
