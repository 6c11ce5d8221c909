// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

pub mod annotator;
pub mod astrocam_server;
pub mod capture_engine;
pub mod controls;
pub mod fixture_pool;
pub mod http_server;
pub mod position_reporter;
pub mod rate_estimator;
pub mod shared_state;
pub mod solve_engine;
pub mod solver_subprocess;
pub mod system_stats;
