// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fs;

use log::debug;
use serde::Serialize;

const CPU_TEMP_PATH: &str = "/sys/class/thermal/thermal_zone0/temp";
const LOAD_AVG_PATH: &str = "/proc/loadavg";
const NOT_AVAILABLE: &str = "N/A";

// Host health figures shown by the UI. Either is "N/A" on hosts that don't
// expose it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SystemStats {
    pub cpu_temp: String,
    pub cpu_load: String,
}

// The thermal zone reports millidegrees Celsius.
pub fn parse_cpu_temp(contents: &str) -> Option<f64> {
    let millidegrees = contents.trim().parse::<f64>().ok()?;
    Some(millidegrees / 1000.0)
}

// First field of /proc/loadavg: the one minute load average.
pub fn parse_load_avg(contents: &str) -> Option<f64> {
    contents.split_whitespace().next()?.parse::<f64>().ok()
}

fn read(path: &str) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(contents) => Some(contents),
        Err(e) => {
            debug!("Could not read {}: {:?}", path, e);
            None
        }
    }
}

pub fn format_stats(cpu_temp: Option<f64>, cpu_load: Option<f64>) -> SystemStats {
    SystemStats{
        cpu_temp: cpu_temp.map_or(NOT_AVAILABLE.to_string(), |t| format!("{:.1} C", t)),
        cpu_load: cpu_load.map_or(NOT_AVAILABLE.to_string(), |l| format!("{:.2}", l)),
    }
}

pub fn read_system_stats() -> SystemStats {
    format_stats(read(CPU_TEMP_PATH).as_deref().and_then(parse_cpu_temp),
                 read(LOAD_AVG_PATH).as_deref().and_then(parse_load_avg))
}

// mod tests.
