// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::sync::Arc;

use canonical_error::{CanonicalError, invalid_argument_error};
use log::debug;

use ascom_alpaca::{ASCOMError, ASCOMErrorCode, ASCOMResult, Server};
use ascom_alpaca::api::{AlignmentMode, Axis, CargoServerInfo,
                        Device, EquatorialSystem, Telescope};
use async_trait::async_trait;

use astrocam_elements::pointing_trait::PointingTrait;

#[derive(Default, Debug)]
pub struct TelescopePosition {
    // Most recent solved pointing.
    pub ra: f64,  // 0..360
    pub dec: f64, // -90..90
    // False until the first solve is reported.
    pub valid: bool,

    // Planetarium apps call right_ascension() followed by declination(). The
    // right_ascension() call saves the Dec corresponding to the RA it returns,
    // so the subsequent call to declination() returns a consistent value.
    pub snapshot_dec: Option<f64>,

    // Set by the planetarium app, if it is configured to send its location.
    pub site_latitude: Option<f64>,  // -90..90
    pub site_longitude: Option<f64>,  // -180..180, positive east.
}

impl TelescopePosition {
    pub fn new() -> Self {
        // Sky Safari doesn't display (0.0, 0.0).
        TelescopePosition{ra: 180.0, dec: 0.0, ..Default::default()}
    }
}

// Telescope emulation: reports the solved pointing as though it were a mount's
// position. Slewing and syncing are not supported.
#[derive(Debug)]
struct MyTelescope {
    telescope_position: Arc<tokio::sync::Mutex<TelescopePosition>>,

    // There is no way to signal that the position is not valid. We instead
    // "animate" the reported position until a solve is reported.
    reads_while_invalid: tokio::sync::Mutex<i32>,
}

impl MyTelescope {
    pub fn new(telescope_position: Arc<tokio::sync::Mutex<TelescopePosition>>) -> Self {
        MyTelescope{ telescope_position,
                     reads_while_invalid: tokio::sync::Mutex::new(0) }
    }

    fn value_not_set_error(msg: &str) -> ASCOMError {
        ASCOMError{code: ASCOMErrorCode::VALUE_NOT_SET,
                   message: std::borrow::Cow::Owned(msg.to_string())}
    }
}

#[async_trait]
impl Device for MyTelescope {
    fn static_name(&self) -> &str { "AstrocamTelescopeEmulator" }
    fn unique_id(&self) -> &str { "AstrocamTelescopeEmulator-7" }

    async fn connected(&self) -> ASCOMResult<bool> { Ok(true) }
    async fn set_connected(&self, _connected: bool) -> ASCOMResult { Ok(()) }
}

#[async_trait]
impl Telescope for MyTelescope {
    async fn alignment_mode(&self) -> ASCOMResult<AlignmentMode> {
        Ok(AlignmentMode::Polar)
    }

    async fn equatorial_system(&self) -> ASCOMResult<EquatorialSystem> {
        Ok(EquatorialSystem::J2000)
    }

    // Hours.
    async fn right_ascension(&self) -> ASCOMResult<f64> {
        debug!("right_ascension");
        let mut locked_position = self.telescope_position.lock().await;
        locked_position.snapshot_dec = Some(locked_position.dec);
        Ok(locked_position.ra / 15.0)
    }
    // Degrees.
    async fn declination(&self) -> ASCOMResult<f64> {
        debug!("declination");
        let mut locked_position = self.telescope_position.lock().await;
        let dec = locked_position.snapshot_dec.take().unwrap_or(locked_position.dec);
        if locked_position.valid {
            return Ok(dec);
        }
        let mut locked_reads = self.reads_while_invalid.lock().await;
        *locked_reads += 1;
        if *locked_reads & 1 == 0 {
            Ok(if dec > 0.0 { dec - 0.1 } else { dec + 0.1 })
        } else {
            Ok(dec)
        }
    }

    async fn can_move_axis(&self, _axis: Axis) -> ASCOMResult<bool> {
        Ok(false)
    }
    async fn can_slew_async(&self) -> ASCOMResult<bool> {
        Ok(false)
    }
    async fn can_sync(&self) -> ASCOMResult<bool> {
        Ok(false)
    }

    async fn set_site_latitude(&self, site_lat: f64) -> ASCOMResult {
        debug!("set_site_latitude {}", site_lat);
        self.telescope_position.lock().await.site_latitude = Some(site_lat);
        Ok(())
    }
    async fn site_latitude(&self) -> ASCOMResult<f64> {
        self.telescope_position.lock().await.site_latitude
            .ok_or_else(|| Self::value_not_set_error("site latitude"))
    }
    async fn set_site_longitude(&self, site_lon: f64) -> ASCOMResult {
        debug!("set_site_longitude {}", site_lon);
        self.telescope_position.lock().await.site_longitude = Some(site_lon);
        Ok(())
    }
    async fn site_longitude(&self) -> ASCOMResult<f64> {
        self.telescope_position.lock().await.site_longitude
            .ok_or_else(|| Self::value_not_set_error("site longitude"))
    }

    async fn tracking(&self) -> ASCOMResult<bool> {
        Ok(false)
    }
    async fn can_set_tracking(&self) -> ASCOMResult<bool> {
        Ok(false)
    }
}

pub fn create_alpaca_server(telescope_position: Arc<tokio::sync::Mutex<TelescopePosition>>,
                            port: u16) -> Server {
    let mut server = Server {
        info: CargoServerInfo!(),
        ..Default::default()
    };
    server.listen_addr.set_port(port);
    server.devices.register(MyTelescope::new(telescope_position));
    server
}

// Forwards solved coordinates to the telescope emulator.
pub struct AlpacaPointing {
    telescope_position: Arc<tokio::sync::Mutex<TelescopePosition>>,
}

impl AlpacaPointing {
    pub fn new(telescope_position: Arc<tokio::sync::Mutex<TelescopePosition>>) -> Self {
        AlpacaPointing{telescope_position}
    }
}

#[async_trait]
impl PointingTrait for AlpacaPointing {
    async fn report_position(&self, ra: f64, dec: f64) -> Result<(), CanonicalError> {
        if !ra.is_finite() || !(-90.0..=90.0).contains(&dec) {
            return Err(invalid_argument_error(
                format!("Invalid position ra={} dec={}", ra, dec).as_str()));
        }
        let mut locked_position = self.telescope_position.lock().await;
        locked_position.ra = ra.rem_euclid(360.0);
        locked_position.dec = dec;
        locked_position.valid = true;
        Ok(())
    }
}

// mod tests.
