// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use canonical_error::{CanonicalError, internal_error};
use image::DynamicImage;
use log::{debug, info, warn};

use astrocam_elements::astro_util::{constellation_from_equatorial,
                                    format_dec_dms, format_ra_hms};
use astrocam_elements::camera_trait::{ImagingDevice, StreamSelector};
use astrocam_elements::image_utils::{decode_image, jpeg_encode};
use astrocam_elements::pointing_trait::PointingTrait;
use astrocam_elements::solver_trait::{PlateSolution, PlateSolverTrait, SolveParams};

use crate::annotator::Annotator;
use crate::fixture_pool::FixturePool;
use crate::rate_estimator::RateCounter;
use crate::shared_state::{Astrometry, SharedState, SolveOutcome};

// Added to the solve timeout before an attempt gives up on the solver.
const SOLVE_TIMEOUT_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct SolveSettings {
    // Radial distortion hint passed to every solve.
    pub distortion: f64,

    // None means the solver's default timeout.
    pub solve_timeout: Option<Duration>,

    // Solve rate is reported once per this interval.
    pub solve_rate_interval: Duration,
}

impl Default for SolveSettings {
    fn default() -> Self {
        SolveSettings{
            distortion: 0.0,
            solve_timeout: None,
            solve_rate_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveRequestOutcome {
    // An attempt with this number is running.
    Started{attempt: u64},
    // Pause flag is set; nothing was attempted.
    Paused,
    // Another attempt is in progress; this request was rejected.
    Busy,
}

// Why an attempt ended Failed.
#[derive(Debug)]
enum AttemptFailure {
    NoFixtures,
    Acquisition(CanonicalError),
    Decode(CanonicalError),
    NoSolution,
    InvalidSolution,
    Solver(CanonicalError),
    Timeout(Duration),
    Annotation(CanonicalError),
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::NoFixtures => write!(f, "no fixtures available"),
            AttemptFailure::Acquisition(e) => write!(f, "image acquisition failed: {}", e),
            AttemptFailure::Decode(e) => write!(f, "could not decode image: {}", e),
            AttemptFailure::NoSolution => write!(f, "no solution found"),
            AttemptFailure::InvalidSolution => write!(f, "solver returned a non-finite position"),
            AttemptFailure::Solver(e) => write!(f, "solver error: {}", e),
            AttemptFailure::Timeout(t) => write!(f, "solver timed out after {:?}", t),
            AttemptFailure::Annotation(e) => write!(f, "could not render solved image: {}", e),
        }
    }
}

// Everything a solve attempt needs; shared by all attempts.
struct SolveContext {
    // Shared with the capture engine.
    camera: Arc<tokio::sync::Mutex<Box<dyn ImagingDevice + Send>>>,

    solver: Arc<tokio::sync::Mutex<dyn PlateSolverTrait + Send + Sync>>,

    state: Arc<SharedState>,

    fixtures: FixturePool,

    // Told about each solved position. Failures are only logged.
    pointing: Option<Arc<dyn PointingTrait + Send + Sync>>,

    annotator: Annotator,

    settings: SolveSettings,

    // Counts finished attempts; drained by the rate aggregator.
    solve_counter: Mutex<RateCounter>,
}

// Runs solve attempts on request. At most one attempt runs at a time.
pub struct SolveEngine {
    context: Arc<SolveContext>,

    // Held by the running attempt.
    gate: Arc<tokio::sync::Mutex<()>>,

    // Publishes the solve rate.
    aggregator: Option<tokio::task::JoinHandle<()>>,
}

impl SolveEngine {
    pub fn new(camera: Arc<tokio::sync::Mutex<Box<dyn ImagingDevice + Send>>>,
               solver: Arc<tokio::sync::Mutex<dyn PlateSolverTrait + Send + Sync>>,
               state: Arc<SharedState>,
               fixtures: FixturePool,
               pointing: Option<Arc<dyn PointingTrait + Send + Sync>>,
               annotator: Annotator,
               settings: SolveSettings) -> Self {
        let solve_counter = Mutex::new(RateCounter::new(settings.solve_rate_interval, now()));
        SolveEngine{
            context: Arc::new(SolveContext{
                camera, solver, state, fixtures, pointing, annotator, settings,
                solve_counter,
            }),
            gate: Arc::new(tokio::sync::Mutex::new(())),
            aggregator: None,
        }
    }

    // Returns true while an attempt is running.
    pub fn busy(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    // Starts an attempt in the background and returns without waiting for it.
    pub async fn request_solve(&self) -> SolveRequestOutcome {
        let state = &self.context.state;
        // The running attempt owns the solve record; leave it alone.
        let Ok(guard) = self.gate.clone().try_lock_owned() else {
            debug!("Solve requested while another is in progress");
            return SolveRequestOutcome::Busy;
        };
        if state.paused() {
            state.mark_paused().await;
            drop(guard);
            debug!("Solve requested while paused");
            return SolveRequestOutcome::Paused;
        }
        // Mode is fixed for the whole attempt.
        let test_mode = state.test_mode();
        let attempt = state.begin_attempt().await;
        let context = self.context.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let start = Instant::now();
            let outcome = Self::run_attempt(&context, test_mode).await;
            match &outcome {
                SolveOutcome::Solved{astrometry, ..} => {
                    info!("Solve attempt {} solved: RA {} Dec {} ({}) in {:?}",
                          attempt, astrometry.ra_hms, astrometry.dec_dms,
                          astrometry.constellation, start.elapsed());
                },
                SolveOutcome::Failed{error, ..} => {
                    info!("Solve attempt {} failed: {}", attempt,
                          error.as_deref().unwrap_or("unknown"));
                },
            }
            context.state.publish_outcome(attempt, outcome).await;
            context.solve_counter.lock().unwrap().record();
        });
        SolveRequestOutcome::Started{attempt}
    }

    // Starts the task that publishes the solve rate once per interval.
    pub fn start_rate_aggregator(&mut self) {
        if self.aggregator.as_ref().is_some_and(|a| !a.is_finished()) {
            return;
        }
        let context = self.context.clone();
        self.aggregator = Some(tokio::spawn(async move {
            let interval = context.settings.solve_rate_interval;
            loop {
                tokio::time::sleep(interval).await;
                let rate = context.solve_counter.lock().unwrap().poll(now());
                if let Some(rate) = rate {
                    context.state.set_solve_rate(rate).await;
                }
            }
        }));
    }

    async fn run_attempt(context: &Arc<SolveContext>, test_mode: bool) -> SolveOutcome {
        let acquired = match Self::acquire(context, test_mode).await {
            Ok(bytes) => Arc::new(bytes),
            Err(failure) => return Self::failed(None, failure),
        };

        // Decode off the async threads. The preview published on failure is
        // the acquired bytes when they're already JPEG.
        let input = acquired.clone();
        let decoded = tokio::task::spawn_blocking(
            move || -> Result<(DynamicImage, Arc<Vec<u8>>), CanonicalError> {
                let image = decode_image(&input)?;
                let preview = if is_jpeg(&input) {
                    input
                } else {
                    Arc::new(jpeg_encode(&image)?)
                };
                Ok((image, preview))
            }).await;
        let (image, preview) = match flatten(decoded) {
            Ok(d) => d,
            Err(e) => return Self::failed(None, AttemptFailure::Decode(e)),
        };

        let gray = image.to_luma8();
        let solver_timeout = match context.settings.solve_timeout {
            Some(t) => t,
            None => context.solver.lock().await.default_timeout(),
        };
        let params = SolveParams{
            distortion: Some(context.settings.distortion),
            solve_timeout: Some(solver_timeout),
        };
        let limit = solver_timeout + SOLVE_TIMEOUT_GRACE;
        let solve_result = tokio::time::timeout(limit, async {
            context.solver.lock().await.solve(&gray, &params).await
        }).await;
        let solution = match solve_result {
            Ok(Ok(Some(solution))) => solution,
            Ok(Ok(None)) => return Self::failed(Some(preview), AttemptFailure::NoSolution),
            Ok(Err(e)) => return Self::failed(Some(preview), AttemptFailure::Solver(e)),
            Err(_) => return Self::failed(Some(preview), AttemptFailure::Timeout(limit)),
        };
        if ![solution.ra, solution.dec, solution.roll].iter().all(|v| v.is_finite()) {
            return Self::failed(Some(preview), AttemptFailure::InvalidSolution);
        }

        let astrometry = make_astrometry(&solution);
        let (ra, dec) = (solution.ra, solution.dec);
        let cloned_context = context.clone();
        let annotated = tokio::task::spawn_blocking(move || {
            let annotated = cloned_context.annotator.annotate(&image, &solution);
            jpeg_encode(&DynamicImage::ImageRgb8(annotated))
        }).await;
        let annotated_jpeg = match flatten(annotated) {
            Ok(jpeg) => Arc::new(jpeg),
            Err(e) => return Self::failed(Some(preview), AttemptFailure::Annotation(e)),
        };

        if let Some(pointing) = context.pointing.clone() {
            tokio::spawn(async move {
                if let Err(e) = pointing.report_position(ra, dec).await {
                    warn!("Could not report position to pointing service: {}", e);
                }
            });
        }
        SolveOutcome::Solved{astrometry, annotated_jpeg}
    }

    async fn acquire(context: &SolveContext, test_mode: bool)
                     -> Result<Vec<u8>, AttemptFailure> {
        if test_mode {
            let fixtures = context.fixtures.clone();
            let chosen = tokio::task::spawn_blocking(move || fixtures.choose()).await;
            return match flatten(chosen) {
                Ok(Some((path, bytes))) => {
                    debug!("Solving fixture {:?}", path);
                    Ok(bytes)
                },
                Ok(None) => Err(AttemptFailure::NoFixtures),
                Err(e) => Err(AttemptFailure::Acquisition(e)),
            };
        }
        let captured = context.camera.lock().await.capture(StreamSelector::Lores).await;
        match captured {
            Ok(bytes) if bytes.is_empty() => Err(AttemptFailure::Acquisition(
                internal_error("device returned an empty image"))),
            Ok(bytes) => Ok(bytes),
            Err(e) => Err(AttemptFailure::Acquisition(e)),
        }
    }

    fn failed(image: Option<Arc<Vec<u8>>>, failure: AttemptFailure) -> SolveOutcome {
        SolveOutcome::Failed{image, error: Some(failure.to_string())}
    }
}

impl Drop for SolveEngine {
    fn drop(&mut self) {
        if let Some(aggregator) = self.aggregator.take() {
            aggregator.abort();
        }
    }
}

fn make_astrometry(solution: &PlateSolution) -> Astrometry {
    Astrometry{
        ra: format!("{:.4}", solution.ra),
        dec: format!("{:.4}", solution.dec),
        roll: format!("{:.4}", solution.roll),
        ra_hms: format_ra_hms(solution.ra),
        dec_dms: format_dec_dms(solution.dec),
        constellation: constellation_from_equatorial(solution.ra, solution.dec).to_string(),
        solution_time: format!("{:.1}", solution.solve_duration.as_secs_f64() * 1000.0),
    }
}

fn is_jpeg(bytes: &[u8]) -> bool {
    bytes.starts_with(&[0xff, 0xd8, 0xff])
}

fn flatten<T>(joined: Result<Result<T, CanonicalError>, tokio::task::JoinError>)
              -> Result<T, CanonicalError> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(internal_error(format!("Worker task failed: {:?}", e).as_str())),
    }
}

// Follows the tokio clock, which tests can pause and advance.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

#[cfg(test)]
mod tests {
    extern crate approx;
    use std::fs;
    use std::sync::atomic::{AtomicU64, Ordering};

    use approx::assert_abs_diff_eq;
    use async_trait::async_trait;
    use canonical_error::unavailable_error;
    use image::{GrayImage, Luma};

    use astrocam_elements::image_camera::ImageCamera;
    use astrocam_elements::solver_trait::StarMatch;
    use astrocam_elements::star_names::StarNames;
    use crate::shared_state::{SOLVED_IMAGE_URL, SolveStatus};
    use super::*;

    #[derive(Clone, Copy)]
    enum Behavior {
        // RA is 10 degrees times the call number.
        Solve,
        NoSolution,
        // Solves with a NaN declination.
        NonFinite,
        Error,
        Hang,
    }

    struct FakeSolver {
        behavior: Behavior,
        delay: Duration,
        calls: Arc<AtomicU64>,
    }

    #[async_trait]
    impl PlateSolverTrait for FakeSolver {
        async fn solve(&self, image: &GrayImage, params: &SolveParams)
                       -> Result<Option<PlateSolution>, CanonicalError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            assert_eq!(params.distortion, Some(0.0));
            tokio::time::sleep(self.delay).await;
            match self.behavior {
                Behavior::Solve => Ok(Some(PlateSolution{
                    ra: if call == 1 { 88.792939 } else { 10.0 * call as f64 },
                    dec: 7.407064,
                    roll: 12.0,
                    solve_duration: Duration::from_millis(41),
                    overlay: None,
                    matched_stars: vec![StarMatch{
                        catalog_id: "27989".to_string(),
                        x: image.width() as f64 / 2.0,
                        y: image.height() as f64 / 2.0}],
                })),
                Behavior::NoSolution => Ok(None),
                Behavior::NonFinite => Ok(Some(PlateSolution{
                    ra: 88.0,
                    dec: f64::NAN,
                    roll: 0.0,
                    solve_duration: Duration::from_millis(41),
                    overlay: None,
                    matched_stars: vec![],
                })),
                Behavior::Error => Err(unavailable_error("solver crashed")),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(None)
                },
            }
        }

        fn default_timeout(&self) -> Duration {
            Duration::from_secs(5)
        }
    }

    #[derive(Default)]
    struct FakePointing {
        reports: Mutex<Vec<(f64, f64)>>,
    }

    #[async_trait]
    impl PointingTrait for FakePointing {
        async fn report_position(&self, ra: f64, dec: f64) -> Result<(), CanonicalError> {
            self.reports.lock().unwrap().push((ra, dec));
            Err(unavailable_error("nobody listening"))
        }
    }

    struct Fixture {
        engine: SolveEngine,
        state: Arc<SharedState>,
        camera: Arc<tokio::sync::Mutex<Box<dyn ImagingDevice + Send>>>,
        calls: Arc<AtomicU64>,
        pointing: Arc<FakePointing>,
        fixtures_dir: tempfile::TempDir,
    }

    fn make_fixture(behavior: Behavior, delay: Duration, settings: SolveSettings) -> Fixture {
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(96, 64, Luma([30_u8])));
        let device: Box<dyn ImagingDevice + Send> = Box::new(ImageCamera::new(image).unwrap());
        let camera = Arc::new(tokio::sync::Mutex::new(device));
        let calls = Arc::new(AtomicU64::new(0));
        let solver = Arc::new(tokio::sync::Mutex::new(
            FakeSolver{behavior, delay, calls: calls.clone()}));
        let state = Arc::new(SharedState::new());
        let fixtures_dir = tempfile::tempdir().unwrap();
        let pointing = Arc::new(FakePointing::default());
        let engine = SolveEngine::new(
            camera.clone(), solver, state.clone(),
            FixturePool::new(fixtures_dir.path()),
            Some(pointing.clone()),
            Annotator::new(StarNames::default(), None),
            settings);
        Fixture{engine, state, camera, calls, pointing, fixtures_dir}
    }

    // Waits (real time bounded) for the running attempt to finish.
    async fn wait_done(engine: &SolveEngine) {
        let deadline = std::time::Instant::now() + Duration::from_secs(20);
        while engine.busy() {
            assert!(std::time::Instant::now() < deadline, "attempt did not finish");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn capture_lores(camera: &Arc<tokio::sync::Mutex<Box<dyn ImagingDevice + Send>>>)
                           -> Vec<u8> {
        camera.lock().await.capture(StreamSelector::Lores).await.unwrap()
    }

    #[tokio::test]
    async fn test_solved_attempt() {
        let f = make_fixture(Behavior::Solve, Duration::ZERO, SolveSettings::default());
        assert_eq!(f.engine.request_solve().await, SolveRequestOutcome::Started{attempt: 1});
        wait_done(&f.engine).await;

        let record = f.state.solve_record().await;
        assert_eq!(record.status, SolveStatus::Solved);
        let result = record.result.unwrap();
        let astrometry = result.astrometry.unwrap();
        assert_eq!(astrometry.ra, "88.7929");
        assert_eq!(astrometry.dec, "7.4071");
        assert_eq!(astrometry.roll, "12.0000");
        assert_eq!(astrometry.ra_hms, "05:55:10.3");
        assert_eq!(astrometry.ra_hms.len(), 10);
        assert_eq!(astrometry.dec_dms, "+07:24:25.4");
        assert_eq!(astrometry.dec_dms.len(), 11);
        assert_eq!(astrometry.constellation, "Orion");
        assert_eq!(astrometry.solution_time, "41.0");
        assert_eq!(result.solved_image_url.as_deref(), Some(SOLVED_IMAGE_URL));
        assert!(record.error.is_none());

        let solved = f.state.solved_image().await.unwrap();
        let decoded = decode_image(&solved.jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (96, 64));

        // Pointing report is fire and forget; its failure doesn't matter.
        for _ in 0..100 {
            if !f.pointing.reports.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let reports = f.pointing.reports.lock().unwrap().clone();
        assert_eq!(reports.len(), 1);
        assert_abs_diff_eq!(reports[0].0, 88.792939, epsilon = 1e-9);
        assert_eq!(f.state.solve_record().await.status, SolveStatus::Solved);
    }

    #[tokio::test]
    async fn test_no_solution_serves_input() {
        let f = make_fixture(Behavior::NoSolution, Duration::ZERO, SolveSettings::default());
        f.engine.request_solve().await;
        wait_done(&f.engine).await;

        let record = f.state.solve_record().await;
        assert_eq!(record.status, SolveStatus::Failed);
        let result = record.result.unwrap();
        assert!(result.astrometry.is_none());
        assert_eq!(result.solved_image_url.as_deref(), Some(SOLVED_IMAGE_URL));
        assert_eq!(record.error.as_deref(), Some("no solution found"));
        // Unannotated input.
        assert_eq!(*f.state.solved_image().await.unwrap().jpeg, capture_lores(&f.camera).await);
        assert!(f.pointing.reports.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_test_mode_without_fixtures() {
        let f = make_fixture(Behavior::Solve, Duration::ZERO, SolveSettings::default());
        f.state.set_test_mode(true);
        f.engine.request_solve().await;
        wait_done(&f.engine).await;

        let record = f.state.solve_record().await;
        assert_eq!(record.status, SolveStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("no fixtures available"));
        assert!(record.result.unwrap().solved_image_url.is_none());
        assert!(f.state.solved_image().await.is_none());
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_test_mode_uses_fixture() {
        let f = make_fixture(Behavior::NoSolution, Duration::ZERO, SolveSettings::default());
        let fixture_jpeg = jpeg_encode(&DynamicImage::ImageLuma8(
            GrayImage::from_pixel(40, 30, Luma([200_u8])))).unwrap();
        fs::write(f.fixtures_dir.path().join("field.jpg"), &fixture_jpeg).unwrap();
        f.state.set_test_mode(true);
        f.engine.request_solve().await;
        // Changing the mode mid-attempt doesn't affect it.
        f.state.set_test_mode(false);
        wait_done(&f.engine).await;

        assert_eq!(f.state.solve_record().await.status, SolveStatus::Failed);
        assert_eq!(*f.state.solved_image().await.unwrap().jpeg, fixture_jpeg);
    }

    #[tokio::test]
    async fn test_undecodable_fixture() {
        let f = make_fixture(Behavior::Solve, Duration::ZERO, SolveSettings::default());
        fs::write(f.fixtures_dir.path().join("broken.jpg"), b"not really").unwrap();
        f.state.set_test_mode(true);
        f.engine.request_solve().await;
        wait_done(&f.engine).await;

        let record = f.state.solve_record().await;
        assert_eq!(record.status, SolveStatus::Failed);
        assert!(record.error.unwrap().starts_with("could not decode image"));
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_solver_error_keeps_image() {
        let f = make_fixture(Behavior::Error, Duration::ZERO, SolveSettings::default());
        f.engine.request_solve().await;
        wait_done(&f.engine).await;

        let record = f.state.solve_record().await;
        assert_eq!(record.status, SolveStatus::Failed);
        assert!(record.error.unwrap().starts_with("solver error"));
        assert!(f.state.solved_image().await.is_some());
    }

    #[tokio::test]
    async fn test_non_finite_solution_fails() {
        let f = make_fixture(Behavior::NonFinite, Duration::ZERO, SolveSettings::default());
        f.engine.request_solve().await;
        wait_done(&f.engine).await;

        let record = f.state.solve_record().await;
        assert_eq!(record.status, SolveStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("solver returned a non-finite position"));
        assert!(record.result.unwrap().astrometry.is_none());
        assert!(f.state.solved_image().await.is_some());
        assert!(f.pointing.reports.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_solver_timeout() {
        let settings = SolveSettings{solve_timeout: Some(Duration::from_millis(100)),
                                     ..Default::default()};
        let f = make_fixture(Behavior::Hang, Duration::ZERO, settings);
        f.engine.request_solve().await;
        wait_done(&f.engine).await;

        let record = f.state.solve_record().await;
        assert_eq!(record.status, SolveStatus::Failed);
        assert!(record.error.unwrap().starts_with("solver timed out"));
        assert!(f.state.solved_image().await.is_some());
    }

    #[tokio::test]
    async fn test_paused_request() {
        let f = make_fixture(Behavior::Solve, Duration::ZERO, SolveSettings::default());
        f.state.set_paused(true);
        assert_eq!(f.engine.request_solve().await, SolveRequestOutcome::Paused);
        assert!(!f.engine.busy());
        let record = f.state.solve_record().await;
        assert_eq!(record.status, SolveStatus::Paused);
        assert_eq!(record.attempt, 0);
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pause_while_busy_leaves_attempt_alone() {
        let f = make_fixture(Behavior::Solve, Duration::from_millis(300),
                             SolveSettings::default());
        assert_eq!(f.engine.request_solve().await, SolveRequestOutcome::Started{attempt: 1});
        f.state.set_paused(true);
        assert_eq!(f.engine.request_solve().await, SolveRequestOutcome::Busy);
        let record = f.state.solve_record().await;
        assert_eq!(record.status, SolveStatus::Solving);
        assert_eq!(record.attempt, 1);
        assert!(f.engine.busy());

        wait_done(&f.engine).await;
        assert_eq!(f.state.solve_record().await.status, SolveStatus::Solved);
        // Once idle, a paused request is reported as such.
        assert_eq!(f.engine.request_solve().await, SolveRequestOutcome::Paused);
        assert_eq!(f.state.solve_record().await.status, SolveStatus::Paused);
        assert!(!f.engine.busy());
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_overlapping_request_is_rejected() {
        let f = make_fixture(Behavior::Solve, Duration::from_millis(300),
                             SolveSettings::default());
        assert_eq!(f.engine.request_solve().await, SolveRequestOutcome::Started{attempt: 1});
        assert_eq!(f.engine.request_solve().await, SolveRequestOutcome::Busy);
        assert_eq!(f.state.solve_record().await.status, SolveStatus::Solving);
        wait_done(&f.engine).await;
        assert_eq!(f.engine.request_solve().await, SolveRequestOutcome::Started{attempt: 2});
        wait_done(&f.engine).await;
        assert_eq!(f.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rapid_requests_never_mix_attempts() {
        let f = Arc::new(make_fixture(Behavior::Solve, Duration::from_millis(5),
                                      SolveSettings::default()));

        // Checks every observed record for coherence.
        let checker_state = f.state.clone();
        let checker = tokio::spawn(async move {
            for _ in 0..400 {
                let record = checker_state.solve_record().await;
                match record.status {
                    SolveStatus::Solved => {
                        let result = record.result.as_ref().unwrap();
                        let astrometry = result.astrometry.as_ref().unwrap();
                        assert!(!astrometry.ra.is_empty());
                        assert!(result.solved_image_url.is_some());
                        assert_eq!(record.solved_image.as_ref().unwrap().attempt,
                                   record.attempt);
                        if record.attempt > 1 {
                            assert_eq!(astrometry.ra,
                                       format!("{:.4}", 10.0 * record.attempt as f64));
                        }
                    },
                    SolveStatus::Failed => {
                        assert!(record.result.unwrap().astrometry.is_none());
                    },
                    SolveStatus::Solving => assert!(record.result.is_none()),
                    _ => (),
                }
                tokio::task::yield_now().await;
            }
        });

        let mut requests = Vec::new();
        for _ in 0..20 {
            let f = f.clone();
            requests.push(tokio::spawn(async move { f.engine.request_solve().await }));
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let mut started = 0;
        for request in requests {
            if let SolveRequestOutcome::Started{..} = request.await.unwrap() {
                started += 1;
            }
        }
        wait_done(&f.engine).await;
        checker.await.unwrap();

        assert!(started >= 1);
        assert_eq!(f.calls.load(Ordering::SeqCst), started);
        let record = f.state.solve_record().await;
        assert_eq!(record.attempt, started);
        assert_eq!(record.status, SolveStatus::Solved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_solve_rate() {
        let start = tokio::time::Instant::now();
        let mut f = make_fixture(Behavior::NoSolution, Duration::ZERO,
                                 SolveSettings::default());
        f.engine.start_rate_aggregator();
        for _ in 0..5 {
            assert!(matches!(f.engine.request_solve().await,
                             SolveRequestOutcome::Started{..}));
            wait_done(&f.engine).await;
        }
        // Busy and paused requests are not attempts.
        f.state.set_paused(true);
        f.engine.request_solve().await;
        tokio::time::sleep_until(start + Duration::from_millis(10500)).await;
        assert_abs_diff_eq!(f.state.telemetry().await.solve_rate, 0.5, epsilon = 1e-9);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(f.state.telemetry().await.solve_rate, 0.0);
    }
}  // mod tests.
