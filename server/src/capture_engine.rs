// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};

use log::{debug, error, info};

use astrocam_elements::camera_trait::{ImagingDevice, StreamSelector};

use crate::rate_estimator::RateCounter;
use crate::shared_state::{Frame, SharedState};

#[derive(Clone, Debug)]
pub struct CaptureSettings {
    // How often the pause flag is re-checked while paused.
    pub pause_poll: Duration,

    // Capture FPS is reported once per this interval.
    pub fps_interval: Duration,

    // Delay before retrying after a failed capture.
    pub error_backoff: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        CaptureSettings{
            pause_poll: Duration::from_millis(100),
            fps_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(1),
        }
    }
}

// Keeps the shared state's latest frame fresh by repeatedly capturing from
// the low resolution stream, and maintains the capture FPS telemetry.
pub struct CaptureEngine {
    // Shared with solve attempts and request handlers.
    camera: Arc<tokio::sync::Mutex<Box<dyn ImagingDevice + Send>>>,

    state: Arc<SharedState>,

    settings: CaptureSettings,

    // Set by stop(); the worker exits at its next iteration.
    stop_request: Arc<AtomicBool>,

    // Executes worker().
    worker_thread: Option<std::thread::JoinHandle<()>>,
}

impl CaptureEngine {
    pub fn new(camera: Arc<tokio::sync::Mutex<Box<dyn ImagingDevice + Send>>>,
               state: Arc<SharedState>,
               settings: CaptureSettings) -> Self {
        CaptureEngine{
            camera,
            state,
            settings,
            stop_request: Arc::new(AtomicBool::new(false)),
            worker_thread: None,
        }
    }

    pub fn start(&mut self) {
        // Has the worker terminated for some reason?
        if self.worker_thread.as_ref().is_some_and(|t| t.is_finished()) {
            self.worker_thread = None;
        }
        if self.worker_thread.is_none() {
            self.stop_request.store(false, Ordering::Relaxed);
            let cloned_camera = self.camera.clone();
            let cloned_state = self.state.clone();
            let cloned_settings = self.settings.clone();
            let cloned_stop_request = self.stop_request.clone();
            // The capture loop gets its own thread and runtime so that slow
            // device calls never compete with request handling.
            self.worker_thread = Some(std::thread::spawn(move || {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(1)
                    .enable_all()
                    .thread_name("capture_engine")
                    .build().unwrap();
                runtime.block_on(async move {
                    CaptureEngine::worker(cloned_camera, cloned_state,
                                          cloned_settings,
                                          cloned_stop_request).await;
                });
            }));
        }
    }

    // Requests worker exit and waits for it.
    pub fn stop(&mut self) {
        self.stop_request.store(true, Ordering::Relaxed);
        if let Some(worker_thread) = self.worker_thread.take() {
            if worker_thread.join().is_err() {
                error!("Capture engine worker panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker_thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    // Runs until `stop_request` is set. Capture errors are logged and retried
    // after a backoff; they never end the loop.
    pub async fn worker(
        camera: Arc<tokio::sync::Mutex<Box<dyn ImagingDevice + Send>>>,
        state: Arc<SharedState>,
        settings: CaptureSettings,
        stop_request: Arc<AtomicBool>)
    {
        info!("Starting capture engine");
        let mut fps_counter = RateCounter::new(settings.fps_interval, now());
        let mut frame_id: u64 = 0;
        while !stop_request.load(Ordering::Relaxed) {
            // FPS is reported even while paused, so it decays to zero.
            if let Some(fps) = fps_counter.poll(now()) {
                state.set_capture_fps(fps).await;
            }
            if state.paused() {
                tokio::time::sleep(settings.pause_poll).await;
                continue;
            }
            let capture = camera.lock().await.capture(StreamSelector::Lores).await;
            match capture {
                Ok(jpeg) if !jpeg.is_empty() => {
                    // Paused while the capture was in flight; don't refresh.
                    if state.paused() {
                        continue;
                    }
                    frame_id += 1;
                    state.publish_frame(Frame{
                        jpeg: Arc::new(jpeg),
                        capture_time: SystemTime::now(),
                        frame_id,
                    }).await;
                    fps_counter.record();
                },
                Ok(_) => {
                    error!("Capture returned an empty image; retrying in {:?}",
                           settings.error_backoff);
                    tokio::time::sleep(settings.error_backoff).await;
                },
                Err(e) => {
                    error!("Error capturing image: {}; retrying in {:?}",
                           &e.to_string(), settings.error_backoff);
                    tokio::time::sleep(settings.error_backoff).await;
                },
            }
        }
        debug!("Capture engine exiting after {} frames", frame_id);
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

// Follows the tokio clock, which tests can pause and advance.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

// mod tests.
