// Copyright (c) 2024 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use serde::Serialize;
use tokio::sync::RwLock;

// Where the Control Surface serves the current solved image.
pub const SOLVED_IMAGE_URL: &str = "/solved_field.jpg";

// The most recently captured preview frame.
#[derive(Clone, Debug)]
pub struct Frame {
    // JPEG encoded. Never mutated once published.
    pub jpeg: Arc<Vec<u8>>,
    pub capture_time: SystemTime,
    // Increments with every published frame.
    pub frame_id: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SolveStatus {
    Idle,
    Solving,
    Solved,
    Failed,
    Paused,
}

// Astrometric fields of a successful solve, formatted for display.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Astrometry {
    // Degrees, 4 decimal places.
    pub ra: String,
    pub dec: String,
    pub roll: String,
    // HH:MM:SS.S
    pub ra_hms: String,
    // ±DD:MM:SS.S
    pub dec_dms: String,
    pub constellation: String,
    // Milliseconds, 1 decimal place.
    pub solution_time: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SolveResult {
    // Present only when solved.
    pub astrometry: Option<Astrometry>,
    // Present whenever the attempt produced an image.
    pub solved_image_url: Option<String>,
}

// Output of a solve attempt (annotated when solved, as-acquired otherwise).
#[derive(Clone, Debug)]
pub struct SolvedImage {
    pub jpeg: Arc<Vec<u8>>,
    pub attempt: u64,
}

// Status, result, and solved image are one unit: they are always written
// together under a single lock, so readers never see a mix from different
// attempts.
#[derive(Clone, Debug)]
pub struct SolveRecord {
    pub status: SolveStatus,
    pub result: Option<SolveResult>,
    pub solved_image: Option<SolvedImage>,
    // Failure condition of the most recent attempt, if known.
    pub error: Option<String>,
    // Number of the most recently started attempt; 0 before the first.
    pub attempt: u64,
}

// How a solve attempt ended.
#[derive(Debug)]
pub enum SolveOutcome {
    Solved {
        astrometry: Astrometry,
        annotated_jpeg: Arc<Vec<u8>>,
    },
    Failed {
        // The acquired image, if acquisition got that far.
        image: Option<Arc<Vec<u8>>>,
        error: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Telemetry {
    pub capture_fps: f64,
    pub solve_rate: f64,
}

// All state shared between the capture loop, solve attempts, and request
// handlers. Every accessor holds its lock only for the copy or assignment;
// callers get snapshots (cheap `Arc` clones for image buffers).
pub struct SharedState {
    frame: RwLock<Option<Frame>>,
    solve_record: RwLock<SolveRecord>,
    telemetry: RwLock<Telemetry>,
    paused: AtomicBool,
    test_mode: AtomicBool,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    pub fn new() -> Self {
        SharedState{
            frame: RwLock::new(None),
            solve_record: RwLock::new(SolveRecord{
                status: SolveStatus::Idle,
                result: None,
                solved_image: None,
                error: None,
                attempt: 0,
            }),
            telemetry: RwLock::new(Telemetry::default()),
            paused: AtomicBool::new(false),
            test_mode: AtomicBool::new(false),
        }
    }

    pub async fn frame(&self) -> Option<Frame> {
        self.frame.read().await.clone()
    }

    pub async fn publish_frame(&self, frame: Frame) {
        *self.frame.write().await = Some(frame);
    }

    pub async fn solve_record(&self) -> SolveRecord {
        self.solve_record.read().await.clone()
    }

    pub async fn solved_image(&self) -> Option<SolvedImage> {
        self.solve_record.read().await.solved_image.clone()
    }

    // Transitions to Solving for a new attempt and returns the attempt's
    // number. The previous solved image stays visible until the attempt
    // publishes its outcome.
    pub async fn begin_attempt(&self) -> u64 {
        let mut record = self.solve_record.write().await;
        record.attempt += 1;
        record.status = SolveStatus::Solving;
        record.result = None;
        record.error = None;
        record.attempt
    }

    // A solve was requested while paused. Only the status changes.
    pub async fn mark_paused(&self) {
        self.solve_record.write().await.status = SolveStatus::Paused;
    }

    // Publishes the outcome of `attempt`. Status, result, and solved image are
    // replaced in one write. An outcome for an attempt other than the most
    // recently started one is discarded.
    pub async fn publish_outcome(&self, attempt: u64, outcome: SolveOutcome) -> bool {
        let mut record = self.solve_record.write().await;
        if record.attempt != attempt {
            return false;
        }
        match outcome {
            SolveOutcome::Solved{astrometry, annotated_jpeg} => {
                record.status = SolveStatus::Solved;
                record.result = Some(SolveResult{
                    astrometry: Some(astrometry),
                    solved_image_url: Some(SOLVED_IMAGE_URL.to_string()),
                });
                record.solved_image = Some(SolvedImage{jpeg: annotated_jpeg, attempt});
                record.error = None;
            },
            SolveOutcome::Failed{image, error} => {
                record.status = SolveStatus::Failed;
                record.result = Some(SolveResult{
                    astrometry: None,
                    solved_image_url: image.as_ref().map(|_| SOLVED_IMAGE_URL.to_string()),
                });
                record.solved_image = image.map(|jpeg| SolvedImage{jpeg, attempt});
                record.error = error;
            },
        }
        true
    }

    pub async fn telemetry(&self) -> Telemetry {
        *self.telemetry.read().await
    }

    pub async fn set_capture_fps(&self, fps: f64) {
        self.telemetry.write().await.capture_fps = fps;
    }

    pub async fn set_solve_rate(&self, rate: f64) {
        self.telemetry.write().await.solve_rate = rate;
    }

    pub fn paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    // Flips the pause flag; returns the new value.
    pub fn toggle_paused(&self) -> bool {
        !self.paused.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn test_mode(&self) -> bool {
        self.test_mode.load(Ordering::Relaxed)
    }

    pub fn set_test_mode(&self, test_mode: bool) {
        self.test_mode.store(test_mode, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn astrometry() -> Astrometry {
        Astrometry{
            ra: "88.7929".to_string(),
            dec: "7.4071".to_string(),
            roll: "12.0000".to_string(),
            ra_hms: "05:55:10.3".to_string(),
            dec_dms: "+07:24:25.4".to_string(),
            constellation: "Orion".to_string(),
            solution_time: "41.0".to_string(),
        }
    }

    #[tokio::test]
    async fn test_frame_publication_replaces_whole_buffer() {
        let state = SharedState::new();
        assert!(state.frame().await.is_none());
        state.publish_frame(Frame{jpeg: Arc::new(vec![1, 2, 3]),
                                  capture_time: SystemTime::now(),
                                  frame_id: 1}).await;
        let first = state.frame().await.unwrap();
        state.publish_frame(Frame{jpeg: Arc::new(vec![4, 5]),
                                  capture_time: SystemTime::now(),
                                  frame_id: 2}).await;
        // An earlier snapshot is unaffected by later publication.
        assert_eq!(*first.jpeg, vec![1, 2, 3]);
        let second = state.frame().await.unwrap();
        assert_eq!(*second.jpeg, vec![4, 5]);
        assert_eq!(second.frame_id, 2);
    }

    #[tokio::test]
    async fn test_solve_record_transitions() {
        let state = SharedState::new();
        assert_eq!(state.solve_record().await.status, SolveStatus::Idle);

        let attempt = state.begin_attempt().await;
        assert_eq!(attempt, 1);
        let record = state.solve_record().await;
        assert_eq!(record.status, SolveStatus::Solving);
        assert!(record.result.is_none());

        assert!(state.publish_outcome(attempt, SolveOutcome::Solved{
            astrometry: astrometry(),
            annotated_jpeg: Arc::new(vec![9; 10]),
        }).await);
        let record = state.solve_record().await;
        assert_eq!(record.status, SolveStatus::Solved);
        let result = record.result.unwrap();
        assert_eq!(result.astrometry.unwrap().constellation, "Orion");
        assert_eq!(result.solved_image_url.as_deref(), Some(SOLVED_IMAGE_URL));
        assert_eq!(record.solved_image.unwrap().attempt, 1);

        // Failed attempt without an image clears the astrometry and image.
        let attempt = state.begin_attempt().await;
        state.publish_outcome(attempt, SolveOutcome::Failed{
            image: None, error: Some("no fixtures available".to_string())}).await;
        let record = state.solve_record().await;
        assert_eq!(record.status, SolveStatus::Failed);
        assert_eq!(record.result, Some(SolveResult{astrometry: None,
                                                   solved_image_url: None}));
        assert!(record.solved_image.is_none());
        assert_eq!(record.error.as_deref(), Some("no fixtures available"));
    }

    #[tokio::test]
    async fn test_stale_outcome_is_discarded() {
        let state = SharedState::new();
        let stale = state.begin_attempt().await;
        let current = state.begin_attempt().await;
        assert!(!state.publish_outcome(stale, SolveOutcome::Solved{
            astrometry: astrometry(),
            annotated_jpeg: Arc::new(vec![1]),
        }).await);
        let record = state.solve_record().await;
        assert_eq!(record.status, SolveStatus::Solving);
        assert_eq!(record.attempt, current);
    }

    #[tokio::test]
    async fn test_paused_keeps_result() {
        let state = SharedState::new();
        let attempt = state.begin_attempt().await;
        state.publish_outcome(attempt, SolveOutcome::Failed{
            image: Some(Arc::new(vec![7])), error: None}).await;
        state.mark_paused().await;
        let record = state.solve_record().await;
        assert_eq!(record.status, SolveStatus::Paused);
        assert!(record.result.is_some());
        assert_eq!(*state.solved_image().await.unwrap().jpeg, vec![7]);
    }

    #[test]
    fn test_flags() {
        let state = SharedState::new();
        assert!(!state.paused());
        assert!(state.toggle_paused());
        assert!(state.paused());
        assert!(!state.toggle_paused());
        assert!(!state.paused());
        state.set_test_mode(true);
        assert!(state.test_mode());
    }
}  // mod tests.
