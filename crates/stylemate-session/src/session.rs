//! Session controller.
//!
//! One [`Session`] lives for the lifetime of the front-end. It owns the
//! capture mode, run state, active model, loaded models and every camera
//! handle. All mutation goes through its intent methods; the polling
//! loop is driven from outside by handing [`Session::on_tick`] the ticks
//! its [`FrameScheduler`] fires.
//!
//! Results are computed as a [`PredictionJob`] stamped with the current
//! generation. Mode switches, model switches, uploads and `dispose`
//! advance the generation, so a job started before one of those is
//! dropped instead of published.

use crate::ar::{ArError, ArSession, Overlay};
use crate::config::SessionConfig;
use crate::events::{EventBus, PublishedResult, SessionEvent};
use crate::frame_source::{CaptureMode, FrameSource, LiveCamera, StaticImage};
use crate::scheduler::{FrameScheduler, TickId};
use image::{RgbImage, RgbaImage};
use serde::Serialize;
use std::sync::Arc;
use stylemate_core::recommendation::{self, Recommendation};
use stylemate_core::{
    Classifier, Evaluation, FaceDetector, LoadError, ModelId, ModelLoader, PredictionError,
    PredictionPipeline,
};
use stylemate_hw::{CameraError, CameraProvider, Frame};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Loading,
    Running,
    Paused,
    Failed,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to load models: {0}")]
    ModelLoad(#[from] LoadError),
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("{operation} is not available in {mode:?} mode")]
    WrongMode {
        operation: &'static str,
        mode: CaptureMode,
    },
    #[error("no image has been uploaded")]
    NoImageUploaded,
    #[error("no live frame has been captured yet")]
    NoFrame,
    #[error("models are not loaded")]
    NotInitialized,
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("prediction failed: {0}")]
    Prediction(#[from] PredictionError),
    #[error("AR try-on: {0}")]
    Ar(#[from] ArError),
}

impl SessionError {
    /// Model or device acquisition failure; the session is left retryable.
    pub fn is_initialization(&self) -> bool {
        matches!(self, SessionError::ModelLoad(_) | SessionError::Camera(_))
    }
}

/// External capabilities the session drives.
pub struct Capabilities {
    pub models: Box<dyn ModelLoader>,
    pub cameras: Box<dyn CameraProvider>,
    pub scheduler: Box<dyn FrameScheduler>,
}

/// A prediction started against a snapshot of the current frame.
#[derive(Debug, Clone)]
pub struct PredictionJob {
    pub generation: u64,
    pub model: ModelId,
    pub mode: CaptureMode,
    pub frame: Frame,
}

/// Serializable snapshot for the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub mode: CaptureMode,
    pub run_state: RunState,
    pub active_model: ModelId,
    pub initialized: bool,
    pub camera_held: bool,
    pub image_uploaded: bool,
    pub image_analyzed: bool,
    pub ar_active: bool,
    pub generation: u64,
    pub last_result: Option<PublishedResult>,
}

struct LoadedModels {
    face_shape: Arc<dyn Classifier>,
    tone: Arc<dyn Classifier>,
    detector: Arc<dyn FaceDetector>,
}

impl LoadedModels {
    fn classifier(&self, id: ModelId) -> &dyn Classifier {
        match id {
            ModelId::FaceShape => self.face_shape.as_ref(),
            ModelId::PersonalTone => self.tone.as_ref(),
        }
    }
}

pub struct Session {
    config: SessionConfig,
    pipeline: PredictionPipeline,
    loader: Box<dyn ModelLoader>,
    cameras: Box<dyn CameraProvider>,
    scheduler: Box<dyn FrameScheduler>,
    events: EventBus,

    mode: CaptureMode,
    run_state: RunState,
    active_model: ModelId,
    models: Option<LoadedModels>,
    /// Attached frame source. `None` in Live mode until analysis starts.
    source: Option<FrameSource>,
    /// Main camera kept open across a Live -> Static -> Live round trip.
    parked_camera: Option<LiveCamera>,
    pending_tick: Option<TickId>,
    generation: u64,
    ar: Option<ArSession>,
    last_result: Option<PublishedResult>,
}

impl Session {
    pub fn new(config: SessionConfig, caps: Capabilities) -> Self {
        let pipeline = config.pipeline();
        tracing::info!(
            model_dir = %config.model_dir.display(),
            camera = %config.camera_device,
            face_confidence = pipeline.confidence_threshold,
            min_face_size = pipeline.min_face_size,
            "session created"
        );
        Self {
            config,
            pipeline,
            loader: caps.models,
            cameras: caps.cameras,
            scheduler: caps.scheduler,
            events: EventBus::default(),
            mode: CaptureMode::Live,
            run_state: RunState::Idle,
            active_model: ModelId::default(),
            models: None,
            source: None,
            parked_camera: None,
            pending_tick: None,
            generation: 0,
            ar: None,
            last_result: None,
        }
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn active_model(&self) -> ModelId {
        self.active_model
    }

    pub fn is_initialized(&self) -> bool {
        self.models.is_some()
    }

    pub fn is_ar_active(&self) -> bool {
        self.ar.is_some()
    }

    pub fn last_result(&self) -> Option<&PublishedResult> {
        self.last_result.as_ref()
    }

    // --- Analysis loop ---

    /// Start analysis, or pause it if running.
    ///
    /// The first start loads both classifiers and the detector and
    /// acquires the main camera. A failure leaves the session `Failed`;
    /// calling again retries.
    pub fn toggle_analysis(&mut self) -> Result<(), SessionError> {
        if self.mode != CaptureMode::Live {
            return Err(SessionError::WrongMode {
                operation: "toggle analysis",
                mode: self.mode,
            });
        }
        if self.run_state == RunState::Running {
            self.pause();
            return Ok(());
        }

        self.stop_ar_try_on();

        let mut camera = match self.take_attached_camera() {
            Some(camera) if self.models.is_some() => camera,
            attached => {
                // Keep a still-attached camera around for the retry.
                if let Some(camera) = attached {
                    self.parked_camera = Some(camera);
                }
                self.prepare_live()?
            }
        };

        camera.start();
        tracing::info!(device = %camera.device(), model = %self.active_model, "analysis started");
        self.source = Some(FrameSource::Live(camera));
        self.set_run_state(RunState::Running);
        self.pending_tick = Some(self.scheduler.schedule());
        Ok(())
    }

    /// Stop the polling loop. Returns `false` if analysis was not running.
    pub fn pause(&mut self) -> bool {
        if self.run_state != RunState::Running {
            return false;
        }
        if let Some(tick) = self.pending_tick.take() {
            self.scheduler.cancel(tick);
        }
        if let Some(FrameSource::Live(camera)) = self.source.as_mut() {
            camera.stop();
        }
        self.set_run_state(RunState::Paused);
        true
    }

    /// Polling loop step: capture, evaluate, publish, reschedule.
    ///
    /// Ticks other than the pending one are ignored. Failures are
    /// reported as an event and returned; the loop keeps going.
    pub fn on_tick(&mut self, tick: TickId) -> Result<Option<PublishedResult>, SessionError> {
        if self.pending_tick != Some(tick) {
            tracing::trace!(?tick, "ignoring stale tick");
            return Ok(None);
        }
        self.pending_tick = None;
        if self.run_state != RunState::Running {
            return Ok(None);
        }

        let outcome = match self.capture_job() {
            Ok(job) => self.run_job(job),
            Err(e) => {
                self.report(&e);
                Err(e)
            }
        };
        self.pending_tick = Some(self.scheduler.schedule());
        outcome
    }

    // --- Modes and models ---

    /// Switch between live camera and uploaded-image analysis.
    ///
    /// Stops analysis and AR, detaches the frame source and clears
    /// results. The main camera stays open and is re-attached on the
    /// next start in Live mode.
    pub fn switch_mode(&mut self, mode: CaptureMode) {
        if mode == self.mode {
            return;
        }
        self.pause();
        self.stop_ar_try_on();
        self.generation += 1;

        match self.source.take() {
            Some(FrameSource::Live(mut camera)) => {
                camera.stop();
                camera.clear_frame();
                tracing::debug!(device = %camera.device(), "parking main camera");
                self.parked_camera = Some(camera);
            }
            Some(FrameSource::Static(_)) => tracing::debug!("discarding uploaded image"),
            None => {}
        }
        if mode == CaptureMode::Static {
            self.source = Some(FrameSource::Static(StaticImage::default()));
        }

        self.mode = mode;
        tracing::info!(?mode, "capture mode switched");
        self.clear_results();
        self.set_run_state(RunState::Idle);
        self.events.emit(SessionEvent::ModeChanged { mode });
    }

    /// Select the classifier used for subsequent predictions.
    ///
    /// When paused on a live frame, or holding an uploaded image with
    /// models loaded, the last frame is re-evaluated once with the new
    /// model. The polling loop is not restarted.
    pub fn set_active_model(
        &mut self,
        model: ModelId,
    ) -> Result<Option<PublishedResult>, SessionError> {
        if model == self.active_model {
            return Ok(None);
        }
        self.stop_ar_try_on();
        self.active_model = model;
        self.generation += 1;
        tracing::info!(%model, "active model changed");
        self.events.emit(SessionEvent::ModelChanged { model });

        let rerun = self.models.is_some()
            && match (&self.source, self.run_state) {
                (Some(FrameSource::Live(camera)), RunState::Paused) => {
                    camera.current_frame().is_some()
                }
                (Some(FrameSource::Static(still)), _) => still.current_frame().is_some(),
                _ => false,
            };
        if !rerun {
            return Ok(None);
        }

        let job = self.begin_prediction()?;
        let published = self.run_job(job)?;
        self.mark_static_analyzed();
        Ok(published)
    }

    // --- Static images ---

    /// Decode and store an uploaded image. Returns its dimensions.
    ///
    /// Undecodable bytes are rejected and the previous image is kept.
    pub fn upload_image(&mut self, bytes: &[u8]) -> Result<(u32, u32), SessionError> {
        let mode = self.mode;
        let Some(FrameSource::Static(still)) = self.source.as_mut() else {
            return Err(SessionError::WrongMode {
                operation: "image upload",
                mode,
            });
        };

        let image = image::load_from_memory(bytes)?.to_rgb8();
        let (width, height) = image.dimensions();
        still.set(Frame::from_image(image));
        self.generation += 1;
        tracing::info!(width, height, "image uploaded");

        self.clear_results();
        self.events.emit(SessionEvent::ImageUploaded { width, height });
        Ok((width, height))
    }

    /// Run the pipeline once on the uploaded image with the active model.
    ///
    /// Loads the models on first use. No camera is involved.
    pub fn process_static_image(&mut self) -> Result<Option<PublishedResult>, SessionError> {
        match &self.source {
            Some(FrameSource::Static(still)) if still.current_frame().is_some() => {}
            Some(FrameSource::Static(_)) => return Err(SessionError::NoImageUploaded),
            _ => {
                return Err(SessionError::WrongMode {
                    operation: "static image processing",
                    mode: self.mode,
                })
            }
        }

        if self.models.is_none() {
            self.set_run_state(RunState::Loading);
            if let Err(e) = self.load_models() {
                self.fail_initialization(&e);
                return Err(e);
            }
            self.set_run_state(RunState::Idle);
        }

        let job = self.begin_prediction()?;
        let published = self.run_job(job)?;
        self.mark_static_analyzed();
        Ok(published)
    }

    // --- Prediction jobs ---

    /// Snapshot the current frame for evaluation with the active model.
    pub fn begin_prediction(&self) -> Result<PredictionJob, SessionError> {
        if self.models.is_none() {
            return Err(SessionError::NotInitialized);
        }
        let frame = self
            .source
            .as_ref()
            .and_then(FrameSource::current_frame)
            .ok_or(match self.mode {
                CaptureMode::Live => SessionError::NoFrame,
                CaptureMode::Static => SessionError::NoImageUploaded,
            })?;
        Ok(PredictionJob {
            generation: self.generation,
            model: self.active_model,
            mode: self.mode,
            frame: frame.clone(),
        })
    }

    /// Run the gated pipeline for `job`. Does not touch session state.
    pub fn evaluate(&self, job: &PredictionJob) -> Result<Evaluation, SessionError> {
        let models = self.models.as_ref().ok_or(SessionError::NotInitialized)?;
        let evaluation = self.pipeline.evaluate(
            &job.frame.image,
            models.detector.as_ref(),
            models.classifier(job.model),
        )?;
        Ok(evaluation)
    }

    /// Publish the outcome of `job` unless it was overtaken by a mode
    /// switch, model switch, upload or dispose.
    pub fn publish(&mut self, job: PredictionJob, evaluation: Evaluation) -> Option<PublishedResult> {
        if job.generation != self.generation {
            tracing::debug!(
                job = job.generation,
                current = self.generation,
                model = %job.model,
                "discarding stale result"
            );
            return None;
        }

        let result = PublishedResult {
            model: job.model,
            mode: job.mode,
            evaluation,
            frame_sequence: job.frame.sequence,
        };
        tracing::debug!(model = %result.model, outcome = ?result.evaluation, "result published");
        self.last_result = Some(result.clone());
        self.events.emit(SessionEvent::Result {
            result: result.clone(),
        });
        Some(result)
    }

    // --- AR try-on ---

    /// Start AR try-on with `overlay`, pausing analysis first.
    ///
    /// Any previous AR stream is stopped. If the AR device is busy because
    /// the main camera still holds it, the main camera is released and the
    /// acquisition retried once.
    pub fn start_ar_try_on(&mut self, overlay: Overlay) -> Result<(), SessionError> {
        self.pause();
        self.stop_ar_try_on();

        let constraints = self.config.ar_constraints();
        let ar = match ArSession::start(self.cameras.as_mut(), &constraints, overlay.clone()) {
            Ok(ar) => ar,
            Err(CameraError::DeviceBusy(device)) => {
                let Some(camera) = self.take_main_camera() else {
                    return Err(ArError::Camera(CameraError::DeviceBusy(device)).into());
                };
                tracing::warn!(%device, "AR device busy; releasing main camera and retrying");
                camera.release();
                ArSession::start(self.cameras.as_mut(), &constraints, overlay).map_err(ArError::from)?
            }
            Err(e) => return Err(ArError::from(e).into()),
        };

        self.ar = Some(ar);
        self.events.emit(SessionEvent::ArStateChanged { active: true });
        Ok(())
    }

    /// Start AR try-on with an overlay from the recommendation table.
    pub fn start_ar_try_on_asset(&mut self, overlay_id: &str) -> Result<(), SessionError> {
        let spec = recommendation::table()
            .overlay(overlay_id)
            .ok_or_else(|| ArError::UnknownOverlay(overlay_id.to_string()))?;
        let overlay = Overlay::load(spec, &self.config.asset_dir)?;
        self.start_ar_try_on(overlay)
    }

    /// Stop AR try-on. Returns `false` if it was not active.
    pub fn stop_ar_try_on(&mut self) -> bool {
        let Some(ar) = self.ar.take() else {
            return false;
        };
        ar.stop();
        self.events.emit(SessionEvent::ArStateChanged { active: false });
        true
    }

    /// Latest AR camera frame, mirrored.
    pub fn ar_preview(&mut self) -> Result<RgbImage, SessionError> {
        let ar = self.ar.as_mut().ok_or(ArError::NotActive)?;
        Ok(ar.preview()?)
    }

    /// Mirrored AR frame with the sticker composited on top.
    pub fn capture_ar_screenshot(&mut self) -> Result<RgbaImage, SessionError> {
        let ar = self.ar.as_mut().ok_or(ArError::NotActive)?;
        let shot = ar.screenshot()?;
        tracing::info!(width = shot.width(), height = shot.height(), "AR screenshot captured");
        Ok(shot)
    }

    // --- Misc ---

    /// Guidance for `label`. Re-selecting guidance hides the AR overlay.
    pub fn show_recommendation(&mut self, label: &str) -> Option<&'static Recommendation> {
        self.stop_ar_try_on();
        recommendation::lookup(label)
    }

    pub fn status(&self) -> SessionStatus {
        let still = match &self.source {
            Some(FrameSource::Static(still)) => Some(still),
            _ => None,
        };
        SessionStatus {
            mode: self.mode,
            run_state: self.run_state,
            active_model: self.active_model,
            initialized: self.models.is_some(),
            camera_held: self.parked_camera.is_some()
                || matches!(self.source, Some(FrameSource::Live(_))),
            image_uploaded: still.is_some_and(|s| s.current_frame().is_some()),
            image_analyzed: still.is_some_and(StaticImage::is_analyzed),
            ar_active: self.ar.is_some(),
            generation: self.generation,
            last_result: self.last_result.clone(),
        }
    }

    /// Cancel the loop, stop AR and release every camera handle.
    pub fn dispose(&mut self) {
        if let Some(tick) = self.pending_tick.take() {
            self.scheduler.cancel(tick);
        }
        self.stop_ar_try_on();
        self.generation += 1;
        if let Some(camera) = self.take_main_camera() {
            camera.release();
        }
        if matches!(self.source, Some(FrameSource::Static(_))) {
            self.source = Some(FrameSource::Static(StaticImage::default()));
        }
        self.last_result = None;
        self.set_run_state(RunState::Idle);
        tracing::info!("session disposed");
    }

    // --- Internals ---

    fn set_run_state(&mut self, state: RunState) {
        if self.run_state == state {
            return;
        }
        tracing::info!(from = ?self.run_state, to = ?state, "run state changed");
        self.run_state = state;
        self.events.emit(SessionEvent::RunStateChanged { state });
    }

    fn clear_results(&mut self) {
        self.last_result = None;
        self.events.emit(SessionEvent::ResultsCleared);
    }

    fn report(&mut self, err: &SessionError) {
        tracing::warn!(error = %err, "analysis attempt failed");
        self.events.emit(SessionEvent::Error {
            message: err.to_string(),
        });
    }

    fn fail_initialization(&mut self, err: &SessionError) {
        tracing::warn!(error = %err, "initialization failed");
        self.set_run_state(RunState::Failed);
        self.events.emit(SessionEvent::Error {
            message: err.to_string(),
        });
    }

    /// Load models (if needed) and obtain the main camera.
    fn prepare_live(&mut self) -> Result<LiveCamera, SessionError> {
        self.set_run_state(RunState::Loading);
        let prepared = self.load_models().and_then(|()| self.acquire_camera());
        if let Err(e) = &prepared {
            self.fail_initialization(e);
        }
        prepared
    }

    fn load_models(&mut self) -> Result<(), SessionError> {
        if self.models.is_some() {
            return Ok(());
        }
        let face_shape = self.loader.load_classifier(ModelId::FaceShape)?;
        let tone = self.loader.load_classifier(ModelId::PersonalTone)?;
        let detector = self.loader.load_face_detector()?;
        tracing::info!(
            face_shape_classes = face_shape.class_count(),
            tone_classes = tone.class_count(),
            "models loaded"
        );
        self.models = Some(LoadedModels {
            face_shape,
            tone,
            detector,
        });
        Ok(())
    }

    fn acquire_camera(&mut self) -> Result<LiveCamera, SessionError> {
        if let Some(camera) = self.parked_camera.take() {
            tracing::debug!(device = %camera.device(), "re-attaching main camera");
            return Ok(camera);
        }
        let camera = LiveCamera::setup(
            self.cameras.as_mut(),
            &self.config.camera_constraints(),
            self.config.warmup_frames,
            self.config.mirror,
        )?;
        Ok(camera)
    }

    fn take_attached_camera(&mut self) -> Option<LiveCamera> {
        match self.source.take() {
            Some(FrameSource::Live(camera)) => Some(camera),
            other => {
                self.source = other;
                None
            }
        }
    }

    /// Attached or parked main camera, whichever exists.
    fn take_main_camera(&mut self) -> Option<LiveCamera> {
        self.take_attached_camera()
            .or_else(|| self.parked_camera.take())
    }

    fn capture_job(&mut self) -> Result<PredictionJob, SessionError> {
        let Some(FrameSource::Live(camera)) = self.source.as_mut() else {
            return Err(SessionError::NoFrame);
        };
        let frame = camera.capture()?.clone();
        Ok(PredictionJob {
            generation: self.generation,
            model: self.active_model,
            mode: CaptureMode::Live,
            frame,
        })
    }

    fn run_job(&mut self, job: PredictionJob) -> Result<Option<PublishedResult>, SessionError> {
        match self.evaluate(&job) {
            Ok(evaluation) => Ok(self.publish(job, evaluation)),
            Err(e) => {
                if job.generation == self.generation {
                    self.report(&e);
                }
                Err(e)
            }
        }
    }

    fn mark_static_analyzed(&mut self) {
        if let Some(FrameSource::Static(still)) = self.source.as_mut() {
            still.mark_analyzed();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(tick) = self.pending_tick.take() {
            self.scheduler.cancel(tick);
        }
    }
}
