//! Test doubles for the session's capabilities.

use crate::scheduler::{FrameScheduler, TickId};
use image::{Rgb, RgbImage};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use stylemate_core::classifier::ClassifierError;
use stylemate_core::detector::DetectorError;
use stylemate_core::{
    BoundingBox, ClassScore, Classifier, FaceDetector, LoadError, ModelId, ModelLoader,
};
use stylemate_hw::{CameraError, CameraProvider, CaptureConstraints, DeviceStream, Frame, FrameGrabber};

// --- Cameras ---

#[derive(Debug, Default)]
struct CameraLedger {
    acquires: HashMap<String, usize>,
    open: HashMap<String, usize>,
    grabs: HashMap<String, usize>,
    releases: usize,
    /// Second acquisition of an open device fails with DeviceBusy.
    exclusive: bool,
    fail_next: Option<CameraError>,
    sequence: u32,
}

/// Shared view of every fake camera handed out by [`FakeCameras::provider`].
#[derive(Debug, Clone, Default)]
pub struct FakeCameras {
    ledger: Rc<RefCell<CameraLedger>>,
}

impl FakeCameras {
    pub fn new() -> Self {
        Self::default()
    }

    /// Like real V4L2 nodes: a device cannot be opened twice.
    pub fn exclusive() -> Self {
        let cameras = Self::default();
        cameras.ledger.borrow_mut().exclusive = true;
        cameras
    }

    pub fn provider(&self) -> FakeCameraProvider {
        FakeCameraProvider {
            ledger: self.ledger.clone(),
        }
    }

    pub fn fail_next(&self, err: CameraError) {
        self.ledger.borrow_mut().fail_next = Some(err);
    }

    pub fn acquires(&self, device: &str) -> usize {
        self.ledger.borrow().acquires.get(device).copied().unwrap_or(0)
    }

    pub fn total_acquires(&self) -> usize {
        self.ledger.borrow().acquires.values().sum()
    }

    pub fn grabs(&self, device: &str) -> usize {
        self.ledger.borrow().grabs.get(device).copied().unwrap_or(0)
    }

    pub fn open_count(&self) -> usize {
        self.ledger.borrow().open.values().sum()
    }

    pub fn releases(&self) -> usize {
        self.ledger.borrow().releases
    }
}

pub struct FakeCameraProvider {
    ledger: Rc<RefCell<CameraLedger>>,
}

impl CameraProvider for FakeCameraProvider {
    fn acquire(&mut self, constraints: &CaptureConstraints) -> Result<DeviceStream, CameraError> {
        let mut ledger = self.ledger.borrow_mut();
        if let Some(err) = ledger.fail_next.take() {
            return Err(err);
        }
        let open = ledger.open.get(&constraints.device).copied().unwrap_or(0);
        if ledger.exclusive && open > 0 {
            return Err(CameraError::DeviceBusy(constraints.device.clone()));
        }
        *ledger.acquires.entry(constraints.device.clone()).or_default() += 1;
        *ledger.open.entry(constraints.device.clone()).or_default() += 1;

        let grabber = FakeGrabber {
            device: constraints.device.clone(),
            width: constraints.width,
            height: constraints.height,
            ledger: self.ledger.clone(),
        };
        Ok(DeviceStream::new(constraints.device.clone(), Box::new(grabber)))
    }
}

struct FakeGrabber {
    device: String,
    width: u32,
    height: u32,
    ledger: Rc<RefCell<CameraLedger>>,
}

impl FrameGrabber for FakeGrabber {
    fn grab(&mut self) -> Result<Frame, CameraError> {
        let mut ledger = self.ledger.borrow_mut();
        *ledger.grabs.entry(self.device.clone()).or_default() += 1;
        ledger.sequence += 1;

        // Bright left column so mirroring is observable.
        let mut image = RgbImage::new(self.width, self.height);
        for y in 0..self.height {
            image.put_pixel(0, y, Rgb([255, 255, 255]));
        }
        let mut frame = Frame::from_image(image);
        frame.sequence = ledger.sequence;
        Ok(frame)
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for FakeGrabber {
    fn drop(&mut self) {
        let mut ledger = self.ledger.borrow_mut();
        if let Some(n) = ledger.open.get_mut(&self.device) {
            *n = n.saturating_sub(1);
        }
        ledger.releases += 1;
    }
}

// --- Models ---

const FACE_SHAPES: [&str; 5] = ["Oval", "Round", "Square", "Heart", "Oblong"];
const TONES: [&str; 4] = ["Spring Warm", "Summer Cool", "Autumn Warm", "Winter Cool"];

#[derive(Debug, Default)]
struct ModelLedger {
    classifier_loads: usize,
    detector_loads: usize,
    failures_left: usize,
}

/// Fake model loader plus handles to steer and observe the loaded models.
#[derive(Clone)]
pub struct FakeModels {
    ledger: Rc<RefCell<ModelLedger>>,
    faces: Arc<Mutex<Vec<BoundingBox>>>,
    predictions: Arc<Mutex<Vec<ModelId>>>,
    fail_predict: Arc<AtomicBool>,
}

impl FakeModels {
    /// Detector sees one 200×200 face at 0.95 confidence.
    pub fn new() -> Self {
        Self {
            ledger: Rc::default(),
            faces: Arc::new(Mutex::new(vec![BoundingBox::from_corners(
                (0.0, 0.0),
                (200.0, 200.0),
                0.95,
            )])),
            predictions: Arc::default(),
            fail_predict: Arc::default(),
        }
    }

    pub fn loader(&self) -> FakeModelLoader {
        FakeModelLoader {
            models: self.clone(),
        }
    }

    /// Fail the next `n` load attempts.
    pub fn fail_loads(&self, n: usize) {
        self.ledger.borrow_mut().failures_left = n;
    }

    pub fn set_faces(&self, faces: Vec<BoundingBox>) {
        *self.faces.lock().unwrap_or_else(PoisonError::into_inner) = faces;
    }

    pub fn fail_predictions(&self, fail: bool) {
        self.fail_predict.store(fail, Ordering::SeqCst);
    }

    /// Models used for each classifier call, in order.
    pub fn predictions(&self) -> Vec<ModelId> {
        self.predictions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn classifier_loads(&self) -> usize {
        self.ledger.borrow().classifier_loads
    }

    pub fn detector_loads(&self) -> usize {
        self.ledger.borrow().detector_loads
    }

    fn take_failure(&self) -> bool {
        let mut ledger = self.ledger.borrow_mut();
        if ledger.failures_left > 0 {
            ledger.failures_left -= 1;
            true
        } else {
            false
        }
    }
}

pub struct FakeModelLoader {
    models: FakeModels,
}

impl ModelLoader for FakeModelLoader {
    fn load_classifier(&self, id: ModelId) -> Result<Arc<dyn Classifier>, LoadError> {
        if self.models.take_failure() {
            return Err(LoadError::ModelNotFound(format!("{}/model.onnx", id.dir_name())));
        }
        self.models.ledger.borrow_mut().classifier_loads += 1;
        let labels = match id {
            ModelId::FaceShape => FACE_SHAPES.to_vec(),
            ModelId::PersonalTone => TONES.to_vec(),
        };
        Ok(Arc::new(FakeClassifier {
            id,
            labels,
            predictions: self.models.predictions.clone(),
            fail: self.models.fail_predict.clone(),
        }))
    }

    fn load_face_detector(&self) -> Result<Arc<dyn FaceDetector>, LoadError> {
        if self.models.take_failure() {
            return Err(LoadError::ModelNotFound("det_10g.onnx".into()));
        }
        self.models.ledger.borrow_mut().detector_loads += 1;
        Ok(Arc::new(FakeDetector {
            faces: self.models.faces.clone(),
        }))
    }
}

struct FakeClassifier {
    id: ModelId,
    labels: Vec<&'static str>,
    predictions: Arc<Mutex<Vec<ModelId>>>,
    fail: Arc<AtomicBool>,
}

impl Classifier for FakeClassifier {
    fn id(&self) -> ModelId {
        self.id
    }

    fn class_count(&self) -> usize {
        self.labels.len()
    }

    fn predict(&self, _image: &RgbImage) -> Result<Vec<ClassScore>, ClassifierError> {
        self.predictions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.id);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClassifierError::InferenceFailed("malformed input".into()));
        }
        // First class wins with 0.6; the rest share 0.4.
        let rest = 0.4 / (self.labels.len() - 1) as f32;
        Ok(self
            .labels
            .iter()
            .enumerate()
            .map(|(i, l)| ClassScore::new(*l, if i == 0 { 0.6 } else { rest }))
            .collect())
    }
}

struct FakeDetector {
    faces: Arc<Mutex<Vec<BoundingBox>>>,
}

impl FaceDetector for FakeDetector {
    fn estimate_faces(
        &self,
        _image: &RgbImage,
        confidence_threshold: f32,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        Ok(self
            .faces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|f| f.confidence >= confidence_threshold)
            .cloned()
            .collect())
    }
}

// --- Scheduler ---

#[derive(Debug, Default)]
struct SchedulerLedger {
    next_id: u64,
    pending: Option<TickId>,
    scheduled: usize,
    cancelled: usize,
}

/// Scheduler whose ticks are fired by hand.
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler {
    ledger: Rc<RefCell<SchedulerLedger>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the pending tick, as a refresh would.
    pub fn fire(&self) -> Option<TickId> {
        self.ledger.borrow_mut().pending.take()
    }

    pub fn pending(&self) -> Option<TickId> {
        self.ledger.borrow().pending
    }

    pub fn scheduled(&self) -> usize {
        self.ledger.borrow().scheduled
    }

    pub fn cancelled(&self) -> usize {
        self.ledger.borrow().cancelled
    }
}

impl FrameScheduler for ManualScheduler {
    fn schedule(&mut self) -> TickId {
        let mut ledger = self.ledger.borrow_mut();
        ledger.next_id += 1;
        ledger.scheduled += 1;
        let tick = TickId(ledger.next_id);
        ledger.pending = Some(tick);
        tick
    }

    fn cancel(&mut self, tick: TickId) {
        let mut ledger = self.ledger.borrow_mut();
        ledger.cancelled += 1;
        if ledger.pending == Some(tick) {
            ledger.pending = None;
        }
    }
}
