//! Scripted devices shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use sami_devices::{
    AdapterError, AdapterFactory, AdapterResult, DeviceAdapter, DeviceConfig, FaceMatch, FaceRegion, Frame,
    FrameEncoding, LocationFix, ObjectDetection, Recognizer, RecognizerError, Sample,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What a scripted adapter does on each read.
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Same fix every read.
    Fix(LocationFix),
    /// One frame per read, this many times, then misses.
    Frames(usize),
    /// Each tag once, then misses.
    Tags(Vec<String>),
    /// Tags `{prefix}0`, `{prefix}1`, ... forever.
    Counting(String),
    /// Every read fails.
    FailReads,
    /// Reads never return and ignore the timeout.
    HangReads,
    /// `open` fails.
    RefuseOpen,
}

#[derive(Debug, Default)]
pub struct Probe {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub reads: AtomicUsize,
}

impl Probe {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

pub struct ScriptedAdapter {
    device_id: String,
    behaviour: Behaviour,
    probe: Arc<Probe>,
    cursor: usize,
    open: bool,
}

#[async_trait]
impl DeviceAdapter for ScriptedAdapter {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn open(&mut self) -> AdapterResult<()> {
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        if matches!(self.behaviour, Behaviour::RefuseOpen) {
            return Err(AdapterError::Connection("connection refused".to_string()));
        }
        self.open = true;
        Ok(())
    }

    async fn read_next(&mut self, _timeout: Duration) -> AdapterResult<Option<Sample>> {
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        if !self.open {
            return Err(AdapterError::NotOpen);
        }
        let sample = match &self.behaviour {
            Behaviour::Fix(fix) => Some(Sample::fix(self.device_id.clone(), fix.clone())),
            Behaviour::Frames(count) => {
                (self.cursor < *count).then(|| Sample::frame(self.device_id.clone(), frame()))
            }
            Behaviour::Tags(tags) => tags
                .get(self.cursor)
                .map(|tag| Sample::tag(self.device_id.clone(), tag.clone(), tag.clone())),
            Behaviour::Counting(prefix) => {
                let tag = format!("{}{}", prefix, self.cursor);
                Some(Sample::tag(self.device_id.clone(), tag.clone(), tag))
            }
            Behaviour::FailReads => return Err(AdapterError::Device("read failed".to_string())),
            Behaviour::HangReads => {
                std::future::pending::<()>().await;
                None
            }
            Behaviour::RefuseOpen => None,
        };
        self.cursor += 1;
        Ok(sample)
    }

    async fn close(&mut self) {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

#[derive(Default)]
pub struct ScriptedFactory {
    behaviours: Mutex<HashMap<String, Behaviour>>,
    probes: Mutex<HashMap<String, Arc<Probe>>>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, device_id: &str, behaviour: Behaviour) -> Self {
        self.set(device_id, behaviour);
        self
    }

    pub fn set(&self, device_id: &str, behaviour: Behaviour) {
        self.behaviours.lock().insert(device_id.to_string(), behaviour);
    }

    pub fn probe(&self, device_id: &str) -> Arc<Probe> {
        self.probes
            .lock()
            .entry(device_id.to_string())
            .or_default()
            .clone()
    }
}

impl AdapterFactory for ScriptedFactory {
    fn create(&self, config: &DeviceConfig) -> AdapterResult<Box<dyn DeviceAdapter>> {
        let behaviour = self
            .behaviours
            .lock()
            .get(&config.device_id)
            .cloned()
            .ok_or_else(|| AdapterError::Configuration(format!("no script for {}", config.device_id)))?;
        Ok(Box::new(ScriptedAdapter {
            device_id: config.device_id.clone(),
            behaviour,
            probe: self.probe(&config.device_id),
            cursor: 0,
            open: false,
        }))
    }
}

pub fn frame() -> Frame {
    Frame {
        width: 2,
        height: 2,
        encoding: FrameEncoding::Jpeg,
        data: vec![0xFF, 0xD8, 0xFF, 0xD9],
    }
}

/// Recognizer returning the same faces for every frame.
pub struct StaticRecognizer {
    pub faces: Vec<FaceMatch>,
}

impl StaticRecognizer {
    pub fn employee_and_stranger() -> Self {
        let region = FaceRegion {
            top: 10,
            right: 40,
            bottom: 50,
            left: 5,
        };
        Self {
            faces: vec![
                FaceMatch {
                    employee_id: Some(7),
                    employee_name: Some("Ana".to_string()),
                    confidence: 0.92,
                    region,
                },
                FaceMatch {
                    employee_id: None,
                    employee_name: None,
                    confidence: 0.81,
                    region,
                },
            ],
        }
    }
}

#[async_trait]
impl Recognizer for StaticRecognizer {
    async fn recognize_faces(&self, _frame: &Frame) -> Result<Vec<FaceMatch>, RecognizerError> {
        Ok(self.faces.clone())
    }

    async fn detect_objects(&self, _frame: &Frame) -> Result<Vec<ObjectDetection>, RecognizerError> {
        Ok(Vec::new())
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
