//! Camera adapter.
//!
//! Frames come from a [`FrameGrabber`]. HTTP snapshot cameras are served by
//! the built-in [`SnapshotGrabber`]; RTSP and USB sources need a
//! [`StreamDecoder`] supplied by the embedding application. Only every Nth
//! grabbed frame (`analyze_every`) is returned as a sample, the rest are
//! reported as misses.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::adapter::{AdapterError, AdapterResult, DeviceAdapter, Frame, FrameEncoding, Sample};
use crate::config::{CameraConnection, CameraSource};

/// Produces raw frames for one camera.
#[async_trait]
pub trait FrameGrabber: Send {
    async fn connect(&mut self) -> AdapterResult<()>;

    /// Next frame, or `None` if none arrived within `timeout`.
    async fn grab(&mut self, timeout: Duration) -> AdapterResult<Option<Frame>>;

    async fn release(&mut self);
}

/// Opens streaming sources (RTSP, USB) that need a video decoder.
pub trait StreamDecoder: Send + Sync {
    fn open(
        &self,
        source: &CameraSource,
        connection: &CameraConnection,
    ) -> AdapterResult<Box<dyn FrameGrabber>>;
}

/// Fetches one JPEG per request from an HTTP endpoint.
pub struct SnapshotGrabber {
    url: String,
    timeout: Duration,
    width: u32,
    height: u32,
    client: Option<Client>,
}

impl SnapshotGrabber {
    pub fn new(url: impl Into<String>, timeout: Duration, width: u32, height: u32) -> Self {
        Self {
            url: url.into(),
            timeout,
            width,
            height,
            client: None,
        }
    }
}

#[async_trait]
impl FrameGrabber for SnapshotGrabber {
    async fn connect(&mut self) -> AdapterResult<()> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| AdapterError::Connection(format!("HTTP client: {}", e)))?;

        // Probe once so an unreachable camera fails at open time.
        client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| AdapterError::Connection(format!("{}: {}", self.url, e)))?;

        self.client = Some(client);
        Ok(())
    }

    async fn grab(&mut self, timeout: Duration) -> AdapterResult<Option<Frame>> {
        let client = self.client.as_ref().ok_or(AdapterError::NotOpen)?;
        let response = match client.get(&self.url).timeout(timeout.max(self.timeout)).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Ok(None),
            Err(e) => return Err(AdapterError::Device(format!("{}: {}", self.url, e))),
        };

        if !response.status().is_success() {
            tracing::debug!(url = %self.url, status = %response.status(), "Snapshot request failed");
            return Ok(None);
        }

        let encoding = match response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            Some(ct) if ct.contains("png") => FrameEncoding::Png,
            _ => FrameEncoding::Jpeg,
        };

        let data = response
            .bytes()
            .await
            .map_err(|e| AdapterError::Device(format!("{}: {}", self.url, e)))?;
        if data.is_empty() {
            return Ok(None);
        }

        Ok(Some(Frame {
            width: self.width,
            height: self.height,
            encoding,
            data: data.to_vec(),
        }))
    }

    async fn release(&mut self) {
        self.client = None;
    }
}

pub struct CameraAdapter {
    device_id: String,
    connection: CameraConnection,
    grabber: Option<Box<dyn FrameGrabber>>,
    frames_seen: u64,
    open: bool,
}

impl CameraAdapter {
    /// `grabber` is `None` when no decoder is available for the source;
    /// `open` then fails with a connection error.
    pub fn new(
        device_id: impl Into<String>,
        connection: CameraConnection,
        grabber: Option<Box<dyn FrameGrabber>>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            connection,
            grabber,
            frames_seen: 0,
            open: false,
        }
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

#[async_trait]
impl DeviceAdapter for CameraAdapter {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn open(&mut self) -> AdapterResult<()> {
        let source = self.connection.source.describe();
        let grabber = self.grabber.as_mut().ok_or_else(|| {
            AdapterError::Connection(format!("no stream decoder available for {}", source))
        })?;
        grabber.connect().await?;
        self.open = true;
        tracing::info!(device_id = %self.device_id, source = %source, "Camera opened");
        Ok(())
    }

    async fn read_next(&mut self, timeout: Duration) -> AdapterResult<Option<Sample>> {
        if !self.open {
            return Err(AdapterError::NotOpen);
        }
        let grabber = self.grabber.as_mut().ok_or(AdapterError::NotOpen)?;
        let Some(frame) = grabber.grab(timeout).await? else {
            return Ok(None);
        };

        self.frames_seen += 1;
        let every = u64::from(self.connection.analyze_every.max(1));
        if self.frames_seen % every != 0 {
            return Ok(None);
        }
        Ok(Some(Sample::frame(self.device_id.clone(), frame)))
    }

    async fn capture(&mut self, timeout: Duration) -> AdapterResult<Option<Sample>> {
        if !self.open {
            return Err(AdapterError::NotOpen);
        }
        let grabber = self.grabber.as_mut().ok_or(AdapterError::NotOpen)?;
        Ok(grabber
            .grab(timeout)
            .await?
            .map(|frame| Sample::frame(self.device_id.clone(), frame)))
    }

    async fn close(&mut self) {
        if let Some(grabber) = self.grabber.as_mut() {
            grabber.release().await;
        }
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
