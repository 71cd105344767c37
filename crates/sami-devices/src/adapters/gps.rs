//! GPS adapter.
//!
//! Satellite providers with an API key are queried over HTTP at
//! `GET {endpoint}/devices/{device_id}/location` with bearer authentication.
//! Every other provider is served by [`LocationSimulator`], which produces
//! fixes around a base point and marks them as simulated.
//!
//! HTTP requests are bounded by the connection's own request timeout rather
//! than the worker's read timeout, so slow tracking APIs are not cut short.

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use sami_core::config::simulation;
use sami_core::GeoPoint;
use std::time::Duration;

use crate::adapter::{AdapterError, AdapterResult, DeviceAdapter, LocationFix, Sample};
use crate::config::{GpsConnection, GpsProvider};

/// Synthetic fix generator.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationSimulator {
    base: GeoPoint,
    jitter_degrees: f64,
}

impl LocationSimulator {
    pub fn new(base: GeoPoint, jitter_degrees: f64) -> Self {
        Self {
            base,
            jitter_degrees: jitter_degrees.abs(),
        }
    }

    pub fn base(&self) -> GeoPoint {
        self.base
    }

    pub fn next_fix(&self) -> LocationFix {
        let mut rng = rand::thread_rng();
        let (dlat, dlng) = if self.jitter_degrees > 0.0 {
            (
                rng.gen_range(-self.jitter_degrees..=self.jitter_degrees),
                rng.gen_range(-self.jitter_degrees..=self.jitter_degrees),
            )
        } else {
            (0.0, 0.0)
        };

        LocationFix {
            latitude: self.base.latitude + dlat,
            longitude: self.base.longitude + dlng,
            altitude: Some(rng.gen_range(10.0..=50.0)),
            accuracy: Some(rng.gen_range(5.0..=15.0)),
            speed: Some(rng.gen_range(0.0..=30.0)),
            heading: Some(rng.gen_range(0.0..360.0)),
            signal_strength: Some(rng.gen_range(0.7..=1.0)),
            satellite_count: Some(rng.gen_range(8..=12)),
            simulated: true,
        }
    }
}

impl Default for LocationSimulator {
    fn default() -> Self {
        Self::new(
            GeoPoint::new(simulation::BASE_LATITUDE, simulation::BASE_LONGITUDE),
            simulation::JITTER_DEGREES,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
enum FixSource {
    Remote { url: String, api_key: String },
    Simulator(LocationSimulator),
}

pub struct GpsAdapter {
    device_id: String,
    source: FixSource,
    request_timeout: Duration,
    client: Option<Client>,
    open: bool,
}

impl GpsAdapter {
    pub fn new(device_id: impl Into<String>, connection: &GpsConnection) -> Self {
        let device_id = device_id.into();
        let source = match &connection.provider {
            GpsProvider::Satellite {
                endpoint,
                api_key: Some(key),
            } if !key.is_empty() => FixSource::Remote {
                url: format!("{}/devices/{}/location", endpoint.trim_end_matches('/'), device_id),
                api_key: key.clone(),
            },
            GpsProvider::Satellite { .. } | GpsProvider::Cellular { .. } => {
                FixSource::Simulator(LocationSimulator::default())
            }
            GpsProvider::Simulated {
                latitude,
                longitude,
                jitter_degrees,
            } => FixSource::Simulator(LocationSimulator::new(
                GeoPoint::new(*latitude, *longitude),
                *jitter_degrees,
            )),
        };

        Self {
            device_id,
            source,
            request_timeout: Duration::from_secs(connection.request_timeout_secs.max(1)),
            client: None,
            open: false,
        }
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self.source, FixSource::Simulator(_))
    }

    async fn fetch(&self, url: &str, api_key: &str) -> AdapterResult<Option<LocationFix>> {
        let client = self.client.as_ref().ok_or(AdapterError::NotOpen)?;
        let response = match client.get(url).bearer_auth(api_key).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                tracing::debug!(device_id = %self.device_id, "Location request timed out");
                return Ok(None);
            }
            Err(e) => return Err(AdapterError::Device(format!("{}: {}", url, e))),
        };

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(device_id = %self.device_id, status = %status, "Location provider returned an error");
            return Ok(None);
        }

        match response.json::<LocationFix>().await {
            Ok(fix) if fix.point().is_valid() => Ok(Some(fix)),
            Ok(fix) => {
                tracing::warn!(
                    device_id = %self.device_id,
                    latitude = fix.latitude,
                    longitude = fix.longitude,
                    "Discarding out-of-range fix"
                );
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(device_id = %self.device_id, error = %e, "Malformed location payload");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl DeviceAdapter for GpsAdapter {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn open(&mut self) -> AdapterResult<()> {
        if let FixSource::Remote { url, api_key } = &self.source {
            let client = Client::builder()
                .timeout(self.request_timeout)
                .build()
                .map_err(|e| AdapterError::Connection(format!("HTTP client: {}", e)))?;

            // Any HTTP answer proves the endpoint is reachable.
            client
                .get(url)
                .bearer_auth(api_key)
                .send()
                .await
                .map_err(|e| AdapterError::Connection(format!("{}: {}", url, e)))?;

            self.client = Some(client);
        }

        self.open = true;
        tracing::info!(
            device_id = %self.device_id,
            simulated = self.is_simulated(),
            "GPS device opened"
        );
        Ok(())
    }

    async fn read_next(&mut self, _timeout: Duration) -> AdapterResult<Option<Sample>> {
        if !self.open {
            return Err(AdapterError::NotOpen);
        }

        let fix = match &self.source {
            FixSource::Simulator(simulator) => Some(simulator.next_fix()),
            FixSource::Remote { url, api_key } => self.fetch(url, api_key).await?,
        };

        Ok(fix.map(|fix| Sample::fix(self.device_id.clone(), fix)))
    }

    async fn close(&mut self) {
        self.client = None;
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
