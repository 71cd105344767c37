//! Fleet tracking.
//!
//! [`FleetTracker`] listens for `location_update` detections and keeps the
//! latest fix of every GPS device. Vehicles are mapped to their tracker by
//! `gps_device_id`. History queries go to an optional [`EventHistory`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sami_core::config::defaults;
use sami_core::{
    calculate_distance, CallbackResult, DetectionEvent, DispatchContext, Error, EventCallback, EventHistory,
    EventType, GeoPoint, PipelineEvent, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub vehicle_id: String,
    pub name: String,
    #[serde(default)]
    pub license_plate: Option<String>,
    pub gps_device_id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub operator_id: Option<i64>,
}

fn default_true() -> bool {
    true
}

impl Vehicle {
    pub fn new(vehicle_id: impl Into<String>, name: impl Into<String>, gps_device_id: impl Into<String>) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            name: name.into(),
            license_plate: None,
            gps_device_id: gps_device_id.into(),
            enabled: true,
            project_id: None,
            operator_id: None,
        }
    }
}

/// Latest known position of a vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleLocation {
    pub vehicle_id: String,
    pub vehicle_name: String,
    pub license_plate: Option<String>,
    pub event: Arc<DetectionEvent>,
    /// Set by proximity queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

impl VehicleLocation {
    pub fn point(&self) -> Option<GeoPoint> {
        point_of(&self.event)
    }
}

fn point_of(event: &DetectionEvent) -> Option<GeoPoint> {
    Some(GeoPoint::new(event.get_f64("lat")?, event.get_f64("lng")?))
}

#[derive(Default)]
pub struct FleetTracker {
    vehicles: RwLock<BTreeMap<String, Vehicle>>,
    latest: RwLock<HashMap<String, Arc<DetectionEvent>>>,
    history: Option<Arc<dyn EventHistory>>,
}

impl FleetTracker {
    pub fn new(vehicles: impl IntoIterator<Item = Vehicle>) -> Self {
        Self {
            vehicles: RwLock::new(vehicles.into_iter().map(|v| (v.vehicle_id.clone(), v)).collect()),
            latest: RwLock::new(HashMap::new()),
            history: None,
        }
    }

    pub fn with_history(mut self, history: Arc<dyn EventHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn upsert_vehicle(&self, vehicle: Vehicle) {
        self.vehicles.write().insert(vehicle.vehicle_id.clone(), vehicle);
    }

    pub fn vehicles(&self) -> Vec<Vehicle> {
        self.vehicles.read().values().cloned().collect()
    }

    /// Latest `location_update` of a GPS device.
    pub fn latest_fix(&self, device_id: &str) -> Option<Arc<DetectionEvent>> {
        self.latest.read().get(device_id).cloned()
    }

    fn locate(&self, vehicle: &Vehicle) -> Option<VehicleLocation> {
        let event = self.latest_fix(&vehicle.gps_device_id)?;
        Some(VehicleLocation {
            vehicle_id: vehicle.vehicle_id.clone(),
            vehicle_name: vehicle.name.clone(),
            license_plate: vehicle.license_plate.clone(),
            event,
            distance_km: None,
        })
    }

    pub fn get_vehicle_location(&self, vehicle_id: &str) -> Result<Option<VehicleLocation>> {
        let vehicles = self.vehicles.read();
        let vehicle = vehicles
            .get(vehicle_id)
            .ok_or_else(|| Error::NotFound(format!("vehicle {}", vehicle_id)))?;
        Ok(self.locate(vehicle))
    }

    /// Locations of all enabled vehicles that have reported a fix.
    pub fn get_all_vehicle_locations(&self) -> BTreeMap<String, VehicleLocation> {
        self.vehicles
            .read()
            .values()
            .filter(|v| v.enabled)
            .filter_map(|v| self.locate(v).map(|loc| (v.vehicle_id.clone(), loc)))
            .collect()
    }

    /// Vehicles within `radius_km` of a point, nearest first. Defaults to 5 km.
    pub fn get_vehicles_near_location(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: Option<f64>,
    ) -> Vec<VehicleLocation> {
        let radius = radius_km.unwrap_or(defaults::NEARBY_RADIUS_KM);
        let mut nearby: Vec<VehicleLocation> = self
            .get_all_vehicle_locations()
            .into_values()
            .filter_map(|mut loc| {
                let point = loc.point()?;
                let distance = calculate_distance(latitude, longitude, point.latitude, point.longitude);
                (distance <= radius).then(|| {
                    loc.distance_km = Some(distance);
                    loc
                })
            })
            .collect();

        nearby.sort_by(|a, b| {
            a.distance_km
                .unwrap_or(f64::MAX)
                .total_cmp(&b.distance_km.unwrap_or(f64::MAX))
        });
        nearby
    }

    pub fn calculate_distance(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
        calculate_distance(lat1, lng1, lat2, lng2)
    }

    /// Stored location updates of a vehicle between `start` and `end`.
    pub fn get_vehicle_history(
        &self,
        vehicle_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Arc<DetectionEvent>>> {
        let device_id = self
            .vehicles
            .read()
            .get(vehicle_id)
            .map(|v| v.gps_device_id.clone())
            .ok_or_else(|| Error::NotFound(format!("vehicle {}", vehicle_id)))?;
        let history = self
            .history
            .as_ref()
            .ok_or_else(|| Error::Configuration("no event history configured".to_string()))?;

        Ok(history
            .device_events(&device_id, start, end)?
            .into_iter()
            .filter_map(|event| match event {
                PipelineEvent::Detection(d) if d.event_type == EventType::LocationUpdate => Some(d),
                _ => None,
            })
            .collect())
    }
}

#[async_trait]
impl EventCallback for FleetTracker {
    fn name(&self) -> &str {
        "fleet_tracker"
    }

    async fn on_event(&self, event: &PipelineEvent, _ctx: &mut DispatchContext) -> CallbackResult {
        if let PipelineEvent::Detection(detection) = event {
            if detection.event_type == EventType::LocationUpdate && point_of(detection).is_some() {
                let mut latest = self.latest.write();
                let newer = latest
                    .get(&detection.device_id)
                    .map_or(true, |prev| prev.occurred_at <= detection.occurred_at);
                if newer {
                    latest.insert(detection.device_id.clone(), detection.clone());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn fix(device: &str, lat: f64, lng: f64) -> PipelineEvent {
        DetectionEvent::new(device, EventType::LocationUpdate, 1.0)
            .with_data("lat", lat)
            .with_data("lng", lng)
            .into()
    }

    async fn feed(tracker: &FleetTracker, event: PipelineEvent) {
        tracker.on_event(&event, &mut DispatchContext::default()).await.unwrap();
    }

    fn tracker() -> FleetTracker {
        FleetTracker::new(vec![
            Vehicle::new("truck_1", "Truck 1", "gps_1"),
            Vehicle::new("truck_2", "Truck 2", "gps_2"),
            Vehicle::new("truck_3", "Truck 3", "gps_3"),
        ])
    }

    #[tokio::test]
    async fn test_latest_location() {
        let tracker = tracker();
        assert!(tracker.get_vehicle_location("truck_1").unwrap().is_none());
        assert!(tracker.get_vehicle_location("missing").is_err());

        feed(&tracker, fix("gps_1", -34.6037, -58.3816)).await;
        let loc = tracker.get_vehicle_location("truck_1").unwrap().unwrap();
        assert_eq!(loc.point(), Some(GeoPoint::new(-34.6037, -58.3816)));
        assert_eq!(tracker.get_all_vehicle_locations().len(), 1);
    }

    #[tokio::test]
    async fn test_nearby_sorted_by_distance() {
        let tracker = tracker();
        feed(&tracker, fix("gps_1", -34.63, -58.3816)).await;
        feed(&tracker, fix("gps_2", -34.6037, -58.3816)).await;
        feed(&tracker, fix("gps_3", -33.0, -58.3816)).await;

        let nearby = tracker.get_vehicles_near_location(-34.6037, -58.3816, None);
        let ids: Vec<_> = nearby.iter().map(|l| l.vehicle_id.as_str()).collect();
        assert_eq!(ids, vec!["truck_2", "truck_1"]);
        assert!(nearby[0].distance_km.unwrap() < 1e-9);
    }

    #[tokio::test]
    async fn test_ignores_older_and_other_events() {
        let tracker = tracker();
        let newer = DetectionEvent::new("gps_1", EventType::LocationUpdate, 1.0)
            .with_data("lat", 1.0)
            .with_data("lng", 1.0);
        let older = DetectionEvent::new("gps_1", EventType::LocationUpdate, 1.0)
            .with_data("lat", 2.0)
            .with_data("lng", 2.0)
            .occurred_at(newer.occurred_at - Duration::seconds(30));

        feed(&tracker, newer.into()).await;
        feed(&tracker, older.into()).await;
        feed(&tracker, DetectionEvent::new("gps_1", EventType::TagRead, 1.0).into()).await;

        let latest = tracker.latest_fix("gps_1").unwrap();
        assert_eq!(latest.get_f64("lat"), Some(1.0));
    }

    struct FixedHistory(Vec<PipelineEvent>);

    impl EventHistory for FixedHistory {
        fn device_events(
            &self,
            device_id: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<PipelineEvent>> {
            Ok(self.0.iter().filter(|e| e.device_id() == device_id).cloned().collect())
        }
    }

    #[test]
    fn test_history_filters_location_updates() {
        let history = FixedHistory(vec![
            fix("gps_1", 1.0, 1.0),
            DetectionEvent::new("gps_1", EventType::GeofenceViolation, 1.0).into(),
            fix("gps_2", 2.0, 2.0),
        ]);
        let tracker = tracker().with_history(Arc::new(history));
        let now = Utc::now();

        let events = tracker
            .get_vehicle_history("truck_1", now - Duration::hours(1), now)
            .unwrap();
        assert_eq!(events.len(), 1);

        assert!(matches!(
            FleetTracker::default().get_vehicle_history("truck_1", now, now),
            Err(Error::NotFound(_))
        ));
    }
}
