//! Alert evaluation.
//!
//! [`AlertEvaluator`] is an ordinary router callback. It inspects detections
//! and emits alerts through the dispatch context; the router delivers those
//! alerts to every callback exactly once. Alerts are never evaluated again.
//!
//! | Detection | Condition | Alert | Severity |
//! |-----------|-----------|-------|----------|
//! | `location_update` | speed above limit | `excessive_speed` | medium |
//! | `location_update` | signal below floor | `weak_signal` | low |
//! | `unauthorized_person` / `unknown` | device is restricted | `unauthorized_access` | high |

use async_trait::async_trait;
use sami_core::config::defaults;
use sami_core::{
    Alert, CallbackResult, DetectionEvent, DispatchContext, EventCallback, EventType, PipelineEvent, Severity,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::registry::DeviceRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    #[serde(default = "default_max_speed")]
    pub max_speed_kmh: f64,
    #[serde(default = "default_min_signal")]
    pub min_signal_strength: f64,
}

fn default_max_speed() -> f64 {
    defaults::MAX_SPEED_KMH
}

fn default_min_signal() -> f64 {
    defaults::MIN_SIGNAL_STRENGTH
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_speed_kmh: default_max_speed(),
            min_signal_strength: default_min_signal(),
        }
    }
}

pub struct AlertEvaluator {
    thresholds: AlertThresholds,
    registry: Arc<DeviceRegistry>,
}

impl AlertEvaluator {
    pub fn new(thresholds: AlertThresholds, registry: Arc<DeviceRegistry>) -> Self {
        Self {
            thresholds,
            registry,
        }
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Alerts warranted by one detection, in rule order.
    pub fn evaluate(&self, event: &Arc<DetectionEvent>) -> Vec<Alert> {
        let mut alerts = Vec::new();

        match &event.event_type {
            EventType::LocationUpdate => {
                if let Some(speed) = event.get_f64("speed") {
                    if speed > self.thresholds.max_speed_kmh {
                        alerts.push(
                            Alert::new(
                                event.clone(),
                                EventType::ExcessiveSpeed,
                                Severity::Medium,
                                format!(
                                    "Device {} exceeding speed limit: {:.1} km/h (limit {:.1})",
                                    event.device_id, speed, self.thresholds.max_speed_kmh
                                ),
                            )
                            .with_data("speed", speed)
                            .with_data("max_speed", self.thresholds.max_speed_kmh),
                        );
                    }
                }

                if let Some(signal) = event.get_f64("signal_strength") {
                    if signal < self.thresholds.min_signal_strength {
                        alerts.push(
                            Alert::new(
                                event.clone(),
                                EventType::WeakSignal,
                                Severity::Low,
                                format!("Weak GPS signal on device {}: {:.2}", event.device_id, signal),
                            )
                            .with_data("signal_strength", signal),
                        );
                    }
                }
            }
            event_type if event_type.is_unresolved_identity() => {
                // Unknown devices are treated as restricted.
                let restricted = self
                    .registry
                    .get(&event.device_id)
                    .map(|c| c.restricted)
                    .unwrap_or(true);
                if restricted {
                    let subject = match event.get("tag_id").and_then(|v| v.as_str()) {
                        Some(tag) => format!("tag {}", tag),
                        None => "unrecognized person".to_string(),
                    };
                    alerts.push(Alert::new(
                        event.clone(),
                        EventType::UnauthorizedAccess,
                        Severity::High,
                        format!("Unauthorized access at {}: {}", event.device_id, subject),
                    ));
                }
            }
            _ => {}
        }

        alerts
    }
}

#[async_trait]
impl EventCallback for AlertEvaluator {
    fn name(&self) -> &str {
        "alert_evaluator"
    }

    async fn on_event(&self, event: &PipelineEvent, ctx: &mut DispatchContext) -> CallbackResult {
        if let PipelineEvent::Detection(detection) = event {
            for alert in self.evaluate(detection) {
                ctx.emit(alert);
            }
        }
        Ok(())
    }
}
