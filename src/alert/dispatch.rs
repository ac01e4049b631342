use super::notifier::{DeliveryTally, Notifier};
use super::throttle::AlertThrottle;
use super::types::{AlertCategory, AlertEvent, AlertPayload, DeliveryStatus, StakeholderGroup};
use crate::config::{AlertConfig, ContactsConfig};
use crate::detection::AssessedDetection;
use crate::events::{EventBus, WildwatchEvent};
use crate::registry::CameraId;
use crate::storage::EventStore;
use chrono::Utc;
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A triggering condition waiting for the throttle's decision
#[derive(Debug, Clone)]
pub struct AlertRequest {
    pub category: AlertCategory,
    pub camera_id: Option<CameraId>,
    pub payload: AlertPayload,
}

impl AlertRequest {
    pub fn danger(camera_id: CameraId, entry: &AssessedDetection, burst_count: u32) -> Self {
        Self {
            category: AlertCategory::DangerHigh,
            camera_id: Some(camera_id),
            payload: AlertPayload::Danger {
                tier: entry.assessment.tier,
                label: entry.detection.label.clone(),
                confidence: entry.detection.confidence,
                distance_cm: entry.assessment.distance_cm,
                burst_count,
            },
        }
    }

    pub fn proximity(camera_id: CameraId, entry: &AssessedDetection) -> Self {
        Self {
            category: AlertCategory::Proximity,
            camera_id: Some(camera_id),
            payload: AlertPayload::Proximity {
                label: entry.detection.label.clone(),
                distance_cm: entry.assessment.distance_cm,
            },
        }
    }

    pub fn medium(camera_id: CameraId, entry: &AssessedDetection) -> Self {
        Self {
            category: AlertCategory::MediumDanger,
            camera_id: Some(camera_id),
            payload: AlertPayload::MediumDanger {
                label: entry.detection.label.clone(),
                distance_cm: entry.assessment.distance_cm,
            },
        }
    }

    pub fn system(camera_id: Option<CameraId>, message: impl Into<String>) -> Self {
        Self {
            category: AlertCategory::System,
            camera_id,
            payload: AlertPayload::System {
                message: message.into(),
            },
        }
    }
}

/// Rendered texts for one alert
struct Composed {
    owner_sms: String,
    authority_sms: String,
    email: Option<(String, String)>,
}

/// Throttles, composes and fans out alerts, then records and publishes them.
pub struct AlertDispatcher {
    throttle: Arc<AlertThrottle>,
    notifier: Arc<dyn Notifier>,
    contacts: ContactsConfig,
    timezone: Tz,
    store: Arc<dyn EventStore>,
    event_bus: Arc<EventBus>,
}

impl AlertDispatcher {
    pub fn new(
        config: &AlertConfig,
        contacts: ContactsConfig,
        throttle: Arc<AlertThrottle>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn EventStore>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            throttle,
            notifier,
            contacts,
            timezone: resolve_alert_timezone(&config.timezone),
            store,
            event_bus,
        }
    }

    pub fn throttle(&self) -> &Arc<AlertThrottle> {
        &self.throttle
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn contacts(&self) -> &ContactsConfig {
        &self.contacts
    }

    /// Fire the alert if the throttle admits it.
    ///
    /// System alerts about a camera are throttled per camera; service-wide
    /// system alerts are never throttled. Returns the recorded event, or
    /// `None` when throttled. Transport failures only affect the event's
    /// delivery status.
    pub async fn fire(&self, request: AlertRequest, now: Instant) -> Option<AlertEvent> {
        let admitted = match (request.category, request.camera_id) {
            (AlertCategory::System, None) => true,
            (AlertCategory::System, Some(camera_id)) => {
                self.throttle
                    .admit_scoped(AlertCategory::System, camera_id, now)
            }
            (category, _) => self.throttle.admit(category, now),
        };
        if !admitted {
            debug!("Skipping throttled {} alert", request.category);
            return None;
        }

        let fired_at = Utc::now();
        let composed = self.compose(&request, fired_at);

        let mut recipients = Vec::new();
        let mut tally = DeliveryTally::default();

        for group in request.category.audience() {
            let (numbers, emails) = self.recipients(*group);
            let sms_text = match group {
                StakeholderGroup::Owner => &composed.owner_sms,
                StakeholderGroup::Authority => &composed.authority_sms,
            };

            tally = tally.merge(self.notifier.sms_all(numbers, sms_text).await);
            recipients.extend(numbers.iter().cloned());

            if let Some((subject, body)) = &composed.email {
                tally = tally.merge(self.notifier.email_all(emails, subject, body).await);
                recipients.extend(emails.iter().cloned());
            }
        }

        let delivery = DeliveryStatus::from_counts(tally.attempted, tally.succeeded);
        match delivery {
            DeliveryStatus::Sent => info!(
                "{} alert sent to {} recipients",
                request.category, tally.attempted
            ),
            DeliveryStatus::NoRecipients => {
                info!("{} alert fired with no recipients configured", request.category)
            }
            DeliveryStatus::Partial | DeliveryStatus::Failed => warn!(
                "{} alert delivered to {}/{} recipients",
                request.category, tally.succeeded, tally.attempted
            ),
        }

        let event = AlertEvent {
            id: Uuid::new_v4(),
            category: request.category,
            camera_id: request.camera_id,
            payload: request.payload,
            message: composed.owner_sms,
            recipients,
            delivery,
            fired_at,
        };

        if let Err(e) = self.store.record_alert(&event).await {
            warn!("Failed to record {} alert: {}", event.category, e);
        }

        let _ = self
            .event_bus
            .publish(WildwatchEvent::AlertFired {
                alert: event.clone(),
            })
            .await;

        Some(event)
    }

    fn recipients(&self, group: StakeholderGroup) -> (&[String], &[String]) {
        match group {
            StakeholderGroup::Owner => (
                self.contacts.owner_numbers.as_slice(),
                self.contacts.owner_emails.as_slice(),
            ),
            StakeholderGroup::Authority => (
                self.contacts.authority_numbers.as_slice(),
                self.contacts.authority_emails.as_slice(),
            ),
        }
    }

    fn compose(&self, request: &AlertRequest, fired_at: chrono::DateTime<Utc>) -> Composed {
        let timestamp = fired_at
            .with_timezone(&self.timezone)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let camera = camera_label(request.camera_id);

        match &request.payload {
            AlertPayload::Danger {
                tier,
                label,
                distance_cm,
                ..
            } => {
                let owner_contact = self
                    .contacts
                    .owner_numbers
                    .first()
                    .map(String::as_str)
                    .unwrap_or("N/A");

                Composed {
                    owner_sms: format!(
                        "ALERT! Dangerous wildlife detected: {} at {}cm from {}. Stay away and contact forest authorities. [{}]",
                        label, distance_cm, camera, timestamp
                    ),
                    authority_sms: format!(
                        "Wildlife alert: {} detected at site ({}). Distance: {}cm. Owner contact: {}. [{}]",
                        label, camera, distance_cm, owner_contact, timestamp
                    ),
                    email: Some((
                        "HIGH DANGER: Wildlife Alert".to_string(),
                        format!(
                            "<html><body>\
                             <h2 style=\"color: red;\">DANGER ALERT</h2>\
                             <p><strong>Time:</strong> {}</p>\
                             <p><strong>Species:</strong> {}</p>\
                             <p><strong>Distance:</strong> {} cm</p>\
                             <p><strong>Camera:</strong> {}</p>\
                             <p><strong>Danger Level:</strong> {}</p>\
                             <p style=\"color: red;\"><strong>Action Required:</strong> Stay away from the area. Forest authorities have been notified.</p>\
                             </body></html>",
                            timestamp,
                            label,
                            distance_cm,
                            camera,
                            tier.as_str().to_uppercase()
                        ),
                    )),
                }
            }
            AlertPayload::Proximity { distance_cm, .. } => {
                let text = format!(
                    "SECURITY ALERT! Person detected very close ({}cm) to {}. Possible tampering. [{}]",
                    distance_cm, camera, timestamp
                );
                Composed {
                    owner_sms: text.clone(),
                    authority_sms: text,
                    email: None,
                }
            }
            AlertPayload::MediumDanger { label, distance_cm } => {
                let text = format!(
                    "Alert: Wildlife detected - {} at {}cm from {}. Monitor the situation. [{}]",
                    label, distance_cm, camera, timestamp
                );
                Composed {
                    owner_sms: text.clone(),
                    authority_sms: text,
                    email: None,
                }
            }
            AlertPayload::System { message } => {
                let text = match request.camera_id {
                    Some(_) => format!("SYSTEM ALERT ({}): {} [{}]", camera, message, timestamp),
                    None => format!("SYSTEM ALERT: {} [{}]", message, timestamp),
                };
                Composed {
                    owner_sms: text.clone(),
                    authority_sms: text,
                    email: None,
                }
            }
        }
    }
}

fn camera_label(camera_id: Option<CameraId>) -> String {
    match camera_id {
        Some(id) => format!("Camera {}", id),
        None => "the system".to_string(),
    }
}

pub(crate) fn resolve_alert_timezone(tz_name: &str) -> Tz {
    match tz_name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!("Invalid alert timezone '{}', falling back to UTC", tz_name);
            chrono_tz::UTC
        }
    }
}
