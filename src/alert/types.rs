use crate::detection::DangerTier;
use crate::registry::CameraId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Alert category; each category has its own cooldown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    DangerHigh,
    Proximity,
    MediumDanger,
    System,
}

impl AlertCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCategory::DangerHigh => "danger_high",
            AlertCategory::Proximity => "proximity",
            AlertCategory::MediumDanger => "medium_danger",
            AlertCategory::System => "system",
        }
    }

    /// Stakeholder groups notified for this category
    pub fn audience(&self) -> &'static [StakeholderGroup] {
        match self {
            AlertCategory::DangerHigh => &[StakeholderGroup::Owner, StakeholderGroup::Authority],
            AlertCategory::Proximity | AlertCategory::MediumDanger | AlertCategory::System => {
                &[StakeholderGroup::Owner]
            }
        }
    }
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StakeholderGroup {
    /// Local site operator
    Owner,
    /// Remote responding agency
    Authority,
}

/// Structured fields carried by an alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertPayload {
    Danger {
        tier: DangerTier,
        label: String,
        confidence: f32,
        distance_cm: u32,
        burst_count: u32,
    },
    Proximity {
        label: String,
        distance_cm: u32,
    },
    MediumDanger {
        label: String,
        distance_cm: u32,
    },
    System {
        message: String,
    },
}

/// Outcome of fanning an alert out to its recipients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Partial,
    Failed,
    NoRecipients,
}

impl DeliveryStatus {
    pub fn from_counts(attempted: usize, succeeded: usize) -> Self {
        if attempted == 0 {
            DeliveryStatus::NoRecipients
        } else if succeeded == attempted {
            DeliveryStatus::Sent
        } else if succeeded == 0 {
            DeliveryStatus::Failed
        } else {
            DeliveryStatus::Partial
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: Uuid,
    pub category: AlertCategory,
    pub camera_id: Option<CameraId>,
    pub payload: AlertPayload,
    pub message: String,
    /// Every phone number and address the alert was sent to
    pub recipients: Vec<String>,
    pub delivery: DeliveryStatus,
    pub fired_at: DateTime<Utc>,
}
