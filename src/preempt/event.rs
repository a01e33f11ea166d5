//! Emergency events and their resolution

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::signal::state::as_millis;
use crate::topology::ApproachId;

/// How an emergency event ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The approach's flag cleared while the event was being served
    Cleared,
    /// The flag cleared before the event was served
    Cancelled,
    /// The preemptive green reached its maximum window
    MaxWindow,
    /// The approach was already green; the phase was extended instead
    ServedInPhase,
}

impl Resolution {
    /// Label used in metrics and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cleared => "cleared",
            Self::Cancelled => "cancelled",
            Self::MaxWindow => "max_window",
            Self::ServedInPhase => "served_in_phase",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One emergency detection, from first report to resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyEvent {
    /// Event identifier
    pub id: Uuid,
    /// Approach the vehicle is on
    pub approach: ApproachId,
    /// Detection timestamp (ms) reported by the detector
    pub detected_at_ms: u64,
    /// Highest confidence reported for this event
    pub confidence: f64,
    /// Controller clock when the event was raised
    #[serde(rename = "raisedAtMs", serialize_with = "as_millis")]
    pub raised_at: Duration,
    /// Controller clock at resolution (ms); unset while unresolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at_ms: Option<u64>,
    /// How the event ended
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

impl EmergencyEvent {
    /// Creates an unresolved event.
    #[must_use]
    pub fn new(approach: ApproachId, detected_at_ms: u64, confidence: f64, now: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            approach,
            detected_at_ms,
            confidence,
            raised_at: now,
            resolved_at_ms: None,
            resolution: None,
        }
    }

    /// Returns `true` until the event is resolved.
    #[must_use]
    pub const fn is_unresolved(&self) -> bool {
        self.resolution.is_none()
    }

    /// Marks the event resolved at controller time `now`.
    pub fn resolve(&mut self, resolution: Resolution, now: Duration) {
        self.resolution = Some(resolution);
        self.resolved_at_ms = Some(u64::try_from(now.as_millis()).unwrap_or(u64::MAX));
    }
}
