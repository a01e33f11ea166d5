//! Input records and the bounded inbox
//!
//! Producers (telemetry collector, emergency detector, operator console,
//! policy advisor) never touch signal state. They push [`ControlInput`]
//! records into a bounded `tokio::sync::mpsc` channel; the control loop
//! drains it once per tick without waiting for new data.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::FeedError;
use crate::strategy::ControlMode;
use crate::topology::{ApproachId, PhaseId};

// ============================================================================
// Records
// ============================================================================

/// Queue length observed on one approach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryReport {
    /// Approach observed
    pub approach_id: ApproachId,
    /// Vehicles waiting
    pub queue_length: u32,
    /// Observation time (ms)
    pub timestamp_ms: u64,
}

/// Emergency vehicle detection, or its cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyReport {
    /// Approach the vehicle is on
    pub approach_id: ApproachId,
    /// Detector confidence in `[0, 1]`
    #[serde(default = "full_confidence")]
    pub confidence: f64,
    /// Detection time (ms)
    pub timestamp_ms: u64,
    /// `false` clears the approach's emergency flag
    #[serde(default = "default_active")]
    pub active: bool,
}

const fn full_confidence() -> f64 {
    1.0
}

const fn default_active() -> bool {
    true
}

/// Operator request to switch strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeCommand {
    /// Target strategy
    pub mode: ControlMode,
    /// Phase for manual mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_phase_id: Option<PhaseId>,
    /// Green duration (seconds) for manual mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_duration_sec: Option<f64>,
}

/// Suggestion from the external policy module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisoryReport {
    /// Suggested phase
    pub phase_id: PhaseId,
    /// Suggested green (seconds)
    pub duration_sec: f64,
    /// Policy confidence in `[0, 1]`
    pub confidence: f64,
}

/// Any record accepted by the control loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlInput {
    /// Queue observation
    Telemetry(TelemetryReport),
    /// Emergency detection or cancellation
    Emergency(EmergencyReport),
    /// Strategy switch
    Mode(ModeCommand),
    /// Policy suggestion
    Advisory(AdvisoryReport),
}

impl ControlInput {
    /// Record kind, for logs and rejection events.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Telemetry(_) => "telemetry",
            Self::Emergency(_) => "emergency",
            Self::Mode(_) => "mode",
            Self::Advisory(_) => "advisory",
        }
    }
}

// ============================================================================
// Inbox
// ============================================================================

/// Creates a bounded inbox with the given capacity.
#[must_use]
pub fn inbox(capacity: usize) -> (InboxSender, Inbox) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (InboxSender { tx }, Inbox { rx })
}

/// Producer handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct InboxSender {
    tx: mpsc::Sender<ControlInput>,
}

impl InboxSender {
    /// Pushes a record without waiting.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::InboxFull` when at capacity and
    /// `FeedError::InboxClosed` when the loop has stopped.
    pub fn offer(&self, input: ControlInput) -> Result<(), FeedError> {
        self.tx.try_send(input).map_err(|e| match e {
            TrySendError::Full(_) => FeedError::InboxFull,
            TrySendError::Closed(_) => FeedError::InboxClosed,
        })
    }

    /// Pushes a record, waiting for capacity.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::InboxClosed` when the loop has stopped.
    pub async fn submit(&self, input: ControlInput) -> Result<(), FeedError> {
        self.tx.send(input).await.map_err(|_| FeedError::InboxClosed)
    }
}

/// Consumer side, owned by the control loop.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::Receiver<ControlInput>,
}

impl Inbox {
    /// Takes at most the records buffered right now. Never waits.
    pub fn drain(&mut self) -> Vec<ControlInput> {
        let buffered = self.rx.len();
        let mut drained = Vec::with_capacity(buffered);
        for _ in 0..buffered {
            match self.rx.try_recv() {
                Ok(input) => drained.push(input),
                Err(_) => break,
            }
        }
        drained
    }

    /// Returns `true` once every sender is gone and the buffer is empty.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.rx.is_closed() && self.rx.is_empty()
    }
}
