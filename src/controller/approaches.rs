//! Per-approach live state
//!
//! Queue lengths and emergency flags, mutated only by the control loop
//! while it drains the inbox at a tick boundary.

use std::time::Duration;

use indexmap::IndexMap;

use crate::topology::{ApproachId, Topology};

use super::inbox::TelemetryReport;

/// Live state of one approach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApproachState {
    /// Approach identifier
    pub id: ApproachId,
    /// Display name
    pub name: String,
    /// Vehicles waiting
    pub queue_length: u32,
    /// An emergency vehicle is detected on this approach
    pub emergency: bool,
    /// Timestamp (ms) of the last applied telemetry record
    pub last_updated: Option<u64>,
    /// Controller clock at the last emergency detection
    pub emergency_seen_at: Option<Duration>,
}

/// Outcome of applying one telemetry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryOutcome {
    /// Queue length updated
    Applied,
    /// Older than the last applied record; discarded
    OutOfOrder,
    /// The approach is not part of the topology
    UnknownApproach,
}

/// Live state of every approach, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct ApproachTable {
    entries: IndexMap<ApproachId, ApproachState>,
}

impl ApproachTable {
    /// Creates an empty-queue table for every approach in the topology.
    #[must_use]
    pub fn from_topology(topology: &Topology) -> Self {
        let entries = topology
            .approaches()
            .map(|a| {
                let state = ApproachState {
                    id: a.id.clone(),
                    name: a.name.clone(),
                    queue_length: 0,
                    emergency: false,
                    last_updated: None,
                    emergency_seen_at: None,
                };
                (a.id.clone(), state)
            })
            .collect();
        Self { entries }
    }

    /// Looks up one approach.
    #[must_use]
    pub fn get(&self, id: &ApproachId) -> Option<&ApproachState> {
        self.entries.get(id)
    }

    /// Queue length of an approach; zero when unknown.
    #[must_use]
    pub fn queue_length(&self, id: &ApproachId) -> u32 {
        self.entries.get(id).map_or(0, |a| a.queue_length)
    }

    /// Sets a queue length directly. Returns `false` for unknown approaches.
    pub fn set_queue(&mut self, id: &ApproachId, queue_length: u32) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.queue_length = queue_length;
                true
            }
            None => false,
        }
    }

    /// Applies a telemetry record, discarding records older than the last
    /// one applied for the same approach.
    pub fn apply_telemetry(&mut self, report: &TelemetryReport) -> TelemetryOutcome {
        let Some(entry) = self.entries.get_mut(&report.approach_id) else {
            return TelemetryOutcome::UnknownApproach;
        };
        if entry.last_updated.is_some_and(|last| report.timestamp_ms < last) {
            return TelemetryOutcome::OutOfOrder;
        }
        entry.queue_length = report.queue_length;
        entry.last_updated = Some(report.timestamp_ms);
        TelemetryOutcome::Applied
    }

    /// Raises or clears an approach's emergency flag.
    ///
    /// Raising also refreshes the detection time used by the detection hold.
    pub fn set_emergency(&mut self, id: &ApproachId, active: bool, now: Duration) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.emergency = active;
                entry.emergency_seen_at = active.then_some(now);
                true
            }
            None => false,
        }
    }

    /// Emergency flag of an approach; `false` when unknown.
    #[must_use]
    pub fn emergency(&self, id: &ApproachId) -> bool {
        self.entries.get(id).is_some_and(|a| a.emergency)
    }

    /// Clears every flag whose last detection is older than `hold`.
    ///
    /// Returns the approaches that were cleared.
    pub fn expire_emergencies(&mut self, now: Duration, hold: Duration) -> Vec<ApproachId> {
        let mut cleared = Vec::new();
        for entry in self.entries.values_mut() {
            let expired = entry
                .emergency_seen_at
                .is_some_and(|seen| now.saturating_sub(seen) > hold);
            if entry.emergency && expired {
                entry.emergency = false;
                entry.emergency_seen_at = None;
                cleared.push(entry.id.clone());
            }
        }
        cleared
    }

    /// Iterates approaches in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &ApproachState> {
        self.entries.values()
    }

    /// Queue length per approach, in configuration order.
    #[must_use]
    pub fn queues(&self) -> IndexMap<ApproachId, u32> {
        self.entries
            .iter()
            .map(|(id, a)| (id.clone(), a.queue_length))
            .collect()
    }
}
