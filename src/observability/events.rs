//! Audit event stream
//!
//! Typed events from the control loop, one JSON object per line, each
//! tagged with `type` and numbered from zero by `sequence`.

use std::io::{LineWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::preempt::EmergencyEvent;
use crate::signal::Correction;
use crate::strategy::{ControlMode, FallbackReason};
use crate::topology::{ApproachId, PhaseId};

// ============================================================================
// Supporting Types
// ============================================================================

/// Why the control loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Input ended or the simulation ran its ticks
    Completed,
    /// Interrupted by SIGINT
    Interrupted,
    /// Terminated by SIGTERM
    Terminated,
    /// Unrecoverable error
    Error,
}

/// Totals reported when the loop stops.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Ticks executed
    pub ticks: u64,
    /// Phases committed
    pub commits: u64,
    /// Commits that needed a correction
    pub corrections: u64,
    /// Preemptions started
    pub preemptions: u64,
    /// Input records rejected
    pub rejected_inputs: u64,
    /// Controller time covered, in seconds
    pub uptime_secs: f64,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ticks={} commits={} corrections={} preemptions={} rejected={} uptime={:.1}s",
            self.ticks,
            self.commits,
            self.corrections,
            self.preemptions,
            self.rejected_inputs,
            self.uptime_secs,
        )
    }
}

// ============================================================================
// Events
// ============================================================================

/// A discrete event emitted during control.
///
/// Tagged with `"type"` when serialized so consumers can dispatch on it.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// The control loop has started.
    ControllerStarted {
        /// Wall-clock time
        timestamp: DateTime<Utc>,
        /// Intersection identifier
        intersection: String,
        /// Initial strategy
        mode: ControlMode,
    },

    /// The control loop has stopped.
    ControllerStopped {
        /// Wall-clock time
        timestamp: DateTime<Utc>,
        /// Why it stopped
        reason: StopReason,
        /// Totals
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<RunSummary>,
    },

    /// A phase was granted green.
    PhaseCommitted {
        /// Wall-clock time
        timestamp: DateTime<Utc>,
        /// Tick number
        tick: u64,
        /// Phase committed
        phase: PhaseId,
        /// Committed green in seconds
        duration_secs: f64,
        /// Strategy that produced it
        strategy: ControlMode,
        /// Advisory confidence, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
    },

    /// A decision was corrected before commit.
    DegradedDecision {
        /// Wall-clock time
        timestamp: DateTime<Utc>,
        /// Tick number
        tick: u64,
        /// Strategy that produced it
        strategy: ControlMode,
        /// Corrections applied
        corrections: Vec<Correction>,
    },

    /// The adaptive strategy did not accept the advisory.
    AdvisoryFallback {
        /// Wall-clock time
        timestamp: DateTime<Utc>,
        /// Tick number
        tick: u64,
        /// Why
        reason: FallbackReason,
        /// Phase chosen by the fallback
        phase: PhaseId,
    },

    /// The active strategy changed at a boundary.
    ModeSwitched {
        /// Wall-clock time
        timestamp: DateTime<Utc>,
        /// Tick number
        tick: u64,
        /// Previous mode
        from: ControlMode,
        /// New mode
        to: ControlMode,
    },

    /// A preemption was requested.
    PreemptionStarted {
        /// Wall-clock time
        timestamp: DateTime<Utc>,
        /// Tick number
        tick: u64,
        /// Approaches to hold green
        approaches: Vec<ApproachId>,
    },

    /// An emergency approach was already green and its phase was extended.
    EmergencyServedInPhase {
        /// Wall-clock time
        timestamp: DateTime<Utc>,
        /// Tick number
        tick: u64,
        /// Phase extended
        phase: PhaseId,
        /// Emergency approach
        approach: ApproachId,
    },

    /// An emergency event was resolved.
    EmergencyResolved {
        /// Wall-clock time
        timestamp: DateTime<Utc>,
        /// Tick number
        tick: u64,
        /// The resolved event
        event: EmergencyEvent,
    },

    /// An input record was dropped.
    InputRejected {
        /// Wall-clock time
        timestamp: DateTime<Utc>,
        /// Record kind
        kind: String,
        /// Why
        reason: String,
    },
}

// ============================================================================
// Audit log
// ============================================================================

#[derive(Serialize)]
struct Sequenced<'a> {
    sequence: u64,
    #[serde(flatten)]
    event: &'a Event,
}

struct AuditSink {
    out: LineWriter<Box<dyn Write + Send>>,
    next: u64,
}

/// Append-only JSONL audit log shared by the control loop and the CLI.
///
/// Sequence numbers are assigned under the same lock as the write, so the
/// file order and the numbering always agree.
pub struct EventEmitter {
    sink: Mutex<AuditSink>,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventEmitter({} emitted)", self.emitted())
    }
}

impl EventEmitter {
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Mutex::new(AuditSink {
                out: LineWriter::new(writer),
                next: 0,
            }),
        }
    }

    /// Audit log on stderr; stdout stays reserved for snapshots.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Counts events but writes nothing.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Truncates or creates `path` and logs there.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be created.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        std::fs::File::create(path).map(|file| Self::new(Box::new(file)))
    }

    /// Appends one event. A failing writer loses the line but never stalls
    /// the caller.
    pub fn emit(&self, event: Event) {
        let Ok(mut sink) = self.sink.lock() else {
            return;
        };
        let sequence = sink.next;
        sink.next += 1;
        if let Ok(mut line) = serde_json::to_vec(&Sequenced {
            sequence,
            event: &event,
        }) {
            line.push(b'\n');
            let _ = sink.out.write_all(&line);
        }
    }

    /// Events handed to [`EventEmitter::emit`] so far.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.sink.lock().map_or(0, |sink| sink.next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Writer whose bytes stay readable after the emitter takes it.
    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn logged(shared: &Shared) -> Vec<serde_json::Value> {
        let bytes = shared.0.lock().unwrap().clone();
        serde_json::Deserializer::from_slice(&bytes)
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_events_are_numbered_in_write_order() {
        let out = Shared::default();
        let emitter = EventEmitter::new(Box::new(out.clone()));
        emitter.emit(Event::ModeSwitched {
            timestamp: Utc::now(),
            tick: 4,
            from: ControlMode::Fixed,
            to: ControlMode::Adaptive,
        });
        emitter.emit(Event::InputRejected {
            timestamp: Utc::now(),
            kind: "telemetry".to_owned(),
            reason: "unknown approach 'SW'".to_owned(),
        });

        let log = logged(&out);
        let numbers: Vec<_> = log.iter().map(|e| e["sequence"].as_u64()).collect();
        assert_eq!(numbers, [Some(0), Some(1)]);
        assert_eq!(log[0]["type"], "ModeSwitched");
        assert_eq!(log[0]["to"], "adaptive");
        assert_eq!(log[1]["kind"], "telemetry");
        assert_eq!(emitter.emitted(), 2);
    }

    #[test]
    fn test_stop_without_summary_omits_field() {
        let out = Shared::default();
        let emitter = EventEmitter::new(Box::new(out.clone()));
        emitter.emit(Event::ControllerStopped {
            timestamp: Utc::now(),
            reason: StopReason::Completed,
            summary: None,
        });
        let log = logged(&out);
        assert_eq!(log[0]["reason"], "completed");
        assert!(log[0].get("summary").is_none());
    }

    #[test]
    fn test_noop_still_counts() {
        let emitter = EventEmitter::noop();
        emitter.emit(Event::InputRejected {
            timestamp: Utc::now(),
            kind: "advisory".to_owned(),
            reason: "inbox full".to_owned(),
        });
        assert_eq!(emitter.emitted(), 1);
    }

    #[test]
    fn test_summary_display() {
        let summary = RunSummary {
            ticks: 10,
            commits: 2,
            uptime_secs: 10.0,
            ..RunSummary::default()
        };
        assert_eq!(
            summary.to_string(),
            "ticks=10 commits=2 corrections=0 preemptions=0 rejected=0 uptime=10.0s"
        );
    }
}
