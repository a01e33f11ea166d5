//! Advisory-driven strategy
//!
//! Accepts the external policy's suggestion verbatim when it is fresh,
//! confident, names a known phase and proposes a duration inside that
//! phase's green bounds. Anything else falls back to max-pressure for the
//! boundary; the returned decision carries the fallback reason so the
//! snapshot can flag it.

use std::time::Duration;

use tracing::debug;

use crate::config::schema::AdaptiveSettings;

use super::{ControlMode, Decision, FallbackReason, MaxPressure, StrategyView};

/// Advisory acceptance with max-pressure fallback.
#[derive(Debug, Clone)]
pub struct AdaptiveAdvisory {
    confidence_threshold: f64,
    max_age: Duration,
    fallback: MaxPressure,
}

impl AdaptiveAdvisory {
    /// Creates the strategy from its settings and fallback heuristic.
    #[must_use]
    pub const fn new(settings: &AdaptiveSettings, fallback: MaxPressure) -> Self {
        Self {
            confidence_threshold: settings.confidence_threshold,
            max_age: settings.advisory_max_age.get(),
            fallback,
        }
    }

    /// Accepts the buffered advisory or falls back.
    pub fn decide(&self, view: &StrategyView<'_>) -> Decision {
        match self.accept(view) {
            Ok(decision) => decision,
            Err(reason) => {
                debug!(reason = %reason, "advisory rejected, using max-pressure");
                let mut decision = self.fallback.decide_tagged(view, ControlMode::Adaptive);
                decision.confidence = view.advisory.map(|a| a.confidence);
                decision.fallback = Some(reason);
                decision
            }
        }
    }

    fn accept(&self, view: &StrategyView<'_>) -> Result<Decision, FallbackReason> {
        let advisory = view.advisory.ok_or(FallbackReason::Missing)?;

        if view.now.saturating_sub(advisory.received_at) > self.max_age {
            return Err(FallbackReason::Stale);
        }
        if advisory.confidence.is_nan() || advisory.confidence < self.confidence_threshold {
            return Err(FallbackReason::LowConfidence);
        }

        let phase = view
            .topology
            .phase(&advisory.phase)
            .ok_or(FallbackReason::UnknownPhase)?;
        if advisory.duration < phase.min_green || advisory.duration > phase.max_green {
            return Err(FallbackReason::DurationOutOfBounds);
        }

        Ok(Decision {
            phase: advisory.phase.clone(),
            duration: advisory.duration,
            strategy: ControlMode::Adaptive,
            confidence: Some(advisory.confidence),
            fallback: None,
        })
    }
}
