//! Action stage: when the backlog crosses the action threshold, ask the
//! connection manager to look for a healthier consumer, at most once per
//! grace period.

use blockstream_types::Timestamp;

use crate::config::BlockBufferConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionDecision {
    /// Nothing to do this cycle.
    Idle,
    /// Request a new consumer. Immediate when the buffer is fully saturated.
    Trigger { is_immediate: bool },
}

/// Decide whether this cycle triggers a reconnect.
///
/// `last_trigger` is updated when a trigger fires and cleared whenever
/// saturation is below the threshold, so a later crossing is never held back
/// by an old trigger.
pub fn decide(
    last_trigger: &mut Option<Timestamp>,
    saturation_percent: f64,
    config: &BlockBufferConfig,
    now: Timestamp,
) -> ActionDecision {
    if saturation_percent < config.action_stage_threshold {
        *last_trigger = None;
        return ActionDecision::Idle;
    }
    if let Some(last) = *last_trigger {
        if last.elapsed_since(now) < config.action_grace_period {
            return ActionDecision::Idle;
        }
    }
    *last_trigger = Some(now);
    ActionDecision::Trigger {
        is_immediate: saturation_percent >= 100.0,
    }
}
