//! Energy controller
//!
//! Energy is the scalar in [0, 1] that drives tier placement. It is
//! assigned at encode time from source and entity signals, decays
//! exponentially with wall-clock time, and is boosted by recall hits and
//! explicit feedback. Decay is evaluated lazily: every read re-derives the
//! current value from `(energy, last_accessed)`, then persists the pair so
//! the computation never compounds.

use chrono::{DateTime, Utc};

use crate::config::EnergyConfig;
use crate::memory::node::MemoryNode;

/// Bounds for an explicit feedback adjustment
pub const FEEDBACK_RANGE: (f64, f64) = (-0.5, 0.5);

// ============================================================================
// ENERGY CONTROLLER
// ============================================================================

/// Computes initial energy and applies decay and boosts
#[derive(Debug, Clone, Default)]
pub struct EnergyController {
    config: EnergyConfig,
}

impl EnergyController {
    /// Create a controller with the given parameters
    pub fn new(config: EnergyConfig) -> Self {
        Self { config }
    }

    /// Current configuration
    pub fn config(&self) -> &EnergyConfig {
        &self.config
    }

    /// Source-tag bonus in [0, 1]
    ///
    /// Direct user statements are worth remembering more than ambient
    /// conversation or tool output.
    pub fn source_bonus(&self, source: &str) -> f64 {
        match source.to_ascii_lowercase().as_str() {
            "user" | "user_stated" => 1.0,
            "conversation" | "dialogue" => 0.6,
            "tool" | "tool_result" => 0.3,
            _ => 0.5,
        }
    }

    /// Initial energy for a freshly encoded node
    pub fn initial_energy(&self, source: &str, entity_count: usize) -> f64 {
        let c = &self.config;
        let entity_term = (entity_count as f64 / c.entity_saturation as f64).min(1.0);
        (c.init_base
            + c.init_source_weight * self.source_bonus(source)
            + c.init_entity_weight * entity_term)
            .clamp(0.0, 1.0)
    }

    /// Energy after exponential decay from `last_accessed` to `now`
    pub fn decayed(&self, energy: f64, last_accessed: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let elapsed_hours = (now - last_accessed).num_milliseconds().max(0) as f64 / 3_600_000.0;
        (energy * (-self.config.lambda_decay * elapsed_hours).exp()).clamp(0.0, 1.0)
    }

    /// Decay a node in place and stamp the evaluation time
    ///
    /// Stamping `last_accessed` makes the lazy evaluation idempotent: the
    /// persisted pair always means "this energy, as of this instant".
    pub fn apply_decay(&self, node: &mut MemoryNode, now: DateTime<Utc>) {
        node.energy = self.decayed(node.energy, node.last_accessed, now);
        node.last_accessed = now;
    }

    /// Decay then apply the recall boost
    pub fn boost_on_recall(&self, node: &mut MemoryNode, now: DateTime<Utc>) {
        self.apply_decay(node, now);
        node.energy = (node.energy + self.config.boost_on_recall).clamp(0.0, 1.0);
    }

    /// Decay then apply an explicit feedback delta
    ///
    /// The delta must already be validated against [`FEEDBACK_RANGE`]; the
    /// result is clamped to [0, 1] regardless.
    pub fn apply_feedback(&self, node: &mut MemoryNode, delta: f64, now: DateTime<Utc>) {
        self.apply_decay(node, now);
        node.energy = (node.energy + delta).clamp(0.0, 1.0);
    }
}

// ============================================================================
// TESTS
// ============================================================================
