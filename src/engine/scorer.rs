//! Rolling safety score
//!
//! The score starts at the configured baseline. Critical and warning risk
//! events subtract fixed amounts (floored at zero); a tick free of both
//! recovers `recovery_rate` points, never past the baseline.

use serde::Serialize;
use std::collections::VecDeque;

use super::config::SafetyConfig;
use super::events::Event;
use super::types::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScorePoint {
    pub tick: u64,
    pub score: f64,
}

/// Read-only view of the score for reporting
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreStats {
    pub current: f64,
    pub min: f64,
    pub max: f64,
    pub baseline: f64,
    /// Score change across the retained history
    pub trend: f64,
}

#[derive(Debug, Clone)]
pub struct SafetyScorer {
    baseline: f64,
    delta_critical: f64,
    delta_warning: f64,
    recovery_rate: f64,
    current: f64,
    min: f64,
    max: f64,
    history: VecDeque<ScorePoint>,
    history_len: usize,
}

impl SafetyScorer {
    pub fn new(config: &SafetyConfig) -> Self {
        Self {
            baseline: config.baseline_score,
            delta_critical: config.score_delta_critical,
            delta_warning: config.score_delta_warning,
            recovery_rate: config.recovery_rate,
            current: config.baseline_score,
            min: config.baseline_score,
            max: config.baseline_score,
            history: VecDeque::new(),
            history_len: config.score_history_len.max(1),
        }
    }

    /// Start from a score other than the baseline (e.g. a resumed run)
    pub fn with_initial_score(mut self, score: f64) -> Self {
        let score = score.max(0.0);
        self.current = score;
        self.min = score;
        self.max = score;
        self
    }

    /// Apply one tick's events and return the updated score
    pub fn record(&mut self, tick: u64, events: &[Event]) -> f64 {
        let mut adverse = false;
        for event in events.iter().filter(|e| e.is_risk()) {
            let penalty = match event.severity {
                Severity::Critical => self.delta_critical,
                Severity::Warning => self.delta_warning,
                Severity::Caution | Severity::None => continue,
            };
            adverse = true;
            self.current = (self.current - penalty).max(0.0);
        }

        if !adverse && self.current < self.baseline {
            self.current = (self.current + self.recovery_rate).min(self.baseline);
        }

        self.min = self.min.min(self.current);
        self.max = self.max.max(self.current);
        if self.history.len() == self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(ScorePoint {
            tick,
            score: self.current,
        });
        self.current
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn baseline(&self) -> f64 {
        self.baseline
    }

    pub fn history(&self) -> impl Iterator<Item = &ScorePoint> {
        self.history.iter()
    }

    pub fn trend(&self) -> f64 {
        match (self.history.front(), self.history.back()) {
            (Some(first), Some(last)) => last.score - first.score,
            _ => 0.0,
        }
    }

    pub fn stats(&self) -> ScoreStats {
        ScoreStats {
            current: self.current,
            min: self.min,
            max: self.max,
            baseline: self.baseline,
            trend: self.trend(),
        }
    }
}
