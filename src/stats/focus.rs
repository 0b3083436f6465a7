//! Running aggregate of focus readings for end-of-run reporting.

use crate::protocol::{FocusReading, FocusState};
use serde::Serialize;
use std::collections::BTreeMap;

/// Accumulates focus readings as they arrive.
#[derive(Debug, Default)]
pub struct FocusTally {
    readings: u64,
    /// Running mean of the focus score
    mean: f64,
    /// Sum of squared deviations from the running mean (Welford)
    m2: f64,
    by_state: BTreeMap<&'static str, u64>,
    face_missing: u64,
}

/// Summary computed from a [`FocusTally`].
#[derive(Debug, Clone, Serialize)]
pub struct FocusSummary {
    pub readings: u64,
    pub mean_score: f64,
    pub score_std_dev: f64,
    /// Fraction of readings in which the engine saw a face
    pub face_presence: f64,
    pub by_state: BTreeMap<&'static str, u64>,
}

impl FocusTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, reading: &FocusReading) {
        self.readings += 1;
        let delta = reading.focus_score - self.mean;
        self.mean += delta / self.readings as f64;
        self.m2 += delta * (reading.focus_score - self.mean);

        *self.by_state.entry(reading.state.as_str()).or_insert(0) += 1;
        if !reading.face_detected {
            self.face_missing += 1;
        }
    }

    pub fn count(&self) -> u64 {
        self.readings
    }

    /// Share of readings spent in `state`, between 0 and 1.
    pub fn share(&self, state: FocusState) -> f64 {
        if self.readings == 0 {
            return 0.0;
        }
        let n = self.by_state.get(state.as_str()).copied().unwrap_or(0);
        n as f64 / self.readings as f64
    }

    /// Population standard deviation of the score.
    pub fn score_std_dev(&self) -> f64 {
        if self.readings < 2 {
            return 0.0;
        }
        (self.m2 / self.readings as f64).sqrt()
    }

    pub fn summary(&self) -> FocusSummary {
        let face_presence = if self.readings == 0 {
            0.0
        } else {
            1.0 - self.face_missing as f64 / self.readings as f64
        };

        FocusSummary {
            readings: self.readings,
            mean_score: self.mean,
            score_std_dev: self.score_std_dev(),
            face_presence,
            by_state: self.by_state.clone(),
        }
    }
}

impl std::fmt::Display for FocusSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Focus Summary:")?;
        writeln!(f, "- Readings: {}", self.readings)?;
        writeln!(
            f,
            "- Focus score: {:.2} (sd {:.2})",
            self.mean_score, self.score_std_dev
        )?;
        write!(f, "- Face present: {:.0}%", self.face_presence * 100.0)?;
        for (state, count) in &self.by_state {
            write!(f, "\n- {state}: {count}")?;
        }
        Ok(())
    }
}
