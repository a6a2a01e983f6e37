//! Fixed-capacity rolling history feeding the trend charts.
//!
//! Always exactly [`HISTORY_LEN`] slots. Before that many samples have
//! arrived, the front is padded with empty slots so the newest sample is
//! always last. Display only: nothing in the control path reads it.

use serde::Serialize;
use std::collections::VecDeque;
use time::OffsetDateTime;

use crate::reading::Reading;

pub const HISTORY_LEN: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistorySample {
    pub temperature: Option<f64>,
    pub humidity: f64,
    pub light: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl From<&Reading> for HistorySample {
    fn from(r: &Reading) -> Self {
        Self {
            temperature: r.temperature,
            humidity: r.humidity,
            light: r.light,
            timestamp: r.timestamp,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RollingHistory {
    slots: VecDeque<Option<HistorySample>>,
}

/// Per-metric view of the history, aligned slot by slot.
#[derive(Debug, Clone, Serialize)]
pub struct HistorySeries {
    pub temperature: Vec<Option<f64>>,
    pub humidity: Vec<Option<f64>>,
    pub light: Vec<Option<f64>>,
    pub timestamps: Vec<Option<String>>,
}

impl Default for RollingHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl RollingHistory {
    pub fn new() -> Self {
        Self {
            slots: std::iter::repeat(None).take(HISTORY_LEN).collect(),
        }
    }

    /// Append `sample`, evicting the oldest slot.
    pub fn push(&mut self, sample: HistorySample) {
        self.slots.pop_front();
        self.slots.push_back(Some(sample));
    }

    /// Back to all-empty slots.
    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots holding a real sample.
    pub fn filled(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn slots(&self) -> impl Iterator<Item = Option<&HistorySample>> {
        self.slots.iter().map(Option::as_ref)
    }

    pub fn series(&self) -> HistorySeries {
        let label = time::macros::format_description!("[hour]:[minute]");
        HistorySeries {
            temperature: self
                .slots()
                .map(|s| s.and_then(|s| s.temperature))
                .collect(),
            humidity: self.slots().map(|s| s.map(|s| s.humidity)).collect(),
            light: self.slots().map(|s| s.map(|s| s.light)).collect(),
            timestamps: self
                .slots()
                .map(|s| s.and_then(|s| s.timestamp.format(&label).ok()))
                .collect(),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
