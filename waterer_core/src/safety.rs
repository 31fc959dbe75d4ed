//! History-based watering veto and channel disablement.
//!
//! Every tick appends one entry per channel (oldest first, bounded to the
//! configured length) plus one shared timestamp. The check looks at the
//! channel's latest weight, at a recent window of entries for sustained
//! high-intensity watering, and at the whole history for repeated negative
//! weights, which is taken as a broken load cell and disables the channel
//! until an operator clears it.

use std::collections::VecDeque;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::BuildError;

/// Entries newer than `history_len - RECENT_MARGIN` make up the recent window.
pub const RECENT_MARGIN: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub weight: f64,
    /// Channel needed water this tick.
    pub watered: bool,
    pub intensity: u32,
    /// The safety check failed this tick.
    pub failed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyLimits {
    pub history_len: usize,
    pub intense_level: u32,
    pub max_negative: usize,
    /// Below this weight the pot is presumed missing (warning only).
    pub no_pot_g: f64,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            history_len: 30,
            intense_level: 10,
            max_negative: 5,
            no_pot_g: 50.0,
        }
    }
}

impl SafetyLimits {
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.history_len <= RECENT_MARGIN {
            return Err(BuildError::InvalidConfig(format!(
                "history_len must be > {RECENT_MARGIN}, got {}",
                self.history_len
            )));
        }
        Ok(())
    }

    pub fn recent_window(&self) -> usize {
        self.history_len - RECENT_MARGIN
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    /// Latest weight is below zero; retried next tick.
    NegativeWeight,
    /// Recent watering was all at high intensity without effect.
    OverIntense,
    /// Too many negative weights; the channel is now disabled.
    Disabled,
    /// The channel was disabled earlier.
    AlreadyDisabled,
}

impl Verdict {
    pub fn passed(self) -> bool {
        self == Self::Pass
    }
}

/// Persisted form of all histories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub timestamps: Vec<DateTime<Local>>,
    pub channels: Vec<Vec<HistoryEntry>>,
}

#[derive(Debug, Clone)]
pub struct SafetyMonitor {
    limits: SafetyLimits,
    timestamps: VecDeque<DateTime<Local>>,
    history: Vec<VecDeque<HistoryEntry>>,
    disabled: Vec<bool>,
    disabled_dirty: bool,
}

fn push_bounded<T>(q: &mut VecDeque<T>, v: T, cap: usize) {
    if q.len() == cap {
        q.pop_front();
    }
    q.push_back(v);
}

impl SafetyMonitor {
    pub fn new(n_channels: usize, limits: SafetyLimits) -> Result<Self, BuildError> {
        limits.validate()?;
        Ok(Self {
            limits,
            timestamps: VecDeque::with_capacity(limits.history_len),
            history: vec![VecDeque::with_capacity(limits.history_len); n_channels],
            disabled: vec![false; n_channels],
            disabled_dirty: false,
        })
    }

    pub fn limits(&self) -> &SafetyLimits {
        &self.limits
    }

    pub fn n_channels(&self) -> usize {
        self.history.len()
    }

    /// Channel history, oldest first.
    pub fn history(&self, channel: usize) -> Option<&VecDeque<HistoryEntry>> {
        self.history.get(channel)
    }

    pub fn timestamps(&self) -> &VecDeque<DateTime<Local>> {
        &self.timestamps
    }

    pub fn record_tick(
        &mut self,
        at: DateTime<Local>,
        weights: &[f64],
        watered: &[bool],
        intensities: &[u32],
    ) {
        let cap = self.limits.history_len;
        push_bounded(&mut self.timestamps, at, cap);
        for (i, q) in self.history.iter_mut().enumerate() {
            let entry = HistoryEntry {
                weight: weights.get(i).copied().unwrap_or(f64::NAN),
                watered: watered.get(i).copied().unwrap_or(false),
                intensity: intensities.get(i).copied().unwrap_or(0),
                failed: false,
            };
            push_bounded(q, entry, cap);
        }
    }

    /// Judge a channel on its history without touching state.
    pub fn evaluate(&self, channel: usize) -> Verdict {
        if self.disabled.get(channel).copied().unwrap_or(true) {
            return Verdict::AlreadyDisabled;
        }
        let Some(h) = self.history.get(channel) else {
            return Verdict::AlreadyDisabled;
        };
        let Some(latest) = h.back() else {
            return Verdict::Pass;
        };

        if latest.weight < 0.0 {
            return Verdict::NegativeWeight;
        }

        let window = self.limits.recent_window();
        if h.len() >= window {
            let mut considered = h.iter().rev().take(window).filter(|e| !e.failed).peekable();
            if considered.peek().is_some()
                && considered.all(|e| e.watered && e.intensity >= self.limits.intense_level)
            {
                return Verdict::OverIntense;
            }
        }

        if h.iter().filter(|e| e.weight < 0.0).count() > self.limits.max_negative {
            return Verdict::Disabled;
        }
        Verdict::Pass
    }

    /// Evaluate, apply any disablement, and log the outcome.
    pub fn check(&mut self, channel: usize) -> Verdict {
        let verdict = self.evaluate(channel);
        let weight = self
            .history
            .get(channel)
            .and_then(|h| h.back())
            .map(|e| e.weight);
        match verdict {
            Verdict::Pass => {
                if let Some(w) = weight
                    && w < self.limits.no_pot_g
                {
                    tracing::warn!(channel, weight = w, critical = true, "weight suggests no pot on scale");
                }
            }
            Verdict::NegativeWeight => {
                tracing::error!(channel, weight = ?weight, critical = true, "negative weight, skipping watering");
            }
            Verdict::OverIntense => {
                tracing::error!(
                    channel,
                    critical = true,
                    history = ?self.history.get(channel),
                    "watering at high intensity for too long, skipping"
                );
            }
            Verdict::Disabled => {
                if let Some(d) = self.disabled.get_mut(channel) {
                    *d = true;
                    self.disabled_dirty = true;
                }
                tracing::error!(
                    channel,
                    critical = true,
                    max_negative = self.limits.max_negative,
                    "too many negative weights, channel disabled until manual reset"
                );
            }
            Verdict::AlreadyDisabled => {
                tracing::debug!(channel, "channel disabled");
            }
        }
        verdict
    }

    /// Store the check outcome on the channel's newest entry.
    pub fn mark_result(&mut self, channel: usize, passed: bool) {
        if let Some(e) = self.history.get_mut(channel).and_then(VecDeque::back_mut) {
            e.failed = !passed;
        }
    }

    pub fn is_disabled(&self, channel: usize) -> bool {
        self.disabled.get(channel).copied().unwrap_or(true)
    }

    pub fn disabled(&self) -> &[bool] {
        &self.disabled
    }

    pub fn all_disabled(&self) -> bool {
        self.disabled.iter().all(|d| *d)
    }

    /// Operator reset of a disabled channel.
    pub fn enable(&mut self, channel: usize) {
        if let Some(d) = self.disabled.get_mut(channel)
            && *d
        {
            *d = false;
            self.disabled_dirty = true;
            tracing::info!(channel, "channel re-enabled");
        }
    }

    /// Replace disabled flags, e.g. from storage. Lengths must match.
    pub fn set_disabled(&mut self, flags: Vec<bool>) -> Result<(), BuildError> {
        if flags.len() != self.disabled.len() {
            return Err(BuildError::InvalidConfig(format!(
                "disabled flags for {} channels, rig has {}",
                flags.len(),
                self.disabled.len()
            )));
        }
        self.disabled = flags;
        Ok(())
    }

    /// True once after the disabled flags changed.
    pub fn take_disabled_dirty(&mut self) -> bool {
        std::mem::take(&mut self.disabled_dirty)
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            timestamps: self.timestamps.iter().copied().collect(),
            channels: self
                .history
                .iter()
                .map(|q| q.iter().copied().collect())
                .collect(),
        }
    }

    /// Replace histories from a snapshot, keeping the newest entries if it
    /// is longer than the configured length.
    pub fn restore(&mut self, snap: HistorySnapshot) -> Result<(), BuildError> {
        if snap.channels.len() != self.history.len() {
            return Err(BuildError::InvalidConfig(format!(
                "history for {} channels, rig has {}",
                snap.channels.len(),
                self.history.len()
            )));
        }
        let cap = self.limits.history_len;
        fn keep_newest<T>(v: Vec<T>, cap: usize) -> VecDeque<T> {
            let skip = v.len().saturating_sub(cap);
            v.into_iter().skip(skip).collect()
        }
        self.timestamps = keep_newest(snap.timestamps, cap);
        self.history = snap
            .channels
            .into_iter()
            .map(|v| keep_newest(v, cap))
            .collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn monitor(n: usize) -> SafetyMonitor {
        SafetyMonitor::new(n, SafetyLimits::default()).unwrap()
    }

    fn tick(m: &mut SafetyMonitor, w: f64, watered: bool, intensity: u32) -> Verdict {
        m.record_tick(Local::now(), &[w], &[watered], &[intensity]);
        let v = m.check(0);
        m.mark_result(0, v.passed());
        v
    }

    #[test]
    fn six_negatives_disable_for_good() {
        let mut m = monitor(1);
        for _ in 0..6 {
            tick(&mut m, -3.0, false, 0);
        }
        assert_eq!(tick(&mut m, 250.0, false, 0), Verdict::Disabled);
        assert!(m.is_disabled(0));
        assert!(m.take_disabled_dirty());
        assert!(!m.take_disabled_dirty());
        for _ in 0..3 {
            assert_eq!(tick(&mut m, 300.0, false, 0), Verdict::AlreadyDisabled);
        }
        m.enable(0);
        assert!(!m.is_disabled(0));
    }

    #[test]
    fn five_negatives_are_tolerated() {
        let mut m = monitor(1);
        for _ in 0..5 {
            assert_eq!(tick(&mut m, -1.0, false, 0), Verdict::NegativeWeight);
        }
        assert_eq!(tick(&mut m, 200.0, false, 0), Verdict::Pass);
    }

    #[test]
    fn sustained_intense_watering_is_vetoed() {
        let mut m = monitor(1);
        for _ in 0..14 {
            assert!(tick(&mut m, 200.0, true, 10).passed());
        }
        assert_eq!(tick(&mut m, 200.0, true, 10), Verdict::OverIntense);
        // the failed tick is excluded from later windows, the veto persists
        assert_eq!(tick(&mut m, 200.0, true, 12), Verdict::OverIntense);
        assert_eq!(tick(&mut m, 200.0, false, 12), Verdict::Pass);
    }

    #[rstest]
    #[case(9, true)]
    #[case(10, false)]
    fn intense_threshold(#[case] intensity: u32, #[case] passes: bool) {
        let mut m = monitor(1);
        for _ in 0..14 {
            tick(&mut m, 200.0, true, intensity);
        }
        assert_eq!(tick(&mut m, 200.0, true, intensity).passed(), passes);
    }

    #[test]
    fn light_pot_only_warns() {
        let mut m = monitor(1);
        assert_eq!(tick(&mut m, 10.0, true, 0), Verdict::Pass);
    }

    #[test]
    fn history_is_bounded_and_restorable() {
        let mut m = monitor(2);
        for i in 0..40 {
            m.record_tick(Local::now(), &[f64::from(i), 1.0], &[false, true], &[0, 1]);
        }
        assert_eq!(m.history(0).unwrap().len(), 30);
        assert_eq!(m.history(0).unwrap().front().unwrap().weight, 10.0);
        assert_eq!(m.timestamps().len(), 30);

        let snap = m.snapshot();
        let mut again = monitor(2);
        again.restore(snap.clone()).unwrap();
        assert_eq!(again.snapshot(), snap);
        assert!(monitor(3).restore(snap).is_err());
    }

    #[test]
    fn short_history_rejected() {
        let limits = SafetyLimits {
            history_len: 15,
            ..SafetyLimits::default()
        };
        assert!(SafetyMonitor::new(1, limits).is_err());
    }
}
