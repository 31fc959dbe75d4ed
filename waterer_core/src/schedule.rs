//! Per-channel multi-step watering program.
//!
//! Each step names a target weight and how long it must be held once
//! reached. `update` is fed one weight per tick and drives the step index;
//! `should_water` answers whether the pot is below its current goal.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use waterer_traits::Clock;

use crate::error::BuildError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleStep {
    target_weight: f64,
    hold: Duration,
    weight_threshold: f64,
    max_weight_deviation: Option<f64>,
}

/// How a step decides that its goal is met.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GoalPolicy {
    /// `|w − target| ≤ dev`.
    Band(f64),
    /// Compare against the weight at the previous transition: rising targets
    /// are met from below, falling ones once the pot has dried down.
    Directional,
}

impl ScheduleStep {
    pub fn new(
        target_weight: f64,
        hold: Duration,
        weight_threshold: f64,
        max_weight_deviation: Option<f64>,
    ) -> Result<Self, BuildError> {
        if !target_weight.is_finite() {
            return Err(BuildError::InvalidConfig(
                "target_weight must be finite".into(),
            ));
        }
        if weight_threshold.is_nan() || weight_threshold < 0.0 {
            return Err(BuildError::InvalidConfig(format!(
                "weight_threshold must be >= 0, got {weight_threshold}"
            )));
        }
        if let Some(dev) = max_weight_deviation
            && (dev.is_nan() || dev < 0.0 || weight_threshold - 1.0 >= dev)
        {
            return Err(BuildError::InvalidConfig(format!(
                "max_weight_deviation {dev} must be >= 0 and greater than weight_threshold - 1"
            )));
        }
        Ok(Self {
            target_weight,
            hold,
            weight_threshold,
            max_weight_deviation,
        })
    }

    pub fn target_weight(&self) -> f64 {
        self.target_weight
    }

    pub fn hold(&self) -> Duration {
        self.hold
    }

    pub fn weight_threshold(&self) -> f64 {
        self.weight_threshold
    }

    pub fn policy(&self) -> GoalPolicy {
        self.max_weight_deviation
            .map_or(GoalPolicy::Directional, GoalPolicy::Band)
    }
}

/// Persistable progress of a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleProgress {
    pub step_index: usize,
    pub goal_reached: bool,
    /// Time already spent holding the current goal.
    pub held_ms: u64,
    pub last_transition_weight: Option<f64>,
    pub cycles_completed: u32,
}

pub struct WateringSchedule {
    steps: Vec<ScheduleStep>,
    cyclic: bool,
    clock: Arc<dyn Clock + Send + Sync>,
    step_index: usize,
    goal_reached_at: Option<Instant>,
    last_transition_weight: Option<f64>,
    cycles_completed: u32,
}

impl core::fmt::Debug for WateringSchedule {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WateringSchedule")
            .field("steps", &self.steps)
            .field("cyclic", &self.cyclic)
            .field("step_index", &self.step_index)
            .field("goal_reached", &self.goal_reached())
            .field("last_transition_weight", &self.last_transition_weight)
            .field("cycles_completed", &self.cycles_completed)
            .finish_non_exhaustive()
    }
}

impl WateringSchedule {
    pub fn new(
        steps: Vec<ScheduleStep>,
        cyclic: bool,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Result<Self, BuildError> {
        if steps.is_empty() {
            return Err(BuildError::InvalidConfig(
                "a schedule needs at least one step".into(),
            ));
        }
        Ok(Self {
            steps,
            cyclic,
            clock,
            step_index: 0,
            goal_reached_at: None,
            last_transition_weight: None,
            cycles_completed: 0,
        })
    }

    fn step(&self) -> &ScheduleStep {
        &self.steps[self.step_index]
    }

    pub fn steps(&self) -> &[ScheduleStep] {
        &self.steps
    }

    pub fn current_step_index(&self) -> usize {
        self.step_index
    }

    pub fn current_goal(&self) -> f64 {
        self.step().target_weight
    }

    pub fn goal_reached(&self) -> bool {
        self.goal_reached_at.is_some()
    }

    pub fn cycles_completed(&self) -> u32 {
        self.cycles_completed
    }

    pub fn last_transition_weight(&self) -> Option<f64> {
        self.last_transition_weight
    }

    /// Non-cyclic and past its last step.
    pub fn is_terminal(&self) -> bool {
        !self.cyclic && self.cycles_completed >= 1
    }

    pub fn in_goal(&self, w: f64) -> bool {
        let step = self.step();
        let target = step.target_weight;
        match step.policy() {
            GoalPolicy::Band(dev) => (target - dev..=target + dev).contains(&w),
            GoalPolicy::Directional => {
                let Some(prev) = self.last_transition_weight else {
                    return false;
                };
                let floor = target - step.weight_threshold;
                // the final step is kept topped up, never dried down to
                if self.is_terminal() || target > prev {
                    w >= floor
                } else if target < prev {
                    w <= floor
                } else {
                    true
                }
            }
        }
    }

    pub fn should_water(&self, w: f64) -> bool {
        w < self.step().target_weight - self.step().weight_threshold && !self.in_goal(w)
    }

    /// Feed this tick's weight.
    pub fn update(&mut self, w: f64) {
        if self.goal_reached_at.is_none() && self.in_goal(w) {
            self.goal_reached_at = Some(self.clock.now());
            tracing::debug!(step = self.step_index, weight = w, "schedule goal reached");
        }
        if let Some(at) = self.goal_reached_at {
            let hold = self.step().hold;
            if hold.is_zero() || self.clock.now().saturating_duration_since(at) >= hold {
                self.advance(w);
            }
        }
        if self.last_transition_weight.is_none() {
            self.last_transition_weight = Some(w);
        }
    }

    fn advance(&mut self, w: f64) {
        self.step_index += 1;
        if self.step_index >= self.steps.len() {
            if self.cyclic {
                self.step_index = 0;
                self.cycles_completed += 1;
            } else {
                self.step_index = self.steps.len() - 1;
                self.cycles_completed = 1;
            }
        }
        self.goal_reached_at = None;
        self.last_transition_weight = Some(w);
        tracing::debug!(
            step = self.step_index,
            cycles = self.cycles_completed,
            "schedule advanced"
        );
    }

    pub fn snapshot(&self) -> ScheduleProgress {
        let held_ms = self
            .goal_reached_at
            .map_or(0, |at| self.clock.ms_since(at));
        ScheduleProgress {
            step_index: self.step_index,
            goal_reached: self.goal_reached(),
            held_ms,
            last_transition_weight: self.last_transition_weight,
            cycles_completed: self.cycles_completed,
        }
    }

    /// Resume from a snapshot. An out-of-range step index is rejected and the
    /// schedule left untouched.
    pub fn restore(&mut self, p: &ScheduleProgress) -> Result<(), BuildError> {
        if p.step_index >= self.steps.len() {
            return Err(BuildError::InvalidConfig(format!(
                "saved step index {} is out of range for {} steps",
                p.step_index,
                self.steps.len()
            )));
        }
        self.step_index = p.step_index;
        self.goal_reached_at = p.goal_reached.then(|| {
            let now = self.clock.now();
            now.checked_sub(Duration::from_millis(p.held_ms))
                .unwrap_or(now)
        });
        self.last_transition_weight = p.last_transition_weight;
        self.cycles_completed = p.cycles_completed;
        Ok(())
    }
}
