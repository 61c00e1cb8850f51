// Stage schedule module
//
// Pure computation: turns an ordered list of stages into an instantaneous
// target arrival rate, the cumulative number of iterations expected so far,
// and the time at which the next iteration is due. The scheduler uses it to
// pace dispatch; nothing here touches the clock.

use std::time::Duration;

use crate::error::LoadTestError;

/// Slack used when comparing cumulative iteration counts.
const CUMULATIVE_EPSILON: f64 = 1e-9;

/// One time-bounded segment of the load profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stage {
    pub duration: Duration,
    pub target_rate: f64,
}

impl Stage {
    pub fn new(duration: Duration, target_rate: f64) -> Self {
        Self {
            duration,
            target_rate,
        }
    }
}

/// A stage resolved against the timeline: where it starts and which rate it ramps from.
#[derive(Debug, Clone, Copy)]
struct Segment {
    start: Duration,
    span: Duration,
    from: f64,
    to: f64,
}

impl Segment {
    fn end(&self) -> Duration {
        self.start + self.span
    }

    /// Rate at `local` time into the segment. Exact at both ends.
    fn rate_at_local(&self, local: Duration) -> f64 {
        if local.is_zero() {
            return self.from;
        }
        if local >= self.span {
            return self.to;
        }
        let f = local.as_secs_f64() / self.span.as_secs_f64();
        self.from * (1.0 - f) + self.to * f
    }

    /// Iterations expected over the first `local` of the segment (trapezoid area).
    fn area_until(&self, local: Duration) -> f64 {
        let local = local.min(self.span);
        let r = self.rate_at_local(local);
        (self.from + r) / 2.0 * local.as_secs_f64()
    }

    fn area(&self) -> f64 {
        (self.from + self.to) / 2.0 * self.span.as_secs_f64()
    }

    /// Solves `from*τ + (to-from)/(2*span)*τ² = count` for τ within the segment.
    fn time_to_reach(&self, count: f64) -> Duration {
        let span = self.span.as_secs_f64();
        let c = count.max(0.0);
        let a = (self.to - self.from) / (2.0 * span);
        let b = self.from;
        let disc = (b * b + 4.0 * a * c).max(0.0);
        let denom = b + disc.sqrt();
        let tau = if denom > 0.0 { 2.0 * c / denom } else { 0.0 };
        let tau = if tau.is_finite() { tau.clamp(0.0, span) } else { 0.0 };
        Duration::from_secs_f64(tau).min(self.span)
    }
}

/// Validated, ordered sequence of stages.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    start_rate: f64,
    stages: Vec<Stage>,
    total: Duration,
}

impl Schedule {
    /// Build a schedule. Fails on an empty stage list, a non-positive stage
    /// duration, or a negative / non-finite rate.
    pub fn new(start_rate: f64, stages: Vec<Stage>) -> Result<Self, LoadTestError> {
        if stages.is_empty() {
            return Err(LoadTestError::ConfigError(
                "schedule must contain at least one stage".to_string(),
            ));
        }
        if !start_rate.is_finite() || start_rate < 0.0 {
            return Err(LoadTestError::ConfigError(format!(
                "start_rate must be a non-negative number, got {}",
                start_rate
            )));
        }
        for (i, stage) in stages.iter().enumerate() {
            if stage.duration.is_zero() {
                return Err(LoadTestError::ConfigError(format!(
                    "stages[{}].duration must be greater than 0",
                    i
                )));
            }
            if !stage.target_rate.is_finite() || stage.target_rate < 0.0 {
                return Err(LoadTestError::ConfigError(format!(
                    "stages[{}].target must be a non-negative number, got {}",
                    i, stage.target_rate
                )));
            }
        }
        let total = stages
            .iter()
            .try_fold(Duration::ZERO, |acc, s| acc.checked_add(s.duration))
            .ok_or_else(|| {
                LoadTestError::ConfigError("total stage duration is too large".to_string())
            })?;
        Ok(Self {
            start_rate,
            stages,
            total,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Sum of all stage durations.
    pub fn total_duration(&self) -> Duration {
        self.total
    }

    /// True once the last stage has fully elapsed.
    pub fn is_terminal(&self, elapsed: Duration) -> bool {
        elapsed >= self.total
    }

    fn segments(&self) -> impl Iterator<Item = Segment> + '_ {
        let mut start = Duration::ZERO;
        let mut from = self.start_rate;
        self.stages.iter().map(move |stage| {
            let seg = Segment {
                start,
                span: stage.duration,
                from,
                to: stage.target_rate,
            };
            start += stage.duration;
            from = stage.target_rate;
            seg
        })
    }

    /// Target arrival rate (iterations per second) at `elapsed`.
    ///
    /// A time that falls exactly on a stage boundary belongs to the stage that
    /// ends there, so the declared target is returned unchanged. Returns `None`
    /// past the end of the schedule.
    pub fn rate_at(&self, elapsed: Duration) -> Option<f64> {
        if elapsed > self.total {
            return None;
        }
        self.segments()
            .find(|seg| elapsed <= seg.end())
            .map(|seg| seg.rate_at_local(elapsed.saturating_sub(seg.start)))
    }

    /// Integral of the rate from 0 to `elapsed` (clamped to the schedule end).
    pub fn cumulative_at(&self, elapsed: Duration) -> f64 {
        let mut total = 0.0;
        for seg in self.segments() {
            if elapsed >= seg.end() {
                total += seg.area();
            } else {
                if elapsed > seg.start {
                    total += seg.area_until(elapsed - seg.start);
                }
                break;
            }
        }
        total
    }

    /// Number of iterations the whole schedule asks for.
    pub fn expected_iterations(&self) -> f64 {
        self.cumulative_at(self.total)
    }

    /// Time (since run start) at which iteration number `issued` (0-based) is due:
    /// the first instant where the cumulative rate reaches `issued + 1`.
    /// `None` when the schedule can never reach that count.
    pub fn next_due(&self, issued: u64) -> Option<Duration> {
        let target = issued as f64 + 1.0;
        let mut acc = 0.0;
        for seg in self.segments() {
            let area = seg.area();
            if acc + area + CUMULATIVE_EPSILON >= target {
                return Some(seg.start + seg.time_to_reach(target - acc));
            }
            acc += area;
        }
        None
    }
}
