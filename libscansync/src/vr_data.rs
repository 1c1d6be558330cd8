//! The sample stream shared by the position and rotary log parsers.
//!
//! Both logs reduce to the same thing once tokenized: an ordered run of
//! timestamped rotation samples, an optional acquisition trigger, and a
//! set of series derived from them once the whole file has been read.
//! The two parsers embed a [`SampleStream`] and feed it line by line.
//!
//! The rig's rotary encoder (or the kit attached to it) sometimes logs
//! the same sample twice; a line whose timestamp equals the previously
//! accepted one is dropped whole, so accepted timestamps are strictly
//! increasing.

use std::f64::consts::TAU;

use time::PrimitiveDateTime;

use super::constants::LOG_TIME_FMT;
use super::error::LogError;
use super::scrape::lower_bound;

/// How raw rotation values convert to radians.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationUnits {
    /// Integer ticks from the rotary sensor; a full turn is
    /// `units_per_turn` ticks. Converted values are constrained to
    /// [0, 2π).
    EncoderUnits { units_per_turn: u32 },
    /// Already-accumulated degrees; converted without range reduction.
    Degrees,
}

impl RotationUnits {
    pub fn to_radians(self, raw: f64) -> f64 {
        match self {
            RotationUnits::EncoderUnits { units_per_turn } => {
                constrain_angle(TAU * raw / f64::from(units_per_turn))
            }
            RotationUnits::Degrees => raw.to_radians(),
        }
    }
}

/// Constrain an angle to lie in [0, 2π).
pub fn constrain_angle(x: f64) -> f64 {
    let x = x % TAU;
    if x < 0.0 {
        x + TAU
    } else {
        x
    }
}

/// Min-max normalize a series in place so the minimum maps to 0.0 and
/// the maximum to 1.0. A constant series maps every point to 0.5 rather
/// than dividing by zero.
pub fn zero_normalize(series: &mut [f64]) {
    let Some(min) = series.iter().copied().reduce(f64::min) else {
        return;
    };
    let max = series.iter().copied().reduce(f64::max).unwrap_or(min);
    if max == min {
        series.fill(0.5);
    } else {
        let span = max - min;
        for v in series.iter_mut() {
            *v = (*v - min) / span;
        }
    }
}

/// Parse the date-time prefix of a log line (the first two whitespace
/// separated fields).
pub fn parse_line_time(line: &str) -> Result<PrimitiveDateTime, LogError> {
    let mut fields = line.split_whitespace();
    let date = fields.next().unwrap_or_default();
    let tod = fields.next().unwrap_or_default();
    Ok(PrimitiveDateTime::parse(
        &format!("{date} {tod}"),
        LOG_TIME_FMT,
    )?)
}

/// Ordered, de-duplicated rotation samples from one log stream plus the
/// trigger bookkeeping and derived series common to both log formats.
#[derive(Debug, Default)]
pub struct SampleStream {
    ptimes: Vec<PrimitiveDateTime>,
    times: Vec<f64>,
    rotations: Vec<f64>,
    rotations_in_rads: Vec<f64>,
    has_acquisition: bool,
    provisional_trigger: Option<PrimitiveDateTime>,
    trigger_index: Option<usize>,
}

impl SampleStream {
    /// Whether a sample stamped `t` would be accepted, i.e. is not a
    /// repeat of the previously accepted timestamp.
    pub fn accepts(&self, t: &PrimitiveDateTime) -> bool {
        self.ptimes.last() != Some(t)
    }

    /// Append a sample. Returns false when the sample was dropped as a
    /// duplicate of its predecessor.
    pub fn push_sample(&mut self, t: PrimitiveDateTime, raw_rotation: f64) -> bool {
        if !self.accepts(&t) {
            return false;
        }
        self.ptimes.push(t);
        self.rotations.push(raw_rotation);
        true
    }

    /// Record the acquisition trigger as seen at instant `t` (the
    /// marker line's own timestamp where it carries one, None when no
    /// instant is known yet). Only the first latch sticks; later
    /// marker lines are ignored.
    pub fn latch_trigger(&mut self, t: Option<PrimitiveDateTime>) {
        if self.has_acquisition {
            return;
        }
        self.has_acquisition = true;
        self.provisional_trigger = t;
    }

    /// Resolve the provisional trigger instant to the first accepted
    /// sample at or after it. Called once the whole file has been read;
    /// durations are measured from the resolved sample, not from the
    /// raw line the marker appeared on.
    pub fn resolve_trigger(&mut self) {
        if !self.has_acquisition {
            return;
        }
        self.trigger_index = match self.provisional_trigger {
            Some(t) => lower_bound(&self.ptimes, &t),
            None => (!self.ptimes.is_empty()).then_some(0),
        };
    }

    /// Fill the duration (seconds since trigger) and radian series.
    /// Fails when no trigger was resolved for this stream.
    pub fn derive_durations_and_rotations(&mut self, units: RotationUnits) -> bool {
        let Some(trigger_time) = self.trigger_time() else {
            return false;
        };
        self.times = self
            .ptimes
            .iter()
            .map(|t| (*t - trigger_time).as_seconds_f64())
            .collect();
        self.rotations_in_rads = self
            .rotations
            .iter()
            .map(|&r| units.to_radians(r))
            .collect();
        true
    }

    pub fn len(&self) -> usize {
        self.ptimes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ptimes.is_empty()
    }

    pub fn contains_acquisition(&self) -> bool {
        self.has_acquisition
    }

    pub fn trigger_index(&self) -> Option<usize> {
        self.trigger_index
    }

    pub fn trigger_time(&self) -> Option<PrimitiveDateTime> {
        self.trigger_index.map(|i| self.ptimes[i])
    }

    pub fn ptimes(&self) -> &[PrimitiveDateTime] {
        &self.ptimes
    }

    /// Durations in seconds relative to the trigger sample; empty until
    /// [`Self::derive_durations_and_rotations`] has run.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Raw rotation values as logged (encoder units or degrees).
    pub fn rotations(&self) -> &[f64] {
        &self.rotations
    }

    pub fn rotations_in_rads(&self) -> &[f64] {
        &self.rotations_in_rads
    }

    pub fn rotation(&self, i: usize) -> f64 {
        self.rotations[i]
    }

    pub fn radian_rotation(&self, i: usize) -> f64 {
        self.rotations_in_rads[i]
    }

    pub fn time(&self, i: usize) -> f64 {
        self.times[i]
    }

    /// Lower bound over the derived duration series.
    pub fn find_nearest_index(&self, duration: f64) -> Option<usize> {
        lower_bound(&self.times, &duration)
    }

    /// Lower bound over the absolute sample timestamps.
    pub fn find_nearest_ptime_index(&self, t: &PrimitiveDateTime) -> Option<usize> {
        lower_bound(&self.ptimes, t)
    }
}
