//! Slew-limited moves of a source output
//!
//! Sensitive devices under test must not see voltage transients, so a new setpoint is never written
//! in one jump. The controller walks the output toward the target one quantum at a time, where the
//! quantum is the largest change allowed per ramp interval, and waits for the read-back between
//! steps. Every intermediate step is a real device write and takes one full interval, so a move of
//! N quanta takes N intervals.

use std::time::Duration;
use crate::{
    cancel::CancellationToken,
    error::{ Error, RangeError },
    instrument::Instrument,
    reading::FormatError,
};

const DEFAULT_RATE_PER_SECOND: f64 = 100.0;
const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

/// The result of a move which did not fail
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RampOutcome
{
    /// The target was written and this is the value read back afterwards
    Reached(f64),
    /// Cancellation was observed mid-move. The output was left at the last intermediate setpoint
    /// and this is the last value read back.
    Cancelled(f64),
}

impl RampOutcome
{
    pub fn value(&self) -> f64
    {
        match self {
            Self::Reached(value) | Self::Cancelled(value) => *value,
        }
    }

    pub fn is_cancelled(&self) -> bool
    {
        match self {
            Self::Cancelled(_) => true,
            _ => false,
        }
    }
}

/// Mutable state of one move, discarded when the move ends
#[derive(Debug)]
struct RampState
{
    current_actual: f64,
    last_commanded: f64,
    target: f64,
    quantum: f64,
    steps: usize,
    max_steps: usize,
}

impl RampState
{
    fn new(actual: f64, target: f64, quantum: f64) -> Self
    {
        let ideal_steps = ((target - actual).abs() / quantum).ceil() as usize;

        Self {
            current_actual: actual,
            // the device's own setpoint is unknown until we write one, the read-back is the best guess
            last_commanded: actual,
            target: target,
            quantum: quantum,
            steps: 0,
            max_steps: ideal_steps * 4 + 8,
        }
    }

    fn remaining(&self) -> f64
    {
        (self.current_actual - self.target)
            .abs()
            .max((self.last_commanded - self.target).abs())
    }

    fn within_quantum(&self) -> bool
    {
        self.remaining() <= self.quantum
    }

    /// The actual value moved one quantum toward the target, never crossing it and never more than
    /// one quantum away from the previous setpoint
    fn next_setpoint(&self) -> f64
    {
        step_toward(self.current_actual, self.target, self.quantum)
            .clamp(self.last_commanded - self.quantum, self.last_commanded + self.quantum)
    }
}

/// Moves `from` toward `to` by at most `quantum` without passing `to`
fn step_toward(from: f64, to: f64, quantum: f64) -> f64
{
    if from < to {
        (from + quantum).min(to)
    }
    else {
        (from - quantum).max(to)
    }
}

/// Rejects read-backs the step arithmetic can't work with
fn finite_readback(value: f64) -> Result<f64, Error>
{
    if value.is_finite() {
        Ok(value)
    }
    else {
        Err(FormatError::not_finite(value).into())
    }
}

/// Drives an instrument output to new setpoints at a bounded slew rate
#[derive(Debug, Clone)]
pub struct RampController
{
    max_rate_per_second: f64,
    interval: Duration,
}

impl Default for RampController
{
    fn default() -> Self
    {
        Self {
            max_rate_per_second: DEFAULT_RATE_PER_SECOND,
            interval: DEFAULT_INTERVAL,
        }
    }
}

impl RampController
{
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Set the maximum rate of change in output units per second
    ///
    /// Values which are not finite and positive are ignored.
    pub fn max_rate(mut self, units_per_second: f64) -> Self
    {
        if units_per_second.is_finite() && units_per_second > 0.0 {
            self.max_rate_per_second = units_per_second;
        }
        else {
            log::warn!(target: "arcs_probe::ramp", "Ignoring invalid ramp rate {}", units_per_second);
        }
        self
    }

    /// Set the time one ramp step takes: write, settle half, read back, settle the other half
    ///
    /// A zero interval is ignored.
    pub fn interval(mut self, interval: Duration) -> Self
    {
        if !interval.is_zero() {
            self.interval = interval;
        }
        else {
            log::warn!(target: "arcs_probe::ramp", "Ignoring zero ramp interval");
        }
        self
    }

    pub fn rate(&self) -> f64
    {
        self.max_rate_per_second
    }

    pub fn step_interval(&self) -> Duration
    {
        self.interval
    }

    /// Largest output change made in one step
    pub fn quantum(&self) -> f64
    {
        self.max_rate_per_second * self.interval.as_secs_f64()
    }

    /// Move the output to `target`
    ///
    /// Reads the current value, then steps one quantum at a time until the read-back is within one
    /// quantum of the target, and finally writes the exact target. The cancellation token is checked
    /// before every write; when it is set the move returns `RampOutcome::Cancelled` immediately and
    /// leaves the output where it is. Switching the output off is the caller's job.
    ///
    /// Any device error propagates as is. A partially completed move is never resumed.
    pub async fn move_to<I>(
        &self,
        target: f64,
        instrument: &mut I,
        cancel: &CancellationToken,
    )
        -> Result<RampOutcome, Error>

        where I: Instrument + ?Sized,
    {
        if !target.is_finite() {
            return Err(RangeError { requested: target, min: f64::MIN, max: f64::MAX }.into());
        }

        let quantum = self.quantum();
        let first_half = self.interval / 2;
        let second_half = self.interval - first_half;

        let actual = finite_readback(instrument.read_value().await?)?;
        let mut state = RampState::new(actual, target, quantum);
        log::debug!(target: "arcs_probe::ramp", "Ramping {} -> {} in steps of {}", actual, target, quantum);

        while !state.within_quantum() {
            if cancel.is_cancelled() {
                log::info!(target: "arcs_probe::ramp", "Ramp to {} cancelled at {}", target, state.current_actual);
                return Ok(RampOutcome::Cancelled(state.current_actual));
            }

            if state.steps >= state.max_steps {
                return Err(Error::RampStalled {
                    target: target,
                    last_actual: state.current_actual,
                    steps: state.steps,
                });
            }

            let next = state.next_setpoint();
            instrument.write_value(next).await?;
            state.last_commanded = next;
            state.steps += 1;

            tokio::time::sleep(first_half).await;
            state.current_actual = finite_readback(instrument.read_value().await?)?;
            tokio::time::sleep(second_half).await;
        }

        if cancel.is_cancelled() {
            log::info!(target: "arcs_probe::ramp", "Ramp to {} cancelled at {}", target, state.current_actual);
            return Ok(RampOutcome::Cancelled(state.current_actual));
        }

        // snap to the exact target so read-back jitter can't cause endless tiny corrections
        instrument.write_value(target).await?;
        let reached = instrument.read_value().await?;
        log::debug!(target: "arcs_probe::ramp", "Reached {} after {} steps (read back {})", target, state.steps, reached);

        Ok(RampOutcome::Reached(reached))
    }
}
