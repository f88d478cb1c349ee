//! Stepped voltage sweeps
//!
//! A [`SweepSpec`] describes the setpoints, a [`Sweep`] drives a source through them one ramped
//! move at a time. Setpoints are computed with integer milli-unit counters so that hundreds of
//! steps don't accumulate floating point drift, and the end bound is always the last setpoint even
//! when the span is not a multiple of the step.

use std::fmt;
use crate::{
    cancel::CancellationToken,
    error::Error,
    instrument::Instrument,
    ramp::{ RampController, RampOutcome },
};

/// Largest bound magnitude accepted, keeps milli-unit counters well inside `i64`
const MAX_BOUND: f64 = 1.0e12;

fn to_milli(value: f64) -> i64
{
    (value * 1000.0).round() as i64
}

#[derive(Debug, Clone, PartialEq)]
pub enum SweepSpecError
{
    /// A bound was NaN, infinite, or too large to count in milli-units
    InvalidBound(f64),
    /// The absolute step must be greater than zero
    NonPositiveStep(f64),
    /// The step rounds to zero milli-units
    StepTooSmall(f64),
}

impl fmt::Display for SweepSpecError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::InvalidBound(bound) => write!(f, "Invalid sweep bound {}", bound),
            Self::NonPositiveStep(step) => write!(f, "Abs step needs to be positive (got {})", step),
            Self::StepTooSmall(step) => write!(f, "Abs step {} is below the 0.001 resolution of the sweep", step),
        }
    }
}

impl std::error::Error for SweepSpecError {}

/// Bounds and step of a sweep
///
/// The direction follows the sign of `end - start`; `abs_step` is always positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepSpec
{
    start: f64,
    end: f64,
    abs_step: f64,
}

impl SweepSpec
{
    pub fn new(start: f64, end: f64, abs_step: f64) -> Result<Self, SweepSpecError>
    {
        for bound in [start, end].iter() {
            if !bound.is_finite() || bound.abs() > MAX_BOUND {
                return Err(SweepSpecError::InvalidBound(*bound));
            }
        }

        if !(abs_step > 0.0) || !abs_step.is_finite() {
            return Err(SweepSpecError::NonPositiveStep(abs_step));
        }

        if to_milli(abs_step) == 0 {
            return Err(SweepSpecError::StepTooSmall(abs_step));
        }

        Ok(Self {
            start: start,
            end: end,
            abs_step: abs_step,
        })
    }

    pub fn start(&self) -> f64
    {
        self.start
    }

    pub fn end(&self) -> f64
    {
        self.end
    }

    pub fn abs_step(&self) -> f64
    {
        self.abs_step
    }

    /// The setpoints of this sweep, lazily computed
    pub fn setpoints(&self) -> Setpoints
    {
        let start_milli = to_milli(self.start);
        let end_milli = to_milli(self.end);
        // a step wider than the whole span only ever lands on `end`
        let span_milli = (end_milli - start_milli).abs().max(1);
        let step_milli = to_milli(self.abs_step).min(span_milli);

        Setpoints {
            start: self.start,
            end: self.end,
            current_milli: start_milli,
            end_milli: end_milli,
            step_milli: if end_milli < start_milli { -step_milli } else { step_milli },
            done: false,
        }
    }
}

/// Iterator over the setpoints of a [`SweepSpec`]
///
/// Yields `start`, then values `abs_step` apart, then exactly `end`. The final spacing may be
/// shorter than `abs_step` but never longer, and `end` is never overshot.
#[derive(Debug, Clone)]
pub struct Setpoints
{
    start: f64,
    end: f64,
    current_milli: i64,
    end_milli: i64,
    step_milli: i64,
    done: bool,
}

impl Setpoints
{
    fn value_of(&self, milli: i64) -> f64
    {
        if milli == self.end_milli {
            self.end
        }
        else if milli == to_milli(self.start) {
            self.start
        }
        else {
            milli as f64 / 1000.0
        }
    }
}

impl Iterator for Setpoints
{
    type Item = f64;

    fn next(&mut self) -> Option<f64>
    {
        if self.done {
            return None;
        }

        let current = self.current_milli;

        if current == self.end_milli {
            self.done = true;
        }
        else {
            let next = current + self.step_milli;
            let overshoots = if self.step_milli > 0 { next > self.end_milli } else { next < self.end_milli };

            self.current_milli = if overshoots { self.end_milli } else { next };
        }

        Some(self.value_of(current))
    }
}

/// A setpoint the source has been ramped to
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepPoint
{
    /// Position in the sweep, counting from 0
    pub index: usize,
    /// The commanded setpoint
    pub target: f64,
    /// The source value read back after the move
    pub source_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase
{
    Unprepared,
    Running,
    Finished,
}

/// Produces sweeps of one spec with one ramp configuration
#[derive(Debug, Clone)]
pub struct SweepSequencer
{
    spec: SweepSpec,
    ramp: RampController,
}

impl SweepSequencer
{
    pub fn new(spec: SweepSpec, ramp: RampController) -> Self
    {
        Self {
            spec: spec,
            ramp: ramp,
        }
    }

    pub fn spec(&self) -> &SweepSpec
    {
        &self.spec
    }

    pub fn ramp(&self) -> &RampController
    {
        &self.ramp
    }

    /// Start a sweep on `instrument`
    ///
    /// Nothing is sent to the device until the first call to [`Sweep::next`].
    pub fn run<'a, I>(&'a self, instrument: &'a mut I, cancel: &'a CancellationToken) -> Sweep<'a, I>
        where I: Instrument + ?Sized,
    {
        Sweep {
            ramp: &self.ramp,
            setpoints: self.spec.setpoints(),
            instrument: instrument,
            cancel: cancel,
            phase: Phase::Unprepared,
            index: 0,
        }
    }
}

/// A sweep in progress
///
/// Call [`Sweep::next`] to ramp to the next setpoint. The sweep is finite and cannot be restarted;
/// once it returns `None` it keeps returning `None`. It never switches the output off by itself,
/// use [`stop_measurement`] or [`shutdown`] for that.
pub struct Sweep<'a, I>
    where I: Instrument + ?Sized,
{
    ramp: &'a RampController,
    setpoints: Setpoints,
    instrument: &'a mut I,
    cancel: &'a CancellationToken,
    phase: Phase,
    index: usize,
}

impl <'a, I> Sweep<'a, I>
    where I: Instrument + ?Sized,
{
    /// The instrument being swept, for taking dependent readings between steps
    pub fn instrument(&mut self) -> &mut I
    {
        &mut *self.instrument
    }

    pub fn is_finished(&self) -> bool
    {
        self.phase == Phase::Finished
    }

    /// Brings the output to zero if needed and switches it on
    ///
    /// Returns `false` if the sweep was cancelled on the way.
    async fn prepare(&mut self) -> Result<bool, Error>
    {
        let actual = self.instrument.read_value().await?;

        if actual != 0.0 {
            log::info!(target: "arcs_probe::sweep", "Source is at {}, ramping to 0 before sweeping", actual);
            let outcome = self.ramp.move_to(0.0, &mut *self.instrument, self.cancel).await?;

            if outcome.is_cancelled() {
                return Ok(false);
            }
        }

        self.instrument.set_output_enabled(true).await?;
        Ok(true)
    }

    fn finish(&mut self)
    {
        self.phase = Phase::Finished;
    }

    /// Ramp to the next setpoint
    ///
    /// Returns `None` when the sweep is exhausted or has been cancelled. An error finishes the
    /// sweep; the output is left as the failed operation left it.
    pub async fn next(&mut self) -> Option<Result<SweepPoint, Error>>
    {
        if self.phase == Phase::Finished {
            return None;
        }

        if self.cancel.is_cancelled() {
            log::debug!(target: "arcs_probe::sweep", "Sweep cancelled after {} points", self.index);
            self.finish();
            return None;
        }

        if self.phase == Phase::Unprepared {
            match self.prepare().await {
                Ok(true) => self.phase = Phase::Running,
                Ok(false) => {
                    self.finish();
                    return None;
                },
                Err(err) => {
                    self.finish();
                    return Some(Err(err));
                },
            }
        }

        let target = match self.setpoints.next() {
            Some(target) => target,
            None => {
                self.finish();
                return None;
            },
        };

        match self.ramp.move_to(target, &mut *self.instrument, self.cancel).await {
            Ok(RampOutcome::Reached(source_value)) => {
                let point = SweepPoint {
                    index: self.index,
                    target: target,
                    source_value: source_value,
                };
                self.index += 1;
                Some(Ok(point))
            },
            Ok(RampOutcome::Cancelled(_)) => {
                log::debug!(target: "arcs_probe::sweep", "Sweep cancelled while ramping to {}", target);
                self.finish();
                None
            },
            Err(err) => {
                self.finish();
                Some(Err(err))
            },
        }
    }
}

/// Graceful end of a measurement: ramp the output to zero, then switch it off
///
/// The ramp uses its own token so that a cancelled run can still be brought down slowly.
pub async fn stop_measurement<I>(instrument: &mut I, ramp: &RampController) -> Result<(), Error>
    where I: Instrument + ?Sized,
{
    ramp.move_to(0.0, instrument, &CancellationToken::new()).await?;
    instrument.set_output_enabled(false).await
}

/// [`stop_measurement`] with a last resort
///
/// If the graceful stop fails, one attempt is made to just switch the output off. The original
/// error is returned either way; a failure of the fallback is logged and dropped since there is
/// nothing safer left to try.
pub async fn shutdown<I>(instrument: &mut I, ramp: &RampController) -> Result<(), Error>
    where I: Instrument + ?Sized,
{
    match stop_measurement(instrument, ramp).await {
        Ok(()) => Ok(()),
        Err(err) => {
            log::error!(target: "arcs_probe::sweep", "Error during stopping ({}). Trying to turn off output", err);

            if let Err(fallback_err) = instrument.set_output_enabled(false).await {
                log::error!(target: "arcs_probe::sweep", "Could not turn off output: {}", fallback_err);
            }

            Err(err)
        },
    }
}
