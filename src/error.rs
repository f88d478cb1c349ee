//! Error types shared by the sweep core and the instrument adapters

use std::{
    fmt,
    io,
    error::Error as StdError,
};
use crate::reading::FormatError;

/// A setpoint which the instrument cannot produce
#[derive(Debug, Clone, PartialEq)]
pub struct RangeError
{
    /// The value that was asked for
    pub requested: f64,
    /// Lowest value the instrument accepts
    pub min: f64,
    /// Highest value the instrument accepts
    pub max: f64,
}

impl fmt::Display for RangeError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "Setpoint {} is out of range [{}; {}]", self.requested, self.min, self.max)
    }
}

impl StdError for RangeError {}

/// Any failure of an instrument operation
///
/// None of these are retried by the core. A move that fails leaves the output wherever the last
/// successful write put it and the run falls through to its shutdown sequence.
#[derive(Debug)]
pub enum Error
{
    /// Requested setpoint outside of the instrument's bounds. Nothing was sent to the device.
    OutOfRange(RangeError),
    /// Communication with the device failed, including reply timeouts
    Transport(io::Error),
    /// The device replied but the reply could not be interpreted as the expected numeric fields
    InvalidReading(FormatError),
    /// The read-back never came within one quantum of the target
    RampStalled
    {
        target: f64,
        last_actual: f64,
        steps: usize,
    },
}

impl fmt::Display for Error
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::OutOfRange(range_err) => write!(f, "Invalid setpoint. {}", range_err),
            Self::Transport(io_err) => write!(f, "Error during communication with device. {}", io_err),
            Self::InvalidReading(fmt_err) => write!(f, "Got invalid reading from device. {}", fmt_err),
            Self::RampStalled { target, last_actual, steps } => write!(
                f,
                "Output did not reach {} after {} ramp steps (last read back {})",
                target,
                steps,
                last_actual,
            ),
        }
    }
}

impl StdError for Error
{
    fn source(&self) -> Option<&(dyn StdError + 'static)>
    {
        match self {
            Self::OutOfRange(range_err) => Some(range_err),
            Self::Transport(io_err) => Some(io_err),
            Self::InvalidReading(fmt_err) => Some(fmt_err),
            Self::RampStalled { .. } => None,
        }
    }
}

impl From<io::Error> for Error
{
    fn from(this: io::Error) -> Self
    {
        Error::Transport(this)
    }
}

impl From<RangeError> for Error
{
    fn from(this: RangeError) -> Self
    {
        Error::OutOfRange(this)
    }
}

impl From<FormatError> for Error
{
    fn from(this: FormatError) -> Self
    {
        Error::InvalidReading(this)
    }
}
