//! Software compliance: hard cutoff on measured channels
//!
//! After every dependent reading the monitored channels are compared against the limit. A single
//! breach on any channel switches the source output off right away and stops the run. There is no
//! hysteresis and no retry.

use std::fmt;
use crate::{
    cancel::{ CancellationToken, CancelReason },
    error::Error,
    instrument::Instrument,
    reading::Reading,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdError
{
    pub limit: f64,
}

impl fmt::Display for ThresholdError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "Compliance limit must be a positive finite number (got {})", self.limit)
    }
}

impl std::error::Error for ThresholdError {}

/// Absolute limit applied to every monitored channel, in the channel's own unit (amps for currents)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComplianceThreshold
{
    limit: f64,
}

impl ComplianceThreshold
{
    pub fn new(limit: f64) -> Result<Self, ThresholdError>
    {
        if limit.is_finite() && limit > 0.0 {
            Ok(Self { limit: limit })
        }
        else {
            Err(ThresholdError { limit: limit })
        }
    }

    pub fn limit(&self) -> f64
    {
        self.limit
    }

    /// Whether `value` is at or beyond the limit
    ///
    /// Values that aren't numbers at all count as beyond.
    pub fn is_breached_by(&self, value: f64) -> bool
    {
        !(value.abs() < self.limit)
    }
}

/// Result of checking one reading
#[derive(Debug, Clone, PartialEq)]
pub enum ComplianceStatus
{
    Within,
    Breached
    {
        channel: String,
        value: f64,
    },
}

impl ComplianceStatus
{
    pub fn is_breached(&self) -> bool
    {
        match self {
            Self::Breached { .. } => true,
            Self::Within => false,
        }
    }
}

/// Watches readings for compliance breaches
#[derive(Debug, Clone)]
pub struct ComplianceMonitor
{
    threshold: ComplianceThreshold,
    channels: Option<Vec<String>>,
}

impl ComplianceMonitor
{
    /// Monitor every channel of each reading
    pub fn new(threshold: ComplianceThreshold) -> Self
    {
        Self {
            threshold: threshold,
            channels: None,
        }
    }

    /// Only monitor the named channels, e.g. currents but not the source voltage
    pub fn channels<S>(mut self, names: impl IntoIterator<Item = S>) -> Self
        where S: Into<String>,
    {
        self.channels = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn threshold(&self) -> ComplianceThreshold
    {
        self.threshold
    }

    fn is_monitored(&self, channel: &str) -> bool
    {
        match &self.channels {
            Some(names) => names.iter().any(|name| name == channel),
            None => true,
        }
    }

    /// The first monitored channel at or beyond the limit, if any
    pub fn find_breach(&self, reading: &Reading) -> Option<(String, f64)>
    {
        reading
            .iter()
            .filter(|(channel, _)| self.is_monitored(channel))
            .find(|(_, value)| self.threshold.is_breached_by(*value))
            .map(|(channel, value)| (channel.to_owned(), value))
    }

    /// Check a freshly taken reading
    ///
    /// On a breach the output is switched off before this returns and the token is cancelled with
    /// [`CancelReason::Compliance`]. Switching off is attempted even if an earlier attempt failed,
    /// and the token is cancelled even if this attempt fails; the failure is then returned.
    pub async fn check<I>(
        &self,
        reading: &Reading,
        instrument: &mut I,
        cancel: &CancellationToken,
    )
        -> Result<ComplianceStatus, Error>

        where I: Instrument + ?Sized,
    {
        let (channel, value) = match self.find_breach(reading) {
            Some(breach) => breach,
            None => return Ok(ComplianceStatus::Within),
        };

        log::warn!(
            target: "arcs_probe::compliance",
            "Compliance reached on {}: |{}| >= {}, turning off output",
            channel,
            value,
            self.threshold.limit(),
        );

        let disabled = instrument.set_output_enabled(false).await;
        cancel.cancel_with(CancelReason::Compliance);
        disabled?;

        Ok(ComplianceStatus::Breached {
            channel: channel,
            value: value,
        })
    }
}
