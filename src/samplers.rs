//! Dependent measurements for the two standard probe-station runs
//!
//! - IV: leakage current through the pad, read by the electrometer that also sources the bias,
//!   plus optionally the guard-ring current from a picoammeter.
//! - CV: capacitance and conductance from an LCR meter.

use async_trait::async_trait;
use tokio::io::{ AsyncWriteExt, AsyncReadExt };
use crate::{
    devices::{ AgilentE4980A, Keithley6517B, Keithley6485 },
    error::Error,
    instrument::Instrument,
    reading::Reading,
    run::Sampler,
};

pub const PAD_CURRENT: &str = "kei6517b_current";
pub const SOURCE_VOLTAGE: &str = "kei6517b_srcvoltage";
pub const GUARD_RING_CURRENT: &str = "kei6485_current";
pub const CAPACITANCE: &str = "agie4980a_capacitance";
pub const CONDUCTANCE: &str = "agie4980a_conductance";

/// Pad current and measured source voltage from the biasing electrometer, guard-ring current
/// from an optional picoammeter
pub struct IvSampler<T>
{
    guard_ring: Option<Keithley6485<T>>,
}

impl <T> IvSampler<T>
{
    pub fn new() -> Self
    {
        Self {
            guard_ring: None,
        }
    }

    pub fn guard_ring(mut self, meter: Keithley6485<T>) -> Self
    {
        self.guard_ring = Some(meter);
        self
    }

    /// The channels compliance should watch
    pub fn current_channels(&self) -> Vec<&'static str>
    {
        match self.guard_ring {
            Some(_) => vec![PAD_CURRENT, GUARD_RING_CURRENT],
            None => vec![PAD_CURRENT],
        }
    }

    pub fn into_guard_ring(self) -> Option<Keithley6485<T>>
    {
        self.guard_ring
    }
}

#[async_trait]
impl <T> Sampler<Keithley6517B<T>> for IvSampler<T>
    where T: AsyncReadExt + AsyncWriteExt + Unpin + Send
{
    async fn sample(&mut self, source: &mut Keithley6517B<T>, _source_value: f64) -> Result<Reading, Error>
    {
        let (current, source_voltage) = source.read_iv().await?;
        let mut reading = Reading::new()
            .with(PAD_CURRENT, current)
            .with(SOURCE_VOLTAGE, source_voltage);

        if let Some(meter) = &mut self.guard_ring {
            reading.insert(GUARD_RING_CURRENT, meter.read_current().await?);
        }

        log::debug!(target: "arcs_probe::samplers", "IV sample {:?}", reading);
        Ok(reading)
    }
}

/// Capacitance and conductance from an LCR meter, configured before the run starts
pub struct CvSampler<T>
{
    lcr: AgilentE4980A<T>,
}

impl <T> CvSampler<T>
{
    pub fn new(lcr: AgilentE4980A<T>) -> Self
    {
        Self {
            lcr: lcr,
        }
    }

    pub fn into_inner(self) -> AgilentE4980A<T>
    {
        self.lcr
    }
}

#[async_trait]
impl <T, I> Sampler<I> for CvSampler<T>
    where T: AsyncReadExt + AsyncWriteExt + Unpin + Send,
          I: Instrument,
{
    async fn sample(&mut self, _source: &mut I, _source_value: f64) -> Result<Reading, Error>
    {
        let (capacitance, conductance) = self.lcr.read_cgv().await?;

        Ok(Reading::new()
            .with(CAPACITANCE, capacitance)
            .with(CONDUCTANCE, conductance))
    }
}

/// Wraps a closure as a sampler that doesn't need the source device
///
/// Handy for dry runs and for meters without an adapter in this crate.
pub struct FnSampler<F>(F);

impl <F> FnSampler<F>
    where F: FnMut(f64) -> Result<Reading, Error> + Send
{
    pub fn new(sample: F) -> Self
    {
        Self(sample)
    }
}

#[async_trait]
impl <F, I> Sampler<I> for FnSampler<F>
    where F: FnMut(f64) -> Result<Reading, Error> + Send,
          I: Instrument,
{
    async fn sample(&mut self, _source: &mut I, source_value: f64) -> Result<Reading, Error>
    {
        (self.0)(source_value)
    }
}
