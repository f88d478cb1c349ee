//! Device definitions and APIs
//!
//! # Purpose
//! This module defines handles to an active I/O stream for the bench instruments of the probe
//! station:
//!   - Keithley 6517B electrometer, used as the swept voltage source and for the pad current
//!   - Keithley 6485 picoammeter, used for the guard-ring current
//!   - Agilent E4980A LCR meter, used for capacitance and conductance
//!
//! Only the 6517B implements [`Instrument`]; the other two are read-only meters used by samplers.
//!
//! Creating I/O handles is not handled by this library so that you are not restricted to a
//! particular hardware interface. Anything that is `AsyncRead + AsyncWrite` works, e.g. a
//! `tokio-serial` port or a TCP connection to a GPIB-Ethernet bridge.
//!
//! # Cancel Safety
//! **None of the device RPCs are cancel safe,** i.e. they should not be used in a
//! `tokio::select!`. A query cancelled between its write and its read leaves the reply in the
//! stream, where it would be taken as the reply to the next query.

use async_trait::async_trait;
use tokio::io::{ AsyncWriteExt, AsyncReadExt };
use crate::{
    cmd::{ ImpedanceFunction, ScpiCmd, SourceRange },
    error::{ Error, RangeError },
    executor::ScpiExecutor,
    instrument::Instrument,
    reading::{ CgvReply, FormatError, IvReply },
};

/// Parses a reply holding one number, e.g. `+1.000000E+01`
fn parse_scalar(reply: &str) -> Result<f64, FormatError>
{
    let field = reply.split(',').next().unwrap_or("");

    field
        .trim()
        .parse::<f64>()
        .map_err(|_| FormatError::truncated(reply, 1))
}

/// A connected Keithley 6517B electrometer with its built-in voltage source
pub struct Keithley6517B<T>
{
    io_handle: ScpiExecutor<T>,
    range: SourceRange,
}

impl <T> Keithley6517B<T>
{
    pub const VOLTAGE_MIN: f64 = -1000.0;
    pub const VOLTAGE_MAX: f64 = 1000.0;

    pub fn source_range(&self) -> SourceRange
    {
        self.range
    }
}

impl <T> Keithley6517B<T>
    where T: AsyncReadExt + AsyncWriteExt + Unpin + Send
{
    /// Take over a session and put the device into a known state
    ///
    /// Resets the device, leaves the output off on the 100 V range and configures DC current
    /// sensing with readings formatted as `READING,UNITS,VSOURCE`.
    pub async fn connect(io_handle: ScpiExecutor<T>) -> Result<Self, Error>
    {
        let mut dev = Self {
            io_handle: io_handle,
            range: SourceRange::V100,
        };

        dev.io_handle.exec_all(&[
            ScpiCmd::Reset,
            ScpiCmd::ZeroCheck(false),
            ScpiCmd::OutputState(false),
            ScpiCmd::SourceVoltageRange(SourceRange::V100),
            ScpiCmd::SenseCurrentDc,
            ScpiCmd::CurrentDcFilter { nplc: 1, average_count: 5 },
            ScpiCmd::FormatElements { vsource: true },
        ]).await?;

        Ok(dev)
    }

    pub async fn set_source_range(&mut self, range: SourceRange) -> Result<(), Error>
    {
        self.io_handle.exec(ScpiCmd::SourceVoltageRange(range)).await?;
        self.range = range;
        Ok(())
    }

    /// Trigger a reading and return `(current, source voltage)`
    pub async fn read_iv(&mut self) -> Result<(f64, f64), Error>
    {
        let line = self.io_handle.query(ScpiCmd::Read).await?;
        let reply = line.parse::<IvReply>()?;

        Ok((reply.require_current(&line)?, reply.require_source_voltage(&line)?))
    }

    pub fn into_inner(self) -> ScpiExecutor<T>
    {
        self.io_handle
    }
}

#[async_trait]
impl <T> Instrument for Keithley6517B<T>
    where T: AsyncReadExt + AsyncWriteExt + Unpin + Send
{
    async fn identify(&mut self) -> Result<String, Error>
    {
        Ok(self.io_handle.query(ScpiCmd::Identify).await?)
    }

    async fn read_value(&mut self) -> Result<f64, Error>
    {
        let reply = self.io_handle.query(ScpiCmd::GetSourceVoltage).await?;
        Ok(parse_scalar(&reply)?)
    }

    async fn write_value(&mut self, volts: f64) -> Result<(), Error>
    {
        if !(Self::VOLTAGE_MIN..=Self::VOLTAGE_MAX).contains(&volts) {
            return Err(RangeError {
                requested: volts,
                min: Self::VOLTAGE_MIN,
                max: Self::VOLTAGE_MAX,
            }.into());
        }

        let range = SourceRange::for_volts(volts);
        if range != self.range {
            self.set_source_range(range).await?;
        }

        self.io_handle.exec(ScpiCmd::SetSourceVoltage(volts)).await?;
        Ok(())
    }

    async fn set_output_enabled(&mut self, enabled: bool) -> Result<(), Error>
    {
        self.io_handle.exec(ScpiCmd::OutputState(enabled)).await?;
        Ok(())
    }
}

/// A connected Keithley 6485 picoammeter
pub struct Keithley6485<T>
{
    io_handle: ScpiExecutor<T>,
}

impl <T> Keithley6485<T>
    where T: AsyncReadExt + AsyncWriteExt + Unpin + Send
{
    /// Take over a session and configure averaged DC current readings
    pub async fn connect(io_handle: ScpiExecutor<T>) -> Result<Self, Error>
    {
        let mut dev = Self {
            io_handle: io_handle,
        };

        dev.io_handle.exec_all(&[
            ScpiCmd::Reset,
            ScpiCmd::ZeroCheck(false),
            ScpiCmd::SenseCurrentDc,
            ScpiCmd::FormatElements { vsource: false },
            ScpiCmd::Average(5),
        ]).await?;

        Ok(dev)
    }

    pub async fn identify(&mut self) -> Result<String, Error>
    {
        Ok(self.io_handle.query(ScpiCmd::Identify).await?)
    }

    /// Trigger a reading and return the current in amps
    pub async fn read_current(&mut self) -> Result<f64, Error>
    {
        let line = self.io_handle.query(ScpiCmd::Read).await?;
        let reply = line.parse::<IvReply>()?;

        Ok(reply.require_current(&line)?)
    }

    pub fn into_inner(self) -> ScpiExecutor<T>
    {
        self.io_handle
    }
}

/// A connected Agilent E4980A precision LCR meter
pub struct AgilentE4980A<T>
{
    io_handle: ScpiExecutor<T>,
}

impl <T> AgilentE4980A<T>
{
    pub const FREQUENCY_MIN: f64 = 20.0;
    pub const FREQUENCY_MAX: f64 = 2.0e6;
    pub const AC_LEVEL_MIN: f64 = 0.0;
    pub const AC_LEVEL_MAX: f64 = 20.0;
}

impl <T> AgilentE4980A<T>
    where T: AsyncReadExt + AsyncWriteExt + Unpin + Send
{
    /// Take over a session and configure Cp-G measurements with medium aperture
    pub async fn connect(io_handle: ScpiExecutor<T>) -> Result<Self, Error>
    {
        let mut dev = Self {
            io_handle: io_handle,
        };

        dev.io_handle.exec_all(&[
            ScpiCmd::Reset,
            ScpiCmd::ClearStatus,
            ScpiCmd::FormatAsciiLong,
            ScpiCmd::ImpedanceFunction(ImpedanceFunction::CpG),
            ScpiCmd::ApertureMedium(5),
        ]).await?;

        Ok(dev)
    }

    pub async fn identify(&mut self) -> Result<String, Error>
    {
        Ok(self.io_handle.query(ScpiCmd::Identify).await?)
    }

    /// Set the measurement frequency in hertz
    pub async fn set_frequency(&mut self, hertz: f64) -> Result<(), Error>
    {
        if !(Self::FREQUENCY_MIN..=Self::FREQUENCY_MAX).contains(&hertz) {
            return Err(RangeError {
                requested: hertz,
                min: Self::FREQUENCY_MIN,
                max: Self::FREQUENCY_MAX,
            }.into());
        }

        self.io_handle.exec(ScpiCmd::Frequency(hertz)).await?;
        Ok(())
    }

    /// Set the AC test signal level in volts
    pub async fn set_voltage_level(&mut self, volts: f64) -> Result<(), Error>
    {
        if !(Self::AC_LEVEL_MIN..=Self::AC_LEVEL_MAX).contains(&volts) {
            return Err(RangeError {
                requested: volts,
                min: Self::AC_LEVEL_MIN,
                max: Self::AC_LEVEL_MAX,
            }.into());
        }

        self.io_handle.exec(ScpiCmd::AcLevel(volts)).await?;
        Ok(())
    }

    /// Fetch the latest measurement as `(capacitance, conductance)` in farads and siemens
    pub async fn read_cgv(&mut self) -> Result<(f64, f64), Error>
    {
        let line = self.io_handle.query(ScpiCmd::Fetch).await?;
        let reply = line.parse::<CgvReply>()?;

        Ok((reply.capacitance, reply.conductance))
    }

    pub fn into_inner(self) -> ScpiExecutor<T>
    {
        self.io_handle
    }
}
