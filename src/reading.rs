//! Sample data and instrument reply parsing

use std::{
    fmt,
    error::Error,
};

/// One flat sample: named channels with numeric values, in insertion order
///
/// This is the row handed to whatever persists or plots the run. The source value column is added
/// by the run itself, dependent channels by the sampler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reading
{
    channels: Vec<(String, f64)>,
}

impl Reading
{
    pub fn new() -> Self
    {
        Self {
            channels: Vec::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self
    {
        self.insert(name, value);
        self
    }

    /// Set a channel, replacing its value if the name is already present
    pub fn insert(&mut self, name: impl Into<String>, value: f64)
    {
        let name = name.into();

        if let Some(slot) = self.channels.iter_mut().find(|(existing, _)| *existing == name) {
            slot.1 = value;
        }
        else {
            self.channels.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<f64>
    {
        self.channels
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| *value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)>
    {
        self.channels.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn len(&self) -> usize
    {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.channels.is_empty()
    }
}

/// A description of the underlying cause of the parsing failure, if any
#[derive(Debug)]
enum FormatErrorCause
{
    /// Expected a decimal value
    InvalidDecimal(std::num::ParseFloatError),
}

impl fmt::Display for FormatErrorCause
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::InvalidDecimal(float_err) => write!(f, "Caused by: {}", float_err),
        }
    }
}

/// A parsing error caused by a reply of unexpected or invalid format
#[derive(Debug)]
pub struct FormatError
{
    /// The string returned by the device
    pub raw_data: String,
    /// Which token the error occurred at. Indexed from 1
    ///
    /// Tokens are comma separated.
    token: usize,
    mesg: &'static str,
    maybe_cause: Option<FormatErrorCause>,
}

impl FormatError
{
    pub(crate) fn truncated(raw_data: &str, token: usize) -> Self
    {
        Self {
            raw_data: raw_data.to_owned(),
            token: token,
            mesg: "Reply ends before all expected fields were read",
            maybe_cause: None,
        }
    }

    fn missing(raw_data: &str, mesg: &'static str) -> Self
    {
        Self {
            raw_data: raw_data.to_owned(),
            token: 0,
            mesg: mesg,
            maybe_cause: None,
        }
    }

    pub(crate) fn not_finite(value: f64) -> Self
    {
        Self {
            raw_data: format!("{}", value),
            token: 0,
            mesg: "Expected a finite number",
            maybe_cause: None,
        }
    }

    fn invalid_decimal(raw_data: &str, token: usize, cause: std::num::ParseFloatError) -> Self
    {
        Self {
            raw_data: raw_data.to_owned(),
            token: token,
            mesg: "Expected a decimal number",
            maybe_cause: Some(FormatErrorCause::InvalidDecimal(cause)),
        }
    }

    pub fn token(&self) -> usize
    {
        self.token
    }
}

impl fmt::Display for FormatError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        if self.token == 0 {
            write!(f, "{}", self.mesg)?;
        }
        else {
            write!(f, "At token {}: {}", self.token, self.mesg)?;
        }

        if let Some(cause) = &self.maybe_cause {
            write!(f, ". {}", cause)?;
        }

        write!(f, " (reply: {:?})", self.raw_data)
    }
}

impl Error for FormatError {}

/// Parse a number which may carry a unit suffix and reading status letters
///
/// Keithley meters append status flags such as `N` (normal) or `O` (overflow) to the reading
/// before the unit, e.g. `-1.234567E-12NADC`. The unit itself has already been stripped by the caller.
fn parse_decimal(raw_data: &str, token: usize, field: &str) -> Result<f64, FormatError>
{
    let number = field.trim().trim_end_matches(|c: char| c.is_ascii_alphabetic());

    number
        .parse::<f64>()
        .map_err(|err| FormatError::invalid_decimal(raw_data, token, err))
}

/// Reply of a Keithley electrometer formatted with `READING,UNITS[,VSOURCE]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IvReply
{
    pub current: Option<f64>,
    pub source_voltage: Option<f64>,
}

impl IvReply
{
    /// Returns the current, failing if the reply carried none
    pub fn require_current(&self, raw_data: &str) -> Result<f64, FormatError>
    {
        self.current.ok_or_else(|| FormatError::missing(raw_data, "Reply contains no current field"))
    }

    /// Returns the source voltage, failing if the reply carried none
    pub fn require_source_voltage(&self, raw_data: &str) -> Result<f64, FormatError>
    {
        self.source_voltage.ok_or_else(|| FormatError::missing(raw_data, "Reply contains no source voltage field"))
    }
}

impl std::str::FromStr for IvReply
{
    type Err = FormatError;

    fn from_str(data_str: &str) -> Result<Self, Self::Err>
    {
        let mut reply = IvReply {
            current: None,
            source_voltage: None,
        };

        for (index, field) in data_str.trim().split(',').enumerate() {
            let token = index + 1;
            let field = field.trim();

            if let Some(value) = field.strip_suffix("Vsrc") {
                reply.source_voltage = Some(parse_decimal(data_str, token, value)?);
            }
            else if let Some(value) = field.strip_suffix("ADC") {
                reply.current = Some(parse_decimal(data_str, token, value)?);
            }
            else if let Some(value) = field.strip_suffix('A') {
                reply.current = Some(parse_decimal(data_str, token, value)?);
            }
            // timestamps, reading numbers and other elements are ignored
        }

        Ok(reply)
    }
}

/// Reply of an LCR meter in Cp-G mode: `<capacitance>,<conductance>[,<status>]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CgvReply
{
    pub capacitance: f64,
    pub conductance: f64,
}

impl std::str::FromStr for CgvReply
{
    type Err = FormatError;

    fn from_str(data_str: &str) -> Result<Self, Self::Err>
    {
        let mut tokens = data_str.trim().split(',');

        let capacitance = match tokens.next() {
            Some(field) if !field.trim().is_empty() => parse_decimal(data_str, 1, field)?,
            _ => return Err(FormatError::truncated(data_str, 1)),
        };
        let conductance = match tokens.next() {
            Some(field) => parse_decimal(data_str, 2, field)?,
            None => return Err(FormatError::truncated(data_str, 2)),
        };

        Ok(Self {
            capacitance: capacitance,
            conductance: conductance,
        })
    }
}
