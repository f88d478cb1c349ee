//! Instrument command definition and serialization

use std::fmt;

/// Source voltage range of the electrometer's built-in supply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRange
{
    /// ±100 V
    V100,
    /// ±1000 V
    V1000,
}

impl SourceRange
{
    /// Smallest range able to produce `volts`
    pub fn for_volts(volts: f64) -> Self
    {
        if volts.abs() > 100.0 {
            Self::V1000
        }
        else {
            Self::V100
        }
    }

    pub fn limit(&self) -> u32
    {
        match self {
            Self::V100 => 100,
            Self::V1000 => 1000,
        }
    }
}

/// Impedance parameter pair measured by an LCR meter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpedanceFunction
{
    /// Parallel capacitance and conductance
    CpG,
}

/// Commands sent to the bench instruments
///
/// Only the subset the sweep and its samplers need is modeled. Each variant documents the literal
/// text put on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum ScpiCmd
{
    /// Command: `*RST`
    Reset,
    /// Command: `*CLS`
    ClearStatus,
    /// Command: `*IDN?`
    Identify,
    /// Trigger and fetch a fresh reading
    ///
    /// Command: `READ?`
    Read,
    /// Fetch the latest reading without triggering
    ///
    /// Command: `FETCH?`
    Fetch,
    /// Command: `:SYSTEM:ZCHECK <ON|OFF>`
    ZeroCheck(bool),
    /// Command: `:OUTPUT1:STATE <ON|OFF>`
    OutputState(bool),
    /// Command: `:SOURCE:VOLTAGE:RANGE <100|1000>`
    SourceVoltageRange(SourceRange),
    /// Command: `:SOURCE:VOLTAGE <volts>`
    SetSourceVoltage(f64),
    /// Command: `:SOURCE:VOLTAGE?`
    GetSourceVoltage,
    /// Command: `:SENSE:FUNCTION 'CURRENT:DC'`
    SenseCurrentDc,
    /// Integration time and averaging for DC current on an electrometer
    ///
    /// Command: `:SENSE:CURRENT:DC:NPLCYCLES <nplc>; AVERAGE:COUNT <count>; STATE ON`
    CurrentDcFilter
    {
        nplc: u32,
        average_count: u32,
    },
    /// Averaging for a picoammeter
    ///
    /// Command: `:SENSE:AVERAGE:COUNT <count>; STATE ON`
    Average(u32),
    /// Command: `:FORMAT:ELEMENTS READING,UNITS[,VSOURCE]`
    FormatElements
    {
        vsource: bool,
    },
    /// Command: `:FORMAT:ASCII:LONG ON`
    FormatAsciiLong,
    /// Command: `:FUNCTION:IMPEDANCE CPG`
    ImpedanceFunction(ImpedanceFunction),
    /// Command: `:APER MED,<count>`
    ApertureMedium(u32),
    /// Command: `:FREQUENCY <hertz>`
    Frequency(f64),
    /// AC test signal level of an LCR meter
    ///
    /// Command: `:VOLTAGE <volts>`
    AcLevel(f64),
}

impl ScpiCmd
{
    /// Whether the instrument answers this command with a line of text
    pub fn is_query(&self) -> bool
    {
        match self {
            Self::Identify | Self::Read | Self::Fetch | Self::GetSourceVoltage => true,
            _ => false,
        }
    }
}

fn on_off(state: bool) -> &'static str
{
    if state { "ON" } else { "OFF" }
}

impl fmt::Display for ScpiCmd
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::Reset => write!(f, "*RST"),
            Self::ClearStatus => write!(f, "*CLS"),
            Self::Identify => write!(f, "*IDN?"),
            Self::Read => write!(f, "READ?"),
            Self::Fetch => write!(f, "FETCH?"),
            Self::ZeroCheck(state) => write!(f, ":SYSTEM:ZCHECK {}", on_off(*state)),
            Self::OutputState(state) => write!(f, ":OUTPUT1:STATE {}", on_off(*state)),
            Self::SourceVoltageRange(range) => write!(f, ":SOURCE:VOLTAGE:RANGE {}", range.limit()),
            Self::SetSourceVoltage(volts) => write!(f, ":SOURCE:VOLTAGE {}", volts),
            Self::GetSourceVoltage => write!(f, ":SOURCE:VOLTAGE?"),
            Self::SenseCurrentDc => write!(f, ":SENSE:FUNCTION 'CURRENT:DC'"),
            Self::CurrentDcFilter { nplc, average_count } => write!(
                f,
                ":SENSE:CURRENT:DC:NPLCYCLES {}; AVERAGE:COUNT {}; STATE ON",
                nplc,
                average_count,
            ),
            Self::Average(count) => write!(f, ":SENSE:AVERAGE:COUNT {}; STATE ON", count),
            Self::FormatElements { vsource } => {
                if *vsource {
                    write!(f, ":FORMAT:ELEMENTS READING,UNITS,VSOURCE")
                }
                else {
                    write!(f, ":FORMAT:ELEMENTS READING,UNITS")
                }
            },
            Self::FormatAsciiLong => write!(f, ":FORMAT:ASCII:LONG ON"),
            Self::ImpedanceFunction(function) => match function {
                ImpedanceFunction::CpG => write!(f, ":FUNCTION:IMPEDANCE CPG"),
            },
            Self::ApertureMedium(count) => write!(f, ":APER MED,{}", count),
            Self::Frequency(hertz) => write!(f, ":FREQUENCY {}", hertz),
            Self::AcLevel(volts) => write!(f, ":VOLTAGE {}", volts),
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::{ ScpiCmd, SourceRange };

    #[test]
    fn serialize_source_commands()
    {
        assert_eq!(&format!("{}", ScpiCmd::SetSourceVoltage(-12.5)), ":SOURCE:VOLTAGE -12.5");
        assert_eq!(&format!("{}", ScpiCmd::OutputState(false)), ":OUTPUT1:STATE OFF");
        assert_eq!(
            &format!("{}", ScpiCmd::SourceVoltageRange(SourceRange::V1000)),
            ":SOURCE:VOLTAGE:RANGE 1000"
        );
        assert_eq!(
            &format!("{}", ScpiCmd::CurrentDcFilter { nplc: 1, average_count: 5 }),
            ":SENSE:CURRENT:DC:NPLCYCLES 1; AVERAGE:COUNT 5; STATE ON"
        );
    }

    #[test]
    fn range_switches_above_100_volts()
    {
        assert_eq!(SourceRange::for_volts(100.0), SourceRange::V100);
        assert_eq!(SourceRange::for_volts(-100.5), SourceRange::V1000);
        assert_eq!(SourceRange::for_volts(0.0), SourceRange::V100);
    }

    #[test]
    fn only_queries_expect_replies()
    {
        assert!(ScpiCmd::GetSourceVoltage.is_query());
        assert!(!ScpiCmd::SetSourceVoltage(1.0).is_query());
    }
}
