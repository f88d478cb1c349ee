//! **A**synchronous-Rust **R**emote **C**ontrol for **S**weeps on **Probe** stations
//!
//! Drives a programmable voltage source through a stepped sweep while dependent meters are read at
//! every point, the way IV and CV characterisation of sensor pads is done on a probe station.
//!
//! The pieces, from the bottom up:
//!   - [`Instrument`]: what the sweep needs from a source (identify, read back, write, output on/off)
//!   - [`RampController`]: moves the source to a target no faster than a set rate
//!   - [`SweepSequencer`]: exact setpoints in milli-unit steps, ramped to one at a time
//!   - [`ComplianceMonitor`]: switches the output off as soon as a current reaches its limit
//!   - [`MeasurementRun`]: all of the above in a background task, with events and a safe shutdown
//!
//! Adapters for a Keithley 6517B, a Keithley 6485 and an Agilent E4980A live in [`devices`]. They
//! work over anything `AsyncRead + AsyncWrite`, so opening the port is left to the caller.
//!
//! # Example
//! ```ignore
//! let port = tokio_serial::new("/dev/ttyUSB0", 19200).open_native_async()?;
//! let source = Keithley6517B::connect(ScpiExecutor::with(port)).await?;
//! let sampler = IvSampler::new();
//! let monitor = ComplianceMonitor::new(ComplianceThreshold::new(10e-6)?)
//!     .channels(sampler.current_channels());
//!
//! let mut run = MeasurementRun::start(source, sampler, RunConfig::new(SweepSpec::new(0.0, -300.0, 5.0)?)
//!     .compliance(monitor)
//!     .source_column("ramp_voltage"));
//!
//! while let Some(event) = run.next_event().await {
//!     println!("{:?}", event);
//! }
//! ```
//!
//! # Logging
//! Everything is logged through the `log` facade under `arcs_probe::<module>` targets. Install
//! whichever logger you like.

pub mod cancel;
pub mod cmd;
pub mod compliance;
pub mod devices;
pub mod error;
pub mod executor;
pub mod instrument;
pub mod ramp;
pub mod reading;
pub mod run;
pub mod samplers;
pub mod sweep;

pub use cancel::{ CancellationToken, CancelReason };
pub use compliance::{ ComplianceMonitor, ComplianceStatus, ComplianceThreshold };
pub use devices::{ AgilentE4980A, Keithley6517B, Keithley6485 };
pub use error::{ Error, RangeError };
pub use executor::ScpiExecutor;
pub use instrument::Instrument;
pub use ramp::{ RampController, RampOutcome };
pub use reading::Reading;
pub use run::{ MeasurementRun, RunConfig, RunEvent, RunHandle, RunOutcome, RunState, RunSummary, Sampler };
pub use samplers::{ CvSampler, FnSampler, IvSampler };
pub use sweep::{ SweepSequencer, SweepSpec, shutdown, stop_measurement };
