//! Background measurement runs
//!
//! A run sweeps the source through its setpoints and takes one dependent reading at every point.
//! It lives in a single tokio task that owns the source and the sampler until the run is over, so
//! a second run can't be started on the same devices while one is alive. The caller keeps a
//! [`RunHandle`] to cancel the run, watch its state and receive its events.
//!
//! However a run ends, the output is brought down before the task exits: first by ramping to zero
//! and switching off, and if that fails by switching off directly.

use std::{ fmt, time::Duration };
use async_trait::async_trait;
use tokio::{
    sync::{ mpsc, watch },
    task::{ JoinError, JoinHandle },
};
use crate::{
    cancel::{ CancellationToken, CancelReason },
    compliance::{ ComplianceMonitor, ComplianceStatus },
    error::Error,
    instrument::Instrument,
    ramp::RampController,
    reading::Reading,
    sweep::{ self, SweepSequencer, SweepSpec },
};

/// Takes the dependent measurement at each sweep point
#[async_trait]
pub trait Sampler<I>: Send
    where I: Instrument,
{
    /// Measure once the source has settled at `source_value`
    ///
    /// `source` is handed in for samplers that read from the source device itself.
    async fn sample(&mut self, source: &mut I, source_value: f64) -> Result<Reading, Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState
{
    Idle,
    Ramping,
    Sampling,
    Stopping,
}

impl fmt::Display for RunState
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let name = match self {
            Self::Idle => "idle",
            Self::Ramping => "ramping",
            Self::Sampling => "sampling",
            Self::Stopping => "stopping",
        };

        write!(f, "{}", name)
    }
}

/// Progress notifications of a run, in the order they happened
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent
{
    /// A sample was taken. Breaching samples are reported too, with `breached` set
    PointReady
    {
        step_index: usize,
        source_value: f64,
        reading: Reading,
        breached: bool,
    },
    /// The output was switched off because a channel reached the compliance limit
    ComplianceReached
    {
        channel: String,
        value: f64,
    },
    /// Something went wrong; the message is meant for the operator
    ErrorRaised(String),
    /// Always the last event of a run, carries the run name
    RunFinished(String),
}

/// What a run should do
///
/// ```ignore
/// let config = RunConfig::new(SweepSpec::new(0.0, -600.0, 10.0)?)
///     .ramp(RampController::new().max_rate(20.0))
///     .compliance(ComplianceMonitor::new(ComplianceThreshold::new(10e-6)?))
///     .settle(Duration::from_millis(500))
///     .source_column("ramp_voltage")
///     .name("iv_pad_3");
/// ```
#[derive(Debug, Clone)]
pub struct RunConfig
{
    sequencer: SweepSequencer,
    compliance: Option<ComplianceMonitor>,
    settle: Duration,
    source_column: String,
    name: String,
}

impl RunConfig
{
    /// Sweep `spec` with the default ramp, no compliance and no settle delay
    pub fn new(spec: SweepSpec) -> Self
    {
        Self {
            sequencer: SweepSequencer::new(spec, RampController::new()),
            compliance: None,
            settle: Duration::ZERO,
            source_column: "source_value".to_owned(),
            name: "measurement".to_owned(),
        }
    }

    pub fn ramp(mut self, ramp: RampController) -> Self
    {
        self.sequencer = SweepSequencer::new(*self.sequencer.spec(), ramp);
        self
    }

    pub fn compliance(mut self, monitor: ComplianceMonitor) -> Self
    {
        self.compliance = Some(monitor);
        self
    }

    /// Wait this long at each setpoint before sampling
    pub fn settle(mut self, delay: Duration) -> Self
    {
        self.settle = delay;
        self
    }

    /// Name of the channel the source value is recorded under
    pub fn source_column(mut self, name: impl Into<String>) -> Self
    {
        self.source_column = name.into();
        self
    }

    /// Name of the run, e.g. the output file stem chosen by the operator
    pub fn name(mut self, name: impl Into<String>) -> Self
    {
        self.name = name.into();
        self
    }

    pub fn sequencer(&self) -> &SweepSequencer
    {
        &self.sequencer
    }

    pub fn compliance_monitor(&self) -> Option<&ComplianceMonitor>
    {
        self.compliance.as_ref()
    }

    pub fn settle_delay(&self) -> Duration
    {
        self.settle
    }

    pub fn run_name(&self) -> &str
    {
        &self.name
    }
}

/// How the measurement part of a run ended
#[derive(Debug)]
pub enum RunOutcome
{
    /// Every setpoint was sampled
    Completed,
    /// Cancelled by the user
    Stopped,
    ComplianceReached
    {
        channel: String,
        value: f64,
    },
    Failed(Error),
}

#[derive(Debug)]
pub struct RunSummary
{
    /// Number of samples taken, including a breaching one
    pub points: usize,
    pub outcome: RunOutcome,
    /// Set if bringing the output down did not go cleanly
    pub shutdown_error: Option<Error>,
}

/// Everything a finished run hands back
#[derive(Debug)]
pub struct RunReport<I, S>
{
    pub instrument: I,
    pub sampler: S,
    pub summary: RunSummary,
}

/// Sending side of the channels a run reports through
///
/// A receiver going away is not an error, the run carries on regardless.
struct Reporter
{
    events: mpsc::UnboundedSender<RunEvent>,
    state: watch::Sender<RunState>,
}

impl Reporter
{
    fn emit(&self, event: RunEvent)
    {
        let _ = self.events.send(event);
    }

    fn enter(&self, state: RunState)
    {
        log::debug!(target: "arcs_probe::run", "Run is {}", state);
        self.state.send_replace(state);
    }
}

/// Entry point for background runs
pub struct MeasurementRun;

impl MeasurementRun
{
    /// Spawn a run on the current tokio runtime
    ///
    /// `instrument` and `sampler` are moved into the run and given back by [`RunHandle::join`].
    pub fn start<I, S>(instrument: I, sampler: S, config: RunConfig) -> RunHandle<I, S>
        where I: Instrument + 'static,
              S: Sampler<I> + 'static,
    {
        let cancel = CancellationToken::new();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(RunState::Idle);

        let reporter = Reporter {
            events: event_tx,
            state: state_tx,
        };
        let task_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let mut instrument = instrument;
            let mut sampler = sampler;

            let summary = execute(&mut instrument, &mut sampler, &config, &task_cancel, &reporter).await;

            RunReport {
                instrument: instrument,
                sampler: sampler,
                summary: summary,
            }
        });

        RunHandle {
            cancel: cancel,
            events: event_rx,
            state: state_rx,
            task: task,
        }
    }
}

/// Control over a run in progress
pub struct RunHandle<I, S>
{
    cancel: CancellationToken,
    events: mpsc::UnboundedReceiver<RunEvent>,
    state: watch::Receiver<RunState>,
    task: JoinHandle<RunReport<I, S>>,
}

impl <I, S> RunHandle<I, S>
{
    /// Ask the run to stop. The output is still ramped down before the run ends
    pub fn cancel(&self)
    {
        self.cancel.cancel();
    }

    pub fn token(&self) -> CancellationToken
    {
        self.cancel.clone()
    }

    pub fn state(&self) -> RunState
    {
        *self.state.borrow()
    }

    /// A receiver for following state changes
    pub fn watch_state(&self) -> watch::Receiver<RunState>
    {
        self.state.clone()
    }

    /// Wait for the next event
    ///
    /// Returns `None` once the run is over and all of its events were received.
    pub async fn next_event(&mut self) -> Option<RunEvent>
    {
        self.events.recv().await
    }

    /// The next event if one is already waiting
    pub fn try_next_event(&mut self) -> Option<RunEvent>
    {
        self.events.try_recv().ok()
    }

    pub fn is_finished(&self) -> bool
    {
        self.task.is_finished()
    }

    /// Wait for the run to end and take back the devices
    ///
    /// Events not yet received are dropped.
    pub async fn join(self) -> Result<RunReport<I, S>, JoinError>
    {
        self.task.await
    }
}

/// One run from start to finish, shutdown included
async fn execute<I, S>(
    instrument: &mut I,
    sampler: &mut S,
    config: &RunConfig,
    cancel: &CancellationToken,
    reporter: &Reporter,
)
    -> RunSummary

    where I: Instrument,
          S: Sampler<I>,
{
    let mut points = 0;

    let outcome = match sweep_and_sample(instrument, sampler, config, cancel, reporter, &mut points).await {
        Ok(outcome) => outcome,
        Err(err) => {
            log::error!(target: "arcs_probe::run", "Run {} failed: {}", config.name, err);
            reporter.emit(RunEvent::ErrorRaised(err.to_string()));
            RunOutcome::Failed(err)
        },
    };

    reporter.enter(RunState::Stopping);

    let shutdown_error = match sweep::shutdown(instrument, config.sequencer.ramp()).await {
        Ok(()) => None,
        Err(err) => {
            reporter.emit(RunEvent::ErrorRaised(format!("Error during stopping: {}", err)));
            Some(err)
        },
    };

    reporter.enter(RunState::Idle);
    log::info!(target: "arcs_probe::run", "Run {} finished after {} points", config.name, points);
    reporter.emit(RunEvent::RunFinished(config.name.clone()));

    RunSummary {
        points: points,
        outcome: outcome,
        shutdown_error: shutdown_error,
    }
}

async fn sweep_and_sample<I, S>(
    instrument: &mut I,
    sampler: &mut S,
    config: &RunConfig,
    cancel: &CancellationToken,
    reporter: &Reporter,
    points: &mut usize,
)
    -> Result<RunOutcome, Error>

    where I: Instrument,
          S: Sampler<I>,
{
    let id = instrument.identify().await?;
    log::info!(target: "arcs_probe::run", "Voltage source introduced itself as {}", id);

    let mut sweep = config.sequencer.run(instrument, cancel);

    loop {
        reporter.enter(RunState::Ramping);

        let point = match sweep.next().await {
            Some(point) => point?,
            None => break,
        };

        reporter.enter(RunState::Sampling);
        tokio::select! {
            _ = tokio::time::sleep(config.settle) => {},
            _ = cancel.cancelled() => {
                log::debug!(target: "arcs_probe::run", "Stop requested while settling at {}", point.source_value);
            },
        }

        if cancel.is_cancelled() {
            break;
        }

        let dependent = sampler.sample(sweep.instrument(), point.source_value).await?;

        let checked = match &config.compliance {
            Some(monitor) => monitor.check(&dependent, sweep.instrument(), cancel).await,
            None => Ok(ComplianceStatus::Within),
        };
        // a failed check only happens on a breach, when switching the output off failed
        let breached = match &checked {
            Ok(status) => status.is_breached(),
            Err(_) => true,
        };

        let mut reading = Reading::new().with(config.source_column.as_str(), point.source_value);
        for (channel, value) in dependent.iter() {
            reading.insert(channel, value);
        }

        if let Ok(ComplianceStatus::Breached { channel, value }) = &checked {
            reporter.emit(RunEvent::ComplianceReached {
                channel: channel.clone(),
                value: *value,
            });
        }

        reporter.emit(RunEvent::PointReady {
            step_index: point.index,
            source_value: point.source_value,
            reading: reading,
            breached: breached,
        });
        *points += 1;

        if let ComplianceStatus::Breached { channel, value } = checked? {
            return Ok(RunOutcome::ComplianceReached {
                channel: channel,
                value: value,
            });
        }
    }

    match cancel.reason() {
        Some(CancelReason::User) => Ok(RunOutcome::Stopped),
        Some(CancelReason::Compliance) | None => Ok(RunOutcome::Completed),
    }
}
