use std::{ io, time::Duration };
use async_trait::async_trait;
use tokio::time::Instant;
use arcs_probe::{
    ComplianceMonitor, ComplianceThreshold, Error, FnSampler, Instrument, MeasurementRun,
    RampController, RangeError, Reading, RunConfig, RunEvent, RunOutcome, SweepSpec,
};

/// A bias supply on a sensor with a fixed leakage resistance
struct SimulatedSource
{
    commanded: f64,
    actual: f64,
    output_enabled: bool,
    writes: Vec<(Instant, f64)>,
    outputs: Vec<(Instant, bool)>,
    /// Fail the Nth write attempt, counted from 1
    fail_write: Option<usize>,
    attempts: usize,
}

impl SimulatedSource
{
    fn new() -> Self
    {
        Self {
            commanded: 0.0,
            actual: 0.0,
            output_enabled: false,
            writes: Vec::new(),
            outputs: Vec::new(),
            fail_write: None,
            attempts: 0,
        }
    }

    fn written(&self) -> Vec<f64>
    {
        self.writes.iter().map(|(_, value)| *value).collect()
    }
}

#[async_trait]
impl Instrument for SimulatedSource
{
    async fn identify(&mut self) -> Result<String, Error>
    {
        Ok("SIMULATED,BIAS,0,1.0".to_owned())
    }

    async fn read_value(&mut self) -> Result<f64, Error>
    {
        self.actual = self.commanded;
        Ok(self.actual)
    }

    async fn write_value(&mut self, value: f64) -> Result<(), Error>
    {
        if value.abs() > 1000.0 {
            return Err(RangeError { requested: value, min: -1000.0, max: 1000.0 }.into());
        }

        self.attempts += 1;
        if self.fail_write == Some(self.attempts) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link dropped").into());
        }

        self.commanded = value;
        self.writes.push((Instant::now(), value));
        Ok(())
    }

    async fn set_output_enabled(&mut self, enabled: bool) -> Result<(), Error>
    {
        self.output_enabled = enabled;
        self.outputs.push((Instant::now(), enabled));
        Ok(())
    }
}

fn init_logger()
{
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Leakage current through `ohms` at the given bias
fn resistor(ohms: f64) -> impl FnMut(f64) -> Result<Reading, Error> + Send
{
    move |volts: f64| Ok(Reading::new().with("pad_current", volts / ohms))
}

#[tokio::test(start_paused = true)]
async fn iv_sweep_is_slew_limited()
{
    init_logger();

    let config = RunConfig::new(SweepSpec::new(0.0, -20.0, 10.0).unwrap())
        .ramp(RampController::new().max_rate(50.0).interval(Duration::from_millis(100)))
        .settle(Duration::from_secs(1))
        .source_column("bias");

    let started = Instant::now();
    let mut run = MeasurementRun::start(SimulatedSource::new(), FnSampler::new(resistor(1.0e9)), config);

    let mut rows = Vec::new();
    while let Some(event) = run.next_event().await {
        if let RunEvent::PointReady { reading, .. } = event {
            rows.push(reading);
        }
    }
    let report = run.join().await.unwrap();
    let elapsed = started.elapsed();

    assert!(matches!(report.summary.outcome, RunOutcome::Completed));
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2].get("bias"), Some(-20.0));
    assert_eq!(rows[2].get("pad_current"), Some(-20.0 / 1.0e9));

    let source = report.instrument;
    assert_eq!(source.written(), vec![0.0, -5.0, -10.0, -15.0, -20.0, -15.0, -10.0, -5.0, 0.0]);
    for pair in source.written().windows(2) {
        assert!((pair[1] - pair[0]).abs() <= 5.0);
    }

    // three settle delays and five full ramp steps
    assert!(elapsed >= Duration::from_millis(3500));
    assert!(elapsed < Duration::from_millis(3600));

    let states: Vec<bool> = source.outputs.iter().map(|(_, state)| *state).collect();
    assert_eq!(states, vec![true, false]);
    assert!(!source.output_enabled);
}

#[tokio::test(start_paused = true)]
async fn compliance_cuts_off_before_next_step()
{
    init_logger();

    let monitor = ComplianceMonitor::new(ComplianceThreshold::new(3.5e-6).unwrap())
        .channels(vec!["pad_current"]);
    let config = RunConfig::new(SweepSpec::new(0.0, -100.0, 10.0).unwrap())
        .compliance(monitor)
        .settle(Duration::from_millis(200))
        .name("pad_7");

    let mut run = MeasurementRun::start(SimulatedSource::new(), FnSampler::new(resistor(1.0e7)), config);

    let mut events = Vec::new();
    while let Some(event) = run.next_event().await {
        events.push(event);
    }
    let report = run.join().await.unwrap();

    let points: Vec<(usize, bool)> = events
        .iter()
        .filter_map(|event| match event {
            RunEvent::PointReady { step_index, breached, .. } => Some((*step_index, *breached)),
            _ => None,
        })
        .collect();
    assert_eq!(points, vec![(0, false), (1, false), (2, false), (3, false), (4, true)]);
    assert!(events.iter().any(|event| matches!(event, RunEvent::ComplianceReached { .. })));
    assert_eq!(events.last(), Some(&RunEvent::RunFinished("pad_7".to_owned())));
    assert!(matches!(report.summary.outcome, RunOutcome::ComplianceReached { .. }));

    let source = report.instrument;
    let (cut_off_at, _) = source.outputs.iter().find(|(_, state)| !*state).unwrap();
    assert!(source.writes.iter().all(|(at, value)| *at < *cut_off_at || *value > -40.0));
    assert!(!source.written().contains(&-50.0));
    assert_eq!(source.commanded, 0.0);
}

#[tokio::test(start_paused = true)]
async fn cancel_from_another_task()
{
    init_logger();

    let config = RunConfig::new(SweepSpec::new(0.0, -200.0, 5.0).unwrap())
        .settle(Duration::from_millis(500));

    let mut run = MeasurementRun::start(SimulatedSource::new(), FnSampler::new(resistor(1.0e9)), config);
    let token = run.token();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        token.cancel();
    });

    let mut points = 0;
    while let Some(event) = run.next_event().await {
        if let RunEvent::PointReady { .. } = event {
            points += 1;
        }
    }
    let report = run.join().await.unwrap();

    assert!(matches!(report.summary.outcome, RunOutcome::Stopped));
    assert_eq!(report.summary.points, points);
    assert!(points > 0 && points < 41);
    assert_eq!(report.instrument.commanded, 0.0);
    assert!(!report.instrument.output_enabled);
}

#[tokio::test(start_paused = true)]
async fn link_failure_still_shuts_down()
{
    init_logger();

    let mut source = SimulatedSource::new();
    source.fail_write = Some(4);

    let config = RunConfig::new(SweepSpec::new(0.0, -3.0, 1.0).unwrap());
    let mut run = MeasurementRun::start(source, FnSampler::new(resistor(1.0e9)), config);

    let mut events = Vec::new();
    while let Some(event) = run.next_event().await {
        events.push(event);
    }
    let report = run.join().await.unwrap();

    match &events[..] {
        [
            RunEvent::PointReady { .. },
            RunEvent::PointReady { .. },
            RunEvent::PointReady { .. },
            RunEvent::ErrorRaised(mesg),
            RunEvent::RunFinished(_),
        ] => assert!(mesg.contains("link dropped")),
        other => panic!("unexpected events {:?}", other),
    }

    assert!(matches!(report.summary.outcome, RunOutcome::Failed(Error::Transport(_))));
    assert!(report.summary.shutdown_error.is_none());
    assert!(!report.instrument.output_enabled);
    assert_eq!(report.instrument.commanded, 0.0);
}
