//! Needs a Keithley 6517B on a serial port with nothing connected to the source output.
//! Run with `ARCS_PROBE_PORT=/dev/ttyUSB0 cargo test -- --ignored`.

use std::time::Duration;
use tokio_serial::SerialPortBuilderExt;
use arcs_probe::{
    FnSampler, Instrument, Keithley6517B, MeasurementRun, RampController, Reading, RunConfig,
    RunEvent, RunOutcome, ScpiExecutor, SweepSpec,
};

const DEFAULT_DEVICE_NAME: &'static str = "/dev/ttyUSB0";
const BAUD_RATE: u32 = 9600;

async fn connect() -> Keithley6517B<tokio_serial::SerialStream>
{
    let path = std::env::var("ARCS_PROBE_PORT").unwrap_or_else(|_| DEFAULT_DEVICE_NAME.to_owned());
    let port = tokio_serial::new(path, BAUD_RATE)
        .timeout(Duration::from_secs(2))
        .open_native_async()
        .unwrap();

    let executor = ScpiExecutor::with(port)
        .line_ending("\r\n")
        .reply_timeout(Duration::from_secs(5));

    Keithley6517B::connect(executor).await.unwrap()
}

#[tokio::test]
#[ignore]
async fn identify_and_read_back()
{
    let _ = env_logger::builder().is_test(true).try_init();
    let mut source = connect().await;

    let id = source.identify().await.unwrap();
    assert!(id.contains("6517B"), "unexpected id {}", id);

    source.write_value(0.0).await.unwrap();
    assert_eq!(source.read_value().await.unwrap(), 0.0);
    source.set_output_enabled(false).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn short_open_circuit_sweep()
{
    let _ = env_logger::builder().is_test(true).try_init();
    let source = connect().await;

    let config = RunConfig::new(SweepSpec::new(0.0, -5.0, 1.0).unwrap())
        .ramp(RampController::new().max_rate(10.0))
        .settle(Duration::from_millis(500))
        .source_column("ramp_voltage")
        .name("open_circuit");
    let mut run = MeasurementRun::start(source, FnSampler::new(|_| Ok(Reading::new())), config);

    while let Some(event) = run.next_event().await {
        match event {
            RunEvent::ErrorRaised(mesg) => panic!("{}", mesg),
            other => println!("{:?}", other),
        }
    }

    let mut report = run.join().await.unwrap();
    assert!(matches!(report.summary.outcome, RunOutcome::Completed));
    assert_eq!(report.summary.points, 6);
    assert_eq!(report.instrument.read_value().await.unwrap(), 0.0);
}
