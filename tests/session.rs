//! End-to-end runs against the simulated device

use std::thread;
use std::time::Duration;

use sdr_rate_test::config::{FormatPolicy, RateTestConfig};
use sdr_rate_test::device::SampleFormat;
use sdr_rate_test::session::RateTest;
use sdr_rate_test::stream::{LoopEnd, SignalLatch};
use sdr_rate_test::Error;

fn sim_config(args: &str) -> RateTestConfig {
    let mut config = RateTestConfig::default();
    config.device.args = args.to_string();
    config.device.channels = "0,1".into();
    config.tuning.frequency = Some(915e6);
    config.tuning.sample_rate = Some(4e6);
    config.stream.settle_ms = 150;
    config.stream.transfer_timeout_ms = 20;
    config.stream.spinner = false;
    config
}

fn stop_after(latch: &SignalLatch, delay: Duration) -> thread::JoinHandle<()> {
    let latch = latch.clone();
    thread::spawn(move || {
        thread::sleep(delay);
        latch.trip();
    })
}

#[test]
fn test_clean_run() {
    let mut config = sim_config("driver=sim,mtu=1024");
    config.stream.tone = Some(1e6);
    config.stream.settle_ms = 300;
    let settle = config.settle_delay().as_secs_f64();
    let transfer_timeout = config.loop_settings().transfer_timeout.as_secs_f64();
    let test = RateTest::new(config).unwrap();

    let latch = SignalLatch::new();
    let stopper = stop_after(&latch, Duration::from_millis(700));
    let summary = test.run(&latch).unwrap();
    stopper.join().unwrap();

    assert!(summary.is_clean());
    assert_eq!(summary.rx.end, LoopEnd::Interrupted);
    assert_eq!(summary.tx.end, LoopEnd::Interrupted);
    assert_eq!(summary.rx_format.format, SampleFormat::CS16);
    assert_eq!(summary.tx_format.format, SampleFormat::CF32);
    assert!(summary.rx.stats.total_samples > 0);
    assert!(summary.tx.stats.total_samples > 0);

    // TX started at least one settling delay after RX; after the latch trips
    // each loop still finishes its in-flight transfer, bounded by the timeout
    let head_start = summary.rx.elapsed_secs - summary.tx.elapsed_secs;
    assert!(
        head_start >= settle - 2.0 * transfer_timeout,
        "RX ran {:.3}s longer than TX, settle {:.3}s",
        head_start,
        settle
    );
}

#[test]
fn test_rx_for_both_policy() {
    let mut config = sim_config("driver=sim");
    config.device.format_policy = FormatPolicy::RxForBoth;
    config.stream.settle_ms = 0;
    let test = RateTest::new(config).unwrap();

    let latch = SignalLatch::new();
    let stopper = stop_after(&latch, Duration::from_millis(100));
    let summary = test.run(&latch).unwrap();
    stopper.join().unwrap();

    assert_eq!(summary.rx_format, summary.tx_format);
    assert_eq!(summary.tx_format.format, SampleFormat::CS16);
}

#[test]
fn test_transfer_failure_ends_loops() {
    let test = RateTest::new(sim_config("driver=sim,mtu=256,fail_after=10")).unwrap();

    let latch = SignalLatch::new();
    let stopper = stop_after(&latch, Duration::from_millis(400));
    let summary = test.run(&latch).unwrap();
    stopper.join().unwrap();

    assert!(!summary.is_clean());
    assert!(summary.rx.failed());
    assert!(summary.tx.failed());
    assert!(summary.rx.stats.total_samples <= 10 * 256);
}

#[test]
fn test_interrupt_before_start() {
    let test = RateTest::new(sim_config("driver=sim")).unwrap();
    let latch = SignalLatch::new();
    latch.trip();

    let summary = test.run(&latch).unwrap();
    assert!(summary.is_clean());
    assert_eq!(summary.rx.stats.total_samples, 0);
    assert_eq!(summary.tx.stats.total_samples, 0);
    // TX is never started once the latch is set
    assert_eq!(summary.tx.elapsed_secs, 0.0);
}

#[test]
fn test_device_open_error() {
    let test = RateTest::new(sim_config("driver=sim,mtu=0")).unwrap();
    let latch = SignalLatch::new();
    assert!(matches!(test.run(&latch), Err(Error::DeviceOpen(_))));

    let test = RateTest::new(sim_config("driver=nonexistent")).unwrap();
    assert!(matches!(test.run(&latch), Err(Error::DeviceOpen(_))));
}

#[test]
fn test_config_error_aborts() {
    let mut config = sim_config("driver=sim,channels=1");
    config.device.channels = "0,1".into();
    let test = RateTest::new(config).unwrap();
    let latch = SignalLatch::new();
    assert!(matches!(test.run(&latch), Err(Error::Config(_))));
}

#[test]
fn test_summary_json() {
    let test = RateTest::new(sim_config("driver=sim")).unwrap();
    let latch = SignalLatch::new();
    latch.trip();
    let summary = test.run(&latch).unwrap();

    let path = std::env::temp_dir().join(format!("rate-test-summary-{}.json", std::process::id()));
    summary.write_json(&path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(value["driver"], "sim");
    assert_eq!(value["channels"], serde_json::json!([0, 1]));
    assert_eq!(value["rx"]["direction"], "rx");
    assert_eq!(value["tx"]["end"], "interrupted");
    assert_eq!(value["rx_format"]["format"], "CS16");
}
