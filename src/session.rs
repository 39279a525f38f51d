//! Rate test session
//!
//! Owns the device for the whole run: tunes it, negotiates formats, opens
//! both streams, runs the RX and TX loops in a thread scope and tears
//! everything down again. Streams are dropped only after both loops have
//! been joined; the device is dropped last, on every path.

use chrono::{DateTime, Utc};
use crossbeam_channel::bounded;
use serde::Serialize;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{FormatPolicy, RateTestConfig, TuningConfig};
use crate::device::{open_device, Direction, Kwargs, RadioDevice, SampleFormat, SampleStream};
use crate::error::{Error, Result};
use crate::stream::{LoopReport, SignalLatch, StreamLoop, Tone};

/// Wire format chosen for one direction
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StreamFormat {
    pub format: SampleFormat,
    pub full_scale: f64,
}

impl StreamFormat {
    pub fn element_size(&self) -> usize {
        self.format.element_size()
    }
}

/// Outcome of a complete run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub driver: String,
    pub channels: Vec<usize>,
    pub rx_format: StreamFormat,
    pub tx_format: StreamFormat,
    pub rx: LoopReport,
    pub tx: LoopReport,
}

impl RunSummary {
    /// Neither loop ended on a transfer error
    pub fn is_clean(&self) -> bool {
        !self.rx.failed() && !self.tx.failed()
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

/// Parse a channel list such as `0,1` into sorted unique indices; empty selects channel 0
pub fn parse_channels(selector: &str) -> Result<Vec<usize>> {
    let mut channels = Kwargs::parse(selector)
        .keys()
        .map(|key| {
            key.parse::<usize>()
                .map_err(|_| Error::Config(format!("Invalid channel: {}", key)))
        })
        .collect::<Result<Vec<_>>>()?;
    channels.sort_unstable();
    channels.dedup();

    if channels.is_empty() {
        channels.push(0);
    }
    Ok(channels)
}

/// Apply frequency, bandwidth, rate and gain to every channel in both directions
pub fn configure(device: &dyn RadioDevice, tuning: &TuningConfig, channels: &[usize]) -> Result<()> {
    let rate = tuning
        .sample_rate
        .ok_or_else(|| Error::Config("Sample rate is required".into()))?;
    let frequency = tuning
        .frequency
        .ok_or_else(|| Error::Config("Center frequency is required".into()))?;
    let directions = [Direction::Rx, Direction::Tx];

    for &channel in channels {
        for direction in directions {
            device.set_frequency(direction, channel, frequency)?;
        }
        if let Some(bandwidth) = tuning.bandwidth {
            for direction in directions {
                device.set_bandwidth(direction, channel, bandwidth)?;
            }
        }
        for direction in directions {
            device.set_sample_rate(direction, channel, rate)?;
        }
        for (direction, gain) in [(Direction::Rx, tuning.rx_gain), (Direction::Tx, tuning.tx_gain)] {
            if let Some(gain) = gain {
                device.set_gain(direction, channel, gain)?;
            }
        }
        tracing::debug!(
            "Channel {}: {} Hz, {} sps, bw {:?}, rx gain {:?}, tx gain {:?}",
            channel,
            frequency,
            rate,
            tuning.bandwidth,
            tuning.rx_gain,
            tuning.tx_gain
        );
    }
    Ok(())
}

/// Resolve the RX and TX wire formats
pub fn negotiate_formats(
    device: &dyn RadioDevice,
    requested: Option<SampleFormat>,
    policy: FormatPolicy,
    channel: usize,
) -> Result<(StreamFormat, StreamFormat)> {
    if let Some(format) = requested {
        let chosen = StreamFormat {
            format,
            full_scale: format.full_scale(),
        };
        return Ok((chosen, chosen));
    }

    let native = |direction: Direction| {
        device
            .native_format(direction, channel)
            .map(|(format, full_scale)| StreamFormat { format, full_scale })
    };
    let rx = native(Direction::Rx)?;
    let tx = match policy {
        FormatPolicy::RxForBoth => rx,
        FormatPolicy::PerDirection => native(Direction::Tx)?,
    };
    Ok((rx, tx))
}

fn join(handle: thread::ScopedJoinHandle<'_, Result<LoopReport>>, direction: Direction) -> Result<LoopReport> {
    handle.join().map_err(|_| Error::EnginePanic(direction))?
}

/// Run one loop; a setup failure trips the latch so the other loop stops as well
fn run_engine(
    engine: &StreamLoop,
    stream: &mut dyn SampleStream,
    latch: &SignalLatch,
    on_active: impl FnOnce(),
) -> Result<LoopReport> {
    let result = engine.run_with(stream, latch, on_active);
    if result.is_err() {
        latch.trip();
    }
    result
}

/// Run both loops and return once both are joined
///
/// TX starts a full `settle` after the RX stream became active. If RX fails
/// to start, or the latch trips first, TX is never started and its report
/// is [`LoopReport::not_started`].
pub fn run_engines(
    rx_loop: &StreamLoop,
    rx_stream: &mut dyn SampleStream,
    tx_loop: &StreamLoop,
    tx_stream: &mut dyn SampleStream,
    latch: &SignalLatch,
    settle: Duration,
) -> Result<(LoopReport, LoopReport)> {
    thread::scope(|scope| -> Result<(LoopReport, LoopReport)> {
        let (started_tx, started_rx) = bounded::<()>(1);

        tracing::info!("Starting RX loop");
        let rx = thread::Builder::new()
            .name("rate-rx".into())
            .spawn_scoped(scope, move || {
                run_engine(rx_loop, rx_stream, latch, move || {
                    let _ = started_tx.send(());
                })
            })?;

        // Disconnected without a message when RX never became active
        let rx_active = started_rx.recv().is_ok();
        if !rx_active || latch.sleep(settle) {
            if rx_active {
                tracing::info!("Interrupted before TX start, TX loop not started");
            }
            let rx = join(rx, Direction::Rx)?;
            return Ok((rx, LoopReport::not_started(Direction::Tx)));
        }

        tracing::info!("Starting TX loop");
        let tx = match thread::Builder::new()
            .name("rate-tx".into())
            .spawn_scoped(scope, move || run_engine(tx_loop, tx_stream, latch, || {}))
        {
            Ok(handle) => handle,
            Err(e) => {
                // RX only stops on the latch
                latch.trip();
                let _ = rx.join();
                return Err(e.into());
            }
        };

        let rx = join(rx, Direction::Rx);
        let tx = join(tx, Direction::Tx);
        Ok((rx?, tx?))
    })
}

/// One rate test run
pub struct RateTest {
    config: RateTestConfig,
}

impl RateTest {
    pub fn new(config: RateTestConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RateTestConfig {
        &self.config
    }

    /// Open the configured device and run until the latch trips
    pub fn run(&self, latch: &SignalLatch) -> Result<RunSummary> {
        let device = open_device(&self.config.device.args)?;
        let result = self.run_on(device.as_ref(), latch);
        tracing::info!("Releasing {} device", device.driver());
        drop(device);
        result
    }

    /// Run against an already opened device
    pub fn run_on(&self, device: &dyn RadioDevice, latch: &SignalLatch) -> Result<RunSummary> {
        let config = &self.config;
        let channels = parse_channels(&config.device.channels)?;
        configure(device, &config.tuning, &channels)?;

        let (rx_format, tx_format) = negotiate_formats(
            device,
            config.requested_format()?,
            config.device.format_policy,
            channels[0],
        )?;

        let mut rx_stream = device.open_stream(Direction::Rx, rx_format.format, &channels)?;
        let mut tx_stream = device.open_stream(Direction::Tx, tx_format.format, &channels)?;

        let sample_rate = config.tuning.sample_rate.unwrap_or_default();
        tracing::info!("RX format: {} TX format: {}", rx_format.format, tx_format.format);
        tracing::info!("Num channels: {}", channels.len());
        tracing::info!(
            "RX element size: {} bytes, TX element size: {} bytes",
            rx_format.element_size(),
            tx_format.element_size()
        );
        tracing::info!("Begin rate test at {} Msps", sample_rate / 1e6);

        let settings = config.loop_settings();
        let tone = config.stream.tone.map(|frequency| {
            Tone::new(frequency, sample_rate, tx_format.full_scale).with_amplitude(config.stream.tone_amplitude)
        });
        let rx_loop = StreamLoop::new(Direction::Rx, channels.len(), rx_format.format).with_settings(settings);
        let tx_loop = StreamLoop::new(Direction::Tx, channels.len(), tx_format.format)
            .with_tone(tone)
            .with_settings(settings);

        let started_at = Utc::now();
        let clock = Instant::now();
        let result = run_engines(
            &rx_loop,
            rx_stream.as_mut(),
            &tx_loop,
            tx_stream.as_mut(),
            latch,
            config.settle_delay(),
        );

        tracing::info!("Closing streams");
        drop(rx_stream);
        drop(tx_stream);
        let (rx, tx) = result?;

        Ok(RunSummary {
            started_at,
            duration_secs: clock.elapsed().as_secs_f64(),
            driver: device.driver().to_string(),
            channels,
            rx_format,
            tx_format,
            rx,
            tx,
        })
    }
}
