//! Per-direction streaming loop
//!
//! Each iteration moves one block through the stream, folds the result into
//! [`LoopStats`] and runs the periodic actions: spinner, status drain and
//! throughput report. The loop ends when the latch trips (checked at the top
//! of every iteration, never mid-transfer) or on a fatal transfer error.

use serde::Serialize;
use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

use super::buffer::TransferBuffers;
use super::signal::SignalLatch;
use super::stats::{Checkpoint, LoopStats, Outcome, Spinner};
use super::tone::Tone;
use crate::constants::{DEFAULT_REPORT_PERIOD, DEFAULT_SPIN_PERIOD, DEFAULT_STATUS_PERIOD, DEFAULT_TRANSFER_TIMEOUT};
use crate::device::{Direction, SampleFormat, SampleStream, Transfer};
use crate::error::Result;

/// Timing knobs of a loop
#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    /// Timeout handed to every read/write
    pub transfer_timeout: Duration,
    pub spin_period: Duration,
    pub status_period: Duration,
    pub report_period: Duration,
    /// Draw the spinner on stdout
    pub spinner: bool,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            spin_period: DEFAULT_SPIN_PERIOD,
            status_period: DEFAULT_STATUS_PERIOD,
            report_period: DEFAULT_REPORT_PERIOD,
            spinner: true,
        }
    }
}

/// Why a loop stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopEnd {
    Interrupted,
    TransferFailed(String),
}

/// Final state of one loop invocation
#[derive(Debug, Clone, Serialize)]
pub struct LoopReport {
    pub direction: Direction,
    pub stats: LoopStats,
    pub elapsed_secs: f64,
    pub samples_per_sec: f64,
    pub bytes_per_sec: f64,
    pub end: LoopEnd,
}

impl LoopReport {
    /// Report for a loop that was never started because the latch tripped first
    pub fn not_started(direction: Direction) -> Self {
        Self {
            direction,
            stats: LoopStats::default(),
            elapsed_secs: 0.0,
            samples_per_sec: 0.0,
            bytes_per_sec: 0.0,
            end: LoopEnd::Interrupted,
        }
    }

    pub fn failed(&self) -> bool {
        matches!(self.end, LoopEnd::TransferFailed(_))
    }
}

/// Activated stream; deactivates exactly once when dropped
pub struct ActiveStream<'a> {
    stream: &'a mut dyn SampleStream,
}

impl<'a> ActiveStream<'a> {
    pub fn activate(stream: &'a mut dyn SampleStream) -> Result<Self> {
        stream.activate()?;
        Ok(Self { stream })
    }
}

impl<'a> Deref for ActiveStream<'a> {
    type Target = dyn SampleStream + 'a;

    fn deref(&self) -> &Self::Target {
        self.stream
    }
}

impl DerefMut for ActiveStream<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.stream
    }
}

impl Drop for ActiveStream<'_> {
    fn drop(&mut self) {
        let direction = self.stream.direction();
        match self.stream.deactivate() {
            Ok(()) => tracing::info!("Deactivated {} stream", direction),
            Err(e) => tracing::warn!("Failed to deactivate {} stream: {}", direction, e),
        }
    }
}

/// Streaming loop for one direction
pub struct StreamLoop {
    direction: Direction,
    num_channels: usize,
    format: SampleFormat,
    tone: Option<Tone>,
    settings: LoopSettings,
}

impl StreamLoop {
    pub fn new(direction: Direction, num_channels: usize, format: SampleFormat) -> Self {
        Self {
            direction,
            num_channels,
            format,
            tone: None,
            settings: LoopSettings::default(),
        }
    }

    /// Replay a precomputed tone on every write (TX only)
    pub fn with_tone(mut self, tone: Option<Tone>) -> Self {
        self.tone = tone;
        self
    }

    pub fn with_settings(mut self, settings: LoopSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn element_size(&self) -> usize {
        self.format.element_size()
    }

    /// Run until the latch trips or a transfer fails
    ///
    /// Only activation failures are returned as errors; everything that
    /// happens inside the loop ends up in the report.
    pub fn run(&self, stream: &mut dyn SampleStream, latch: &SignalLatch) -> Result<LoopReport> {
        self.run_with(stream, latch, || {})
    }

    /// Like [`run`](Self::run); `on_active` is called once the stream is
    /// activated and the loop clock has started, and is dropped uncalled if
    /// activation fails
    pub fn run_with(
        &self,
        stream: &mut dyn SampleStream,
        latch: &SignalLatch,
        on_active: impl FnOnce(),
    ) -> Result<LoopReport> {
        let mtu = stream.mtu();
        let mut buffers = TransferBuffers::new(self.num_channels, self.element_size(), mtu);

        if let (Direction::Tx, Some(tone)) = (self.direction, &self.tone) {
            tracing::info!("TX tone at {} Hz (omega {:.6} rad/sample)", tone.frequency, tone.omega());
            tone.fill(self.format, &mut buffers);
        }

        tracing::info!("Starting {} stream (mtu {} samples)", self.direction, mtu);
        let mut active = match ActiveStream::activate(stream) {
            Ok(active) => active,
            Err(e) => {
                tracing::error!("Failed to activate {} stream: {}", self.direction, e);
                return Err(e);
            }
        };

        let start = Instant::now();
        on_active();
        let mut stats = LoopStats::default();
        let timeout = self.settings.transfer_timeout;

        let end = match self.direction {
            Direction::Rx => {
                let mut views = buffers.blocks_mut();
                self.pump(&mut active, latch, start, &mut stats, |s| s.read(&mut views, mtu, timeout))
            }
            Direction::Tx => {
                let views = buffers.blocks();
                self.pump(&mut active, latch, start, &mut stats, |s| s.write(&views, mtu, timeout))
            }
        };
        drop(active);

        let elapsed = start.elapsed();
        let summary = stats.report(self.direction, elapsed, self.num_channels, self.element_size());
        tracing::info!("{} stream finished after {:.1}s: {}", self.direction, elapsed.as_secs_f64(), summary);

        Ok(LoopReport {
            direction: self.direction,
            stats,
            elapsed_secs: elapsed.as_secs_f64(),
            samples_per_sec: summary.samples_per_sec,
            bytes_per_sec: summary.bytes_per_sec,
            end,
        })
    }

    fn pump(
        &self,
        stream: &mut ActiveStream<'_>,
        latch: &SignalLatch,
        start: Instant,
        stats: &mut LoopStats,
        mut transfer: impl FnMut(&mut dyn SampleStream) -> Transfer,
    ) -> LoopEnd {
        let mut spin = Checkpoint::new(start, self.settings.spin_period);
        let mut status = Checkpoint::new(start, self.settings.status_period);
        let mut print = Checkpoint::new(start, self.settings.report_period);
        let mut spinner = Spinner::default();

        while !latch.is_set() {
            if let Outcome::Fatal(err) = stats.record(transfer(&mut **stream)) {
                tracing::error!("Unexpected {} stream error: {}", self.direction, err);
                return LoopEnd::TransferFailed(err.to_string());
            }

            let now = Instant::now();
            if self.settings.spinner && spin.due(now) {
                spinner.tick();
            }
            if status.due(now) {
                while let Some(event) = stream.poll_status() {
                    stats.record_event(event);
                }
            }
            if print.due(now) {
                let report = stats.report(
                    self.direction,
                    now.duration_since(start),
                    self.num_channels,
                    self.element_size(),
                );
                tracing::info!("{}", report);
            }
        }

        LoopEnd::Interrupted
    }
}
