//! Simulated radio device
//!
//! Streams run against a virtual sample clock at the configured sample
//! rate. RX reads block until a block of samples has "arrived" and report
//! an overflow when the host falls more than one device buffer behind. TX
//! writes block until the device buffer has room; when the device plays out
//! everything it was given, an underflow notification is queued for
//! `poll_status`, the way real front ends report late bursts.
//!
//! Selector keys: `driver=sim`, `channels`, `mtu`, `depth`, `fail_after`.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use super::{Direction, Kwargs, RadioDevice, SampleFormat, SampleStream, StreamEvent, Transfer};
use crate::error::{Error, Result, TransferError};

/// Value of the `driver` key selecting this backend
pub const DRIVER_NAME: &str = "sim";

const DEFAULT_CHANNELS: usize = 2;
const DEFAULT_MTU: usize = 4096;
const DEFAULT_DEPTH_BLOCKS: usize = 8;

/// Error code reported by injected faults
pub const STREAM_ERROR_CODE: i32 = -2;

/// Tuning applied to one channel in one direction
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Tuning {
    pub frequency: Option<f64>,
    pub bandwidth: Option<f64>,
    pub sample_rate: Option<f64>,
    pub gain: Option<f64>,
}

/// Software device with paced streams
pub struct SimDevice {
    num_channels: usize,
    mtu: usize,
    depth: usize,
    fail_after: Option<u64>,
    tuning: RwLock<HashMap<(Direction, usize), Tuning>>,
}

impl SimDevice {
    pub fn new(num_channels: usize, mtu: usize) -> Self {
        Self {
            num_channels,
            mtu,
            depth: mtu.saturating_mul(DEFAULT_DEPTH_BLOCKS),
            fail_after: None,
            tuning: RwLock::new(HashMap::new()),
        }
    }

    /// Build from selector arguments
    pub fn from_args(args: &Kwargs) -> Result<Self> {
        let num_channels = args.parse_value("channels")?.unwrap_or(DEFAULT_CHANNELS);
        let mtu = args.parse_value("mtu")?.unwrap_or(DEFAULT_MTU);
        if num_channels == 0 || mtu == 0 {
            return Err(Error::DeviceOpen(format!(
                "sim device needs at least one channel and a non-zero mtu ({})",
                args
            )));
        }

        let mut device = Self::new(num_channels, mtu);
        device.depth = match args.parse_value::<usize>("depth")? {
            Some(depth) => depth.max(mtu),
            None => mtu.checked_mul(DEFAULT_DEPTH_BLOCKS).ok_or_else(|| {
                Error::DeviceOpen(format!("sim device mtu {} is too large", mtu))
            })?,
        };
        device.fail_after = args.parse_value("fail_after")?;

        tracing::info!(
            "Opened sim device: {} channels, mtu {}, depth {}",
            device.num_channels,
            device.mtu,
            device.depth
        );
        Ok(device)
    }

    /// Inject a stream error after `transfers` calls on every stream opened afterwards
    pub fn with_fail_after(mut self, transfers: u64) -> Self {
        self.fail_after = Some(transfers);
        self
    }

    /// Current tuning of a channel
    pub fn tuning(&self, direction: Direction, channel: usize) -> Tuning {
        self.tuning
            .read()
            .get(&(direction, channel))
            .copied()
            .unwrap_or_default()
    }

    fn check_channel(&self, direction: Direction, channel: usize) -> Result<()> {
        if channel >= self.num_channels {
            return Err(Error::Config(format!(
                "{} channel {} out of range (device has {})",
                direction, channel, self.num_channels
            )));
        }
        Ok(())
    }

    fn update(&self, direction: Direction, channel: usize, apply: impl FnOnce(&mut Tuning)) -> Result<()> {
        self.check_channel(direction, channel)?;
        let mut tuning = self.tuning.write();
        apply(tuning.entry((direction, channel)).or_default());
        Ok(())
    }
}

fn positive(what: &str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(Error::Config(format!("{} must be positive, got {}", what, value)))
    }
}

impl RadioDevice for SimDevice {
    fn driver(&self) -> &str {
        DRIVER_NAME
    }

    fn set_frequency(&self, direction: Direction, channel: usize, hz: f64) -> Result<()> {
        if !hz.is_finite() || hz < 0.0 {
            return Err(Error::Config(format!("frequency out of range: {}", hz)));
        }
        self.update(direction, channel, |t| t.frequency = Some(hz))
    }

    fn set_bandwidth(&self, direction: Direction, channel: usize, hz: f64) -> Result<()> {
        let hz = positive("bandwidth", hz)?;
        self.update(direction, channel, |t| t.bandwidth = Some(hz))
    }

    fn set_sample_rate(&self, direction: Direction, channel: usize, rate: f64) -> Result<()> {
        let rate = positive("sample rate", rate)?;
        self.update(direction, channel, |t| t.sample_rate = Some(rate))
    }

    fn set_gain(&self, direction: Direction, channel: usize, db: f64) -> Result<()> {
        if !db.is_finite() {
            return Err(Error::Config(format!("gain out of range: {}", db)));
        }
        self.update(direction, channel, |t| t.gain = Some(db))
    }

    fn native_format(&self, direction: Direction, channel: usize) -> Result<(SampleFormat, f64)> {
        self.check_channel(direction, channel)?;
        Ok(match direction {
            Direction::Rx => (SampleFormat::CS16, SampleFormat::CS16.full_scale()),
            Direction::Tx => (SampleFormat::CF32, SampleFormat::CF32.full_scale()),
        })
    }

    fn open_stream(
        &self,
        direction: Direction,
        format: SampleFormat,
        channels: &[usize],
    ) -> Result<Box<dyn SampleStream>> {
        let first = *channels
            .first()
            .ok_or_else(|| Error::StreamSetup("empty channel list".into()))?;
        for &channel in channels {
            self.check_channel(direction, channel)
                .map_err(|e| Error::StreamSetup(e.to_string()))?;
        }
        let rate = self.tuning(direction, first).sample_rate.ok_or_else(|| {
            Error::StreamSetup(format!("{} sample rate not set on channel {}", direction, first))
        })?;

        let (status_tx, status_rx) = unbounded();
        Ok(Box::new(SimStream {
            direction,
            format,
            num_channels: channels.len(),
            mtu: self.mtu,
            depth: self.depth as u64,
            rate,
            fail_after: self.fail_after,
            transfers: 0,
            active: false,
            started: None,
            host_samples: 0,
            status_tx,
            status_rx,
        }))
    }
}

/// Stream on a [`SimDevice`]
pub struct SimStream {
    direction: Direction,
    format: SampleFormat,
    num_channels: usize,
    mtu: usize,
    depth: u64,
    rate: f64,
    fail_after: Option<u64>,
    transfers: u64,
    active: bool,
    /// Start of the virtual clock; TX restarts it on every underflow
    started: Option<Instant>,
    /// Samples the host has read (RX) or written (TX) since `started`
    host_samples: u64,
    status_tx: Sender<StreamEvent>,
    status_rx: Receiver<StreamEvent>,
}

impl SimStream {
    fn device_samples(&self, start: Instant, now: Instant) -> u64 {
        (now.duration_since(start).as_secs_f64() * self.rate) as u64
    }

    fn wait_for(&self, missing: u64) -> Duration {
        Duration::from_secs_f64(missing as f64 / self.rate)
    }

    /// Common checks before moving `max_samples`; returns the block size
    fn begin(&mut self, lens: impl Iterator<Item = usize>, max_samples: usize) -> std::result::Result<usize, Transfer> {
        if !self.active {
            return Err(Transfer::Failed(TransferError::new(-1, "stream not active")));
        }
        if let Some(limit) = self.fail_after {
            if self.transfers >= limit {
                return Err(Transfer::Failed(TransferError::new(
                    STREAM_ERROR_CODE,
                    "injected stream error",
                )));
            }
        }
        self.transfers += 1;

        let samples = max_samples.min(self.mtu);
        let needed = samples * self.format.element_size();
        let mut count = 0;
        for len in lens {
            if len < needed {
                return Err(Transfer::Failed(TransferError::new(-1, "buffer too small")));
            }
            count += 1;
        }
        if count != self.num_channels {
            return Err(Transfer::Failed(TransferError::new(
                -1,
                format!("expected {} buffers, got {}", self.num_channels, count),
            )));
        }
        Ok(samples)
    }
}

impl SampleStream for SimStream {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn activate(&mut self) -> Result<()> {
        // TX playout starts with the first write
        self.started = match self.direction {
            Direction::Rx => Some(Instant::now()),
            Direction::Tx => None,
        };
        self.host_samples = 0;
        self.active = true;
        tracing::debug!("sim {} stream activated", self.direction);
        Ok(())
    }

    fn deactivate(&mut self) -> Result<()> {
        self.active = false;
        self.started = None;
        tracing::debug!("sim {} stream deactivated", self.direction);
        Ok(())
    }

    fn read(&mut self, buffers: &mut [&mut [u8]], max_samples: usize, timeout: Duration) -> Transfer {
        let samples = match self.begin(buffers.iter().map(|b| b.len()), max_samples) {
            Ok(samples) => samples,
            Err(result) => return result,
        };
        let Some(start) = self.started else {
            return Transfer::Failed(TransferError::new(-1, "stream not active"));
        };

        let now = Instant::now();
        let arrived = self.device_samples(start, now);
        let available = arrived.saturating_sub(self.host_samples);
        if available > self.depth {
            // Backlog is lost, continue from the current clock
            self.host_samples = arrived;
            return Transfer::Overflow;
        }
        if available < samples as u64 {
            let wait = self.wait_for(samples as u64 - available);
            if wait > timeout {
                thread::sleep(timeout);
                return Transfer::Timeout;
            }
            thread::sleep(wait);
        }

        for buffer in buffers.iter_mut() {
            buffer[..samples * self.format.element_size()].fill(0);
        }
        self.host_samples += samples as u64;
        Transfer::Samples(samples)
    }

    fn write(&mut self, buffers: &[&[u8]], max_samples: usize, timeout: Duration) -> Transfer {
        let samples = match self.begin(buffers.iter().map(|b| b.len()), max_samples) {
            Ok(samples) => samples,
            Err(result) => return result,
        };

        let now = Instant::now();
        let start = match self.started {
            Some(start) => {
                if self.device_samples(start, now) > self.host_samples {
                    let _ = self.status_tx.send(StreamEvent::Underflow);
                    self.host_samples = 0;
                    self.started = Some(now);
                    now
                } else {
                    start
                }
            }
            None => {
                self.started = Some(now);
                self.host_samples = 0;
                now
            }
        };

        let queued = self.host_samples - self.device_samples(start, now).min(self.host_samples);
        let space = self.depth.saturating_sub(queued);
        if space < samples as u64 {
            let wait = self.wait_for(samples as u64 - space);
            if wait > timeout {
                thread::sleep(timeout);
                return Transfer::Timeout;
            }
            thread::sleep(wait);
        }

        self.host_samples += samples as u64;
        Transfer::Samples(samples)
    }

    fn poll_status(&mut self) -> Option<StreamEvent> {
        self.status_rx.try_recv().ok()
    }
}

impl Drop for SimStream {
    fn drop(&mut self) {
        tracing::debug!("sim {} stream closed", self.direction);
    }
}
