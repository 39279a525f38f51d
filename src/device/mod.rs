//! Radio device abstraction
//!
//! The rate test only talks to hardware through the [`RadioDevice`] and
//! [`SampleStream`] traits. Backends:
//! - `sim`: a rate-paced software device, always available
//! - `soapy`: libSoapySDR through the `soapysdr` crate (feature `soapysdr`)

pub mod sim;
#[cfg(feature = "soapysdr")]
pub mod soapy;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result, TransferError};

pub use sim::SimDevice;

/// Stream direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Rx,
    Tx,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Rx => write!(f, "RX"),
            Direction::Tx => write!(f, "TX"),
        }
    }
}

/// Complex sample wire formats, named as SoapySDR names them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    CF64,
    CF32,
    CS32,
    CS16,
    CS8,
    CU8,
}

impl SampleFormat {
    /// Bytes occupied by one complex sample
    pub fn element_size(self) -> usize {
        match self {
            SampleFormat::CF64 => 16,
            SampleFormat::CF32 => 8,
            SampleFormat::CS32 => 8,
            SampleFormat::CS16 => 4,
            SampleFormat::CS8 | SampleFormat::CU8 => 2,
        }
    }

    /// Magnitude of a full-scale component
    pub fn full_scale(self) -> f64 {
        match self {
            SampleFormat::CF64 | SampleFormat::CF32 => 1.0,
            SampleFormat::CS32 => i32::MAX as f64,
            SampleFormat::CS16 => i16::MAX as f64,
            SampleFormat::CS8 | SampleFormat::CU8 => i8::MAX as f64,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SampleFormat::CF64 => "CF64",
            SampleFormat::CF32 => "CF32",
            SampleFormat::CS32 => "CS32",
            SampleFormat::CS16 => "CS16",
            SampleFormat::CS8 => "CS8",
            SampleFormat::CU8 => "CU8",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SampleFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CF64" => Ok(SampleFormat::CF64),
            "CF32" => Ok(SampleFormat::CF32),
            "CS32" => Ok(SampleFormat::CS32),
            "CS16" => Ok(SampleFormat::CS16),
            "CS8" => Ok(SampleFormat::CS8),
            "CU8" => Ok(SampleFormat::CU8),
            other => Err(Error::Config(format!("Unsupported sample format: {}", other))),
        }
    }
}

/// Result of a single read or write call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    /// Number of samples moved per channel
    Samples(usize),
    /// Nothing could be moved before the timeout expired
    Timeout,
    /// Device receive buffer overran
    Overflow,
    /// Device transmit buffer ran dry
    Underflow,
    /// Anything else; the loop does not continue after this
    Failed(TransferError),
}

/// Out-of-band notification from a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    Overflow,
    Underflow,
    TimeError,
}

/// A configurable radio device
pub trait RadioDevice: Send + Sync {
    /// Driver name for display
    fn driver(&self) -> &str;

    fn set_frequency(&self, direction: Direction, channel: usize, hz: f64) -> Result<()>;

    fn set_bandwidth(&self, direction: Direction, channel: usize, hz: f64) -> Result<()>;

    fn set_sample_rate(&self, direction: Direction, channel: usize, rate: f64) -> Result<()>;

    fn set_gain(&self, direction: Direction, channel: usize, db: f64) -> Result<()>;

    /// Native wire format of a channel and its full-scale value
    fn native_format(&self, direction: Direction, channel: usize) -> Result<(SampleFormat, f64)>;

    /// Open a stream over `channels`; dropping the stream closes it
    fn open_stream(
        &self,
        direction: Direction,
        format: SampleFormat,
        channels: &[usize],
    ) -> Result<Box<dyn SampleStream>>;
}

/// One open RX or TX stream
///
/// Buffers passed to `read`/`write` hold one block per channel, each at
/// least `max_samples * element_size` bytes and 8-byte aligned.
pub trait SampleStream: Send {
    fn direction(&self) -> Direction;

    /// Largest number of samples a single transfer can move
    fn mtu(&self) -> usize;

    fn activate(&mut self) -> Result<()>;

    fn deactivate(&mut self) -> Result<()>;

    fn read(&mut self, buffers: &mut [&mut [u8]], max_samples: usize, timeout: Duration) -> Transfer;

    fn write(&mut self, buffers: &[&[u8]], max_samples: usize, timeout: Duration) -> Transfer;

    /// Non-blocking poll for the next pending notification
    fn poll_status(&mut self) -> Option<StreamEvent>;
}

/// Ordered `key=value` list in SoapySDR's string form, e.g. `driver=sim,mtu=1024`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Kwargs {
    pairs: Vec<(String, String)>,
}

impl Kwargs {
    pub fn parse(s: &str) -> Self {
        let pairs = s
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once('=') {
                Some((key, value)) => (key.trim().to_string(), value.trim().to_string()),
                None => (entry.to_string(), String::new()),
            })
            .collect();
        Self { pairs }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Parse a value, `None` if the key is absent
    pub fn parse_value<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| Error::DeviceOpen(format!("Invalid value for {}: {}", key, raw))),
            None => Ok(None),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(k, _)| k.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl fmt::Display for Kwargs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.pairs.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

/// Open a device from a selector string
pub fn open_device(selector: &str) -> Result<Box<dyn RadioDevice>> {
    let args = Kwargs::parse(selector);

    if args.get("driver") == Some(sim::DRIVER_NAME) {
        return Ok(Box::new(SimDevice::from_args(&args)?));
    }

    #[cfg(feature = "soapysdr")]
    {
        Ok(Box::new(soapy::SoapyDevice::open(selector)?))
    }

    #[cfg(not(feature = "soapysdr"))]
    {
        Err(Error::DeviceOpen(format!(
            "no driver for '{}' (use driver=sim or build with the soapysdr feature)",
            args
        )))
    }
}
