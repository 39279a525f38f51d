//! # SDR Rate Test
//!
//! Sustained full-duplex throughput measurement for software-defined radios.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────────┐
//! │                       RateTest (session)                               │
//! │   open device → resolve channels → tune → negotiate format             │
//! │   open RX stream, open TX stream                                       │
//! │                                                                        │
//! │   ┌─────────────────── thread scope ───────────────────────┐           │
//! │   │  rate-rx: StreamLoop(RX)   ──(settle delay)──►         │           │
//! │   │                            rate-tx: StreamLoop(TX)     │           │
//! │   │     read ► classify ► spinner / status / report        │           │
//! │   └────────────────────────────┬───────────────────────────┘           │
//! │                    SignalLatch │ (ctrl-c)                              │
//! │   close streams → release device → RunSummary                          │
//! └────────────────────────────────────────────────────────────────────────┘
//!            │                                   │
//!            ▼                                   ▼
//!   device::sim (software)          device::soapy (libSoapySDR)
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod session;
pub mod stream;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Delay between starting the RX and TX loops
    pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

    /// Timeout handed to every stream read/write
    pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_millis(100);

    /// Spinner refresh period
    pub const DEFAULT_SPIN_PERIOD: Duration = Duration::from_millis(300);

    /// Minimum spacing between stream status drains
    pub const DEFAULT_STATUS_PERIOD: Duration = Duration::from_secs(1);

    /// Throughput report period
    pub const DEFAULT_REPORT_PERIOD: Duration = Duration::from_secs(5);

    /// Device selector used when none is given
    pub const DEFAULT_DEVICE_ARGS: &str = "";

    /// Config file name inside the platform config directory
    pub const CONFIG_FILE_NAME: &str = "rate-test.toml";
}
