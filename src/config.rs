//! Rate test configuration
//!
//! Loaded from a TOML file (every field optional) and then overridden by the
//! command line.
//!
//! ```toml
//! [device]
//! args = "driver=sim,mtu=2048"
//! channels = "0,1"
//! format_policy = "rx-for-both"
//!
//! [tuning]
//! frequency = 915e6
//! sample_rate = 10e6
//! rx_gain = 30.0
//!
//! [stream]
//! tone = 250e3
//! settle_ms = 2000
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::constants::*;
use crate::device::SampleFormat;
use crate::error::{Error, Result};
use crate::stream::LoopSettings;

/// How the stream format is chosen when none is requested
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormatPolicy {
    /// Both directions use the RX native format
    RxForBoth,
    /// Each direction uses its own native format
    #[default]
    PerDirection,
}

impl FromStr for FormatPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rx-for-both" => Ok(FormatPolicy::RxForBoth),
            "per-direction" => Ok(FormatPolicy::PerDirection),
            other => Err(Error::Config(format!("Unknown format policy: {}", other))),
        }
    }
}

/// Device selection and stream layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device selector, e.g. `driver=lime` or `driver=sim`
    pub args: String,
    /// Channel list, e.g. `0,1`; empty means channel 0
    pub channels: String,
    /// Explicit wire format for both directions
    pub format: Option<String>,
    pub format_policy: FormatPolicy,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            args: DEFAULT_DEVICE_ARGS.to_string(),
            channels: String::new(),
            format: None,
            format_policy: FormatPolicy::default(),
        }
    }
}

/// Per-channel tuning, applied to RX and TX alike unless noted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    /// Center frequency in Hz
    pub frequency: Option<f64>,
    /// Sample rate in samples per second
    pub sample_rate: Option<f64>,
    /// Analog bandwidth in Hz
    pub bandwidth: Option<f64>,
    pub rx_gain: Option<f64>,
    pub tx_gain: Option<f64>,
}

/// Loop behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// TX test tone frequency in Hz; TX sends zeros without it
    pub tone: Option<f64>,
    /// Tone amplitude as a fraction of full scale
    pub tone_amplitude: f64,
    /// Delay between starting RX and TX
    pub settle_ms: u64,
    pub transfer_timeout_ms: u64,
    /// Throughput report period
    pub report_secs: u64,
    pub spinner: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            tone: None,
            tone_amplitude: 1.0,
            settle_ms: DEFAULT_SETTLE_DELAY.as_millis() as u64,
            transfer_timeout_ms: DEFAULT_TRANSFER_TIMEOUT.as_millis() as u64,
            report_secs: DEFAULT_REPORT_PERIOD.as_secs(),
            spinner: true,
        }
    }
}

/// Full rate test configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateTestConfig {
    pub device: DeviceConfig,
    pub tuning: TuningConfig,
    pub stream: StreamConfig,
}

impl RateTestConfig {
    /// Parse a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::ConfigFile(e.to_string()))
    }

    /// Load a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigFile(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    /// Platform config file location
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "sdr-rate-test")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Load the platform config file if there is one
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Check everything the device cannot check for us
    pub fn validate(&self) -> Result<()> {
        match self.tuning.sample_rate {
            Some(rate) if rate.is_finite() && rate > 0.0 => {}
            Some(rate) => return Err(Error::Config(format!("Invalid sample rate: {}", rate))),
            None => return Err(Error::Config("Sample rate is required".into())),
        }
        if self.tuning.frequency.is_none() {
            return Err(Error::Config("Center frequency is required".into()));
        }
        if let Some(tone) = self.stream.tone {
            if !tone.is_finite() {
                return Err(Error::Config(format!("Invalid tone frequency: {}", tone)));
            }
        }
        if !(0.0..=1.0).contains(&self.stream.tone_amplitude) {
            return Err(Error::Config(format!(
                "Tone amplitude must be within [0, 1], got {}",
                self.stream.tone_amplitude
            )));
        }
        self.requested_format()?;
        Ok(())
    }

    /// Explicitly requested wire format, if any
    pub fn requested_format(&self) -> Result<Option<SampleFormat>> {
        match self.device.format.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(name) => name.parse().map(Some),
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.stream.settle_ms)
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            transfer_timeout: Duration::from_millis(self.stream.transfer_timeout_ms),
            report_period: Duration::from_secs(self.stream.report_secs),
            spinner: self.stream.spinner,
            ..LoopSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> RateTestConfig {
        let mut config = RateTestConfig::default();
        config.tuning.frequency = Some(100e6);
        config.tuning.sample_rate = Some(1e6);
        config
    }

    #[test]
    fn test_defaults() {
        let config = RateTestConfig::default();
        assert_eq!(config.settle_delay(), DEFAULT_SETTLE_DELAY);
        assert_eq!(config.device.format_policy, FormatPolicy::PerDirection);
        let settings = config.loop_settings();
        assert_eq!(settings.transfer_timeout, DEFAULT_TRANSFER_TIMEOUT);
        assert_eq!(settings.report_period, DEFAULT_REPORT_PERIOD);
        assert_eq!(settings.spin_period, DEFAULT_SPIN_PERIOD);
    }

    #[test]
    fn test_from_toml() {
        let config = RateTestConfig::from_toml(
            r#"
            [device]
            args = "driver=sim"
            channels = "0,1"
            format = "CS16"
            format_policy = "rx-for-both"

            [tuning]
            frequency = 915e6
            sample_rate = 10e6

            [stream]
            tone = 250e3
            spinner = false
            "#,
        )
        .unwrap();

        assert_eq!(config.device.args, "driver=sim");
        assert_eq!(config.device.format_policy, FormatPolicy::RxForBoth);
        assert_eq!(config.tuning.sample_rate, Some(10e6));
        assert_eq!(config.tuning.rx_gain, None);
        assert_eq!(config.stream.tone, Some(250e3));
        assert_eq!(config.stream.settle_ms, 2000);
        assert!(!config.stream.spinner);
        assert_eq!(config.requested_format().unwrap(), Some(SampleFormat::CS16));
        config.validate().unwrap();
    }

    #[test]
    fn test_bad_toml() {
        let result = RateTestConfig::from_toml("[tuning]\nsample_rate = \"fast\"");
        assert!(matches!(result, Err(Error::ConfigFile(_))));
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());

        let mut config = valid();
        config.tuning.sample_rate = None;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = valid();
        config.tuning.sample_rate = Some(-1.0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = valid();
        config.device.format = Some("CS12".into());
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = valid();
        config.stream.tone_amplitude = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("rx-for-both".parse::<FormatPolicy>().unwrap(), FormatPolicy::RxForBoth);
        assert!("both".parse::<FormatPolicy>().is_err());
    }
}
