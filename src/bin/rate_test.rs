//! SDR Rate Test
//!
//! Streams RX and TX simultaneously until Ctrl+C and reports throughput,
//! overflows and underflows per direction.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sdr_rate_test::{
    config::{FormatPolicy, RateTestConfig},
    session::RateTest,
    stream::SignalLatch,
};

#[derive(Parser, Debug)]
#[command(name = "rate-test", version, about, long_about = None)]
struct Cli {
    /// Device selector, e.g. "driver=lime" or "driver=sim,mtu=2048"
    #[arg(short, long)]
    args: Option<String>,
    /// Center frequency in Hz
    #[arg(short, long)]
    freq: Option<f64>,
    /// Sample rate in samples per second
    #[arg(short, long)]
    rate: Option<f64>,
    /// Analog bandwidth in Hz
    #[arg(short, long)]
    bw: Option<f64>,
    #[arg(long)]
    rx_gain: Option<f64>,
    #[arg(long)]
    tx_gain: Option<f64>,
    /// Stream format for both directions (CF32, CS16, ...); native if omitted
    #[arg(long)]
    format: Option<String>,
    /// Native format selection when no format is given: rx-for-both or per-direction
    #[arg(long)]
    format_policy: Option<FormatPolicy>,
    /// Channel list, e.g. "0,1"
    #[arg(short, long)]
    channels: Option<String>,
    /// Transmit a test tone at this baseband frequency in Hz
    #[arg(long)]
    tone: Option<f64>,
    /// Tone amplitude as a fraction of full scale
    #[arg(long)]
    tone_amplitude: Option<f64>,
    /// Delay between starting RX and TX in milliseconds
    #[arg(long)]
    settle_ms: Option<u64>,
    /// Do not draw the progress spinner
    #[arg(long)]
    no_spinner: bool,
    /// TOML config file; command line values take precedence
    #[arg(long)]
    config: Option<PathBuf>,
    /// Write the final summary as JSON
    #[arg(long)]
    summary_json: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, config: &mut RateTestConfig) {
        if let Some(args) = &self.args {
            config.device.args = args.clone();
        }
        if let Some(channels) = &self.channels {
            config.device.channels = channels.clone();
        }
        if let Some(format) = &self.format {
            config.device.format = Some(format.clone());
        }
        if let Some(policy) = self.format_policy {
            config.device.format_policy = policy;
        }

        let tuning = &mut config.tuning;
        tuning.frequency = self.freq.or(tuning.frequency);
        tuning.sample_rate = self.rate.or(tuning.sample_rate);
        tuning.bandwidth = self.bw.or(tuning.bandwidth);
        tuning.rx_gain = self.rx_gain.or(tuning.rx_gain);
        tuning.tx_gain = self.tx_gain.or(tuning.tx_gain);

        let stream = &mut config.stream;
        stream.tone = self.tone.or(stream.tone);
        if let Some(amplitude) = self.tone_amplitude {
            stream.tone_amplitude = amplitude;
        }
        if let Some(settle_ms) = self.settle_ms {
            stream.settle_ms = settle_ms;
        }
        if self.no_spinner {
            stream.spinner = false;
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let mut config = match &cli.config {
        Some(path) => RateTestConfig::load(path)?,
        None => RateTestConfig::load_default()?,
    };
    cli.apply(&mut config);
    let test = RateTest::new(config).context("Invalid configuration")?;

    let latch = SignalLatch::new();
    let interrupt = latch.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupt.trip() {
                tracing::info!("Interrupt received, stopping streams");
            }
        }
    });

    tracing::info!("Press Ctrl+C to stop");
    let summary = tokio::task::spawn_blocking(move || test.run(&latch))
        .await
        .context("Rate test task failed")??;

    println!();
    for report in [&summary.rx, &summary.tx] {
        println!(
            "{}: {} samples in {:.1}s ({:.3} Msps), overflows {}, underflows {}",
            report.direction,
            report.stats.total_samples,
            report.elapsed_secs,
            report.samples_per_sec / 1e6,
            report.stats.overflows,
            report.stats.underflows
        );
    }

    if let Some(path) = &cli.summary_json {
        summary
            .write_json(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Summary written to {}", path.display());
    }

    Ok(summary.is_clean())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            tracing::error!("Rate test ended on a stream error");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("Error in rate test: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
