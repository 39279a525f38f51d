//! Loop counters, transfer classification and throughput reporting

use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::time::{Duration, Instant};

use crate::device::{Direction, StreamEvent, Transfer};
use crate::error::TransferError;

/// What the loop does after a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Fatal(TransferError),
}

/// Counters collected by one loop invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub overflows: u64,
    pub underflows: u64,
    pub total_samples: u64,
}

impl LoopStats {
    /// Fold one transfer result into the counters
    pub fn record(&mut self, transfer: Transfer) -> Outcome {
        match transfer {
            Transfer::Timeout => {}
            Transfer::Overflow => self.overflows += 1,
            Transfer::Underflow => self.underflows += 1,
            Transfer::Samples(n) => self.total_samples += n as u64,
            Transfer::Failed(err) => return Outcome::Fatal(err),
        }
        Outcome::Continue
    }

    /// Fold one out-of-band notification into the counters
    pub fn record_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Overflow => self.overflows += 1,
            StreamEvent::Underflow => self.underflows += 1,
            StreamEvent::TimeError => {}
        }
    }

    /// Throughput since the loop started
    pub fn report(
        &self,
        direction: Direction,
        elapsed: Duration,
        num_channels: usize,
        element_size: usize,
    ) -> ThroughputReport {
        let secs = elapsed.as_secs_f64();
        let samples_per_sec = if secs > 0.0 {
            self.total_samples as f64 / secs
        } else {
            0.0
        };
        ThroughputReport {
            direction,
            elapsed,
            samples_per_sec,
            bytes_per_sec: samples_per_sec * (num_channels * element_size) as f64,
            overflows: self.overflows,
            underflows: self.underflows,
        }
    }
}

/// Periodic throughput summary
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputReport {
    pub direction: Direction,
    pub elapsed: Duration,
    pub samples_per_sec: f64,
    pub bytes_per_sec: f64,
    pub overflows: u64,
    pub underflows: u64,
}

impl fmt::Display for ThroughputReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.3} Msps\t{:.3} MBps - {}",
            self.samples_per_sec / 1e6,
            self.bytes_per_sec / 1e6,
            self.direction
        )?;
        if self.overflows != 0 {
            write!(f, "\tOverflows {}", self.overflows)?;
        }
        if self.underflows != 0 {
            write!(f, "\tUnderflows {}", self.underflows)?;
        }
        Ok(())
    }
}

/// Timestamp of the last time a periodic action fired
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint {
    last: Instant,
    period: Duration,
}

impl Checkpoint {
    pub fn new(start: Instant, period: Duration) -> Self {
        Self { last: start, period }
    }

    /// True once per elapsed period; advances the checkpoint when it fires
    pub fn due(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last) >= self.period {
            self.last = now;
            true
        } else {
            false
        }
    }
}

/// Four-glyph liveness indicator
#[derive(Debug, Default)]
pub struct Spinner {
    index: usize,
}

impl Spinner {
    const GLYPHS: [char; 4] = ['|', '/', '-', '\\'];

    pub fn advance(&mut self) -> char {
        let glyph = Self::GLYPHS[self.index % Self::GLYPHS.len()];
        self.index = self.index.wrapping_add(1);
        glyph
    }

    /// Overwrite the previous glyph on stdout
    pub fn tick(&mut self) {
        let glyph = self.advance();
        let mut stdout = std::io::stdout().lock();
        let _ = write!(stdout, "\x08{}", glyph);
        let _ = stdout.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_throughput_example() {
        let stats = LoopStats {
            total_samples: 5_000_000,
            ..Default::default()
        };
        let report = stats.report(Direction::Rx, Duration::from_secs(5), 2, 4);
        assert!((report.samples_per_sec - 1_000_000.0).abs() < 1e-6);
        assert!((report.bytes_per_sec - 8_000_000.0).abs() < 1e-6);
        assert_eq!(report.to_string(), "1.000 Msps\t8.000 MBps - RX");
    }

    #[test]
    fn test_report_counters_shown() {
        let stats = LoopStats {
            overflows: 3,
            underflows: 0,
            total_samples: 0,
        };
        let report = stats.report(Direction::Tx, Duration::ZERO, 1, 4);
        assert_eq!(report.samples_per_sec, 0.0);
        assert_eq!(report.to_string(), "0.000 Msps\t0.000 MBps - TX\tOverflows 3");
    }

    #[test]
    fn test_events() {
        let mut stats = LoopStats::default();
        stats.record_event(StreamEvent::Overflow);
        stats.record_event(StreamEvent::Underflow);
        stats.record_event(StreamEvent::Underflow);
        stats.record_event(StreamEvent::TimeError);
        assert_eq!(stats.overflows, 1);
        assert_eq!(stats.underflows, 2);
        assert_eq!(stats.total_samples, 0);
    }

    #[test]
    fn test_fatal_transfer() {
        let mut stats = LoopStats::default();
        let err = TransferError::new(-2, "broken");
        assert_eq!(stats.record(Transfer::Failed(err.clone())), Outcome::Fatal(err));
        assert_eq!(stats, LoopStats::default());
    }

    #[test]
    fn test_checkpoint() {
        let start = Instant::now();
        let mut checkpoint = Checkpoint::new(start, Duration::from_millis(300));
        assert!(!checkpoint.due(start + Duration::from_millis(100)));
        assert!(checkpoint.due(start + Duration::from_millis(300)));
        // advanced to the firing time
        assert!(!checkpoint.due(start + Duration::from_millis(500)));
        assert!(checkpoint.due(start + Duration::from_millis(650)));
    }

    #[test]
    fn test_spinner_cycle() {
        let mut spinner = Spinner::default();
        let glyphs: String = (0..6).map(|_| spinner.advance()).collect();
        assert_eq!(glyphs, "|/-\\|/");
    }

    #[test]
    fn test_spinner_tick_advances() {
        let mut spinner = Spinner::default();
        spinner.tick();
        spinner.tick();
        assert_eq!(spinner.advance(), '-');
    }

    fn transfer() -> impl Strategy<Value = Transfer> {
        prop_oneof![
            Just(Transfer::Timeout),
            Just(Transfer::Overflow),
            Just(Transfer::Underflow),
            (0usize..100_000).prop_map(Transfer::Samples),
        ]
    }

    proptest! {
        #[test]
        fn prop_classification(transfers in proptest::collection::vec(transfer(), 0..200)) {
            let mut stats = LoopStats::default();
            for t in transfers {
                let before = stats;
                prop_assert_eq!(stats.record(t.clone()), Outcome::Continue);
                match t {
                    Transfer::Timeout => prop_assert_eq!(stats, before),
                    Transfer::Overflow => {
                        prop_assert_eq!(stats.overflows, before.overflows + 1);
                        prop_assert_eq!(stats.underflows, before.underflows);
                        prop_assert_eq!(stats.total_samples, before.total_samples);
                    }
                    Transfer::Underflow => {
                        prop_assert_eq!(stats.underflows, before.underflows + 1);
                        prop_assert_eq!(stats.overflows, before.overflows);
                        prop_assert_eq!(stats.total_samples, before.total_samples);
                    }
                    Transfer::Samples(n) => {
                        prop_assert_eq!(stats.total_samples, before.total_samples + n as u64);
                        prop_assert_eq!(stats.overflows, before.overflows);
                        prop_assert_eq!(stats.underflows, before.underflows);
                    }
                    Transfer::Failed(_) => unreachable!(),
                }
            }
        }
    }
}
