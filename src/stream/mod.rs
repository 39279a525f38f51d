//! Sample streaming loop
//!
//! One [`StreamLoop`] runs per direction. It owns its transfer buffers and
//! counters, borrows its stream for the duration of the loop, and stops when
//! the shared [`SignalLatch`] trips or a transfer fails.

pub mod buffer;
pub mod engine;
pub mod signal;
pub mod stats;
pub mod tone;

pub use buffer::TransferBuffers;
pub use engine::{ActiveStream, LoopEnd, LoopReport, LoopSettings, StreamLoop};
pub use signal::SignalLatch;
pub use stats::{LoopStats, Outcome, ThroughputReport};
pub use tone::Tone;
