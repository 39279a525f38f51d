//! TX test tone synthesis
//!
//! A single block of a complex sinusoid is written once into every channel
//! block before the TX loop starts and is replayed by every write.

use bytemuck::Pod;
use num_complex::Complex;
use std::f64::consts::TAU;

use super::buffer::TransferBuffers;
use crate::device::SampleFormat;

/// Sample component types a tone can be written in
pub trait ToneSample: Pod {
    /// Convert a value already scaled to the format's full-scale range
    fn from_scaled(value: f64) -> Self;
}

impl ToneSample for f64 {
    fn from_scaled(value: f64) -> Self {
        value
    }
}

impl ToneSample for f32 {
    fn from_scaled(value: f64) -> Self {
        value as f32
    }
}

// Float to int `as` casts saturate at the type bounds
impl ToneSample for i32 {
    fn from_scaled(value: f64) -> Self {
        value.round() as i32
    }
}

impl ToneSample for i16 {
    fn from_scaled(value: f64) -> Self {
        value.round() as i16
    }
}

impl ToneSample for i8 {
    fn from_scaled(value: f64) -> Self {
        value.round() as i8
    }
}

/// Offset binary around 128
impl ToneSample for u8 {
    fn from_scaled(value: f64) -> Self {
        (value.round() + 128.0) as u8
    }
}

/// Discrete complex sinusoid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    /// Tone frequency in Hz, relative to baseband
    pub frequency: f64,
    pub sample_rate: f64,
    /// Peak amplitude as a fraction of full scale
    pub amplitude: f64,
    /// Magnitude of a full-scale component in the wire format
    pub full_scale: f64,
}

impl Tone {
    pub fn new(frequency: f64, sample_rate: f64, full_scale: f64) -> Self {
        Self {
            frequency,
            sample_rate,
            amplitude: 1.0,
            full_scale,
        }
    }

    pub fn with_amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude;
        self
    }

    /// Phase increment per sample in radians
    pub fn omega(&self) -> f64 {
        TAU * self.frequency / self.sample_rate
    }

    /// Phase of sample `n`, reduced to `[0, 2π)`
    pub fn phase(&self, n: usize) -> f64 {
        (self.omega() * n as f64).rem_euclid(TAU)
    }

    /// Write the tone into a typed block, starting at phase zero
    pub fn synthesize<T: ToneSample>(&self, out: &mut [Complex<T>]) {
        let scale = self.amplitude * self.full_scale;
        for (n, sample) in out.iter_mut().enumerate() {
            let phi = self.phase(n);
            *sample = Complex::new(T::from_scaled(phi.cos() * scale), T::from_scaled(phi.sin() * scale));
        }
    }

    /// Write the tone into a raw block of `format` samples
    pub fn write_block(&self, format: SampleFormat, block: &mut [u8]) {
        match format {
            SampleFormat::CF64 => self.synthesize::<f64>(bytemuck::cast_slice_mut(block)),
            SampleFormat::CF32 => self.synthesize::<f32>(bytemuck::cast_slice_mut(block)),
            SampleFormat::CS32 => self.synthesize::<i32>(bytemuck::cast_slice_mut(block)),
            SampleFormat::CS16 => self.synthesize::<i16>(bytemuck::cast_slice_mut(block)),
            SampleFormat::CS8 => self.synthesize::<i8>(bytemuck::cast_slice_mut(block)),
            SampleFormat::CU8 => self.synthesize::<u8>(bytemuck::cast_slice_mut(block)),
        }
    }

    /// Fill every channel block with the same tone
    pub fn fill(&self, format: SampleFormat, buffers: &mut TransferBuffers) {
        for channel in 0..buffers.num_channels() {
            self.write_block(format, buffers.block_mut(channel));
        }
    }
}
