//! SoapySDR backend
//!
//! Requires libSoapySDR and the device's plugin module at runtime.
//! Streams are typed by sample format; the byte blocks handed in by the
//! rate test are viewed as `Complex<T>` slices through `bytemuck`.

use bytemuck::Pod;
use num_complex::Complex;
use soapysdr::{ErrorCode, RxStream, StreamSample, TxStream};
use std::time::Duration;

use super::{Direction, RadioDevice, SampleFormat, SampleStream, StreamEvent, Transfer};
use crate::error::{Error, Result, TransferError};

fn soapy_direction(direction: Direction) -> soapysdr::Direction {
    match direction {
        Direction::Rx => soapysdr::Direction::Rx,
        Direction::Tx => soapysdr::Direction::Tx,
    }
}

fn error_code(code: &ErrorCode) -> i32 {
    match code {
        ErrorCode::Timeout => -1,
        ErrorCode::StreamError => -2,
        ErrorCode::Corruption => -3,
        ErrorCode::Overflow => -4,
        ErrorCode::NotSupported => -5,
        ErrorCode::TimeError => -6,
        ErrorCode::Underflow => -7,
        _ => -8,
    }
}

fn classify(result: std::result::Result<usize, soapysdr::Error>) -> Transfer {
    match result {
        Ok(samples) => Transfer::Samples(samples),
        Err(err) => match err.code {
            ErrorCode::Timeout => Transfer::Timeout,
            ErrorCode::Overflow => Transfer::Overflow,
            ErrorCode::Underflow => Transfer::Underflow,
            _ => Transfer::Failed(TransferError::new(error_code(&err.code), err.message)),
        },
    }
}

/// Device opened through libSoapySDR
pub struct SoapyDevice {
    inner: soapysdr::Device,
    driver: String,
}

impl SoapyDevice {
    pub fn open(selector: &str) -> Result<Self> {
        let inner = soapysdr::Device::new(selector)
            .map_err(|e| Error::DeviceOpen(format!("{}: {}", selector, e)))?;
        let driver = inner.driver_key().unwrap_or_else(|_| "soapysdr".to_string());
        tracing::info!("Opened SoapySDR device ({})", driver);
        Ok(Self { inner, driver })
    }

    fn config<T>(
        &self,
        what: &str,
        direction: Direction,
        channel: usize,
        result: std::result::Result<T, soapysdr::Error>,
    ) -> Result<T> {
        result.map_err(|e| Error::Config(format!("{} {} channel {}: {}", what, direction, channel, e)))
    }
}

impl RadioDevice for SoapyDevice {
    fn driver(&self) -> &str {
        &self.driver
    }

    fn set_frequency(&self, direction: Direction, channel: usize, hz: f64) -> Result<()> {
        let result = self.inner.set_frequency(soapy_direction(direction), channel, hz, ());
        self.config("setFrequency", direction, channel, result)
    }

    fn set_bandwidth(&self, direction: Direction, channel: usize, hz: f64) -> Result<()> {
        let result = self.inner.set_bandwidth(soapy_direction(direction), channel, hz);
        self.config("setBandwidth", direction, channel, result)
    }

    fn set_sample_rate(&self, direction: Direction, channel: usize, rate: f64) -> Result<()> {
        let result = self.inner.set_sample_rate(soapy_direction(direction), channel, rate);
        self.config("setSampleRate", direction, channel, result)
    }

    fn set_gain(&self, direction: Direction, channel: usize, db: f64) -> Result<()> {
        let result = self.inner.set_gain(soapy_direction(direction), channel, db);
        self.config("setGain", direction, channel, result)
    }

    fn native_format(&self, direction: Direction, channel: usize) -> Result<(SampleFormat, f64)> {
        let result = self.inner.native_stream_format(soapy_direction(direction), channel);
        let (format, full_scale) = self.config("getNativeStreamFormat", direction, channel, result)?;
        Ok((format.to_string().parse()?, full_scale))
    }

    fn open_stream(
        &self,
        direction: Direction,
        format: SampleFormat,
        channels: &[usize],
    ) -> Result<Box<dyn SampleStream>> {
        let device = &self.inner;
        Ok(match format {
            SampleFormat::CF64 => Box::new(SoapyStream::<Complex<f64>>::open(device, direction, channels)?),
            SampleFormat::CF32 => Box::new(SoapyStream::<Complex<f32>>::open(device, direction, channels)?),
            SampleFormat::CS32 => Box::new(SoapyStream::<Complex<i32>>::open(device, direction, channels)?),
            SampleFormat::CS16 => Box::new(SoapyStream::<Complex<i16>>::open(device, direction, channels)?),
            SampleFormat::CS8 => Box::new(SoapyStream::<Complex<i8>>::open(device, direction, channels)?),
            SampleFormat::CU8 => Box::new(SoapyStream::<Complex<u8>>::open(device, direction, channels)?),
        })
    }
}

enum Inner<E: StreamSample> {
    Rx(RxStream<E>),
    Tx(TxStream<E>),
}

/// Typed SoapySDR stream
pub struct SoapyStream<E: StreamSample> {
    inner: Inner<E>,
    mtu: usize,
}

impl<E: StreamSample + Pod> SoapyStream<E> {
    fn open(device: &soapysdr::Device, direction: Direction, channels: &[usize]) -> Result<Self> {
        let setup = |e: soapysdr::Error| Error::StreamSetup(format!("{} stream: {}", direction, e));
        let (inner, mtu) = match direction {
            Direction::Rx => {
                let stream = device.rx_stream::<E>(channels).map_err(setup)?;
                let mtu = stream.mtu().map_err(setup)?;
                (Inner::Rx(stream), mtu)
            }
            Direction::Tx => {
                let stream = device.tx_stream::<E>(channels).map_err(setup)?;
                let mtu = stream.mtu().map_err(setup)?;
                (Inner::Tx(stream), mtu)
            }
        };
        Ok(Self { inner, mtu })
    }
}

fn timeout_us(timeout: Duration) -> i64 {
    timeout.as_micros().min(i64::MAX as u128) as i64
}

fn wrong_direction(direction: Direction) -> Transfer {
    Transfer::Failed(TransferError::new(-2, format!("transfer on {} stream in wrong direction", direction)))
}

impl<E: StreamSample + Pod> SampleStream for SoapyStream<E> {
    fn direction(&self) -> Direction {
        match self.inner {
            Inner::Rx(_) => Direction::Rx,
            Inner::Tx(_) => Direction::Tx,
        }
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn activate(&mut self) -> Result<()> {
        let result = match &mut self.inner {
            Inner::Rx(stream) => stream.activate(None),
            Inner::Tx(stream) => stream.activate(None),
        };
        result.map_err(|e| Error::StreamSetup(format!("activate: {}", e)))
    }

    fn deactivate(&mut self) -> Result<()> {
        let result = match &mut self.inner {
            Inner::Rx(stream) => stream.deactivate(None),
            Inner::Tx(stream) => stream.deactivate(None),
        };
        result.map_err(|e| Error::StreamSetup(format!("deactivate: {}", e)))
    }

    fn read(&mut self, buffers: &mut [&mut [u8]], max_samples: usize, timeout: Duration) -> Transfer {
        let Inner::Rx(stream) = &mut self.inner else {
            return wrong_direction(Direction::Tx);
        };
        let bytes = max_samples * std::mem::size_of::<E>();
        let mut views: Vec<&mut [E]> = buffers
            .iter_mut()
            .map(|buffer| bytemuck::cast_slice_mut(&mut buffer[..bytes]))
            .collect();
        classify(stream.read(&mut views, timeout_us(timeout)))
    }

    fn write(&mut self, buffers: &[&[u8]], max_samples: usize, timeout: Duration) -> Transfer {
        let Inner::Tx(stream) = &mut self.inner else {
            return wrong_direction(Direction::Rx);
        };
        let bytes = max_samples * std::mem::size_of::<E>();
        let views: Vec<&[E]> = buffers
            .iter()
            .map(|buffer| bytemuck::cast_slice(&buffer[..bytes]))
            .collect();
        classify(stream.write(&views, None, false, timeout_us(timeout)))
    }

    fn poll_status(&mut self) -> Option<StreamEvent> {
        // readStreamStatus is not exposed by the bindings
        None
    }
}
