// SPDX-License-Identifier: Apache-2.0

//! ADC based logic probe.
//!
//! A square wave from the reference generator is driven onto the probe tip through a resistor.
//! An open tip follows the generator, while a tip tied to a real signal ignores it. The capture
//! spans four generator periods. Each half period is averaged, and comparing the two halves of
//! every period tells the cases apart:
//!
//! | Pair differences        | First window         | Classification |
//! |-------------------------|----------------------|----------------|
//! | all > [`PROBE_BIG_DIFF`] | any                  | Floating       |
//! | all < [`PROBE_LOW_DIFF`] | > [`PROBE_HIGH_LEVEL`] | HighLevel      |
//! | all < [`PROBE_LOW_DIFF`] | < [`PROBE_LOW_LEVEL`]  | LowLevel       |
//! | all < [`PROBE_LOW_DIFF`] | otherwise            | Unknown        |
//! | mixed                   | any                  | Pulsed         |
//!
//! Differences are signed (first half minus second half).

use crate::{
    buffer::SampleBuffer,
    components::{AdcCapture, CaptureStatus, ReferenceGenerator},
    config::{
        ADC_HALF_CODE, PROBE_ANALYSE_LENGTH, PROBE_BIG_DIFF, PROBE_HALF_PERIOD, PROBE_HIGH_LEVEL,
        PROBE_LOW_DIFF, PROBE_LOW_LEVEL, PROBE_SAMPLE_RATE_HZ, PROBE_START_OFFSET, PROBE_WINDOWS,
        PROBE_ZERO_OFFSET,
    },
    pipeline::{Acquisition, Pipeline, PipelineState, Processed},
};

/// What the probe tip is connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SignalClassification {
    /// Nothing: the tip follows the reference generator
    Floating,
    /// Static logic high
    HighLevel,
    /// Static logic low
    LowLevel,
    /// Static, between the logic levels
    Unknown,
    /// Toggling independently of the generator
    Pulsed,
}

/// Zero offset between the interleaved ADC channels at `sample_rate_hz`, if it is known.
pub fn adc_zero_offset(sample_rate_hz: u32) -> Option<u16> {
    match sample_rate_hz {
        PROBE_SAMPLE_RATE_HZ => Some(PROBE_ZERO_OFFSET),
        _ => None,
    }
}

/// Remove a fixed zero offset in place: `raw + a·raw + b`, with `a` and `b` chosen so mid-scale
/// stays put and `offset` maps to zero. Results below zero clamp to 0.
pub fn correct_offset(samples: &mut [u16], offset: u16) {
    if offset >= ADC_HALF_CODE {
        warn!("Zero offset {} out of range, samples left uncorrected", offset);
        return;
    }
    let half = ADC_HALF_CODE as f32;
    let a = offset as f32 / (half - offset as f32);
    let b = -a * half;
    for sample in samples.iter_mut() {
        let raw = *sample as f32;
        let corrected = raw + a * raw + b;
        *sample = if corrected > 0.0 { corrected as u16 } else { 0 };
    }
}

/// Average of every half-period window, skipping [`PROBE_START_OFFSET`] points at its start.
///
/// Windows past the end of `samples` average to 0.
pub fn window_averages(samples: &[u16]) -> [u16; PROBE_WINDOWS] {
    let mut averages = [0; PROBE_WINDOWS];
    for (window, average) in averages.iter_mut().enumerate() {
        let start = (window * PROBE_HALF_PERIOD + PROBE_START_OFFSET).min(samples.len());
        let end = (start + PROBE_ANALYSE_LENGTH).min(samples.len());
        let points = &samples[start..end];
        if !points.is_empty() {
            let sum: u32 = points.iter().copied().map(u32::from).sum();
            *average = (sum / points.len() as u32) as u16;
        }
    }
    averages
}

/// Classify a set of half-period averages. Windows are paired (0, 1), (2, 3), and so on.
pub fn classify(windows: &[u16]) -> SignalClassification {
    let diffs = || {
        windows
            .chunks_exact(2)
            .map(|pair| pair[0] as i16 - pair[1] as i16)
    };

    if diffs().all(|diff| diff > PROBE_BIG_DIFF) {
        SignalClassification::Floating
    } else if diffs().all(|diff| diff < PROBE_LOW_DIFF) {
        match windows.first() {
            Some(level) if *level > PROBE_HIGH_LEVEL => SignalClassification::HighLevel,
            Some(level) if *level < PROBE_LOW_LEVEL => SignalClassification::LowLevel,
            _ => SignalClassification::Unknown,
        }
    } else {
        SignalClassification::Pulsed
    }
}

/// [`Acquisition`] strategy for the logic probe.
#[derive(Debug, Default, Clone)]
pub struct LogicProbeCapture {
    /// Probe channel of the last capture
    samples: SampleBuffer,
    /// Half-period averages of the last capture
    windows: [u16; PROBE_WINDOWS],
}

impl LogicProbeCapture {
    /// Empty strategy
    pub fn new() -> Self {
        Self::default()
    }

    /// Half-period averages of the last processed capture
    pub fn windows(&self) -> &[u16; PROBE_WINDOWS] {
        &self.windows
    }
}

impl<H: AdcCapture + ReferenceGenerator + ?Sized> Acquisition<H> for LogicProbeCapture {
    type Output = SignalClassification;

    fn begin(&mut self, hw: &mut H) {
        hw.restart();
        hw.start_capture();
    }

    fn is_complete(&self, hw: &mut H) -> bool {
        hw.status() == CaptureStatus::Done
    }

    fn process(&mut self, hw: &mut H) -> Processed<SignalClassification> {
        self.samples.fill_from_interleaved(hw.raw_samples());
        match adc_zero_offset(hw.sample_rate()) {
            Some(offset) => correct_offset(self.samples.as_mut_slice(), offset),
            None => debug!("No zero offset known at {} Hz", hw.sample_rate()),
        }
        self.windows = window_averages(self.samples.as_slice());
        #[cfg(feature = "trace_captures")]
        for (index, average) in self.windows.iter().enumerate() {
            trace!("window {}: {}", index, average);
        }
        let signal = classify(&self.windows);
        debug!("Probe windows {:?}: {:?}", self.windows, signal);
        Processed::Done(signal)
    }
}

/// Logic probe engine: the [`Pipeline`] around [`LogicProbeCapture`].
pub struct LogicProbe<H: AdcCapture + ReferenceGenerator + ?Sized> {
    /// Capture/process state machine
    pipeline: Pipeline<LogicProbeCapture, H>,
}

impl<H: AdcCapture + ReferenceGenerator + ?Sized> LogicProbe<H> {
    /// Idle engine
    pub fn new() -> Self {
        Self {
            pipeline: Pipeline::new(LogicProbeCapture::new()),
        }
    }

    /// Discard any result and capture again on the next poll.
    pub fn start(&mut self) {
        self.pipeline.start();
    }

    /// Advance by one scheduler tick.
    pub fn poll(&mut self, hw: &mut H) -> PipelineState {
        self.pipeline.poll(hw)
    }

    /// Current pipeline state
    pub fn state(&self) -> PipelineState {
        self.pipeline.state()
    }

    /// Classification of the finished capture
    pub fn result(&self) -> Option<SignalClassification> {
        self.pipeline.result()
    }

    /// Half-period averages behind the last classification
    pub fn windows(&self) -> &[u16; PROBE_WINDOWS] {
        self.pipeline.acquisition().windows()
    }
}

impl<H: AdcCapture + ReferenceGenerator + ?Sized> Default for LogicProbe<H> {
    fn default() -> Self {
        Self::new()
    }
}
