// SPDX-License-Identifier: Apache-2.0

//! Bounded containers for captured edges and ADC samples.

use heapless::Vec;

use crate::config::{ADC_CHANNELS, CAPTURE_CAPACITY, PROBE_CAPTURED_POINTS};

/// Hardware timer counts of the comparator edges seen during one capture window.
///
/// Entries are non-decreasing within one window. Only the first [`len`](Self::len) entries exist;
/// a full buffer silently stops accepting edges, as the DMA channel it stands in for would.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CaptureBuffer {
    /// Captured timer counts
    ticks: Vec<u16, CAPTURE_CAPACITY>,
}

impl CaptureBuffer {
    /// Create an empty buffer
    pub const fn new() -> Self {
        Self { ticks: Vec::new() }
    }

    /// Drop every captured edge
    pub fn clear(&mut self) {
        self.ticks.clear();
    }

    /// Append an edge timestamp. Returns `false` once the buffer is full.
    pub fn push(&mut self, tick: u16) -> bool {
        self.ticks.push(tick).is_ok()
    }

    /// Number of valid entries
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    /// No edges captured
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    /// Valid entries, oldest first
    pub fn as_slice(&self) -> &[u16] {
        &self.ticks
    }

    /// Period between event `i - 1` and event `i`, for every `i` from `first` up to the last
    /// valid entry.
    ///
    /// Differences wrap like the 16-bit hardware counter does.
    pub fn periods(&self, first: usize) -> impl Iterator<Item = u16> + '_ {
        let first = first.max(1);
        self.ticks
            .iter()
            .skip(first)
            .zip(self.ticks.iter().skip(first - 1))
            .map(|(now, prev)| now.wrapping_sub(*prev))
    }
}

/// Probe-channel samples pulled out of an interleaved raw ADC buffer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SampleBuffer {
    /// ADC codes of the probe channel
    samples: Vec<u16, PROBE_CAPTURED_POINTS>,
}

impl SampleBuffer {
    /// Create an empty buffer
    pub const fn new() -> Self {
        Self {
            samples: Vec::new(),
        }
    }

    /// Replace the contents with the probe channel of `raw`. Points past capacity are dropped.
    pub fn fill_from_interleaved(&mut self, raw: &[u16]) {
        self.samples.clear();
        for sample in primary_channel(raw) {
            if self.samples.push(sample).is_err() {
                warn!(
                    "Raw ADC buffer holds more than {} probe points, dropping the rest",
                    PROBE_CAPTURED_POINTS
                );
                break;
            }
        }
    }

    /// Number of valid samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// No samples held
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Valid samples
    pub fn as_slice(&self) -> &[u16] {
        &self.samples
    }

    /// Valid samples, writable in place
    pub fn as_mut_slice(&mut self) -> &mut [u16] {
        &mut self.samples
    }
}

/// Minimum and maximum voltage seen in a block of samples, in volts at the probe tip.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VoltageRange {
    /// Lowest voltage
    pub min: f32,
    /// Highest voltage
    pub max: f32,
}

/// The probe channel of an interleaved raw ADC buffer (every [`ADC_CHANNELS`]th point).
pub fn primary_channel(raw: &[u16]) -> impl Iterator<Item = u16> + '_ {
    raw.iter().copied().step_by(ADC_CHANNELS)
}

/// Min/max statistics of `samples` scaled to volts. `None` for an empty block.
pub fn extended_statistics<I>(samples: I, volts_per_code: f32) -> Option<VoltageRange>
where
    I: IntoIterator<Item = u16>,
{
    let mut samples = samples.into_iter();
    let first = samples.next()?;
    let (min, max) = samples.fold((first, first), |(min, max), code| {
        (min.min(code), max.max(code))
    });
    Some(VoltageRange {
        min: min as f32 * volts_per_code,
        max: max as f32 * volts_per_code,
    })
}

/// Creates the raw buffer the ADC DMA channel writes into
#[cfg(feature = "rp2040")]
pub fn create_adc_buffer() -> Option<&'static mut [u16; crate::config::ADC_BUFFER_SIZE]> {
    cortex_m::singleton!(: [u16; crate::config::ADC_BUFFER_SIZE] = [0u16; crate::config::ADC_BUFFER_SIZE])
}
