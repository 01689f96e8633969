// SPDX-License-Identifier: Apache-2.0

//! Fixed instrument constants and the runtime [`Config`].
//!
//! Everything here is sized for the worst-case hardware window; the engines never index past the
//! valid count they track, so shrinking a capture never requires touching these values.

/// Capacity of the comparator edge buffer, in timer ticks.
pub const CAPTURE_CAPACITY: usize = 128;

/// Timer prescaler used in [`PrecisionMode::Slow`](crate::frequency::PrecisionMode::Slow).
///
/// A full 16-bit window lasts ~0.1 s with a 72 MHz timer clock.
pub const SLOW_PRESCALER: u32 = 50;
/// Timer prescaler used in [`PrecisionMode::Fast`](crate::frequency::PrecisionMode::Fast).
///
/// A full 16-bit window lasts ~8 ms with a 72 MHz timer clock.
pub const FAST_PRESCALER: u32 = 4;
/// Shortest inter-edge period accepted in slow mode. Anything shorter needs fast mode.
pub const SLOW_MIN_PERIOD: u16 = 80;
/// Shortest inter-edge period accepted in fast mode.
pub const FAST_MIN_PERIOD: u16 = 5;
/// Minimum number of captured edges for a measurement. The first two are discarded.
pub const MIN_EVENTS: usize = 3;

/// Largest code accepted by the comparator reference DAC (12 bit)
pub const DAC_MAX_CODE: u16 = 4095;
/// MCU analog reference, V
pub const MCU_VREF: f32 = 3.3;
/// Thresholds below this are never written to the DAC, V
pub const MIN_THRESHOLD_V: f32 = 0.1;
/// Comparator trigger level used until a calibration succeeds, V
pub const DEFAULT_TRIGGER_V: f32 = 1.5;

/// Points skipped at both ends of a calibration capture
pub const CALIB_START_OFFSET: usize = 8;
/// Calibration finishes once more than this many captures have been folded in
pub const CALIB_CYCLES: u8 = 10;
/// Calibrated levels below this voltage fall back to [`DEFAULT_TRIGGER_V`]
pub const CALIB_MIN_VOLTAGE: f32 = 0.2;
/// Starting value of the running minimum, well above any measurable voltage
pub const CALIB_MIN_SENTINEL: f32 = 500.0;

/// ADC full-scale code (12 bit)
pub const ADC_MAX_CODE: u16 = 4095;
/// ADC mid-scale code, used by the offset correction
pub const ADC_HALF_CODE: u16 = 2048;
/// Number of channels interleaved in one raw ADC buffer. The probe channel sits at even indices.
pub const ADC_CHANNELS: usize = 2;

/// Logic probe sample rate, Hz
pub const PROBE_SAMPLE_RATE_HZ: u32 = 10_000;
/// Logic probe reference generator frequency, Hz
pub const PROBE_GENERATOR_HZ: u32 = 250;
/// ADC points in one generator period
pub const PROBE_SAMPLE_PERIOD: usize = (PROBE_SAMPLE_RATE_HZ / PROBE_GENERATOR_HZ) as usize;
/// ADC points during which the generator holds one logic level
pub const PROBE_HALF_PERIOD: usize = PROBE_SAMPLE_PERIOD / 2;
/// Probe-channel points in one capture
pub const PROBE_CAPTURED_POINTS: usize = 160;
/// Number of half-period windows in one capture
pub const PROBE_WINDOWS: usize = PROBE_CAPTURED_POINTS / PROBE_HALF_PERIOD;
/// Points skipped at both ends of each half-period window
pub const PROBE_START_OFFSET: usize = 4;
/// Points averaged in each half-period window
pub const PROBE_ANALYSE_LENGTH: usize = PROBE_HALF_PERIOD - PROBE_START_OFFSET * 2;
/// Raw interleaved ADC buffer length
pub const ADC_BUFFER_SIZE: usize = PROBE_CAPTURED_POINTS * ADC_CHANNELS;

/// Phase difference above which a window pair looks like an open input, ADC codes
pub const PROBE_BIG_DIFF: i16 = 250;
/// Phase difference below which a window pair looks static, ADC codes
pub const PROBE_LOW_DIFF: i16 = 10;
/// Static level above this is a logic high (~2 V at the tip), ADC codes
pub const PROBE_HIGH_LEVEL: u16 = 260;
/// Static level below this is a logic low (~1 V at the tip), ADC codes
pub const PROBE_LOW_LEVEL: u16 = 130;
/// Zero offset between the interleaved channels at [`PROBE_SAMPLE_RATE_HZ`], ADC codes
pub const PROBE_ZERO_OFFSET: u16 = 11;

/// Runtime-tunable instrument parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Clock feeding the capture timer before prescaling, Hz
    pub timer_clock_hz: u32,
    /// Attenuation between the probe tip and the comparator/ADC input
    pub main_div: f32,
    /// Delay between entering calibration and the first capture, ms
    pub calib_settle_ms: u32,
    /// Time the calibration result stays on screen, ms
    pub calib_hold_ms: u32,
}

impl Config {
    /// Volts at the probe tip represented by one ADC code.
    pub fn volts_per_code(&self) -> f32 {
        MCU_VREF * self.main_div / ADC_MAX_CODE as f32
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timer_clock_hz: 72_000_000,
            main_div: 10.0,
            calib_settle_ms: 1000,
            calib_hold_ms: 2000,
        }
    }
}

/// A key must read pressed for longer than this before it counts, ms
pub const KEY_PRESS_MS: u32 = 50;
/// A released key stays locked for this long, ms
pub const KEY_RELEASE_MS: u32 = 50;
/// A key held for longer than this (from first contact) reports a hold, ms
pub const KEY_HOLD_MS: u32 = 900;
/// Key events are suppressed for this long after power-up, ms
pub const KEYS_STARTUP_MS: u32 = 300;
