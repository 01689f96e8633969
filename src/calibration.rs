// SPDX-License-Identifier: Apache-2.0

//! Trigger level auto-calibration.
//!
//! While the frequency meter runs, the ADC samples the probe signal a fixed number of times. The
//! comparator reference is then placed halfway between the lowest and highest voltage seen. Weak
//! signals keep the default trigger level instead.
//!
//! The controller has no enter/exit hooks: it spots a state change by comparing the state with
//! the one it saw on the previous tick, and arms the per-state delay at that moment.

use crate::{
    buffer::{extended_statistics, primary_channel},
    components::{AdcCapture, CaptureStatus, Deadline, Display, MillisClock, RedrawContext},
    config::{
        Config, ADC_CHANNELS, CALIB_CYCLES, CALIB_MIN_SENTINEL, CALIB_MIN_VOLTAGE,
        CALIB_START_OFFSET, DEFAULT_TRIGGER_V,
    },
};

/// Calibration progress.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationState {
    /// Dormant
    #[default]
    Idle,
    /// Waiting for the "calibrating" notice to settle before sampling
    WaitStart,
    /// Folding ADC captures into the running min/max
    Capturing,
    /// Result on screen until the hold delay expires
    Done,
}

/// Learns the comparator trigger level from repeated ADC captures.
#[derive(Debug, Clone)]
pub struct CalibrationController {
    /// Current state
    state: CalibrationState,
    /// State seen on the previous tick, for entry detection
    previous: CalibrationState,
    /// Settle or display-hold delay of the current state
    deadline: Deadline,
    /// ADC captures folded in so far
    cycle_count: u8,
    /// Lowest voltage seen, V
    min_voltage: f32,
    /// Highest voltage seen, V
    max_voltage: f32,
    /// Trigger level from the last finished calibration, V
    threshold_voltage: f32,
    /// Delay before the first capture, ms
    settle_ms: u32,
    /// Time the result stays on screen, ms
    hold_ms: u32,
    /// Probe-tip volts per ADC code
    volts_per_code: f32,
}

impl CalibrationController {
    /// Idle controller
    pub fn new(config: &Config) -> Self {
        Self {
            state: CalibrationState::Idle,
            previous: CalibrationState::Idle,
            deadline: Deadline::default(),
            cycle_count: 0,
            min_voltage: CALIB_MIN_SENTINEL,
            max_voltage: 0.0,
            threshold_voltage: DEFAULT_TRIGGER_V,
            settle_ms: config.calib_settle_ms,
            hold_ms: config.calib_hold_ms,
            volts_per_code: config.volts_per_code(),
        }
    }

    /// Request a calibration. Sampling starts once the settle delay has passed.
    pub fn begin(&mut self) {
        self.state = CalibrationState::WaitStart;
    }

    /// Abandon any calibration in progress.
    pub fn cancel(&mut self) {
        self.state = CalibrationState::Idle;
        self.previous = CalibrationState::Idle;
    }

    /// Current state
    pub fn state(&self) -> CalibrationState {
        self.state
    }

    /// ADC captures folded into the current calibration
    pub fn cycle_count(&self) -> u8 {
        self.cycle_count
    }

    /// Trigger level from the last finished calibration, V
    pub fn threshold_voltage(&self) -> f32 {
        self.threshold_voltage
    }

    /// Advance by one scheduler tick. Returns the new trigger level on the tick calibration
    /// finishes.
    pub fn poll<A, C, D>(&mut self, adc: &mut A, clock: &C, display: &mut D) -> Option<f32>
    where
        A: AdcCapture + ?Sized,
        C: MillisClock + ?Sized,
        D: Display + ?Sized,
    {
        let mut finished = None;

        if self.state != self.previous {
            if self.state == CalibrationState::WaitStart {
                debug!("Calibration requested, waiting {} ms", self.settle_ms);
                self.deadline = Deadline::arm(clock, self.settle_ms);
                display.notify_redraw(RedrawContext::CalibrationWait);
            }
        } else {
            match self.state {
                CalibrationState::Idle => {}
                CalibrationState::WaitStart => {
                    if self.deadline.elapsed(clock) {
                        self.state = CalibrationState::Capturing;
                        self.cycle_count = 0;
                        self.min_voltage = CALIB_MIN_SENTINEL;
                        self.max_voltage = 0.0;
                        adc.start_capture();
                        display.notify_redraw(RedrawContext::CalibrationCapture);
                    }
                }
                CalibrationState::Capturing => {
                    if adc.status() == CaptureStatus::Done {
                        self.fold(adc.raw_samples());
                        if self.cycle_count > CALIB_CYCLES {
                            self.threshold_voltage = self.trigger_level();
                            info!(
                                "Calibration done: {} V .. {} V, trigger {} V",
                                self.min_voltage, self.max_voltage, self.threshold_voltage
                            );
                            self.state = CalibrationState::Done;
                            self.deadline = Deadline::arm(clock, self.hold_ms);
                            display.notify_redraw(RedrawContext::CalibrationDone);
                            finished = Some(self.threshold_voltage);
                        } else {
                            adc.start_capture();
                        }
                    }
                }
                CalibrationState::Done => {
                    if self.deadline.elapsed(clock) {
                        self.state = CalibrationState::Idle;
                        display.notify_redraw(RedrawContext::CalibrationIdle);
                    }
                }
            }
        }

        self.previous = self.state;
        finished
    }

    /// Fold one raw capture into the running min/max.
    fn fold(&mut self, raw: &[u16]) {
        self.cycle_count += 1;
        let points = raw.len() / ADC_CHANNELS;
        let window = primary_channel(raw)
            .skip(CALIB_START_OFFSET)
            .take(points.saturating_sub(CALIB_START_OFFSET * 2));
        match extended_statistics(window, self.volts_per_code) {
            Some(range) => {
                self.min_voltage = self.min_voltage.min(range.min);
                self.max_voltage = self.max_voltage.max(range.max);
            }
            None => warn!("Calibration capture {} holds no samples", self.cycle_count),
        }
    }

    /// Midpoint of the observed range, or the default for signals too weak to trust.
    fn trigger_level(&self) -> f32 {
        if self.min_voltage > self.max_voltage {
            return DEFAULT_TRIGGER_V;
        }
        let level = (self.min_voltage + self.max_voltage) / 2.0;
        if level < CALIB_MIN_VOLTAGE {
            DEFAULT_TRIGGER_V
        } else {
            level
        }
    }
}
